// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Coherent view over every component of an installable title.
//!
//! A [Title] ties the certificate chain, the ticket, the title metadata and the content
//! region together so callers never see inconsistent state: the title IDs of the ticket and
//! the metadata are checked on load and updated together, and the metadata content records
//! are re-synchronized with the content region before every dump.

use crate::certificate_chain::{CertificateChain, CertificateChainError};
use crate::content_region::{ContentRegion, ContentRegionError};
use crate::crypto;
use crate::ticket::{Ticket, TicketError};
use crate::title_id::TitleId;
use crate::title_metadata::{ContentKind, TitleMetadata, TitleMetadataError};
use crate::title_version::TitleVersion;
use crate::wad::{Wad, WadError, WadKind};
use std::io;
use std::io::{Cursor, Read, Seek, Write};
use thiserror::Error;

/// The size of a storage block shown by the console, 128 KiB. Any partially used block
/// counts as a whole one.
const BLOCK_SIZE: u64 = 131072;

/// A whole installable title: certificate chain, ticket, title metadata and contents.
#[derive(Debug, Clone)]
pub struct Title {
    /// The certificate chain of the title.
    pub certificate_chain: CertificateChain,

    /// The raw bytes of the certificate revocation list section of the source package.
    /// Unused by every known package, usually empty.
    pub certificate_revocation_list_data: Vec<u8>,

    /// The ticket of the title.
    pub ticket: Ticket,

    /// The title metadata of the title.
    pub title_metadata: TitleMetadata,

    /// The content region of the title.
    pub content_region: ContentRegion,

    /// The raw bytes of the footer section of the source package. Usually empty.
    pub footer_data: Vec<u8>,
}

impl Title {
    /// Build a title from a parsed package, checking that its components agree with each
    /// other.
    pub fn from_wad(wad: &Wad) -> Result<Self, TitleError> {
        let certificate_chain = CertificateChain::from_bytes(&wad.certificate_chain_data)?;
        let ticket = Ticket::from_bytes(&wad.ticket_data)?;
        let title_metadata = TitleMetadata::from_bytes(&wad.title_metadata_data)?;

        let content_region =
            ContentRegion::from_bytes(&wad.content_data, &title_metadata.content_records)?;

        if ticket.title_id != title_metadata.title_id {
            return Err(TitleError::TitleIdMismatch {
                ticket: ticket.title_id,
                title_metadata: title_metadata.title_id,
            });
        }

        Ok(Self {
            certificate_chain,
            certificate_revocation_list_data: wad.certificate_revocation_list_data.clone(),
            ticket,
            title_metadata,
            content_region,
            footer_data: wad.footer_data.clone(),
        })
    }

    /// Parse a whole package from a stream.
    pub fn new<T: Read + Seek>(stream: T) -> Result<Self, TitleError> {
        Self::from_wad(&Wad::new(stream)?)
    }

    /// Parse a whole package from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TitleError> {
        Self::from_wad(&Wad::from_bytes(bytes)?)
    }

    /// Pack the title back into a package.
    ///
    /// The metadata content records are re-synchronized with the content region first, and
    /// the package type switches to the boot-chain one when the title is `boot2`.
    pub fn to_wad(&mut self) -> Result<Wad, TitleError> {
        self.title_metadata.content_records = self.content_region.content_records();

        let kind = if self.title_metadata.title_id == TitleId::BOOT2 {
            WadKind::Boot2
        } else {
            WadKind::Normal
        };

        Ok(Wad {
            kind,
            version: 0,
            certificate_chain_data: self.certificate_chain.to_bytes()?,
            certificate_revocation_list_data: self.certificate_revocation_list_data.clone(),
            ticket_data: self.ticket.to_bytes()?,
            title_metadata_data: self.title_metadata.to_bytes()?,
            content_data: self.content_region.to_bytes()?,
            content_size: self.content_region.size() as u32,
            footer_data: self.footer_data.clone(),
        })
    }

    /// Pack and dump the title into a stream.
    pub fn dump<T: Write + Seek>(&mut self, stream: T) -> Result<(), TitleError> {
        self.to_wad()?.dump(stream)?;

        Ok(())
    }

    /// Pack and dump the title into an owned buffer.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, TitleError> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }

    /// Set a new title ID on both the ticket and the title metadata.
    ///
    /// The title key is wrapped under an initialization vector derived from the title ID,
    /// so it is unwrapped with the old ID and wrapped again under the new one in the same
    /// step.
    pub fn set_title_id(&mut self, title_id: TitleId) -> Result<(), TitleError> {
        let title_key = self.ticket.decrypt_title_key()?;

        self.ticket.set_title_id(title_id);
        self.ticket.encrypted_title_key = crypto::encrypt_title_key(
            &title_key,
            self.ticket.common_key_index,
            &title_id,
            self.ticket.is_dev(),
        )?;

        self.title_metadata.set_title_id(title_id);

        Ok(())
    }

    /// Set a new title version on both the ticket and the title metadata, in either
    /// decimal or `major.minor` form.
    pub fn set_title_version(&mut self, version: TitleVersion) -> Result<(), TitleError> {
        self.title_metadata.set_title_version(version.clone())?;
        self.ticket.set_title_version(version)?;

        Ok(())
    }

    /// Get the decrypted bytes of the content with the given content index, using the
    /// title key of the ticket.
    pub fn content_with_index(
        &self,
        index: u16,
        skip_hash: bool,
    ) -> Result<Vec<u8>, TitleError> {
        let title_key = self.ticket.decrypt_title_key()?;

        Ok(self
            .content_region
            .decrypted_with_index(index, &title_key, skip_hash)?)
    }

    /// Get the decrypted bytes of the content with the given content ID, using the title
    /// key of the ticket.
    pub fn content_with_id(&self, id: u32, skip_hash: bool) -> Result<Vec<u8>, TitleError> {
        let title_key = self.ticket.decrypt_title_key()?;

        Ok(self
            .content_region
            .decrypted_with_id(id, &title_key, skip_hash)?)
    }

    fn sync_content_records(&mut self) {
        self.title_metadata.content_records = self.content_region.content_records();
    }

    /// Add a decrypted content, see [ContentRegion::add]. The metadata records are
    /// refreshed afterwards.
    pub fn add_content(
        &mut self,
        data: &[u8],
        id: u32,
        kind: ContentKind,
    ) -> Result<(), TitleError> {
        let title_key = self.ticket.decrypt_title_key()?;

        self.content_region.add(data, id, kind, &title_key)?;
        self.sync_content_records();

        Ok(())
    }

    /// Add an already encrypted content, see [ContentRegion::add_encrypted]. The metadata
    /// records are refreshed afterwards.
    pub fn add_encrypted_content(
        &mut self,
        data: Vec<u8>,
        id: u32,
        index: u16,
        kind: ContentKind,
        size: u64,
        hash: [u8; 20],
    ) -> Result<(), TitleError> {
        self.content_region
            .add_encrypted(data, id, index, kind, size, hash)?;
        self.sync_content_records();

        Ok(())
    }

    /// Replace the content at the given content index with decrypted data, see
    /// [ContentRegion::set]. The metadata records are refreshed afterwards.
    pub fn set_content(
        &mut self,
        data: &[u8],
        index: u16,
        id: Option<u32>,
        kind: Option<ContentKind>,
    ) -> Result<(), TitleError> {
        let title_key = self.ticket.decrypt_title_key()?;

        self.content_region.set(data, index, &title_key, id, kind)?;
        self.sync_content_records();

        Ok(())
    }

    /// Replace the content at the given content index with already encrypted data, see
    /// [ContentRegion::set_encrypted]. The metadata records are refreshed afterwards.
    pub fn set_encrypted_content(
        &mut self,
        data: Vec<u8>,
        index: u16,
        size: u64,
        hash: [u8; 20],
        id: Option<u32>,
        kind: Option<ContentKind>,
    ) -> Result<(), TitleError> {
        self.content_region
            .set_encrypted(data, index, size, hash, id, kind)?;
        self.sync_content_records();

        Ok(())
    }

    /// Load decrypted data for a record already present at the given content index, see
    /// [ContentRegion::load].
    pub fn load_content(&mut self, data: &[u8], index: u16) -> Result<(), TitleError> {
        let title_key = self.ticket.decrypt_title_key()?;

        self.content_region.load(data, index, &title_key)?;

        Ok(())
    }

    /// Get the installed size of the title in bytes: the serialized ticket and title
    /// metadata plus the decrypted size of its contents. Shared contents are only counted
    /// when `include_shared` is set, as they may already be present on the console.
    pub fn installed_size(&self, include_shared: bool) -> Result<u64, TitleError> {
        let mut size =
            self.ticket.to_bytes()?.len() as u64 + self.title_metadata.to_bytes()?.len() as u64;

        for content in &self.content_region.contents {
            if content.record.kind == ContentKind::Shared && !include_shared {
                continue;
            }

            size += content.record.size;
        }

        Ok(size)
    }

    /// Get the installed size of the title in the 128 KiB storage blocks shown by the
    /// console, see [Self::installed_size].
    pub fn installed_size_blocks(&self, include_shared: bool) -> Result<u64, TitleError> {
        Ok(self.installed_size(include_shared)?.div_ceil(BLOCK_SIZE))
    }

    /// Forge the signatures of both the title metadata and the ticket, see
    /// [TitleMetadata::fakesign] and [Ticket::fakesign].
    pub fn fakesign(&mut self) -> Result<(), TitleError> {
        self.title_metadata.fakesign()?;
        self.ticket.fakesign()?;

        Ok(())
    }

    /// Either if both the title metadata and the ticket are currently fakesigned or not.
    pub fn is_fakesigned(&self) -> Result<bool, TitleError> {
        Ok(self.title_metadata.is_fakesigned()? && self.ticket.is_fakesigned()?)
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TitleError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("Package error: {0}")]
    WadError(#[from] WadError),

    #[error("Certificate chain error: {0}")]
    CertificateChainError(#[from] CertificateChainError),

    #[error("Ticket error: {0}")]
    TicketError(#[from] TicketError),

    #[error("Title metadata error: {0}")]
    TitleMetadataError(#[from] TitleMetadataError),

    #[error("Content region error: {0}")]
    ContentRegionError(#[from] ContentRegionError),

    #[error(
        "The title IDs of the ticket ({ticket}) and the title metadata ({title_metadata}) do not match"
    )]
    TitleIdMismatch {
        ticket: TitleId,
        title_metadata: TitleId,
    },
}
