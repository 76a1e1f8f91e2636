// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the binary file format used to store tickets.
//!
//! A ticket is the signed document that grants the right to decrypt a title, it carries the
//! title key wrapped under one of the common keys. Only version zero (V0) tickets are
//! supported, the version one (V1) extension never shipped on retail channels of this
//! console family.

use crate::crypto;
use crate::signed_blob_header::{SignedBlobHeader, SignedBlobHeaderError};
use crate::title_id::TitleId;
use crate::title_version::{TitleVersion, TitleVersionError};
use bitflags::bitflags;
use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io;
use std::io::Read;
use std::io::{Cursor, Seek, Write};
use thiserror::Error;
use util::WriteEx;

/// Issuer prefixes that mark a ticket as generated for development consoles. Development
/// tickets wrap their title key under the development common key.
const DEVELOPMENT_ISSUERS: [&str; 2] = ["Root-CA00000002-XS00000006", "Root-CA00000002-XS00000004"];

/// Offset of the brute-force scratch region inside a serialized ticket.
const SIGNATURE_SCRATCH_OFFSET: usize = 0x1F2;

/// Manifest data regard the ownership of a title and its permissions over the hardware.
#[derive(Debug, Clone)]
pub struct Ticket {
    /// Header with data to prove the authenticity that this data
    /// has being created by an authorized entity.
    pub signed_blob_header: SignedBlobHeader,

    /// Public key emited by the "ticketing server",
    /// used for installation of the title in some platforms.
    pub ecc_public_key: [u8; 60],

    /// Version of the
    /// [Certificate revocation list](https://en.wikipedia.org/wiki/Certificate_revocation_list)
    /// used for the Certificate Authority (CA) certificate.
    pub certificate_authority_certificate_revocation_list_version: u8,

    /// Version of the
    /// [Certificate revocation list](https://en.wikipedia.org/wiki/Certificate_revocation_list)
    /// used for the signer certificate.
    pub signer_certificate_revocation_list_version: u8,

    /// Encrypted title key, this symetric key (after decryption)
    /// is used to encrypt the title content.
    pub encrypted_title_key: [u8; 16],

    /// The ID of the ticket.
    pub ticket_id: u64,

    /// The ID of the console associated with this ticket,
    /// `None` if the ticket is valid for all consoles.
    pub console_id: Option<u32>,

    /// The ID of the associated title.
    pub title_id: TitleId,

    /// The permissions of the "System App" to access the contents of the title.
    pub system_app_content_access: TicketSystemAppContentAccessFlags,

    /// The version of the title.
    pub title_version: u16,

    /// See [Self::permitted_title_mask].
    pub permitted_title_id: u32,

    /// Inverse mask applied over a title ID before comparing it against
    /// [Self::permitted_title_id] to decide if that title is permitted.
    pub permitted_title_mask: u32,

    /// The license of the title.
    pub license: TicketLicense,

    /// The index of the common key used to wrap the title key. Indices outside of the known
    /// table behave as index zero, like on real consoles.
    pub common_key_index: u8,

    /// Unknown region. Its first two bytes double as the brute-force counter while forging
    /// a signature, see [Self::fakesign].
    pub signature_scratch: [u8; 48],

    /// Set of bitflags regard if a content can be accessed (1) or not (0).
    pub content_access_permissions: [u8; 64],

    /// A set of limits over the use of the title.
    pub limit_entries: [TicketLimitEntry; 8],
}

impl Ticket {
    /// Parse a ticket.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, TicketError> {
        let signed_blob_header = SignedBlobHeader::new(&mut stream)?;
        let ecc_public_key = util::read_exact!(stream, 60)?;

        let format_version = stream.read_u8()?;

        if format_version != 0 {
            return Err(TicketError::IncompatibleVersion(format_version));
        }

        let certificate_authority_certificate_revocation_list_version = stream.read_u8()?;
        let signer_certificate_revocation_list_version = stream.read_u8()?;

        let encrypted_title_key = util::read_exact!(stream, 16)?;

        // Skip 1 reserved byte
        stream.seek_relative(1)?;

        let ticket_id = stream.read_u64::<BE>()?;

        let console_id = match stream.read_u32::<BE>()? {
            0 => None,
            value => Some(value),
        };

        let title_id = TitleId::new(stream.read_u64::<BE>()?);

        let system_app_content_access =
            TicketSystemAppContentAccessFlags::from_bits_retain(stream.read_u16::<BE>()?);

        let title_version = stream.read_u16::<BE>()?;

        let permitted_title_id = stream.read_u32::<BE>()?;
        let permitted_title_mask = stream.read_u32::<BE>()?;

        let license = TicketLicense::new(stream.read_u8()?)?;
        let common_key_index = stream.read_u8()?;

        let signature_scratch = util::read_exact!(stream, 48)?;
        let content_access_permissions = util::read_exact!(stream, 64)?;

        // Skip padding of 2 bytes
        stream.seek_relative(2)?;

        let mut limit_entries = [TicketLimitEntry::default(); 8];
        for limit_entry in &mut limit_entries {
            *limit_entry = TicketLimitEntry {
                kind: stream.read_u32::<BE>()?,
                maximum: stream.read_u32::<BE>()?,
            };
        }

        Ok(Self {
            signed_blob_header,
            ecc_public_key,
            certificate_authority_certificate_revocation_list_version,
            signer_certificate_revocation_list_version,
            encrypted_title_key,
            ticket_id,
            console_id,
            title_id,
            system_app_content_access,
            title_version,
            permitted_title_id,
            permitted_title_mask,
            license,
            common_key_index,
            signature_scratch,
            content_access_permissions,
            limit_entries,
        })
    }

    /// Parse a ticket from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TicketError> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump into a stream.
    pub fn dump<T: Write + Seek>(&self, mut stream: T) -> io::Result<()> {
        self.signed_blob_header.dump(&mut stream)?;
        stream.write_all(&self.ecc_public_key)?;

        // Format version, always V0
        stream.write_u8(0)?;

        stream.write_u8(self.certificate_authority_certificate_revocation_list_version)?;
        stream.write_u8(self.signer_certificate_revocation_list_version)?;
        stream.write_all(&self.encrypted_title_key)?;

        // Skip 1 reserved byte
        stream.write_zeroed(1)?;

        stream.write_u64::<BE>(self.ticket_id)?;
        stream.write_u32::<BE>(self.console_id.unwrap_or(0))?;
        self.title_id.dump(&mut stream)?;
        stream.write_u16::<BE>(self.system_app_content_access.bits())?;
        stream.write_u16::<BE>(self.title_version)?;
        stream.write_u32::<BE>(self.permitted_title_id)?;
        stream.write_u32::<BE>(self.permitted_title_mask)?;
        self.license.dump(&mut stream)?;
        stream.write_u8(self.common_key_index)?;
        stream.write_all(&self.signature_scratch)?;
        stream.write_all(&self.content_access_permissions)?;

        // Skip 2 bytes of padding
        stream.write_zeroed(2)?;

        for limit_entry in &self.limit_entries {
            stream.write_u32::<BE>(limit_entry.kind)?;
            stream.write_u32::<BE>(limit_entry.maximum)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }

    /// Get the size of the ticket in bytes.
    pub fn size(&self) -> u32 {
        292 + self.signed_blob_header.size()
    }

    /// Either if this ticket was generated to be used only in a specific console (the
    /// associated title was purchased) or not.
    pub fn is_console_unique(&self) -> bool {
        self.console_id.is_some()
    }

    /// Either if this ticket was generated for development consoles, decided by the issuer
    /// of its signature.
    pub fn is_dev(&self) -> bool {
        DEVELOPMENT_ISSUERS
            .iter()
            .any(|issuer| self.signed_blob_header.issuer.contains(issuer))
    }

    /// Decrypt the title key stored inside the ticket.
    pub fn decrypt_title_key(&self) -> Result<[u8; 16], TicketError> {
        Ok(crypto::decrypt_title_key(
            &self.encrypted_title_key,
            self.common_key_index,
            &self.title_id,
            self.is_dev(),
        )?)
    }

    /// Set a new title ID.
    ///
    /// The stored title key is wrapped under an initialization vector derived from the title
    /// ID, so after this call it is encrypted under the wrong vector. Use
    /// [crate::Title::set_title_id] to keep both in sync, or re-wrap the key manually.
    pub fn set_title_id(&mut self, title_id: TitleId) {
        self.title_id = title_id;
    }

    /// Set a new title version, in either decimal or `major.minor` form.
    pub fn set_title_version(&mut self, version: TitleVersion) -> Result<(), TicketError> {
        self.title_version = version.to_decimal(&self.title_id)?;

        Ok(())
    }

    /// Forge a signature that passes the `strcmp` based check of old system software
    /// versions ("fakesigning").
    ///
    /// The signature is zeroed and the first two bytes of [Self::signature_scratch] are
    /// brute-forced as a 16 bit counter until the SHA-1 hash of the ticket body starts with
    /// a zero byte. Only the two counter bytes are patched on each attempt, the ticket is
    /// serialized once.
    pub fn fakesign(&mut self) -> Result<(), TicketError> {
        self.signed_blob_header.signature.clear();
        self.signature_scratch[0..2].fill(0);

        let mut buffer = self.to_bytes()?;
        let body_offset = self.signed_blob_header.signature_body_offset() as usize;

        for counter in 0..=u16::MAX {
            buffer[SIGNATURE_SCRATCH_OFFSET..SIGNATURE_SCRATCH_OFFSET + 2]
                .copy_from_slice(&counter.to_be_bytes());

            if Sha1::digest(&buffer[body_offset..])[0] == 0 {
                self.signature_scratch[0..2].copy_from_slice(&counter.to_be_bytes());

                return Ok(());
            }
        }

        Err(TicketError::FakesignExhausted)
    }

    /// Either if the ticket is currently fakesigned or not, see [Self::fakesign].
    pub fn is_fakesigned(&self) -> Result<bool, TicketError> {
        if !self.signed_blob_header.signature.is_cleared() {
            return Ok(false);
        }

        let buffer = self.to_bytes()?;
        let body_offset = self.signed_blob_header.signature_body_offset() as usize;

        Ok(Sha1::digest(&buffer[body_offset..])[0] == 0)
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TicketError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Unable to parse the signed blob header: {0}")]
    SignedBlobHeaderError(#[from] SignedBlobHeaderError),

    #[error("The version of the ticket is not compatible (version: {0})")]
    IncompatibleVersion(u8),

    #[error("Invalid license kind identifier value: {0}")]
    InvalidLicenseKindIdentifierValue(u8),

    #[error("Title version error: {0}")]
    TitleVersionError(#[from] TitleVersionError),

    #[error("The brute-force counter overflowed without finding a suitable body hash")]
    FakesignExhausted,
}

bitflags! {
    /// Bitflags that indicate if a content (given its content index) can be accessed by the
    /// "System App".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TicketSystemAppContentAccessFlags: u16 {
        /// Content 0.
        const Content0 =  1 << 0;

        /// Content 1.
        const Content1 =  1 << 1;

        /// Content 2.
        const Content2 =  1 << 2;

        /// Content 3.
        const Content3 =  1 << 3;

        /// Content 4.
        const Content4 =  1 << 4;

        /// Content 5.
        const Content5 =  1 << 5;

        /// Content 6.
        const Content6 =  1 << 6;

        /// Content 7.
        const Content7 =  1 << 7;

        /// Content 8.
        const Content8 =  1 << 8;

        /// Content 9.
        const Content9 =  1 << 9;

        /// Content 10.
        const Content10 = 1 << 10;

        /// Content 11.
        const Content11 = 1 << 11;

        /// Content 12.
        const Content12 = 1 << 12;

        /// Content 13.
        const Content13 = 1 << 13;

        /// Content 14.
        const Content14 = 1 << 14;

        /// Content 15.
        const Content15 = 1 << 15;
    }
}

/// The kind of license used in a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketLicense {
    /// The normal license of a ticket.
    Normal,

    /// The ticket can be "exported" under a PRNG derived key.
    CanBeExported,
}

impl TicketLicense {
    fn new(identifier: u8) -> Result<Self, TicketError> {
        Ok(match identifier {
            0 => Self::Normal,
            1 => Self::CanBeExported,

            _ => {
                return Err(TicketError::InvalidLicenseKindIdentifierValue(identifier));
            }
        })
    }

    fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u8(match self {
            Self::Normal => 0,
            Self::CanBeExported => 1,
        })?;

        Ok(())
    }
}

/// A limit over the use of a title. Stored verbatim, entries with kind values outside of
/// the known table have been seen in the wild and must survive a round trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicketLimitEntry {
    /// The kind of the limit, see [Self::limit_kind].
    pub kind: u32,

    /// The maximum value enforced by the limit.
    pub maximum: u32,
}

impl TicketLimitEntry {
    /// Classify the limit by its kind value.
    pub fn limit_kind(&self) -> TicketLimitKind {
        match self.kind {
            0 | 3 => TicketLimitKind::NoLimit,
            1 => TicketLimitKind::TimeMinutes,
            4 => TicketLimitKind::LaunchCount,

            _ => TicketLimitKind::Unknown,
        }
    }
}

/// The known kinds of title usage limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketLimitKind {
    /// The title doesn't have any limit.
    NoLimit,

    /// The title can only be executed a determinate number of minutes.
    TimeMinutes,

    /// The title can only be launched a determinate number of times.
    LaunchCount,

    /// The limit kind is not part of the known table.
    Unknown,
}
