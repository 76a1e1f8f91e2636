// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the binary file format used to store title metadata.
//!
//! The title metadata ("TMD") is the signed document that describes the layout of a title:
//! its version, the system software it runs under and the inventory of its content blobs.
//! Only version zero (V0) metadata is supported.

use crate::signed_blob_header::{SignedBlobHeader, SignedBlobHeaderError};
use crate::title_id::{TitleId, TitleKind};
use crate::title_version::{TitleVersion, TitleVersionError};
use bitflags::bitflags;
use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::io;
use std::io::Read;
use std::io::{Cursor, Seek, Write};
use thiserror::Error;
use util::{ReadEx, WriteEx};

/// Offset of the minor version field inside a serialized title metadata, used as the
/// brute-force counter while forging a signature.
const MINOR_VERSION_OFFSET: usize = 0x1E2;

/// Manifest data regard the title itself, its structure and allowed system access.
#[derive(Debug, Clone)]
pub struct TitleMetadata {
    /// Header with data to prove the authenticity that this data
    /// has being created by an authorized entity.
    pub signed_blob_header: SignedBlobHeader,

    /// Version of the
    /// [Certificate revocation list](https://en.wikipedia.org/wiki/Certificate_revocation_list)
    /// used for the Certificate Authority (CA) certificate.
    pub certificate_authority_certificate_revocation_list_version: u8,

    /// Version of the
    /// [Certificate revocation list](https://en.wikipedia.org/wiki/Certificate_revocation_list)
    /// used for the signer certificate.
    pub signer_certificate_revocation_list_version: u8,

    /// If the title is made to only run on the virtual Wii console (vWii) inside the
    /// Nintendo Wii U.
    pub is_vwii: bool,

    /// Title ID of the IOS this title runs under, `None` if the title is itself an IOS.
    ///
    /// If the title is a boot2 program then this entry will be its same title ID.
    pub system_ios_title_id: Option<TitleId>,

    /// Title ID of the title.
    pub title_id: TitleId,

    /// The type of the title.
    pub title_type: u32,

    /// Group ID of the publisher of the title.
    pub group_id: u16,

    /// The region of the title.
    pub region: Region,

    /// The parental control ratings of the title.
    pub ratings: [u8; 16],

    /// Reserved region.
    pub reserved_0: [u8; 12],

    /// The IPC mask of the title.
    pub ipc_mask: [u8; 12],

    /// Reserved region.
    pub reserved_1: [u8; 18],

    /// Bitflags of access rights to the hardware, see [AccessRights].
    pub access_rights: AccessRights,

    /// The version of the title.
    pub title_version: u16,

    /// The index value of the content entry where the boot data is located.
    pub boot_content_index: u16,

    /// Unused minor version. Doubles as the brute-force counter while forging a signature,
    /// see [Self::fakesign].
    pub minor_version: u16,

    /// Records of the different content blobs.
    pub content_records: Vec<ContentRecord>,
}

impl TitleMetadata {
    /// Parse a title metadata.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, TitleMetadataError> {
        let signed_blob_header = SignedBlobHeader::new(&mut stream)?;

        let format_version = stream.read_u8()?;

        if format_version != 0 {
            return Err(TitleMetadataError::IncompatibleVersion(format_version));
        }

        let certificate_authority_certificate_revocation_list_version = stream.read_u8()?;
        let signer_certificate_revocation_list_version = stream.read_u8()?;

        let is_vwii = stream.read_bool()?;

        let system_ios_title_id = match stream.read_u64::<BE>()? {
            0 => None,
            title_id => Some(TitleId::new(title_id)),
        };

        let title_id = TitleId::new(stream.read_u64::<BE>()?);
        let title_type = stream.read_u32::<BE>()?;
        let group_id = stream.read_u16::<BE>()?;

        // Skip 2 zeroed bytes
        stream.seek_relative(2)?;

        let region = Region::from_identifier(stream.read_u16::<BE>()?)?;
        let ratings = util::read_exact!(stream, 16)?;
        let reserved_0 = util::read_exact!(stream, 12)?;
        let ipc_mask = util::read_exact!(stream, 12)?;
        let reserved_1 = util::read_exact!(stream, 18)?;

        let access_rights = AccessRights::from_bits_retain(stream.read_u32::<BE>()?);
        let title_version = stream.read_u16::<BE>()?;
        let number_of_content_records = stream.read_u16::<BE>()?;
        let boot_content_index = stream.read_u16::<BE>()?;
        let minor_version = stream.read_u16::<BE>()?;

        let mut content_records = Vec::with_capacity(number_of_content_records as usize);

        for _ in 0..number_of_content_records {
            content_records.push(ContentRecord::new(&mut stream)?);
        }

        Ok(Self {
            signed_blob_header,
            certificate_authority_certificate_revocation_list_version,
            signer_certificate_revocation_list_version,
            is_vwii,
            system_ios_title_id,
            title_id,
            title_type,
            group_id,
            region,
            ratings,
            reserved_0,
            ipc_mask,
            reserved_1,
            access_rights,
            title_version,
            boot_content_index,
            minor_version,
            content_records,
        })
    }

    /// Parse a title metadata from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TitleMetadataError> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump into a stream.
    pub fn dump<T: Write + Seek>(&self, mut stream: T) -> io::Result<()> {
        self.signed_blob_header.dump(&mut stream)?;

        // Format version, always V0
        stream.write_u8(0)?;

        stream.write_u8(self.certificate_authority_certificate_revocation_list_version)?;
        stream.write_u8(self.signer_certificate_revocation_list_version)?;
        stream.write_bool(self.is_vwii)?;

        match &self.system_ios_title_id {
            None => stream.write_zeroed(8)?,
            Some(title_id) => title_id.dump(&mut stream)?,
        };

        self.title_id.dump(&mut stream)?;
        stream.write_u32::<BE>(self.title_type)?;
        stream.write_u16::<BE>(self.group_id)?;

        // Skip 2 zeroed bytes
        stream.write_zeroed(2)?;

        self.region.dump_identifier(&mut stream)?;
        stream.write_all(&self.ratings)?;
        stream.write_all(&self.reserved_0)?;
        stream.write_all(&self.ipc_mask)?;
        stream.write_all(&self.reserved_1)?;

        stream.write_u32::<BE>(self.access_rights.bits())?;
        stream.write_u16::<BE>(self.title_version)?;
        stream.write_u16::<BE>(self.content_records.len() as u16)?;
        stream.write_u16::<BE>(self.boot_content_index)?;
        stream.write_u16::<BE>(self.minor_version)?;

        for content_record in &self.content_records {
            content_record.dump(&mut stream)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }

    /// Get the size of the title metadata in bytes.
    pub fn size(&self) -> u32 {
        self.signed_blob_header.size() + 100 + 36 * self.content_records.len() as u32
    }

    /// Get the kind of the title, derived from the higher half of its title ID.
    pub fn title_kind(&self) -> TitleKind {
        self.title_id.kind()
    }

    /// Test a hardware access right of the title.
    pub fn access_right(&self, right: AccessRights) -> bool {
        self.access_rights.contains(right)
    }

    /// Get the content record with the given content index.
    pub fn content_record_with_index(&self, index: u16) -> Result<&ContentRecord, TitleMetadataError> {
        self.content_records
            .iter()
            .find(|record| record.index == index)
            .ok_or(TitleMetadataError::ContentNotFound)
    }

    /// Set a new title ID.
    pub fn set_title_id(&mut self, title_id: TitleId) {
        self.title_id = title_id;
    }

    /// Set a new title version, in either decimal or `major.minor` form. For the System Menu
    /// the standard form goes through the known builds table (`"4.3U"`, ...).
    pub fn set_title_version(&mut self, version: TitleVersion) -> Result<(), TitleMetadataError> {
        self.title_version = version.to_decimal(&self.title_id)?;

        Ok(())
    }

    /// Forge a signature that passes the `strcmp` based check of old system software
    /// versions ("fakesigning").
    ///
    /// The signature is zeroed and [Self::minor_version] is brute-forced as a 16 bit counter
    /// until the SHA-1 hash of the metadata body starts with a zero byte. Only the two
    /// counter bytes are patched on each attempt, the metadata is serialized once.
    pub fn fakesign(&mut self) -> Result<(), TitleMetadataError> {
        self.signed_blob_header.signature.clear();
        self.minor_version = 0;

        let mut buffer = self.to_bytes()?;
        let body_offset = self.signed_blob_header.signature_body_offset() as usize;

        for counter in 0..=u16::MAX {
            buffer[MINOR_VERSION_OFFSET..MINOR_VERSION_OFFSET + 2]
                .copy_from_slice(&counter.to_be_bytes());

            if Sha1::digest(&buffer[body_offset..])[0] == 0 {
                self.minor_version = counter;

                return Ok(());
            }
        }

        Err(TitleMetadataError::FakesignExhausted)
    }

    /// Either if the title metadata is currently fakesigned or not, see [Self::fakesign].
    pub fn is_fakesigned(&self) -> Result<bool, TitleMetadataError> {
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
pub enum TitleMetadataError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("Unable to parse the signed blob header: {0}")]
    SignedBlobHeaderError(#[from] SignedBlobHeaderError),

    #[error("The given region is not known: {0}")]
    UnknownRegion(u16),

    #[error("The given content record kind is not known: {0:#06X}")]
    UnknownContentRecordKind(u16),

    #[error("The version of the title metadata is not compatible (version: {0})")]
    IncompatibleVersion(u8),

    #[error("Title version error: {0}")]
    TitleVersionError(#[from] TitleVersionError),

    #[error("Content not found")]
    ContentNotFound,

    #[error("The brute-force counter overflowed without finding a suitable body hash")]
    FakesignExhausted,
}

bitflags! {
    /// Hardware access rights a title can be granted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessRights: u32 {
        /// Full hardware access from the PPC chip without going through the IOS
        /// (disables the `AHBPROT` protection).
        const AHB_ACCESS = 1 << 0;

        /// Access to the DVD drive.
        const DVD_VIDEO = 1 << 1;
    }
}

/// The different regions a title can be made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Region {
    Japan,
    USA,
    Europe,
    RegionFree,
    Korea,
}

impl Region {
    fn from_identifier(identifier: u16) -> Result<Self, TitleMetadataError> {
        match identifier {
            0 => Ok(Self::Japan),
            1 => Ok(Self::USA),
            2 => Ok(Self::Europe),
            3 => Ok(Self::RegionFree),
            4 => Ok(Self::Korea),

            identifier => Err(TitleMetadataError::UnknownRegion(identifier)),
        }
    }

    fn dump_identifier<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u16::<BE>(match &self {
            Self::Japan => 0,
            Self::USA => 1,
            Self::Europe => 2,
            Self::RegionFree => 3,
            Self::Korea => 4,
        })?;

        Ok(())
    }
}

/// The record of a content blob of a title.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentRecord {
    /// The ID of the content. Unique per title.
    pub id: u32,

    /// The index of the content, used as the seed of the initialization vector that
    /// encrypts its data.
    pub index: u16,

    /// The kind of the content.
    pub kind: ContentKind,

    /// The size of the decrypted content.
    pub size: u64,

    /// The SHA-1 hash of the decrypted content.
    pub hash: [u8; 20],
}

impl ContentRecord {
    /// Parse a content record.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, TitleMetadataError> {
        let id = stream.read_u32::<BE>()?;
        let index = stream.read_u16::<BE>()?;
        let kind = ContentKind::from_identifier(stream.read_u16::<BE>()?)?;
        let size = stream.read_u64::<BE>()?;
        let hash = util::read_exact!(stream, 20)?;

        Ok(Self {
            id,
            index,
            kind,
            size,
            hash,
        })
    }

    /// Dump into a stream.
    pub fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u32::<BE>(self.id)?;
        stream.write_u16::<BE>(self.index)?;
        self.kind.dump_identifier(&mut stream)?;
        stream.write_u64::<BE>(self.size)?;
        stream.write_all(&self.hash)?;

        Ok(())
    }
}

/// The kind (behaviour of the content inside the system) of a content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    /// A normal content.
    Normal,

    /// A content only seen on development titles.
    Development,

    /// A content verified through a hash tree.
    HashTree,

    /// A downloadable content for a title.
    Dlc,

    /// A content that can be shared between different titles, the system stores them on a
    /// common directory for reuse.
    Shared,
}

impl ContentKind {
    fn from_identifier(identifier: u16) -> Result<Self, TitleMetadataError> {
        match identifier {
            0x0001 => Ok(Self::Normal),
            0x0002 => Ok(Self::Development),
            0x0003 => Ok(Self::HashTree),
            0x4001 => Ok(Self::Dlc),
            0x8001 => Ok(Self::Shared),

            identifier => Err(TitleMetadataError::UnknownContentRecordKind(identifier)),
        }
    }

    fn dump_identifier<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u16::<BE>(match self {
            Self::Normal => 0x0001,
            Self::Development => 0x0002,
            Self::HashTree => 0x0003,
            Self::Dlc => 0x4001,
            Self::Shared => 0x8001,
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signed_blob_header::SignedBlobHeaderSignature;

    fn dummy_title_metadata() -> TitleMetadata {
        TitleMetadata {
            signed_blob_header: SignedBlobHeader {
                signature: SignedBlobHeaderSignature::Rsa2048Sha1(Box::new([0x33; 256])),
                issuer: String::from("Root-CA00000001-CP00000004"),
            },
            certificate_authority_certificate_revocation_list_version: 0,
            signer_certificate_revocation_list_version: 0,
            is_vwii: false,
            system_ios_title_id: Some(TitleId::new_with_halfs(0x00000001, 58)),
            title_id: TitleId::new_with_halfs(0x00010001, 0x48414741),
            title_type: 1,
            group_id: 0x3031,
            region: Region::USA,
            ratings: [0; 16],
            reserved_0: [0; 12],
            ipc_mask: [0; 12],
            reserved_1: [0; 18],
            access_rights: AccessRights::empty(),
            title_version: 0x0101,
            boot_content_index: 0,
            minor_version: 0,
            content_records: vec![
                ContentRecord {
                    id: 0,
                    index: 0,
                    kind: ContentKind::Normal,
                    size: 64,
                    hash: [0xAB; 20],
                },
                ContentRecord {
                    id: 1,
                    index: 1,
                    kind: ContentKind::Shared,
                    size: 45,
                    hash: [0xCD; 20],
                },
            ],
        }
    }

    #[test]
    fn dump_size_matches_size_method() {
        let title_metadata = dummy_title_metadata();

        assert_eq!(
            title_metadata.to_bytes().unwrap().len() as u32,
            title_metadata.size()
        );
        assert_eq!(title_metadata.size(), 484 + 36 * 2);
    }

    #[test]
    fn round_trip() {
        let title_metadata = dummy_title_metadata();
        let bytes = title_metadata.to_bytes().unwrap();

        let parsed = TitleMetadata::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.to_bytes().unwrap(), bytes);
        assert_eq!(parsed.content_records, title_metadata.content_records);
        assert_eq!(parsed.region, Region::USA);
    }

    #[test]
    fn v1_title_metadata_is_rejected() {
        let mut bytes = dummy_title_metadata().to_bytes().unwrap();
        bytes[0x180] = 1;

        assert!(matches!(
            TitleMetadata::from_bytes(&bytes),
            Err(TitleMetadataError::IncompatibleVersion(1))
        ));
    }

    #[test]
    fn title_kind_from_title_id() {
        assert_eq!(dummy_title_metadata().title_kind(), TitleKind::Channel);
    }

    #[test]
    fn access_rights_bit_test() {
        let mut title_metadata = dummy_title_metadata();
        assert!(!title_metadata.access_right(AccessRights::AHB_ACCESS));

        title_metadata.access_rights = AccessRights::from_bits_retain(0b11);
        assert!(title_metadata.access_right(AccessRights::AHB_ACCESS));
        assert!(title_metadata.access_right(AccessRights::DVD_VIDEO));
    }

    #[test]
    fn fakesign_uses_the_minor_version_as_counter() {
        let mut title_metadata = dummy_title_metadata();
        title_metadata.fakesign().unwrap();

        assert!(title_metadata.signed_blob_header.signature.is_cleared());

        let bytes = title_metadata.to_bytes().unwrap();
        assert_eq!(Sha1::digest(&bytes[320..])[0], 0);
        assert_eq!(
            u16::from_be_bytes([bytes[0x1E2], bytes[0x1E3]]),
            title_metadata.minor_version
        );

        assert!(title_metadata.is_fakesigned().unwrap());
    }

    #[test]
    fn set_title_version_system_menu_lookup() {
        let mut title_metadata = dummy_title_metadata();
        title_metadata.title_id = TitleId::SYSTEM_MENU;

        title_metadata
            .set_title_version(TitleVersion::from("4.3U"))
            .unwrap();

        assert_eq!(title_metadata.title_version, 513);
    }

    #[test]
    fn unknown_content_record_kind() {
        let mut bytes = dummy_title_metadata().to_bytes().unwrap();
        // First content record kind word
        bytes[0x1EA] = 0x7F;
        bytes[0x1EB] = 0x7F;

        assert!(matches!(
            TitleMetadata::from_bytes(&bytes),
            Err(TitleMetadataError::UnknownContentRecordKind(0x7F7F))
        ));
    }
}
