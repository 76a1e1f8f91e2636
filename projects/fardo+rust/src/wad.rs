// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the binary file format used to store installable title packages.
//!
//! A package ("WAD") bundles the certificate chain, the ticket, the title metadata and the
//! encrypted content region of a title into a single file. The 64 byte header declares the
//! size of every section, sections follow in header order and each one is aligned up to 64
//! bytes.

use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::io;
use std::io::{Cursor, Read, Seek, Write};
use thiserror::Error;
use util::StreamPin;

/// A title package, with every section kept as raw bytes. Parsing of the individual
/// sections is done by [crate::Title] and the per-format modules.
#[derive(Debug, Clone)]
pub struct Wad {
    /// The kind of installation that the package will use.
    pub kind: WadKind,

    /// The format version of the package, always zero.
    pub version: u16,

    /// The raw bytes of the certificate chain section.
    pub certificate_chain_data: Vec<u8>,

    /// The raw bytes of the certificate revocation list section. Unused by every known
    /// package, usually empty.
    pub certificate_revocation_list_data: Vec<u8>,

    /// The raw bytes of the ticket section.
    pub ticket_data: Vec<u8>,

    /// The raw bytes of the title metadata section.
    pub title_metadata_data: Vec<u8>,

    /// The raw bytes of the content region section, including the alignment padding
    /// between blobs.
    pub content_data: Vec<u8>,

    /// The size of the content region as declared on the header. Derived from the content
    /// records, so it can be smaller than [Self::content_data].
    pub content_size: u32,

    /// The raw bytes of the footer section, used by older authoring tools. Usually empty.
    pub footer_data: Vec<u8>,
}

impl Wad {
    const HEADER_SIZE: u32 = 32;
    const SECTION_BOUNDARY: u64 = 64;

    fn align_u64(value: u32) -> u64 {
        util::align_to_boundary(value as u64, Self::SECTION_BOUNDARY)
    }

    /// Create a new [Wad] by parsing a stream.
    pub fn new<T: Read + Seek>(stream: T) -> Result<Self, WadError> {
        let mut stream = StreamPin::new(stream)?;

        let header_size = stream.read_u32::<BE>()?;

        if header_size != Self::HEADER_SIZE {
            return Err(WadError::InvalidHeaderSize(header_size));
        }

        let kind = WadKind::new(&mut stream)?;

        let version = stream.read_u16::<BE>()?;

        if version != 0 {
            return Err(WadError::UnknownFormatVersion(version));
        }

        let certificate_chain_size = stream.read_u32::<BE>()?;
        let certificate_revocation_list_size = stream.read_u32::<BE>()?;
        let ticket_size = stream.read_u32::<BE>()?;
        let title_metadata_size = stream.read_u32::<BE>()?;
        let content_size = stream.read_u32::<BE>()?;
        let footer_size = stream.read_u32::<BE>()?;

        // Sections follow in header order, each aligned up to the 64 byte boundary
        let mut offset = Self::align_u64(Self::HEADER_SIZE);

        let mut read_section = |size: u32, whole_span: bool| -> io::Result<Vec<u8>> {
            stream.seek_from_pin(offset as i64)?;

            // The content region spills past its declared size up to the next 16 byte
            // boundary, read its whole 64 aligned span instead. The file may legally end
            // before the final padding.
            let stored_size = if whole_span {
                Self::align_u64(size)
            } else {
                size as u64
            };

            let mut data = Vec::with_capacity(stored_size as usize);

            if whole_span {
                (&mut stream).take(stored_size).read_to_end(&mut data)?;
            } else {
                data.resize(stored_size as usize, 0);
                stream.read_exact(&mut data)?;
            }

            offset += Self::align_u64(size);

            Ok(data)
        };

        let certificate_chain_data = read_section(certificate_chain_size, false)?;
        let certificate_revocation_list_data = read_section(certificate_revocation_list_size, false)?;
        let ticket_data = read_section(ticket_size, false)?;
        let title_metadata_data = read_section(title_metadata_size, false)?;
        let content_data = read_section(content_size, true)?;
        let footer_data = read_section(footer_size, false)?;

        Ok(Self {
            kind,
            version,
            certificate_chain_data,
            certificate_revocation_list_data,
            ticket_data,
            title_metadata_data,
            content_data,
            content_size,
            footer_data,
        })
    }

    /// Create a new [Wad] by parsing an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WadError> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump into a stream.
    pub fn dump<T: Write + Seek>(&self, stream: T) -> io::Result<()> {
        let mut stream = StreamPin::new(stream)?;

        stream.write_u32::<BE>(Self::HEADER_SIZE)?;
        self.kind.dump(&mut stream)?;
        stream.write_u16::<BE>(self.version)?;
        stream.write_u32::<BE>(self.certificate_chain_data.len() as u32)?;
        stream.write_u32::<BE>(self.certificate_revocation_list_data.len() as u32)?;
        stream.write_u32::<BE>(self.ticket_data.len() as u32)?;
        stream.write_u32::<BE>(self.title_metadata_data.len() as u32)?;
        stream.write_u32::<BE>(self.content_size)?;
        stream.write_u32::<BE>(self.footer_data.len() as u32)?;
        stream.align_zeroed(Self::SECTION_BOUNDARY)?;

        for section in [
            &self.certificate_chain_data,
            &self.certificate_revocation_list_data,
            &self.ticket_data,
            &self.title_metadata_data,
            &self.content_data,
            &self.footer_data,
        ] {
            stream.write_all(section)?;
            stream.align_zeroed(Self::SECTION_BOUNDARY)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum WadError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("Invalid package header size: {0:#X}")]
    InvalidHeaderSize(u32),

    #[error("Unknown installable package type: {0:?}")]
    UnknownWadKind([u8; 2]),

    #[error("Unknown format version: {0}")]
    UnknownFormatVersion(u16),
}

/// Ways a package can install a title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WadKind {
    /// Install it as usual.
    Normal,

    /// The title is a version of the `boot2` bootloader.
    Boot2,
}

impl WadKind {
    fn new<T: Read>(mut stream: T) -> Result<Self, WadError> {
        let bytes = util::read_exact!(stream, 2)?;

        Ok(match &bytes {
            b"Is" => Self::Normal,

            b"ib" => Self::Boot2,

            _ => return Err(WadError::UnknownWadKind(bytes)),
        })
    }

    fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        match self {
            Self::Normal => write!(stream, "Is")?,
            Self::Boot2 => write!(stream, "ib")?,
        }

        Ok(())
    }
}
