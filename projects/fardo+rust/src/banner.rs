// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the two header formats that wrap channel banner data.
//!
//! An IMD5 header precedes the `banner.bin` and `icon.bin` resources inside a channel
//! banner, an IMET header envelopes the banner file itself and stores the channel name in
//! ten languages. The hashes are preserved verbatim, they are not recomputed.

use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Seek, Write};
use thiserror::Error;
use util::WriteEx;

/// Magic number of an IMET header. It sits at offset 0x40, or at 0x80 when the banner
/// file starts with a build tag.
pub const IMET_MAGIC: [u8; 4] = *b"IMET";

const IMD5_MAGIC: [u8; 4] = *b"IMD5";

/// Number of languages a channel name is stored in: Japanese, English, German, French,
/// Spanish, Italian, Dutch, Simplified Chinese, Traditional Chinese and Korean.
const IMET_LANGUAGES: usize = 10;

/// Byte length of one stored channel name, UTF-16 with zero padding.
const IMET_NAME_SIZE: usize = 84;

/// The 32 byte header that precedes a banner resource file and carries its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imd5Header {
    /// The size of the file this header precedes.
    pub file_size: u32,

    /// The MD5 hash of the file this header precedes.
    pub hash: [u8; 16],
}

impl Imd5Header {
    /// Parse an IMD5 header.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, BannerError> {
        let magic = util::read_exact!(stream, 4)?;

        if magic != IMD5_MAGIC {
            return Err(BannerError::InvalidMagic);
        }

        let file_size = stream.read_u32::<BE>()?;

        // Skip 8 zeroed bytes
        stream.seek_relative(8)?;

        let hash = util::read_exact!(stream, 16)?;

        Ok(Self { file_size, hash })
    }

    /// Parse an IMD5 header from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BannerError> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump into a stream.
    pub fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_all(&IMD5_MAGIC)?;
        stream.write_u32::<BE>(self.file_size)?;
        stream.write_zeroed(8)?;
        stream.write_all(&self.hash)?;

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.dump(&mut buffer)?;

        Ok(buffer)
    }
}

/// The 0x600 byte envelope of a channel banner file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImetHeader {
    /// Length of the region covered by [Self::hash].
    pub hash_size: u32,

    /// Version of the header, always 3 on known banners.
    pub version: u32,

    /// The file sizes of `icon.bin`, `banner.bin` and `sound.bin`.
    pub sizes: [u32; 3],

    /// Unknown flag.
    pub flag: u32,

    /// The name of the channel in the ten supported languages.
    pub channel_names: [String; IMET_LANGUAGES],

    /// The MD5 hash over the start of the file, computed with this field zeroed.
    pub hash: [u8; 16],
}

impl ImetHeader {
    /// Parse an IMET header, with its magic expected at offset 0x40 from the given
    /// position.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, BannerError> {
        // Skip 64 zeroed bytes
        stream.seek_relative(64)?;

        let magic = util::read_exact!(stream, 4)?;

        if magic != IMET_MAGIC {
            return Err(BannerError::InvalidMagic);
        }

        let hash_size = stream.read_u32::<BE>()?;
        let version = stream.read_u32::<BE>()?;

        let mut sizes = [0; 3];
        for size in &mut sizes {
            *size = stream.read_u32::<BE>()?;
        }

        let flag = stream.read_u32::<BE>()?;

        let mut channel_names: [String; IMET_LANGUAGES] = Default::default();

        for name in &mut channel_names {
            let raw = util::read_exact!(stream, IMET_NAME_SIZE)?;
            *name = decode_utf16_name(&raw)?;
        }

        // Skip 588 zeroed bytes
        stream.seek_relative(588)?;

        let hash = util::read_exact!(stream, 16)?;

        Ok(Self {
            hash_size,
            version,
            sizes,
            flag,
            channel_names,
            hash,
        })
    }

    /// Parse an IMET header from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BannerError> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump into a stream.
    pub fn dump<T: Write>(&self, mut stream: T) -> Result<(), BannerError> {
        stream.write_zeroed(64)?;
        stream.write_all(&IMET_MAGIC)?;
        stream.write_u32::<BE>(self.hash_size)?;
        stream.write_u32::<BE>(self.version)?;

        for size in self.sizes {
            stream.write_u32::<BE>(size)?;
        }

        stream.write_u32::<BE>(self.flag)?;

        for name in &self.channel_names {
            stream.write_all(&encode_utf16_name(name)?)?;
        }

        stream.write_zeroed(588)?;
        stream.write_all(&self.hash)?;

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BannerError> {
        let mut buffer = Vec::new();
        self.dump(&mut buffer)?;

        Ok(buffer)
    }
}

fn decode_utf16_name(raw: &[u8]) -> Result<String, BannerError> {
    let mut units = Vec::with_capacity(raw.len() / 2);

    for pair in raw.chunks_exact(2) {
        let unit = u16::from_be_bytes([pair[0], pair[1]]);

        if unit == 0 {
            break;
        }

        units.push(unit);
    }

    String::from_utf16(&units).map_err(|_| BannerError::MalformedChannelName)
}

fn encode_utf16_name(name: &str) -> Result<[u8; IMET_NAME_SIZE], BannerError> {
    let mut raw = [0; IMET_NAME_SIZE];
    let mut position = 0;

    for unit in name.encode_utf16() {
        if position + 2 > IMET_NAME_SIZE {
            return Err(BannerError::ChannelNameTooLong(name.to_owned()));
        }

        raw[position..position + 2].copy_from_slice(&unit.to_be_bytes());
        position += 2;
    }

    Ok(raw)
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum BannerError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("The given data does not carry the expected banner header magic")]
    InvalidMagic,

    #[error("A stored channel name is not valid UTF-16")]
    MalformedChannelName,

    #[error("The channel name does not fit inside the header: {0}")]
    ChannelNameTooLong(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imd5_round_trip() {
        let header = Imd5Header {
            file_size: 0x1234,
            hash: [0xAB; 16],
        };

        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], b"IMD5");

        assert_eq!(Imd5Header::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn imet_round_trip() {
        let mut channel_names: [String; IMET_LANGUAGES] = Default::default();
        channel_names[1] = String::from("Homebrew Channel");

        let header = ImetHeader {
            hash_size: 0x600,
            version: 3,
            sizes: [0x80, 0x100, 0x180],
            flag: 0,
            channel_names,
            hash: [0xCD; 16],
        };

        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 0x600);
        assert_eq!(&bytes[0x40..0x44], &IMET_MAGIC);

        let parsed = ImetHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.channel_names[1], "Homebrew Channel");
    }

    #[test]
    fn imet_rejects_oversized_names() {
        let mut channel_names: [String; IMET_LANGUAGES] = Default::default();
        channel_names[0] = "x".repeat(60);

        let header = ImetHeader {
            hash_size: 0x600,
            version: 3,
            sizes: [0; 3],
            flag: 0,
            channel_names,
            hash: [0; 16],
        };

        assert!(matches!(
            header.to_bytes(),
            Err(BannerError::ChannelNameTooLong(_))
        ));
    }

    #[test]
    fn invalid_magic() {
        assert!(matches!(
            Imd5Header::from_bytes(&[0; 32]),
            Err(BannerError::InvalidMagic)
        ));
    }
}
