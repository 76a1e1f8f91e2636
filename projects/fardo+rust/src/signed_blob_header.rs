// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the binary format used to sign tickets, title metadata and certificates.

use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::boxed::Box;
use std::io::{self, Read, Seek, Write};
use std::string::{FromUtf8Error, String};
use thiserror::Error;
use util::{StreamPin, WriteEx};

/// Blob placed at the start of some binary data to denote the entity that issued them.
#[derive(Debug, Clone)]
pub struct SignedBlobHeader {
    /// Signature of the blob.
    pub signature: SignedBlobHeaderSignature,

    /// Issuer of the signature.
    pub issuer: String,
}

impl SignedBlobHeader {
    /// Create a new [SignedBlobHeader] by parsing an stream.
    pub fn new<T: Read + Seek>(stream: T) -> Result<Self, SignedBlobHeaderError> {
        let mut stream = StreamPin::new(stream)?;

        let signature = SignedBlobHeaderSignature::new(&mut stream)?;
        stream.align_position(64)?;

        let issuer = util::read_string!(stream, 64)?;

        Ok(Self { signature, issuer })
    }

    /// Dump the signed blob header.
    pub fn dump<T: Write + Seek>(&self, stream: T) -> io::Result<()> {
        let mut stream = StreamPin::new(stream)?;

        self.signature.dump(&mut stream)?;
        stream.align_zeroed(64)?;
        stream.write_bytes_padded(self.issuer.as_bytes(), 64)?;

        Ok(())
    }

    /// Get the size of the signed blob header in bytes.
    pub fn size(&self) -> u32 {
        let size = match self.signature {
            SignedBlobHeaderSignature::Rsa4096Sha1(_) => 512,
            SignedBlobHeaderSignature::Rsa2048Sha1(_) => 256,
            SignedBlobHeaderSignature::EcdsaSha1(_) => 60,
        } + 68;

        util::align_to_boundary(size, 64) as u32
    }

    /// Offset of the signed body inside the full serialized blob. The hash protected by the
    /// signature covers everything starting at the issuer field.
    pub fn signature_body_offset(&self) -> u32 {
        self.size() - 64
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SignedBlobHeaderError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Unknown signature kind: {0:#X}")]
    UnknownSignatureKind(u32),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] FromUtf8Error),
}

/// Signature in different cryptography formats.
#[derive(Debug, Clone)]
pub enum SignedBlobHeaderSignature {
    /// RSA-4096 PKCS#1 v1.5 with SHA-1.
    Rsa4096Sha1(Box<[u8; 512]>),

    /// RSA-2048 PKCS#1 v1.5 with SHA-1.
    Rsa2048Sha1(Box<[u8; 256]>),

    /// ECDSA with SHA-1.
    EcdsaSha1(Box<[u8; 60]>),
}

impl SignedBlobHeaderSignature {
    fn new<T: Read>(mut stream: T) -> Result<Self, SignedBlobHeaderError> {
        Ok(match stream.read_u32::<BE>()? {
            0x010000 => {
                let buf = util::read_exact!(stream, 512)?;
                Self::Rsa4096Sha1(Box::new(buf))
            }

            0x010001 => {
                let buf = util::read_exact!(stream, 256)?;
                Self::Rsa2048Sha1(Box::new(buf))
            }

            0x010002 => {
                let buf = util::read_exact!(stream, 60)?;
                Self::EcdsaSha1(Box::new(buf))
            }

            kind => return Err(SignedBlobHeaderError::UnknownSignatureKind(kind)),
        })
    }

    fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        match self {
            Self::Rsa4096Sha1(data) => {
                stream.write_u32::<BE>(0x010000)?;
                stream.write_all(data.as_slice())?;
            }

            Self::Rsa2048Sha1(data) => {
                stream.write_u32::<BE>(0x010001)?;
                stream.write_all(data.as_slice())?;
            }

            Self::EcdsaSha1(data) => {
                stream.write_u32::<BE>(0x010002)?;
                stream.write_all(data.as_slice())?;
            }
        }

        Ok(())
    }

    /// Get the raw signature bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Rsa4096Sha1(data) => data.as_slice(),
            Self::Rsa2048Sha1(data) => data.as_slice(),
            Self::EcdsaSha1(data) => data.as_slice(),
        }
    }

    /// Overwrite the signature with zeroes, the first step of forging a signature.
    pub fn clear(&mut self) {
        match self {
            Self::Rsa4096Sha1(data) => **data = [0; 512],
            Self::Rsa2048Sha1(data) => **data = [0; 256],
            Self::EcdsaSha1(data) => **data = [0; 60],
        }
    }

    /// Either if the signature is all zeroes or not.
    pub fn is_cleared(&self) -> bool {
        self.bytes().iter().all(|&byte| byte == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn dummy_rsa2048_header() -> SignedBlobHeader {
        SignedBlobHeader {
            signature: SignedBlobHeaderSignature::Rsa2048Sha1(Box::new([0xAA; 256])),
            issuer: String::from("Root-CA00000001-XS00000003"),
        }
    }

    #[test]
    fn round_trip() {
        let header = dummy_rsa2048_header();

        let mut buffer = Cursor::new(Vec::new());
        header.dump(&mut buffer).unwrap();

        assert_eq!(buffer.get_ref().len(), 384);

        buffer.set_position(0);
        let parsed = SignedBlobHeader::new(&mut buffer).unwrap();

        assert_eq!(parsed.issuer, header.issuer);
        assert_eq!(parsed.signature.bytes(), header.signature.bytes());
    }

    #[test]
    fn sizes_per_signature_kind() {
        let mut header = dummy_rsa2048_header();
        assert_eq!(header.size(), 384);
        assert_eq!(header.signature_body_offset(), 320);

        header.signature = SignedBlobHeaderSignature::Rsa4096Sha1(Box::new([0xAA; 512]));
        assert_eq!(header.size(), 640);
        assert_eq!(header.signature_body_offset(), 576);

        header.signature = SignedBlobHeaderSignature::EcdsaSha1(Box::new([0xAA; 60]));
        assert_eq!(header.size(), 128);
    }

    #[test]
    fn unknown_signature_kind() {
        let mut buffer = Cursor::new([0xFF; 600]);

        assert!(matches!(
            SignedBlobHeader::new(&mut buffer),
            Err(SignedBlobHeaderError::UnknownSignatureKind(_))
        ));
    }

    #[test]
    fn clear_signature() {
        let mut header = dummy_rsa2048_header();

        assert!(!header.signature.is_cleared());
        header.signature.clear();
        assert!(header.signature.is_cleared());
    }
}
