// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the binary file format used to store certificate chains.
//!
//! Installable packages carry exactly three certificates: the Certificate Authority (CA),
//! the title metadata signer (its name carries `CP`) and the ticket signer (its name
//! carries `XS`). The CA certificate is in turn signed by the hard-coded root key of the
//! console family.

use crate::signed_blob_header::{SignedBlobHeader, SignedBlobHeaderError};
use crate::ticket::Ticket;
use crate::title_metadata::TitleMetadata;
use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::io::{self, Cursor, Read, Seek, Write};
use std::string::FromUtf8Error;
use thiserror::Error;
use util::StreamPin;
use util::WriteEx;

/// Modulus of the RSA-4096 root key that signs the retail Certificate Authority
/// (`CA00000001`).
const ROOT_KEY_MODULUS_RETAIL: [u8; 512] = [
    0xf8, 0x24, 0x6c, 0x58, 0xba, 0xe7, 0x50, 0x03, 0x01, 0xfb, 0xb7, 0xc2, 0xeb, 0xe0, 0x01, 0x05,
    0x71, 0xda, 0x92, 0x23, 0x78, 0xf0, 0x51, 0x4e, 0xc0, 0x03, 0x1d, 0xd0, 0xd2, 0x1e, 0xd3, 0xd0,
    0x7e, 0xfc, 0x85, 0x20, 0x69, 0xb5, 0xde, 0x9b, 0xb9, 0x51, 0xa8, 0xbc, 0x90, 0xa2, 0x44, 0x92,
    0x6d, 0x37, 0x92, 0x95, 0xae, 0x94, 0x36, 0xaa, 0xa6, 0xa3, 0x02, 0x51, 0x0c, 0x7b, 0x1d, 0xed,
    0xd5, 0xfb, 0x20, 0x86, 0x9d, 0x7f, 0x30, 0x16, 0xf6, 0xbe, 0x65, 0xd3, 0x83, 0xa1, 0x6d, 0xb3,
    0x32, 0x1b, 0x95, 0x35, 0x18, 0x90, 0xb1, 0x70, 0x02, 0x93, 0x7e, 0xe1, 0x93, 0xf5, 0x7e, 0x99,
    0xa2, 0x47, 0x4e, 0x9d, 0x38, 0x24, 0xc7, 0xae, 0xe3, 0x85, 0x41, 0xf5, 0x67, 0xe7, 0x51, 0x8c,
    0x7a, 0x0e, 0x38, 0xe7, 0xeb, 0xaf, 0x41, 0x19, 0x1b, 0xcf, 0xf1, 0x7b, 0x42, 0xa6, 0xb4, 0xed,
    0xe6, 0xce, 0x8d, 0xe7, 0x31, 0x8f, 0x7f, 0x52, 0x04, 0xb3, 0x99, 0x0e, 0x22, 0x67, 0x45, 0xaf,
    0xd4, 0x85, 0xb2, 0x44, 0x93, 0x00, 0x8b, 0x08, 0xc7, 0xf6, 0xb7, 0xe5, 0x6b, 0x02, 0xb3, 0xe8,
    0xfe, 0x0c, 0x9d, 0x85, 0x9c, 0xb8, 0xb6, 0x82, 0x23, 0xb8, 0xab, 0x27, 0xee, 0x5f, 0x65, 0x38,
    0x07, 0x8b, 0x2d, 0xb9, 0x1e, 0x2a, 0x15, 0x3e, 0x85, 0x81, 0x80, 0x72, 0xa2, 0x3b, 0x6d, 0xd9,
    0x32, 0x81, 0x05, 0x4f, 0x6f, 0xb0, 0xf6, 0xf5, 0xad, 0x28, 0x3e, 0xca, 0x0b, 0x7a, 0xf3, 0x54,
    0x55, 0xe0, 0x3d, 0xa7, 0xb6, 0x83, 0x26, 0xf3, 0xec, 0x83, 0x4a, 0xf3, 0x14, 0x04, 0x8a, 0xc6,
    0xdf, 0x20, 0xd2, 0x85, 0x08, 0x67, 0x3c, 0xab, 0x62, 0xa2, 0xc7, 0xbc, 0x13, 0x1a, 0x53, 0x3e,
    0x0b, 0x66, 0x80, 0x6b, 0x1c, 0x30, 0x66, 0x4b, 0x37, 0x23, 0x31, 0xbd, 0xc4, 0xb0, 0xca, 0xd8,
    0xd1, 0x1e, 0xe7, 0xbb, 0xd9, 0x28, 0x55, 0x48, 0xaa, 0xec, 0x1f, 0x66, 0xe8, 0x21, 0xb3, 0xc8,
    0xa0, 0x47, 0x69, 0x00, 0xc5, 0xe6, 0x88, 0xe8, 0x0c, 0xce, 0x3c, 0x61, 0xd6, 0x9c, 0xbb, 0xa1,
    0x37, 0xc6, 0x60, 0x4f, 0x7a, 0x72, 0xdd, 0x8c, 0x7b, 0x3e, 0x3d, 0x51, 0x29, 0x0d, 0xaa, 0x6a,
    0x59, 0x7b, 0x08, 0x1f, 0x9d, 0x36, 0x33, 0xa3, 0x46, 0x7a, 0x35, 0x61, 0x09, 0xac, 0xa7, 0xdd,
    0x7d, 0x2e, 0x2f, 0xb2, 0xc1, 0xae, 0xb8, 0xe2, 0x0f, 0x48, 0x92, 0xd8, 0xb9, 0xf8, 0xb4, 0x6f,
    0x4e, 0x3c, 0x11, 0xf4, 0xf4, 0x7d, 0x8b, 0x75, 0x7d, 0xfe, 0xfe, 0xa3, 0x89, 0x9c, 0x33, 0x59,
    0x5c, 0x5e, 0xfd, 0xeb, 0xcb, 0xab, 0xe8, 0x41, 0x3e, 0x3a, 0x9a, 0x80, 0x3c, 0x69, 0x35, 0x6e,
    0xb2, 0xb2, 0xad, 0x5c, 0xc4, 0xc8, 0x58, 0x45, 0x5e, 0xf5, 0xf7, 0xb3, 0x06, 0x44, 0xb4, 0x7c,
    0x64, 0x06, 0x8c, 0xdf, 0x80, 0x9f, 0x76, 0x02, 0x5a, 0x2d, 0xb4, 0x46, 0xe0, 0x3d, 0x7c, 0xf6,
    0x2f, 0x34, 0xe7, 0x02, 0x45, 0x7b, 0x02, 0xa4, 0xcf, 0x5d, 0x9d, 0xd5, 0x3c, 0xa5, 0x3a, 0x7c,
    0xa6, 0x29, 0x78, 0x8c, 0x67, 0xca, 0x08, 0xbf, 0xec, 0xca, 0x43, 0xa9, 0x57, 0xad, 0x16, 0xc9,
    0x4e, 0x1c, 0xd8, 0x75, 0xca, 0x10, 0x7d, 0xce, 0x7e, 0x01, 0x18, 0xf0, 0xdf, 0x6b, 0xfe, 0xe5,
    0x1d, 0xdb, 0xd9, 0x91, 0xc2, 0x6e, 0x60, 0xcd, 0x48, 0x58, 0xaa, 0x59, 0x2c, 0x82, 0x00, 0x75,
    0xf2, 0x9f, 0x52, 0x6c, 0x91, 0x7c, 0x6f, 0xe5, 0x40, 0x3e, 0xa7, 0xd4, 0xa5, 0x0c, 0xec, 0x3b,
    0x73, 0x84, 0xde, 0x88, 0x6e, 0x82, 0xd2, 0xeb, 0x4d, 0x4e, 0x42, 0xb5, 0xf2, 0xb1, 0x49, 0xa8,
    0x1e, 0xa7, 0xce, 0x71, 0x44, 0xdc, 0x29, 0x94, 0xcf, 0xc4, 0x4e, 0x1f, 0x91, 0xcb, 0xd4, 0x95,
];

/// Modulus of the RSA-4096 root key that signs the development Certificate Authority
/// (`CA00000002`).
const ROOT_KEY_MODULUS_DEV: [u8; 512] = [
    0xd0, 0x1f, 0xe1, 0x00, 0xd4, 0x35, 0x56, 0xb2, 0x4b, 0x56, 0xda, 0xe9, 0x71, 0xb5, 0xa5, 0xd3,
    0x84, 0xb9, 0x30, 0x03, 0xbe, 0x1b, 0xbf, 0x28, 0xa2, 0x30, 0x5b, 0x06, 0x06, 0x45, 0x46, 0x7d,
    0x5b, 0x02, 0x51, 0xd2, 0x56, 0x1a, 0x27, 0x4f, 0x9e, 0x9f, 0x9c, 0xec, 0x64, 0x61, 0x50, 0xab,
    0x3d, 0x2a, 0xe3, 0x36, 0x68, 0x66, 0xac, 0xa4, 0xba, 0xe8, 0x1a, 0xe3, 0xd7, 0x9a, 0xa6, 0xb0,
    0x4a, 0x8b, 0xcb, 0xa7, 0xe6, 0xfb, 0x64, 0x89, 0x45, 0xeb, 0xdf, 0xdb, 0x85, 0xba, 0x09, 0x1f,
    0xd7, 0xd1, 0x14, 0xb5, 0xa3, 0xa7, 0x80, 0xe3, 0xa2, 0x2e, 0x6e, 0xcd, 0x87, 0xb5, 0xa4, 0xc6,
    0xf9, 0x10, 0xe4, 0x03, 0x22, 0x08, 0x81, 0x4b, 0x0c, 0xee, 0xa1, 0xa1, 0x7d, 0xf7, 0x39, 0x69,
    0x5f, 0x61, 0x7e, 0xf6, 0x35, 0x28, 0xdb, 0x94, 0x96, 0x37, 0xa0, 0x56, 0x03, 0x7f, 0x7b, 0x32,
    0x41, 0x38, 0x95, 0xc0, 0xa8, 0xf1, 0x98, 0x2e, 0x15, 0x65, 0xe3, 0x8e, 0xed, 0xc2, 0x2e, 0x59,
    0x0e, 0xe2, 0x67, 0x7b, 0x86, 0x09, 0xf4, 0x8c, 0x2e, 0x30, 0x3f, 0xbc, 0x40, 0x5c, 0xac, 0x18,
    0x04, 0x2f, 0x82, 0x20, 0x84, 0xe4, 0x93, 0x68, 0x03, 0xda, 0x7f, 0x41, 0x34, 0x92, 0x48, 0x56,
    0x2b, 0x8e, 0xe1, 0x2f, 0x78, 0xf8, 0x03, 0x24, 0x63, 0x30, 0xbc, 0x7b, 0xe7, 0xee, 0x72, 0x4a,
    0xf4, 0x58, 0xa4, 0x72, 0xe7, 0xab, 0x46, 0xa1, 0xa7, 0xc1, 0x0c, 0x2f, 0x18, 0xfa, 0x07, 0xc3,
    0xdd, 0xd8, 0x98, 0x06, 0xa1, 0x1c, 0x9c, 0xc1, 0x30, 0xb2, 0x47, 0xa3, 0x3c, 0x8d, 0x47, 0xde,
    0x67, 0xf2, 0x9e, 0x55, 0x77, 0xb1, 0x1c, 0x43, 0x49, 0x3d, 0x5b, 0xba, 0x76, 0x34, 0xa7, 0xe4,
    0xe7, 0x15, 0x31, 0xb7, 0xdf, 0x59, 0x81, 0xfe, 0x24, 0xa1, 0x14, 0x55, 0x4c, 0xbd, 0x8f, 0x00,
    0x5c, 0xe1, 0xdb, 0x35, 0x08, 0x5c, 0xcf, 0xc7, 0x78, 0x06, 0xb6, 0xde, 0x25, 0x40, 0x68, 0xa2,
    0x6c, 0xb5, 0x49, 0x2d, 0x45, 0x80, 0x43, 0x8f, 0xe1, 0xe5, 0xa9, 0xed, 0x75, 0xc5, 0xed, 0x45,
    0x1d, 0xce, 0x78, 0x94, 0x39, 0xcc, 0xc3, 0xba, 0x28, 0xa2, 0x31, 0x2a, 0x1b, 0x87, 0x19, 0xef,
    0x0f, 0x73, 0xb7, 0x13, 0x95, 0x0c, 0x02, 0x59, 0x1a, 0x74, 0x62, 0xa6, 0x07, 0xf3, 0x7c, 0x0a,
    0xa7, 0xa1, 0x8f, 0xa9, 0x43, 0xa3, 0x6d, 0x75, 0x2a, 0x5f, 0x41, 0x92, 0xf0, 0x13, 0x61, 0x00,
    0xaa, 0x9c, 0xb4, 0x1b, 0xbe, 0x14, 0xbe, 0xb1, 0xf9, 0xfc, 0x69, 0x2f, 0xdf, 0xa0, 0x94, 0x46,
    0xde, 0x5a, 0x9d, 0xde, 0x2c, 0xa5, 0xf6, 0x8c, 0x1c, 0x0c, 0x21, 0x42, 0x92, 0x87, 0xcb, 0x2d,
    0xaa, 0xa3, 0xd2, 0x63, 0x75, 0x2f, 0x73, 0xe0, 0x9f, 0xaf, 0x44, 0x79, 0xd2, 0x81, 0x74, 0x29,
    0xf6, 0x98, 0x00, 0xaf, 0xde, 0x6b, 0x59, 0x2d, 0xc1, 0x98, 0x82, 0xbd, 0xf5, 0x81, 0xcc, 0xab,
    0xf2, 0xcb, 0x91, 0x02, 0x9e, 0xf3, 0x5c, 0x4c, 0xfd, 0xbb, 0xff, 0x49, 0xc1, 0xfa, 0x1b, 0x2f,
    0xe3, 0x1d, 0xe7, 0xa5, 0x60, 0xec, 0xb4, 0x7e, 0xbc, 0xfe, 0x32, 0x42, 0x5b, 0x95, 0x6f, 0x81,
    0xb6, 0x99, 0x17, 0x48, 0x7e, 0x3b, 0x78, 0x91, 0x51, 0xdb, 0x2e, 0x78, 0xb1, 0xfd, 0x2e, 0xbe,
    0x7e, 0x62, 0x6b, 0x3e, 0xa1, 0x65, 0xb4, 0xfb, 0x00, 0xcc, 0xb7, 0x51, 0xaf, 0x50, 0x73, 0x29,
    0xc4, 0xa3, 0x93, 0x9e, 0xa6, 0xdd, 0x9c, 0x50, 0xa0, 0xe7, 0x38, 0x6b, 0x01, 0x45, 0x79, 0x6b,
    0x41, 0xaf, 0x61, 0xf7, 0x85, 0x55, 0x94, 0x4f, 0x3b, 0xc2, 0x2d, 0xc3, 0xbd, 0x0d, 0x00, 0xf8,
    0x79, 0x8a, 0x42, 0xb1, 0xaa, 0xa0, 0x83, 0x20, 0x65, 0x9a, 0xc7, 0x39, 0x5a, 0xb4, 0xf3, 0x29,
];

/// Exponent shared by every RSA key of the platform.
const ROOT_KEY_EXPONENT: u32 = 0x00010001;

/// The set of three certificates stored inside every installable package.
#[derive(Debug, Clone)]
pub struct CertificateChain {
    /// The Certificate Authority certificate, issued by the root key.
    pub certificate_authority: Certificate,

    /// The certificate that signs title metadata, its name carries `CP`.
    pub metadata_signer: Certificate,

    /// The certificate that signs tickets, its name carries `XS`.
    pub ticket_signer: Certificate,
}

impl CertificateChain {
    /// Parse a certificate chain, classifying each certificate by its role. The order on
    /// the stream does not matter, the canonical order is restored on [Self::dump].
    pub fn new<T: Read + Seek>(stream: T) -> Result<Self, CertificateChainError> {
        let mut stream = StreamPin::new(stream)?;

        let mut certificate_authority = None;
        let mut metadata_signer = None;
        let mut ticket_signer = None;

        for _ in 0..3 {
            let certificate = Certificate::new(&mut stream)?;
            stream.align_position(64)?;

            let issuer = certificate.signed_blob_header.issuer.clone();

            let slot = if issuer == "Root" {
                &mut certificate_authority
            } else if issuer.contains("Root-CA") && certificate.child_name.contains("CP") {
                &mut metadata_signer
            } else if issuer.contains("Root-CA") && certificate.child_name.contains("XS") {
                &mut ticket_signer
            } else {
                return Err(CertificateChainError::UnknownCertificateRole(issuer));
            };

            if slot.is_some() {
                return Err(CertificateChainError::DuplicateCertificateRole(issuer));
            }

            *slot = Some(certificate);
        }

        // The loop stores exactly three certificates, one per distinct role
        #[allow(clippy::expect_used)]
        Ok(Self {
            certificate_authority: certificate_authority
                .expect("Missing roles are rejected inside the loop"),
            metadata_signer: metadata_signer.expect("Missing roles are rejected inside the loop"),
            ticket_signer: ticket_signer.expect("Missing roles are rejected inside the loop"),
        })
    }

    /// Parse a certificate chain from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CertificateChainError> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump the certificate chain into a stream, in the canonical CA, CP, XS order.
    pub fn dump<T: Write + Seek>(&self, stream: T) -> io::Result<()> {
        let mut stream = StreamPin::new(stream)?;

        for certificate in [
            &self.certificate_authority,
            &self.metadata_signer,
            &self.ticket_signer,
        ] {
            certificate.dump(&mut stream)?;
            stream.align_zeroed(64)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }

    /// Get the size of the certificate chain in bytes.
    pub fn size(&self) -> u32 {
        self.certificate_authority.size() + self.metadata_signer.size() + self.ticket_signer.size()
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum CertificateChainError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Unknown key kind: {0:#X}")]
    UnknownKeyKind(u32),

    #[error("Converting into UTF-8 failed: {0}")]
    FromUtf8Error(#[from] FromUtf8Error),

    #[error("Unable to parse the signed blob header: {0}")]
    SignedBlobHeaderError(#[from] SignedBlobHeaderError),

    #[error("A certificate with an unknown role was found, issued by: {0}")]
    UnknownCertificateRole(String),

    #[error("Two certificates with the same role were found, issued by: {0}")]
    DuplicateCertificateRole(String),

    #[error("The given certificate cannot be used for this operation: {0}")]
    InvalidCertificate(&'static str),

    #[error("The public key stored inside the certificate is malformed: {0}")]
    MalformedPublicKey(rsa::Error),
}

/// A single certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Header with data to prove the authenticity that this data
    /// has being created by an authorized entity.
    pub signed_blob_header: SignedBlobHeader,

    /// The name of the certificate.
    pub child_name: String,

    /// The key stored inside the certificate.
    pub key: CertificateKey,
}

impl Certificate {
    /// Parse a certificate.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, CertificateChainError> {
        let signed_blob_header = SignedBlobHeader::new(&mut stream)?;

        let key_value_kind_identifier = stream.read_u32::<BE>()?;

        let child_name = util::read_string!(stream, 64)?;

        let key = CertificateKey {
            id: stream.read_u32::<BE>()?,
            value: CertificateKeyValue::new(key_value_kind_identifier, &mut stream)?,
        };

        Ok(Self {
            signed_blob_header,
            child_name,
            key,
        })
    }

    /// Dump the certificate into a stream.
    pub fn dump<T: Write + Seek>(&self, mut stream: T) -> io::Result<()> {
        self.signed_blob_header.dump(&mut stream)?;

        self.key.value.dump_kind_identifier(&mut stream)?;
        stream.write_bytes_padded(self.child_name.as_bytes(), 64)?;
        stream.write_u32::<BE>(self.key.id)?;
        self.key.value.dump_value(&mut stream)?;

        Ok(())
    }

    /// Dump into an owned buffer, padded up to the 64 byte boundary like when stored inside
    /// a chain. The signed body hash covers this padded form.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut stream = StreamPin::new(Cursor::new(Vec::new()))?;

        self.dump(&mut stream)?;
        stream.align_zeroed(64)?;

        Ok(stream.into_inner().into_inner())
    }

    /// Get the size of the certificate in bytes.
    pub fn size(&self) -> u32 {
        let size = match self.key.value {
            CertificateKeyValue::Rsa4096(_) => 512 + 4,
            CertificateKeyValue::Rsa2048(_) => 256 + 4,
            CertificateKeyValue::EccB223(_) => 60,
        } + self.signed_blob_header.size()
            + 72;

        util::align_to_boundary(size as u64, 64) as u32
    }

    fn rsa_public_key(&self) -> Result<RsaPublicKey, CertificateChainError> {
        let (modulus, exponent) = match &self.key.value {
            CertificateKeyValue::Rsa4096(value) => {
                (&value[0..512], u32::from_be_bytes([value[512], value[513], value[514], value[515]]))
            }
            CertificateKeyValue::Rsa2048(value) => {
                (&value[0..256], u32::from_be_bytes([value[256], value[257], value[258], value[259]]))
            }

            CertificateKeyValue::EccB223(_) => {
                return Err(CertificateChainError::InvalidCertificate(
                    "The certificate does not carry an RSA key",
                ));
            }
        };

        RsaPublicKey::new(
            BigUint::from_bytes_be(modulus),
            BigUint::from(exponent),
        )
        .map_err(CertificateChainError::MalformedPublicKey)
    }
}

/// The public key stored inside a certificate.
#[derive(Debug, Clone)]
pub struct CertificateKey {
    /// The ID of the key.
    pub id: u32,

    /// The public key data itself.
    pub value: CertificateKeyValue,
}

/// The public key data stored inside a certificate. RSA keys carry their modulus followed
/// by a 4 byte exponent.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone)]
pub enum CertificateKeyValue {
    /// The key is stored as RSA-4096 data.
    Rsa4096(Box<[u8; 512 + 4]>),

    /// The key is stored as RSA-2048 data.
    Rsa2048(Box<[u8; 256 + 4]>),

    /// The key is stored as ECC-B223 data.
    EccB223(Box<[u8; 60]>),
}

impl CertificateKeyValue {
    fn new<T: Read + Seek>(identifier: u32, mut stream: T) -> Result<Self, CertificateChainError> {
        let public_key = match identifier {
            0 => {
                let buf = util::read_exact!(stream, 512 + 4)?;
                Self::Rsa4096(Box::new(buf))
            }
            1 => {
                let buf = util::read_exact!(stream, 256 + 4)?;
                Self::Rsa2048(Box::new(buf))
            }
            2 => {
                let buf = util::read_exact!(stream, 60)?;
                Self::EccB223(Box::new(buf))
            }

            _ => return Err(CertificateChainError::UnknownKeyKind(identifier)),
        };

        Ok(public_key)
    }

    fn dump_kind_identifier<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u32::<BE>(match self {
            Self::Rsa4096(_) => 0,
            Self::Rsa2048(_) => 1,
            Self::EccB223(_) => 2,
        })?;

        Ok(())
    }

    fn dump_value<T: Write>(&self, mut stream: T) -> io::Result<()> {
        match self {
            Self::Rsa4096(value) => stream.write_all(value.as_slice())?,
            Self::Rsa2048(value) => stream.write_all(value.as_slice())?,
            Self::EccB223(value) => stream.write_all(value.as_slice())?,
        }

        Ok(())
    }
}

fn check_certificate_authority_role(
    certificate: &Certificate,
) -> Result<(), CertificateChainError> {
    if certificate.signed_blob_header.issuer != "Root"
        || !certificate.child_name.starts_with("CA")
    {
        return Err(CertificateChainError::InvalidCertificate(
            "The given certificate is not a Certificate Authority",
        ));
    }

    Ok(())
}

fn verify_with_key(
    public_key: &RsaPublicKey,
    body: &[u8],
    signature: &[u8],
) -> Result<bool, CertificateChainError> {
    let digest: [u8; 20] = Sha1::digest(body).into();

    Ok(public_key
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
        .is_ok())
}

/// Verify a Certificate Authority certificate against the hard-coded root key. The retail
/// or development root key is selected by the name of the certificate.
///
/// Returns `Ok(false)` on a signature mismatch, a structural or role problem fails instead.
pub fn verify_certificate_authority(
    certificate: &Certificate,
) -> Result<bool, CertificateChainError> {
    check_certificate_authority_role(certificate)?;

    let root_key_modulus: &[u8] = match certificate.child_name.as_str() {
        "CA00000001" => &ROOT_KEY_MODULUS_RETAIL,
        "CA00000002" => &ROOT_KEY_MODULUS_DEV,

        _ => {
            return Err(CertificateChainError::InvalidCertificate(
                "The given Certificate Authority is not a known one",
            ));
        }
    };

    let public_key = RsaPublicKey::new(
        BigUint::from_bytes_be(root_key_modulus),
        BigUint::from(ROOT_KEY_EXPONENT),
    )
    .map_err(CertificateChainError::MalformedPublicKey)?;

    let bytes = certificate.to_bytes()?;
    let body_offset = certificate.signed_blob_header.signature_body_offset() as usize;

    verify_with_key(
        &public_key,
        &bytes[body_offset..],
        certificate.signed_blob_header.signature.bytes(),
    )
}

/// Verify a child (CP or XS) certificate using the Certificate Authority that issued it.
pub fn verify_child_certificate(
    certificate_authority: &Certificate,
    child: &Certificate,
) -> Result<bool, CertificateChainError> {
    check_certificate_authority_role(certificate_authority)?;

    if format!("Root-{}", certificate_authority.child_name) != child.signed_blob_header.issuer {
        return Err(CertificateChainError::InvalidCertificate(
            "The child certificate was not issued by the given Certificate Authority",
        ));
    }

    let public_key = certificate_authority.rsa_public_key()?;

    let bytes = child.to_bytes()?;
    let body_offset = child.signed_blob_header.signature_body_offset() as usize;

    verify_with_key(
        &public_key,
        &bytes[body_offset..],
        child.signed_blob_header.signature.bytes(),
    )
}

/// Verify the signature of a title metadata using the metadata signer (CP) certificate.
pub fn verify_title_metadata(
    metadata_signer: &Certificate,
    title_metadata: &TitleMetadata,
) -> Result<bool, CertificateChainError> {
    if !metadata_signer.signed_blob_header.issuer.contains("Root-CA")
        || !metadata_signer.child_name.contains("CP")
    {
        return Err(CertificateChainError::InvalidCertificate(
            "The given certificate is not a title metadata signer",
        ));
    }

    let expected_issuer = format!(
        "{}-{}",
        metadata_signer.signed_blob_header.issuer, metadata_signer.child_name
    );

    if expected_issuer != title_metadata.signed_blob_header.issuer {
        return Err(CertificateChainError::InvalidCertificate(
            "The title metadata was not signed with the given certificate",
        ));
    }

    let public_key = metadata_signer.rsa_public_key()?;

    let bytes = title_metadata.to_bytes()?;
    let body_offset = title_metadata.signed_blob_header.signature_body_offset() as usize;

    verify_with_key(
        &public_key,
        &bytes[body_offset..],
        title_metadata.signed_blob_header.signature.bytes(),
    )
}

/// Verify the signature of a ticket using the ticket signer (XS) certificate.
pub fn verify_ticket(
    ticket_signer: &Certificate,
    ticket: &Ticket,
) -> Result<bool, CertificateChainError> {
    if !ticket_signer.signed_blob_header.issuer.contains("Root-CA")
        || !ticket_signer.child_name.contains("XS")
    {
        return Err(CertificateChainError::InvalidCertificate(
            "The given certificate is not a ticket signer",
        ));
    }

    let expected_issuer = format!(
        "{}-{}",
        ticket_signer.signed_blob_header.issuer, ticket_signer.child_name
    );

    if expected_issuer != ticket.signed_blob_header.issuer {
        return Err(CertificateChainError::InvalidCertificate(
            "The ticket was not signed with the given certificate",
        ));
    }

    let public_key = ticket_signer.rsa_public_key()?;

    let bytes = ticket.to_bytes()?;
    let body_offset = ticket.signed_blob_header.signature_body_offset() as usize;

    verify_with_key(
        &public_key,
        &bytes[body_offset..],
        ticket.signed_blob_header.signature.bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signed_blob_header::SignedBlobHeaderSignature;

    fn dummy_certificate(issuer: &str, child_name: &str) -> Certificate {
        let mut key_value = [0x55; 256 + 4];
        // A plausible public exponent
        key_value[256..260].copy_from_slice(&ROOT_KEY_EXPONENT.to_be_bytes());

        Certificate {
            signed_blob_header: SignedBlobHeader {
                signature: SignedBlobHeaderSignature::Rsa2048Sha1(Box::new([0x44; 256])),
                issuer: String::from(issuer),
            },
            child_name: String::from(child_name),
            key: CertificateKey {
                id: 0,
                value: CertificateKeyValue::Rsa2048(Box::new(key_value)),
            },
        }
    }

    fn dummy_chain() -> CertificateChain {
        CertificateChain {
            certificate_authority: dummy_certificate("Root", "CA00000001"),
            metadata_signer: dummy_certificate("Root-CA00000001", "CP00000004"),
            ticket_signer: dummy_certificate("Root-CA00000001", "XS00000003"),
        }
    }

    #[test]
    fn round_trip_restores_canonical_order() {
        let chain = dummy_chain();
        let bytes = chain.to_bytes().unwrap();

        assert_eq!(bytes.len() as u32, chain.size());

        let parsed = CertificateChain::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.certificate_authority.child_name, "CA00000001");
        assert_eq!(parsed.metadata_signer.child_name, "CP00000004");
        assert_eq!(parsed.ticket_signer.child_name, "XS00000003");
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn shuffled_chain_is_classified_by_role() {
        let chain = dummy_chain();

        let mut stream = StreamPin::new(Cursor::new(Vec::new())).unwrap();
        chain.ticket_signer.dump(&mut stream).unwrap();
        stream.align_zeroed(64).unwrap();
        chain.certificate_authority.dump(&mut stream).unwrap();
        stream.align_zeroed(64).unwrap();
        chain.metadata_signer.dump(&mut stream).unwrap();
        stream.align_zeroed(64).unwrap();

        let bytes = stream.into_inner().into_inner();
        let parsed = CertificateChain::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.certificate_authority.child_name, "CA00000001");
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let chain = dummy_chain();

        let mut stream = StreamPin::new(Cursor::new(Vec::new())).unwrap();
        for certificate in [
            &chain.certificate_authority,
            &chain.certificate_authority,
            &chain.ticket_signer,
        ] {
            certificate.dump(&mut stream).unwrap();
            stream.align_zeroed(64).unwrap();
        }

        let bytes = stream.into_inner().into_inner();

        assert!(matches!(
            CertificateChain::from_bytes(&bytes),
            Err(CertificateChainError::DuplicateCertificateRole(_))
        ));
    }

    #[test]
    fn garbage_ca_signature_does_not_verify() {
        let chain = dummy_chain();

        assert!(!verify_certificate_authority(&chain.certificate_authority).unwrap());
    }

    #[test]
    fn verify_ca_rejects_non_ca_certificates() {
        let chain = dummy_chain();

        assert!(matches!(
            verify_certificate_authority(&chain.ticket_signer),
            Err(CertificateChainError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn verify_child_rejects_issuer_mismatch() {
        let chain = dummy_chain();
        let stranger = dummy_certificate("Root-CA00000002", "CP00000007");

        assert!(matches!(
            verify_child_certificate(&chain.certificate_authority, &stranger),
            Err(CertificateChainError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn verify_child_with_garbage_signature() {
        let chain = dummy_chain();

        assert!(
            !verify_child_certificate(&chain.certificate_authority, &chain.metadata_signer)
                .unwrap()
        );
    }
}
