// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the common encryption keys that wrap every title key.

use byteorder::WriteBytesExt;
use std::io;
use std::io::Write;

/// Kinds of common encryption keys used on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommonKeyKind {
    /// Key used in most retail consoles.
    Normal,

    /// Key used on consoles with Korea set as its internal region (KOR).
    Korean,

    /// Key used on the virtual Wii console (vWii) inside the Nintendo Wii U.
    WiiUvWii,

    /// Key used on development consoles in place of the retail one.
    Development,
}

impl CommonKeyKind {
    /// Get a common key given its "common key index" (identifier) as stored inside a ticket.
    ///
    /// Indices outside of the known table fall back to the retail key, real consoles behave
    /// the same way. The `is_dev` flag swaps index zero for the development key and has no
    /// effect on the other indices.
    pub const fn new(identifier: u8, is_dev: bool) -> Self {
        match identifier {
            0 if is_dev => Self::Development,
            1 => Self::Korean,
            2 => Self::WiiUvWii,

            _ => Self::Normal,
        }
    }

    /// Dump the identifier associated with the given common key.
    pub fn dump_identifier<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u8(match self {
            Self::Normal | Self::Development => 0,
            Self::Korean => 1,
            Self::WiiUvWii => 2,
        })?;

        Ok(())
    }

    /// Get the bytes of the correct kind of common key.
    pub const fn bytes(&self) -> [u8; 16] {
        match self {
            Self::Normal => [
                0xeb, 0xe4, 0x2a, 0x22, 0x5e, 0x85, 0x93, 0xe4, 0x48, 0xd9, 0xc5, 0x45, 0x73, 0x81,
                0xaa, 0xf7,
            ],
            Self::Korean => [
                0x63, 0xb8, 0x2b, 0xb4, 0xf4, 0x61, 0x4e, 0x2e, 0x13, 0xf2, 0xfe, 0xfb, 0xba, 0x4c,
                0x9b, 0x7e,
            ],
            Self::WiiUvWii => [
                0x30, 0xbf, 0xc7, 0x6e, 0x7c, 0x19, 0xaf, 0xbb, 0x23, 0x16, 0x33, 0x30, 0xce, 0xd7,
                0xc2, 0x8d,
            ],
            Self::Development => [
                0xa1, 0x60, 0x4a, 0x6a, 0x71, 0x23, 0xb5, 0x29, 0xae, 0x8b, 0xec, 0x32, 0xc8, 0x16,
                0xfc, 0xaa,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn retail_key_bytes() {
        assert_eq!(
            CommonKeyKind::new(0, false).bytes(),
            hex!("ebe42a225e8593e448d9c5457381aaf7")
        );
    }

    #[test]
    fn korean_key_bytes() {
        assert_eq!(
            CommonKeyKind::new(1, false).bytes(),
            hex!("63b82bb4f4614e2e13f2fefbba4c9b7e")
        );
    }

    #[test]
    fn vwii_key_bytes() {
        assert_eq!(
            CommonKeyKind::new(2, false).bytes(),
            hex!("30bfc76e7c19afbb23163330ced7c28d")
        );
    }

    #[test]
    fn dev_flag_only_affects_index_zero() {
        assert_eq!(CommonKeyKind::new(0, true), CommonKeyKind::Development);
        assert_eq!(CommonKeyKind::new(1, true), CommonKeyKind::Korean);
        assert_eq!(CommonKeyKind::new(2, true), CommonKeyKind::WiiUvWii);
    }

    #[test]
    fn unknown_index_falls_back_to_retail() {
        assert_eq!(CommonKeyKind::new(77, false), CommonKeyKind::Normal);
    }
}
