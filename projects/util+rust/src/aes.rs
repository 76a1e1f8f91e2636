// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! AES-128-CBC helpers shared by the crates that handle encrypted console data.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use std::io;

/// Decryptor of AES-128-CBC encrypted bytes.
pub type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Encryptor of AES-128-CBC encrypted bytes.
pub type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// Decrypt a whole buffer. The buffer length must be a multiple of the AES block size
/// (16 bytes), pad it with zeroes beforehand if needed.
pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; data.len()];

    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_b2b_mut::<NoPadding>(data, &mut buffer)
        .map_err(|err| io::Error::other(format!("Unable to decrypt the buffer: {err}")))?;

    Ok(buffer)
}

/// Encrypt a whole buffer. The buffer length must be a multiple of the AES block size
/// (16 bytes), pad it with zeroes beforehand if needed.
pub fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; data.len()];

    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_b2b_mut::<NoPadding>(data, &mut buffer)
        .map_err(|err| io::Error::other(format!("Unable to encrypt the buffer: {err}")))?;

    Ok(buffer)
}
