// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Cryptographic primitives used to protect the data of a title.
//!
//! Title keys are wrapped with AES-128-CBC under a common key, using the title ID as the seed
//! of the initialization vector. Content blobs are encrypted with the unwrapped title key,
//! using the 16 bit content index as the seed of the initialization vector.

use crate::common_key::CommonKeyKind;
use crate::title_id::TitleId;
use std::io;
use util::aes::{cbc_decrypt, cbc_encrypt};

fn title_key_iv(title_id: &TitleId) -> [u8; 16] {
    let mut iv = [0; 16];
    iv[0..8].copy_from_slice(&title_id.bytes());

    iv
}

fn content_iv(content_index: u16) -> [u8; 16] {
    let mut iv = [0; 16];
    iv[0..2].copy_from_slice(&content_index.to_be_bytes());

    iv
}

fn pad_to_block(data: &[u8]) -> Vec<u8> {
    let mut buffer = data.to_vec();
    buffer.resize(util::align_to_boundary(data.len() as u64, 16) as usize, 0);

    buffer
}

/// Unwrap an encrypted title key, a single AES-CBC block decryption under the selected
/// common key.
pub fn decrypt_title_key(
    encrypted_title_key: &[u8; 16],
    common_key_index: u8,
    title_id: &TitleId,
    is_dev: bool,
) -> io::Result<[u8; 16]> {
    let common_key = CommonKeyKind::new(common_key_index, is_dev);

    let buffer = cbc_decrypt(
        &common_key.bytes(),
        &title_key_iv(title_id),
        encrypted_title_key,
    )?;

    #[allow(clippy::expect_used)]
    Ok(buffer
        .try_into()
        .expect("A single AES block decryption always yields 16 bytes"))
}

/// Wrap a decrypted title key, the inverse of [decrypt_title_key].
pub fn encrypt_title_key(
    decrypted_title_key: &[u8; 16],
    common_key_index: u8,
    title_id: &TitleId,
    is_dev: bool,
) -> io::Result<[u8; 16]> {
    let common_key = CommonKeyKind::new(common_key_index, is_dev);

    let buffer = cbc_encrypt(
        &common_key.bytes(),
        &title_key_iv(title_id),
        decrypted_title_key,
    )?;

    #[allow(clippy::expect_used)]
    Ok(buffer
        .try_into()
        .expect("A single AES block encryption always yields 16 bytes"))
}

/// Decrypt a content blob and trim it down to its real size.
///
/// The stored blob may carry up to 15 bytes of zero padding so that it spans whole AES
/// blocks, `decrypted_size` (taken from the content record) removes it.
pub fn decrypt_content(
    encrypted_content: &[u8],
    title_key: &[u8; 16],
    content_index: u16,
    decrypted_size: u64,
) -> io::Result<Vec<u8>> {
    let buffer = pad_to_block(encrypted_content);

    let mut decrypted = cbc_decrypt(title_key, &content_iv(content_index), &buffer)?;
    decrypted.truncate(decrypted_size as usize);

    Ok(decrypted)
}

/// Encrypt a content blob.
///
/// The emitted ciphertext is `len` rounded up to the next multiple of 16 bytes, so it is not
/// always a whole number of AES blocks longer than the input.
pub fn encrypt_content(
    decrypted_content: &[u8],
    title_key: &[u8; 16],
    content_index: u16,
) -> io::Result<Vec<u8>> {
    let encrypted_size = util::align_to_boundary(decrypted_content.len() as u64, 16) as usize;
    let buffer = pad_to_block(decrypted_content);

    let mut encrypted = cbc_encrypt(title_key, &content_iv(content_index), &buffer)?;
    encrypted.truncate(encrypted_size);

    Ok(encrypted)
}
