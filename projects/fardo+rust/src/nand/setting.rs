// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the `setting.txt` file, the lightly enciphered per-console settings.
//!
//! The file is a 256 byte key/value text obfuscated with a rolling XOR: every byte is
//! XORed with the low byte of a 32 bit key that is rotated left once per byte.

use std::collections::HashMap;
use thiserror::Error;

/// Initial value of the rolling cipher key.
const SETTING_KEY: u32 = 0x73B5DBFA;

/// Size of the enciphered file, shorter content is zero padded.
const SETTING_SIZE: usize = 256;

fn crypt(data: &[u8]) -> Vec<u8> {
    let mut key = SETTING_KEY;

    data.iter()
        .map(|&byte| {
            let output = byte ^ (key & 0xFF) as u8;
            key = key.rotate_left(1);

            output
        })
        .collect()
}

/// The per-console settings stored at `/title/00000001/00000002/data/setting.txt`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingTxt {
    /// The region of the System Menu this file matches with.
    pub area: String,

    /// The model of the console, usually `RVL-001` or `RVL-101`.
    pub model: String,

    /// Unknown, may relate to the scrapped DVD playback capabilities.
    pub dvd: u32,

    /// Unknown, the generally accepted value is `0x7FFE`.
    pub mpch: String,

    /// Unknown code, may match the manufacturer code of the serial number.
    pub code: String,

    /// Serial number of the console.
    pub serial_number: String,

    /// Video mode, either `NTSC` or `PAL`.
    pub video: String,

    /// Another region code, possibly set by the hidden region select channel.
    pub game: String,
}

impl SettingTxt {
    /// Decipher and parse a `setting.txt` file.
    pub fn new(data: &[u8]) -> Result<Self, SettingTxtError> {
        if data.len() < SETTING_SIZE {
            return Err(SettingTxtError::TruncatedFile(data.len()));
        }

        let deciphered = crypt(&data[..SETTING_SIZE]);

        // Trailing padding deciphers to garbage, only keep whole lines
        let end = deciphered
            .iter()
            .rposition(|&byte| byte == b'\n')
            .map_or(deciphered.len(), |position| position + 1);

        let text = std::str::from_utf8(&deciphered[..end])
            .map_err(|_| SettingTxtError::MalformedText)?;

        Self::new_decrypted(text)
    }

    /// Parse an already deciphered `setting.txt` text.
    pub fn new_decrypted(text: &str) -> Result<Self, SettingTxtError> {
        let mut fields = HashMap::new();

        for line in text.lines() {
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| SettingTxtError::MalformedLine(line.to_owned()))?;

            fields.insert(key.trim().to_owned(), value.trim().to_owned());
        }

        let mut take = |key: &'static str| {
            fields
                .remove(key)
                .ok_or(SettingTxtError::MissingField(key))
        };

        let dvd_text = take("DVD")?;

        Ok(Self {
            area: take("AREA")?,
            model: take("MODEL")?,
            dvd: dvd_text
                .parse()
                .map_err(|_| SettingTxtError::MalformedLine(dvd_text))?,
            mpch: take("MPCH")?,
            code: take("CODE")?,
            serial_number: take("SERNO")?,
            video: take("VIDEO")?,
            game: take("GAME")?,
        })
    }

    /// Dump the settings back into their deciphered text form.
    pub fn dump_decrypted(&self) -> String {
        let mut text = String::new();

        text.push_str(&format!("AREA={}\r\n", self.area));
        text.push_str(&format!("MODEL={}\r\n", self.model));
        text.push_str(&format!("DVD={}\r\n", self.dvd));
        text.push_str(&format!("MPCH={}\r\n", self.mpch));
        text.push_str(&format!("CODE={}\r\n", self.code));
        text.push_str(&format!("SERNO={}\r\n", self.serial_number));
        text.push_str(&format!("VIDEO={}\r\n", self.video));
        text.push_str(&format!("GAME={}\r\n", self.game));

        text
    }

    /// Dump and encipher the settings into the 256 byte form the console loads.
    pub fn dump(&self) -> Result<Vec<u8>, SettingTxtError> {
        let text = self.dump_decrypted();

        if text.len() > SETTING_SIZE {
            return Err(SettingTxtError::ContentTooLong(text.len()));
        }

        let mut enciphered = crypt(text.as_bytes());
        enciphered.resize(SETTING_SIZE, 0);

        Ok(enciphered)
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SettingTxtError {
    #[error("The enciphered file is shorter than 256 bytes: {0}")]
    TruncatedFile(usize),

    #[error("The deciphered content is not valid text")]
    MalformedText,

    #[error("Malformed settings line: {0}")]
    MalformedLine(String),

    #[error("Missing settings field: {0}")]
    MissingField(&'static str),

    #[error("The settings do not fit inside the 256 byte file: {0}")]
    ContentTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> SettingTxt {
        SettingTxt {
            area: String::from("USA"),
            model: String::from("RVL-001(USA)"),
            dvd: 0,
            mpch: String::from("0x7FFE"),
            code: String::from("LU"),
            serial_number: String::from("123456789"),
            video: String::from("NTSC"),
            game: String::from("US"),
        }
    }

    #[test]
    fn text_round_trip() {
        let settings = sample_settings();

        let parsed = SettingTxt::new_decrypted(&settings.dump_decrypted()).unwrap();

        assert_eq!(parsed, settings);
    }

    #[test]
    fn cipher_round_trip() {
        let settings = sample_settings();

        let enciphered = settings.dump().unwrap();
        assert_eq!(enciphered.len(), 256);

        // The key/value text must not be readable as-is
        assert_ne!(&enciphered[0..4], b"AREA");

        let parsed = SettingTxt::new(&enciphered).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn missing_field_is_reported() {
        assert!(matches!(
            SettingTxt::new_decrypted("AREA=USA\r\n"),
            Err(SettingTxtError::MissingField(_))
        ));
    }

    #[test]
    fn truncated_file_is_rejected() {
        assert!(matches!(
            SettingTxt::new(&[0; 100]),
            Err(SettingTxtError::TruncatedFile(100))
        ));
    }
}
