// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of a newtype wrapper around the title ID of a title.

use byteorder::{BE, WriteBytesExt};
use std::fmt::{self, Display};
use std::io;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// 64 bit value used to uniquely identify titles on the console.
///
/// On all formatters (if applicable) the alternative flag (`#`) can be used to put the hex values
/// with uppercase letters.
pub struct TitleId(u64);

impl TitleId {
    /// The title ID of the `boot2` bootloader.
    pub const BOOT2: Self = Self(0x0000000100000001);

    /// The title ID of the System Menu.
    pub const SYSTEM_MENU: Self = Self(0x0000000100000002);

    /// Create a new [TitleId].
    pub fn new(title_id_value: u64) -> Self {
        Self(title_id_value)
    }

    /// Create a new [TitleId] given a lower and a higher halfs.
    pub fn new_with_halfs(higher_half: u32, lower_half: u32) -> Self {
        Self(((higher_half as u64) << 32) | lower_half as u64)
    }

    /// Create a new [TitleId] from its 8 byte big endian representation.
    pub fn new_from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    /// Get the stored value inside the title ID.
    pub fn inner(&self) -> u64 {
        self.0
    }

    /// Get the 8 byte big endian representation of the title ID, also used as the seed of the
    /// initialization vector that protects the title key.
    pub fn bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Dump a title ID into a stream.
    pub fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u64::<BE>(self.0)?;

        Ok(())
    }

    /// Get the lower half of the ID.
    pub fn lower_half(&self) -> u32 {
        (self.0 & 0xFFFFFFFF) as u32
    }

    /// Get the higher half of the ID.
    pub fn higher_half(&self) -> u32 {
        ((self.0 & 0xFFFFFFFF00000000) >> 32) as u32
    }

    /// Set a new lower half.
    pub fn set_lower_half(&mut self, lower_half: u32) {
        *self = Self::new_with_halfs(self.higher_half(), lower_half);
    }

    /// Set a new higher half.
    pub fn set_higher_half(&mut self, higher_half: u32) {
        *self = Self::new_with_halfs(higher_half, self.lower_half());
    }

    /// Get the kind of the title, derived from the higher half of the ID.
    pub fn kind(&self) -> TitleKind {
        match self.higher_half() {
            0x00000001 => TitleKind::System,
            0x00010000 => TitleKind::Game,
            0x00010001 => TitleKind::Channel,
            0x00010002 => TitleKind::SystemChannel,
            0x00010004 => TitleKind::GameChannel,
            0x00010005 => TitleKind::Dlc,
            0x00010008 => TitleKind::HiddenChannel,

            _ => TitleKind::Unknown,
        }
    }

    /// Get a wrapper that can display the title ID with ASCII characters in its lower half, if the
    /// character is not visible a fallback to the normal display will be made.
    pub fn display_ascii(&self) -> TitleIdAsciiDisplay<'_> {
        TitleIdAsciiDisplay(self)
    }

    /// Wrapper that can display the title ID with custom display values for well-known IDs (IOS,
    /// BOOT2, etc).
    pub fn display_wii_platform(&self) -> TitleIdWiiPlatformDisplay<'_> {
        TitleIdWiiPlatformDisplay(self)
    }
}

impl FromStr for TitleId {
    type Err = TitleIdError;

    /// Parse a title ID from its canonical 16 hex digit form, with or without a `-` separator
    /// between the halfs.
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let string = string.replace('-', "");

        if string.len() != 16 {
            return Err(TitleIdError::InvalidLength(string.len()));
        }

        let value = u64::from_str_radix(&string, 16)
            .map_err(|_| TitleIdError::InvalidHexDigits(string.clone()))?;

        Ok(Self(value))
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TitleIdError {
    #[error("A title ID must be 16 hex digits long, got {0} characters")]
    InvalidLength(usize),

    #[error("The given title ID is not a hex string: {0}")]
    InvalidHexDigits(String),
}

/// The kind of a title, stored on the higher half of its title ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TitleKind {
    System,
    Game,
    Channel,
    SystemChannel,
    GameChannel,
    Dlc,
    HiddenChannel,
    Unknown,
}

impl Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let higher_half = self.higher_half();
        let lower_half = self.lower_half();

        if !f.alternate() {
            write!(f, "{higher_half:08x}-{lower_half:08x}")
        } else {
            write!(f, "{higher_half:08X}-{lower_half:08X}")
        }
    }
}

/// Wrapper that can display the title ID with ASCII characters in its lower half, if the
/// character is not visible a fallback to the normal display will be made.
pub struct TitleIdAsciiDisplay<'a>(&'a TitleId);

impl Display for TitleIdAsciiDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let higher_half = self.0.higher_half();
        let lower_half = self.0.lower_half();

        let lower_half = match String::from_utf8(lower_half.to_be_bytes().to_vec()) {
            Ok(lower_half) => lower_half,
            Err(_err) => return self.0.fmt(f),
        };

        if !lower_half.chars().all(char::is_alphanumeric) {
            return self.0.fmt(f);
        }

        if !f.alternate() {
            write!(f, "{higher_half:08x}-{lower_half}")
        } else {
            write!(f, "{higher_half:08X}-{lower_half}")
        }
    }
}

/// Wrapper that can display the title ID with custom display values for well-known IDs (IOS,
/// BOOT2, etc).
pub struct TitleIdWiiPlatformDisplay<'a>(&'a TitleId);

impl Display for TitleIdWiiPlatformDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let higher_half = self.0.higher_half();
        let lower_half = self.0.lower_half();

        if higher_half != 0x00000001 {
            return self.0.fmt(f);
        };

        let text = match lower_half {
            0x00000001 => String::from("BOOT2"),
            0x00000002 => String::from("System Menu"),

            0x00000100 => String::from("BC"),
            0x00000101 => String::from("MIOS"),

            0x00000200 => String::from("BC-NAND"),
            0x00000201 => String::from("BC-WFS"),

            lower_half => {
                format!("IOS{lower_half}")
            }
        };

        write!(f, "{text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fake ID "4A4132BC-HAGA"
    const TEST_ID_NUMBER: u64 = 5350613616540337985;

    const TEST_ID_NUMBER_NOT_VALID_ASCII: u64 = 5350613615614431505;

    #[test]
    fn default_display() {
        let title_id = TitleId::new(TEST_ID_NUMBER);

        assert_eq!("4a4132bc-48414741", format!("{title_id}"))
    }

    #[test]
    fn default_display_alternative_mode() {
        let title_id = TitleId::new(TEST_ID_NUMBER);

        assert_eq!("4A4132BC-48414741", format!("{title_id:#}"))
    }

    #[test]
    fn ascii_display() {
        let title_id = TitleId::new(TEST_ID_NUMBER);

        assert_eq!("4a4132bc-HAGA", format!("{}", title_id.display_ascii()))
    }

    #[test]
    fn ascii_display_invalid_ascii() {
        let title_id = TitleId::new(TEST_ID_NUMBER_NOT_VALID_ASCII);

        assert_eq!("4a4132bc-11111111", format!("{}", title_id.display_ascii()))
    }

    #[test]
    fn parse_from_string() {
        let title_id: TitleId = "0000000100000002".parse().unwrap();

        assert_eq!(title_id, TitleId::SYSTEM_MENU);
    }

    #[test]
    fn parse_from_string_with_separator() {
        let title_id: TitleId = "00000001-00000001".parse().unwrap();

        assert_eq!(title_id, TitleId::BOOT2);
    }

    #[test]
    fn parse_from_string_wrong_length() {
        assert!("00000001".parse::<TitleId>().is_err());
    }

    #[test]
    fn parse_from_string_not_hex() {
        assert!("000000010000000g".parse::<TitleId>().is_err());
    }

    #[test]
    fn round_trip_bytes() {
        let title_id = TitleId::new(TEST_ID_NUMBER);

        assert_eq!(TitleId::new_from_bytes(title_id.bytes()), title_id);
    }

    #[test]
    fn kind_of_well_known_ids() {
        assert_eq!(TitleId::SYSTEM_MENU.kind(), TitleKind::System);
        assert_eq!(
            TitleId::new_with_halfs(0x00010001, 0x48414741).kind(),
            TitleKind::Channel
        );
        assert_eq!(
            TitleId::new_with_halfs(0x00010005, 0x48414741).kind(),
            TitleKind::Dlc
        );
        assert_eq!(
            TitleId::new_with_halfs(0x00000000, 0).kind(),
            TitleKind::Unknown
        );
    }

    #[test]
    fn set_lower_half() {
        let mut title_id = TitleId::new_with_halfs(500, 500);
        title_id.set_lower_half(100);

        assert_eq!(title_id.lower_half(), 100);
        assert_eq!(title_id.higher_half(), 500);
    }

    #[test]
    fn set_higher_half() {
        let mut title_id = TitleId::new_with_halfs(500, 500);
        title_id.set_higher_half(100);

        assert_eq!(title_id.lower_half(), 500);
        assert_eq!(title_id.higher_half(), 100);
    }
}
