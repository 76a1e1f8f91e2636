// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Conversions between the two forms of a title version.
//!
//! Versions are stored inside tickets and title metadata as a 16 bit decimal value and shown
//! to users in the standard `major.minor` form. The System Menu does not follow the
//! `(major << 8) | minor` packing, its known builds go through a closed lookup table that
//! also encodes the region (`4.3U`, `4.3E`, ...).

use crate::title_id::TitleId;
use thiserror::Error;

/// Known System Menu builds and their decimal version codes.
const WII_MENU_VERSIONS: &[(&str, u16)] = &[
    ("1.0J", 64),
    ("1.0U", 33),
    ("1.0E", 66),
    ("2.0J", 128),
    ("2.0U", 97),
    ("2.0E", 130),
    ("2.1E", 162),
    ("2.2J", 192),
    ("2.2U", 193),
    ("2.2E", 194),
    ("3.0J", 224),
    ("3.0U", 225),
    ("3.0E", 226),
    ("3.1J", 256),
    ("3.1U", 257),
    ("3.1E", 258),
    ("3.2J", 288),
    ("3.2U", 289),
    ("3.2E", 290),
    ("3.3J", 352),
    ("3.3U", 353),
    ("3.3E", 354),
    ("3.4J", 384),
    ("3.4U", 385),
    ("3.4E", 386),
    ("3.5K", 390),
    ("4.0J", 416),
    ("4.0U", 417),
    ("4.0E", 418),
    ("4.1J", 448),
    ("4.1U", 449),
    ("4.1E", 450),
    ("4.1K", 454),
    ("4.2J", 480),
    ("4.2U", 481),
    ("4.2E", 482),
    ("4.2K", 486),
    ("4.3J", 512),
    ("4.3U", 513),
    ("4.3E", 514),
    ("4.3K", 518),
    ("4.3U-Mini", 4609),
    ("4.3E-Mini", 4610),
];

/// Known vWii System Menu builds and their decimal version codes. These overlap with the Wii
/// table, the caller has to know which console family the title is for.
const VWII_MENU_VERSIONS: &[(&str, u16)] = &[
    ("vWii-1.0.0J", 512),
    ("vWii-1.0.0U", 513),
    ("vWii-1.0.0E", 514),
    ("vWii-4.0.0J", 544),
    ("vWii-4.0.0U", 545),
    ("vWii-4.0.0E", 546),
    ("vWii-5.2.0J", 608),
    ("vWii-5.2.0U", 609),
    ("vWii-5.2.0E", 610),
];

/// A title version in either of its two accepted input forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleVersion {
    /// The 16 bit value stored inside tickets and title metadata.
    Decimal(u16),

    /// The human readable `major.minor` form, or a System Menu build name such as `4.3U`.
    Standard(String),
}

impl TitleVersion {
    /// Resolve the version to its decimal form. The title ID is needed because the System
    /// Menu goes through the lookup table instead of the `major.minor` packing.
    pub fn to_decimal(&self, title_id: &TitleId) -> Result<u16, TitleVersionError> {
        match self {
            Self::Decimal(value) => Ok(*value),
            Self::Standard(string) => standard_to_decimal(string, title_id),
        }
    }
}

impl From<u16> for TitleVersion {
    fn from(value: u16) -> Self {
        Self::Decimal(value)
    }
}

impl From<&str> for TitleVersion {
    fn from(value: &str) -> Self {
        Self::Standard(value.to_owned())
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TitleVersionError {
    #[error("Standard versions must follow the \"major.minor\" form: {0}")]
    MalformedStandardVersion(String),

    #[error("Version components cannot exceed 255: {0}")]
    StandardComponentOutOfRange(String),

    #[error("Unrecognized System Menu version: {0}")]
    UnknownSystemMenuVersion(String),
}

/// Convert a version from its standard `major.minor` form (or System Menu build name) to the
/// decimal form stored inside tickets and title metadata.
pub fn standard_to_decimal(version: &str, title_id: &TitleId) -> Result<u16, TitleVersionError> {
    if *title_id == TitleId::SYSTEM_MENU {
        return WII_MENU_VERSIONS
            .iter()
            .chain(VWII_MENU_VERSIONS)
            .find(|(name, _)| name.eq_ignore_ascii_case(version))
            .map(|(_, value)| *value)
            .ok_or_else(|| TitleVersionError::UnknownSystemMenuVersion(version.to_owned()));
    }

    let (major, minor) = version
        .split_once('.')
        .ok_or_else(|| TitleVersionError::MalformedStandardVersion(version.to_owned()))?;

    let major: u8 = major
        .parse()
        .map_err(|_| TitleVersionError::StandardComponentOutOfRange(version.to_owned()))?;

    let minor: u8 = minor
        .parse()
        .map_err(|_| TitleVersionError::StandardComponentOutOfRange(version.to_owned()))?;

    Ok(((major as u16) << 8) | minor as u16)
}

/// Convert a version from its decimal form to the standard `major.minor` form, or to a System
/// Menu build name. `is_vwii` selects the vWii table, its decimal codes overlap with the Wii
/// ones.
pub fn decimal_to_standard(
    version: u16,
    title_id: &TitleId,
    is_vwii: bool,
) -> Result<String, TitleVersionError> {
    if *title_id == TitleId::SYSTEM_MENU {
        let table = if is_vwii {
            VWII_MENU_VERSIONS
        } else {
            WII_MENU_VERSIONS
        };

        return table
            .iter()
            .find(|(_, value)| *value == version)
            .map(|(name, _)| (*name).to_owned())
            .ok_or_else(|| TitleVersionError::UnknownSystemMenuVersion(version.to_string()));
    }

    Ok(format!("{}.{}", version >> 8, version & 0xFF))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDINARY_TITLE: TitleId = TitleId::BOOT2;

    #[test]
    fn standard_to_decimal_ordinary_title() {
        assert_eq!(standard_to_decimal("1.2", &ORDINARY_TITLE).unwrap(), 258);
        assert_eq!(standard_to_decimal("0.33", &ORDINARY_TITLE).unwrap(), 33);
        assert_eq!(
            standard_to_decimal("255.255", &ORDINARY_TITLE).unwrap(),
            65535
        );
    }

    #[test]
    fn decimal_to_standard_ordinary_title() {
        assert_eq!(
            decimal_to_standard(258, &ORDINARY_TITLE, false).unwrap(),
            "1.2"
        );
        assert_eq!(
            decimal_to_standard(33, &ORDINARY_TITLE, false).unwrap(),
            "0.33"
        );
    }

    #[test]
    fn standard_component_out_of_range() {
        assert!(matches!(
            standard_to_decimal("256.0", &ORDINARY_TITLE),
            Err(TitleVersionError::StandardComponentOutOfRange(_))
        ));
    }

    #[test]
    fn malformed_standard_version() {
        assert!(matches!(
            standard_to_decimal("4", &ORDINARY_TITLE),
            Err(TitleVersionError::MalformedStandardVersion(_))
        ));
    }

    #[test]
    fn system_menu_lookup() {
        assert_eq!(
            standard_to_decimal("4.3U", &TitleId::SYSTEM_MENU).unwrap(),
            513
        );
        assert_eq!(
            standard_to_decimal("vWii-5.2.0U", &TitleId::SYSTEM_MENU).unwrap(),
            609
        );
        assert_eq!(
            standard_to_decimal("4.3u", &TitleId::SYSTEM_MENU).unwrap(),
            513
        );
    }

    #[test]
    fn system_menu_reverse_lookup() {
        assert_eq!(
            decimal_to_standard(513, &TitleId::SYSTEM_MENU, false).unwrap(),
            "4.3U"
        );
        assert_eq!(
            decimal_to_standard(513, &TitleId::SYSTEM_MENU, true).unwrap(),
            "vWii-1.0.0U"
        );
    }

    #[test]
    fn system_menu_unknown_version() {
        assert!(matches!(
            standard_to_decimal("9.9X", &TitleId::SYSTEM_MENU),
            Err(TitleVersionError::UnknownSystemMenuVersion(_))
        ));
    }

    #[test]
    fn title_version_input_forms() {
        assert_eq!(
            TitleVersion::from(513).to_decimal(&ORDINARY_TITLE).unwrap(),
            513
        );
        assert_eq!(
            TitleVersion::from("2.1").to_decimal(&ORDINARY_TITLE).unwrap(),
            513
        );
    }
}
