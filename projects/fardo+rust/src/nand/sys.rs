// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the `uid.sys` file, the launch registry of the console.
//!
//! The console appends a 12 byte record the first time a title is launched or installed:
//! the title ID, two zero bytes and the 16 bit uid assigned to the title. A fresh file
//! always starts with the System Menu at uid 0x1000.

use crate::title_id::TitleId;
use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Seek, Write};
use thiserror::Error;
use util::WriteEx;

/// The uid assigned to the first entry of a fresh file, the System Menu.
const FIRST_UID: u16 = 0x1000;

/// An entry of the launch registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidSysEntry {
    /// The title ID of the title this entry corresponds with.
    pub title_id: TitleId,

    /// The uid assigned to the title.
    pub uid: u16,
}

/// The `uid.sys` launch registry stored at `/sys/` on the console storage.
#[derive(Debug, Clone, Default)]
pub struct UidSys {
    /// The entries stored in the registry, in assignment order.
    pub entries: Vec<UidSysEntry>,
}

impl UidSys {
    /// Parse a `uid.sys` file.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, UidSysError> {
        let mut entries = Vec::new();

        loop {
            let mut title_id = [0; 8];

            match stream.read(&mut title_id)? {
                0 => break,
                8 => (),
                _ => return Err(UidSysError::MalformedRegistry),
            }

            // Skip 2 zeroed bytes
            stream.seek_relative(2)?;

            let uid = stream.read_u16::<BE>()?;

            entries.push(UidSysEntry {
                title_id: TitleId::new_from_bytes(title_id),
                uid,
            });
        }

        Ok(Self { entries })
    }

    /// Parse a `uid.sys` file from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, UidSysError> {
        if bytes.len() % 12 != 0 {
            return Err(UidSysError::MalformedRegistry);
        }

        Self::new(Cursor::new(bytes))
    }

    /// Dump the registry into a stream.
    pub fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        for entry in &self.entries {
            entry.title_id.dump(&mut stream)?;
            stream.write_zeroed(2)?;
            stream.write_u16::<BE>(entry.uid)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.dump(&mut buffer)?;

        Ok(buffer)
    }

    /// Seed a fresh registry with its standard first entry, the System Menu at uid 0x1000.
    pub fn create() -> Self {
        Self {
            entries: vec![UidSysEntry {
                title_id: TitleId::SYSTEM_MENU,
                uid: FIRST_UID,
            }],
        }
    }

    /// Register a title, assigning it the next free uid. Titles already present keep
    /// their uid. Returns the uid of the title.
    pub fn add(&mut self, title_id: TitleId) -> u16 {
        if let Some(entry) = self
            .entries
            .iter()
            .find(|entry| entry.title_id == title_id)
        {
            return entry.uid;
        }

        let uid = self
            .entries
            .last()
            .map_or(FIRST_UID, |entry| entry.uid + 1);

        self.entries.push(UidSysEntry { title_id, uid });

        uid
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum UidSysError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("The launch registry is corrupted")]
    MalformedRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_starts_with_the_system_menu() {
        let registry = UidSys::create();

        assert_eq!(registry.entries.len(), 1);
        assert_eq!(registry.entries[0].title_id, TitleId::SYSTEM_MENU);
        assert_eq!(registry.entries[0].uid, 0x1000);
    }

    #[test]
    fn round_trip() {
        let mut registry = UidSys::create();
        registry.add(TitleId::new_with_halfs(0x00010001, 0x48414741));

        let bytes = registry.to_bytes().unwrap();
        assert_eq!(bytes.len(), 24);

        let parsed = UidSys::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.entries, registry.entries);
    }

    #[test]
    fn uids_are_incremental_and_stable() {
        let mut registry = UidSys::create();

        let title_id = TitleId::new_with_halfs(0x00010001, 0x48414741);

        assert_eq!(registry.add(title_id), 0x1001);
        assert_eq!(registry.add(TitleId::BOOT2), 0x1002);

        // Adding the same title again keeps its uid
        assert_eq!(registry.add(title_id), 0x1001);
        assert_eq!(registry.entries.len(), 3);
    }

    #[test]
    fn partial_records_are_rejected() {
        assert!(matches!(
            UidSys::from_bytes(&[0; 13]),
            Err(UidSysError::MalformedRegistry)
        ));
    }
}
