// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

use byteorder::ReadBytesExt;
use std::io;
use std::io::Read;

/// Extension trait of [Read] with useful miscellaneous operations.
pub trait ReadEx: Read {
    /// Read a bool.
    fn read_bool(&mut self) -> io::Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),

            value => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("The given value cannot be converted into a bool: {value}"),
            )),
        }
    }

    /// Read bytes until (and consuming) a NUL byte and decode them as an UTF-8 string.
    fn read_string_until_nul(&mut self) -> io::Result<String> {
        let mut buffer = Vec::new();

        loop {
            let byte = self.read_u8()?;

            if byte == 0 {
                break;
            }

            buffer.push(byte);
        }

        String::from_utf8(buffer)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
    }
}

impl<T: ?Sized + Read> ReadEx for T {}
