// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the content region stored inside an installable package.
//!
//! The region is the concatenation of the encrypted content blobs of a title. A blob is
//! padded up to 64 bytes before the next one starts, but each blob itself only spans up to
//! the next 16 byte boundary. Records and blobs are kept together in a single list so they
//! can never drift apart.

use crate::crypto;
use crate::title_metadata::{ContentKind, ContentRecord};
use sha1::{Digest, Sha1};
use std::io;
use std::io::{Cursor, Read, Seek, Write};
use thiserror::Error;
use tracing::warn;
use util::StreamPin;

fn format_hash(hash: &[u8]) -> String {
    hash.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// A content blob paired with its record.
#[derive(Debug, Clone)]
pub struct Content {
    /// The record of the content, as stored inside the title metadata.
    pub record: ContentRecord,

    /// The encrypted bytes of the content.
    pub data: Vec<u8>,
}

/// The ordered set of encrypted content blobs of a title.
#[derive(Debug, Clone, Default)]
pub struct ContentRegion {
    /// The contents stored inside the region, in record order.
    pub contents: Vec<Content>,
}

impl ContentRegion {
    /// Parse a content region, driven by the content records taken from the title metadata.
    pub fn new<T: Read + Seek>(
        stream: T,
        content_records: &[ContentRecord],
    ) -> Result<Self, ContentRegionError> {
        let mut stream = StreamPin::new(stream)?;

        let mut contents = Vec::with_capacity(content_records.len());
        let mut offset = 0;

        for record in content_records {
            stream.seek_from_pin(offset as i64)?;

            // Blobs span whole 16 byte groups, the declared size trims the tail later
            let stored_size = util::align_to_boundary(record.size, 16);

            let mut data = vec![0; stored_size as usize];
            stream.read_exact(&mut data)?;

            contents.push(Content {
                record: record.clone(),
                data,
            });

            offset += util::align_to_boundary(record.size, 64);
        }

        Ok(Self { contents })
    }

    /// Parse a content region from an owned buffer.
    pub fn from_bytes(
        bytes: &[u8],
        content_records: &[ContentRecord],
    ) -> Result<Self, ContentRegionError> {
        Self::new(Cursor::new(bytes), content_records)
    }

    /// Dump the content region into a stream.
    pub fn dump<T: Write + Seek>(&self, stream: T) -> io::Result<()> {
        let mut stream = StreamPin::new(stream)?;

        for (position, content) in self.contents.iter().enumerate() {
            if position != 0 {
                stream.align_zeroed(64)?;
            }

            stream.write_all(&content.data)?;
            stream.align_zeroed(16)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }

    /// Get the size of the content region in bytes, as declared on the package header:
    /// every blob but the last one is accounted with its 64 byte padding.
    pub fn size(&self) -> u64 {
        let mut size = 0;

        for (position, content) in self.contents.iter().enumerate() {
            if position == self.contents.len() - 1 {
                size += content.record.size;
            } else {
                size += util::align_to_boundary(content.record.size, 64);
            }
        }

        size
    }

    /// Get a copy of the content records, in region order. Used to re-synchronize the title
    /// metadata after the region has been edited.
    pub fn content_records(&self) -> Vec<ContentRecord> {
        self.contents
            .iter()
            .map(|content| content.record.clone())
            .collect()
    }

    fn content_with_index(&self, index: u16) -> Result<&Content, ContentRegionError> {
        self.contents
            .iter()
            .find(|content| content.record.index == index)
            .ok_or(ContentRegionError::ContentNotFound)
    }

    fn content_with_index_mut(&mut self, index: u16) -> Result<&mut Content, ContentRegionError> {
        self.contents
            .iter_mut()
            .find(|content| content.record.index == index)
            .ok_or(ContentRegionError::ContentNotFound)
    }

    fn index_of_id(&self, id: u32) -> Result<u16, ContentRegionError> {
        self.contents
            .iter()
            .find(|content| content.record.id == id)
            .map(|content| content.record.index)
            .ok_or(ContentRegionError::ContentNotFound)
    }

    /// Get the encrypted bytes of the content with the given content index.
    ///
    /// Contents are looked up by their record index (the value used as the encryption
    /// initialization vector seed), not by their physical position, as both can drift
    /// apart on repacked titles.
    pub fn encrypted_with_index(&self, index: u16) -> Result<&[u8], ContentRegionError> {
        Ok(&self.content_with_index(index)?.data)
    }

    /// Get the encrypted bytes of the content with the given content ID.
    pub fn encrypted_with_id(&self, id: u32) -> Result<&[u8], ContentRegionError> {
        self.encrypted_with_index(self.index_of_id(id)?)
    }

    /// Get the encrypted bytes of every content, in region order.
    pub fn encrypted_all(&self) -> Vec<&[u8]> {
        self.contents
            .iter()
            .map(|content| content.data.as_slice())
            .collect()
    }

    /// Get the decrypted bytes of the content with the given content index.
    ///
    /// The decrypted data is hashed and compared against the record, a mismatch fails
    /// unless `skip_hash` is set.
    pub fn decrypted_with_index(
        &self,
        index: u16,
        title_key: &[u8; 16],
        skip_hash: bool,
    ) -> Result<Vec<u8>, ContentRegionError> {
        let content = self.content_with_index(index)?;

        let decrypted = crypto::decrypt_content(
            &content.data,
            title_key,
            content.record.index,
            content.record.size,
        )?;

        let hash: [u8; 20] = Sha1::digest(&decrypted).into();

        if hash != content.record.hash {
            if skip_hash {
                warn!(index, "Ignoring a content hash mismatch");
            } else {
                return Err(ContentRegionError::HashMismatch {
                    expected: format_hash(&content.record.hash),
                    actual: format_hash(&hash),
                });
            }
        }

        Ok(decrypted)
    }

    /// Get the decrypted bytes of the content with the given content ID.
    pub fn decrypted_with_id(
        &self,
        id: u32,
        title_key: &[u8; 16],
        skip_hash: bool,
    ) -> Result<Vec<u8>, ContentRegionError> {
        self.decrypted_with_index(self.index_of_id(id)?, title_key, skip_hash)
    }

    /// Get the decrypted bytes of every content, in region order.
    pub fn decrypted_all(
        &self,
        title_key: &[u8; 16],
        skip_hash: bool,
    ) -> Result<Vec<Vec<u8>>, ContentRegionError> {
        self.contents
            .iter()
            .map(|content| self.decrypted_with_index(content.record.index, title_key, skip_hash))
            .collect()
    }

    /// Add an already encrypted content along with the record values describing it.
    /// Duplicated content IDs or indices are rejected.
    pub fn add_encrypted(
        &mut self,
        data: Vec<u8>,
        id: u32,
        index: u16,
        kind: ContentKind,
        size: u64,
        hash: [u8; 20],
    ) -> Result<(), ContentRegionError> {
        for content in &self.contents {
            if content.record.id == id {
                return Err(ContentRegionError::DuplicateContentId(id));
            }

            if content.record.index == index {
                return Err(ContentRegionError::DuplicateContentIndex(index));
            }
        }

        self.contents.push(Content {
            record: ContentRecord {
                id,
                index,
                kind,
                size,
                hash,
            },
            data,
        });

        Ok(())
    }

    /// Add a decrypted content. Its index is derived by incrementing the current highest
    /// one, its size and hash are taken from the data, and it is encrypted with the given
    /// title key before being stored.
    pub fn add(
        &mut self,
        data: &[u8],
        id: u32,
        kind: ContentKind,
        title_key: &[u8; 16],
    ) -> Result<(), ContentRegionError> {
        let index = self
            .contents
            .iter()
            .map(|content| content.record.index)
            .max()
            .map_or(0, |index| index + 1);

        let hash: [u8; 20] = Sha1::digest(data).into();
        let encrypted = crypto::encrypt_content(data, title_key, index)?;

        self.add_encrypted(encrypted, id, index, kind, data.len() as u64, hash)
    }

    /// Replace the content at the given content index with already encrypted data. The
    /// record keeps its index (used as the encryption initialization vector seed) and, when
    /// not given, its ID and kind.
    pub fn set_encrypted(
        &mut self,
        data: Vec<u8>,
        index: u16,
        size: u64,
        hash: [u8; 20],
        id: Option<u32>,
        kind: Option<ContentKind>,
    ) -> Result<(), ContentRegionError> {
        let content = self.content_with_index_mut(index)?;

        content.record.size = size;
        content.record.hash = hash;

        if let Some(id) = id {
            content.record.id = id;
        }

        if let Some(kind) = kind {
            content.record.kind = kind;
        }

        content.data = data;

        Ok(())
    }

    /// Replace the content at the given content index with decrypted data, encrypting it
    /// with the given title key first.
    pub fn set(
        &mut self,
        data: &[u8],
        index: u16,
        title_key: &[u8; 16],
        id: Option<u32>,
        kind: Option<ContentKind>,
    ) -> Result<(), ContentRegionError> {
        let hash: [u8; 20] = Sha1::digest(data).into();
        let encrypted = crypto::encrypt_content(data, title_key, index)?;

        self.set_encrypted(encrypted, index, data.len() as u64, hash, id, kind)
    }

    /// Load decrypted data for the record already present at the given content index. The
    /// data must match the hash of the record, and is encrypted with the given title key
    /// before being stored.
    pub fn load(
        &mut self,
        data: &[u8],
        index: u16,
        title_key: &[u8; 16],
    ) -> Result<(), ContentRegionError> {
        let content = self.content_with_index_mut(index)?;

        let hash: [u8; 20] = Sha1::digest(data).into();

        if hash != content.record.hash {
            return Err(ContentRegionError::HashMismatch {
                expected: format_hash(&content.record.hash),
                actual: format_hash(&hash),
            });
        }

        content.data = crypto::encrypt_content(data, title_key, content.record.index)?;

        Ok(())
    }

    /// Remove the content with the given content index, both its record and its data. Gaps
    /// between the remaining index values are permitted.
    pub fn remove_with_index(&mut self, index: u16) -> Result<(), ContentRegionError> {
        let position = self
            .contents
            .iter()
            .position(|content| content.record.index == index)
            .ok_or(ContentRegionError::ContentNotFound)?;

        self.contents.remove(position);

        Ok(())
    }

    /// Remove the content with the given content ID, both its record and its data.
    pub fn remove_with_id(&mut self, id: u32) -> Result<(), ContentRegionError> {
        self.remove_with_index(self.index_of_id(id)?)
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ContentRegionError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("Content not found")]
    ContentNotFound,

    #[error("A content with the ID {0} already exists")]
    DuplicateContentId(u32),

    #[error("A content with the index {0} already exists")]
    DuplicateContentIndex(u16),

    #[error("Content hash mismatch, expected {expected} but got {actual}")]
    HashMismatch { expected: String, actual: String },
}

/// A record of the shared contents map (`content.map`) kept by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedContentRecord {
    /// The incremental ID the shared content is stored under.
    pub id: u32,

    /// The SHA-1 hash of the decrypted shared content.
    pub hash: [u8; 20],
}

/// The map of shared contents installed on a console, stored at `/shared1/content.map`.
///
/// Each record is 28 bytes: the storage ID as 8 ASCII hex digits followed by the SHA-1
/// hash of the content.
#[derive(Debug, Clone, Default)]
pub struct SharedContentMap {
    /// The records stored inside the map.
    pub records: Vec<SharedContentRecord>,
}

impl SharedContentMap {
    /// Parse a shared contents map.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, SharedContentMapError> {
        let mut records = Vec::new();

        loop {
            let mut id_text = [0; 8];

            match stream.read(&mut id_text)? {
                0 => break,
                8 => (),
                _ => return Err(SharedContentMapError::MalformedMap),
            }

            let id_text =
                std::str::from_utf8(&id_text).map_err(|_| SharedContentMapError::MalformedMap)?;

            let id = u32::from_str_radix(id_text, 16)
                .map_err(|_| SharedContentMapError::MalformedMap)?;

            let hash = util::read_exact!(stream, 20).map_err(|_| SharedContentMapError::MalformedMap)?;

            records.push(SharedContentRecord { id, hash });
        }

        Ok(Self { records })
    }

    /// Parse a shared contents map from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SharedContentMapError> {
        if bytes.len() % 28 != 0 {
            return Err(SharedContentMapError::MalformedMap);
        }

        Self::new(Cursor::new(bytes))
    }

    /// Dump the map into a stream.
    pub fn dump<T: Write>(&self, mut stream: T) -> io::Result<()> {
        for record in &self.records {
            stream.write_all(format!("{:08x}", record.id).as_bytes())?;
            stream.write_all(&record.hash)?;
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.dump(&mut buffer)?;

        Ok(buffer)
    }

    /// Find the storage ID assigned to a content hash, if any.
    pub fn id_of_hash(&self, hash: &[u8; 20]) -> Option<u32> {
        self.records
            .iter()
            .find(|record| record.hash == *hash)
            .map(|record| record.id)
    }

    /// Register a new shared content hash, assigning it the next incremental storage ID.
    /// Returns the assigned ID.
    pub fn add(&mut self, hash: [u8; 20]) -> u32 {
        let id = self.records.last().map_or(0, |record| record.id + 1);

        self.records.push(SharedContentRecord { id, hash });

        id
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SharedContentMapError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("The shared contents map is corrupted")]
    MalformedMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const TITLE_KEY: [u8; 16] = hex!("000102030405060708090a0b0c0d0e0f");

    fn region_with_contents(payloads: &[&[u8]]) -> ContentRegion {
        let mut region = ContentRegion::default();

        for (position, payload) in payloads.iter().enumerate() {
            region
                .add(payload, position as u32 + 100, ContentKind::Normal, &TITLE_KEY)
                .unwrap();
        }

        region
    }

    #[test]
    fn empty_region_round_trip() {
        let region = ContentRegion::default();

        assert_eq!(region.to_bytes().unwrap(), Vec::<u8>::new());
        assert_eq!(region.size(), 0);

        let parsed = ContentRegion::from_bytes(&[], &[]).unwrap();
        assert!(parsed.contents.is_empty());
    }

    #[test]
    fn single_content_round_trip() {
        let region = region_with_contents(&[&[0xAB; 45]]);
        let bytes = region.to_bytes().unwrap();

        // 45 bytes encrypted span three whole 16 byte groups
        assert_eq!(bytes.len(), 48);

        let parsed = ContentRegion::from_bytes(&bytes, &region.content_records()).unwrap();

        assert_eq!(
            parsed.decrypted_with_index(0, &TITLE_KEY, false).unwrap(),
            vec![0xAB; 45]
        );
    }

    #[test]
    fn multiple_contents_round_trip() {
        let payloads: Vec<Vec<u8>> = (0..10u8)
            .map(|value| vec![value; 13 + value as usize * 7])
            .collect();
        let payload_refs: Vec<&[u8]> = payloads.iter().map(|payload| payload.as_slice()).collect();

        let region = region_with_contents(&payload_refs);
        let bytes = region.to_bytes().unwrap();

        let parsed = ContentRegion::from_bytes(&bytes, &region.content_records()).unwrap();

        for (position, payload) in payloads.iter().enumerate() {
            assert_eq!(
                parsed
                    .decrypted_with_index(position as u16, &TITLE_KEY, false)
                    .unwrap(),
                *payload
            );
        }

        assert_eq!(parsed.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn lookup_by_id() {
        let region = region_with_contents(&[&[1; 16], &[2; 16]]);

        assert_eq!(
            region.decrypted_with_id(101, &TITLE_KEY, false).unwrap(),
            vec![2; 16]
        );
        assert!(matches!(
            region.decrypted_with_id(999, &TITLE_KEY, false),
            Err(ContentRegionError::ContentNotFound)
        ));
    }

    #[test]
    fn hash_mismatch_is_detected_and_skippable() {
        let mut region = region_with_contents(&[&[3; 32]]);
        region.contents[0].record.hash = [0; 20];

        assert!(matches!(
            region.decrypted_with_index(0, &TITLE_KEY, false),
            Err(ContentRegionError::HashMismatch { .. })
        ));

        assert_eq!(
            region.decrypted_with_index(0, &TITLE_KEY, true).unwrap(),
            vec![3; 32]
        );
    }

    #[test]
    fn duplicated_ids_and_indices_are_rejected() {
        let mut region = region_with_contents(&[&[4; 16]]);

        assert!(matches!(
            region.add_encrypted(vec![0; 16], 100, 7, ContentKind::Normal, 16, [0; 20]),
            Err(ContentRegionError::DuplicateContentId(100))
        ));

        assert!(matches!(
            region.add_encrypted(vec![0; 16], 200, 0, ContentKind::Normal, 16, [0; 20]),
            Err(ContentRegionError::DuplicateContentIndex(0))
        ));
    }

    #[test]
    fn set_preserves_index_and_optionals() {
        let mut region = region_with_contents(&[&[5; 16], &[6; 16]]);

        region
            .set(&[9; 24], 1, &TITLE_KEY, None, Some(ContentKind::Shared))
            .unwrap();

        let record = &region.contents[1].record;
        assert_eq!(record.index, 1);
        assert_eq!(record.id, 101);
        assert_eq!(record.kind, ContentKind::Shared);
        assert_eq!(record.size, 24);

        assert_eq!(
            region.decrypted_with_index(1, &TITLE_KEY, false).unwrap(),
            vec![9; 24]
        );
    }

    #[test]
    fn load_checks_the_record_hash() {
        let mut region = region_with_contents(&[&[7; 16]]);

        assert!(matches!(
            region.load(&[8; 16], 0, &TITLE_KEY),
            Err(ContentRegionError::HashMismatch { .. })
        ));

        region.load(&[7; 16], 0, &TITLE_KEY).unwrap();
    }

    #[test]
    fn remove_contents() {
        let mut region = region_with_contents(&[&[1; 16], &[2; 16], &[3; 16]]);

        region.remove_with_index(1).unwrap();
        assert_eq!(region.contents.len(), 2);

        region.remove_with_id(102).unwrap();
        assert_eq!(region.contents.len(), 1);
        assert_eq!(region.contents[0].record.id, 100);

        // Index gaps are fine, new contents continue from the highest index
        region.add(&[4; 16], 300, ContentKind::Normal, &TITLE_KEY).unwrap();
        assert_eq!(region.contents[1].record.index, 1);
    }

    #[test]
    fn shared_content_map_round_trip() {
        let mut map = SharedContentMap::default();

        assert_eq!(map.add([0xAA; 20]), 0);
        assert_eq!(map.add([0xBB; 20]), 1);

        let bytes = map.to_bytes().unwrap();
        assert_eq!(bytes.len(), 56);

        let parsed = SharedContentMap::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.records, map.records);
        assert_eq!(parsed.id_of_hash(&[0xBB; 20]), Some(1));
        assert_eq!(parsed.id_of_hash(&[0xCC; 20]), None);
    }

    #[test]
    fn shared_content_map_rejects_partial_records() {
        assert!(matches!(
            SharedContentMap::from_bytes(&[0; 27]),
            Err(SharedContentMapError::MalformedMap)
        ));
    }
}
