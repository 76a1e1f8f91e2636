// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Implementation of the hierarchical archive format used to bundle resource files.
//!
//! The archive holds a flat node table: node zero is the root directory and the `size`
//! field of a directory node is the exclusive upper bound of its subtree, so nesting is
//! recovered by walking the table in order while maintaining a stack of open directories.
//! Channel banners prepend a 0x600 byte envelope to the archive, detected by probing for
//! its magic at the two known offsets.

use crate::banner::IMET_MAGIC;
use byteorder::{BE, ReadBytesExt, WriteBytesExt};
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use util::{ReadEx, StreamPin, WriteEx};
use walkdir::WalkDir;

const U8_MAGIC: [u8; 4] = [0x55, 0xAA, 0x38, 0x2D];

/// Offset of the root node, fixed by the format.
const ROOT_NODE_OFFSET: u32 = 0x20;

/// A single node of the archive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U8Node {
    /// Whether the node is a file or a directory.
    pub kind: U8NodeKind,

    /// Offset of the node name inside the string table. Recomputed on dump.
    pub name_offset: u32,

    /// For files the absolute offset of their data, for directories the node index of
    /// their parent (the root directory is its own parent). File offsets are recomputed
    /// on dump.
    pub data_offset: u32,

    /// For files their byte length. For the root directory the total node count, for any
    /// other directory the node index right after its last descendant.
    pub size: u32,
}

/// The kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum U8NodeKind {
    /// The node is a file.
    File,

    /// The node is a directory.
    Directory,
}

impl U8NodeKind {
    fn new(identifier: u8) -> Result<Self, U8Error> {
        match identifier {
            0 => Ok(Self::File),
            1 => Ok(Self::Directory),

            identifier => Err(U8Error::UnknownNodeKind(identifier)),
        }
    }

    fn dump_identifier<T: Write>(&self, mut stream: T) -> io::Result<()> {
        stream.write_u8(match self {
            Self::File => 0,
            Self::Directory => 1,
        })?;

        Ok(())
    }
}

/// A hierarchical archive: the node table plus the name and data of every node.
///
/// The three lists are co-indexed, directories carry an empty data entry.
#[derive(Debug, Clone, Default)]
pub struct U8Archive {
    /// The node table, node zero is the root directory.
    pub nodes: Vec<U8Node>,

    /// The name of every node. The root directory has an empty name.
    pub names: Vec<String>,

    /// The data of every file node.
    pub data: Vec<Vec<u8>>,
}

impl U8Archive {
    /// Parse an archive, probing for the channel banner envelope when the magic is not
    /// found at the start of the stream.
    pub fn new<T: Read + Seek>(mut stream: T) -> Result<Self, U8Error> {
        let base = stream.stream_position()?;

        let magic = util::read_exact!(stream, 4)?;

        if magic != U8_MAGIC {
            // A banner envelope carries its own magic at 0x40, or at 0x80 when the file
            // starts with a build tag. The archive then starts past the envelope.
            let archive_offset = if Self::probe_banner_magic(&mut stream, base + 0x40)? {
                0x600
            } else if Self::probe_banner_magic(&mut stream, base + 0x80)? {
                0x640
            } else {
                return Err(U8Error::InvalidMagic);
            };

            stream.seek(SeekFrom::Start(base + archive_offset))?;

            let magic = util::read_exact!(stream, 4)?;

            if magic != U8_MAGIC {
                return Err(U8Error::InvalidMagic);
            }
        }

        // Every stored offset is relative to the archive start
        let archive_start = stream.stream_position()? - 4;

        let _root_node_offset = stream.read_u32::<BE>()?;
        let _header_size = stream.read_u32::<BE>()?;
        let _data_offset = stream.read_u32::<BE>()?;

        // Skip 16 reserved bytes
        stream.seek_relative(16)?;

        let root_node = Self::read_node(&mut stream)?;

        if root_node.kind != U8NodeKind::Directory || root_node.size == 0 {
            return Err(U8Error::MalformedNodeTable);
        }

        let mut nodes = vec![root_node];

        for _ in 1..root_node.size {
            nodes.push(Self::read_node(&mut stream)?);
        }

        let string_table_offset = stream.stream_position()? - archive_start;

        let mut names = Vec::with_capacity(nodes.len());
        let mut data = Vec::with_capacity(nodes.len());

        for node in &nodes {
            stream.seek(SeekFrom::Start(
                archive_start + string_table_offset + node.name_offset as u64,
            ))?;
            names.push(stream.read_string_until_nul()?);

            if node.kind == U8NodeKind::File {
                stream.seek(SeekFrom::Start(archive_start + node.data_offset as u64))?;

                let mut node_data = vec![0; node.size as usize];
                stream.read_exact(&mut node_data)?;
                data.push(node_data);
            } else {
                data.push(Vec::new());
            }
        }

        Ok(Self { nodes, names, data })
    }

    fn probe_banner_magic<T: Read + Seek>(stream: &mut T, offset: u64) -> io::Result<bool> {
        stream.seek(SeekFrom::Start(offset))?;

        let mut magic = [0; 4];

        match stream.read_exact(&mut magic) {
            Ok(()) => Ok(magic == IMET_MAGIC),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn read_node<T: Read + Seek>(stream: &mut T) -> Result<U8Node, U8Error> {
        let kind = U8NodeKind::new(stream.read_u8()?)?;
        let name_offset = stream.read_u24::<BE>()?;
        let data_offset = stream.read_u32::<BE>()?;
        let size = stream.read_u32::<BE>()?;

        Ok(U8Node {
            kind,
            name_offset,
            data_offset,
            size,
        })
    }

    /// Parse an archive from an owned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, U8Error> {
        Self::new(Cursor::new(bytes))
    }

    /// Dump the archive into a stream. Name and file data offsets are recomputed so the
    /// emitted layout is canonical: file data laid out in node order, each file aligned up
    /// to 32 bytes, starting past the 64 byte aligned header.
    pub fn dump<T: Write + Seek>(&mut self, stream: T) -> Result<(), U8Error> {
        let mut stream = StreamPin::new(stream)?;

        // The declared header size does not include the initial 32 bytes
        let mut header_size = 12 * self.nodes.len() as u32;

        for name in &self.names {
            header_size += name.len() as u32 + 1;
        }

        let data_offset = util::align_to_boundary(header_size as u64 + 32, 64) as u32;

        let mut current_data_offset = data_offset;
        let mut current_name_offset = 0;

        for (position, node) in self.nodes.iter_mut().enumerate() {
            if node.kind == U8NodeKind::File {
                node.data_offset = util::align_to_boundary(current_data_offset as u64, 32) as u32;
                current_data_offset += util::align_to_boundary(node.size as u64, 32) as u32;
            }

            node.name_offset = current_name_offset;
            current_name_offset += self.names[position].len() as u32 + 1;
        }

        stream.write_all(&U8_MAGIC)?;
        stream.write_u32::<BE>(ROOT_NODE_OFFSET)?;
        stream.write_u32::<BE>(header_size)?;
        stream.write_u32::<BE>(data_offset)?;
        stream.write_zeroed(16)?;

        for node in &self.nodes {
            node.kind.dump_identifier(&mut stream)?;
            stream.write_u24::<BE>(node.name_offset)?;
            stream.write_u32::<BE>(node.data_offset)?;
            stream.write_u32::<BE>(node.size)?;
        }

        for name in &self.names {
            stream.write_all(name.as_bytes())?;
            stream.write_zeroed(1)?;
        }

        stream.align_zeroed(64)?;

        for (node, data) in self.nodes.iter().zip(&self.data) {
            if node.kind == U8NodeKind::File {
                stream.write_all(data)?;
                stream.align_zeroed(32)?;
            }
        }

        Ok(())
    }

    /// Dump into an owned buffer.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, U8Error> {
        let mut buffer = Cursor::new(Vec::new());
        self.dump(&mut buffer)?;

        Ok(buffer.into_inner())
    }

    /// Build an archive from a directory tree. At every level children are sorted by
    /// their lowercased name, files before subdirectories.
    pub fn from_directory(path: &Path) -> Result<Self, U8Error> {
        if !path.is_dir() {
            return Err(U8Error::NotADirectory(path.to_path_buf()));
        }

        let total_nodes = count_entries(path)? + 1;

        let mut archive = Self {
            nodes: vec![U8Node {
                kind: U8NodeKind::Directory,
                name_offset: 0,
                data_offset: 0,
                size: total_nodes,
            }],
            names: vec![String::new()],
            data: vec![Vec::new()],
        };

        archive.pack_directory(path, 0)?;

        Ok(archive)
    }

    fn pack_directory(&mut self, path: &Path, parent_index: usize) -> Result<(), U8Error> {
        let (files, directories) = sorted_children(path)?;

        for (name, file_path) in files {
            let file_data = fs::read(&file_path)?;

            self.nodes.push(U8Node {
                kind: U8NodeKind::File,
                name_offset: 0,
                data_offset: 0,
                size: file_data.len() as u32,
            });
            self.names.push(name);
            self.data.push(file_data);
        }

        for (name, directory_path) in directories {
            let subtree_end = self.nodes.len() as u32 + 1 + count_entries(&directory_path)?;

            self.nodes.push(U8Node {
                kind: U8NodeKind::Directory,
                name_offset: 0,
                data_offset: parent_index as u32,
                size: subtree_end,
            });
            self.names.push(name);
            self.data.push(Vec::new());

            let directory_index = self.nodes.len() - 1;
            self.pack_directory(&directory_path, directory_index)?;
        }

        Ok(())
    }

    /// Extract the archive into a directory. The directory must not exist yet, or exist
    /// empty, so the output always matches the archived tree exactly.
    pub fn extract(&self, output: &Path) -> Result<(), U8Error> {
        if output.exists() {
            if output.is_file() {
                return Err(U8Error::NotADirectory(output.to_path_buf()));
            }

            if fs::read_dir(output)?.next().is_some() {
                return Err(U8Error::OutputDirectoryNotEmpty(output.to_path_buf()));
            }
        } else {
            fs::create_dir(output)?;
        }

        if self.nodes.is_empty() {
            return Ok(());
        }

        // Stack of open directories: the exclusive node index their subtree ends at,
        // paired with their on-disk path. The root spans every node so it never pops.
        let mut directory_stack = vec![(self.nodes[0].size, output.to_path_buf())];

        for (position, node) in self.nodes.iter().enumerate().skip(1) {
            while directory_stack.len() > 1 && position as u32 >= current_directory(&directory_stack).0
            {
                directory_stack.pop();
            }

            match node.kind {
                U8NodeKind::Directory => {
                    let path = current_directory(&directory_stack)
                        .1
                        .join(&self.names[position]);

                    fs::create_dir_all(&path)?;
                    directory_stack.push((node.size, path));
                }

                U8NodeKind::File => {
                    fs::write(
                        current_directory(&directory_stack)
                            .1
                            .join(&self.names[position]),
                        &self.data[position],
                    )?;
                }
            }
        }

        Ok(())
    }
}

// The root entry never leaves the stack, the walk cannot underflow it
#[allow(clippy::expect_used)]
fn current_directory(directory_stack: &[(u32, PathBuf)]) -> &(u32, PathBuf) {
    directory_stack
        .last()
        .expect("The root directory is always on the stack")
}

fn count_entries(path: &Path) -> Result<u32, U8Error> {
    let mut count = 0;

    for entry in WalkDir::new(path).min_depth(1) {
        entry?;
        count += 1;
    }

    Ok(count)
}

type NamedPath = (String, PathBuf);

fn sorted_children(path: &Path) -> Result<(Vec<NamedPath>, Vec<NamedPath>), U8Error> {
    let mut files = Vec::new();
    let mut directories = Vec::new();

    for entry in fs::read_dir(path)? {
        let entry = entry?;

        let name = entry
            .file_name()
            .into_string()
            .map_err(|name| U8Error::NonUtf8FileName(PathBuf::from(name)))?;

        if entry.file_type()?.is_dir() {
            directories.push((name, entry.path()));
        } else {
            files.push((name, entry.path()));
        }
    }

    files.sort_by_key(|(name, _)| name.to_lowercase());
    directories.sort_by_key(|(name, _)| name.to_lowercase());

    Ok((files, directories))
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum U8Error {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("Unable to walk the input directory: {0}")]
    WalkDirError(#[from] walkdir::Error),

    #[error("The given data is not a valid archive")]
    InvalidMagic,

    #[error("Unknown node kind: {0:#X}")]
    UnknownNodeKind(u8),

    #[error("The node table of the archive is malformed")]
    MalformedNodeTable,

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("The output directory is not empty: {0}")]
    OutputDirectoryNotEmpty(PathBuf),

    #[error("File name is not valid UTF-8: {0}")]
    NonUtf8FileName(PathBuf),
}
