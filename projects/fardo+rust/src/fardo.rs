// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Crate to read, author and re-sign the installable title packages used on the
//! [Nintendo](https://en.wikipedia.org/wiki/Nintendo) [Wii](https://en.wikipedia.org/wiki/Wii) console,
//! plus the operations around them: downloading title components from the
//! [NUS (Nintendo Update Server)](https://wiibrew.org/wiki/NUS), installing titles into an
//! emulated storage layout, patching IOS system modules and handling the U8 archive and LZ
//! compression formats found inside content blobs.

pub mod banner;
pub mod certificate_chain;
pub mod common_key;
pub mod content_region;
pub mod crypto;
pub mod ios_patcher;
pub mod lz77;
pub mod nand;
pub mod nus;
pub mod signed_blob_header;
pub mod ticket;
pub mod title;
pub mod title_id;
pub mod title_metadata;
pub mod title_version;
pub mod u8_archive;
pub mod wad;

pub use certificate_chain::{Certificate, CertificateChain};
pub use common_key::CommonKeyKind;
pub use content_region::{Content, ContentRegion, SharedContentMap};
pub use ios_patcher::IosPatcher;
pub use lz77::CompressionLevel;
pub use nand::emunand::EmuNand;
pub use nus::NusEndpoint;
pub use ticket::Ticket;
pub use title::Title;
pub use title_id::{TitleId, TitleKind};
pub use title_metadata::{ContentKind, ContentRecord, TitleMetadata};
pub use title_version::TitleVersion;
pub use u8_archive::U8Archive;
pub use wad::Wad;
