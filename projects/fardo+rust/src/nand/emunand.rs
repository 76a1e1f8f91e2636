// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Emulated on-disk rendition of the internal storage of the console.
//!
//! Installing a title materializes the same files the system installer would create:
//! the ticket, the title metadata, the decrypted contents and the bookkeeping files under
//! `sys/` and `shared1/`. Writes are not atomic, callers that need atomicity should stage
//! into a temporary directory and rename.

use crate::content_region::{SharedContentMap, SharedContentMapError};
use crate::nand::sys::{UidSys, UidSysError};
use crate::title::{Title, TitleError};
use crate::title_id::TitleId;
use crate::title_metadata::ContentKind;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// An emulated storage root and the well-known directories inside it.
#[derive(Debug, Clone)]
pub struct EmuNand {
    /// The root directory of the emulated storage.
    pub root: PathBuf,

    meta_dir: PathBuf,
    shared1_dir: PathBuf,
    sys_dir: PathBuf,
    ticket_dir: PathBuf,
    title_dir: PathBuf,
}

impl EmuNand {
    /// Open (and create if needed) an emulated storage layout under the given root.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, EmuNandError> {
        let root = root.as_ref().to_path_buf();

        for directory in [
            "import", "meta", "shared1", "shared2", "sys", "ticket", "title", "tmp", "wfs",
        ] {
            fs::create_dir_all(root.join(directory))?;
        }

        Ok(Self {
            meta_dir: root.join("meta"),
            shared1_dir: root.join("shared1"),
            sys_dir: root.join("sys"),
            ticket_dir: root.join("ticket"),
            title_dir: root.join("title"),
            root,
        })
    }

    fn title_id_directories(title_id: &TitleId) -> (String, String) {
        (
            format!("{:08x}", title_id.higher_half()),
            format!("{:08x}", title_id.lower_half()),
        )
    }

    /// Install a title, mimicking a real installation done by the system.
    ///
    /// This creates the bookkeeping files (`uid.sys`, `cert.sys`, `content.map`) when they
    /// do not exist yet, which is enough for common software players to pick the title up.
    pub fn install_title(&self, title: &Title, skip_hash: bool) -> Result<(), EmuNandError> {
        let title_id = title.title_metadata.title_id;
        let (tid_upper, tid_lower) = Self::title_id_directories(&title_id);

        info!(
            "Installing {} ({title_id})",
            title_id.display_wii_platform()
        );

        // Tickets are installed as <tid_lower>.tik in /ticket/<tid_upper>/
        let ticket_dir = self.ticket_dir.join(&tid_upper);
        fs::create_dir_all(&ticket_dir)?;
        fs::write(
            ticket_dir.join(format!("{tid_lower}.tik")),
            title.ticket.to_bytes().map_err(TitleError::from)?,
        )?;

        // The title metadata and the normal contents land in
        // /title/<tid_upper>/<tid_lower>/content/, clearing whatever an older version of
        // the title left behind
        let title_dir = self.title_dir.join(&tid_upper).join(&tid_lower);
        let content_dir = title_dir.join("content");

        if content_dir.exists() {
            fs::remove_dir_all(&content_dir)?;
        }

        fs::create_dir_all(&content_dir)?;
        fs::write(
            content_dir.join("title.tmd"),
            title.title_metadata.to_bytes().map_err(TitleError::from)?,
        )?;

        for record in &title.title_metadata.content_records {
            if record.kind == ContentKind::Normal {
                fs::write(
                    content_dir.join(format!("{:08x}.app", record.id)),
                    title.content_with_index(record.index, skip_hash)?,
                )?;
            }
        }

        // Empty directory used for the save data of the title
        fs::create_dir_all(title_dir.join("data"))?;

        self.install_shared_contents(title, skip_hash)?;

        // The footer is installed as title.met in /meta/<tid_upper>/<tid_lower>/
        if !title.footer_data.is_empty() {
            let meta_dir = self.meta_dir.join(&tid_upper).join(&tid_lower);
            fs::create_dir_all(&meta_dir)?;
            fs::write(meta_dir.join("title.met"), &title.footer_data)?;
        }

        let uid_sys_path = self.sys_dir.join("uid.sys");

        let mut uid_sys = if uid_sys_path.exists() {
            UidSys::from_bytes(&fs::read(&uid_sys_path)?)?
        } else {
            UidSys::create()
        };

        uid_sys.add(title_id);
        fs::write(&uid_sys_path, uid_sys.to_bytes()?)?;

        let cert_sys_path = self.sys_dir.join("cert.sys");

        if !cert_sys_path.exists() {
            fs::write(
                &cert_sys_path,
                title
                    .certificate_chain
                    .to_bytes()
                    .map_err(TitleError::from)?,
            )?;
        }

        Ok(())
    }

    fn install_shared_contents(&self, title: &Title, skip_hash: bool) -> Result<(), EmuNandError> {
        let content_map_path = self.shared1_dir.join("content.map");

        let mut content_map = if content_map_path.exists() {
            SharedContentMap::from_bytes(&fs::read(&content_map_path)?)?
        } else {
            SharedContentMap::default()
        };

        for record in &title.title_metadata.content_records {
            if record.kind != ContentKind::Shared || content_map.id_of_hash(&record.hash).is_some()
            {
                continue;
            }

            let id = content_map.add(record.hash);

            fs::write(
                self.shared1_dir.join(format!("{id:08x}.app")),
                title.content_with_index(record.index, skip_hash)?,
            )?;
        }

        fs::write(&content_map_path, content_map.to_bytes()?)?;

        Ok(())
    }

    /// Uninstall the title with the given title ID. Shared contents stay untouched, and a
    /// `data/` directory with save data in it is preserved.
    pub fn uninstall_title(&self, title_id: &TitleId) -> Result<(), EmuNandError> {
        let (tid_upper, tid_lower) = Self::title_id_directories(title_id);

        let title_dir = self.title_dir.join(&tid_upper).join(&tid_lower);

        if !title_dir.exists() {
            return Err(EmuNandError::TitleNotInstalled(*title_id));
        }

        info!(
            "Uninstalling {} ({title_id})",
            title_id.display_wii_platform()
        );

        let ticket_path = self
            .ticket_dir
            .join(&tid_upper)
            .join(format!("{tid_lower}.tik"));

        if ticket_path.exists() {
            fs::remove_file(ticket_path)?;
        }

        let data_dir = title_dir.join("data");

        let data_is_empty = !data_dir.exists() || fs::read_dir(&data_dir)?.next().is_none();

        if data_is_empty {
            fs::remove_dir_all(&title_dir)?;
        } else {
            // There is save data, only drop the contents
            fs::remove_dir_all(title_dir.join("content"))?;
        }

        let meta_dir = self.meta_dir.join(&tid_upper).join(&tid_lower);

        if meta_dir.join("title.met").exists() {
            fs::remove_dir_all(meta_dir)?;
        }

        Ok(())
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum EmuNandError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("Title error: {0}")]
    TitleError(#[from] TitleError),

    #[error("Launch registry error: {0}")]
    UidSysError(#[from] UidSysError),

    #[error("Shared contents map error: {0}")]
    SharedContentMapError(#[from] SharedContentMapError),

    #[error("No title with the ID {0} is installed")]
    TitleNotInstalled(TitleId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate_chain::{
        Certificate, CertificateChain, CertificateKey, CertificateKeyValue,
    };
    use crate::content_region::ContentRegion;
    use crate::signed_blob_header::{SignedBlobHeader, SignedBlobHeaderSignature};
    use crate::ticket::{
        Ticket, TicketLicense, TicketLimitEntry, TicketSystemAppContentAccessFlags,
    };
    use crate::title_metadata::{AccessRights, Region, TitleMetadata};

    fn dummy_certificate(issuer: &str, child_name: &str) -> Certificate {
        Certificate {
            signed_blob_header: SignedBlobHeader {
                signature: SignedBlobHeaderSignature::Rsa2048Sha1(Box::new([0x44; 256])),
                issuer: String::from(issuer),
            },
            child_name: String::from(child_name),
            key: CertificateKey {
                id: 0,
                value: CertificateKeyValue::Rsa2048(Box::new([0x55; 260])),
            },
        }
    }

    fn dummy_title() -> Title {
        let title_id = TitleId::new_with_halfs(0x00010001, 0x48414741);

        let mut title = Title {
            certificate_chain: CertificateChain {
                certificate_authority: dummy_certificate("Root", "CA00000001"),
                metadata_signer: dummy_certificate("Root-CA00000001", "CP00000004"),
                ticket_signer: dummy_certificate("Root-CA00000001", "XS00000003"),
            },
            certificate_revocation_list_data: Vec::new(),
            ticket: Ticket {
                signed_blob_header: SignedBlobHeader {
                    signature: SignedBlobHeaderSignature::Rsa2048Sha1(Box::new([0x11; 256])),
                    issuer: String::from("Root-CA00000001-XS00000003"),
                },
                ecc_public_key: [0; 60],
                certificate_authority_certificate_revocation_list_version: 0,
                signer_certificate_revocation_list_version: 0,
                encrypted_title_key: [0x22; 16],
                ticket_id: 0,
                console_id: None,
                title_id,
                system_app_content_access: TicketSystemAppContentAccessFlags::from_bits_retain(0),
                title_version: 0,
                permitted_title_id: 0,
                permitted_title_mask: 0,
                license: TicketLicense::Normal,
                common_key_index: 0,
                signature_scratch: [0; 48],
                content_access_permissions: [0; 64],
                limit_entries: [TicketLimitEntry::default(); 8],
            },
            title_metadata: TitleMetadata {
                signed_blob_header: SignedBlobHeader {
                    signature: SignedBlobHeaderSignature::Rsa2048Sha1(Box::new([0x33; 256])),
                    issuer: String::from("Root-CA00000001-CP00000004"),
                },
                certificate_authority_certificate_revocation_list_version: 0,
                signer_certificate_revocation_list_version: 0,
                is_vwii: false,
                system_ios_title_id: Some(TitleId::new_with_halfs(0x00000001, 58)),
                title_id,
                title_type: 1,
                group_id: 0,
                region: Region::USA,
                ratings: [0; 16],
                reserved_0: [0; 12],
                ipc_mask: [0; 12],
                reserved_1: [0; 18],
                access_rights: AccessRights::empty(),
                title_version: 0,
                boot_content_index: 0,
                minor_version: 0,
                content_records: Vec::new(),
            },
            content_region: ContentRegion::default(),
            footer_data: Vec::new(),
        };

        title
            .add_content(&[0xA0; 100], 0, ContentKind::Normal)
            .unwrap();
        title
            .add_content(&[0xA1; 200], 1, ContentKind::Shared)
            .unwrap();

        title
    }

    #[test]
    fn layout_is_created() {
        let root = tempfile::tempdir().unwrap();
        EmuNand::new(root.path()).unwrap();

        for directory in [
            "import", "meta", "shared1", "shared2", "sys", "ticket", "title", "tmp", "wfs",
        ] {
            assert!(root.path().join(directory).is_dir());
        }
    }

    #[test]
    fn install_materializes_the_title() {
        let root = tempfile::tempdir().unwrap();
        let emunand = EmuNand::new(root.path()).unwrap();

        let title = dummy_title();
        emunand.install_title(&title, false).unwrap();

        let ticket_path = root.path().join("ticket/00010001/48414741.tik");
        assert!(ticket_path.is_file());

        let content_dir = root.path().join("title/00010001/48414741/content");
        assert!(content_dir.join("title.tmd").is_file());

        // Only the normal content lands next to the metadata, decrypted
        assert_eq!(
            fs::read(content_dir.join("00000000.app")).unwrap(),
            vec![0xA0; 100]
        );
        assert!(!content_dir.join("00000001.app").exists());

        assert!(root.path().join("title/00010001/48414741/data").is_dir());

        // The shared content goes through the map
        let map = SharedContentMap::from_bytes(
            &fs::read(root.path().join("shared1/content.map")).unwrap(),
        )
        .unwrap();
        assert_eq!(map.records.len(), 1);
        assert_eq!(
            fs::read(root.path().join("shared1/00000000.app")).unwrap(),
            vec![0xA1; 200]
        );

        // Bookkeeping files are seeded
        let uid_sys =
            UidSys::from_bytes(&fs::read(root.path().join("sys/uid.sys")).unwrap()).unwrap();
        assert_eq!(uid_sys.entries.len(), 2);
        assert_eq!(uid_sys.entries[1].title_id, title.title_metadata.title_id);

        assert!(root.path().join("sys/cert.sys").is_file());
    }

    #[test]
    fn install_twice_reuses_shared_contents() {
        let root = tempfile::tempdir().unwrap();
        let emunand = EmuNand::new(root.path()).unwrap();

        let title = dummy_title();
        emunand.install_title(&title, false).unwrap();
        emunand.install_title(&title, false).unwrap();

        let map = SharedContentMap::from_bytes(
            &fs::read(root.path().join("shared1/content.map")).unwrap(),
        )
        .unwrap();
        assert_eq!(map.records.len(), 1);

        let uid_sys =
            UidSys::from_bytes(&fs::read(root.path().join("sys/uid.sys")).unwrap()).unwrap();
        assert_eq!(uid_sys.entries.len(), 2);
    }

    #[test]
    fn uninstall_preserves_shared_contents_and_save_data() {
        let root = tempfile::tempdir().unwrap();
        let emunand = EmuNand::new(root.path()).unwrap();

        let title = dummy_title();
        emunand.install_title(&title, false).unwrap();

        // Simulate save data
        let data_dir = root.path().join("title/00010001/48414741/data");
        fs::write(data_dir.join("save.bin"), [1, 2, 3]).unwrap();

        emunand
            .uninstall_title(&title.title_metadata.title_id)
            .unwrap();

        assert!(!root.path().join("ticket/00010001/48414741.tik").exists());
        assert!(!root.path().join("title/00010001/48414741/content").exists());

        // Save data and shared contents survive
        assert!(data_dir.join("save.bin").is_file());
        assert!(root.path().join("shared1/00000000.app").is_file());
    }

    #[test]
    fn uninstall_removes_everything_without_save_data() {
        let root = tempfile::tempdir().unwrap();
        let emunand = EmuNand::new(root.path()).unwrap();

        let title = dummy_title();
        emunand.install_title(&title, false).unwrap();

        emunand
            .uninstall_title(&title.title_metadata.title_id)
            .unwrap();

        assert!(!root.path().join("title/00010001/48414741").exists());
    }

    #[test]
    fn uninstall_unknown_title() {
        let root = tempfile::tempdir().unwrap();
        let emunand = EmuNand::new(root.path()).unwrap();

        assert!(matches!(
            emunand.uninstall_title(&TitleId::BOOT2),
            Err(EmuNandError::TitleNotInstalled(_))
        ));
    }
}
