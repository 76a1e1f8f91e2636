// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Byte patches for the privileged system modules ("IOS") of the console.
//!
//! The patches target the ES module of an IOS title (located by scanning its decrypted
//! contents for the `ES:` log prefix) and re-enable behaviors later system versions
//! removed: accepting forged signatures, calling `ES_Identify`, raw storage access and
//! installing older title versions. An experimental patch on the DIP module skips the
//! disc drive inquiry on boot.

use crate::title::{Title, TitleError};
use crate::title_id::TitleKind;
use thiserror::Error;
use tracing::info;

/// Log prefix of the ES module, used to locate it.
const ES_MODULE_MARKER: &[u8] = b"ES:";

/// Log prefix of the DIP module, used to locate it.
const DIP_MODULE_MARKER: &[u8] = b"DIP:";

fn find_subsequence(data: &[u8], pattern: &[u8]) -> Option<usize> {
    data.windows(pattern.len())
        .position(|window| window == pattern)
}

/// Patcher over an IOS title loaded into a [Title].
#[derive(Debug)]
pub struct IosPatcher {
    title: Title,
    es_module_index: u16,
    dip_module_index: Option<u16>,
}

impl IosPatcher {
    /// Take over an IOS title and locate the content its ES module resides in.
    pub fn new(title: Title) -> Result<Self, IosPatcherError> {
        let title_id = title.title_metadata.title_id;

        // IOS titles live on the system half, anything below IOS3 is boot2 or the System
        // Menu and carries no ES module
        if title_id.kind() != TitleKind::System || title_id.lower_half() <= 2 {
            return Err(IosPatcherError::NotAnIos(title_id.to_string()));
        }

        let mut es_module_index = None;

        for record in &title.title_metadata.content_records {
            let content = title.content_with_index(record.index, false)?;

            if find_subsequence(&content, ES_MODULE_MARKER).is_some() {
                es_module_index = Some(record.index);
                break;
            }
        }

        let es_module_index = es_module_index.ok_or(IosPatcherError::EsModuleNotFound)?;

        Ok(Self {
            title,
            es_module_index,
            dip_module_index: None,
        })
    }

    /// Get back the patched title.
    pub fn into_title(self) -> Title {
        self.title
    }

    /// Apply every stable patch: forged signatures, `ES_Identify`, raw storage access and
    /// version downgrading. Returns the number of patches that were applied.
    pub fn patch_all(&mut self) -> Result<u32, IosPatcherError> {
        let mut patch_count = 0;

        patch_count += self.patch_fakesigning()?;
        patch_count += self.patch_es_identify()?;
        patch_count += self.patch_nand_access()?;
        patch_count += self.patch_version_downgrading()?;

        Ok(patch_count)
    }

    fn apply_patches(
        &mut self,
        module_index: u16,
        patches: &[(&[u8], usize, &[u8])],
    ) -> Result<u32, IosPatcherError> {
        let mut content = self.title.content_with_index(module_index, false)?;
        let mut patch_count = 0;

        for (sequence, patch_offset, replacement) in patches {
            if let Some(start_offset) = find_subsequence(&content, sequence) {
                let target = start_offset + patch_offset;
                content[target..target + replacement.len()].copy_from_slice(replacement);

                patch_count += 1;
            }
        }

        self.title.set_content(&content, module_index, None, None)?;

        info!(module_index, patch_count, "Applied module patches");

        Ok(patch_count)
    }

    /// Patch the signature check of the ES module so it accepts forged ("fakesigned")
    /// tickets and title metadata again.
    pub fn patch_fakesigning(&mut self) -> Result<u32, IosPatcherError> {
        self.apply_patches(
            self.es_module_index,
            &[
                (&[0x20, 0x07, 0x23, 0xA2], 1, &[0x00]),
                (&[0x20, 0x07, 0x4B, 0x0B], 1, &[0x00]),
            ],
        )
    }

    /// Patch the ability to call `ES_Identify` back into the ES module.
    pub fn patch_es_identify(&mut self) -> Result<u32, IosPatcherError> {
        self.apply_patches(
            self.es_module_index,
            &[(&[0x28, 0x03, 0xD1, 0x23], 2, &[0x00, 0x00])],
        )
    }

    /// Patch direct access to the internal storage device back into the ES module.
    pub fn patch_nand_access(&mut self) -> Result<u32, IosPatcherError> {
        self.apply_patches(
            self.es_module_index,
            &[(&[0x42, 0x8B, 0xD0, 0x01, 0x25, 0x66], 2, &[0xE0])],
        )
    }

    /// Patch the ability to install older versions over installed titles into the ES
    /// module.
    pub fn patch_version_downgrading(&mut self) -> Result<u32, IosPatcherError> {
        self.apply_patches(
            self.es_module_index,
            &[(&[0xD2, 0x01, 0x4E, 0x56], 0, &[0xE0])],
        )
    }

    /// Patch out the disc drive inquiry of the DIP module, letting the IOS boot without a
    /// drive attached. Experimental, known to misbehave on some consoles.
    pub fn patch_drive_inquiry(&mut self) -> Result<u32, IosPatcherError> {
        if self.dip_module_index.is_none() {
            for record in &self.title.title_metadata.content_records {
                let content = self.title.content_with_index(record.index, false)?;

                if find_subsequence(&content, DIP_MODULE_MARKER).is_some() {
                    self.dip_module_index = Some(record.index);
                    break;
                }
            }
        }

        let dip_module_index = self
            .dip_module_index
            .ok_or(IosPatcherError::DipModuleNotFound)?;

        self.apply_patches(
            dip_module_index,
            &[(
                &[0x49, 0x4C, 0x23, 0x90, 0x68, 0x0A],
                0,
                &[0x20, 0x00, 0xE5, 0x38],
            )],
        )
    }
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum IosPatcherError {
    #[error("The title {0} does not contain an IOS")]
    NotAnIos(String),

    #[error("No content contains the ES module, this does not look like an intact IOS")]
    EsModuleNotFound,

    #[error("No content contains the DIP module, this does not look like an intact IOS")]
    DipModuleNotFound,

    #[error("Title error: {0}")]
    TitleError(#[from] TitleError),
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
    use crate::title_id::TitleId;
    use crate::title_metadata::{AccessRights, ContentKind, Region, TitleMetadata};

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

    fn dummy_ios(title_id: TitleId, es_content: &[u8]) -> Title {
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
                system_ios_title_id: None,
                title_id,
                title_type: 1,
                group_id: 0,
                region: Region::RegionFree,
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

        title.add_content(&[0; 64], 0, ContentKind::Normal).unwrap();
        title.add_content(es_content, 1, ContentKind::Normal).unwrap();

        title
    }

    fn es_module_with_sequences() -> Vec<u8> {
        let mut content = vec![0xFF; 32];
        content.extend_from_slice(b"ES:");
        content.extend_from_slice(&[0x20, 0x07, 0x23, 0xA2]);
        content.extend_from_slice(&[0x28, 0x03, 0xD1, 0x23]);
        content.extend_from_slice(&[0xD2, 0x01, 0x4E, 0x56]);
        content.extend_from_slice(&[0xFF; 16]);

        content
    }

    #[test]
    fn es_module_is_located() {
        let title = dummy_ios(
            TitleId::new_with_halfs(0x00000001, 58),
            &es_module_with_sequences(),
        );

        let patcher = IosPatcher::new(title).unwrap();

        assert_eq!(patcher.es_module_index, 1);
    }

    #[test]
    fn fakesigning_patch_is_applied() {
        let title = dummy_ios(
            TitleId::new_with_halfs(0x00000001, 58),
            &es_module_with_sequences(),
        );

        let mut patcher = IosPatcher::new(title).unwrap();

        assert_eq!(patcher.patch_fakesigning().unwrap(), 1);

        let title = patcher.into_title();
        let content = title.content_with_index(1, false).unwrap();

        assert_eq!(&content[35..39], &[0x20, 0x00, 0x23, 0xA2]);
    }

    #[test]
    fn patch_all_counts_every_applied_patch() {
        let title = dummy_ios(
            TitleId::new_with_halfs(0x00000001, 58),
            &es_module_with_sequences(),
        );

        let mut patcher = IosPatcher::new(title).unwrap();

        // Fakesigning, ES_Identify and version downgrading sequences are present, the
        // storage access one is not
        assert_eq!(patcher.patch_all().unwrap(), 3);
    }

    #[test]
    fn non_ios_titles_are_rejected() {
        let title = dummy_ios(
            TitleId::new_with_halfs(0x00010001, 0x48414741),
            &es_module_with_sequences(),
        );

        assert!(matches!(
            IosPatcher::new(title),
            Err(IosPatcherError::NotAnIos(_))
        ));
    }

    #[test]
    fn intact_es_module_is_required() {
        let title = dummy_ios(TitleId::new_with_halfs(0x00000001, 58), &[0xFF; 64]);

        assert!(matches!(
            IosPatcher::new(title),
            Err(IosPatcherError::EsModuleNotFound)
        ));
    }

    #[test]
    fn missing_dip_module_is_reported() {
        let title = dummy_ios(
            TitleId::new_with_halfs(0x00000001, 58),
            &es_module_with_sequences(),
        );

        let mut patcher = IosPatcher::new(title).unwrap();

        assert!(matches!(
            patcher.patch_drive_inquiry(),
            Err(IosPatcherError::DipModuleNotFound)
        ));
    }
}
