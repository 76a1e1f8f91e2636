// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// SPDX-License-Identifier: MPL-2.0

//! Client for the content distribution service of the platform.
//!
//! Titles are published as their individual components: the title metadata (latest or a
//! specific version), the ticket (only present for free titles) and one blob per content.
//! The certificate chain is not served directly, it is reconstructed from the System Menu
//! ticket and metadata.

use crate::content_region::{Content, ContentRegion};
use crate::ticket::{Ticket, TicketError};
use crate::title::{Title, TitleError};
use crate::title_id::TitleId;
use crate::title_metadata::{TitleMetadata, TitleMetadataError};
use sha1::{Digest, Sha1};
use std::io::{self, Read};
use thiserror::Error;
use tracing::info;
use url::Url;

const WII_ENDPOINT: &str = "http://nus.cdn.shop.wii.com/ccs/download/";
const WII_U_ENDPOINT: &str = "http://ccs.cdn.wup.shop.nintendo.net/ccs/download/";

/// User agent of the system updater, some mirrors reject anything else.
const USER_AGENT: &str = "wii libnup/1.0";

/// The known SHA-1 hash of the reconstructed retail certificate chain, the chain never
/// changes so anything else means a broken download.
const CERTIFICATE_CHAIN_HASH: [u8; 20] = [
    0xac, 0xe0, 0xf1, 0x5d, 0x2a, 0x85, 0x1c, 0x38, 0x3f, 0xe4, 0x65, 0x7a, 0xfc, 0x38, 0x40,
    0xd6, 0xff, 0xe3, 0x0a, 0xd0,
];

/// Version of the System Menu metadata used as the certificate chain source.
const CERTIFICATE_SOURCE_METADATA_VERSION: u16 = 513;

/// A distribution service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NusEndpoint {
    /// The stock endpoint of the console.
    Wii,

    /// The stock endpoint of the successor console, serves the same files and is usually
    /// faster.
    WiiU,

    /// A custom mirror, given as an URL or a bare host name.
    Custom(String),
}

impl NusEndpoint {
    /// Get the base download URL of the endpoint, always ending with `/ccs/download/`.
    pub fn base_url(&self) -> Result<String, NusError> {
        match self {
            Self::Wii => Ok(String::from(WII_ENDPOINT)),
            Self::WiiU => Ok(String::from(WII_U_ENDPOINT)),

            Self::Custom(custom) => {
                // Accept both a full URL and a bare host name
                let parsed = Url::parse(custom)
                    .or_else(|_| Url::parse(&format!("http://{custom}")))
                    .map_err(|_| NusError::InvalidEndpoint(custom.clone()))?;

                let host = parsed
                    .host_str()
                    .ok_or_else(|| NusError::InvalidEndpoint(custom.clone()))?;

                Ok(format!("http://{host}/ccs/download/"))
            }
        }
    }

    /// URL of the title metadata of a title, latest or at a specific version.
    pub fn title_metadata_url(
        &self,
        title_id: &TitleId,
        version: Option<u16>,
    ) -> Result<String, NusError> {
        let mut url = format!("{}{:08x}{:08x}/tmd", self.base_url()?, title_id.higher_half(), title_id.lower_half());

        if let Some(version) = version {
            url.push_str(&format!(".{version}"));
        }

        Ok(url)
    }

    /// URL of the ticket of a title. Only free titles have one published.
    pub fn ticket_url(&self, title_id: &TitleId) -> Result<String, NusError> {
        Ok(format!(
            "{}{:08x}{:08x}/cetk",
            self.base_url()?,
            title_id.higher_half(),
            title_id.lower_half()
        ))
    }

    /// URL of a content blob of a title.
    pub fn content_url(&self, title_id: &TitleId, content_id: u32) -> Result<String, NusError> {
        Ok(format!(
            "{}{:08x}{:08x}/{content_id:08x}",
            self.base_url()?,
            title_id.higher_half(),
            title_id.lower_half()
        ))
    }
}

fn fetch(url: &str, mut progress: impl FnMut(u64, u64)) -> Result<Vec<u8>, NusError> {
    info!(url, "Downloading");

    let client = reqwest::blocking::Client::new();

    let mut response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()?;

    if !response.status().is_success() {
        return Err(NusError::NotFound(url.to_owned()));
    }

    let total_bytes = response.content_length().unwrap_or(0);

    let mut data = Vec::new();
    let mut chunk = [0; 64 * 1024];

    loop {
        let bytes_read = response.read(&mut chunk)?;

        if bytes_read == 0 {
            break;
        }

        data.extend_from_slice(&chunk[..bytes_read]);
        progress(data.len() as u64, total_bytes);
    }

    Ok(data)
}

/// Download the title metadata of a title, latest or at a specific version. The returned
/// bytes are the re-serialized metadata alone, without the certificates the service
/// appends.
pub fn download_title_metadata(
    title_id: &TitleId,
    version: Option<u16>,
    endpoint: &NusEndpoint,
) -> Result<Vec<u8>, NusError> {
    download_title_metadata_with_progress(title_id, version, endpoint, |_, _| {})
}

/// Like [download_title_metadata], reporting `(bytes_received, total_bytes)` to the
/// callback as the download advances.
pub fn download_title_metadata_with_progress(
    title_id: &TitleId,
    version: Option<u16>,
    endpoint: &NusEndpoint,
    progress: impl FnMut(u64, u64),
) -> Result<Vec<u8>, NusError> {
    let data = fetch(&endpoint.title_metadata_url(title_id, version)?, progress)?;

    Ok(TitleMetadata::from_bytes(&data)?.to_bytes()?)
}

/// Download the ticket of a free title. The returned bytes are the re-serialized ticket
/// alone, without the certificates the service appends.
pub fn download_ticket(title_id: &TitleId, endpoint: &NusEndpoint) -> Result<Vec<u8>, NusError> {
    download_ticket_with_progress(title_id, endpoint, |_, _| {})
}

/// Like [download_ticket], reporting `(bytes_received, total_bytes)` to the callback as
/// the download advances.
pub fn download_ticket_with_progress(
    title_id: &TitleId,
    endpoint: &NusEndpoint,
    progress: impl FnMut(u64, u64),
) -> Result<Vec<u8>, NusError> {
    let data = fetch(&endpoint.ticket_url(title_id)?, progress)?;

    Ok(Ticket::from_bytes(&data)?.to_bytes()?)
}

/// Download a single content blob of a title, still encrypted.
pub fn download_content(
    title_id: &TitleId,
    content_id: u32,
    endpoint: &NusEndpoint,
) -> Result<Vec<u8>, NusError> {
    download_content_with_progress(title_id, content_id, endpoint, |_, _| {})
}

/// Like [download_content], reporting `(bytes_received, total_bytes)` to the callback as
/// the download advances.
pub fn download_content_with_progress(
    title_id: &TitleId,
    content_id: u32,
    endpoint: &NusEndpoint,
    progress: impl FnMut(u64, u64),
) -> Result<Vec<u8>, NusError> {
    fetch(&endpoint.content_url(title_id, content_id)?, progress)
}

/// Download every content blob listed on the given title metadata, in record order.
pub fn download_contents(
    title_id: &TitleId,
    title_metadata: &TitleMetadata,
    endpoint: &NusEndpoint,
) -> Result<Vec<Vec<u8>>, NusError> {
    title_metadata
        .content_records
        .iter()
        .map(|record| download_content(title_id, record.id, endpoint))
        .collect()
}

/// Reconstruct the certificate chain from the System Menu ticket and metadata, the
/// service does not offer it as a standalone file.
pub fn download_certificate_chain(endpoint: &NusEndpoint) -> Result<Vec<u8>, NusError> {
    let system_menu = TitleId::SYSTEM_MENU;

    let metadata = fetch(
        &endpoint.title_metadata_url(
            &system_menu,
            Some(CERTIFICATE_SOURCE_METADATA_VERSION),
        )?,
        |_, _| {},
    )?;
    let ticket = fetch(&endpoint.ticket_url(&system_menu)?, |_, _| {})?;

    if ticket.len() < 0x2A4 + 768 || metadata.len() < 0x328 + 768 {
        return Err(NusError::MalformedResponse(
            "The certificate chain sources are shorter than expected",
        ));
    }

    // The CA certificate trails the ticket one inside cetk, the CP certificate trails
    // the metadata
    let mut chain = Vec::new();
    chain.extend_from_slice(&ticket[0x2A4 + 768..]);
    chain.extend_from_slice(&metadata[0x328..0x328 + 768]);
    chain.extend_from_slice(&ticket[0x2A4..0x2A4 + 768]);

    if <[u8; 20]>::from(Sha1::digest(&chain)) != CERTIFICATE_CHAIN_HASH {
        return Err(NusError::MalformedResponse(
            "The reconstructed certificate chain does not match its known hash",
        ));
    }

    Ok(chain)
}

/// Download every component of a title and load them into a [Title].
pub fn download_title(
    title_id: &TitleId,
    version: Option<u16>,
    endpoint: &NusEndpoint,
) -> Result<Title, NusError> {
    let certificate_chain = crate::CertificateChain::from_bytes(&download_certificate_chain(
        endpoint,
    )?)
    .map_err(TitleError::from)?;

    let ticket = Ticket::from_bytes(&download_ticket(title_id, endpoint)?)?;
    let title_metadata =
        TitleMetadata::from_bytes(&download_title_metadata(title_id, version, endpoint)?)?;

    let contents = download_contents(title_id, &title_metadata, endpoint)?;

    let content_region = ContentRegion {
        contents: title_metadata
            .content_records
            .iter()
            .zip(contents)
            .map(|(record, data)| Content {
                record: record.clone(),
                data,
            })
            .collect(),
    };

    let title = Title {
        certificate_chain,
        certificate_revocation_list_data: Vec::new(),
        ticket,
        title_metadata,
        content_region,
        footer_data: Vec::new(),
    };

    if title.ticket.title_id != title.title_metadata.title_id {
        return Err(NusError::TitleError(TitleError::TitleIdMismatch {
            ticket: title.ticket.title_id,
            title_metadata: title.title_metadata.title_id,
        }));
    }

    Ok(title)
}

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum NusError {
    #[error("An IO error has occurred: {0}")]
    IoError(#[from] io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("The requested file does not exist on the distribution service: {0}")]
    NotFound(String),

    #[error("The given endpoint override is not a valid URL or host: {0}")]
    InvalidEndpoint(String),

    #[error("Unexpected response from the distribution service: {0}")]
    MalformedResponse(&'static str),

    #[error("Ticket error: {0}")]
    TicketError(#[from] TicketError),

    #[error("Title metadata error: {0}")]
    TitleMetadataError(#[from] TitleMetadataError),

    #[error("Title error: {0}")]
    TitleError(#[from] TitleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_endpoint_urls() {
        let title_id = TitleId::SYSTEM_MENU;

        assert_eq!(
            NusEndpoint::Wii
                .title_metadata_url(&title_id, None)
                .unwrap(),
            "http://nus.cdn.shop.wii.com/ccs/download/0000000100000002/tmd"
        );

        assert_eq!(
            NusEndpoint::Wii
                .title_metadata_url(&title_id, Some(513))
                .unwrap(),
            "http://nus.cdn.shop.wii.com/ccs/download/0000000100000002/tmd.513"
        );

        assert_eq!(
            NusEndpoint::WiiU.ticket_url(&title_id).unwrap(),
            "http://ccs.cdn.wup.shop.nintendo.net/ccs/download/0000000100000002/cetk"
        );
    }

    #[test]
    fn content_ids_are_eight_hex_digits() {
        assert_eq!(
            NusEndpoint::Wii
                .content_url(&TitleId::SYSTEM_MENU, 150)
                .unwrap(),
            "http://nus.cdn.shop.wii.com/ccs/download/0000000100000002/00000096"
        );
    }

    #[test]
    fn custom_endpoint_accepts_bare_hosts() {
        let endpoint = NusEndpoint::Custom(String::from("nus.example.org"));

        assert_eq!(
            endpoint.base_url().unwrap(),
            "http://nus.example.org/ccs/download/"
        );
    }

    #[test]
    fn custom_endpoint_accepts_full_urls() {
        let endpoint = NusEndpoint::Custom(String::from("https://nus.example.org/some/path"));

        assert_eq!(
            endpoint.base_url().unwrap(),
            "http://nus.example.org/ccs/download/"
        );
    }

    #[test]
    fn custom_endpoint_rejects_garbage() {
        let endpoint = NusEndpoint::Custom(String::from("not a valid host"));

        assert!(matches!(
            endpoint.base_url(),
            Err(NusError::InvalidEndpoint(_))
        ));
    }
}
