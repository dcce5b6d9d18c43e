use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::types::{Credentials, UploadOutcome};

pub const SAVE_SSID_FIELD: &str = "ssid";
pub const SAVE_PASSWORD_FIELD: &str = "password";
pub const MAX_FORM_BODY: usize = 1024;

/// Connectivity-check URLs phones and laptops probe after joining an access point.
pub const CAPTIVE_PROBE_PATHS: [&str; 6] = [
    "/generate_204",
    "/gen_204",
    "/hotspot-detect.html",
    "/connecttest.txt",
    "/ncsi.txt",
    "/fwlink",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortalError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("form body too large")]
    BodyTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalRequest {
    Root,
    StatusJson,
    Save {
        ssid: Option<String>,
        password: Option<String>,
    },
    ResetPage,
    ConfirmReset,
}

impl PortalRequest {
    pub fn save_from_form(body: &str) -> Self {
        let mut fields = parse_form(body);
        Self::Save {
            ssid: fields.remove(SAVE_SSID_FIELD),
            password: fields.remove(SAVE_PASSWORD_FIELD),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Setup(SetupView),
    Status(StatusView),
    StatusJson(StatusView),
    Saved { network_name: String },
    ResetConfirm,
    ResetAccepted,
    Rejected(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalResponse {
    pub status: u16,
    pub page: Page,
}

impl PortalResponse {
    pub fn ok(page: Page) -> Self {
        Self { status: 200, page }
    }

    pub fn bad_request(err: &PortalError) -> Self {
        Self {
            status: 400,
            page: Page::Rejected(err.to_string()),
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            page: Page::Failed(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupView {
    #[serde(rename = "accessPoint")]
    pub access_point: String,
    pub pin: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub state: &'static str,
    pub pin: u32,
    pub hostname: Option<String>,
    #[serde(rename = "networkName")]
    pub network_name: String,
    #[serde(rename = "signalDbm")]
    pub signal_dbm: Option<i8>,
    #[serde(rename = "successfulUploads")]
    pub successful_uploads: u64,
    #[serde(rename = "lastUploadSucceeded")]
    pub last_upload_succeeded: bool,
    #[serde(rename = "lastOutcome")]
    pub last_outcome: Option<UploadOutcome>,
    #[serde(rename = "lastUploadAgeMs")]
    pub last_upload_age_ms: Option<u64>,
    #[serde(rename = "nextUploadInMs")]
    pub next_upload_in_ms: Option<u64>,
    #[serde(rename = "activeIntervalMs")]
    pub active_interval_ms: u64,
    #[serde(rename = "linkLosses")]
    pub link_losses: u32,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    pub build: String,
}

pub fn validate_credentials(
    ssid: Option<&str>,
    password: Option<&str>,
) -> Result<Credentials, PortalError> {
    let ssid = ssid.map(str::trim).unwrap_or_default();
    if ssid.is_empty() {
        return Err(PortalError::MissingField(SAVE_SSID_FIELD));
    }

    let password = password.unwrap_or_default();
    if password.is_empty() {
        return Err(PortalError::MissingField(SAVE_PASSWORD_FIELD));
    }

    Ok(Credentials::new(ssid, password))
}

/// Decodes an `application/x-www-form-urlencoded` body. Later duplicates win.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}
