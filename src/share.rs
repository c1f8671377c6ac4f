//! Self-contained share links that carry the whole message in the URL.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Share data is not valid base64")]
    Encoding,

    #[error("Share data is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Share data is not a valid message: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Message fields embedded in a share link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePayload {
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub breaker_name: Option<String>,
    #[serde(default)]
    pub duration_text: Option<String>,
    pub tone: String,
    pub message_text: String,
}

pub fn encode_share_url(base_url: &str, payload: &SharePayload) -> Result<String, ShareError> {
    let json = serde_json::to_vec(payload)?;
    Ok(format!(
        "{}/read?d={}",
        base_url.trim_end_matches('/'),
        URL_SAFE_NO_PAD.encode(json)
    ))
}

/// Decode the `d` query value of a share link.
///
/// Older links used the padded standard alphabet; a `+` in those arrives as a
/// space when the query string was not escaped.
pub fn decode_share_payload(data: &str) -> Result<SharePayload, ShareError> {
    let data = data.trim();
    let bytes = match URL_SAFE_NO_PAD.decode(data) {
        Ok(bytes) => bytes,
        Err(_) => STANDARD
            .decode(data.replace(' ', "+"))
            .map_err(|_| ShareError::Encoding)?,
    };
    let json = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&json)?)
}
