//! Authenticated uploads to a Blossom-style hash-addressed media server.
//!
//! Each payload is addressed by its SHA-256 hash. Authorization is a
//! short-lived signed event of the dedicated upload kind, carried base64
//! encoded in the `Authorization` header of a single `PUT` request.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::event::{Event, EventTemplate, Tag, KIND_UPLOAD_AUTH};
use crate::identity::Signer;

/// Authorization header scheme for signed upload tokens.
pub const AUTH_SCHEME: &str = "Nostr";

/// Lifetime of an upload authorization token.
const AUTH_TTL_SECS: u64 = 300;

/// Distinct upload failure causes. None of these are retried.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The local file or resource was absent before any network activity.
    #[error("source payload missing: {0}")]
    MissingSource(String),
    /// Network failure or a non-success HTTP status (the server's error text
    /// is carried along).
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered 2xx but the body matched no accepted shape.
    #[error("unexpected response: {0}")]
    Response(String),
}

/// Per-payload outcome of an upload attempt.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    /// The reference the payload was loaded from, as the caller spelled it.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Hex-encoded SHA-256 hash of a payload; doubles as its storage address.
pub fn content_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Build and sign the short-lived authorization event binding the uploader's
/// identity to one content hash.
pub fn build_auth_event(signer: &dyn Signer, hash: &str, now: u64) -> anyhow::Result<Event> {
    let template = EventTemplate {
        kind: KIND_UPLOAD_AUTH,
        created_at: now,
        tags: vec![
            Tag::new(["t", "upload"]),
            Tag::new(["x", hash]),
            Tag::new(["expiration", &(now + AUTH_TTL_SECS).to_string()]),
        ],
        content: "upload".into(),
    };
    signer.sign(&template)
}

/// Encode a signed authorization event into an `Authorization` header value.
pub fn auth_header(ev: &Event) -> anyhow::Result<String> {
    let json = serde_json::to_string(ev)?;
    Ok(format!("{} {}", AUTH_SCHEME, B64.encode(json)))
}

/// Upload one payload to `host`, returning the URL the server stored it at.
pub async fn upload_blob(
    client: &reqwest::Client,
    signer: &dyn Signer,
    host: &str,
    payload: &[u8],
    content_type: &str,
) -> Result<String, UploadError> {
    let hash = content_hash(payload);
    let auth = build_auth_event(signer, &hash, unix_now())
        .and_then(|ev| auth_header(&ev))
        .map_err(|e| UploadError::Transport(format!("authorization: {e}")))?;

    let url = format!("{}/{}", host.trim_end_matches('/'), hash);
    let resp = client
        .put(&url)
        .header(AUTHORIZATION, auth)
        .header(CONTENT_TYPE, content_type)
        .header(ACCEPT, "application/json")
        .body(payload.to_vec())
        .send()
        .await
        .map_err(|e| UploadError::Transport(e.to_string()))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| UploadError::Transport(e.to_string()))?;
    if !status.is_success() {
        return Err(UploadError::Transport(format!(
            "HTTP {}: {}",
            status.as_u16(),
            text
        )));
    }
    parse_upload_response(&text)
}

/// Accepts `{"status":"success","url":...}` and the bare `{"url":...}` shape;
/// anything else is unparsable.
fn parse_upload_response(body: &str) -> Result<String, UploadError> {
    let val: Value =
        serde_json::from_str(body).map_err(|_| UploadError::Response(body.to_string()))?;
    let url = val.get("url").and_then(|v| v.as_str());
    match (val.get("status").and_then(|v| v.as_str()), url) {
        (None, Some(url)) | (Some("success"), Some(url)) => Ok(url.to_string()),
        _ => Err(UploadError::Response(body.to_string())),
    }
}

/// Read a file and upload it, guessing the content type from its extension.
pub async fn upload_file(
    client: &reqwest::Client,
    signer: &dyn Signer,
    host: &str,
    path: &str,
) -> UploadResult {
    let payload = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return UploadResult {
                source: path.to_string(),
                url: None,
                success: false,
                error: Some(UploadError::MissingSource(format!("{path}: {e}")).to_string()),
            }
        }
    };
    let content_type = guess_content_type(path);
    match upload_blob(client, signer, host, &payload, &content_type).await {
        Ok(url) => UploadResult {
            source: path.to_string(),
            url: Some(url),
            success: true,
            error: None,
        },
        Err(e) => {
            debug!(source = %path, error = %e, "upload failed");
            UploadResult {
                source: path.to_string(),
                url: None,
                success: false,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Upload several files one at a time, in the given order.
///
/// Sequential on purpose so a single destination is not hammered with
/// parallel uploads. Failed items stay in the result list; only successes
/// make it into the mapping used for content rewriting.
pub async fn upload_all(
    client: &reqwest::Client,
    signer: &dyn Signer,
    host: &str,
    paths: &[String],
) -> Vec<UploadResult> {
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        results.push(upload_file(client, signer, host, path).await);
    }
    results
}

/// Source-to-URL mapping of the successful uploads only.
pub fn successful_mappings(results: &[UploadResult]) -> HashMap<String, String> {
    results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.url.clone().map(|url| (r.source.clone(), url)))
        .collect()
}

fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(Path::new(path))
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
