//! Media Resolver - turns pasted or picked images into stable references.
//!
//! Resolution is two network legs against the storage collaborator: write the
//! bytes under a fresh key, then ask for a retrieval address. Inline payloads
//! (data URIs) are decoded synchronously before either leg runs.
//!
//! Several resolutions may be in flight at once. Each is keyed by its own
//! [`UploadToken`] and they may finish in any order.

use crate::error::UploadError;
use crate::storage::StorageService;
use clipsync_db::MediaRef;
use data_encoding::BASE64;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use ulid::{Generator, Ulid};

/// Identifies one pending upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadToken(Ulid);

impl UploadToken {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UploadToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A media payload as it arrives from the input surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaPayload {
    /// Raw bytes, e.g. from a file picker or an already-decoded clipboard blob.
    Bytes {
        bytes: Vec<u8>,
        mime_type: String,
        name: Option<String>,
    },
    /// An inline, data-URI encoded payload, e.g. from pasted HTML.
    Inline { data: String, name: Option<String> },
}

impl MediaPayload {
    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        MediaPayload::Bytes {
            bytes,
            mime_type: mime_type.into(),
            name: Some(name.into()),
        }
    }

    pub fn data_uri(data: impl Into<String>) -> Self {
        MediaPayload::Inline {
            data: data.into(),
            name: None,
        }
    }
}

/// Decoded bytes waiting to be uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingUpload {
    pub token: UploadToken,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub name: Option<String>,
}

impl PendingUpload {
    /// Decode a payload. Pure and synchronous; the only failure is
    /// [`UploadError::DecodeFailed`].
    pub fn prepare(payload: MediaPayload) -> Result<Self, UploadError> {
        let (bytes, mime_type, name) = match payload {
            MediaPayload::Bytes {
                bytes,
                mime_type,
                name,
            } => (bytes, mime_type, name),
            MediaPayload::Inline { data, name } => {
                let (bytes, mime_type) = decode_data_uri(&data)?;
                (bytes, mime_type, name)
            }
        };

        if !mime_type.starts_with("image/") {
            return Err(UploadError::DecodeFailed(format!(
                "unsupported media type {}",
                mime_type
            )));
        }
        if bytes.is_empty() {
            return Err(UploadError::DecodeFailed("empty payload".to_string()));
        }

        Ok(Self {
            token: UploadToken::new(),
            bytes,
            mime_type,
            name,
        })
    }
}

/// Decode a base64 `data:` URI into bytes and its mime type.
pub fn decode_data_uri(uri: &str) -> Result<(Vec<u8>, String), UploadError> {
    let fail = |reason: &str| UploadError::DecodeFailed(reason.to_string());

    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| fail("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| fail("data URI has no payload"))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| fail("only base64 data URIs are supported"))?;
    let mime_type = mime_type.split(';').next().unwrap_or_default();
    if mime_type.is_empty() {
        return Err(fail("data URI has no media type"));
    }

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| UploadError::DecodeFailed(e.to_string()))?;

    Ok((bytes, mime_type.to_ascii_lowercase()))
}

/// Outcome of one background resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub token: UploadToken,
    pub result: Result<MediaRef, UploadError>,
}

/// Uploads media through a storage service.
pub struct MediaResolver<S: StorageService> {
    storage: Arc<S>,
    prefix: String,
    keys: Mutex<Generator>,
}

impl<S: StorageService> MediaResolver<S> {
    pub fn new(storage: Arc<S>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            keys: Mutex::new(Generator::new()),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// A fresh, collision-free key: monotonic ULID plus the sanitized name.
    pub fn storage_key(&self, name: Option<&str>, mime_type: &str) -> String {
        let id = self
            .keys
            .lock()
            .generate()
            .unwrap_or_else(|_| Ulid::new());
        format!("{}/{}-{}", self.prefix, id, file_name(name, mime_type))
    }

    /// Write the bytes, then ask for their address.
    pub async fn resolve(&self, pending: &PendingUpload) -> Result<MediaRef, UploadError> {
        let key = self.storage_key(pending.name.as_deref(), &pending.mime_type);
        debug!(token = %pending.token, %key, size = pending.bytes.len(), "uploading media");

        self.storage
            .put_object(&key, pending.bytes.clone(), &pending.mime_type)
            .await
            .map_err(|e| UploadError::WriteFailed {
                key: key.clone(),
                reason: e.to_string(),
            })?;

        self.storage
            .public_ref(&key)
            .await
            .map_err(|e| UploadError::AddressFailed {
                key: key.clone(),
                reason: e.to_string(),
            })
    }

    /// Resolve in the background, reporting the outcome on `outcomes`.
    pub fn spawn(
        self: &Arc<Self>,
        pending: PendingUpload,
        outcomes: mpsc::UnboundedSender<UploadOutcome>,
    ) -> JoinHandle<()> {
        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            let result = resolver.resolve(&pending).await;
            if let Err(err) = &result {
                warn!(token = %pending.token, %err, "media upload failed");
            }
            let _ = outcomes.send(UploadOutcome {
                token: pending.token,
                result,
            });
        })
    }
}

/// Storage-safe file name, falling back to one derived from the mime type.
fn file_name(name: Option<&str>, mime_type: &str) -> String {
    let extension = mime_type
        .strip_prefix("image/")
        .map(|sub| sub.split('+').next().unwrap_or(sub))
        .filter(|sub| !sub.is_empty())
        .unwrap_or("bin");

    let sanitized: String = name
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches('.');

    if sanitized.is_empty() {
        format!("pasted-image.{}", extension)
    } else if sanitized.contains('.') {
        sanitized.to_string()
    } else {
        format!("{}.{}", sanitized, extension)
    }
}
