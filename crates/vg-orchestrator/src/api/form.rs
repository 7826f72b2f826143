//! Multipart upload forms
//!
//! Text fields come first and the file comes last, so the file can be
//! streamed to the node without buffering it here.

use axum::extract::multipart::Field;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io;
use std::str::FromStr;

use vg_core::traits::ByteStream;
use vg_core::VgError;

use super::ApiError;

/// Chunks buffered between the request body and the node upload
const BODY_BUFFER: usize = 8;

/// Text fields preceding the file
#[derive(Debug, Default)]
pub struct FormFields {
    values: HashMap<String, String>,
}

impl FormFields {
    /// A field that must be present and non-empty
    pub fn required(&self, name: &str) -> Result<&str, VgError> {
        self.optional(name)
            .ok_or_else(|| VgError::Validation(format!("{} is required", name)))
    }

    /// A field that may be absent; blank counts as absent
    pub fn optional(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// A required field parsed into `T`
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T, VgError> {
        let raw = self.required(name)?;
        raw.parse()
            .map_err(|_| VgError::Validation(format!("invalid {} '{}'", name, raw)))
    }

    /// An optional field parsed into `T`
    pub fn parse_optional<T: FromStr>(&self, name: &str) -> Result<Option<T>, VgError> {
        self.optional(name)
            .map(|raw| {
                raw.parse()
                    .map_err(|_| VgError::Validation(format!("invalid {} '{}'", name, raw)))
            })
            .transpose()
    }

    /// A boolean flag: `1`, `true`, `yes` or `on`
    pub fn flag(&self, name: &str) -> bool {
        matches!(
            self.optional(name).map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }

    /// Keep a text field, or hand back the field named `file_field`
    pub async fn take<'a>(
        &mut self,
        field: Field<'a>,
        file_field: &str,
    ) -> Result<Option<Field<'a>>, ApiError> {
        if field.name() == Some(file_field) {
            return Ok(Some(field));
        }
        let name = field.name().unwrap_or_default().to_string();
        let value = field.text().await?;
        self.values.insert(name, value);
        Ok(None)
    }
}

/// Error for a multipart body that ended before its file
pub fn missing_file(file_field: &str) -> ApiError {
    ApiError(VgError::Validation(format!(
        "multipart body has no '{}' field",
        file_field
    )))
}

/// Channel whose receiving end is handed to the node as the upload body
pub fn body_channel() -> (mpsc::Sender<io::Result<Bytes>>, ByteStream) {
    let (tx, rx) = mpsc::channel(BODY_BUFFER);
    (tx, Box::pin(rx))
}

/// Forward a file field into the upload body
///
/// Stops when the field ends, when reading it fails (the failure is passed
/// on so the upload aborts) or when the upload stops listening.
pub async fn feed(mut field: Field<'_>, mut tx: mpsc::Sender<io::Result<Bytes>>) {
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()));
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }
}
