//! Storage upload endpoints

use axum::extract::{Multipart, State};

use vg_core::model::UploadRequest;
use vg_core::{ClusterId, NodeName};

use super::form::{body_channel, feed, missing_file, FormFields};
use super::{ok, ApiResult, SharedState};
use crate::upload::{UploadOutcome, UploadSessionView};

const FILE_FIELD: &str = "file";

/// POST /nodes/storage/upload
pub async fn upload(State(state): State<SharedState>, mut multipart: Multipart) -> ApiResult<UploadOutcome> {
    let mut fields = FormFields::default();
    let file = loop {
        let field = multipart
            .next_field()
            .await?
            .ok_or_else(|| missing_file(FILE_FIELD))?;
        if let Some(file) = fields.take(field, FILE_FIELD).await? {
            break file;
        }
    };

    let cluster = ClusterId(fields.parse("cluster_id")?);
    let node = NodeName::new(fields.required("node_name")?);
    let filename = match fields.optional("filename") {
        Some(name) => name.to_string(),
        None => file.file_name().unwrap_or_default().to_string(),
    };
    let request = UploadRequest {
        storage: fields.required("storage")?.to_string(),
        content: fields.parse("content")?,
        filename,
        size: fields.parse_optional("size")?,
        checksum_algorithm: fields.parse_optional("hash_algorithm")?,
    };

    let (tx, body) = body_channel();
    let (_, outcome) = tokio::join!(
        feed(file, tx),
        state.uploads.upload(cluster, &node, request, body, None)
    );
    ok(outcome?)
}

/// GET /uploads
pub async fn list_uploads(State(state): State<SharedState>) -> ApiResult<Vec<UploadSessionView>> {
    ok(state.uploads.list())
}
