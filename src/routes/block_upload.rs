use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header::CONTENT_LENGTH, HeaderMap},
    Json,
};
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use super::routes_state::RouteState;
use crate::{
    block::{parse_block_id, validate_content_length, BlockFilePath},
    http_objects::{ApiError, BlockFileParams, BlockUploadCheck, BlockUploadParams},
    tenant::TenantId,
};

/// Start or complete a block upload
///
/// Without `uploadComplete=true` the body is the block's `meta.json`, which
/// is validated and staged. With `uploadComplete=true` the staged
/// descriptor is published and the block becomes visible.
#[utoipa::path(
    post,
    path = "/api/v1/upload/block/{block}",
    params(
        ("block" = String, Path, description = "ULID of the block"),
        ("X-Scope-OrgID" = String, Header, description = "Tenant ID"),
        BlockUploadParams,
    ),
    request_body(
        content = String,
        content_type = "application/json",
        description = "Block meta.json; empty when completing"
    ),
    tag = "upload",
    responses(
        (status = 200, description = "upload started or completed"),
        (status = BAD_REQUEST, description = "invalid block ID, tenant or meta.json"),
        (status = CONFLICT, description = "block already exists in object storage"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn handle_block_upload(
    Path(block): Path<String>,
    Query(params): Query<BlockUploadParams>,
    State(state): State<RouteState>,
    tenant: Result<TenantId, ApiError>,
    body: Bytes,
) -> Result<(), ApiError> {
    let block_id = parse_block_id(&block)?;
    let session = state.upload_session(tenant?, block_id);

    if params.is_complete_request() {
        session.complete().await?;
    } else {
        session.create(&body).await?;
    }
    Ok(())
}

/// Upload a block file
///
/// Streams the request body to `<block>/<path>`. The upload must have been
/// started first.
#[utoipa::path(
    post,
    path = "/api/v1/upload/block/{block}/files",
    params(
        ("block" = String, Path, description = "ULID of the block"),
        ("X-Scope-OrgID" = String, Header, description = "Tenant ID"),
        BlockFileParams,
    ),
    request_body(
        content = String,
        content_type = "application/octet-stream",
        description = "File contents"
    ),
    tag = "upload",
    responses(
        (status = 200, description = "file uploaded"),
        (status = BAD_REQUEST, description = "invalid path, empty file or upload not started"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error"),
        (status = BAD_GATEWAY, description = "failed uploading block file to bucket")
    ),
)]
pub async fn upload_block_file(
    Path(block): Path<String>,
    Query(params): Query<BlockFileParams>,
    State(state): State<RouteState>,
    tenant: Result<TenantId, ApiError>,
    headers: HeaderMap,
    body: Body,
) -> Result<(), ApiError> {
    let block_id = parse_block_id(&block)?;
    let tenant = tenant?;
    let path = BlockFilePath::parse(params.path.as_deref())?;
    let content_length = validate_content_length(
        headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok()),
    )?;

    let stream = body.into_data_stream().map_err(anyhow::Error::from).boxed();
    state
        .upload_session(tenant, block_id)
        .upload_file(&path, stream, content_length)
        .await?;
    Ok(())
}

/// Check the state of a block upload
#[utoipa::path(
    get,
    path = "/api/v1/upload/block/{block}/check",
    params(
        ("block" = String, Path, description = "ULID of the block"),
        ("X-Scope-OrgID" = String, Header, description = "Tenant ID"),
    ),
    tag = "upload",
    responses(
        (status = 200, description = "upload state", body = BlockUploadCheck),
        (status = NOT_FOUND, description = "block upload not started"),
        (status = INTERNAL_SERVER_ERROR, description = "Internal Server Error")
    ),
)]
pub async fn check_block_upload(
    Path(block): Path<String>,
    State(state): State<RouteState>,
    tenant: Result<TenantId, ApiError>,
) -> Result<Json<BlockUploadCheck>, ApiError> {
    let block_id = parse_block_id(&block)?;
    let upload_state = state.upload_session(tenant?, block_id).state().await?;
    debug!(block = %block_id, state = ?upload_state, "checked block upload");

    BlockUploadCheck::from_state(upload_state)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("block not found"))
}
