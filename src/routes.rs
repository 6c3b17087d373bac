use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json,
    Router,
};
use utoipa::OpenApi;

use crate::http_objects::{ApiError, BlockUploadCheck, BlockUploadResult};

mod block_upload;
pub mod routes_state;

use block_upload::{check_block_upload, handle_block_upload, upload_block_file};
use routes_state::RouteState;

#[derive(OpenApi)]
#[openapi(
        paths(
            block_upload::handle_block_upload,
            block_upload::upload_block_file,
            block_upload::check_block_upload,
        ),
        components(
            schemas(
                ApiError,
                BlockUploadCheck,
                BlockUploadResult,
            )
        ),
        tags(
            (name = "upload", description = "Block upload API")
        )
    )]
pub struct ApiDoc;

pub fn create_routes(route_state: RouteState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/docs/openapi.json", get(openapi_json))
        .route(
            "/api/v1/upload/block/{block}",
            post(handle_block_upload).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/v1/upload/block/{block}/files",
            post(upload_block_file),
        )
        .route(
            "/api/v1/upload/block/{block}/check",
            get(check_block_upload),
        )
        .with_state(route_state)
}

async fn index() -> &'static str {
    "Block Upload Server"
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
