//! HTTP handlers for file operations.
//! Request bodies of offset writes and response bodies of offset reads are
//! streamed; everything else goes through the driver's whole-object calls.

use crate::{
    driver::{CONTENT_TYPE, DIRECTORY_MIME_TYPE, Driver},
    errors::AppError,
    models::file_info::FileInfo,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::StreamReader;

#[derive(Debug, Deserialize)]
pub struct OffsetQuery {
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub path: String,
    pub offset: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub path: String,
    pub children: Vec<String>,
}

/// Routes capture paths without their leading `/`.
fn absolute(path: &str) -> String {
    format!("/{path}")
}

/// GET `/files/{*path}`: whole content, or a stream from `?offset=`.
pub async fn get_file(
    State(driver): State<Driver>,
    Path(path): Path<String>,
    Query(query): Query<OffsetQuery>,
) -> Result<Response, AppError> {
    let path = absolute(&path);
    let mut response = match query.offset {
        Some(offset) => Response::new(Body::from_stream(driver.reader(&path, offset).await?)),
        None => {
            let content = driver.get_content(&path).await?;
            let length = content.len();
            let mut response = Response::new(Body::from(content));
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
    };
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE),
    );
    Ok(response)
}

/// PUT `/files/{*path}`: store the body as a single object.
pub async fn put_file(
    State(driver): State<Driver>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    driver.put_content(&absolute(&path), body).await?;
    Ok(StatusCode::CREATED)
}

/// PATCH `/files/{*path}?offset=`: write the body at `offset`.
///
/// A failed write answers with an error body that still carries
/// `bytes_written`, so clients can resume.
pub async fn patch_file(
    State(driver): State<Driver>,
    Path(path): Path<String>,
    Query(query): Query<OffsetQuery>,
    body: Body,
) -> Result<Json<WriteResponse>, AppError> {
    let path = absolute(&path);
    let offset = query.offset.unwrap_or(0);
    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));

    let bytes_written = driver.write_stream(&path, offset, reader).await?;
    Ok(Json(WriteResponse {
        path,
        offset,
        bytes_written,
    }))
}

/// HEAD `/files/{*path}`: size and modification time as headers.
pub async fn head_file(
    State(driver): State<Driver>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let info = driver.stat(&absolute(&path)).await?;
    let mut response = Response::new(Body::empty());
    set_file_headers(response.headers_mut(), &info);
    Ok(response)
}

/// GET `/stat/{*path}`
pub async fn stat_file(
    State(driver): State<Driver>,
    Path(path): Path<String>,
) -> Result<Json<FileInfo>, AppError> {
    Ok(Json(driver.stat(&absolute(&path)).await?))
}

/// DELETE `/files/{*path}`: recursive.
pub async fn delete_file(
    State(driver): State<Driver>,
    Path(path): Path<String>,
) -> Result<StatusCode, AppError> {
    driver.delete(&absolute(&path)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/list`
pub async fn list_root(State(driver): State<Driver>) -> Result<Json<ListResponse>, AppError> {
    list_children(&driver, "/".to_string()).await
}

/// GET `/list/{*path}`
pub async fn list_dir(
    State(driver): State<Driver>,
    Path(path): Path<String>,
) -> Result<Json<ListResponse>, AppError> {
    list_children(&driver, absolute(&path)).await
}

async fn list_children(driver: &Driver, path: String) -> Result<Json<ListResponse>, AppError> {
    let children = driver.list(&path).await?;
    Ok(Json(ListResponse { path, children }))
}

/// POST `/move`
pub async fn move_file(
    State(driver): State<Driver>,
    Json(request): Json<MoveRequest>,
) -> Result<StatusCode, AppError> {
    if request.source.is_empty() || request.destination.is_empty() {
        return Err(AppError::bad_request("source and destination are required"));
    }
    driver
        .move_object(&request.source, &request.destination)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn set_file_headers(headers: &mut HeaderMap, info: &FileInfo) {
    let content_type = if info.is_dir {
        DIRECTORY_MIME_TYPE
    } else {
        CONTENT_TYPE
    };
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size));

    let last_modified = info
        .modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
