//! Defines routes for the file API.
//!
//! ## Structure
//! - **File endpoints**
//!   - `GET    /files/{*path}`: read a file (`?offset=` streams from an offset)
//!   - `PUT    /files/{*path}`: store a file as one object (at most `MAX_PUT_BODY`)
//!   - `PATCH  /files/{*path}`: write the body at `?offset=`
//!   - `HEAD   /files/{*path}`: size and modification time only
//!   - `DELETE /files/{*path}`: recursive delete
//!
//! - **Tree endpoints**
//!   - `GET    /stat/{*path}`: file info as JSON
//!   - `GET    /list`, `GET /list/{*path}`: immediate children
//!   - `POST   /move`: `{ "source": ..., "destination": ... }`
//!
//! The wildcard `*path` allows nested paths like `logs/2025/app.log`.

use crate::{
    driver::Driver,
    handlers::{
        file_handlers::{
            delete_file, get_file, head_file, list_dir, list_root, move_file, patch_file, put_file,
            stat_file,
        },
        health_handlers::{healthz, readyz},
    },
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    handler::Handler,
    routing::{get, post},
};

/// Largest body accepted by `PUT /files/{*path}`, which buffers the whole
/// object. Larger files go through PATCH, which streams into segments.
pub const MAX_PUT_BODY: usize = 128 * 1024 * 1024;

/// Build the router for the file API.
///
/// The router carries the shared `Driver` to all handlers.
pub fn routes() -> Router<Driver> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/files/{*path}",
            get(get_file)
                .put(put_file.layer(DefaultBodyLimit::max(MAX_PUT_BODY)))
                .patch(patch_file)
                .head(head_file)
                .delete(delete_file),
        )
        .route("/stat/{*path}", get(stat_file))
        .route("/list", get(list_root))
        .route("/list/{*path}", get(list_dir))
        .route("/move", post(move_file))
}
