//! API Module
//!
//! HTTP handlers and routing for the RPC surface.
//!
//! # Endpoints
//! - `POST /v1/blob` - Stream a blob as framed binary
//! - `GET /v1/last-commit` - Last commit touching a path
//! - `GET /stats` - Last-commit cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
