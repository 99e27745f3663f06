//! REST API module
//!
//! This module provides the HTTP server and REST API endpoints including:
//! - API routing and shared handler state
//! - Request tracing middleware
//! - Background session sweeping

pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
pub use server::ApiServer;
pub use state::AppState;
