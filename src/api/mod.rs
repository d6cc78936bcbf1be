//! HTTP and WebSocket front end.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod ws;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use server::{router, serve};
pub use state::AppState;
