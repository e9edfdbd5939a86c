//! HTTP surface for the Scanward engine: scan submission, status polling,
//! results, reports and a per-job server-sent event stream.

pub mod errors;
pub mod extract;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::router;
pub use state::AppState;
