//! # Scanward Core
//!
//! Scan orchestration engine: accepts scan jobs against a target, fans them
//! out into independent check tasks on an at-least-once work queue, runs the
//! checks on a worker pool under per-task deadlines, stores one result per
//! (job, check type) and drives each job through
//! `queued → running → {completed, failed, cancelled}`.
//!
//! ## Feature Flags
//!
//! - `database`: Postgres implementations of the queue and repositories, and
//!   the embedded [`MIGRATOR`].
//!
//! ## Layout
//!
//! - [`checks`]: check contract, registry and built-in checks
//! - [`orchestration`]: intake, dispatcher, workers, result store, status control
//! - [`service`]: organization-scoped facade
//! - [`engine`]: wiring of all of the above over a set of backends

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod checks;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod service;

pub use engine::{ScanBackends, ScanEngine};
pub use error::{CheckError, IntakeError, Result, ScanError};
pub use service::ScanService;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
