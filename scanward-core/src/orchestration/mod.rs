//! Scan orchestration: intake, dispatch, execution, result storage and the
//! job state machine, wired over queue and persistence ports.

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod intake;
pub mod lease;
pub mod memory;
#[cfg(feature = "database")]
pub mod persistence;
pub mod queue;
pub mod recovery;
pub mod results;
pub mod runtime;
pub mod status;
pub mod store;
pub mod task;
pub mod worker;

pub use config::*;
pub use dispatcher::*;
pub use events::*;
pub use intake::*;
pub use lease::*;
pub use memory::*;
#[cfg(feature = "database")]
pub use persistence::*;
pub use queue::*;
pub use recovery::*;
pub use results::*;
pub use runtime::*;
pub use status::*;
pub use store::*;
pub use task::*;
pub use worker::*;
