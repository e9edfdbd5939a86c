//! In-process runtime: the event bus and the supervisor that owns the worker
//! pool and the lease housekeeper.

mod event_bus;
mod supervisor;

pub use event_bus::*;
pub use supervisor::*;
