//! Scheduling core for desk booking: a timezone-correct calendar grid,
//! the interval selection state machine, per-desk soft locks with
//! heartbeat, and the realtime delta channel that keeps viewers in step.

pub mod api;
pub mod calendar;
pub mod config;
pub mod error;
pub mod limits;
pub mod lock;
pub mod memory;
pub mod model;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod reaper;
pub mod selection;
pub mod sync;
pub mod timemath;
