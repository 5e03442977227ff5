//! Time handling for the refresh loop.
//!
//! [`clock`] abstracts "now" and sleeping, [`timer`] computes and emits daily
//! fires, and [`runner`] drives a refresh for each fire.

pub mod clock;
pub mod runner;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use runner::RefreshRunner;
pub use timer::{Fire, FireSchedule, RecurringTimer};
