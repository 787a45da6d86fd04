//! Latency probing
//!
//! - prober.rs: the `Prober` capability and the system `ping` backend
//! - scheduler.rs: bounded worker pool writing results into the directories

pub mod prober;
pub mod scheduler;

pub use prober::{PingProber, Prober};
pub use scheduler::{ProbeScheduler, ProbeTarget};
