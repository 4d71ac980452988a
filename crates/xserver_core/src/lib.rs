mod server;
mod stats;
mod worker;

pub use server::{Phase, Worker};
pub use stats::{StatsSnapshot, WorkerStats};
