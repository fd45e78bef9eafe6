pub mod runner;
pub mod stats;

pub use runner::{CleanupOptions, CleanupRunner};
pub use stats::{CleanupReport, ItemFailure, Phase, ProgressState};
