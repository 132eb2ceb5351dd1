pub mod parallel;

pub use parallel::{ParallelError, ParallelExecutor};
