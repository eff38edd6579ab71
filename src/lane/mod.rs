// src/lane/mod.rs
// Lane execution: single attempts with deadlines, and concurrent fan-out

mod executor;
mod scheduler;

pub use executor::LaneExecutor;
pub use scheduler::LaneScheduler;
