// src/lib.rs
// Lanewise - multi-lane retrieval orchestrator with per-provider circuit breakers

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod aggregate;
pub mod backend;
pub mod budget;
pub mod classify;
pub mod config;
pub mod degradation;
pub mod error;
pub mod health;
pub mod lane;
pub mod orchestrator;
pub mod routing;
pub mod telemetry;
pub mod types;

pub use error::{ErrorKind, LanewiseError, Result};
pub use orchestrator::{Orchestrator, QueryPreferences};
pub use types::{AggregatedResponse, DegradationLevel, LaneName, QueryClass};
