// src/health/mod.rs
// Provider health tracking (circuit breakers)

mod circuit_breaker;
mod registry;

pub use circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitState, HealthSnapshot};
pub use registry::CircuitBreakerRegistry;
