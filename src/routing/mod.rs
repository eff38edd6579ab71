// src/routing/mod.rs
// Provider routing policy

mod router;

pub use router::{ProviderRouter, RoutingPolicy};
