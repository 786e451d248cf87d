//! HTTP surface for the settlement gateway
//!
//! Thin dispatch into the settlement engine: the per-aggregator webhook
//! endpoint plus the operator-facing launch, catalog and freespin
//! endpoints.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
