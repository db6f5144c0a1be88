//! Remote metadata retrieval for registered profiles.
//!
//! Fetches display metadata (MOTD, icon) from each profile's info endpoint
//! without blocking registry callers and without duplicate in-flight
//! requests for the same profile id.

mod client;
mod service;
mod types;

#[cfg(test)]
mod tests;

pub use client::ServerInfoClient;
pub use service::ServerInfoService;
pub use types::{ModsInfo, ServerInfo};
