//! rssecmanager - session-aware license acquisition for platform security services.
//!
//! This crate provides:
//! - A single-worker task scheduler with suspend/resume and cancellation.
//! - A deduplicating, reference-counted registry of security sessions that
//!   closes each session when its last handle is dropped.
//! - A license acquisition orchestrator that reuses, updates or opens
//!   sessions and retries transient service failures.
//! - Platform event dispatch through the scheduler.
//! - Optional JSON-RPC over HTTP transport.
//!
//! Feature flags:
//! - `log` (default): emit diagnostics through the `log` facade.
//! - `remote`: enable the JSON-RPC over HTTP transport.
//! - `cli`: enable the CLI binary helpers.
//! - `chrono`: use chrono for date handling in CLI.

#[macro_use]
mod macros;

/// Manager configuration.
pub mod config;
/// Common error types and Result alias.
pub mod error;
/// Platform event dispatch.
pub mod events;
/// License acquisition orchestrator.
pub mod manager;
/// Session registry.
pub mod registry;
/// Acquisition request and outcome types.
pub mod request;
/// Single-worker task scheduler.
pub mod scheduler;
/// Session entries and handles.
pub mod session;
/// Security service status codes.
pub mod status;
/// Transport seam towards the platform.
pub mod transport;
/// Shared helper utilities.
pub mod utils;

/// JSON-RPC transport (feature: `remote`).
#[cfg(feature = "remote")]
pub mod remote;
