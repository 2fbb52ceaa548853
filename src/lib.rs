//! Switchboard - worker-fleet gateway for OpenAI-compatible chat completions
//!
//! The gateway accepts chat-completion requests over HTTP and dispatches them
//! to worker nodes connected by a persistent WebSocket transport. Workers
//! hold the provider credentials and translate the canonical request into
//! provider-specific API calls; the gateway schedules across the fleet,
//! streams results back as server-sent events, and retries transparently
//! when a chosen worker fails.

pub mod adapter;
pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod hub;
pub mod limiter;
pub mod protocol;
pub mod worker;
