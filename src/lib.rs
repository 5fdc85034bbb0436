//! Shared session lifecycle for CRM platform flow nodes.
//!
//! ```text
//!   ConnectionConfig ─▶ SessionHolder ──(SessionEvent broadcast)──▶ SessionAware nodes
//!                          │  login/logout                             │
//!                          ▼                                           ▼
//!                    Authenticator ─▶ ApiSession ◀──── query / describe / subscribe
//!                          │
//!                          └─ failures ─▶ GuidanceRegistry ─▶ log
//! ```

// Platform API client (REST, streaming, offline mock)
pub mod client;

// Connection and runtime settings
pub mod config;

// Connection-dependent consumer contract
pub mod consumer;

// Error guidance lookup
pub mod guidance;

// Node handle, flow messages, context storage, holder registry
pub mod host;

// Query pagination
pub mod query;

// Session Holder lifecycle
pub mod session;

pub mod validation;
