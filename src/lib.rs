//! Armitage is a multi-agent orchestration runtime.
//!
//! A coordinator agent delegates user requests to planner, executor,
//! memory, and communicator specialists under a strict policy engine.
//! Every prompt, model response, tool call, and state transition lands in
//! an append-only event trace; plans, sessions, and semantically
//! searchable memory persist across requests behind repository traits
//! with in-memory and SQLite-indexed implementations.

pub mod agents;
pub mod api;
pub mod config;
pub mod kernel;
pub mod logging;
pub mod mcp;
pub mod repos;
pub mod tools;
pub mod types;
