//! vouch-daemon - the Vouch forensic reverse proxy.
//!
//! The daemon sits between an agent and its tool backend, intercepts every
//! JSON-RPC exchange, classifies it against the loaded policy, and appends
//! signed, hash-chained events to the ledger without ever blocking the
//! request path on durability.
//!
//! # Modules
//!
//! - [`pool`]: recycled event allocations
//! - [`processor`]: assigns chain position, hashes, signs, stores
//! - [`worker`]: the async drain loop that owns the ring buffer
//! - [`engine`]: shared state glue (policy, task maps, worker handle)
//! - [`proxy`]: the intercepting reverse proxy
//! - [`admin`]: rekey/stats/metrics endpoints
//! - [`metrics`]: Prometheus counter registry

pub mod admin;
pub mod engine;
pub mod metrics;
pub mod pool;
pub mod processor;
pub mod proxy;
pub mod worker;
