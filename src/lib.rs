//! # bd-claim
//!
//! Race-free issue claiming for agents sharing a beads workspace.
//!
//! Many independent agent processes can point at the same SQLite store and
//! call [`engine::ClaimEngine::execute`]; each ready issue goes to at most one
//! of them. Selection is deterministic (priority, then age, then id) and
//! filterable by assignee, labels and minimum priority.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod workspace;

pub use engine::{ClaimEngine, ClaimOutcome, ClaimRequest, ClaimResult};
pub use error::{Error, ErrorKind, Result};
pub use store::{ClaimStore, MemoryClaimStore, SqliteClaimStore, SqliteStoreOptions};
