//! # jade-policy
//!
//! The process-wide policy store of the JADE mediation pipeline.
//!
//! ## Overview
//!
//! [`PolicyStore`] owns every per-origin policy and the bounded audit log.
//! Callers reach it either directly (`handle` / `handle_json`, the control
//! surface) or through a [`StoreConnection`] opened with [`connect`], which
//! is how mediators talk to it. Saving a policy pushes `POLICY_UPDATED` to
//! every connection bound to that origin.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! let storage = Arc::new(MemoryStorage::new());
//! let store = PolicyStore::init(storage, &JadeConfig::default()).await?;
//! let conn = connect(&store, Duration::from_millis(2000));
//! let policy = conn.client.get_policy(&Origin::new("example.com")).await?;
//! ```
//!
//! ## Lookup order
//!
//! `get_policy` returns the stored policy, then a preset keyed by the exact
//! origin, then the all-`false` default.

pub mod connection;
pub mod memory;
pub mod store;

pub use connection::{connect, StoreClient, StoreConnection};
pub use memory::MemoryStorage;
pub use store::PolicyStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
