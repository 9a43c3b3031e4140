//! # jade-contracts
//!
//! Shared types, protocol messages, errors, and configuration for the JADE
//! capability mediation pipeline.
//!
//! All crates in the workspace import from here. No pipeline logic lives in
//! this crate, only data definitions and their invariants.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod origin;
pub mod policy;
