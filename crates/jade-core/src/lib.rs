//! # jade-core
//!
//! Plumbing shared by every tier of the JADE mediation pipeline.
//!
//! This crate provides:
//! - The `StorageService` trait the policy store persists through
//! - The correlation channel (`channel`, `Requester`, `Responder`) that
//!   carries every cross-context request with a single-use id and a deadline
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jade_core::channel::channel;
//!
//! let (requester, responder) = channel::<Req, Resp>("page", 64, Duration::from_millis(2000));
//! let resp = requester.request(|id| Req::new(id, ...)).await?;
//! ```

pub mod channel;
pub mod traits;

pub use channel::{channel, PendingRequests, ReplySender, Requester, Responder};
pub use traits::StorageService;
