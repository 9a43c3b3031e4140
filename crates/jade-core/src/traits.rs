//! Trait definitions for the external collaborators of the pipeline.
//!
//! The only collaborator the pipeline itself talks to is the key-value
//! storage service behind the policy store. The page runtime's primitive
//! APIs are described by the interceptor crate.

use async_trait::async_trait;
use serde_json::{Map, Value};

use jade_contracts::error::JadeResult;

/// A key-value store with no transactional guarantees.
///
/// Writes are last-write-wins per key. Implementations report failures as
/// `JadeError::StorageFailure`; callers never retry.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Fetch the given keys. Absent keys are simply missing from the result.
    async fn get(&self, keys: &[String]) -> JadeResult<Map<String, Value>>;

    /// Fetch every stored key.
    async fn get_all(&self) -> JadeResult<Map<String, Value>>;

    /// Write every entry of `items`, overwriting existing values.
    async fn set(&self, items: Map<String, Value>) -> JadeResult<()>;

    /// Remove everything.
    async fn clear(&self) -> JadeResult<()>;
}
