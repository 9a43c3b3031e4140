//! In-memory implementation of `StorageService`.
//!
//! `MemoryStorage` is the reference backend: a JSON object behind a `Mutex`.
//! It can be told to fail reads or writes so callers can exercise the
//! storage-failure paths without a real backend.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, MutexGuard,
};

use async_trait::async_trait;
use serde_json::{Map, Value};

use jade_contracts::error::{JadeError, JadeResult};
use jade_core::traits::StorageService;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<Map<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing contents, e.g. to simulate a restart.
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data: Mutex::new(data),
            ..Self::default()
        }
    }

    /// Make every subsequent read fail until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write or clear fail until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of everything stored.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data().clone()
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn data(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_read(&self) -> JadeResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(JadeError::StorageFailure {
                reason: "memory storage read failure (injected)".to_string(),
            });
        }
        Ok(())
    }

    fn check_write(&self) -> JadeResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(JadeError::StorageFailure {
                reason: "memory storage write failure (injected)".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn get(&self, keys: &[String]) -> JadeResult<Map<String, Value>> {
        self.check_read()?;
        let data = self.data();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn get_all(&self) -> JadeResult<Map<String, Value>> {
        self.check_read()?;
        Ok(self.data().clone())
    }

    async fn set(&self, items: Map<String, Value>) -> JadeResult<()> {
        self.check_write()?;
        self.data().extend(items);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> JadeResult<()> {
        self.check_write()?;
        self.data().clear();
        Ok(())
    }
}
