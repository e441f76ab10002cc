use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

use crate::aggregates::TransactionPoint;

/// Boxed so a repository backed by a database driver, an HTTP client, or
/// anything else can report its own error type without this crate
/// needing to know its shape.
pub type StoreError = Box<dyn Error + Send + Sync>;

/// The persistence sink this crate hands sealed windows to. An external
/// collaborator: this crate only calls it, never implements storage
/// itself.
pub trait TransactionPointRepository: Send + Sync {
    fn store(
        &self,
        type_key: &str,
        overall: TransactionPoint,
        per_transaction: HashMap<String, TransactionPoint>,
    ) -> Result<(), StoreError>;
}

/// Discards everything. Used where no persistence sink is wired up yet
/// (tests, examples) without special-casing a `None`.
#[derive(Clone, Copy, Default)]
pub struct NoopRepository;

impl TransactionPointRepository for NoopRepository {
    fn store(
        &self,
        _type_key: &str,
        _overall: TransactionPoint,
        _per_transaction: HashMap<String, TransactionPoint>,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Collects every flushed point in memory, in flush order. For tests
/// asserting on what the aggregator produced.
#[derive(Default)]
pub struct VecRepository {
    stored: Mutex<Vec<(String, TransactionPoint, HashMap<String, TransactionPoint>)>>,
}

impl VecRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<(String, TransactionPoint, HashMap<String, TransactionPoint>)> {
        std::mem::take(&mut *self.stored.lock().unwrap())
    }
}

impl TransactionPointRepository for VecRepository {
    fn store(
        &self,
        type_key: &str,
        overall: TransactionPoint,
        per_transaction: HashMap<String, TransactionPoint>,
    ) -> Result<(), StoreError> {
        self.stored
            .lock()
            .unwrap()
            .push((type_key.to_string(), overall, per_transaction));
        Ok(())
    }
}

/// Fails every `store` call. For exercising the path where a persistence
/// failure must make the aggregator log and move on rather than retry
/// or propagate.
#[derive(Clone, Copy, Default)]
pub struct FailingRepository;

impl TransactionPointRepository for FailingRepository {
    fn store(
        &self,
        _type_key: &str,
        _overall: TransactionPoint,
        _per_transaction: HashMap<String, TransactionPoint>,
    ) -> Result<(), StoreError> {
        Err("simulated persistence failure".into())
    }
}
