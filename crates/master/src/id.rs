//! Cluster-unique id allocation

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

use metastore::Store;

use crate::error::{MasterError, Result};
use crate::keys::AUTO_INCREMENT_ID;

/// Default number of ids reserved per store write
pub const DEFAULT_ID_STEP: u64 = 1000;

/// Issues monotonically increasing, never reused 64-bit ids
pub trait IdGenerator: Send + Sync {
    fn gen_id(&self) -> Result<u64>;
}

#[derive(Debug, Default)]
struct IdWindow {
    /// Last id handed out
    current: u64,
    /// Highest id reserved in the store
    end: u64,
}

/// Store-backed generator
///
/// Persists a high-water mark and serves ids from an in-memory window of
/// `step` ids. After a restart the window restarts above the persisted mark,
/// so unused ids of the previous window are skipped, never reissued.
pub struct StoreIdGenerator {
    store: Arc<dyn Store>,
    step: u64,
    window: Mutex<IdWindow>,
}

impl StoreIdGenerator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_step(store, DEFAULT_ID_STEP)
    }

    pub fn with_step(store: Arc<dyn Store>, step: u64) -> Self {
        Self {
            store,
            step: step.max(1),
            window: Mutex::new(IdWindow::default()),
        }
    }

    fn load_mark(&self) -> Result<u64> {
        let value = self
            .store
            .get(AUTO_INCREMENT_ID)
            .map_err(|e| MasterError::IdGenerationFailure(e.to_string()))?;
        match value {
            None => Ok(0),
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    MasterError::IdGenerationFailure(format!(
                        "corrupted id mark of {} bytes",
                        bytes.len()
                    ))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
        }
    }

    fn reserve(&self, window: &mut IdWindow) -> Result<()> {
        let mark = if window.end == 0 {
            self.load_mark()?
        } else {
            window.end
        };
        let end = mark
            .checked_add(self.step)
            .ok_or_else(|| MasterError::IdGenerationFailure("id space exhausted".to_string()))?;
        self.store
            .put(AUTO_INCREMENT_ID, &end.to_be_bytes())
            .map_err(|e| {
                error!("persist id mark {} failed: {}", end, e);
                MasterError::IdGenerationFailure(e.to_string())
            })?;
        info!("reserved ids ({}, {}]", mark, end);
        window.current = mark;
        window.end = end;
        Ok(())
    }
}

impl IdGenerator for StoreIdGenerator {
    fn gen_id(&self) -> Result<u64> {
        let mut window = self.window.lock();
        if window.current >= window.end {
            self.reserve(&mut window)?;
        }
        window.current += 1;
        Ok(window.current)
    }
}
