//! Master error types

use metastore::StoreError;

/// Errors returned by the master
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// Create operation on an already-existing name
    #[error("{kind} already exists: {name}")]
    DuplicateEntity { kind: &'static str, name: String },

    /// Reference to an entity not present in cache or store
    #[error("{kind} not found: {name}")]
    NoSuchEntity { kind: &'static str, name: String },

    /// Operation not valid for the entity's current lifecycle status
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Column name collides with a SQL reserved word
    #[error("column name is a reserved word: {0}")]
    ReservedIdentifier(String),

    /// Split key supplied more than once
    #[error("duplicate split key: {0}")]
    DuplicateKey(String),

    /// Malformed column definitions or schema patch
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Placement pipeline found no node satisfying every constraint
    #[error("no eligible node for range {range_id}")]
    NoEligibleNode { range_id: u64 },

    /// Id allocator could not produce a new id
    #[error("id generation failed: {0}")]
    IdGenerationFailure(String),

    /// Operation observed an older epoch than the cached one
    #[error("stale epoch for {kind} {id}: got {got}, current {current}")]
    StaleEpoch {
        kind: &'static str,
        id: u64,
        got: String,
        current: String,
    },

    /// Underlying store read/write/commit error
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    /// Persisted record could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Persisted record violates an invariant established by prior writers
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Range server call failed
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Cluster has been closed
    #[error("cluster is closed")]
    Closed,
}

impl MasterError {
    pub(crate) fn duplicate(kind: &'static str, name: impl ToString) -> Self {
        Self::DuplicateEntity {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, name: impl ToString) -> Self {
        Self::NoSuchEntity {
            kind,
            name: name.to_string(),
        }
    }

    /// Store or codec failure, logged at error level by callers
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            MasterError::PersistenceFailure(_)
                | MasterError::Codec(_)
                | MasterError::InternalInconsistency(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MasterError>;
