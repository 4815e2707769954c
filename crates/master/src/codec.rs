//! Binary encoding of persisted records

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MasterError, Result};

/// Serialize a record snapshot
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| MasterError::Codec(e.to_string()))
}

/// Deserialize a persisted record
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| MasterError::Codec(e.to_string()))?;
    Ok(value)
}
