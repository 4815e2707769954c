//! Table schema: column definitions, reserved words, primary-key encoding
//! and schema edit patches.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{MasterError, Result};

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Varchar,
    Binary,
    Date,
    TimeStamp,
}

impl DataType {
    fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::TinyInt
                | DataType::SmallInt
                | DataType::Int
                | DataType::BigInt
                | DataType::Date
                | DataType::TimeStamp
        )
    }
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub unsigned: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Part of the primary key; key order follows declaration order
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub default_value: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: 0,
            name: name.into(),
            data_type,
            unsigned: false,
            nullable: true,
            primary_key: false,
            default_value: None,
        }
    }

    pub fn primary(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            nullable: false,
            primary_key: true,
            ..Self::new(name, data_type)
        }
    }
}

const SQL_RESERVED_WORDS: &[&str] = &[
    "add", "all", "alter", "and", "as", "asc", "between", "by", "case", "check", "column",
    "constraint", "create", "cross", "database", "default", "delete", "desc", "distinct", "drop",
    "else", "exists", "false", "for", "foreign", "from", "full", "group", "having", "in",
    "index", "inner", "insert", "into", "is", "join", "key", "left", "like", "limit", "not",
    "null", "on", "or", "order", "outer", "primary", "references", "right", "select", "set",
    "table", "then", "to", "true", "union", "unique", "update", "values", "when", "where",
];

/// Case-insensitive SQL reserved word check
pub fn is_sql_reserved_word(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SQL_RESERVED_WORDS.contains(&lower.as_str())
}

/// Validate a column list for table creation
///
/// Reserved names fail with `ReservedIdentifier`; empty or duplicated names
/// and a missing primary key fail with `InvalidSchema`.
pub fn validate_columns(columns: &[Column]) -> Result<()> {
    let mut names = HashSet::new();
    for col in columns {
        if is_sql_reserved_word(&col.name) {
            return Err(MasterError::ReservedIdentifier(col.name.clone()));
        }
        if col.name.is_empty() {
            return Err(MasterError::InvalidSchema("empty column name".to_string()));
        }
        if !names.insert(col.name.to_ascii_lowercase()) {
            return Err(MasterError::InvalidSchema(format!(
                "duplicate column {}",
                col.name
            )));
        }
    }
    if !columns.iter().any(|c| c.primary_key) {
        return Err(MasterError::InvalidSchema(
            "table has no primary key".to_string(),
        ));
    }
    Ok(())
}

// Memcomparable type flags
const BYTES_FLAG: u8 = 1;
const INT_FLAG: u8 = 3;
const UINT_FLAG: u8 = 4;
const FLOAT_FLAG: u8 = 5;

const ENC_GROUP_SIZE: usize = 8;
const ENC_MARKER: u8 = 0xFF;
const ENC_PAD: u8 = 0x00;
const SIGN_MASK: u64 = 1 << 63;

fn parse_err(col: &Column, raw: &[u8]) -> MasterError {
    MasterError::InvalidSchema(format!(
        "value {:?} does not fit column {} ({:?})",
        String::from_utf8_lossy(raw),
        col.name,
        col.data_type
    ))
}

fn encode_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(ENC_GROUP_SIZE).chain(
        // An exact multiple of the group size still needs a terminating group
        (data.len() % ENC_GROUP_SIZE == 0).then_some(&[][..]),
    ) {
        let pad = ENC_GROUP_SIZE - chunk.len();
        buf.extend_from_slice(chunk);
        buf.extend(std::iter::repeat(ENC_PAD).take(pad));
        buf.push(ENC_MARKER - pad as u8);
    }
}

/// Order-preserving encoding of one primary-key value
///
/// `raw` is the textual value as supplied by the user (split keys arrive as
/// strings). The byte order of the output matches the value order of the
/// column type.
pub fn encode_primary_key(buf: &mut Vec<u8>, col: &Column, raw: &[u8]) -> Result<()> {
    match col.data_type {
        t if t.is_integer() => {
            let text = std::str::from_utf8(raw).map_err(|_| parse_err(col, raw))?;
            if col.unsigned {
                let v: u64 = text.trim().parse().map_err(|_| parse_err(col, raw))?;
                buf.push(UINT_FLAG);
                buf.extend_from_slice(&v.to_be_bytes());
            } else {
                let v: i64 = text.trim().parse().map_err(|_| parse_err(col, raw))?;
                buf.push(INT_FLAG);
                buf.extend_from_slice(&((v as u64) ^ SIGN_MASK).to_be_bytes());
            }
        }
        DataType::Float | DataType::Double => {
            let text = std::str::from_utf8(raw).map_err(|_| parse_err(col, raw))?;
            let v: f64 = text.trim().parse().map_err(|_| parse_err(col, raw))?;
            if v.is_nan() {
                return Err(parse_err(col, raw));
            }
            let bits = v.to_bits();
            let ordered = if v >= 0.0 { bits | SIGN_MASK } else { !bits };
            buf.push(FLOAT_FLAG);
            buf.extend_from_slice(&ordered.to_be_bytes());
        }
        _ => {
            buf.push(BYTES_FLAG);
            encode_bytes(buf, raw);
        }
    }
    Ok(())
}

/// Schema edit patch: `{"columns": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaPatch {
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// Parse a JSON schema patch
pub fn parse_schema_patch(properties: &str) -> Result<SchemaPatch> {
    let patch: SchemaPatch = serde_json::from_str(properties)
        .map_err(|e| MasterError::InvalidSchema(format!("malformed patch: {}", e)))?;
    if patch.columns.is_empty() {
        return Err(MasterError::InvalidSchema("patch adds no column".to_string()));
    }
    Ok(patch)
}

/// Check that `added` can be appended to `existing`
pub fn validate_added_columns(existing: &[Column], added: &[Column]) -> Result<()> {
    let mut names: HashSet<String> = existing
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();
    for col in added {
        if is_sql_reserved_word(&col.name) {
            return Err(MasterError::ReservedIdentifier(col.name.clone()));
        }
        if col.primary_key {
            return Err(MasterError::InvalidSchema(format!(
                "cannot add primary key column {}",
                col.name
            )));
        }
        if !col.nullable && col.default_value.is_none() {
            return Err(MasterError::InvalidSchema(format!(
                "added column {} must be nullable or have a default",
                col.name
            )));
        }
        if !names.insert(col.name.to_ascii_lowercase()) {
            return Err(MasterError::InvalidSchema(format!(
                "duplicate column {}",
                col.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(col: &Column, raw: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_primary_key(&mut buf, col, raw.as_bytes()).unwrap();
        buf
    }

    #[test]
    fn test_reserved_words_case_insensitive() {
        assert!(is_sql_reserved_word("select"));
        assert!(is_sql_reserved_word("Table"));
        assert!(!is_sql_reserved_word("user_id"));
    }

    #[test]
    fn test_validate_columns() {
        let cols = vec![Column::primary("id", DataType::BigInt), Column::new("name", DataType::Varchar)];
        validate_columns(&cols).unwrap();

        let reserved = vec![Column::primary("order", DataType::BigInt)];
        assert!(matches!(
            validate_columns(&reserved),
            Err(MasterError::ReservedIdentifier(_))
        ));

        let no_pk = vec![Column::new("name", DataType::Varchar)];
        assert!(matches!(
            validate_columns(&no_pk),
            Err(MasterError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_signed_int_encoding_preserves_order() {
        let col = Column::primary("id", DataType::BigInt);
        let values = ["-100", "-1", "0", "1", "7", "1000"];
        let encoded: Vec<_> = values.iter().map(|v| encode(&col, v)).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_float_encoding_preserves_order() {
        let col = Column::primary("score", DataType::Double);
        let values = ["-3.5", "-0.5", "0", "0.25", "2", "1e9"];
        let encoded: Vec<_> = values.iter().map(|v| encode(&col, v)).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bytes_encoding_preserves_order() {
        let col = Column::primary("name", DataType::Varchar);
        let values = ["", "a", "a\0", "ab", "abcdefgh", "abcdefghi", "b"];
        let encoded: Vec<_> = values.iter().map(|v| encode(&col, v)).collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
        // Exact multiple of the group size gets a terminating group
        assert_eq!(encode(&col, "abcdefgh").len(), 1 + 9 + 9);
    }

    #[test]
    fn test_bad_integer_rejected() {
        let col = Column::primary("id", DataType::Int);
        let mut buf = Vec::new();
        assert!(encode_primary_key(&mut buf, &col, b"abc").is_err());
    }

    #[test]
    fn test_parse_schema_patch() {
        let patch = parse_schema_patch(
            r#"{"columns":[{"name":"age","data_type":"int","nullable":true}]}"#,
        )
        .unwrap();
        assert_eq!(patch.columns.len(), 1);
        assert_eq!(patch.columns[0].data_type, DataType::Int);

        assert!(parse_schema_patch("not json").is_err());
        assert!(parse_schema_patch(r#"{"columns":[]}"#).is_err());
    }

    #[test]
    fn test_validate_added_columns() {
        let existing = vec![Column::primary("id", DataType::BigInt)];
        let dup = vec![Column::new("ID", DataType::Int)];
        assert!(validate_added_columns(&existing, &dup).is_err());

        let pk = vec![Column::primary("k2", DataType::Int)];
        assert!(validate_added_columns(&existing, &pk).is_err());

        let ok = vec![Column::new("age", DataType::Int)];
        validate_added_columns(&existing, &ok).unwrap();
    }
}
