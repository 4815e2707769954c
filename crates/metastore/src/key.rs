//! Key range helpers for prefix scans

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// Trailing `0xFF` bytes are dropped and the last remaining byte is
/// incremented. Returns `None` when the prefix is empty or made only of
/// `0xFF` bytes (no finite upper bound exists).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last != 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// `[start, limit)` covering exactly the keys that start with `prefix`.
///
/// For an unbounded prefix the limit is empty, which every backend treats
/// as "scan to the end of the key space".
pub fn prefix_range(prefix: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (prefix.to_vec(), prefix_end(prefix).unwrap_or_default())
}
