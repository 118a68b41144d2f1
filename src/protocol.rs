//! Line protocol parser and executor.
//!
//! Each request is a single line of whitespace-separated tokens; each
//! response is a single line. `process` is a pure function over the line
//! and the cache: it performs no I/O and its only side effect is the
//! cache mutation implied by ADD and DELETE.
//!
//! Commands:
//! - `ADD <key> <value>`: store, subject to key/value size limits
//! - `GET <key>`: stored value, or the empty string if absent
//! - `GET ALL`: comma-joined list of all keys, unspecified order
//! - `DELETE <key>`: remove; error if the key was absent
//! - `HEARTBEAT`: liveness probe, always `OK`
//!
//! All failures are reported as single-line responses prefixed `ERROR`.

use crate::cache::ShardedCache;

/// Size limits applied to ADD arguments, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

/// Execute one request line against the cache, producing one response line.
///
/// The verb is matched case-insensitively. A blank line has an empty verb
/// and falls through to the unknown-command response.
pub fn process(line: &str, cache: &ShardedCache, limits: &Limits) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();

    let verb = parts.first().map(|v| v.to_uppercase()).unwrap_or_default();

    match verb.as_str() {
        "ADD" => {
            if parts.len() != 3 {
                return "ERROR Invalid ADD format".to_string();
            }
            let (key, value) = (parts[1], parts[2]);
            if key.len() > limits.max_key_size {
                return "ERROR key too large".to_string();
            }
            if value.len() > limits.max_value_size {
                return "ERROR value too large".to_string();
            }
            cache.put(key, value);
            "OK".to_string()
        }
        "GET" => {
            if parts.len() != 2 {
                return "ERROR Invalid GET format".to_string();
            }
            let key = parts[1];
            if key.eq_ignore_ascii_case("ALL") {
                cache.all_keys().join(",")
            } else {
                // Absence is not an error
                cache.get(key).unwrap_or_default()
            }
        }
        "DELETE" => {
            if parts.len() != 2 {
                return "ERROR Invalid DELETE format".to_string();
            }
            if cache.remove(parts[1]) {
                "OK".to_string()
            } else {
                "ERROR Invalid key".to_string()
            }
        }
        "HEARTBEAT" => "OK".to_string(),
        _ => "ERROR Unknown command".to_string(),
    }
}
