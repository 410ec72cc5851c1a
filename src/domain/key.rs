// Storage key construction with sanitized segments

use crate::errors::{AppError, Result};
use std::fmt;

const MAX_SEGMENT_LEN: usize = 256;

/// One sanitized component of a storage key.
///
/// Bytes outside `[A-Za-z0-9._~/@+=-]` are percent-encoded, so the key
/// separator `:` never appears inside a segment and two distinct inputs
/// never map to the same segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySegment(String);

impl KeySegment {
    pub fn new(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(AppError::MalformedKey("empty key segment".to_string()));
        }
        if raw.len() > MAX_SEGMENT_LEN {
            return Err(AppError::MalformedKey(format!(
                "key segment longer than {} bytes",
                MAX_SEGMENT_LEN
            )));
        }

        let mut encoded = String::with_capacity(raw.len());
        for byte in raw.bytes() {
            if is_plain(byte) {
                encoded.push(byte as char);
            } else {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }

        Ok(Self(encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(byte, b'.' | b'_' | b'~' | b'/' | b'@' | b'+' | b'=' | b'-')
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the namespaced keys for every piece of per-identifier state
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: KeySegment,
}

impl KeyBuilder {
    pub fn new(namespace: &str) -> Result<Self> {
        let namespace = KeySegment::new(namespace)
            .map_err(|e| AppError::Configuration(format!("namespace: {}", e)))?;
        Ok(Self { namespace })
    }

    pub fn sliding_window(&self, identifier: &KeySegment, route: &KeySegment) -> String {
        format!("{}:sliding_window:{}:{}", self.namespace, identifier, route)
    }

    pub fn token_bucket(&self, identifier: &KeySegment, route: &KeySegment) -> String {
        format!("{}:token_bucket:{}:{}", self.namespace, identifier, route)
    }

    pub fn violations(&self, identifier: &KeySegment) -> String {
        format!("{}:violations:{}", self.namespace, identifier)
    }

    pub fn blocked(&self, identifier: &KeySegment) -> String {
        format!("{}:blocked:{}", self.namespace, identifier)
    }
}
