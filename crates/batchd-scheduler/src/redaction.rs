//! Protected key redaction
//!
//! Credentials only live below `access` and `auth` mappings. Inside such a
//! section every `password` key and every key starting with `_` has its value
//! replaced by a marker holding the last 8 hex digits of a salted PBKDF2
//! digest, e.g. `{{a1b2c3d4}}`. The marker allows equality checks between
//! records but not recovery of the value.

use batchd_core::RedactionConfig;
use pbkdf2::pbkdf2_hmac;
use serde_json::Value;
use sha2::Sha256;

const VOIDED_FLAG: &str = "protectedKeysVoided";
const MARKER_HEX_LEN: usize = 8;

/// Keys that open a section in which protected keys are redacted
fn opens_protected_section(key: &str) -> bool {
    key == "access" || key == "auth"
}

fn is_protected_key(key: &str) -> bool {
    key == "password" || key.starts_with('_')
}

/// Irreversibly replaces protected values in documents
#[derive(Debug, Clone)]
pub struct Redactor {
    salt: Vec<u8>,
    iterations: u32,
}

impl Redactor {
    pub fn new(config: &RedactionConfig) -> Self {
        Self {
            salt: config.salt.as_bytes().to_vec(),
            iterations: config.iterations,
        }
    }

    /// Marker replacing `value`
    pub fn marker(&self, value: &str) -> String {
        let mut digest = [0u8; 32];
        pbkdf2_hmac::<Sha256>(value.as_bytes(), &self.salt, self.iterations, &mut digest);
        let hex = hex::encode(digest);
        format!("{{{{{}}}}}", &hex[hex.len() - MARKER_HEX_LEN..])
    }

    /// Redact a whole record unless it is already flagged as voided, then
    /// flag it. Returns the number of values replaced.
    pub fn void_record(&self, document: &mut Value) -> usize {
        let voided = document
            .get(VOIDED_FLAG)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if voided {
            return 0;
        }
        let replaced = self.redact(document);
        if let Some(object) = document.as_object_mut() {
            object.insert(VOIDED_FLAG.to_string(), Value::Bool(true));
        }
        replaced
    }

    /// Redact every protected value in `document`, returning how many were
    /// replaced. Markers are hashed again; use `void_record` for reruns.
    pub fn redact(&self, document: &mut Value) -> usize {
        let mut replaced = 0;
        self.walk(document, false, &mut replaced);
        replaced
    }

    fn walk(&self, value: &mut Value, allowed: bool, replaced: &mut usize) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if allowed && is_protected_key(key) {
                        if let Some(marker) = self.mask(child) {
                            *child = Value::String(marker);
                            *replaced += 1;
                        }
                    } else {
                        let child_allowed = allowed || opens_protected_section(key);
                        self.walk(child, child_allowed, replaced);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item, allowed, replaced);
                }
            }
            _ => {}
        }
    }

    /// Marker for a protected value; `None` for null
    fn mask(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(self.marker(s)),
            other => Some(self.marker(&other.to_string())),
        }
    }
}
