//! Content fingerprints: the cache key for one node instance.
//!
//! A fingerprint digests the step identity and version, the canonical form
//! of every literal input, and the ordered fingerprints of every upstream
//! input. Identical inputs always produce identical fingerprints, across
//! processes and machines, so a populated run ledger can be consulted from
//! any later run. A change to any ancestor input changes the ancestor's
//! fingerprint and, through the upstream section, every descendant's.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use cascade_core::{StepKey, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A hex-encoded SHA-256 content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// The inputs digested into a [`Fingerprint`].
///
/// Literal values must already be in their canonical form — file-typed
/// inputs are replaced by their content hash (see [`hash_file`]) before
/// fingerprinting, so moving a file does not invalidate the cache but
/// editing it does.
#[derive(Debug)]
pub struct FingerprintInput<'a> {
    /// The step implementation key.
    pub step: &'a StepKey,
    /// The step implementation version.
    pub step_version: &'a Version,
    /// Canonicalized literal inputs, keyed by port.
    pub literals: &'a BTreeMap<String, serde_json::Value>,
    /// Upstream fingerprints, keyed by port, ordered within each port.
    pub upstream: &'a BTreeMap<String, Vec<Fingerprint>>,
}

impl Fingerprint {
    /// Digest the given inputs into a fingerprint.
    ///
    /// Sections and entries are separated by control bytes that cannot
    /// appear in the canonical JSON encoding, so distinct input shapes can
    /// never collide by concatenation.
    #[must_use]
    pub fn compute(input: &FingerprintInput<'_>) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(input.step.as_str().as_bytes());
        hasher.update([0x00]);
        hasher.update(input.step_version.to_string().as_bytes());
        hasher.update([0x00]);

        for (port, value) in input.literals {
            hasher.update(port.as_bytes());
            hasher.update([0x01]);
            hasher.update(canonical_json(value).as_bytes());
            hasher.update([0x00]);
        }

        hasher.update([0x02]);
        for (port, fingerprints) in input.upstream {
            hasher.update(port.as_bytes());
            hasher.update([0x01]);
            for fp in fingerprints {
                hasher.update(fp.as_str().as_bytes());
                hasher.update([0x03]);
            }
            hasher.update([0x00]);
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Get the hex digest string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialize a JSON value canonically: object keys sorted, fixed number
/// formatting, no whitespace.
///
/// The canonical form is stable across process restarts, which is what
/// makes fingerprints comparable between runs.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => write_escaped(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            // Sort keys so insertion order never leaks into the digest.
            let sorted: BTreeMap<&String, &serde_json::Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Hash a file's content (hex SHA-256).
///
/// Used to canonicalize file-typed inputs: the digest, not the path, enters
/// the fingerprint.
pub fn hash_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn step() -> StepKey {
        StepKey::new("add").unwrap()
    }

    fn fingerprint_of(
        literals: &BTreeMap<String, serde_json::Value>,
        upstream: &BTreeMap<String, Vec<Fingerprint>>,
    ) -> Fingerprint {
        Fingerprint::compute(&FingerprintInput {
            step: &step(),
            step_version: &Version::new(0, 1, 0),
            literals,
            upstream,
        })
    }

    #[test]
    fn identical_inputs_identical_fingerprints() {
        let literals = BTreeMap::from([("a".to_string(), serde_json::json!(3))]);
        let upstream = BTreeMap::new();
        assert_eq!(
            fingerprint_of(&literals, &upstream),
            fingerprint_of(&literals, &upstream)
        );
    }

    #[test]
    fn literal_change_changes_fingerprint() {
        let upstream = BTreeMap::new();
        let a = fingerprint_of(
            &BTreeMap::from([("a".to_string(), serde_json::json!(3))]),
            &upstream,
        );
        let b = fingerprint_of(
            &BTreeMap::from([("a".to_string(), serde_json::json!(4))]),
            &upstream,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn step_version_changes_fingerprint() {
        let literals = BTreeMap::new();
        let upstream = BTreeMap::new();
        let v1 = Fingerprint::compute(&FingerprintInput {
            step: &step(),
            step_version: &Version::new(0, 1, 0),
            literals: &literals,
            upstream: &upstream,
        });
        let v2 = Fingerprint::compute(&FingerprintInput {
            step: &step(),
            step_version: &Version::new(0, 2, 0),
            literals: &literals,
            upstream: &upstream,
        });
        assert_ne!(v1, v2);
    }

    #[test]
    fn upstream_fingerprint_change_propagates() {
        let literals = BTreeMap::new();
        let up_a = fingerprint_of(
            &BTreeMap::from([("x".to_string(), serde_json::json!(1))]),
            &BTreeMap::new(),
        );
        let up_b = fingerprint_of(
            &BTreeMap::from([("x".to_string(), serde_json::json!(2))]),
            &BTreeMap::new(),
        );

        let child_a = fingerprint_of(
            &literals,
            &BTreeMap::from([("in".to_string(), vec![up_a])]),
        );
        let child_b = fingerprint_of(
            &literals,
            &BTreeMap::from([("in".to_string(), vec![up_b])]),
        );
        assert_ne!(child_a, child_b);
    }

    #[test]
    fn upstream_order_matters_for_gather() {
        let up_a = fingerprint_of(
            &BTreeMap::from([("x".to_string(), serde_json::json!(1))]),
            &BTreeMap::new(),
        );
        let up_b = fingerprint_of(
            &BTreeMap::from([("x".to_string(), serde_json::json!(2))]),
            &BTreeMap::new(),
        );

        let forward = fingerprint_of(
            &BTreeMap::new(),
            &BTreeMap::from([("items".to_string(), vec![up_a.clone(), up_b.clone()])]),
        );
        let reversed = fingerprint_of(
            &BTreeMap::new(),
            &BTreeMap::from([("items".to_string(), vec![up_b, up_a])]),
        );
        assert_ne!(forward, reversed);
    }

    #[test]
    fn canonical_json_sorts_object_keys() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_nested_structures() {
        let value = serde_json::json!({
            "outer": {"z": [1, 2, {"y": null, "x": true}], "a": "s"},
        });
        assert_eq!(
            canonical_json(&value),
            r#"{"outer":{"a":"s","z":[1,2,{"x":true,"y":null}]}}"#
        );
    }

    #[test]
    fn canonical_json_escapes_strings() {
        let value = serde_json::json!("line\nbreak \"quoted\"");
        assert_eq!(canonical_json(&value), r#""line\nbreak \"quoted\"""#);
    }

    #[test]
    fn hash_file_is_content_based() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("a.txt");
        let path_b = dir.path().join("b.txt");

        std::fs::File::create(&path_a)
            .unwrap()
            .write_all(b"same content")
            .unwrap();
        std::fs::File::create(&path_b)
            .unwrap()
            .write_all(b"same content")
            .unwrap();

        // Different paths, same content, same hash.
        assert_eq!(hash_file(&path_a).unwrap(), hash_file(&path_b).unwrap());

        std::fs::File::create(&path_b)
            .unwrap()
            .write_all(b"different content")
            .unwrap();
        assert_ne!(hash_file(&path_a).unwrap(), hash_file(&path_b).unwrap());
    }

    #[test]
    fn hash_file_missing_is_an_error() {
        assert!(hash_file("/nonexistent/cascade/file").is_err());
    }

    #[test]
    fn fingerprint_serde_roundtrip() {
        let fp = fingerprint_of(&BTreeMap::new(), &BTreeMap::new());
        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }
}
