//! The run ledger: persisted fingerprint → outcome records.
//!
//! One record per completed instance, keyed by fingerprint, appended as JSON
//! lines under the run root. The ledger outlives any single run: re-invoking
//! a workflow against the same root resumes from it, and unchanged work is
//! served from it across runs.
//!
//! Ledger I/O failures are cache errors, not run errors: a read problem is
//! treated as a miss and a write problem is logged and tolerated, so a
//! corrupt or unwritable ledger degrades to recomputation instead of
//! aborting the run.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use cascade_workflow::NodeState;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Subdirectory of the run root holding engine state.
pub const STATE_DIR: &str = ".cascade";

/// Ledger file name within [`STATE_DIR`].
pub const LEDGER_FILE: &str = "ledger.jsonl";

/// The persisted outcome of one node instance execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// The fingerprint this record is keyed by.
    pub fingerprint: Fingerprint,
    /// Terminal state of the execution (`Completed` or `Failed`).
    pub status: NodeState,
    /// Output values per port (empty on failure).
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Error message when the execution failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Whether this record may be served as a cache hit. Steps that
    /// disclaim determinism write non-cacheable records.
    #[serde(default = "default_true")]
    pub cacheable: bool,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution finished.
    pub finished_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl RunRecord {
    /// Record a successful execution.
    #[must_use]
    pub fn success(
        fingerprint: Fingerprint,
        outputs: BTreeMap<String, serde_json::Value>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            status: NodeState::Completed,
            outputs,
            error: None,
            cacheable: true,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Record a failed execution.
    #[must_use]
    pub fn failure(
        fingerprint: Fingerprint,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            status: NodeState::Failed,
            outputs: BTreeMap::new(),
            error: Some(error.into()),
            cacheable: true,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Mark this record as non-cacheable.
    #[must_use]
    pub fn non_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Returns `true` if this record can satisfy a cache lookup.
    ///
    /// Only cacheable successes are served as hits — a recorded failure is
    /// retried on the next run rather than memoized as permanent.
    #[must_use]
    pub fn is_cache_hit(&self) -> bool {
        self.cacheable && self.status == NodeState::Completed
    }
}

/// Fingerprint-keyed store of [`RunRecord`]s with JSON-lines persistence.
#[derive(Debug)]
pub struct RunLedger {
    path: PathBuf,
    index: RwLock<HashMap<Fingerprint, RunRecord>>,
    file: Mutex<Option<File>>,
}

impl RunLedger {
    /// Open (or create) the ledger under the given run root.
    ///
    /// Existing records are loaded into the in-memory index; unparsable
    /// lines are skipped with a warning rather than failing the open.
    pub fn open(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = root.as_ref().join(STATE_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(LEDGER_FILE);

        // A ledger that cannot be read back is a cache error, not a run
        // error: degrade to an empty index and recompute.
        let mut index = HashMap::new();
        if path.exists() {
            match File::open(&path) {
                Ok(file) => {
                    for (line_no, line) in BufReader::new(file).lines().enumerate() {
                        let line = match line {
                            Ok(line) => line,
                            Err(error) => {
                                tracing::warn!(
                                    path = %path.display(),
                                    %error,
                                    "stopping ledger read early"
                                );
                                break;
                            }
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RunRecord>(&line) {
                            Ok(record) => {
                                // Later lines supersede earlier ones for the same key.
                                index.insert(record.fingerprint.clone(), record);
                            }
                            Err(error) => {
                                tracing::warn!(
                                    path = %path.display(),
                                    line = line_no + 1,
                                    %error,
                                    "skipping corrupt ledger record"
                                );
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "cannot read ledger");
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            index: RwLock::new(index),
            file: Mutex::new(Some(file)),
        })
    }

    /// An in-memory ledger with no persistence, for runs without a root.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            index: RwLock::new(HashMap::new()),
            file: Mutex::new(None),
        }
    }

    /// Look up the record for a fingerprint.
    #[must_use]
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<RunRecord> {
        self.index.read().get(fingerprint).cloned()
    }

    /// Look up a record that can be served as a cache hit.
    #[must_use]
    pub fn cached(&self, fingerprint: &Fingerprint) -> Option<RunRecord> {
        self.lookup(fingerprint).filter(RunRecord::is_cache_hit)
    }

    /// Store a record, superseding any previous record for the fingerprint.
    ///
    /// Persistence is best-effort: an append failure is logged as a cache
    /// error and the record stays available in memory for this run.
    pub fn record(&self, record: RunRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => {
                let mut guard = self.file.lock();
                if let Some(file) = guard.as_mut()
                    && let Err(error) = writeln!(file, "{line}")
                {
                    tracing::warn!(
                        path = %self.path.display(),
                        %error,
                        "failed to append ledger record"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to serialize ledger record");
            }
        }
        self.index.write().insert(record.fingerprint.clone(), record);
    }

    /// Number of records in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns `true` if the ledger holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::{StepKey, Version};
    use crate::fingerprint::FingerprintInput;
    use pretty_assertions::assert_eq;

    fn fingerprint(tag: i64) -> Fingerprint {
        let step = StepKey::new("test").unwrap();
        let literals = BTreeMap::from([("tag".to_string(), serde_json::json!(tag))]);
        let upstream = BTreeMap::new();
        Fingerprint::compute(&FingerprintInput {
            step: &step,
            step_version: &Version::new(0, 1, 0),
            literals: &literals,
            upstream: &upstream,
        })
    }

    fn success(tag: i64) -> RunRecord {
        RunRecord::success(
            fingerprint(tag),
            BTreeMap::from([("out".to_string(), serde_json::json!(tag))]),
            Utc::now(),
        )
    }

    #[test]
    fn record_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RunLedger::open(dir.path()).unwrap();

        assert!(ledger.is_empty());
        ledger.record(success(1));

        let record = ledger.lookup(&fingerprint(1)).unwrap();
        assert_eq!(record.status, NodeState::Completed);
        assert_eq!(record.outputs["out"], serde_json::json!(1));
        assert!(ledger.lookup(&fingerprint(2)).is_none());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = RunLedger::open(dir.path()).unwrap();
            ledger.record(success(1));
            ledger.record(success(2));
        }

        let reopened = RunLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.lookup(&fingerprint(1)).is_some());
        assert!(reopened.lookup(&fingerprint(2)).is_some());
    }

    #[test]
    fn failure_records_are_not_cache_hits() {
        let ledger = RunLedger::in_memory();
        let record = RunRecord::failure(fingerprint(1), "tool exited 1", Utc::now());
        assert!(!record.is_cache_hit());
        ledger.record(record);

        assert!(ledger.lookup(&fingerprint(1)).is_some());
        assert!(ledger.cached(&fingerprint(1)).is_none());
    }

    #[test]
    fn non_cacheable_records_are_not_cache_hits() {
        let ledger = RunLedger::in_memory();
        ledger.record(success(1).non_cacheable());
        assert!(ledger.cached(&fingerprint(1)).is_none());
        assert!(ledger.lookup(&fingerprint(1)).is_some());
    }

    #[test]
    fn cached_returns_successful_records() {
        let ledger = RunLedger::in_memory();
        ledger.record(success(1));
        let hit = ledger.cached(&fingerprint(1)).unwrap();
        assert!(hit.is_cache_hit());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = RunLedger::open(dir.path()).unwrap();
            ledger.record(success(1));
        }

        // Corrupt the file by appending garbage.
        let path = dir.path().join(STATE_DIR).join(LEDGER_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "this is not json").unwrap();

        let reopened = RunLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.lookup(&fingerprint(1)).is_some());
    }

    #[test]
    fn later_records_supersede_earlier() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = RunLedger::open(dir.path()).unwrap();
            ledger.record(RunRecord::failure(fingerprint(1), "flaky", Utc::now()));
            ledger.record(success(1));
        }

        let reopened = RunLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let record = reopened.lookup(&fingerprint(1)).unwrap();
        assert_eq!(record.status, NodeState::Completed);
    }

    #[test]
    fn in_memory_ledger_does_not_persist() {
        let ledger = RunLedger::in_memory();
        ledger.record(success(1));
        assert_eq!(ledger.len(), 1);
    }
}
