//! Outcome feedback
//!
//! Ground-truth labels recorded against past verdicts. The JSON-lines store
//! is append-only and chains each record to the previous one with a SHA-256
//! hash, so edits to the history are detectable.

use crate::config::FeedbackConfig;
use crate::metrics::FEEDBACK_RECORDS_TOTAL;
use crate::types::RiskLevel;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Verdict paired with its ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Transaction
    pub transaction_id: String,
    /// Paying user
    pub user_id: String,
    /// Verdict returned at evaluation time
    pub predicted_fraud: bool,
    /// Level returned at evaluation time
    pub risk_level: RiskLevel,
    /// Aggregate score returned at evaluation time
    pub aggregate_score: f64,
    /// Ground truth
    pub actual_fraud: bool,
    /// When the label arrived
    pub recorded_at: DateTime<Utc>,
}

/// Append-only outcome store
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Append a record
    async fn append(&self, record: OutcomeRecord) -> Result<()>;

    /// Every record, oldest first
    async fn read_all(&self) -> Result<Vec<OutcomeRecord>>;
}

/// Record as written to the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedRecord {
    /// Record
    #[serde(flatten)]
    pub record: OutcomeRecord,
    /// Hash of the previous line
    pub previous_hash: String,
    /// Hash of this line
    pub hash: String,
}

impl ChainedRecord {
    fn new(record: OutcomeRecord, previous_hash: String) -> Self {
        let mut chained = Self {
            record,
            previous_hash,
            hash: String::new(),
        };
        chained.hash = chained.compute_hash();
        chained
    }

    fn compute_hash(&self) -> String {
        let r = &self.record;
        let mut hasher = Sha256::new();

        hasher.update(r.transaction_id.as_bytes());
        hasher.update(r.user_id.as_bytes());
        hasher.update([u8::from(r.predicted_fraud), u8::from(r.actual_fraud)]);
        hasher.update(r.risk_level.as_str().as_bytes());
        hasher.update(r.aggregate_score.to_bits().to_be_bytes());
        hasher.update(r.recorded_at.to_rfc3339().as_bytes());
        hasher.update(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Verify record hash
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

struct LogState {
    file: tokio::fs::File,
    last_hash: String,
}

/// JSON-lines feedback store
pub struct JsonlFeedbackStore {
    path: PathBuf,
    hash_chain: bool,
    state: Mutex<LogState>,
}

impl JsonlFeedbackStore {
    /// Open (or create) the log
    pub fn open(config: &FeedbackConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;

        let last_hash = Self::last_hash(&config.path)?;

        Ok(Self {
            path: config.path.clone(),
            hash_chain: config.hash_chain,
            state: Mutex::new(LogState {
                file: tokio::fs::File::from_std(file),
                last_hash,
            }),
        })
    }

    fn last_hash(path: &Path) -> Result<String> {
        let reader = BufReader::new(File::open(path)?);
        let mut last = String::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chained: ChainedRecord = serde_json::from_str(&line)?;
            last = chained.hash;
        }
        Ok(last)
    }

    async fn read_chained(&self) -> Result<Vec<ChainedRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    /// Verify the hash chain
    pub async fn verify_integrity(&self) -> Result<bool> {
        if !self.hash_chain {
            return Ok(true);
        }

        let _guard = self.state.lock().await;
        let mut previous_hash = String::new();

        for (i, chained) in self.read_chained().await?.iter().enumerate() {
            if !chained.verify_hash() {
                return Err(Error::Feedback(format!(
                    "Record hash mismatch at line {}",
                    i + 1
                )));
            }
            if chained.previous_hash != previous_hash {
                return Err(Error::Feedback(format!(
                    "Hash chain broken at line {}",
                    i + 1
                )));
            }
            previous_hash = chained.hash.clone();
        }

        Ok(true)
    }
}

#[async_trait]
impl FeedbackStore for JsonlFeedbackStore {
    async fn append(&self, record: OutcomeRecord) -> Result<()> {
        let mut state = self.state.lock().await;

        let previous_hash = if self.hash_chain {
            state.last_hash.clone()
        } else {
            String::new()
        };
        let chained = ChainedRecord::new(record, previous_hash);

        let mut json = serde_json::to_string(&chained)?;
        json.push('\n');
        state.file.write_all(json.as_bytes()).await?;
        state.file.flush().await?;

        if self.hash_chain {
            state.last_hash = chained.hash;
        }

        FEEDBACK_RECORDS_TOTAL
            .with_label_values(&[if chained.record.actual_fraud { "fraud" } else { "legitimate" }])
            .inc();
        debug!(transaction_id = %chained.record.transaction_id, "Outcome recorded");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<OutcomeRecord>> {
        let _guard = self.state.lock().await;
        Ok(self.read_chained().await?.into_iter().map(|c| c.record).collect())
    }
}

/// In-process feedback store
#[derive(Debug, Default)]
pub struct MemoryFeedbackStore {
    records: Mutex<Vec<OutcomeRecord>>,
}

impl MemoryFeedbackStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn append(&self, record: OutcomeRecord) -> Result<()> {
        FEEDBACK_RECORDS_TOTAL
            .with_label_values(&[if record.actual_fraud { "fraud" } else { "legitimate" }])
            .inc();
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<OutcomeRecord>> {
        Ok(self.records.lock().await.clone())
    }
}

/// Confusion counts over recorded outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSummary {
    /// Blocked and fraudulent
    pub true_positives: u64,
    /// Blocked but legitimate
    pub false_positives: u64,
    /// Allowed and legitimate
    pub true_negatives: u64,
    /// Allowed but fraudulent
    pub false_negatives: u64,
}

impl FeedbackSummary {
    /// Count records
    pub fn from_records(records: &[OutcomeRecord]) -> Self {
        records.iter().fold(Self::default(), |mut s, r| {
            match (r.predicted_fraud, r.actual_fraud) {
                (true, true) => s.true_positives += 1,
                (true, false) => s.false_positives += 1,
                (false, false) => s.true_negatives += 1,
                (false, true) => s.false_negatives += 1,
            }
            s
        })
    }

    /// Number of records
    pub fn total(&self) -> u64 {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    /// Share of blocks that were fraud
    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Share of fraud that was blocked
    pub fn recall(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Share of legitimate traffic that was blocked
    pub fn false_positive_rate(&self) -> Option<f64> {
        ratio(self.false_positives, self.false_positives + self.true_negatives)
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, predicted: bool, actual: bool) -> OutcomeRecord {
        OutcomeRecord {
            transaction_id: id.to_string(),
            user_id: "user-1".to_string(),
            predicted_fraud: predicted,
            risk_level: if predicted { RiskLevel::High } else { RiskLevel::Low },
            aggregate_score: if predicted { 83.5 } else { 12.25 },
            actual_fraud: actual,
            recorded_at: Utc::now(),
        }
    }

    fn config(dir: &Path) -> FeedbackConfig {
        FeedbackConfig {
            path: dir.join("feedback.log"),
            hash_chain: true,
        }
    }

    #[tokio::test]
    async fn test_append_and_verify_chain() {
        let dir = tempdir().unwrap();
        let store = JsonlFeedbackStore::open(&config(dir.path())).unwrap();

        store.append(record("tx-1", true, true)).await.unwrap();
        store.append(record("tx-2", false, false)).await.unwrap();
        store.append(record("tx-3", true, false)).await.unwrap();

        assert!(store.verify_integrity().await.unwrap());
        assert_eq!(store.read_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_chain_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = JsonlFeedbackStore::open(&config(dir.path())).unwrap();
            store.append(record("tx-1", true, true)).await.unwrap();
        }
        let store = JsonlFeedbackStore::open(&config(dir.path())).unwrap();
        store.append(record("tx-2", false, true)).await.unwrap();
        assert!(store.verify_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_tampering_detected() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let store = JsonlFeedbackStore::open(&cfg).unwrap();
        store.append(record("tx-1", true, true)).await.unwrap();
        store.append(record("tx-2", false, false)).await.unwrap();

        let content = std::fs::read_to_string(&cfg.path).unwrap();
        std::fs::write(&cfg.path, content.replacen("\"actual_fraud\":true", "\"actual_fraud\":false", 1)).unwrap();

        assert!(matches!(store.verify_integrity().await, Err(Error::Feedback(_))));
    }

    #[test]
    fn test_summary_rates() {
        let records = vec![
            record("a", true, true),
            record("b", true, false),
            record("c", false, false),
            record("d", false, false),
            record("e", false, true),
        ];
        let summary = FeedbackSummary::from_records(&records);
        assert_eq!(summary.total(), 5);
        assert_eq!(summary.precision(), Some(0.5));
        assert_eq!(summary.recall(), Some(0.5));
        assert!((summary.false_positive_rate().unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(FeedbackSummary::default().precision(), None);
    }

    #[tokio::test]
    async fn test_scores_survive_reopen_exactly() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());

        // Spread of scores with long decimal expansions
        let mut written = Vec::new();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for i in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let mut r = record(&format!("tx-{}", i), i % 3 == 0, i % 5 == 0);
            r.aggregate_score = (seed >> 11) as f64 / (1u64 << 53) as f64 * 100.0;
            written.push(r);
        }
        written[0].aggregate_score = 39.430133835633676;

        {
            let store = JsonlFeedbackStore::open(&cfg).unwrap();
            for r in &written {
                store.append(r.clone()).await.unwrap();
            }
        }

        let reopened = JsonlFeedbackStore::open(&cfg).unwrap();
        assert_eq!(reopened.read_all().await.unwrap(), written);
        assert!(reopened.verify_integrity().await.unwrap());
    }
}
