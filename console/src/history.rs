//! Per-instance command history
//!
//! Each instance keeps a bounded FIFO of the commands run against it. The
//! outer map lock is only held long enough to find or create an instance's
//! log, so appends for different instances never wait on each other.

use crate::config::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

/// Current wall-clock time in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// One executed command and what came back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    /// Server output, or the error text when `failed` is set
    pub response: String,
    #[serde(default)]
    pub failed: bool,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl CommandRecord {
    pub fn success(command: &str, response: &str) -> Self {
        Self {
            command: command.to_string(),
            response: response.to_string(),
            failed: false,
            timestamp: get_timestamp(),
        }
    }

    pub fn failure(command: &str, error: &str) -> Self {
        Self {
            command: command.to_string(),
            response: error.to_string(),
            failed: true,
            timestamp: get_timestamp(),
        }
    }
}

type Log = Arc<Mutex<VecDeque<CommandRecord>>>;

pub struct HistoryLedger {
    capacity: usize,
    logs: RwLock<HashMap<String, Log>>,
}

impl HistoryLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a record at the tail, evicting from the head beyond capacity
    pub async fn append(&self, instance: &str, record: CommandRecord) {
        let log = self.log_for(instance).await;
        let mut records = log.lock().await;

        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    /// Records oldest first; empty for an instance never seen
    pub async fn get(&self, instance: &str) -> Vec<CommandRecord> {
        let log = {
            let logs = self.logs.read().await;
            logs.get(instance).cloned()
        };

        match log {
            Some(log) => log.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn clear(&self, instance: &str) {
        let log = {
            let logs = self.logs.read().await;
            logs.get(instance).cloned()
        };

        if let Some(log) = log {
            log.lock().await.clear();
        }
    }

    pub async fn len(&self, instance: &str) -> usize {
        let log = {
            let logs = self.logs.read().await;
            logs.get(instance).cloned()
        };

        match log {
            Some(log) => log.lock().await.len(),
            None => 0,
        }
    }

    /// Instances that have had at least one record appended
    pub async fn instances(&self) -> Vec<String> {
        let logs = self.logs.read().await;
        let mut names: Vec<String> = logs.keys().cloned().collect();
        names.sort();
        names
    }

    async fn log_for(&self, instance: &str) -> Log {
        if let Some(log) = self.logs.read().await.get(instance) {
            return Arc::clone(log);
        }

        let mut logs = self.logs.write().await;
        Arc::clone(logs.entry(instance.to_string()).or_default())
    }
}

impl Default for HistoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> CommandRecord {
        CommandRecord::success(&format!("cmd {}", n), &format!("out {}", n))
    }

    #[tokio::test]
    async fn test_unknown_instance_is_empty() {
        let ledger = HistoryLedger::default();

        assert!(ledger.get("nowhere").await.is_empty());
        assert_eq!(ledger.len("nowhere").await, 0);
        ledger.clear("nowhere").await;
    }

    #[tokio::test]
    async fn test_append_keeps_insertion_order() {
        let ledger = HistoryLedger::default();

        for n in 0..3 {
            ledger.append("island", record(n)).await;
        }

        let commands: Vec<String> = ledger
            .get("island")
            .await
            .into_iter()
            .map(|r| r.command)
            .collect();
        assert_eq!(commands, vec!["cmd 0", "cmd 1", "cmd 2"]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let ledger = HistoryLedger::default();

        for n in 0..250 {
            ledger.append("island", record(n)).await;
        }

        let records = ledger.get("island").await;
        assert_eq!(records.len(), 100);
        assert_eq!(records.first().unwrap().command, "cmd 150");
        assert_eq!(records.last().unwrap().command, "cmd 249");
        for pair in records.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let ledger = HistoryLedger::new(2);

        ledger.append("island", record(1)).await;
        ledger.append("ragnarok", record(2)).await;
        ledger.clear("island").await;

        assert!(ledger.get("island").await.is_empty());
        let remaining = ledger.get("ragnarok").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].command, "cmd 2");
        assert_eq!(ledger.instances().await, vec!["island", "ragnarok"]);
    }

    #[tokio::test]
    async fn test_failure_records_are_flagged() {
        let ledger = HistoryLedger::default();
        ledger
            .append("island", CommandRecord::failure("saveworld", "timed out"))
            .await;

        let records = ledger.get("island").await;
        assert!(records[0].failed);
        assert_eq!(records[0].response, "timed out");
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let ledger = Arc::new(HistoryLedger::new(1000));
        let mut handles = Vec::new();

        for task in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                for n in 0..50 {
                    ledger.append("island", record(task * 100 + n)).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.len("island").await, 400);
    }

    #[test]
    fn test_record_serializes_like_panel_expects() {
        let record = CommandRecord {
            command: "saveworld".to_string(),
            response: "World Saved".to_string(),
            failed: false,
            timestamp: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["command"], "saveworld");
        assert_eq!(json["response"], "World Saved");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);

        let parsed: CommandRecord = serde_json::from_str(
            r#"{"command":"listplayers","response":"No Players Connected","timestamp":5}"#,
        )
        .unwrap();
        assert!(!parsed.failed);
    }

    #[test]
    fn test_timestamp_advances() {
        let first = get_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(get_timestamp() > first);
    }
}
