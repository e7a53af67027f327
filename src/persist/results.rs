//! Append-only structured result log.
//!
//! One JSON record per finished game. Records are mirrored in memory for the
//! `getresults` query; the on-disk file (if configured) is an append-only
//! archive. Write failures are logged and never surfaced to gameplay.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::error;

/// One finished game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    /// Unix timestamp of the game end
    pub timestamp: u64,
    pub elapsed_secs: f64,
    pub guard_win: bool,
    /// Names on the winning side
    pub winners: Vec<String>,
}

/// Append-only result sink with an in-memory mirror
#[derive(Debug, Default)]
pub struct ResultLog {
    path: Option<PathBuf>,
    records: Vec<GameRecord>,
}

impl ResultLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            records: Vec::new(),
        }
    }

    /// Append a record. Disk failures are logged, not propagated: game-over
    /// delivery to clients must not depend on disk success.
    pub fn append(&mut self, record: GameRecord) {
        if let Some(path) = &self.path {
            if let Err(e) = append_line(path, &record) {
                error!(path = %path.display(), "failed to persist game record: {}", e);
            }
        }
        self.records.push(record);
    }

    /// All records as their JSON lines, oldest first
    pub fn raw_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|r| serde_json::to_string(r).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn append_line(path: &PathBuf, record: &GameRecord) -> std::io::Result<()> {
    let line = serde_json::to_string(record)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(winner: &str, guard_win: bool) -> GameRecord {
        GameRecord {
            timestamp: 1_700_000_000,
            elapsed_secs: 74.5,
            guard_win,
            winners: vec![winner.to_string()],
        }
    }

    #[test]
    fn test_append_in_memory() {
        let mut log = ResultLog::new(None);
        log.append(record("Alice", true));
        log.append(record("Bob", false));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_raw_lines_are_json() {
        let mut log = ResultLog::new(None);
        log.append(record("Alice", true));

        let lines = log.raw_lines();
        assert_eq!(lines.len(), 1);
        let parsed: GameRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed.winners, vec!["Alice"]);
        assert!(parsed.guard_win);
    }

    #[test]
    fn test_bad_path_does_not_panic() {
        // Directory that does not exist; the append must still land in memory
        let mut log = ResultLog::new(Some(PathBuf::from("/nonexistent-dir/results.jsonl")));
        log.append(record("Alice", true));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_file_append() {
        let path = std::env::temp_dir().join(format!("goat-escape-results-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut log = ResultLog::new(Some(path.clone()));
        log.append(record("Alice", true));
        log.append(record("Bob", false));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
