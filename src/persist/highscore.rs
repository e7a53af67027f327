//! Ranked highscore tables.
//!
//! Two top-N tables, one per winning side, sorted ascending by elapsed game
//! time (faster is better).

use serde::{Deserialize, Serialize};

use crate::game::constants::highscore;

/// One finished game worth remembering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighscoreEntry {
    /// Winning player names (one guard, or the goat team)
    pub names: Vec<String>,
    /// Game duration in seconds
    pub elapsed_secs: f64,
    /// Unix timestamp of the game end
    pub timestamp: u64,
}

/// A single ranked table capped at a fixed top-N
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighscoreTable {
    entries: Vec<HighscoreEntry>,
}

impl HighscoreTable {
    /// Insert keeping ascending elapsed-time order; drops entries past top-N
    pub fn insert(&mut self, entry: HighscoreEntry) {
        let pos = self
            .entries
            .partition_point(|e| e.elapsed_secs <= entry.elapsed_secs);
        self.entries.insert(pos, entry);
        self.entries.truncate(highscore::TOP_N);
    }

    pub fn entries(&self) -> &[HighscoreEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Both ranked tables
#[derive(Debug, Clone, Default)]
pub struct Highscores {
    pub guard: HighscoreTable,
    pub goats: HighscoreTable,
}

impl Highscores {
    pub fn record(&mut self, guard_win: bool, entry: HighscoreEntry) {
        if guard_win {
            self.guard.insert(entry);
        } else {
            self.goats.insert(entry);
        }
    }

    /// One-line rendering for the `gethighscores` reply:
    /// `<guard table>|<goat table>`, each table `rank.name+name=secs` entries
    /// joined by commas.
    pub fn format_compact(&self) -> String {
        format!(
            "{}|{}",
            format_table(&self.guard),
            format_table(&self.goats)
        )
    }
}

fn format_table(table: &HighscoreTable) -> String {
    table
        .entries()
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}.{}={:.1}", i + 1, e.names.join("+"), e.elapsed_secs))
        .collect::<Vec<_>>()
        .join(",")
}
