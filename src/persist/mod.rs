pub mod highscore;
pub mod results;

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::persist::highscore::{HighscoreEntry, Highscores};
use crate::persist::results::{GameRecord, ResultLog};

/// Process-wide persistence sink: ranked highscores plus the raw result log
#[derive(Debug, Default)]
pub struct Persistence {
    highscores: Mutex<Highscores>,
    results: Mutex<ResultLog>,
}

impl Persistence {
    pub fn new(result_log_path: Option<PathBuf>) -> Self {
        Self {
            highscores: Mutex::new(Highscores::default()),
            results: Mutex::new(ResultLog::new(result_log_path)),
        }
    }

    /// Record a finished game in both the ranked table and the raw log
    pub fn record_game(&self, guard_win: bool, winners: Vec<String>, elapsed: Duration) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let elapsed_secs = elapsed.as_secs_f64();

        self.highscores.lock().record(
            guard_win,
            HighscoreEntry {
                names: winners.clone(),
                elapsed_secs,
                timestamp,
            },
        );
        self.results.lock().append(GameRecord {
            timestamp,
            elapsed_secs,
            guard_win,
            winners,
        });
    }

    /// Formatted reply body for `gethighscores`
    pub fn highscores_compact(&self) -> String {
        self.highscores.lock().format_compact()
    }

    /// Raw JSON lines for `getresults`
    pub fn result_lines(&self) -> Vec<String> {
        self.results.lock().raw_lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_game_updates_both_sinks() {
        let persist = Persistence::new(None);
        persist.record_game(true, vec!["Alice".to_string()], Duration::from_secs(75));

        assert_eq!(persist.result_lines().len(), 1);
        assert!(persist.highscores_compact().starts_with("1.Alice="));
    }

    #[test]
    fn test_goat_team_entry() {
        let persist = Persistence::new(None);
        persist.record_game(
            false,
            vec!["Bob".to_string(), "Carol".to_string()],
            Duration::from_secs(60),
        );
        assert_eq!(persist.highscores_compact(), "|1.Bob+Carol=60.0");
    }
}
