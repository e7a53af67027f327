use std::time::{Duration, Instant};

/// Elapsed-time gate; rate-limits station activation per lobby
#[derive(Debug, Clone)]
pub struct Cooldown {
    duration: Duration,
    started_at: Option<Instant>,
}

impl Cooldown {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started_at: None,
        }
    }

    /// (Re)start the gate
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Whether less than the full duration has elapsed since the last start
    pub fn active(&self) -> bool {
        self.started_at.is_some_and(|t| t.elapsed() < self.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_before_first_start() {
        let cooldown = Cooldown::new(Duration::from_secs(30));
        assert!(!cooldown.active());
    }

    #[test]
    fn test_active_after_start() {
        let mut cooldown = Cooldown::new(Duration::from_secs(30));
        cooldown.start();
        assert!(cooldown.active());
    }

    #[test]
    fn test_expires() {
        let mut cooldown = Cooldown::new(Duration::from_millis(5));
        cooldown.start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(!cooldown.active());
    }

    #[test]
    fn test_restart_rearms() {
        let mut cooldown = Cooldown::new(Duration::from_millis(50));
        cooldown.start();
        std::thread::sleep(Duration::from_millis(2));
        cooldown.start();
        assert!(cooldown.active());
    }
}
