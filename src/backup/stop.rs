use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative early-stop signal shared by the copy workers.
///
/// Workers poll [`StopToken::is_stopped`] before starting an entry, so an entry
/// that already began is always carried to its atomic commit.
#[derive(Clone, Debug, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                tracing::warn!("Deadline reached, stopping backup");
                self.flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_shared_between_clones() {
        let token = StopToken::new();
        let clone = token.clone();
        assert!(!clone.is_stopped());
        token.stop();
        assert!(clone.is_stopped());
    }

    #[test]
    fn test_elapsed_deadline_stops() {
        let token = StopToken::with_deadline(Duration::ZERO);
        assert!(token.is_stopped());
    }

    #[test]
    fn test_far_deadline_does_not_stop() {
        let token = StopToken::with_deadline(Duration::from_secs(3600));
        assert!(!token.is_stopped());
    }
}
