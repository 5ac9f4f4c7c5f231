use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock whose readings never go backwards, shared by row
/// timestamps and event payloads.
#[derive(Debug, Default)]
pub struct EngineClock {
    last_ms: AtomicI64,
}

impl EngineClock {
    pub fn new() -> Self {
        Self {
            last_ms: AtomicI64::new(0),
        }
    }

    pub fn now_ms(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let prev = self.last_ms.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_nondecreasing() {
        let clock = EngineClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let now = clock.now_ms();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_now_ms_holds_ahead_of_wall() {
        let clock = EngineClock::new();
        let future = clock.now_ms() + 10_000;
        clock.last_ms.store(future, Ordering::SeqCst);
        assert!(clock.now_ms() >= future);
    }
}
