// Time Provider Port (for testability)

/// Clock interface. Deadlines are second-granular epoch values, so this is
/// all the engine ever asks of a clock.
pub trait TimeProvider: Send + Sync {
    /// Current time in seconds since epoch.
    fn now_secs(&self) -> i64;
}

/// System clock (production).
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

pub mod mocks {
    use super::TimeProvider;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Frozen clock for deterministic deadline and header tests.
    pub struct FrozenTimeProvider {
        now: AtomicI64,
    }

    impl FrozenTimeProvider {
        pub fn new(now: i64) -> Self {
            Self {
                now: AtomicI64::new(now),
            }
        }

        pub fn advance(&self, secs: i64) {
            self.now.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl TimeProvider for FrozenTimeProvider {
        fn now_secs(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}
