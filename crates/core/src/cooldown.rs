use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::UserId;

/// Per-command minimum inter-invocation gap. Table-driven; unknown commands
/// fall back to the default gap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CooldownTable {
    gaps: HashMap<String, Duration>,
    default_gap: Duration,
}

impl Default for CooldownTable {
    fn default() -> Self {
        let mut gaps = HashMap::new();
        gaps.insert("link-community".to_owned(), Duration::from_secs(30));
        gaps.insert("connect-allowlist".to_owned(), Duration::from_secs(15));
        gaps.insert("create-task".to_owned(), Duration::from_secs(10));
        gaps.insert("list-tasks".to_owned(), Duration::from_secs(5));
        gaps.insert("status".to_owned(), Duration::from_secs(5));
        gaps.insert("help".to_owned(), Duration::from_secs(2));
        Self { gaps, default_gap: Duration::from_secs(3) }
    }
}

impl CooldownTable {
    pub fn gap_for(&self, command: &str) -> Duration {
        self.gaps.get(command).copied().unwrap_or(self.default_gap)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownCheck {
    Ready,
    /// Remaining wait before the command may run again.
    Blocked { remaining: Duration },
}

/// In-process cooldown tracking per (subject, command). Best-effort only:
/// with multiple bot instances the cache-backed rate windows are the source
/// of truth.
pub struct CooldownMap {
    table: CooldownTable,
    last_invocations: Mutex<HashMap<(UserId, String), Instant>>,
}

impl Default for CooldownMap {
    fn default() -> Self {
        Self::new(CooldownTable::default())
    }
}

impl CooldownMap {
    pub fn new(table: CooldownTable) -> Self {
        Self { table, last_invocations: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, subject: &UserId, command: &str) -> CooldownCheck {
        self.check_at(subject, command, Instant::now())
    }

    /// At exactly the gap boundary the command is allowed again.
    pub fn check_at(&self, subject: &UserId, command: &str, now: Instant) -> CooldownCheck {
        let gap = self.table.gap_for(command);
        let key = (subject.clone(), command.to_owned());

        let mut last_invocations = match self.last_invocations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(last) = last_invocations.get(&key) {
            let elapsed = now.duration_since(*last);
            if elapsed < gap {
                return CooldownCheck::Blocked { remaining: gap - elapsed };
            }
        }

        last_invocations.insert(key, now);
        CooldownCheck::Ready
    }
}
