use tokio::time::{Duration, Instant};

/// Cooldown entry (spec §3.2): `strikes >= 1`, `until` the monotonic
/// deadline before which the credential is excluded from picks.
#[derive(Debug, Clone, Copy)]
pub struct CooldownEntry {
    pub strikes: u32,
    pub until: Instant,
}

impl CooldownEntry {
    pub fn is_active(&self, now: Instant) -> bool {
        self.until > now
    }
}

/// Exponential cooldown duration: `min(base * 2^(strikes-1), max)` (spec
/// §3.2, §4.1 "Cooldown algorithm").
pub fn cooldown_duration(strikes: u32, base_ms: u64, max_ms: u64) -> Duration {
    let shift = strikes.saturating_sub(1).min(32);
    let scaled = base_ms.saturating_mul(1u64 << shift);
    Duration::from_millis(scaled.min(max_ms))
}

/// Applies one retryable-failure strike, returning the new entry.
pub fn on_failure(existing: Option<CooldownEntry>, base_ms: u64, max_ms: u64, now: Instant) -> CooldownEntry {
    let strikes = existing.map(|e| e.strikes + 1).unwrap_or(1);
    let until = now + cooldown_duration(strikes, base_ms, max_ms);
    CooldownEntry { strikes, until }
}

/// Applies a success observation (spec §4.1 `OnResult` success path):
/// `strikes <= 1` removes the entry entirely; otherwise decrement strikes
/// and clear the cooldown (`until = now`, i.e. immediately eligible again).
pub fn on_success(existing: Option<CooldownEntry>, now: Instant) -> Option<CooldownEntry> {
    match existing {
        None => None,
        Some(entry) if entry.strikes <= 1 => None,
        Some(entry) => Some(CooldownEntry {
            strikes: entry.strikes - 1,
            until: now,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_matches_spec_example() {
        // base=200ms, max=5000ms -> 200, 400, 800, 1600, 3200
        let expected = [200u64, 400, 800, 1600, 3200];
        for (i, exp) in expected.iter().enumerate() {
            let strikes = (i + 1) as u32;
            assert_eq!(cooldown_duration(strikes, 200, 5_000).as_millis() as u64, *exp);
        }
    }

    #[test]
    fn duration_caps_at_max() {
        assert_eq!(cooldown_duration(20, 2_000, 60_000).as_millis() as u64, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn success_removes_single_strike_entry() {
        let now = Instant::now();
        let entry = CooldownEntry { strikes: 1, until: now + Duration::from_secs(5) };
        assert!(on_success(Some(entry), now).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_decrements_multi_strike_entry_and_clears_cooldown() {
        let now = Instant::now();
        let entry = CooldownEntry { strikes: 3, until: now + Duration::from_secs(5) };
        let after = on_success(Some(entry), now).unwrap();
        assert_eq!(after.strikes, 2);
        assert!(!after.is_active(now));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_accumulate_strikes() {
        let now = Instant::now();
        let e1 = on_failure(None, 200, 5_000, now);
        assert_eq!(e1.strikes, 1);
        let e2 = on_failure(Some(e1), 200, 5_000, now);
        assert_eq!(e2.strikes, 2);
    }
}
