use std::collections::VecDeque;

use gw_common::CredentialId;
use tokio::time::Instant;

/// One structured entry recorded per `Pick` call (spec §4.1 `PickWithInfo`).
#[derive(Debug, Clone)]
pub struct PickLogEntry {
    pub at: Instant,
    pub credential_id: Option<CredentialId>,
    pub sticky_hit: bool,
    pub candidates_considered: usize,
}

/// Capacity-bounded ring buffer; oldest entry evicted on overflow (spec §5
/// "Pick-log ring buffer").
pub struct PickLogRing {
    capacity: usize,
    entries: VecDeque<PickLogEntry>,
}

impl PickLogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, entry: PickLogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<PickLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_evicts_oldest() {
        let mut ring = PickLogRing::new(2);
        for i in 0..5 {
            ring.push(PickLogEntry {
                at: Instant::now(),
                credential_id: Some(CredentialId::new(format!("c{i}"))),
                sticky_hit: false,
                candidates_considered: 1,
            });
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].credential_id.as_ref().unwrap().as_str(), "c3");
        assert_eq!(snapshot[1].credential_id.as_ref().unwrap().as_str(), "c4");
    }
}
