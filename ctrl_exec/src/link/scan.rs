//! Candidate discovery bookkeeping for the link manager.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::time::{Duration, Instant};

use comms_if::eqpt::motor::Advertisement;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A motor board seen during scanning.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub rssi_dbm: i16,
    pub max_write_len: usize,
    pub data_endpoint: String,

    /// When the most recent advertisement for this board arrived
    pub last_seen: Instant,
}

/// The de-duplicated set of boards currently in radio range.
///
/// Boards are identified by their data endpoint. Re-observing a board
/// refreshes its entry; entries older than the timeout are evicted.
pub struct CandidateList {
    entries: Vec<Candidate>,
    timeout: Duration,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CandidateList {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
        }
    }

    /// Fold an advertisement into the list.
    pub fn observe(&mut self, advert: Advertisement, now: Instant) {
        match self
            .entries
            .iter_mut()
            .find(|c| c.data_endpoint == advert.data_endpoint)
        {
            Some(existing) => {
                existing.name = advert.name;
                existing.rssi_dbm = advert.rssi_dbm;
                existing.max_write_len = advert.max_write_len;
                existing.last_seen = now;
            }
            None => self.entries.push(Candidate {
                name: advert.name,
                rssi_dbm: advert.rssi_dbm,
                max_write_len: advert.max_write_len,
                data_endpoint: advert.data_endpoint,
                last_seen: now,
            }),
        }
    }

    /// Drop entries which haven't been re-observed within the timeout.
    pub fn evict_stale(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.entries
            .retain(|c| now.duration_since(c.last_seen) < timeout);
    }

    /// The current candidates, strongest signal first.
    pub fn snapshot(&self) -> Vec<Candidate> {
        let mut out = self.entries.clone();
        out.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn advert(name: &str, rssi: i16, endpoint: &str) -> Advertisement {
        Advertisement {
            name: name.into(),
            rssi_dbm: rssi,
            max_write_len: 20,
            data_endpoint: endpoint.into(),
        }
    }

    #[test]
    fn test_dedup_and_ordering() {
        let mut list = CandidateList::new(Duration::from_secs(5));
        let now = Instant::now();

        list.observe(advert("far", -80, "tcp://a:1"), now);
        list.observe(advert("near", -40, "tcp://b:1"), now);

        // Same endpoint again with a fresher signal: updated, not duplicated
        list.observe(advert("far", -60, "tcp://a:1"), now);

        let snapshot = list.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "near");
        assert_eq!(snapshot[1].rssi_dbm, -60);
    }

    #[test]
    fn test_eviction() {
        let mut list = CandidateList::new(Duration::from_secs(5));
        let t0 = Instant::now();

        list.observe(advert("old", -50, "tcp://a:1"), t0);
        list.observe(advert("fresh", -50, "tcp://b:1"), t0 + Duration::from_secs(4));

        list.evict_stale(t0 + Duration::from_secs(6));

        let snapshot = list.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "fresh");
    }
}
