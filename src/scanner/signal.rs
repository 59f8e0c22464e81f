use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::utils::lock;

/// Liveness signal shared by the scan coordinator, the analysis tools and the watchdog.
///
/// `touch` is called at scan start and for every chunk of tool output; the watchdog
/// compares successive readings to tell a slow pipeline from a stuck one.
#[derive(Debug)]
pub struct ProgressSignal {
    last: Mutex<Instant>,
    scanning: AtomicBool,
    scan_id: AtomicU64,
}

impl Default for ProgressSignal {
    fn default() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
            scanning: AtomicBool::new(false),
            scan_id: AtomicU64::new(0),
        }
    }
}

impl ProgressSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self) {
        *lock(&self.last) = Instant::now();
    }

    pub fn last_progress(&self) -> Instant {
        *lock(&self.last)
    }

    /// Claim the global scanning flag. Returns the new scan id, or `None` if a scan is running.
    pub fn try_begin_scan(&self) -> Option<u64> {
        self.scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let id = self.scan_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.touch();
        Some(id)
    }

    pub fn end_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Id of the scan in flight, if any.
    pub fn current_scan_id(&self) -> Option<u64> {
        self.is_scanning()
            .then(|| self.scan_id.load(Ordering::SeqCst))
    }
}

/// Releases the scanning flag when the attempt ends, on every path.
pub(crate) struct ScanSlot<'a> {
    signal: &'a ProgressSignal,
}

impl<'a> ScanSlot<'a> {
    pub(crate) fn try_claim(signal: &'a ProgressSignal) -> Option<(Self, u64)> {
        let id = signal.try_begin_scan()?;
        Some((Self { signal }, id))
    }
}

impl Drop for ScanSlot<'_> {
    fn drop(&mut self) {
        self.signal.end_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_scan_at_a_time() {
        let s = ProgressSignal::new();
        let (slot, id) = ScanSlot::try_claim(&s).unwrap();
        assert_eq!(s.current_scan_id(), Some(id));
        assert!(s.try_begin_scan().is_none());
        drop(slot);
        assert!(!s.is_scanning());
        assert_eq!(s.current_scan_id(), None);
        let (_slot, next) = ScanSlot::try_claim(&s).unwrap();
        assert!(next > id);
    }
}
