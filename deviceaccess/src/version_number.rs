//! Process-wide monotonic stamps establishing causal order across accessors.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_GENERATED: AtomicU64 = AtomicU64::new(0);

/// A strictly monotonic stamp identifying one causally consistent snapshot.
///
/// Two accessors carrying the same `VersionNumber` were filled by the same
/// trigger. The default value is "before everything" and compares less than
/// every allocated stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionNumber(u64);

impl VersionNumber {
    pub const BEFORE_EVERYTHING: VersionNumber = VersionNumber(0);

    /// Allocates a fresh stamp, strictly greater than every previous one.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        VersionNumber(LAST_GENERATED.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_monotonic() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        let c = VersionNumber::new();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_default_is_before_everything() {
        assert_eq!(VersionNumber::default(), VersionNumber::BEFORE_EVERYTHING);
        assert!(VersionNumber::BEFORE_EVERYTHING < VersionNumber::new());
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(std::thread::spawn(|| {
                (0..1000).map(|_| VersionNumber::new()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<VersionNumber> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
