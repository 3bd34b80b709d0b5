//! Per-run background frame cache.
//!
//! Backgrounds depend on integration time but not on stage angle, so one
//! trigger-off frame per integration time serves the whole sweep. The
//! first background captured at a given time is trusted for the entire
//! run — there is no drift revalidation. That trade (a possible slow
//! dark-current drift against saving one long exposure per point) is
//! deliberate and documented behavior.
//!
//! Keys are integration times compared within a small epsilon to absorb
//! float round-tripping through device drivers. The key space equals the
//! preset ladder length, so storage is a plain vector with linear lookup.

use std::sync::Arc;

use ase_core::data::Spectrum;

/// Tolerance for integration-time key equality, seconds.
const KEY_EPSILON_S: f64 = 1e-6;

/// Keyed store of trigger-off frames, one per integration time.
#[derive(Debug, Default)]
pub struct BackgroundCache {
    entries: Vec<(f64, Arc<Spectrum>)>,
}

impl BackgroundCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the background for an integration time.
    ///
    /// A hit returns the stored frame verbatim (shared, not copied).
    pub fn get(&self, integration_time_s: f64) -> Option<Arc<Spectrum>> {
        self.entries
            .iter()
            .find(|(key, _)| (key - integration_time_s).abs() <= KEY_EPSILON_S)
            .map(|(_, spectrum)| Arc::clone(spectrum))
    }

    /// Store a background, replacing any existing entry at that time.
    ///
    /// Returns the shared handle now held by the cache.
    pub fn put(&mut self, integration_time_s: f64, spectrum: Spectrum) -> Arc<Spectrum> {
        let spectrum = Arc::new(spectrum);
        match self
            .entries
            .iter_mut()
            .find(|(key, _)| (key - integration_time_s).abs() <= KEY_EPSILON_S)
        {
            Some(entry) => entry.1 = Arc::clone(&spectrum),
            None => self.entries.push((integration_time_s, Arc::clone(&spectrum))),
        }
        spectrum
    }

    /// Number of cached integration times.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ase_core::data::AcquisitionMeta;
    use chrono::Utc;

    fn background(counts: Vec<f64>, integration_time_s: f64) -> Spectrum {
        let axis = (0..counts.len()).map(|i| 400.0 + i as f64).collect();
        Spectrum::new(
            axis,
            counts,
            AcquisitionMeta {
                integration_time_s,
                accumulations: 1,
                trigger_on: false,
                angle_degrees: None,
                acquired_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[test]
    fn get_on_unseen_time_is_absent() {
        let cache = BackgroundCache::new();
        assert!(cache.get(4.0).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn get_after_put_returns_the_same_frame() {
        let mut cache = BackgroundCache::new();
        let stored = cache.put(0.1, background(vec![1.0, 2.0, 3.0], 0.1));

        let hit = cache.get(0.1).unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));
        assert_eq!(hit.counts, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn keys_match_within_epsilon() {
        let mut cache = BackgroundCache::new();
        cache.put(0.1, background(vec![5.0], 0.1));

        // float drift from a device round-trip still hits
        assert!(cache.get(0.1 + 1e-9).is_some());
        assert!(cache.get(0.1 - 1e-9).is_some());
        // a genuinely different preset does not
        assert!(cache.get(0.2).is_none());
    }

    #[test]
    fn put_replaces_the_stale_entry() {
        let mut cache = BackgroundCache::new();
        cache.put(4.0, background(vec![1.0], 4.0));
        cache.put(4.0, background(vec![9.0], 4.0));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(4.0).unwrap().counts, vec![9.0]);
    }

    #[test]
    fn distinct_times_coexist() {
        let mut cache = BackgroundCache::new();
        cache.put(4.0, background(vec![1.0], 4.0));
        cache.put(0.1, background(vec![2.0], 0.1));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(4.0).unwrap().counts, vec![1.0]);
        assert_eq!(cache.get(0.1).unwrap().counts, vec![2.0]);
    }
}
