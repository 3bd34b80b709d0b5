//! Live preview mailbox.
//!
//! The control loop publishes the latest acquired point into a
//! single-slot mailbox (`tokio::sync::watch`); a preview consumer samples
//! it at its own pace. Publishing never blocks and never queues: a slow
//! consumer simply observes the newest frame and misses the ones in
//! between. The preview is an unreliable observer by design — it must not
//! be able to apply backpressure to acquisition.

use std::sync::Arc;

use tokio::sync::watch;

use ase_core::data::Spectrum;
use ase_core::run::ScanPoint;

/// Snapshot of one completed point for display.
#[derive(Debug, Clone)]
pub struct PreviewUpdate {
    /// Zero-based sweep position.
    pub seq: u32,
    /// Stage angle, degrees.
    pub angle_degrees: f64,
    /// Integration time of the accepted frame, seconds.
    pub integration_time_s: f64,
    /// Denoised signal frame.
    pub signal: Spectrum,
    /// Background frame used for subtraction.
    pub background: Arc<Spectrum>,
    /// Net (background-subtracted) spectrum.
    pub net: Spectrum,
}

impl PreviewUpdate {
    /// Build a preview snapshot from a committed point.
    pub fn from_point(point: &ScanPoint) -> Self {
        Self {
            seq: point.seq,
            angle_degrees: point.angle_degrees,
            integration_time_s: point.integration_time_s,
            signal: point.signal.clone(),
            background: Arc::clone(&point.background),
            net: point.net.clone(),
        }
    }
}

/// Receiver half handed to preview consumers.
pub type PreviewReceiver = watch::Receiver<Option<Arc<PreviewUpdate>>>;

/// Single-slot preview mailbox.
#[derive(Debug)]
pub struct PreviewChannel {
    tx: watch::Sender<Option<Arc<PreviewUpdate>>>,
}

impl PreviewChannel {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Replace the mailbox content with the newest update.
    ///
    /// Succeeds whether or not anyone is listening.
    pub fn publish(&self, update: PreviewUpdate) {
        self.tx.send_replace(Some(Arc::new(update)));
    }

    /// Subscribe to the mailbox. May be called any number of times.
    pub fn subscribe(&self) -> PreviewReceiver {
        self.tx.subscribe()
    }
}

impl Default for PreviewChannel {
    fn default() -> Self {
        Self::new()
    }
}
