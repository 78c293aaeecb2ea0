//! Capabilities of the page shell hosting the document.

use std::sync::atomic::{AtomicUsize, Ordering};

/// The surrounding application shell.
///
/// A static page has no kernel or session list to watch, so the shell's
/// background polling is paused before reconstruction starts.
pub trait HostShell: Send + Sync {
    fn pause_polling(&self);
}

/// Shell with nothing to pause.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostShell for NoopHost {
    fn pause_polling(&self) {}
}

/// Counts calls instead of acting on them.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pauses: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause_count(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

impl HostShell for RecordingHost {
    fn pause_polling(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}
