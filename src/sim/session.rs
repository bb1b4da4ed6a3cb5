use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::display::{CaptureSession, RemoteError, SessionStopObserver};

/// A capture grant that can be revoked on demand
pub struct SimCaptureSession {
    active: AtomicBool,
    observers: Mutex<Vec<Arc<dyn SessionStopObserver>>>,
}

impl SimCaptureSession {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// End the session and notify every registered observer on this thread
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Capture session stopped");
        let observers = std::mem::take(&mut *self.observers());
        for observer in observers {
            observer.on_stop();
        }
    }

    fn observers(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn SessionStopObserver>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimCaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSession for SimCaptureSession {
    fn register_callback(&self, observer: Arc<dyn SessionStopObserver>) -> Result<(), RemoteError> {
        let mut observers = self.observers();
        if !self.is_active() {
            return Err(RemoteError::Transport("capture session already stopped".to_string()));
        }
        observers.push(observer);
        Ok(())
    }

    fn unregister_callback(&self, observer: &Arc<dyn SessionStopObserver>) {
        self.observers()
            .retain(|registered| !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(observer)));
    }
}
