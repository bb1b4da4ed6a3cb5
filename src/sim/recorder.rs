use async_trait::async_trait;
use log::debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::display::{
    CallbackMessage, DeviceChange, DisplayDeviceEvent, DisplayDeviceListener, OwnerToken,
    RemoteError, VirtualDisplayCallback,
};

/// Owner-side callback that remembers what it was told
#[derive(Default)]
pub struct RecordingCallback {
    messages: Mutex<Vec<CallbackMessage>>,
    dead: AtomicBool,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dead callback refuses every delivery
    pub fn set_dead(&self, dead: bool) {
        self.dead.store(dead, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<CallbackMessage> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, message: CallbackMessage) -> Result<(), RemoteError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(RemoteError::DeadObject);
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }
}

#[async_trait]
impl VirtualDisplayCallback for RecordingCallback {
    async fn on_paused(&self) -> Result<(), RemoteError> {
        self.record(CallbackMessage::Paused)
    }

    async fn on_resumed(&self) -> Result<(), RemoteError> {
        self.record(CallbackMessage::Resumed)
    }

    async fn on_stopped(&self) -> Result<(), RemoteError> {
        self.record(CallbackMessage::Stopped)
    }
}

/// Display registry that remembers every event it receives
#[derive(Default)]
pub struct RecordingListener {
    changes: Mutex<Vec<DeviceChange>>,
    traversal_requests: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> Vec<DeviceChange> {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn events(&self) -> Vec<(OwnerToken, DisplayDeviceEvent)> {
        self.changes()
            .into_iter()
            .map(|change| (change.token, change.event))
            .collect()
    }

    pub fn traversal_requests(&self) -> usize {
        self.traversal_requests.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.traversal_requests.store(0, Ordering::SeqCst);
    }
}

impl DisplayDeviceListener for RecordingListener {
    fn on_display_device_event(&self, change: &DeviceChange) {
        debug!(
            "Display device {:?}: '{}' {}x{} ({})",
            change.event, change.info.name, change.info.width, change.info.height, change.token
        );
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change.clone());
    }

    fn on_traversal_requested(&self) {
        self.traversal_requests.fetch_add(1, Ordering::SeqCst);
    }
}
