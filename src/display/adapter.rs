//! Virtual display adapter
//!
//! The façade the display service calls while holding the display-subsystem
//! lock, plus the two listeners that tear displays down outside that path:
//! owner death and capture-session stop.
//!
//! Locked operations never notify the display registry themselves. They
//! return a [`ChangeSet`] that the caller hands to
//! [`VirtualDisplayAdapter::broadcast`] once the lock is released. The
//! listeners follow the same rule: mutate under the lock, drop it, then
//! broadcast.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::callback::{NotificationDispatcher, OwnerCallback};
use super::device::{DeviceDump, DisplayGeometry, VirtualDisplayDevice};
use super::errors::{AdapterError, Result};
use super::registry::DeviceRegistry;
use super::traits::{
    CaptureSession, Compositor, DeathRecipient, DisplayDeviceListener, OwnerBinder,
    SessionStopObserver, VirtualDisplayCallback,
};
use super::types::{
    ChangeSet, DeviceChange, DeviceId, DisplayDeviceEvent, DisplayDeviceInfo, DisplayState,
    OwnerToken, Surface, VirtualDisplayFlags,
};
use crate::config::Config;

/// Everything needed to create a virtual display
pub struct CreateRequest {
    pub owner: Arc<dyn OwnerBinder>,
    pub callback: Arc<dyn VirtualDisplayCallback>,
    pub capture_session: Option<Arc<dyn CaptureSession>>,
    pub owner_uid: u32,
    pub owner_package_name: String,
    pub name: String,
    pub geometry: DisplayGeometry,
    pub surface: Option<Surface>,
    pub flags: VirtualDisplayFlags,
}

struct AdapterShared {
    /// The display-subsystem lock
    sync_root: Mutex<DeviceRegistry>,
    compositor: Arc<dyn Compositor>,
    listener: Arc<dyn DisplayDeviceListener>,
    dispatcher: NotificationDispatcher,
    config: Arc<Config>,
}

/// Provides virtual displays on behalf of applications
#[derive(Clone)]
pub struct VirtualDisplayAdapter {
    shared: Arc<AdapterShared>,
}

impl VirtualDisplayAdapter {
    pub fn new(
        compositor: Arc<dyn Compositor>,
        listener: Arc<dyn DisplayDeviceListener>,
        dispatcher: NotificationDispatcher,
        config: Config,
    ) -> Self {
        Self {
            shared: Arc::new(AdapterShared {
                sync_root: Mutex::new(DeviceRegistry::new()),
                compositor,
                listener,
                dispatcher,
                config: Arc::new(config),
            }),
        }
    }

    /// Acquire the display-subsystem lock.
    ///
    /// Owner death and session stop also take this lock, so their signals
    /// must not be raised by the thread holding the guard.
    pub fn lock(&self) -> AdapterGuard<'_> {
        AdapterGuard::new(&self.shared)
    }

    /// Hand changes to the display registry. Call without holding the lock.
    pub fn broadcast(&self, changes: &ChangeSet) {
        broadcast(self.shared.listener.as_ref(), changes);
    }
}

fn broadcast(listener: &dyn DisplayDeviceListener, changes: &ChangeSet) {
    for change in changes.changes() {
        listener.on_display_device_event(change);
    }
    if changes.traversal_requested() {
        listener.on_traversal_requested();
    }
}

/// Proof that the display-subsystem lock is held; all `*_locked` entry points live here
pub struct AdapterGuard<'a> {
    devices: MutexGuard<'a, DeviceRegistry>,
    shared: &'a Arc<AdapterShared>,
}

impl<'a> AdapterGuard<'a> {
    fn new(shared: &'a Arc<AdapterShared>) -> Self {
        Self {
            devices: shared
                .sync_root
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            shared,
        }
    }

    /// Create and register a virtual display.
    ///
    /// The returned change set carries the `Added` event; broadcasting it is
    /// left to the caller.
    pub fn create_virtual_display_locked(&mut self, request: CreateRequest) -> Result<ChangeSet> {
        let token = request.owner.token();
        if request.name.is_empty() {
            return Err(AdapterError::invalid_argument("display name must not be empty"));
        }
        if !request.geometry.is_valid() {
            return Err(AdapterError::invalid_argument(format!(
                "display size must be positive, got {}x{} at {} dpi",
                request.geometry.width, request.geometry.height, request.geometry.density_dpi
            )));
        }
        if self.devices.contains(&token) {
            warn!("Rejecting second virtual display for {}", token);
            return Err(AdapterError::DuplicateOwner(token));
        }

        let secure = request.flags.contains(VirtualDisplayFlags::SECURE);
        let handle = self.shared.compositor.create_display(&request.name, secure)?;
        let callback = OwnerCallback::new(token, request.callback, self.shared.dispatcher.clone());
        let mut device = VirtualDisplayDevice::new(
            handle,
            request.owner.clone(),
            request.owner_uid,
            request.owner_package_name,
            request.name,
            request.geometry,
            request.surface,
            request.flags,
            callback,
            self.shared.config.clone(),
        );
        let id = device.id();
        let added = device.change(DisplayDeviceEvent::Added);

        if let Err(mut device) = self.devices.insert(device) {
            device.destroy(self.shared.compositor.as_ref());
            return Err(AdapterError::DuplicateOwner(token));
        }

        if let Some(session) = request.capture_session {
            let observer: Arc<dyn SessionStopObserver> = Arc::new(SessionStopListener {
                adapter: Arc::downgrade(self.shared),
                token,
                id,
            });
            if let Err(e) = session.register_callback(observer.clone()) {
                warn!("Capture session for {} refused a stop observer: {}", token, e);
                self.roll_back(token, id);
                return Err(AdapterError::CaptureSessionUnavailable(token));
            }
            if let Some(device) = self.devices.get_mut(&token) {
                device.set_session(session, observer);
            }
        }

        let recipient: Arc<dyn DeathRecipient> = Arc::new(DeathListener {
            adapter: Arc::downgrade(self.shared),
            token,
            id,
        });
        if let Err(e) = request.owner.link_to_death(recipient.clone()) {
            warn!("Could not link to {}: {}", token, e);
            self.roll_back(token, id);
            return Err(AdapterError::OwnerAlreadyDead(token));
        }
        if let Some(device) = self.devices.get_mut(&token) {
            device.set_death_recipient(recipient);
        }

        info!(
            "Created virtual display '{}' {}x{} for {} ({})",
            added.info.name, added.info.width, added.info.height, added.info.owner_package_name, token
        );

        let mut changes = ChangeSet::new();
        changes.push(added);
        changes.request_traversal();
        Ok(changes)
    }

    /// Unknown tokens and unchanged geometry are ignored
    pub fn resize_virtual_display_locked(
        &mut self,
        token: OwnerToken,
        width: u32,
        height: u32,
        density_dpi: u32,
    ) -> Result<ChangeSet> {
        if !DisplayGeometry::new(width, height, density_dpi).is_valid() {
            return Err(AdapterError::invalid_argument(format!(
                "display size must be positive, got {}x{} at {} dpi",
                width, height, density_dpi
            )));
        }

        match self.devices.get_mut(&token) {
            Some(device) => Ok(device.resize(width, height, density_dpi)),
            None => {
                debug!("Ignoring resize for unknown {}", token);
                Ok(ChangeSet::new())
            }
        }
    }

    /// Unknown tokens and stopped displays are ignored
    pub fn set_virtual_display_surface_locked(
        &mut self,
        token: OwnerToken,
        surface: Option<Surface>,
    ) -> ChangeSet {
        match self.devices.get_mut(&token) {
            Some(device) => device.set_surface(surface),
            None => {
                debug!("Ignoring surface update for unknown {}", token);
                ChangeSet::new()
            }
        }
    }

    /// Tear down the display owned by `token`.
    ///
    /// Returns the `Removed` change for the caller to broadcast, or `None`
    /// if nothing was registered.
    pub fn release_virtual_display_locked(&mut self, token: OwnerToken) -> Option<DeviceChange> {
        let mut device = self.devices.take(&token)?;
        device.unlink();
        device.destroy(self.shared.compositor.as_ref());
        info!("Released virtual display '{}' for {}", device.name(), token);
        Some(device.change(DisplayDeviceEvent::Removed))
    }

    /// Power state requested by the host display pipeline; the owner hears
    /// about it asynchronously. Returns whether the state changed.
    pub fn request_display_state_locked(
        &mut self,
        token: OwnerToken,
        state: DisplayState,
    ) -> Result<bool> {
        let device = self
            .devices
            .find_mut(&token)
            .ok_or(AdapterError::UnknownOwner(token))?;
        Ok(device.request_display_state(state))
    }

    /// Apply one device's pending changes. Part of the transaction window.
    pub fn apply_pending_changes_locked(&mut self, token: OwnerToken) -> bool {
        let compositor = self.shared.compositor.as_ref();
        self.devices
            .find_mut(&token)
            .is_some_and(|device| device.perform_traversal(compositor))
    }

    /// The transaction window: apply pending changes of every device in one
    /// compositor transaction. Returns how many devices had something pending.
    pub fn perform_traversal_in_transaction_locked(&mut self) -> usize {
        let compositor = self.shared.compositor.as_ref();
        compositor.open_transaction();
        let applied = self
            .devices
            .iter_mut()
            .map(|device| device.perform_traversal(compositor))
            .filter(|applied| *applied)
            .count();
        compositor.close_transaction();
        applied
    }

    pub fn display_device_info_locked(&mut self, token: OwnerToken) -> Option<Arc<DisplayDeviceInfo>> {
        self.devices.find_mut(&token).map(VirtualDisplayDevice::info)
    }

    pub fn device_locked(&self, token: OwnerToken) -> Option<&VirtualDisplayDevice> {
        self.devices.find(&token)
    }

    /// True if the display's capture session stopped and it awaits release
    pub fn is_stopped_locked(&self, token: OwnerToken) -> bool {
        self.devices.is_stopped(&token)
    }

    pub fn tokens_locked(&self) -> Vec<OwnerToken> {
        self.devices.tokens()
    }

    pub fn len_locked(&self) -> usize {
        self.devices.len()
    }

    pub fn dump_locked(&mut self) -> Vec<DeviceDump> {
        let mut dumps: Vec<_> = self.devices.iter_mut().map(VirtualDisplayDevice::dump).collect();
        dumps.sort_by_key(|dump| dump.token);
        dumps
    }

    fn handle_binder_died_locked(&mut self, token: OwnerToken, id: DeviceId) -> Option<DeviceChange> {
        let mut device = self.devices.take_matching(&token, id)?;
        info!(
            "Virtual display device released because application token died: {}",
            device.owner_package_name()
        );
        device.forget_death_recipient();
        device.unlink();
        device.destroy(self.shared.compositor.as_ref());
        Some(device.change(DisplayDeviceEvent::Removed))
    }

    fn handle_session_stopped_locked(&mut self, token: OwnerToken, id: DeviceId) -> ChangeSet {
        let Some(device) = self.devices.park_matching(&token, id) else {
            return ChangeSet::new();
        };
        info!(
            "Virtual display device stopped because capture session stopped: {}",
            device.name()
        );
        device.stop()
    }

    /// Undo a creation that could not be completed
    fn roll_back(&mut self, token: OwnerToken, id: DeviceId) {
        if let Some(mut device) = self.devices.take_matching(&token, id) {
            device.unlink();
            device.destroy(self.shared.compositor.as_ref());
        }
    }
}

/// Tears the display down when its owner dies
struct DeathListener {
    adapter: Weak<AdapterShared>,
    token: OwnerToken,
    id: DeviceId,
}

impl DeathRecipient for DeathListener {
    fn binder_died(&self) {
        let Some(shared) = self.adapter.upgrade() else {
            return;
        };
        let removed = AdapterGuard::new(&shared).handle_binder_died_locked(self.token, self.id);
        if let Some(change) = removed {
            shared.listener.on_display_device_event(&change);
        }
    }
}

/// Stops the display when its capture session ends
struct SessionStopListener {
    adapter: Weak<AdapterShared>,
    token: OwnerToken,
    id: DeviceId,
}

impl SessionStopObserver for SessionStopListener {
    fn on_stop(&self) {
        let Some(shared) = self.adapter.upgrade() else {
            return;
        };
        let changes = AdapterGuard::new(&shared).handle_session_stopped_locked(self.token, self.id);
        broadcast(shared.listener.as_ref(), &changes);
    }
}
