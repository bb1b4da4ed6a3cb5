//! Per-display state machine
//!
//! A device records what the owner asked for (geometry, surface, power state)
//! and which of those requests still have to reach the compositor. Requests
//! only touch in-memory state; [`VirtualDisplayDevice::perform_traversal`]
//! applies them during the transaction window.

use log::debug;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::callback::OwnerCallback;
use super::traits::{CaptureSession, Compositor, DeathRecipient, OwnerBinder, SessionStopObserver};
use super::types::{
    ChangeSet, DeviceChange, DeviceId, DeviceInfoFlags, DisplayDeviceEvent, DisplayDeviceInfo,
    DisplayState, DisplayType, NativeDisplayHandle, OwnerToken, PendingChanges, Rotation, Surface,
    TouchMode, VirtualDisplayFlags,
};
use crate::config::{Config, RemoteRotation};

/// Refresh rate every virtual display reports
pub const REFRESH_RATE: f32 = 60.0;

/// One frame at [`REFRESH_RATE`]
pub const PRESENTATION_DEADLINE_NANOS: u64 = 1_000_000_000 / REFRESH_RATE as u64;

/// Pace of the transaction windows
pub const FRAME_PERIOD: Duration = Duration::from_nanos(PRESENTATION_DEADLINE_NANOS);

/// What the owner asked for at creation time
#[derive(Debug, Clone)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

impl DisplayGeometry {
    pub fn new(width: u32, height: u32, density_dpi: u32) -> Self {
        Self {
            width,
            height,
            density_dpi,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.density_dpi > 0
    }
}

/// Observer registrations held for cleanup
struct Links {
    owner: Arc<dyn OwnerBinder>,
    death_recipient: Option<Arc<dyn DeathRecipient>>,
    session: Option<(Arc<dyn CaptureSession>, Arc<dyn SessionStopObserver>)>,
}

pub struct VirtualDisplayDevice {
    id: DeviceId,
    token: OwnerToken,
    display_handle: Option<NativeDisplayHandle>,
    owner_uid: u32,
    owner_package_name: String,
    name: String,
    flags: VirtualDisplayFlags,
    callback: OwnerCallback,
    config: Arc<Config>,
    links: Links,

    width: u32,
    height: u32,
    density_dpi: u32,
    surface: Option<Surface>,
    info: Option<Arc<DisplayDeviceInfo>>,
    display_state: DisplayState,
    stopped: bool,
    pending_changes: PendingChanges,
}

impl VirtualDisplayDevice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        display_handle: NativeDisplayHandle,
        owner: Arc<dyn OwnerBinder>,
        owner_uid: u32,
        owner_package_name: String,
        name: String,
        geometry: DisplayGeometry,
        surface: Option<Surface>,
        flags: VirtualDisplayFlags,
        callback: OwnerCallback,
        config: Arc<Config>,
    ) -> Self {
        Self {
            id: DeviceId::next(),
            token: owner.token(),
            display_handle: Some(display_handle),
            owner_uid,
            owner_package_name,
            name,
            flags,
            callback,
            config,
            links: Links {
                owner,
                death_recipient: None,
                session: None,
            },
            width: geometry.width,
            height: geometry.height,
            density_dpi: geometry.density_dpi,
            surface,
            info: None,
            display_state: DisplayState::Unknown,
            stopped: false,
            pending_changes: PendingChanges::SURFACE_CHANGED,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn token(&self) -> OwnerToken {
        self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner_package_name(&self) -> &str {
        &self.owner_package_name
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn display_state(&self) -> DisplayState {
        self.display_state
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn pending_changes(&self) -> PendingChanges {
        self.pending_changes
    }

    /// False once the native handle has been given back to the compositor
    pub fn is_alive(&self) -> bool {
        self.display_handle.is_some()
    }

    pub(crate) fn set_death_recipient(&mut self, recipient: Arc<dyn DeathRecipient>) {
        self.links.death_recipient = Some(recipient);
    }

    pub(crate) fn set_session(
        &mut self,
        session: Arc<dyn CaptureSession>,
        observer: Arc<dyn SessionStopObserver>,
    ) {
        self.links.session = Some((session, observer));
    }

    /// Drop the owner-liveness and session-stop registrations
    pub(crate) fn unlink(&mut self) {
        if let Some(recipient) = self.links.death_recipient.take() {
            self.links.owner.unlink_to_death(&recipient);
        }
        if let Some((session, observer)) = self.links.session.take() {
            session.unregister_callback(&observer);
        }
    }

    /// Forget the death recipient without unlinking it; the owner is gone anyway
    pub(crate) fn forget_death_recipient(&mut self) {
        self.links.death_recipient = None;
    }

    /// Descriptor for the current state, rebuilt only after a mutation
    pub fn info(&mut self) -> Arc<DisplayDeviceInfo> {
        if let Some(info) = &self.info {
            return info.clone();
        }
        let info = Arc::new(self.build_info());
        self.info = Some(info.clone());
        info
    }

    pub(crate) fn change(&mut self, event: DisplayDeviceEvent) -> DeviceChange {
        DeviceChange {
            token: self.token,
            event,
            info: self.info(),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32, density_dpi: u32) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if self.width == width && self.height == height && self.density_dpi == density_dpi {
            return changes;
        }

        self.width = width;
        self.height = height;
        self.density_dpi = density_dpi;
        self.info = None;
        self.pending_changes |= PendingChanges::RESIZE;

        changes.push(self.change(DisplayDeviceEvent::Changed));
        changes.request_traversal();
        changes
    }

    pub fn set_surface(&mut self, surface: Option<Surface>) -> ChangeSet {
        let mut changes = ChangeSet::new();
        if self.stopped || self.surface == surface {
            return changes;
        }

        let presence_changed = self.surface.is_some() != surface.is_some();
        self.surface = surface;
        self.info = None;
        self.pending_changes |= PendingChanges::SURFACE_CHANGED;

        if presence_changed {
            changes.push(self.change(DisplayDeviceEvent::Changed));
        }
        changes.request_traversal();
        changes
    }

    /// Detach the surface for good; later surface updates are ignored
    pub fn stop(&mut self) -> ChangeSet {
        let changes = self.set_surface(None);
        self.stopped = true;
        changes
    }

    /// Returns true if the state actually changed
    pub fn request_display_state(&mut self, state: DisplayState) -> bool {
        if state == self.display_state {
            return false;
        }

        self.display_state = state;
        if state == DisplayState::Off {
            self.callback.dispatch_paused();
        } else {
            self.callback.dispatch_resumed();
        }
        true
    }

    /// Apply pending changes to the native handle.
    ///
    /// Size goes first so a newly attached surface sees the right dimensions.
    /// Returns true if anything was pending.
    pub fn perform_traversal(&mut self, compositor: &dyn Compositor) -> bool {
        let pending = std::mem::take(&mut self.pending_changes);
        let Some(handle) = &self.display_handle else {
            return false;
        };

        if pending.contains(PendingChanges::RESIZE) {
            compositor.set_display_size(handle, self.width, self.height);
        }
        if pending.contains(PendingChanges::SURFACE_CHANGED) {
            compositor.set_display_surface(handle, self.surface.as_ref());
        }
        !pending.is_empty()
    }

    /// Release the surface, destroy the native handle and tell the owner.
    ///
    /// Only the first call has any effect.
    pub fn destroy(&mut self, compositor: &dyn Compositor) -> bool {
        let Some(handle) = self.display_handle.take() else {
            return false;
        };

        if self.surface.take().is_some() {
            self.info = None;
        }
        debug!("Destroying native display {} for {}", handle.as_raw(), self.token);
        compositor.destroy_display(handle);
        self.pending_changes = PendingChanges::empty();
        self.callback.dispatch_stopped();
        true
    }

    pub fn dump(&mut self) -> DeviceDump {
        let info = self.info();
        DeviceDump {
            token: self.token,
            native_handle: self.display_handle.as_ref().map(NativeDisplayHandle::as_raw),
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            density_dpi: self.density_dpi,
            flags: self.flags,
            info_flags: info.flags,
            rotation: info.rotation,
            display_state: self.display_state,
            stopped: self.stopped,
            surface: self.surface.as_ref().map(Surface::id),
            pending_changes: self.pending_changes,
            owner_uid: self.owner_uid,
            owner_package_name: self.owner_package_name.clone(),
        }
    }

    fn build_info(&self) -> DisplayDeviceInfo {
        let mut flags = DeviceInfoFlags::empty();
        if !self.flags.contains(VirtualDisplayFlags::PUBLIC) {
            flags |= DeviceInfoFlags::PRIVATE | DeviceInfoFlags::NEVER_BLANK;
        }
        if self.flags.contains(VirtualDisplayFlags::AUTO_MIRROR) {
            flags.remove(DeviceInfoFlags::NEVER_BLANK);
        } else {
            flags |= DeviceInfoFlags::OWN_CONTENT_ONLY;
        }
        if self.flags.contains(VirtualDisplayFlags::SECURE) {
            flags |= DeviceInfoFlags::SECURE;
        }

        let mut rotation = Rotation::Deg0;
        if self.flags.contains(VirtualDisplayFlags::PRESENTATION) {
            flags |= DeviceInfoFlags::PRESENTATION;
            if self.flags.contains(VirtualDisplayFlags::PUBLIC)
                && self.config.remote_rotation == RemoteRotation::Portrait
            {
                rotation = Rotation::Deg270;
            }
        }

        DisplayDeviceInfo {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            density_dpi: self.density_dpi,
            x_dpi: self.density_dpi as f32,
            y_dpi: self.density_dpi as f32,
            refresh_rate: REFRESH_RATE,
            supported_refresh_rates: vec![REFRESH_RATE],
            presentation_deadline_nanos: PRESENTATION_DEADLINE_NANOS,
            flags,
            rotation,
            display_type: DisplayType::Virtual,
            touch: TouchMode::None,
            state: if self.surface.is_some() {
                DisplayState::On
            } else {
                DisplayState::Off
            },
            owner_uid: self.owner_uid,
            owner_package_name: self.owner_package_name.clone(),
        }
    }
}

impl std::fmt::Debug for VirtualDisplayDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDisplayDevice")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("density_dpi", &self.density_dpi)
            .field("flags", &self.flags)
            .field("display_state", &self.display_state)
            .field("stopped", &self.stopped)
            .field("pending_changes", &self.pending_changes)
            .finish_non_exhaustive()
    }
}

/// Read-only diagnostics snapshot of one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDump {
    pub token: OwnerToken,
    /// `None` once the native display was destroyed
    pub native_handle: Option<u64>,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub flags: VirtualDisplayFlags,
    pub info_flags: DeviceInfoFlags,
    pub rotation: Rotation,
    pub display_state: DisplayState,
    pub stopped: bool,
    pub surface: Option<u64>,
    pub pending_changes: PendingChanges,
    pub owner_uid: u32,
    pub owner_package_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::callback::{self, CallbackMessage};
    use crate::sim::{CompositorOp, InMemoryCompositor, RecordingCallback, SimOwner};

    struct Fixture {
        compositor: InMemoryCompositor,
        target: Arc<RecordingCallback>,
        worker: callback::NotificationWorker,
    }

    fn make_device(flags: VirtualDisplayFlags, surface: Option<Surface>) -> (VirtualDisplayDevice, Fixture) {
        device_with_config(flags, surface, Config::default())
    }

    fn device_with_config(
        flags: VirtualDisplayFlags,
        surface: Option<Surface>,
        config: Config,
    ) -> (VirtualDisplayDevice, Fixture) {
        let compositor = InMemoryCompositor::new();
        let (dispatcher, worker) = callback::channel();
        let target = Arc::new(RecordingCallback::new());
        let owner = Arc::new(SimOwner::new("com.example.cast"));
        let handle = compositor.create_display("cast", false).unwrap();
        let callback = OwnerCallback::new(owner.token(), target.clone(), dispatcher);

        let device = VirtualDisplayDevice::new(
            handle,
            owner,
            10_042,
            "com.example.cast".to_string(),
            "cast".to_string(),
            DisplayGeometry::new(800, 600, 160),
            surface,
            flags,
            callback,
            Arc::new(config),
        );
        (
            device,
            Fixture {
                compositor,
                target,
                worker,
            },
        )
    }

    #[test]
    fn test_new_device_pending_surface_change() {
        let (device, _fx) = make_device(VirtualDisplayFlags::PUBLIC, None);
        assert_eq!(device.pending_changes(), PendingChanges::SURFACE_CHANGED);
        assert_eq!(device.display_state(), DisplayState::Unknown);
        assert!(!device.is_stopped());
        assert!(device.is_alive());
    }

    #[test]
    fn test_resize_unchanged_is_noop() {
        let (mut device, _fx) = make_device(VirtualDisplayFlags::PUBLIC, None);
        let info = device.info();

        let changes = device.resize(800, 600, 160);
        assert!(changes.is_empty());
        assert!(Arc::ptr_eq(&info, &device.info()));
    }

    #[test]
    fn test_resize_invalidates_info() {
        let (mut device, _fx) = make_device(VirtualDisplayFlags::PUBLIC, None);
        let before = device.info();

        let changes = device.resize(1024, 768, 160);
        assert!(changes.contains(DisplayDeviceEvent::Changed));
        assert!(changes.traversal_requested());
        assert!(device.pending_changes().contains(PendingChanges::RESIZE));

        let after = device.info();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!((after.width, after.height), (1024, 768));
        assert_eq!((before.width, before.height), (800, 600));
    }

    #[test]
    fn test_surface_change_without_presence_change() {
        let s1 = Surface::new("s1");
        let (mut device, _fx) = make_device(VirtualDisplayFlags::PUBLIC, Some(s1));

        let changes = device.set_surface(Some(Surface::new("s2")));
        assert!(!changes.contains(DisplayDeviceEvent::Changed));
        assert!(changes.traversal_requested());
        assert!(device.pending_changes().contains(PendingChanges::SURFACE_CHANGED));
    }

    #[test]
    fn test_stopped_device_ignores_surface() {
        let (mut device, _fx) = make_device(VirtualDisplayFlags::PUBLIC, Some(Surface::new("s1")));

        let changes = device.stop();
        assert!(changes.contains(DisplayDeviceEvent::Changed));
        assert!(device.is_stopped());
        assert!(device.surface().is_none());

        assert!(device.set_surface(Some(Surface::new("s2"))).is_empty());
        assert!(device.surface().is_none());
        assert!(device.stop().is_empty());
    }

    #[test]
    fn test_traversal_applies_resize_before_surface() {
        let s1 = Surface::new("s1");
        let (mut device, fx) = make_device(VirtualDisplayFlags::PUBLIC, None);
        device.set_surface(Some(s1.clone()));
        device.resize(1280, 720, 240);
        fx.compositor.clear_ops();

        assert!(device.perform_traversal(&fx.compositor));
        assert_eq!(device.pending_changes(), PendingChanges::empty());

        let ops = fx.compositor.ops();
        assert!(matches!(ops[0], CompositorOp::SetSize { width: 1280, height: 720, .. }));
        assert!(matches!(ops[1], CompositorOp::SetSurface { surface: Some(id), .. } if id == s1.id()));

        assert!(!device.perform_traversal(&fx.compositor));
        assert_eq!(fx.compositor.ops().len(), 2);
    }

    #[test]
    fn test_destroy_runs_once() {
        let (mut device, fx) = make_device(VirtualDisplayFlags::PUBLIC, Some(Surface::new("s1")));

        assert!(device.destroy(&fx.compositor));
        assert!(!device.destroy(&fx.compositor));
        assert!(!device.is_alive());
        assert!(device.surface().is_none());
        assert_eq!(fx.compositor.destroyed_count(), 1);
        assert!(!device.perform_traversal(&fx.compositor));
    }

    #[tokio::test]
    async fn test_power_state_notifies_owner() {
        let (mut device, mut fx) = make_device(VirtualDisplayFlags::PUBLIC, None);

        assert!(device.request_display_state(DisplayState::On));
        assert!(!device.request_display_state(DisplayState::On));
        assert!(device.request_display_state(DisplayState::Off));
        device.destroy(&fx.compositor);

        fx.worker.flush().await;
        assert_eq!(
            fx.target.messages(),
            vec![
                CallbackMessage::Resumed,
                CallbackMessage::Paused,
                CallbackMessage::Stopped,
            ]
        );
    }

    #[test]
    fn test_private_display_flags() {
        let (mut device, _fx) = make_device(VirtualDisplayFlags::SECURE, None);
        let info = device.info();
        assert_eq!(
            info.flags,
            DeviceInfoFlags::PRIVATE
                | DeviceInfoFlags::NEVER_BLANK
                | DeviceInfoFlags::OWN_CONTENT_ONLY
                | DeviceInfoFlags::SECURE
        );
        assert_eq!(info.state, DisplayState::Off);
        assert_eq!(info.display_type, DisplayType::Virtual);
        assert_eq!(info.touch, TouchMode::None);
    }

    #[test]
    fn test_auto_mirror_clears_never_blank() {
        let (mut device, _fx) = make_device(VirtualDisplayFlags::AUTO_MIRROR, Some(Surface::new("s")));
        let info = device.info();
        assert_eq!(info.flags, DeviceInfoFlags::PRIVATE);
        assert_eq!(info.state, DisplayState::On);
    }

    #[test]
    fn test_public_presentation_rotation() {
        let flags = VirtualDisplayFlags::PUBLIC | VirtualDisplayFlags::PRESENTATION;

        let (mut device, _fx) = make_device(flags, None);
        assert_eq!(device.info().rotation, Rotation::Deg0);

        let config = Config {
            remote_rotation: RemoteRotation::Portrait,
        };
        let (mut device, _fx) = device_with_config(flags, None, config);
        let info = device.info();
        assert_eq!(info.rotation, Rotation::Deg270);
        assert!(info.flags.contains(DeviceInfoFlags::PRESENTATION));
    }

    #[test]
    fn test_info_timing() {
        let (mut device, _fx) = make_device(VirtualDisplayFlags::PUBLIC, None);
        let info = device.info();
        assert_eq!(info.refresh_rate, 60.0);
        assert_eq!(info.supported_refresh_rates, vec![60.0]);
        assert_eq!(info.presentation_deadline_nanos, 16_666_666);
        assert_eq!(info.x_dpi, 160.0);
        assert_eq!(FRAME_PERIOD, Duration::from_nanos(16_666_666));
    }

    #[test]
    fn test_timing_independent_of_config() {
        let config = Config {
            remote_rotation: RemoteRotation::Portrait,
        };
        let flags = VirtualDisplayFlags::PUBLIC | VirtualDisplayFlags::PRESENTATION;
        let (mut device, _fx) = device_with_config(flags, None, config);
        let info = device.info();
        assert_eq!(info.refresh_rate, REFRESH_RATE);
        assert_eq!(info.presentation_deadline_nanos, PRESENTATION_DEADLINE_NANOS);
        assert!(!FRAME_PERIOD.is_zero());
    }
}
