//! Value types shared by the adapter, its devices and the host service

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNER_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of the application that requested a virtual display.
///
/// Every registry lookup keys on this token. A token is tied to the liveness
/// of the owning process through [`OwnerBinder`](super::traits::OwnerBinder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Allocate a token that no other live owner uses
    pub fn new() -> Self {
        Self(NEXT_OWNER_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// Identity of a single device instance.
///
/// Owner tokens may be reused after a release, device ids never are. Death and
/// session-stop observers carry both so that a late signal cannot tear down a
/// newer device registered under the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// Handle to a display inside the compositor.
///
/// Deliberately neither `Clone` nor `Copy`: destroying it consumes the value,
/// so a device can give it back to the compositor at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NativeDisplayHandle(u64);

impl NativeDisplayHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

/// Reference to an output surface supplied by the display owner.
///
/// Clones refer to the same buffer queue; equality is identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Surface {
    id: u64,
    label: Arc<str>,
}

impl Surface {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            label: Arc::from(label.into()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

bitflags! {
    /// Capabilities requested at creation time, immutable afterwards
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VirtualDisplayFlags: u32 {
        const PUBLIC = 1 << 0;
        const PRESENTATION = 1 << 1;
        const SECURE = 1 << 2;
        const AUTO_MIRROR = 1 << 4;
    }
}

bitflags! {
    /// Flags reported in the derived descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DeviceInfoFlags: u32 {
        const SECURE = 1 << 2;
        const PRIVATE = 1 << 4;
        const NEVER_BLANK = 1 << 5;
        const PRESENTATION = 1 << 6;
        const OWN_CONTENT_ONLY = 1 << 7;
    }
}

bitflags! {
    /// Mutations recorded since the last transaction window
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PendingChanges: u32 {
        const SURFACE_CHANGED = 0x01;
        const RESIZE = 0x02;
    }
}

/// Power state requested by the host display pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    #[default]
    Unknown,
    On,
    Off,
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayState::Unknown => write!(f, "UNKNOWN"),
            DisplayState::On => write!(f, "ON"),
            DisplayState::Off => write!(f, "OFF"),
        }
    }
}

/// Rotation reported to the window layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayType {
    Virtual,
}

/// Input routed to a display; virtual displays take none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchMode {
    None,
}

/// Cached descriptor of a virtual display.
///
/// Computed lazily from device state and replaced wholesale whenever geometry
/// or surface binding changes. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayDeviceInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub x_dpi: f32,
    pub y_dpi: f32,
    pub refresh_rate: f32,
    pub supported_refresh_rates: Vec<f32>,
    /// One frame at the reported refresh rate
    pub presentation_deadline_nanos: u64,
    pub flags: DeviceInfoFlags,
    pub rotation: Rotation,
    pub display_type: DisplayType,
    pub touch: TouchMode,
    /// `On` while a surface is bound, `Off` otherwise
    pub state: DisplayState,
    pub owner_uid: u32,
    pub owner_package_name: String,
}

/// Kind of transition reported to the enclosing display registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisplayDeviceEvent {
    Added,
    Changed,
    Removed,
}

/// Copy of one transition, safe to hand out once the lock is released
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceChange {
    pub token: OwnerToken,
    pub event: DisplayDeviceEvent,
    pub info: Arc<DisplayDeviceInfo>,
}

/// Everything a locked operation changed.
///
/// The caller broadcasts it after releasing the lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<DeviceChange>,
    traversal_requested: bool,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: DeviceChange) {
        self.changes.push(change);
    }

    pub fn request_traversal(&mut self) {
        self.traversal_requested = true;
    }

    pub fn changes(&self) -> &[DeviceChange] {
        &self.changes
    }

    pub fn traversal_requested(&self) -> bool {
        self.traversal_requested
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.traversal_requested
    }

    /// First change of the given kind, if any
    pub fn find(&self, event: DisplayDeviceEvent) -> Option<&DeviceChange> {
        self.changes.iter().find(|change| change.event == event)
    }

    pub fn contains(&self, event: DisplayDeviceEvent) -> bool {
        self.find(event).is_some()
    }
}
