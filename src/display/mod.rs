//! Virtual display adapter
//!
//! Manages off-screen displays requested by applications: creation, resize,
//! surface rebinding, power state and teardown. Three independent triggers
//! can end a display's life:
//! - an explicit release from its owner
//! - the owning process dying
//! - the capture session it was created under stopping
//!
//! # Locking
//!
//! One lock (the display-subsystem lock, see [`VirtualDisplayAdapter::lock`])
//! serializes every registry and device mutation. Mutations only record
//! state and pending changes; the compositor sees them during the transaction
//! window ([`AdapterGuard::perform_traversal_in_transaction_locked`]).
//! Registry events are returned as [`ChangeSet`]s and broadcast after the lock
//! is released. Owner notifications go through the
//! [`callback::NotificationDispatcher`] and never block the lock holder.

pub mod adapter;
pub mod callback;
pub mod device;
pub mod errors;
pub mod registry;
pub mod traits;
pub mod types;

pub use adapter::{AdapterGuard, CreateRequest, VirtualDisplayAdapter};
pub use callback::{CallbackMessage, NotificationDispatcher, NotificationWorker, OwnerCallback};
pub use device::{
    DeviceDump, DisplayGeometry, FRAME_PERIOD, PRESENTATION_DEADLINE_NANOS, REFRESH_RATE,
    VirtualDisplayDevice,
};
pub use errors::{AdapterError, CompositorError, RemoteError};
pub use traits::{
    CaptureSession, Compositor, DeathRecipient, DisplayDeviceListener, OwnerBinder,
    SessionStopObserver, VirtualDisplayCallback,
};
pub use types::{
    ChangeSet, DeviceChange, DeviceInfoFlags, DisplayDeviceEvent, DisplayDeviceInfo, DisplayState,
    NativeDisplayHandle, OwnerToken, PendingChanges, Rotation, Surface, TouchMode, VirtualDisplayFlags,
};
