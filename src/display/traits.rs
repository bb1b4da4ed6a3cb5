//! Contracts with the collaborators around the adapter
//!
//! None of these are implemented here: the compositor, the owning process,
//! the capture session and the display registry all live outside the adapter.
//! [`crate::sim`] provides in-process versions.

use async_trait::async_trait;
use std::sync::Arc;

use super::errors::{CompositorError, RemoteError};
use super::types::{DeviceChange, NativeDisplayHandle, OwnerToken, Surface};

/// Surface/compositor primitive that owns native display resources.
///
/// All calls are made with the display-subsystem lock held and must not block.
pub trait Compositor: Send + Sync {
    fn create_display(&self, name: &str, secure: bool) -> Result<NativeDisplayHandle, CompositorError>;

    fn destroy_display(&self, handle: NativeDisplayHandle);

    fn set_display_size(&self, handle: &NativeDisplayHandle, width: u32, height: u32);

    fn set_display_surface(&self, handle: &NativeDisplayHandle, surface: Option<&Surface>);

    /// Start batching native updates for a transaction window
    fn open_transaction(&self) {}

    /// Commit everything batched since `open_transaction`
    fn close_transaction(&self) {}
}

/// Observer of owner liveness
pub trait DeathRecipient: Send + Sync {
    fn binder_died(&self);
}

/// The owning process, as seen through its token
pub trait OwnerBinder: Send + Sync {
    fn token(&self) -> OwnerToken;

    /// Fails when the owner is already dead
    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>) -> Result<(), RemoteError>;

    /// Returns false if the recipient was not linked
    fn unlink_to_death(&self, recipient: &Arc<dyn DeathRecipient>) -> bool;
}

/// Observer of capture-session stop
pub trait SessionStopObserver: Send + Sync {
    fn on_stop(&self);
}

/// An active screen-capture grant
pub trait CaptureSession: Send + Sync {
    fn register_callback(&self, observer: Arc<dyn SessionStopObserver>) -> Result<(), RemoteError>;

    fn unregister_callback(&self, observer: &Arc<dyn SessionStopObserver>);
}

/// Cross-process callback of the display owner
#[async_trait]
pub trait VirtualDisplayCallback: Send + Sync {
    async fn on_paused(&self) -> Result<(), RemoteError>;

    async fn on_resumed(&self) -> Result<(), RemoteError>;

    async fn on_stopped(&self) -> Result<(), RemoteError>;
}

/// The enclosing display registry.
///
/// Never invoked while the display-subsystem lock is held.
pub trait DisplayDeviceListener: Send + Sync {
    fn on_display_device_event(&self, change: &DeviceChange);

    fn on_traversal_requested(&self);
}
