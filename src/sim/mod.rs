//! In-process collaborators
//!
//! Stand-ins for the compositor, the owning process, the capture session and
//! the display registry. The binary runs its scripted session against them
//! and the tests use them to observe what the adapter did.

pub mod compositor;
pub mod owner;
pub mod recorder;
pub mod session;

pub use compositor::{CompositorOp, InMemoryCompositor, SimDisplay};
pub use owner::SimOwner;
pub use recorder::{RecordingCallback, RecordingListener};
pub use session::SimCaptureSession;
