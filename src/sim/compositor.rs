use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::display::{Compositor, CompositorError, NativeDisplayHandle, Surface};

/// One call received by the compositor, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorOp {
    Create { id: u64, name: String, secure: bool },
    Destroy { id: u64 },
    SetSize { id: u64, width: u32, height: u32 },
    SetSurface { id: u64, surface: Option<u64> },
    OpenTransaction,
    CloseTransaction,
}

/// Compositor-side view of a native display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDisplay {
    pub id: u64,
    pub name: String,
    pub secure: bool,
    /// Zero until the first resize reaches the compositor
    pub width: u32,
    pub height: u32,
    pub surface: Option<u64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    displays: HashMap<u64, SimDisplay>,
    ops: Vec<CompositorOp>,
    created: u64,
    destroyed: u64,
}

/// Compositor that keeps its displays in memory and records every call
#[derive(Default)]
pub struct InMemoryCompositor {
    state: Mutex<State>,
    fail_next_create: AtomicBool,
}

impl InMemoryCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_display` fail
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> u64 {
        self.state().created
    }

    pub fn destroyed_count(&self) -> u64 {
        self.state().destroyed
    }

    pub fn ops(&self) -> Vec<CompositorOp> {
        self.state().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }

    /// Displays not destroyed yet, oldest first
    pub fn live_displays(&self) -> Vec<SimDisplay> {
        let mut displays: Vec<_> = self.state().displays.values().cloned().collect();
        displays.sort_by_key(|display| display.id);
        displays
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Compositor for InMemoryCompositor {
    fn create_display(&self, name: &str, secure: bool) -> Result<NativeDisplayHandle, CompositorError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(CompositorError::AllocationFailed(name.to_string()));
        }

        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.displays.insert(
            id,
            SimDisplay {
                id,
                name: name.to_string(),
                secure,
                width: 0,
                height: 0,
                surface: None,
            },
        );
        state.created += 1;
        state.ops.push(CompositorOp::Create {
            id,
            name: name.to_string(),
            secure,
        });
        debug!("Compositor: created display {} '{}'", id, name);
        Ok(NativeDisplayHandle::from_raw(id))
    }

    fn destroy_display(&self, handle: NativeDisplayHandle) {
        let id = handle.as_raw();
        let mut state = self.state();
        if state.displays.remove(&id).is_some() {
            state.destroyed += 1;
        }
        state.ops.push(CompositorOp::Destroy { id });
        debug!("Compositor: destroyed display {}", id);
    }

    fn set_display_size(&self, handle: &NativeDisplayHandle, width: u32, height: u32) {
        let id = handle.as_raw();
        let mut state = self.state();
        if let Some(display) = state.displays.get_mut(&id) {
            display.width = width;
            display.height = height;
        }
        state.ops.push(CompositorOp::SetSize { id, width, height });
    }

    fn set_display_surface(&self, handle: &NativeDisplayHandle, surface: Option<&Surface>) {
        let id = handle.as_raw();
        let surface = surface.map(Surface::id);
        let mut state = self.state();
        if let Some(display) = state.displays.get_mut(&id) {
            display.surface = surface;
        }
        state.ops.push(CompositorOp::SetSurface { id, surface });
    }

    fn open_transaction(&self) {
        self.state().ops.push(CompositorOp::OpenTransaction);
    }

    fn close_transaction(&self) {
        self.state().ops.push(CompositorOp::CloseTransaction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_destroy() {
        let compositor = InMemoryCompositor::new();
        let handle = compositor.create_display("cast", true).unwrap();
        compositor.set_display_size(&handle, 640, 480);

        let displays = compositor.live_displays();
        assert_eq!(displays.len(), 1);
        assert!(displays[0].secure);
        assert_eq!((displays[0].width, displays[0].height), (640, 480));

        compositor.destroy_display(handle);
        assert!(compositor.live_displays().is_empty());
        assert_eq!(compositor.created_count(), 1);
        assert_eq!(compositor.destroyed_count(), 1);
    }

    #[test]
    fn test_fail_next_create() {
        let compositor = InMemoryCompositor::new();
        compositor.fail_next_create();
        assert!(compositor.create_display("cast", false).is_err());
        assert!(compositor.create_display("cast", false).is_ok());
    }
}
