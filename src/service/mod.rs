//! Display service host
//!
//! Drives the adapter the way the enclosing display service does: every
//! request runs under the display-subsystem lock, the resulting events are
//! broadcast once the lock is gone, and a frame-paced loop opens a
//! transaction window whenever a device asked for one.

pub mod health;
pub mod state;

pub use health::{HealthSummary, ServiceHealth};
pub use state::ServiceState;

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::display::callback::{DeliveryHealth, DeliverySummary};
use crate::display::errors::Result;
use crate::display::{
    ChangeSet, Compositor, CreateRequest, DeviceChange, DeviceDump, DisplayDeviceInfo,
    DisplayDeviceListener, DisplayState, FRAME_PERIOD, NotificationDispatcher, OwnerToken, Surface,
    VirtualDisplayAdapter,
};

/// Sits between the adapter and the display registry: counts events and
/// remembers that a transaction window is due.
struct TraversalScheduler {
    downstream: Arc<dyn DisplayDeviceListener>,
    pending: AtomicBool,
    health: Arc<ServiceHealth>,
}

impl TraversalScheduler {
    fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl DisplayDeviceListener for TraversalScheduler {
    fn on_display_device_event(&self, change: &DeviceChange) {
        self.health.record_events(1);
        self.downstream.on_display_device_event(change);
    }

    fn on_traversal_requested(&self) {
        self.pending.store(true, Ordering::Release);
        self.downstream.on_traversal_requested();
    }
}

/// State of the whole service, serializable for `--dump`
#[derive(Debug, Serialize)]
pub struct ServiceDump {
    pub generated_at: String,
    pub state: ServiceState,
    pub health: HealthSummary,
    pub notifications: DeliverySummary,
    pub devices: Vec<DeviceDump>,
}

pub struct VirtualDisplayService {
    adapter: VirtualDisplayAdapter,
    scheduler: Arc<TraversalScheduler>,
    health: Arc<ServiceHealth>,
    delivery: Arc<DeliveryHealth>,
    state: Mutex<ServiceState>,
}

impl VirtualDisplayService {
    pub fn new(
        compositor: Arc<dyn Compositor>,
        listener: Arc<dyn DisplayDeviceListener>,
        dispatcher: NotificationDispatcher,
        config: Config,
    ) -> Self {
        let health = Arc::new(ServiceHealth::new());
        let scheduler = Arc::new(TraversalScheduler {
            downstream: listener,
            pending: AtomicBool::new(false),
            health: health.clone(),
        });
        let delivery = dispatcher.health();
        let adapter = VirtualDisplayAdapter::new(compositor, scheduler.clone(), dispatcher, config);

        Self {
            adapter,
            scheduler,
            health,
            delivery,
            state: Mutex::new(ServiceState::Idle),
        }
    }

    pub fn adapter(&self) -> &VirtualDisplayAdapter {
        &self.adapter
    }

    pub fn health(&self) -> Arc<ServiceHealth> {
        self.health.clone()
    }

    pub fn delivery_health(&self) -> Arc<DeliveryHealth> {
        self.delivery.clone()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the change set that was broadcast
    pub fn create_virtual_display(&self, request: CreateRequest) -> Result<ChangeSet> {
        let result = self.adapter.lock().create_virtual_display_locked(request);
        self.publish(result)
    }

    pub fn resize_virtual_display(
        &self,
        token: OwnerToken,
        width: u32,
        height: u32,
        density_dpi: u32,
    ) -> Result<ChangeSet> {
        let result = self
            .adapter
            .lock()
            .resize_virtual_display_locked(token, width, height, density_dpi);
        self.publish(result)
    }

    pub fn set_virtual_display_surface(&self, token: OwnerToken, surface: Option<Surface>) -> ChangeSet {
        let changes = self
            .adapter
            .lock()
            .set_virtual_display_surface_locked(token, surface);
        self.adapter.broadcast(&changes);
        changes
    }

    pub fn release_virtual_display(&self, token: OwnerToken) -> Option<DeviceChange> {
        let removed = self.adapter.lock().release_virtual_display_locked(token)?;
        let mut changes = ChangeSet::new();
        changes.push(removed.clone());
        self.adapter.broadcast(&changes);
        Some(removed)
    }

    pub fn request_display_state(&self, token: OwnerToken, state: DisplayState) -> Result<bool> {
        let result = self.adapter.lock().request_display_state_locked(token, state);
        if result.is_err() {
            self.health.record_rejected();
        }
        result
    }

    /// Release every display, live or stopped. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let mut changes = ChangeSet::new();
        {
            let mut guard = self.adapter.lock();
            for token in guard.tokens_locked() {
                if let Some(removed) = guard.release_virtual_display_locked(token) {
                    changes.push(removed);
                }
            }
        }
        self.adapter.broadcast(&changes);
        changes.changes().len()
    }

    /// Run one transaction window now, whether or not one was requested
    pub fn perform_traversal(&self) -> usize {
        self.scheduler.take_pending();
        let applied = self.adapter.lock().perform_traversal_in_transaction_locked();
        self.health.record_traversal(applied);
        if applied > 0 {
            debug!("Transaction window applied changes to {} display(s)", applied);
        }
        applied
    }

    pub fn display_info(&self, token: OwnerToken) -> Option<Arc<DisplayDeviceInfo>> {
        self.adapter.lock().display_device_info_locked(token)
    }

    pub fn len(&self) -> usize {
        self.adapter.lock().len_locked()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dump(&self) -> ServiceDump {
        let devices = self.adapter.lock().dump_locked();
        ServiceDump {
            generated_at: chrono::Local::now().to_rfc3339(),
            state: self.state(),
            health: self.health.summary(),
            notifications: self.delivery.summary(),
            devices,
        }
    }

    /// Open a transaction window once per frame while one is requested,
    /// until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.transition(ServiceState::Running {
            started_at: std::time::Instant::now(),
        }) {
            return;
        }
        info!("Traversal loop started, frame period {:?}", FRAME_PERIOD);

        let mut interval = tokio::time::interval(FRAME_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if self.scheduler.take_pending() {
                        let applied = self.adapter.lock().perform_traversal_in_transaction_locked();
                        self.health.record_traversal(applied);
                    }
                }
            }
        }

        if let ServiceState::Running { started_at } = self.state() {
            debug!("Traversal loop ran for {:?}", started_at.elapsed());
        }
        self.transition(ServiceState::Stopping);
        // Whatever was requested before cancellation still reaches the compositor
        if self.scheduler.take_pending() {
            let applied = self.adapter.lock().perform_traversal_in_transaction_locked();
            self.health.record_traversal(applied);
        }
        self.transition(ServiceState::Stopped);
        info!("Traversal loop stopped: {}", self.health.summary());
    }

    fn transition(&self, target: ServiceState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(&target) {
            warn!("Invalid service transition: {} -> {}", *state, target);
            return false;
        }
        debug!("Service transition: {} -> {}", *state, target);
        *state = target;
        true
    }

    fn publish(&self, result: Result<ChangeSet>) -> Result<ChangeSet> {
        match result {
            Ok(changes) => {
                self.adapter.broadcast(&changes);
                Ok(changes)
            }
            Err(e) => {
                self.health.record_rejected();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::callback;
    use crate::display::{AdapterError, DisplayDeviceEvent, DisplayGeometry, OwnerBinder, VirtualDisplayFlags};
    use crate::sim::{InMemoryCompositor, RecordingCallback, RecordingListener, SimOwner};
    use std::sync::OnceLock;
    use std::time::Duration;

    /// Registry that re-enters the adapter lock on every event
    #[derive(Default)]
    struct LockProbe {
        adapter: OnceLock<VirtualDisplayAdapter>,
        seen_len: Mutex<Vec<usize>>,
    }

    impl DisplayDeviceListener for LockProbe {
        fn on_display_device_event(&self, _change: &DeviceChange) {
            if let Some(adapter) = self.adapter.get() {
                let len = adapter.lock().len_locked();
                self.seen_len.lock().unwrap().push(len);
            }
        }

        fn on_traversal_requested(&self) {}
    }

    fn service_with(listener: Arc<dyn DisplayDeviceListener>) -> (VirtualDisplayService, Arc<InMemoryCompositor>) {
        let compositor = Arc::new(InMemoryCompositor::new());
        let (dispatcher, _worker) = callback::channel();
        let service = VirtualDisplayService::new(compositor.clone(), listener, dispatcher, Config::default());
        (service, compositor)
    }

    fn request(owner: &Arc<SimOwner>, surface: Option<Surface>) -> CreateRequest {
        CreateRequest {
            owner: owner.clone(),
            callback: Arc::new(RecordingCallback::new()),
            capture_session: None,
            owner_uid: 10_001,
            owner_package_name: owner.package_name().to_string(),
            name: "mirror".to_string(),
            geometry: DisplayGeometry::new(1280, 720, 320),
            surface,
            flags: VirtualDisplayFlags::PUBLIC | VirtualDisplayFlags::PRESENTATION,
        }
    }

    #[test]
    fn test_events_broadcast_without_lock() {
        let probe = Arc::new(LockProbe::default());
        let (service, _compositor) = service_with(probe.clone());
        let _ = probe.adapter.set(service.adapter().clone());

        let owner = Arc::new(SimOwner::new("com.example.mirror"));
        service.create_virtual_display(request(&owner, None)).unwrap();
        owner.kill();

        // The probe could only lock the adapter because no one else held it
        assert_eq!(*probe.seen_len.lock().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_service_counts_events_and_rejections() {
        let listener = Arc::new(RecordingListener::new());
        let (service, compositor) = service_with(listener.clone());
        let owner = Arc::new(SimOwner::new("com.example.mirror"));

        service.create_virtual_display(request(&owner, None)).unwrap();
        let duplicate = service.create_virtual_display(request(&owner, None));
        assert!(matches!(duplicate, Err(AdapterError::DuplicateOwner(_))));

        let unknown = service.request_display_state(OwnerToken::new(), DisplayState::On);
        assert!(matches!(unknown, Err(AdapterError::UnknownOwner(_))));

        let removed = service.release_virtual_display(owner.token()).unwrap();
        assert_eq!(removed.event, DisplayDeviceEvent::Removed);
        assert!(service.release_virtual_display(owner.token()).is_none());

        let summary = service.health().summary();
        assert_eq!(summary.events_broadcast, 2);
        assert_eq!(summary.rejected_requests, 2);
        assert_eq!(
            listener.events(),
            vec![
                (owner.token(), DisplayDeviceEvent::Added),
                (owner.token(), DisplayDeviceEvent::Removed),
            ]
        );
        assert_eq!(compositor.created_count(), 1);
        assert_eq!(compositor.destroyed_count(), 1);
    }

    #[test]
    fn test_release_all() {
        let listener = Arc::new(RecordingListener::new());
        let (service, compositor) = service_with(listener.clone());
        let owners: Vec<_> = (0..3)
            .map(|i| Arc::new(SimOwner::new(format!("com.example.app{}", i))))
            .collect();
        for owner in &owners {
            service.create_virtual_display(request(owner, None)).unwrap();
        }
        assert_eq!(service.len(), 3);

        assert_eq!(service.release_all(), 3);
        assert!(service.is_empty());
        assert_eq!(compositor.destroyed_count(), 3);
        assert!(owners.iter().all(|owner| owner.linked_count() == 0));
        assert_eq!(service.release_all(), 0);
    }

    #[test]
    fn test_dump_serializes() {
        let (service, _compositor) = service_with(Arc::new(RecordingListener::new()));
        let owner = Arc::new(SimOwner::new("com.example.mirror"));
        service
            .create_virtual_display(request(&owner, Some(Surface::new("mirror-surface"))))
            .unwrap();

        let value = serde_json::to_value(service.dump()).unwrap();
        assert_eq!(value["state"], "Idle");
        assert_eq!(value["devices"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["devices"][0]["name"], "mirror");
        assert_eq!(value["health"]["events_broadcast"], 1);
    }

    #[tokio::test]
    async fn test_run_applies_requested_changes() {
        let (service, compositor) = service_with(Arc::new(RecordingListener::new()));
        let service = Arc::new(service);
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        let owner = Arc::new(SimOwner::new("com.example.mirror"));
        service
            .create_virtual_display(request(&owner, Some(Surface::new("mirror-surface"))))
            .unwrap();
        service
            .resize_virtual_display(owner.token(), 1920, 1080, 320)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(service.state().is_running());

        let displays = compositor.live_displays();
        assert_eq!(displays.len(), 1);
        assert_eq!((displays[0].width, displays[0].height), (1920, 1080));
        assert!(displays[0].surface.is_some());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(service.health().traversals() >= 1);
    }

    #[tokio::test]
    async fn test_run_idles_without_requests() {
        let (service, _compositor) = service_with(Arc::new(RecordingListener::new()));
        let service = Arc::new(service);
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(service.health().traversals(), 0);

        // A stopped loop does not start again
        service.run(CancellationToken::new()).await;
        assert_eq!(service.state(), ServiceState::Stopped);
    }
}
