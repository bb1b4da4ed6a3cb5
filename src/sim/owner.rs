use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::display::{DeathRecipient, OwnerBinder, OwnerToken, RemoteError};

/// An application process that can be killed on demand
pub struct SimOwner {
    token: OwnerToken,
    package_name: String,
    alive: AtomicBool,
    recipients: Mutex<Vec<Arc<dyn DeathRecipient>>>,
}

impl SimOwner {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            token: OwnerToken::new(),
            package_name: package_name.into(),
            alive: AtomicBool::new(true),
            recipients: Mutex::new(Vec::new()),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn linked_count(&self) -> usize {
        self.recipients().len()
    }

    /// Mark the process dead and notify every linked recipient on this thread
    pub fn kill(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Owner {} ({}) died", self.package_name, self.token);
        let recipients = std::mem::take(&mut *self.recipients());
        for recipient in recipients {
            recipient.binder_died();
        }
    }

    fn recipients(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn DeathRecipient>>> {
        self.recipients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OwnerBinder for SimOwner {
    fn token(&self) -> OwnerToken {
        self.token
    }

    fn link_to_death(&self, recipient: Arc<dyn DeathRecipient>) -> Result<(), RemoteError> {
        let mut recipients = self.recipients();
        if !self.is_alive() {
            return Err(RemoteError::DeadObject);
        }
        recipients.push(recipient);
        Ok(())
    }

    fn unlink_to_death(&self, recipient: &Arc<dyn DeathRecipient>) -> bool {
        let mut recipients = self.recipients();
        let before = recipients.len();
        recipients.retain(|linked| !std::ptr::addr_eq(Arc::as_ptr(linked), Arc::as_ptr(recipient)));
        recipients.len() != before
    }
}
