//! Owner token → device mapping
//!
//! Live devices accept resize and surface requests. Devices whose capture
//! session stopped are parked: they no longer answer to those requests, but
//! still own a native display that an explicit release or the owner's death
//! tears down.

use std::collections::HashMap;

use super::device::VirtualDisplayDevice;
use super::types::{DeviceId, OwnerToken};

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    live: HashMap<OwnerToken, VirtualDisplayDevice>,
    stopped: HashMap<OwnerToken, VirtualDisplayDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the token owns a device, live or parked
    pub fn contains(&self, token: &OwnerToken) -> bool {
        self.live.contains_key(token) || self.stopped.contains_key(token)
    }

    /// Register a device; hands it back if the token is already taken
    pub fn insert(&mut self, device: VirtualDisplayDevice) -> Result<(), VirtualDisplayDevice> {
        let token = device.token();
        if self.contains(&token) {
            return Err(device);
        }
        self.live.insert(token, device);
        Ok(())
    }

    /// Look up a device regardless of whether it is live or parked
    pub fn find(&self, token: &OwnerToken) -> Option<&VirtualDisplayDevice> {
        self.live.get(token).or_else(|| self.stopped.get(token))
    }

    pub fn get_mut(&mut self, token: &OwnerToken) -> Option<&mut VirtualDisplayDevice> {
        self.live.get_mut(token)
    }

    /// Look up a device regardless of whether it is live or parked
    pub fn find_mut(&mut self, token: &OwnerToken) -> Option<&mut VirtualDisplayDevice> {
        match self.live.get_mut(token) {
            Some(device) => Some(device),
            None => self.stopped.get_mut(token),
        }
    }

    /// Remove the device owned by `token`, live or parked
    pub fn take(&mut self, token: &OwnerToken) -> Option<VirtualDisplayDevice> {
        self.live.remove(token).or_else(|| self.stopped.remove(token))
    }

    /// Remove the device owned by `token` only if it is the instance `id`
    pub fn take_matching(&mut self, token: &OwnerToken, id: DeviceId) -> Option<VirtualDisplayDevice> {
        if self.live.get(token).is_some_and(|device| device.id() == id) {
            return self.live.remove(token);
        }
        if self.stopped.get(token).is_some_and(|device| device.id() == id) {
            return self.stopped.remove(token);
        }
        None
    }

    /// Move the live instance `id` to the parked set
    pub fn park_matching(&mut self, token: &OwnerToken, id: DeviceId) -> Option<&mut VirtualDisplayDevice> {
        if !self.live.get(token).is_some_and(|device| device.id() == id) {
            return None;
        }
        let device = self.live.remove(token)?;
        Some(self.stopped.entry(*token).or_insert(device))
    }

    pub fn is_stopped(&self, token: &OwnerToken) -> bool {
        self.stopped.contains_key(token)
    }

    /// Every device that still owns a native display
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VirtualDisplayDevice> {
        self.live.values_mut().chain(self.stopped.values_mut())
    }

    pub fn tokens(&self) -> Vec<OwnerToken> {
        let mut tokens: Vec<_> = self.live.keys().chain(self.stopped.keys()).copied().collect();
        tokens.sort();
        tokens
    }

    pub fn len(&self) -> usize {
        self.live.len() + self.stopped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty() && self.stopped.is_empty()
    }
}
