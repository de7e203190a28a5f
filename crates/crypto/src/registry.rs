//! Index of pairwise sessions per remote device, most recently used first.
//!
//! Holds ids, owners and use stamps only. The sessions themselves live in
//! the device's session table.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    session_id: String,
    last_used: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    devices: HashMap<String, Vec<Slot>>,
    owners: HashMap<String, String>,
    clock: u64,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session ids for `device_key`, most recently used first. Empty when
    /// the device is unknown.
    pub fn session_ids_for_device(&self, device_key: &str) -> Vec<String> {
        self.devices
            .get(device_key)
            .map(|slots| slots.iter().map(|s| s.session_id.clone()).collect())
            .unwrap_or_default()
    }

    /// The preferred (most recently used) session for `device_key`.
    pub fn session_id_for_device(&self, device_key: &str) -> Option<String> {
        self.devices
            .get(device_key)
            .and_then(|slots| slots.first())
            .map(|s| s.session_id.clone())
    }

    pub fn device_for_session(&self, session_id: &str) -> Option<&str> {
        self.owners.get(session_id).map(String::as_str)
    }

    pub fn contains(&self, device_key: &str, session_id: &str) -> bool {
        self.device_for_session(session_id) == Some(device_key)
    }

    /// Next use stamp: wall-clock milliseconds, but always strictly greater
    /// than any stamp handed out or loaded before.
    pub fn next_stamp(&mut self) -> u64 {
        self.clock = now_millis().max(self.clock.saturating_add(1));
        self.clock
    }

    /// Register `session_id` under `device_key` with a known stamp, keeping
    /// the device's list ordered by stamp. Re-inserting moves the entry.
    pub fn insert(&mut self, device_key: &str, session_id: &str, last_used: u64) {
        self.remove_slot(session_id);
        self.clock = self.clock.max(last_used);

        let slots = self.devices.entry(device_key.to_string()).or_default();
        let pos = slots
            .iter()
            .position(|s| s.last_used < last_used)
            .unwrap_or(slots.len());
        slots.insert(
            pos,
            Slot {
                session_id: session_id.to_string(),
                last_used,
            },
        );
        self.owners
            .insert(session_id.to_string(), device_key.to_string());
    }

    /// Mark `session_id` as used at `stamp`, moving it to the front of its
    /// device's list. Unknown ids are ignored.
    pub fn record_use(&mut self, session_id: &str, stamp: u64) {
        let Some(device_key) = self.owners.get(session_id).cloned() else {
            return;
        };
        self.insert(&device_key, session_id, stamp);
    }

    fn remove_slot(&mut self, session_id: &str) {
        let Some(device_key) = self.owners.remove(session_id) else {
            return;
        };
        if let Some(slots) = self.devices.get_mut(&device_key) {
            slots.retain(|s| s.session_id != session_id);
        }
    }
}
