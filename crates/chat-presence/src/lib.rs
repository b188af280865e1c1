//! Presence: who is online, on which devices.
//!
//! A concurrency-safe mapping `user_id → list of sessions`, used both
//! server-wide (everyone online) and per room (everyone online *for this
//! topic*). The outer map is read-lock cheap; each user's list carries its
//! own mutex, subordinate to the map lock.
//!
//! Key deletion races key insertion: a user's last device can disconnect
//! while another device of the same user connects. The list container
//! carries a `dead` flag set under its lock when the key is removed; a
//! connect that lands on a dead list retries through the slow path and
//! reinstalls the key. Disconnect re-checks emptiness while holding the
//! list lock before removing the key.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chat_core::{ClientId, UserId};

/// One connected session of a user. `client_id` is unique across all
/// devices; equality for removal is by `client_id`.
pub trait Device {
    fn user_id(&self) -> &UserId;
    fn client_id(&self) -> &ClientId;
}

struct DeviceList<T> {
    devices: Vec<T>,
    /// Set when the key for this list has been removed from the map.
    dead: bool,
}

/// Concurrency-safe presence store.
pub struct PresenceStore<T> {
    users: RwLock<HashMap<UserId, Arc<Mutex<DeviceList<T>>>>>,
    len: AtomicUsize,
}

impl<T: Device + Clone> PresenceStore<T> {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Registers a device. Duplicate `client_id`s are the caller's bug but
    /// are tolerated; multiple devices per user are expected.
    pub fn connect(&self, device: T) {
        let user_id = device.user_id().clone();
        let mut device = Some(device);

        loop {
            let list = {
                let users = self.users.read().unwrap();
                users.get(&user_id).cloned()
            };

            if let Some(list) = list {
                let mut guard = list.lock().unwrap();
                if !guard.dead {
                    guard.devices.push(device.take().unwrap());
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                // The key was removed between the map read and the list
                // lock; fall through and reinstall.
            }

            let mut users = self.users.write().unwrap();
            match users.entry(user_id.clone()) {
                // Another connect reinstalled the key first; loop to use it.
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(DeviceList {
                        devices: vec![device.take().unwrap()],
                        dead: false,
                    })));
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Removes a device by `client_id`. Idempotent: removing an absent
    /// device changes nothing. Deletes the user's key when the list
    /// empties.
    pub fn disconnect(&self, device: &T) {
        let user_id = device.user_id();
        let client_id = device.client_id();

        let list = {
            let users = self.users.read().unwrap();
            users.get(user_id).cloned()
        };
        let Some(list) = list else { return };

        let emptied = {
            let mut guard = list.lock().unwrap();
            let before = guard.devices.len();
            guard.devices.retain(|d| d.client_id() != client_id);
            let removed = before - guard.devices.len();
            if removed == 0 {
                return;
            }
            self.len.fetch_sub(removed, Ordering::Relaxed);
            guard.devices.is_empty()
        };

        if emptied {
            let mut users = self.users.write().unwrap();
            let same_list = users
                .get(user_id)
                .is_some_and(|current| Arc::ptr_eq(current, &list));
            if same_list {
                // Re-check emptiness under both locks before removing the
                // key; a racing connect may have repopulated it.
                let mut guard = list.lock().unwrap();
                if guard.devices.is_empty() {
                    guard.dead = true;
                    drop(guard);
                    users.remove(user_id);
                }
            }
        }
    }

    /// Snapshot of the user's devices; safe to iterate without any lock.
    pub fn clients_for_user(&self, user_id: &UserId) -> Vec<T> {
        let list = {
            let users = self.users.read().unwrap();
            users.get(user_id).cloned()
        };
        match list {
            Some(list) => list.lock().unwrap().devices.clone(),
            None => Vec::new(),
        }
    }

    /// Devices of each listed user, concatenated.
    pub fn clients_for_users<'a>(&self, user_ids: impl IntoIterator<Item = &'a UserId>) -> Vec<T> {
        user_ids
            .into_iter()
            .flat_map(|u| self.clients_for_user(u))
            .collect()
    }

    /// Snapshot of every online device. Connects and disconnects racing
    /// with the snapshot may or may not be observed.
    pub fn iter_all(&self) -> Vec<T> {
        let lists: Vec<Arc<Mutex<DeviceList<T>>>> = {
            let users = self.users.read().unwrap();
            users.values().cloned().collect()
        };
        lists
            .iter()
            .flat_map(|list| list.lock().unwrap().devices.clone())
            .collect()
    }

    /// Total live session count.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Device + Clone> Default for PresenceStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
