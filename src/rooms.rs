// SPDX-License-Identifier: GPL-3.0-or-later

//! Room Membership Tracker
//!
//! Maps an opaque room identifier to the identities that have joined it.
//! Membership is per-identity, not per-connection: a second device joining or
//! disconnecting does not change the identity's membership, and the handler
//! runs [`RoomRegistry::leave_all`] only when an identity's last connection
//! closes.
//!
//! A room is "active" once two distinct identities are present. A leave that
//! drops the count below two evicts the whole entry, and the inactive signal
//! fires only on the crossing from active.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::identity::Address;

/// Minimum distinct members for a room to be active (two-party chat).
const ACTIVE_THRESHOLD: usize = 2;

/// Thread-safe registry of room memberships.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, HashSet<Address>>>,
}

impl RoomRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        RoomRegistry {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `address` to the room. Idempotent.
    ///
    /// Returns true when this join crossed the room into active.
    pub fn join(&self, room_id: &str, address: Address) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        let members = rooms.entry(room_id.to_string()).or_default();
        let was_active = members.len() >= ACTIVE_THRESHOLD;
        members.insert(address);
        !was_active && members.len() >= ACTIVE_THRESHOLD
    }

    /// Removes `address` from the room. When the remaining membership is
    /// below the activity threshold the entry is deleted.
    ///
    /// Returns true when this leave crossed the room from active to inactive.
    pub fn leave(&self, room_id: &str, address: Address) -> bool {
        let mut rooms = self.rooms.lock().unwrap();
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let was_active = members.len() >= ACTIVE_THRESHOLD;
        if !members.remove(&address) {
            return false;
        }
        if members.len() < ACTIVE_THRESHOLD {
            rooms.remove(room_id);
            return was_active;
        }
        false
    }

    /// Removes `address` from every room it belongs to, applying the same
    /// below-threshold eviction per room. Returns the rooms that became
    /// inactive.
    pub fn leave_all(&self, address: Address) -> Vec<String> {
        let mut rooms = self.rooms.lock().unwrap();
        let mut deactivated = Vec::new();
        rooms.retain(|room_id, members| {
            let was_active = members.len() >= ACTIVE_THRESHOLD;
            if !members.remove(&address) {
                return true;
            }
            if members.len() < ACTIVE_THRESHOLD {
                if was_active {
                    deactivated.push(room_id.clone());
                }
                return false;
            }
            true
        });
        deactivated
    }

    /// Returns the member count of a room (0 if the entry does not exist).
    pub fn member_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.lock().unwrap();
        rooms.get(room_id).map_or(0, HashSet::len)
    }

    /// Returns the number of tracked (active) rooms.
    pub fn room_count(&self) -> usize {
        let rooms = self.rooms.lock().unwrap();
        rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
