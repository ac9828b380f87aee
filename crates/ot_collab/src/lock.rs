//! Exclusive locks over named document regions.
//!
//! Locks sit outside the OT path: they let a user claim a region (a table,
//! a heading, a code block) before a structural edit that transformation
//! alone would not reconcile well.
//!
//! Locks never expire unless a lease is configured. With a lease, a lock that
//! has not been re-acquired within the lease window can be taken over by
//! another user, so a crashed client cannot pin a region forever.

use crate::ids::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A held region lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLock {
    /// Current holder
    pub holder: UserId,
    /// When the holder acquired or last refreshed the lock
    pub acquired_at: DateTime<Utc>,
    /// When the lock may be taken over (only with a lease)
    pub expires_at: Option<DateTime<Utc>>,
}

impl RegionLock {
    /// Whether the lease ran out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Region name → holder table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManager {
    locks: BTreeMap<String, RegionLock>,
    /// Lease length in milliseconds
    #[serde(default)]
    lease_ms: Option<u64>,
}

impl LockManager {
    /// Create a lock table without leases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lock table whose locks expire after `lease_ms`.
    pub fn with_lease(lease_ms: Option<u64>) -> Self {
        Self {
            locks: BTreeMap::new(),
            lease_ms,
        }
    }

    pub fn lease_ms(&self) -> Option<u64> {
        self.lease_ms
    }

    pub fn set_lease(&mut self, lease_ms: Option<u64>) {
        self.lease_ms = lease_ms;
    }

    /// Claim `region` for `user_id`.
    ///
    /// Returns `false` without side effects when another user holds an
    /// unexpired lock. Re-acquiring by the holder succeeds and refreshes the
    /// lease.
    pub fn acquire(&mut self, region: &str, user_id: &UserId) -> bool {
        self.acquire_at(region, user_id, Utc::now())
    }

    /// [`acquire`](Self::acquire) with an explicit clock.
    pub fn acquire_at(&mut self, region: &str, user_id: &UserId, now: DateTime<Utc>) -> bool {
        if let Some(existing) = self.locks.get(region) {
            if existing.holder != *user_id {
                if !existing.is_expired(now) {
                    return false;
                }
                tracing::info!(
                    region,
                    previous_holder = %existing.holder,
                    new_holder = %user_id,
                    "Taking over expired region lock"
                );
            }
        }

        let expires_at = self
            .lease_ms
            .map(|ms| now + Duration::milliseconds(ms as i64));
        self.locks.insert(
            region.to_string(),
            RegionLock {
                holder: user_id.clone(),
                acquired_at: now,
                expires_at,
            },
        );
        true
    }

    /// Release `region`. Fails when `user_id` is not the current holder.
    pub fn release(&mut self, region: &str, user_id: &UserId) -> bool {
        match self.locks.get(region) {
            Some(lock) if lock.holder == *user_id => {
                self.locks.remove(region);
                true
            }
            _ => false,
        }
    }

    /// Drop every lock held by `user_id`, returning the freed regions.
    pub fn release_all(&mut self, user_id: &UserId) -> Vec<String> {
        let regions = self.regions_held_by(user_id);
        for region in &regions {
            self.locks.remove(region);
        }
        regions
    }

    /// Regions whose lease has run out at `now`.
    pub fn expired_regions(&self, now: DateTime<Utc>) -> Vec<String> {
        self.locks
            .iter()
            .filter(|(_, lock)| lock.is_expired(now))
            .map(|(region, _)| region.clone())
            .collect()
    }

    /// Remove expired locks, returning `(region, former holder)` pairs.
    pub fn release_expired(&mut self, now: DateTime<Utc>) -> Vec<(String, UserId)> {
        let expired = self.expired_regions(now);
        expired
            .into_iter()
            .filter_map(|region| {
                self.locks
                    .remove(&region)
                    .map(|lock| (region, lock.holder))
            })
            .collect()
    }

    pub fn holder(&self, region: &str) -> Option<&UserId> {
        self.locks.get(region).map(|lock| &lock.holder)
    }

    pub fn get(&self, region: &str) -> Option<&RegionLock> {
        self.locks.get(region)
    }

    pub fn is_locked(&self, region: &str) -> bool {
        self.locks.contains_key(region)
    }

    pub fn regions_held_by(&self, user_id: &UserId) -> Vec<String> {
        self.locks
            .iter()
            .filter(|(_, lock)| lock.holder == *user_id)
            .map(|(region, _)| region.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegionLock)> {
        self.locks.iter()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
