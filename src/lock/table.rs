use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::api::LockReply;
use crate::model::*;

/// A live claim on a desk. Absent record means unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub desk_id: DeskId,
    pub holder: UserRef,
    pub lease: Ulid,
    pub issued_at: Ms,
    pub refreshed_at: Ms,
    pub expires_at: Ms,
}

impl LockRecord {
    pub fn is_live(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

/// Authoritative per-desk soft locks, one holder per desk.
///
/// Every record carries its own expiry; a record past it is treated as
/// absent by every operation, so a crashed client's lock lapses after one
/// TTL even before the reaper gets to it.
pub struct LockTable {
    locks: DashMap<DeskId, LockRecord>,
    ttl_ms: Ms,
    max_hold_ms: Ms,
}

impl LockTable {
    pub fn new(ttl_ms: Ms, max_hold_ms: Ms) -> Self {
        Self {
            locks: DashMap::new(),
            ttl_ms,
            max_hold_ms,
        }
    }

    pub fn ttl_ms(&self) -> Ms {
        self.ttl_ms
    }

    /// Grant when free or expired; re-grant (extending the TTL, keeping the
    /// issue time) when `holder` already has it.
    pub fn acquire(&self, desk_id: DeskId, holder: &UserRef, now: Ms) -> LockReply {
        let fresh = || LockRecord {
            desk_id,
            holder: holder.clone(),
            lease: Ulid::new(),
            issued_at: now,
            refreshed_at: now,
            expires_at: now + self.ttl_ms,
        };
        match self.locks.entry(desk_id) {
            Entry::Vacant(e) => {
                e.insert(fresh());
                LockReply::Granted
            }
            Entry::Occupied(mut e) => {
                let record = e.get_mut();
                if !record.is_live(now) {
                    *record = fresh();
                    LockReply::Granted
                } else if record.holder.id == holder.id {
                    record.refreshed_at = now;
                    record.expires_at = now + self.ttl_ms;
                    LockReply::Granted
                } else {
                    LockReply::Denied {
                        holder: record.holder.name.clone(),
                    }
                }
            }
        }
    }

    /// Extend the holder's lock. Fails for non-holders, for expired locks and
    /// once the lock has been held longer than the max hold time, in which
    /// case it is dropped.
    pub fn refresh(&self, desk_id: DeskId, holder: UserId, now: Ms) -> bool {
        let Entry::Occupied(mut e) = self.locks.entry(desk_id) else {
            return false;
        };
        let record = e.get_mut();
        if !record.is_live(now) || record.holder.id != holder {
            return false;
        }
        if now - record.issued_at > self.max_hold_ms {
            e.remove();
            return false;
        }
        record.refreshed_at = now;
        record.expires_at = now + self.ttl_ms;
        true
    }

    /// Drop the lock. Succeeds when nothing live is held; fails only when
    /// somebody else holds it.
    pub fn release(&self, desk_id: DeskId, holder: UserId, now: Ms) -> bool {
        let Entry::Occupied(e) = self.locks.entry(desk_id) else {
            return true;
        };
        let record = e.get();
        if record.is_live(now) && record.holder.id != holder {
            return false;
        }
        e.remove();
        true
    }

    pub fn read(&self, desk_id: DeskId, now: Ms) -> Option<LockRecord> {
        self.locks
            .get(&desk_id)
            .map(|r| r.value().clone())
            .filter(|r| r.is_live(now))
    }

    /// Live holder other than `viewer`, if any.
    pub fn held_by_other(&self, desk_id: DeskId, viewer: UserId, now: Ms) -> Option<UserRef> {
        self.read(desk_id, now)
            .filter(|r| r.holder.id != viewer)
            .map(|r| r.holder)
    }

    /// Remove and return every expired record.
    pub fn purge_expired(&self, now: Ms) -> Vec<LockRecord> {
        let expired: Vec<DeskId> = self
            .locks
            .iter()
            .filter(|r| !r.value().is_live(now))
            .map(|r| *r.key())
            .collect();
        expired
            .into_iter()
            .filter_map(|desk| self.locks.remove_if(&desk, |_, r| !r.is_live(now)))
            .map(|(_, r)| r)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
