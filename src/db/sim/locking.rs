//! Lock table of the simulated engine.

use crate::db::{LockMode, RequestStatus, ResourceType, SessionId};
use std::collections::BTreeMap;

pub(super) type TxId = u64;

/// A lockable resource. Variant order is the order lock records are listed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(super) enum Resource {
    Object { object_id: u64 },
    Page { object_id: u64, page: u32 },
    Rid { object_id: u64, page: u32, slot: u32 },
    Key { object_id: u64, hash: u64 },
}

impl Resource {
    pub fn object_id(&self) -> u64 {
        match *self {
            Resource::Object { object_id }
            | Resource::Page { object_id, .. }
            | Resource::Rid { object_id, .. }
            | Resource::Key { object_id, .. } => object_id,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Object { .. } => ResourceType::Table,
            Resource::Rid { .. } | Resource::Key { .. } => ResourceType::Row,
            Resource::Page { .. } => ResourceType::Other,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Resource::Object { .. })
    }
}

/// One granted or queued request on a resource.
#[derive(Debug, Clone, Copy)]
pub(super) struct LockRequest {
    pub tx: TxId,
    pub session: SessionId,
    pub mode: LockMode,
    pub status: RequestStatus,
}

/// A request that cannot be granted yet.
#[derive(Debug, Clone, Copy)]
pub(super) struct Conflict {
    pub resource: Resource,
    pub requested: LockMode,
    pub holder: SessionId,
}

#[derive(Debug, Default)]
pub(super) struct LockTable {
    entries: BTreeMap<Resource, Vec<LockRequest>>,
}

impl LockTable {
    /// Session holding a granted lock on `resource` that conflicts with `mode` for `tx`.
    pub fn conflict(&self, resource: Resource, tx: TxId, mode: LockMode) -> Option<SessionId> {
        self.entries.get(&resource).and_then(|requests| {
            requests
                .iter()
                .find(|r| {
                    r.tx != tx
                        && r.status == RequestStatus::Granted
                        && !mode.compatible_with(r.mode)
                })
                .map(|r| r.session)
        })
    }

    /// Whether `tx` holds a granted lock on `resource` at least as strong as `mode`.
    pub fn holds(&self, resource: Resource, tx: TxId, mode: LockMode) -> bool {
        self.entries.get(&resource).is_some_and(|requests| {
            requests.iter().any(|r| {
                r.tx == tx
                    && r.status == RequestStatus::Granted
                    && r.mode.strength() >= mode.strength()
            })
        })
    }

    /// Whether any other transaction holds a granted lock on `resource`.
    pub fn held_by_others(&self, resource: Resource, tx: TxId) -> bool {
        self.entries.get(&resource).is_some_and(|requests| {
            requests
                .iter()
                .any(|r| r.tx != tx && r.status == RequestStatus::Granted)
        })
    }

    /// Grant `mode` on `resource`, upgrading a weaker lock `tx` already holds.
    ///
    /// Returns the conflicting session instead when the grant is not possible.
    pub fn acquire(
        &mut self,
        resource: Resource,
        tx: TxId,
        session: SessionId,
        mode: LockMode,
    ) -> Result<(), SessionId> {
        if let Some(holder) = self.conflict(resource, tx, mode) {
            return Err(holder);
        }

        let requests = self.entries.entry(resource).or_default();
        requests.retain(|r| !(r.tx == tx && r.status == RequestStatus::Waiting));
        match requests
            .iter_mut()
            .find(|r| r.tx == tx && r.status == RequestStatus::Granted)
        {
            Some(held) => {
                if mode.strength() > held.mode.strength() {
                    held.mode = mode;
                }
            }
            None => requests.push(LockRequest {
                tx,
                session,
                mode,
                status: RequestStatus::Granted,
            }),
        }
        Ok(())
    }

    /// Record that `tx` is queued behind a conflicting holder.
    pub fn mark_waiting(&mut self, conflict: &Conflict, tx: TxId, session: SessionId) {
        let requests = self.entries.entry(conflict.resource).or_default();
        let already = requests
            .iter()
            .any(|r| r.tx == tx && r.status == RequestStatus::Waiting);
        if !already {
            requests.push(LockRequest {
                tx,
                session,
                mode: conflict.requested,
                status: RequestStatus::Waiting,
            });
        }
    }

    /// Drop every queued request of `tx`.
    pub fn clear_waiting(&mut self, tx: TxId) {
        self.remove_where(|_, r| r.tx == tx && r.status == RequestStatus::Waiting);
    }

    /// Release everything `tx` holds or waits for.
    pub fn release_all(&mut self, tx: TxId) {
        self.remove_where(|_, r| r.tx == tx);
    }

    /// Release the locks of `tx` on resources selected by `select`.
    pub fn release_matching(&mut self, tx: TxId, select: impl Fn(&Resource) -> bool) {
        self.remove_where(|resource, r| r.tx == tx && select(resource));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Resource, &LockRequest)> {
        self.entries
            .iter()
            .flat_map(|(resource, requests)| requests.iter().map(move |r| (resource, r)))
    }

    fn remove_where(&mut self, remove: impl Fn(&Resource, &LockRequest) -> bool) {
        for (resource, requests) in self.entries.iter_mut() {
            requests.retain(|r| !remove(resource, r));
        }
        self.entries.retain(|_, requests| !requests.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: Resource = Resource::Object { object_id: 7 };
    const ROW: Resource = Resource::Rid {
        object_id: 7,
        page: 264,
        slot: 0,
    };

    #[test]
    fn test_exclusive_row_lock_blocks_other_transactions() {
        let mut locks = LockTable::default();
        locks.acquire(ROW, 1, 51, LockMode::Exclusive).unwrap();

        assert_eq!(locks.conflict(ROW, 2, LockMode::Shared), Some(51));
        assert_eq!(locks.acquire(ROW, 2, 52, LockMode::Exclusive), Err(51));
        // The owner itself is never blocked by its own lock.
        assert_eq!(locks.conflict(ROW, 1, LockMode::Exclusive), None);
    }

    #[test]
    fn test_intent_locks_are_shared_and_upgradable() {
        let mut locks = LockTable::default();
        locks.acquire(TABLE, 1, 51, LockMode::IntentExclusive).unwrap();
        locks.acquire(TABLE, 2, 52, LockMode::IntentExclusive).unwrap();
        assert!(locks.held_by_others(TABLE, 1));

        locks.release_all(2);
        assert!(!locks.held_by_others(TABLE, 1));
        locks.acquire(TABLE, 1, 51, LockMode::Exclusive).unwrap();
        assert!(locks.holds(TABLE, 1, LockMode::Exclusive));
        assert_eq!(locks.iter().count(), 1);
    }

    #[test]
    fn test_waiting_requests_are_listed_until_cleared() {
        let mut locks = LockTable::default();
        locks.acquire(ROW, 1, 51, LockMode::Exclusive).unwrap();
        let conflict = Conflict {
            resource: ROW,
            requested: LockMode::Shared,
            holder: 51,
        };
        locks.mark_waiting(&conflict, 2, 52);
        locks.mark_waiting(&conflict, 2, 52);

        let waiting: Vec<_> = locks
            .iter()
            .filter(|(_, r)| r.status == RequestStatus::Waiting)
            .collect();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].1.session, 52);

        locks.clear_waiting(2);
        assert_eq!(locks.iter().count(), 1);
    }

    #[test]
    fn test_release_matching_keeps_other_resources() {
        let mut locks = LockTable::default();
        locks.acquire(TABLE, 1, 51, LockMode::IntentExclusive).unwrap();
        locks.acquire(ROW, 1, 51, LockMode::Exclusive).unwrap();

        locks.release_matching(1, |r| !r.is_object());
        assert!(locks.holds(TABLE, 1, LockMode::IntentExclusive));
        assert!(!locks.holds(ROW, 1, LockMode::Exclusive));

        locks.release_all(1);
        assert_eq!(locks.iter().count(), 0);
    }
}
