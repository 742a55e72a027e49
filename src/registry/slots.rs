//! Fixed-capacity slot table

use std::net::SocketAddr;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{ClientId, Connection, RegistryError};

/// Fixed-capacity table of live connections.
///
/// Slot `i` is either empty or holds the connection with id `i + 1`. Every
/// operation, including iteration, runs under one exclusive lock covering
/// the whole table. The registry performs no I/O itself.
pub struct Registry<W> {
    slots: Mutex<Vec<Option<Connection<W>>>>,
    capacity: usize,
}

/// Exclusive view over the registered connections.
///
/// Holding the guard holds the registry lock, so membership cannot change
/// while a broadcast iterates. Only iteration and lookup by id are exposed.
pub struct PeersGuard<'a, W> {
    slots: MutexGuard<'a, Vec<Option<Connection<W>>>>,
}

impl<W> Registry<W> {
    /// Create an empty registry with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots: Mutex::new(slots),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a new connection in the lowest free slot.
    ///
    /// On `CapacityExceeded` the writer is dropped, which closes it without
    /// writing anything.
    pub async fn try_insert(&self, writer: W, remote_addr: SocketAddr) -> Result<ClientId, RegistryError> {
        let mut slots = self.slots.lock().await;

        match slots.iter().position(Option::is_none) {
            Some(slot) => {
                let id = ClientId::from_slot(slot);
                slots[slot] = Some(Connection::new(id, writer, remote_addr));
                debug!("Registered client {} from {} in slot {}", id, remote_addr, slot);
                Ok(id)
            }
            None => Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            }),
        }
    }

    /// Clear the slot holding `id`. Removing an absent id is a no-op.
    pub async fn remove(&self, id: ClientId) -> bool {
        let mut slots = self.slots.lock().await;

        let Some(slot) = id.slot().filter(|&slot| slot < slots.len()) else {
            return false;
        };

        if !slots[slot].as_ref().is_some_and(|conn| conn.id() == id) {
            return false;
        }

        if let Some(conn) = slots[slot].take() {
            debug!(
                "Unregistered client {} from {} after {:?}",
                id,
                conn.remote_addr(),
                conn.connected_for()
            );
        }
        true
    }

    /// Visit every registered connection except `exclude`, in slot order.
    ///
    /// `f` runs with the registry locked and must not call back into the
    /// registry.
    pub async fn for_each_except<F>(&self, exclude: ClientId, mut f: F)
    where
        F: FnMut(&mut Connection<W>),
    {
        let mut peers = self.lock_peers().await;
        for conn in peers.except(exclude) {
            f(conn);
        }
    }

    /// Take the registry lock for an asynchronous scan.
    pub async fn lock_peers(&self) -> PeersGuard<'_, W> {
        PeersGuard {
            slots: self.slots.lock().await,
        }
    }

    /// Number of occupied slots
    pub async fn len(&self) -> usize {
        self.slots.lock().await.iter().flatten().count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        let slots = self.slots.lock().await;
        id.slot()
            .and_then(|slot| slots.get(slot))
            .is_some_and(|entry| entry.as_ref().is_some_and(|conn| conn.id() == id))
    }

    /// Snapshot of registered ids in slot order
    pub async fn ids(&self) -> Vec<ClientId> {
        self.slots
            .lock()
            .await
            .iter()
            .flatten()
            .map(Connection::id)
            .collect()
    }
}

impl<'a, W> PeersGuard<'a, W> {
    /// Registered connections other than `exclude`, in slot order
    pub fn except(&mut self, exclude: ClientId) -> impl Iterator<Item = &mut Connection<W>> + '_ {
        self.slots
            .iter_mut()
            .flatten()
            .filter(move |conn| conn.id() != exclude)
    }

    /// The connection registered under `id`, if any
    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Connection<W>> {
        let slot = id.slot()?;
        self.slots
            .get_mut(slot)?
            .as_mut()
            .filter(|conn| conn.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_insert_assigns_lowest_free_slot() {
        let registry: Registry<Vec<u8>> = Registry::new(3);

        assert_eq!(registry.try_insert(Vec::new(), addr(1)).await, Ok(ClientId::new(1)));
        assert_eq!(registry.try_insert(Vec::new(), addr(2)).await, Ok(ClientId::new(2)));
        assert_eq!(registry.try_insert(Vec::new(), addr(3)).await, Ok(ClientId::new(3)));

        assert!(registry.remove(ClientId::new(2)).await);
        assert_eq!(registry.try_insert(Vec::new(), addr(4)).await, Ok(ClientId::new(2)));
        assert_eq!(registry.ids().await, vec![ClientId::new(1), ClientId::new(2), ClientId::new(3)]);
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let registry: Registry<Vec<u8>> = Registry::new(2);
        registry.try_insert(Vec::new(), addr(1)).await.unwrap();
        registry.try_insert(Vec::new(), addr(2)).await.unwrap();

        let result = registry.try_insert(Vec::new(), addr(3)).await;
        assert_eq!(result, Err(RegistryError::CapacityExceeded { capacity: 2 }));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry: Registry<Vec<u8>> = Registry::new(2);
        let first = registry.try_insert(Vec::new(), addr(1)).await.unwrap();
        let second = registry.try_insert(Vec::new(), addr(2)).await.unwrap();

        assert!(registry.remove(first).await);
        assert!(!registry.remove(first).await);
        assert!(!registry.remove(ClientId::new(0)).await);
        assert!(!registry.remove(ClientId::new(99)).await);

        assert!(registry.contains(second).await);
        assert_eq!(registry.ids().await, vec![second]);
    }

    #[tokio::test]
    async fn test_for_each_except_skips_sender_in_slot_order() {
        let registry: Registry<Vec<u8>> = Registry::new(4);
        for port in 1..=4 {
            registry.try_insert(Vec::new(), addr(port)).await.unwrap();
        }

        let mut visited = Vec::new();
        registry
            .for_each_except(ClientId::new(2), |conn| visited.push(conn.id().get()))
            .await;
        assert_eq!(visited, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_peers_guard_lookup() {
        let registry: Registry<Vec<u8>> = Registry::new(2);
        let id = registry.try_insert(Vec::new(), addr(5)).await.unwrap();

        let mut peers = registry.lock_peers().await;
        let conn = peers.get_mut(id).unwrap();
        conn.writer_mut().extend_from_slice(b"x");
        assert_eq!(conn.remote_addr(), addr(5));
        assert!(peers.get_mut(ClientId::new(2)).is_none());
        assert!(peers.get_mut(ClientId::new(0)).is_none());
    }

    #[tokio::test]
    async fn test_occupancy_invariants_hold_under_churn() {
        let capacity = 5;
        let registry: Registry<Vec<u8>> = Registry::new(capacity);
        let mut seed: u64 = 0x2545_f491;

        for step in 0..500u16 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let roll = (seed >> 33) as usize;

            if roll % 3 == 0 {
                registry.remove(ClientId::new(roll % (capacity + 2))).await;
            } else {
                let _ = registry.try_insert(Vec::new(), addr(step)).await;
            }

            let ids = registry.ids().await;
            assert!(ids.len() <= capacity);
            assert!(ids.iter().all(|id| (1..=capacity).contains(&id.get())));
            let mut deduped = ids.clone();
            deduped.dedup();
            assert_eq!(deduped, ids);
        }
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_and_remove_keep_ids_unique() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let capacity = 5;
        let registry: Arc<Registry<Vec<u8>>> = Arc::new(Registry::new(capacity));
        // Ids currently owned by a task; a subset of the occupied slots
        let held = Arc::new(std::sync::Mutex::new(HashSet::new()));

        let tasks: Vec<_> = (0..32u16)
            .map(|task| {
                let registry = Arc::clone(&registry);
                let held = Arc::clone(&held);
                tokio::spawn(async move {
                    let mut inserted = 0usize;
                    for round in 0..50u16 {
                        let Ok(id) = registry.try_insert(Vec::new(), addr(task * 100 + round)).await else {
                            tokio::task::yield_now().await;
                            continue;
                        };
                        inserted += 1;
                        {
                            let mut held = held.lock().unwrap();
                            assert!(held.insert(id), "{} handed out twice", id);
                            assert!(held.len() <= capacity);
                        }
                        assert!((1..=capacity).contains(&id.get()));

                        tokio::task::yield_now().await;

                        assert!(held.lock().unwrap().remove(&id));
                        assert!(registry.remove(id).await);
                    }
                    inserted
                })
            })
            .collect();

        let mut total_inserted = 0;
        for task in tasks {
            total_inserted += task.await.unwrap();
        }

        assert!(total_inserted > 0);
        assert!(registry.is_empty().await);
        assert!(held.lock().unwrap().is_empty());
    }
}
