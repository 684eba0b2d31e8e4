use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connection::ClientHandle;

/// Connected clients keyed by peer address.
///
/// Every operation takes the lock for the map access alone. Handles come back
/// as clones, so I/O on them never happens under the lock.
#[derive(Debug)]
pub struct ClientRegistry<H = ClientHandle> {
    clients: Arc<Mutex<HashMap<SocketAddr, H>>>,
}

impl<H> Clone for ClientRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            clients: Arc::clone(&self.clients),
        }
    }
}

impl<H> Default for ClientRegistry<H> {
    fn default() -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<H: Clone> ClientRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, H>> {
        // A panic elsewhere cannot leave the map half-updated.
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces; returns the replaced handle.
    pub fn register(&self, address: SocketAddr, handle: H) -> Option<H> {
        self.lock().insert(address, handle)
    }

    pub fn unregister(&self, address: &SocketAddr) -> Option<H> {
        self.lock().remove(address)
    }

    /// Removes the entry only if `matches` accepts the handle currently stored.
    pub fn unregister_if(&self, address: &SocketAddr, matches: impl FnOnce(&H) -> bool) -> Option<H> {
        let mut clients = self.lock();
        if clients.get(address).is_some_and(matches) {
            clients.remove(address)
        } else {
            None
        }
    }

    /// Snapshot of registered addresses, sorted so positions are stable
    /// between two calls with no change in between.
    pub fn list(&self) -> Vec<SocketAddr> {
        let mut addresses: Vec<_> = self.lock().keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn resolve(&self, address: &SocketAddr) -> Option<H> {
        self.lock().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn register_then_unregister() {
        let registry = ClientRegistry::<u32>::new();
        assert!(registry.register(addr(1), 10).is_none());
        assert_eq!(registry.register(addr(1), 11), Some(10));
        assert_eq!(registry.resolve(&addr(1)), Some(11));
        assert_eq!(registry.list(), vec![addr(1)]);

        assert_eq!(registry.unregister(&addr(1)), Some(11));
        assert!(!registry.list().contains(&addr(1)));
        assert_eq!(registry.unregister(&addr(1)), None);
        assert!(registry.resolve(&addr(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn conditional_unregister_spares_replacement() {
        let registry = ClientRegistry::<u32>::new();
        registry.register(addr(5), 1);
        registry.register(addr(5), 2);

        assert_eq!(registry.unregister_if(&addr(5), |h| *h == 1), None);
        assert_eq!(registry.resolve(&addr(5)), Some(2));
        assert_eq!(registry.unregister_if(&addr(5), |h| *h == 2), Some(2));
    }

    #[test]
    fn list_is_sorted_snapshot() {
        let registry = ClientRegistry::<u32>::new();
        for port in [9, 3, 7] {
            registry.register(addr(port), port as u32);
        }
        let snapshot = registry.list();
        registry.unregister(&addr(3));
        assert_eq!(snapshot, vec![addr(3), addr(7), addr(9)]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_disjoint_updates() {
        let registry = ClientRegistry::<u32>::new();
        let workers: Vec<_> = (0..8u16)
            .map(|worker| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..500u16 {
                        let port = worker * 1000 + i;
                        registry.register(addr(port), port as u32);
                        // Drop every other entry again.
                        if i % 2 == 1 {
                            registry.unregister(&addr(port));
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let listed = registry.list();
        assert_eq!(listed.len(), 8 * 250);
        for worker in 0..8u16 {
            for i in (0..500u16).step_by(2) {
                let port = worker * 1000 + i;
                assert_eq!(registry.resolve(&addr(port)), Some(port as u32));
            }
        }
    }
}
