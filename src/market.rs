//! Randomized order executor. Grounded on `original_source/src/market.cpp`:
//! a background thread wakes at a random wall-clock interval, picks one
//! pending order uniformly at random, and fires its completion callback.
//!
//! The original indexes pending orders with a side `id -> vector index`
//! map and keeps it in sync by hand; its `cancel_order` calls
//! `vector::erase` on an arbitrary index, which shifts every later
//! element down by one without updating their recorded indices. Any id
//! after the cancelled slot then points at the wrong order, or a
//! half-cancelled one. `SPEC_FULL.md` pins the fix: removal swap-removes
//! (move the last element into the erased slot) and reindexes just that
//! one moved id, which is O(1) instead of the O(n) shift-and-reindex an
//! order-preserving fix would need.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use rand::Rng;
use tracing::info;

use crate::codec::Order;

pub type Completion = Box<dyn FnOnce() + Send + 'static>;

struct Pending {
    order: Order,
    completion: Completion,
}

struct Shared {
    orders: Mutex<(Vec<Pending>, HashMap<String, usize>)>,
    stop_requested: Mutex<bool>,
}

impl Shared {
    fn new() -> Self {
        Self {
            orders: Mutex::new((Vec::new(), HashMap::new())),
            stop_requested: Mutex::new(false),
        }
    }
}

/// Cloneable reference to a running [`Market`], used by sessions to add,
/// update, and cancel resting orders without needing lifecycle control
/// (`start`/`stop`) over the market itself.
#[derive(Clone)]
pub struct MarketHandle(Arc<Shared>);

/// Background-thread-driven market. `Market::start` spawns the execution
/// thread; `Market::stop` joins it. Sessions hold a [`MarketHandle`]
/// instead of the `Market` itself, the same split `Worker`/`WorkerHandle`
/// uses.
pub struct Market {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Market {
    pub fn start() -> Self {
        let shared = Arc::new(Shared::new());
        let run_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("market".into())
            .spawn(move || Self::run(&run_shared))
            .expect("failed to spawn market thread");

        Self { shared, handle: Some(handle) }
    }

    fn run(shared: &Shared) {
        loop {
            let delay_secs = rand::rng().random_range(1..=10);
            thread::sleep(Duration::from_secs(delay_secs));

            if *shared.stop_requested.lock().unwrap() {
                return;
            }

            let picked = {
                let mut guard = shared.orders.lock().unwrap();
                let (pending, mapping) = &mut *guard;
                if pending.is_empty() {
                    None
                } else {
                    let index = rand::rng().random_range(0..pending.len());
                    Some(Self::remove_at(pending, mapping, index))
                }
            };

            if let Some(Pending { order, completion }) = picked {
                info!(order_id = %order.id, "executing order");
                completion();
            }
        }
    }

    /// Swap-removes the order at `index`, keeping `mapping` consistent:
    /// the removed id is dropped, and if a different element moved into
    /// `index` (the one previously last), its recorded index is updated
    /// to match.
    fn remove_at(pending: &mut Vec<Pending>, mapping: &mut HashMap<String, usize>, index: usize) -> Pending {
        let removed = pending.swap_remove(index);
        mapping.remove(&removed.order.id);
        if let Some(moved) = pending.get(index) {
            mapping.insert(moved.order.id.clone(), index);
        }
        removed
    }

    /// A cloneable handle for sessions to add/update/cancel orders through.
    pub fn handle(&self) -> MarketHandle {
        MarketHandle(Arc::clone(&self.shared))
    }

    pub fn stop(&mut self) {
        *self.shared.stop_requested.lock().unwrap() = true;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Market {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl MarketHandle {
    pub fn add_order(&self, order: Order, completion: Completion) {
        let mut guard = self.0.orders.lock().unwrap();
        let (pending, mapping) = &mut *guard;
        let index = pending.len();
        mapping.insert(order.id.clone(), index);
        pending.push(Pending { order, completion });
    }

    /// Replaces the resting order with the same id in place. Returns
    /// `false` if no such order is pending.
    pub fn update_order(&self, order: Order) -> bool {
        let mut guard = self.0.orders.lock().unwrap();
        let (pending, mapping) = &mut *guard;
        match mapping.get(&order.id) {
            Some(&index) => {
                pending[index].order = order;
                true
            }
            None => false,
        }
    }

    /// Cancels the resting order with `id`. Returns `false` if no such
    /// order is pending.
    pub fn cancel_order(&self, id: &str) -> bool {
        let mut guard = self.0.orders.lock().unwrap();
        let (pending, mapping) = &mut *guard;
        match mapping.get(id).copied() {
            Some(index) => {
                Market::remove_at(pending, mapping, index);
                true
            }
            None => false,
        }
    }

    /// Snapshot of orders currently resting in the book, in no particular
    /// order. Test-only: `listorders` is answered from each session's own
    /// `outstanding_orders`, not from the market's book.
    #[cfg(test)]
    pub fn pending_orders(&self) -> Vec<Order> {
        let guard = self.0.orders.lock().unwrap();
        guard.0.iter().map(|p| p.order.clone()).collect()
    }
}
