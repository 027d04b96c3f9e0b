//! Shared set of symbols the exchange has seen an order for. Append-only:
//! sessions add to it as orders come in and read it back for `listsymbols`.
//! Injected as an explicit `Arc` dependency into session construction
//! rather than kept as process-global state, matching the rest of the
//! crate's avoidance of ambient statics.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

#[derive(Clone, Default)]
pub struct KnownSymbols(Arc<Mutex<HashSet<String>>>);

impl KnownSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, symbol: &str) {
        self.0.lock().unwrap().insert(symbol.to_owned());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().cloned().collect()
    }
}
