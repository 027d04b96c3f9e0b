//! Per-connection state machine and message dispatch. Grounded on
//! `original_source/src/exchange_server.cpp`'s `on_read`/`on_order`/
//! `on_cancel` handlers, generalized onto the strand/market abstractions
//! this crate builds in Rust.
//!
//! Mutable session state lives behind a single `Mutex`. Contention is
//! nominally zero: the strand guarantees at most one dispatch closure runs
//! at a time, and reads only ever happen from the reactor thread, but the
//! lock is what lets the compiler (rather than convention) enforce that a
//! `Session` is safe to share across the reactor and worker threads via
//! `Arc`.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
};

use mio::Token;
use tracing::{debug, info, warn};

use crate::{
    codec::{self, Order},
    framer::LineFramer,
    io::{MuxHandle, Readiness, Stream},
    market::MarketHandle,
    strand::Strand,
    symbols::KnownSymbols,
    worker::WorkerLike,
};

const READ_SCRATCH_SIZE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Connected,
    Identified,
}

pub enum ConnStatus {
    Alive,
    PeerClosed,
}

struct SessionState {
    stream: Box<dyn Stream>,
    framer: LineFramer,
    status: Status,
    name: String,
    outstanding_orders: HashMap<String, Order>,
    write_queue: Vec<u8>,
    writable_armed: bool,
}

/// All state associated with one accepted client connection. Shared via
/// `Arc` because both the reactor's registry and closures queued on the
/// strand (and, transitively, the market) keep the session alive.
pub struct Session {
    token: Token,
    mux: Arc<dyn MuxHandle>,
    strand: Strand,
    known_symbols: KnownSymbols,
    market: MarketHandle,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        token: Token,
        stream: Box<dyn Stream>,
        mux: Arc<dyn MuxHandle>,
        strand: Strand,
        known_symbols: KnownSymbols,
        market: MarketHandle,
    ) -> Self {
        Self {
            token,
            mux,
            strand,
            known_symbols,
            market,
            state: Mutex::new(SessionState {
                stream,
                framer: LineFramer::new(),
                status: Status::Connected,
                name: "unidentified".to_owned(),
                outstanding_orders: HashMap::new(),
                write_queue: Vec::new(),
                writable_armed: false,
            }),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Reads whatever is available, frames it into messages, and posts one
    /// dispatch closure per message onto this session's strand. Must only
    /// be called from the reactor thread.
    pub fn on_readable(self: &Arc<Self>) -> io::Result<ConnStatus> {
        let mut scratch = [0u8; READ_SCRATCH_SIZE];
        loop {
            let read = {
                let mut state = self.state.lock().unwrap();
                state.stream.read(&mut scratch)
            };

            match read {
                Ok(0) => return Ok(ConnStatus::PeerClosed),
                Ok(n) => {
                    let messages = {
                        let mut state = self.state.lock().unwrap();
                        state.framer.feed(&scratch[..n])
                    };
                    for message in messages {
                        let session = Arc::clone(self);
                        self.strand.post(Box::new(move || session.dispatch(&message)));
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(ConnStatus::Alive),
                Err(err) => return Err(err),
            }
        }
    }

    /// Requests a flush of any backlogged bytes. Routed through the strand
    /// (§4.8's canonical write-path discipline) so the write queue and the
    /// mux write-readiness flag are only ever touched by the worker thread.
    pub fn on_writable(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.strand.post(Box::new(move || {
            if let Err(err) = session.flush() {
                warn!(?err, token = ?session.token, "write failed while draining backlog");
            }
        }));
    }

    fn flush(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        self.drain_locked(&mut state)
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.write_queue.extend_from_slice(bytes);
        self.drain_locked(&mut state)
    }

    /// `write`, logging rather than propagating failure. Every reply a
    /// message handler sends back to its client goes through this so a
    /// dead peer never silently swallows the error on some call sites but
    /// not others.
    fn reply(&self, bytes: &[u8]) {
        if let Err(err) = self.write(bytes) {
            warn!(?err, token = ?self.token, "write failed sending a reply");
        }
    }

    fn drain_locked(&self, state: &mut SessionState) -> io::Result<()> {
        while !state.write_queue.is_empty() {
            match state.stream.write(&state.write_queue) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "peer closed during write")),
                Ok(n) => {
                    state.write_queue.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }

        let want_writable = !state.write_queue.is_empty();
        if want_writable != state.writable_armed {
            let fd = state.stream.as_raw_fd();
            self.mux.reregister(self.token, fd, Readiness { readable: true, writable: want_writable, error: false })?;
            state.writable_armed = want_writable;
        }
        Ok(())
    }

    pub fn close(&self) {
        let state = self.state.lock().unwrap();
        let _ = self.mux.deregister(state.stream.as_raw_fd());
    }

    fn dispatch(self: Arc<Self>, message: &str) {
        if let Some(name) = message.strip_prefix("id") {
            self.on_identify(name);
        } else if let Some(record) = message.strip_prefix("order") {
            self.on_order(record.as_bytes());
        } else if let Some(id) = message.strip_prefix("cancel") {
            self.on_cancel(id);
        } else if message == "listorders" {
            self.on_list_orders();
        } else if message == "listsymbols" {
            self.on_list_symbols();
        } else {
            warn!(%message, "unrecognized message, ignoring");
        }
    }

    fn on_identify(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.name = name.to_owned();
        state.status = Status::Identified;
        info!(name, token = ?self.token, "session identified");
    }

    fn on_order(self: &Arc<Self>, record: &[u8]) {
        let order = match codec::parse_order(record) {
            Ok(order) => order,
            Err(err) => {
                warn!(?err, token = ?self.token, "rejecting malformed order");
                return;
            }
        };

        let is_identified = { self.state.lock().unwrap().status == Status::Identified };
        if !is_identified {
            warn!(token = ?self.token, "order received before identification, ignoring");
            return;
        }

        let existing = { self.state.lock().unwrap().outstanding_orders.get(&order.id).cloned() };

        match existing {
            None => self.on_new_order(order),
            Some(current) => self.on_order_update(current, order),
        }
    }

    fn on_new_order(self: &Arc<Self>, order: Order) {
        self.known_symbols.record(&order.symbol);

        let session = Arc::clone(self);
        let id = order.id.clone();
        self.market.add_order(
            order.clone(),
            Box::new(move || {
                session.strand.post(Box::new(move || session.on_execution(&id)));
            }),
        );

        self.state.lock().unwrap().outstanding_orders.insert(order.id.clone(), order);
        self.reply(b"ok\n");
    }

    fn on_order_update(&self, current: Order, replacement: Order) {
        if current.side != replacement.side || current.symbol != replacement.symbol {
            self.reply(b"rejected\n");
            return;
        }

        if self.market.update_order(replacement.clone()) {
            self.state.lock().unwrap().outstanding_orders.insert(replacement.id.clone(), replacement);
            self.reply(b"ok\n");
        } else {
            self.reply(b"rejected\n");
        }
    }

    /// Completion callback invoked (via the strand) by the market when an
    /// order executes.
    fn on_execution(&self, id: &str) {
        self.state.lock().unwrap().outstanding_orders.remove(id);
        self.reply(format!("exec{id}\n").as_bytes());
    }

    fn on_cancel(&self, id: &str) {
        let was_outstanding = { self.state.lock().unwrap().outstanding_orders.contains_key(id) };
        if !was_outstanding {
            debug!(id, token = ?self.token, "cancel of unknown order id");
            self.reply(b"rejected\n");
            return;
        }

        if self.market.cancel_order(id) {
            self.state.lock().unwrap().outstanding_orders.remove(id);
            self.reply(b"ok\n");
        } else {
            self.reply(b"rejected\n");
        }
    }

    fn on_list_orders(&self) {
        let mut out = String::new();
        let state = self.state.lock().unwrap();
        let mut orders: Vec<_> = state.outstanding_orders.values().collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        for order in orders {
            out.push_str(&codec::format_order(order));
        }
        drop(state);
        self.reply(out.as_bytes());
    }

    fn on_list_symbols(&self) {
        let mut out = String::new();
        for symbol in self.known_symbols.snapshot() {
            out.push_str(&symbol);
            out.push('\n');
        }
        self.reply(out.as_bytes());
    }
}
