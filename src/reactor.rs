//! The readiness loop. Grounded on `original_source/src/exchange_server.cpp`'s
//! `server::run`/`on_connect`/`on_read`, generalized to dispatch through
//! sessions/strands instead of handling bytes inline, and on
//! `flux-network::tcp::connector::TcpConnector::poll_with` for the shape of
//! "iterate ready events, branch on token identity, evict on disconnect".

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use mio::Token;
use tracing::{error, info, warn};

use crate::{
    error::ServerError,
    io::{ControlSignal, ControlWriter, EventFdControl, Listener, MioListener, MioMux, Readiness, ReadinessMux, Stream},
    market::Market,
    session::{ConnStatus, Session},
    strand::Strand,
    symbols::KnownSymbols,
    worker::{Worker, WorkerLike},
};

const LISTENER_TOKEN: Token = Token(0);
const CONTROL_TOKEN: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

pub struct Reactor {
    mux: Box<dyn ReadinessMux>,
    listener: Box<dyn Listener>,
    control: Box<dyn ControlSignal>,
    control_writer: ControlWriter,
    next_token: usize,
    sessions: HashMap<Token, Arc<Session>>,
    worker: Worker,
    market: Market,
    known_symbols: KnownSymbols,
}

impl Reactor {
    pub fn bind(port: u16) -> Result<Self, ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener =
            MioListener::bind(addr).map_err(|source| ServerError::Bind { port, source })?;
        let mux = MioMux::new().map_err(ServerError::Mux)?;
        let control = EventFdControl::new().map_err(ServerError::ControlSignal)?;
        let control_writer = control.writer();

        mux.register(LISTENER_TOKEN, listener.as_raw_fd(), Readiness { readable: true, writable: false, error: false })
            .map_err(ServerError::Register)?;
        mux.register(CONTROL_TOKEN, control.as_raw_fd(), Readiness { readable: true, writable: false, error: false })
            .map_err(ServerError::Register)?;

        Ok(Self {
            mux: Box::new(mux),
            listener: Box::new(listener),
            control: Box::new(control),
            control_writer,
            next_token: FIRST_CLIENT_TOKEN,
            sessions: HashMap::new(),
            worker: Worker::start(),
            market: Market::start(),
            known_symbols: KnownSymbols::new(),
        })
    }

    /// A handle that can trigger a clean shutdown from a signal handler.
    pub fn control_writer(&self) -> ControlWriter {
        self.control_writer
    }

    /// The address the listener actually bound to; useful for tests that
    /// bind to port 0 and need the OS-assigned port back.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn next_client_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn run(&mut self) -> Result<(), ServerError> {
        loop {
            let events = self.mux.poll().map_err(ServerError::Mux)?;
            let mut stop_requested = false;

            for (token, readiness) in events {
                if readiness.error {
                    return Err(ServerError::MuxErrorFlag);
                }

                if token == CONTROL_TOKEN {
                    match self.control.read_value() {
                        // An eventfd without `EFD_SEMAPHORE` coalesces
                        // concurrent writes by summing them, so SIGINT and
                        // SIGTERM landing in the same wakeup can add up to
                        // any non-zero value, not just `1`.
                        Ok(0) => {}
                        Ok(_) => stop_requested = true,
                        Err(err) => warn!(?err, "failed to read control signal"),
                    }
                } else if token == LISTENER_TOKEN {
                    self.accept_connections();
                } else {
                    self.dispatch_client_event(token, readiness);
                }
            }

            if stop_requested {
                break;
            }
        }

        self.worker.stop();
        self.market.stop();
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let token = self.next_client_token();
                    let fd = stream.as_raw_fd();

                    if let Err(err) =
                        self.mux.register(token, fd, Readiness { readable: true, writable: false, error: false })
                    {
                        warn!(?err, ?peer_addr, "failed to register accepted connection, dropping");
                        continue;
                    }

                    let mux_handle = match self.mux.handle() {
                        Ok(handle) => handle,
                        Err(err) => {
                            warn!(?err, "failed to clone mux handle for session, dropping connection");
                            let _ = self.mux.deregister(fd);
                            continue;
                        }
                    };

                    let worker_handle: Arc<dyn WorkerLike> = Arc::new(self.worker.handle());
                    let strand = Strand::new(worker_handle);
                    let session = Arc::new(Session::new(
                        token,
                        stream,
                        mux_handle,
                        strand,
                        self.known_symbols.clone(),
                        self.market.handle(),
                    ));

                    info!(?peer_addr, ?token, "accepted connection");
                    self.sessions.insert(token, session);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(?err, "accept failed");
                    break;
                }
            }
        }
    }

    fn dispatch_client_event(&mut self, token: Token, readiness: Readiness) {
        let Some(session) = self.sessions.get(&token).cloned() else {
            warn!(?token, "readiness event for unregistered token, ignoring");
            return;
        };

        if readiness.readable {
            match session.on_readable() {
                Ok(ConnStatus::Alive) => {}
                Ok(ConnStatus::PeerClosed) => {
                    info!(?token, "peer closed connection");
                    self.evict(token);
                    return;
                }
                Err(err) => {
                    error!(?err, ?token, "fatal read error, evicting session");
                    self.evict(token);
                    return;
                }
            }
        }

        if readiness.writable {
            session.on_writable();
        }
    }

    fn evict(&mut self, token: Token) {
        if let Some(session) = self.sessions.remove(&token) {
            session.close();
        }
    }
}
