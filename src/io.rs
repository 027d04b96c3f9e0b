//! I/O capabilities: the external contract the reactor is built against.
//! `Stream`/`Listener`/`ReadinessMux`/`ControlSignal` are traits so the core
//! can, in principle, run against fakes the way the original C++ drove its
//! `socket_interface`/`epoll_interface` abstractions through GMock (see
//! `original_source/test/mocks.h`); in practice this crate's tests exercise
//! real loopback sockets, the same choice `flux-network`'s `tests/` make.
//!
//! Concrete implementations are backed by `mio` (readiness + sockets) and
//! raw `libc` (the eventfd control signal), mirroring `flux-network::tcp`'s
//! split between the `TcpStream`/`TcpConnector` abstractions and the raw
//! `setsockopt` call in `tcp::stream::set_socket_buf_size`.

use std::{
    io::{self, Read as _, Write as _},
    net::SocketAddr,
    os::fd::{AsRawFd, RawFd},
};

use mio::{Interest, Token, unix::SourceFd};
use tracing::warn;

/// Which directions a descriptor is ready for, plus the error flag the
/// source's `epoll_impl` treats as an immediately-fatal condition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Non-blocking duplex byte stream. `Ok(0)` from `read` means the peer
/// closed the connection; callers must retain any unwritten tail from a
/// short `write`.
pub trait Stream: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn as_raw_fd(&self) -> RawFd;
}

pub trait Listener: Send {
    fn accept(&mut self) -> io::Result<(Box<dyn Stream>, SocketAddr)>;
    fn as_raw_fd(&self) -> RawFd;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Readable descriptor that yields an 8-byte little-endian value; `1`
/// means "stop". Backed by a Linux `eventfd`.
pub trait ControlSignal: Send {
    fn as_raw_fd(&self) -> RawFd;
    fn read_value(&mut self) -> io::Result<u64>;
}

pub trait ReadinessMux: Send {
    fn register(&self, token: Token, fd: RawFd, interest: Readiness) -> io::Result<()>;
    fn reregister(&self, token: Token, fd: RawFd, interest: Readiness) -> io::Result<()>;
    fn deregister(&self, fd: RawFd) -> io::Result<()>;
    /// Blocks until at least one descriptor is ready, then returns every
    /// ready `(token, flags)` pair observed in this wakeup.
    fn poll(&mut self) -> io::Result<Vec<(Token, Readiness)>>;
    /// A cloned, `Arc`-able back-reference handed to sessions so they can
    /// flip their own write-readiness subscription independently of the
    /// reactor thread's exclusive access to this mux's event buffer.
    fn handle(&self) -> io::Result<std::sync::Arc<dyn MuxHandle>>;
}

/// The piece of a `ReadinessMux` a session keeps as a back-reference so it
/// can flip its own write-readiness subscription from inside strand-posted
/// work, without needing mutable access to the mux's event buffer that the
/// reactor thread owns. Backed by a cloned `mio::Registry`, which is
/// `Send + Sync` and safe to call concurrently with the reactor blocked in
/// `poll` on the same `mio::Poll`.
pub trait MuxHandle: Send + Sync {
    fn reregister(&self, token: Token, fd: RawFd, interest: Readiness) -> io::Result<()>;
    fn deregister(&self, fd: RawFd) -> io::Result<()>;
}

fn to_interest(r: Readiness) -> Interest {
    match (r.readable, r.writable) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (true, false) => Interest::READABLE,
        (false, true) => Interest::WRITABLE,
        (false, false) => Interest::READABLE,
    }
}

// --- mio-backed Stream / Listener -----------------------------------------

pub struct MioStream(mio::net::TcpStream);

impl MioStream {
    pub fn new(stream: mio::net::TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self(stream))
    }
}

impl Stream for MioStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

pub struct MioListener(mio::net::TcpListener);

impl MioListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self(mio::net::TcpListener::bind(addr)?))
    }
}

impl Listener for MioListener {
    fn accept(&mut self) -> io::Result<(Box<dyn Stream>, SocketAddr)> {
        let (stream, peer) = self.0.accept()?;
        Ok((Box::new(MioStream::new(stream)?), peer))
    }

    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

// --- eventfd-backed ControlSignal ------------------------------------------

pub struct EventFdControl {
    fd: RawFd,
}

impl EventFdControl {
    pub fn new() -> io::Result<Self> {
        // SAFETY: `eventfd(2)` with no flags; the returned fd is owned by
        // this struct and closed in `Drop`.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// A small `Copy` handle that can write the shutdown value from a
    /// signal handler. Async-signal-safe: it performs one raw `write(2)`
    /// syscall and nothing else.
    pub fn writer(&self) -> ControlWriter {
        ControlWriter { fd: self.fd }
    }
}

impl ControlSignal for EventFdControl {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    fn read_value(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(u64::from_le_bytes(buf))
    }
}

impl Drop for EventFdControl {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[derive(Clone, Copy)]
pub struct ControlWriter {
    fd: RawFd,
}

impl ControlWriter {
    /// Writes the shutdown value `1`. Safe to call from a signal handler.
    pub fn signal_stop(&self) {
        let value: u64 = 1;
        let bytes = value.to_le_bytes();
        unsafe {
            libc::write(self.fd, bytes.as_ptr().cast(), bytes.len());
        }
    }
}

// --- mio::Poll-backed ReadinessMux ------------------------------------------

pub struct MioMux {
    poll: mio::Poll,
    events: mio::Events,
}

impl MioMux {
    pub fn new() -> io::Result<Self> {
        Ok(Self { poll: mio::Poll::new()?, events: mio::Events::with_capacity(1024) })
    }

    /// A cloned, independently usable registry handle for sessions to hold
    /// as their `MuxHandle` back-reference.
    pub fn handle(&self) -> io::Result<MioMuxHandle> {
        Ok(MioMuxHandle(self.poll.registry().try_clone()?))
    }
}

impl ReadinessMux for MioMux {
    fn register(&self, token: Token, fd: RawFd, interest: Readiness) -> io::Result<()> {
        self.poll.registry().register(&mut SourceFd(&fd), token, to_interest(interest))
    }

    fn reregister(&self, token: Token, fd: RawFd, interest: Readiness) -> io::Result<()> {
        self.poll.registry().reregister(&mut SourceFd(&fd), token, to_interest(interest))
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    fn poll(&mut self) -> io::Result<Vec<(Token, Readiness)>> {
        self.poll.poll(&mut self.events, None)?;
        let mut out = Vec::with_capacity(self.events.iter().count());
        for event in &self.events {
            if event.is_error() {
                warn!(token = ?event.token(), "readiness mux reported an error flag");
            }
            out.push((
                event.token(),
                Readiness {
                    readable: event.is_readable(),
                    writable: event.is_writable(),
                    error: event.is_error(),
                },
            ));
        }
        Ok(out)
    }

    fn handle(&self) -> io::Result<std::sync::Arc<dyn MuxHandle>> {
        Ok(std::sync::Arc::new(MioMux::handle(self)?))
    }
}

pub struct MioMuxHandle(mio::Registry);

impl MuxHandle for MioMuxHandle {
    fn reregister(&self, token: Token, fd: RawFd, interest: Readiness) -> io::Result<()> {
        self.0.reregister(&mut SourceFd(&fd), token, to_interest(interest))
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.0.deregister(&mut SourceFd(&fd))
    }
}
