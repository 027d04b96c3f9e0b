use std::io;

use thiserror::Error;

/// Fatal, process-ending failures. Recoverable per-connection conditions
/// never surface here; they're handled at the session/reactor boundary
/// (see `reactor::Reactor::dispatch_client_event` and `session::Session`).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on port {port}: {source}")]
    Bind { port: u16, #[source] source: io::Error },

    #[error("failed to create readiness mux: {0}")]
    Mux(#[source] io::Error),

    #[error("failed to create control signal: {0}")]
    ControlSignal(#[source] io::Error),

    #[error("failed to register descriptor with readiness mux: {0}")]
    Register(#[source] io::Error),

    #[error("readiness mux reported an error flag on a watched descriptor")]
    MuxErrorFlag,

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),
}
