use clap::Parser;
use signal_hook::{consts::{SIGINT, SIGTERM}, low_level};
use small_exchange::{Reactor, ServerError, config::Config};
use tracing::error;

fn install_shutdown_handler(writer: small_exchange::io::ControlWriter) -> Result<(), ServerError> {
    for signal in [SIGINT, SIGTERM] {
        // SAFETY: the handler only performs one async-signal-safe `write(2)`
        // syscall on the control eventfd; all real shutdown logic runs on
        // the reactor thread after it observes that write.
        unsafe {
            low_level::register(signal, move || writer.signal_stop())
                .map_err(ServerError::SignalHandler)?;
        }
    }
    Ok(())
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();

    if let Err(err) = run(config.port) {
        error!(%err, "server exited with an error");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}

fn run(port: u16) -> Result<(), ServerError> {
    let mut reactor = Reactor::bind(port)?;
    install_shutdown_handler(reactor.control_writer())?;
    reactor.run()
}
