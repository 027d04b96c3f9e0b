pub mod codec;
pub mod config;
pub mod error;
pub mod framer;
pub mod io;
pub mod market;
pub mod reactor;
pub mod session;
pub mod strand;
pub mod symbols;
pub mod worker;

pub use error::ServerError;
pub use reactor::Reactor;
