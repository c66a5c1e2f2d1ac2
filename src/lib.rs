#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod client;
mod config;

pub mod command;
pub mod error;
pub mod services;
pub mod socket;

#[cfg(any(feature = "socket-tcp", feature = "socket-udp"))]
mod stack;

#[cfg(test)]
mod test_helper;

pub use client::{
    Bg96Client, PollCadence, EGRESS_CHUNK_SIZE, INGRESS_CHUNK_SIZE, POLL_INTERVAL_MS,
    SLOW_POLL_INTERVAL_MS,
};
pub use command::psn::ContextId;
pub use config::{Config, DEFAULT_READ_TIMEOUT_MS};
pub use error::Error;
pub use socket::{Protocol, SocketEvent, SocketHandle};

/// Prelude - Include traits
pub mod prelude {
    #[cfg(feature = "socket-tcp")]
    pub use embedded_nal::TcpClientStack;
    #[cfg(feature = "socket-udp")]
    pub use embedded_nal::{UdpClientStack, UdpFullStack};
}
