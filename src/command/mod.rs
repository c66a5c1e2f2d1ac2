//! Typed AT commands for the BG96, grouped by concern, plus the exchange
//! engine that runs them over the serial link.

pub mod channel;
pub mod scan;

pub mod dns;
pub mod file;
pub mod general;
pub mod gnss;
pub mod ip_transport;
pub mod mqtt;
pub mod network_service;
pub mod psn;
pub mod ssl;

use heapless::{String, Vec};

use crate::error::Error;

/// Maximum length of one formatted command line.
pub const CMD_LINE_LEN: usize = 192;
/// Maximum length of one response line.
pub const RESP_LINE_LEN: usize = 256;
/// Maximum number of information lines collected per exchange; extra lines
/// are dropped with a warning.
pub const MAX_RESP_LINES: usize = 4;

pub type CmdLine = String<CMD_LINE_LEN>;
pub type RespLine = String<RESP_LINE_LEN>;
pub type ResponseLines = Vec<RespLine, MAX_RESP_LINES>;

/// How an exchange concludes.
pub enum Terminator {
    /// The final `OK` result code.
    Ok,
    /// A line starting with this prefix. Used for commands whose result
    /// arrives after the `OK`, e.g. `+QIOPEN: <id>,<err>`.
    Prefix(&'static str),
}

/// One command/response template pair.
///
/// Implementors format a single request line and parse the typed fields out
/// of the collected response lines. The timeout applies to that exchange
/// only; it never changes channel state.
pub trait AtCmd {
    type Response;

    /// Deadline for the whole exchange.
    const TIMEOUT_MS: u32 = 1_000;

    const TERMINATOR: Terminator = Terminator::Ok;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error>;

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error>;
}

/// Response of commands that answer with nothing but the final result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoResponse;

/// Liveness probe.
pub struct At;

impl AtCmd for At {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT").map_err(|_| Error::Overflow)
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// Disable command echo. Issued first during startup so that response
/// scanning never has to skip echoed request lines.
pub struct EchoOff;

impl AtCmd for EchoOff {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("ATE0").map_err(|_| Error::Overflow)
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}
