//! Socket open/close/send/read dialect.

use core::fmt::Write as _;

use embedded_nal::SocketAddr;
use heapless::String;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, NoResponse, ResponseLines, Terminator};
use crate::command::psn::ContextId;
use crate::error::Error;
use crate::socket::Protocol;

/// `AT+QIOPEN` - open a module socket. The result line arrives after the
/// `OK`, once the connect has actually finished, so this exchange terminates
/// on the `+QIOPEN:` line instead.
pub struct OpenSocket {
    pub ctx: ContextId,
    pub id: u8,
    pub protocol: Protocol,
    pub remote: SocketAddr,
}

impl AtCmd for OpenSocket {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 150_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QIOPEN:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        let service = match self.protocol {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        };
        write!(
            buf,
            "AT+QIOPEN={},{},\"{}\",\"{}\",{},0,0",
            self.ctx.0,
            self.id,
            service,
            self.remote.ip(),
            self.remote.port()
        )?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QIOPEN:")?);
        s.literal("+QIOPEN:")?;
        let id = s.u32()? as u8;
        s.comma()?;
        let err = s.i32()?;
        if id != self.id {
            return Err(Error::InvalidResponse);
        }
        if err != 0 {
            return Err(Error::Device(err));
        }
        Ok(NoResponse)
    }
}

/// `AT+QICLOSE=<id>,<timeout>` - close a module socket. The trailing
/// argument is the module-side flush timeout in seconds.
pub struct CloseSocket {
    pub id: u8,
}

impl AtCmd for CloseSocket {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 150_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QICLOSE={},1", self.id)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QISEND=<id>,<len>` - announce one chunk. Used through the channel's
/// prompt-driven payload flow; the module answers `>`, takes `len` raw
/// bytes and finishes with `SEND OK`.
pub struct SendData {
    pub id: u8,
    pub len: usize,
}

impl AtCmd for SendData {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 2_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QISEND={},{}", self.id, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QIRD=<id>,0` response: the module-side buffer accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxAvailable {
    pub total: u32,
    pub read: u32,
    pub unread: u32,
}

/// `AT+QIRD=<id>,0` - length probe; how much arrived data is waiting.
pub struct ReadAvailable {
    pub id: u8,
}

impl AtCmd for ReadAvailable {
    type Response = RxAvailable;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QIRD={},0", self.id)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QIRD:")?);
        s.literal("+QIRD:")?;
        let total = s.u32()?;
        s.comma()?;
        let read = s.u32()?;
        s.comma()?;
        let unread = s.u32()?;
        Ok(RxAvailable {
            total,
            read,
            unread,
        })
    }
}

/// `AT+QIRD=<id>,<len>` - bounded read. Used through the channel's binary
/// read flow; the `+QIRD: <count>` header is followed by the raw payload.
pub struct ReadData {
    pub id: u8,
    pub len: usize,
}

impl AtCmd for ReadData {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QIRD={},{}", self.id, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: i32,
    pub message: String<48>,
}

/// `AT+QIGETERROR` - detail on the most recent data-service failure.
pub struct GetLastError;

impl AtCmd for GetLastError {
    type Response = LastError;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QIGETERROR").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QIGETERROR:")?);
        s.literal("+QIGETERROR:")?;
        let code = s.i32()?;
        s.comma()?;
        s.skip_spaces();
        let mut message = String::new();
        message
            .push_str(s.rest().trim_end())
            .map_err(|_| Error::Overflow)?;
        Ok(LastError { code, message })
    }
}
