//! TLS context configuration and secure socket dialect.

use core::fmt::Write as _;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, NoResponse, ResponseLines, Terminator};
use crate::command::psn::ContextId;
use crate::error::Error;

/// `AT+QSSLCFG="<kind>",<ctx>,"<path>"` - point a certificate slot at a
/// file in module storage. `kind` is one of `cacert`, `clientcert`,
/// `clientkey`.
pub struct SslConfigCertPath<'a> {
    pub kind: &'a str,
    pub ssl_ctx: u8,
    pub path: &'a str,
}

impl AtCmd for SslConfigCertPath<'_> {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QSSLCFG=\"{}\",{},\"{}\"",
            self.kind, self.ssl_ctx, self.path
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QSSLCFG="sslversion",<ctx>,<v>` - 0..=3 pin a version, 4 = all.
pub struct SslConfigVersion {
    pub ssl_ctx: u8,
    pub version: u8,
}

impl AtCmd for SslConfigVersion {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QSSLCFG=\"sslversion\",{},{}",
            self.ssl_ctx, self.version
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QSSLCFG="seclevel",<ctx>,<level>` - 0 none, 1 server auth,
/// 2 mutual auth.
pub struct SslConfigSecLevel {
    pub ssl_ctx: u8,
    pub level: u8,
}

impl AtCmd for SslConfigSecLevel {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QSSLCFG=\"seclevel\",{},{}",
            self.ssl_ctx, self.level
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QSSLCFG="ignorelocaltime",<ctx>,<n>` - skip certificate validity
/// period checks when the module clock is not synchronized.
pub struct SslConfigIgnoreLocalTime {
    pub ssl_ctx: u8,
    pub ignore: bool,
}

impl AtCmd for SslConfigIgnoreLocalTime {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QSSLCFG=\"ignorelocaltime\",{},{}",
            self.ssl_ctx, self.ignore as u8
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QSSLCFG="negotiatetime",<ctx>,<s>` - handshake budget in seconds.
pub struct SslConfigNegotiateTime {
    pub ssl_ctx: u8,
    pub seconds: u16,
}

impl AtCmd for SslConfigNegotiateTime {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QSSLCFG=\"negotiatetime\",{},{}",
            self.ssl_ctx, self.seconds
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QSSLOPEN` - open a secure connection. Result arrives after `OK` as
/// `+QSSLOPEN: <client>,<err>`.
pub struct SslOpen<'a> {
    pub pdp: ContextId,
    pub ssl_ctx: u8,
    pub client_id: u8,
    pub hostname: &'a str,
    pub port: u16,
}

impl AtCmd for SslOpen<'_> {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 150_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QSSLOPEN:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QSSLOPEN={},{},{},\"{}\",{},0",
            self.pdp.0, self.ssl_ctx, self.client_id, self.hostname, self.port
        )?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QSSLOPEN:")?);
        s.literal("+QSSLOPEN:")?;
        let client = s.u32()? as u8;
        s.comma()?;
        let err = s.i32()?;
        if client != self.client_id {
            return Err(Error::InvalidResponse);
        }
        if err != 0 {
            return Err(Error::Device(err));
        }
        Ok(NoResponse)
    }
}

/// `AT+QSSLSEND=<client>,<len>` - announce one chunk on the prompt-driven
/// payload flow.
pub struct SslSendData {
    pub client_id: u8,
    pub len: usize,
}

impl AtCmd for SslSendData {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 2_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QSSLSEND={},{}", self.client_id, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QSSLRECV=<client>,<len>` - bounded read on the binary read flow.
pub struct SslReadData {
    pub client_id: u8,
    pub len: usize,
}

impl AtCmd for SslReadData {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QSSLRECV={},{}", self.client_id, self.len)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SslConnectionState {
    pub client_id: u8,
    /// 2 = connected, everything else is some shade of closed.
    pub socket_state: u8,
}

/// `AT+QSSLSTATE` - per-client connection state.
pub struct SslState {
    pub client_id: u8,
}

impl AtCmd for SslState {
    type Response = SslConnectionState;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QSSLSTATE").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        for line in lines.iter() {
            let mut s = Scanner::new(line.as_str());
            if s.literal("+QSSLSTATE:").is_err() {
                continue;
            }
            let client_id = s.u32()? as u8;
            if client_id != self.client_id {
                continue;
            }
            s.comma()?;
            let _role = s.quoted::<16>()?;
            s.comma()?;
            let _ip = s.quoted::<40>()?;
            s.comma()?;
            let _remote_port = s.u32()?;
            s.comma()?;
            let _local_port = s.u32()?;
            s.comma()?;
            let socket_state = s.u32()? as u8;
            return Ok(SslConnectionState {
                client_id,
                socket_state,
            });
        }
        Err(Error::InvalidResponse)
    }
}

/// `AT+QSSLCLOSE=<client>` - tear the secure connection down.
pub struct SslClose {
    pub client_id: u8,
}

impl AtCmd for SslClose {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 10_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QSSLCLOSE={}", self.client_id)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}
