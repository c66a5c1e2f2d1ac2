//! Hostname resolution over the module's DNS client.

use core::fmt::Write as _;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, ResponseLines, Terminator};
use crate::command::psn::ContextId;
use crate::error::Error;

pub const DNSGIP_URC: &str = "+QIURC: \"dnsgip\"";

/// Summary line of a lookup: `+QIURC: "dnsgip",<err>,<count>,<ttl>`. The
/// per-address lines follow and are drained separately by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DnsLookup {
    pub error: i32,
    pub count: u32,
    pub ttl: u32,
}

/// `AT+QIDNSGIP=<ctx>,"<host>"` - resolve a hostname. The exchange
/// terminates on the summary line, which arrives well after the `OK`.
pub struct ResolveHostName<'a> {
    pub ctx: ContextId,
    pub hostname: &'a str,
}

impl AtCmd for ResolveHostName<'_> {
    type Response = DnsLookup;

    const TIMEOUT_MS: u32 = 60_000;
    const TERMINATOR: Terminator = Terminator::Prefix(DNSGIP_URC);

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QIDNSGIP={},\"{}\"", self.ctx.0, self.hostname)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, DNSGIP_URC)?);
        s.literal(DNSGIP_URC)?;
        s.comma()?;
        let error = s.i32()?;
        s.comma()?;
        let count = s.u32()?;
        s.comma()?;
        let ttl = s.u32()?;
        Ok(DnsLookup { error, count, ttl })
    }
}
