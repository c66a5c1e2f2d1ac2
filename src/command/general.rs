//! Module identification.

use heapless::String;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, ResponseLines};
use crate::error::Error;

fn first_info_line<const N: usize>(lines: &ResponseLines) -> Result<String<N>, Error> {
    let line = lines.first().ok_or(Error::InvalidResponse)?;
    let mut out = String::new();
    out.push_str(line.as_str()).map_err(|_| Error::Overflow)?;
    Ok(out)
}

/// `AT+CGMM` - model identification.
pub struct ModelId;

impl AtCmd for ModelId {
    type Response = String<32>;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+CGMM").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        first_info_line(lines)
    }
}

/// `AT+CGMR` - firmware revision.
pub struct FirmwareRev;

impl AtCmd for FirmwareRev {
    type Response = String<32>;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+CGMR").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        first_info_line(lines)
    }
}

/// `AT+QCCID` - SIM ICCID.
pub struct Ccid;

impl AtCmd for Ccid {
    type Response = String<24>;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QCCID").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let line = find_line(lines, "+QCCID:")?;
        let mut s = Scanner::new(line);
        s.literal("+QCCID:")?;
        s.skip_spaces();
        let mut out = String::new();
        out.push_str(s.rest().trim_end()).map_err(|_| Error::Overflow)?;
        if out.is_empty() {
            return Err(Error::InvalidResponse);
        }
        Ok(out)
    }
}
