//! Packet-switched network: PDP context configuration and activation.

use core::fmt::Write as _;

use heapless::String;
use serde::{Deserialize, Serialize};

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, NoResponse, ResponseLines};
use crate::error::Error;

/// PDP context id, 1..=16. All driver traffic runs over a single context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContextId(pub u8);

/// `AT+QICSGP=<ctx>` - query the stored APN for a context.
pub struct QueryPdpConfig {
    pub ctx: ContextId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpConfig {
    pub context_type: u8,
    pub apn: String<64>,
}

impl AtCmd for QueryPdpConfig {
    type Response = PdpConfig;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QICSGP={}", self.ctx.0)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QICSGP:")?);
        s.literal("+QICSGP:")?;
        let context_type = s.u32()? as u8;
        s.comma()?;
        let apn = s.quoted::<64>()?;
        Ok(PdpConfig { context_type, apn })
    }
}

/// `AT+QICSGP=<ctx>,1,"<apn>","<user>","<pass>",0` - program an IPv4
/// context with no authentication.
pub struct ConfigurePdp<'a> {
    pub ctx: ContextId,
    pub apn: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl AtCmd for ConfigurePdp<'_> {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QICSGP={},1,\"{}\",\"{}\",\"{}\",0",
            self.ctx.0, self.apn, self.username, self.password
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QIACT=<ctx>` - activate the context. Module-side worst case is
/// 150 s; the exchange carries that budget so the channel is never held
/// hostage by a stuck activation.
pub struct ActivatePdp {
    pub ctx: ContextId,
}

impl AtCmd for ActivatePdp {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 150_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QIACT={}", self.ctx.0)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QIDEACT=<ctx>` - deactivate the context.
pub struct DeactivatePdp {
    pub ctx: ContextId,
}

impl AtCmd for DeactivatePdp {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 60_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QIDEACT={}", self.ctx.0)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdpAddress {
    pub ctx: u8,
    pub state: u8,
    pub context_type: u8,
    pub ip: String<16>,
}

/// `AT+QIACT?` - query the active context and its address.
pub struct QueryPdpAddress;

impl AtCmd for QueryPdpAddress {
    type Response = PdpAddress;

    const TIMEOUT_MS: u32 = 150_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QIACT?").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QIACT:")?);
        s.literal("+QIACT:")?;
        let ctx = s.u32()? as u8;
        s.comma()?;
        let state = s.u32()? as u8;
        s.comma()?;
        let context_type = s.u32()? as u8;
        s.comma()?;
        let ip = s.quoted::<16>()?;
        Ok(PdpAddress {
            ctx,
            state,
            context_type,
            ip,
        })
    }
}

/// Calendar time as reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModemTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    /// Timezone offset in quarter hours, signed.
    pub tz_quarters: i8,
    pub dst: u8,
}

/// `AT+QLTS=2` - latest network-synchronized time.
pub struct GetNetworkTime;

impl AtCmd for GetNetworkTime {
    type Response = ModemTime;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QLTS=2").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        // +QLTS: "2019/08/14,14:05:42+32,0"
        let mut s = Scanner::new(find_line(lines, "+QLTS:")?);
        s.literal("+QLTS:")?;
        s.skip_spaces();
        s.literal("\"")?;
        let year = s.digits(4)? as u16;
        s.literal("/")?;
        let month = s.digits(2)? as u8;
        s.literal("/")?;
        let day = s.digits(2)? as u8;
        s.literal(",")?;
        let hours = s.digits(2)? as u8;
        s.literal(":")?;
        let minutes = s.digits(2)? as u8;
        s.literal(":")?;
        let seconds = s.digits(2)? as u8;
        let sign = if s.literal("+").is_ok() {
            1
        } else {
            s.literal("-")?;
            -1
        };
        let tz_quarters = (s.u32()? as i8) * sign;
        s.literal(",")?;
        let dst = s.u32()? as u8;
        Ok(ModemTime {
            year,
            month,
            day,
            hours,
            minutes,
            seconds,
            tz_quarters,
            dst,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RespLine;

    fn lines(raw: &str) -> ResponseLines {
        let mut lines = ResponseLines::new();
        lines.push(RespLine::try_from(raw).unwrap()).unwrap();
        lines
    }

    #[test]
    fn parses_network_time_with_negative_offset() {
        let t = GetNetworkTime
            .parse(&lines("+QLTS: \"2019/08/14,14:05:42-32,1\""))
            .unwrap();
        assert_eq!(t.year, 2019);
        assert_eq!((t.month, t.day), (8, 14));
        assert_eq!((t.hours, t.minutes, t.seconds), (14, 5, 42));
        assert_eq!(t.tz_quarters, -32);
        assert_eq!(t.dst, 1);
    }

    #[test]
    fn parses_pdp_address() {
        let a = QueryPdpAddress
            .parse(&lines("+QIACT: 1,1,1,\"10.93.51.177\""))
            .unwrap();
        assert_eq!(a.state, 1);
        assert_eq!(a.ip.as_str(), "10.93.51.177");
    }
}
