//! Network registration and signal status.

use heapless::String;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, ResponseLines};
use crate::error::Error;

/// `AT+CSQ` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalQuality {
    /// 0..=31 mapped over -113..-51 dBm, 99 = unknown.
    pub rssi: u8,
    pub ber: u8,
}

/// `AT+CSQ` - signal quality report. A short status query; runs on the
/// default exchange deadline.
pub struct GetSignalQuality;

impl AtCmd for GetSignalQuality {
    type Response = SignalQuality;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+CSQ").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+CSQ:")?);
        s.literal("+CSQ:")?;
        let rssi = s.u32()? as u8;
        s.comma()?;
        let ber = s.u32()? as u8;
        Ok(SignalQuality { rssi, ber })
    }
}

/// `AT+COPS?` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub mode: u8,
    pub operator_name: Option<String<24>>,
}

/// `AT+COPS?` - current operator, used as a registration liveness probe
/// during startup.
pub struct GetOperator;

impl AtCmd for GetOperator {
    type Response = Operator;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+COPS?").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+COPS:")?);
        s.literal("+COPS:")?;
        let mode = s.u32()? as u8;
        let operator_name = if s.comma().is_ok() {
            let _format = s.u32()?;
            s.comma()?;
            Some(s.quoted::<24>()?)
        } else {
            None
        };
        Ok(Operator {
            mode,
            operator_name,
        })
    }
}
