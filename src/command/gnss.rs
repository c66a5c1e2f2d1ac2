//! GNSS engine control and position fixes.

use core::fmt::Write as _;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, NoResponse, ResponseLines};
use crate::error::Error;

/// `AT+QGPS=1` - switch the GNSS engine on.
pub struct StartGnss;

impl AtCmd for StartGnss {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QGPS=1").map_err(|_| Error::Overflow)
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QGPSEND` - switch the GNSS engine off.
pub struct StopGnss;

impl AtCmd for StopGnss {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QGPSEND").map_err(|_| Error::Overflow)
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QGPS?` - is the engine running.
pub struct QueryGnss;

impl AtCmd for QueryGnss {
    type Response = u8;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QGPS?").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let mut s = Scanner::new(find_line(lines, "+QGPS:")?);
        s.literal("+QGPS:")?;
        Ok(s.u32()? as u8)
    }
}

/// `AT+QGPSCFG="outport","<port>"` - NMEA sentence output port.
pub struct GnssOutPort<'a> {
    pub port: &'a str,
}

impl AtCmd for GnssOutPort<'_> {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QGPSCFG=\"outport\",\"{}\"", self.port)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QGPSCFG="nmeasrc",<n>` - allow positioning sentences to be fetched
/// over the command port.
pub struct GnssNmeaSrc {
    pub enabled: bool,
}

impl AtCmd for GnssNmeaSrc {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QGPSCFG=\"nmeasrc\",{}", self.enabled as u8)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// One position fix, `AT+QGPSLOC=2` format (decimal degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssFix {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub latitude: f32,
    pub longitude: f32,
    pub hdop: f32,
    pub altitude: f32,
    /// 2 = 2D fix, 3 = 3D fix.
    pub fix: u8,
    /// Course over ground.
    pub cog_degrees: u16,
    pub cog_minutes: u8,
    /// Speed in km/h.
    pub spkm: f32,
    /// Speed in knots.
    pub spkn: f32,
    pub day: u8,
    pub month: u8,
    pub year: u16,
    pub nsat: u8,
}

/// `AT+QGPSLOC=2` - fetch the current fix. Fails with `+CME ERROR: 516`
/// while no fix is available yet; callers poll.
pub struct GetPosition;

impl AtCmd for GetPosition {
    type Response = GnssFix;

    const TIMEOUT_MS: u32 = 3_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        buf.push_str("AT+QGPSLOC=2").map_err(|_| Error::Overflow)
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        // +QGPSLOC: 061951.0,31.82,117.11,0.7,62.2,2,0.00,0.0,0.0,110513,09
        let mut s = Scanner::new(find_line(lines, "+QGPSLOC:")?);
        s.literal("+QGPSLOC:")?;
        s.skip_spaces();
        let hours = s.digits(2)? as u8;
        let minutes = s.digits(2)? as u8;
        let seconds = s.digits(2)? as u8;
        s.literal(".")?;
        let _subsec = s.u32()?;
        s.comma()?;
        let latitude = s.f32()?;
        s.comma()?;
        let longitude = s.f32()?;
        s.comma()?;
        let hdop = s.f32()?;
        s.comma()?;
        let altitude = s.f32()?;
        s.comma()?;
        let fix = s.u32()? as u8;
        s.comma()?;
        let cog_degrees = s.u32()? as u16;
        s.literal(".")?;
        let cog_minutes = s.u32()? as u8;
        s.comma()?;
        let spkm = s.f32()?;
        s.comma()?;
        let spkn = s.f32()?;
        s.comma()?;
        let day = s.digits(2)? as u8;
        let month = s.digits(2)? as u8;
        let year = 2000 + s.digits(2)? as u16;
        s.comma()?;
        let nsat = s.digits(2)? as u8;
        Ok(GnssFix {
            hours,
            minutes,
            seconds,
            latitude,
            longitude,
            hdop,
            altitude,
            fix,
            cog_degrees,
            cog_minutes,
            spkm,
            spkn,
            day,
            month,
            year,
            nsat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::RespLine;

    #[test]
    fn parses_a_3d_fix() {
        let mut lines = ResponseLines::new();
        lines
            .push(
                RespLine::try_from(
                    "+QGPSLOC: 061951.0,31.82,117.11,0.7,62.2,3,10.05,4.5,2.4,110513,09",
                )
                .unwrap(),
            )
            .unwrap();
        let fix = GetPosition.parse(&lines).unwrap();
        assert_eq!((fix.hours, fix.minutes, fix.seconds), (6, 19, 51));
        assert!((fix.latitude - 31.82).abs() < 1e-4);
        assert!((fix.longitude - 117.11).abs() < 1e-4);
        assert_eq!(fix.fix, 3);
        assert_eq!((fix.cog_degrees, fix.cog_minutes), (10, 5));
        assert_eq!((fix.day, fix.month, fix.year), (11, 5, 2013));
        assert_eq!(fix.nsat, 9);
    }

    #[test]
    fn no_fix_is_a_format_mismatch_until_module_reports_one() {
        let lines = ResponseLines::new();
        assert_eq!(GetPosition.parse(&lines), Err(Error::InvalidResponse));
    }
}
