//! The serialized command/response exchange engine.

use core::convert::TryInto;

use embedded_hal_nb::serial;
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::{Clock, Instant};

use super::scan::Scanner;
use super::{AtCmd, CmdLine, RespLine, ResponseLines, Terminator};
use crate::error::Error;

/// Owns the byte-oriented link and runs one command/response exchange at a
/// time over it.
///
/// Only one exchange may be in flight system-wide. The owning client keeps
/// the channel behind its serialization lock, and a caller holds that lock
/// for the duration of the exchange; the physical link is half-duplex, so
/// this lock is the real bottleneck of the driver.
///
/// Input left over from a previous exchange (including unsolicited result
/// codes) is discarded at the exchange boundary; there is no carry-over
/// buffering.
pub struct AtChannel<W, CLK> {
    serial: W,
    clock: CLK,
    at_trace: bool,
}

/// Map final result lines to a module error code. A bare `ERROR` (and the
/// send-flow `SEND FAIL`) is reported as code `-1`.
fn device_error(line: &str) -> Option<i32> {
    if line == "ERROR" || line == "SEND FAIL" {
        return Some(-1);
    }
    let code = line
        .strip_prefix("+CME ERROR:")
        .or_else(|| line.strip_prefix("+CMS ERROR:"))?;
    Some(code.trim().parse().unwrap_or(-1))
}

impl<W, CLK> AtChannel<W, CLK>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
{
    pub fn new(serial: W, clock: CLK, at_trace: bool) -> Self {
        AtChannel {
            serial,
            clock,
            at_trace,
        }
    }

    #[cfg(test)]
    pub(crate) fn serial_ref(&self) -> &W {
        &self.serial
    }

    fn now(&self) -> Result<Instant<CLK>, Error> {
        self.clock.try_now().map_err(|_| Error::Clock)
    }

    fn elapsed_ms(&self, since: &Instant<CLK>) -> Result<u32, Error> {
        let now = self.now()?;
        let elapsed = now.checked_duration_since(since).ok_or(Error::Clock)?;
        let ms: Milliseconds = elapsed.try_into().map_err(|_| Error::Clock)?;
        Ok(ms.0)
    }

    /// Drop residual input from a previous exchange or unsolicited traffic.
    fn flush_input(&mut self) {
        while self.serial.read().is_ok() {}
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for &b in bytes {
            nb::block!(self.serial.write(b)).map_err(|_| Error::Serial)?;
        }
        nb::block!(self.serial.flush()).map_err(|_| Error::Serial)?;
        Ok(())
    }

    fn read_byte(&mut self, start: &Instant<CLK>, budget_ms: u32) -> Result<u8, Error> {
        loop {
            match self.serial.read() {
                Ok(b) => return Ok(b),
                Err(nb::Error::WouldBlock) => {
                    if self.elapsed_ms(start)? >= budget_ms {
                        return Err(Error::Timeout);
                    }
                }
                Err(nb::Error::Other(_)) => return Err(Error::Serial),
            }
        }
    }

    /// Read the next non-empty line, CR/LF stripped.
    fn read_line(&mut self, start: &Instant<CLK>, budget_ms: u32) -> Result<RespLine, Error> {
        let mut line = RespLine::new();
        loop {
            match self.read_byte(start, budget_ms)? {
                b'\r' => {}
                b'\n' => {
                    if !line.is_empty() {
                        if self.at_trace {
                            debug!("AT< {}", line.as_str());
                        }
                        return Ok(line);
                    }
                }
                b => line.push(b as char).map_err(|_| Error::Overflow)?,
            }
        }
    }

    /// Format and transmit the request line, returning the exchange start
    /// time for deadline accounting.
    pub(crate) fn begin<C: AtCmd>(&mut self, cmd: &C) -> Result<Instant<CLK>, Error> {
        let mut line = CmdLine::new();
        cmd.write(&mut line)?;
        self.flush_input();
        if self.at_trace {
            debug!("AT> {}", line.as_str());
        }
        self.write_raw(line.as_bytes())?;
        self.write_raw(b"\r")?;
        self.now()
    }

    fn read_response(
        &mut self,
        start: &Instant<CLK>,
        budget_ms: u32,
        term: &Terminator,
    ) -> Result<ResponseLines, Error> {
        let mut lines = ResponseLines::new();
        loop {
            let line = self.read_line(start, budget_ms)?;
            if let Some(code) = device_error(&line) {
                return Err(Error::Device(code));
            }
            match term {
                Terminator::Ok => {
                    if line.as_str() == "OK" {
                        return Ok(lines);
                    }
                    if lines.push(line).is_err() {
                        warn!("response line dropped, collection buffer full");
                    }
                }
                Terminator::Prefix(prefix) => {
                    if line.as_str().starts_with(prefix) {
                        lines.push(line).ok();
                        return Ok(lines);
                    }
                    if line.as_str() != "OK" && lines.push(line).is_err() {
                        warn!("response line dropped, collection buffer full");
                    }
                }
            }
        }
    }

    /// Run one exchange: transmit the request, match the response against
    /// the command's template, within the command's own deadline.
    pub fn exchange<C: AtCmd>(&mut self, cmd: &C) -> Result<C::Response, Error> {
        self.exchange_with_timeout(cmd, C::TIMEOUT_MS)
    }

    /// Run one exchange with the deadline overridden for this exchange
    /// only; the override never outlives the call.
    pub fn exchange_with_timeout<C: AtCmd>(
        &mut self,
        cmd: &C,
        timeout_ms: u32,
    ) -> Result<C::Response, Error> {
        let start = self.begin(cmd)?;
        let lines = self.read_response(&start, timeout_ms, &C::TERMINATOR)?;
        cmd.parse(&lines).map_err(|e| {
            if e == Error::InvalidResponse {
                warn!("response did not match expected template");
            }
            e
        })
    }

    /// Prompt-driven payload exchange: request line, `>` prompt, raw
    /// payload, then a result line starting with `success`.
    pub fn send_payload<C: AtCmd>(
        &mut self,
        cmd: &C,
        payload: &[u8],
        success: &'static str,
    ) -> Result<RespLine, Error> {
        let start = self.begin(cmd)?;
        let mut line = RespLine::new();
        loop {
            match self.read_byte(&start, C::TIMEOUT_MS)? {
                b'>' => break,
                b'\r' => {}
                b'\n' => {
                    // The module refuses the prompt with a result line,
                    // e.g. ERROR on a closed socket.
                    if let Some(code) = device_error(&line) {
                        return Err(Error::Device(code));
                    }
                    line.clear();
                }
                b => {
                    line.push(b as char).ok();
                }
            }
        }
        self.write_raw(payload)?;
        loop {
            let line = self.read_line(&start, C::TIMEOUT_MS)?;
            if let Some(code) = device_error(&line) {
                return Err(Error::Device(code));
            }
            if line.as_str().starts_with(success) {
                return Ok(line);
            }
        }
    }

    /// Length-prefixed binary read: request line, a `header` line carrying
    /// the byte count, the raw payload, then the final `OK`.
    pub fn read_binary<C: AtCmd>(
        &mut self,
        cmd: &C,
        header: &'static str,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        let start = self.begin(cmd)?;
        let count = loop {
            let line = self.read_line(&start, C::TIMEOUT_MS)?;
            if let Some(code) = device_error(&line) {
                return Err(Error::Device(code));
            }
            if let Some(rest) = line.as_str().strip_prefix(header) {
                break Scanner::new(rest).u32()? as usize;
            }
        };
        if count > buf.len() {
            return Err(Error::InvalidResponse);
        }
        let mut filled = 0;
        if count > 0 {
            // The module emits a stray LF between the count line and the
            // payload.
            let first = self.read_byte(&start, C::TIMEOUT_MS)?;
            if first != b'\n' {
                buf[0] = first;
                filled = 1;
            }
            while filled < count {
                buf[filled] = self.read_byte(&start, C::TIMEOUT_MS)?;
                filled += 1;
            }
        }
        loop {
            let line = self.read_line(&start, C::TIMEOUT_MS)?;
            if let Some(code) = device_error(&line) {
                return Err(Error::Device(code));
            }
            if line.as_str() == "OK" {
                return Ok(count);
            }
        }
    }

    /// Wait for a line starting with `prefix`, on a fresh deadline. Used
    /// for results that trickle in after an exchange completed, e.g. the
    /// per-address lines of a DNS lookup.
    pub fn wait_line(&mut self, prefix: &str, timeout_ms: u32) -> Result<RespLine, Error> {
        let start = self.now()?;
        loop {
            let line = self.read_line(&start, timeout_ms)?;
            if let Some(code) = device_error(&line) {
                return Err(Error::Device(code));
            }
            if line.as_str().starts_with(prefix) {
                return Ok(line);
            }
        }
    }

    /// Wait for the final `OK` of a composed exchange.
    pub(crate) fn wait_ok(&mut self, timeout_ms: u32) -> Result<(), Error> {
        let start = self.now()?;
        loop {
            let line = self.read_line(&start, timeout_ms)?;
            if let Some(code) = device_error(&line) {
                return Err(Error::Device(code));
            }
            if line.as_str() == "OK" {
                return Ok(());
            }
        }
    }

    /// Read exactly `buf.len()` raw bytes, on a fresh deadline.
    pub(crate) fn read_exact(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<(), Error> {
        let start = self.now()?;
        for slot in buf.iter_mut() {
            *slot = self.read_byte(&start, timeout_ms)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::network_service::GetSignalQuality;
    use crate::command::At;
    use crate::test_helper::{MockClock, MockSerial};

    fn channel(serial: MockSerial) -> AtChannel<MockSerial, MockClock> {
        AtChannel::new(serial, MockClock::new(10), false)
    }

    #[test]
    fn exchange_matches_template() {
        let serial = MockSerial::new().expect("AT+CSQ\r", "+CSQ: 24,99\r\nOK\r\n");
        let mut ch = channel(serial);
        let quality = ch.exchange(&GetSignalQuality).unwrap();
        assert_eq!((quality.rssi, quality.ber), (24, 99));
        assert!(ch.serial.script_done());
    }

    #[test]
    fn exchange_times_out_without_response() {
        let serial = MockSerial::new().expect("AT\r", "");
        let mut ch = channel(serial);
        assert_eq!(ch.exchange(&At).unwrap_err(), Error::Timeout);
    }

    #[test]
    fn template_mismatch_is_invalid_response_not_timeout() {
        let serial = MockSerial::new().expect("AT+CSQ\r", "+CSQ: banana\r\nOK\r\n");
        let mut ch = channel(serial);
        assert_eq!(ch.exchange(&GetSignalQuality).unwrap_err(), Error::InvalidResponse);
    }

    #[test]
    fn cme_error_surfaces_device_code() {
        let serial = MockSerial::new().expect("AT+CSQ\r", "+CME ERROR: 30\r\n");
        let mut ch = channel(serial);
        assert_eq!(ch.exchange(&GetSignalQuality).unwrap_err(), Error::Device(30));
    }

    #[test]
    fn bare_error_is_device_failure() {
        let serial = MockSerial::new().expect("AT\r", "ERROR\r\n");
        let mut ch = channel(serial);
        assert_eq!(ch.exchange(&At).unwrap_err(), Error::Device(-1));
    }

    #[test]
    fn residual_input_is_discarded_at_exchange_boundary() {
        let serial = MockSerial::new()
            .residual("+QIURC: \"recv\",0\r\n")
            .expect("AT\r", "OK\r\n");
        let mut ch = channel(serial);
        ch.exchange(&At).unwrap();
        assert!(ch.serial.script_done());
    }

    #[test]
    fn per_exchange_timeout_override_does_not_stick() {
        let serial = MockSerial::new()
            .expect("AT\r", "OK\r\n")
            .expect("AT\r", "");
        let mut ch = channel(serial);
        ch.exchange_with_timeout(&At, 120_000).unwrap();
        // Second exchange runs on the command's own 1 s deadline; with the
        // mock clock stepping 10 ms per poll this must trip quickly.
        assert_eq!(ch.exchange(&At).unwrap_err(), Error::Timeout);
        assert!(ch.clock.polls() < 500);
    }
}
