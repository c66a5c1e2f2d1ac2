//! MQTT client dialect. All results of the long-running operations arrive
//! as late `+QMT...` lines after the `OK`, so most of these exchanges
//! terminate on a prefix.

use core::fmt::Write as _;

use heapless::String;

use super::scan::{find_line, Scanner};
use super::{AtCmd, CmdLine, NoResponse, ResponseLines, Terminator};
use crate::command::psn::ContextId;
use crate::error::Error;

/// `AT+QMTCFG="version",<id>,<v>` - 3 for MQTT 3.1, 4 for 3.1.1.
pub struct MqttConfigVersion {
    pub id: u8,
    pub version: u8,
}

impl AtCmd for MqttConfigVersion {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTCFG=\"version\",{},{}", self.id, self.version)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="pdpcid",<id>,<ctx>`.
pub struct MqttConfigPdpCid {
    pub id: u8,
    pub ctx: ContextId,
}

impl AtCmd for MqttConfigPdpCid {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTCFG=\"pdpcid\",{},{}", self.id, self.ctx.0)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="will",...` - last-will message.
pub struct MqttConfigWill<'a> {
    pub id: u8,
    pub qos: u8,
    pub retain: bool,
    pub topic: &'a str,
    pub message: &'a str,
}

impl AtCmd for MqttConfigWill<'_> {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTCFG=\"will\",{},1,{},{},\"{}\",\"{}\"",
            self.id, self.qos, self.retain as u8, self.topic, self.message
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="timeout",<id>,<pkt_timeout>,<retries>,<notice>`.
pub struct MqttConfigTimeout {
    pub id: u8,
    pub pkt_timeout: u8,
    pub retries: u8,
    pub notice: bool,
}

impl AtCmd for MqttConfigTimeout {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTCFG=\"timeout\",{},{},{},{}",
            self.id, self.pkt_timeout, self.retries, self.notice as u8
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="session",<id>,<clean>`.
pub struct MqttConfigSession {
    pub id: u8,
    pub clean: bool,
}

impl AtCmd for MqttConfigSession {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTCFG=\"session\",{},{}",
            self.id, self.clean as u8
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="keepalive",<id>,<seconds>`.
pub struct MqttConfigKeepAlive {
    pub id: u8,
    pub seconds: u16,
}

impl AtCmd for MqttConfigKeepAlive {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTCFG=\"keepalive\",{},{}",
            self.id, self.seconds
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="ssl",<id>,<enable>,<ssl_ctx>`.
pub struct MqttConfigSsl {
    pub id: u8,
    pub enable: bool,
    pub ssl_ctx: u8,
}

impl AtCmd for MqttConfigSsl {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTCFG=\"ssl\",{},{},{}",
            self.id, self.enable as u8, self.ssl_ctx
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// `AT+QMTCFG="recv/mode",<id>,0,1` - buffer inbound publishes on the
/// module until read with `AT+QMTRECV`; keeps unsolicited payload traffic
/// off the shared command channel.
pub struct MqttConfigRecvMode {
    pub id: u8,
}

impl AtCmd for MqttConfigRecvMode {
    type Response = NoResponse;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTCFG=\"recv/mode\",{},0,1", self.id)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

fn parse_result_line(line: &str, prefix: &str, expect_id: u8) -> Result<(i32, i32), Error> {
    let mut s = Scanner::new(line);
    s.literal(prefix)?;
    let id = s.u32()? as u8;
    s.comma()?;
    let field = s.i32()?;
    let code = if s.comma().is_ok() { s.i32()? } else { 0 };
    if id != expect_id {
        return Err(Error::InvalidResponse);
    }
    Ok((field, code))
}

/// `AT+QMTOPEN=<id>,"<host>",<port>` - open the network connection to the
/// broker.
pub struct MqttOpen<'a> {
    pub id: u8,
    pub hostname: &'a str,
    pub port: u16,
}

impl AtCmd for MqttOpen<'_> {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 75_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QMTOPEN:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTOPEN={},\"{}\",{}",
            self.id, self.hostname, self.port
        )?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let line = find_line(lines, "+QMTOPEN:")?;
        let (rc, _) = parse_result_line(line, "+QMTOPEN:", self.id)?;
        if rc != 0 {
            return Err(Error::Device(rc));
        }
        Ok(NoResponse)
    }
}

/// `AT+QMTCLOSE=<id>`.
pub struct MqttClose {
    pub id: u8,
}

impl AtCmd for MqttClose {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 30_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QMTCLOSE:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTCLOSE={}", self.id)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// Broker's answer to a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectResult {
    pub result: u8,
    /// 0 accepted, 1 unacceptable protocol, 2 identifier rejected,
    /// 3 server unavailable, 4 bad credentials, 5 not authorized.
    pub reason: u8,
}

/// `AT+QMTCONN=<id>,"<client>"[,"<user>","<pass>"]`.
pub struct MqttConnect<'a> {
    pub id: u8,
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl AtCmd for MqttConnect<'_> {
    type Response = ConnectResult;

    const TIMEOUT_MS: u32 = 60_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QMTCONN:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTCONN={},\"{}\"", self.id, self.client_id)?;
        if !self.username.is_empty() {
            write!(buf, ",\"{}\",\"{}\"", self.username, self.password)?;
        }
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let line = find_line(lines, "+QMTCONN:")?;
        let (result, reason) = parse_result_line(line, "+QMTCONN:", self.id)?;
        Ok(ConnectResult {
            result: result as u8,
            reason: reason as u8,
        })
    }
}

/// `AT+QMTDISC=<id>`.
pub struct MqttDisconnect {
    pub id: u8,
}

impl AtCmd for MqttDisconnect {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 30_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QMTDISC:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTDISC={}", self.id)?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// Result of a subscribe/unsubscribe exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubscribeResult {
    pub msg_id: u16,
    /// 0 accepted, 1 retransmitting, 2 failed to send.
    pub result: u8,
}

/// `AT+QMTSUB=<id>,<msg_id>,"<topic>",<qos>`.
pub struct MqttSubscribe<'a> {
    pub id: u8,
    pub msg_id: u16,
    pub topic: &'a str,
    pub qos: u8,
}

impl AtCmd for MqttSubscribe<'_> {
    type Response = SubscribeResult;

    const TIMEOUT_MS: u32 = 15_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QMTSUB:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTSUB={},{},\"{}\",{}",
            self.id, self.msg_id, self.topic, self.qos
        )?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let line = find_line(lines, "+QMTSUB:")?;
        let (msg_id, result) = parse_result_line(line, "+QMTSUB:", self.id)?;
        Ok(SubscribeResult {
            msg_id: msg_id as u16,
            result: result as u8,
        })
    }
}

/// `AT+QMTUNS=<id>,<msg_id>,"<topic>"`.
pub struct MqttUnsubscribe<'a> {
    pub id: u8,
    pub msg_id: u16,
    pub topic: &'a str,
}

impl AtCmd for MqttUnsubscribe<'_> {
    type Response = SubscribeResult;

    const TIMEOUT_MS: u32 = 15_000;
    const TERMINATOR: Terminator = Terminator::Prefix("+QMTUNS:");

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTUNS={},{},\"{}\"",
            self.id, self.msg_id, self.topic
        )?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let line = find_line(lines, "+QMTUNS:")?;
        let (msg_id, result) = parse_result_line(line, "+QMTUNS:", self.id)?;
        Ok(SubscribeResult {
            msg_id: msg_id as u16,
            result: result as u8,
        })
    }
}

/// `AT+QMTPUB=<id>,<msg_id>,<qos>,<retain>,"<topic>",<len>` - announce a
/// publish on the prompt-driven payload flow; the `+QMTPUB:` result line
/// closes it.
pub struct MqttPublish<'a> {
    pub id: u8,
    pub msg_id: u16,
    pub qos: u8,
    pub retain: bool,
    pub topic: &'a str,
    pub len: usize,
}

impl AtCmd for MqttPublish<'_> {
    type Response = NoResponse;

    const TIMEOUT_MS: u32 = 15_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(
            buf,
            "AT+QMTPUB={},{},{},{},\"{}\",{}",
            self.id, self.msg_id, self.qos, self.retain as u8, self.topic, self.len
        )?;
        Ok(())
    }

    fn parse(&self, _lines: &ResponseLines) -> Result<Self::Response, Error> {
        Ok(NoResponse)
    }
}

/// One message drained from the module-side receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttInbound {
    pub msg_id: u16,
    pub topic: String<64>,
    pub payload: String<128>,
}

/// `AT+QMTRECV=<id>,<recv_id>` - drain one buffered inbound publish.
/// Answers with just `OK` when the buffer slot is empty.
pub struct MqttReadStored {
    pub id: u8,
    pub recv_id: u8,
}

impl AtCmd for MqttReadStored {
    type Response = Option<MqttInbound>;

    const TIMEOUT_MS: u32 = 5_000;

    fn write(&self, buf: &mut CmdLine) -> Result<(), Error> {
        write!(buf, "AT+QMTRECV={},{}", self.id, self.recv_id)?;
        Ok(())
    }

    fn parse(&self, lines: &ResponseLines) -> Result<Self::Response, Error> {
        let line = match find_line(lines, "+QMTRECV:") {
            Ok(line) => line,
            Err(_) => return Ok(None),
        };
        let mut s = Scanner::new(line);
        s.literal("+QMTRECV:")?;
        let _id = s.u32()?;
        s.comma()?;
        let msg_id = s.u32()? as u16;
        s.comma()?;
        let topic = s.quoted::<64>()?;
        s.comma()?;
        let mut payload = String::new();
        let mut raw = s.rest().trim();
        // Some firmware revisions insert the payload length before the
        // payload itself.
        if raw.chars().next().map_or(false, |c| c.is_ascii_digit()) {
            if let Some((_, rest)) = raw.split_once(',') {
                raw = rest.trim();
            }
        }
        let raw = raw.strip_prefix('"').unwrap_or(raw);
        let raw = raw.strip_suffix('"').unwrap_or(raw);
        payload.push_str(raw).map_err(|_| Error::Overflow)?;
        Ok(Some(MqttInbound {
            msg_id,
            topic,
            payload,
        }))
    }
}
