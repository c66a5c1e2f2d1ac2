use core::cell::{Cell, RefCell};
use core::convert::TryInto;
use core::fmt::Write as _;

use embedded_hal_nb::serial;
use embedded_nal::{IpAddr, SocketAddr};
use embedded_time::duration::{Generic, Milliseconds};
use embedded_time::Clock;
use heapless::{String, Vec};

use crate::command::channel::AtChannel;
use crate::command::dns::{ResolveHostName, DNSGIP_URC};
use crate::command::general::{Ccid, FirmwareRev, ModelId};
use crate::command::ip_transport::{
    CloseSocket, GetLastError, LastError, OpenSocket, ReadAvailable, ReadData, SendData,
};
use crate::command::network_service::{GetOperator, GetSignalQuality, SignalQuality};
use crate::command::psn::{
    ActivatePdp, ConfigurePdp, DeactivatePdp, GetNetworkTime, ModemTime, QueryPdpAddress,
    QueryPdpConfig,
};
use crate::command::scan::Scanner;
use crate::command::{At, AtCmd, EchoOff};
use crate::config::Config;
use crate::error::Error;
use crate::socket::{
    Protocol, RxState, SocketEntry, SocketEvent, SocketHandle, SocketSet, TxState,
};

/// Largest chunk the module accepts in one `AT+QISEND`.
pub const EGRESS_CHUNK_SIZE: usize = 1460;
/// Largest read the module returns in one `AT+QIRD`.
pub const INGRESS_CHUNK_SIZE: usize = 1500;
/// Fast pump cadence while any socket machine is actively polled.
pub const POLL_INTERVAL_MS: u32 = 50;
/// Coarse cadence once a listening socket has idled past the long-poll
/// threshold.
pub const SLOW_POLL_INTERVAL_MS: u32 = 2_000;

/// What the pump wants from its caller next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PollCadence {
    /// Pending work; call [`Bg96Client::spin`] again after the fast
    /// interval.
    Fast,
    /// Only long-idle listening sockets remain; the coarse interval is
    /// enough.
    Slow,
    /// No socket machine is active.
    Idle,
}

impl PollCadence {
    pub fn interval_ms(&self) -> Option<u32> {
        match self {
            PollCadence::Fast => Some(POLL_INTERVAL_MS),
            PollCadence::Slow => Some(SLOW_POLL_INTERVAL_MS),
            PollCadence::Idle => None,
        }
    }
}

/// Outcome of one TX/RX state-machine step.
enum Step {
    /// The machine reached a terminal state.
    Done,
    /// Another pump is needed.
    Again,
}

/// Driver engine: the command channel, the socket table with its per-socket
/// TX/RX state machines, and the cooperative scheduler that advances them.
///
/// All methods take `&self`; the two `RefCell`s are the driver's two
/// serialization points. The channel lock is held for the duration of one
/// exchange, the socket-table lock briefly around state transitions. Both
/// are only ever try-borrowed, so no call site blocks on the other.
pub struct Bg96Client<W, CLK, C, const N: usize = 6, const L: usize = 2048> {
    pub(crate) channel: RefCell<AtChannel<W, CLK>>,
    pub(crate) sockets: RefCell<SocketSet<C, N, L>>,
    config: Config,
    initialized: Cell<bool>,
    attached: Cell<bool>,
    /// Outstanding scheduled wake-ups, capped at the socket capacity to
    /// avoid rescheduling storms while the locks are contended.
    scheduled: Cell<u8>,
}

impl<W, CLK, C, const N: usize, const L: usize> Bg96Client<W, CLK, C, N, L>
where
    W: serial::Read<u8> + serial::Write<u8>,
    CLK: Clock,
    Generic<CLK::T>: TryInto<Milliseconds>,
    C: FnMut(SocketHandle, SocketEvent),
{
    pub fn new(serial: W, clock: CLK, config: Config) -> Self {
        let at_trace = config.at_trace;
        Bg96Client {
            channel: RefCell::new(AtChannel::new(serial, clock, at_trace)),
            sockets: RefCell::new(SocketSet::new()),
            config,
            initialized: Cell::new(false),
            attached: Cell::new(false),
            scheduled: Cell::new(0),
        }
    }

    /// Send a single AT command. This is the one primitive higher layers
    /// (TLS, MQTT, GNSS, file storage) need; the exchange owns the channel
    /// lock for its full duration.
    pub fn send_at<A: AtCmd>(&self, cmd: &A) -> Result<A::Response, Error> {
        self.channel.try_borrow_mut()?.exchange(cmd)
    }

    /// Bring the command link to a known state: autosense the module,
    /// disable echo and check registration.
    pub fn startup(&self) -> Result<(), Error> {
        let mut channel = self.channel.try_borrow_mut()?;
        let mut alive = false;
        for _ in 0..15 {
            if channel.exchange(&At).is_ok() {
                alive = true;
                break;
            }
        }
        if !alive {
            return Err(Error::Timeout);
        }
        channel.exchange(&EchoOff)?;
        channel.exchange(&GetOperator)?;
        self.initialized.set(true);
        Ok(())
    }

    /// Activate the configured PDP context. Reprograms the stored APN only
    /// when it differs from the configuration.
    pub fn attach(&self) -> Result<(), Error> {
        if !self.initialized.get() {
            return Err(Error::Uninitialized);
        }
        let ctx = self.config.context_id;
        let mut channel = self.channel.try_borrow_mut()?;

        let needs_config = match channel.exchange(&QueryPdpConfig { ctx }) {
            Ok(stored) => stored.apn.as_str() != self.config.apn.as_str(),
            Err(_) => true,
        };
        if needs_config {
            channel.exchange(&ConfigurePdp {
                ctx,
                apn: &self.config.apn,
                username: &self.config.username,
                password: &self.config.password,
            })?;
        }

        // Activation can take the module minutes; each exchange already
        // carries the 150 s worst case, bounded retries on top.
        let mut last = Error::Timeout;
        for attempt in 1..=3 {
            match channel.exchange(&ActivatePdp { ctx }) {
                Ok(_) => {
                    info!("PDP context {} active", ctx.0);
                    self.attached.set(true);
                    return Ok(());
                }
                Err(e @ (Error::Timeout | Error::Device(_))) => {
                    warn!("PDP activation attempt {} failed: {:?}", attempt, e);
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    /// Deactivate the PDP context.
    pub fn detach(&self) -> Result<(), Error> {
        let ctx = self.config.context_id;
        self.channel
            .try_borrow_mut()?
            .exchange(&DeactivatePdp { ctx })?;
        self.attached.set(false);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    /// The PDP context all driver traffic runs over.
    pub fn context_id(&self) -> crate::command::psn::ContextId {
        self.config.context_id
    }

    pub fn signal_quality(&self) -> Result<SignalQuality, Error> {
        self.channel.try_borrow_mut()?.exchange(&GetSignalQuality)
    }

    /// Local address of the active PDP context.
    pub fn local_ip(&self) -> Result<String<16>, Error> {
        let address = self.channel.try_borrow_mut()?.exchange(&QueryPdpAddress)?;
        Ok(address.ip)
    }

    /// Combined model and firmware revision string.
    pub fn firmware_revision(&self) -> Result<String<64>, Error> {
        let mut channel = self.channel.try_borrow_mut()?;
        let model = channel.exchange(&ModelId)?;
        let rev = channel.exchange(&FirmwareRev)?;
        let mut out = String::new();
        write!(out, "{} Rev:{}", model, rev)?;
        Ok(out)
    }

    pub fn iccid(&self) -> Result<String<24>, Error> {
        self.channel.try_borrow_mut()?.exchange(&Ccid)
    }

    /// Latest network-synchronized calendar time.
    pub fn network_time(&self) -> Result<ModemTime, Error> {
        self.channel.try_borrow_mut()?.exchange(&GetNetworkTime)
    }

    /// Detail on the most recent data-service failure.
    pub fn last_error(&self) -> Result<LastError, Error> {
        self.channel.try_borrow_mut()?.exchange(&GetLastError)
    }

    /// Resolve a hostname through the module's DNS client. The first
    /// reported address wins; the rest are drained and discarded.
    pub fn resolve(&self, hostname: &str) -> Result<IpAddr, Error> {
        let ctx = self.config.context_id;
        let mut channel = self.channel.try_borrow_mut()?;
        let lookup = channel.exchange(&ResolveHostName { ctx, hostname })?;
        if lookup.error != 0 || lookup.count == 0 {
            return Err(Error::Device(lookup.error));
        }
        let mut first: Option<IpAddr> = None;
        for _ in 0..lookup.count {
            let line = channel.wait_line(DNSGIP_URC, 60_000)?;
            let mut s = Scanner::new(line.as_str());
            s.literal(DNSGIP_URC)?;
            s.comma()?;
            let ip = s.quoted::<40>()?;
            if first.is_none() {
                first = Some(ip.as_str().parse().map_err(|_| Error::InvalidResponse)?);
            }
        }
        first.ok_or(Error::InvalidResponse)
    }

    /// Allocate a socket slot. Purely a registry operation; the module-side
    /// socket comes to life on `socket_connect`.
    pub fn socket_open(&self, protocol: Protocol) -> Result<SocketHandle, Error> {
        let mut sockets = self.sockets.try_borrow_mut()?;
        let handle = sockets.add(protocol).map_err(|e| {
            error!("no socket slot available");
            Error::Socket(e)
        })?;
        debug!("[SOCK] opened socket {}", handle.0);
        Ok(handle)
    }

    /// Register the completion callback for a socket. Invoked by the
    /// scheduler with both driver locks released, so it may call straight
    /// back into `socket_send`/`socket_recv`.
    pub fn set_callback(&self, handle: SocketHandle, callback: C) -> Result<(), Error> {
        let mut sockets = self.sockets.try_borrow_mut()?;
        sockets.get(handle)?.callback = Some(callback);
        Ok(())
    }

    /// Mark a socket as listening: its reads poll for inbound data with the
    /// timeout disabled, on the coarse cadence. This is the only path that
    /// disables the read timeout.
    pub fn socket_listen(&self, handle: SocketHandle) -> Result<(), Error> {
        {
            let mut sockets = self.sockets.try_borrow_mut()?;
            let entry = sockets.get(handle)?;
            if entry.connected {
                return Err(Error::Socket(crate::socket::Error::Illegal));
            }
            entry.listening = true;
        }
        self.schedule();
        Ok(())
    }

    /// Open the module-side socket towards `remote`. One bounded exchange
    /// per attempt, three attempts, with a best-effort close in between.
    pub fn socket_connect(&self, handle: SocketHandle, remote: SocketAddr) -> Result<(), Error> {
        let protocol = {
            let mut sockets = self.sockets.try_borrow_mut()?;
            let entry = sockets.get(handle)?;
            if entry.connected {
                return Err(Error::Socket(crate::socket::Error::Illegal));
            }
            entry.protocol
        };

        let ctx = self.config.context_id;
        let mut result = Err(Error::Timeout);
        {
            let mut channel = self.channel.try_borrow_mut()?;
            for attempt in 1..=3 {
                match channel.exchange(&OpenSocket {
                    ctx,
                    id: handle.0,
                    protocol,
                    remote,
                }) {
                    Ok(_) => {
                        result = Ok(());
                        break;
                    }
                    Err(e) => {
                        warn!("[SOCK] open attempt {} on socket {} failed: {:?}", attempt, handle.0, e);
                        channel.exchange(&CloseSocket { id: handle.0 }).ok();
                        result = Err(e);
                    }
                }
            }
        }
        result?;

        let callback = {
            let mut sockets = self.sockets.try_borrow_mut()?;
            let entry = sockets.get(handle)?;
            entry.connected = true;
            entry.endpoint = Some(remote);
            entry.callback.take()
        };
        debug!("[SOCK] socket {} connected", handle.0);
        if let Some(mut callback) = callback {
            callback(handle, SocketEvent::Connected);
            self.restore_callback(handle, callback);
        }
        Ok(())
    }

    pub fn socket_is_connected(&self, handle: SocketHandle) -> Result<bool, Error> {
        let mut sockets = self.sockets.try_borrow_mut()?;
        Ok(sockets.get(handle)?.connected)
    }

    pub(crate) fn socket_endpoint(&self, handle: SocketHandle) -> Result<SocketAddr, Error> {
        let mut sockets = self.sockets.try_borrow_mut()?;
        sockets
            .get(handle)?
            .endpoint
            .ok_or(Error::Socket(crate::socket::Error::Illegal))
    }

    /// Send on a socket.
    ///
    /// A fresh call on an idle socket copies up to the buffer capacity and
    /// runs one synchronous chunk exchange; if that completes the whole
    /// transfer the accepted count returns immediately. Otherwise the
    /// transfer is handed to the scheduler and the call reports
    /// `WouldBlock` until the final count can be drained. Calls while a
    /// transfer is in flight never re-enter the state machine.
    pub fn socket_send(&self, handle: SocketHandle, data: &[u8]) -> nb::Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut sockets = self
            .sockets
            .try_borrow_mut()
            .map_err(|_| nb::Error::Other(Error::Busy))?;
        let entry = sockets
            .get(handle)
            .map_err(|e| nb::Error::Other(Error::Socket(e)))?;
        if !entry.connected {
            return Err(nb::Error::Other(Error::Socket(
                crate::socket::Error::Illegal,
            )));
        }

        match entry.tx.state {
            TxState::Idle => {
                let accepted = data.len().min(L);
                entry.tx.start(&data[..accepted]);
                let step = match self.channel.try_borrow_mut() {
                    Ok(mut channel) => Self::tx_step(&mut channel, entry),
                    Err(_) => {
                        entry.tx.state = TxState::Active;
                        Step::Again
                    }
                };
                match step {
                    Step::Again => {
                        drop(sockets);
                        self.schedule();
                        Err(nb::Error::WouldBlock)
                    }
                    Step::Done => {
                        let callback = if entry.tx.state == TxState::CallbackPending {
                            entry.callback.take()
                        } else {
                            None
                        };
                        let sent = entry.tx.sent;
                        entry.tx.reset();
                        drop(sockets);
                        if let Some(mut callback) = callback {
                            callback(handle, SocketEvent::TxComplete);
                            self.restore_callback(handle, callback);
                        }
                        Ok(sent)
                    }
                }
            }
            TxState::Starting | TxState::Active | TxState::CallbackPending => {
                Err(nb::Error::WouldBlock)
            }
            TxState::Complete => {
                let sent = entry.tx.sent;
                entry.tx.reset();
                debug!("[SOCK] socket {} sent {} bytes", handle.0, sent);
                Ok(sent)
            }
        }
    }

    /// Receive on a socket.
    ///
    /// Mirrors [`socket_send`](Self::socket_send): synchronous fast path on
    /// an idle machine, `WouldBlock` while polling, drain-and-reset once
    /// data (or the zero-byte timeout result) is available. A zero-byte
    /// `Ok` is a timed-out read, not an error and not end-of-stream.
    pub fn socket_recv(&self, handle: SocketHandle, data: &mut [u8]) -> nb::Result<usize, Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let timeout_ticks = self.read_timeout_ticks();
        let mut sockets = self
            .sockets
            .try_borrow_mut()
            .map_err(|_| nb::Error::Other(Error::Busy))?;
        let entry = sockets
            .get(handle)
            .map_err(|e| nb::Error::Other(Error::Socket(e)))?;

        match entry.rx.state {
            RxState::Start => {
                let listening = entry.listening;
                entry.rx.init(data.len(), listening);
                let step = match self.channel.try_borrow_mut() {
                    Ok(mut channel) => Self::rx_step(&mut channel, entry, timeout_ticks),
                    Err(_) => {
                        entry.rx.state = RxState::Active;
                        Step::Again
                    }
                };
                match step {
                    Step::Again => {
                        drop(sockets);
                        self.schedule();
                        Err(nb::Error::WouldBlock)
                    }
                    Step::Done => {
                        let callback = if entry.rx.state == RxState::CallbackPending {
                            entry.callback.take()
                        } else {
                            None
                        };
                        let count = Self::drain_rx(entry, data);
                        drop(sockets);
                        if let Some(mut callback) = callback {
                            callback(handle, SocketEvent::RxDataAvailable);
                            self.restore_callback(handle, callback);
                        }
                        Ok(count)
                    }
                }
            }
            RxState::Init | RxState::Active | RxState::CallbackPending => {
                Err(nb::Error::WouldBlock)
            }
            RxState::DataAvailable => {
                let count = Self::drain_rx(entry, data);
                debug!("[SOCK] socket {} returned {} bytes", handle.0, count);
                Ok(count)
            }
        }
    }

    /// Close a socket and reclaim its slot.
    ///
    /// The state machines are reset and the callback cleared first, so no
    /// completion can be delivered for this socket afterwards; any exchange
    /// already in flight finishes on the channel and its result is
    /// discarded. The module-side close is best-effort: the slot is
    /// reclaimed regardless.
    pub fn socket_close(&self, handle: SocketHandle) -> Result<(), Error> {
        let mut sockets = self.sockets.try_borrow_mut()?;
        let connected = {
            let entry = sockets.get(handle)?;
            entry.callback = None;
            entry.tx.reset();
            entry.rx.reset();
            entry.connected
        };
        if connected {
            match self.channel.try_borrow_mut() {
                Ok(mut channel) => {
                    if let Err(e) = channel.exchange(&CloseSocket { id: handle.0 }) {
                        warn!("[SOCK] module-side close of socket {} failed: {:?}", handle.0, e);
                    }
                }
                Err(_) => {
                    warn!("[SOCK] channel busy, skipping module-side close of socket {}", handle.0);
                }
            }
        }
        sockets.remove(handle)?;
        debug!("[SOCK] closed socket {}", handle.0);
        Ok(())
    }

    /// One cooperative pump pass.
    ///
    /// Advances every active TX/RX machine once, then delivers pending
    /// completion callbacks with both locks released. If either lock is
    /// held by another call site the pass re-arms itself instead of
    /// blocking. The return value tells the caller when to pump next.
    pub fn spin(&self) -> PollCadence {
        if self.scheduled.get() > 0 {
            self.scheduled.set(self.scheduled.get() - 1);
        }

        let mut sockets = match self.sockets.try_borrow_mut() {
            Ok(sockets) => sockets,
            Err(_) => {
                self.schedule();
                return PollCadence::Fast;
            }
        };

        let timeout_ticks = self.read_timeout_ticks();
        let long_poll_ticks =
            timeout_ticks.saturating_mul(SLOW_POLL_INTERVAL_MS / POLL_INTERVAL_MS);
        let mut again = false;
        let mut go_slow = false;

        match self.channel.try_borrow_mut() {
            Ok(mut channel) => {
                for entry in sockets.iter_mut() {
                    if entry.rx.state == RxState::Active {
                        if let Step::Again = Self::rx_step(&mut channel, entry, timeout_ticks) {
                            again = true;
                        }
                        if entry.rx.disable_timeout && entry.rx.polls > long_poll_ticks {
                            entry.rx.polls = long_poll_ticks;
                            go_slow = true;
                        }
                    }
                    if entry.tx.state == TxState::Active {
                        go_slow = false;
                        if let Step::Again = Self::tx_step(&mut channel, entry) {
                            again = true;
                        }
                    }
                }
            }
            Err(_) => {
                // A synchronous caller holds the channel; come back shortly.
                drop(sockets);
                self.schedule();
                return PollCadence::Fast;
            }
        }

        // Second pass: collect due completions, then deliver them with both
        // locks released so a callback can issue socket calls directly.
        let mut pending: Vec<(SocketHandle, SocketEvent), N> = Vec::new();
        for entry in sockets.iter_mut() {
            if entry.rx.state == RxState::CallbackPending
                && pending
                    .push((entry.handle, SocketEvent::RxDataAvailable))
                    .is_ok()
            {
                entry.rx.state = RxState::DataAvailable;
            }
            if entry.tx.state == TxState::CallbackPending
                && pending.push((entry.handle, SocketEvent::TxComplete)).is_ok()
            {
                entry.tx.state = TxState::Complete;
            }
            if entry.rx.state == RxState::CallbackPending
                || entry.tx.state == TxState::CallbackPending
            {
                again = true;
            }
        }
        drop(sockets);

        for (handle, event) in pending {
            let callback = self
                .sockets
                .try_borrow_mut()
                .ok()
                .and_then(|mut sockets| sockets.get(handle).ok().and_then(|e| e.callback.take()));
            if let Some(mut callback) = callback {
                callback(handle, event);
                self.restore_callback(handle, callback);
            }
        }

        if again {
            self.schedule();
            if go_slow {
                PollCadence::Slow
            } else {
                PollCadence::Fast
            }
        } else {
            PollCadence::Idle
        }
    }

    /// Outstanding scheduled wake-ups.
    pub fn scheduled_events(&self) -> u8 {
        self.scheduled.get()
    }

    fn schedule(&self) {
        let n = self.scheduled.get();
        if (n as usize) < N {
            self.scheduled.set(n + 1);
        }
    }

    fn read_timeout_ticks(&self) -> u32 {
        self.config.read_timeout_ms / POLL_INTERVAL_MS
    }

    /// Hand a taken callback back to its slot, unless the callback closed
    /// the socket (or replaced the callback) in the meantime.
    fn restore_callback(&self, handle: SocketHandle, callback: C) {
        if let Ok(mut sockets) = self.sockets.try_borrow_mut() {
            if let Ok(entry) = sockets.get(handle) {
                if entry.callback.is_none() {
                    entry.callback = Some(callback);
                }
            }
        }
    }

    /// One TX attempt: send the next module-sized chunk. On success the
    /// cursor advances; on failure the machine stays active and the next
    /// pump simply retries, bounded only by the surrounding session.
    fn tx_step(channel: &mut AtChannel<W, CLK>, entry: &mut SocketEntry<C, L>) -> Step {
        let id = entry.handle.0;
        let start = entry.tx.sent;
        let end = entry.tx.buf.len().min(start + EGRESS_CHUNK_SIZE);
        let sent = channel.send_payload(
            &SendData {
                id,
                len: end - start,
            },
            &entry.tx.buf[start..end],
            "SEND OK",
        );
        match sent {
            Ok(_) => {
                entry.tx.sent = end;
                if entry.tx.is_done() {
                    entry.tx.state = if entry.callback.is_some() {
                        TxState::CallbackPending
                    } else {
                        TxState::Complete
                    };
                    Step::Done
                } else {
                    entry.tx.state = TxState::Active;
                    Step::Again
                }
            }
            Err(_) => {
                debug!("[SOCK] tx chunk on socket {} failed, retrying", id);
                entry.tx.state = TxState::Active;
                Step::Again
            }
        }
    }

    /// One RX attempt: length probe, then a bounded read of what arrived.
    /// A module error retries without touching the poll budget; zero bytes
    /// ticks the poll counter and completes with an empty result once the
    /// budget is spent, unless the timeout is disabled.
    fn rx_step(
        channel: &mut AtChannel<W, CLK>,
        entry: &mut SocketEntry<C, L>,
        timeout_ticks: u32,
    ) -> Step {
        let id = entry.handle.0;
        let avail = match channel.exchange(&ReadAvailable { id }) {
            Ok(avail) => avail,
            Err(_) => {
                debug!("[SOCK] rx probe on socket {} failed, retrying", id);
                entry.rx.state = RxState::Active;
                return Step::Again;
            }
        };

        let mut count = 0;
        if avail.unread > 0 {
            let want = entry.rx.requested.min(avail.unread as usize);
            if entry.rx.buf.resize(want, 0).is_err() {
                entry.rx.state = RxState::Active;
                return Step::Again;
            }
            match channel.read_binary(&ReadData { id, len: want }, "+QIRD:", &mut entry.rx.buf) {
                Ok(n) => {
                    entry.rx.buf.truncate(n);
                    count = n;
                }
                Err(_) => {
                    debug!("[SOCK] rx read on socket {} failed, retrying", id);
                    entry.rx.buf.clear();
                    entry.rx.state = RxState::Active;
                    return Step::Again;
                }
            }
        }

        if count > 0 {
            entry.rx.state = if entry.callback.is_some() {
                RxState::CallbackPending
            } else {
                RxState::DataAvailable
            };
            return Step::Done;
        }

        entry.rx.polls += 1;
        if !entry.rx.disable_timeout && entry.rx.polls > timeout_ticks {
            entry.rx.buf.clear();
            entry.rx.state = if entry.callback.is_some() {
                RxState::CallbackPending
            } else {
                RxState::DataAvailable
            };
            return Step::Done;
        }
        entry.rx.state = RxState::Active;
        Step::Again
    }

    fn drain_rx(entry: &mut SocketEntry<C, L>, data: &mut [u8]) -> usize {
        let count = entry.rx.buf.len().min(data.len());
        data[..count].copy_from_slice(&entry.rx.buf[..count]);
        entry.rx.reset();
        count
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    use super::*;
    use crate::test_helper::{MockClock, MockSerial};

    type Callback = Box<dyn FnMut(SocketHandle, SocketEvent)>;
    type TestClient<const N: usize, const L: usize> =
        Bg96Client<MockSerial, MockClock, Callback, N, L>;

    fn client<const N: usize, const L: usize>(serial: MockSerial) -> TestClient<N, L> {
        Bg96Client::new(
            serial,
            MockClock::new(1),
            Config::new().with_apn("internet").with_read_timeout(200),
        )
    }

    fn open_script(serial: MockSerial, id: u8, proto: &str) -> MockSerial {
        serial.expect(
            &format!("AT+QIOPEN=1,{},\"{}\",\"1.2.3.4\",7,0,0\r", id, proto),
            &format!("OK\r\n+QIOPEN: {},0\r\n", id),
        )
    }

    fn connect(client: &TestClient<2, 4096>, handle: SocketHandle) {
        client
            .socket_connect(handle, "1.2.3.4:7".parse().unwrap())
            .unwrap();
    }

    #[test]
    fn loopback_send_then_recv_drains_same_bytes() {
        let serial = open_script(MockSerial::new(), 0, "TCP")
            .expect("AT+QISEND=0,5\r", "> ")
            .expect_raw(b"hello", "\r\nSEND OK\r\n")
            .expect("AT+QIRD=0,0\r", "+QIRD: 5,0,5\r\nOK\r\n")
            .expect("AT+QIRD=0,5\r", "+QIRD: 5\r\nhello\r\nOK\r\n");
        let client: TestClient<2, 4096> = client(serial);

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, handle);

        assert_eq!(client.socket_send(handle, b"hello"), Ok(5));

        let mut buf = [0u8; 16];
        assert_eq!(client.socket_recv(handle, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert!(client.channel.borrow().serial_ref().script_done());
    }

    #[test]
    fn oversized_send_produces_exact_chunk_sequence() {
        let data = vec![b'a'; 3000];
        let chunk1 = vec![b'a'; EGRESS_CHUNK_SIZE];
        let chunk3 = vec![b'a'; 3000 - 2 * EGRESS_CHUNK_SIZE];
        let serial = open_script(MockSerial::new(), 0, "TCP")
            .expect("AT+QISEND=0,1460\r", "> ")
            .expect_raw(&chunk1, "\r\nSEND OK\r\n")
            .expect("AT+QISEND=0,1460\r", "> ")
            .expect_raw(&chunk1, "\r\nSEND OK\r\n")
            .expect("AT+QISEND=0,80\r", "> ")
            .expect_raw(&chunk3, "\r\nSEND OK\r\n");
        let client: TestClient<2, 4096> = client(serial);

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, handle);

        // First chunk goes out synchronously, the rest through the pump.
        assert_eq!(client.socket_send(handle, &data), Err(nb::Error::WouldBlock));
        assert_eq!(client.spin(), PollCadence::Fast);
        assert_eq!(client.spin(), PollCadence::Idle);

        // Transfer complete: drain the final count.
        assert_eq!(client.socket_send(handle, &data), Ok(3000));
        assert!(client.channel.borrow().serial_ref().script_done());
    }

    #[test]
    fn send_while_active_would_block_without_touching_the_channel() {
        let serial = open_script(MockSerial::new(), 0, "TCP")
            // Chunk rejected: machine stays active, retried by the pump.
            .expect("AT+QISEND=0,4\r", "ERROR\r\n");
        let client: TestClient<2, 4096> = client(serial);

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, handle);

        assert_eq!(client.socket_send(handle, b"ping"), Err(nb::Error::WouldBlock));
        // Re-entering while active must not issue another exchange; the
        // script has no further expectation and would panic on one.
        assert_eq!(client.socket_send(handle, b"ping"), Err(nb::Error::WouldBlock));
    }

    #[test]
    fn recv_timeout_completes_with_zero_bytes_in_ticks() {
        let mut serial = open_script(MockSerial::new(), 0, "TCP");
        // read_timeout 200 ms / 50 ms poll interval = 4 ticks; the fifth
        // poll trips the budget. One probe per step.
        for _ in 0..5 {
            serial = serial.expect("AT+QIRD=0,0\r", "+QIRD: 0,0,0\r\nOK\r\n");
        }
        let client: TestClient<2, 4096> = client(serial);

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, handle);

        let mut buf = [0u8; 16];
        assert_eq!(
            client.socket_recv(handle, &mut buf),
            Err(nb::Error::WouldBlock)
        );
        for _ in 0..3 {
            assert_eq!(client.spin(), PollCadence::Fast);
        }
        assert_eq!(client.spin(), PollCadence::Idle);

        // Timed-out read: zero bytes with Ok, not an error.
        assert_eq!(client.socket_recv(handle, &mut buf), Ok(0));
        assert!(client.channel.borrow().serial_ref().script_done());
    }

    #[test]
    fn listening_socket_never_times_out_and_degrades_to_slow_cadence() {
        let spins = 200usize;
        let mut serial = MockSerial::new();
        for _ in 0..=spins {
            serial = serial.expect("AT+QIRD=0,0\r", "+QIRD: 0,0,0\r\nOK\r\n");
        }
        let client: TestClient<2, 4096> = client(serial);

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        client.socket_listen(handle).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(
            client.socket_recv(handle, &mut buf),
            Err(nb::Error::WouldBlock)
        );
        let mut last = PollCadence::Fast;
        for _ in 0..spins {
            last = client.spin();
        }
        // long-poll threshold: 4 ticks * (2000/50) = 160 pumps.
        assert_eq!(last, PollCadence::Slow);
        assert_eq!(
            client.socket_recv(handle, &mut buf),
            Err(nb::Error::WouldBlock)
        );
    }

    #[test]
    fn close_with_active_machines_never_fires_callback_afterwards() {
        let serial = open_script(MockSerial::new(), 0, "TCP")
            .expect("AT+QISEND=0,4\r", "ERROR\r\n")
            .expect("AT+QICLOSE=0,1\r", "OK\r\n");
        let client: TestClient<2, 4096> = client(serial);
        let fired = Rc::new(StdRefCell::new(0u32));

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, handle);
        let counter = fired.clone();
        client
            .set_callback(handle, Box::new(move |_, _| *counter.borrow_mut() += 1))
            .unwrap();

        assert_eq!(client.socket_send(handle, b"ping"), Err(nb::Error::WouldBlock));
        client.socket_close(handle).unwrap();

        for _ in 0..8 {
            client.spin();
        }
        assert_eq!(*fired.borrow(), 0);
        assert!(client.channel.borrow().serial_ref().script_done());
    }

    #[test]
    fn registry_exhaustion_and_recovery() {
        let client: TestClient<2, 4096> = client(MockSerial::new());

        let a = client.socket_open(Protocol::Udp).unwrap();
        let _b = client.socket_open(Protocol::Udp).unwrap();
        assert_eq!(
            client.socket_open(Protocol::Udp),
            Err(Error::Socket(crate::socket::Error::SocketSetFull))
        );

        // Closing an unconnected socket is purely a registry operation.
        client.socket_close(a).unwrap();
        assert!(client.socket_open(Protocol::Udp).is_ok());
    }

    #[test]
    fn handle_is_invalid_after_close() {
        let client: TestClient<2, 4096> = client(MockSerial::new());
        let handle = client.socket_open(Protocol::Udp).unwrap();
        client.socket_close(handle).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(
            client.socket_recv(handle, &mut buf),
            Err(nb::Error::Other(Error::Socket(
                crate::socket::Error::InvalidSocket
            )))
        );
    }

    #[test]
    fn scheduler_visits_sockets_in_table_order() {
        let serial = open_script(open_script(MockSerial::new(), 0, "TCP"), 1, "TCP")
            // synchronous first steps, one per socket
            .expect("AT+QIRD=0,0\r", "+QIRD: 0,0,0\r\nOK\r\n")
            .expect("AT+QIRD=1,0\r", "+QIRD: 0,0,0\r\nOK\r\n")
            // one pump: socket 0 strictly before socket 1
            .expect("AT+QIRD=0,0\r", "+QIRD: 0,0,0\r\nOK\r\n")
            .expect("AT+QIRD=1,0\r", "+QIRD: 5,0,5\r\nOK\r\n")
            .expect("AT+QIRD=1,5\r", "+QIRD: 5\r\nworld\r\nOK\r\n");
        let client: TestClient<2, 4096> = client(serial);

        let s0 = client.socket_open(Protocol::Tcp).unwrap();
        let s1 = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, s0);
        connect(&client, s1);

        let mut buf = [0u8; 16];
        assert_eq!(client.socket_recv(s0, &mut buf), Err(nb::Error::WouldBlock));
        assert_eq!(client.socket_recv(s1, &mut buf), Err(nb::Error::WouldBlock));
        client.spin();

        assert_eq!(client.socket_recv(s1, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"world");
        assert_eq!(client.socket_recv(s0, &mut buf), Err(nb::Error::WouldBlock));
    }

    #[test]
    fn scheduled_events_stay_capped_at_socket_capacity() {
        let mut serial = open_script(open_script(MockSerial::new(), 0, "TCP"), 1, "TCP");
        for _ in 0..12 {
            serial = serial.expect_prefix("AT+QISEND=", "ERROR\r\n");
        }
        let client: TestClient<2, 4096> = client(serial);

        let s0 = client.socket_open(Protocol::Tcp).unwrap();
        let s1 = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, s0);
        connect(&client, s1);

        assert_eq!(client.socket_send(s0, b"x"), Err(nb::Error::WouldBlock));
        assert_eq!(client.socket_send(s1, b"x"), Err(nb::Error::WouldBlock));
        assert!(client.scheduled_events() <= 2);
        for _ in 0..5 {
            client.spin();
            assert!(client.scheduled_events() <= 2);
        }
    }

    #[test]
    fn callback_fires_once_on_pumped_completion() {
        let serial = open_script(MockSerial::new(), 0, "TCP")
            .expect("AT+QIRD=0,0\r", "+QIRD: 0,0,0\r\nOK\r\n")
            .expect("AT+QIRD=0,0\r", "+QIRD: 2,0,2\r\nOK\r\n")
            .expect("AT+QIRD=0,2\r", "+QIRD: 2\r\nhi\r\nOK\r\n");
        let client: TestClient<2, 4096> = client(serial);
        let events = Rc::new(StdRefCell::new(std::vec::Vec::<SocketEvent>::new()));

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        connect(&client, handle);
        let log = events.clone();
        client
            .set_callback(handle, Box::new(move |_, ev| log.borrow_mut().push(ev)))
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(
            client.socket_recv(handle, &mut buf),
            Err(nb::Error::WouldBlock)
        );
        client.spin();
        assert_eq!(events.borrow().as_slice(), &[SocketEvent::RxDataAvailable]);

        assert_eq!(client.socket_recv(handle, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"hi");
        // No further events after the drain.
        client.spin();
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn startup_and_attach_flow() {
        let serial = MockSerial::new()
            .expect("AT\r", "OK\r\n")
            .expect("ATE0\r", "OK\r\n")
            .expect("AT+COPS?\r", "+COPS: 0,0,\"TELE2\",8\r\nOK\r\n")
            .expect("AT+QICSGP=1\r", "+QICSGP: 1,\"internet\"\r\nOK\r\n")
            .expect("AT+QIACT=1\r", "OK\r\n");
        let client: TestClient<2, 4096> = client(serial);

        client.startup().unwrap();
        client.attach().unwrap();
        assert!(client.is_attached());
        assert!(client.channel.borrow().serial_ref().script_done());
    }

    #[test]
    fn attach_reprograms_apn_when_stored_one_differs() {
        let serial = MockSerial::new()
            .expect("AT\r", "OK\r\n")
            .expect("ATE0\r", "OK\r\n")
            .expect("AT+COPS?\r", "+COPS: 0\r\nOK\r\n")
            .expect("AT+QICSGP=1\r", "+QICSGP: 1,\"other\"\r\nOK\r\n")
            .expect(
                "AT+QICSGP=1,1,\"internet\",\"\",\"\",0\r",
                "OK\r\n",
            )
            .expect("AT+QIACT=1\r", "OK\r\n");
        let client: TestClient<2, 4096> = client(serial);

        client.startup().unwrap();
        client.attach().unwrap();
        assert!(client.channel.borrow().serial_ref().script_done());
    }

    #[test]
    fn resolve_takes_first_address_and_drains_the_rest() {
        let serial = MockSerial::new().expect(
            "AT+QIDNSGIP=1,\"example.com\"\r",
            "OK\r\n+QIURC: \"dnsgip\",0,2,600\r\n\
             +QIURC: \"dnsgip\",\"93.184.216.34\"\r\n\
             +QIURC: \"dnsgip\",\"93.184.216.35\"\r\n",
        );
        let client: TestClient<2, 4096> = client(serial);

        let ip = client.resolve("example.com").unwrap();
        assert_eq!(ip, "93.184.216.34".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn connect_retries_three_times_then_reports_device_error() {
        let mut serial = MockSerial::new();
        for _ in 0..3 {
            serial = serial
                .expect(
                    "AT+QIOPEN=1,0,\"TCP\",\"1.2.3.4\",7,0,0\r",
                    "OK\r\n+QIOPEN: 0,566\r\n",
                )
                .expect("AT+QICLOSE=0,1\r", "OK\r\n");
        }
        let client: TestClient<2, 4096> = client(serial);

        let handle = client.socket_open(Protocol::Tcp).unwrap();
        assert_eq!(
            client.socket_connect(handle, "1.2.3.4:7".parse().unwrap()),
            Err(Error::Device(566))
        );
        assert!(client.channel.borrow().serial_ref().script_done());
    }
}
