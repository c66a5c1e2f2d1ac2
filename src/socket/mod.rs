mod set;

pub use set::{Handle as SocketHandle, Set as SocketSet};

use embedded_nal::SocketAddr;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::client::INGRESS_CHUNK_SIZE;

/// The error type for the socket table.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// All socket slots are occupied; close a socket and retry.
    SocketSetFull,
    /// The handle does not refer to an allocated slot.
    InvalidSocket,
    /// The operation is not permitted in the socket's current state.
    Illegal,
}

type Result<T> = core::result::Result<T, Error>;

/// Transport protocol of a socket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Completion events delivered to a socket callback by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketEvent {
    /// The connect exchange for this socket completed.
    Connected,
    /// A pending `send` ran to completion; the final count can be drained.
    TxComplete,
    /// A pending `recv` has data (possibly zero bytes on a timed-out read).
    RxDataAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TxState {
    Idle,
    Starting,
    Active,
    CallbackPending,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum RxState {
    Start,
    Init,
    Active,
    CallbackPending,
    DataAvailable,
}

/// Per-socket transmit record. The caller's bytes are copied in when a send
/// starts and drained out chunk by chunk; the record owns its buffer for the
/// whole transfer.
pub(crate) struct TxRecord<const L: usize> {
    pub state: TxState,
    pub buf: Vec<u8, L>,
    /// Bytes accepted by the module so far.
    pub sent: usize,
}

impl<const L: usize> TxRecord<L> {
    pub const fn new() -> Self {
        TxRecord {
            state: TxState::Idle,
            buf: Vec::new(),
            sent: 0,
        }
    }

    /// Arm the record for a fresh transfer. `data` must already be capped
    /// to the buffer capacity.
    pub fn start(&mut self, data: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(data).ok();
        self.sent = 0;
        self.state = TxState::Starting;
    }

    pub fn is_done(&self) -> bool {
        self.sent >= self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.sent = 0;
        self.state = TxState::Idle;
    }
}

/// Per-socket receive record. One read request at a time; data lands in the
/// owned buffer and is drained on `DataAvailable`.
pub(crate) struct RxRecord<const L: usize> {
    pub state: RxState,
    pub buf: Vec<u8, L>,
    /// Caller request, capped at the ingress chunk size and buffer capacity.
    pub requested: usize,
    /// Scheduler ticks spent polling for this request.
    pub polls: u32,
    pub disable_timeout: bool,
}

impl<const L: usize> RxRecord<L> {
    pub const fn new() -> Self {
        RxRecord {
            state: RxState::Start,
            buf: Vec::new(),
            requested: 0,
            polls: 0,
            disable_timeout: false,
        }
    }

    pub fn init(&mut self, requested: usize, disable_timeout: bool) {
        self.buf.clear();
        self.requested = requested.min(INGRESS_CHUNK_SIZE).min(L);
        self.polls = 0;
        self.disable_timeout = disable_timeout;
        self.state = RxState::Init;
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.requested = 0;
        self.polls = 0;
        self.disable_timeout = false;
        self.state = RxState::Start;
    }
}

/// One slot of the socket table: module-side identity plus the TX/RX state
/// machines driving it.
pub(crate) struct SocketEntry<C, const L: usize> {
    pub handle: SocketHandle,
    pub protocol: Protocol,
    pub connected: bool,
    pub endpoint: Option<SocketAddr>,
    /// Listening sockets poll for inbound data with the read timeout
    /// disabled. Set only through `socket_listen`.
    pub listening: bool,
    pub callback: Option<C>,
    pub tx: TxRecord<L>,
    pub rx: RxRecord<L>,
}

impl<C, const L: usize> SocketEntry<C, L> {
    pub fn new(handle: SocketHandle, protocol: Protocol) -> Self {
        SocketEntry {
            handle,
            protocol,
            connected: false,
            endpoint: None,
            listening: false,
            callback: None,
            tx: TxRecord::new(),
            rx: RxRecord::new(),
        }
    }
}
