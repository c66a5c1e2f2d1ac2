use crate::socket;

/// The error type for all driver operations.
///
/// Nothing here is fatal to the engine; every variant is reported to the
/// caller of the failing operation and the driver keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The exchange deadline elapsed before the response matched.
    /// Recoverable; retry with a fresh exchange.
    Timeout,
    /// The response did not match the expected template. Recoverable, but
    /// logged, since it can indicate firmware desync.
    InvalidResponse,
    /// The module reported an explicit failure code for this command,
    /// e.g. `+CME ERROR: <n>`. A bare `ERROR` final result is reported
    /// as code `-1`.
    Device(i32),
    /// A command or capture exceeded an internal buffer.
    Overflow,
    /// Read or write on the physical link failed.
    Serial,
    /// The engine or command channel lock is held; try again.
    Busy,
    /// The system clock failed or went backwards.
    Clock,
    /// The driver has not completed `startup()`.
    Uninitialized,
    /// The requested operation is not supported by the module.
    Unimplemented,
    /// A formatted value did not fit its destination.
    BadLength,
    Socket(socket::Error),
}

impl From<socket::Error> for Error {
    fn from(e: socket::Error) -> Self {
        Error::Socket(e)
    }
}

impl From<core::cell::BorrowMutError> for Error {
    fn from(_: core::cell::BorrowMutError) -> Self {
        Error::Busy
    }
}

impl From<core::cell::BorrowError> for Error {
    fn from(_: core::cell::BorrowError) -> Self {
        Error::Busy
    }
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Error::Overflow
    }
}

impl From<embedded_time::clock::Error> for Error {
    fn from(_: embedded_time::clock::Error) -> Self {
        Error::Clock
    }
}
