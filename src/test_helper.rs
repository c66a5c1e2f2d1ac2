//! Deterministic test doubles: a scripted serial link that stands in for
//! the module, and a manually stepped clock. Tests drive the scheduler in
//! ticks; nothing sleeps on wall-clock time.

use std::cell::Cell;
use std::collections::VecDeque;

use embedded_hal_nb::serial::{Error as SerialError, ErrorKind, ErrorType, Read, Write};
use embedded_time::clock::Error as ClockError;
use embedded_time::fraction::Fraction;
use embedded_time::{Clock, Instant};

#[derive(Debug)]
pub enum MockError {}

impl SerialError for MockError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

enum Expect {
    /// These exact bytes, no more, no less.
    Exact(Vec<u8>),
    /// A `\r`-terminated command starting with this prefix.
    Prefix(Vec<u8>),
}

struct ScriptStep {
    expect: Expect,
    reply: Vec<u8>,
}

/// Scripted serial link. Every expected write must arrive in script order
/// and byte-exact; a write that diverges from the current expectation
/// panics the test. Matching a step queues its canned reply for reading.
/// This makes exchange serialization and ordering violations loud.
pub struct MockSerial {
    script: VecDeque<ScriptStep>,
    rx: VecDeque<u8>,
    pending: Vec<u8>,
}

impl Default for MockSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSerial {
    pub fn new() -> Self {
        MockSerial {
            script: VecDeque::new(),
            rx: VecDeque::new(),
            pending: Vec::new(),
        }
    }

    /// Expect this exact command next; queue `reply` once it arrived.
    pub fn expect(mut self, cmd: &str, reply: &str) -> Self {
        self.script.push_back(ScriptStep {
            expect: Expect::Exact(cmd.as_bytes().to_vec()),
            reply: reply.as_bytes().to_vec(),
        });
        self
    }

    /// Expect these exact raw bytes next (payload phases).
    pub fn expect_raw(mut self, bytes: &[u8], reply: &str) -> Self {
        self.script.push_back(ScriptStep {
            expect: Expect::Exact(bytes.to_vec()),
            reply: reply.as_bytes().to_vec(),
        });
        self
    }

    /// Expect a `\r`-terminated command starting with `prefix`.
    pub fn expect_prefix(mut self, prefix: &str, reply: &str) -> Self {
        self.script.push_back(ScriptStep {
            expect: Expect::Prefix(prefix.as_bytes().to_vec()),
            reply: reply.as_bytes().to_vec(),
        });
        self
    }

    /// Pre-load unsolicited input, as if left over from earlier traffic.
    pub fn residual(mut self, bytes: &str) -> Self {
        self.rx.extend(bytes.as_bytes());
        self
    }

    /// True once every scripted step has been consumed.
    pub fn script_done(&self) -> bool {
        self.script.is_empty() && self.pending.is_empty()
    }

    fn try_match(&mut self) {
        let step = match self.script.front() {
            Some(step) => step,
            None => panic!(
                "unexpected write on the mock link: {:?}",
                String::from_utf8_lossy(&self.pending)
            ),
        };
        let matched = match &step.expect {
            Expect::Exact(bytes) => {
                if bytes.as_slice() == self.pending.as_slice() {
                    true
                } else if bytes.starts_with(&self.pending) {
                    false
                } else {
                    panic!(
                        "mock link expected {:?}, got {:?}",
                        String::from_utf8_lossy(bytes),
                        String::from_utf8_lossy(&self.pending)
                    );
                }
            }
            Expect::Prefix(prefix) => {
                if self.pending.last() != Some(&b'\r') {
                    false
                } else if self.pending.starts_with(prefix) {
                    true
                } else {
                    panic!(
                        "mock link expected prefix {:?}, got {:?}",
                        String::from_utf8_lossy(prefix),
                        String::from_utf8_lossy(&self.pending)
                    );
                }
            }
        };
        if matched {
            let step = self.script.pop_front().unwrap();
            self.rx.extend(&step.reply);
            self.pending.clear();
        }
    }
}

impl ErrorType for MockSerial {
    type Error = MockError;
}

impl Read<u8> for MockSerial {
    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for MockSerial {
    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.pending.push(word);
        self.try_match();
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// Clock advancing a fixed number of milliseconds per observation, so
/// timeout behavior is a pure function of poll counts.
pub struct MockClock {
    now_ms: Cell<u64>,
    step_ms: u64,
    polls: Cell<u64>,
}

impl MockClock {
    pub fn new(step_ms: u64) -> Self {
        MockClock {
            now_ms: Cell::new(0),
            step_ms,
            polls: Cell::new(0),
        }
    }

    /// Number of times the clock has been observed.
    pub fn polls(&self) -> u64 {
        self.polls.get()
    }
}

impl Clock for MockClock {
    type T = u64;

    const SCALING_FACTOR: Fraction = Fraction::new(1, 1000);

    fn try_now(&self) -> Result<Instant<Self>, ClockError> {
        self.polls.set(self.polls.get() + 1);
        let now = self.now_ms.get();
        self.now_ms.set(now + self.step_ms);
        Ok(Instant::new(now))
    }
}
