use heapless::String;

use crate::command::psn::ContextId;

/// Default deadline for a pending read before it completes with zero bytes.
pub const DEFAULT_READ_TIMEOUT_MS: u32 = 30_000;

/// Driver configuration, injected at construction.
///
/// The AT trace flag replaces the original driver's global debug level; it is
/// owned by the command channel and consulted explicitly on every exchange.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) apn: String<64>,
    pub(crate) username: String<32>,
    pub(crate) password: String<32>,
    pub(crate) context_id: ContextId,
    pub(crate) read_timeout_ms: u32,
    pub(crate) at_trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            apn: String::new(),
            username: String::new(),
            password: String::new(),
            context_id: ContextId(1),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            at_trace: false,
        }
    }

    /// APN used by `attach()`. At most 64 bytes; longer names are ignored.
    pub fn with_apn(mut self, apn: &str) -> Self {
        self.apn.clear();
        self.apn.push_str(apn).ok();
        self
    }

    /// Credentials used by `attach()`. At most 32 bytes each.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username.clear();
        self.username.push_str(username).ok();
        self.password.clear();
        self.password.push_str(password).ok();
        self
    }

    /// PDP context used for all data operations. Valid range 1..=16.
    pub fn with_context(mut self, context_id: ContextId) -> Self {
        self.context_id = context_id;
        self
    }

    /// Per-socket read deadline, counted in scheduler ticks.
    pub fn with_read_timeout(mut self, timeout_ms: u32) -> Self {
        self.read_timeout_ms = timeout_ms;
        self
    }

    /// Log every AT line sent and received at debug level.
    pub fn with_at_trace(mut self, enabled: bool) -> Self {
        self.at_trace = enabled;
        self
    }
}
