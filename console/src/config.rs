//! Tunables for console sessions and the registry that owns them

use clap::ValueEnum;
use std::fmt;
use std::time::Duration;

/// Time allowed for TCP connect plus the login handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Time allowed for one command to be fully answered
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Records kept per instance in the command history
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
/// RCON port the game server tools configure out of the box
pub const DEFAULT_RCON_PORT: u16 = 32330;
pub const DEFAULT_HOST: &str = "localhost";

/// What happens when a command arrives while another is in flight on the same session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BusyPolicy {
    /// Fail immediately with `SessionBusy`; the caller may retry
    #[default]
    Reject,
    /// Wait for the in-flight command to finish
    Queue,
}

/// How the end of a possibly fragmented response is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Completion {
    /// Follow every command with an empty command and stop when its echo arrives
    #[default]
    TrailingProbe,
    /// Stop at the first packet that does not fill a whole fragment.
    ///
    /// A response whose last fragment happens to be exactly 4096 bytes looks
    /// unfinished, so the command runs into its timeout and the session is
    /// left broken.
    FinalFragment,
}

/// Settings shared by every session a registry opens
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub history_capacity: usize,
    pub busy_policy: BusyPolicy,
    pub completion: Completion,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            busy_policy: BusyPolicy::default(),
            completion: Completion::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }
}

/// Console admin password. Never printed, not even by `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for putting on the wire
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self(secret.to_string())
    }
}
