//! Configuration for the Bayeux session layer.
//!
//! # Configuration Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `session_timeout` | 30 s | Idle duration after which an unused session is reaped |
//! | `long_polling_timeout` | 30 s | Maximum time a `/meta/connect` stays parked |
//! | `max_messages_per_client` | 100 | Event-queue count cap (oldest-drop) |
//! | `max_messages_size_per_client` | 64 KiB | Event-queue byte cap (oldest-drop) |
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use bayeux_rs::Configuration;
//!
//! let config = Configuration::new()
//!     .long_polling_timeout(Duration::from_secs(100))
//!     .max_messages_per_client(2);
//! ```

use std::time::Duration;

/// Configuration of session lifetime, long-poll timing and queue caps.
///
/// Setters consume and return the configuration so options chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    session_timeout: Duration,
    long_polling_timeout: Duration,
    max_messages_per_client: usize,
    max_messages_size_per_client: usize,
}

impl Configuration {
    /// Create a configuration with the documented defaults.
    #[must_use]
    pub fn new() -> Self {
        Configuration {
            session_timeout: Duration::from_secs(30),
            long_polling_timeout: Duration::from_secs(30),
            max_messages_per_client: 100,
            max_messages_size_per_client: 64 * 1024,
        }
    }

    /// Idle duration after which a session with no outstanding handles is
    /// removed.
    #[must_use]
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Maximum duration a `/meta/connect` response stays parked before it is
    /// answered with an empty event array.
    #[must_use]
    pub fn long_polling_timeout(mut self, timeout: Duration) -> Self {
        self.long_polling_timeout = timeout;
        self
    }

    /// Maximum number of queued events per session. On overflow the oldest
    /// events are dropped first.
    #[must_use]
    pub fn max_messages_per_client(mut self, limit: usize) -> Self {
        self.max_messages_per_client = limit;
        self
    }

    /// Maximum total serialized size of queued events per session. Enforced
    /// jointly with the count cap.
    #[must_use]
    pub fn max_messages_size_per_client(mut self, limit: usize) -> Self {
        self.max_messages_size_per_client = limit;
        self
    }

    pub(crate) fn get_session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub(crate) fn get_long_polling_timeout(&self) -> Duration {
        self.long_polling_timeout
    }

    pub(crate) fn get_max_messages_per_client(&self) -> usize {
        self.max_messages_per_client
    }

    pub(crate) fn get_max_messages_size_per_client(&self) -> usize {
        self.max_messages_size_per_client
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}
