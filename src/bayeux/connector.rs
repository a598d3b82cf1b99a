//! Session ownership: creation, lookup, use counting and idle reaping.
//!
//! The [`Connector`] is the arena for all live sessions, keyed by session
//! id. Handles are `Arc<Session>` borrowed for the duration of one request;
//! the use count inside the arena entry only exists to decide idle-reap
//! eligibility. A session whose use count drops to zero gets an idle timer;
//! any re-acquisition bumps the entry's generation, which invalidates the
//! timer. Explicit drops (`/meta/disconnect`) are deferred until the last
//! handle is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::Configuration;
use crate::pubsub::root::Root;

use super::session::Session;

/// Produces session ids from a network connection name.
///
/// Ids are opaque to clients but must be unique per connector; the
/// connector retries on collision.
pub trait SessionIdGenerator: Send {
    /// Generate the next id for a client connecting as `connection_name`
    /// (typically `<peer-address>:<port>`).
    fn generate(&mut self, connection_name: &str) -> String;
}

/// Deterministic generator: `<connection>/<counter>`.
///
/// Predictable ids have no place in production; tests use this to get
/// stable session ids.
#[derive(Default)]
pub struct CountingIdGenerator {
    next: u64,
}

impl CountingIdGenerator {
    /// Create a generator counting from zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionIdGenerator for CountingIdGenerator {
    fn generate(&mut self, connection_name: &str) -> String {
        let id = format!("{}/{}", connection_name, self.next);
        self.next += 1;
        id
    }
}

/// Default generator: `<connection>/<n>` where `n` mixes a random salt into
/// a monotonic counter, so ids from one server run cannot be replayed
/// against another.
pub struct SecureIdGenerator {
    next: u64,
    salt: u64,
}

impl SecureIdGenerator {
    /// Create a generator with a fresh random salt.
    #[must_use]
    pub fn new() -> Self {
        SecureIdGenerator {
            next: 0,
            salt: rand::random(),
        }
    }
}

impl Default for SecureIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdGenerator for SecureIdGenerator {
    fn generate(&mut self, connection_name: &str) -> String {
        let id = format!(
            "{}/{:x}",
            connection_name,
            self.next.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ self.salt
        );
        self.next += 1;
        id
    }
}

struct SessionEntry {
    session: Arc<Session>,
    use_count: u32,
    /// Explicit drop requested while handles were still outstanding.
    remove: bool,
    /// Bumped on every acquisition; a timer with a stale generation is dead.
    generation: u64,
}

/// Owner of all sessions of one Bayeux endpoint.
pub struct Connector {
    root: Arc<Root>,
    config: Arc<Configuration>,
    generator: Mutex<Box<dyn SessionIdGenerator>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Connector {
    /// Create a connector over a pub/sub registry with the default secure
    /// id generator.
    #[must_use]
    pub fn new(root: Arc<Root>, config: Configuration) -> Arc<Self> {
        Self::with_generator(root, config, Box::new(SecureIdGenerator::new()))
    }

    /// Create a connector with an explicit id generator.
    #[must_use]
    pub fn with_generator(
        root: Arc<Root>,
        config: Configuration,
        generator: Box<dyn SessionIdGenerator>,
    ) -> Arc<Self> {
        Arc::new(Connector {
            root,
            config: Arc::new(config),
            generator: Mutex::new(generator),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// The pub/sub registry backing this connector's sessions.
    #[must_use]
    pub fn root(&self) -> &Arc<Root> {
        &self.root
    }

    /// The connector's configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Look a session up and acquire a handle on it.
    ///
    /// Acquisition cancels any pending idle timer. Every successful call
    /// must be paired with one [`Connector::idle_session`].
    #[must_use]
    pub fn find_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(session_id)?;
        entry.use_count += 1;
        entry.generation += 1;
        Some(entry.session.clone())
    }

    /// Create a session for a network connection and acquire a handle on
    /// it (the new entry starts with a use count of one).
    #[must_use]
    pub fn create_session(self: &Arc<Self>, connection_name: &str) -> Arc<Session> {
        let mut generator = self.generator.lock();
        let mut sessions = self.sessions.lock();

        let mut session_id = generator.generate(connection_name);
        while sessions.contains_key(&session_id) {
            session_id = generator.generate(connection_name);
        }

        let session = Session::new(session_id.clone(), self.root.clone(), self.config.clone());
        sessions.insert(
            session_id.clone(),
            SessionEntry {
                session: session.clone(),
                use_count: 1,
                remove: false,
                generation: 0,
            },
        );

        info!(session_id = %session_id, "session created");
        session
    }

    /// Release a handle acquired through [`Connector::find_session`] or
    /// [`Connector::create_session`].
    ///
    /// When the last handle goes, a deferred drop is executed immediately;
    /// otherwise the idle timer starts.
    pub fn idle_session(self: &Arc<Self>, session: &Arc<Session>) {
        let session_id = session.session_id();
        let mut sessions = self.sessions.lock();

        let Some(entry) = sessions.get_mut(session_id) else {
            return;
        };
        debug_assert!(entry.use_count > 0);
        entry.use_count = entry.use_count.saturating_sub(1);
        if entry.use_count > 0 {
            return;
        }

        if entry.remove {
            let entry = sessions.remove(session_id);
            drop(sessions);
            if let Some(entry) = entry {
                info!(session_id = %session_id, "session dropped");
                entry.session.close();
            }
            return;
        }

        let generation = entry.generation;
        let session_id = session_id.to_string();
        let connector = self.clone();
        let timeout = self.config.get_session_timeout();
        drop(sessions);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            connector.session_timeout_reached(&session_id, generation);
        });
    }

    /// Request removal of a session, as `/meta/disconnect` does.
    ///
    /// The session is removed right away if nothing holds a handle on it;
    /// otherwise removal happens when the last handle is released.
    pub fn drop_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(session_id) else {
            return;
        };

        if entry.use_count == 0 {
            let entry = sessions.remove(session_id);
            drop(sessions);
            if let Some(entry) = entry {
                info!(session_id = %session_id, "session dropped");
                entry.session.close();
            }
        } else {
            entry.remove = true;
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session_timeout_reached(&self, session_id: &str, generation: u64) {
        let mut sessions = self.sessions.lock();

        let Some(entry) = sessions.get(session_id) else {
            return;
        };
        if entry.use_count != 0 || entry.generation != generation {
            // Re-acquired since the timer was armed; the timer is stale.
            return;
        }

        let entry = sessions.remove(session_id);
        drop(sessions);
        if let Some(entry) = entry {
            debug!(session_id = %session_id, "session timed out");
            entry.session.close();
        }
    }
}
