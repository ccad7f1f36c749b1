use crate::config::SimbusConfig;
use crate::error::{Error, Result, ReturnCode};
use crate::participant::Participant;
use crate::sync::lock;
use crate::transport::{Connection, Transport, TransportVersion};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, warn};

pub const PARTICIPANT_NAME_PREFIX: &str = "Participant_";

#[derive(Debug, Default)]
struct NameRegistry {
    names: HashSet<String>,
    counter: u64,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    config: SimbusConfig,
    names: Mutex<NameRegistry>,
}

/// Scope for participant names. Two sessions never see each other's names.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: SimbusConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                config,
                names: Mutex::new(NameRegistry::default()),
            }),
        }
    }

    pub fn config(&self) -> &SimbusConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn version(&self) -> TransportVersion {
        self.inner.transport.version()
    }

    /// Registers a participant and connects it to the registry.
    ///
    /// Without a name, `Participant_{n}` is chosen from a per-session counter.
    pub fn create_participant(&self, name: Option<&str>) -> Result<Participant> {
        let name = self.reserve(name)?;
        match self.connect(&name) {
            Ok(connection) => Ok(Participant::new(name, self.clone(), connection)),
            Err(e) => {
                self.release(&name);
                Err(e)
            }
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.inner.names).names.contains(name)
    }

    pub fn participant_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.names).names.iter().cloned().collect();
        names.sort();
        names
    }

    fn reserve(&self, name: Option<&str>) -> Result<String> {
        let mut registry = lock(&self.inner.names);
        let name = match name {
            Some(name) => name.to_string(),
            None => loop {
                registry.counter += 1;
                let candidate = format!("{PARTICIPANT_NAME_PREFIX}{}", registry.counter);
                if !registry.names.contains(&candidate) {
                    break candidate;
                }
            },
        };
        if !registry.names.insert(name.clone()) {
            return Err(Error::DuplicateName(name));
        }
        Ok(name)
    }

    pub(crate) fn release(&self, name: &str) {
        lock(&self.inner.names).names.remove(name);
    }

    fn connect(&self, name: &str) -> Result<Arc<dyn Connection>> {
        let config = &self.inner.config;
        let attempts = config.participant.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.transport.connect(&config.registry_uri, name) {
                Ok(connection) => {
                    debug!(participant = name, uri = %config.registry_uri, attempt, "connected to registry");
                    return Ok(connection);
                }
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    warn!(participant = name, attempt, error = %e, "registry connection failed, retrying");
                    thread::sleep(config.participant.connect_backoff());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// Rejections such as a name clash are final; only an unreachable registry is retried.
fn is_retryable(error: &Error) -> bool {
    matches!(
        error.return_code(),
        Some(ReturnCode::UnspecifiedError | ReturnCode::Timeout)
    )
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("registry_uri", &self.inner.config.registry_uri)
            .field("participants", &self.participant_names())
            .finish()
    }
}
