//! The shared map of live sessions.
//!
//! Every mutation goes through one `RwLock`, so `register`, `lookup` and
//! `remove` are linearizable against each other.  Initialization reserves
//! a fresh id first (under the write lock) and only publishes the transport
//! once it is ready for traffic; a reserved slot is invisible to `lookup`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::session_id::SessionId;
use crate::transport::{OpenTransports, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("session already registered: {0}")]
    AlreadyExists(SessionId),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session registry is closed")]
    Closed,
}

enum Slot {
    /// Id handed out, transport not yet published.
    Reserved,
    Live(Arc<Transport>),
}

#[derive(Default)]
struct Inner {
    slots: HashMap<SessionId, Slot>,
    /// Set once shutdown begins; no further reservations or registrations.
    sealed: bool,
}

#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    open: OpenTransports,
}

impl SessionRegistry {
    pub fn new(open: OpenTransports) -> Self {
        Self {
            inner: RwLock::default(),
            open,
        }
    }

    /// Reserve a fresh, unused session id.
    pub fn reserve(self: &Arc<Self>) -> Result<Reservation, RegistryError> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Err(RegistryError::Closed);
        }
        let id = loop {
            let candidate = SessionId::generate();
            if !inner.slots.contains_key(&candidate) {
                break candidate;
            }
            tracing::warn!(session_id = %candidate, "generated session id collided, retrying");
        };
        inner.slots.insert(id.clone(), Slot::Reserved);
        drop(inner);

        tracing::debug!(session_id = %id, "session id reserved");
        Ok(Reservation {
            registry: Arc::clone(self),
            id,
            committed: false,
        })
    }

    /// Publish `transport` under `id`.  Fills a vacant or reserved slot;
    /// fails if a live transport is already registered there.
    pub fn register(&self, id: SessionId, transport: Arc<Transport>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Err(RegistryError::Closed);
        }
        if let Some(Slot::Live(_)) = inner.slots.get(&id) {
            return Err(RegistryError::AlreadyExists(id));
        }
        inner.slots.insert(id.clone(), Slot::Live(transport));
        drop(inner);

        tracing::info!(session_id = %id, "session registered");
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<Transport>, RegistryError> {
        match self.inner.read().slots.get(id) {
            Some(Slot::Live(transport)) => Ok(Arc::clone(transport)),
            _ => Err(RegistryError::NotFound(id.to_owned())),
        }
    }

    /// Unpublish a live session.  Reserved slots are left alone.
    pub fn remove(&self, id: &str) -> Result<Arc<Transport>, RegistryError> {
        let mut inner = self.inner.write();
        match inner.slots.get(id) {
            Some(Slot::Live(_)) => {}
            _ => return Err(RegistryError::NotFound(id.to_owned())),
        }
        match inner.slots.remove(id) {
            Some(Slot::Live(transport)) => {
                tracing::debug!(session_id = %id, "session removed");
                Ok(transport)
            }
            _ => Err(RegistryError::NotFound(id.to_owned())),
        }
    }

    /// Remove a session and close its transport (explicit termination).
    pub async fn terminate(&self, id: &str) -> Result<(), RegistryError> {
        let transport = self.remove(id)?;
        match transport.close().await {
            Ok(()) => tracing::info!(session_id = %id, "session terminated"),
            // Someone else is already closing it; the entry is gone either way.
            Err(TransportError::Closed) => {
                tracing::debug!(session_id = %id, "session was already closing")
            }
            Err(e) => tracing::warn!(session_id = %id, error = %e, "session close failed"),
        }
        Ok(())
    }

    /// Number of live (published) sessions.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .slots
            .values()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.inner
            .read()
            .slots
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Live(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Age in whole seconds of the longest-lived published session.
    pub fn oldest_session_secs(&self) -> Option<i64> {
        let now = Utc::now();
        self.inner
            .read()
            .slots
            .values()
            .filter_map(|s| match s {
                Slot::Live(t) => Some(t.created_at()),
                Slot::Reserved => None,
            })
            .min()
            .map(|created| (now - created).num_seconds().max(0))
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    /// Seal the registry and take every live session out of it.
    pub fn drain(&self) -> Vec<(SessionId, Arc<Transport>)> {
        let mut inner = self.inner.write();
        inner.sealed = true;
        inner
            .slots
            .drain()
            .filter_map(|(id, slot)| match slot {
                Slot::Live(transport) => Some((id, transport)),
                Slot::Reserved => None,
            })
            .collect()
    }

    /// Transports (registered or not) that have not reached `Closed`.
    pub fn open_transports(&self) -> &OpenTransports {
        &self.open
    }

    fn release(&self, id: &SessionId) {
        let mut inner = self.inner.write();
        if let Some(Slot::Reserved) = inner.slots.get(id) {
            inner.slots.remove(id);
            tracing::debug!(session_id = %id, "session reservation released");
        }
    }
}

/// A reserved session id.  Dropping it without [`commit`](Self::commit)
/// releases the slot.
pub struct Reservation {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    committed: bool,
}

impl Reservation {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Publish the transport under the reserved id.
    pub fn commit(mut self, transport: Arc<Transport>) -> Result<SessionId, RegistryError> {
        self.registry.register(self.id.clone(), transport)?;
        self.committed = true;
        Ok(self.id.clone())
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.id);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation").field("id", &self.id).finish()
    }
}
