//! Process-wide deduplicating registry of security sessions.
//!
//! The registry maps a session id to a weak reference on the live
//! [`SessionEntry`]. Handles own the entries; the registry only finds them
//! again. Expired weak references are swept lazily on every acquisition.
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::session::{
    is_valid_session_id, FingerprintHash, ReleaseCallback, SessionEntry, SessionHandle, SessionId,
};

/// Registry of live session entries keyed by session id.
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, Weak<SessionEntry>>>,
    on_release: ReleaseCallback,
}

impl SessionRegistry {
    /// Create a registry whose entries call `on_release` when their last
    /// handle is dropped.
    pub fn new(on_release: ReleaseCallback) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            on_release,
        }
    }

    /// Return a handle on the entry for `session_id`, creating it if needed.
    ///
    /// An existing live entry is reused; when its stored fingerprint differs
    /// from `fingerprint` the stored value is replaced. Ids `<= 0` yield an
    /// invalid handle and never create an entry.
    pub fn acquire(&self, session_id: SessionId, fingerprint: FingerprintHash) -> SessionHandle {
        if !is_valid_session_id(session_id) {
            warn!("Refusing to track invalid session id {}", session_id);
            return SessionHandle::invalid();
        }

        let mut entries = self.entries.lock();
        entries.retain(|_, weak| weak.strong_count() > 0);

        if let Some(weak) = entries.get(&session_id) {
            match weak.upgrade() {
                Some(entry) => {
                    if entry.fingerprint() != fingerprint {
                        let previous = entry.set_fingerprint(fingerprint);
                        info!(
                            "Session {} inputs changed (fingerprint {:#x} -> {:#x})",
                            session_id,
                            previous,
                            fingerprint
                        );
                    }
                    return SessionHandle::from_entry(entry);
                }
                None => {
                    warn!(
                        "Session {} was released while being reused, creating a new entry",
                        session_id
                    );
                }
            }
        }

        let entry = Arc::new(SessionEntry::new(
            session_id,
            fingerprint,
            self.on_release.clone(),
        ));
        entries.insert(session_id, Arc::downgrade(&entry));
        debug!("Tracking new session {}", session_id);
        SessionHandle::from_entry(entry)
    }

    /// Returns true if a live entry exists for `session_id`.
    #[must_use]
    pub fn contains(&self, session_id: SessionId) -> bool {
        self.entries
            .lock()
            .get(&session_id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Map slots, expired or not.
    #[cfg(test)]
    fn slots(&self) -> usize {
        self.entries.lock().len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("live", &self.len())
            .finish()
    }
}
