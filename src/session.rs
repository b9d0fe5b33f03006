//! Security session entries and the handles callers hold on them.
//!
//! A [`SessionEntry`] is shared by every [`SessionHandle`] cloned from the
//! same acquisition. The registry only keeps a weak reference, so dropping
//! the last handle drops the entry, and the entry's destructor hands the id
//! back to the release callback.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a security session. Values `<= 0` are never real sessions.
pub type SessionId = i64;

/// Hash over the inputs of an acquisition request.
pub type FingerprintHash = u64;

/// Sentinel reported by invalid handles.
pub const INVALID_SESSION_ID: SessionId = -1;

/// Reserved by the security service to mean "every session of this client".
pub const CLOSE_ALL_SESSIONS: SessionId = 0;

/// Invoked once with the id of an entry whose last handle went away.
pub type ReleaseCallback = Arc<dyn Fn(SessionId) + Send + Sync>;

/// Returns true for ids that may name a real session.
#[must_use]
pub fn is_valid_session_id(id: SessionId) -> bool {
    id > CLOSE_ALL_SESSIONS
}

/// Shared state of one open security session.
pub struct SessionEntry {
    id: SessionId,
    fingerprint: AtomicU64,
    on_release: ReleaseCallback,
}

impl SessionEntry {
    pub(crate) fn new(
        id: SessionId,
        fingerprint: FingerprintHash,
        on_release: ReleaseCallback,
    ) -> Self {
        Self {
            id,
            fingerprint: AtomicU64::new(fingerprint),
            on_release,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn fingerprint(&self) -> FingerprintHash {
        self.fingerprint.load(Ordering::Acquire)
    }

    /// Replace the stored fingerprint, returning the previous value.
    pub(crate) fn set_fingerprint(&self, fingerprint: FingerprintHash) -> FingerprintHash {
        self.fingerprint.swap(fingerprint, Ordering::AcqRel)
    }
}

impl fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.id)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl Drop for SessionEntry {
    fn drop(&mut self) {
        if is_valid_session_id(self.id) {
            debug!("Releasing session {}", self.id);
            (self.on_release)(self.id);
        }
    }
}

/// Reference-counted handle to a [`SessionEntry`].
///
/// The default handle is invalid. Clones share the same entry; the entry
/// is released when the last clone is dropped or invalidated.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    entry: Option<Arc<SessionEntry>>,
}

impl SessionHandle {
    pub(crate) fn from_entry(entry: Arc<SessionEntry>) -> Self {
        Self { entry: Some(entry) }
    }

    /// An invalid handle.
    #[must_use]
    pub fn invalid() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.entry.is_some()
    }

    /// Session id, or [`INVALID_SESSION_ID`] when the handle is invalid.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.entry.as_ref().map_or(INVALID_SESSION_ID, |e| e.id())
    }

    /// Stored fingerprint, or 0 when the handle is invalid.
    #[must_use]
    pub fn fingerprint(&self) -> FingerprintHash {
        self.entry.as_ref().map_or(0, |e| e.fingerprint())
    }

    /// Drop this handle's reference; releases the entry if it was the last.
    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Returns true when both handles reference the same entry.
    #[must_use]
    pub fn same_entry(&self, other: &SessionHandle) -> bool {
        match (&self.entry, &other.entry) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Number of handles currently sharing the entry.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.entry.as_ref().map_or(0, Arc::strong_count)
    }
}
