//! License acquisition inputs and results.
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use uuid::Uuid;

use crate::session::{FingerprintHash, SessionHandle};
use crate::status::{ResultContext, SUCCESS};

/// Inputs of one license acquisition.
///
/// The three buffers are opaque to this crate and forwarded as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionRequest {
    /// Trace context propagated to the security service.
    pub trace_context: String,
    /// Key system identifier (e.g. `com.widevine.alpha`).
    pub key_system: String,
    /// Declared media usage (e.g. `stream`).
    pub media_usage: String,
    pub access_token: Vec<u8>,
    pub content_metadata: Vec<u8>,
    /// License challenge produced by the DRM client.
    pub license_challenge: Vec<u8>,
    /// Video is muted; the session then opens inactive.
    pub video_muted: bool,
    /// Backoff between attempts; the manager's configured delay when unset.
    pub retry_delay: Option<Duration>,
}

impl AcquisitionRequest {
    /// Create a request with a freshly generated trace context.
    pub fn new(
        key_system: impl Into<String>,
        access_token: impl Into<Vec<u8>>,
        content_metadata: impl Into<Vec<u8>>,
        license_challenge: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            trace_context: new_trace_context(),
            key_system: key_system.into(),
            media_usage: "stream".to_string(),
            access_token: access_token.into(),
            content_metadata: content_metadata.into(),
            license_challenge: license_challenge.into(),
            video_muted: false,
            retry_delay: None,
        }
    }

    /// Hash over every input that affects the remote session.
    ///
    /// Equal fingerprints for the same session mean the session can be
    /// reused without another open/update call. The hash is only stable
    /// within one process.
    #[must_use]
    pub fn fingerprint(&self) -> FingerprintHash {
        let mut hasher = DefaultHasher::new();
        self.trace_context.hash(&mut hasher);
        self.key_system.hash(&mut hasher);
        self.media_usage.hash(&mut hasher);
        self.access_token.hash(&mut hasher);
        self.content_metadata.hash(&mut hasher);
        self.license_challenge.hash(&mut hasher);
        self.video_muted.hash(&mut hasher);
        hasher.finish()
    }

    /// Name of the first required buffer that is empty.
    #[must_use]
    pub fn missing_input(&self) -> Option<&'static str> {
        if self.access_token.is_empty() {
            Some("access token")
        } else if self.content_metadata.is_empty() {
            Some("content metadata")
        } else if self.license_challenge.is_empty() {
            Some("license challenge")
        } else {
            None
        }
    }
}

/// Generate a random trace context.
#[must_use]
pub fn new_trace_context() -> String {
    Uuid::new_v4().to_string()
}

/// Result of [`SecManager::acquire`](crate::manager::SecManager::acquire).
#[derive(Debug, Clone, Default)]
pub struct AcquisitionOutcome {
    pub success: bool,
    pub status_code: i32,
    pub reason_code: i32,
    pub business_status: i32,
    /// Decoded license; empty when the existing session was reused.
    pub payload: Vec<u8>,
    pub handle: SessionHandle,
}

impl AcquisitionOutcome {
    pub(crate) fn reused(handle: SessionHandle) -> Self {
        Self {
            success: true,
            status_code: SUCCESS,
            reason_code: SUCCESS,
            business_status: 0,
            payload: Vec::new(),
            handle,
        }
    }

    pub(crate) fn failed(context: ResultContext, handle: SessionHandle) -> Self {
        Self {
            success: false,
            status_code: context.status_code,
            reason_code: context.reason_code,
            business_status: context.business_status,
            payload: Vec::new(),
            handle,
        }
    }

    /// Codes of this outcome as a result context.
    #[must_use]
    pub fn context(&self) -> ResultContext {
        ResultContext {
            status_code: self.status_code,
            reason_code: self.reason_code,
            business_status: self.business_status,
        }
    }
}
