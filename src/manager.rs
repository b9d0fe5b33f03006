//! Session-aware license acquisition against the platform security service.
//!
//! [`SecManager`] decides, for every acquisition, whether the caller's
//! existing session can simply be reactivated or whether the service must
//! open a new session (or update the existing one) and issue a license.
//! Open/update calls are retried a bounded number of times, and only for
//! transient failures.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::request::{AcquisitionOutcome, AcquisitionRequest};
use crate::session::{
    is_valid_session_id, FingerprintHash, SessionHandle, SessionId, INVALID_SESSION_ID,
};
use crate::status::{ResultContext, SUCCESS};
use crate::transport::{
    Transport, METHOD_CLOSE_SESSION, METHOD_OPEN_SESSION, METHOD_SET_PLAYBACK_SPEED,
    METHOD_SET_SESSION_STATE, METHOD_SET_WINDOW_SIZE, METHOD_UPDATE_SESSION,
};
use crate::utils::{decode_license, encode_buffer};

/// Blocking wait used between acquisition attempts.
pub trait Sleep: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// [`Sleep`] backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Serialized access to the transport, shared with the registry's release
/// callback.
struct Calls {
    transport: Arc<dyn Transport>,
    client_id: String,
    timeout: Duration,
    lock: Mutex<()>,
}

impl Calls {
    fn invoke(&self, method: &str, params: &Value) -> Result<Value> {
        let _guard = self.lock.lock();
        debug!("Invoking {}", method);
        self.transport.invoke(method, params, self.timeout)
    }

    /// Invoke a call whose only output is the `success` flag.
    fn invoke_simple(&self, method: &str, params: &Value) -> bool {
        match self.invoke(method, params) {
            Ok(result) if result["success"].as_bool().unwrap_or(false) => true,
            Ok(result) => {
                warn!("{} failed: {}", method, result);
                false
            }
            Err(e) => {
                error!("{} failed: {}", method, e);
                false
            }
        }
    }

    fn close_session(&self, session_id: SessionId) -> bool {
        if !is_valid_session_id(session_id) {
            warn!("Refusing to close invalid session id {}", session_id);
            return false;
        }
        let params = json!({
            "clientId": self.client_id,
            "sessionId": session_id,
        });
        let closed = self.invoke_simple(METHOD_CLOSE_SESSION, &params);
        if closed {
            info!("Closed session {}", session_id);
        }
        closed
    }
}

/// License acquisition orchestrator.
///
/// Construct one per process and share it; sessions it opens are closed
/// automatically when the last [`SessionHandle`] on them is dropped.
pub struct SecManager {
    config: Config,
    calls: Arc<Calls>,
    registry: SessionRegistry,
    sleeper: Arc<dyn Sleep>,
}

impl SecManager {
    pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
        let calls = Arc::new(Calls {
            transport,
            client_id: config.client_id.clone(),
            timeout: config.call_timeout(),
            lock: Mutex::new(()),
        });
        let release = calls.clone();
        let registry = SessionRegistry::new(Arc::new(move |session_id: SessionId| {
            release.close_session(session_id);
        }));

        Self {
            config,
            calls,
            registry,
            sleeper: Arc::new(ThreadSleep),
        }
    }

    /// Replace the wait used between acquisition attempts.
    #[must_use]
    pub fn with_sleep(mut self, sleeper: Arc<dyn Sleep>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Acquire a license for `request`.
    ///
    /// When `handle` is valid and was acquired with the same `fingerprint`,
    /// the session is only reactivated and the outcome carries no payload.
    /// Otherwise a session is opened (invalid handle) or updated (valid
    /// handle) and the decoded license is returned. A valid `handle` is
    /// never replaced by the outcome's handle.
    pub fn acquire(
        &self,
        fingerprint: FingerprintHash,
        handle: &SessionHandle,
        request: &AcquisitionRequest,
    ) -> AcquisitionOutcome {
        if handle.is_valid() && handle.fingerprint() == fingerprint {
            let session_id = handle.session_id();
            if self.update_session_state(session_id, true) {
                info!("Reusing session {} without a license request", session_id);
                return AcquisitionOutcome::reused(handle.clone());
            }
            warn!("Could not reactivate session {}, updating it", session_id);
        }

        self.open_or_update(fingerprint, handle, request)
    }

    fn open_or_update(
        &self,
        fingerprint: FingerprintHash,
        handle: &SessionHandle,
        request: &AcquisitionRequest,
    ) -> AcquisitionOutcome {
        let mut adopted = handle.clone();

        if let Some(missing) = request.missing_input() {
            error!("Cannot acquire license, {} is empty", missing);
            return AcquisitionOutcome::failed(ResultContext::GENERAL, adopted);
        }

        let (method, session_id) = if handle.is_valid() {
            (METHOD_UPDATE_SESSION, Some(handle.session_id()))
        } else {
            (METHOD_OPEN_SESSION, None)
        };
        let params = self.session_params(request, session_id);
        let attempts = self.config.attempts();
        let delay = request
            .retry_delay
            .unwrap_or_else(|| self.config.retry_delay());

        let mut context = ResultContext::GENERAL;
        for attempt in 1..=attempts {
            match self.calls.invoke(method, &params) {
                Ok(result) => match granted_license(&result) {
                    Ok(Some((granted_id, payload))) => {
                        let context = ResultContext::from_result_or(&result, ResultContext::OK);
                        let fresh = self.registry.acquire(granted_id, fingerprint);
                        if !adopted.is_valid() {
                            adopted = fresh;
                        }
                        info!(
                            "{} granted session {} on attempt {}",
                            method,
                            granted_id,
                            attempt
                        );
                        return AcquisitionOutcome {
                            success: true,
                            status_code: context.status_code,
                            reason_code: context.reason_code,
                            business_status: context.business_status,
                            payload,
                            handle: adopted,
                        };
                    }
                    Ok(None) => {
                        context = ResultContext::from_result(&result);
                        if context.status_code == SUCCESS {
                            context = ResultContext::GENERAL;
                        }
                    }
                    Err(e) => {
                        error!("Failed to decode license: {}", e);
                        let context = ResultContext {
                            business_status: ResultContext::from_result(&result).business_status,
                            ..ResultContext::GENERAL
                        };
                        return AcquisitionOutcome::failed(context, adopted);
                    }
                },
                Err(e) => {
                    error!("{} attempt {} failed: {}", method, attempt, e);
                    context = ResultContext::NO_RESPONSE;
                }
            }

            if !context.is_retryable() || attempt == attempts {
                break;
            }
            warn!(
                "{} attempt {} failed ({}/{}), retrying in {:?}",
                method,
                attempt,
                context.status_code,
                context.reason_code,
                delay
            );
            self.sleeper.sleep(delay);
        }

        error!(
            "{} failed: class {} reason {} business status {}",
            method,
            context.status_code,
            context.reason_code,
            context.business_status
        );
        AcquisitionOutcome::failed(context, adopted)
    }

    fn session_params(&self, request: &AcquisitionRequest, session_id: Option<SessionId>) -> Value {
        let mut params = json!({
            "clientId": self.config.client_id,
            "sessionConfiguration": {
                "traceContext": request.trace_context,
            },
            "aspectDimensions": {
                "width": self.config.aspect_width,
                "height": self.config.aspect_height,
            },
            "keySystem": request.key_system,
            "mediaUsage": request.media_usage,
            "sessionInitialState": session_state(!request.video_muted),
            "accessToken": encode_buffer(&request.access_token),
            "contentMetadata": encode_buffer(&request.content_metadata),
            "licenseRequest": encode_buffer(&request.license_challenge),
        });
        if let Some(session_id) = session_id {
            params["sessionId"] = json!(session_id);
        }
        params
    }

    /// Close a session on the security service.
    ///
    /// Called automatically when the last handle on a session is dropped.
    pub fn release_session(&self, session_id: SessionId) -> bool {
        self.calls.close_session(session_id)
    }

    /// Mark a session active or inactive.
    pub fn update_session_state(&self, session_id: SessionId, active: bool) -> bool {
        if !is_valid_session_id(session_id) {
            warn!("Cannot set state of invalid session id {}", session_id);
            return false;
        }
        let params = json!({
            "clientId": self.config.client_id,
            "sessionId": session_id,
            "sessionState": session_state(active),
        });
        self.calls.invoke_simple(METHOD_SET_SESSION_STATE, &params)
    }

    /// Report the video window size of a session.
    pub fn set_window_size(&self, session_id: SessionId, width: u32, height: u32) -> bool {
        if !is_valid_session_id(session_id) {
            warn!("Cannot set window size of invalid session id {}", session_id);
            return false;
        }
        let params = json!({
            "clientId": self.config.client_id,
            "sessionId": session_id,
            "videoWidth": width,
            "videoHeight": height,
        });
        self.calls.invoke_simple(METHOD_SET_WINDOW_SIZE, &params)
    }

    /// Report playback speed and position (milliseconds) of a session.
    pub fn set_playback_position(&self, session_id: SessionId, speed: f64, position_ms: i64) -> bool {
        if !is_valid_session_id(session_id) {
            warn!("Cannot set playback position of invalid session id {}", session_id);
            return false;
        }
        let params = json!({
            "clientId": self.config.client_id,
            "sessionId": session_id,
            "playbackSpeed": speed,
            "playbackPosition": position_ms,
        });
        self.calls.invoke_simple(METHOD_SET_PLAYBACK_SPEED, &params)
    }
}

impl std::fmt::Debug for SecManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

fn session_state(active: bool) -> &'static str {
    if active {
        "active"
    } else {
        "inactive"
    }
}

/// Session id as a number or numeric string.
fn parse_session_id(value: &Value) -> SessionId {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(INVALID_SESSION_ID),
        Value::String(s) => s.trim().parse().unwrap_or(INVALID_SESSION_ID),
        _ => INVALID_SESSION_ID,
    }
}

/// Extract the granted session and decoded license from a response.
///
/// `Ok(None)` means the response did not grant a session, including the
/// reserved id 0. `Err` means a license was present but not decodable.
fn granted_license(result: &Value) -> Result<Option<(SessionId, Vec<u8>)>> {
    if !result["success"].as_bool().unwrap_or(false) {
        return Ok(None);
    }

    let session_id = parse_session_id(&result["sessionId"]);
    if !is_valid_session_id(session_id) {
        warn!("Response did not grant a usable session (id {})", session_id);
        return Ok(None);
    }

    let Some(license) = result["license"].as_str().filter(|l| !l.trim().is_empty()) else {
        warn!("Response for session {} carries no license", session_id);
        return Ok(None);
    };

    Ok(Some((session_id, decode_license(license)?)))
}
