//! Transport seam towards the platform security service.
//!
//! The crate never talks to the platform directly. A [`Transport`] bound to
//! one plugin invokes named methods with JSON parameters and delivers
//! asynchronous events to registered handlers.
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;

/// Open a new playback session.
pub const METHOD_OPEN_SESSION: &str = "openPlaybackSession";
/// Refresh the inputs of an existing playback session.
pub const METHOD_UPDATE_SESSION: &str = "updatePlaybackSession";
/// Close a playback session.
pub const METHOD_CLOSE_SESSION: &str = "closePlaybackSession";
/// Mark a playback session active or inactive.
pub const METHOD_SET_SESSION_STATE: &str = "setPlaybackSessionState";
/// Report the video window size.
pub const METHOD_SET_WINDOW_SIZE: &str = "setVideoWindowSize";
/// Report playback speed and position.
pub const METHOD_SET_PLAYBACK_SPEED: &str = "setPlaybackSpeedState";

/// Receives the parameters of a platform event. Called on the transport's
/// own event thread.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Remote procedure call mechanism bound to one platform plugin.
pub trait Transport: Send + Sync {
    /// Invoke `method` and return its `result` object.
    ///
    /// `Err` means no usable response was received.
    fn invoke(&self, method: &str, params: &Value, timeout: Duration) -> Result<Value>;

    /// Register `handler` for `event`. Returns false if the transport cannot
    /// deliver events.
    fn subscribe(&self, event: &str, handler: EventHandler) -> bool;

    /// Remove the handler registered for `event`.
    fn unsubscribe(&self, event: &str);
}
