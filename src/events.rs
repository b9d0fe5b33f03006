//! Platform event dispatch.
//!
//! The watermark plugin reports session and watermark changes as events on
//! the transport's own thread. [`EventDispatcher`] parses them and hands
//! them to a listener through a [`TaskScheduler`], so listener code never
//! runs on (or blocks) the transport thread.
use std::sync::Arc;

use serde_json::Value;

use crate::scheduler::{TaskScheduler, INVALID_TASK_ID};
use crate::session::SessionId;
use crate::transport::{EventHandler, Transport};

/// Watermark session status changed.
pub const EVENT_WATERMARK_SESSION_UPDATE: &str = "onWatermarkSessionUpdate";
/// A watermark graphic must be created.
pub const EVENT_ADD_WATERMARK: &str = "onAddWatermark";
/// A watermark graphic changed.
pub const EVENT_UPDATE_WATERMARK: &str = "onUpdateWatermark";
/// A watermark graphic must be removed.
pub const EVENT_REMOVE_WATERMARK: &str = "onRemoveWatermark";
/// Watermarks must be shown or hidden.
pub const EVENT_DISPLAY_WATERMARK: &str = "onDisplayWatermark";

/// Every event the dispatcher subscribes to.
pub const EVENTS: [&str; 5] = [
    EVENT_WATERMARK_SESSION_UPDATE,
    EVENT_ADD_WATERMARK,
    EVENT_UPDATE_WATERMARK,
    EVENT_REMOVE_WATERMARK,
    EVENT_DISPLAY_WATERMARK,
];

/// Parsed platform event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    WatermarkSessionUpdate {
        session_id: SessionId,
        conflict_status: i64,
    },
    AddWatermark {
        graphic_id: i64,
        z_index: i64,
    },
    UpdateWatermark {
        graphic_id: i64,
    },
    RemoveWatermark {
        graphic_id: i64,
    },
    DisplayWatermark {
        hide: bool,
    },
}

impl SessionEvent {
    /// Parse the parameters of `event`. Returns `None` for unknown events
    /// and for parameters missing a required field.
    #[must_use]
    pub fn parse(event: &str, params: &Value) -> Option<Self> {
        let int = |name: &str| params[name].as_i64();
        match event {
            EVENT_WATERMARK_SESSION_UPDATE => Some(Self::WatermarkSessionUpdate {
                session_id: int("sessionId")?,
                conflict_status: int("conflictStatus").unwrap_or(0),
            }),
            EVENT_ADD_WATERMARK => Some(Self::AddWatermark {
                graphic_id: int("graphicId")?,
                z_index: int("zIndex").unwrap_or(0),
            }),
            EVENT_UPDATE_WATERMARK => Some(Self::UpdateWatermark {
                graphic_id: int("graphicId")?,
            }),
            EVENT_REMOVE_WATERMARK => Some(Self::RemoveWatermark {
                graphic_id: int("graphicId")?,
            }),
            EVENT_DISPLAY_WATERMARK => Some(Self::DisplayWatermark {
                hide: params["hideWatermark"].as_bool()?,
            }),
            _ => None,
        }
    }
}

/// Receives parsed events on the scheduler thread.
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

impl<F> SessionEventListener for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn on_event(&self, event: SessionEvent) {
        self(event)
    }
}

/// Subscription to the platform events, unsubscribed on drop.
pub struct EventDispatcher {
    transport: Arc<dyn Transport>,
    subscribed: Vec<&'static str>,
}

impl EventDispatcher {
    /// Subscribe to every event in [`EVENTS`] on `transport`.
    ///
    /// Events the transport cannot deliver are logged and skipped.
    pub fn subscribe(
        transport: Arc<dyn Transport>,
        scheduler: Arc<TaskScheduler>,
        listener: Arc<dyn SessionEventListener>,
    ) -> Self {
        let mut subscribed = Vec::new();
        for event in EVENTS {
            let scheduler = scheduler.clone();
            let listener = listener.clone();
            let handler: EventHandler =
                Arc::new(move |params: &Value| dispatch(&scheduler, &listener, event, params));
            if transport.subscribe(event, handler) {
                debug!("Subscribed to {}", event);
                subscribed.push(event);
            } else {
                warn!("Transport cannot deliver {}", event);
            }
        }

        Self {
            transport,
            subscribed,
        }
    }

    /// Events currently subscribed.
    pub fn subscribed(&self) -> &[&'static str] {
        &self.subscribed
    }

    pub fn unsubscribe_all(&mut self) {
        for event in self.subscribed.drain(..) {
            self.transport.unsubscribe(event);
            debug!("Unsubscribed from {}", event);
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribed", &self.subscribed)
            .finish()
    }
}

fn dispatch(
    scheduler: &TaskScheduler,
    listener: &Arc<dyn SessionEventListener>,
    event: &'static str,
    params: &Value,
) {
    let Some(parsed) = SessionEvent::parse(event, params) else {
        warn!("Ignoring malformed {} event: {}", event, params);
        return;
    };

    let listener = listener.clone();
    if scheduler.schedule(event, move || listener.on_event(parsed)) == INVALID_TASK_ID {
        warn!("Dropped {} event, scheduler unavailable", event);
    }
}
