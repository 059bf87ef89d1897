//! Response callback demultiplexing for an established session.
//!
//! The broker pushes every response for a session through one callback
//! channel. [`CallbackManager`] owns that channel and hands each message to
//! the single registered [`ResponseSink`], addressed by the
//! [`CALLBACK_ID_HEADER`](crate::models::message::CALLBACK_ID_HEADER) header.
//!
//! One consumer per session is a hard rule: a second [`CallbackManager::register`]
//! fails instead of fanning out.
//!
//! # Locking
//!
//! A single mutex guards the registration table. Sinks are never called
//! with it held: `send_response` clones the sink out before delivering, and
//! the broadcast paths drain the whole table first. A sink may therefore
//! call back into the manager from any of its methods, and anything it
//! registers during a broadcast lands in the already-cleared table.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::message::ResponseMessage;
use crate::{Result, SessionError};

/// Consumer of responses for one session.
pub trait ResponseSink: Send + Sync {
    /// Deliver one response.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer can no longer accept responses.
    fn send_response(&self, message: ResponseMessage) -> Result<()>;

    /// The broker went away; `node_down` is true when its node is gone too.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer fails to process the signal.
    fn send_broker_down_signal(&self, node_down: bool) -> Result<()>;

    /// The session was closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer fails to process the notification.
    fn close(&self) -> Result<()>;
}

/// What [`CallbackManager::send_response`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the sink registered under this id.
    Delivered(String),
    /// Keep-alive swallowed.
    Heartbeat,
    /// No live registration matched; logged and discarded.
    Dropped,
}

/// Single-consumer response demultiplexer.
#[derive(Default)]
pub struct CallbackManager {
    table: Mutex<HashMap<String, Arc<dyn ResponseSink>>>,
}

impl CallbackManager {
    /// Manager with no registration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn ResponseSink>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the session's response consumer and return its id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyRegistered` if a consumer is already
    /// registered; the existing registration is left in place.
    pub fn register(&self, sink: Arc<dyn ResponseSink>) -> Result<String> {
        let mut table = self.table();
        if let Some(existing) = table.keys().next() {
            return Err(SessionError::AlreadyRegistered(format!(
                "response consumer {existing} is already registered on this session"
            )));
        }
        let id = Uuid::new_v4().to_string();
        table.insert(id.clone(), sink);
        debug!(callback_id = %id, "response consumer registered");
        Ok(id)
    }

    /// Remove a registration; unknown ids are ignored.
    pub fn unregister(&self, id: &str) {
        if self.table().remove(id).is_some() {
            debug!(callback_id = %id, "response consumer unregistered");
        }
    }

    /// Number of live registrations (zero or one).
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.table().len()
    }

    /// Route one inbound response to its consumer.
    pub fn send_response(&self, message: ResponseMessage) -> Delivery {
        if message.is_heartbeat() {
            debug!("broker heartbeat");
            return Delivery::Heartbeat;
        }

        let Some(id) = message.callback_id().map(str::to_owned) else {
            warn!(action = %message.action, "response without callback id dropped");
            return Delivery::Dropped;
        };

        // Look up under the lock, deliver outside it.
        let sink = self.table().get(&id).cloned();
        let Some(sink) = sink else {
            warn!(callback_id = %id, action = %message.action, "response for unknown consumer dropped");
            return Delivery::Dropped;
        };

        if let Err(err) = sink.send_response(message) {
            warn!(callback_id = %id, %err, "response consumer rejected message");
        }
        Delivery::Delivered(id)
    }

    /// Clear the table, then tell every former consumer the broker is down.
    ///
    /// Sinks are notified after the lock is released, so a sink may call
    /// back into [`unregister`](Self::unregister) or
    /// [`register`](Self::register) while handling the signal.
    pub fn send_broker_down_signal(&self, node_down: bool) {
        let sinks = mem::take(&mut *self.table());
        info!(
            node_down,
            consumers = sinks.len(),
            "broadcasting broker down signal"
        );
        for (id, sink) in &sinks {
            if let Err(err) = sink.send_broker_down_signal(node_down) {
                warn!(callback_id = %id, %err, "consumer failed to handle broker down signal");
            }
        }
    }

    /// Clear the table, then tell every former consumer the session is closing.
    pub fn close(&self) {
        let sinks = mem::take(&mut *self.table());
        for (id, sink) in &sinks {
            if let Err(err) = sink.close() {
                warn!(callback_id = %id, %err, "consumer failed to handle close");
            }
        }
        debug!("callback manager closed");
    }
}

impl std::fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackManager")
            .field("registrations", &self.registration_count())
            .finish()
    }
}
