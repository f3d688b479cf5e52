//! Stream subscriptions
//!
//! A subscription is a standing registration for unsolicited `added`,
//! `changed` and `removed` events on a named collection. Subscriptions
//! outlive individual connections and are re-sent after every reconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::message::OutgoingMessage;
use crate::types::SubscriptionId;

/// Receives stream events for one subscription
pub trait StreamListener: Send + Sync {
    /// A document was added to the collection
    fn on_added(&self, id: &str, fields: &Value);

    /// Fields of a document changed
    fn on_changed(&self, id: &str, fields: &Value);

    /// A document was removed
    fn on_removed(&self, id: &str);
}

/// A registered subscription
pub struct Subscription {
    pub id: SubscriptionId,
    /// Publication name; stream events are matched on their collection
    pub name: String,
    pub params: Vec<Value>,
    pub listener: Arc<dyn StreamListener>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, params: Vec<Value>, listener: Arc<dyn StreamListener>) -> Self {
        Self {
            id: SubscriptionId::new(),
            name: name.into(),
            params,
            listener,
        }
    }

    /// The `sub` frame for this subscription
    pub fn sub_message(&self) -> OutgoingMessage {
        OutgoingMessage::Sub {
            id: self.id.to_string(),
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Stream event forwarded to listeners
#[derive(Debug, Clone, Copy)]
pub enum StreamEvent<'a> {
    Added { id: &'a str, fields: &'a Value },
    Changed { id: &'a str, fields: &'a Value },
    Removed { id: &'a str },
}

/// All active subscriptions of a session
#[derive(Debug, Default)]
pub struct Subscriptions {
    active: HashMap<SubscriptionId, Subscription>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subscription: Subscription) {
        self.active.insert(subscription.id, subscription);
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
        self.active.remove(id)
    }

    /// Remove by the wire id used in `sub`/`nosub` frames
    pub fn remove_by_wire_id(&mut self, wire_id: &str) -> Option<Subscription> {
        let id = self
            .active
            .keys()
            .find(|id| id.to_string() == wire_id)
            .copied()?;
        self.active.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// `sub` frames for every active subscription
    pub fn sub_messages(&self) -> Vec<OutgoingMessage> {
        self.active.values().map(Subscription::sub_message).collect()
    }

    /// Forward an event to every subscription on `collection`
    ///
    /// Returns how many listeners received it. Events for collections
    /// nobody subscribed to are dropped.
    pub fn dispatch(&self, collection: &str, event: StreamEvent<'_>) -> usize {
        let mut delivered = 0;
        for sub in self.active.values().filter(|s| s.name == collection) {
            match event {
                StreamEvent::Added { id, fields } => sub.listener.on_added(id, fields),
                StreamEvent::Changed { id, fields } => sub.listener.on_changed(id, fields),
                StreamEvent::Removed { id } => sub.listener.on_removed(id),
            }
            delivered += 1;
        }
        if delivered == 0 {
            debug!("No subscription for collection '{}', dropping event", collection);
        }
        delivered
    }
}
