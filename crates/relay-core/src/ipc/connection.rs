//! The steady-state API surface over one runtime connection.
//!
//! [`Connection`] pairs a [`TransportConnection`] with an [`EventRouter`] and
//! turns subscription changes into exactly one outbound action each.
//! Subscribe and unsubscribe wait for the runtime's acknowledgment before
//! returning.

use super::protocol::{Event, Identity};
use super::router::{EventRouter, Listener, ListenerId, SubscriptionKey};
use super::transport::TransportConnection;
use crate::error::Result;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Action names understood by the runtime.
pub struct Actions;

impl Actions {
    pub const SUBSCRIBE: &'static str = "subscribe";
    pub const UNSUBSCRIBE: &'static str = "unsubscribe";
    pub const PUBLISH_MESSAGE: &'static str = "publish-message";
    pub const SEND_MESSAGE: &'static str = "send-message";
    pub const SUBSCRIBE_TO_DESKTOP_EVENT: &'static str = "subscribe-to-desktop-event";
    pub const UNSUBSCRIBE_TO_DESKTOP_EVENT: &'static str = "unsubscribe-to-desktop-event";
}

/// Event type carried by inter-application bus messages.
pub const MESSAGE_EVENT_TYPE: &str = "message";

/// Handle to a live runtime connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<TransportConnection>,
    router: Arc<EventRouter>,
}

impl Connection {
    /// Start the protocol over an already-open stream.
    pub fn start<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let router = Arc::new(EventRouter::new());
        let transport = TransportConnection::start(stream, Arc::clone(&router));
        Self {
            transport: Arc::new(transport),
            router,
        }
    }

    /// Send an arbitrary action and wait for its reply payload.
    pub async fn send_action(&self, action: &str, payload: Value) -> Result<Value> {
        self.transport.send_action(action, payload).await
    }

    /// Listen for bus messages on `topic` from publishers matching `source`.
    ///
    /// Use [`Identity::any`] to receive from every publisher. The listener
    /// is registered locally before the runtime is asked to forward the
    /// topic; if the runtime refuses, the registration is rolled back.
    pub async fn subscribe<F>(&self, source: Identity, topic: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let key = SubscriptionKey::new(topic, source, MESSAGE_EVENT_TYPE);
        let payload = Self::subscription_payload(&key);
        self.register(key, Arc::new(listener), Actions::SUBSCRIBE, payload)
            .await
    }

    /// Remove one listener added by [`Connection::subscribe`].
    ///
    /// Returns `Ok(false)` without contacting the runtime when the listener
    /// is not registered for this source and topic.
    pub async fn unsubscribe(&self, source: Identity, topic: &str, id: ListenerId) -> Result<bool> {
        let key = SubscriptionKey::new(topic, source, MESSAGE_EVENT_TYPE);
        if !self.router.remove(&key, id) {
            return Ok(false);
        }
        let payload = Self::subscription_payload(&key);
        self.send_action(Actions::UNSUBSCRIBE, payload).await?;
        Ok(true)
    }

    /// Remove every listener for this source and topic with one action.
    pub async fn unsubscribe_all(&self, source: Identity, topic: &str) -> Result<usize> {
        let key = SubscriptionKey::new(topic, source, MESSAGE_EVENT_TYPE);
        let removed = self.router.remove_all(&key);
        if removed == 0 {
            return Ok(0);
        }
        let mut payload = Self::subscription_payload(&key);
        payload["removeAll"] = Value::Bool(true);
        self.send_action(Actions::UNSUBSCRIBE, payload).await?;
        Ok(removed)
    }

    /// Broadcast `message` to every subscriber of `topic`.
    ///
    /// Returns once the runtime acknowledges the send, not once any
    /// subscriber has processed it.
    pub async fn publish(&self, topic: &str, message: Value) -> Result<()> {
        self.send_action(
            Actions::PUBLISH_MESSAGE,
            json!({ "topic": topic, "message": message }),
        )
        .await?;
        Ok(())
    }

    /// Deliver `message` on `topic` to one application (or one of its windows).
    pub async fn send(&self, destination: &Identity, topic: &str, message: Value) -> Result<()> {
        let mut payload = Map::new();
        payload.insert("destinationUuid".into(), json!(destination.uuid));
        if let Some(name) = &destination.name {
            payload.insert("destinationWindowName".into(), json!(name));
        }
        payload.insert("topic".into(), json!(topic));
        payload.insert("message".into(), message);

        self.send_action(Actions::SEND_MESSAGE, Value::Object(payload))
            .await?;
        Ok(())
    }

    /// Listen for a runtime event (application or window lifecycle).
    ///
    /// `topic` is the event family (e.g. `"application"`), `event_type` the
    /// specific event (e.g. `"closed"`), `source` the emitting identity.
    pub async fn add_event_listener<F>(
        &self,
        topic: &str,
        event_type: &str,
        source: Identity,
        listener: F,
    ) -> Result<ListenerId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let key = SubscriptionKey::new(topic, source, event_type);
        let payload = Self::desktop_event_payload(&key);
        self.register(
            key,
            Arc::new(listener),
            Actions::SUBSCRIBE_TO_DESKTOP_EVENT,
            payload,
        )
        .await
    }

    /// Remove one listener added by [`Connection::add_event_listener`].
    pub async fn remove_event_listener(
        &self,
        topic: &str,
        event_type: &str,
        source: Identity,
        id: ListenerId,
    ) -> Result<bool> {
        let key = SubscriptionKey::new(topic, source, event_type);
        if !self.router.remove(&key, id) {
            return Ok(false);
        }
        let payload = Self::desktop_event_payload(&key);
        self.send_action(Actions::UNSUBSCRIBE_TO_DESKTOP_EVENT, payload)
            .await?;
        Ok(true)
    }

    /// Close the channel. Pending actions fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// Wait until the channel has ended, from either side.
    pub async fn closed(&self) {
        self.transport.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Requests sent but not yet answered.
    pub fn pending_count(&self) -> usize {
        self.transport.pending_count()
    }

    /// The local subscription registry.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    async fn register(
        &self,
        key: SubscriptionKey,
        listener: Listener,
        action: &str,
        payload: Value,
    ) -> Result<ListenerId> {
        let id = self.router.add(key.clone(), listener);
        match self.send_action(action, payload).await {
            Ok(_) => {
                debug!("'{}' acknowledged for {}/{}", action, key.topic, key.source);
                Ok(id)
            }
            Err(e) => {
                warn!(
                    "'{}' for {}/{} failed, removing listener: {}",
                    action, key.topic, key.source, e
                );
                self.router.remove(&key, id);
                Err(e)
            }
        }
    }

    fn subscription_payload(key: &SubscriptionKey) -> Value {
        let mut payload = Map::new();
        payload.insert("sourceUuid".into(), json!(key.source.uuid));
        if let Some(name) = &key.source.name {
            payload.insert("sourceWindowName".into(), json!(name));
        }
        payload.insert("topic".into(), json!(key.topic));
        Value::Object(payload)
    }

    fn desktop_event_payload(key: &SubscriptionKey) -> Value {
        let mut payload = Map::new();
        payload.insert("topic".into(), json!(key.topic));
        payload.insert("type".into(), json!(key.event_type));
        payload.insert("uuid".into(), json!(key.source.uuid));
        if let Some(name) = &key.source.name {
            payload.insert("name".into(), json!(name));
        }
        Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::ipc::protocol::{read_frame, write_frame, ActionRequest, InboundFrame};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    struct FakeRuntime {
        stream: DuplexStream,
    }

    impl FakeRuntime {
        async fn recv(&mut self) -> ActionRequest {
            let bytes = read_frame(&mut self.stream).await.unwrap().unwrap();
            serde_json::from_slice(&bytes).unwrap()
        }

        async fn send(&mut self, frame: &InboundFrame) {
            let bytes = serde_json::to_vec(frame).unwrap();
            write_frame(&mut self.stream, &bytes).await.unwrap();
        }

        /// Receive one request and acknowledge it.
        async fn ack(&mut self) -> ActionRequest {
            let request = self.recv().await;
            self.send(&InboundFrame::reply_ok(request.correlation_id, Value::Null))
                .await;
            request
        }

        async fn reject(&mut self, message: &str) -> ActionRequest {
            let request = self.recv().await;
            self.send(&InboundFrame::reply_err(request.correlation_id, message))
                .await;
            request
        }
    }

    fn pair() -> (Connection, FakeRuntime) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (Connection::start(client), FakeRuntime { stream: server })
    }

    #[tokio::test]
    async fn test_subscribe_sends_one_action_and_registers() {
        let (conn, mut runtime) = pair();

        let (id, request) = tokio::join!(
            conn.subscribe(Identity::any(), "news", |_: &Event| {}),
            runtime.ack()
        );
        let id = id.unwrap();

        assert_eq!(request.action, Actions::SUBSCRIBE);
        assert_eq!(request.payload, json!({"sourceUuid": "*", "topic": "news"}));
        let key = SubscriptionKey::new("news", Identity::any(), MESSAGE_EVENT_TYPE);
        assert_eq!(conn.router().listener_count(&key), 1);

        let (removed, request) = tokio::join!(
            conn.unsubscribe(Identity::any(), "news", id),
            runtime.ack()
        );
        assert!(removed.unwrap());
        assert_eq!(request.action, Actions::UNSUBSCRIBE);
        assert!(conn.router().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_subscribe_rolls_back() {
        let (conn, mut runtime) = pair();

        let (result, _) = tokio::join!(
            conn.subscribe(Identity::new("app-1"), "news", |_: &Event| {}),
            runtime.reject("not permitted")
        );

        assert!(matches!(result, Err(RelayError::Action { .. })));
        assert!(conn.router().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_listener_sends_nothing() {
        let (conn, mut runtime) = pair();

        let (id, _) = tokio::join!(
            conn.subscribe(Identity::any(), "news", |_: &Event| {}),
            runtime.ack()
        );
        let id = id.unwrap();

        // Wrong topic: no action goes out
        let removed = conn
            .unsubscribe(Identity::any(), "sports", id)
            .await
            .unwrap();
        assert!(!removed);

        let next = tokio::time::timeout(Duration::from_millis(50), runtime.recv()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_sends_single_action() {
        let (conn, mut runtime) = pair();

        for _ in 0..3 {
            let (id, _) = tokio::join!(
                conn.subscribe(Identity::any(), "news", |_: &Event| {}),
                runtime.ack()
            );
            id.unwrap();
        }

        let (removed, request) = tokio::join!(
            conn.unsubscribe_all(Identity::any(), "news"),
            runtime.ack()
        );
        assert_eq!(removed.unwrap(), 3);
        assert_eq!(request.action, Actions::UNSUBSCRIBE);
        assert_eq!(request.payload["removeAll"], json!(true));
    }

    #[tokio::test]
    async fn test_send_targets_window() {
        let (conn, mut runtime) = pair();

        let target = Identity::with_name("app-2", "main");
        let (result, request) = tokio::join!(
            conn.send(&target, "chat", json!({"text": "hi"})),
            runtime.ack()
        );
        result.unwrap();

        assert_eq!(request.action, Actions::SEND_MESSAGE);
        assert_eq!(
            request.payload,
            json!({
                "destinationUuid": "app-2",
                "destinationWindowName": "main",
                "topic": "chat",
                "message": {"text": "hi"}
            })
        );
    }

    #[tokio::test]
    async fn test_desktop_event_listener() {
        let (conn, mut runtime) = pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let (id, request) = tokio::join!(
            conn.add_event_listener("application", "closed", Identity::new("app-1"), move |e: &Event| {
                sink.lock().unwrap().push(e.event_type.clone());
            }),
            runtime.ack()
        );
        let id = id.unwrap();
        assert_eq!(request.action, Actions::SUBSCRIBE_TO_DESKTOP_EVENT);
        assert_eq!(
            request.payload,
            json!({"topic": "application", "type": "closed", "uuid": "app-1"})
        );

        runtime
            .send(&InboundFrame::event("application", "started", Identity::new("app-1"), Value::Null))
            .await;
        runtime
            .send(&InboundFrame::event("application", "closed", Identity::new("app-1"), Value::Null))
            .await;

        for _ in 0..50 {
            if !seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec!["closed"]);

        let (removed, request) = tokio::join!(
            conn.remove_event_listener("application", "closed", Identity::new("app-1"), id),
            runtime.ack()
        );
        assert!(removed.unwrap());
        assert_eq!(request.action, Actions::UNSUBSCRIBE_TO_DESKTOP_EVENT);
    }

    #[tokio::test]
    async fn test_close_fails_later_actions() {
        let (conn, _runtime) = pair();
        conn.close().await;
        assert!(conn.is_closed());

        let result = conn.publish("news", json!("late")).await;
        assert!(matches!(result, Err(RelayError::ConnectionClosed)));
    }
}
