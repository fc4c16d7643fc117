//! Publisher: serialize, attach content type, publish with retry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use courier_domain::{Classify, ErrorClass, Fault};
use courier_guard::{AttemptTimeout, RetryConfig, RetryPolicy};

use crate::error::{ExecError, ExecResult};
use crate::ports::PublishPort;

/// Attribute carrying the payload encoding.
pub const CONTENT_TYPE_ATTRIBUTE: &str = "content_type";

/// Content type of JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of UTF-8 text payloads.
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Content type of opaque payloads.
pub const CONTENT_TYPE_BYTES: &str = "application/octet-stream";

/// Broker fault seen through the publish retry filter.
///
/// Publishing retries a narrower set than [`Fault`]'s own classification:
/// a missing topic is permanent here.
#[derive(Debug)]
struct PublishFault(Fault);

impl Classify for PublishFault {
    fn class(&self) -> ErrorClass {
        match &self.0 {
            Fault::Unavailable(_)
            | Fault::ResourceExhausted(_)
            | Fault::Internal(_)
            | Fault::Aborted(_)
            | Fault::TimedOut(_) => ErrorClass::Retryable,
            Fault::NotFound(_) | Fault::Malformed(_) | Fault::Unexpected(_) => ErrorClass::Fatal,
        }
    }
}

impl From<AttemptTimeout> for PublishFault {
    fn from(timeout: AttemptTimeout) -> Self {
        PublishFault(Fault::from(timeout))
    }
}

impl fmt::Display for PublishFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Publishes messages to one topic through a [`PublishPort`].
pub struct Publisher<P: ?Sized> {
    port: Arc<P>,
    topic: String,
    retry: RetryPolicy,
}

impl<P: PublishPort + ?Sized> Publisher<P> {
    /// Create a publisher using the publish retry preset.
    pub fn new(port: Arc<P>, topic: impl Into<String>) -> Self {
        Self::with_retry(port, topic, RetryConfig::publish())
    }

    /// Create a publisher with a custom retry configuration.
    pub fn with_retry(port: Arc<P>, topic: impl Into<String>, retry: RetryConfig) -> Self {
        Self { port, topic: topic.into(), retry: RetryPolicy::new(retry) }
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize `message` as JSON and publish it.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        message: &T,
        attributes: HashMap<String, String>,
    ) -> ExecResult<String> {
        let payload = serde_json::to_vec(message)?;
        self.publish(payload, CONTENT_TYPE_JSON, attributes).await
    }

    /// Publish a UTF-8 text message.
    pub async fn publish_text(
        &self,
        message: &str,
        attributes: HashMap<String, String>,
    ) -> ExecResult<String> {
        self.publish(message.as_bytes().to_vec(), CONTENT_TYPE_TEXT, attributes).await
    }

    /// Publish raw bytes.
    pub async fn publish_bytes(
        &self,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> ExecResult<String> {
        self.publish(payload, CONTENT_TYPE_BYTES, attributes).await
    }

    async fn publish(
        &self,
        payload: Vec<u8>,
        content_type: &str,
        mut attributes: HashMap<String, String>,
    ) -> ExecResult<String> {
        attributes
            .entry(CONTENT_TYPE_ATTRIBUTE.to_string())
            .or_insert_with(|| content_type.to_string());

        debug!(topic = %self.topic, bytes = payload.len(), content_type, "Publishing message");

        let port = &*self.port;
        let topic = self.topic.as_str();
        let payload = &payload;
        let attributes = &attributes;

        let message_id = self
            .retry
            .run("publish", move || async move {
                port.publish(topic, payload.clone(), attributes.clone()).await.map_err(PublishFault)
            })
            .await
            .map_err(|PublishFault(source)| ExecError::Publish { topic: self.topic.clone(), source })?;

        info!(topic = %self.topic, %message_id, "Message published");
        Ok(message_id)
    }
}

impl<P: ?Sized> fmt::Debug for Publisher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubPublishPort;
    use serde_json::json;

    fn publisher(port: Arc<StubPublishPort>) -> Publisher<StubPublishPort> {
        Publisher::new(port, "orders")
    }

    #[tokio::test]
    async fn test_publish_json_sets_content_type() {
        let port = Arc::new(StubPublishPort::new());
        let id = publisher(port.clone())
            .publish_json(&json!({"order_id": "order-1", "amount": 10}), HashMap::new())
            .await
            .unwrap();

        let published = port.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_id, id);
        assert_eq!(published[0].topic, "orders");
        assert_eq!(
            published[0].attributes.get(CONTENT_TYPE_ATTRIBUTE).map(String::as_str),
            Some(CONTENT_TYPE_JSON)
        );
        let body: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(body["amount"], 10);
    }

    #[tokio::test]
    async fn test_publish_text_keeps_caller_attributes() {
        let port = Arc::new(StubPublishPort::new());
        let attributes = HashMap::from([("order_id".to_string(), "order-9".to_string())]);

        publisher(port.clone()).publish_text("hello", attributes).await.unwrap();

        let published = &port.published()[0];
        assert_eq!(published.payload, b"hello".to_vec());
        assert_eq!(published.attributes.get("order_id").map(String::as_str), Some("order-9"));
        assert_eq!(
            published.attributes.get(CONTENT_TYPE_ATTRIBUTE).map(String::as_str),
            Some(CONTENT_TYPE_TEXT)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_publish_failures_are_retried() {
        let port = Arc::new(StubPublishPort::new());
        port.fail_next(2, Fault::ResourceExhausted("429".into()));

        publisher(port.clone()).publish_bytes(vec![1, 2, 3], HashMap::new()).await.unwrap();

        assert_eq!(port.attempts(), 3);
        assert_eq!(port.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_topic_is_not_retried() {
        let port = Arc::new(StubPublishPort::new());
        port.fail_next(1, Fault::NotFound("topic orders".into()));

        let err = publisher(port.clone()).publish_text("x", HashMap::new()).await.unwrap_err();

        assert!(matches!(
            err,
            ExecError::Publish { ref topic, source: Fault::NotFound(_) } if topic == "orders"
        ));
        assert_eq!(port.attempts(), 1);
    }
}
