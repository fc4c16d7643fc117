//! Stub implementations for testing.
//!
//! These implementations simulate processor and broker behavior
//! without talking to real services.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use courier_domain::{DeliveryId, Fault, InboundMessage};

use crate::ports::{AckHandle, BrokerSource, Delivery, Processor, PublishPort};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Stub Processor
// =============================================================================

/// Stub processor for testing.
///
/// Succeeds by default. Faults can be scripted for the next N calls or made
/// permanent, and an artificial delay can be set to exercise timeouts.
#[derive(Debug, Default)]
pub struct StubProcessor {
    /// Faults returned by the next calls, in order
    script: Mutex<VecDeque<Fault>>,
    /// Fault returned once the script is exhausted
    always: Mutex<Option<Fault>>,
    /// Delay applied before every call completes
    delay: Mutex<Option<Duration>>,
    /// Payloads of successful calls
    processed: Mutex<Vec<Vec<u8>>>,
    /// Total invocations
    calls: AtomicU32,
}

impl StubProcessor {
    /// Create a processor that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls with `fault`.
    pub fn fail_next(&self, times: usize, fault: Fault) {
        let mut script = lock(&self.script);
        script.extend(std::iter::repeat(fault).take(times));
    }

    /// Fail every call (after any scripted faults) with `fault`.
    pub fn fail_always(&self, fault: Fault) {
        *lock(&self.always) = Some(fault);
    }

    /// Stop failing.
    pub fn recover(&self) {
        lock(&self.script).clear();
        *lock(&self.always) = None;
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Number of times `run` has been invoked.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads of successful invocations, in completion order.
    pub fn processed(&self) -> Vec<Vec<u8>> {
        lock(&self.processed).clone()
    }
}

#[async_trait]
impl Processor for StubProcessor {
    async fn run(&self, payload: &[u8]) -> Result<(), Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.script).pop_front();
        if let Some(fault) = scripted.or_else(|| lock(&self.always).clone()) {
            return Err(fault);
        }

        lock(&self.processed).push(payload.to_vec());
        Ok(())
    }
}

// =============================================================================
// Settlement recording
// =============================================================================

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Positively acknowledged
    Acked,
    /// Negatively acknowledged
    Nacked,
}

/// Shared record of ack/nack calls, in call order.
#[derive(Debug, Default)]
pub struct SettlementLog {
    entries: Mutex<Vec<(DeliveryId, Settlement)>>,
}

impl SettlementLog {
    /// Create an empty log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap `message` in a [`Delivery`] whose settlement is recorded here.
    pub fn delivery(self: &Arc<Self>, message: InboundMessage) -> Delivery {
        let handle = RecordingHandle {
            delivery_id: message.delivery_id.clone(),
            log: Arc::clone(self),
        };
        Delivery::new(message, Box::new(handle))
    }

    /// All settlements in call order.
    pub fn entries(&self) -> Vec<(DeliveryId, Settlement)> {
        lock(&self.entries).clone()
    }

    /// Settlement of one delivery, if it has been settled.
    pub fn settlement(&self, delivery_id: &DeliveryId) -> Option<Settlement> {
        lock(&self.entries)
            .iter()
            .find(|(id, _)| id == delivery_id)
            .map(|(_, settlement)| *settlement)
    }

    /// Number of acks recorded.
    pub fn acked(&self) -> usize {
        self.count(Settlement::Acked)
    }

    /// Number of nacks recorded.
    pub fn nacked(&self) -> usize {
        self.count(Settlement::Nacked)
    }

    fn count(&self, kind: Settlement) -> usize {
        lock(&self.entries).iter().filter(|(_, s)| *s == kind).count()
    }

    fn record(&self, delivery_id: DeliveryId, settlement: Settlement) {
        lock(&self.entries).push((delivery_id, settlement));
    }
}

struct RecordingHandle {
    delivery_id: DeliveryId,
    log: Arc<SettlementLog>,
}

#[async_trait]
impl AckHandle for RecordingHandle {
    async fn ack(self: Box<Self>) -> Result<(), Fault> {
        self.log.record(self.delivery_id, Settlement::Acked);
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), Fault> {
        self.log.record(self.delivery_id, Settlement::Nacked);
        Ok(())
    }
}

/// Build a message with a fresh delivery id.
pub fn message(attributes: &[(&str, &str)], payload: impl Into<Vec<u8>>) -> InboundMessage {
    let attributes: HashMap<String, String> = attributes
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    InboundMessage::new(next_delivery_id(), attributes, payload.into())
}

fn next_delivery_id() -> DeliveryId {
    // A v7 uuid is never empty
    DeliveryId::new(Uuid::now_v7().to_string()).unwrap_or_else(|_| unreachable!())
}

// =============================================================================
// Channel Broker
// =============================================================================

/// In-process broker backed by an unbounded channel.
///
/// Deliveries pushed through [`BrokerSender`] come out of `receive` in order.
/// Once every sender is dropped and the queue is drained, `receive` returns
/// `Ok(None)`.
pub struct ChannelBroker {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    receive_faults: Mutex<VecDeque<Fault>>,
    log: Arc<SettlementLog>,
}

/// Producer side of a [`ChannelBroker`].
#[derive(Clone)]
pub struct BrokerSender {
    tx: mpsc::UnboundedSender<Delivery>,
    log: Arc<SettlementLog>,
}

impl ChannelBroker {
    /// Create a broker and its sender.
    pub fn new() -> (Self, BrokerSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = SettlementLog::new();
        let broker = Self {
            rx: tokio::sync::Mutex::new(rx),
            receive_faults: Mutex::new(VecDeque::new()),
            log: Arc::clone(&log),
        };
        (broker, BrokerSender { tx, log })
    }

    /// Fail the next `times` receive calls with `fault`.
    pub fn fail_next_receive(&self, times: usize, fault: Fault) {
        lock(&self.receive_faults).extend(std::iter::repeat(fault).take(times));
    }

    /// Settlements of every delivery sent through this broker.
    pub fn settlements(&self) -> Arc<SettlementLog> {
        Arc::clone(&self.log)
    }
}

impl BrokerSender {
    /// Enqueue a message. Returns its delivery id.
    ///
    /// Returns `None` if the broker has been dropped.
    pub fn send(&self, message: InboundMessage) -> Option<DeliveryId> {
        let delivery_id = message.delivery_id.clone();
        self.tx.send(self.log.delivery(message)).ok()?;
        Some(delivery_id)
    }

    /// Enqueue a message carrying `order_id = key`.
    pub fn send_keyed(&self, key: &str, payload: impl Into<Vec<u8>>) -> Option<DeliveryId> {
        self.send(message(&[(courier_domain::DEFAULT_DEDUP_ATTRIBUTE, key)], payload))
    }
}

#[async_trait]
impl BrokerSource for ChannelBroker {
    async fn receive(&self) -> Result<Option<Delivery>, Fault> {
        let fault = lock(&self.receive_faults).pop_front();
        if let Some(fault) = fault {
            return Err(fault);
        }
        Ok(self.rx.lock().await.recv().await)
    }
}

// =============================================================================
// Stub Publish Port
// =============================================================================

/// A message captured by [`StubPublishPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Broker message id assigned by the stub
    pub message_id: String,
    /// Destination topic
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Attributes attached by the publisher
    pub attributes: HashMap<String, String>,
}

/// Stub publish port that records everything it accepts.
#[derive(Debug, Default)]
pub struct StubPublishPort {
    published: Mutex<Vec<PublishedMessage>>,
    script: Mutex<VecDeque<Fault>>,
    counter: AtomicU64,
    attempts: AtomicU32,
}

impl StubPublishPort {
    /// Create a port that accepts every publish.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` publishes with `fault`.
    pub fn fail_next(&self, times: usize, fault: Fault) {
        lock(&self.script).extend(std::iter::repeat(fault).take(times));
    }

    /// Messages accepted so far.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    /// Total publish calls, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishPort for StubPublishPort {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<String, Fault> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted = lock(&self.script).pop_front();
        if let Some(fault) = scripted {
            return Err(fault);
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = format!("STUB-{n}");
        lock(&self.published).push(PublishedMessage {
            message_id: message_id.clone(),
            topic: topic.to_string(),
            payload,
            attributes,
        });
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_processor_scripted_faults() {
        let processor = StubProcessor::new();
        processor.fail_next(2, Fault::Unavailable("down".into()));

        assert!(processor.run(b"a").await.is_err());
        assert!(processor.run(b"a").await.is_err());
        assert!(processor.run(b"a").await.is_ok());
        assert_eq!(processor.calls(), 3);
        assert_eq!(processor.processed(), vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_channel_broker_roundtrip_and_close() {
        let (broker, sender) = ChannelBroker::new();
        let id = sender.send_keyed("order-1", "{}").unwrap();
        drop(sender);

        let delivery = broker.receive().await.unwrap().unwrap();
        assert_eq!(delivery.message.delivery_id, id);
        assert_eq!(delivery.message.attribute("order_id"), Some("order-1"));
        delivery.ack().await.unwrap();

        assert!(broker.receive().await.unwrap().is_none());
        assert_eq!(broker.settlements().settlement(&id), Some(Settlement::Acked));
    }

    #[tokio::test]
    async fn test_channel_broker_receive_faults() {
        let (broker, _sender) = ChannelBroker::new();
        broker.fail_next_receive(1, Fault::NotFound("subscription".into()));

        assert_eq!(
            broker.receive().await.unwrap_err(),
            Fault::NotFound("subscription".into())
        );
    }
}
