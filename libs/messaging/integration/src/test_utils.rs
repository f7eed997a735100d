//! In-memory transport and bus for tests and demos
//!
//! [`MemoryTransport`] keeps one partitioned queue per endpoint name with
//! at-least-once semantics: received records stay in flight until committed,
//! and rolled back or abandoned records return to the queue in their original
//! order.
//!
//! Records carrying an `x-message-id` are assigned to a partition by hashing
//! it, so every chunk of a message lands on the same partition; other records
//! are spread round robin. A partition is claimed by the first consumer that
//! receives from it and stays with that consumer until it disconnects.

use crate::broker::{ConsumerClient, ProducerClient, Transport};
use crate::bus::{BusMessage, InboundMessage, MessageBus};
use crate::endpoint::{ClientConfig, Endpoint};
use crate::envelope::Envelope;
use crate::message::{header_names, Offset};
use crate::{HandlerError, IntegrationError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

/// Partitions per endpoint unless configured otherwise
pub const DEFAULT_PARTITIONS: usize = 4;

#[derive(Debug, Clone)]
struct StoredRecord {
    sequence: u64,
    partition: usize,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct TopicState {
    queue: VecDeque<StoredRecord>,
    log: Vec<Envelope>,
    next_sequence: u64,
    next_member: u64,
    committed: usize,
    closed: bool,
    /// Partition -> consumer member currently assigned to it
    owners: HashMap<usize, u64>,
}

impl TopicState {
    /// Take up to `max` queued records from partitions owned by `member`,
    /// claiming unowned partitions on the way
    fn take_for(&mut self, member: u64, max: usize) -> Vec<StoredRecord> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());

        for record in std::mem::take(&mut self.queue) {
            if taken.len() < max && *self.owners.entry(record.partition).or_insert(member) == member
            {
                taken.push(record);
            } else {
                kept.push_back(record);
            }
        }

        self.queue = kept;
        taken
    }

    fn requeue(&mut self, records: Vec<StoredRecord>) {
        self.queue.extend(records);
        self.queue
            .make_contiguous()
            .sort_by_key(|record| record.sequence);
    }

    fn release(&mut self, member: u64) {
        self.owners.retain(|_, owner| *owner != member);
    }
}

#[derive(Debug)]
struct Topic {
    name: String,
    partitions: usize,
    state: Mutex<TopicState>,
    notify: Notify,
}

impl Topic {
    fn new(name: &str, partitions: usize) -> Self {
        Self {
            name: name.to_string(),
            partitions,
            state: Mutex::new(TopicState::default()),
            notify: Notify::new(),
        }
    }

    fn partition_for(&self, envelope: &Envelope, sequence: u64) -> usize {
        match envelope.headers.get(header_names::MESSAGE_ID) {
            Some(message_id) => {
                let mut hasher = DefaultHasher::new();
                message_id.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as usize
            }
            None => (sequence % self.partitions as u64) as usize,
        }
    }

    fn append(&self, mut envelope: Envelope) -> Offset {
        let offset = {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;

            let partition = self.partition_for(&envelope, sequence);
            let offset = Offset::new(format!("{}[{}]", self.name, partition), sequence);
            envelope.source = self.name.clone();
            envelope.offset = Some(offset.clone());
            state.log.push(envelope.clone());
            state.queue.push_back(StoredRecord {
                sequence,
                partition,
                envelope,
            });
            offset
        };
        self.notify.notify_waiters();
        offset
    }

    fn join(&self) -> u64 {
        let mut state = self.state.lock();
        let member = state.next_member;
        state.next_member += 1;
        member
    }
}

#[derive(Debug)]
struct Topics {
    topics: DashMap<String, Arc<Topic>>,
    partitions: usize,
}

impl Topics {
    fn get(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.get(name) {
            return topic.value().clone();
        }
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(name, self.partitions)))
            .value()
            .clone()
    }
}

/// Transport keeping every endpoint in process memory
#[derive(Debug)]
pub struct MemoryTransport {
    topics: Arc<Topics>,
    producers_created: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a transport whose endpoints have `partitions` partitions each
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            topics: Arc::new(Topics {
                topics: DashMap::new(),
                partitions: partitions.max(1),
            }),
            producers_created: AtomicUsize::new(0),
        }
    }

    /// Append a raw record to an endpoint, bypassing any producer
    pub fn push(&self, endpoint: &str, envelope: Envelope) -> Offset {
        self.topics.get(endpoint).append(envelope)
    }

    /// Every record ever appended to the endpoint, with its offset
    pub fn published(&self, endpoint: &str) -> Vec<Envelope> {
        self.topics.get(endpoint).state.lock().log.clone()
    }

    /// Records committed by consumers of the endpoint
    pub fn committed_count(&self, endpoint: &str) -> usize {
        self.topics.get(endpoint).state.lock().committed
    }

    /// Records waiting to be received
    pub fn pending_count(&self, endpoint: &str) -> usize {
        self.topics.get(endpoint).state.lock().queue.len()
    }

    /// Close the endpoint; consumers stop once it is drained
    pub fn close(&self, endpoint: &str) {
        let topic = self.topics.get(endpoint);
        topic.state.lock().closed = true;
        topic.notify.notify_waiters();
    }

    /// Native producer clients created so far
    pub fn producers_created(&self) -> usize {
        self.producers_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_producer_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn ProducerClient>> {
        let id = self.producers_created.fetch_add(1, Ordering::SeqCst);
        debug!("Creating in-memory producer client {} for {:?}", id, config);
        Ok(Arc::new(MemoryProducerClient {
            id,
            topics: self.topics.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_consumer_client(&self, endpoint: &Endpoint) -> Result<Box<dyn ConsumerClient>> {
        let topic = self.topics.get(endpoint.name());
        let member = topic.join();
        Ok(Box::new(MemoryConsumerClient {
            topic,
            member,
            in_flight: Vec::new(),
            connected: false,
        }))
    }
}

#[derive(Debug)]
pub struct MemoryProducerClient {
    id: usize,
    topics: Arc<Topics>,
    closed: AtomicBool,
}

impl MemoryProducerClient {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProducerClient for MemoryProducerClient {
    async fn produce(&self, envelope: Envelope) -> Result<Offset> {
        if self.is_closed() {
            return Err(IntegrationError::ProducerClosed(envelope.source));
        }
        Ok(self.topics.get(&envelope.source).append(envelope))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MemoryConsumerClient {
    topic: Arc<Topic>,
    member: u64,
    in_flight: Vec<StoredRecord>,
    connected: bool,
}

impl MemoryConsumerClient {
    fn take_in_flight(&mut self, offsets: &[Offset]) -> Vec<StoredRecord> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|record| {
                record
                    .envelope
                    .offset
                    .as_ref()
                    .is_some_and(|offset| offsets.contains(offset))
            });
        self.in_flight = kept;
        taken
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumerClient {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn receive(&mut self, max: usize) -> Result<Option<Vec<Envelope>>> {
        if !self.connected {
            return Err(IntegrationError::transport(format!(
                "consumer of '{}' is not connected",
                self.topic.name
            )));
        }

        loop {
            let notified = self.topic.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.topic.state.lock();
                let records = state.take_for(self.member, max.max(1));
                if !records.is_empty() {
                    drop(state);

                    let batch = records.iter().map(|r| r.envelope.clone()).collect();
                    self.in_flight.extend(records);
                    return Ok(Some(batch));
                }
                if state.closed && state.queue.is_empty() {
                    return Ok(None);
                }
            }

            notified.await;
        }
    }

    async fn commit(&mut self, offsets: &[Offset]) -> Result<()> {
        let committed = self.take_in_flight(offsets).len();
        self.topic.state.lock().committed += committed;
        Ok(())
    }

    async fn rollback(&mut self, offsets: &[Offset]) -> Result<()> {
        let records = self.take_in_flight(offsets);
        if !records.is_empty() {
            self.topic.state.lock().requeue(records);
            self.topic.notify.notify_waiters();
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let records = std::mem::take(&mut self.in_flight);
        {
            let mut state = self.topic.state.lock();
            state.requeue(records);
            state.release(self.member);
        }
        self.topic.notify.notify_waiters();
        self.connected = false;
        Ok(())
    }
}

/// Error returned by a [`RecordingBus`] that is set up to fail
#[derive(Debug, thiserror::Error)]
#[error("bus rejected publish call {call}")]
pub struct TransientBusError {
    pub call: usize,
}

/// Bus that records what it receives and can fail on demand
#[derive(Debug, Default)]
pub struct RecordingBus {
    published: Mutex<Vec<BusMessage>>,
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` publish calls
    pub fn failing_times(n: usize) -> Self {
        let bus = Self::new();
        bus.failures_left.store(n, Ordering::SeqCst);
        bus
    }

    pub fn always_failing() -> Self {
        let bus = Self::new();
        bus.always_fail.store(true, Ordering::SeqCst);
        bus
    }

    /// Stop failing from now on
    pub fn recover(&self) {
        self.always_fail.store(false, Ordering::SeqCst);
        self.failures_left.store(0, Ordering::SeqCst);
    }

    /// Messages from successful publish calls
    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().clone()
    }

    /// Inbound wrappers from successful publish calls
    pub fn inbound(&self) -> Vec<InboundMessage> {
        self.published
            .lock()
            .iter()
            .filter_map(|m| m.as_inbound().cloned())
            .collect()
    }

    /// Every publish call, successful or not
    pub fn publish_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MessageBus for RecordingBus {
    fn publish(&self, messages: &[BusMessage]) -> std::result::Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let fail = self.always_fail.load(Ordering::SeqCst)
            || self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            return Err(Box::new(TransientBusError { call }));
        }

        self.published.lock().extend_from_slice(messages);
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
