//! In-process broker double
//!
//! Behaves like a single-node broker for the operations the pipeline uses:
//! FIFO queues with a durability flag, per-channel prefetch accounting,
//! manual ack/reject, and redelivery of unsettled messages when their
//! channel's connection closes. Every disposition is recorded so tests can
//! assert on acknowledgment discipline.

use super::{
    BrokerConnection, BrokerError, Delivery, DeliveryTag, QueueChannel, QueueHandle, Result,
    SubscribeOptions, Subscription,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::debug;

/// Terminal outcome recorded for a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack(DeliveryTag),
    Reject { tag: DeliveryTag, requeue: bool },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    persistent: bool,
    redelivered: bool,
}

#[derive(Debug)]
struct MemoryQueue {
    durable: bool,
    messages: VecDeque<StoredMessage>,
}

#[derive(Debug)]
struct Unsettled {
    queue: String,
    channel_id: u64,
    message: StoredMessage,
}

#[derive(Debug)]
struct ChannelState {
    connection_id: u64,
    open: bool,
}

#[derive(Debug)]
struct BrokerState {
    reachable: bool,
    queues: HashMap<String, MemoryQueue>,
    channels: HashMap<u64, ChannelState>,
    unsettled: HashMap<DeliveryTag, Unsettled>,
    dispositions: Vec<Disposition>,
    open_connections: usize,
    max_in_flight: usize,
    next_id: u64,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            reachable: true,
            queues: HashMap::new(),
            channels: HashMap::new(),
            unsettled: HashMap::new(),
            dispositions: Vec::new(),
            open_connections: 0,
            max_in_flight: 0,
            next_id: 1,
        }
    }
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn in_flight(&self, channel_id: u64) -> usize {
        self.unsettled
            .values()
            .filter(|u| u.channel_id == channel_id)
            .count()
    }

    fn channel_open(&self, channel_id: u64) -> bool {
        self.channels.get(&channel_id).is_some_and(|c| c.open)
    }
}

/// Shared broker handle; clones refer to the same broker
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            changes: Arc::new(changes),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // A panicking test thread must not wedge every other handle
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Make subsequent connection attempts fail (or succeed again)
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    /// Messages waiting in `queue`, not counting unsettled deliveries
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.messages.len())
    }

    pub fn queue_durable(&self, queue: &str) -> Option<bool> {
        self.lock().queues.get(queue).map(|q| q.durable)
    }

    /// Payloads waiting in `queue`, with their persistence flag, front first
    pub fn pending_messages(&self, queue: &str) -> Vec<(Vec<u8>, bool)> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| {
                q.messages
                    .iter()
                    .map(|m| (m.payload.clone(), m.persistent))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn unsettled_count(&self) -> usize {
        self.lock().unsettled.len()
    }

    pub fn dispositions(&self) -> Vec<Disposition> {
        self.lock().dispositions.clone()
    }

    /// Highest number of unsettled deliveries ever held by one channel
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Wait until at least `count` dispositions have been recorded
    pub async fn wait_for_dispositions(&self, count: usize) {
        let mut changes = self.changes.subscribe();
        loop {
            changes.borrow_and_update();
            if self.lock().dispositions.len() >= count {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    fn connect(&self) -> Result<u64> {
        let mut state = self.lock();
        if !state.reachable {
            return Err(BrokerError::Connect("broker unreachable".to_string()));
        }
        state.open_connections += 1;
        Ok(state.next_id())
    }

    fn open_channel(&self, connection_id: u64) -> u64 {
        let mut state = self.lock();
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection_id,
                open: true,
            },
        );
        id
    }

    /// Close every channel of the connection and return their unsettled
    /// messages to the front of their queues, flagged as redelivered.
    fn disconnect(&self, connection_id: u64) {
        {
            let mut state = self.lock();
            state.open_connections = state.open_connections.saturating_sub(1);

            let closed: Vec<u64> = state
                .channels
                .iter_mut()
                .filter(|(_, c)| c.connection_id == connection_id && c.open)
                .map(|(id, c)| {
                    c.open = false;
                    *id
                })
                .collect();

            let mut orphaned: Vec<DeliveryTag> = state
                .unsettled
                .iter()
                .filter(|(_, u)| closed.contains(&u.channel_id))
                .map(|(tag, _)| *tag)
                .collect();
            // Restore original order: lowest tag ends up at the front
            orphaned.sort_unstable_by(|a, b| b.cmp(a));

            for tag in orphaned {
                if let Some(unsettled) = state.unsettled.remove(&tag) {
                    let mut message = unsettled.message;
                    message.redelivered = true;
                    if let Some(queue) = state.queues.get_mut(&unsettled.queue) {
                        queue.messages.push_front(message);
                    }
                }
            }
        }
        self.notify();
    }

    fn declare(&self, channel_id: u64, name: &str, durable: bool) -> Result<QueueHandle> {
        let mut state = self.lock();
        if !state.channel_open(channel_id) {
            return Err(BrokerError::NotConnected);
        }

        let queue = state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| MemoryQueue {
                durable,
                messages: VecDeque::new(),
            });

        if queue.durable != durable {
            return Err(BrokerError::Declare {
                queue: name.to_string(),
                reason: format!(
                    "PRECONDITION_FAILED - inequivalent arg 'durable': existing {}, requested {}",
                    queue.durable, durable
                ),
            });
        }

        Ok(QueueHandle {
            name: name.to_string(),
            durable,
        })
    }

    fn push(&self, channel_id: u64, queue: &str, payload: &[u8], persistent: bool) -> Result<()> {
        {
            let mut state = self.lock();
            if !state.channel_open(channel_id) {
                return Err(BrokerError::NotConnected);
            }

            let queue = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::Publish(format!("no queue '{}'", queue)))?;

            queue.messages.push_back(StoredMessage {
                payload: payload.to_vec(),
                persistent,
                redelivered: false,
            });
        }
        self.notify();
        Ok(())
    }

    fn try_deliver(&self, channel_id: u64, queue: &str, prefetch: u16, manual_ack: bool) -> Poll {
        let mut state = self.lock();
        if !state.channel_open(channel_id) {
            return Poll::Closed;
        }

        // prefetch 0 means unlimited, as in AMQP
        if manual_ack && prefetch > 0 && state.in_flight(channel_id) >= usize::from(prefetch) {
            return Poll::Pending;
        }

        let Some(message) = state.queues.get_mut(queue).and_then(|q| q.messages.pop_front())
        else {
            return Poll::Pending;
        };

        let tag = state.next_id();
        let delivery = Delivery {
            tag,
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };

        if manual_ack {
            state.unsettled.insert(
                tag,
                Unsettled {
                    queue: queue.to_string(),
                    channel_id,
                    message,
                },
            );
            let in_flight = state.in_flight(channel_id);
            state.max_in_flight = state.max_in_flight.max(in_flight);
        }

        debug!(tag, queue, "Memory broker delivered message");
        Poll::Ready(delivery)
    }

    fn settle(&self, channel_id: u64, tag: DeliveryTag, disposition: Disposition) -> Result<()> {
        {
            let mut state = self.lock();
            if !state.channel_open(channel_id) {
                return Err(BrokerError::NotConnected);
            }

            let owned_here = state
                .unsettled
                .get(&tag)
                .is_some_and(|u| u.channel_id == channel_id);
            if !owned_here {
                return Err(BrokerError::UnknownDeliveryTag(tag));
            }

            let Some(unsettled) = state.unsettled.remove(&tag) else {
                return Err(BrokerError::UnknownDeliveryTag(tag));
            };

            if let Disposition::Reject { requeue: true, .. } = disposition {
                let mut message = unsettled.message;
                message.redelivered = true;
                if let Some(queue) = state.queues.get_mut(&unsettled.queue) {
                    queue.messages.push_front(message);
                }
            }

            state.dispositions.push(disposition);
        }
        self.notify();
        Ok(())
    }
}

enum Poll {
    Ready(Delivery),
    Pending,
    Closed,
}

/// Connection to a [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    id: Option<u64>,
}

impl MemoryConnection {
    pub async fn connect(broker: &MemoryBroker) -> Result<Self> {
        let id = broker.connect()?;
        Ok(Self {
            broker: broker.clone(),
            id: Some(id),
        })
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    type Channel = MemoryChannel;

    fn is_connected(&self) -> bool {
        self.id.is_some()
    }

    async fn create_channel(&self) -> Result<MemoryChannel> {
        let connection_id = self.id.ok_or(BrokerError::NotConnected)?;
        Ok(MemoryChannel {
            broker: self.broker.clone(),
            id: self.broker.open_channel(connection_id),
        })
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(id) = self.id.take() {
            self.broker.disconnect(id);
        }
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.close().await?;
        self.id = Some(self.broker.connect()?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    type Subscription = MemorySubscription;

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<QueueHandle> {
        self.broker.declare(self.id, name, durable)
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8], persistent: bool) -> Result<()> {
        self.broker.push(self.id, &queue.name, payload, persistent)
    }

    async fn subscribe(
        &self,
        queue: &QueueHandle,
        options: SubscribeOptions,
    ) -> Result<MemorySubscription> {
        if !self.broker.lock().channel_open(self.id) {
            return Err(BrokerError::NotConnected);
        }

        Ok(MemorySubscription {
            broker: self.broker.clone(),
            channel_id: self.id,
            queue: queue.name.clone(),
            prefetch: options.prefetch,
            manual_ack: options.manual_ack,
            changes: self.broker.changes.subscribe(),
        })
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        self.broker.settle(self.id, tag, Disposition::Ack(tag))
    }

    async fn reject(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        self.broker
            .settle(self.id, tag, Disposition::Reject { tag, requeue })
    }
}

pub struct MemorySubscription {
    broker: MemoryBroker,
    channel_id: u64,
    queue: String,
    prefetch: u16,
    manual_ack: bool,
    changes: watch::Receiver<u64>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        loop {
            self.changes.borrow_and_update();
            match self
                .broker
                .try_deliver(self.channel_id, &self.queue, self.prefetch, self.manual_ack)
            {
                Poll::Ready(delivery) => return Some(Ok(delivery)),
                Poll::Closed => return None,
                Poll::Pending => {}
            }

            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }
}
