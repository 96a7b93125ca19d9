//! # Connection Manager
//!
//! In-memory registry of live streaming connections, partitioned by
//! consultation.
//!
//! ## Locking
//!
//! The partition map is locked only to find or create a partition. All
//! work for one consultation (connect, send, close) runs while holding
//! that consultation's partition lock, so for a given consultation:
//!
//! - messages are persisted and fanned out in one order, seen by everyone
//! - a new connection's history snapshot and its registration are atomic
//!   with respect to sends: no duplicates, no gaps
//!
//! Unrelated consultations never contend. Lock order is partition, then
//! map. A partition whose last handle goes away is marked retired and
//! removed from the map; anyone who locked it in the meantime retries
//! with a fresh one.
//!
//! Fan-out never waits on a connection. Each handle has a bounded
//! outbound queue; a handle whose queue is full or whose receiver is
//! gone is dropped from the registry and its connection winds down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frames::OutboundFrame;
use crate::consultation::{
    Consultation, Message, MessageLog, SessionError, SessionRegistry, SessionResult,
};
use crate::observability::Event;
use crate::store::Store;

/// Default capacity of each connection's outbound queue
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

struct LiveHandle {
    participant_id: Uuid,
    handle_id: u64,
    sender: mpsc::Sender<OutboundFrame>,
}

#[derive(Default)]
struct Partition {
    handles: Vec<LiveHandle>,
    /// Removed from the map; must not be used again
    retired: bool,
}

impl Partition {
    /// Offer the frame to every handle in one pass. Returns
    /// `(delivered, dropped)`.
    fn fan_out(&mut self, consultation_id: Uuid, frame: &OutboundFrame) -> (usize, usize) {
        let before = self.handles.len();
        self.handles
            .retain(|handle| match handle.sender.try_send(frame.clone()) {
                Ok(()) => true,
                Err(e) => {
                    let reason = match e {
                        TrySendError::Full(_) => "outbound queue full",
                        TrySendError::Closed(_) => "connection gone",
                    };
                    warn!(
                        event = %Event::HandleDropped,
                        consultation_id = %consultation_id,
                        participant_id = %handle.participant_id,
                        handle_id = handle.handle_id,
                        reason,
                        "Dropping live connection"
                    );
                    false
                }
            });
        let delivered = self.handles.len();
        (delivered, before - delivered)
    }
}

fn lock(partition: &Mutex<Partition>) -> MutexGuard<'_, Partition> {
    partition.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The message as persisted
    pub message: Message,
    /// Handles that accepted the frame
    pub delivered: usize,
    /// Handles dropped during this fan-out
    pub dropped: usize,
}

/// Live connection registry with ordered fan-out
pub struct ConnectionManager<S> {
    registry: Arc<SessionRegistry<S>>,
    log: Arc<MessageLog<S>>,
    partitions: RwLock<HashMap<Uuid, Arc<Mutex<Partition>>>>,
    next_handle: AtomicU64,
    outbound_buffer: usize,
}

impl<S: Store> ConnectionManager<S> {
    pub fn new(
        registry: Arc<SessionRegistry<S>>,
        log: Arc<MessageLog<S>>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            registry,
            log,
            partitions: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    fn partition(&self, consultation_id: Uuid) -> Arc<Mutex<Partition>> {
        if let Some(partition) = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&consultation_id)
        {
            return partition.clone();
        }
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(consultation_id)
            .or_default()
            .clone()
    }

    /// Remove a retired partition, unless it was already replaced
    fn forget(&self, consultation_id: Uuid, partition: &Arc<Mutex<Partition>>) {
        let mut map = self.partitions.write().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(&consultation_id)
            .is_some_and(|current| Arc::ptr_eq(current, partition))
        {
            map.remove(&consultation_id);
        }
    }

    /// Run `op` under the consultation's exclusive section. Partitions
    /// left without handles are retired on the way out.
    fn with_partition<T>(&self, consultation_id: Uuid, op: impl FnOnce(&mut Partition) -> T) -> T {
        let mut op = Some(op);
        loop {
            let partition = self.partition(consultation_id);
            let mut slot = lock(&partition);
            match op.take() {
                Some(run) if !slot.retired => {
                    let result = run(&mut *slot);
                    if slot.handles.is_empty() {
                        slot.retired = true;
                        drop(slot);
                        self.forget(consultation_id, &partition);
                    }
                    return result;
                }
                pending => {
                    op = pending;
                    drop(slot);
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Register a live connection.
    ///
    /// The caller has already authenticated the participant. Fails with
    /// `SessionClosed` if the consultation is no longer active. The
    /// returned history is exactly what was persisted before the handle
    /// became visible to fan-out.
    pub fn connect(
        self: &Arc<Self>,
        consultation_id: Uuid,
        participant_id: Uuid,
    ) -> SessionResult<Connection<S>> {
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);
        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);

        let history = self.with_partition(consultation_id, |partition| -> SessionResult<_> {
            let consultation = self.registry.find(consultation_id)?;
            self.registry.authorize(&consultation, participant_id)?;
            if !consultation.is_active() {
                return Err(SessionError::SessionClosed);
            }
            let history = self.log.history(consultation_id)?;
            partition.handles.push(LiveHandle {
                participant_id,
                handle_id,
                sender,
            });
            Ok(history)
        })?;

        info!(
            event = %Event::ConnectionOpened,
            consultation_id = %consultation_id,
            participant_id = %participant_id,
            handle_id,
            "Connection registered"
        );

        Ok(Connection {
            history,
            receiver,
            guard: ConnectionGuard {
                manager: Arc::clone(self),
                consultation_id,
                participant_id,
                handle_id,
            },
        })
    }

    /// Remove exactly one handle. Idempotent; returns whether it was
    /// still registered.
    pub fn disconnect(&self, consultation_id: Uuid, participant_id: Uuid, handle_id: u64) -> bool {
        let Some(partition) = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&consultation_id)
            .cloned()
        else {
            return false;
        };

        let mut slot = lock(&partition);
        let before = slot.handles.len();
        slot.handles
            .retain(|h| !(h.handle_id == handle_id && h.participant_id == participant_id));
        let removed = slot.handles.len() < before;

        if slot.handles.is_empty() && !slot.retired {
            slot.retired = true;
            drop(slot);
            self.forget(consultation_id, &partition);
        }
        removed
    }

    /// Persist a message, then deliver it to every live connection of
    /// the consultation, the sender's own included.
    ///
    /// Nothing is delivered if persistence fails.
    pub fn send(&self, consultation_id: Uuid, sender_id: Uuid, content: &str) -> SessionResult<DeliveryReport> {
        self.with_partition(consultation_id, |partition| -> SessionResult<_> {
            let message = self.log.append(consultation_id, sender_id, content)?;
            let (delivered, dropped) =
                partition.fan_out(consultation_id, &OutboundFrame::from(&message));
            debug!(
                consultation_id = %consultation_id,
                message_id = %message.id,
                delivered,
                dropped,
                "Message fanned out"
            );
            Ok(DeliveryReport {
                message,
                delivered,
                dropped,
            })
        })
    }

    /// Complete the consultation and broadcast the closing notice.
    ///
    /// Serialized with sends, so no message can be delivered after the
    /// notice.
    pub fn close(&self, consultation_id: Uuid, caller_id: Uuid) -> SessionResult<Consultation> {
        self.with_partition(consultation_id, |partition| -> SessionResult<_> {
            let (consultation, notice) = self.registry.close(consultation_id, caller_id)?;
            partition.fan_out(consultation_id, &OutboundFrame::from(&notice));
            Ok(consultation)
        })
    }

    /// Live handles registered for a consultation
    pub fn live_handles(&self, consultation_id: Uuid) -> usize {
        let Some(partition) = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&consultation_id)
            .cloned()
        else {
            return 0;
        };
        let slot = lock(&partition);
        slot.handles.len()
    }

    /// Consultations with at least one partition in the map
    pub fn partition_count(&self) -> usize {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// An accepted connection: its history snapshot, its outbound queue, and
/// the guard that unregisters it
pub struct Connection<S: Store> {
    pub history: Vec<Message>,
    pub receiver: mpsc::Receiver<OutboundFrame>,
    pub guard: ConnectionGuard<S>,
}

/// Unregisters its handle when dropped, whatever ended the connection
pub struct ConnectionGuard<S: Store> {
    manager: Arc<ConnectionManager<S>>,
    consultation_id: Uuid,
    participant_id: Uuid,
    handle_id: u64,
}

impl<S: Store> ConnectionGuard<S> {
    pub fn consultation_id(&self) -> Uuid {
        self.consultation_id
    }

    pub fn participant_id(&self) -> Uuid {
        self.participant_id
    }

    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    /// Send as this connection's participant
    pub fn send(&self, content: &str) -> SessionResult<DeliveryReport> {
        self.manager
            .send(self.consultation_id, self.participant_id, content)
    }
}

impl<S: Store> Drop for ConnectionGuard<S> {
    fn drop(&mut self) {
        let was_live =
            self.manager
                .disconnect(self.consultation_id, self.participant_id, self.handle_id);
        info!(
            event = %Event::ConnectionClosed,
            consultation_id = %self.consultation_id,
            participant_id = %self.participant_id,
            handle_id = self.handle_id,
            was_live,
            "Connection unregistered"
        );
    }
}
