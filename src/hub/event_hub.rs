//! Mailbox event hub.
//!
//! Connects mail ingestion (producers) to inbox viewers (consumers). The
//! registry of live viewers is owned by a single control loop fed by the
//! register, unregister and broadcast channels. The mailbox subscription map
//! sits behind its own lock so concurrent `notify` calls never wait on the
//! loop.
//!
//! The registry holds the only strong sender of each viewer queue; the
//! subscription map and [`Viewer`] handles hold weak ones. Dropping a viewer
//! from the registry therefore closes its queue, which ends its write pump.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::ServerMessage;

/// Default capacity of each viewer's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// Capacity of the register/unregister channels.
const CONTROL_CAPACITY: usize = 64;

/// A viewer connection as seen by its own pumps.
#[derive(Debug, Clone)]
pub struct Viewer {
    id: Uuid,
    queue: mpsc::WeakSender<String>,
}

impl Viewer {
    /// Unique viewer ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the hub still holds this viewer's queue open.
    pub fn is_connected(&self) -> bool {
        self.queue.upgrade().is_some()
    }
}

struct Registration {
    id: Uuid,
    queue: mpsc::Sender<String>,
}

/// mailbox -> viewers, plus the reverse index enforcing one mailbox per viewer.
#[derive(Default)]
struct Subscriptions {
    by_mailbox: HashMap<String, HashMap<Uuid, mpsc::WeakSender<String>>>,
    by_viewer: HashMap<Uuid, String>,
}

impl Subscriptions {
    fn insert(&mut self, viewer: &Viewer, mailbox: &str) {
        if self.by_viewer.get(&viewer.id).map(String::as_str) == Some(mailbox) {
            return;
        }
        self.remove(viewer.id);

        self.by_viewer.insert(viewer.id, mailbox.to_string());
        self.by_mailbox
            .entry(mailbox.to_string())
            .or_default()
            .insert(viewer.id, viewer.queue.clone());
    }

    fn remove(&mut self, id: Uuid) -> Option<String> {
        let mailbox = self.by_viewer.remove(&id)?;
        if let Some(viewers) = self.by_mailbox.get_mut(&mailbox) {
            viewers.remove(&id);
            if viewers.is_empty() {
                self.by_mailbox.remove(&mailbox);
            }
        }
        Some(mailbox)
    }
}

/// Handle to the event hub, cheap to clone and share.
#[derive(Clone)]
pub struct MailboxHub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<Uuid>,
    broadcast_tx: mpsc::Sender<String>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    viewers: Arc<AtomicUsize>,
    queue_capacity: usize,
}

/// The hub's control loop. Run it with [`HubLoop::run`].
pub struct HubLoop {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<Uuid>,
    broadcast_rx: mpsc::Receiver<String>,
    subscriptions: Arc<RwLock<Subscriptions>>,
    viewers: Arc<AtomicUsize>,
    registry: HashMap<Uuid, mpsc::Sender<String>>,
}

impl MailboxHub {
    /// Create a hub and its (not yet running) control loop.
    pub fn new(queue_capacity: usize) -> (Self, HubLoop) {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let subscriptions = Arc::new(RwLock::new(Subscriptions::default()));
        let viewers = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            subscriptions: Arc::clone(&subscriptions),
            viewers: Arc::clone(&viewers),
            queue_capacity: queue_capacity.max(1),
        };
        let control = HubLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            subscriptions,
            viewers,
            registry: HashMap::new(),
        };
        (hub, control)
    }

    /// Create a hub and spawn its control loop on the current runtime.
    ///
    /// The loop ends once every clone of the hub is dropped.
    pub fn spawn(queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (hub, control) = Self::new(queue_capacity);
        let handle = tokio::spawn(control.run());
        (hub, handle)
    }

    /// Admit a new viewer with no subscription.
    ///
    /// Returns the viewer handle and the receiving end of its outbound queue.
    pub async fn register(&self) -> (Viewer, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let viewer = Viewer {
            id: Uuid::new_v4(),
            queue: tx.downgrade(),
        };

        let registration = Registration {
            id: viewer.id,
            queue: tx,
        };
        if self.register_tx.send(registration).await.is_err() {
            // The queue is dropped with the registration and reads as closed
            warn!("Hub loop is not running; viewer {} rejected", viewer.id);
        }
        (viewer, rx)
    }

    /// Remove a viewer and its subscription, closing its outbound queue.
    pub async fn unregister(&self, viewer: &Viewer) {
        if let Some(mailbox) = self.subscriptions.write().await.remove(viewer.id) {
            debug!("Viewer {} left {}", viewer.id, mailbox);
        }
        if self.unregister_tx.send(viewer.id).await.is_err() {
            debug!("Hub loop already stopped while unregistering {}", viewer.id);
        }
    }

    /// Subscribe `viewer` to `mailbox`, replacing its previous subscription.
    pub async fn subscribe(&self, viewer: &Viewer, mailbox: &str) {
        if !viewer.is_connected() {
            return;
        }
        self.subscriptions.write().await.insert(viewer, mailbox);
        debug!("Viewer {} subscribed to {}", viewer.id, mailbox);
    }

    /// Drop the subscription of `viewer` if it is currently `mailbox`.
    ///
    /// Returns false for stale requests naming another mailbox.
    pub async fn unsubscribe(&self, viewer: &Viewer, mailbox: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.by_viewer.get(&viewer.id).map(String::as_str) != Some(mailbox) {
            return false;
        }
        subscriptions.remove(viewer.id);
        debug!("Viewer {} unsubscribed from {}", viewer.id, mailbox);
        true
    }

    /// Enqueue a `new_email` event for every viewer of `mailbox`.
    ///
    /// Never blocks: a full queue loses the event. Returns the number of
    /// viewers the event was queued for.
    pub async fn notify(&self, mailbox: &str, message_id: &str) -> usize {
        let frame = match ServerMessage::new_email(mailbox, message_id).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode event for {}: {}", mailbox, e);
                return 0;
            }
        };

        let subscriptions = self.subscriptions.read().await;
        let Some(viewers) = subscriptions.by_mailbox.get(mailbox) else {
            return 0;
        };

        let mut queued = 0;
        for (id, queue) in viewers {
            let Some(queue) = queue.upgrade() else {
                continue;
            };
            match queue.try_send(frame.clone()) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Queue of viewer {} is full; dropping event for {}", id, mailbox)
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        queued
    }

    /// Send `frame` to every registered viewer.
    ///
    /// Viewers whose queue is full are disconnected. Ingestion never calls
    /// this; per-mailbox events go through [`notify`](Self::notify).
    pub async fn broadcast(&self, frame: String) {
        if self.broadcast_tx.send(frame).await.is_err() {
            warn!("Hub loop is not running; broadcast dropped");
        }
    }

    /// Number of viewers subscribed to `mailbox`.
    pub async fn subscriber_count(&self, mailbox: &str) -> usize {
        self.subscriptions
            .read()
            .await
            .by_mailbox
            .get(mailbox)
            .map_or(0, HashMap::len)
    }

    /// Mailbox `viewer` is currently subscribed to.
    pub async fn subscription_of(&self, viewer: &Viewer) -> Option<String> {
        self.subscriptions
            .read()
            .await
            .by_viewer
            .get(&viewer.id)
            .cloned()
    }

    /// Number of registered viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }
}

impl HubLoop {
    /// Process registry events until every hub handle is dropped.
    pub async fn run(mut self) {
        info!("Mailbox hub started");
        loop {
            tokio::select! {
                // A registration is always queued before its unregistration
                biased;
                Some(registration) = self.register_rx.recv() => {
                    self.registry.insert(registration.id, registration.queue);
                    self.update_count();
                }
                Some(id) = self.unregister_rx.recv() => {
                    if self.registry.remove(&id).is_some() {
                        self.subscriptions.write().await.remove(id);
                        self.update_count();
                    }
                }
                Some(frame) = self.broadcast_rx.recv() => {
                    self.broadcast(frame).await;
                }
                else => break,
            }
        }
        info!("Mailbox hub stopped");
    }

    async fn broadcast(&mut self, frame: String) {
        let mut dropped = Vec::new();
        for (id, queue) in &self.registry {
            match queue.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Viewer {} is not keeping up; disconnecting", id);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        if dropped.is_empty() {
            return;
        }
        let mut subscriptions = self.subscriptions.write().await;
        for id in dropped {
            self.registry.remove(&id);
            subscriptions.remove(id);
        }
        drop(subscriptions);
        self.update_count();
    }

    fn update_count(&self) {
        self.viewers.store(self.registry.len(), Ordering::Relaxed);
    }
}
