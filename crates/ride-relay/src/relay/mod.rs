//! Presence and ride-event relay: session handles, fan-out and the per-session inbox.

mod locations;
mod registry;
mod router;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::mpsc;

use shared::{ServerEvent, SessionId};

pub use locations::LocationStore;
pub use registry::ConnectionRegistry;
pub use router::{DropReason, EventRouter, Outcome, RouterOptions, Session};

/// Event fanned out to every connected session, tagged with the session that caused it.
#[derive(Debug)]
pub struct BroadcastMessage {
    pub origin: SessionId,
    pub event: ServerEvent,
}

/// Relay state: broadcast channel for location fan-out.
#[derive(Clone)]
pub struct RelayState {
    tx: broadcast::Sender<Arc<BroadcastMessage>>,
}

impl RelayState {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastMessage>> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Returns the number of subscribed sessions, the origin included.
    pub fn broadcast(&self, msg: BroadcastMessage) -> usize {
        self.tx.send(Arc::new(msg)).unwrap_or(0)
    }
}

/// Addressable reference to one live connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    direct: mpsc::Sender<ServerEvent>,
}

impl SessionHandle {
    /// New handle plus the receiving end of its addressed-delivery queue.
    pub(crate) fn pair(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (direct, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: SessionId::new(),
                direct,
            },
            rx,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Non-blocking; a full or closed queue hands the event back.
    pub(crate) fn deliver(
        &self,
        event: ServerEvent,
    ) -> Result<(), mpsc::error::TrySendError<ServerEvent>> {
        self.direct.try_send(event)
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

/// Everything one session should receive: replayed state, fan-out from other sessions, and
/// events addressed to it.
pub struct Inbox {
    session: SessionId,
    backlog: VecDeque<ServerEvent>,
    fanout: broadcast::Receiver<Arc<BroadcastMessage>>,
    direct: mpsc::Receiver<ServerEvent>,
}

impl Inbox {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Next event for this session. `None` once the relay is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            tokio::select! {
                biased;
                Some(event) = self.direct.recv() => return Some(event),
                res = self.fanout.recv() => match res {
                    Ok(msg) if msg.origin == self.session => continue,
                    Ok(msg) => return Some(msg.event.clone()),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(session = %self.session, skipped, "inbox lagged, location updates dropped");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Next event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        if let Ok(event) = self.direct.try_recv() {
            return Some(event);
        }
        loop {
            match self.fanout.try_recv() {
                Ok(msg) if msg.origin == self.session => continue,
                Ok(msg) => return Some(msg.event.clone()),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(session = %self.session, skipped, "inbox lagged, location updates dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Identity, LocationPayload};

    fn update(user: &str) -> ServerEvent {
        ServerEvent::LocationUpdate(LocationPayload {
            user_id: Identity::new(user).unwrap(),
            latitude: Some(1.0),
            longitude: Some(2.0),
        })
    }

    fn inbox(relay: &RelayState) -> (SessionHandle, Inbox) {
        let (handle, direct) = SessionHandle::pair(4);
        let inbox = Inbox {
            session: handle.id(),
            backlog: VecDeque::new(),
            fanout: relay.subscribe(),
            direct,
        };
        (handle, inbox)
    }

    #[test]
    fn broadcast_without_subscribers_is_not_an_error() {
        let relay = RelayState::new(8);
        let n = relay.broadcast(BroadcastMessage {
            origin: SessionId::new(),
            event: update("u1"),
        });
        assert_eq!(n, 0);
    }

    #[test]
    fn inbox_skips_own_broadcasts() {
        let relay = RelayState::new(8);
        let (a, mut inbox_a) = inbox(&relay);
        let (_b, mut inbox_b) = inbox(&relay);
        relay.broadcast(BroadcastMessage {
            origin: a.id(),
            event: update("u1"),
        });
        assert!(inbox_a.try_recv().is_none());
        assert_eq!(inbox_b.try_recv(), Some(update("u1")));
    }

    #[test]
    fn lagged_inbox_recovers_with_newest_events() {
        let relay = RelayState::new(2);
        let (_a, mut slow) = inbox(&relay);
        let origin = SessionId::new();
        for user in ["u1", "u2", "u3", "u4"] {
            relay.broadcast(BroadcastMessage {
                origin,
                event: update(user),
            });
        }
        assert_eq!(slow.try_recv(), Some(update("u3")));
        assert_eq!(slow.try_recv(), Some(update("u4")));
        assert_eq!(slow.try_recv(), None);
    }

    #[tokio::test]
    async fn recv_prefers_backlog_then_direct() {
        let relay = RelayState::new(8);
        let (handle, mut inbox) = inbox(&relay);
        inbox.backlog.push_back(update("snap"));
        handle.deliver(update("direct")).unwrap();
        assert_eq!(inbox.recv().await, Some(update("snap")));
        assert_eq!(inbox.recv().await, Some(update("direct")));
    }

    #[test]
    fn deliver_to_dropped_inbox_fails_quietly() {
        let relay = RelayState::new(8);
        let (handle, inbox) = inbox(&relay);
        drop(inbox);
        assert!(handle.deliver(update("u1")).is_err());
    }
}
