//! Event router: applies inbound client events to the stores and decides who hears about them.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use shared::{
    ClientEvent, Identity, LocationKey, LocationPayload, RidePayload, ServerEvent, SessionId,
};

use super::{
    BroadcastMessage, ConnectionRegistry, Inbox, LocationStore, RelayState, SessionHandle,
};

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub fanout_capacity: usize,
    pub direct_capacity: usize,
    /// Replay the current location table to a session when it connects.
    pub snapshot_on_connect: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            fanout_capacity: 256,
            direct_capacity: 32,
            snapshot_on_connect: false,
        }
    }
}

/// Router-side state of one connection.
#[derive(Debug)]
pub struct Session {
    handle: SessionHandle,
    identity: Option<Identity>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// The identity bound by the latest `registerUser`, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }
}

/// Why an addressed notification went nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    RecipientOffline,
    RecipientBacklogged,
    RecipientGone,
}

/// What handling one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Registered {
        identity: Identity,
        replaced: Option<SessionId>,
    },
    Broadcast {
        receivers: usize,
    },
    Delivered {
        to: SessionId,
    },
    Dropped(DropReason),
}

/// Owns fan-out and applies client events to the injected stores.
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    locations: Arc<LocationStore>,
    relay: RelayState,
    options: RouterOptions,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        locations: Arc<LocationStore>,
        options: RouterOptions,
    ) -> Self {
        Self {
            registry,
            locations,
            relay: RelayState::new(options.fanout_capacity),
            options,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn locations(&self) -> &LocationStore {
        &self.locations
    }

    /// Sessions whose inbox is still alive.
    pub fn connected(&self) -> usize {
        self.relay.subscribers()
    }

    /// Open a session. It starts unregistered and is subscribed to fan-out immediately.
    pub fn connect(&self) -> (Session, Inbox) {
        let (handle, direct) = SessionHandle::pair(self.options.direct_capacity);
        let fanout = self.relay.subscribe();
        let backlog = if self.options.snapshot_on_connect {
            self.snapshot_events()
        } else {
            VecDeque::new()
        };
        tracing::info!(session = %handle.id(), replayed = backlog.len(), "session connected");
        let inbox = Inbox {
            session: handle.id(),
            backlog,
            fanout,
            direct,
        };
        (
            Session {
                handle,
                identity: None,
            },
            inbox,
        )
    }

    pub fn handle(&self, session: &mut Session, event: ClientEvent) -> Outcome {
        match event {
            ClientEvent::RegisterUser(p) => self.register(session, p.user_id),
            ClientEvent::UpdateLocation(p) => self.update_location(session, p),
            ClientEvent::CompleteRide(p) => self.complete_ride(session, p),
        }
    }

    /// Tear down a session: unbind its identities and drop the positions it wrote.
    pub fn disconnect(&self, session: Session) {
        let id = session.id();
        let unbound = self.registry.remove(id);
        let pruned = self.locations.remove_owned_by(id);
        tracing::info!(
            session = %id,
            user = ?session.identity.as_ref().map(Identity::as_str),
            unbound,
            pruned,
            "session disconnected"
        );
    }

    fn register(&self, session: &mut Session, identity: Identity) -> Outcome {
        let replaced = self
            .registry
            .register(identity.clone(), session.handle.clone());
        if let Some(prev) = replaced {
            tracing::info!(user = %identity, session = %session.id(), previous = %prev, "identity rebound");
        } else {
            tracing::info!(user = %identity, session = %session.id(), "registered");
        }
        session.identity = Some(identity.clone());
        Outcome::Registered { identity, replaced }
    }

    /// Identity key while the registry still binds it to this session; once another session
    /// has taken the identity over, the session falls back to its own key.
    fn location_key(&self, session: &Session) -> LocationKey {
        match &session.identity {
            Some(id)
                if self
                    .registry
                    .resolve(id)
                    .is_some_and(|h| h.id() == session.id()) =>
            {
                LocationKey::User(id.clone())
            }
            Some(id) => {
                tracing::debug!(user = %id, session = %session.id(), "identity taken over, writing under session key");
                LocationKey::Session(session.id())
            }
            None => LocationKey::Session(session.id()),
        }
    }

    fn update_location(&self, session: &Session, payload: LocationPayload) -> Outcome {
        self.locations.update(
            self.location_key(session),
            payload.latitude,
            payload.longitude,
            session.id(),
        );
        let subscribed = self.relay.broadcast(BroadcastMessage {
            origin: session.id(),
            event: ServerEvent::LocationUpdate(payload),
        });
        let receivers = subscribed.saturating_sub(1);
        tracing::debug!(session = %session.id(), receivers, "location fan-out");
        Outcome::Broadcast { receivers }
    }

    fn complete_ride(&self, session: &Session, payload: RidePayload) -> Outcome {
        let ride = payload.ride_index;
        let Some(target) = self.registry.resolve(&payload.passenger_id) else {
            tracing::debug!(ride, passenger = %payload.passenger_id, "passenger offline, rideCompleted dropped");
            return Outcome::Dropped(DropReason::RecipientOffline);
        };
        let passenger = payload.passenger_id.clone();
        match target.deliver(ServerEvent::RideCompleted(payload)) {
            Ok(()) => {
                tracing::info!(ride, passenger = %passenger, from = %session.id(), "notified passenger of ride completion");
                Outcome::Delivered { to: target.id() }
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(ride, passenger = %passenger, "passenger queue full, rideCompleted dropped");
                Outcome::Dropped(DropReason::RecipientBacklogged)
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(ride, passenger = %passenger, "passenger session closing, rideCompleted dropped");
                Outcome::Dropped(DropReason::RecipientGone)
            }
        }
    }

    fn snapshot_events(&self) -> VecDeque<ServerEvent> {
        self.locations
            .snapshot()
            .into_iter()
            .filter_map(|entry| {
                let user_id = match entry.key {
                    LocationKey::User(id) => id,
                    LocationKey::Session(s) => Identity::new(s.to_string()).ok()?,
                };
                Some(ServerEvent::LocationUpdate(LocationPayload {
                    user_id,
                    latitude: entry.latitude,
                    longitude: entry.longitude,
                }))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::RegisterUserPayload;

    fn id(s: &str) -> Identity {
        Identity::new(s).unwrap()
    }

    fn router() -> EventRouter {
        router_with(RouterOptions::default())
    }

    fn router_with(options: RouterOptions) -> EventRouter {
        EventRouter::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(LocationStore::new()),
            options,
        )
    }

    fn register(user: &str) -> ClientEvent {
        ClientEvent::RegisterUser(RegisterUserPayload { user_id: id(user) })
    }

    fn update(user: &str, lat: f64, lon: f64) -> ClientEvent {
        ClientEvent::UpdateLocation(LocationPayload {
            user_id: id(user),
            latitude: Some(lat),
            longitude: Some(lon),
        })
    }

    fn ride(index: u64, passenger: &str, driver: &str) -> RidePayload {
        RidePayload {
            ride_index: index,
            passenger_id: id(passenger),
            driver_id: id(driver),
        }
    }

    #[test]
    fn register_binds_and_disconnect_unbinds() {
        let r = router();
        let (mut s, _inbox) = r.connect();
        let sid = s.id();
        assert!(matches!(
            r.handle(&mut s, register("u1")),
            Outcome::Registered { replaced: None, .. }
        ));
        assert_eq!(s.identity(), Some(&id("u1")));
        assert_eq!(r.registry().resolve(&id("u1")).map(|h| h.id()), Some(sid));

        r.disconnect(s);
        assert!(r.registry().resolve(&id("u1")).is_none());
    }

    #[test]
    fn update_reaches_every_other_session_but_not_the_sender() {
        let r = router();
        let (mut sender, mut own) = r.connect();
        let mut others: Vec<_> = (0..4).map(|_| r.connect()).collect();

        let outcome = r.handle(&mut sender, update("u1", 1.5, 2.5));
        assert_eq!(outcome, Outcome::Broadcast { receivers: 4 });

        assert!(own.try_recv().is_none());
        for (_, inbox) in others.iter_mut() {
            match inbox.try_recv() {
                Some(ServerEvent::LocationUpdate(p)) => {
                    assert_eq!(p.user_id, id("u1"));
                    assert_eq!(p.latitude, Some(1.5));
                    assert_eq!(p.longitude, Some(2.5));
                }
                other => panic!("expected locationUpdate, got {:?}", other),
            }
            assert!(inbox.try_recv().is_none());
        }
    }

    #[test]
    fn update_with_a_departed_peer_still_reaches_the_rest() {
        let r = router();
        let (mut sender, _own) = r.connect();
        let (gone, gone_inbox) = r.connect();
        let (_b, mut b_inbox) = r.connect();

        drop(gone_inbox);
        r.disconnect(gone);

        assert_eq!(
            r.handle(&mut sender, update("u1", 0.0, 0.0)),
            Outcome::Broadcast { receivers: 1 }
        );
        assert!(b_inbox.try_recv().is_some());
    }

    #[test]
    fn updates_from_one_sender_arrive_in_order() {
        let r = router();
        let (mut sender, _own) = r.connect();
        let (_obs, mut inbox) = r.connect();
        for i in 0..20 {
            r.handle(&mut sender, update("u1", i as f64, 0.0));
        }
        for i in 0..20 {
            match inbox.try_recv() {
                Some(ServerEvent::LocationUpdate(p)) => assert_eq!(p.latitude, Some(i as f64)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn location_key_follows_registration_state() {
        let r = router();
        let (mut s, _inbox) = r.connect();
        r.handle(&mut s, update("claimed", 1.0, 1.0));
        let snap = r.locations().snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].key, LocationKey::Session(s.id()));

        r.handle(&mut s, register("u1"));
        r.handle(&mut s, update("u1", 2.0, 2.0));
        let keys: Vec<_> = r.locations().snapshot().into_iter().map(|e| e.key).collect();
        assert!(keys.contains(&LocationKey::User(id("u1"))));

        r.disconnect(s);
        assert!(r.locations().is_empty());
    }

    #[test]
    fn rebinding_keeps_latest_identity_and_disconnect_clears_all() {
        let r = router();
        let (mut s, _inbox) = r.connect();
        r.handle(&mut s, register("u1"));
        r.handle(&mut s, update("u1", 1.0, 1.0));
        r.handle(&mut s, register("u2"));
        r.handle(&mut s, update("u2", 2.0, 2.0));
        assert_eq!(s.identity(), Some(&id("u2")));

        r.disconnect(s);
        assert!(r.registry().is_empty());
        assert!(r.locations().is_empty());
    }

    #[test]
    fn complete_ride_reaches_only_the_passenger() {
        let r = router();
        let (mut driver, mut driver_inbox) = r.connect();
        let (mut passenger, mut passenger_inbox) = r.connect();
        let (_bystander, mut bystander_inbox) = r.connect();
        r.handle(&mut driver, register("d1"));
        r.handle(&mut passenger, register("p1"));

        let payload = ride(7, "p1", "d1");
        let outcome = r.handle(&mut driver, ClientEvent::CompleteRide(payload.clone()));
        assert_eq!(outcome, Outcome::Delivered { to: passenger.id() });

        assert_eq!(
            passenger_inbox.try_recv(),
            Some(ServerEvent::RideCompleted(payload))
        );
        assert!(driver_inbox.try_recv().is_none());
        assert!(bystander_inbox.try_recv().is_none());
    }

    #[test]
    fn complete_ride_for_unknown_passenger_is_dropped() {
        let r = router();
        let (mut driver, _inbox) = r.connect();
        let (_other, mut other_inbox) = r.connect();
        let outcome = r.handle(&mut driver, ClientEvent::CompleteRide(ride(1, "nobody", "d1")));
        assert_eq!(outcome, Outcome::Dropped(DropReason::RecipientOffline));
        assert!(other_inbox.try_recv().is_none());
    }

    #[test]
    fn complete_ride_is_allowed_before_registering() {
        let r = router();
        let (mut anon, _inbox) = r.connect();
        let (mut passenger, mut passenger_inbox) = r.connect();
        r.handle(&mut passenger, register("p1"));
        assert!(matches!(
            r.handle(&mut anon, ClientEvent::CompleteRide(ride(2, "p1", "d1"))),
            Outcome::Delivered { .. }
        ));
        assert!(passenger_inbox.try_recv().is_some());
    }

    #[test]
    fn complete_ride_to_backlogged_passenger_is_dropped() {
        let r = router_with(RouterOptions {
            direct_capacity: 1,
            ..RouterOptions::default()
        });
        let (mut driver, _d) = r.connect();
        let (mut passenger, _never_read) = r.connect();
        r.handle(&mut passenger, register("p1"));

        assert!(matches!(
            r.handle(&mut driver, ClientEvent::CompleteRide(ride(1, "p1", "d1"))),
            Outcome::Delivered { .. }
        ));
        assert_eq!(
            r.handle(&mut driver, ClientEvent::CompleteRide(ride(2, "p1", "d1"))),
            Outcome::Dropped(DropReason::RecipientBacklogged)
        );
    }

    #[test]
    fn complete_ride_to_closing_session_is_dropped() {
        let r = router();
        let (mut driver, _d) = r.connect();
        let (mut passenger, passenger_inbox) = r.connect();
        r.handle(&mut passenger, register("p1"));
        // Transport already gone, cleanup not yet run.
        drop(passenger_inbox);
        assert_eq!(
            r.handle(&mut driver, ClientEvent::CompleteRide(ride(1, "p1", "d1"))),
            Outcome::Dropped(DropReason::RecipientGone)
        );
    }

    #[test]
    fn reconnect_takes_over_identity() {
        let r = router();
        let (mut old, _a) = r.connect();
        let (mut new, mut new_inbox) = r.connect();
        let (mut driver, _d) = r.connect();
        r.handle(&mut old, register("p1"));
        assert_eq!(
            r.handle(&mut new, register("p1")),
            Outcome::Registered {
                identity: id("p1"),
                replaced: Some(old.id()),
            }
        );
        r.disconnect(old);

        r.handle(&mut driver, ClientEvent::CompleteRide(ride(3, "p1", "d1")));
        assert!(matches!(
            new_inbox.try_recv(),
            Some(ServerEvent::RideCompleted(_))
        ));
    }

    #[test]
    fn superseded_session_cannot_clobber_or_prune_the_new_location() {
        let r = router();
        let (mut old, _a) = r.connect();
        let (mut new, _b) = r.connect();
        r.handle(&mut old, register("u1"));
        r.handle(&mut new, register("u1"));
        r.handle(&mut new, update("u1", 5.0, 5.0));

        r.handle(&mut old, update("u1", 1.0, 1.0));
        let user_fix: Vec<_> = r
            .locations()
            .snapshot()
            .into_iter()
            .filter(|e| e.key == LocationKey::User(id("u1")))
            .map(|e| (e.latitude, e.longitude))
            .collect();
        assert_eq!(user_fix, vec![(Some(5.0), Some(5.0))]);
        assert!(r
            .locations()
            .snapshot()
            .iter()
            .any(|e| e.key == LocationKey::Session(old.id())));

        r.disconnect(old);
        let snap = r.locations().snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].key, LocationKey::User(id("u1")));
        assert_eq!(snap[0].latitude, Some(5.0));
        assert_eq!(
            r.registry().resolve(&id("u1")).map(|h| h.id()),
            Some(new.id())
        );
    }

    #[test]
    fn snapshot_is_replayed_on_connect_when_enabled() {
        let r = router_with(RouterOptions {
            snapshot_on_connect: true,
            ..RouterOptions::default()
        });
        let (mut a, _inbox) = r.connect();
        r.handle(&mut a, register("u1"));
        r.handle(&mut a, update("u1", 10.0, 20.0));

        let (_late, mut late_inbox) = r.connect();
        assert_eq!(
            late_inbox.try_recv(),
            Some(ServerEvent::LocationUpdate(LocationPayload {
                user_id: id("u1"),
                latitude: Some(10.0),
                longitude: Some(20.0),
            }))
        );
        assert!(late_inbox.try_recv().is_none());
    }

    #[test]
    fn three_clients_update_then_ride_to_departed_passenger() {
        let r = router();
        let (mut a, mut a_inbox) = r.connect();
        let (mut b, mut b_inbox) = r.connect();
        let (_c, mut c_inbox) = r.connect();
        r.handle(&mut a, register("u1"));
        r.handle(&mut b, register("u2"));

        r.handle(&mut a, update("u1", 10.0, 20.0));
        let expected = ServerEvent::LocationUpdate(LocationPayload {
            user_id: id("u1"),
            latitude: Some(10.0),
            longitude: Some(20.0),
        });
        assert_eq!(b_inbox.try_recv(), Some(expected.clone()));
        assert_eq!(c_inbox.try_recv(), Some(expected));

        drop(b_inbox);
        r.disconnect(b);
        assert_eq!(
            r.handle(&mut a, ClientEvent::CompleteRide(ride(1, "u2", "u1"))),
            Outcome::Dropped(DropReason::RecipientOffline)
        );
        assert!(a_inbox.try_recv().is_none());
        assert!(c_inbox.try_recv().is_none());
    }
}
