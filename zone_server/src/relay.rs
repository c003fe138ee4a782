//! Presence registry and fan-out core.
//!
//! The relay owns no game state. It keeps one [`Session`] per transport
//! connection, binds it to a self-declared peer identity, and turns each
//! inbound event into a list of [`Delivery`]s for the transport to write.
//! Pose data is never inspected, clamped, or rate limited.
//!
//! This module performs no IO, so the whole presence lifecycle is testable
//! without sockets.

use std::collections::BTreeMap;

use tracing::{debug, info};
use zone_shared::{
    net::{
        decode_client, ClientMsg, ConnectionId, Identity, Join, Move, PeerAnnounce, PeerId,
        PeerIdentity, ServerMsg,
    },
    sanitize::{sanitize_display_name, sanitize_model_key},
};

use crate::names::IdentityPool;

/// Server-side record binding a connection to a peer identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub peer_id: Option<PeerId>,
    pub display_name: Option<String>,
    pub model_key: Option<String>,
}

impl Session {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            peer_id: None,
            display_name: None,
            model_key: None,
        }
    }
}

/// Connection id -> session mapping with explicit lifecycle.
///
/// Ordered by connection id so fan-out order is stable.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: BTreeMap<ConnectionId, Session>,
}

impl Registry {
    /// Creates an anonymous session. Re-creating an existing id resets it.
    pub fn create(&mut self, connection_id: ConnectionId) {
        self.sessions
            .insert(connection_id, Session::new(connection_id));
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Session> {
        self.sessions.get_mut(&connection_id)
    }

    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<Session> {
        self.sessions.remove(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Every connection except `sender`.
    fn others(&self, sender: ConnectionId) -> Vec<ConnectionId> {
        self.sessions
            .keys()
            .copied()
            .filter(|&cid| cid != sender)
            .collect()
    }

    /// Connections (other than `sender`) whose session declared `peer_id`.
    fn with_peer(&self, peer_id: PeerId, sender: ConnectionId) -> Vec<ConnectionId> {
        self.sessions
            .values()
            .filter(|s| s.connection_id != sender && s.peer_id == Some(peer_id))
            .map(|s| s.connection_id)
            .collect()
    }
}

/// One outbound message and the connections it goes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub recipients: Vec<ConnectionId>,
    pub msg: ServerMsg,
}

impl Delivery {
    fn to(recipients: Vec<ConnectionId>, msg: ServerMsg) -> Option<Self> {
        if recipients.is_empty() {
            None
        } else {
            Some(Self { recipients, msg })
        }
    }
}

/// The relay core: registry plus event handling.
pub struct Relay {
    registry: Registry,
    identities: Option<IdentityPool>,
}

impl Relay {
    /// `identities` enables server-assigned names for sessions that join
    /// without one.
    pub fn new(identities: Option<IdentityPool>) -> Self {
        Self {
            registry: Registry::default(),
            identities,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// New transport connection. Nothing is broadcast until it joins.
    pub fn connect(&mut self, connection_id: ConnectionId) {
        self.registry.create(connection_id);
        debug!(%connection_id, sessions = self.registry.len(), "Session created");
    }

    /// Transport connection closed.
    ///
    /// Announces the departure only if the session ever declared a peer id.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Vec<Delivery> {
        let Some(session) = self.registry.remove(connection_id) else {
            return Vec::new();
        };
        let Some(peer_id) = session.peer_id else {
            debug!(%connection_id, "Session closed before join");
            return Vec::new();
        };

        info!(
            %connection_id,
            %peer_id,
            name = session.display_name.as_deref().unwrap_or(""),
            "Peer departed"
        );
        Delivery::to(
            self.registry.others(connection_id),
            ServerMsg::OtherDisconnect(peer_id),
        )
        .into_iter()
        .collect()
    }

    /// Decodes a raw frame and handles it. Malformed frames are dropped.
    pub fn handle_frame(&mut self, from: ConnectionId, frame: &[u8]) -> Vec<Delivery> {
        match decode_client(frame) {
            Ok(msg) => self.handle(from, msg),
            Err(e) => {
                debug!(%from, error = %e, "Dropping malformed message");
                Vec::new()
            }
        }
    }

    /// Handles one validated client event to completion.
    pub fn handle(&mut self, from: ConnectionId, msg: ClientMsg) -> Vec<Delivery> {
        if self.registry.get(from).is_none() {
            debug!(%from, "Message from unknown connection");
            return Vec::new();
        }

        match msg {
            ClientMsg::Join(join) => self.on_join(from, join),
            ClientMsg::Identity(identity) => self.on_identity(from, identity),
            ClientMsg::Move(mv) => self.on_move(from, mv),
        }
    }

    fn on_join(&mut self, from: ConnectionId, join: Join) -> Vec<Delivery> {
        let mut out = Vec::new();
        let mut name = clean_name(join.name.as_deref());
        let mut model = clean_model(join.model.as_deref());

        if name.is_none() {
            if let Some(assigned) = self
                .identities
                .as_mut()
                .and_then(|pool| pool.assign(model.as_deref()))
            {
                name = Some(assigned.name.clone());
                model = Some(assigned.model.clone());
                out.push(Delivery {
                    recipients: vec![from],
                    msg: ServerMsg::SelfIdentity(assigned),
                });
            }
        }

        let Some(session) = self.registry.get_mut(from) else {
            return out;
        };
        let replaced = session.peer_id.filter(|&old| old != join.id);
        session.peer_id = Some(join.id);
        if name.is_some() {
            session.display_name = name.clone();
        }
        if model.is_some() {
            session.model_key = model.clone();
        }
        let announce = PeerAnnounce {
            id: join.id,
            name: session.display_name.clone(),
            model: session.model_key.clone(),
        };

        info!(
            connection_id = %from,
            peer_id = %join.id,
            name = announce.name.as_deref().unwrap_or(""),
            model = announce.model.as_deref().unwrap_or(""),
            "Peer joined"
        );

        // Re-join under a new id: retire the old one so peers drop it.
        if let Some(old) = replaced {
            debug!(connection_id = %from, old_peer_id = %old, "Session rejoined with new id");
            out.extend(Delivery::to(
                self.registry.others(from),
                ServerMsg::OtherDisconnect(old),
            ));
        }
        out.extend(Delivery::to(
            self.registry.others(from),
            ServerMsg::OtherJoin(announce),
        ));
        out
    }

    fn on_identity(&mut self, from: ConnectionId, identity: Identity) -> Vec<Delivery> {
        let name = sanitize_display_name(&identity.name);
        let model = clean_model(identity.model.as_deref());

        if let Some(session) = self.registry.get_mut(from) {
            if session.peer_id.is_none() {
                session.peer_id = Some(identity.id);
            }
            session.display_name = Some(name.clone());
            if model.is_some() {
                session.model_key = model.clone();
            }
        }

        let msg = ServerMsg::OtherIdentity(PeerIdentity {
            id: identity.id,
            name,
            model,
        });

        let recipients = match identity.target {
            Some(target) => {
                let recipients = self.registry.with_peer(target, from);
                if recipients.is_empty() {
                    debug!(%from, %target, "Identity target not connected");
                }
                recipients
            }
            None => self.registry.others(from),
        };
        Delivery::to(recipients, msg).into_iter().collect()
    }

    fn on_move(&mut self, from: ConnectionId, mv: Move) -> Vec<Delivery> {
        Delivery::to(self.registry.others(from), ServerMsg::OtherMove(mv))
            .into_iter()
            .collect()
    }
}

fn clean_name(raw: Option<&str>) -> Option<String> {
    raw.map(sanitize_display_name).filter(|n| !n.is_empty())
}

fn clean_model(raw: Option<&str>) -> Option<String> {
    raw.map(sanitize_model_key).filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use zone_shared::math::{Quat, Vec3};

    fn relay_with(n: u64) -> (Relay, Vec<ConnectionId>) {
        let mut relay = Relay::new(None);
        let conns: Vec<ConnectionId> = (1..=n).map(ConnectionId).collect();
        for &c in &conns {
            relay.connect(c);
        }
        (relay, conns)
    }

    fn join(id: u64, name: Option<&str>) -> ClientMsg {
        ClientMsg::Join(Join {
            id: PeerId(id),
            name: name.map(str::to_string),
            model: None,
        })
    }

    fn mv(id: u64) -> ClientMsg {
        ClientMsg::Move(Move {
            id: PeerId(id),
            pos: Vec3::new(1.0, 2.0, 3.0),
            rot: Quat::IDENTITY,
        })
    }

    #[test]
    fn join_announces_to_everyone_but_the_sender() {
        let (mut relay, c) = relay_with(3);
        let out = relay.handle(c[0], join(11, Some("Owl")));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipients, vec![c[1], c[2]]);
        assert_eq!(
            out[0].msg,
            ServerMsg::OtherJoin(PeerAnnounce {
                id: PeerId(11),
                name: Some("Owl".into()),
                model: None,
            })
        );
        assert_eq!(relay.registry().get(c[0]).unwrap().peer_id, Some(PeerId(11)));
    }

    #[test]
    fn move_is_relayed_verbatim_and_never_echoed() {
        let (mut relay, c) = relay_with(3);
        let out = relay.handle(c[1], mv(5));
        assert_eq!(out.len(), 1);
        assert!(!out[0].recipients.contains(&c[1]));
        assert_eq!(out[0].recipients.len(), 2);
        match &out[0].msg {
            ServerMsg::OtherMove(m) => {
                assert_eq!(m.id, PeerId(5));
                assert_eq!(m.pos, Vec3::new(1.0, 2.0, 3.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn targeted_identity_reaches_only_the_target() {
        let (mut relay, c) = relay_with(4);
        relay.handle(c[0], join(1, Some("A")));
        relay.handle(c[1], join(2, Some("B")));
        relay.handle(c[2], join(3, Some("C")));
        // c[3] never joins.

        let out = relay.handle(
            c[1],
            ClientMsg::Identity(Identity {
                id: PeerId(2),
                name: "B".into(),
                model: Some("owl".into()),
                target: Some(PeerId(1)),
            }),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipients, vec![c[0]]);
    }

    #[test]
    fn identity_for_absent_target_goes_nowhere() {
        let (mut relay, c) = relay_with(2);
        relay.handle(c[0], join(1, Some("A")));
        let out = relay.handle(
            c[1],
            ClientMsg::Identity(Identity {
                id: PeerId(2),
                name: "B".into(),
                model: None,
                target: Some(PeerId(99)),
            }),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn untargeted_identity_is_sanitized_and_broadcast() {
        let (mut relay, c) = relay_with(3);
        let raw = format!("<script>x</script>{}", "y".repeat(30));
        let out = relay.handle(
            c[2],
            ClientMsg::Identity(Identity {
                id: PeerId(3),
                name: raw,
                model: Some("../fox".into()),
                target: None,
            }),
        );
        assert_eq!(out[0].recipients, vec![c[0], c[1]]);
        match &out[0].msg {
            ServerMsg::OtherIdentity(p) => {
                assert!(p.name.chars().count() <= 20);
                assert!(!p.name.contains('<'));
                assert_eq!(p.model.as_deref(), Some("fox"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let session = relay.registry().get(c[2]).unwrap();
        assert_eq!(session.display_name.as_deref().map(|n| n.chars().count()), Some(20));
    }

    #[test]
    fn disconnect_after_join_announces_departure() {
        let (mut relay, c) = relay_with(3);
        relay.handle(c[0], join(8, None));
        let out = relay.disconnect(c[0]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipients, vec![c[1], c[2]]);
        assert_eq!(out[0].msg, ServerMsg::OtherDisconnect(PeerId(8)));
        assert_eq!(relay.registry().len(), 2);
    }

    #[test]
    fn rejoin_with_new_id_retires_the_old_one() {
        let (mut relay, c) = relay_with(2);
        relay.handle(c[0], join(1, Some("Owl")));

        let out = relay.handle(c[0], join(2, Some("Owl")));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].recipients, vec![c[1]]);
        assert_eq!(out[0].msg, ServerMsg::OtherDisconnect(PeerId(1)));
        assert!(matches!(&out[1].msg, ServerMsg::OtherJoin(a) if a.id == PeerId(2)));

        // Same id again is a plain re-announce.
        let out = relay.handle(c[0], join(2, Some("Owl")));
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].msg, ServerMsg::OtherJoin(_)));

        let peers: Vec<_> = relay.registry().iter().filter_map(|s| s.peer_id).collect();
        assert_eq!(peers, vec![PeerId(2)]);
    }

    #[test]
    fn disconnect_before_join_is_silent() {
        let (mut relay, c) = relay_with(2);
        assert!(relay.disconnect(c[0]).is_empty());
        assert!(relay.registry().get(c[0]).is_none());
        // Unknown connection is also a no-op.
        assert!(relay.disconnect(ConnectionId(999)).is_empty());
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let (mut relay, c) = relay_with(2);
        assert!(relay.handle_frame(c[0], b"{not json").is_empty());
        assert!(relay
            .handle_frame(c[0], br#"{"event":"join","data":{}}"#)
            .is_empty());
        assert!(relay
            .handle_frame(c[0], br#"{"event":"join","data":{"id":0}}"#)
            .is_empty());
        assert_eq!(relay.registry().get(c[0]).unwrap().peer_id, None);

        // The connection keeps working afterwards.
        let out = relay.handle_frame(c[0], br#"{"event":"join","data":{"id":4}}"#);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn nameless_join_gets_an_assigned_identity() {
        let pool = IdentityPool::with_rng(
            &["Maple".to_string()],
            &["fox".to_string()],
            StdRng::seed_from_u64(3),
        );
        let mut relay = Relay::new(Some(pool));
        relay.connect(ConnectionId(1));
        relay.connect(ConnectionId(2));

        let out = relay.handle(ConnectionId(1), join(10, None));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].recipients, vec![ConnectionId(1)]);
        assert!(matches!(&out[0].msg, ServerMsg::SelfIdentity(a) if a.name == "Maple" && a.model == "fox"));
        assert_eq!(out[1].recipients, vec![ConnectionId(2)]);
        assert!(matches!(&out[1].msg, ServerMsg::OtherJoin(a) if a.name.as_deref() == Some("Maple")));

        // A join that brings its own name keeps it.
        let out = relay.handle(ConnectionId(2), join(20, Some("Owl")));
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0].msg, ServerMsg::OtherJoin(a) if a.name.as_deref() == Some("Owl")));
    }
}
