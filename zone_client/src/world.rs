//! Client core.
//!
//! Routes relay events into the entity store, drives deferred model and
//! label assignment, and produces the replies a client owes its peers. Every
//! handler runs to completion before returning, so the renderer never sees a
//! half-applied update.
//!
//! No IO happens here: outbound messages and asset loads come back as
//! [`Effects`] for the caller to carry out.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use zone_shared::{
    net::{ClientMsg, Identity, Join, Move, PeerAnnounce, PeerId, PeerIdentity, ServerMsg},
    sanitize::is_valid_model_key,
};

use crate::{
    assets::{Acquire, AssetCache, Font, Model, FONT_KEY, LABEL_SIZE},
    input::LocalPlayer,
    interp,
    store::{EntityStore, Label, RemoteEntity, Transform, Visual},
};

/// This client's own identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub peer_id: PeerId,
    pub name: Option<String>,
    pub model: Option<String>,
}

/// An asset load the caller must start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadRequest {
    Model(String),
    Font,
}

/// Side effects requested by a handler.
#[derive(Debug, Default, PartialEq)]
pub struct Effects {
    pub outbound: Vec<ClientMsg>,
    pub loads: Vec<LoadRequest>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.loads.is_empty()
    }
}

pub struct ClientWorld {
    pub local: LocalIdentity,
    pub player: LocalPlayer,
    pub store: EntityStore,
    models: AssetCache<Model>,
    fonts: AssetCache<Font>,
    tick_rate: f32,
}

impl ClientWorld {
    pub fn new(local: LocalIdentity, tick_rate: f32) -> Self {
        Self {
            local,
            player: LocalPlayer::default(),
            store: EntityStore::default(),
            models: AssetCache::default(),
            fonts: AssetCache::default(),
            tick_rate,
        }
    }

    /// True once this client has a display name to share.
    pub fn is_identified(&self) -> bool {
        self.local.name.as_deref().is_some_and(|n| !n.is_empty())
    }

    pub fn join_msg(&self) -> ClientMsg {
        ClientMsg::Join(Join {
            id: self.local.peer_id,
            name: self.local.name.clone(),
            model: self.local.model.clone(),
        })
    }

    /// `None` until this client has a name.
    pub fn identity_msg(&self, target: Option<PeerId>) -> Option<ClientMsg> {
        let name = self.local.name.clone().filter(|n| !n.is_empty())?;
        Some(ClientMsg::Identity(Identity {
            id: self.local.peer_id,
            name,
            model: self.local.model.clone(),
            target,
        }))
    }

    pub fn move_msg(&self) -> ClientMsg {
        ClientMsg::Move(Move {
            id: self.local.peer_id,
            pos: self.player.pos,
            rot: self.player.rot,
        })
    }

    /// Handles one relay event.
    pub fn handle(&mut self, msg: ServerMsg, now: Instant) -> Effects {
        let mut fx = Effects::default();
        match msg {
            ServerMsg::SelfIdentity(assigned) => {
                info!(name = %assigned.name, model = %assigned.model, "Identity assigned");
                self.local.name = Some(assigned.name);
                self.local.model = Some(assigned.model);
            }
            ServerMsg::OtherJoin(announce) => self.on_announce(announce, now, &mut fx),
            ServerMsg::OtherIdentity(identity) => self.on_identity(identity, now, &mut fx),
            ServerMsg::OtherMove(mv) => {
                if !self.store.apply_move(&mv, now) {
                    debug!(peer_id = %mv.id, "Move for unknown peer dropped");
                }
            }
            ServerMsg::OtherDisconnect(peer_id) => {
                if let Some(gone) = self.store.depart(peer_id) {
                    info!(%peer_id, name = %gone.display_name, "Peer left");
                }
            }
        }
        fx
    }

    fn on_announce(&mut self, announce: PeerAnnounce, now: Instant, fx: &mut Effects) {
        if announce.id == self.local.peer_id {
            return;
        }
        let outcome = self.store.upsert(
            announce.id,
            announce.name.as_deref(),
            announce.model.as_deref(),
            now,
        );
        if outcome.created {
            info!(
                peer_id = %announce.id,
                name = announce.name.as_deref().unwrap_or(""),
                "Peer joined"
            );
        }
        self.refresh_attachments(announce.id, outcome.model_changed, outcome.name_changed, fx);

        // Catch the newcomer up; the relay keeps no roster.
        if let Some(identity) = self.identity_msg(Some(announce.id)) {
            fx.outbound.push(identity);
            fx.outbound.push(self.move_msg());
        }
    }

    fn on_identity(&mut self, identity: PeerIdentity, now: Instant, fx: &mut Effects) {
        if identity.id == self.local.peer_id {
            return;
        }
        let outcome = self.store.upsert(
            identity.id,
            Some(&identity.name),
            identity.model.as_deref(),
            now,
        );
        if outcome.created {
            info!(peer_id = %identity.id, name = %identity.name, "Met peer already present");
        }
        self.refresh_attachments(identity.id, outcome.model_changed, outcome.name_changed, fx);
    }

    fn refresh_attachments(
        &mut self,
        peer_id: PeerId,
        model_changed: bool,
        name_changed: bool,
        fx: &mut Effects,
    ) {
        if model_changed {
            self.acquire_visual(peer_id, fx);
        }
        if name_changed {
            self.acquire_label(peer_id, fx);
        }
    }

    fn acquire_visual(&mut self, peer_id: PeerId, fx: &mut Effects) {
        let Some(key) = self
            .store
            .get(peer_id)
            .and_then(|e| e.model_key.clone())
        else {
            return;
        };
        if !is_valid_model_key(&key) {
            debug!(%peer_id, key = %key, "Ignoring unusable model key");
            return;
        }
        match self.models.acquire(&key) {
            Acquire::Ready(model) => {
                if let Some(entity) = self.store.get_mut(peer_id) {
                    attach_visual(entity, model);
                }
            }
            Acquire::Pending => {}
            Acquire::Load => fx.loads.push(LoadRequest::Model(key)),
        }
    }

    fn acquire_label(&mut self, peer_id: PeerId, fx: &mut Effects) {
        let has_name = self
            .store
            .get(peer_id)
            .is_some_and(|e| !e.display_name.is_empty());
        if !has_name {
            return;
        }
        match self.fonts.acquire(FONT_KEY) {
            Acquire::Ready(font) => {
                if let Some(entity) = self.store.get_mut(peer_id) {
                    attach_label(entity, &font);
                }
            }
            Acquire::Pending => {}
            Acquire::Load => fx.loads.push(LoadRequest::Font),
        }
    }

    /// A model finished loading: cache it and give a clone to every entity
    /// that currently wants it.
    pub fn model_loaded(&mut self, model: Model) {
        let key = model.key.clone();
        let mut attached = 0;
        for entity in self.store.iter_mut() {
            if entity.visual.is_none() && entity.model_key.as_deref() == Some(key.as_str()) {
                attach_visual(entity, model.clone());
                attached += 1;
            }
        }
        debug!(key = %key, attached, "Model loaded");
        self.models.resolve(&key, model);
    }

    pub fn model_failed(&mut self, key: &str, error: &anyhow::Error) {
        warn!(key = %key, error = %error, "Model load failed");
        self.models.fail(key);
    }

    /// The label font finished loading: label every named entity that has none.
    pub fn font_loaded(&mut self, font: Font) {
        for entity in self.store.iter_mut() {
            if entity.label.is_none() && !entity.display_name.is_empty() {
                attach_label(entity, &font);
            }
        }
        debug!(family = %font.family, "Font loaded");
        self.fonts.resolve(FONT_KEY, font);
    }

    pub fn font_failed(&mut self, error: &anyhow::Error) {
        warn!(error = %error, "Font load failed");
        self.fonts.fail(FONT_KEY);
    }

    /// One render frame: interpolate every remote entity.
    pub fn frame(&mut self, dt: f32) {
        interp::advance(&mut self.store, dt, self.tick_rate);
    }

    /// Evicts peers that went silent without a departure notice.
    pub fn sweep(&mut self, now: Instant, window: Duration) -> Vec<PeerId> {
        self.store
            .sweep(now, window)
            .into_iter()
            .map(|gone| {
                info!(peer_id = %gone.peer_id, name = %gone.display_name, "Peer timed out");
                gone.peer_id
            })
            .collect()
    }
}

fn attach_visual(entity: &mut RemoteEntity, model: Model) {
    entity.visual = Some(Visual {
        model,
        transform: Transform {
            pos: entity.blended_pos(),
            rot: entity.target_rot,
        },
    });
}

fn attach_label(entity: &mut RemoteEntity, font: &Font) {
    let transform = entity
        .visual
        .as_ref()
        .map(|v| v.transform)
        .unwrap_or_default();
    entity.label = Some(Label {
        mesh: font.layout(&entity.display_name, LABEL_SIZE),
        transform,
    });
}
