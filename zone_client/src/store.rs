//! Remote entity store.
//!
//! One [`RemoteEntity`] per known peer, keyed by peer id. `otherJoin` and
//! `otherIdentity` may arrive in either order; both converge on the same
//! record. Pose updates for unknown peers are dropped, not queued.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use zone_shared::{
    math::{Quat, Vec3},
    net::{Move, PeerId},
};

use crate::assets::{Model, TextMesh};

/// Upper bound of the blend progress. Past 1.0 the entity extrapolates.
pub const ALPHA_CEILING: f32 = 2.0;

/// Position and orientation of something drawn in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub pos: Vec3,
    pub rot: Quat,
}

/// A model instance attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Visual {
    pub model: Model,
    pub transform: Transform,
}

/// A name tag attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub mesh: TextMesh,
    pub transform: Transform,
}

/// Client-side record of one remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntity {
    pub peer_id: PeerId,
    pub display_name: String,
    pub model_key: Option<String>,
    pub target_pos: Vec3,
    pub target_rot: Quat,
    pub previous_pos: Vec3,
    pub previous_rot: Quat,
    /// Blend progress since the last pose update, in `[0, ALPHA_CEILING]`.
    /// Reset only by a new pose, never by rendering.
    pub alpha: f32,
    pub visual: Option<Visual>,
    pub label: Option<Label>,
    pub last_seen: Instant,
}

impl RemoteEntity {
    fn new(peer_id: PeerId, now: Instant) -> Self {
        Self {
            peer_id,
            display_name: String::new(),
            model_key: None,
            target_pos: Vec3::ZERO,
            target_rot: Quat::IDENTITY,
            previous_pos: Vec3::ZERO,
            previous_rot: Quat::IDENTITY,
            alpha: 0.0,
            visual: None,
            label: None,
            last_seen: now,
        }
    }

    /// Pose the entity is drawn at for its current blend progress.
    pub fn blended_pos(&self) -> Vec3 {
        self.previous_pos.lerp(self.target_pos, self.alpha)
    }
}

/// What an identity update changed on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Upsert {
    pub created: bool,
    pub name_changed: bool,
    pub model_changed: bool,
}

/// Peer id -> entity mapping.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<PeerId, RemoteEntity>,
}

impl EntityStore {
    /// Creates the entity if absent, then applies whichever of `name` and
    /// `model` are present.
    ///
    /// A changed model key drops the current visual; the caller re-acquires.
    /// A changed name drops the current label.
    pub fn upsert(
        &mut self,
        peer_id: PeerId,
        name: Option<&str>,
        model: Option<&str>,
        now: Instant,
    ) -> Upsert {
        let mut outcome = Upsert::default();
        let entity = self.entities.entry(peer_id).or_insert_with(|| {
            outcome.created = true;
            RemoteEntity::new(peer_id, now)
        });
        entity.last_seen = now;

        if let Some(name) = name {
            if entity.display_name != name {
                entity.display_name = name.to_string();
                entity.label = None;
                outcome.name_changed = true;
            }
        }
        if let Some(model) = model {
            if entity.model_key.as_deref() != Some(model) {
                entity.model_key = Some(model.to_string());
                entity.visual = None;
                outcome.model_changed = true;
            }
        }
        outcome
    }

    /// Applies a pose update. Returns `false` for an unknown peer.
    pub fn apply_move(&mut self, mv: &Move, now: Instant) -> bool {
        let Some(entity) = self.entities.get_mut(&mv.id) else {
            return false;
        };
        entity.previous_pos = entity.target_pos;
        entity.previous_rot = entity.target_rot;
        entity.target_pos = mv.pos;
        entity.target_rot = mv.rot.normalize();
        entity.alpha = 0.0;
        entity.last_seen = now;
        true
    }

    /// Removes an entity with its visual and label. Absent ids are a no-op.
    pub fn depart(&mut self, peer_id: PeerId) -> Option<RemoteEntity> {
        self.entities.remove(&peer_id)
    }

    /// Removes every entity not heard from within `window`.
    pub fn sweep(&mut self, now: Instant, window: Duration) -> Vec<RemoteEntity> {
        let stale: Vec<PeerId> = self
            .entities
            .values()
            .filter(|e| now.saturating_duration_since(e.last_seen) > window)
            .map(|e| e.peer_id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.entities.remove(&id))
            .collect()
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&RemoteEntity> {
        self.entities.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: PeerId) -> Option<&mut RemoteEntity> {
        self.entities.get_mut(&peer_id)
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.entities.contains_key(&peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteEntity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemoteEntity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
