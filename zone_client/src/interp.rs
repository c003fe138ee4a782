//! Interpolation.
//!
//! Poses arrive at the network tick rate; frames render at their own rate.
//! Every frame each visible remote entity is drawn at the blend of its
//! previous and target position, and turned toward its target orientation at
//! a bounded rate. Blend progress keeps running past 1.0 up to
//! [`ALPHA_CEILING`], so a late update extrapolates briefly instead of
//! freezing, then holds.

use crate::store::{EntityStore, RemoteEntity, ALPHA_CEILING};

/// Advances every remote entity by one render frame of `dt` seconds.
pub fn advance(store: &mut EntityStore, dt: f32, tick_rate: f32) {
    for entity in store.iter_mut() {
        advance_entity(entity, dt, tick_rate);
    }
}

fn advance_entity(entity: &mut RemoteEntity, dt: f32, tick_rate: f32) {
    let pos = entity.blended_pos();
    let target_rot = entity.target_rot;

    if let Some(visual) = entity.visual.as_mut() {
        visual.transform.pos = pos;
        let remaining = visual.transform.rot.angle_to(target_rot);
        let step = remaining * (tick_rate * dt).clamp(0.0, 1.0);
        visual.transform.rot = visual.transform.rot.rotate_towards(target_rot, step);

        if let Some(label) = entity.label.as_mut() {
            label.transform = visual.transform;
        }
    }

    entity.alpha = (entity.alpha + dt * (tick_rate - 1.0)).min(ALPHA_CEILING);
}
