//! Input handling.
//!
//! The windowing/camera layer reports whether input is captured plus a set
//! of directional intents. This module turns them into local pose changes.

use zone_shared::math::{Quat, Vec3};

/// Movement speed in units per second.
pub const WALK_SPEED: f32 = 8.0;
pub const SPRINT_SPEED: f32 = 14.0;

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    /// Pointer is locked to the view; movement is ignored otherwise.
    pub captured: bool,
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub sprint: bool,
}

fn axis(pos: bool, neg: bool) -> f32 {
    (pos as i8 - neg as i8) as f32
}

impl InputState {
    pub fn move_axis(&self) -> f32 {
        axis(self.forward, self.backward)
    }

    pub fn strafe_axis(&self) -> f32 {
        axis(self.right, self.left)
    }

    pub fn heave_axis(&self) -> f32 {
        axis(self.up, self.down)
    }
}

/// The locally owned pose. Only this client ever writes it.
#[derive(Debug, Clone, Copy)]
pub struct LocalPlayer {
    pub pos: Vec3,
    pub rot: Quat,
    pub speed_multiplier: f32,
}

impl Default for LocalPlayer {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            rot: Quat::IDENTITY,
            speed_multiplier: 1.0,
        }
    }
}

impl LocalPlayer {
    /// Applies one frame of input. Forward is local -Z, strafe is local +X,
    /// heave is world +Y.
    pub fn apply(&mut self, input: &InputState, dt: f32) {
        if !input.captured {
            return;
        }
        let base = if input.sprint { SPRINT_SPEED } else { WALK_SPEED };
        let speed = base * self.speed_multiplier;
        let step = speed * dt;

        let local = Vec3::new(input.strafe_axis() * step, 0.0, -input.move_axis() * step);
        self.pos = self.pos + self.rot.rotate(local);
        self.pos.y += input.heave_axis() * step;
    }

    /// Turns the view by `delta` (applied in local space).
    pub fn look(&mut self, delta: Quat) {
        self.rot = (self.rot * delta).normalize();
    }
}
