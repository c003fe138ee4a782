//! Server-assigned identities for sessions that join without a name.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use zone_shared::{
    net::AssignedIdentity,
    sanitize::{sanitize_display_name, sanitize_model_key},
};

/// Pools of display names and model keys handed out by the relay.
pub struct IdentityPool {
    names: Vec<String>,
    models: Vec<String>,
    rng: StdRng,
}

impl IdentityPool {
    /// Builds a pool. Entries are sanitized up front; ones that end up empty
    /// are discarded.
    pub fn new(names: &[String], models: &[String]) -> Self {
        Self::with_rng(names, models, StdRng::from_entropy())
    }

    pub fn with_rng(names: &[String], models: &[String], rng: StdRng) -> Self {
        let names = names
            .iter()
            .map(|n| sanitize_display_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        let models = models
            .iter()
            .map(|m| sanitize_model_key(m))
            .filter(|m| !m.is_empty())
            .collect();
        Self { names, models, rng }
    }

    /// Picks a name and model. `preferred_model` wins over the pool when set.
    ///
    /// Returns `None` if either pool is empty and nothing can stand in for it.
    pub fn assign(&mut self, preferred_model: Option<&str>) -> Option<AssignedIdentity> {
        let name = self.names.choose(&mut self.rng)?.clone();
        let model = match preferred_model {
            Some(m) => m.to_string(),
            None => self.models.choose(&mut self.rng)?.clone(),
        };
        Some(AssignedIdentity { name, model })
    }
}
