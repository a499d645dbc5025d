//! Behaviours that ship with the client.

use async_trait::async_trait;
use mimic_config::MimicConfig;
use mimic_core::{BehaviourCategory, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::behaviour::{Behaviour, BehaviourContext};
use crate::command::CommandBehaviour;

/// Does nothing for a while. Keeps the idle cycle from hammering the same
/// few activities back to back.
///
/// Settings: `min_duration_secs` (default 30), `max_duration_secs` (default 120).
pub struct PauseBehaviour;

impl PauseBehaviour {
    pub const ID: &'static str = "idle_pause";
}

#[async_trait]
impl Behaviour for PauseBehaviour {
    fn id(&self) -> &str {
        Self::ID
    }

    fn display_name(&self) -> &str {
        "Idle pause"
    }

    fn category(&self) -> BehaviourCategory {
        BehaviourCategory::Idle
    }

    fn description(&self) -> &str {
        "Stay inactive for a random duration"
    }

    async fn run(&self, ctx: BehaviourContext) -> Result<()> {
        let min = ctx.setting_or("min_duration_secs", 30u64)?;
        let max = ctx.setting_or("max_duration_secs", 120u64)?;
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };

        let secs = rand::thread_rng().gen_range(lo..=hi);
        debug!(behaviour = %ctx.behaviour_id(), secs, "pausing");
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(())
    }
}

/// The built-in behaviours plus one command behaviour per configured
/// `[behaviours.<id>]` section that declares a `command`.
pub fn default_behaviours(config: &MimicConfig) -> Vec<Arc<dyn Behaviour>> {
    let mut behaviours: Vec<Arc<dyn Behaviour>> = vec![Arc::new(PauseBehaviour)];
    for behaviour in CommandBehaviour::from_config(config) {
        behaviours.push(Arc::new(behaviour));
    }
    behaviours
}
