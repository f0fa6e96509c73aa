//! Checkpoint system for resuming restart workflows.
//!
//! The runner context is saved as JSON after every iteration, so a workflow
//! interrupted between submissions (machine reboot, killed terminal) can
//! pick up where it stopped with `--resume` instead of re-running finished
//! iterations. A checkpoint carries everything `inspect_calculation` had
//! already decided: the patched working inputs, the restart pointer, and the
//! iteration counter.
//!
//! Unlike the calculation scratch, a checkpoint is small and cheap; writing
//! one never interrupts a healthy workflow (failures only log a warning).

use crate::config::JobConfig;
use crate::restart::RunnerCtx;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Saved workflow state between iterations.
#[derive(Serialize, Deserialize)]
pub struct Checkpoint {
    /// The runner context as of the last finished iteration
    pub ctx: RunnerCtx,
    /// The job configuration the workflow was started with
    pub config: JobConfig,
}

impl Checkpoint {
    /// Snapshots the current workflow state.
    pub fn new(ctx: &RunnerCtx, config: &JobConfig) -> Self {
        Self {
            ctx: ctx.clone(),
            config: config.clone(),
        }
    }

    /// Saves the checkpoint to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads a checkpoint from a JSON file.
    pub fn load(path: &Path) -> Result<Checkpoint, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobOptions;
    use crate::namelist::{Namelist, Value};
    use crate::restart::{RestartPoint, WorkInputs};

    #[test]
    fn round_trips_a_patched_context() {
        let mut inputs = WorkInputs {
            inputph: Namelist::new("INPUTPH"),
            qpoints: vec![[0.25, 0.0, 0.0]],
            options: JobOptions {
                max_wallclock_seconds: 3600,
            },
        };
        inputs.inputph.set("tr2_ph", Value::Real(1.0e-16));

        let mut ctx = RunnerCtx::new(inputs);
        ctx.iteration = 3;
        ctx.inputs.inputph.set("alpha_mix(1)", Value::Real(0.63));
        ctx.inputs.inputph.set("recover", Value::Bool(true));

        let config = JobConfig {
            prefix: "graphene".to_string(),
            ..JobConfig::default()
        };

        let dir = std::env::temp_dir().join("oqrun_checkpoint_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("job.chk.json");

        Checkpoint::new(&ctx, &config).save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded.ctx.iteration, 3);
        assert_eq!(loaded.config.prefix, "graphene");
        assert_eq!(
            loaded.ctx.inputs.inputph.get("alpha_mix(1)"),
            Some(&Value::Real(0.63))
        );
        // the pristine copy was checkpointed unpatched
        assert!(loaded.ctx.inputs_raw.inputph.get("alpha_mix(1)").is_none());
        assert_eq!(loaded.ctx.restart_from, RestartPoint::Parent);

        fs::remove_dir_all(&dir).unwrap();
    }
}
