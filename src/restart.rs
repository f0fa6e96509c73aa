//! The phonon restart controller.
//!
//! [`RestartRunner`] is the workflow around one `ph.x` calculation: it
//! prepares an input from the working parameters, submits it, inspects the
//! outcome, lets the handler table patch the parameters on failure, and goes
//! again until the run succeeds, a handler aborts, or the iteration ceiling
//! is reached. The loop follows the classic restart-workflow outline:
//!
//! ```text
//! setup
//! while should_run:
//!     prepare_calculation
//!     run_calculation
//!     inspect_calculation
//! results
//! ```
//!
//! Two copies of the job parameters are kept. `inputs_raw` is frozen at
//! setup; `inputs` is what the handlers mutate between iterations. Only the
//! runner itself writes the keys it owns (`prefix`, `outdir`, `recover`,
//! `max_seconds`), and it does so on the working copy right before each
//! submission.

use crate::config::{Defaults, JobConfig, JobOptions};
use crate::handlers::{run_handlers, ErrorHandler};
use crate::namelist::{Namelist, NamelistFile, Value};
use crate::naming::FileNaming;
use crate::parser::JobInput;
use crate::qe::{CompletedCalc, QeError, QeInterface};
use crate::settings::RunnerSettings;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Error type for a whole workflow run.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// I/O failure outside the calculation itself
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The external program could not be driven
    #[error(transparent)]
    Qe(#[from] QeError),
    /// A handler decided the workflow cannot continue
    #[error("workflow aborted: {0}")]
    Aborted(String),
    /// The retry ceiling was reached without success
    #[error("calculation did not succeed within {0} iterations")]
    ExceededMaxIterations(usize),
}

/// Where the next submission restarts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RestartPoint {
    /// Only the parent pw.x scratch exists; start the phonon run fresh
    Parent,
    /// A previous phonon calculation left scratch to recover from
    Previous(Box<CompletedCalc>),
}

/// The job parameters a submission is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkInputs {
    /// The `INPUTPH` namelist
    pub inputph: Namelist,
    /// Phonon wave vectors
    pub qpoints: Vec<[f64; 3]>,
    /// Scheduler-style resource options
    pub options: JobOptions,
}

/// Mutable workflow context, checkpointable between iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerCtx {
    /// Parameters as they were at setup; never mutated afterwards
    pub inputs_raw: WorkInputs,
    /// Working parameters the handlers patch
    pub inputs: WorkInputs,
    /// Restart pointer for the next submission
    pub restart_from: RestartPoint,
    /// Submissions made so far
    pub iteration: usize,
    /// Consecutive failures no handler recognized
    pub unexpected_failures: usize,
    /// The successful calculation, once there is one
    pub finished: Option<CompletedCalc>,
    /// Why the workflow aborted, if it did
    pub aborted: Option<String>,
}

impl RunnerCtx {
    /// Seeds a context from validated inputs; the pristine copy is taken
    /// here.
    pub fn new(inputs: WorkInputs) -> Self {
        Self {
            inputs_raw: inputs.clone(),
            inputs,
            restart_from: RestartPoint::Parent,
            iteration: 0,
            unexpected_failures: 0,
            finished: None,
            aborted: None,
        }
    }

    /// Marks the workflow aborted; the loop stops before the next
    /// submission.
    pub fn abort(&mut self, reason: String) {
        error!("{}", reason);
        self.aborted = Some(reason);
    }
}

/// Result of a converged workflow.
#[derive(Debug, Clone)]
pub struct RunnerOutcome {
    /// The calculation that succeeded
    pub calc: CompletedCalc,
    /// How many submissions it took
    pub iterations: usize,
}

/// The restart workflow around one phonon calculation.
pub struct RestartRunner<'a> {
    interface: &'a dyn QeInterface,
    config: JobConfig,
    naming: &'a FileNaming,
    workdir: PathBuf,
    handlers: Vec<ErrorHandler>,
    defaults: Defaults,
    max_iterations: usize,
    checkpoint_path: Option<PathBuf>,
    ctx: RunnerCtx,
}

impl<'a> RestartRunner<'a> {
    /// Builds a runner for a freshly parsed job.
    ///
    /// Job-file values win over settings for the knobs both can carry.
    pub fn new(
        interface: &'a dyn QeInterface,
        job: &JobInput,
        naming: &'a FileNaming,
        workdir: PathBuf,
        runner_settings: &RunnerSettings,
        handlers: Vec<ErrorHandler>,
    ) -> Self {
        let options = JobOptions {
            max_wallclock_seconds: job
                .config
                .max_wallclock_seconds
                .unwrap_or(runner_settings.max_wallclock_seconds),
        };
        let inputs = WorkInputs {
            inputph: job.inputph.clone(),
            qpoints: job.qpoints.clone(),
            options,
        };
        Self {
            interface,
            config: job.config.clone(),
            naming,
            workdir,
            handlers,
            defaults: runner_settings.defaults(),
            max_iterations: job
                .config
                .max_iterations
                .unwrap_or(runner_settings.max_iterations),
            checkpoint_path: None,
            ctx: RunnerCtx::new(inputs),
        }
    }

    /// Rebuilds a runner from a checkpointed context.
    pub fn resume(
        interface: &'a dyn QeInterface,
        config: JobConfig,
        naming: &'a FileNaming,
        workdir: PathBuf,
        runner_settings: &RunnerSettings,
        handlers: Vec<ErrorHandler>,
        ctx: RunnerCtx,
    ) -> Self {
        let max_iterations = config
            .max_iterations
            .unwrap_or(runner_settings.max_iterations);
        Self {
            interface,
            config,
            naming,
            workdir,
            handlers,
            defaults: runner_settings.defaults(),
            max_iterations,
            checkpoint_path: None,
            ctx,
        }
    }

    /// Enables checkpointing to `path` after every iteration.
    pub fn with_checkpoint(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    /// Read-only view of the context, mainly for checkpointing.
    pub fn ctx(&self) -> &RunnerCtx {
        &self.ctx
    }

    /// The effective retry ceiling.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Drives the workflow to completion.
    pub fn run(&mut self) -> Result<RunnerOutcome, WorkflowError> {
        info!(
            "starting phonon restart workflow for prefix '{}' (at most {} iterations)",
            self.config.prefix, self.max_iterations
        );

        while self.should_run() {
            self.ctx.iteration += 1;
            let input = self.prepare_calculation();
            let calc = self.run_calculation(&input)?;
            self.inspect_calculation(calc);
            self.save_checkpoint();
        }

        self.results()
    }

    fn should_run(&self) -> bool {
        self.ctx.finished.is_none()
            && self.ctx.aborted.is_none()
            && self.ctx.iteration < self.max_iterations
    }

    /// Assembles the input for the next submission from the working
    /// parameters.
    fn prepare_calculation(&mut self) -> NamelistFile {
        if let RestartPoint::Previous(prev) = &self.ctx.restart_from {
            info!(
                "recovering from PhCalculation<{}> scratch",
                prev.label
            );
            self.ctx.inputs.inputph.set("recover", Value::Bool(true));
        }

        self.prepare_process_inputs();

        let mut inputph = self.ctx.inputs.inputph.clone();
        inputph.set("prefix", Value::Str(self.config.prefix.clone()));
        inputph.set(
            "outdir",
            Value::Str(self.config.parent_dir.display().to_string()),
        );

        let mut file = NamelistFile::new();
        file.push_namelist(inputph);
        push_qpoint_cards(&mut file, &self.ctx.inputs.qpoints);
        file
    }

    /// Gives `max_seconds` a fraction of the wall budget so the binary can
    /// stop and write recover data instead of being killed. A value already
    /// present in the working inputs (a handler's reduction) is kept.
    fn prepare_process_inputs(&mut self) {
        if self.ctx.inputs.inputph.get("max_seconds").is_none() {
            let max_wallclock_seconds = self.ctx.inputs.options.max_wallclock_seconds;
            let max_seconds =
                (max_wallclock_seconds as f64 * self.defaults.delta_factor_max_seconds) as i64;
            self.ctx
                .inputs
                .inputph
                .set("max_seconds", Value::Int(max_seconds));
        }
    }

    fn run_calculation(&self, input: &NamelistFile) -> Result<CompletedCalc, WorkflowError> {
        let label = format!("{}_iter{}", self.naming.basename(), self.ctx.iteration);
        let input_path = self
            .workdir
            .join(self.naming.iteration_input(self.ctx.iteration));
        let output_path = self
            .workdir
            .join(self.naming.iteration_output(self.ctx.iteration));

        info!(
            "launching PhCalculation<{}> (iteration {}/{})",
            label, self.ctx.iteration, self.max_iterations
        );

        self.interface.write_input(input, &input_path)?;
        self.interface.run_calculation(&input_path, &output_path)?;
        let report = self.interface.read_output(&output_path)?;

        Ok(CompletedCalc {
            label,
            input_path,
            output_path,
            input: input.clone(),
            report,
        })
    }

    fn inspect_calculation(&mut self, calc: CompletedCalc) {
        if calc.report.is_successful() {
            info!(
                "PhCalculation<{}> completed successfully ({})",
                calc.label,
                calc.report
                    .wall_time
                    .as_deref()
                    .map(|w| format!("{} wall", w))
                    .unwrap_or_else(|| "no timing reported".to_string())
            );
            self.ctx.unexpected_failures = 0;
            self.ctx.finished = Some(calc);
            return;
        }

        let handled = run_handlers(&self.handlers, &mut self.ctx, &calc, &self.defaults);
        if handled {
            self.ctx.unexpected_failures = 0;
        } else {
            self.ctx.unexpected_failures += 1;
            warn!(
                "PhCalculation<{}> failed for an unrecognized reason ({} consecutive)",
                calc.label, self.ctx.unexpected_failures
            );
            if self.ctx.unexpected_failures >= 2 {
                self.ctx.abort(format!(
                    "PhCalculation<{}> failed twice in a row with no handler recognizing \
                     the failure",
                    calc.label
                ));
            }
        }
    }

    fn results(&mut self) -> Result<RunnerOutcome, WorkflowError> {
        if let Some(reason) = self.ctx.aborted.take() {
            return Err(WorkflowError::Aborted(reason));
        }
        if let Some(calc) = self.ctx.finished.take() {
            info!(
                "workflow converged after {} iteration(s)",
                self.ctx.iteration
            );
            return Ok(RunnerOutcome {
                calc,
                iterations: self.ctx.iteration,
            });
        }
        Err(WorkflowError::ExceededMaxIterations(self.max_iterations))
    }

    fn save_checkpoint(&self) {
        if let Some(path) = &self.checkpoint_path {
            let checkpoint = crate::checkpoint::Checkpoint::new(&self.ctx, &self.config);
            if let Err(e) = checkpoint.save(path) {
                // a failed checkpoint must not kill a healthy workflow
                warn!("could not write checkpoint {}: {}", path.display(), e);
            }
        }
    }
}

/// Renders the q-point cards: a bare triple for a single point, a counted
/// list (qplot form) otherwise.
fn push_qpoint_cards(file: &mut NamelistFile, qpoints: &[[f64; 3]]) {
    if qpoints.len() == 1 {
        let q = qpoints[0];
        file.push_card(&format!("{:.6} {:.6} {:.6}", q[0], q[1], q[2]));
    } else {
        file.push_card(&format!("{}", qpoints.len()));
        for q in qpoints {
            file.push_card(&format!("{:.6} {:.6} {:.6} 1", q[0], q[1], q[2]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QeCode;
    use crate::handlers::ph_handlers;
    use crate::parser::parse_job_text;
    use crate::qe::QeError;
    use crate::report;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;

    /// Scripted stand-in for ph.x: each submission consumes the next canned
    /// output.
    struct ScriptedPh {
        outputs: RefCell<Vec<&'static str>>,
        submitted: RefCell<Vec<String>>,
    }

    impl ScriptedPh {
        fn new(outputs: Vec<&'static str>) -> Self {
            Self {
                outputs: RefCell::new(outputs),
                submitted: RefCell::new(Vec::new()),
            }
        }
    }

    impl QeInterface for ScriptedPh {
        fn code(&self) -> QeCode {
            QeCode::Ph
        }

        fn write_input(&self, input: &NamelistFile, path: &Path) -> Result<(), QeError> {
            let rendered = input.render();
            self.submitted.borrow_mut().push(rendered.clone());
            fs::write(path, rendered)?;
            Ok(())
        }

        fn run_calculation(&self, _input: &Path, output: &Path) -> Result<(), QeError> {
            let mut outputs = self.outputs.borrow_mut();
            assert!(!outputs.is_empty(), "more submissions than scripted outputs");
            fs::write(output, outputs.remove(0))?;
            Ok(())
        }

        fn read_output(&self, output: &Path) -> Result<crate::report::CalcReport, QeError> {
            let text = fs::read_to_string(output)?;
            Ok(report::scan_output(&text, QeCode::Ph))
        }
    }

    const OK: &str = "     PHONON : 5m CPU 6m WALL\n\n     JOB DONE.\n";
    const WALLTIME: &str = "     Maximum CPU time exceeded\n\n     JOB DONE.\n";
    const SCF_FAIL: &str = "     phonon did not reach end of self consistency\n";
    const GARBAGE: &str = "     segfault, nothing recognizable here\n";
    const BAD_NAMELIST: &str =
        "     Error in routine phq_readin (1):\n     reading inputph namelist\n";

    fn workdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("oqrun_restart_{}", tag));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn job() -> crate::parser::JobInput {
        parse_job_text("*QPOINTS\n0 0 0\n*\nprefix = graphene\nparent_dir = ./out\n").unwrap()
    }

    fn run(tag: &str, outputs: Vec<&'static str>) -> (Result<RunnerOutcome, WorkflowError>, Vec<String>) {
        let dir = workdir(tag);
        let iface = ScriptedPh::new(outputs);
        let naming = FileNaming::new(Path::new("job.inp"));
        let settings = RunnerSettings::default();
        let job = job();
        let mut runner =
            RestartRunner::new(&iface, &job, &naming, dir.clone(), &settings, ph_handlers());
        let outcome = runner.run();
        let submitted = iface.submitted.borrow().clone();
        fs::remove_dir_all(&dir).unwrap();
        (outcome, submitted)
    }

    #[test]
    fn succeeds_on_the_first_try() {
        let (outcome, submitted) = run("first_try", vec![OK]);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(submitted.len(), 1);
        // the runner owns the budget and the scratch location
        assert!(submitted[0].contains("max_seconds = 1710"));
        assert!(submitted[0].contains("outdir = './out'"));
        assert!(submitted[0].contains("prefix = 'graphene'"));
        assert!(!submitted[0].contains("recover"));
    }

    #[test]
    fn walltime_stop_restarts_with_recover() {
        let (outcome, submitted) = run("walltime", vec![WALLTIME, OK]);
        let outcome = outcome.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert!(!submitted[0].contains("recover"));
        assert!(submitted[1].contains("recover = .true."));
        // budget is unchanged by a clean walltime stop
        assert!(submitted[1].contains("max_seconds = 1710"));
    }

    #[test]
    fn scf_failure_retries_with_damped_mixing() {
        let (outcome, submitted) = run("scf", vec![SCF_FAIL, OK]);
        assert_eq!(outcome.unwrap().iterations, 2);
        assert!(submitted[1].contains("alpha_mix(1) = 0.63"));
        assert!(submitted[1].contains("recover = .true."));
    }

    #[test]
    fn premature_end_reduces_the_budget_and_retries_fresh() {
        let (outcome, submitted) = run("premature", vec![GARBAGE, OK]);
        assert_eq!(outcome.unwrap().iterations, 2);
        assert!(submitted[1].contains("max_seconds = 1624"));
        assert!(!submitted[1].contains("recover"));
    }

    #[test]
    fn invalid_input_aborts_without_retrying() {
        let (outcome, submitted) = run("abort", vec![BAD_NAMELIST]);
        match outcome {
            Err(WorkflowError::Aborted(reason)) => {
                assert!(reason.contains("invalid input file"))
            }
            other => panic!("expected abort, got {:?}", other.map(|o| o.iterations)),
        }
        assert_eq!(submitted.len(), 1);
    }

    #[test]
    fn ceiling_bounds_the_number_of_submissions() {
        let (outcome, submitted) = run(
            "ceiling",
            vec![WALLTIME, WALLTIME, WALLTIME, WALLTIME, WALLTIME],
        );
        match outcome {
            Err(WorkflowError::ExceededMaxIterations(5)) => {}
            other => panic!("expected ceiling, got {:?}", other.map(|o| o.iterations)),
        }
        assert_eq!(submitted.len(), 5);
    }

    #[test]
    fn premature_reductions_compound_across_iterations() {
        let (_, submitted) = run("compound", vec![GARBAGE, GARBAGE, OK]);
        assert!(submitted[1].contains("max_seconds = 1624"));
        // 1624 * 0.95 = 1542.8 -> 1542
        assert!(submitted[2].contains("max_seconds = 1542"));
    }

    #[test]
    fn pristine_inputs_survive_handler_patching() {
        let dir = workdir("pristine");
        let iface = ScriptedPh::new(vec![SCF_FAIL, OK]);
        let naming = FileNaming::new(Path::new("job.inp"));
        let settings = RunnerSettings::default();
        let job = job();
        let mut runner =
            RestartRunner::new(&iface, &job, &naming, dir.clone(), &settings, ph_handlers());
        runner.run().unwrap();
        assert!(runner.ctx().inputs_raw.inputph.get("alpha_mix(1)").is_none());
        assert!(runner.ctx().inputs_raw.inputph.get("max_seconds").is_none());
        fs::remove_dir_all(&dir).unwrap();
    }
}
