//! Priority-ordered error handlers for the phonon workflow.
//!
//! When a submission comes back unsuccessful, the runner walks this table in
//! descending priority. Each handler inspects the failed calculation's report
//! and either declines (`None`) or claims the failure, patches the working
//! inputs for the next attempt, and says whether classification should stop
//! (`do_break`). Fatal conditions abort the workflow through the context
//! instead of patching anything.
//!
//! The table encodes the known failure modes of `ph.x`:
//!
//! | priority | condition | corrective action |
//! |---|---|---|
//! | 400 | unreadable `INPUTPH` namelist | abort, the input is invalid |
//! | 300 | `max_seconds` budget ran out | restart with `recover` |
//! | 200 | self-consistency not reached | damp `alpha_mix(1)` by 0.9, restart |
//! | 100 | killed before `JOB DONE` | shrink `max_seconds` by 0.95 |
//!
//! Handlers mutate only the working inputs and the restart pointer; the
//! pristine copy of the job parameters stays untouched so the workflow can
//! always be reasoned about from its starting point.

use crate::config::{Defaults, QeCode};
use crate::namelist::Value;
use crate::qe::CompletedCalc;
use crate::report::{
    premature_end_warning, WARNING_MAX_CPU_TIME, WARNING_READING_INPUTPH,
    WARNING_SCF_NOT_CONVERGED,
};
use crate::restart::{RestartPoint, RunnerCtx};
use log::{debug, info, warn};

/// What a handler decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerReport {
    /// The failure was recognized and acted on
    pub handled: bool,
    /// Stop consulting lower-priority handlers
    pub do_break: bool,
}

impl HandlerReport {
    /// Convenience constructor.
    pub fn new(handled: bool, do_break: bool) -> Self {
        Self { handled, do_break }
    }
}

/// Signature shared by all handlers.
pub type HandlerFn = fn(&mut RunnerCtx, &CompletedCalc, &Defaults) -> Option<HandlerReport>;

/// One entry of the classifier table.
pub struct ErrorHandler {
    /// Higher priorities are consulted first
    pub priority: u32,
    /// Stable name used in logs
    pub name: &'static str,
    /// The predicate-plus-action itself
    pub handle: HandlerFn,
}

/// The handler table for `ph.x` failures.
pub fn ph_handlers() -> Vec<ErrorHandler> {
    vec![
        ErrorHandler {
            priority: 400,
            name: "invalid_namelist",
            handle: handle_invalid_namelist,
        },
        ErrorHandler {
            priority: 300,
            name: "walltime_exceeded",
            handle: handle_walltime_exceeded,
        },
        ErrorHandler {
            priority: 200,
            name: "scf_not_converged",
            handle: handle_scf_not_converged,
        },
        ErrorHandler {
            priority: 100,
            name: "premature_end",
            handle: handle_premature_end,
        },
    ]
}

/// Runs the table against one failed calculation.
///
/// Handlers are consulted in descending priority regardless of the order
/// they were registered in. Returns whether any handler claimed the failure.
pub fn run_handlers(
    handlers: &[ErrorHandler],
    ctx: &mut RunnerCtx,
    calc: &CompletedCalc,
    defaults: &Defaults,
) -> bool {
    let mut ordered: Vec<&ErrorHandler> = handlers.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut any_handled = false;
    for handler in ordered {
        if let Some(report) = (handler.handle)(ctx, calc, defaults) {
            debug!(
                "handler '{}' (priority {}) matched PhCalculation<{}>",
                handler.name, handler.priority, calc.label
            );
            any_handled |= report.handled;
            if report.do_break {
                break;
            }
        }
    }
    any_handled
}

/// The calculation failed because it could not read the generated input
/// file; retrying would reproduce the same failure.
fn handle_invalid_namelist(
    ctx: &mut RunnerCtx,
    calc: &CompletedCalc,
    _defaults: &Defaults,
) -> Option<HandlerReport> {
    if calc.report.any_warning_contains(WARNING_READING_INPUTPH) {
        ctx.abort(format!(
            "PhCalculation<{}> failed because of an invalid input file",
            calc.label
        ));
        return Some(HandlerReport::new(true, true));
    }
    None
}

/// The calculation ended nominally but ran out of its allotted wall time;
/// the next submission recovers from its scratch.
fn handle_walltime_exceeded(
    ctx: &mut RunnerCtx,
    calc: &CompletedCalc,
    _defaults: &Defaults,
) -> Option<HandlerReport> {
    if calc.report.has_warning(WARNING_MAX_CPU_TIME) {
        ctx.restart_from = RestartPoint::Previous(Box::new(calc.clone()));
        info!(
            "PhCalculation<{}> terminated because maximum wall time was exceeded, restarting",
            calc.label
        );
        return Some(HandlerReport::new(true, true));
    }
    None
}

/// The self-consistency loop stalled; damp the mixing parameter and restart
/// from the partial result.
fn handle_scf_not_converged(
    ctx: &mut RunnerCtx,
    calc: &CompletedCalc,
    defaults: &Defaults,
) -> Option<HandlerReport> {
    if calc.report.has_warning(WARNING_SCF_NOT_CONVERGED) {
        let alpha_mix_old = calc
            .input
            .namelist("INPUTPH")
            .and_then(|nl| nl.get_f64("alpha_mix(1)"))
            .unwrap_or(defaults.alpha_mix);
        let alpha_mix_new = 0.9 * alpha_mix_old;
        ctx.inputs
            .inputph
            .set("alpha_mix(1)", Value::Real(alpha_mix_new));
        ctx.restart_from = RestartPoint::Previous(Box::new(calc.clone()));
        info!(
            "PhCalculation<{}> terminated without reaching convergence, \
             setting alpha_mix to {} and restarting",
            calc.label, alpha_mix_new
        );
        return Some(HandlerReport::new(true, true));
    }
    None
}

/// The binary never reached the end of execution, most likely killed from
/// outside; shrink the internal time budget so it can stop on its own next
/// time.
fn handle_premature_end(
    ctx: &mut RunnerCtx,
    calc: &CompletedCalc,
    defaults: &Defaults,
) -> Option<HandlerReport> {
    if calc
        .report
        .has_parser_warning(&premature_end_warning(QeCode::Ph))
    {
        let factor = defaults.delta_factor_max_seconds;
        let max_seconds = ctx
            .inputs
            .inputph
            .get_f64("max_seconds")
            .or_else(|| {
                calc.input
                    .namelist("INPUTPH")
                    .and_then(|nl| nl.get_f64("max_seconds"))
            })
            .unwrap_or(ctx.inputs.options.max_wallclock_seconds as f64 * factor);
        let max_seconds_reduced = (max_seconds * factor) as i64;
        ctx.inputs
            .inputph
            .set("max_seconds", Value::Int(max_seconds_reduced));
        warn!(
            "PhCalculation<{}> was terminated prematurely, reducing max_seconds from {} to {}",
            calc.label, max_seconds, max_seconds_reduced
        );
        return Some(HandlerReport::new(true, false));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobOptions, QeCode};
    use crate::namelist::{Namelist, NamelistFile};
    use crate::report::scan_output;
    use crate::restart::WorkInputs;

    fn ctx() -> RunnerCtx {
        let inputs = WorkInputs {
            inputph: Namelist::new("INPUTPH"),
            qpoints: vec![[0.0, 0.0, 0.0]],
            options: JobOptions {
                max_wallclock_seconds: 1800,
            },
        };
        RunnerCtx::new(inputs)
    }

    fn calc(output: &str) -> CompletedCalc {
        calc_with_input(output, NamelistFile::new())
    }

    fn calc_with_input(output: &str, input: NamelistFile) -> CompletedCalc {
        CompletedCalc {
            label: "test_iter1".to_string(),
            input_path: "test_iter1.ph.in".into(),
            output_path: "test_iter1.ph.out".into(),
            input,
            report: scan_output(output, QeCode::Ph),
        }
    }

    #[test]
    fn walltime_failure_sets_the_restart_point() {
        let mut ctx = ctx();
        let calc = calc("Maximum CPU time exceeded\nJOB DONE.\n");
        let handled = run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        assert!(handled);
        assert!(matches!(ctx.restart_from, RestartPoint::Previous(_)));
        assert!(ctx.aborted.is_none());
    }

    #[test]
    fn scf_failure_damps_alpha_mix_from_the_default() {
        let mut ctx = ctx();
        let calc = calc("     phonon did not reach end of self consistency\n");
        run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        let alpha = ctx.inputs.inputph.get_f64("alpha_mix(1)").unwrap();
        assert!((alpha - 0.9 * 0.70).abs() < 1e-12);
        assert!(matches!(ctx.restart_from, RestartPoint::Previous(_)));
    }

    #[test]
    fn scf_failure_damps_the_value_the_failed_run_used() {
        let mut ctx = ctx();
        let mut input = NamelistFile::new();
        input
            .get_or_insert_mut("INPUTPH")
            .set("alpha_mix(1)", Value::Real(0.5));
        let calc = calc_with_input("     phonon did not reach end of self consistency\n", input);
        run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        let alpha = ctx.inputs.inputph.get_f64("alpha_mix(1)").unwrap();
        assert!((alpha - 0.45).abs() < 1e-12);
    }

    #[test]
    fn invalid_namelist_aborts() {
        let mut ctx = ctx();
        let calc = calc(
            "     Error in routine phq_readin (1):\n     reading inputph namelist\n",
        );
        let handled = run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        assert!(handled);
        assert!(ctx.aborted.is_some());
        // no retry parameters were touched
        assert!(ctx.inputs.inputph.is_empty());
    }

    #[test]
    fn abort_outranks_the_premature_end_handler() {
        // the namelist error output also lacks JOB DONE, so both the 400 and
        // 100 handlers match; priority must make the abort win and break
        let mut ctx = ctx();
        let calc = calc(
            "     Error in routine phq_readin (1):\n     reading inputph namelist\n",
        );
        run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        assert!(ctx.aborted.is_some());
        assert!(ctx.inputs.inputph.get("max_seconds").is_none());
    }

    #[test]
    fn premature_end_shrinks_max_seconds() {
        let mut ctx = ctx();
        ctx.inputs.inputph.set("max_seconds", Value::Int(1710));
        let calc = calc("     some scheduler kill, no trailer\n");
        let handled = run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        assert!(handled);
        assert_eq!(
            ctx.inputs.inputph.get("max_seconds"),
            Some(&Value::Int(1624)) // 1710 * 0.95, truncated
        );
        // premature termination retries in place, it does not recover
        assert!(matches!(ctx.restart_from, RestartPoint::Parent));
    }

    #[test]
    fn premature_end_falls_back_to_the_wallclock_budget() {
        let mut ctx = ctx();
        let calc = calc("     nothing recognizable\n");
        run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        // 1800 * 0.95 = 1710, then one more factor for the reduction
        assert_eq!(
            ctx.inputs.inputph.get("max_seconds"),
            Some(&Value::Int(1624))
        );
    }

    #[test]
    fn successful_output_matches_nothing() {
        let mut ctx = ctx();
        let calc = calc("     PHONON : 1m CPU 1m WALL\n\n     JOB DONE.\n");
        let handled = run_handlers(&ph_handlers(), &mut ctx, &calc, &Defaults::default());
        assert!(!handled);
        assert!(ctx.inputs.inputph.is_empty());
    }

    #[test]
    fn registration_order_does_not_matter() {
        let mut handlers = ph_handlers();
        handlers.reverse();
        let mut ctx = ctx();
        let calc = calc(
            "     Error in routine phq_readin (1):\n     reading inputph namelist\n",
        );
        run_handlers(&handlers, &mut ctx, &calc, &Defaults::default());
        assert!(ctx.aborted.is_some());
        assert!(ctx.inputs.inputph.get("max_seconds").is_none());
    }
}
