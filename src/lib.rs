#![deny(missing_docs)]

//! OpenQRun - Automated restart runner for Quantum ESPRESSO
//!
//! OpenQRun babysits long-running Quantum ESPRESSO calculations. Its main
//! workflow wraps the phonon code `ph.x`: submit, scan the output, classify
//! any failure against a priority-ordered table of known failure modes,
//! patch the input parameters accordingly, and resubmit, bounded by a retry
//! ceiling. A second, one-shot workflow restarts a `neb.x` path optimization
//! that ran out of its CPU-time budget.
//!
//! # The restart loop
//!
//! ```text
//! setup -> validate
//! while should_run:
//!     prepare    (recover flag, max_seconds budget)
//!     run        (write input, launch ph.x, capture output)
//!     inspect    (scan output; on failure, consult the handler table)
//! results
//! ```
//!
//! The handler table encodes the domain knowledge. In descending priority:
//! an unreadable `INPUTPH` namelist aborts the workflow, a walltime stop
//! restarts with `recover = .true.`, a stalled self-consistency loop damps
//! `alpha_mix(1)` by 0.9 and restarts, and an output cut off before
//! `JOB DONE` shrinks `max_seconds` by 0.95 and retries. The first matching
//! handler normally ends classification.
//!
//! # Quick start
//!
//! ```no_run
//! use oqrun::handlers::ph_handlers;
//! use oqrun::naming::FileNaming;
//! use oqrun::parser::parse_job_file;
//! use oqrun::qe::PhInterface;
//! use oqrun::restart::RestartRunner;
//! use oqrun::settings::RunnerSettings;
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let job_path = Path::new("graphene.inp");
//!     let job = parse_job_file(job_path)?;
//!     let naming = FileNaming::new(job_path);
//!     let interface = PhInterface::new("ph.x".to_string());
//!     let mut runner = RestartRunner::new(
//!         &interface,
//!         &job,
//!         &naming,
//!         ".".into(),
//!         &RunnerSettings::default(),
//!         ph_handlers(),
//!     );
//!     let outcome = runner.run()?;
//!     println!("converged after {} iteration(s)", outcome.iterations);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`restart`] - the phonon restart controller
//! - [`handlers`] - the priority-ordered error classifier
//! - [`report`] - output scanning into structured warnings
//! - [`namelist`] - Fortran namelist model for QE inputs
//! - [`qe`] - interfaces to the `ph.x` and `neb.x` executables
//! - [`neb`] - one-shot NEB restart workflow
//! - [`parser`] - job file parsing
//! - [`checkpoint`] - resumable workflow state
//! - [`settings`] - layered INI configuration
//!
//! # License
//!
//! MIT License - see LICENSE file for details

/// Resumable workflow state
pub mod checkpoint;
/// Post-run cleanup of intermediate files
pub mod cleanup;
pub mod config;
pub mod handlers;
/// Built-in help system
pub mod help;
pub mod namelist;
/// Dynamic file naming based on the job file basename
pub mod naming;
pub mod neb;
pub mod parser;
pub mod qe;
pub mod report;
pub mod restart;
/// Configuration management system
pub mod settings;
/// Job file templates
pub mod template;
/// Pre-flight job validation
pub mod validation;

pub use config::JobConfig;
pub use restart::RestartRunner;
