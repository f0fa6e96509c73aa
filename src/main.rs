//! OpenQRun command-line interface.
//!
//! Three commands:
//!
//! 1. **Phonon workflow** (`oqrun <job_file> [--resume]`): runs the ph.x
//!    restart workflow described by the job file.
//! 2. **NEB restart** (`oqrun neb-restart --send|--dont-send <parent_dir>`):
//!    restarts a walltime-stopped neb.x calculation, or stages the restart
//!    input for inspection with `--dont-send`.
//! 3. **Template creation** (`oqrun ci <job_file>`): writes a commented
//!    job-file template.
//!
//! Built-in help: `oqrun --help`, `oqrun --help keywords`,
//! `oqrun --help workflow`.

use log::{info, warn};
use oqrun::checkpoint::Checkpoint;
use oqrun::handlers::ph_handlers;
use oqrun::naming::FileNaming;
use oqrun::qe::{NebInterface, PhInterface};
use oqrun::restart::RestartRunner;
use oqrun::settings::SettingsManager;
use oqrun::{cleanup, help, neb, parser, template, validation};
use std::env;
use std::path::{Path, PathBuf};
use std::process;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        help::print_general_help(&args[0]);
        process::exit(1);
    }

    match args[1].as_str() {
        "--help" | "-h" => {
            let topic = args.get(2).map(String::as_str).unwrap_or("general");
            if !help::print_topic(&args[0], topic) {
                eprintln!("Error: Unknown help topic: {}", topic);
                process::exit(1);
            }
        }
        "ci" => {
            if args.len() < 3 {
                eprintln!("Error: Missing file argument");
                eprintln!("Usage: {} ci <job_file>", args[0]);
                process::exit(1);
            }
            let path = Path::new(&args[2]);
            match template::write_job_template(path) {
                Ok(()) => {
                    println!("Template job file created: {}", path.display());
                    println!("\nNext steps:");
                    println!("  1. Point prefix and parent_dir at a finished pw.x run");
                    println!("  2. Adjust the q-points and INPUTPH overrides");
                    println!("  3. Run the workflow: {} {}", args[0], path.display());
                }
                Err(e) => {
                    eprintln!("Error creating template: {}", e);
                    process::exit(1);
                }
            }
        }
        "neb-restart" => {
            let send = match args.get(2).map(String::as_str) {
                Some("--send") => true,
                Some("--dont-send") => false,
                _ => {
                    eprintln!("The first parameter can only be either --send or --dont-send");
                    process::exit(1);
                }
            };
            let parent_dir = match args.get(3) {
                Some(dir) => PathBuf::from(dir),
                None => {
                    eprintln!("Must provide as second parameter the parent directory");
                    process::exit(1);
                }
            };
            if let Err(e) = run_neb_restart(send, &parent_dir) {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        command if !command.starts_with('-') => {
            let job_path = Path::new(&args[1]);
            let resume = args.iter().any(|a| a == "--resume");
            match run_ph_workflow(job_path, resume) {
                Ok(()) => println!("\n****Phonon workflow finished successfully****"),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        command => {
            eprintln!("Error: Unknown command: {}", command);
            help::print_general_help(&args[0]);
            process::exit(1);
        }
    }
}

/// Runs the phonon restart workflow for one job file.
fn run_ph_workflow(job_path: &Path, resume: bool) -> Result<(), Box<dyn std::error::Error>> {
    let settings = SettingsManager::load()?;
    let job = parser::parse_job_file(job_path)?;

    for warning in validation::validate_job(&job)? {
        warn!("{}", warning);
    }

    let naming = FileNaming::new(job_path);
    let workdir = job_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let checkpoint_path = workdir.join(naming.checkpoint());

    let command = job
        .config
        .ph_command
        .clone()
        .unwrap_or_else(|| settings.executables().ph.clone());
    let interface = PhInterface::new(command);

    let runner = if resume && checkpoint_path.is_file() {
        let loaded = Checkpoint::load(&checkpoint_path)?;
        info!(
            "resuming from checkpoint after iteration {}",
            loaded.ctx.iteration
        );
        RestartRunner::resume(
            &interface,
            loaded.config,
            &naming,
            workdir.clone(),
            settings.runner(),
            ph_handlers(),
            loaded.ctx,
        )
    } else {
        if resume {
            warn!(
                "no checkpoint at {}, starting from scratch",
                checkpoint_path.display()
            );
        }
        RestartRunner::new(
            &interface,
            &job,
            &naming,
            workdir.clone(),
            settings.runner(),
            ph_handlers(),
        )
    };
    let mut runner = runner.with_checkpoint(checkpoint_path);

    let outcome = runner.run()?;

    println!();
    println!("Converged after {} iteration(s)", outcome.iterations);
    if let Some(wall) = &outcome.calc.report.wall_time {
        println!("Final run wall time: {}", wall);
    }
    println!("Final output: {}", outcome.calc.output_path.display());

    cleanup::cleanup_iterations(
        &workdir,
        &naming,
        outcome.iterations,
        settings.cleanup(),
        false,
    )?;

    Ok(())
}

/// Restarts (or stages a restart of) a walltime-stopped neb.x calculation.
fn run_neb_restart(send: bool, parent_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let settings = SettingsManager::load()?;
    let parent = neb::check_parent(parent_dir)?;
    let restart = neb::create_restart(&parent);

    if !send {
        let staged = neb::submit_test(&parent, &restart)?;
        println!("Test submission for restart of {}", parent.input_path.display());
        println!("Input file staged at {}", staged.display());
        return Ok(());
    }

    let interface = NebInterface::new(settings.executables().neb.clone());
    let (output_path, report) = neb::submit(&parent, &restart, &interface)?;

    if report.is_successful() {
        println!("NEB restart completed successfully");
        println!("Output: {}", output_path.display());
    } else {
        println!("NEB restart finished with warnings:");
        for warning in &report.warnings {
            println!("  {}", warning);
        }
        for warning in &report.parser_warnings {
            println!("  {}", warning);
        }
        println!("Output: {}", output_path.display());
        process::exit(1);
    }

    Ok(())
}
