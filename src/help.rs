//! Built-in help system.

/// Prints general usage.
pub fn print_general_help(program_name: &str) {
    println!("OpenQRun - Automated restart runner for Quantum ESPRESSO");
    println!();
    println!("Usage:");
    println!("  {} <job_file>                 Run the phonon restart workflow", program_name);
    println!("  {} <job_file> --resume        Resume from the job's checkpoint", program_name);
    println!("  {} neb-restart --send <dir>   Restart a walltime-stopped neb.x run", program_name);
    println!("  {} neb-restart --dont-send <dir>", program_name);
    println!("                                  Stage the restart input without running");
    println!("  {} ci <job_file>              Create a template job file", program_name);
    println!();
    println!("Help topics:");
    println!("  {} --help keywords            Job file keywords", program_name);
    println!("  {} --help workflow            How the restart loop works", program_name);
}

/// Prints the job-file keyword reference.
pub fn print_keywords_help() {
    println!("Job file sections:");
    println!("  *QPOINTS ... *        One q-point per line, three components each");
    println!("  *INPUTPH ... *        key = value overrides for the INPUTPH namelist");
    println!();
    println!("Top-level keywords:");
    println!("  prefix                 Prefix of the parent pw.x calculation");
    println!("  parent_dir             outdir of the parent pw.x calculation");
    println!("  max_iterations         Retry ceiling (default from settings, 5)");
    println!("  max_wallclock_seconds  Wall budget per submission (default 1800)");
    println!("  ph_command             Executable override, e.g. 'mpirun -np 4 ph.x'");
    println!();
    println!("Keys managed by the workflow (set values are overwritten):");
    println!("  prefix, outdir, recover, max_seconds");
}

/// Prints a description of the restart loop.
pub fn print_workflow_help() {
    println!("The phonon workflow submits ph.x, inspects its output, and retries");
    println!("until it succeeds or the iteration ceiling is reached. Recognized");
    println!("failures, in priority order:");
    println!();
    println!("  400  unreadable INPUTPH namelist      abort, the input is invalid");
    println!("  300  'Maximum CPU time exceeded'      restart with recover = .true.");
    println!("  200  self-consistency not reached     damp alpha_mix(1) by 0.9, restart");
    println!("  100  output ends before JOB DONE      shrink max_seconds by 0.95, retry");
    println!();
    println!("Two consecutive unrecognized failures abort the workflow. Progress is");
    println!("checkpointed after every iteration; rerun with --resume to continue.");
}

/// Dispatches a help topic; returns false for unknown topics.
pub fn print_topic(program_name: &str, topic: &str) -> bool {
    match topic {
        "keywords" => print_keywords_help(),
        "workflow" => print_workflow_help(),
        "general" => print_general_help(program_name),
        _ => return false,
    }
    true
}
