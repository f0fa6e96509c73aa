//! Job-file template generation.
//!
//! `oqrun ci <name>` writes a commented starting point the user edits, the
//! same way one would copy a colleague's job file and change the paths.

use std::fs;
use std::io;
use std::path::Path;

/// The template written by the `ci` command. Guaranteed to parse; the
/// placeholder paths are what the user has to change.
pub const JOB_TEMPLATE: &str = "\
# OpenQRun phonon job file
#
# The workflow runs ph.x against the scratch of a finished pw.x
# calculation and restarts it on known failures until it converges
# or the iteration ceiling is reached.

*QPOINTS
0.0 0.0 0.0
*

*INPUTPH
tr2_ph = 1.0d-16
*

# prefix of the parent pw.x calculation
prefix = pwscf

# outdir of the parent pw.x calculation (must contain <prefix>.save)
parent_dir = ./out

# wall-clock budget per submission, in seconds
max_wallclock_seconds = 1800

# uncomment to override the executable from the settings
# ph_command = mpirun -np 4 ph.x
";

/// Writes the template to `path`, refusing to overwrite an existing file.
pub fn write_job_template(path: &Path) -> io::Result<()> {
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("'{}' already exists", path.display()),
        ));
    }
    fs::write(path, JOB_TEMPLATE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_job_text;

    #[test]
    fn template_parses() {
        let job = parse_job_text(JOB_TEMPLATE).unwrap();
        assert_eq!(job.config.prefix, "pwscf");
        assert_eq!(job.qpoints, vec![[0.0, 0.0, 0.0]]);
        assert_eq!(job.config.max_wallclock_seconds, Some(1800));
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = std::env::temp_dir().join("oqrun_template_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("job.inp");
        write_job_template(&path).unwrap();
        let err = write_job_template(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        fs::remove_dir_all(&dir).unwrap();
    }
}
