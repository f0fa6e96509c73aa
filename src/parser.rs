//! Job file parsing.
//!
//! A job file describes one phonon restart workflow: which pw.x run to start
//! from, the q-points, and any `INPUTPH` overrides. The format is
//! section-based (`*SECTION` opens a block, a lone `*` closes it) with
//! plain `key = value` pairs outside the sections:
//!
//! ```text
//! # graphene phonons, restart-managed
//! *QPOINTS
//! 0.0 0.0 0.0
//! *
//!
//! *INPUTPH
//! tr2_ph = 1.0d-16
//! alpha_mix(1) = 0.7
//! *
//!
//! prefix = graphene
//! parent_dir = ./out
//! max_wallclock_seconds = 3600
//! ```
//!
//! `#` starts a comment. Unknown top-level keys are rejected with their line
//! number; a typo silently ignored here would otherwise surface hours later
//! as a failed submission.

use crate::config::JobConfig;
use crate::namelist::{self, Namelist};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Error type for job file parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    /// I/O error when reading the job file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed job file content
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Type alias for parse operation results
type Result<T> = std::result::Result<T, ParseError>;

/// Everything a job file carries.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    /// Workflow-level configuration
    pub config: JobConfig,
    /// Phonon wave vectors, one triple per `*QPOINTS` line
    pub qpoints: Vec<[f64; 3]>,
    /// User overrides for the `INPUTPH` namelist
    pub inputph: Namelist,
}

/// Parses a job file from disk.
pub fn parse_job_file(path: &Path) -> Result<JobInput> {
    let content = fs::read_to_string(path)?;
    parse_job_text(&content)
}

/// Parses job file content.
pub fn parse_job_text(text: &str) -> Result<JobInput> {
    let mut config = JobConfig::default();
    let mut qpoints: Option<Vec<[f64; 3]>> = None;
    let mut inputph = Namelist::new("INPUTPH");

    let mut lines = text.lines().enumerate();
    while let Some((idx, raw)) = lines.next() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(section) = line.strip_prefix('*') {
            let section = section.trim().to_ascii_uppercase();
            if section.is_empty() {
                return Err(ParseError::Parse(format!(
                    "line {}: stray section terminator '*'",
                    idx + 1
                )));
            }
            let body = collect_section(&mut lines, &section)?;
            match section.as_str() {
                "QPOINTS" => qpoints = Some(parse_qpoints(&body)?),
                "INPUTPH" => parse_inputph(&body, &mut inputph)?,
                other => {
                    return Err(ParseError::Parse(format!(
                        "line {}: unknown section '*{}'",
                        idx + 1,
                        other
                    )))
                }
            }
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            ParseError::Parse(format!("line {}: expected 'key = value', got '{}'", idx + 1, line))
        })?;
        apply_key(&mut config, key.trim(), value.trim(), idx + 1)?;
    }

    let qpoints = qpoints.ok_or_else(|| {
        ParseError::Parse("missing required *QPOINTS section".to_string())
    })?;

    Ok(JobInput {
        config,
        qpoints,
        inputph,
    })
}

/// Gathers the lines of a section up to its closing `*`.
fn collect_section<'a, I>(lines: &mut I, section: &str) -> Result<Vec<(usize, &'a str)>>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut body = Vec::new();
    for (idx, raw) in lines {
        let line = strip_comment(raw).trim();
        if line == "*" {
            return Ok(body);
        }
        if !line.is_empty() {
            body.push((idx, line));
        }
    }
    Err(ParseError::Parse(format!(
        "section '*{}' is never closed with '*'",
        section
    )))
}

fn parse_qpoints(body: &[(usize, &str)]) -> Result<Vec<[f64; 3]>> {
    let mut qpoints = Vec::with_capacity(body.len());
    for (idx, line) in body {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(ParseError::Parse(format!(
                "line {}: a q-point needs exactly three components, got '{}'",
                idx + 1,
                line
            )));
        }
        let mut q = [0.0f64; 3];
        for (slot, field) in q.iter_mut().zip(&fields) {
            *slot = field.parse().map_err(|_| {
                ParseError::Parse(format!(
                    "line {}: invalid q-point component '{}'",
                    idx + 1,
                    field
                ))
            })?;
        }
        qpoints.push(q);
    }
    Ok(qpoints)
}

fn parse_inputph(body: &[(usize, &str)], inputph: &mut Namelist) -> Result<()> {
    for (idx, line) in body {
        let (key, value) = line.split_once('=').ok_or_else(|| {
            ParseError::Parse(format!(
                "line {}: expected 'key = value' inside *INPUTPH, got '{}'",
                idx + 1,
                line
            ))
        })?;
        inputph.set(key.trim(), namelist::parse_value(value.trim()));
    }
    Ok(())
}

fn apply_key(config: &mut JobConfig, key: &str, value: &str, lineno: usize) -> Result<()> {
    match key {
        "prefix" => config.prefix = value.to_string(),
        "parent_dir" => config.parent_dir = value.into(),
        "max_iterations" => {
            config.max_iterations = Some(value.parse().map_err(|_| {
                ParseError::Parse(format!("line {}: invalid max_iterations '{}'", lineno, value))
            })?)
        }
        "max_wallclock_seconds" => {
            config.max_wallclock_seconds = Some(value.parse().map_err(|_| {
                ParseError::Parse(format!(
                    "line {}: invalid max_wallclock_seconds '{}'",
                    lineno, value
                ))
            })?)
        }
        "ph_command" => config.ph_command = Some(value.to_string()),
        other => {
            return Err(ParseError::Parse(format!(
                "line {}: unknown keyword '{}'",
                lineno, other
            )))
        }
    }
    Ok(())
}

/// Strips a `#` comment.
fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namelist::Value;

    const JOB: &str = "\
# graphene phonons
*QPOINTS
0.0 0.0 0.0
0.5 0.0 0.0   # zone boundary
*

*INPUTPH
tr2_ph = 1.0d-16
alpha_mix(1) = 0.7
*

prefix = graphene
parent_dir = ./scf_out
max_wallclock_seconds = 3600
ph_command = mpirun -np 4 ph.x
";

    #[test]
    fn parses_a_full_job_file() {
        let job = parse_job_text(JOB).unwrap();
        assert_eq!(job.config.prefix, "graphene");
        assert_eq!(job.config.parent_dir.to_str(), Some("./scf_out"));
        assert_eq!(job.config.max_wallclock_seconds, Some(3600));
        assert_eq!(job.config.ph_command.as_deref(), Some("mpirun -np 4 ph.x"));
        assert_eq!(job.qpoints.len(), 2);
        assert_eq!(job.qpoints[1], [0.5, 0.0, 0.0]);
        assert_eq!(job.inputph.get_f64("tr2_ph"), Some(1.0e-16));
        assert_eq!(job.inputph.get("alpha_mix(1)"), Some(&Value::Real(0.7)));
    }

    #[test]
    fn qpoints_section_is_required() {
        let err = parse_job_text("prefix = x\n").unwrap_err();
        assert!(err.to_string().contains("*QPOINTS"));
    }

    #[test]
    fn unknown_keyword_reports_its_line() {
        let err = parse_job_text("*QPOINTS\n0 0 0\n*\nprefiks = x\n").unwrap_err();
        assert!(err.to_string().contains("line 4"));
        assert!(err.to_string().contains("prefiks"));
    }

    #[test]
    fn malformed_qpoint_is_rejected() {
        let err = parse_job_text("*QPOINTS\n0.0 0.0\n*\n").unwrap_err();
        assert!(err.to_string().contains("three components"));
    }

    #[test]
    fn unclosed_section_is_rejected() {
        let err = parse_job_text("*QPOINTS\n0 0 0\n").unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn inputph_is_optional() {
        let job = parse_job_text("*QPOINTS\n0 0 0\n*\n").unwrap();
        assert!(job.inputph.is_empty());
    }
}
