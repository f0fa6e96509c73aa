//! Pre-flight validation for phonon restart jobs.
//!
//! Catches setups that would burn a submission before anything is launched:
//! a missing parent scratch directory, no q-points, out-of-range mixing
//! parameters. Soft issues, such as keys the restart machinery owns and
//! will overwrite, come back as warnings rather than errors.

use crate::parser::JobInput;
use std::path::Path;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error with user guidance attached.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Error category for programmatic handling
    pub category: ErrorCategory,
    /// Human-readable error message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

/// Categories of validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid configuration parameters
    InvalidConfiguration,
    /// Missing required files or directories
    MissingDependencies,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n\nSuggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    fn new(category: ErrorCategory, message: String, suggestion: &str) -> Self {
        Self {
            category,
            message,
            suggestion: Some(suggestion.to_string()),
        }
    }
}

/// Validates a parsed job before the first submission.
///
/// Returns the list of soft warnings on success; hard problems come back as
/// a [`ValidationError`].
pub fn validate_job(job: &JobInput) -> ValidationResult<Vec<String>> {
    let mut warnings = Vec::new();

    if job.qpoints.is_empty() {
        return Err(ValidationError::new(
            ErrorCategory::InvalidConfiguration,
            "the *QPOINTS section is empty".to_string(),
            "list at least one q-point, e.g. '0.0 0.0 0.0' for the zone center",
        ));
    }

    if !job.config.parent_dir.is_dir() {
        return Err(ValidationError::new(
            ErrorCategory::MissingDependencies,
            format!(
                "parent scratch directory '{}' does not exist",
                job.config.parent_dir.display()
            ),
            "point parent_dir at the outdir of a finished pw.x run",
        ));
    }

    let save_dir = job
        .config
        .parent_dir
        .join(format!("{}.save", job.config.prefix));
    if !has_parent_charge_density(&job.config.parent_dir, &save_dir) {
        return Err(ValidationError::new(
            ErrorCategory::MissingDependencies,
            format!(
                "no pw.x results for prefix '{}' under '{}'",
                job.config.prefix,
                job.config.parent_dir.display()
            ),
            "check that prefix matches the pw.x calculation and that its scratch was kept",
        ));
    }

    if let Some(alpha) = job.inputph.get_f64("alpha_mix(1)") {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ValidationError::new(
                ErrorCategory::InvalidConfiguration,
                format!("alpha_mix(1) = {} is outside (0, 1]", alpha),
                "use a damping factor between 0 and 1; QE defaults to 0.7",
            ));
        }
    }

    if let Some(tr2) = job.inputph.get_f64("tr2_ph") {
        if tr2 <= 0.0 {
            return Err(ValidationError::new(
                ErrorCategory::InvalidConfiguration,
                format!("tr2_ph = {} must be positive", tr2),
                "a typical phonon threshold is 1.0d-16",
            ));
        }
    }

    // Keys the restart machinery owns; user values would be overwritten
    // every iteration.
    for owned in ["max_seconds", "outdir", "prefix", "recover"] {
        if job.inputph.get(owned).is_some() {
            warnings.push(format!(
                "'{}' in *INPUTPH is managed by the workflow and will be overwritten",
                owned
            ));
        }
    }

    Ok(warnings)
}

/// A usable parent either has the `.save` directory of a modern pw.x run or
/// the bare charge-density file older versions wrote.
fn has_parent_charge_density(parent_dir: &Path, save_dir: &Path) -> bool {
    save_dir.is_dir() || parent_dir.join("charge-density.dat").is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namelist::Value;
    use crate::parser::parse_job_text;
    use std::fs;

    fn job_with_parent(dir: &Path) -> JobInput {
        fs::create_dir_all(dir.join("graphene.save")).unwrap();
        let text = format!(
            "*QPOINTS\n0 0 0\n*\nprefix = graphene\nparent_dir = {}\n",
            dir.display()
        );
        parse_job_text(&text).unwrap()
    }

    #[test]
    fn accepts_a_well_formed_job() {
        let dir = std::env::temp_dir().join("oqrun_validation_ok");
        let job = job_with_parent(&dir);
        let warnings = validate_job(&job).unwrap();
        assert!(warnings.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_parent_dir_is_fatal() {
        let job = parse_job_text(
            "*QPOINTS\n0 0 0\n*\nparent_dir = /nonexistent/oqrun_test\n",
        )
        .unwrap();
        let err = validate_job(&job).unwrap_err();
        assert_eq!(err.category, ErrorCategory::MissingDependencies);
    }

    #[test]
    fn managed_keys_raise_warnings() {
        let dir = std::env::temp_dir().join("oqrun_validation_warn");
        let mut job = job_with_parent(&dir);
        job.inputph.set("max_seconds", Value::Int(100));
        let warnings = validate_job(&job).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("max_seconds"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn out_of_range_alpha_mix_is_fatal() {
        let dir = std::env::temp_dir().join("oqrun_validation_alpha");
        let mut job = job_with_parent(&dir);
        job.inputph.set("alpha_mix(1)", Value::Real(1.5));
        let err = validate_job(&job).unwrap_err();
        assert_eq!(err.category, ErrorCategory::InvalidConfiguration);
        fs::remove_dir_all(&dir).unwrap();
    }
}
