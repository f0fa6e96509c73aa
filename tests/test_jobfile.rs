use oqrun::namelist::Value;
use oqrun::parser::parse_job_file;
use oqrun::validation::{validate_job, ErrorCategory};
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[test]
fn test_parse_job_file_from_disk() {
    let input = r#"
# MgB2 phonons at the zone center
*QPOINTS
0.0 0.0 0.0
*

*INPUTPH
tr2_ph = 1.0d-16
alpha_mix(1) = 0.5
*

prefix = mgb2
parent_dir = ./mgb2_out
max_iterations = 4
"#;
    let path = Path::new("test_jobfile_input.inp");
    let mut file = File::create(path).unwrap();
    write!(file, "{}", input).unwrap();

    let result = parse_job_file(path);
    assert!(result.is_ok());
    let job = result.unwrap();
    assert_eq!(job.config.prefix, "mgb2");
    assert_eq!(job.config.max_iterations, Some(4));
    assert_eq!(job.qpoints, vec![[0.0, 0.0, 0.0]]);
    assert_eq!(job.inputph.get("alpha_mix(1)"), Some(&Value::Real(0.5)));

    fs::remove_file(path).unwrap();
}

#[test]
fn test_validation_flags_missing_parent() {
    let input = "*QPOINTS\n0 0 0\n*\nprefix = mgb2\nparent_dir = ./no_such_dir_oqrun\n";
    let path = Path::new("test_jobfile_missing_parent.inp");
    fs::write(path, input).unwrap();

    let job = parse_job_file(path).unwrap();
    let err = validate_job(&job).unwrap_err();
    assert_eq!(err.category, ErrorCategory::MissingDependencies);
    assert!(err.suggestion.is_some());

    fs::remove_file(path).unwrap();
}

#[test]
fn test_validation_accepts_job_with_parent_scratch() {
    let workdir = std::env::temp_dir().join("oqrun_jobfile_parent");
    fs::create_dir_all(workdir.join("mgb2.save")).unwrap();

    let input = format!(
        "*QPOINTS\n0 0 0\n*\nprefix = mgb2\nparent_dir = {}\n",
        workdir.display()
    );
    let path = Path::new("test_jobfile_with_parent.inp");
    fs::write(path, input).unwrap();

    let job = parse_job_file(path).unwrap();
    let warnings = validate_job(&job).unwrap();
    assert!(warnings.is_empty());

    fs::remove_file(path).unwrap();
    fs::remove_dir_all(&workdir).unwrap();
}
