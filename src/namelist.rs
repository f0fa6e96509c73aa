//! Fortran namelist model for Quantum ESPRESSO input files.
//!
//! Every Quantum ESPRESSO executable reads its parameters from Fortran
//! namelists (`&INPUTPH ... /`, `&PATH ... /`) followed by free-form cards
//! (the q-point line for `ph.x`, coordinate blocks for `neb.x`). The restart
//! workflows never interpret the cards; they only patch individual namelist
//! entries (`recover`, `max_seconds`, `alpha_mix(1)`, `restart_mode`) between
//! submissions. This module therefore models an input file as an ordered list
//! of namelists plus verbatim card lines.
//!
//! Entry order is preserved on render so that a patched restart input stays
//! diffable against the file that produced the failed run.
//!
//! # Value types
//!
//! QE accepts logicals, integers, reals and strings. Reals written with
//! Fortran double-precision exponents (`1.d-14`) are normalized to `e` form
//! on parse. Strings render single-quoted.
//!
//! # Example
//!
//! ```
//! use oqrun::namelist::{NamelistFile, Value};
//!
//! let text = "&INPUTPH\n  tr2_ph = 1.0e-16\n  max_seconds = 1710\n/\n0.0 0.0 0.0\n";
//! let mut input = NamelistFile::parse(text).unwrap();
//! input
//!     .namelist_mut("INPUTPH")
//!     .unwrap()
//!     .set("recover", Value::Bool(true));
//! assert!(input.render().contains("recover = .true."));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error type for namelist parsing.
#[derive(Error, Debug)]
pub enum NamelistError {
    /// Malformed namelist content, with the 1-based line number
    #[error("namelist parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number of the offending line
        line: usize,
        /// What went wrong
        message: String,
    },
}

/// A single namelist value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Fortran logical, rendered `.true.` / `.false.`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Real, rendered with a decimal point so QE reads it as such
    Real(f64),
    /// Character string, rendered single-quoted
    Str(String),
}

impl Value {
    /// Numeric view of the value; `Int` and `Real` both qualify.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Integer view of the value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Logical view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, ".true."),
            Value::Bool(false) => write!(f, ".false."),
            Value::Int(i) => write!(f, "{}", i),
            Value::Real(r) => {
                if r.fract() == 0.0 && r.abs() < 1.0e15 {
                    write!(f, "{:.1}", r)
                } else {
                    write!(f, "{}", r)
                }
            }
            Value::Str(s) => write!(f, "'{}'", s),
        }
    }
}

/// One named namelist: an insertion-ordered `key = value` map.
///
/// Keys are stored verbatim, so indexed parameters such as `alpha_mix(1)`
/// are ordinary keys here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namelist {
    name: String,
    entries: Vec<(String, Value)>,
}

impl Namelist {
    /// Creates an empty namelist with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// The namelist name as written after `&`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets `key` to `value`, replacing an existing entry in place so the
    /// rendered file keeps its ordering.
    pub fn set(&mut self, key: &str, value: Value) {
        for entry in &mut self.entries {
            if entry.0.eq_ignore_ascii_case(key) {
                entry.1 = value;
                return;
            }
        }
        self.entries.push((key.to_string(), value));
    }

    /// Looks up `key`, case-insensitively as Fortran does.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Numeric lookup accepting both `Int` and `Real` entries.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Removes `key`, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.entries.remove(idx).1)
    }

    /// True when the namelist carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates entries in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A complete QE input file: namelists in order, then verbatim cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamelistFile {
    namelists: Vec<Namelist>,
    cards: Vec<String>,
}

impl NamelistFile {
    /// Creates an empty file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a namelist by name, case-insensitively.
    pub fn namelist(&self, name: &str) -> Option<&Namelist> {
        self.namelists
            .iter()
            .find(|nl| nl.name.eq_ignore_ascii_case(name))
    }

    /// Mutable lookup by name.
    pub fn namelist_mut(&mut self, name: &str) -> Option<&mut Namelist> {
        self.namelists
            .iter_mut()
            .find(|nl| nl.name.eq_ignore_ascii_case(name))
    }

    /// Returns the namelist with the given name, appending an empty one if
    /// the file does not have it yet.
    pub fn get_or_insert_mut(&mut self, name: &str) -> &mut Namelist {
        if let Some(idx) = self
            .namelists
            .iter()
            .position(|nl| nl.name.eq_ignore_ascii_case(name))
        {
            &mut self.namelists[idx]
        } else {
            self.namelists.push(Namelist::new(name));
            self.namelists.last_mut().unwrap()
        }
    }

    /// Appends a namelist.
    pub fn push_namelist(&mut self, namelist: Namelist) {
        self.namelists.push(namelist);
    }

    /// The verbatim card lines following the namelists.
    pub fn cards(&self) -> &[String] {
        &self.cards
    }

    /// Appends a card line.
    pub fn push_card(&mut self, line: &str) {
        self.cards.push(line.to_string());
    }

    /// Renders the file in the layout QE expects.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for nl in &self.namelists {
            out.push('&');
            out.push_str(&nl.name);
            out.push('\n');
            for (key, value) in nl.iter() {
                out.push_str(&format!("  {} = {}\n", key, value));
            }
            out.push_str("/\n");
        }
        for card in &self.cards {
            out.push_str(card);
            out.push('\n');
        }
        out
    }

    /// Parses an existing input file.
    ///
    /// Accepts the forms QE itself accepts for the parts the workflows touch:
    /// one or more assignments per line (comma separated), `!` comments,
    /// `.true./.false./T/F` logicals, Fortran `d` exponents, quoted and bare
    /// strings. Everything after the final `/` is kept verbatim as cards.
    pub fn parse(text: &str) -> Result<Self, NamelistError> {
        let mut file = NamelistFile::new();
        let mut current: Option<Namelist> = None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = strip_comment(raw);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(rest) = trimmed.strip_prefix('&') {
                if current.is_some() {
                    return Err(NamelistError::Parse {
                        line: lineno,
                        message: "namelist opened inside another namelist".to_string(),
                    });
                }
                let name = rest.trim();
                if name.is_empty() {
                    return Err(NamelistError::Parse {
                        line: lineno,
                        message: "missing namelist name after '&'".to_string(),
                    });
                }
                current = Some(Namelist::new(name));
                continue;
            }

            if trimmed.starts_with('/') {
                match current.take() {
                    Some(nl) => file.namelists.push(nl),
                    None => {
                        return Err(NamelistError::Parse {
                            line: lineno,
                            message: "'/' outside of a namelist".to_string(),
                        })
                    }
                }
                continue;
            }

            match current.as_mut() {
                Some(nl) => {
                    for assignment in split_assignments(trimmed) {
                        let (key, value) = assignment.split_once('=').ok_or_else(|| {
                            NamelistError::Parse {
                                line: lineno,
                                message: format!("expected 'key = value', got '{}'", assignment),
                            }
                        })?;
                        let key = key.trim();
                        if key.is_empty() {
                            return Err(NamelistError::Parse {
                                line: lineno,
                                message: "empty key".to_string(),
                            });
                        }
                        nl.set(key, parse_value(value.trim()));
                    }
                }
                // Card region: lines outside any namelist are kept verbatim.
                None => file.cards.push(raw.trim_end().to_string()),
            }
        }

        if current.is_some() {
            return Err(NamelistError::Parse {
                line: text.lines().count(),
                message: "unterminated namelist".to_string(),
            });
        }

        Ok(file)
    }
}

/// Strips a `!` comment, respecting single-quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut in_quote = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '!' if !in_quote => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Splits `a = 1, b = 2` into individual assignments; commas inside quotes
/// do not separate.
fn split_assignments(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            ',' if !in_quote => {
                let piece = line[start..i].trim();
                if !piece.is_empty() {
                    parts.push(piece);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let piece = line[start..].trim();
    if !piece.is_empty() {
        parts.push(piece);
    }
    parts
}

/// Interprets a single value token the way Fortran list-directed input
/// would: logicals, integers, reals (with `d` exponents), quoted strings,
/// then bare strings as the fallback.
pub fn parse_value(token: &str) -> Value {
    let lower = token.to_ascii_lowercase();
    match lower.as_str() {
        ".true." | ".t." | "t" => return Value::Bool(true),
        ".false." | ".f." | "f" => return Value::Bool(false),
        _ => {}
    }

    if (token.starts_with('\'') && token.ends_with('\'') && token.len() >= 2)
        || (token.starts_with('"') && token.ends_with('"') && token.len() >= 2)
    {
        return Value::Str(token[1..token.len() - 1].to_string());
    }

    if let Ok(i) = token.parse::<i64>() {
        return Value::Int(i);
    }

    // Fortran double-precision exponents: 1.d-14 -> 1.e-14
    let normalized = lower.replace('d', "e");
    if let Ok(r) = normalized.parse::<f64>() {
        return Value::Real(r);
    }

    Value::Str(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PH_INPUT: &str = "\
&INPUTPH
  prefix = 'graphene'
  outdir = './out'
  tr2_ph = 1.0d-16
  max_seconds = 1710
  recover = .false.
/
0.0 0.0 0.0
";

    #[test]
    fn parses_a_ph_input() {
        let file = NamelistFile::parse(PH_INPUT).unwrap();
        let inputph = file.namelist("INPUTPH").unwrap();
        assert_eq!(
            inputph.get("prefix"),
            Some(&Value::Str("graphene".to_string()))
        );
        assert_eq!(inputph.get("max_seconds"), Some(&Value::Int(1710)));
        assert_eq!(inputph.get("recover"), Some(&Value::Bool(false)));
        assert_eq!(inputph.get_f64("tr2_ph"), Some(1.0e-16));
        assert_eq!(file.cards(), &["0.0 0.0 0.0".to_string()]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let file = NamelistFile::parse(PH_INPUT).unwrap();
        assert!(file.namelist("inputph").is_some());
        assert!(file.namelist("INPUTPH").unwrap().get("PREFIX").is_some());
    }

    #[test]
    fn set_replaces_in_place() {
        let mut file = NamelistFile::parse(PH_INPUT).unwrap();
        let inputph = file.namelist_mut("INPUTPH").unwrap();
        inputph.set("recover", Value::Bool(true));
        inputph.set("alpha_mix(1)", Value::Real(0.7));
        let rendered = file.render();
        let recover_pos = rendered.find("recover = .true.").unwrap();
        let alpha_pos = rendered.find("alpha_mix(1) = 0.7").unwrap();
        // recover keeps its original slot, the new key goes last
        assert!(recover_pos < alpha_pos);
    }

    #[test]
    fn render_parse_round_trip() {
        let file = NamelistFile::parse(PH_INPUT).unwrap();
        let again = NamelistFile::parse(&file.render()).unwrap();
        assert_eq!(file, again);
    }

    #[test]
    fn splits_comma_separated_assignments() {
        let text = "&PATH\n  restart_mode = 'from_scratch', nstep_path = 50\n/\n";
        let file = NamelistFile::parse(text).unwrap();
        let path = file.namelist("PATH").unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.get("nstep_path"), Some(&Value::Int(50)));
    }

    #[test]
    fn strips_comments_outside_quotes() {
        let text = "&INPUTPH\n  prefix = 'a!b' ! trailing note\n/\n";
        let file = NamelistFile::parse(text).unwrap();
        assert_eq!(
            file.namelist("INPUTPH").unwrap().get("prefix"),
            Some(&Value::Str("a!b".to_string()))
        );
    }

    #[test]
    fn unterminated_namelist_is_an_error() {
        let err = NamelistFile::parse("&INPUTPH\n  recover = .true.\n").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn whole_reals_render_with_a_decimal_point() {
        assert_eq!(Value::Real(1700.0).to_string(), "1700.0");
        assert_eq!(Value::Real(0.95).to_string(), "0.95");
    }
}
