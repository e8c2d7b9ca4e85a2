//! SQL Validator
//!
//! Normalizes a candidate SQL string and rejects anything that is not a single
//! read-only SELECT. Runs on every query before execution, fallback queries
//! included. Pure: no I/O, same input always gives the same outcome.

use crate::config::PipelineConfig;
use crate::error::{InsightError, Result, ValidationError};
use lazy_static::lazy_static;
use regex::Regex;

/// Normalized SQL on success, rejection reason otherwise.
pub type ValidationOutcome = std::result::Result<String, ValidationError>;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?i)```(?:sql|json)?[ \t]*\r?\n?").unwrap();
}

#[derive(Debug)]
struct Fixup {
    pattern: Regex,
    replacement: String,
}

#[derive(Debug)]
pub struct SqlValidator {
    fixups: Vec<Fixup>,
    invalid_columns: Vec<(String, Regex)>,
    forbidden: Vec<(String, Regex)>,
    forbidden_create: Option<Regex>,
}

impl SqlValidator {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| InsightError::Config(format!("Invalid validator pattern '{}': {}", pattern, e)))
        };

        let fixups = config
            .join_fixups
            .iter()
            .map(|f| {
                Ok(Fixup {
                    pattern: compile(&format!("(?i){}", f.pattern))?,
                    replacement: f.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let invalid_columns = config
            .invalid_column_patterns
            .iter()
            .map(|p| Ok((p.clone(), compile(&format!(r"(?i)\b{}\b", regex::escape(p)))?)))
            .collect::<Result<Vec<_>>>()?;

        let forbidden = config
            .forbidden_keywords
            .iter()
            .map(|k| Ok((k.to_lowercase(), compile(&format!(r"(?i)\b{}\b", regex::escape(k)))?)))
            .collect::<Result<Vec<_>>>()?;

        let forbidden_create = if config.forbidden_create_targets.is_empty() {
            None
        } else {
            let targets: Vec<String> =
                config.forbidden_create_targets.iter().map(|t| regex::escape(t)).collect();
            Some(compile(&format!(r"(?i)\bcreate\s+({})\b", targets.join("|")))?)
        };

        Ok(Self { fixups, invalid_columns, forbidden, forbidden_create })
    }

    /// Normalization steps only; no rejection rules applied.
    pub fn normalize(&self, raw: &str) -> String {
        let unfenced = CODE_FENCE.replace_all(raw, "");

        // Everything before the first line starting with `select` is preamble.
        let body = unfenced
            .lines()
            .skip_while(|line| !starts_with_select(line.trim_start()))
            .collect::<Vec<_>>()
            .join("\n");
        let mut sql = body.trim().to_string();

        if let Some(stripped) = sql.strip_suffix(';') {
            sql = stripped.trim_end().to_string();
        }

        for fixup in &self.fixups {
            sql = fixup.pattern.replace_all(&sql, fixup.replacement.as_str()).into_owned();
        }

        sql
    }

    pub fn validate(&self, raw: &str) -> ValidationOutcome {
        let sql = self.normalize(raw);

        if !starts_with_select(&sql) {
            return Err(ValidationError::NotASelect);
        }

        // A terminator left after the single strip means a second (possibly empty) statement.
        if sql.ends_with(';') {
            return Err(ValidationError::NotASelect);
        }

        if let Some((pattern, _)) = self.invalid_columns.iter().find(|(_, re)| re.is_match(&sql)) {
            return Err(ValidationError::InvalidColumn { pattern: pattern.clone() });
        }

        if let Some((keyword, _)) = self.forbidden.iter().find(|(_, re)| re.is_match(&sql)) {
            return Err(ValidationError::ForbiddenOperation { keyword: keyword.clone() });
        }

        if let Some(create) = &self.forbidden_create {
            if create.is_match(&sql) {
                return Err(ValidationError::ForbiddenOperation { keyword: "create".to_string() });
            }
        }

        Ok(sql)
    }
}

fn starts_with_select(text: &str) -> bool {
    text.get(..6).map_or(false, |head| head.eq_ignore_ascii_case("select"))
}
