//! Chart type selection from the wording of a question.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Table,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::Pie => "pie",
            ChartType::Table => "table",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartType::Line),
            "bar" => Ok(ChartType::Bar),
            "pie" => Ok(ChartType::Pie),
            "table" => Ok(ChartType::Table),
            other => Err(format!("unknown chart type '{}'", other)),
        }
    }
}

lazy_static! {
    static ref TEMPORAL: Regex = Regex::new(
        r"(?i)\b(trend|over time|monthly|daily|weekly|yearly|growth|change|timeline|history|progression)\b"
    )
    .unwrap();
    static ref DISTRIBUTION: Regex = Regex::new(
        r"(?i)\b(distribution|breakdown|percentage|share|proportion|split|composition|category.*breakdown)\b"
    )
    .unwrap();
    static ref RANKING: Regex = Regex::new(
        r"(?i)\b(top|best|worst|highest|lowest|most|least|compare|comparison|rank|ranking|vs)\b"
    )
    .unwrap();
    static ref LISTING: Regex =
        Regex::new(r"(?i)\b(show me|list|details|recent|latest|all|who are|what are)\b").unwrap();

    /// Checked top-down; first hit wins.
    static ref RULES: Vec<(&'static Regex, ChartType)> = vec![
        (&*TEMPORAL, ChartType::Line),
        (&*DISTRIBUTION, ChartType::Pie),
        (&*RANKING, ChartType::Bar),
        (&*LISTING, ChartType::Table),
    ];
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChartTypeClassifier;

impl ChartTypeClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, question: &str) -> ChartType {
        RULES
            .iter()
            .find(|(pattern, _)| pattern.is_match(question))
            .map(|(_, chart)| *chart)
            .unwrap_or(ChartType::Table)
    }
}
