//! Visualization Selector
//!
//! Picks a chart encoding for a result table from its column types and the
//! wording of the question (or SQL) that produced it. Rules are tried in a
//! fixed priority order:
//!
//! 1. outcome terms with a demographic dimension: grouped bar
//! 2. outcome terms alone: pie over the outcome categories
//! 3. a continuous quantity plus "distribution": histogram
//! 4. a categorical grouping keyword: count bar
//! 5. shape of the table
//!
//! Bar-like charts over more rows than the configured limit are suppressed
//! with a notice instead of being rendered.

use crate::config::{DataExpConfig, DEFAULT_BAR_ROW_LIMIT, DEFAULT_HISTOGRAM_BINS};
use crate::dataset::{schema_of, ColumnSchema, PrimitiveType};
use crate::error::Result;
use crate::transport;
use lazy_static::lazy_static;
use polars::prelude::DataFrame;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

pub const MIN_BINS: u32 = 10;
pub const MAX_BINS: u32 = 100;

const OUTCOME_TERMS: &[&str] = &["survival", "survived", "survive", "death", "died", "outcome"];
const OUTCOME_COLUMNS: &[&str] = &["survived", "outcome"];
const GENDER_TERMS: &[&str] = &["gender", "sex"];
const GENDER_COLUMNS: &[&str] = &["sex", "gender"];
const CLASS_TERMS: &[&str] = &["class"];
const CLASS_COLUMNS: &[&str] = &["pclass", "class"];
const CONTINUOUS_TERMS: &[&str] = &["age", "fare"];
const COUNT_HINTS: &[&str] = &["count", "rate", "total", "num", "pct", "percent", "ratio"];

/// Grouping keyword and the column-name fragments it refers to
const GROUPING_TERMS: &[(&str, &[&str])] = &[
    ("class", &["pclass", "class"]),
    ("embark", &["embarked", "embark", "port"]),
    ("port", &["embarked", "embark", "port"]),
    ("category", &["category"]),
    ("deck", &["deck", "cabin"]),
];

lazy_static! {
    static ref RECORDS_START: Regex = Regex::new(r"\[\s*\{").expect("valid records pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    GroupedBar,
    Bar,
    CountBar,
    Histogram,
    Scatter,
    Line,
    Pie,
}

impl ChartKind {
    /// Bar-like charts are subject to the row-count guard
    pub fn is_bar_like(&self) -> bool {
        matches!(self, ChartKind::GroupedBar | ChartKind::Bar | ChartKind::CountBar)
    }
}

impl std::fmt::Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChartKind::GroupedBar => "Grouped Bar Chart",
            ChartKind::Bar => "Bar Chart",
            ChartKind::CountBar => "Count Plot",
            ChartKind::Histogram => "Histogram",
            ChartKind::Scatter => "Scatter Plot",
            ChartKind::Line => "Line Chart",
            ChartKind::Pie => "Pie Chart",
        };
        write!(f, "{}", s)
    }
}

/// Declarative mapping from columns to visual channels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    /// Absent when the chart counts rows per `x`
    pub y: Option<String>,
    pub color: Option<String>,
    /// Histogram bin count
    pub bins: Option<u32>,
    pub title: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ChartDecision {
    Render(ChartSpec),
    /// A chart was chosen but the guard stopped it
    Suppressed { kind: ChartKind, notice: String },
    NoChart { reason: String },
}

impl ChartDecision {
    pub fn spec(&self) -> Option<&ChartSpec> {
        match self {
            ChartDecision::Render(spec) => Some(spec),
            _ => None,
        }
    }
}

pub struct VisualizationSelector {
    bar_row_limit: usize,
    bins: u32,
}

impl Default for VisualizationSelector {
    fn default() -> Self {
        Self::new(DEFAULT_BAR_ROW_LIMIT, DEFAULT_HISTOGRAM_BINS)
    }
}

impl VisualizationSelector {
    /// `bins` is clamped to 10..=100
    pub fn new(bar_row_limit: usize, bins: u32) -> Self {
        Self {
            bar_row_limit,
            bins: bins.clamp(MIN_BINS, MAX_BINS),
        }
    }

    pub fn from_config(config: &DataExpConfig) -> Self {
        Self::new(config.bar_row_limit, config.histogram_bins)
    }

    pub fn with_bins(self, bins: u32) -> Self {
        Self::new(self.bar_row_limit, bins)
    }

    pub fn bins(&self) -> u32 {
        self.bins
    }

    /// Choose a chart for raw records, e.g. ones pulled out of role output
    pub fn select_records(&self, records: &[Value], question: &str) -> Result<ChartDecision> {
        let table = transport::records_to_table(records)?;
        Ok(self.select(&table, question))
    }

    pub fn select(&self, table: &DataFrame, question: &str) -> ChartDecision {
        if table.height() == 0 || table.width() == 0 {
            return ChartDecision::NoChart {
                reason: "No data available for visualization".to_string(),
            };
        }

        let columns = ColumnSet::new(schema_of(table));
        let q = question.to_lowercase();

        let chosen = self
            .outcome_chart(&columns, &q)
            .or_else(|| self.distribution_chart(&columns, &q))
            .or_else(|| grouping_chart(&columns, &q))
            .or_else(|| self.shape_chart(&columns));

        let decision = match chosen {
            Some(draft) => self.finish(draft, table.height()),
            None => ChartDecision::NoChart {
                reason: "No suitable columns available for visualization".to_string(),
            },
        };
        debug!(?decision, "Chart decision");
        decision
    }

    fn finish(&self, draft: Draft, rows: usize) -> ChartDecision {
        if draft.kind.is_bar_like() && rows > self.bar_row_limit {
            return ChartDecision::Suppressed {
                kind: draft.kind,
                notice: format!(
                    "Too many categories for a {} ({} rows, limit {}). Consider filtering your data or try a different chart type.",
                    draft.kind, rows, self.bar_row_limit
                ),
            };
        }
        ChartDecision::Render(ChartSpec {
            kind: draft.kind,
            x: draft.x,
            y: draft.y,
            color: draft.color,
            bins: (draft.kind == ChartKind::Histogram).then_some(self.bins),
            title: draft.title,
            row_count: rows,
        })
    }

    fn outcome_chart(&self, columns: &ColumnSet, q: &str) -> Option<Draft> {
        if !mentions(q, OUTCOME_TERMS) {
            return None;
        }
        let outcome = columns.named(OUTCOME_COLUMNS);

        let asked_for = if mentions(q, GENDER_TERMS) {
            columns.named(GENDER_COLUMNS)
        } else if mentions(q, CLASS_TERMS) {
            columns.named(CLASS_COLUMNS)
        } else {
            None
        };
        let dimension = asked_for
            .or_else(|| columns.named(GENDER_COLUMNS))
            .or_else(|| columns.named(CLASS_COLUMNS))
            .or_else(|| {
                if mentions(q, GENDER_TERMS) || mentions(q, CLASS_TERMS) {
                    columns.first_categorical_except(&[outcome])
                } else {
                    None
                }
            });

        if let Some(x) = dimension {
            let y = columns.measure(&[Some(x), outcome]);
            return Some(Draft {
                kind: ChartKind::GroupedBar,
                title: format!("Survival by {}", x),
                x: x.to_string(),
                y: y.map(str::to_string),
                color: outcome.filter(|o| *o != x).map(str::to_string),
            });
        }

        let names = outcome.or_else(|| columns.first_name())?;
        Some(Draft {
            kind: ChartKind::Pie,
            title: "Overall Survival Rate".to_string(),
            x: names.to_string(),
            y: columns.measure(&[Some(names)]).map(str::to_string),
            color: None,
        })
    }

    fn distribution_chart(&self, columns: &ColumnSet, q: &str) -> Option<Draft> {
        if !q.contains("distribution") {
            return None;
        }
        let term = CONTINUOUS_TERMS.iter().find(|t| q.contains(*t))?;
        let column = columns
            .numeric()
            .find(|c| c.name.to_lowercase().contains(term))
            .or_else(|| columns.numeric().next())?;
        Some(Draft {
            kind: ChartKind::Histogram,
            title: format!("Distribution of {}", column.name),
            x: column.name.clone(),
            y: None,
            color: None,
        })
    }

    fn shape_chart(&self, columns: &ColumnSet) -> Option<Draft> {
        let all = &columns.0;

        match all.as_slice() {
            [only] if only.data_type.is_numeric() => Some(Draft {
                kind: ChartKind::Histogram,
                title: format!("Distribution of {}", only.name),
                x: only.name.clone(),
                y: None,
                color: None,
            }),
            [only] => Some(count_of(&only.name)),
            [first, second] if second.data_type.is_numeric() => Some(Draft {
                kind: ChartKind::Bar,
                title: format!("{} by {}", second.name, first.name),
                x: first.name.clone(),
                y: Some(second.name.clone()),
                color: None,
            }),
            [first, second] => Some(Draft {
                kind: ChartKind::Pie,
                title: format!("{} by {}", second.name, first.name),
                x: first.name.clone(),
                y: Some(second.name.clone()),
                color: None,
            }),
            [first, ..] => {
                let mut numeric = columns.numeric();
                let x = numeric.next()?;
                match numeric.next() {
                    Some(y) => Some(Draft {
                        kind: ChartKind::Scatter,
                        title: format!("{} vs {}", y.name, x.name),
                        x: x.name.clone(),
                        y: Some(y.name.clone()),
                        color: None,
                    }),
                    // temporal first column with a single numeric column
                    None if first.data_type == PrimitiveType::Temporal => Some(Draft {
                        kind: ChartKind::Line,
                        title: format!("{} over {}", x.name, first.name),
                        x: first.name.clone(),
                        y: Some(x.name.clone()),
                        color: None,
                    }),
                    None => None,
                }
            }
            [] => None,
        }
    }
}

fn grouping_chart(columns: &ColumnSet, q: &str) -> Option<Draft> {
    GROUPING_TERMS
        .iter()
        .filter(|(term, _)| q.contains(term))
        .find_map(|(_, fragments)| {
            let column = columns.0.iter().find(|c| {
                let lower = c.name.to_lowercase();
                fragments.iter().any(|f| lower.contains(f))
            })?;
            let mut draft = count_of(&column.name);
            draft.y = columns
                .measure(&[Some(column.name.as_str())])
                .map(str::to_string);
            Some(draft)
        })
}

fn count_of(column: &str) -> Draft {
    Draft {
        kind: ChartKind::CountBar,
        title: format!("Count of {}", column),
        x: column.to_string(),
        y: None,
        color: None,
    }
}

/// Chart kinds that make sense for a table's column types.
pub fn available_charts(table: &DataFrame) -> Vec<ChartKind> {
    let schema = schema_of(table);
    let numeric = schema.iter().filter(|c| c.data_type.is_numeric()).count();
    let categorical = schema
        .iter()
        .filter(|c| is_categorical(c.data_type))
        .count();

    let mut charts = Vec::new();
    if categorical > 0 && numeric > 0 {
        charts.push(ChartKind::Bar);
    }
    if numeric >= 2 {
        charts.push(ChartKind::Scatter);
        charts.push(ChartKind::Line);
    }
    if numeric > 0 {
        charts.push(ChartKind::Histogram);
    }
    if categorical > 0 {
        charts.push(ChartKind::CountBar);
    }
    charts
}

/// First non-empty JSON array of objects embedded in free-form text.
pub fn extract_records(text: &str) -> Option<Vec<Value>> {
    RECORDS_START.find_iter(text).find_map(|m| {
        let mut stream =
            serde_json::Deserializer::from_str(&text[m.start()..]).into_iter::<Value>();
        match stream.next()? {
            Ok(Value::Array(items)) if !items.is_empty() && items.iter().all(Value::is_object) => {
                Some(items)
            }
            _ => None,
        }
    })
}

struct Draft {
    kind: ChartKind,
    x: String,
    y: Option<String>,
    color: Option<String>,
    title: String,
}

fn mentions(q: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| q.contains(t))
}

fn is_categorical(data_type: PrimitiveType) -> bool {
    matches!(data_type, PrimitiveType::String | PrimitiveType::Boolean)
}

struct ColumnSet(Vec<ColumnSchema>);

impl ColumnSet {
    fn new(schema: Vec<ColumnSchema>) -> Self {
        Self(schema)
    }

    fn first_name(&self) -> Option<&str> {
        self.0.first().map(|c| c.name.as_str())
    }

    /// Column whose lower-cased name is one of `names`
    fn named(&self, names: &[&str]) -> Option<&str> {
        self.0
            .iter()
            .find(|c| names.contains(&c.name.to_lowercase().as_str()))
            .map(|c| c.name.as_str())
    }

    fn numeric(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.0.iter().filter(|c| c.data_type.is_numeric())
    }

    fn first_categorical_except(&self, skip: &[Option<&str>]) -> Option<&str> {
        self.0
            .iter()
            .filter(|c| is_categorical(c.data_type))
            .map(|c| c.name.as_str())
            .find(|name| !skip.contains(&Some(*name)))
    }

    /// Value axis: a count-like numeric column, else the first other numeric one
    fn measure(&self, skip: &[Option<&str>]) -> Option<&str> {
        let candidates: Vec<&str> = self
            .numeric()
            .map(|c| c.name.as_str())
            .filter(|name| !skip.contains(&Some(*name)))
            .collect();
        candidates
            .iter()
            .find(|name| {
                let lower = name.to_lowercase();
                COUNT_HINTS.iter().any(|h| lower.contains(h))
            })
            .or_else(|| candidates.first())
            .copied()
    }
}
