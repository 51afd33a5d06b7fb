use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

/// Number of sample records exposed per sheet schema.
pub const SAMPLE_SIZE: usize = 3;

/// Default row cap for `list` answers.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// A single spreadsheet cell value.
///
/// Coercion policy: a value is *numeric* when it is a `Number`, a `Bool`
/// (1 or 0), or `Text` whose trimmed form parses as `f64`. Empty text and
/// `Null` are not numeric. Everything else compares as its lowercased
/// string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value under the documented coercion policy.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    /// Aggregation coercion: unparseable numeric values count as zero.
    pub fn number_or_zero(&self) -> f64 {
        self.as_number().unwrap_or(0.0)
    }

    /// String form used for `contains` and textual comparisons.
    /// `Null` renders as the empty string.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Text(s) => s.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// One spreadsheet row: column name -> cell value, in column order.
/// Rows within a sheet may carry different column sets (sparse data).
pub type Record = IndexMap<String, Value>;

/// A named table of records.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Record>,
}

/// All loaded sheets, in workbook order. Sheets without any data rows are
/// dropped at construction.
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn from_sheets<I>(sheets: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<Record>)>,
    {
        Self {
            sheets: sheets
                .into_iter()
                .filter(|(_, rows)| !rows.is_empty())
                .map(|(name, rows)| Sheet { name, rows })
                .collect(),
        }
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Case-insensitive sheet lookup, first match in workbook order.
    pub fn sheet_ignore_case(&self, name: &str) -> Option<&Sheet> {
        let needle = name.to_lowercase();
        self.sheets.iter().find(|s| s.name.to_lowercase() == needle)
    }
}

/// Read-only view of one sheet, recomputed per file load. The column list
/// is the key set of the first record; the sample is the first
/// `SAMPLE_SIZE` records verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSchema {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub sample: SmallVec<[Record; SAMPLE_SIZE]>,
}

/// Filter comparison operator. Operator strings the generator invents that
/// we do not recognize deserialize to `Unknown`, which passes every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    Contains,
    Unknown,
}

impl From<String> for FilterOperator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "eq" => FilterOperator::Eq,
            "neq" => FilterOperator::Neq,
            "gt" => FilterOperator::Gt,
            "lt" => FilterOperator::Lt,
            "contains" => FilterOperator::Contains,
            _ => FilterOperator::Unknown,
        }
    }
}

/// One conjunctive row predicate from the generated plan. The column name
/// is model-supplied and possibly inexact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: Value,
}

/// Reduction applied to the filtered row set. Unrecognized type strings
/// deserialize to `Unknown` and behave as `list` capped at
/// `DEFAULT_LIST_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum AggregationType {
    Sum,
    Average,
    Count,
    Min,
    Max,
    #[default]
    List,
    Unknown,
}

impl From<String> for AggregationType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sum" => AggregationType::Sum,
            "average" => AggregationType::Average,
            "count" => AggregationType::Count,
            "min" => AggregationType::Min,
            "max" => AggregationType::Max,
            "list" => AggregationType::List,
            _ => AggregationType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    #[serde(rename = "type", default)]
    pub kind: AggregationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

/// Structured query plan produced by the plan generator for one question.
/// Immutable once parsed; consumed exactly once by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPlan {
    pub sheet_name: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub reasoning: String,
}

/// What a plan evaluates to: a row count, a scalar, or a page of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Answer {
    Count(usize),
    Number(f64),
    Rows(Vec<Record>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    /// Row count after filtering, before aggregation or limiting.
    pub record_count: usize,
    pub generated_plan: AnalysisPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub answer: Answer,
    pub meta: ResultMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One entry in the append-only conversation log.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}
