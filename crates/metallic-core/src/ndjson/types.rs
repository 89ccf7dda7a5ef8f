//! Event and result types for the code-execution NDJSON stream.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the execution stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    Stdout { text: String },
    Stderr { text: String },
    Result(ExecResult),
    Error(ExecutionError),
    NumberOfExecutions { execution_count: u64 },
    Unknown { msg_type: String, payload: Value },
}

/// A language-level exception raised by executed code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Exception class, e.g. `NameError`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

impl std::error::Error for ExecutionError {}

/// One representation carried by an execution result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutput {
    Text(String),
    Html(String),
    Markdown(String),
    Svg(String),
    /// Base64-encoded image.
    Png(String),
    /// Base64-encoded image.
    Jpeg(String),
    /// Base64-encoded document.
    Pdf(String),
    Latex(String),
    Json(Value),
    Javascript(String),
    /// Tabular data, typically from a `DataFrame`.
    Data(Value),
    Chart(Chart),
    Extra { key: String, value: Value },
}

impl ResultOutput {
    /// Format name as it appears on the wire.
    pub fn format(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::Html(_) => "html",
            Self::Markdown(_) => "markdown",
            Self::Svg(_) => "svg",
            Self::Png(_) => "png",
            Self::Jpeg(_) => "jpeg",
            Self::Pdf(_) => "pdf",
            Self::Latex(_) => "latex",
            Self::Json(_) => "json",
            Self::Javascript(_) => "javascript",
            Self::Data(_) => "data",
            Self::Chart(_) => "chart",
            Self::Extra { key, .. } => key,
        }
    }
}

/// Output of one display call or of the cell's final expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecResult {
    pub outputs: Vec<ResultOutput>,
    /// Whether this is the value of the cell's last expression.
    pub is_main_result: bool,
}

macro_rules! text_accessor {
    ($name:ident, $variant:ident) => {
        pub fn $name(&self) -> Option<&str> {
            self.outputs.iter().find_map(|o| match o {
                ResultOutput::$variant(s) => Some(s.as_str()),
                _ => None,
            })
        }
    };
}

impl ExecResult {
    text_accessor!(text, Text);
    text_accessor!(html, Html);
    text_accessor!(markdown, Markdown);
    text_accessor!(svg, Svg);
    text_accessor!(png, Png);
    text_accessor!(jpeg, Jpeg);
    text_accessor!(pdf, Pdf);
    text_accessor!(latex, Latex);
    text_accessor!(javascript, Javascript);

    pub fn json(&self) -> Option<&Value> {
        self.outputs.iter().find_map(|o| match o {
            ResultOutput::Json(v) => Some(v),
            _ => None,
        })
    }

    pub fn data(&self) -> Option<&Value> {
        self.outputs.iter().find_map(|o| match o {
            ResultOutput::Data(v) => Some(v),
            _ => None,
        })
    }

    pub fn chart(&self) -> Option<&Chart> {
        self.outputs.iter().find_map(|o| match o {
            ResultOutput::Chart(c) => Some(c),
            _ => None,
        })
    }

    /// Formats present besides plain text, in arrival order.
    pub fn formats(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter(|o| !matches!(o, ResultOutput::Text(_)))
            .map(ResultOutput::format)
            .collect()
    }
}

/// Lines printed during execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Logs {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Accumulated outcome of one code execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Execution {
    pub results: Vec<ExecResult>,
    pub logs: Logs,
    pub error: Option<ExecutionError>,
    pub execution_count: Option<u64>,
}

impl Execution {
    /// Fold one event into the accumulated state.
    pub fn apply(&mut self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::Stdout { text } => self.logs.stdout.push(text.clone()),
            ExecutionEvent::Stderr { text } => self.logs.stderr.push(text.clone()),
            ExecutionEvent::Result(result) => self.results.push(result.clone()),
            ExecutionEvent::Error(error) => self.error = Some(error.clone()),
            ExecutionEvent::NumberOfExecutions { execution_count } => {
                self.execution_count = Some(*execution_count);
            }
            ExecutionEvent::Unknown { .. } => {}
        }
    }

    /// Text of the main result, if the cell produced one.
    pub fn text(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.is_main_result)
            .and_then(ExecResult::text)
    }

    /// `Err` with the raised exception, if any.
    pub fn into_result(self) -> std::result::Result<Self, ExecutionError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

// ---------------------------------------------------------------------------
// Charts
// ---------------------------------------------------------------------------

/// Chart extracted from a plotting library's figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chart {
    Line(PointChart),
    Scatter(PointChart),
    Bar(BarChart),
    Pie(PieChart),
    BoxAndWhisker(BoxAndWhiskerChart),
    Superchart(SuperChart),
    #[serde(other)]
    Unknown,
}

impl Chart {
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Line(c) | Self::Scatter(c) => Some(&c.title),
            Self::Bar(c) => Some(&c.title),
            Self::Pie(c) => Some(&c.title),
            Self::BoxAndWhisker(c) => Some(&c.title),
            Self::Superchart(c) => Some(&c.title),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleType {
    #[default]
    Linear,
    Datetime,
    Categorical,
    Log,
    Symlog,
    Logit,
    Function,
    Functionlog,
    Asinh,
    #[serde(other)]
    Unknown,
}

/// Axis labels shared by the two-dimensional chart kinds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Axes {
    #[serde(default)]
    pub x_label: Option<String>,
    #[serde(default)]
    pub y_label: Option<String>,
    #[serde(default)]
    pub x_unit: Option<String>,
    #[serde(default)]
    pub y_unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointChart {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub axes: Axes,
    #[serde(default)]
    pub x_ticks: Vec<Value>,
    #[serde(default)]
    pub x_scale: ScaleType,
    #[serde(default)]
    pub x_tick_labels: Vec<String>,
    #[serde(default)]
    pub y_ticks: Vec<Value>,
    #[serde(default)]
    pub y_scale: ScaleType,
    #[serde(default)]
    pub y_tick_labels: Vec<String>,
    #[serde(default)]
    pub elements: Vec<PointData>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointData {
    #[serde(default)]
    pub label: String,
    /// `(x, y)` pairs; either coordinate may be a number or a string.
    #[serde(default)]
    pub points: Vec<(Value, Value)>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BarChart {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub axes: Axes,
    #[serde(default)]
    pub elements: Vec<BarData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BarData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PieChart {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub elements: Vec<PieData>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PieData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub radius: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxAndWhiskerChart {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub axes: Axes,
    #[serde(default)]
    pub elements: Vec<BoxAndWhiskerData>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoxAndWhiskerData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub first_quartile: f64,
    #[serde(default)]
    pub median: f64,
    #[serde(default)]
    pub third_quartile: f64,
    #[serde(default)]
    pub max: f64,
    #[serde(default)]
    pub outliers: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SuperChart {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub elements: Vec<Chart>,
}
