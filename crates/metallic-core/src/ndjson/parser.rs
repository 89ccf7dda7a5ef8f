//! NDJSON parser for the code-execution stream.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! surfaced as [`ExecutionEvent::Unknown`].

use serde_json::{Map, Value};

use super::types::*;
use crate::error::{Error, Result};

/// Keys on a `result` line that are envelope fields rather than formats.
const ENVELOPE_KEYS: &[&str] = &["type", "is_main_result"];

/// Keys reserved by the result format; anything else is an extra.
const RESERVED_KEYS: &[&str] = &[
    "plain",
    "text",
    "html",
    "markdown",
    "svg",
    "png",
    "jpeg",
    "pdf",
    "latex",
    "json",
    "javascript",
    "data",
    "chart",
    "extra",
];

/// Parse a single NDJSON line from the execution stream.
pub fn parse_line(line: &str) -> Result<ExecutionEvent> {
    let raw: Value = serde_json::from_str(line)?;
    parse_value(&raw)
}

/// Parse a JSON value into an execution event.
pub fn parse_value(raw: &Value) -> Result<ExecutionEvent> {
    let msg_type = raw
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::NdjsonParse("Missing 'type' field".into()))?;

    match msg_type {
        "stdout" => Ok(ExecutionEvent::Stdout {
            text: text_field(raw),
        }),
        "stderr" => Ok(ExecutionEvent::Stderr {
            text: text_field(raw),
        }),
        "result" => parse_result(raw).map(ExecutionEvent::Result),
        "error" => Ok(ExecutionEvent::Error(serde_json::from_value(raw.clone())?)),
        "number_of_executions" => {
            let execution_count = raw
                .get("execution_count")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    Error::NdjsonParse("number_of_executions without 'execution_count'".into())
                })?;
            Ok(ExecutionEvent::NumberOfExecutions { execution_count })
        }
        _ => Ok(ExecutionEvent::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw.clone(),
        }),
    }
}

fn text_field(raw: &Value) -> String {
    raw.get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn parse_result(raw: &Value) -> Result<ExecResult> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::NdjsonParse("result line is not an object".into()))?;

    let is_main_result = obj
        .get("is_main_result")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut outputs = Vec::new();
    push_string(&mut outputs, obj, "text", ResultOutput::Text);
    push_string(&mut outputs, obj, "html", ResultOutput::Html);
    push_string(&mut outputs, obj, "markdown", ResultOutput::Markdown);
    push_string(&mut outputs, obj, "svg", ResultOutput::Svg);
    push_string(&mut outputs, obj, "png", ResultOutput::Png);
    push_string(&mut outputs, obj, "jpeg", ResultOutput::Jpeg);
    push_string(&mut outputs, obj, "pdf", ResultOutput::Pdf);
    push_string(&mut outputs, obj, "latex", ResultOutput::Latex);
    if let Some(json) = obj.get("json").filter(|v| !v.is_null()) {
        outputs.push(ResultOutput::Json(json.clone()));
    }
    push_string(&mut outputs, obj, "javascript", ResultOutput::Javascript);
    if let Some(data) = obj.get("data").filter(|v| !v.is_null()) {
        outputs.push(ResultOutput::Data(data.clone()));
    }
    if let Some(chart) = obj.get("chart").filter(|v| !v.is_null()) {
        let chart = serde_json::from_value(chart.clone()).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Unrecognised chart payload");
            Chart::Unknown
        });
        outputs.push(ResultOutput::Chart(chart));
    }

    for (key, value) in obj {
        if ENVELOPE_KEYS.contains(&key.as_str()) || RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        outputs.push(ResultOutput::Extra {
            key: key.clone(),
            value: value.clone(),
        });
    }

    Ok(ExecResult {
        outputs,
        is_main_result,
    })
}

fn push_string(
    outputs: &mut Vec<ResultOutput>,
    obj: &Map<String, Value>,
    key: &str,
    variant: fn(String) -> ResultOutput,
) {
    if let Some(s) = obj.get(key).and_then(Value::as_str) {
        outputs.push(variant(s.to_string()));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_stdout_and_stderr() {
        let msg = parse_line(r#"{"type":"stdout","text":"hello\n"}"#).unwrap();
        assert_eq!(
            msg,
            ExecutionEvent::Stdout {
                text: "hello\n".into()
            }
        );
        let msg = parse_line(r#"{"type":"stderr","text":"warn"}"#).unwrap();
        assert!(matches!(msg, ExecutionEvent::Stderr { ref text } if text == "warn"));
    }

    #[test]
    fn parse_main_result_with_formats() {
        let json = r#"{"type":"result","is_main_result":true,"text":"42","html":"<b>42</b>","png":"iVBOR","custom":"x"}"#;
        let ExecutionEvent::Result(result) = parse_line(json).unwrap() else {
            panic!("expected result");
        };
        assert!(result.is_main_result);
        assert_eq!(result.text(), Some("42"));
        assert_eq!(result.html(), Some("<b>42</b>"));
        assert_eq!(result.formats(), vec!["html", "png", "custom"]);
    }

    #[test]
    fn result_envelope_and_plain_are_not_extras() {
        let json = r#"{"type":"result","is_main_result":false,"plain":"p","text":"t"}"#;
        let ExecutionEvent::Result(result) = parse_line(json).unwrap() else {
            panic!("expected result");
        };
        assert_eq!(result.outputs, vec![ResultOutput::Text("t".into())]);
        assert!(!result.is_main_result);
    }

    #[test]
    fn parse_bar_chart() {
        let json = r#"{"type":"result","chart":{"type":"bar","title":"Sales","x_label":"Q","elements":[{"label":"A","value":"10","group":"g"}]}}"#;
        let ExecutionEvent::Result(result) = parse_line(json).unwrap() else {
            panic!("expected result");
        };
        let Some(Chart::Bar(bar)) = result.chart() else {
            panic!("expected bar chart");
        };
        assert_eq!(bar.title, "Sales");
        assert_eq!(bar.axes.x_label.as_deref(), Some("Q"));
        assert_eq!(bar.elements[0].value, "10");
    }

    #[test]
    fn unrecognised_chart_type_is_unknown() {
        let json = r#"{"type":"result","chart":{"type":"sankey","title":"flows"}}"#;
        let ExecutionEvent::Result(result) = parse_line(json).unwrap() else {
            panic!("expected result");
        };
        assert_eq!(result.chart(), Some(&Chart::Unknown));
    }

    #[test]
    fn parse_error_event() {
        let json = r#"{"type":"error","name":"NameError","value":"name 'x' is not defined","traceback":"Traceback..."}"#;
        let ExecutionEvent::Error(err) = parse_line(json).unwrap() else {
            panic!("expected error");
        };
        assert_eq!(err.name, "NameError");
        assert_eq!(err.to_string(), "NameError: name 'x' is not defined");
    }

    #[test]
    fn parse_number_of_executions() {
        let msg = parse_line(r#"{"type":"number_of_executions","execution_count":3}"#).unwrap();
        assert_eq!(msg, ExecutionEvent::NumberOfExecutions { execution_count: 3 });
        assert!(parse_line(r#"{"type":"number_of_executions"}"#).is_err());
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(matches!(
            parse_line(r#"{"text":"orphan"}"#),
            Err(Error::NdjsonParse(_))
        ));
    }

    #[test]
    fn unknown_type_returns_unknown_event() {
        let msg = parse_line(r#"{"type":"future_type","data":"something"}"#).unwrap();
        assert!(matches!(msg, ExecutionEvent::Unknown { ref msg_type, .. } if msg_type == "future_type"));
    }

    #[test]
    fn execution_folds_events() {
        let mut execution = Execution::default();
        for line in [
            r#"{"type":"stdout","text":"a"}"#,
            r#"{"type":"result","is_main_result":true,"text":"2"}"#,
            r#"{"type":"number_of_executions","execution_count":7}"#,
            r#"{"type":"heartbeat"}"#,
        ] {
            execution.apply(&parse_line(line).unwrap());
        }
        assert_eq!(execution.logs.stdout, vec!["a".to_string()]);
        assert_eq!(execution.text(), Some("2"));
        assert_eq!(execution.execution_count, Some(7));
        assert!(execution.error.is_none());
    }

    #[test]
    fn into_result_surfaces_raised_exception() {
        let mut execution = Execution::default();
        execution.apply(&parse_line(r#"{"type":"stdout","text":"before\n"}"#).unwrap());
        execution.apply(
            &parse_line(r#"{"type":"error","name":"ZeroDivisionError","value":"division by zero","traceback":"..."}"#)
                .unwrap(),
        );
        let err = execution.into_result().unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        assert!(Execution::default().into_result().is_ok());
    }
}
