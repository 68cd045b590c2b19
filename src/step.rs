// ABOUTME: `Step`, the canonical result record returned by both `run` and `run_loop` (§3, §6a),
// plus the trace entries accumulated across turns and the JSONL sanitization rules for writing
// them to a trace file.

use crate::error::ErrorKind;
use crate::eval::ToolCallRecord;
use crate::value::Value;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// One turn's worth of observable effects, recorded regardless of whether the turn's program
/// succeeded (§4.6 step 8).
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub turn: usize,
    pub program_source: String,
    #[serde(serialize_with = "serialize_value_opt")]
    pub value: Option<Value>,
    pub prints: Vec<String>,
    pub tool_calls: Vec<TraceToolCall>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceToolCall {
    pub name: String,
    #[serde(serialize_with = "serialize_value")]
    pub args: Value,
    pub result: Result<serde_json::Value, String>,
}

impl From<&ToolCallRecord> for TraceToolCall {
    fn from(r: &ToolCallRecord) -> Self {
        TraceToolCall { name: r.name.clone(), args: r.args.clone(), result: r.result.as_ref().map(Value::to_json).map_err(|e| e.clone()) }
    }
}

fn serialize_value<S: serde::Serializer>(v: &Value, s: S) -> Result<S::Ok, S::Error> {
    v.to_json().serialize(s)
}

fn serialize_value_opt<S: serde::Serializer>(v: &Option<Value>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => v.to_json().serialize(s),
        None => serde_json::Value::Null.serialize(s),
    }
}

/// `{ reason: ErrorKind, message: String }`, carried by a terminated `Step` (§3).
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub reason: ErrorKind,
    pub message: String,
}

/// The final result record produced by `run`/`run_loop`: return value (or failure), the memory
/// snapshot after the memory-merge contract, resource usage, and the per-turn trace.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    #[serde(serialize_with = "serialize_value_opt")]
    pub return_value: Option<Value>,
    pub fail: Option<Failure>,
    #[serde(serialize_with = "serialize_value")]
    pub memory: Value,
    #[serde(serialize_with = "serialize_value")]
    pub memory_delta: Value,
    pub usage: Usage,
    pub trace: Vec<TraceEntry>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Usage {
    pub turns: usize,
    pub duration_ms: u64,
    pub memory_bytes: usize,
}

impl Step {
    pub fn succeeded(return_value: Value, memory: Value, memory_delta: Value, usage: Usage, trace: Vec<TraceEntry>) -> Self {
        Step { return_value: Some(return_value), fail: None, memory, memory_delta, usage, trace }
    }

    pub fn failed(reason: ErrorKind, message: impl Into<String>, memory: Value, usage: Usage, trace: Vec<TraceEntry>) -> Self {
        Step {
            return_value: None,
            fail: Some(Failure { reason, message: message.into() }),
            memory: memory.clone(),
            memory_delta: memory,
            usage,
            trace,
        }
    }
}

/// One JSON-object-per-line trace file event (§6a). `TraceWriter` serializes directly with
/// `serde_json::to_writer`, one call per line, rather than buffering a whole-file JSON document.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceFileEvent<'a> {
    Start { trace_id: &'a str, timestamp: String },
    Turn { trace_id: &'a str, timestamp: String, entry: SanitizedTraceEntry },
    Stop { trace_id: &'a str, timestamp: String },
}

/// `TraceEntry` after sanitization for the wire format: binaries over 1 KB summarized, lists over
/// 100 items rendered as a placeholder string rather than serialized in full (§6a).
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTraceEntry {
    pub turn: usize,
    pub program_source: String,
    pub value: serde_json::Value,
    pub prints: Vec<String>,
    pub tool_call_count: usize,
    pub duration_ms: u64,
}

const LIST_SUMMARY_THRESHOLD: usize = 100;
const BINARY_SUMMARY_THRESHOLD: usize = 1024;

/// Recursively applies the sanitization rules from §6a to a projected JSON value.
pub fn sanitize_json(v: &serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::String(s) if s.len() > BINARY_SUMMARY_THRESHOLD => {
            serde_json::json!({ "__binary__": true, "size": s.len() })
        }
        serde_json::Value::Array(items) if items.len() > LIST_SUMMARY_THRESHOLD => {
            serde_json::Value::String(format!("List({} items)", items.len()))
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sanitize_json).collect()),
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map.iter() {
                out.insert(k.clone(), sanitize_json(v));
            }
            serde_json::Value::Object(out)
        }
        other => other.clone(),
    }
}

pub fn sanitize_trace_entry(turn: &TraceEntry) -> SanitizedTraceEntry {
    let value = turn.value.as_ref().map(Value::to_json).unwrap_or(serde_json::Value::Null);
    SanitizedTraceEntry {
        turn: turn.turn,
        program_source: turn.program_source.clone(),
        value: sanitize_json(&value),
        prints: turn.prints.clone(),
        tool_call_count: turn.tool_calls.len(),
        duration_ms: turn.duration_ms,
    }
}

/// A short, monotonically-distinguishable id for grouping one run's trace lines. Not a UUID (no
/// dependency carries one); wall-clock nanoseconds are unique enough for a single-process trace.
pub fn new_trace_id() -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    format!("trace-{nanos:x}")
}

pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Appends one JSON object line to an open trace file (§6a: one event per line).
pub fn write_trace_event<W: std::io::Write>(w: &mut W, event: &TraceFileEvent) -> std::io::Result<()> {
    serde_json::to_writer(&mut *w, event)?;
    w.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_truncates_long_lists() {
        let items: Vec<serde_json::Value> = (0..150).map(serde_json::Value::from).collect();
        let v = serde_json::Value::Array(items);
        assert_eq!(sanitize_json(&v), serde_json::Value::String("List(150 items)".to_string()));
    }

    #[test]
    fn sanitize_summarizes_large_strings() {
        let big = "x".repeat(2000);
        let v = serde_json::Value::String(big);
        let sanitized = sanitize_json(&v);
        assert_eq!(sanitized["size"], serde_json::json!(2000));
    }

    #[test]
    fn sanitize_passes_small_values_through() {
        let v = serde_json::json!({ "a": 1, "b": [1, 2, 3] });
        assert_eq!(sanitize_json(&v), v);
    }
}
