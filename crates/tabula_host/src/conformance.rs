//! Conformance cases and their scoring.
//!
//! A case runs `Init -> Discovering -> Publishing -> Done`. Discover must
//! return a schema with the same property names as every expected schema
//! (types are advisory). Publish must end normally with the expected record
//! count. Record checks then look for rows by value: required checks fail
//! the case, bonus checks only add comments.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tabula_protocol::{DiscoverResponse, PublishRecord, Schema};
use tracing::{debug, info, warn};

use crate::client::PluginClient;
use crate::transcript::Transcript;

/// Float comparisons in parsing checks.
pub const FLOAT_TOLERANCE: f64 = 0.00001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Discovering,
    Publishing,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Discovering => "discovering",
            Phase::Publishing => "publishing",
            Phase::Done => "done",
        };
        write!(f, "{}", name)
    }
}

/// A value a check expects to find in a record.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    /// Compared as an instant, so any RFC 3339 rendering matches.
    DateTime(DateTime<Utc>),
}

impl ExpectedValue {
    pub fn text(value: impl Into<String>) -> Self {
        ExpectedValue::Text(value.into())
    }

    /// Parse an RFC 3339 timestamp. Panics on malformed input, so only use
    /// it for literals.
    pub fn datetime(rfc3339: &str) -> Self {
        match DateTime::parse_from_rfc3339(rfc3339) {
            Ok(dt) => ExpectedValue::DateTime(dt.with_timezone(&Utc)),
            Err(e) => panic!("invalid RFC 3339 literal {:?}: {}", rfc3339, e),
        }
    }

    /// Exact equality, used to find the record a check is about.
    pub fn matches(&self, actual: &Value) -> bool {
        match (self, actual) {
            (ExpectedValue::Null, Value::Null) => true,
            (ExpectedValue::Bool(b), Value::Bool(a)) => a == b,
            (ExpectedValue::Number(n), Value::Number(a)) => a.as_f64() == Some(*n),
            (ExpectedValue::Text(t), Value::String(a)) => a == t,
            (ExpectedValue::DateTime(_), Value::String(_)) => self.compare(actual).is_ok(),
            _ => false,
        }
    }

    /// Typed comparison with a reason on mismatch.
    pub fn compare(&self, actual: &Value) -> Result<(), String> {
        match self {
            ExpectedValue::Null => {
                if actual.is_null() {
                    Ok(())
                } else {
                    Err(format!("expected null but it was {}", actual))
                }
            }
            _ if actual.is_null() => Err(format!("expected {} but it was null", self)),
            ExpectedValue::Number(expected) => {
                let got = actual
                    .as_f64()
                    .ok_or_else(|| format!("expected a number but it was {}", actual))?;
                if (got - expected).abs() > FLOAT_TOLERANCE {
                    return Err(format!("expected {} but it was {}", expected, got));
                }
                Ok(())
            }
            ExpectedValue::DateTime(expected) => {
                let text = actual
                    .as_str()
                    .ok_or_else(|| format!("expected a date string but it was {}", actual))?;
                let got = DateTime::parse_from_rfc3339(text)
                    .map_err(|e| format!("expected a valid date but got {:?}: {}", text, e))?;
                if got != *expected {
                    return Err(format!("expected {} but it was {}", expected, got));
                }
                Ok(())
            }
            _ => {
                if self.matches(actual) {
                    Ok(())
                } else {
                    Err(format!("expected {} but it was {}", self, actual))
                }
            }
        }
    }
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::Null => write!(f, "null"),
            ExpectedValue::Bool(b) => write!(f, "{}", b),
            ExpectedValue::Number(n) => write!(f, "{}", n),
            ExpectedValue::Text(t) => write!(f, "{:?}", t),
            ExpectedValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    /// Some record must carry the value.
    Required,
    /// Bonus: the matching record must be marked invalid.
    Invalid,
    /// Bonus: the matching record must hold `value` at `index`.
    Parsing { index: usize, value: ExpectedValue },
}

/// Looks for the first record whose `data[match_index]` equals `match_value`.
#[derive(Debug, Clone)]
pub struct RecordCheck {
    pub match_index: usize,
    pub match_value: ExpectedValue,
    pub kind: CheckKind,
    pub reason: String,
    matched: Option<PublishRecord>,
    parse_error: Option<String>,
}

impl RecordCheck {
    fn new(match_index: usize, match_value: ExpectedValue, kind: CheckKind, reason: &str) -> Self {
        Self {
            match_index,
            match_value,
            kind,
            reason: reason.to_string(),
            matched: None,
            parse_error: None,
        }
    }

    pub fn required(index: usize, value: ExpectedValue) -> Self {
        Self::new(index, value, CheckKind::Required, "")
    }

    pub fn invalid(index: usize, value: ExpectedValue, reason: &str) -> Self {
        Self::new(index, value, CheckKind::Invalid, reason)
    }

    pub fn parsing(
        key_index: usize,
        key_value: ExpectedValue,
        check_index: usize,
        check_value: ExpectedValue,
        reason: &str,
    ) -> Self {
        Self::new(
            key_index,
            key_value,
            CheckKind::Parsing {
                index: check_index,
                value: check_value,
            },
            reason,
        )
    }

    pub fn is_bonus(&self) -> bool {
        !matches!(self.kind, CheckKind::Required)
    }

    /// Offer one record. Only the first match is kept.
    pub fn observe(&mut self, record: &PublishRecord) {
        if self.matched.is_some() {
            return;
        }
        let Some(actual) = record.data.get(self.match_index) else {
            return;
        };
        if !self.match_value.matches(actual) {
            return;
        }
        if let CheckKind::Parsing { index, value } = &self.kind {
            self.parse_error = match record.data.get(*index) {
                Some(actual) => value
                    .compare(actual)
                    .err()
                    .map(|e| format!("value at {}: {}", index, e)),
                None => Some("record too narrow".to_string()),
            };
        }
        self.matched = Some(record.clone());
    }

    /// `(passed, comment)` once the stream is complete.
    pub fn verdict(&self) -> (bool, String) {
        let Some(record) = &self.matched else {
            return (
                false,
                format!(
                    "expected to see a record with value {} at data index {}{}",
                    self.match_value, self.match_index, self.reason
                ),
            );
        };
        match &self.kind {
            CheckKind::Required => (true, String::new()),
            CheckKind::Invalid if record.invalid => {
                (true, format!("detected invalid record {{ {} }}", record))
            }
            CheckKind::Invalid => (
                false,
                format!(
                    "record should have been marked invalid{}: {{ {} }}",
                    self.reason, record
                ),
            ),
            CheckKind::Parsing { .. } => match &self.parse_error {
                None => (true, format!("correctly parsed record {{ {} }}", record)),
                Some(e) => (
                    false,
                    format!("parsing failed on record {{ {} }}{}: {}", record, self.reason, e),
                ),
            },
        }
    }
}

/// One conformance scenario.
#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub description: String,
    /// Relative to the data directory.
    pub pattern: String,
    pub expected_schemas: Vec<Schema>,
    pub publish_schema: Schema,
    pub expected_count: u64,
    pub checks: Vec<RecordCheck>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub discover: Duration,
    pub publish: Duration,
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub name: String,
    pub description: String,
    /// Phase the case reached; `Done` unless it failed.
    pub phase: Phase,
    pub error: Option<String>,
    pub comments: Vec<String>,
}

impl CaseResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

struct CaseRun<'a> {
    case: &'a Case,
    phase: Phase,
    comments: Vec<String>,
}

impl<'a> CaseRun<'a> {
    fn enter(&mut self, phase: Phase) {
        debug!("{}: {} -> {}", self.case.name, self.phase, phase);
        self.phase = phase;
    }

    fn comment(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.comments.push(text);
        }
    }

    fn finish(self, error: Option<String>) -> CaseResult {
        CaseResult {
            name: self.case.name.clone(),
            description: self.case.description.clone(),
            phase: self.phase,
            error,
            comments: self.comments,
        }
    }
}

/// Run one case against a connected plugin.
pub async fn run_case(
    client: &mut PluginClient,
    case: &Case,
    data_dir: &Path,
    timeouts: Timeouts,
    mut transcript: Option<&mut Transcript>,
) -> CaseResult {
    let mut run = CaseRun {
        case,
        phase: Phase::Init,
        comments: Vec::new(),
    };
    let pattern = data_dir.join(&case.pattern).display().to_string();

    if let Some(t) = transcript.as_deref_mut() {
        log_io(t.begin_case(&case.name));
    }

    // Discover
    run.enter(Phase::Discovering);
    info!("{}: executing discover...", case.name);
    let schemas = match client.discover(&pattern, timeouts.discover).await {
        Ok(schemas) => schemas,
        Err(e) => return run.finish(Some(format!("discovery failed: {}", e))),
    };
    info!("{}: discover returned {} schema(s)", case.name, schemas.len());
    if let Some(t) = transcript.as_deref_mut() {
        log_io(t.discover_response(&DiscoverResponse {
            schemas: schemas.clone(),
        }));
    }

    for want in &case.expected_schemas {
        let Some(got) = schemas.iter().find(|s| s.signature_eq(want)) else {
            let got: Vec<String> = schemas.iter().map(|s| s.to_string()).collect();
            return run.finish(Some(format!(
                "no schema matching {:?} was discovered (want: {}, got: [{}])",
                want.name,
                want,
                got.join(", ")
            )));
        };
        if got.fully_eq(want) {
            run.comment(format!("inferred types on schema {}: {}", want.name, want));
        } else {
            run.comment(format!(
                "did not infer types on schema {}: {}",
                want.name,
                type_diff(want, got)
            ));
        }
    }
    info!("{}: discover looks correct", case.name);

    // Publish
    run.enter(Phase::Publishing);
    let Some(target) = schemas
        .iter()
        .find(|s| s.signature_eq(&case.publish_schema))
        .cloned()
    else {
        return run.finish(Some(format!(
            "no discovered schema to publish matches {}",
            case.publish_schema
        )));
    };

    info!("{}: executing publish of '{}'...", case.name, target.name);
    let mut checks = case.checks.clone();
    let mut count: u64 = 0;
    {
        let mut stream = match client.publish(&pattern, target, timeouts.publish).await {
            Ok(stream) => stream,
            Err(e) => return run.finish(Some(format!("publish failed: {}", e))),
        };
        loop {
            match stream.next().await {
                Ok(Some(record)) => {
                    count += 1;
                    if let Some(t) = transcript.as_deref_mut() {
                        log_io(t.record(&record));
                    }
                    for check in checks.iter_mut() {
                        check.observe(&record);
                    }
                }
                Ok(None) => {
                    if let Some(summary) = stream.summary() {
                        if summary.skipped_rows > 0 {
                            run.comment(format!(
                                "plugin skipped {} malformed row(s)",
                                summary.skipped_rows
                            ));
                        }
                    }
                    break;
                }
                Err(e) => {
                    return run.finish(Some(format!("publish error on record {}: {}", count, e)))
                }
            }
        }
    }
    if let Some(t) = transcript.as_deref_mut() {
        log_io(t.flush());
    }
    info!("{}: publish completed, analyzing data...", case.name);

    if count != case.expected_count {
        return run.finish(Some(format!(
            "publish did not return the right number of records (wanted {}, got {})",
            case.expected_count, count
        )));
    }
    info!("{}: publish has correct count, {}", case.name, count);

    for check in &checks {
        let (ok, message) = check.verdict();
        if !ok && !check.is_bonus() {
            return run.finish(Some(format!("record check failed: {}", message)));
        }
        run.comment(message);
    }

    run.enter(Phase::Done);
    info!("{}: published data looks correct", case.name);
    run.finish(None)
}

/// `name: wanted X, got Y; ` for every property whose type differs.
fn type_diff(want: &Schema, got: &Schema) -> String {
    let mut out = String::new();
    for (w, g) in want.properties.iter().zip(&got.properties) {
        if w.property_type != g.property_type {
            out.push_str(&format!(
                "{}: wanted {}, got {}; ",
                w.name, w.property_type, g.property_type
            ));
        }
    }
    out
}

fn log_io(result: std::io::Result<()>) {
    if let Err(e) = result {
        warn!("Failed to write transcript: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabula_protocol::{Property, PropertyType};

    #[test]
    fn test_expected_value_matching() {
        assert!(ExpectedValue::Number(52.0).matches(&json!(52)));
        assert!(ExpectedValue::text("a").matches(&json!("a")));
        assert!(!ExpectedValue::text("1").matches(&json!(1)));
        assert!(ExpectedValue::Null.matches(&Value::Null));
        assert!(ExpectedValue::datetime("1796-07-23T00:00:00.000Z")
            .matches(&json!("1796-07-23T00:00:00Z")));
    }

    #[test]
    fn test_parsing_comparison() {
        assert!(ExpectedValue::Number(27.78092).compare(&json!(27.780921)).is_ok());
        assert!(ExpectedValue::Number(27.78092).compare(&json!(27.8)).is_err());
        assert!(ExpectedValue::Number(1.0).compare(&json!("1")).is_err());
        assert!(ExpectedValue::Null.compare(&json!(0)).is_err());
        assert!(ExpectedValue::Bool(true).compare(&Value::Null).is_err());
        assert!(ExpectedValue::datetime("1970-01-06T00:00:00Z")
            .compare(&json!("1970-01-06T01:00:00+01:00"))
            .is_ok());
        assert!(ExpectedValue::datetime("1970-01-06T00:00:00Z")
            .compare(&json!("1970-01-06T16:57:07.445Z"))
            .is_err());
    }

    #[test]
    fn test_required_check_verdicts() {
        let mut check = RecordCheck::required(1, ExpectedValue::text("Vulpes chama"));
        assert!(!check.verdict().0);
        check.observe(&PublishRecord::valid(vec![json!(3), json!("Vulpes chama")]));
        assert_eq!(check.verdict(), (true, String::new()));
    }

    #[test]
    fn test_invalid_check() {
        let mut check = RecordCheck::invalid(0, ExpectedValue::text("x"), " because");
        check.observe(&PublishRecord::valid(vec![json!("x")]));
        let (ok, message) = check.verdict();
        assert!(!ok);
        assert!(message.contains("should have been marked invalid because"));

        let mut check = RecordCheck::invalid(0, ExpectedValue::text("x"), "");
        check.observe(&PublishRecord::invalid(vec![json!("x")], "column 1"));
        assert!(check.verdict().0);
        assert!(check.is_bonus());
    }

    #[test]
    fn test_parsing_check_uses_first_match() {
        let mut check = RecordCheck::parsing(
            0,
            ExpectedValue::text("normal"),
            2,
            ExpectedValue::Number(27.78092),
            "",
        );
        check.observe(&PublishRecord::valid(vec![json!("normal"), json!(1), json!(27.78092)]));
        check.observe(&PublishRecord::valid(vec![json!("normal"), json!(1), json!(99.0)]));
        assert!(check.verdict().0);

        let mut check =
            RecordCheck::parsing(0, ExpectedValue::text("k"), 5, ExpectedValue::Null, "");
        check.observe(&PublishRecord::valid(vec![json!("k")]));
        let (ok, message) = check.verdict();
        assert!(!ok);
        assert!(message.contains("record too narrow"));
    }

    #[test]
    fn test_type_diff_lists_only_differences() {
        let want = Schema::new(
            "a",
            vec![
                Property::new("id", PropertyType::Integer),
                Property::new("n", PropertyType::String),
            ],
        );
        let mut got = want.clone();
        got.properties[0].property_type = PropertyType::Number;
        assert_eq!(type_diff(&want, &got), "id: wanted integer, got number; ");
    }
}
