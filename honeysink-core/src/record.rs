//! [Record] is what the upstream pipeline hands to the sink, [Document] is its wire form.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Field holding the event timestamp, lifted into [Document::time].
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Field holding the optional sample rate, lifted into [Document::samplerate].
pub const SAMPLERATE_FIELD: &str = "@samplerate";

/// An ordered mapping of field name to value. Field order is kept as received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets `@timestamp` unless the record already carries one.
    pub fn with_default_timestamp(mut self, timestamp: impl Into<Value>) -> Self {
        self.fields
            .entry(TIMESTAMP_FIELD)
            .or_insert_with(|| timestamp.into());
        self
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::new(fields)
    }
}

impl TryFrom<Value> for Record {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self::new(fields)),
            other => Err(Error::Encode(format!(
                "record must be a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }
}

/// Wire form of a [Record]: `{"time": .., "data": {..}, "samplerate"?: ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    /// `null` when the record had no timestamp.
    pub time: Value,
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samplerate: Option<i64>,
}

impl TryFrom<&Record> for Document {
    type Error = Error;

    fn try_from(record: &Record) -> Result<Self> {
        let mut data = record.fields.clone();
        // shift_remove keeps the order of the remaining fields
        let time = data.shift_remove(TIMESTAMP_FIELD).unwrap_or(Value::Null);
        let samplerate = match data.shift_remove(SAMPLERATE_FIELD) {
            None | Some(Value::Null | Value::Bool(false)) => None,
            Some(value) => Some(coerce_samplerate(&value)?),
        };
        Ok(Document {
            time,
            data,
            samplerate,
        })
    }
}

/// Integer view of a sample rate. Floats truncate, strings use their leading integer
/// (`"7abc"` is 7, `"abc"` is 0). `true`, arrays and objects have none.
fn coerce_samplerate(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| Error::Encode(format!("{SAMPLERATE_FIELD} {n} is not a number"))),
        Value::String(s) => Ok(leading_integer(s)),
        other => Err(Error::Encode(format!(
            "{SAMPLERATE_FIELD} cannot be coerced from {}",
            json_type(other)
        ))),
    }
}

fn leading_integer(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let magnitude = digits
        .get(..end)
        .and_then(|d| d.parse::<i64>().ok())
        .unwrap_or(0);
    if negative { -magnitude } else { magnitude }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
