//! Typed coercion of raw document values
//!
//! Each declared type maps to a pair of pure functions: a strict one that only
//! accepts values it can interpret losslessly, and a lenient one that
//! normalizes messy input (currency symbols, thousands separators,
//! percentages, loose boolean tokens, many date layouts) and falls back to
//! null instead of failing.

use crate::error::CoerceError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;

/// Declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Date,
}

impl TypeTag {
    /// Parse a configured type name, accepting a few common spellings
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "string" | "str" | "text" => Some(TypeTag::String),
            "integer" | "int" | "long" => Some(TypeTag::Integer),
            "float" | "double" | "number" => Some(TypeTag::Float),
            "boolean" | "bool" => Some(TypeTag::Boolean),
            "timestamp" | "datetime" => Some(TypeTag::Timestamp),
            "date" => Some(TypeTag::Date),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Integer => "integer",
            TypeTag::Float => "float",
            TypeTag::Boolean => "boolean",
            TypeTag::Timestamp => "timestamp",
            TypeTag::Date => "date",
        }
    }

    fn strategy(self) -> Strategy {
        match self {
            TypeTag::String => Strategy {
                strict: strict_string,
                lenient: lenient_string,
            },
            TypeTag::Integer => Strategy {
                strict: strict_integer,
                lenient: lenient_integer,
            },
            TypeTag::Float => Strategy {
                strict: strict_float,
                lenient: lenient_float,
            },
            TypeTag::Boolean => Strategy {
                strict: strict_boolean,
                lenient: lenient_boolean,
            },
            TypeTag::Timestamp => Strategy {
                strict: strict_timestamp,
                lenient: lenient_timestamp,
            },
            TypeTag::Date => Strategy {
                strict: strict_date,
                lenient: lenient_date,
            },
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed cell in an output row
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// JSON form used by writers; timestamps and dates render as ISO-8601 text
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::String(s) => Value::String(s.clone()),
            CellValue::Integer(i) => Value::Number((*i).into()),
            CellValue::Float(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            CellValue::Boolean(b) => Value::Bool(*b),
            CellValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            CellValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Whether a field fails on mismatch or normalizes to null
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoerceMode {
    Strict,
    Lenient,
}

impl CoerceMode {
    pub fn from_flag(coerce: bool) -> Self {
        if coerce {
            CoerceMode::Lenient
        } else {
            CoerceMode::Strict
        }
    }
}

/// Normalization tables used by lenient coercion
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionRules {
    /// Stripped from numeric text before parsing
    pub currency_symbols: Vec<char>,
    /// Lower-case tokens read as `true`
    pub truthy: Vec<String>,
    /// Lower-case tokens read as `false`
    pub falsy: Vec<String>,
    /// chrono patterns tried in order; the first successful parse wins
    pub datetime_formats: Vec<String>,
}

/// ISO layouts accepted in strict mode as well
const ISO_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d",
];

const LENIENT_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%Y%m%d",
];

impl Default for CoercionRules {
    fn default() -> Self {
        CoercionRules {
            currency_symbols: vec!['$', '€', '£', '¥', '₹'],
            truthy: ["true", "yes", "y", "on", "1"].iter().map(|s| s.to_string()).collect(),
            falsy: ["false", "no", "n", "off", "0"].iter().map(|s| s.to_string()).collect(),
            datetime_formats: LENIENT_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

type CoerceFn = fn(&CoercionRules, &Value) -> Option<CellValue>;

/// Strict and lenient conversion for one declared type
struct Strategy {
    strict: CoerceFn,
    lenient: CoerceFn,
}

/// Stateless coercion over a fixed rule table
#[derive(Debug, Clone, Default)]
pub struct Coercer {
    rules: CoercionRules,
}

impl Coercer {
    pub fn new(rules: CoercionRules) -> Self {
        Coercer { rules }
    }

    pub fn rules(&self) -> &CoercionRules {
        &self.rules
    }

    /// Convert `raw` into `target`.
    ///
    /// Null-like input (JSON null, blank text, `nan`) is null in both modes.
    /// Lenient mode never returns an error.
    pub fn coerce(&self, raw: &Value, target: TypeTag, mode: CoerceMode) -> Result<CellValue, CoerceError> {
        if is_null_like(raw) {
            return Ok(CellValue::Null);
        }

        let strategy = target.strategy();
        match mode {
            CoerceMode::Strict => (strategy.strict)(&self.rules, raw).ok_or_else(|| CoerceError {
                raw: raw.to_string(),
                target,
            }),
            CoerceMode::Lenient => Ok((strategy.lenient)(&self.rules, raw).unwrap_or(CellValue::Null)),
        }
    }

    /// Lenient coercion without the `Result` wrapper
    pub fn coerce_lenient(&self, raw: &Value, target: TypeTag) -> CellValue {
        if is_null_like(raw) {
            return CellValue::Null;
        }
        (target.strategy().lenient)(&self.rules, raw).unwrap_or(CellValue::Null)
    }
}

/// Values that mean "no data" regardless of the declared type
pub fn is_null_like(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => {
            let t = s.trim();
            t.is_empty() || t == "nan" || t == "NaN" || t == "NAN"
        }
        _ => false,
    }
}

fn strict_string(_: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match raw {
        Value::String(s) => Some(CellValue::String(s.clone())),
        Value::Number(n) => Some(CellValue::String(n.to_string())),
        Value::Bool(b) => Some(CellValue::String(b.to_string())),
        _ => None,
    }
}

fn lenient_string(rules: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match raw {
        Value::Object(_) | Value::Array(_) => serde_json::to_string(raw).ok().map(CellValue::String),
        _ => strict_string(rules, raw),
    }
}

fn strict_integer(_: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.fract() == 0.0).and_then(float_to_i64))
            .map(CellValue::Integer),
        Value::String(s) => s.trim().parse::<i64>().ok().map(CellValue::Integer),
        _ => None,
    }
}

fn lenient_integer(rules: &CoercionRules, raw: &Value) -> Option<CellValue> {
    let value = match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_to_i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| normalize_number(rules, s).and_then(float_to_i64)),
        _ => None,
    };
    value.map(CellValue::Integer)
}

fn strict_float(_: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match raw {
        Value::Number(n) => n.as_f64().map(CellValue::Float),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(CellValue::Float),
        _ => None,
    }
}

fn lenient_float(rules: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match raw {
        Value::Number(n) => n.as_f64().map(CellValue::Float),
        Value::String(s) => normalize_number(rules, s).map(CellValue::Float),
        _ => None,
    }
}

fn strict_boolean(_: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match raw {
        Value::Bool(b) => Some(CellValue::Boolean(*b)),
        Value::String(s) => {
            let t = s.trim();
            if t.eq_ignore_ascii_case("true") {
                Some(CellValue::Boolean(true))
            } else if t.eq_ignore_ascii_case("false") {
                Some(CellValue::Boolean(false))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn lenient_boolean(rules: &CoercionRules, raw: &Value) -> Option<CellValue> {
    if let Some(cell) = strict_boolean(rules, raw) {
        return Some(cell);
    }
    match raw {
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(CellValue::Boolean(true)),
            Some(v) if v == 0.0 => Some(CellValue::Boolean(false)),
            _ => None,
        },
        Value::String(s) => {
            let token = s.trim().to_lowercase();
            if rules.truthy.iter().any(|t| *t == token) {
                Some(CellValue::Boolean(true))
            } else if rules.falsy.iter().any(|t| *t == token) {
                Some(CellValue::Boolean(false))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn strict_timestamp(_: &CoercionRules, raw: &Value) -> Option<CellValue> {
    let s = raw.as_str()?.trim();
    parse_rfc3339(s)
        .or_else(|| parse_with_formats(s, ISO_FORMATS.iter().copied()))
        .map(CellValue::Timestamp)
}

fn lenient_timestamp(rules: &CoercionRules, raw: &Value) -> Option<CellValue> {
    if let Some(cell) = strict_timestamp(rules, raw) {
        return Some(cell);
    }
    let ts = match raw {
        Value::String(s) => parse_with_formats(s.trim(), rules.datetime_formats.iter().map(String::as_str)),
        Value::Number(n) => from_epoch_seconds(n),
        _ => None,
    };
    ts.map(CellValue::Timestamp)
}

fn strict_date(_: &CoercionRules, raw: &Value) -> Option<CellValue> {
    let s = raw.as_str()?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(CellValue::Date)
}

fn lenient_date(rules: &CoercionRules, raw: &Value) -> Option<CellValue> {
    match lenient_timestamp(rules, raw)? {
        CellValue::Timestamp(ts) => Some(CellValue::Date(ts.date())),
        _ => None,
    }
}

fn parse_rfc3339(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc())
}

fn parse_with_formats<'f>(s: &str, formats: impl Iterator<Item = &'f str>) -> Option<NaiveDateTime> {
    for format in formats {
        let has_time = format.contains("%H") || format.contains("%I");
        if has_time {
            if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
                return Some(ts);
            }
        } else if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn from_epoch_seconds(n: &Number) -> Option<NaiveDateTime> {
    let secs = n.as_f64()?;
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    let whole = float_to_i64(whole)?;
    DateTime::from_timestamp(whole, nanos.min(999_999_999)).map(|dt| dt.naive_utc())
}

/// Truncate toward zero; `None` outside the i64 range
fn float_to_i64(v: f64) -> Option<i64> {
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    const UPPER: f64 = 9_223_372_036_854_775_808.0;
    if !v.is_finite() {
        return None;
    }
    let t = v.trunc();
    (t >= LOWER && t < UPPER).then_some(t as i64)
}

/// Best-effort numeric parse of messy text
fn normalize_number(rules: &CoercionRules, raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return v.is_finite().then_some(v);
    }

    let cleaned: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !rules.currency_symbols.contains(c))
        .collect();
    let cleaned = strip_thousands(&cleaned);

    if let Some(body) = cleaned.strip_suffix('%') {
        return body
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v / 100.0);
    }

    let kept: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if kept.is_empty()
        || kept.matches('.').count() > 1
        || kept.matches('-').count() > 1
        || (kept.contains('-') && !kept.starts_with('-'))
    {
        return None;
    }
    kept.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Drop commas that separate groups of three digits
fn strip_thousands(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let grouped = chars
                .get(i + 1..i + 4)
                .map_or(false, |w| w.iter().all(|d| d.is_ascii_digit()));
            let boundary = matches!(chars.get(i + 4), None | Some(',') | Some('.'));
            if grouped && boundary {
                continue;
            }
        }
        out.push(c);
    }
    out
}
