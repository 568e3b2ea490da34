//! Type casting for field values (`ftype`) and configuration values (`ptype`).
//!
//! Every [`Kind`] maps to a caster in a lookup table. A caster never fails:
//! a value that is absent or cannot be converted yields the kind's registered
//! default (empty string for `text`, `NaN` for `decimal`, today for `date`,
//! and so on).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::record::Record;

/// Declared cast applied to a field or configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Text,
    Int,
    Decimal,
    Date,
    Url,
    Location,
    Bool,
    /// Leave the value untouched
    #[default]
    Pass,
    /// Ignore the value entirely (source pipes)
    None,
}

/// A value after casting.
#[derive(Debug, Clone, PartialEq)]
pub enum Typed {
    Text(String),
    Int(i64),
    Decimal(f64),
    Date(DateTime<Utc>),
    /// Parsed URL parts (`url`, `scheme`, `host`, `port`, `path`, `query`, `fragment`)
    Url(Map<String, Value>),
    /// `lat`/`lon` pair
    Location(Map<String, Value>),
    Bool(bool),
    Pass(Value),
    Nothing,
}

struct Caster {
    func: fn(&Value) -> Option<Typed>,
    default: fn() -> Typed,
}

static CASTERS: Lazy<HashMap<Kind, Caster>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(Kind::Text, Caster { func: cast_text, default: || Typed::Text(String::new()) });
    table.insert(Kind::Int, Caster { func: cast_int, default: || Typed::Int(0) });
    table.insert(Kind::Decimal, Caster { func: cast_decimal, default: || Typed::Decimal(f64::NAN) });
    table.insert(Kind::Date, Caster { func: cast_date, default: today });
    table.insert(Kind::Url, Caster { func: cast_url, default: || Typed::Url(Map::new()) });
    table.insert(Kind::Location, Caster { func: cast_location, default: || Typed::Location(Map::new()) });
    table.insert(Kind::Bool, Caster { func: cast_bool, default: || Typed::Bool(false) });
    table.insert(Kind::Pass, Caster { func: |v| Some(Typed::Pass(v.clone())), default: || Typed::Pass(Value::Null) });
    table.insert(Kind::None, Caster { func: |_| Some(Typed::Nothing), default: || Typed::Nothing });
    table
});

const TRUE_VALUES: &[&str] = &["true", "1", "yes", "y", "on", "t"];
const FALSE_VALUES: &[&str] = &["false", "0", "no", "n", "off", "f", ""];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y", "%b %d, %Y"];

impl Kind {
    /// Cast a value, substituting the registered default on failure.
    pub fn cast(self, value: &Value) -> Typed {
        let caster = &CASTERS[&self];
        (caster.func)(value).unwrap_or_else(caster.default)
    }

    /// Cast a value, `None` when it is absent or not convertible.
    pub fn try_cast(self, value: &Value) -> Option<Typed> {
        (CASTERS[&self].func)(value)
    }

    /// The registered default for this kind.
    pub fn default_value(self) -> Typed {
        (CASTERS[&self].default)()
    }

    /// Tag name as used in configuration.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Int => "int",
            Kind::Decimal => "decimal",
            Kind::Date => "date",
            Kind::Url => "url",
            Kind::Location => "location",
            Kind::Bool => "bool",
            Kind::Pass => "pass",
            Kind::None => "none",
        }
    }

    /// Every kind, in declaration order.
    pub fn all() -> [Kind; 9] {
        [
            Kind::Text,
            Kind::Int,
            Kind::Decimal,
            Kind::Date,
            Kind::Url,
            Kind::Location,
            Kind::Bool,
            Kind::Pass,
            Kind::None,
        ]
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::all()
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown type '{}'", s))
    }
}

impl Typed {
    pub fn kind(&self) -> Kind {
        match self {
            Typed::Text(_) => Kind::Text,
            Typed::Int(_) => Kind::Int,
            Typed::Decimal(_) => Kind::Decimal,
            Typed::Date(_) => Kind::Date,
            Typed::Url(_) => Kind::Url,
            Typed::Location(_) => Kind::Location,
            Typed::Bool(_) => Kind::Bool,
            Typed::Pass(_) => Kind::Pass,
            Typed::Nothing => Kind::None,
        }
    }

    /// Convert back into a JSON value for assignment into an item.
    ///
    /// Non-finite decimals have no JSON form and become `null`.
    pub fn to_value(&self) -> Value {
        match self {
            Typed::Text(s) => Value::String(s.clone()),
            Typed::Int(i) => Value::from(*i),
            Typed::Decimal(d) => Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null),
            Typed::Date(dt) => Value::String(dt.to_rfc3339()),
            Typed::Url(parts) | Typed::Location(parts) => Value::Object(parts.clone()),
            Typed::Bool(b) => Value::Bool(*b),
            Typed::Pass(v) => v.clone(),
            Typed::Nothing => Value::Null,
        }
    }

    /// Text rendering used by string pipes.
    pub fn as_text(&self) -> String {
        match self {
            Typed::Text(s) => s.clone(),
            Typed::Int(i) => i.to_string(),
            Typed::Decimal(d) => d.to_string(),
            Typed::Date(dt) => dt.to_rfc3339(),
            Typed::Url(parts) => parts.get("url").map(value_text).unwrap_or_default(),
            Typed::Location(parts) => Value::Object(parts.clone()).to_string(),
            Typed::Bool(b) => b.to_string(),
            Typed::Pass(v) => value_text(v),
            Typed::Nothing => String::new(),
        }
    }

    /// Numeric view; `NaN` when there is none.
    pub fn as_decimal(&self) -> f64 {
        match self {
            Typed::Decimal(d) => *d,
            Typed::Int(i) => *i as f64,
            Typed::Bool(b) => f64::from(u8::from(*b)),
            Typed::Text(s) => Kind::Decimal.cast(&Value::String(s.clone())).as_decimal(),
            Typed::Pass(v) => Kind::Decimal.cast(v).as_decimal(),
            _ => f64::NAN,
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            Typed::Int(i) => *i,
            Typed::Decimal(d) if d.is_finite() => *d as i64,
            Typed::Bool(b) => i64::from(*b),
            Typed::Text(s) => Kind::Int.cast(&Value::String(s.clone())).as_int(),
            Typed::Pass(v) => Kind::Int.cast(v).as_int(),
            _ => 0,
        }
    }

    /// The record behind a passed-through mapping, if any.
    pub fn as_record(&self) -> Option<Record> {
        match self {
            Typed::Pass(Value::Object(map)) => Some(Record::from(map.clone())),
            _ => None,
        }
    }
}

/// Plain text form of a JSON value (`null` renders empty).
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn cast_text(value: &Value) -> Option<Typed> {
    match value {
        Value::Null => None,
        other => Some(Typed::Text(value_text(other))),
    }
}

fn cast_int(value: &Value) -> Option<Typed> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
            .map(Typed::Int),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                .map(Typed::Int)
        }
        Value::Bool(b) => Some(Typed::Int(i64::from(*b))),
        _ => None,
    }
}

fn cast_decimal(value: &Value) -> Option<Typed> {
    match value {
        Value::Number(n) => n.as_f64().map(Typed::Decimal),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok().map(Typed::Decimal),
        Value::Bool(b) => Some(Typed::Decimal(f64::from(u8::from(*b)))),
        _ => None,
    }
}

fn today() -> Typed {
    let now = Utc::now();
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|n| Utc.from_utc_datetime(&n))
        .unwrap_or(now);
    Typed::Date(midnight)
}

fn cast_date(value: &Value) -> Option<Typed> {
    match value {
        Value::String(s) => parse_date(s.trim()).map(Typed::Date),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .map(Typed::Date),
        Value::Object(map) => map.get("date").and_then(cast_date),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    None
}

fn cast_url(value: &Value) -> Option<Typed> {
    match value {
        Value::String(s) if !s.trim().is_empty() => parse_url(s.trim()).map(Typed::Url),
        Value::Object(map) => map
            .get("url")
            .and_then(Value::as_str)
            .and_then(parse_url)
            .map(Typed::Url),
        _ => None,
    }
}

fn parse_url(s: &str) -> Option<Map<String, Value>> {
    let parsed = Url::parse(s)
        .or_else(|_| Url::parse(&format!("http://{}", s)))
        .ok()?;

    let optional = |part: Option<&str>| part.map(|p| Value::String(p.to_string())).unwrap_or(Value::Null);

    let mut parts = Map::new();
    parts.insert("url".to_string(), Value::String(parsed.to_string()));
    parts.insert("scheme".to_string(), Value::String(parsed.scheme().to_string()));
    parts.insert("host".to_string(), optional(parsed.host_str()));
    parts.insert(
        "port".to_string(),
        parsed.port_or_known_default().map(Value::from).unwrap_or(Value::Null),
    );
    parts.insert("path".to_string(), Value::String(parsed.path().to_string()));
    parts.insert("query".to_string(), optional(parsed.query()));
    parts.insert("fragment".to_string(), optional(parsed.fragment()));
    Some(parts)
}

fn cast_location(value: &Value) -> Option<Typed> {
    let (lat, lon) = match value {
        Value::Object(map) => {
            let pick = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| map.get(*k))
                    .map(|v| Kind::Decimal.cast(v).as_decimal())
            };
            (pick(&["lat", "latitude"])?, pick(&["lon", "lng", "longitude"])?)
        }
        Value::String(s) => {
            let (lat, lon) = s.split_once(',')?;
            (lat.trim().parse::<f64>().ok()?, lon.trim().parse::<f64>().ok()?)
        }
        _ => return None,
    };

    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }

    let mut parts = Map::new();
    parts.insert("lat".to_string(), Value::Number(Number::from_f64(lat)?));
    parts.insert("lon".to_string(), Value::Number(Number::from_f64(lon)?));
    Some(Typed::Location(parts))
}

fn cast_bool(value: &Value) -> Option<Typed> {
    match value {
        Value::Bool(b) => Some(Typed::Bool(*b)),
        Value::Number(n) => n.as_f64().map(|f| Typed::Bool(f != 0.0)),
        Value::String(s) => {
            let lower = s.trim().to_lowercase();
            if TRUE_VALUES.contains(&lower.as_str()) {
                Some(Typed::Bool(true))
            } else if FALSE_VALUES.contains(&lower.as_str()) {
                Some(Typed::Bool(false))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_casts_to_registered_default() {
        for kind in Kind::all() {
            let cast = kind.cast(&Value::Null);
            let default = kind.default_value();
            assert_eq!(cast.kind(), kind);
            match (cast, default) {
                (Typed::Decimal(a), Typed::Decimal(b)) => assert!(a.is_nan() && b.is_nan()),
                (Typed::Date(_), Typed::Date(_)) => {}
                (a, b) => assert_eq!(a, b, "kind {}", kind),
            }
        }
    }

    #[test]
    fn test_uncastable_values_fall_back() {
        assert_eq!(Kind::Int.cast(&json!("abc")), Typed::Int(0));
        assert!(Kind::Decimal.cast(&json!("abc")).as_decimal().is_nan());
        assert!(matches!(Kind::Date.cast(&json!("not a date")), Typed::Date(_)));
        assert_eq!(Kind::Url.cast(&json!("")), Typed::Url(Map::new()));
        assert_eq!(Kind::Location.cast(&json!("nowhere")), Typed::Location(Map::new()));
        assert_eq!(Kind::Bool.cast(&json!("maybe")), Typed::Bool(false));
        assert_eq!(Kind::Int.cast(&json!([1, 2])), Typed::Int(0));
    }

    #[test]
    fn test_numeric_casts() {
        assert_eq!(Kind::Int.cast(&json!(" 42 ")), Typed::Int(42));
        assert_eq!(Kind::Int.cast(&json!(3.9)), Typed::Int(3));
        assert_eq!(Kind::Decimal.cast(&json!("1,234.5")), Typed::Decimal(1234.5));
        assert_eq!(Kind::Text.cast(&json!(7)), Typed::Text("7".to_string()));
    }

    #[test]
    fn test_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(Kind::Date.cast(&json!("2024-03-15")), Typed::Date(expected));
        assert_eq!(Kind::Date.cast(&json!("03/15/2024")), Typed::Date(expected));
        assert_eq!(Kind::Date.cast(&json!({"date": "2024-03-15T00:00:00Z"})), Typed::Date(expected));
    }

    #[test]
    fn test_url_and_location() {
        let Typed::Url(parts) = Kind::Url.cast(&json!("https://example.com/feed?x=1")) else {
            panic!("expected url");
        };
        assert_eq!(parts["host"], "example.com");
        assert_eq!(parts["path"], "/feed");
        assert_eq!(parts["query"], "x=1");

        let Typed::Location(loc) = Kind::Location.cast(&json!("48.85, 2.35")) else {
            panic!("expected location");
        };
        assert_eq!(loc["lat"], 48.85);
    }

    #[test]
    fn test_kind_from_str_rejects_unknown() {
        assert_eq!("decimal".parse::<Kind>(), Ok(Kind::Decimal));
        assert!("float128".parse::<Kind>().is_err());
        assert!(serde_json::from_value::<Kind>(json!("float128")).is_err());
    }
}
