//! Casting, arithmetic, date and currency processors.

use chrono::format::{Item, StrftimeItems};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use tracing::{debug, warn};

use super::sources::local_path;
use super::{literal_tag, Registry};
use crate::cast::{value_text, Kind, Typed};
use crate::dispatch::{Call, Options, Outcome};
use crate::error::PipeResult;

/// Format used when `dateformat` is given none, or an invalid one.
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";

pub fn register(registry: &mut Registry) {
    registry.processor(
        "typecast",
        Options::new()
            .field("content")
            .check(|conf| literal_tag::<Kind>(conf, &["type"])),
        typecast,
    );
    registry.processor(
        "simplemath",
        Options::new()
            .ftype(Kind::Decimal)
            .field("content")
            .check(|conf| literal_tag::<MathOp>(conf, &["op"])),
        simple_math,
    );
    registry.processor(
        "dateformat",
        Options::new()
            .ftype(Kind::Date)
            .field("content")
            .with_default("format", Value::from(DEFAULT_DATE_FORMAT)),
        date_format,
    );
    registry.processor(
        "currencyformat",
        Options::new()
            .ftype(Kind::Decimal)
            .field("content")
            .with_default("currency", Value::from("USD")),
        currency_format,
    );
    registry.processor(
        "exchangerate",
        Options::new().ftype(Kind::Text).field("content"),
        exchange_rate,
    );
}

// =============================================================================
// typecast
// =============================================================================

/// Cast the field to `type`; `{"type": "int"}` or just `"int"`.
fn typecast(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let tag = call.conf.value().or_else(|| call.conf.get("type")).map(value_text);
    let kind = match tag.as_deref().map(str::parse::<Kind>) {
        Some(Ok(kind)) => kind,
        Some(Err(err)) => {
            warn!(error = %err, "typecast left value unchanged");
            Kind::Pass
        }
        None => Kind::Pass,
    };
    Ok(Outcome::one(kind.cast(&call.field.to_value()).to_value()))
}

// =============================================================================
// simplemath
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MathOp {
    #[default]
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Mean,
}

impl MathOp {
    fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            MathOp::Add => x + y,
            MathOp::Subtract => x - y,
            MathOp::Multiply => x * y,
            MathOp::Divide if y == 0.0 => f64::NAN,
            MathOp::Divide => x / y,
            MathOp::Modulo if y == 0.0 => f64::NAN,
            MathOp::Modulo => x.rem_euclid(y),
            MathOp::Power => x.powf(y),
            MathOp::Mean => (x + y) / 2.0,
        }
    }
}

/// `field <op> other` over decimals; anything non-numeric yields `null`.
fn simple_math(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let op = match call.conf.get("op").cloned().map(serde_json::from_value::<MathOp>) {
        Some(Ok(op)) => op,
        Some(Err(err)) => {
            warn!(error = %err, "unknown math op");
            return Ok(Outcome::one(Value::Null));
        }
        None => MathOp::default(),
    };
    let result = op.apply(call.field.as_decimal(), call.conf.decimal("other"));
    Ok(Outcome::one(Typed::Decimal(result).to_value()))
}

// =============================================================================
// dateformat
// =============================================================================

fn valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Render the field, cast to a date, with a strftime `format`.
fn date_format(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let date = match call.field {
        Typed::Date(date) => date,
        other => return Ok(Outcome::one(other.as_text())),
    };
    let requested = call.conf.text_or("format", DEFAULT_DATE_FORMAT);
    let format = if valid_format(&requested) {
        requested
    } else {
        warn!(format = %requested, "invalid date format, using default");
        DEFAULT_DATE_FORMAT.to_string()
    };
    Ok(Outcome::one(date.format(&format).to_string()))
}

// =============================================================================
// currencyformat
// =============================================================================

/// Symbol and number of minor digits per ISO code.
static CURRENCIES: Lazy<HashMap<&'static str, (&'static str, usize)>> = Lazy::new(|| {
    HashMap::from([
        ("USD", ("$", 2)),
        ("CAD", ("CA$", 2)),
        ("AUD", ("A$", 2)),
        ("EUR", ("€", 2)),
        ("GBP", ("£", 2)),
        ("JPY", ("¥", 0)),
        ("CNY", ("CN¥", 2)),
        ("INR", ("₹", 2)),
        ("KRW", ("₩", 0)),
        ("BRL", ("R$", 2)),
        ("CHF", ("CHF ", 2)),
    ])
});

/// `1234567.891` → `1,234,567.89`.
fn group_thousands(amount: f64, digits: usize) -> String {
    let fixed = format!("{:.*}", digits, amount.abs());
    let (whole, fraction) = match fixed.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    match fraction {
        Some(fraction) => format!("{}.{}", grouped, fraction),
        None => grouped,
    }
}

fn format_currency(amount: f64, code: &str) -> String {
    let code = code.trim().to_uppercase();
    let (symbol, digits) = CURRENCIES
        .get(code.as_str())
        .map(|(symbol, digits)| (symbol.to_string(), *digits))
        .unwrap_or_else(|| (format!("{} ", code), 2));
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}{}{}", sign, symbol, group_thousands(amount, digits))
}

/// Format the field as money in `currency`; non-numeric fields yield `null`.
fn currency_format(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let amount = call.field.as_decimal();
    if !amount.is_finite() {
        return Ok(Outcome::one(Value::Null));
    }
    Ok(Outcome::one(format_currency(amount, &call.conf.text_or("currency", "USD"))))
}

// =============================================================================
// exchangerate
// =============================================================================

/// Units per US dollar, used when no table is configured.
static DEFAULT_RATES: Lazy<Map<String, Value>> = Lazy::new(|| {
    [
        ("USD", 1.0),
        ("EUR", 0.92),
        ("GBP", 0.79),
        ("JPY", 151.6),
        ("CAD", 1.36),
        ("AUD", 1.52),
        ("CHF", 0.90),
        ("CNY", 7.23),
        ("INR", 83.4),
    ]
    .into_iter()
    .map(|(code, rate)| (code.to_string(), Value::from(rate)))
    .collect()
});

/// Rates read from a local JSON file, cached; `{"rates": {...}}` or a bare table.
fn rates_from_file(call: &Call<'_>, location: &str) -> PipeResult<Map<String, Value>> {
    let key = format!("exchangerate:{}", location);
    let document = call.services.cache.get_or_try_insert_with(&key, || {
        let path = local_path(location)?;
        debug!(path = %path.display(), "reading rates");
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    })?;

    Ok(match document {
        Value::Object(mut map) => match map.remove("rates") {
            Some(Value::Object(rates)) => rates,
            _ => map,
        },
        _ => Map::new(),
    })
}

fn rate(rates: &Map<String, Value>, code: &str) -> f64 {
    rates
        .get(&code.trim().to_uppercase())
        .map(|v| Kind::Decimal.cast(v).as_decimal())
        .unwrap_or(f64::NAN)
}

/// Rate converting one unit of the field's currency into `currency`.
///
/// Single-node configuration names the target currency directly. Unknown
/// codes yield `null`.
fn exchange_rate(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let base = match call.field.as_text() {
        code if code.trim().is_empty() => "USD".to_string(),
        code => code,
    };
    let quote = match call.conf.value() {
        Some(value) => value_text(value),
        None => call.conf.text_or("currency", "USD"),
    };

    let rates = match (call.conf.get("rates"), call.conf.text("url")) {
        (Some(Value::Object(rates)), _) => rates.clone(),
        (_, Some(location)) => rates_from_file(&call, &location)?,
        _ => DEFAULT_RATES.clone(),
    };

    let result = rate(&rates, &quote) / rate(&rates, &base);
    Ok(Outcome::one(Typed::Decimal(result).to_value()))
}
