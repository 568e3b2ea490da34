//! Source pipes: produce items from configuration or local files.
//!
//! Sources ignore the incoming item (`ftype: none`) and emit by default.

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tracing::debug;
use url::Url;

use super::Registry;
use crate::dispatch::{Call, Options, Outcome};
use crate::error::PipeResult;
use crate::record::Record;

pub fn register(registry: &mut Registry) {
    registry.processor("itembuilder", Options::source().extract("attrs"), item_builder);
    registry.processor("fetchdata", Options::source(), fetch_data);
    registry.processor(
        "csvpipe",
        Options::source().with_default("skip_rows", Value::from(0)),
        csv_pipe,
    );
}

/// Map a `file://` URL or a plain path to a local path.
///
/// Remote URLs are not fetched.
pub(crate) fn local_path(location: &str) -> io::Result<PathBuf> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, format!("invalid file URL: {}", location))),
        // single letters are Windows drive prefixes, not schemes
        Ok(url) if url.scheme().len() > 1 => Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("only local files can be read: {}", location),
        )),
        _ => Ok(PathBuf::from(location)),
    }
}

// =============================================================================
// itembuilder
// =============================================================================

/// Build one item from `attrs` rules: `{"key": "title", "value": "..."}`.
fn item_builder(call: Call<'_>) -> PipeResult<Outcome> {
    let entries = call.rules.iter().filter_map(|attr| {
        let key = attr.text("key")?;
        Some((key, attr.get("value").cloned().unwrap_or(Value::Null)))
    });

    let mut item = Record::new();
    item.update(entries);
    Ok(Outcome::one(item.into_value()))
}

// =============================================================================
// fetchdata
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FetchConf {
    url: String,
    /// Dotted path to the items inside the document
    path: Option<String>,
}

/// Read a local JSON document and emit the items found at `path`.
///
/// Documents are cached by location.
fn fetch_data(call: Call<'_>) -> PipeResult<Outcome> {
    let conf: FetchConf = call.conf.parse();
    let cache_key = format!("fetchdata:{}", conf.url);
    let document = call.services.cache.get_or_try_insert_with(&cache_key, || {
        let path = local_path(&conf.url)?;
        debug!(path = %path.display(), "reading document");
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    })?;

    let found = match conf.path.as_deref().filter(|p| !p.is_empty()) {
        Some(path) => Record::new()
            .set("document", document)
            .get(&format!("document.{}", path))
            .unwrap_or(Value::Null),
        None => document,
    };

    Ok(match found {
        Value::Array(items) => Outcome::many(items),
        Value::Null => Outcome::many(Vec::new()),
        other => Outcome::one(other),
    })
}

// =============================================================================
// csvpipe
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CsvConf {
    url: String,
    /// Single character; detected from the header line when unset
    delimiter: Option<String>,
    skip_rows: usize,
    /// Column names; the first row is the header when unset
    col_names: Option<Vec<String>>,
}

/// Guess the delimiter from the first line: the most frequent separator wins.
fn detect_delimiter(content: &str) -> u8 {
    let first_line = content.lines().next().unwrap_or("");
    [b',', b';', b'\t', b'|']
        .into_iter()
        .max_by_key(|sep| first_line.bytes().filter(|b| b == sep).count())
        .unwrap_or(b',')
}

/// Read a local CSV file, one item per row.
///
/// Values are trimmed, blank lines are skipped, missing trailing columns
/// read as empty strings and surplus columns are dropped.
fn csv_pipe(call: Call<'_>) -> PipeResult<Outcome> {
    let conf: CsvConf = call.conf.parse();
    let path = local_path(&conf.url)?;
    let content = fs::read_to_string(&path)?;
    let body: String = content
        .lines()
        .skip(conf.skip_rows)
        .collect::<Vec<_>>()
        .join("\n");

    let delimiter = conf
        .delimiter
        .as_deref()
        .and_then(|d| d.bytes().next())
        .unwrap_or_else(|| detect_delimiter(&body));

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(conf.col_names.is_none())
        .flexible(true)
        .trim(Trim::All)
        .from_reader(io::Cursor::new(body.into_bytes()));

    let headers: Vec<String> = match conf.col_names {
        Some(names) => names,
        None => reader.headers()?.iter().map(str::to_string).collect(),
    };
    debug!(path = %path.display(), columns = headers.len(), "reading csv");

    let rows = reader
        .into_records()
        .filter(|row| !matches!(row, Ok(r) if is_blank(r)))
        .map(move |row| Ok(to_item(&headers, &row?)));
    Ok(Outcome::stream(rows))
}

fn is_blank(row: &StringRecord) -> bool {
    row.iter().all(str::is_empty)
}

fn to_item(headers: &[String], row: &StringRecord) -> Value {
    let mut item = Map::new();
    for (i, header) in headers.iter().enumerate() {
        let cell = row.get(i).unwrap_or("");
        item.insert(header.clone(), Value::String(cell.to_string()));
    }
    Value::Object(item)
}
