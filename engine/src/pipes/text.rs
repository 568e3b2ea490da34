//! String processors.

use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use super::{literal_tag, Registry};
use crate::cast::{value_text, Kind};
use crate::dispatch::{Call, Options, Outcome};
use crate::error::PipeResult;
use crate::resolve::Conf;

pub fn register(registry: &mut Registry) {
    let text = || Options::new().ftype(Kind::Text).field("content");

    registry.processor("strreplace", text().extract("rule"), str_replace);
    registry.processor("regex", Options::new().extract("rule").emit(true), regex_replace);
    registry.processor(
        "strtransform",
        text().check(|conf| literal_tag::<Transformation>(conf, &["transformation"])),
        str_transform,
    );
    registry.processor("strconcat", Options::new().extract("part"), str_concat);
    registry.processor("substr", text().with_default("start", Value::from(0)), substr);
    registry.processor(
        "tokenizer",
        text().with_default("delimiter", Value::from(",")),
        tokenizer,
    );
    registry.processor("rename", Options::new().extract("rule").emit(true), rename);
}

// =============================================================================
// strreplace
// =============================================================================

/// Which occurrences a replace rule touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Occurrence {
    First,
    Last,
    #[default]
    Every,
}

fn replace_occurrence(text: &str, find: &str, replace: &str, which: Occurrence) -> String {
    match which {
        Occurrence::Every => text.replace(find, replace),
        Occurrence::First => text.replacen(find, replace, 1),
        Occurrence::Last => match text.rfind(find) {
            Some(at) => format!("{}{}{}", &text[..at], replace, &text[at + find.len()..]),
            None => text.to_string(),
        },
    }
}

/// Apply `{find, replace, param}` rules in order.
fn str_replace(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let replaced = call.rules.iter().fold(call.field.as_text(), |text, rule| {
        let find = rule.text_or("find", "");
        if find.is_empty() {
            return text;
        }
        let which = rule
            .get("param")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default();
        replace_occurrence(&text, &find, &rule.text_or("replace", ""), which)
    });
    Ok(Outcome::one(replaced))
}

// =============================================================================
// regex
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegexRule {
    field: String,
    #[serde(rename = "match")]
    pattern: String,
    replace: String,
    casematch: bool,
}

/// Rewrite item fields with `{field, match, replace, casematch}` rules.
///
/// Replacements may reference groups as `$1` or `${name}`. A rule with an
/// invalid pattern is logged and ignored.
fn regex_replace(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let mut item = call.item.clone();
    for rule in call.rules {
        let rule: RegexRule = rule.parse();
        if rule.field.is_empty() || rule.pattern.is_empty() {
            continue;
        }
        let re = match RegexBuilder::new(&rule.pattern)
            .case_insensitive(!rule.casematch)
            .build()
        {
            Ok(re) => re,
            Err(err) => {
                warn!(pattern = %rule.pattern, error = %err, "invalid regex rule");
                continue;
            }
        };

        let current = item.get(&rule.field).map(|v| value_text(&v)).unwrap_or_default();
        let rewritten = re.replace_all(&current, rule.replace.as_str()).into_owned();
        item.set_mut(&rule.field, Value::String(rewritten));
    }
    Ok(Outcome::one(item.into_value()))
}

// =============================================================================
// strtransform
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Transformation {
    Upper,
    Lower,
    Capitalize,
    Title,
    Swapcase,
    Strip,
}

impl Transformation {
    fn apply(self, text: &str) -> String {
        match self {
            Transformation::Upper => text.to_uppercase(),
            Transformation::Lower => text.to_lowercase(),
            Transformation::Capitalize => {
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                    None => String::new(),
                }
            }
            Transformation::Title => title_case(text),
            Transformation::Swapcase => text
                .chars()
                .flat_map(|c| -> Box<dyn Iterator<Item = char>> {
                    if c.is_uppercase() {
                        Box::new(c.to_lowercase())
                    } else {
                        Box::new(c.to_uppercase())
                    }
                })
                .collect(),
            Transformation::Strip => text.trim().to_string(),
        }
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// `{"transformation": "upper"}`, or just `"upper"`.
fn str_transform(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let text = call.field.as_text();
    let tag = call.conf.value().or_else(|| call.conf.get("transformation"));
    let transformed = match tag.map(|t| serde_json::from_value::<Transformation>(t.clone())) {
        Some(Ok(transformation)) => transformation.apply(&text),
        Some(Err(err)) => {
            warn!(error = %err, "unknown transformation, leaving text unchanged");
            text
        }
        None => text,
    };
    Ok(Outcome::one(transformed))
}

// =============================================================================
// strconcat
// =============================================================================

fn part_text(part: &Conf) -> String {
    match part.value() {
        Some(value) => value_text(value),
        None if part.is_empty() => String::new(),
        None => value_text(&part.to_value()),
    }
}

/// Join every resolved `part`.
fn str_concat(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }
    Ok(Outcome::one(call.rules.iter().map(part_text).collect::<String>()))
}

// =============================================================================
// substr
// =============================================================================

/// Characters `[start, start + length)`; the rest of the text without `length`.
fn substr(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let text = call.field.as_text();
    let start = call.conf.int_or("start", 0).max(0) as usize;
    let rest = text.chars().skip(start);
    let cut: String = match call.conf.get("length") {
        Some(_) => rest.take(call.conf.int_or("length", 0).max(0) as usize).collect(),
        None => rest.collect(),
    };
    Ok(Outcome::one(cut))
}

// =============================================================================
// tokenizer
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TokenizerConf {
    delimiter: String,
    dedupe: bool,
    sort: bool,
}

impl Default for TokenizerConf {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            dedupe: false,
            sort: false,
        }
    }
}

/// Split the field into trimmed, non-empty tokens, one output per token.
fn tokenizer(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let conf: TokenizerConf = call.conf.parse();
    let text = call.field.as_text();
    let mut tokens: Vec<String> = if conf.delimiter.is_empty() {
        text.split_whitespace().map(str::to_string).collect()
    } else {
        text.split(conf.delimiter.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    };

    if conf.dedupe {
        let mut seen = HashSet::new();
        tokens.retain(|t| seen.insert(t.clone()));
    }
    if conf.sort {
        tokens.sort_by_key(|t| t.to_lowercase());
    }
    Ok(Outcome::many(tokens.into_iter().map(Value::String).collect()))
}

// =============================================================================
// rename
// =============================================================================

/// Move (or with `copy`, duplicate) `field` to `newval`.
fn rename(call: Call<'_>) -> PipeResult<Outcome> {
    if call.skip {
        return Ok(Outcome::passthrough(call.item));
    }

    let mut item = call.item.clone();
    for rule in call.rules {
        let (Some(from), Some(to)) = (rule.text("field"), rule.text("newval")) else {
            continue;
        };
        let Some(value) = item.get(&from) else {
            continue;
        };
        if !rule.bool_or("copy", false) {
            item.delete(&from);
        }
        item.set_mut(&to, value);
    }
    Ok(Outcome::one(item.into_value()))
}

#[cfg(test)]
mod tests {
    use super::super::testing::process;
    use super::*;
    use crate::dispatch::{CountMode, Overrides, SkipIf};
    use serde_json::json;

    fn assign(name: &str) -> Overrides {
        Overrides {
            assign: Some(name.to_string()),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_strreplace_assigns_next_to_content() {
        let out = process(
            "strreplace",
            json!({"rule": {"find": "hello", "replace": "bye"}}),
            assign("strreplace"),
            vec![json!({"content": "hello world"})],
        );
        assert_eq!(out, vec![json!({"content": "hello world", "strreplace": "bye world"})]);
    }

    #[test]
    fn test_strreplace_occurrences() {
        assert_eq!(replace_occurrence("a-a-a", "a", "b", Occurrence::First), "b-a-a");
        assert_eq!(replace_occurrence("a-a-a", "a", "b", Occurrence::Last), "a-a-b");
        assert_eq!(replace_occurrence("a-a-a", "a", "b", Occurrence::Every), "b-b-b");
        assert_eq!(replace_occurrence("xyz", "a", "b", Occurrence::Last), "xyz");
    }

    #[test]
    fn test_strreplace_rules_apply_in_order() {
        let out = process(
            "strreplace",
            json!({"rule": [
                {"find": "cat", "replace": "dog", "param": "first"},
                {"find": "dog", "replace": "wolf", "param": "last"},
            ]}),
            Overrides::default(),
            vec![json!({"content": "cat dog cat"})],
        );
        assert_eq!(out[0]["strreplace"], json!("dog wolf cat"));
    }

    #[test]
    fn test_strreplace_skip_passes_item_through() {
        let overrides = Overrides {
            skip_if: SkipIf::when(|_| true),
            ..Overrides::default()
        };
        let items = vec![json!({"content": "hello"}), json!({"other": 1})];
        let out = process("strreplace", json!({"rule": {"find": "h", "replace": "j"}}), overrides, items.clone());
        assert_eq!(out, items);
    }

    #[test]
    fn test_regex_rewrites_fields_with_groups() {
        let out = process(
            "regex",
            json!({"rule": [
                {"field": "title", "match": "(\\w+) (\\w+)", "replace": "$2 $1"},
                {"field": "link", "match": "HTTP", "replace": "https"},
            ]}),
            Overrides::default(),
            vec![json!({"title": "hello world", "link": "http://x"})],
        );
        assert_eq!(out, vec![json!({"title": "world hello", "link": "https://x"})]);
    }

    #[test]
    fn test_regex_casematch_and_invalid_pattern() {
        let out = process(
            "regex",
            json!({"rule": [
                {"field": "title", "match": "ABC", "replace": "x", "casematch": true},
                {"field": "title", "match": "(", "replace": "y"},
            ]}),
            Overrides::default(),
            vec![json!({"title": "abc"})],
        );
        assert_eq!(out, vec![json!({"title": "abc"})]);
    }

    #[test]
    fn test_strtransform() {
        let run = |transformation: &str, text: &str| {
            let out = process(
                "strtransform",
                json!({"transformation": transformation}),
                Overrides::default(),
                vec![json!({"content": text})],
            );
            out[0]["strtransform"].clone()
        };
        assert_eq!(run("upper", "Hello"), json!("HELLO"));
        assert_eq!(run("capitalize", "hELLO there"), json!("Hello there"));
        assert_eq!(run("title", "the old man"), json!("The Old Man"));
        assert_eq!(run("swapcase", "aBc"), json!("AbC"));
        assert_eq!(run("strip", "  x  "), json!("x"));
    }

    #[test]
    fn test_strtransform_wired_unknown_leaves_text() {
        let out = process(
            "strtransform",
            json!({"transformation": {"subkey": "mode"}}),
            Overrides::default(),
            vec![json!({"content": "Same", "mode": "shout"}), json!({"content": "Same", "mode": "upper"})],
        );
        assert_eq!(out[0]["strtransform"], json!("Same"));
        assert_eq!(out[1]["strtransform"], json!("SAME"));
    }

    #[test]
    fn test_strtransform_single_node_conf() {
        let out = process("strtransform", json!("lower"), Overrides::default(), vec![json!({"content": "ABC"})]);
        assert_eq!(out[0]["strtransform"], json!("abc"));
    }

    #[test]
    fn test_strconcat_mixes_literals_and_subkeys() {
        let out = process(
            "strconcat",
            json!({"part": [{"value": "by "}, {"subkey": "author"}, {"value": "!"}]}),
            Overrides::default(),
            vec![json!({"author": "ann"}), json!({"author": "bo"})],
        );
        assert_eq!(out[0]["strconcat"], json!("by ann!"));
        assert_eq!(out[1]["strconcat"], json!("by bo!"));
    }

    #[test]
    fn test_substr() {
        let run = |conf: Value| process("substr", conf, Overrides::default(), vec![json!({"content": "héllo world"})]);
        assert_eq!(run(json!({"start": 1, "length": 4}))[0]["substr"], json!("éllo"));
        assert_eq!(run(json!({"start": 6}))[0]["substr"], json!("world"));
        assert_eq!(run(json!({"start": 50}))[0]["substr"], json!(""));
    }

    #[test]
    fn test_tokenizer_one_item_per_token() {
        let out = process(
            "tokenizer",
            json!({"delimiter": ",", "dedupe": true, "sort": true}),
            Overrides::default(),
            vec![json!({"content": "pear, apple,,pear , fig"})],
        );
        let tokens: Vec<Value> = out.iter().map(|i| i["tokenizer"].clone()).collect();
        assert_eq!(tokens, vec![json!("apple"), json!("fig"), json!("pear")]);
        assert!(out.iter().all(|i| i["content"] == json!("pear, apple,,pear , fig")));
    }

    #[test]
    fn test_tokenizer_count_all_collects_tokens() {
        let overrides = Overrides {
            count: Some(CountMode::All),
            ..Overrides::default()
        };
        let out = process("tokenizer", json!({}), overrides, vec![json!({"content": "a,b"})]);
        assert_eq!(out, vec![json!({"content": "a,b", "tokenizer": ["a", "b"]})]);
    }

    #[test]
    fn test_rename_move_and_copy() {
        let out = process(
            "rename",
            json!({"rule": [
                {"field": "title", "newval": "headline"},
                {"field": "link", "newval": "meta.url", "copy": true},
                {"field": "missing", "newval": "nothing"},
            ]}),
            Overrides::default(),
            vec![json!({"title": "t", "link": "l"})],
        );
        assert_eq!(out, vec![json!({"link": "l", "headline": "t", "meta": {"url": "l"}})]);
    }
}
