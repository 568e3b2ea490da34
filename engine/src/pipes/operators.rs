//! Stream-wise pipes.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::warn;

use super::Registry;
use crate::cast::{value_text, Kind};
use crate::concurrency::reduce;
use crate::dispatch::{Aggregator, Composer, Context, OpInput, Options, RuleOp, Values};
use crate::error::PipeResult;
use crate::record::Record;
use crate::resolve::Conf;

pub fn register(registry: &mut Registry) {
    registry.composer("count", Options::new(), Count);
    registry.aggregator("sum", Options::new().ftype(Kind::Decimal), Sum);
    registry.composer("sort", Options::new(), Sort);
    registry.composer(
        "truncate",
        Options::new().with_default("start", Value::from(0)),
        Truncate,
    );
    registry.composer("tail", Options::new(), Tail);
    registry.composer("reverse", Options::new(), Reverse);
    registry.composer(
        "uniq",
        Options::new().with_default("uniq_key", Value::from("content")),
        Uniq,
    );
    registry.composer("filter", Options::new().extract("rule"), Filter);
}

fn items(records: impl Iterator<Item = Record> + Send + 'static) -> Values {
    Box::new(records.map(Record::into_value))
}

// =============================================================================
// count
// =============================================================================

/// Item count, or one `{value: n}` per distinct `count_key` value.
pub struct Count;

impl Composer for Count {
    fn compose(&self, input: OpInput, conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let Some(key) = conf.text("count_key") else {
            return Ok(Box::new(std::iter::once(Value::from(input.records().count()))));
        };

        let groups = reduce(input.records(), BTreeMap::<String, u64>::new(), |mut groups, item| {
            let value = item.get(&key).map(|v| value_text(&v)).unwrap_or_default();
            *groups.entry(value).or_default() += 1;
            groups
        });
        Ok(Box::new(groups.into_iter().map(|(value, n)| {
            let mut group = Map::new();
            group.insert(value, Value::from(n));
            Value::Object(group)
        })))
    }
}

// =============================================================================
// sum
// =============================================================================

/// Total of `sum_key` (or the configured field); non-numeric values count as zero.
pub struct Sum;

impl Aggregator for Sum {
    fn aggregate(&self, input: OpInput, conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Value> {
        let numbers: Box<dyn Iterator<Item = f64> + Send> = match conf.text("sum_key") {
            Some(key) => Box::new(input.records().map(move |item| {
                let value = item.get(&key).unwrap_or(Value::Null);
                Kind::Decimal.cast(&value).as_decimal()
            })),
            None => Box::new(input.values().map(|v| v.as_decimal())),
        };

        let total = reduce(numbers.filter(|n| n.is_finite()), 0.0, |acc, n| acc + n);
        Ok(Value::from(total))
    }
}

// =============================================================================
// sort
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SortRule {
    sort_key: String,
    sort_dir: Direction,
}

fn sort_rules(conf: &Conf) -> Vec<SortRule> {
    let raw: Vec<Value> = match conf.get("rule") {
        Some(Value::Array(rules)) => rules.clone(),
        Some(rule) => vec![rule.clone()],
        None => vec![conf.to_value()],
    };
    raw.into_iter()
        .filter_map(|rule| match serde_json::from_value::<SortRule>(rule) {
            Ok(rule) if !rule.sort_key.is_empty() => Some(rule),
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "ignoring sort rule");
                None
            }
        })
        .collect()
}

/// Numbers compare numerically, everything else as case-folded text; absent
/// values sort first.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => value_text(x).to_lowercase().cmp(&value_text(y).to_lowercase()),
    }
}

/// Stable multi-key sort: `{"rule": [{"sort_key": "year", "sort_dir": "desc"}]}`.
pub struct Sort;

impl Composer for Sort {
    fn compose(&self, input: OpInput, conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let rules = sort_rules(conf);
        let mut keyed: Vec<(Vec<Option<Value>>, Record)> = input
            .records()
            .map(|item| (rules.iter().map(|r| item.get(&r.sort_key)).collect(), item))
            .collect();

        keyed.sort_by(|(a, _), (b, _)| {
            rules
                .iter()
                .zip(a.iter().zip(b))
                .map(|(rule, (x, y))| match rule.sort_dir {
                    Direction::Asc => compare(x.as_ref(), y.as_ref()),
                    Direction::Desc => compare(y.as_ref(), x.as_ref()),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(items(keyed.into_iter().map(|(_, item)| item)))
    }
}

// =============================================================================
// truncate / tail / reverse
// =============================================================================

/// `count` items after skipping `start`; lazy, stops pulling once done.
pub struct Truncate;

impl Composer for Truncate {
    fn compose(&self, input: OpInput, conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let start = conf.int_or("start", 0).max(0) as usize;
        let records = input.records().skip(start);
        Ok(match conf.get("count") {
            Some(_) => items(records.take(conf.int_or("count", 0).max(0) as usize)),
            None => items(records),
        })
    }
}

/// The last `count` items.
pub struct Tail;

impl Composer for Tail {
    fn compose(&self, input: OpInput, conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let count = conf.int_or("count", 1).max(0) as usize;
        let last = reduce(input.records(), VecDeque::new(), |mut last, item| {
            if count > 0 {
                if last.len() == count {
                    last.pop_front();
                }
                last.push_back(item);
            }
            last
        });
        Ok(items(last.into_iter()))
    }
}

pub struct Reverse;

impl Composer for Reverse {
    fn compose(&self, input: OpInput, _conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let all: Vec<Record> = input.records().collect();
        Ok(items(all.into_iter().rev()))
    }
}

// =============================================================================
// uniq
// =============================================================================

/// Drop items whose `uniq_key` value was already seen.
pub struct Uniq;

impl Composer for Uniq {
    fn compose(&self, input: OpInput, conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let key = conf.text_or("uniq_key", "content");
        let mut seen = HashSet::new();
        Ok(items(input.records().filter(move |item| {
            let value = item.get(&key).map(|v| value_text(&v)).unwrap_or_default();
            seen.insert(value)
        })))
    }
}

// =============================================================================
// filter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Combine {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    #[default]
    Permit,
    Block,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterRule {
    field: String,
    op: RuleOp,
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterConf {
    combine: Combine,
    mode: Mode,
}

fn matches(item: &Record, rules: &[Conf], combine: Combine) -> bool {
    let mut results = rules.iter().map(|rule| {
        let rule: FilterRule = rule.parse();
        !rule.field.is_empty() && rule.op.test(item.get(&rule.field).as_ref(), &rule.value)
    });
    match combine {
        Combine::Any => results.any(|m| m),
        Combine::All => results.all(|m| m),
    }
}

/// Keep (`permit`) or drop (`block`) items matching the rules.
///
/// Rules resolve against each item, so operands may be subkey references.
/// Without rules every item passes.
pub struct Filter;

impl Composer for Filter {
    fn compose(&self, input: OpInput, _conf: &Conf, _ctx: &Context<'_>) -> PipeResult<Values> {
        let kept = input.pairs().filter_map(|(item, resolved)| {
            if resolved.rules.is_empty() {
                return Some(item);
            }
            let conf: FilterConf = resolved.conf.parse();
            let matched = matches(&item, &resolved.rules, conf.combine);
            let keep = match conf.mode {
                Mode::Permit => matched,
                Mode::Block => !matched,
            };
            keep.then_some(item)
        });
        Ok(items(kept))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::operate;
    use super::*;
    use crate::dispatch::Overrides;
    use serde_json::json;

    fn words(list: &[&str]) -> Vec<Value> {
        list.iter().map(|w| json!({"word": w})).collect()
    }

    #[test]
    fn test_count_without_key() {
        let items: Vec<Value> = (0..5).map(|x| json!({"x": x})).collect();
        assert_eq!(operate("count", json!({}), Overrides::default(), items), vec![json!({"count": 5})]);
    }

    #[test]
    fn test_count_groups_by_key() {
        let out = operate("count", json!({"count_key": "word"}), Overrides::default(), words(&["two", "one", "two"]));
        assert_eq!(out, vec![json!({"one": 1}), json!({"two": 2})]);
    }

    #[test]
    fn test_count_empty_stream() {
        assert_eq!(operate("count", Value::Null, Overrides::default(), vec![]), vec![json!({"count": 0})]);
    }

    #[test]
    fn test_sum() {
        let items = vec![json!({"n": 1}), json!({"n": "2.5"}), json!({"n": "x"}), json!({})];
        assert_eq!(operate("sum", json!({"sum_key": "n"}), Overrides::default(), items), vec![json!({"sum": 3.5})]);
    }

    #[test]
    fn test_sum_over_field_with_assign() {
        let overrides = Overrides {
            field: Some("price".to_string()),
            assign: Some("total".to_string()),
            ..Overrides::default()
        };
        let items = vec![json!({"price": 2}), json!({"price": 3})];
        assert_eq!(operate("sum", json!({}), overrides, items), vec![json!({"total": 5.0})]);
    }

    #[test]
    fn test_sort_multi_key() {
        let items = vec![
            json!({"year": 2001, "title": "b"}),
            json!({"year": 1999, "title": "z"}),
            json!({"year": 2001, "title": "A"}),
        ];
        let conf = json!({"rule": [
            {"sort_key": "year", "sort_dir": "desc"},
            {"sort_key": "title"},
        ]});
        let out = operate("sort", conf, Overrides::default(), items);
        let titles: Vec<&Value> = out.iter().map(|i| &i["title"]).collect();
        assert_eq!(titles, vec!["A", "b", "z"]);
    }

    #[test]
    fn test_sort_flat_conf() {
        let out = operate("sort", json!({"sort_key": "word"}), Overrides::default(), words(&["b", "c", "a"]));
        assert_eq!(out, words(&["a", "b", "c"]));
    }

    #[test]
    fn test_truncate_tail_reverse() {
        let input = words(&["a", "b", "c", "d"]);
        assert_eq!(
            operate("truncate", json!({"count": 2, "start": 1}), Overrides::default(), input.clone()),
            words(&["b", "c"])
        );
        assert_eq!(operate("tail", json!({"count": 2}), Overrides::default(), input.clone()), words(&["c", "d"]));
        assert_eq!(operate("tail", json!({"count": 9}), Overrides::default(), input.clone()), input);
        assert_eq!(operate("reverse", json!({}), Overrides::default(), input), words(&["d", "c", "b", "a"]));
    }

    #[test]
    fn test_tail_with_huge_count_keeps_everything() {
        let input = words(&["a", "b"]);
        let huge = json!({"count": 1_000_000_000_000_000u64});
        assert_eq!(operate("tail", huge.clone(), Overrides::default(), input.clone()), input);
        assert_eq!(operate("truncate", huge, Overrides::default(), input.clone()), input);
    }

    #[test]
    fn test_uniq_keeps_first() {
        let items = vec![
            json!({"word": "a", "n": 1}),
            json!({"word": "b", "n": 2}),
            json!({"word": "a", "n": 3}),
        ];
        let out = operate("uniq", json!({"uniq_key": "word"}), Overrides::default(), items);
        assert_eq!(out, vec![json!({"word": "a", "n": 1}), json!({"word": "b", "n": 2})]);
    }

    #[test]
    fn test_filter_permit_any() {
        let conf = json!({"rule": [
            {"field": "word", "op": "startswith", "value": "ap"},
            {"field": "word", "op": "eq", "value": "fig"},
        ]});
        let out = operate("filter", conf, Overrides::default(), words(&["apple", "pear", "fig", "apricot"]));
        assert_eq!(out, words(&["apple", "fig", "apricot"]));
    }

    #[test]
    fn test_filter_block_all() {
        let conf = json!({
            "mode": "block",
            "combine": "all",
            "rule": [
                {"field": "word", "op": "contains", "value": "p"},
                {"field": "word", "op": "endswith", "value": "e"},
            ]
        });
        let out = operate("filter", conf, Overrides::default(), words(&["apple", "pear", "fig"]));
        assert_eq!(out, words(&["pear", "fig"]));
    }

    #[test]
    fn test_filter_rule_with_subkey_operand() {
        let conf = json!({"rule": {"field": "a", "op": "eq", "value": {"subkey": "b"}}});
        let items = vec![json!({"a": 1, "b": 1}), json!({"a": 1, "b": 2})];
        let out = operate("filter", conf, Overrides::default(), items);
        assert_eq!(out, vec![json!({"a": 1, "b": 1})]);
    }

    #[test]
    fn test_filter_without_rules_passes_everything() {
        let input = words(&["a", "b"]);
        assert_eq!(operate("filter", json!({}), Overrides::default(), input.clone()), input);
    }
}
