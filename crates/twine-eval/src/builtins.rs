//! Built-in filters, tests and functions installed in every environment.

use std::rc::Rc;

use crate::error::Error;
use crate::registry::{FilterFn, FunctionFn, Registry, TestFn};
use crate::value::Value;
use crate::Result;

pub fn register_filters(filters: &mut Registry<FilterFn>) {
    filters.insert("upper", filter(|v, _| Ok(map_str(v, str::to_uppercase))));
    filters.insert("lower", filter(|v, _| Ok(map_str(v, str::to_lowercase))));
    filters.insert("capitalize", filter(|v, _| Ok(map_str(v, capitalize))));
    filters.insert("title", filter(|v, _| Ok(map_str(v, title))));
    filters.insert("length", filter(|v, _| Ok(Value::from(length(&v)))));
    filters.insert("reverse", filter(|v, _| Ok(reverse(v))));
    filters.insert("keys", filter(|v, _| Ok(keys(&v))));
    filters.insert("join", filter(join));
    filters.insert("default", filter(default));
    filters.insert("first", filter(|v, _| Ok(first(v))));
    filters.insert("last", filter(|v, _| Ok(last(v))));
    filters.insert("trim", filter(trim));
    filters.insert("abs", filter(|v, _| Ok(Value::from(v.to_number().abs()))));
    filters.insert("json_encode", filter(|v, _| json_encode(&v)));
}

pub fn register_tests(tests: &mut Registry<TestFn>) {
    tests.insert("empty", predicate(|v, _| Ok(is_empty(&v))));
    tests.insert("odd", predicate(|v, _| Ok(v.to_number() % 2.0 == 1.0)));
    tests.insert("even", predicate(|v, _| Ok(v.to_number() % 2.0 == 0.0)));
    tests.insert(
        "divisibleby",
        predicate(|v, args| Ok(v.to_number() % arg(&args, 0).to_number() == 0.0)),
    );
    tests.insert("defined", predicate(|v, _| Ok(!v.is_null())));
    tests.insert("none", predicate(|v, _| Ok(v.is_null())));
    tests.insert("null", predicate(|v, _| Ok(v.is_null())));
    tests.insert("same as", predicate(|v, args| Ok(v == arg(&args, 0))));
    tests.insert(
        "sameas",
        predicate(|v, args| {
            tracing::warn!("`sameas` is deprecated, use `same as`");
            Ok(v == arg(&args, 0))
        }),
    );
    tests.insert(
        "iterable",
        predicate(|v, _| Ok(matches!(v, Value::Array(_) | Value::Map(_)))),
    );
}

pub fn register_functions(functions: &mut Registry<FunctionFn>) {
    functions.insert("range", Rc::new(range) as FunctionFn);
}

fn filter(f: impl Fn(Value, Vec<Value>) -> Result<Value> + 'static) -> FilterFn {
    Rc::new(f)
}

fn predicate(f: impl Fn(Value, Vec<Value>) -> Result<bool> + 'static) -> TestFn {
    Rc::new(move |value, args| f(value, args).map(Value::Bool))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

/// Case filters leave anything that is not a string untouched.
fn map_str(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => {
            let rest = chars.as_str().to_lowercase();
            first.to_uppercase().chain(rest.chars()).collect()
        }
        None => String::new(),
    }
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        at_word_start = c.is_whitespace();
    }
    out
}

fn length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Map(map) => map.len(),
        _ => 0,
    }
}

fn reverse(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.chars().rev().collect()),
        Value::Array(mut items) => {
            items.reverse();
            Value::Array(items)
        }
        Value::Map(map) => Value::Map(map.into_iter().rev().collect()),
        other => other,
    }
}

fn keys(value: &Value) -> Value {
    match value {
        Value::Map(map) => Value::Array(map.keys().map(|k| Value::from(k.as_str())).collect()),
        Value::Array(items) => Value::Array((0..items.len()).map(Value::from).collect()),
        _ => Value::Array(Vec::new()),
    }
}

fn join(value: Value, args: Vec<Value>) -> Result<Value> {
    let separator = args.first().map(Value::to_string_value).unwrap_or_default();
    let parts: Vec<String> = match value {
        Value::Null => return Ok(Value::Null),
        Value::Array(items) => items.iter().map(Value::to_string_value).collect(),
        Value::Map(map) => map.values().map(Value::to_string_value).collect(),
        other => vec![other.to_string_value()],
    };
    Ok(Value::String(parts.join(&separator)))
}

fn default(value: Value, args: Vec<Value>) -> Result<Value> {
    if args.len() > 1 {
        return Err(Error::Type("default filter expects one argument".into()));
    }
    let missing = match &value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if !missing {
        return Ok(value);
    }
    Ok(args.into_iter().next().unwrap_or_else(|| Value::String(String::new())))
}

fn first(value: Value) -> Value {
    match value {
        Value::Array(items) => items.into_iter().next().unwrap_or_default(),
        Value::Map(map) => map.into_values().next().unwrap_or_default(),
        Value::String(s) => s.chars().next().map(|c| Value::from(c.to_string())).unwrap_or_default(),
        _ => Value::Null,
    }
}

fn last(value: Value) -> Value {
    match value {
        Value::Array(items) => items.into_iter().last().unwrap_or_default(),
        Value::Map(map) => map.into_values().last().unwrap_or_default(),
        Value::String(s) => s.chars().last().map(|c| Value::from(c.to_string())).unwrap_or_default(),
        _ => Value::Null,
    }
}

fn trim(value: Value, args: Vec<Value>) -> Result<Value> {
    let s = match value {
        Value::String(s) => s,
        other => return Ok(other),
    };
    let trimmed = match args.first() {
        Some(chars) => {
            let chars: Vec<char> = chars.to_string_value().chars().collect();
            s.trim_matches(chars.as_slice()).to_string()
        }
        None => s.trim().to_string(),
    };
    Ok(Value::String(trimmed))
}

fn json_encode(value: &Value) -> Result<Value> {
    let json = value.to_json()?;
    serde_json::to_string(&json)
        .map(Value::String)
        .map_err(|e| Error::Type(e.to_string()))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Number(_) => false,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Thenable(_) => false,
    }
}

const MAX_RANGE_LEN: usize = 1 << 20;

/// `range(start, end[, step])`, inclusive of `end` like Twig.
fn range(args: Vec<Value>) -> Result<Value> {
    let start = arg(&args, 0).to_number();
    let end = arg(&args, 1).to_number();
    let step = match args.get(2) {
        Some(step) => step.to_number().abs(),
        None => 1.0,
    };
    if step == 0.0 || step.is_nan() || !start.is_finite() || !end.is_finite() {
        return Err(Error::Type("range expects finite bounds and a non-zero step".into()));
    }
    let span = (end - start).abs();
    let count = (span / step).floor() + 1.0;
    if count > MAX_RANGE_LEN as f64 {
        return Err(Error::Type(format!(
            "range would produce more than {MAX_RANGE_LEN} items"
        )));
    }
    let step = if start <= end { step } else { -step };
    let items = (0..count as usize)
        .map(|i| Value::from(start + i as f64 * step))
        .collect();
    Ok(Value::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtensionKind;
    use serde_json::json;

    fn call_filter(name: &str, value: Value, args: Vec<Value>) -> Result<Value> {
        let mut filters = Registry::new(ExtensionKind::Filter);
        register_filters(&mut filters);
        let f = filters.get(name)?;
        f(value, args)
    }

    fn call_test(name: &str, value: Value, args: Vec<Value>) -> bool {
        let mut tests = Registry::new(ExtensionKind::Test);
        register_tests(&mut tests);
        let t = tests.get(name).unwrap();
        t(value, args).unwrap().to_bool()
    }

    #[test]
    fn test_case_filters() {
        assert_eq!(call_filter("upper", "abc".into(), vec![]), Ok("ABC".into()));
        assert_eq!(call_filter("lower", "AbC".into(), vec![]), Ok("abc".into()));
        assert_eq!(call_filter("capitalize", "hELLO world".into(), vec![]), Ok("Hello world".into()));
        assert_eq!(call_filter("title", "hello big world".into(), vec![]), Ok("Hello Big World".into()));
        assert_eq!(call_filter("upper", Value::from(3), vec![]), Ok(Value::from(3)));
    }

    #[test]
    fn test_length_and_reverse() {
        let map = Value::from(json!({"a": 1, "b": 2}));
        assert_eq!(call_filter("length", map.clone(), vec![]), Ok(Value::from(2)));
        assert_eq!(call_filter("length", "héllo".into(), vec![]), Ok(Value::from(5)));
        let reversed = call_filter("reverse", map, vec![]).unwrap();
        let keys: Vec<&str> = reversed.as_map().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(call_filter("reverse", "abc".into(), vec![]), Ok("cba".into()));
    }

    #[test]
    fn test_join_and_keys() {
        let xs = Value::from(json!([1, "two", 3]));
        assert_eq!(call_filter("join", xs, vec![", ".into()]), Ok("1, two, 3".into()));
        let map = Value::from(json!({"x": 1, "y": 2}));
        assert_eq!(call_filter("keys", map, vec![]).unwrap(), Value::from(json!(["x", "y"])));
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(call_filter("default", Value::Null, vec!["d".into()]), Ok("d".into()));
        assert_eq!(call_filter("default", "".into(), vec![]), Ok("".into()));
        assert_eq!(call_filter("default", "x".into(), vec!["d".into()]), Ok("x".into()));
        assert!(matches!(
            call_filter("default", Value::Null, vec!["a".into(), "b".into()]),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn test_trim_and_json_encode() {
        assert_eq!(call_filter("trim", "  hi  ".into(), vec![]), Ok("hi".into()));
        assert_eq!(call_filter("trim", "--hi--".into(), vec!["-".into()]), Ok("hi".into()));
        assert_eq!(
            call_filter("json_encode", Value::from(json!({"b": [1, null], "a": true})), vec![]),
            Ok(r#"{"b":[1,null],"a":true}"#.into())
        );
    }

    #[test]
    fn test_builtin_tests() {
        assert!(call_test("empty", Value::Null, vec![]));
        assert!(call_test("empty", Value::from(json!({})), vec![]));
        assert!(!call_test("empty", Value::from(0), vec![]));
        assert!(call_test("odd", Value::from(3), vec![]));
        assert!(call_test("even", Value::from(4), vec![]));
        assert!(call_test("divisibleby", Value::from(9), vec![Value::from(3)]));
        assert!(call_test("same as", Value::from(1), vec![Value::from(1)]));
        assert!(!call_test("same as", Value::from(1), vec![Value::from("1")]));
        assert!(call_test("iterable", Value::from(json!([])), vec![]));
        assert!(!call_test("iterable", Value::from("abc"), vec![]));
    }

    #[test]
    fn test_range_is_inclusive() {
        assert_eq!(range(vec![1.into(), 3.into()]).unwrap(), Value::from(json!([1, 2, 3])));
        assert_eq!(
            range(vec![10.into(), 0.into(), 5.into()]).unwrap(),
            Value::from(json!([10, 5, 0]))
        );
        assert!(range(vec![0.into(), 1.into(), 0.into()]).is_err());
    }

    #[test]
    fn test_range_near_float_precision_limit() {
        let items = range(vec![1e16.into(), (1e16 + 4.0).into()]).unwrap();
        assert_eq!(items.as_array().map(<[Value]>::len), Some(5));
    }

    #[test]
    fn test_range_rejects_huge_spans() {
        assert!(matches!(
            range(vec![0.into(), 1e12.into()]),
            Err(Error::Type(_))
        ));
    }
}
