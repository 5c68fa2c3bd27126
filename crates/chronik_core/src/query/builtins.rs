//! Built-in predicates, functions and aggregates.

use std::cmp::Ordering;

use chronik_codec::Value;

use crate::error::{CoreError, CoreResult};

/// Orders numbers numerically across integer and float, everything else
/// by the value order.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Float(y)) => (*x as f64).total_cmp(y),
        (Value::Float(x), Value::Integer(y)) => x.total_cmp(&(*y as f64)),
        _ => a.cmp(b),
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn strip_ns(name: &str) -> &str {
    name.strip_prefix("clojure.string/").unwrap_or(name)
}

fn text_arg<'v>(name: &str, value: &'v Value) -> CoreResult<&'v str> {
    value
        .as_text()
        .ok_or_else(|| CoreError::query(format!("{name} expects strings, got {value}")))
}

fn int_arg(name: &str, value: &Value) -> CoreResult<i64> {
    value
        .as_integer()
        .ok_or_else(|| CoreError::query(format!("{name} expects integers, got {value}")))
}

/// Whether `name` is a known predicate.
pub(crate) fn is_predicate(name: &str) -> bool {
    matches!(
        strip_ns(name),
        "=" | "==" | "!=" | "not=" | "<" | "<=" | ">" | ">=" | "zero?" | "pos?" | "neg?" | "even?"
            | "odd?" | "nil?" | "some?" | "true?" | "false?" | "starts-with?" | "ends-with?"
            | "includes?" | "blank?"
    )
}

/// Evaluates a predicate.
pub(crate) fn predicate(name: &str, args: &[Value]) -> CoreResult<bool> {
    let chain = |ok: fn(Ordering) -> bool| args.windows(2).all(|w| ok(compare(&w[0], &w[1])));
    let unary = || -> CoreResult<&Value> {
        match args {
            [x] => Ok(x),
            _ => Err(CoreError::query(format!("{name} takes one argument"))),
        }
    };
    let number = |v: &Value| -> CoreResult<f64> {
        v.as_f64()
            .ok_or_else(|| CoreError::query(format!("{name} expects a number, got {v}")))
    };
    Ok(match strip_ns(name) {
        "=" | "==" => chain(Ordering::is_eq),
        "!=" | "not=" => !chain(Ordering::is_eq),
        "<" => chain(Ordering::is_lt),
        "<=" => chain(Ordering::is_le),
        ">" => chain(Ordering::is_gt),
        ">=" => chain(Ordering::is_ge),
        "zero?" => number(unary()?)? == 0.0,
        "pos?" => number(unary()?)? > 0.0,
        "neg?" => number(unary()?)? < 0.0,
        "even?" => int_arg(name, unary()?)? % 2 == 0,
        "odd?" => int_arg(name, unary()?)? % 2 != 0,
        "nil?" => unary()?.is_null(),
        "some?" => !unary()?.is_null(),
        "true?" => *unary()? == Value::Bool(true),
        "false?" => *unary()? == Value::Bool(false),
        "blank?" => text_arg(name, unary()?)?.trim().is_empty(),
        "starts-with?" | "ends-with?" | "includes?" => match args {
            [s, part] => {
                let (s, part) = (text_arg(name, s)?, text_arg(name, part)?);
                match strip_ns(name) {
                    "starts-with?" => s.starts_with(part),
                    "ends-with?" => s.ends_with(part),
                    _ => s.contains(part),
                }
            }
            _ => return Err(CoreError::query(format!("{name} takes two arguments"))),
        },
        _ => return Err(CoreError::query(format!("unknown predicate {name}"))),
    })
}

fn arithmetic(name: &str, args: &[Value]) -> CoreResult<Value> {
    let all_ints = args.iter().all(|a| matches!(a, Value::Integer(_)));
    for arg in args {
        if arg.as_f64().is_none() {
            return Err(CoreError::query(format!("{name} expects numbers, got {arg}")));
        }
    }
    if all_ints {
        let ints: Vec<i64> = args.iter().filter_map(Value::as_integer).collect();
        let overflow = || CoreError::query(format!("integer overflow in {name}"));
        let result = match (name, ints.as_slice()) {
            ("+", xs) => xs.iter().try_fold(0i64, |acc, x| acc.checked_add(*x)).ok_or_else(overflow)?,
            ("*", xs) => xs.iter().try_fold(1i64, |acc, x| acc.checked_mul(*x)).ok_or_else(overflow)?,
            ("-", [x]) => x.checked_neg().ok_or_else(overflow)?,
            ("-", [x, rest @ ..]) => rest.iter().try_fold(*x, |acc, y| acc.checked_sub(*y)).ok_or_else(overflow)?,
            ("/", [x, rest @ ..]) if !rest.is_empty() => {
                if rest.contains(&0) {
                    return Err(CoreError::query("division by zero"));
                }
                let mut acc = *x;
                for y in rest {
                    if acc.checked_rem(*y).ok_or_else(overflow)? != 0 {
                        let exact = rest.iter().fold(*x as f64, |acc, y| acc / *y as f64);
                        return Ok(Value::Float(exact));
                    }
                    acc = acc.checked_div(*y).ok_or_else(overflow)?;
                }
                acc
            }
            _ => return Err(CoreError::query(format!("bad arity for {name}"))),
        };
        return Ok(Value::Integer(result));
    }

    let floats: Vec<f64> = args.iter().filter_map(Value::as_f64).collect();
    let result = match (name, floats.as_slice()) {
        ("+", xs) => xs.iter().sum(),
        ("*", xs) => xs.iter().product(),
        ("-", [x]) => -x,
        ("-", [x, rest @ ..]) => rest.iter().fold(*x, |acc, y| acc - y),
        ("/", [x, rest @ ..]) if !rest.is_empty() => rest.iter().fold(*x, |acc, y| acc / y),
        _ => return Err(CoreError::query(format!("bad arity for {name}"))),
    };
    Ok(Value::Float(result))
}

fn str_fragment(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Text(s) => s.clone(),
        Value::Keyword(k) => format!(":{k}"),
        Value::Symbol(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluates a function whose result gets bound.
pub(crate) fn call(name: &str, args: &[Value]) -> CoreResult<Value> {
    if is_predicate(name) {
        return predicate(name, args).map(Value::Bool);
    }
    match strip_ns(name) {
        "+" | "-" | "*" | "/" => arithmetic(name, args),
        "inc" | "dec" => match args {
            [Value::Integer(x)] => {
                let delta = if name == "inc" { 1 } else { -1 };
                x.checked_add(delta)
                    .map(Value::Integer)
                    .ok_or_else(|| CoreError::query(format!("integer overflow in {name}")))
            }
            [Value::Float(x)] => Ok(Value::Float(if name == "inc" { x + 1.0 } else { x - 1.0 })),
            _ => Err(CoreError::query(format!("{name} expects one number"))),
        },
        "quot" | "rem" | "mod" => match args {
            [x, y] => {
                let (x, y) = (int_arg(name, x)?, int_arg(name, y)?);
                if y == 0 {
                    return Err(CoreError::query("division by zero"));
                }
                let result = match name {
                    "quot" => x.checked_div(y),
                    "rem" => x.checked_rem(y),
                    _ => x.checked_rem_euclid(y),
                };
                result
                    .map(Value::Integer)
                    .ok_or_else(|| CoreError::query(format!("integer overflow in {name}")))
            }
            _ => Err(CoreError::query(format!("{name} takes two arguments"))),
        },
        "str" => Ok(Value::Text(args.iter().map(str_fragment).collect())),
        "upper-case" => Ok(Value::text(text_arg(name, first(name, args)?)?.to_uppercase())),
        "lower-case" => Ok(Value::text(text_arg(name, first(name, args)?)?.to_lowercase())),
        "count" => match first(name, args)? {
            Value::Text(s) => Ok(Value::Integer(s.chars().count() as i64)),
            Value::Array(xs) | Value::Set(xs) => Ok(Value::Integer(xs.len() as i64)),
            Value::Map(pairs) => Ok(Value::Integer(pairs.len() as i64)),
            Value::Null => Ok(Value::Integer(0)),
            other => Err(CoreError::query(format!("count not supported on {other}"))),
        },
        "identity" | "ground" => first(name, args).cloned(),
        "vector" | "tuple" => Ok(Value::Array(args.to_vec())),
        "untuple" => first(name, args).cloned(),
        "min" | "max" => {
            let pick = if name == "min" { Ordering::is_lt } else { Ordering::is_gt };
            args.iter()
                .cloned()
                .reduce(|best, x| if pick(compare(&x, &best)) { x } else { best })
                .ok_or_else(|| CoreError::query(format!("{name} needs at least one argument")))
        }
        _ => Err(CoreError::query(format!("unknown function {name}"))),
    }
}

fn first<'v>(name: &str, args: &'v [Value]) -> CoreResult<&'v Value> {
    match args {
        [x] => Ok(x),
        _ => Err(CoreError::query(format!("{name} takes one argument"))),
    }
}

/// Whether `name` is a known aggregate.
pub(crate) fn is_aggregate(name: &str) -> bool {
    matches!(
        name,
        "count" | "count-distinct" | "sum" | "min" | "max" | "avg" | "median" | "distinct"
            | "variance" | "stddev"
    )
}

/// Folds the values of one group.
pub(crate) fn aggregate(name: &str, mut values: Vec<Value>) -> CoreResult<Value> {
    let numbers = |values: &[Value]| -> CoreResult<Vec<f64>> {
        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| CoreError::query(format!("{name} expects numbers, got {v}")))
            })
            .collect()
    };
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let variance = |xs: &[f64]| {
        let m = mean(xs);
        xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64
    };

    Ok(match name {
        "count" => Value::Integer(values.len() as i64),
        "count-distinct" => {
            values.sort();
            values.dedup();
            Value::Integer(values.len() as i64)
        }
        "distinct" => Value::set(values),
        "min" => values
            .into_iter()
            .reduce(|a, b| if compare(&b, &a).is_lt() { b } else { a })
            .unwrap_or(Value::Null),
        "max" => values
            .into_iter()
            .reduce(|a, b| if compare(&b, &a).is_gt() { b } else { a })
            .unwrap_or(Value::Null),
        "sum" => {
            if values.iter().all(|v| matches!(v, Value::Integer(_))) {
                let total = values
                    .iter()
                    .filter_map(Value::as_integer)
                    .try_fold(0i64, i64::checked_add)
                    .ok_or_else(|| CoreError::query("integer overflow in sum"))?;
                Value::Integer(total)
            } else {
                Value::Float(numbers(&values)?.iter().sum())
            }
        }
        "avg" | "median" | "variance" | "stddev" if values.is_empty() => Value::Null,
        "avg" => Value::Float(mean(&numbers(&values)?)),
        "median" => {
            let mut xs = numbers(&values)?;
            xs.sort_by(f64::total_cmp);
            let mid = xs.len() / 2;
            Value::Float(if xs.len() % 2 == 0 {
                (xs[mid - 1] + xs[mid]) / 2.0
            } else {
                xs[mid]
            })
        }
        "variance" => Value::Float(variance(&numbers(&values)?)),
        "stddev" => Value::Float(variance(&numbers(&values)?).sqrt()),
        other => return Err(CoreError::query(format!("unknown aggregate {other}"))),
    })
}
