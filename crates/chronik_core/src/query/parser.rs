//! Query forms → [`Query`].

use chronik_codec::Value;

use crate::error::{CoreError, CoreResult};

/// Default source name.
pub(crate) const DEFAULT_SOURCE: &str = "$";

/// A term in a clause.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Term {
    Var(String),
    Const(Value),
    Blank,
    Src(String),
}

/// Destructuring target for inputs and function results.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Binding {
    Var(String),
    Blank,
    Tuple(Vec<Binding>),
    Coll(Box<Binding>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum InBinding {
    Source(String),
    Bind(Binding),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FindElem {
    Var(String),
    Aggregate { name: String, args: Vec<Term> },
    Pull { src: String, var: String, pattern: Term },
}

impl FindElem {
    pub(crate) fn is_aggregate(&self) -> bool {
        matches!(self, FindElem::Aggregate { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FindSpec {
    Rel(Vec<FindElem>),
    Coll(FindElem),
    Tuple(Vec<FindElem>),
    Scalar(FindElem),
}

impl FindSpec {
    pub(crate) fn elements(&self) -> &[FindElem] {
        match self {
            FindSpec::Rel(elems) | FindSpec::Tuple(elems) => elems,
            FindSpec::Coll(elem) | FindSpec::Scalar(elem) => std::slice::from_ref(elem),
        }
    }
}

/// How `:keys`, `:strs` or `:syms` name result columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyKind {
    Keyword,
    Text,
    Symbol,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Clause {
    Pattern {
        src: Option<String>,
        terms: Vec<Term>,
    },
    Pred {
        name: String,
        args: Vec<Term>,
    },
    Fn {
        name: String,
        args: Vec<Term>,
        binding: Binding,
    },
    Not {
        join: Option<Vec<String>>,
        clauses: Vec<Clause>,
    },
    Or {
        join: Option<Vec<String>>,
        branches: Vec<Vec<Clause>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Query {
    pub(crate) find: FindSpec,
    pub(crate) keys: Option<(KeyKind, Vec<String>)>,
    pub(crate) with: Vec<String>,
    pub(crate) inputs: Vec<InBinding>,
    pub(crate) clauses: Vec<Clause>,
}

fn symbol(value: &Value) -> Option<&str> {
    value.as_symbol()
}

pub(crate) fn var_name(value: &Value) -> Option<&str> {
    symbol(value).filter(|s| s.starts_with('?'))
}

fn src_name(value: &Value) -> Option<&str> {
    symbol(value).filter(|s| s.starts_with('$'))
}

fn term(value: &Value) -> Term {
    match symbol(value) {
        Some("_") => Term::Blank,
        Some(s) if s.starts_with('?') => Term::Var(s.to_string()),
        Some(s) if s.starts_with('$') => Term::Src(s.to_string()),
        _ => Term::Const(value.clone()),
    }
}

fn seq<'v>(value: &'v Value, what: &str) -> CoreResult<&'v [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(CoreError::query(format!("{what} must be a vector, got {other}"))),
    }
}

/// Parses a query in vector (`[:find .. :where ..]`) or map form.
pub(crate) fn parse_query(form: &Value) -> CoreResult<Query> {
    let mut sections: Vec<(String, Vec<Value>)> = Vec::new();
    match form {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Keyword(k) => sections.push((k.clone(), Vec::new())),
                    other => match sections.last_mut() {
                        Some((_, body)) => body.push(other.clone()),
                        None => {
                            return Err(CoreError::query(format!(
                                "query must start with a keyword such as :find, got {other}"
                            )))
                        }
                    },
                }
            }
        }
        Value::Map(pairs) => {
            for (key, body) in pairs {
                let Some(name) = key.as_keyword() else {
                    return Err(CoreError::query(format!("query map keys must be keywords, got {key}")));
                };
                sections.push((name.to_string(), seq(body, &format!(":{name}"))?.to_vec()));
            }
        }
        other => {
            return Err(CoreError::query(format!(
                "query must be a vector or a map, got {other}"
            )))
        }
    }

    let mut find = None;
    let mut keys = None;
    let mut with = Vec::new();
    let mut inputs = None;
    let mut clauses = Vec::new();
    for (name, body) in &sections {
        match name.as_str() {
            "find" => find = Some(parse_find(body)?),
            "keys" | "strs" | "syms" => {
                let kind = match name.as_str() {
                    "keys" => KeyKind::Keyword,
                    "strs" => KeyKind::Text,
                    _ => KeyKind::Symbol,
                };
                let names = body
                    .iter()
                    .map(|k| match k {
                        Value::Symbol(s) | Value::Text(s) | Value::Keyword(s) => Ok(s.clone()),
                        other => Err(CoreError::query(format!("invalid :{name} entry {other}"))),
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                keys = Some((kind, names));
            }
            "with" => {
                with = body
                    .iter()
                    .map(|v| {
                        var_name(v)
                            .map(str::to_string)
                            .ok_or_else(|| CoreError::query(format!(":with expects variables, got {v}")))
                    })
                    .collect::<CoreResult<_>>()?;
            }
            "in" => inputs = Some(body.iter().map(parse_in).collect::<CoreResult<Vec<_>>>()?),
            "where" => {
                clauses = body.iter().map(parse_clause).collect::<CoreResult<_>>()?;
            }
            other => return Err(CoreError::query(format!("unknown query section :{other}"))),
        }
    }

    let find = find.ok_or_else(|| CoreError::query("query is missing :find"))?;
    if let Some((_, names)) = &keys {
        if names.len() != find.elements().len() {
            return Err(CoreError::query(format!(
                "{} result keys given for {} find elements",
                names.len(),
                find.elements().len()
            )));
        }
    }
    Ok(Query {
        find,
        keys,
        with,
        inputs: inputs.unwrap_or_else(|| vec![InBinding::Source(DEFAULT_SOURCE.to_string())]),
        clauses,
    })
}

fn parse_find(body: &[Value]) -> CoreResult<FindSpec> {
    match body {
        [] => Err(CoreError::query(":find must name at least one element")),
        [elem, dot] if symbol(dot) == Some(".") => Ok(FindSpec::Scalar(parse_find_elem(elem)?)),
        [Value::Array(inner)] if inner.len() == 2 && symbol(&inner[1]) == Some("...") => {
            Ok(FindSpec::Coll(parse_find_elem(&inner[0])?))
        }
        [Value::Array(inner)] if inner.first().is_some_and(|v| var_name(v).is_some() || is_find_call(v)) => {
            Ok(FindSpec::Tuple(
                inner.iter().map(parse_find_elem).collect::<CoreResult<_>>()?,
            ))
        }
        elems => Ok(FindSpec::Rel(
            elems.iter().map(parse_find_elem).collect::<CoreResult<_>>()?,
        )),
    }
}

fn is_find_call(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.first().and_then(symbol).is_some_and(|s| !s.starts_with('?')))
}

fn parse_find_elem(value: &Value) -> CoreResult<FindElem> {
    if let Some(var) = var_name(value) {
        return Ok(FindElem::Var(var.to_string()));
    }
    let Value::Array(items) = value else {
        return Err(CoreError::query(format!("invalid find element {value}")));
    };
    match items.split_first() {
        Some((head, rest)) if symbol(head) == Some("pull") => {
            let (src, rest) = match rest.split_first() {
                Some((first, tail)) if src_name(first).is_some() => {
                    (src_name(first).unwrap_or(DEFAULT_SOURCE).to_string(), tail)
                }
                _ => (DEFAULT_SOURCE.to_string(), rest),
            };
            match rest {
                [var, pattern] => {
                    let var = var_name(var)
                        .ok_or_else(|| CoreError::query(format!("pull expects a variable, got {var}")))?;
                    Ok(FindElem::Pull {
                        src,
                        var: var.to_string(),
                        pattern: term(pattern),
                    })
                }
                _ => Err(CoreError::query(format!("invalid pull expression {value}"))),
            }
        }
        Some((head, args)) if symbol(head).is_some() => Ok(FindElem::Aggregate {
            name: symbol(head).unwrap_or_default().to_string(),
            args: args.iter().map(term).collect(),
        }),
        _ => Err(CoreError::query(format!("invalid find element {value}"))),
    }
}

fn parse_in(value: &Value) -> CoreResult<InBinding> {
    match symbol(value) {
        Some(s) if s.starts_with('$') => Ok(InBinding::Source(s.to_string())),
        Some("%") => Err(CoreError::query("rules are not supported")),
        _ => Ok(InBinding::Bind(parse_binding(value)?)),
    }
}

pub(crate) fn parse_binding(value: &Value) -> CoreResult<Binding> {
    match value {
        Value::Symbol(s) if s == "_" => Ok(Binding::Blank),
        Value::Symbol(s) if s.starts_with('?') => Ok(Binding::Var(s.clone())),
        Value::Array(items) => match items.as_slice() {
            [inner, dots] if symbol(dots) == Some("...") => {
                Ok(Binding::Coll(Box::new(parse_binding(inner)?)))
            }
            [inner @ Value::Array(_)] => Ok(Binding::Coll(Box::new(parse_binding(inner)?))),
            [] => Err(CoreError::query("empty binding form")),
            items => Ok(Binding::Tuple(
                items.iter().map(parse_binding).collect::<CoreResult<_>>()?,
            )),
        },
        other => Err(CoreError::query(format!("invalid binding form {other}"))),
    }
}

fn join_vars(value: &Value) -> CoreResult<Vec<String>> {
    seq(value, "join variables")?
        .iter()
        .map(|v| {
            var_name(v)
                .map(str::to_string)
                .ok_or_else(|| CoreError::query(format!("join variables must be variables, got {v}")))
        })
        .collect()
}

fn parse_branch(value: &Value) -> CoreResult<Vec<Clause>> {
    match value {
        Value::Array(items) if items.first().and_then(symbol) == Some("and") => {
            items[1..].iter().map(parse_clause).collect()
        }
        other => Ok(vec![parse_clause(other)?]),
    }
}

pub(crate) fn parse_clause(value: &Value) -> CoreResult<Clause> {
    let items = seq(value, "where clause")?;
    let Some(head) = items.first() else {
        return Err(CoreError::query("empty where clause"));
    };

    match symbol(head) {
        Some("not") => {
            return Ok(Clause::Not {
                join: None,
                clauses: items[1..].iter().map(parse_clause).collect::<CoreResult<_>>()?,
            })
        }
        Some("not-join") if items.len() >= 2 => {
            return Ok(Clause::Not {
                join: Some(join_vars(&items[1])?),
                clauses: items[2..].iter().map(parse_clause).collect::<CoreResult<_>>()?,
            })
        }
        Some("or") => {
            return Ok(Clause::Or {
                join: None,
                branches: items[1..].iter().map(parse_branch).collect::<CoreResult<_>>()?,
            })
        }
        Some("or-join") if items.len() >= 2 => {
            return Ok(Clause::Or {
                join: Some(join_vars(&items[1])?),
                branches: items[2..].iter().map(parse_branch).collect::<CoreResult<_>>()?,
            })
        }
        _ => {}
    }

    if let Value::Array(call) = head {
        let Some((name, args)) = call.split_first() else {
            return Err(CoreError::query("empty function call"));
        };
        let name = symbol(name)
            .ok_or_else(|| CoreError::query(format!("function name must be a symbol, got {name}")))?
            .to_string();
        let args = args.iter().map(term).collect();
        return match &items[1..] {
            [] => Ok(Clause::Pred { name, args }),
            [binding] => Ok(Clause::Fn {
                name,
                args,
                binding: parse_binding(binding)?,
            }),
            _ => Err(CoreError::query(format!("invalid function clause {value}"))),
        };
    }

    let (src, terms) = match src_name(head) {
        Some(src) => (Some(src.to_string()), &items[1..]),
        None => (None, items),
    };
    if let Some(name) = symbol(head).filter(|s| !s.starts_with('?') && !s.starts_with('$') && *s != "_") {
        return Err(CoreError::query(format!(
            "unknown clause {name}; rules are not supported"
        )));
    }
    if terms.is_empty() || terms.len() > 5 {
        return Err(CoreError::query(format!(
            "data pattern must have 1 to 5 elements, got {value}"
        )));
    }
    Ok(Clause::Pattern {
        src,
        terms: terms.iter().map(term).collect(),
    })
}
