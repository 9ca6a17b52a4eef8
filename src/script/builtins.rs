//! Builtin functions, the `math` and `random` modules and container methods

use std::cmp::Ordering;

use super::capability;
use super::interp::{Exec, Interpreter};
use super::value::*;
use crate::script::ast::BinOp;

/// Global functions every script can call
pub const BUILTINS: &[&str] = &[
    "range", "len", "int", "float", "abs", "min", "max", "round", "print", "list", "dict", "tuple",
    "str", "bool", "enumerate", "zip", "sorted", "reversed", "sum", "any", "all", "map", "filter",
    "pow", "divmod", "set", "isinstance",
];

pub const MATH_FUNCS: &[&str] = &[
    "math.sqrt", "math.sin", "math.cos", "math.tan", "math.asin", "math.acos", "math.atan",
    "math.atan2", "math.floor", "math.ceil", "math.radians", "math.degrees", "math.hypot",
    "math.pow", "math.fabs", "math.log", "math.log2", "math.log10", "math.exp", "math.trunc",
    "math.gcd", "math.factorial", "math.comb", "math.perm",
];

pub const RANDOM_FUNCS: &[&str] = &[
    "random.random", "random.randint", "random.uniform", "random.choice", "random.shuffle",
    "random.randrange", "random.seed",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "index", "count", "reverse", "sort", "copy", "remove",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "setdefault", "update", "copy", "clear",
];

const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "clear", "copy", "update", "union", "intersection",
    "difference", "issubset",
];

/// Builtins that name a type, usable as the second argument of `isinstance`
const TYPE_NAMES: &[&str] = &["int", "float", "str", "bool", "list", "dict", "tuple", "set"];

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "format", "find", "count", "title", "capitalize", "isdigit", "isalpha",
];

pub fn builtin_named(name: &str) -> Option<&'static str> {
    BUILTINS.iter().copied().find(|b| *b == name)
}

pub fn module_named(name: &str) -> VResult<Value> {
    match name {
        "math" => Ok(Value::Module("math")),
        "random" => Ok(Value::Module("random")),
        other => Err(Exception::new(
            ExcKind::NameError,
            format!("No module named '{}'", other),
        )),
    }
}

fn module_attr(module: &str, attr: &str) -> Option<Value> {
    let constant = match (module, attr) {
        ("math", "pi") => Some(std::f64::consts::PI),
        ("math", "e") => Some(std::f64::consts::E),
        ("math", "tau") => Some(std::f64::consts::TAU),
        ("math", "inf") => Some(f64::INFINITY),
        ("math", "nan") => Some(f64::NAN),
        _ => None,
    };
    if let Some(c) = constant {
        return Some(Value::Float(c));
    }
    let table = match module {
        "math" => MATH_FUNCS,
        "random" => RANDOM_FUNCS,
        _ => return None,
    };
    table
        .iter()
        .copied()
        .find(|f| f.split_once('.').is_some_and(|(_, name)| name == attr))
        .map(Value::Native)
}

/// Spread positional and keyword arguments over named parameters.
///
/// The first `required` parameters must be supplied; the rest come back as
/// `None` when omitted.
pub fn bind(
    func: &str,
    params: &[&str],
    required: usize,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> VResult<Vec<Option<Value>>> {
    if args.len() > params.len() {
        return Err(Exception::type_error(format!(
            "{}() takes at most {} arguments ({} given)",
            func,
            params.len(),
            args.len()
        )));
    }
    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);
    for (name, value) in kwargs {
        let Some(i) = params.iter().position(|p| *p == name) else {
            return Err(Exception::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, name
            )));
        };
        if slots[i].is_some() {
            return Err(Exception::type_error(format!(
                "{}() got multiple values for argument '{}'",
                func, name
            )));
        }
        slots[i] = Some(value);
    }
    if let Some(missing) = slots[..required].iter().position(Option::is_none) {
        return Err(Exception::type_error(format!(
            "{}() missing required argument: '{}'",
            func, params[missing]
        )));
    }
    Ok(slots)
}

fn no_kwargs(func: &str, kwargs: &[(String, Value)]) -> VResult<()> {
    match kwargs.first() {
        Some((name, _)) => Err(Exception::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            func, name
        ))),
        None => Ok(()),
    }
}

fn arity(func: &str, args: &[Value], min: usize, max: usize) -> VResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("exactly {}", min)
        } else if args.len() < min {
            format!("at least {}", min)
        } else {
            format!("at most {}", max)
        };
        return Err(Exception::type_error(format!(
            "{}() takes {} arguments ({} given)",
            func,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn int_of(func: &str, v: &Value) -> VResult<i64> {
    v.as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "{}(): '{}' object cannot be interpreted as an integer",
            func,
            v.type_name()
        ))
    })
}

fn float_of(func: &str, v: &Value) -> VResult<f64> {
    v.as_f64().ok_or_else(|| {
        Exception::type_error(format!(
            "{}() must be real number, not {}",
            func,
            v.type_name()
        ))
    })
}

fn str_of<'v>(func: &str, v: &'v Value) -> VResult<&'v str> {
    match v {
        Value::Str(s) => Ok(&**s),
        other => Err(Exception::type_error(format!(
            "{}() argument must be str, not {}",
            func,
            other.type_name()
        ))),
    }
}

/// Convert a float to int the way `int()` does
pub fn float_to_int(f: f64) -> VResult<i64> {
    if f.is_nan() {
        return Err(Exception::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Exception::new(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let t = f.trunc();
    if t < -9.223_372_036_854_776e18 || t >= 9.223_372_036_854_776e18 {
        return Err(Exception::overflow());
    }
    Ok(t as i64)
}

fn math_domain() -> Exception {
    Exception::value_error("math domain error")
}

fn math_range(f: f64) -> VResult<Value> {
    if f.is_infinite() {
        Err(Exception::new(ExcKind::OverflowError, "math range error"))
    } else {
        Ok(Value::Float(f))
    }
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { index + len } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn index_of(container: &Value, key: &Value) -> VResult<i64> {
    key.as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "{} indices must be integers or slices, not {}",
            container.type_name(),
            key.type_name()
        ))
    })
}

fn index_error(container: &Value) -> Exception {
    let what = match container {
        Value::Str(_) => "string",
        other => other.type_name(),
    };
    Exception::new(ExcKind::IndexError, format!("{} index out of range", what))
}

pub fn get_item(container: &Value, key: &Value) -> VResult<Value> {
    match container {
        Value::List(l) => {
            let items = l.0.borrow();
            normalize_index(index_of(container, key)?, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| index_error(container))
        }
        Value::Tuple(t) => normalize_index(index_of(container, key)?, t.0.len())
            .map(|i| t.0[i].clone())
            .ok_or_else(|| index_error(container)),
        Value::Str(s) => {
            let index = index_of(container, key)?;
            let len = s.chars().count();
            normalize_index(index, len)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| index_error(container))
        }
        Value::Range(r) => normalize_index(index_of(container, key)?, r.len())
            .map(|i| Value::Int(r.get(i)))
            .ok_or_else(|| index_error(container)),
        Value::Dict(d) => d
            .0
            .borrow()
            .get(key)?
            .ok_or_else(|| Exception::new(ExcKind::KeyError, key.repr())),
        other => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(container: &Value, key: Value, value: Value, max_len: usize) -> VResult<()> {
    match container {
        Value::List(l) => {
            let index = index_of(container, &key)?;
            let previous = {
                let mut items = l.0.borrow_mut();
                let Some(i) = normalize_index(index, items.len()) else {
                    return Err(Exception::new(
                        ExcKind::IndexError,
                        "list assignment index out of range",
                    ));
                };
                std::mem::replace(&mut items[i], value)
            };
            drop(previous);
            Ok(())
        }
        Value::Dict(d) => {
            let mut dict = d.0.borrow_mut();
            dict.insert(key, value)?;
            check_len(dict.len(), max_len)
        }
        other => Err(Exception::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Python slice bounds resolved against `len`: (first index, step, count)
fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> VResult<(i64, i64, usize)> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Exception::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| {
        let v = if v < 0 { v.saturating_add(len) } else { v };
        v.clamp(lo, hi)
    };
    let (start, stop) = if step > 0 {
        (
            lower.map_or(0, |v| clamp(v, 0, len)),
            upper.map_or(len, |v| clamp(v, 0, len)),
        )
    } else {
        (
            lower.map_or(len - 1, |v| clamp(v, -1, len - 1)),
            upper.map_or(-1, |v| clamp(v, -1, len - 1)),
        )
    };
    let count = if step > 0 && stop > start {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    Ok((start, step, count as usize))
}

pub fn slice_value(
    container: &Value,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> VResult<Value> {
    fn pick<T: Clone>(items: &[T], lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> VResult<Vec<T>> {
        let (start, step, count) = slice_indices(items.len(), lower, upper, step)?;
        Ok((0..count as i64)
            .map(|n| items[(start + n * step) as usize].clone())
            .collect())
    }

    match container {
        Value::List(l) => Ok(Value::list(pick(l.0.borrow().as_slice(), lower, upper, step)?)),
        Value::Tuple(t) => Ok(Value::tuple(pick(t.0.as_slice(), lower, upper, step)?)),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::from(pick(chars.as_slice(), lower, upper, step)?.into_iter().collect::<String>()))
        }
        Value::Range(r) => {
            let (start, step, count) = slice_indices(r.len(), lower, upper, step)?;
            let first = r.start as i128 + start as i128 * r.step as i128;
            let new_step = r.step as i128 * step as i128;
            let stop = first + count as i128 * new_step;
            let fits = |v: i128| i64::try_from(v).map_err(|_| Exception::overflow());
            Ok(Value::Range(RangeVal {
                start: fits(first)?,
                stop: fits(stop)?,
                step: fits(new_step)?,
            }))
        }
        other => Err(Exception::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn strip_chars<'s>(s: &'s str, chars: Option<&str>, left: bool, right: bool) -> &'s str {
    let matcher = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let s = if left { s.trim_start_matches(matcher) } else { s };
    if right { s.trim_end_matches(matcher) } else { s }
}

/// `str.format` with `{}`, `{0}`, `{name}` fields and optional `:spec`
fn str_format(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> VResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(Exception::value_error("unmatched '{' in format string"));
                }
                let (name, spec) = field.split_once(':').unwrap_or((&field, ""));
                let value = if name.is_empty() {
                    auto += 1;
                    args.get(auto - 1)
                } else if let Ok(i) = name.parse::<usize>() {
                    args.get(i)
                } else {
                    kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
                };
                let Some(value) = value else {
                    return Err(Exception::new(
                        ExcKind::IndexError,
                        format!("format field '{}' has no matching argument", name),
                    ));
                };
                out.push_str(&format_value(value, spec)?);
            }
            '}' => return Err(Exception::value_error("single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(out)
}

impl Interpreter<'_> {
    /// Attribute lookup on modules, the build handle and container methods
    pub(super) fn get_attr(&self, value: &Value, attr: &str) -> VResult<Value> {
        let found = match value {
            Value::Module(m) => module_attr(m, attr),
            Value::Build => capability::METHODS
                .contains(&attr)
                .then(|| Value::method(Value::Build, attr)),
            Value::List(_) => LIST_METHODS
                .contains(&attr)
                .then(|| Value::method(value.clone(), attr)),
            Value::Dict(_) => DICT_METHODS
                .contains(&attr)
                .then(|| Value::method(value.clone(), attr)),
            Value::Set(_) => SET_METHODS
                .contains(&attr)
                .then(|| Value::method(value.clone(), attr)),
            Value::Str(_) => STR_METHODS
                .contains(&attr)
                .then(|| Value::method(value.clone(), attr)),
            _ => None,
        };
        found.ok_or_else(|| {
            let owner = match value {
                Value::Module(m) => format!("module '{}'", m),
                other => format!("'{}' object", other.type_name()),
            };
            Exception::new(
                ExcKind::AttributeError,
                format!("{} has no attribute '{}'", owner, attr),
            )
        })
    }

    /// Sort by natural order or by `key(item)`; stable in both directions
    pub(super) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> Exec<Vec<Value>> {
        let keys = match key {
            Some(f) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call_value(f, vec![item.clone()], Vec::new())?);
                }
                keys
            }
            None => items.clone(),
        };

        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut failure = None;
        order.sort_by(|&a, &b| match compare_values(&keys[a], &keys[b]) {
            Ok(ord) if reverse => ord.reverse(),
            Ok(ord) => ord,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e.into());
        }

        let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    fn extreme(
        &mut self,
        func: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        wanted: Ordering,
    ) -> Exec<Value> {
        let mut key = None;
        let mut default = None;
        for (name, value) in kwargs {
            match name.as_str() {
                "key" if !matches!(value, Value::None) => key = Some(value),
                "key" => {}
                "default" => default = Some(value),
                other => {
                    return Err(Exception::type_error(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        func, other
                    ))
                    .into());
                }
            }
        }
        let items = match args.len() {
            0 => return Err(Exception::type_error(format!("{}() expected at least 1 argument", func)).into()),
            1 => args[0].iter_values(self.max_len)?,
            _ => args,
        };

        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let k = match &key {
                Some(f) => self.call_value(f, vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => compare_values(&k, best_key)? == wanted,
            };
            if replace {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(Exception::value_error(format!("{}() arg is an empty sequence", func)).into()),
        }
    }

    // -----------------------------------------------------------------------
    // Builtin and module functions
    // -----------------------------------------------------------------------

    pub(super) fn call_native(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match name {
            "min" => return self.extreme("min", args, kwargs, Ordering::Less),
            "max" => return self.extreme("max", args, kwargs, Ordering::Greater),
            "sorted" => {
                let [iterable, key, reverse] = slots3(bind(name, &["iterable", "key", "reverse"], 1, args, kwargs)?);
                let items = iterable.unwrap_or(Value::None).iter_values(self.max_len)?;
                let key = key.filter(|k| !matches!(k, Value::None));
                let reverse = reverse.is_some_and(|r| r.truthy());
                return Ok(Value::list(self.sort_values(items, key.as_ref(), reverse)?));
            }
            "print" => {
                let mut sep = " ".to_string();
                for (k, v) in kwargs {
                    match k.as_str() {
                        "sep" => sep = v.to_str(),
                        "end" => {}
                        other => {
                            return Err(Exception::type_error(format!(
                                "print() got an unexpected keyword argument '{}'",
                                other
                            ))
                            .into());
                        }
                    }
                }
                let line = args.iter().map(Value::to_str).collect::<Vec<_>>().join(&sep);
                log::debug!("script: {}", line);
                return Ok(Value::None);
            }
            "map" => {
                no_kwargs(name, &kwargs)?;
                if args.len() < 2 {
                    return Err(Exception::type_error("map() must have at least two arguments").into());
                }
                let mut iter = args.into_iter();
                let func = iter.next().unwrap_or(Value::None);
                let columns = iter
                    .map(|a| a.iter_values(self.max_len))
                    .collect::<VResult<Vec<_>>>()?;
                let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(shortest);
                for i in 0..shortest {
                    self.tick()?;
                    let call_args = columns.iter().map(|c| c[i].clone()).collect();
                    out.push(self.call_value(&func, call_args, Vec::new())?);
                }
                return Ok(Value::list(out));
            }
            "filter" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                let items = args[1].iter_values(self.max_len)?;
                let mut out = Vec::new();
                for item in items {
                    self.tick()?;
                    let keep = match &args[0] {
                        Value::None => item.truthy(),
                        f => self.call_value(f, vec![item.clone()], Vec::new())?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                return Ok(Value::list(out));
            }
            "dict" => return Ok(self.make_dict(args, kwargs)?),
            _ => {}
        }

        if let Some(rest) = name.strip_prefix("random.") {
            return Ok(self.call_random(rest, args, kwargs)?);
        }
        if let Some(rest) = name.strip_prefix("math.") {
            no_kwargs(name, &kwargs)?;
            return Ok(call_math(rest, &args)?);
        }

        let max_len = self.max_len;
        Ok(match name {
            "range" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|a| int_of(name, a))
                    .collect::<VResult<Vec<_>>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(Exception::type_error("range expected at most 3 arguments").into()),
                };
                if step == 0 {
                    return Err(Exception::value_error("range() arg 3 must not be zero").into());
                }
                Value::Range(RangeVal { start, stop, step })
            }
            "len" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(l) => l.0.borrow().len(),
                    Value::Tuple(t) => t.0.len(),
                    Value::Dict(d) => d.0.borrow().len(),
                    Value::Set(m) => m.0.borrow().len(),
                    Value::Range(r) => r.len(),
                    other => {
                        return Err(Exception::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        ))
                        .into());
                    }
                };
                Value::Int(len as i64)
            }
            "int" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Value::Int(0),
                    Some(Value::Float(f)) => Value::Int(float_to_int(*f)?),
                    Some(Value::Str(s)) => {
                        let text = s.trim().replace('_', "");
                        Value::Int(text.parse::<i64>().map_err(|_| {
                            Exception::value_error(format!(
                                "invalid literal for int() with base 10: {}",
                                Value::Str(s.clone()).repr()
                            ))
                        })?)
                    }
                    Some(v) => Value::Int(int_of(name, v)?),
                }
            }
            "float" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Value::Float(0.0),
                    Some(Value::Str(s)) => {
                        let text = s.trim().to_ascii_lowercase();
                        let parsed = match text.as_str() {
                            "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
                            "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
                            "nan" => Ok(f64::NAN),
                            t => t.parse::<f64>(),
                        };
                        Value::Float(parsed.map_err(|_| {
                            Exception::value_error(format!(
                                "could not convert string to float: {}",
                                Value::Str(s.clone()).repr()
                            ))
                        })?)
                    }
                    Some(v) => Value::Float(float_of(name, v)?),
                }
            }
            "abs" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Float(f) => Value::Float(f.abs()),
                    v => Value::Int(
                        int_of(name, v)?
                            .checked_abs()
                            .ok_or_else(Exception::overflow)?,
                    ),
                }
            }
            "round" => {
                let [number, ndigits] = slots2(bind(name, &["number", "ndigits"], 1, args, kwargs)?);
                let number = number.unwrap_or(Value::None);
                let ndigits = match ndigits {
                    None | Some(Value::None) => None,
                    Some(v) => Some(int_of(name, &v)?),
                };
                match (&number, ndigits) {
                    (Value::Float(f), None) => Value::Int(float_to_int(f.round_ties_even())?),
                    (Value::Float(f), Some(n)) => {
                        let scale = 10f64.powi(n.clamp(-308, 308) as i32);
                        let rounded = (f * scale).round_ties_even() / scale;
                        Value::Float(if rounded.is_finite() { rounded } else { *f })
                    }
                    (v, _) => Value::Int(int_of(name, v)?),
                }
            }
            "list" | "tuple" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(v) => v.iter_values(max_len)?,
                    None => Vec::new(),
                };
                if name == "list" { Value::list(items) } else { Value::tuple(items) }
            }
            "set" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(v) => v.iter_values(max_len)?,
                    None => Vec::new(),
                };
                Value::set(items, max_len)?
            }
            "isinstance" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                let classes = match &args[1] {
                    Value::Tuple(t) => t.0.clone(),
                    other => vec![other.clone()],
                };
                let mut matched = false;
                for class in &classes {
                    match class {
                        Value::Native(type_name) if TYPE_NAMES.contains(type_name) => {
                            matched |= is_instance(&args[0], type_name);
                        }
                        _ => {
                            return Err(Exception::type_error(
                                "isinstance() arg 2 must be a type or tuple of types",
                            )
                            .into());
                        }
                    }
                }
                Value::Bool(matched)
            }
            "str" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                Value::from(args.first().map(Value::to_str).unwrap_or_default())
            }
            "bool" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                Value::Bool(args.first().is_some_and(Value::truthy))
            }
            "enumerate" => {
                let [iterable, start] = slots2(bind(name, &["iterable", "start"], 1, args, kwargs)?);
                let start = match start {
                    Some(v) => int_of(name, &v)?,
                    None => 0,
                };
                let items = iterable.unwrap_or(Value::None).iter_values(max_len)?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let index = start.checked_add(i as i64).ok_or_else(Exception::overflow)?;
                    out.push(Value::tuple(vec![Value::Int(index), item]));
                }
                Value::list(out)
            }
            "zip" => {
                no_kwargs(name, &kwargs)?;
                let columns = args
                    .iter()
                    .map(|a| a.iter_values(max_len))
                    .collect::<VResult<Vec<_>>>()?;
                let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
                Value::list(
                    (0..shortest)
                        .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                        .collect(),
                )
            }
            "reversed" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                if let Value::Dict(_) | Value::Set(_) = &args[0] {
                    return Err(Exception::type_error(format!(
                        "'{}' object is not reversible",
                        args[0].type_name()
                    ))
                    .into());
                }
                let mut items = args[0].iter_values(max_len)?;
                items.reverse();
                Value::list(items)
            }
            "sum" => {
                let [iterable, start] = slots2(bind(name, &["iterable", "start"], 1, args, kwargs)?);
                let mut total = start.unwrap_or(Value::Int(0));
                if let Value::Str(_) = total {
                    return Err(Exception::type_error("sum() can't sum strings").into());
                }
                for item in iterable.unwrap_or(Value::None).iter_values(max_len)? {
                    total = binary_op(BinOp::Add, &total, &item, max_len)?;
                }
                total
            }
            "any" | "all" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let items = args[0].iter_values(max_len)?;
                if name == "any" {
                    Value::Bool(items.iter().any(Value::truthy))
                } else {
                    Value::Bool(items.iter().all(Value::truthy))
                }
            }
            "pow" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                binary_op(BinOp::Pow, &args[0], &args[1], max_len)?
            }
            "divmod" => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                Value::tuple(vec![
                    binary_op(BinOp::FloorDiv, &args[0], &args[1], max_len)?,
                    binary_op(BinOp::Mod, &args[0], &args[1], max_len)?,
                ])
            }
            other => {
                return Err(Exception::new(
                    ExcKind::NameError,
                    format!("name '{}' is not defined", other),
                )
                .into());
            }
        })
    }

    fn make_dict(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> VResult<Value> {
        arity("dict", &args, 0, 1)?;
        let mut dict = match args.first() {
            None => Dict::new(),
            Some(Value::Dict(d)) => d.0.borrow().clone(),
            Some(pairs) => {
                let mut dict = Dict::new();
                for pair in pairs.iter_values(self.max_len)? {
                    let kv = pair.iter_values(2)?;
                    let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
                        Exception::value_error(format!(
                            "dictionary update sequence element has length {}; 2 is required",
                            kv.len()
                        ))
                    })?;
                    dict.insert(k, v)?;
                }
                dict
            }
        };
        for (k, v) in kwargs {
            dict.insert(Value::from(k), v)?;
        }
        check_len(dict.len(), self.max_len)?;
        Ok(Value::dict(dict))
    }

    fn call_random(&mut self, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> VResult<Value> {
        let qualified = format!("random.{}", name);
        no_kwargs(&qualified, &kwargs)?;
        match name {
            "random" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(Value::Float(self.rng.f64()))
            }
            "randint" => {
                arity(&qualified, &args, 2, 2)?;
                let a = int_of(&qualified, &args[0])?;
                let b = int_of(&qualified, &args[1])?;
                if a > b {
                    return Err(Exception::value_error(format!(
                        "empty range for randint({}, {})",
                        a, b
                    )));
                }
                Ok(Value::Int(self.rng.i64(a..=b)))
            }
            "uniform" => {
                arity(&qualified, &args, 2, 2)?;
                let a = float_of(&qualified, &args[0])?;
                let b = float_of(&qualified, &args[1])?;
                Ok(Value::Float(a + (b - a) * self.rng.f64()))
            }
            "choice" => {
                arity(&qualified, &args, 1, 1)?;
                if let Value::Range(r) = &args[0] {
                    if r.is_empty() {
                        return Err(Exception::new(
                            ExcKind::IndexError,
                            "Cannot choose from an empty sequence",
                        ));
                    }
                    return Ok(Value::Int(r.get(self.rng.usize(..r.len()))));
                }
                let items = args[0].iter_values(self.max_len)?;
                if items.is_empty() {
                    return Err(Exception::new(
                        ExcKind::IndexError,
                        "Cannot choose from an empty sequence",
                    ));
                }
                let i = self.rng.usize(..items.len());
                Ok(items[i].clone())
            }
            "shuffle" => {
                arity(&qualified, &args, 1, 1)?;
                let Value::List(list) = &args[0] else {
                    return Err(Exception::type_error(format!(
                        "random.shuffle() argument must be list, not {}",
                        args[0].type_name()
                    )));
                };
                self.rng.shuffle(list.0.borrow_mut().as_mut_slice());
                Ok(Value::None)
            }
            "randrange" => {
                arity(&qualified, &args, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|a| int_of(&qualified, a))
                    .collect::<VResult<Vec<_>>>()?;
                let range = match ints.as_slice() {
                    [stop] => RangeVal { start: 0, stop: *stop, step: 1 },
                    [start, stop] => RangeVal { start: *start, stop: *stop, step: 1 },
                    [start, stop, step] if *step != 0 => RangeVal { start: *start, stop: *stop, step: *step },
                    _ => return Err(Exception::value_error("zero step for randrange()")),
                };
                if range.is_empty() {
                    return Err(Exception::value_error("empty range for randrange()"));
                }
                Ok(Value::Int(range.get(self.rng.usize(..range.len()))))
            }
            "seed" => {
                arity(&qualified, &args, 0, 1)?;
                let seed = match args.first() {
                    None | Some(Value::None) => self.default_seed(),
                    Some(v) => int_of(&qualified, v)? as u64,
                };
                self.rng.seed(seed);
                Ok(Value::None)
            }
            other => Err(Exception::new(
                ExcKind::AttributeError,
                format!("module 'random' has no attribute '{}'", other),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Methods
    // -----------------------------------------------------------------------

    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        match receiver {
            Value::Build => Ok(capability::call(&mut *self.build, name, args, kwargs)?),
            Value::List(list) => {
                if name == "sort" {
                    let [key, reverse] = slots2(bind("sort", &["key", "reverse"], 0, args, kwargs)?);
                    let key = key.filter(|k| !matches!(k, Value::None));
                    let items = list.0.borrow().clone();
                    let sorted = self.sort_values(items, key.as_ref(), reverse.is_some_and(|r| r.truthy()))?;
                    let previous = std::mem::replace(&mut *list.0.borrow_mut(), sorted);
                    drop(previous);
                    return Ok(Value::None);
                }
                no_kwargs(name, &kwargs)?;
                Ok(list_method(list, name, args, self.max_len)?)
            }
            Value::Dict(dict) => Ok(dict_method(dict, name, args, kwargs, self.max_len)?),
            Value::Set(set) => {
                no_kwargs(name, &kwargs)?;
                Ok(set_method(set, name, args, self.max_len)?)
            }
            Value::Str(s) => Ok(str_method(s, name, args, kwargs, self.max_len)?),
            other => Err(Exception::new(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{}'", other.type_name(), name),
            )
            .into()),
        }
    }
}

/// `bool` counts as an `int`
fn is_instance(value: &Value, type_name: &str) -> bool {
    value.type_name() == type_name || (type_name == "int" && matches!(value, Value::Bool(_)))
}

fn slots2(slots: Vec<Option<Value>>) -> [Option<Value>; 2] {
    let mut it = slots.into_iter();
    [it.next().flatten(), it.next().flatten()]
}

fn slots3(slots: Vec<Option<Value>>) -> [Option<Value>; 3] {
    let mut it = slots.into_iter();
    [it.next().flatten(), it.next().flatten(), it.next().flatten()]
}

fn call_math(name: &str, args: &[Value]) -> VResult<Value> {
    let qualified = format!("math.{}", name);
    let f = |i: usize| float_of(&qualified, &args[i]);
    let unary = |expected: usize| arity(&qualified, args, expected, expected);
    match name {
        "sqrt" => {
            unary(1)?;
            let x = f(0)?;
            if x < 0.0 {
                return Err(math_domain());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "sin" | "cos" | "tan" | "atan" | "radians" | "degrees" | "fabs" => {
            unary(1)?;
            let x = f(0)?;
            Ok(Value::Float(match name {
                "sin" => x.sin(),
                "cos" => x.cos(),
                "tan" => x.tan(),
                "atan" => x.atan(),
                "radians" => x.to_radians(),
                "degrees" => x.to_degrees(),
                _ => x.abs(),
            }))
        }
        "asin" | "acos" => {
            unary(1)?;
            let x = f(0)?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(math_domain());
            }
            Ok(Value::Float(if name == "asin" { x.asin() } else { x.acos() }))
        }
        "atan2" => {
            unary(2)?;
            Ok(Value::Float(f(0)?.atan2(f(1)?)))
        }
        "floor" | "ceil" | "trunc" => {
            unary(1)?;
            if let Some(i) = args[0].as_int() {
                return Ok(Value::Int(i));
            }
            let x = f(0)?;
            let r = match name {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            };
            Ok(Value::Int(float_to_int(r)?))
        }
        "hypot" => {
            let mut sum = 0.0f64;
            for i in 0..args.len() {
                let x = f(i)?;
                sum += x * x;
            }
            Ok(Value::Float(sum.sqrt()))
        }
        "pow" => {
            unary(2)?;
            let (x, y) = (f(0)?, f(1)?);
            if x == 0.0 && y < 0.0 {
                return Err(math_domain());
            }
            let r = x.powf(y);
            if r.is_nan() && !x.is_nan() && !y.is_nan() {
                return Err(math_domain());
            }
            math_range(r)
        }
        "exp" => {
            unary(1)?;
            math_range(f(0)?.exp())
        }
        "log" => {
            arity(&qualified, args, 1, 2)?;
            let x = f(0)?;
            if x <= 0.0 {
                return Err(math_domain());
            }
            if args.len() == 2 {
                let base = f(1)?;
                if base <= 0.0 || base == 1.0 {
                    return Err(math_domain());
                }
                return Ok(Value::Float(x.ln() / base.ln()));
            }
            Ok(Value::Float(x.ln()))
        }
        "log2" | "log10" => {
            unary(1)?;
            let x = f(0)?;
            if x <= 0.0 {
                return Err(math_domain());
            }
            Ok(Value::Float(if name == "log2" { x.log2() } else { x.log10() }))
        }
        "gcd" => {
            let mut g: i64 = 0;
            for a in args {
                let mut a = int_of(&qualified, a)?.unsigned_abs();
                let mut b = g.unsigned_abs();
                while b != 0 {
                    (a, b) = (b, a % b);
                }
                g = i64::try_from(a).map_err(|_| Exception::overflow())?;
            }
            Ok(Value::Int(g))
        }
        "factorial" => {
            unary(1)?;
            let n = int_of(&qualified, &args[0])?;
            if n < 0 {
                return Err(Exception::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            let mut acc: i64 = 1;
            for k in 2..=n {
                acc = acc.checked_mul(k).ok_or_else(Exception::overflow)?;
            }
            Ok(Value::Int(acc))
        }
        "comb" | "perm" => {
            let min_args = if name == "perm" { 1 } else { 2 };
            arity(&qualified, args, min_args, 2)?;
            let n = int_of(&qualified, &args[0])?;
            let k = match args.get(1) {
                None | Some(Value::None) => n,
                Some(v) => int_of(&qualified, v)?,
            };
            if n < 0 || k < 0 {
                return Err(Exception::value_error(format!(
                    "{}() arguments must be non-negative integers",
                    name
                )));
            }
            if k > n {
                return Ok(Value::Int(0));
            }
            // C(n, i + 1) = C(n, i) * (n - i) / (i + 1) stays exact
            let steps = if name == "comb" { k.min(n - k) } else { k };
            let mut acc: i128 = 1;
            for i in 0..steps {
                acc *= (n - i) as i128;
                if name == "comb" {
                    acc /= (i + 1) as i128;
                }
                if acc > i64::MAX as i128 {
                    return Err(Exception::overflow());
                }
            }
            Ok(Value::Int(acc as i64))
        }
        other => Err(Exception::new(
            ExcKind::AttributeError,
            format!("module 'math' has no attribute '{}'", other),
        )),
    }
}

fn list_method(list: &ListObj, name: &str, args: Vec<Value>, max_len: usize) -> VResult<Value> {
    match name {
        "append" => {
            arity(name, &args, 1, 1)?;
            let mut items = list.0.borrow_mut();
            check_len(items.len() + 1, max_len)?;
            items.extend(args);
            Ok(Value::None)
        }
        "extend" => {
            arity(name, &args, 1, 1)?;
            let extra = args[0].iter_values(max_len)?;
            let mut items = list.0.borrow_mut();
            check_len(items.len() + extra.len(), max_len)?;
            items.extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            arity(name, &args, 2, 2)?;
            let index = int_of(name, &args[0])?;
            let mut items = list.0.borrow_mut();
            check_len(items.len() + 1, max_len)?;
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, args[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 1)?;
            let index = match args.first() {
                Some(v) => int_of(name, v)?,
                None => -1,
            };
            let mut items = list.0.borrow_mut();
            if items.is_empty() {
                return Err(Exception::new(ExcKind::IndexError, "pop from empty list"));
            }
            let i = normalize_index(index, items.len())
                .ok_or_else(|| Exception::new(ExcKind::IndexError, "pop index out of range"))?;
            Ok(items.remove(i))
        }
        "index" | "count" | "remove" => {
            arity(name, &args, 1, 1)?;
            let snapshot = list.0.borrow().clone();
            let mut hits = Vec::new();
            for (i, item) in snapshot.iter().enumerate() {
                if values_equal(item, &args[0])? {
                    hits.push(i);
                    if name != "count" {
                        break;
                    }
                }
            }
            match (name, hits.first()) {
                ("count", _) => Ok(Value::Int(hits.len() as i64)),
                ("index", Some(&i)) => Ok(Value::Int(i as i64)),
                ("remove", Some(&i)) => {
                    let removed = list.0.borrow_mut().remove(i);
                    drop(removed);
                    Ok(Value::None)
                }
                _ => Err(Exception::value_error(format!(
                    "{} is not in list",
                    args[0].repr()
                ))),
            }
        }
        "reverse" => {
            arity(name, &args, 0, 0)?;
            list.0.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::list(list.0.borrow().clone()))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            let items = std::mem::take(&mut *list.0.borrow_mut());
            drop(items);
            Ok(Value::None)
        }
        other => Err(Exception::new(
            ExcKind::AttributeError,
            format!("'list' object has no attribute '{}'", other),
        )),
    }
}

fn members_of(value: &Value, max_len: usize) -> VResult<Dict> {
    let mut members = Dict::new();
    for item in value.iter_values(max_len)? {
        members.insert(item, Value::None)?;
    }
    Ok(members)
}

fn set_method(set: &SetObj, name: &str, args: Vec<Value>, max_len: usize) -> VResult<Value> {
    match name {
        "add" => {
            arity(name, &args, 1, 1)?;
            let mut members = set.0.borrow_mut();
            if !members.contains(&args[0])? {
                check_len(members.len() + 1, max_len)?;
                members.insert(args[0].clone(), Value::None)?;
            }
            Ok(Value::None)
        }
        "remove" | "discard" => {
            arity(name, &args, 1, 1)?;
            let removed = set.0.borrow_mut().remove(&args[0])?;
            if removed.is_none() && name == "remove" {
                return Err(Exception::new(ExcKind::KeyError, args[0].repr()));
            }
            Ok(Value::None)
        }
        "pop" => {
            arity(name, &args, 0, 0)?;
            let mut members = set.0.borrow_mut();
            let Some(first) = members.first_key() else {
                return Err(Exception::new(ExcKind::KeyError, "pop from an empty set"));
            };
            members.remove(&first)?;
            Ok(first)
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            let previous = std::mem::take(&mut *set.0.borrow_mut());
            drop(previous);
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            let members = set.0.borrow().keys();
            Value::set(members, max_len)
        }
        "update" => {
            let mut incoming = Vec::new();
            for other in &args {
                incoming.extend(other.iter_values(max_len)?);
            }
            let mut members = set.0.borrow_mut();
            for item in incoming {
                members.insert(item, Value::None)?;
                check_len(members.len(), max_len)?;
            }
            Ok(Value::None)
        }
        "union" => {
            let mut items = set.0.borrow().keys();
            for other in &args {
                items.extend(other.iter_values(max_len)?);
            }
            Value::set(items, max_len)
        }
        "intersection" | "difference" => {
            let others = args
                .iter()
                .map(|a| members_of(a, max_len))
                .collect::<VResult<Vec<_>>>()?;
            let keep_shared = name == "intersection";
            let mut kept = Vec::new();
            for item in set.0.borrow().keys() {
                let mut shared = true;
                let mut seen = false;
                for other in &others {
                    let found = other.contains(&item)?;
                    shared &= found;
                    seen |= found;
                }
                if (keep_shared && shared) || (!keep_shared && !seen) {
                    kept.push(item);
                }
            }
            Value::set(kept, max_len)
        }
        "issubset" => {
            arity(name, &args, 1, 1)?;
            let other = members_of(&args[0], max_len)?;
            for item in set.0.borrow().keys() {
                if !other.contains(&item)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        other => Err(Exception::new(
            ExcKind::AttributeError,
            format!("'set' object has no attribute '{}'", other),
        )),
    }
}

fn dict_method(
    dict: &DictObj,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    max_len: usize,
) -> VResult<Value> {
    if name != "update" {
        no_kwargs(name, &kwargs)?;
    }
    match name {
        "get" => {
            arity(name, &args, 1, 2)?;
            let found = dict.0.borrow().get(&args[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "keys" | "values" | "items" => {
            arity(name, &args, 0, 0)?;
            let d = dict.0.borrow();
            Ok(Value::list(match name {
                "keys" => d.keys(),
                "values" => d.values(),
                _ => d.items(),
            }))
        }
        "pop" => {
            arity(name, &args, 1, 2)?;
            let removed = dict.0.borrow_mut().remove(&args[0])?;
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Exception::new(ExcKind::KeyError, args[0].repr())),
            }
        }
        "setdefault" => {
            arity(name, &args, 1, 2)?;
            let mut d = dict.0.borrow_mut();
            if let Some(v) = d.get(&args[0])? {
                return Ok(v);
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            d.insert(args[0].clone(), default.clone())?;
            check_len(d.len(), max_len)?;
            Ok(default)
        }
        "update" => {
            arity(name, &args, 0, 1)?;
            let mut pairs: Vec<(Value, Value)> = Vec::new();
            match args.first() {
                None => {}
                Some(Value::Dict(other)) => {
                    pairs.extend(other.0.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Some(seq) => {
                    for pair in seq.iter_values(max_len)? {
                        let kv = pair.iter_values(2)?;
                        let [k, v] = <[Value; 2]>::try_from(kv).map_err(|_| {
                            Exception::value_error("dictionary update sequence element must have length 2")
                        })?;
                        pairs.push((k, v));
                    }
                }
            }
            pairs.extend(kwargs.into_iter().map(|(k, v)| (Value::from(k), v)));
            let mut d = dict.0.borrow_mut();
            for (k, v) in pairs {
                d.insert(k, v)?;
            }
            check_len(d.len(), max_len)?;
            Ok(Value::None)
        }
        "copy" => {
            arity(name, &args, 0, 0)?;
            Ok(Value::dict(dict.0.borrow().clone()))
        }
        "clear" => {
            arity(name, &args, 0, 0)?;
            let old = std::mem::take(&mut *dict.0.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        other => Err(Exception::new(
            ExcKind::AttributeError,
            format!("'dict' object has no attribute '{}'", other),
        )),
    }
}

fn str_method(
    s: &str,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    max_len: usize,
) -> VResult<Value> {
    if name == "format" {
        let out = str_format(s, &args, &kwargs)?;
        check_len(out.len(), max_len)?;
        return Ok(Value::from(out));
    }
    if name == "split" {
        let [sep, maxsplit] = slots2(bind(name, &["sep", "maxsplit"], 0, args, kwargs)?);
        let limit = match maxsplit {
            Some(v) => int_of(name, &v)?,
            None => -1,
        };
        let parts: Vec<String> = match sep {
            None | Some(Value::None) => {
                if limit < 0 {
                    s.split_whitespace().map(str::to_string).collect()
                } else {
                    let mut parts = Vec::new();
                    let mut rest = s.trim_start();
                    while !rest.is_empty() && (parts.len() as i64) < limit {
                        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                        parts.push(rest[..end].to_string());
                        rest = rest[end..].trim_start();
                    }
                    if !rest.is_empty() {
                        parts.push(rest.to_string());
                    }
                    parts
                }
            }
            Some(v) => {
                let sep = str_of(name, &v)?;
                if sep.is_empty() {
                    return Err(Exception::value_error("empty separator"));
                }
                if limit < 0 {
                    s.split(sep).map(str::to_string).collect()
                } else {
                    s.splitn(limit as usize + 1, sep).map(str::to_string).collect()
                }
            }
        };
        return Ok(Value::list(parts.into_iter().map(Value::from).collect()));
    }
    no_kwargs(name, &kwargs)?;

    let out = match name {
        "upper" => Value::from(s.to_uppercase()),
        "lower" => Value::from(s.to_lowercase()),
        "title" => Value::from(title_case(s)),
        "capitalize" => Value::from(capitalize(s)),
        "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "strip" | "lstrip" | "rstrip" => {
            arity(name, &args, 0, 1)?;
            let chars = match args.first() {
                None | Some(Value::None) => None,
                Some(v) => Some(str_of(name, v)?),
            };
            let (left, right) = match name {
                "lstrip" => (true, false),
                "rstrip" => (false, true),
                _ => (true, true),
            };
            Value::from(strip_chars(s, chars, left, right))
        }
        "join" => {
            arity(name, &args, 1, 1)?;
            let mut parts = Vec::new();
            for item in args[0].iter_values(max_len)? {
                match item {
                    Value::Str(p) => parts.push(p),
                    other => {
                        return Err(Exception::type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            parts.len(),
                            other.type_name()
                        )));
                    }
                }
            }
            let total: usize = parts.iter().map(|p| p.len()).sum::<usize>()
                + s.len() * parts.len().saturating_sub(1);
            check_len(total, max_len)?;
            Value::from(parts.iter().map(|p| &**p).collect::<Vec<_>>().join(s))
        }
        "replace" => {
            arity(name, &args, 2, 3)?;
            let (old, new) = (str_of(name, &args[0])?, str_of(name, &args[1])?);
            let count = match args.get(2) {
                Some(v) => int_of(name, v)?,
                None => -1,
            };
            let hits = if old.is_empty() { s.chars().count() + 1 } else { s.matches(old).count() };
            let hits = if count >= 0 { hits.min(count as usize) } else { hits };
            check_len(s.len() + hits * new.len(), max_len)?;
            Value::from(if count < 0 { s.replace(old, new) } else { s.replacen(old, new, count as usize) })
        }
        "startswith" | "endswith" => {
            arity(name, &args, 1, 1)?;
            let candidates = match &args[0] {
                Value::Tuple(t) => t.0.clone(),
                other => vec![other.clone()],
            };
            let mut hit = false;
            for c in &candidates {
                let c = str_of(name, c)?;
                hit |= if name == "startswith" { s.starts_with(c) } else { s.ends_with(c) };
            }
            Value::Bool(hit)
        }
        "find" => {
            arity(name, &args, 1, 1)?;
            let needle = str_of(name, &args[0])?;
            Value::Int(match s.find(needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            })
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let needle = str_of(name, &args[0])?;
            Value::Int(if needle.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(needle).count() as i64
            })
        }
        other => {
            return Err(Exception::new(
                ExcKind::AttributeError,
                format!("'str' object has no attribute '{}'", other),
            ));
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_arguments() {
        let slots = bind(
            "f",
            &["a", "b", "c"],
            1,
            vec![Value::Int(1)],
            vec![("c".to_string(), Value::Int(3))],
        )
        .unwrap();
        assert!(matches!(slots.as_slice(), [Some(Value::Int(1)), None, Some(Value::Int(3))]));

        let err = bind("f", &["a"], 1, vec![], vec![]).unwrap_err();
        assert!(err.message.contains("missing required argument: 'a'"));
        let err = bind("f", &["a"], 1, vec![Value::Int(1)], vec![("a".into(), Value::Int(2))]).unwrap_err();
        assert!(err.message.contains("multiple values"));
        let err = bind("f", &["a"], 0, vec![], vec![("z".into(), Value::Int(2))]).unwrap_err();
        assert!(err.message.contains("unexpected keyword argument 'z'"));
    }

    #[test]
    fn test_slice_semantics() {
        let list = Value::list((0..6).map(Value::Int).collect());
        let r = |lo, hi, st| slice_value(&list, lo, hi, st).unwrap().repr();
        assert_eq!(r(None, None, None), "[0, 1, 2, 3, 4, 5]");
        assert_eq!(r(Some(-2), None, None), "[4, 5]");
        assert_eq!(r(None, None, Some(2)), "[0, 2, 4]");
        assert_eq!(r(None, None, Some(-2)), "[5, 3, 1]");
        assert_eq!(r(Some(4), Some(1), Some(-1)), "[4, 3, 2]");
        assert_eq!(r(Some(10), Some(20), None), "[]");
        assert!(slice_value(&list, None, None, Some(0)).is_err());

        let range = Value::Range(RangeVal { start: 0, stop: 10, step: 1 });
        assert_eq!(slice_value(&range, Some(2), Some(8), Some(3)).unwrap().repr(), "range(2, 8, 3)");
    }

    #[test]
    fn test_indexing() {
        let tuple = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(get_item(&tuple, &Value::Int(-1)).unwrap().repr(), "2");
        let err = get_item(&tuple, &Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, ExcKind::IndexError);
        let err = get_item(&tuple, &Value::from("x")).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);

        let s = Value::from("héllo");
        assert_eq!(get_item(&s, &Value::Int(1)).unwrap().repr(), "'é'");

        let dict = Value::dict(Dict::new());
        set_item(&dict, Value::from("k"), Value::Int(5), 10).unwrap();
        assert_eq!(get_item(&dict, &Value::from("k")).unwrap().repr(), "5");
        assert_eq!(get_item(&dict, &Value::from("z")).unwrap_err().kind, ExcKind::KeyError);
        assert!(set_item(&tuple, Value::Int(0), Value::Int(1), 10).is_err());
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(call_math("sqrt", &[Value::Int(16)]).unwrap().repr(), "4.0");
        assert_eq!(call_math("floor", &[Value::Float(-1.5)]).unwrap().repr(), "-2");
        assert_eq!(call_math("ceil", &[Value::Float(1.2)]).unwrap().repr(), "2");
        assert_eq!(call_math("gcd", &[Value::Int(12), Value::Int(18)]).unwrap().repr(), "6");
        assert_eq!(call_math("factorial", &[Value::Int(5)]).unwrap().repr(), "120");
        assert_eq!(call_math("sqrt", &[Value::Int(-1)]).unwrap_err().kind, ExcKind::ValueError);
        assert_eq!(call_math("factorial", &[Value::Int(30)]).unwrap_err().kind, ExcKind::OverflowError);
        assert_eq!(call_math("exp", &[Value::Int(1000)]).unwrap_err().kind, ExcKind::OverflowError);
        assert!(call_math("sqrt", &[Value::from("x")]).is_err());
    }

    #[test]
    fn test_math_comb_and_perm() {
        let int = |name: &str, args: &[i64]| {
            let args: Vec<Value> = args.iter().copied().map(Value::Int).collect();
            call_math(name, &args).unwrap().repr()
        };
        assert_eq!(int("comb", &[5, 2]), "10");
        assert_eq!(int("comb", &[10, 0]), "1");
        assert_eq!(int("comb", &[3, 5]), "0");
        assert_eq!(int("comb", &[60, 30]), "118264581564861424");
        assert_eq!(int("perm", &[5, 2]), "20");
        assert_eq!(int("perm", &[4]), "24");
        assert_eq!(int("perm", &[2, 3]), "0");

        assert_eq!(call_math("comb", &[Value::Int(-1), Value::Int(1)]).unwrap_err().kind, ExcKind::ValueError);
        assert_eq!(call_math("comb", &[Value::Int(5)]).unwrap_err().kind, ExcKind::TypeError);
        assert_eq!(call_math("perm", &[Value::Int(30)]).unwrap_err().kind, ExcKind::OverflowError);
    }

    #[test]
    fn test_string_methods() {
        let call = |s: &str, name: &str, args: Vec<Value>| str_method(s, name, args, Vec::new(), 1000).unwrap().repr();
        assert_eq!(call("a,b,,c", "split", vec![Value::from(",")]), "['a', 'b', '', 'c']");
        assert_eq!(call("  a  b ", "split", vec![]), "['a', 'b']");
        assert_eq!(call("-", "join", vec![Value::list(vec![Value::from("x"), Value::from("y")])]), "'x-y'");
        assert_eq!(call("xxhixx", "strip", vec![Value::from("x")]), "'hi'");
        assert_eq!(call("hello world", "title", vec![]), "'Hello World'");
        assert_eq!(call("aaa", "replace", vec![Value::from("a"), Value::from("b"), Value::Int(2)]), "'bba'");
        let formatted = str_method(
            "{} and {name:>3}",
            "format",
            vec![Value::Int(1)],
            vec![("name".to_string(), Value::from("x"))],
            1000,
        )
        .unwrap();
        assert_eq!(formatted.repr(), "'1 and   x'");
        assert_eq!(call("stone_bricks", "startswith", vec![Value::from("stone")]), "True");
        assert_eq!(call("héllo", "find", vec![Value::from("l")]), "2");
    }
}
