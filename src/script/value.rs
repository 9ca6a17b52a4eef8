//! Runtime values, script exceptions and the operators between values

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::ast::{BinOp, FunctionDef};

/// Deepest nesting walked by `repr`, equality, ordering and hashing
pub const MAX_VALUE_DEPTH: usize = 48;

// ---------------------------------------------------------------------------
// Exceptions
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcKind {
    ZeroDivisionError,
    TypeError,
    ValueError,
    IndexError,
    KeyError,
    NameError,
    AttributeError,
    AssertionError,
    OverflowError,
    RecursionError,
    MemoryError,
    BuildLimitExceeded,
    BuildBoundsExceeded,
    InvalidBlock,
}

impl ExcKind {
    pub fn name(self) -> &'static str {
        match self {
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::TypeError => "TypeError",
            ExcKind::ValueError => "ValueError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::NameError => "NameError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::BuildLimitExceeded => "BuildLimitExceeded",
            ExcKind::BuildBoundsExceeded => "BuildBoundsExceeded",
            ExcKind::InvalidBlock => "InvalidBlock",
        }
    }

    /// Whether `except <class>` catches this kind
    pub fn caught_by(self, class: &str) -> bool {
        if self.is_fatal() {
            return false;
        }
        match class {
            "Exception" | "BaseException" => true,
            "ArithmeticError" => matches!(self, ExcKind::ZeroDivisionError | ExcKind::OverflowError),
            "LookupError" => matches!(self, ExcKind::IndexError | ExcKind::KeyError),
            other => other == self.name(),
        }
    }

    /// Resource and capability violations end the script; `except` never
    /// sees them
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ExcKind::RecursionError
                | ExcKind::MemoryError
                | ExcKind::BuildLimitExceeded
                | ExcKind::BuildBoundsExceeded
                | ExcKind::InvalidBlock
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Exception {
    pub kind: ExcKind,
    pub message: String,
}

impl Exception {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ExcKind::OverflowError, "integer overflow")
    }

    pub fn too_large(len: usize, max: usize) -> Self {
        Self::new(
            ExcKind::MemoryError,
            format!("collection of {} elements exceeds the limit of {}", len, max),
        )
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}

pub type VResult<T> = Result<T, Exception>;

/// Fail when a collection would grow past `max` elements
pub fn check_len(len: usize, max: usize) -> VResult<()> {
    if len > max {
        Err(Exception::too_large(len, max))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListObj>),
    Tuple(Rc<TupleObj>),
    Dict(Rc<DictObj>),
    Set(Rc<SetObj>),
    Range(RangeVal),
    Function(Rc<Closure>),
    /// Builtin or module function, by qualified name
    Native(&'static str),
    Method(Rc<BoundMethod>),
    Module(&'static str),
    /// The build capability handle
    Build,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeVal {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeVal {
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start as i128, self.stop as i128, self.step as i128)
        } else {
            (self.stop as i128, self.start as i128, -(self.step as i128))
        };
        if hi <= lo {
            0
        } else {
            usize::try_from((hi - lo + step - 1) / step).unwrap_or(usize::MAX)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `index`; callers keep `index < len()` so the true value fits
    pub fn get(&self, index: usize) -> i64 {
        self.start.wrapping_add(self.step.wrapping_mul(index as i64))
    }

    pub fn contains(&self, v: i64) -> bool {
        let in_span = if self.step > 0 {
            v >= self.start && v < self.stop
        } else {
            v <= self.start && v > self.stop
        };
        in_span && (v as i128 - self.start as i128) % self.step as i128 == 0
    }
}

/// A user function together with its evaluated defaults and defining scope
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub env: Option<Rc<Env>>,
}

/// Variables of one function activation
pub struct Env {
    pub vars: RefCell<HashMap<String, Value>>,
    pub parent: Option<Rc<Env>>,
}

impl Env {
    pub fn new(parent: Option<Rc<Env>>) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            parent,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

pub struct ListObj(pub RefCell<Vec<Value>>);

impl ListObj {
    pub fn new(items: Vec<Value>) -> Rc<Self> {
        Rc::new(Self(RefCell::new(items)))
    }
}

pub struct TupleObj(pub Vec<Value>);

pub struct DictObj(pub RefCell<Dict>);

/// Insertion-ordered set; members are the keys of a dict of `None`
pub struct SetObj(pub RefCell<Dict>);

// Nested containers are released with an explicit work list so dropping a
// deeply nested value cannot overflow the worker stack.

impl Drop for ListObj {
    fn drop(&mut self) {
        release(std::mem::take(self.0.get_mut()));
    }
}

impl Drop for TupleObj {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.0));
    }
}

impl Drop for DictObj {
    fn drop(&mut self) {
        release(self.0.get_mut().drain_values());
    }
}

impl Drop for SetObj {
    fn drop(&mut self) {
        release(self.0.get_mut().drain_values());
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        let mut pending: Vec<Value> = self.defaults.drain(..).flatten().collect();
        if let Some(env) = self.env.take() {
            drain_env(env, &mut pending);
        }
        release(pending);
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        release(self.vars.get_mut().drain().map(|(_, v)| v).collect());
    }
}

fn drain_env(env: Rc<Env>, pending: &mut Vec<Value>) {
    if let Ok(env) = Rc::try_unwrap(env) {
        pending.extend(env.vars.take().into_values());
    }
}

fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(rc) => {
                if let Ok(list) = Rc::try_unwrap(rc) {
                    pending.append(&mut list.0.take());
                }
            }
            Value::Tuple(rc) => {
                if let Ok(mut tuple) = Rc::try_unwrap(rc) {
                    pending.append(&mut tuple.0);
                }
            }
            Value::Dict(rc) => {
                if let Ok(dict) = Rc::try_unwrap(rc) {
                    pending.extend(dict.0.borrow_mut().drain_values());
                }
            }
            Value::Set(rc) => {
                if let Ok(set) = Rc::try_unwrap(rc) {
                    pending.extend(set.0.borrow_mut().drain_values());
                }
            }
            Value::Function(rc) => {
                if let Ok(mut closure) = Rc::try_unwrap(rc) {
                    pending.extend(closure.defaults.drain(..).flatten());
                    if let Some(env) = closure.env.take() {
                        drain_env(env, &mut pending);
                    }
                }
            }
            Value::Method(rc) => {
                if let Ok(method) = Rc::try_unwrap(rc) {
                    pending.push(method.receiver);
                }
            }
            _ => {}
        }
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(ListObj::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(TupleObj(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(DictObj(RefCell::new(dict))))
    }

    /// Set of `items` in first-seen order, bounded by `max_len` members
    pub fn set(items: Vec<Value>, max_len: usize) -> VResult<Self> {
        let mut members = Dict::new();
        for item in items {
            members.insert(item, Value::None)?;
            check_len(members.len(), max_len)?;
        }
        Ok(Value::Set(Rc::new(SetObj(RefCell::new(members)))))
    }

    pub fn method(receiver: Value, name: &str) -> Self {
        Value::Method(Rc::new(BoundMethod {
            receiver,
            name: name.to_string(),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::Module(_) => "module",
            Value::Build => "BuildApi",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.0.borrow().is_empty(),
            Value::Tuple(t) => !t.0.is_empty(),
            Value::Dict(d) => !d.0.borrow().is_empty(),
            Value::Set(m) => !m.0.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Integer view of ints and bools
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_) | Value::Float(_))
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, 0);
        out
    }

    /// `str()` form: strings print bare, everything else as `repr`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    fn write_repr(&self, out: &mut String, depth: usize) {
        if depth > MAX_VALUE_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote(s)),
            Value::List(l) => {
                out.push('[');
                write_items(out, &l.0.borrow(), depth);
                out.push(']');
            }
            Value::Tuple(t) => {
                out.push('(');
                write_items(out, &t.0, depth);
                if t.0.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(d) => {
                out.push('{');
                for (i, (k, v)) in d.0.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, depth + 1);
                    out.push_str(": ");
                    v.write_repr(out, depth + 1);
                }
                out.push('}');
            }
            Value::Set(m) => {
                let members = m.0.borrow().keys();
                if members.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    write_items(out, &members, depth);
                    out.push('}');
                }
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(c) => out.push_str(&format!("<function {}>", c.def.name)),
            Value::Native(name) => out.push_str(&format!("<built-in function {}>", name)),
            Value::Method(m) => out.push_str(&format!(
                "<bound method {}.{}>",
                m.receiver.type_name(),
                m.name
            )),
            Value::Module(name) => out.push_str(&format!("<module '{}'>", name)),
            Value::Build => out.push_str("<build>"),
        }
    }

    /// Hash key for dict lookups
    pub fn key(&self) -> VResult<Key> {
        self.key_at(0)
    }

    fn key_at(&self, depth: usize) -> VResult<Key> {
        if depth > MAX_VALUE_DEPTH {
            return Err(Exception::new(ExcKind::RecursionError, "key nesting too deep"));
        }
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Int(i64::from(*b)),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Key::Int(*f as i64)
                } else {
                    Key::Float(f.to_bits())
                }
            }
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(t) => Key::Tuple(
                t.0.iter()
                    .map(|v| v.key_at(depth + 1))
                    .collect::<VResult<Vec<_>>>()?,
            ),
            other => {
                return Err(Exception::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )));
            }
        })
    }

    /// Materialize an iterable
    pub fn iter_values(&self, max_len: usize) -> VResult<Vec<Value>> {
        match self {
            Value::List(l) => Ok(l.0.borrow().clone()),
            Value::Tuple(t) => Ok(t.0.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            Value::Dict(d) => Ok(d.0.borrow().keys()),
            Value::Set(m) => Ok(m.0.borrow().keys()),
            Value::Range(r) => {
                check_len(r.len(), max_len)?;
                Ok((0..r.len()).map(|i| Value::Int(r.get(i))).collect())
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

fn write_items(out: &mut String, items: &[Value], depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1);
    }
}

fn quote(s: &str) -> String {
    let delim = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delim);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delim => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delim);
    out
}

/// Shortest round-trip float text with an explicit fraction or exponent
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }
    let text = format!("{}", f);
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

// ---------------------------------------------------------------------------
// Dict
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
}

/// Insertion-ordered mapping
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
    index: HashMap<Key, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> VResult<Option<Value>> {
        let k = key.key()?;
        Ok(self.index.get(&k).map(|&i| self.entries[i].1.clone()))
    }

    pub fn contains(&self, key: &Value) -> VResult<bool> {
        Ok(self.index.contains_key(&key.key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> VResult<()> {
        let k = key.key()?;
        match self.index.get(&k) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(k, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> VResult<Option<Value>> {
        let k = key.key()?;
        let Some(i) = self.index.remove(&k) else {
            return Ok(None);
        };
        let (_, value) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Ok(Some(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn first_key(&self) -> Option<Value> {
        self.entries.first().map(|(k, _)| k.clone())
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }

    fn drain_values(&mut self) -> Vec<Value> {
        self.index.clear();
        self.entries
            .drain(..)
            .flat_map(|(k, v)| [k, v])
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Equality and ordering
// ---------------------------------------------------------------------------

pub fn values_equal(a: &Value, b: &Value) -> VResult<bool> {
    eq_at(a, b, 0)
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> VResult<bool> {
    if depth > MAX_VALUE_DEPTH {
        return Err(Exception::new(ExcKind::RecursionError, "comparison nesting too deep"));
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Float(_), _) | (_, Value::Float(_)) if a.is_number() && b.is_number() => {
            a.as_f64() == b.as_f64()
        }
        (x, y) if x.as_int().is_some() && y.as_int().is_some() => x.as_int() == y.as_int(),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            seq_eq(&x.0.borrow(), &y.0.borrow(), depth)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_eq(&x.0, &y.0, depth)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.0.borrow(), y.0.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                match y.get(k)? {
                    Some(other) if eq_at(v, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.0.borrow(), y.0.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, _) in x.iter() {
                if !y.contains(k)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Build, Value::Build) => true,
        _ => false,
    })
}

fn seq_eq(x: &[Value], y: &[Value], depth: usize) -> VResult<bool> {
    if x.len() != y.len() {
        return Ok(false);
    }
    for (a, b) in x.iter().zip(y) {
        if !eq_at(a, b, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Python-style ordering; `TypeError` for unorderable pairs
pub fn compare_values(a: &Value, b: &Value) -> VResult<Ordering> {
    cmp_at(a, b, 0)
}

fn cmp_at(a: &Value, b: &Value, depth: usize) -> VResult<Ordering> {
    if depth > MAX_VALUE_DEPTH {
        return Err(Exception::new(ExcKind::RecursionError, "comparison nesting too deep"));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (x, y) if x.as_int().is_some() && y.as_int().is_some() => Ok(x.as_int().cmp(&y.as_int())),
        (x, y) if x.is_number() && y.is_number() => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            // NaN compares false both ways; Equal keeps sorts stable
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::List(x), Value::List(y)) => seq_cmp(&x.0.borrow(), &y.0.borrow(), depth),
        (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(&x.0, &y.0, depth),
        _ => Err(Exception::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn seq_cmp(x: &[Value], y: &[Value], depth: usize) -> VResult<Ordering> {
    for (a, b) in x.iter().zip(y) {
        if !eq_at(a, b, depth + 1)? {
            return cmp_at(a, b, depth + 1);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

/// `item in container`
pub fn contains(container: &Value, item: &Value) -> VResult<bool> {
    match container {
        Value::List(l) => any_equal(&l.0.borrow(), item),
        Value::Tuple(t) => any_equal(&t.0, item),
        Value::Dict(d) => d.0.borrow().contains(item),
        Value::Set(m) => m.0.borrow().contains(item),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range(r) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            other => other.as_int().is_some_and(|v| r.contains(v)),
        }),
        other => Err(Exception::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_equal(items: &[Value], item: &Value) -> VResult<bool> {
    for v in items {
        if values_equal(v, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

fn unsupported(op: BinOp, a: &Value, b: &Value) -> Exception {
    Exception::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

pub fn floor_div_int(a: i64, b: i64) -> VResult<i64> {
    if b == 0 {
        return Err(Exception::new(
            ExcKind::ZeroDivisionError,
            "integer division or modulo by zero",
        ));
    }
    let q = a.checked_div(b).ok_or_else(Exception::overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

pub fn mod_int(a: i64, b: i64) -> VResult<i64> {
    if b == 0 {
        return Err(Exception::new(
            ExcKind::ZeroDivisionError,
            "integer division or modulo by zero",
        ));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn mod_float(a: f64, b: f64) -> VResult<f64> {
    if b == 0.0 {
        return Err(Exception::new(ExcKind::ZeroDivisionError, "float modulo"));
    }
    let r = a % b;
    Ok(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })
}

fn pow_float(a: f64, b: f64) -> VResult<f64> {
    if a == 0.0 && b < 0.0 {
        return Err(Exception::new(
            ExcKind::ZeroDivisionError,
            "0.0 cannot be raised to a negative power",
        ));
    }
    if a < 0.0 && b.fract() != 0.0 {
        return Err(Exception::value_error("math domain error"));
    }
    let r = a.powf(b);
    if r.is_infinite() && a.is_finite() && b.is_finite() {
        return Err(Exception::new(ExcKind::OverflowError, "numerical result out of range"));
    }
    Ok(r)
}

fn repeat<T: Clone>(items: &[T], times: i64, max_len: usize) -> VResult<Vec<T>> {
    if times <= 0 || items.is_empty() {
        return Ok(Vec::new());
    }
    let total = items
        .len()
        .checked_mul(usize::try_from(times).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    check_len(total, max_len)?;
    let mut out = Vec::with_capacity(total);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn repeat_str(s: &str, times: i64, max_len: usize) -> VResult<Value> {
    if times <= 0 {
        return Ok(Value::from(""));
    }
    let total = s
        .len()
        .checked_mul(usize::try_from(times).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);
    check_len(total, max_len)?;
    Ok(Value::from(s.repeat(times as usize)))
}

/// Apply a binary operator. Collections built here never exceed `max_len`.
pub fn binary_op(op: BinOp, a: &Value, b: &Value, max_len: usize) -> VResult<Value> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_op(op, x, y);
    }
    if a.is_number() && b.is_number() {
        let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
        return float_op(op, x, y).map(Value::Float);
    }

    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            check_len(x.len() + y.len(), max_len)?;
            Ok(Value::from(format!("{}{}", x, y)))
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.0.borrow().clone();
            check_len(items.len() + y.0.borrow().len(), max_len)?;
            items.extend(y.0.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            check_len(x.0.len() + y.0.len(), max_len)?;
            Ok(Value::tuple(x.0.iter().chain(y.0.iter()).cloned().collect()))
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            repeat_str(s, n.as_int().unwrap_or(0), max_len)
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if n.as_int().is_some() => {
            let items = repeat(l.0.borrow().as_slice(), n.as_int().unwrap_or(0), max_len)?;
            Ok(Value::list(items))
        }
        (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if n.as_int().is_some() => {
            Ok(Value::tuple(repeat(t.0.as_slice(), n.as_int().unwrap_or(0), max_len)?))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> VResult<Value> {
    let checked = |r: Option<i64>| r.map(Value::Int).ok_or_else(Exception::overflow);
    match op {
        BinOp::Add => checked(x.checked_add(y)),
        BinOp::Sub => checked(x.checked_sub(y)),
        BinOp::Mul => checked(x.checked_mul(y)),
        BinOp::Div => {
            if y == 0 {
                return Err(Exception::new(ExcKind::ZeroDivisionError, "division by zero"));
            }
            Ok(Value::Float(x as f64 / y as f64))
        }
        BinOp::FloorDiv => floor_div_int(x, y).map(Value::Int),
        BinOp::Mod => mod_int(x, y).map(Value::Int),
        BinOp::Pow => {
            if y < 0 {
                return pow_float(x as f64, y as f64).map(Value::Float);
            }
            let exp = u32::try_from(y).map_err(|_| Exception::overflow())?;
            checked(x.checked_pow(exp))
        }
    }
}

fn float_op(op: BinOp, x: f64, y: f64) -> VResult<f64> {
    match op {
        BinOp::Add => Ok(x + y),
        BinOp::Sub => Ok(x - y),
        BinOp::Mul => Ok(x * y),
        BinOp::Div => {
            if y == 0.0 {
                return Err(Exception::new(ExcKind::ZeroDivisionError, "float division by zero"));
            }
            Ok(x / y)
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(Exception::new(
                    ExcKind::ZeroDivisionError,
                    "float floor division by zero",
                ));
            }
            Ok((x / y).floor())
        }
        BinOp::Mod => mod_float(x, y),
        BinOp::Pow => pow_float(x, y),
    }
}

// ---------------------------------------------------------------------------
// Format specs (`f"{x:>8.2f}"`, `"{:d}".format(n)`)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

/// Largest width or precision a format spec may request
const MAX_FORMAT_WIDTH: usize = 10_000;

fn parse_spec(spec: &str) -> VResult<FormatSpec> {
    let bad = || Exception::value_error(format!("invalid format specifier '{}'", spec));
    let chars: Vec<char> = spec.chars().collect();
    let mut out = FormatSpec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|&c| is_align(c)) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            out.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i].iter().collect::<String>().parse().map_err(|_| bad())?;
    }
    if chars.get(i) == Some(&',') {
        out.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(bad());
        }
        out.precision = Some(chars[start..i].iter().collect::<String>().parse().map_err(|_| bad())?);
    }
    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len()
        || out.width > MAX_FORMAT_WIDTH
        || out.precision.unwrap_or(0) > MAX_FORMAT_WIDTH
    {
        return Err(bad());
    }
    Ok(out)
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(p) => digits.split_at(p),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

/// Render a value through a format spec
pub fn format_value(value: &Value, spec: &str) -> VResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec)?;
    let wrong_kind = |kind: char| {
        Exception::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            kind,
            value.type_name()
        ))
    };

    let (body, numeric_negative, numeric) = match (spec.kind, value) {
        (None | Some('s'), Value::Str(s)) => {
            let text: String = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            (text, false, false)
        }
        (Some(kind), Value::Str(_)) => return Err(wrong_kind(kind)),
        (None | Some('d'), v) if v.as_int().is_some() && spec.precision.is_none() => {
            let i = v.as_int().unwrap_or(0);
            (i.unsigned_abs().to_string(), i < 0, true)
        }
        (Some('x' | 'X' | 'o' | 'b'), v) if v.as_int().is_some() => {
            let i = v.as_int().unwrap_or(0);
            let abs = i.unsigned_abs();
            let text = match spec.kind {
                Some('x') => format!("{:x}", abs),
                Some('X') => format!("{:X}", abs),
                Some('o') => format!("{:o}", abs),
                _ => format!("{:b}", abs),
            };
            (text, i < 0, true)
        }
        (None | Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%'), v) if v.is_number() => {
            let f = v.as_f64().unwrap_or(0.0);
            let text = match spec.kind {
                Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), f.abs()),
                Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), f.abs() * 100.0),
                Some('e' | 'E') => {
                    let text = format!("{:.*e}", spec.precision.unwrap_or(6), f.abs());
                    let (m, e) = text.split_once('e').unwrap_or((&text, "0"));
                    let e: i32 = e.parse().unwrap_or(0);
                    let text = format!("{}e{}{:02}", m, if e < 0 { '-' } else { '+' }, e.abs());
                    if spec.kind == Some('E') { text.to_uppercase() } else { text }
                }
                Some('g' | 'G') | None => match spec.precision {
                    Some(p) => {
                        let p = p.max(1);
                        let exp = if f == 0.0 { 0 } else { f.abs().log10().floor() as i32 };
                        if exp < -4 || exp >= p as i32 {
                            format_float(f.abs())
                        } else {
                            let decimals = (p as i32 - 1 - exp).max(0) as usize;
                            let text = format!("{:.*}", decimals, f.abs());
                            if text.contains('.') {
                                text.trim_end_matches('0').trim_end_matches('.').to_string()
                            } else {
                                text
                            }
                        }
                    }
                    None => format_float(f.abs()),
                },
                _ => format_float(f.abs()),
            };
            (text, f.is_sign_negative() && f != 0.0, true)
        }
        (Some(kind), _) => return Err(wrong_kind(kind)),
        (None, v) => (v.to_str(), false, false),
    };

    let body = if spec.grouping && numeric { group_thousands(&body) } else { body };
    let sign = if numeric_negative {
        "-"
    } else {
        match spec.sign {
            Some('+') if numeric => "+",
            Some(' ') if numeric => " ",
            _ => "",
        }
    };

    let len = sign.chars().count() + body.chars().count();
    let pad = spec.width.saturating_sub(len);
    if pad == 0 {
        return Ok(format!("{}{}", sign, body));
    }
    let (fill, align) = if spec.zero && spec.align.is_none() && numeric {
        ('0', '=')
    } else {
        (
            spec.fill.unwrap_or(' '),
            spec.align.unwrap_or(if numeric { '>' } else { '<' }),
        )
    };
    let padding = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{}{}{}", sign, body, padding(pad)),
        '^' => format!("{}{}{}{}", padding(pad / 2), sign, body, padding(pad - pad / 2)),
        '=' => format!("{}{}{}", sign, padding(pad), body),
        _ => format!("{}{}{}", padding(pad), sign, body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::from("a'b"),
            Value::tuple(vec![Value::None]),
            Value::Bool(true),
        ]);
        assert_eq!(v.repr(), r#"[1, 2.0, "a'b", (None,), True]"#);
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(-3.0), "-3.0");
    }

    #[test]
    fn test_python_division_semantics() {
        assert_eq!(floor_div_int(-7, 2).unwrap(), -4);
        assert_eq!(mod_int(-7, 2).unwrap(), 1);
        assert_eq!(mod_int(7, -2).unwrap(), -1);
        assert!(floor_div_int(1, 0).is_err());
        assert!(floor_div_int(i64::MIN, -1).is_err());

        let r = binary_op(BinOp::Div, &Value::Int(1), &Value::Int(2), 10).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 0.5));
        let err = binary_op(BinOp::Div, &Value::Int(1), &Value::Int(0), 10).unwrap_err();
        assert_eq!(err.kind, ExcKind::ZeroDivisionError);
    }

    #[test]
    fn test_checked_integer_arithmetic() {
        let err = binary_op(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2), 10).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
        let err = binary_op(BinOp::Pow, &Value::Int(10), &Value::Int(30), 10).unwrap_err();
        assert_eq!(err.kind, ExcKind::OverflowError);
        let ok = binary_op(BinOp::Pow, &Value::Int(2), &Value::Int(10), 10).unwrap();
        assert!(matches!(ok, Value::Int(1024)));
    }

    #[test]
    fn test_repetition_is_bounded() {
        let err = binary_op(BinOp::Mul, &Value::list(vec![Value::Int(0)]), &Value::Int(1_000_001), 1_000_000)
            .unwrap_err();
        assert_eq!(err.kind, ExcKind::MemoryError);
        let err = binary_op(BinOp::Mul, &Value::from("ab"), &Value::Int(i64::MAX), 1_000_000).unwrap_err();
        assert_eq!(err.kind, ExcKind::MemoryError);
        let ok = binary_op(BinOp::Mul, &Value::Int(3), &Value::from("ab"), 100).unwrap();
        assert_eq!(ok.to_str(), "ababab");
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)).unwrap());
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::list(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(compare_values(&a, &b).unwrap(), Ordering::Less);
        assert!(compare_values(&Value::Int(1), &Value::from("x")).is_err());
    }

    #[test]
    fn test_dict_order_and_keys() {
        let mut d = Dict::new();
        d.insert(Value::from("b"), Value::Int(1)).unwrap();
        d.insert(Value::from("a"), Value::Int(2)).unwrap();
        d.insert(Value::Int(1), Value::Int(3)).unwrap();
        // 1.0 and True hash like 1
        d.insert(Value::Float(1.0), Value::Int(4)).unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(d.get(&Value::Bool(true)).unwrap().and_then(|v| v.as_int()), Some(4));

        d.remove(&Value::from("b")).unwrap();
        assert_eq!(Value::dict(d.clone()).repr(), "{'a': 2, 1: 4}");
        assert!(d.insert(Value::list(vec![]), Value::None).is_err());
    }

    #[test]
    fn test_range() {
        let r = RangeVal { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(4));
        assert!(!r.contains(5));
        assert_eq!(RangeVal { start: 0, stop: 5, step: 2 }.len(), 3);
    }

    #[test]
    fn test_contains() {
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&Value::Range(RangeVal { start: 0, stop: 10, step: 1 }), &Value::Int(9)).unwrap());
        assert!(contains(&Value::Int(3), &Value::Int(3)).is_err());
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_value(&Value::from("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
        assert_eq!(format_value(&Value::Float(0.25), ".0%").unwrap(), "25%");
        assert!(format_value(&Value::from("x"), "d").is_err());
        assert!(format_value(&Value::Int(1), "99999999").is_err());
    }

    #[test]
    fn test_deep_nesting_drops_without_overflow() {
        let mut v = Value::None;
        for _ in 0..200_000 {
            v = Value::list(vec![v]);
        }
        assert_eq!(v.repr().matches('[').count(), MAX_VALUE_DEPTH + 1);
        drop(v);
    }
}
