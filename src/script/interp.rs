//! Tree-walking evaluator for validated scripts
//!
//! Every statement, loop iteration and call checks the deadline and the
//! cancel flag, so a runaway script stops within one statement of either.

use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Instant;

use super::ast::*;
use super::builtins::{builtin_named, get_item, module_named, set_item, slice_value};
use super::capability::BuildApi;
use super::value::*;
use crate::core::config::SandboxConfig;

/// Why evaluation stopped early
#[derive(Debug)]
pub enum Interrupt {
    /// Script exception and the line it surfaced on (0 until known)
    Raise(Exception, usize),
    Timeout,
}

impl From<Exception> for Interrupt {
    fn from(e: Exception) -> Self {
        Interrupt::Raise(e, 0)
    }
}

impl Interrupt {
    fn at(self, line: usize) -> Self {
        match self {
            Interrupt::Raise(e, 0) => Interrupt::Raise(e, line),
            other => other,
        }
    }
}

pub type Exec<T> = Result<T, Interrupt>;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter<'a> {
    pub(super) build: &'a mut dyn BuildApi,
    pub(super) rng: fastrand::Rng,
    pub(super) max_len: usize,
    globals: HashMap<String, Value>,
    env: Option<Rc<Env>>,
    /// Function scopes that closures were created in; cleared on drop to
    /// break closure/scope reference cycles
    captured: Vec<Weak<Env>>,
    max_depth: usize,
    depth: usize,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
    seed: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        build: &'a mut dyn BuildApi,
        config: &SandboxConfig,
        deadline: Instant,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let mut globals = HashMap::new();
        globals.insert("build".to_string(), Value::Build);
        globals.insert("builder".to_string(), Value::Build);
        globals.insert("math".to_string(), Value::Module("math"));
        globals.insert("random".to_string(), Value::Module("random"));

        Self {
            build,
            rng: fastrand::Rng::with_seed(config.random_seed),
            max_len: config.max_collection_len,
            globals,
            env: None,
            captured: Vec::new(),
            max_depth: config.max_call_depth,
            depth: 0,
            deadline,
            cancel,
            seed: config.random_seed,
        }
    }

    /// Seed the script RNG returns to on `random.seed()`
    pub(super) fn default_seed(&self) -> u64 {
        self.seed
    }

    /// Execute a whole program
    pub fn run(&mut self, program: &[Stmt]) -> Exec<()> {
        self.exec_block(program).map(|_| ())
    }

    /// Value of a module-level variable, for inspection after a run
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub(super) fn tick(&self) -> Exec<()> {
        if self.cancel.load(AtomicOrdering::Relaxed) || Instant::now() >= self.deadline {
            return Err(Interrupt::Timeout);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    fn load(&self, name: &str) -> Exec<Value> {
        if let Some(env) = &self.env {
            if let Some(v) = env.lookup(name) {
                return Ok(v);
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Some(native) = builtin_named(name) {
            return Ok(Value::Native(native));
        }
        Err(Exception::new(ExcKind::NameError, format!("name '{}' is not defined", name)).into())
    }

    fn store(&mut self, name: &str, value: Value) {
        let previous = match &self.env {
            Some(env) => env.vars.borrow_mut().insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
        drop(previous);
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt]) -> Exec<Flow> {
        for stmt in body {
            self.tick().map_err(|e| e.at(stmt.line))?;
            let flow = self.exec(stmt).map_err(|e| e.at(stmt.line))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Exec<Flow> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body } => loop {
                self.tick()?;
                if !self.eval(test)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => return self.exec_for(target, iter, body),
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.store(&def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(m) => self.eval(m)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Exception::new(ExcKind::AssertionError, message).into());
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = module_named(&alias.name)?;
                    self.store(alias.asname.as_deref().unwrap_or(&alias.name), module);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module = module_named(module)?;
                for alias in names {
                    let value = self.get_attr(&module, &alias.name)?;
                    self.store(alias.asname.as_deref().unwrap_or(&alias.name), value);
                }
            }
            StmtKind::Global(_)
            | StmtKind::Nonlocal(_)
            | StmtKind::Del(_)
            | StmtKind::ClassDef { .. }
            | StmtKind::Raise(_)
            | StmtKind::With { .. } => {
                return Err(Exception::type_error("statement not supported in build scripts").into());
            }
        }
        Ok(Flow::Normal)
    }

    /// Feed each element of `iterable` to `step` until it returns false.
    /// Ranges are walked lazily.
    fn each(
        &mut self,
        iterable: Value,
        mut step: impl FnMut(&mut Self, Value) -> Exec<bool>,
    ) -> Exec<()> {
        if let Value::Range(r) = iterable {
            for i in 0..r.len() {
                self.tick()?;
                if !step(self, Value::Int(r.get(i)))? {
                    break;
                }
            }
            return Ok(());
        }
        for item in iterable.iter_values(self.max_len)? {
            self.tick()?;
            if !step(self, item)? {
                break;
            }
        }
        Ok(())
    }

    fn exec_for(&mut self, target: &Expr, iter: &Expr, body: &[Stmt]) -> Exec<Flow> {
        let iterable = self.eval(iter)?;
        let mut outcome = Flow::Normal;
        self.each(iterable, |me, item| {
            me.assign(target, item)?;
            match me.exec_block(body)? {
                Flow::Break => Ok(false),
                Flow::Return(v) => {
                    outcome = Flow::Return(v);
                    Ok(false)
                }
                Flow::Normal | Flow::Continue => Ok(true),
            }
        })?;
        Ok(outcome)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Exec<Flow> {
        let result = match self.exec_block(body) {
            Err(Interrupt::Raise(exc, line)) if !exc.kind.is_fatal() => {
                let handler = handlers.iter().find(|h| {
                    h.kinds.is_empty() || h.kinds.iter().any(|k| exc.kind.caught_by(k))
                });
                match handler {
                    Some(handler) => {
                        if let Some(name) = &handler.name {
                            self.store(name, Value::from(exc.message.clone()));
                        }
                        self.exec_block(&handler.body)
                    }
                    None => Err(Interrupt::Raise(exc, line)),
                }
            }
            Ok(Flow::Normal) => self.exec_block(orelse),
            other => other,
        };

        let aborting = match &result {
            Err(Interrupt::Timeout) => true,
            Err(Interrupt::Raise(e, _)) => e.kind.is_fatal(),
            Ok(_) => false,
        };
        if aborting || finalbody.is_empty() {
            return result;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => result,
            flow => Ok(flow),
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Exec<()> {
        match target {
            Expr::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let values = value.iter_values(self.max_len)?;
                if values.len() != targets.len() {
                    let message = if values.len() < targets.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            values.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    };
                    return Err(Exception::value_error(message).into());
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            Expr::Subscript { value: container, index } => {
                if matches!(**index, Expr::Slice { .. }) {
                    return Err(Exception::type_error("slice assignment is not supported").into());
                }
                let container = self.eval(container)?;
                let key = self.eval(index)?;
                set_item(&container, key, value, self.max_len)?;
                Ok(())
            }
            Expr::Attribute { attr, .. } => Err(Exception::new(
                ExcKind::AttributeError,
                format!("cannot assign to attribute '{}'", attr),
            )
            .into()),
            _ => Err(Exception::type_error("cannot assign to expression").into()),
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Exec<()> {
        match target {
            Expr::Name(name) => {
                let current = self.load(name)?;
                let rhs = self.eval(value)?;
                let result = self.in_place(op, current, rhs)?;
                self.store(name, result);
                Ok(())
            }
            Expr::Subscript { value: container, index } if !matches!(**index, Expr::Slice { .. }) => {
                let container = self.eval(container)?;
                let key = self.eval(index)?;
                let current = get_item(&container, &key)?;
                let rhs = self.eval(value)?;
                let result = self.in_place(op, current, rhs)?;
                set_item(&container, key, result, self.max_len)?;
                Ok(())
            }
            _ => Err(Exception::type_error("illegal target for augmented assignment").into()),
        }
    }

    /// `current op= rhs`; lists extend in place like Python's `+=`
    fn in_place(&mut self, op: BinOp, current: Value, rhs: Value) -> Exec<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let extra = rhs.iter_values(self.max_len)?;
            check_len(list.0.borrow().len() + extra.len(), self.max_len)?;
            list.0.borrow_mut().extend(extra);
            return Ok(current);
        }
        Ok(binary_op(op, &current, &rhs, self.max_len)?)
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Exec<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(e) => Some(self.eval(e)?),
                None => None,
            });
        }
        if let Some(env) = &self.env {
            let weak = Rc::downgrade(env);
            if !self.captured.last().is_some_and(|w| w.ptr_eq(&weak)) {
                if self.captured.len() >= 1024 {
                    self.captured.retain(|w| w.strong_count() > 0);
                }
                self.captured.push(weak);
            }
        }
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            env: self.env.clone(),
        })))
    }

    pub(super) fn call_value(
        &mut self,
        func: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        self.tick()?;
        match func {
            Value::Function(closure) => self.call_function(closure, args, kwargs),
            Value::Native(name) => self.call_native(name, args, kwargs),
            Value::Method(method) => self.call_method(&method.receiver, &method.name, args, kwargs),
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))
            .into()),
        }
    }

    fn call_function(
        &mut self,
        closure: &Rc<Closure>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Exec<Value> {
        let def = &closure.def;
        let count = def.params.len();
        if args.len() > count {
            return Err(Exception::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                count,
                args.len()
            ))
            .into());
        }

        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(count, None);
        for (name, value) in kwargs {
            let Some(i) = def.params.iter().position(|p| p.name == name) else {
                return Err(Exception::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                ))
                .into());
            };
            if slots[i].is_some() {
                return Err(Exception::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                ))
                .into());
            }
            slots[i] = Some(value);
        }

        let env = Env::new(closure.env.clone());
        {
            let mut vars = env.vars.borrow_mut();
            for (i, slot) in slots.into_iter().enumerate() {
                let value = match slot.or_else(|| closure.defaults[i].clone()) {
                    Some(v) => v,
                    None => {
                        return Err(Exception::type_error(format!(
                            "{}() missing required argument: '{}'",
                            def.name, def.params[i].name
                        ))
                        .into());
                    }
                };
                vars.insert(def.params[i].name.clone(), value);
            }
        }

        if self.depth >= self.max_depth {
            return Err(Exception::new(
                ExcKind::RecursionError,
                format!("maximum call depth of {} exceeded", self.max_depth),
            )
            .into());
        }
        self.depth += 1;
        let saved = std::mem::replace(&mut self.env, Some(Rc::new(env)));
        let result = self.exec_block(&def.body);
        self.env = saved;
        self.depth -= 1;

        match result? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    pub(super) fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        Ok(match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::from(s.as_str()),
            Expr::FString(parts) => self.eval_fstring(parts)?,
            Expr::Name(name) => self.load(name)?,
            Expr::List(items) => Value::list(self.eval_all(items)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items)?),
            Expr::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k)?;
                    let value = self.eval(v)?;
                    dict.insert(key, value)?;
                }
                Value::dict(dict)
            }
            Expr::Attribute { value, attr } => {
                let value = self.eval(value)?;
                self.get_attr(&value, attr)?
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                self.eval_subscript(&container, index)?
            }
            Expr::Slice { .. } => {
                return Err(Exception::type_error("slice outside of a subscript").into());
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = self.eval_all(args)?;
                let mut evaluated = Vec::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    evaluated.push((name.clone(), self.eval(e)?));
                }
                self.call_value(&func, args, evaluated)?
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                unary(*op, &v)?
            }
            Expr::Binary { op, left, right } => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                binary_op(*op, &a, &b, self.max_len)?
            }
            Expr::And(a, b) => {
                let left = self.eval(a)?;
                if left.truthy() { self.eval(b)? } else { left }
            }
            Expr::Or(a, b) => {
                let left = self.eval(a)?;
                if left.truthy() { left } else { self.eval(b)? }
            }
            Expr::Compare { left, ops } => {
                let mut a = self.eval(left)?;
                for (op, right) in ops {
                    let b = self.eval(right)?;
                    if !compare(*op, &a, &b)? {
                        return Ok(Value::Bool(false));
                    }
                    a = b;
                }
                Value::Bool(true)
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)?
                } else {
                    self.eval(orelse)?
                }
            }
            Expr::ListComp { elt, generators } => {
                let max = self.max_len;
                let mut out = Vec::new();
                self.in_comprehension_scope(|me| {
                    me.comprehend(generators, &mut |me: &mut Self| {
                        let v = me.eval(elt)?;
                        check_len(out.len() + 1, max)?;
                        out.push(v);
                        Ok(())
                    })
                })?;
                Value::list(out)
            }
            Expr::DictComp { key, value, generators } => {
                let max = self.max_len;
                let mut dict = Dict::new();
                self.in_comprehension_scope(|me| {
                    me.comprehend(generators, &mut |me: &mut Self| {
                        let k = me.eval(key)?;
                        let v = me.eval(value)?;
                        dict.insert(k, v)?;
                        check_len(dict.len(), max)?;
                        Ok(())
                    })
                })?;
                Value::dict(dict)
            }
            Expr::Lambda { .. } | Expr::Await(_) | Expr::Yield(_) => {
                return Err(Exception::type_error("expression not supported in build scripts").into());
            }
        })
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Exec<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_fstring(&mut self, parts: &[FStringPart]) -> Exec<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Value { expr, spec } => {
                    let v = self.eval(expr)?;
                    out.push_str(&format_value(&v, spec.as_deref().unwrap_or(""))?);
                }
            }
            check_len(out.len(), self.max_len)?;
        }
        Ok(Value::from(out))
    }

    fn eval_subscript(&mut self, container: &Value, index: &Expr) -> Exec<Value> {
        if let Expr::Slice { lower, upper, step } = index {
            let lower = self.eval_bound(lower.as_deref())?;
            let upper = self.eval_bound(upper.as_deref())?;
            let step = self.eval_bound(step.as_deref())?;
            return Ok(slice_value(container, lower, upper, step)?);
        }
        let key = self.eval(index)?;
        Ok(get_item(container, &key)?)
    }

    fn eval_bound(&mut self, expr: Option<&Expr>) -> Exec<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                Exception::type_error("slice indices must be integers or None").into()
            }),
        }
    }

    /// Run `f` with a fresh scope so comprehension variables do not leak
    fn in_comprehension_scope(&mut self, f: impl FnOnce(&mut Self) -> Exec<()>) -> Exec<()> {
        let scope = Rc::new(Env::new(self.env.clone()));
        let saved = std::mem::replace(&mut self.env, Some(scope));
        let result = f(self);
        self.env = saved;
        result
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Exec<()>,
    ) -> Exec<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&first.iter)?;
        self.each(iterable, |me, item| {
            me.assign(&first.target, item)?;
            for condition in &first.conditions {
                if !me.eval(condition)?.truthy() {
                    return Ok(true);
                }
            }
            me.comprehend(rest, &mut *emit)?;
            Ok(true)
        })
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        for weak in self.captured.drain(..) {
            if let Some(env) = weak.upgrade() {
                let vars = std::mem::take(&mut *env.vars.borrow_mut());
                drop(vars);
            }
        }
    }
}

fn unary(op: UnaryOp, v: &Value) -> VResult<Value> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(Exception::overflow),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (op, v) => Err(Exception::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            v.type_name()
        ))),
    }
}

fn is_same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => x == y,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Build, Value::Build) => true,
        _ => false,
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> VResult<bool> {
    use std::cmp::Ordering;
    Ok(match op {
        CmpOp::Eq => values_equal(a, b)?,
        CmpOp::NotEq => !values_equal(a, b)?,
        CmpOp::Lt => compare_values(a, b)? == Ordering::Less,
        CmpOp::LtE => compare_values(a, b)? != Ordering::Greater,
        CmpOp::Gt => compare_values(a, b)? == Ordering::Greater,
        CmpOp::GtE => compare_values(a, b)? != Ordering::Less,
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => is_same(a, b),
        CmpOp::IsNot => !is_same(a, b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BuildLimits;
    use crate::script::capability::CanvasBuilder;
    use crate::script::parser::parse;
    use std::time::Duration;

    fn run_with(src: &str, config: &SandboxConfig) -> (Exec<()>, HashMap<String, String>, CanvasBuilder) {
        let program = parse(src).unwrap();
        let mut builder = CanvasBuilder::new(config.limits);
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut interp = Interpreter::new(&mut builder, config, deadline, Arc::new(AtomicBool::new(false)));
        let result = interp.run(&program);
        let globals = interp
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), v.repr()))
            .collect();
        drop(interp);
        (result, globals, builder)
    }

    fn run(src: &str) -> HashMap<String, String> {
        let (result, globals, _) = run_with(src, &SandboxConfig::default());
        if let Err(e) = result {
            panic!("script failed: {:?}", e);
        }
        globals
    }

    fn run_err(src: &str) -> (Exception, usize) {
        match run_with(src, &SandboxConfig::default()).0 {
            Err(Interrupt::Raise(e, line)) => (e, line),
            other => panic!("expected an exception, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_and_variables() {
        let g = run("a = 7 // 2\nb = -7 % 3\nc = 2 ** 10\nd = 1 / 4\ne = 'ab' * 2\nf = (1 + 2) * 3\n");
        assert_eq!(g["a"], "3");
        assert_eq!(g["b"], "2");
        assert_eq!(g["c"], "1024");
        assert_eq!(g["d"], "0.25");
        assert_eq!(g["e"], "'abab'");
        assert_eq!(g["f"], "9");
    }

    #[test]
    fn test_control_flow() {
        let src = "total = 0\nfor i in range(10):\n    if i == 7:\n        break\n    if i % 2:\n        continue\n    total += i\n\
                   n = 0\nwhile n < 5:\n    n += 1\nx = 'big' if total > 5 else 'small'\n";
        let g = run(src);
        assert_eq!(g["total"], "12");
        assert_eq!(g["n"], "5");
        assert_eq!(g["x"], "'big'");
    }

    #[test]
    fn test_functions_defaults_and_kwargs() {
        let src = "def f(a, b=2, c=3):\n    return a * 100 + b * 10 + c\n\
                   x = f(1)\ny = f(1, c=9)\nz = f(b=5, a=4)\n\
                   def fact(n):\n    return 1 if n <= 1 else n * fact(n - 1)\nw = fact(10)\n";
        let g = run(src);
        assert_eq!(g["x"], "123");
        assert_eq!(g["y"], "129");
        assert_eq!(g["z"], "453");
        assert_eq!(g["w"], "3628800");
    }

    #[test]
    fn test_closures_see_enclosing_scope() {
        let src = "def outer(k):\n    def inner(v):\n        return v * k\n    return inner\ntriple = outer(3)\nr = triple(5)\n";
        assert_eq!(run(src)["r"], "15");
    }

    #[test]
    fn test_unpacking_and_comprehensions() {
        let src = "a, (b, c) = 1, [2, 3]\nsq = [i * i for i in range(5) if i != 2]\n\
                   pairs = {k: v for k, v in [('x', 1), ('y', 2)]}\nnested = [(i, j) for i in range(2) for j in range(2)]\n";
        let g = run(src);
        assert_eq!(g["c"], "3");
        assert_eq!(g["sq"], "[0, 1, 9, 16]");
        assert_eq!(g["pairs"], "{'x': 1, 'y': 2}");
        assert_eq!(g["nested"], "[(0, 0), (0, 1), (1, 0), (1, 1)]");
        assert!(!g.contains_key("i"));
    }

    #[test]
    fn test_collections_and_slices() {
        let src = "xs = [5, 3, 8]\nxs.append(1)\nxs += [0]\nys = xs[1:-1]\nzs = xs[::-1]\n\
                   d = {'a': 1}\nd['b'] = 2\nd['a'] += 10\nt = (1, 2, 3)[-1]\ns = 'hello'[1:3]\n";
        let g = run(src);
        assert_eq!(g["xs"], "[5, 3, 8, 1, 0]");
        assert_eq!(g["ys"], "[3, 8, 1]");
        assert_eq!(g["zs"], "[0, 1, 8, 3, 5]");
        assert_eq!(g["d"], "{'a': 11, 'b': 2}");
        assert_eq!(g["t"], "3");
        assert_eq!(g["s"], "'el'");
    }

    #[test]
    fn test_fstrings_and_chained_comparison() {
        let g = run("n = 3\nmsg = f'n={n:03d} half={n / 2:.1f}'\nok = 0 < n <= 3\n");
        assert_eq!(g["msg"], "'n=003 half=1.5'");
        assert_eq!(g["ok"], "True");
    }

    #[test]
    fn test_try_except() {
        let src = "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    x = -1\n    err = e\nfinally:\n    done = True\n\
                   try:\n    y = [][1]\nexcept (KeyError, LookupError):\n    y = 0\n";
        let g = run(src);
        assert_eq!(g["x"], "-1");
        assert_eq!(g["err"], "'division by zero'");
        assert_eq!(g["done"], "True");
        assert_eq!(g["y"], "0");
    }

    #[test]
    fn test_runtime_errors_carry_line() {
        let (e, line) = run_err("x = 1\ny = undefined_name\n");
        assert_eq!(e.kind, ExcKind::NameError);
        assert_eq!(line, 2);

        let (e, line) = run_err("def f(n):\n    return n + 'a'\nf(1)\n");
        assert_eq!(e.kind, ExcKind::TypeError);
        assert_eq!(line, 2);
    }

    #[test]
    fn test_recursion_limit_is_fatal() {
        let config = SandboxConfig {
            max_call_depth: 16,
            ..SandboxConfig::default()
        };
        let src = "def f(n):\n    try:\n        return f(n + 1)\n    except Exception:\n        return -1\nf(0)\n";
        let (result, _, _) = run_with(src, &config);
        assert!(matches!(result, Err(Interrupt::Raise(ref e, _)) if e.kind == ExcKind::RecursionError));
    }

    #[test]
    fn test_collection_limit() {
        let config = SandboxConfig {
            max_collection_len: 100,
            ..SandboxConfig::default()
        };
        let (result, _, _) = run_with("xs = []\nfor i in range(1000):\n    xs.append(i)\n", &config);
        assert!(matches!(result, Err(Interrupt::Raise(ref e, _)) if e.kind == ExcKind::MemoryError));
        let (result, _, _) = run_with("xs = list(range(1000))\n", &config);
        assert!(result.is_err());
    }

    #[test]
    fn test_sets() {
        let g = run(concat!(
            "seen = set()\n",
            "for x, z in [(0, 0), (1, 0), (0, 0), (2, 2)]:\n",
            "    seen.add((x, z))\n",
            "n = len(seen)\n",
            "has = (1, 0) in seen\n",
            "s = set([3, 1, 3, 2])\n",
            "u = s.union([4, 1])\n",
            "i = s.intersection({1: 0, 2: 0, 9: 0})\n",
            "d = s.difference([1])\n",
            "s.discard(7)\n",
            "first = s.pop()\n",
            "ordered = sorted(u)\n",
            "same = set([1, 2]) == set([2, 1])\n",
            "empty = set()\n",
        ));
        assert_eq!(g["n"], "3");
        assert_eq!(g["has"], "True");
        assert_eq!(g["u"], "{3, 1, 2, 4}");
        assert_eq!(g["i"], "{1, 2}");
        assert_eq!(g["d"], "{3, 2}");
        assert_eq!(g["first"], "3");
        assert_eq!(g["s"], "{1, 2}");
        assert_eq!(g["ordered"], "[1, 2, 3, 4]");
        assert_eq!(g["same"], "True");
        assert_eq!(g["empty"], "set()");

        let (e, line) = run_err("s = set([1])\ns.remove(2)\n");
        assert_eq!((e.kind, line), (ExcKind::KeyError, 2));
        let (e, _) = run_err("s = set([[1]])\n");
        assert_eq!(e.kind, ExcKind::TypeError);
    }

    #[test]
    fn test_set_respects_collection_limit() {
        let config = SandboxConfig {
            max_collection_len: 100,
            ..SandboxConfig::default()
        };
        let (result, _, _) = run_with("s = set()\nfor i in range(1000):\n    s.add(i)\n", &config);
        assert!(matches!(result, Err(Interrupt::Raise(ref e, _)) if e.kind == ExcKind::MemoryError));
        let (result, _, _) = run_with("s = set([i for i in range(50)])\ns.update([i for i in range(50, 150)])\n", &config);
        assert!(matches!(result, Err(Interrupt::Raise(ref e, _)) if e.kind == ExcKind::MemoryError));
        let (result, _, _) = run_with("s = set([1, 2] * 50)\n", &config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_isinstance() {
        let g = run(concat!(
            "a = isinstance(3, int)\n",
            "b = isinstance(True, int)\n",
            "c = isinstance(2.5, (int, float))\n",
            "d = isinstance('x', list)\n",
            "e = isinstance(set(), set)\n",
        ));
        assert_eq!(g["a"], "True");
        assert_eq!(g["b"], "True");
        assert_eq!(g["c"], "True");
        assert_eq!(g["d"], "False");
        assert_eq!(g["e"], "True");

        let (e, _) = run_err("x = isinstance(1, 2)\n");
        assert_eq!(e.kind, ExcKind::TypeError);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let (e, _) = run_err("x = 2 ** 62\ny = x * 4\n");
        assert_eq!(e.kind, ExcKind::OverflowError);
    }

    #[test]
    fn test_deadline_stops_loops() {
        let program = parse("n = 0\nwhile n >= 0:\n    n += 1\n").unwrap();
        let config = SandboxConfig::default();
        let mut builder = CanvasBuilder::new(config.limits);
        let deadline = Instant::now() + Duration::from_millis(50);
        let mut interp = Interpreter::new(&mut builder, &config, deadline, Arc::new(AtomicBool::new(false)));
        assert!(matches!(interp.run(&program), Err(Interrupt::Timeout)));
    }

    #[test]
    fn test_cancel_flag_stops_execution() {
        let program = parse("for i in range(10 ** 12):\n    pass\n").unwrap();
        let config = SandboxConfig::default();
        let mut builder = CanvasBuilder::new(config.limits);
        let cancel = Arc::new(AtomicBool::new(true));
        let deadline = Instant::now() + Duration::from_secs(60);
        let mut interp = Interpreter::new(&mut builder, &config, deadline, cancel);
        assert!(matches!(interp.run(&program), Err(Interrupt::Timeout)));
    }

    #[test]
    fn test_build_calls_write_canvas() {
        let src = "for x in range(3):\n    build.setblock(x, 0, 0, 'stone')\nbuilder.fill(0, 1, 0, 1, 1, 1, 'oak_planks')\nn = build.get_block_count()\n";
        let (result, g, builder) = run_with(src, &SandboxConfig::default());
        assert!(result.is_ok());
        assert_eq!(g["n"], "7");
        assert_eq!(builder.canvas().count(), 7);
    }

    #[test]
    fn test_build_limit_cannot_be_caught() {
        let config = SandboxConfig {
            limits: BuildLimits {
                max_blocks: 5,
                ..BuildLimits::default()
            },
            ..SandboxConfig::default()
        };
        let src = "try:\n    build.fill(0, 0, 0, 9, 0, 0, 'stone')\nexcept Exception:\n    pass\n";
        let (result, _, builder) = run_with(src, &config);
        assert!(matches!(result, Err(Interrupt::Raise(ref e, _)) if e.kind == ExcKind::BuildLimitExceeded));
        assert!(builder.canvas().count() <= 5);
    }
}
