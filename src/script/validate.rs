//! Static safety checks run before a script is allowed to execute
//!
//! Every violation in the tree is collected so a rejected author sees the
//! full list at once.

use super::ast::*;

/// Modules a script may import
pub const ALLOWED_MODULES: &[&str] = &["math", "random"];

/// Builtins that are never callable from a script
pub const BLOCKED_CALLS: &[&str] = &[
    "eval", "exec", "compile", "__import__", "open", "input", "breakpoint", "exit", "quit",
    "help", "dir", "type", "getattr", "setattr", "delattr", "hasattr", "globals", "locals",
    "vars", "id", "hash", "memoryview", "bytearray", "bytes", "classmethod", "staticmethod",
    "property", "super", "object",
];

/// Check a parsed script. `Err` carries one reason per violation.
pub fn validate(program: &[Stmt]) -> Result<(), Vec<String>> {
    let mut v = Validator::default();
    v.block(program);
    if v.reasons.is_empty() {
        Ok(())
    } else {
        Err(v.reasons)
    }
}

#[derive(Default)]
struct Validator {
    reasons: Vec<String>,
    line: usize,
}

impl Validator {
    fn reject(&mut self, reason: impl AsRef<str>) {
        self.reasons.push(format!("line {}: {}", self.line, reason.as_ref()));
    }

    fn binding(&mut self, name: &str) {
        if name.starts_with("__") {
            self.reject(format!("Blocked name: {}", name));
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { targets, value } => {
                targets.iter().for_each(|t| self.expr(t));
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.line = stmt.line;
                self.block(orelse);
            }
            StmtKind::While { test, body } => {
                if let Some(constant) = truthy_constant(test) {
                    self.reject(format!("Infinite loop detected: while {}", constant));
                }
                self.expr(test);
                self.block(body);
            }
            StmtKind::For { target, iter, body } => {
                self.expr(target);
                self.expr(iter);
                self.block(body);
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
            StmtKind::FunctionDef(def) => {
                if def.is_async {
                    self.reject("Async functions not allowed");
                }
                self.binding(&def.name);
                self.params(&def.params);
                self.block(&def.body);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.block(body);
                for handler in handlers {
                    self.line = stmt.line;
                    for kind in &handler.kinds {
                        self.binding(kind);
                    }
                    if let Some(name) = &handler.name {
                        self.binding(name);
                    }
                    self.block(&handler.body);
                }
                self.block(orelse);
                self.block(finalbody);
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test);
                if let Some(msg) = msg {
                    self.expr(msg);
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    if !ALLOWED_MODULES.contains(&alias.name.as_str()) {
                        self.reject(format!("Import not allowed: {}", alias.name));
                    }
                    if let Some(asname) = &alias.asname {
                        self.binding(asname);
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => {
                if !ALLOWED_MODULES.contains(&module.as_str()) {
                    self.reject(format!("Import not allowed: {}", module));
                }
                for alias in names {
                    if alias.name == "*" {
                        self.reject(format!("Wildcard import not allowed: from {} import *", module));
                    } else if alias.name.starts_with('_') {
                        self.reject(format!("Blocked attribute access: {}", alias.name));
                    }
                    if let Some(asname) = &alias.asname {
                        self.binding(asname);
                    }
                }
            }
            StmtKind::Global(_) => self.reject("global statements not allowed"),
            StmtKind::Nonlocal(_) => self.reject("nonlocal statements not allowed"),
            StmtKind::Del(_) => self.reject("del statements not allowed"),
            StmtKind::ClassDef { body, .. } => {
                self.reject("Class definitions not allowed");
                self.block(body);
            }
            StmtKind::Raise(_) => self.reject("raise statements not allowed"),
            StmtKind::With { items, body } => {
                self.reject("with statements not allowed");
                items.iter().for_each(|e| self.expr(e));
                self.block(body);
            }
        }
    }

    fn params(&mut self, params: &[Param]) {
        for param in params {
            self.binding(&param.name);
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::None | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {}
            Expr::FString(parts) => {
                for part in parts {
                    if let FStringPart::Value { expr, .. } = part {
                        self.expr(expr);
                    }
                }
            }
            Expr::Name(name) => {
                if name.starts_with("__") {
                    self.reject(format!("Blocked name: {}", name));
                } else if BLOCKED_CALLS.contains(&name.as_str()) {
                    self.reject(format!("Blocked function call: {}", name));
                }
            }
            Expr::List(items) | Expr::Tuple(items) => items.iter().for_each(|e| self.expr(e)),
            Expr::Dict(pairs) => {
                for (k, v) in pairs {
                    self.expr(k);
                    self.expr(v);
                }
            }
            Expr::Attribute { value, attr } => {
                if attr.starts_with('_') {
                    self.reject(format!("Blocked attribute access: {}", attr));
                }
                self.expr(value);
            }
            Expr::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part);
                }
            }
            Expr::Call { func, args, kwargs } => {
                self.expr(func);
                args.iter().for_each(|e| self.expr(e));
                for (name, value) in kwargs {
                    self.binding(name);
                    self.expr(value);
                }
            }
            Expr::Unary { operand, .. } => self.expr(operand),
            Expr::Binary { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Compare { left, ops } => {
                self.expr(left);
                ops.iter().for_each(|(_, e)| self.expr(e));
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::ListComp { elt, generators } => {
                self.expr(elt);
                self.generators(generators);
            }
            Expr::DictComp { key, value, generators } => {
                self.expr(key);
                self.expr(value);
                self.generators(generators);
            }
            Expr::Lambda { params, body } => {
                self.reject("Lambda functions not allowed");
                self.params(params);
                self.expr(body);
            }
            Expr::Await(inner) => {
                self.reject("await not allowed");
                self.expr(inner);
            }
            Expr::Yield(value) => {
                self.reject("Generators not allowed");
                if let Some(value) = value {
                    self.expr(value);
                }
            }
        }
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for g in generators {
            self.expr(&g.target);
            self.expr(&g.iter);
            g.conditions.iter().for_each(|c| self.expr(c));
        }
    }
}

/// Source form of a literal constant that is always truthy
fn truthy_constant(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Bool(true) => Some("True".to_string()),
        Expr::Int(v) if *v != 0 => Some(v.to_string()),
        Expr::Float(v) if *v != 0.0 && !v.is_nan() => Some(v.to_string()),
        Expr::Str(s) if !s.is_empty() => Some(format!("{:?}", s)),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } if is_falsy_constant(operand) => Some("not <constant>".to_string()),
        _ => None,
    }
}

fn is_falsy_constant(expr: &Expr) -> bool {
    match expr {
        Expr::None | Expr::Bool(false) => true,
        Expr::Int(v) => *v == 0,
        Expr::Float(v) => *v == 0.0,
        Expr::Str(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;

    fn check(src: &str) -> Result<(), Vec<String>> {
        validate(&parse(src).unwrap())
    }

    #[test]
    fn test_accepts_ordinary_build_script() {
        let src = "import math\nimport random\nfrom math import sqrt\n\
                   def ring(r, block='stone'):\n    for a in range(0, 360, 10):\n        \
                   x = round(r * math.cos(math.radians(a)))\n        \
                   build.setblock(x, 0, 0, block)\n\
                   ring(5)\nn = 0\nwhile n < 3:\n    n += 1\n";
        assert_eq!(check(src), Ok(()));
    }

    #[test]
    fn test_rejects_while_true() {
        let reasons = check("while True:\n    build.setblock(0, 0, 0, 'stone')\n").unwrap_err();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("Infinite loop"));
        assert!(check("while 1:\n    pass\n").is_err());
        assert!(check("while not False:\n    pass\n").is_err());
        assert!(check("while False:\n    pass\n").is_ok());
    }

    #[test]
    fn test_rejects_imports() {
        let reasons = check("import os\nfrom subprocess import run\nimport math\n").unwrap_err();
        assert_eq!(
            reasons,
            vec![
                "line 1: Import not allowed: os",
                "line 2: Import not allowed: subprocess",
            ]
        );
        assert!(check("from math import *\n").is_err());
    }

    #[test]
    fn test_rejects_dunder_and_private_access() {
        let reasons = check("x = build.__class__\ny = __builtins__\nz = math._secret\n").unwrap_err();
        assert_eq!(reasons.len(), 3);
        assert!(reasons[0].contains("Blocked attribute access: __class__"));
        assert!(reasons[1].contains("Blocked name: __builtins__"));
    }

    #[test]
    fn test_rejects_blocked_calls() {
        let reasons = check("eval('1')\nopen('x')\nf = getattr\n").unwrap_err();
        assert_eq!(reasons.len(), 3);
        assert!(reasons.iter().all(|r| r.contains("Blocked function call")));
    }

    #[test]
    fn test_collects_every_violation() {
        let src = "import os\nf = lambda x: x\nclass A:\n    pass\nglobal g\ndel f\nraise ValueError\n\
                   with f as g:\n    pass\nasync def h():\n    await h()\n";
        let reasons = check(src).unwrap_err();
        for needle in [
            "Import not allowed",
            "Lambda",
            "Class",
            "global",
            "del",
            "raise",
            "with",
            "Async",
            "await",
        ] {
            assert!(reasons.iter().any(|r| r.contains(needle)), "missing {}", needle);
        }
    }

    #[test]
    fn test_nested_violations_found() {
        let src = "def f():\n    if True:\n        for i in range(2):\n            x = [eval(s) for s in xs]\n";
        let reasons = check(src).unwrap_err();
        assert_eq!(reasons, vec!["line 4: Blocked function call: eval"]);
    }
}
