//! Recursive-descent parser producing [`ast`](super::ast) nodes

use std::rc::Rc;

use super::ast::*;
use super::lexer::{LexError, Tok, Token, tokenize};

/// Deepest nesting of blocks and sub-expressions accepted
pub const MAX_NESTING: usize = 100;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self {
            line: e.line,
            message: e.message,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

/// Parse a whole script into its statement list
pub fn parse(src: &str) -> PResult<Vec<Stmt>> {
    let mut parser = Parser::new(tokenize(src)?, 0);
    parser.program()
}

fn parse_embedded(text: &str, line: usize, depth: usize) -> PResult<Expr> {
    let reline = |e: ParseError| ParseError {
        line,
        message: format!("in f-string: {}", e.message),
    };
    let tokens = tokenize(text.trim()).map_err(|e| reline(e.into()))?;
    let mut parser = Parser::new(tokens, depth);
    let expr = parser.testlist().map_err(reline)?;
    parser.eat(&Tok::Newline);
    if *parser.peek() != Tok::Eof {
        return Err(reline(parser.unexpected("end of expression")));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    in_loop: bool,
    in_function: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            in_loop: false,
            in_function: false,
        }
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let idx = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        self.tokens.get(idx).map(|t| &t.tok).unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        self.tokens.get(idx).map(|t| t.line).unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", op)))
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        match self.peek() {
            Tok::Name(n) if !is_keyword(n) => {
                let n = n.clone();
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error(format!("expected {} but found {}", expected, self.peek()))
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("too many nested blocks or expressions"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn starts_expr(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !is_keyword(n) || matches!(n.as_str(), "None" | "True" | "False" | "not" | "lambda" | "await")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+"),
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn program(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => return Ok(body),
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(self.error("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> PResult<Vec<Stmt>> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            Tok::Indent => return Err(self.error("unexpected indent")),
            _ => String::new(),
        };
        let kind = match keyword.as_str() {
            "if" => {
                self.advance();
                self.if_stmt()?
            }
            "while" => {
                self.advance();
                let test = self.test()?;
                let body = self.loop_body()?;
                StmtKind::While { test, body }
            }
            "for" => {
                self.advance();
                let target = self.target_list()?;
                self.expect_kw("in")?;
                let iter = self.testlist()?;
                let body = self.loop_body()?;
                StmtKind::For { target, iter, body }
            }
            "def" => {
                self.advance();
                self.function_def(false)?
            }
            "async" => {
                self.advance();
                if !self.eat_kw("def") {
                    return Err(self.unexpected("'def'"));
                }
                self.function_def(true)?
            }
            "try" => {
                self.advance();
                self.try_stmt()?
            }
            "class" => {
                self.advance();
                let name = self.expect_name()?;
                if self.eat_op("(") {
                    self.call_args()?;
                }
                let body = self.block()?;
                StmtKind::ClassDef { name, body }
            }
            "with" => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    items.push(self.test()?);
                    if self.eat_kw("as") {
                        let target = self.target_list()?;
                        check_target(&target, line)?;
                    }
                    if !self.eat_op(",") {
                        break;
                    }
                }
                let body = self.block()?;
                StmtKind::With { items, body }
            }
            "elif" | "else" | "except" | "finally" => {
                return Err(self.error(format!("'{}' without a matching block", keyword)));
            }
            _ => return self.simple_line(),
        };
        Ok(vec![Stmt { line, kind }])
    }

    /// Small statements separated by `;`, ended by a newline
    fn simple_line(&mut self) -> PResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            let line = self.line();
            let kind = self.small_statement()?;
            stmts.push(Stmt { line, kind });
            if !self.eat_op(";") {
                break;
            }
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
        }
        if !self.eat(&Tok::Newline) && *self.peek() != Tok::Eof {
            return Err(self.unexpected("end of line"));
        }
        Ok(stmts)
    }

    fn small_statement(&mut self) -> PResult<StmtKind> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(n) => n.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "pass" => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            "break" | "continue" if !self.in_loop => {
                Err(self.error(format!("'{}' outside loop", keyword)))
            }
            "break" => {
                self.advance();
                Ok(StmtKind::Break)
            }
            "continue" => {
                self.advance();
                Ok(StmtKind::Continue)
            }
            "return" if !self.in_function => Err(self.error("'return' outside function")),
            "return" => {
                self.advance();
                let value = if self.starts_expr() { Some(self.testlist()?) } else { None };
                Ok(StmtKind::Return(value))
            }
            "import" => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    let name = self.dotted_name()?;
                    let asname = if self.eat_kw("as") { Some(self.expect_name()?) } else { None };
                    names.push(Alias { name, asname });
                    if !self.eat_op(",") {
                        break;
                    }
                }
                Ok(StmtKind::Import(names))
            }
            "from" => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect_kw("import")?;
                let mut names = Vec::new();
                if self.eat_op("*") {
                    names.push(Alias {
                        name: "*".to_string(),
                        asname: None,
                    });
                } else {
                    let parens = self.eat_op("(");
                    loop {
                        let name = self.expect_name()?;
                        let asname = if self.eat_kw("as") { Some(self.expect_name()?) } else { None };
                        names.push(Alias { name, asname });
                        if !self.eat_op(",") || (parens && self.is_op(")")) {
                            break;
                        }
                    }
                    if parens {
                        self.expect_op(")")?;
                    }
                }
                Ok(StmtKind::ImportFrom { module, names })
            }
            "global" | "nonlocal" => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                Ok(if keyword == "global" {
                    StmtKind::Global(names)
                } else {
                    StmtKind::Nonlocal(names)
                })
            }
            "del" => {
                self.advance();
                let target = self.target_list()?;
                check_target(&target, line)?;
                Ok(StmtKind::Del(match target {
                    Expr::Tuple(items) => items,
                    other => vec![other],
                }))
            }
            "assert" => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") { Some(self.test()?) } else { None };
                Ok(StmtKind::Assert { test, msg })
            }
            "raise" => {
                self.advance();
                let value = if self.starts_expr() { Some(self.test()?) } else { None };
                if self.eat_kw("from") {
                    self.test()?;
                }
                Ok(StmtKind::Raise(value))
            }
            "yield" => {
                let value = self.yield_expr()?;
                Ok(StmtKind::Expr(value))
            }
            _ => self.expr_statement(),
        }
    }

    fn expr_statement(&mut self) -> PResult<StmtKind> {
        let line = self.line();
        let first = self.testlist()?;

        let aug = match self.peek() {
            Tok::Op("+=") => Some(BinOp::Add),
            Tok::Op("-=") => Some(BinOp::Sub),
            Tok::Op("*=") => Some(BinOp::Mul),
            Tok::Op("/=") => Some(BinOp::Div),
            Tok::Op("//=") => Some(BinOp::FloorDiv),
            Tok::Op("%=") => Some(BinOp::Mod),
            Tok::Op("**=") => Some(BinOp::Pow),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            if !matches!(first, Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. }) {
                return Err(ParseError {
                    line,
                    message: "illegal target for augmented assignment".to_string(),
                });
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target: first, op, value });
        }

        // Annotated assignment: the annotation is parsed and dropped
        if self.eat_op(":") {
            check_target(&first, line)?;
            self.test()?;
            if self.eat_op("=") {
                let value = self.testlist()?;
                return Ok(StmtKind::Assign {
                    targets: vec![first],
                    value,
                });
            }
            return Ok(StmtKind::Pass);
        }

        if !self.is_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat_op("=") {
            let next = if self.is_kw("yield") { self.yield_expr()? } else { self.testlist()? };
            exprs.push(next);
        }
        let value = exprs.pop().ok_or_else(|| self.error("missing assignment value"))?;
        for target in &exprs {
            check_target(target, line)?;
        }
        Ok(StmtKind::Assign { targets: exprs, value })
    }

    fn if_stmt(&mut self) -> PResult<StmtKind> {
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.is_kw("elif") {
            let line = self.line();
            self.advance();
            let kind = self.if_stmt()?;
            vec![Stmt { line, kind }]
        } else if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(StmtKind::If { test, body, orelse })
    }

    fn function_def(&mut self, is_async: bool) -> PResult<StmtKind> {
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")")?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let outer = (
            std::mem::replace(&mut self.in_loop, false),
            std::mem::replace(&mut self.in_function, true),
        );
        let body = self.block();
        (self.in_loop, self.in_function) = outer;
        let body = body?;
        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body,
            is_async,
        })))
    }

    /// Parameter list up to (not including) `close`
    fn params(&mut self, close: &str) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        while !self.is_op(close) {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("variadic parameters are not supported"));
            }
            let name = self.expect_name()?;
            if params.iter().any(|p| p.name == name) {
                return Err(self.error(format!("duplicate parameter '{}'", name)));
            }
            if close == ")" && self.eat_op(":") {
                self.test()?;
            }
            let default = if self.eat_op("=") { Some(self.test()?) } else { None };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(self.error("parameter without a default follows parameter with a default"));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn try_stmt(&mut self) -> PResult<StmtKind> {
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.is_kw("except") {
            let line = self.line();
            self.advance();
            let mut kinds = Vec::new();
            let mut name = None;
            if !self.is_op(":") {
                let kind = self.test()?;
                kinds = exception_names(&kind).ok_or(ParseError {
                    line,
                    message: "unsupported exception specification".to_string(),
                })?;
                if self.eat_kw("as") {
                    name = Some(self.expect_name()?);
                }
            }
            let body = self.block()?;
            handlers.push(ExceptHandler { kinds, name, body });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") { self.block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally'"));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        self.enter()?;
        let body = if self.eat(&Tok::Newline) {
            if !self.eat(&Tok::Indent) {
                return Err(self.error("expected an indented block"));
            }
            let mut body = Vec::new();
            while !matches!(self.peek(), Tok::Dedent | Tok::Eof) {
                body.extend(self.statement()?);
            }
            self.eat(&Tok::Dedent);
            body
        } else {
            self.simple_line()?
        };
        self.leave();
        Ok(body)
    }

    fn loop_body(&mut self) -> PResult<Vec<Stmt>> {
        let outer = std::mem::replace(&mut self.in_loop, true);
        let body = self.block();
        self.in_loop = outer;
        body
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Comma-separated tests; more than one (or a trailing comma) makes a tuple
    fn testlist(&mut self) -> PResult<Expr> {
        let first = self.test()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Assignment targets of `for` and comprehensions, stopping before `in`
    fn target_list(&mut self) -> PResult<Expr> {
        let line = self.line();
        let first = self.arith()?;
        let target = if self.is_op(",") {
            let mut items = vec![first];
            while self.eat_op(",") {
                if self.is_kw("in") || !self.starts_expr() {
                    break;
                }
                items.push(self.arith()?);
            }
            Expr::Tuple(items)
        } else {
            first
        };
        check_target(&target, line)?;
        Ok(target)
    }

    fn test(&mut self) -> PResult<Expr> {
        self.enter()?;
        let result = self.test_inner();
        self.leave();
        result
    }

    fn test_inner(&mut self) -> PResult<Expr> {
        if self.eat_kw("lambda") {
            let params = self.params(":")?;
            self.expect_op(":")?;
            let body = self.test()?;
            return Ok(Expr::Lambda {
                params,
                body: Box::new(body),
            });
        }
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn yield_expr(&mut self) -> PResult<Expr> {
        self.expect_kw("yield")?;
        self.eat_kw("from");
        let value = if self.starts_expr() {
            Some(Box::new(self.testlist()?))
        } else {
            None
        };
        Ok(Expr::Yield(value))
    }

    fn or_test(&mut self) -> PResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_kw("or") {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> PResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_kw("and") {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.not_test()?;
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.arith()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" && matches!(self.peek_at(1), Tok::Name(m) if m == "in") => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Name(n) if n == "is" => {
                    if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.arith()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
            })
        }
    }

    fn arith(&mut self) -> PResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                Tok::Op("@") => return Err(self.error("matrix multiplication is not supported")),
                _ => break,
            };
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.factor()?;
            self.leave();
            // Negative literals fold so constant tests stay literals
            return Ok(match (op, operand) {
                (UnaryOp::Neg, Expr::Int(v)) => Expr::Int(v.wrapping_neg()),
                (UnaryOp::Neg, Expr::Float(v)) => Expr::Float(-v),
                (op, operand) => Expr::Unary {
                    op,
                    operand: Box::new(operand),
                },
            });
        }
        self.power()
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.primary()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.factor()?;
            self.leave();
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> PResult<Expr> {
        if self.eat_kw("await") {
            self.enter()?;
            let inner = self.primary()?;
            self.leave();
            return Ok(Expr::Await(Box::new(inner)));
        }
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op(".") {
                let attr = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(self.error("expected an attribute name after '.'")),
                };
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, consuming the closing `)`
    fn call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.is_op(")") {
            if self.is_op("*") || self.is_op("**") {
                return Err(self.error("argument unpacking is not supported"));
            }
            let is_keyword_arg = matches!(self.peek(), Tok::Name(n) if !is_keyword(n))
                && matches!(self.peek_at(1), Tok::Op("="));
            if is_keyword_arg {
                let name = self.expect_name()?;
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {}", name)));
                }
                kwargs.push((name, self.test()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let arg = self.test()?;
                if self.is_kw("for") {
                    let generators = self.comprehension()?;
                    args.push(Expr::ListComp {
                        elt: Box::new(arg),
                        generators,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self) -> PResult<Expr> {
        let first = self.subscript_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript_item(&mut self) -> PResult<Expr> {
        let lower = if self.is_op(":") { None } else { Some(self.test()?) };
        if !self.eat_op(":") {
            return lower.ok_or_else(|| self.unexpected("an index"));
        }
        let ends = |p: &Self| p.is_op("]") || p.is_op(",") || p.is_op(":");
        let upper = if ends(self) { None } else { Some(Box::new(self.test()?)) };
        let step = if self.eat_op(":") && !ends(self) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    fn comprehension(&mut self) -> PResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut conditions = Vec::new();
            while self.eat_kw("if") {
                conditions.push(self.or_test()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                conditions,
            });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            Tok::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(line),
            Tok::Name(name) => {
                self.advance();
                match name.as_str() {
                    "None" => Ok(Expr::None),
                    "True" => Ok(Expr::Bool(true)),
                    "False" => Ok(Expr::Bool(false)),
                    n if is_keyword(n) => Err(ParseError {
                        line,
                        message: format!("unexpected keyword '{}'", n),
                    }),
                    _ => Ok(Expr::Name(name)),
                }
            }
            Tok::Op("(") => {
                self.advance();
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                if self.is_kw("yield") {
                    let value = self.yield_expr()?;
                    self.expect_op(")")?;
                    return Ok(value);
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let generators = self.comprehension()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op(")") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                self.advance();
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test()?;
                if self.is_kw("for") {
                    let generators = self.comprehension()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.is_op("]") {
                        break;
                    }
                    items.push(self.test()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.advance();
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.test()?;
                if !self.eat_op(":") {
                    return Err(ParseError {
                        line,
                        message: "set literals are not supported".to_string(),
                    });
                }
                let value = self.test()?;
                if self.is_kw("for") {
                    let generators = self.comprehension()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        generators,
                    });
                }
                let mut pairs = vec![(key, value)];
                while self.eat_op(",") {
                    if self.is_op("}") {
                        break;
                    }
                    let key = self.test()?;
                    self.expect_op(":")?;
                    pairs.push((key, self.test()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run an f-string
    fn strings(&mut self, line: usize) -> PResult<Expr> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    push_literal(&mut parts, &s);
                }
                Tok::FStr(body) => {
                    self.advance();
                    formatted = true;
                    for part in self.fstring_parts(&body, line)? {
                        match part {
                            FStringPart::Literal(s) => push_literal(&mut parts, &s),
                            value => parts.push(value),
                        }
                    }
                }
                _ => break,
            }
        }
        if !formatted {
            let text = match parts.pop() {
                Some(FStringPart::Literal(s)) => s,
                _ => String::new(),
            };
            return Ok(Expr::Str(text));
        }
        Ok(Expr::FString(parts))
    }

    fn fstring_parts(&self, body: &str, line: usize) -> PResult<Vec<FStringPart>> {
        let chars: Vec<char> = body.chars().collect();
        let fail = |message: &str| ParseError {
            line,
            message: message.to_string(),
        };
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '}' => return Err(fail("single '}' is not allowed in f-string")),
                '{' => {
                    let start = i + 1;
                    let mut j = start;
                    let mut nesting = 0usize;
                    let mut quote: Option<char> = None;
                    let mut colon = None;
                    while j < chars.len() {
                        let c = chars[j];
                        if let Some(q) = quote {
                            if c == q {
                                quote = None;
                            }
                        } else {
                            match c {
                                '\'' | '"' => quote = Some(c),
                                '(' | '[' | '{' => nesting += 1,
                                ')' | ']' => nesting = nesting.saturating_sub(1),
                                '}' if nesting == 0 => break,
                                '}' => nesting -= 1,
                                ':' if nesting == 0 && colon.is_none() => colon = Some(j),
                                _ => {}
                            }
                        }
                        j += 1;
                    }
                    if j >= chars.len() {
                        return Err(fail("unterminated expression in f-string"));
                    }

                    let mut text: String = chars[start..colon.unwrap_or(j)].iter().collect();
                    for conversion in ["!r", "!s", "!a"] {
                        if text.trim_end().ends_with(conversion) {
                            let keep = text.trim_end().len() - conversion.len();
                            text.truncate(keep);
                        }
                    }
                    if text.trim().is_empty() {
                        return Err(fail("empty expression in f-string"));
                    }
                    let expr = parse_embedded(&text, line, self.depth + 1)?;
                    let spec = colon.map(|c| chars[c + 1..j].iter().collect::<String>());

                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(FStringPart::Value { expr, spec });
                    i = j + 1;
                }
                c => {
                    literal.push(c);
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn exception_names(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Name(n) => Some(vec![n.clone()]),
        Expr::Tuple(items) => items
            .iter()
            .map(|e| match e {
                Expr::Name(n) => Some(n.clone()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn check_target(expr: &Expr, line: usize) -> PResult<()> {
    match expr {
        Expr::Name(_) | Expr::Subscript { .. } | Expr::Attribute { .. } => Ok(()),
        Expr::Tuple(items) | Expr::List(items) if !items.is_empty() => {
            items.iter().try_for_each(|item| check_target(item, line))
        }
        _ => Err(ParseError {
            line,
            message: "cannot assign to expression".to_string(),
        }),
    }
}
