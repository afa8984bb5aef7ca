//! Hand-written SSQL lexer and recursive-descent parser.
//!
//! `find $a, max($h) where [$a /url contain('x')] [$h /hit] order-by $h desc
//! limit 10`. Keywords are case-insensitive; strings take single or double
//! quotes.

use thiserror::Error;

use crate::ast::*;

/// A syntax error with its 1-based source location. All errors found in one
/// pass are returned together.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parses `query` into a [`Statement`]; a non-empty error list means the
/// statement must not be executed.
pub fn parse(query: &str) -> (Statement, Vec<ParseError>) {
    let (tokens, mut errors) = lex(query);
    let mut parser = Parser { tokens, at: 0, errors: Vec::new() };
    let stmt = parser.statement();
    errors.append(&mut parser.errors);
    (stmt, errors)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Path(String),
    Int(i64),
    Float(f64),
    Str(String),
    Word(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

struct Lexer {
    chars: Vec<char>,
    i: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.i += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let start = self.i;
        while self.peek().is_some_and(&keep) {
            self.bump();
        }
        self.chars[start..self.i].iter().collect()
    }
}

fn lex(query: &str) -> (Vec<Token>, Vec<ParseError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lx = Lexer { chars: query.chars().collect(), i: 0, line: 1, col: 1 };

    while let Some(c) = lx.peek() {
        let (tl, tc) = (lx.line, lx.col);
        let mut push = |tok: Tok| tokens.push(Token { tok, line: tl, column: tc });

        match c {
            c if c.is_whitespace() => {
                lx.bump();
            }
            '[' | ']' | '{' | '}' | '(' | ')' | ',' => {
                lx.bump();
                push(match c {
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    _ => Tok::Comma,
                });
            }
            '$' => {
                lx.bump();
                let name = lx.take_while(|c| c.is_alphanumeric() || c == '_');
                if name.is_empty() {
                    errors.push(ParseError { line: tl, column: tc, message: "empty variable name".into() });
                }
                push(Tok::Ident(name));
            }
            '/' => {
                let path = lx.take_while(|c| !c.is_whitespace() && !"[]{}(),".contains(c));
                push(Tok::Path(path));
            }
            '\'' | '"' => {
                lx.bump();
                let text = lx.take_while(|next| next != c);
                if lx.bump().is_none() {
                    errors.push(ParseError { line: tl, column: tc, message: "unterminated string".into() });
                }
                push(Tok::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                lx.bump();
                let rest = lx.take_while(|c| c.is_ascii_digit() || c == '.');
                let text = format!("{c}{rest}");
                let parsed = if text.contains('.') {
                    text.parse::<f64>().map(Tok::Float).map_err(|_| ())
                } else {
                    text.parse::<i64>().map(Tok::Int).map_err(|_| ())
                };
                match parsed {
                    Ok(tok) => push(tok),
                    Err(_) => errors.push(ParseError {
                        line: tl,
                        column: tc,
                        message: format!("invalid number '{text}'"),
                    }),
                }
            }
            c if c.is_alphabetic() => {
                let word = lx.take_while(|c| c.is_alphanumeric() || c == '-' || c == '_');
                push(Tok::Word(word.to_lowercase()));
            }
            other => {
                lx.bump();
                errors.push(ParseError {
                    line: tl,
                    column: tc,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    (tokens, errors)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    at: usize,
    errors: Vec<ParseError>,
}

impl Parser {
    fn statement(&mut self) -> Statement {
        let mut stmt = Statement::default();

        if !self.eat_word("find") {
            self.error_here("statement must start with 'find'");
            return stmt;
        }
        loop {
            if let Some(attr) = self.attribute() {
                stmt.find.push(attr);
            } else {
                break;
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }

        if !self.eat_word("where") {
            self.error_here("missing 'where'");
        }
        while matches!(self.peek(), Some(Tok::LBracket | Tok::LBrace)) {
            if let Some(expr) = self.expr() {
                stmt.where_.push(expr);
            } else {
                break;
            }
        }

        if self.eat_word("order-by") {
            loop {
                match self.take() {
                    Some(Tok::Ident(name)) => {
                        let direction = if self.eat_word("desc") {
                            Direction::Desc
                        } else {
                            self.eat_word("asc");
                            Direction::Asc
                        };
                        stmt.order_by.push(OrderBy { name, direction });
                    }
                    _ => {
                        self.error_here("order-by expects an attribute name");
                        break;
                    }
                }
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }

        if self.eat_word("limit") {
            match self.take() {
                Some(Tok::Int(v)) if v >= 0 => stmt.limit = v as u32,
                _ => self.error_here("limit expects a non-negative integer"),
            }
        }

        if self.at < self.tokens.len() {
            self.error_here("trailing input after statement");
        }

        stmt
    }

    fn attribute(&mut self) -> Option<Attribute> {
        match self.peek()? {
            Tok::Ident(_) => {
                let Some(Tok::Ident(name)) = self.take() else { unreachable!() };
                Some(Attribute { name, group: false, func: None })
            }
            Tok::Word(w) => {
                let word = w.clone();
                match word.as_str() {
                    "group-by" => {
                        self.take();
                        self.expect(&Tok::LParen, "group-by expects '('")?;
                        let attr = if self.peek_word("part") {
                            self.take();
                            self.expect(&Tok::LParen, "part expects '('")?;
                            let name = self.ident("part expects an attribute")?;
                            self.expect(&Tok::Comma, "part expects ', n'")?;
                            let n = match self.take() {
                                Some(Tok::Int(v)) if v > 0 => v,
                                _ => {
                                    self.error_here("partition value must be a positive integer");
                                    1
                                }
                            };
                            self.expect(&Tok::RParen, "part expects ')'")?;
                            Attribute {
                                name,
                                group: true,
                                func: Some(Function {
                                    name: FuncName::Part,
                                    param: Some(FuncParam::Int(n)),
                                }),
                            }
                        } else {
                            let name = self.ident("group-by expects an attribute")?;
                            Attribute { name, group: true, func: None }
                        };
                        self.expect(&Tok::RParen, "group-by expects ')'")?;
                        Some(attr)
                    }
                    "avg" | "sum" | "min" | "max" | "count" | "pctl" => {
                        self.take();
                        let func = match word.as_str() {
                            "avg" => FuncName::Avg,
                            "sum" => FuncName::Sum,
                            "min" => FuncName::Min,
                            "max" => FuncName::Max,
                            "count" => FuncName::Count,
                            _ => FuncName::Pctl,
                        };
                        self.expect(&Tok::LParen, "aggregate expects '('")?;
                        let name = self.ident("aggregate expects an attribute")?;
                        let param = if func == FuncName::Pctl {
                            self.expect(&Tok::Comma, "pctl expects ', quantile'")?;
                            match self.take() {
                                Some(Tok::Float(q)) => Some(FuncParam::Float(q)),
                                Some(Tok::Int(q)) => Some(FuncParam::Float(q as f64)),
                                _ => {
                                    self.error_here("pctl expects a numeric quantile");
                                    None
                                }
                            }
                        } else {
                            None
                        };
                        self.expect(&Tok::RParen, "aggregate expects ')'")?;
                        Some(Attribute { name, group: false, func: Some(Function { name: func, param }) })
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn expr(&mut self) -> Option<Expr> {
        match self.peek()? {
            Tok::LBrace => {
                self.take();
                let mut members = Vec::new();
                while !matches!(self.peek(), Some(Tok::RBrace) | None) {
                    members.push(self.expr()?);
                }
                self.expect(&Tok::RBrace, "missing '}'")?;
                Some(Expr::Or(members))
            }
            Tok::LBracket => {
                self.take();
                let mut tuple = Tuple::default();
                if let Some(Tok::Ident(_)) = self.peek() {
                    let Some(Tok::Ident(name)) = self.take() else { unreachable!() };
                    tuple.name = Some(name);
                }
                if let Some(Tok::Path(_)) = self.peek() {
                    let Some(Tok::Path(path)) = self.take() else { unreachable!() };
                    tuple.path = path;
                }
                match self.peek() {
                    Some(Tok::LBracket) => {
                        let mut inner = Vec::new();
                        while matches!(self.peek(), Some(Tok::LBracket)) {
                            inner.push(self.expr()?);
                        }
                        tuple.predicate = Some(Predicate::Nested(inner));
                    }
                    Some(Tok::Word(_)) => {
                        tuple.predicate = self.predicate();
                    }
                    _ => {}
                }
                self.expect(&Tok::RBracket, "missing ']'")?;
                Some(Expr::Tuple(tuple))
            }
            _ => {
                self.error_here("expected '[' or '{'");
                None
            }
        }
    }

    fn predicate(&mut self) -> Option<Predicate> {
        let Some(Tok::Word(op)) = self.take() else {
            self.error_here("expected a predicate");
            return None;
        };

        if op == "exist" {
            if self.eat(&Tok::LParen) {
                self.expect(&Tok::RParen, "exist takes no arguments")?;
            }
            return Some(Predicate::Exist);
        }

        self.expect(&Tok::LParen, "predicate expects '('")?;
        let args = self.scalars()?;
        self.expect(&Tok::RParen, "predicate expects ')'")?;

        let unary = |parser: &mut Self, args: &[Scalar]| -> Option<Scalar> {
            if args.len() == 1 {
                Some(args[0].clone())
            } else {
                parser.error_here("predicate expects one operand");
                None
            }
        };

        match op.as_str() {
            "eq" => Some(Predicate::Eq(unary(self, &args)?)),
            "neq" => Some(Predicate::Neq(unary(self, &args)?)),
            "gt" => Some(Predicate::Gt(unary(self, &args)?)),
            "ge" => Some(Predicate::Ge(unary(self, &args)?)),
            "lt" => Some(Predicate::Lt(unary(self, &args)?)),
            "le" => Some(Predicate::Le(unary(self, &args)?)),
            "key" => match unary(self, &args)? {
                Scalar::Int(v) => Some(Predicate::Key(KeyValue::Int(v))),
                Scalar::Text(t) => Some(Predicate::Key(KeyValue::Text(t))),
                Scalar::Float(_) => {
                    self.error_here("key expects an integer or a string");
                    None
                }
            },
            "contain" => Some(Predicate::Contain(unary(self, &args)?)),
            "between" | "timeframe" => {
                if args.len() != 2 {
                    self.error_here("expects two operands");
                    return None;
                }
                if op == "between" {
                    self.check_ordered(&args[0], &args[1]);
                    Some(Predicate::Between(args[0].clone(), args[1].clone()))
                } else {
                    match (&args[0], &args[1]) {
                        (Scalar::Int(a), Scalar::Int(b)) => {
                            if a > b {
                                self.error_here("timeframe second operand must not be smaller");
                            }
                            Some(Predicate::Timeframe(*a, *b))
                        }
                        _ => {
                            self.error_here("timeframe expects integers");
                            None
                        }
                    }
                }
            }
            "in" => {
                if args.is_empty() {
                    self.error_here("in expects at least one operand");
                    return None;
                }
                let list = match &args[0] {
                    Scalar::Int(_) => List::Int(
                        args.iter()
                            .filter_map(|s| match s {
                                Scalar::Int(v) => Some(*v),
                                _ => None,
                            })
                            .collect(),
                    ),
                    Scalar::Float(_) => List::Float(
                        args.iter()
                            .filter_map(|s| match s {
                                Scalar::Float(v) => Some(*v),
                                Scalar::Int(v) => Some(*v as f64),
                                _ => None,
                            })
                            .collect(),
                    ),
                    Scalar::Text(_) => List::Text(
                        args.iter()
                            .filter_map(|s| match s {
                                Scalar::Text(v) => Some(v.clone()),
                                _ => None,
                            })
                            .collect(),
                    ),
                };
                Some(Predicate::In(list))
            }
            other => {
                self.error_here(&format!("unknown predicate '{other}'"));
                None
            }
        }
    }

    fn scalars(&mut self) -> Option<Vec<Scalar>> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::RParen) => break,
                Some(Tok::Int(_)) => {
                    let Some(Tok::Int(v)) = self.take() else { unreachable!() };
                    out.push(Scalar::Int(v));
                }
                Some(Tok::Float(_)) => {
                    let Some(Tok::Float(v)) = self.take() else { unreachable!() };
                    out.push(Scalar::Float(v));
                }
                Some(Tok::Str(_)) => {
                    let Some(Tok::Str(v)) = self.take() else { unreachable!() };
                    out.push(Scalar::Text(v));
                }
                _ => {
                    self.error_here("expected a literal operand");
                    return None;
                }
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Some(out)
    }

    fn check_ordered(&mut self, a: &Scalar, b: &Scalar) {
        let (x, y) = (scalar_f64(a), scalar_f64(b));
        if let (Some(x), Some(y)) = (x, y) {
            if x > y {
                self.error_here("between second operand must not be smaller");
            }
        }
    }

    fn ident(&mut self, message: &str) -> Option<String> {
        match self.take() {
            Some(Tok::Ident(name)) => Some(name),
            _ => {
                self.error_here(message);
                None
            }
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.at).map(|t| &t.tok)
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w == word)
    }

    fn take(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.at).map(|t| t.tok.clone());
        if tok.is_some() {
            self.at += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek_word(word) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, message: &str) -> Option<()> {
        if self.eat(tok) {
            Some(())
        } else {
            self.error_here(message);
            None
        }
    }

    fn error_here(&mut self, message: &str) {
        let (line, column) = self
            .tokens
            .get(self.at.min(self.tokens.len().saturating_sub(1)))
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        self.errors.push(ParseError { line, column, message: message.into() });
    }
}

fn scalar_f64(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Int(v) => Some(*v as f64),
        Scalar::Float(v) => Some(*v),
        Scalar::Text(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(query: &str) -> Statement {
        let (stmt, errors) = parse(query);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        stmt
    }

    #[test]
    fn simple_contain() {
        let stmt = ok(r#"find $a where [$a /d contain("f")]"#);
        assert_eq!(stmt.find.len(), 1);
        assert_eq!(stmt.find[0].name, "a");
        match &stmt.where_[0] {
            Expr::Tuple(t) => {
                assert_eq!(t.name.as_deref(), Some("a"));
                assert_eq!(t.path, "/d");
                assert_eq!(t.predicate, Some(Predicate::Contain(Scalar::Text("f".into()))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn numeric_predicates() {
        for (query, expect) in [
            ("find $b where [$b /x eq(2)]", Predicate::Eq(Scalar::Int(2))),
            ("find $b where [$b /x le(2.5)]", Predicate::Le(Scalar::Float(2.5))),
            ("find $b where [$b /x gt(-1)]", Predicate::Gt(Scalar::Int(-1))),
            (
                "find $b where [$b /x between(2, 3)]",
                Predicate::Between(Scalar::Int(2), Scalar::Int(3)),
            ),
            ("find $b where [$b /x timeframe(2, 3)]", Predicate::Timeframe(2, 3)),
        ] {
            let stmt = ok(query);
            match &stmt.where_[0] {
                Expr::Tuple(t) => assert_eq!(t.predicate.as_ref(), Some(&expect), "{query}"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn equal_endpoints_are_allowed() {
        ok("find $b where [$b /x between(3, 3)]");
        ok("find $b where [$b /x timeframe(3, 3)]");
    }

    #[test]
    fn reversed_endpoints_error() {
        let (_, errors) = parse("find $b where [$b /x between(4, 3)]");
        assert!(!errors.is_empty());
        let (_, errors) = parse("find $b where [$b /x timeframe(4, 3)]");
        assert!(!errors.is_empty());
    }

    #[test]
    fn key_takes_int_or_text_only() {
        let stmt = ok("find $b where [$b /k key('abc')]");
        match &stmt.where_[0] {
            Expr::Tuple(t) => {
                assert_eq!(t.predicate, Some(Predicate::Key(KeyValue::Text("abc".into()))));
            }
            other => panic!("unexpected {other:?}"),
        }
        let stmt = ok("find $b where [$b /k key(2)]");
        match &stmt.where_[0] {
            Expr::Tuple(t) => assert_eq!(t.predicate, Some(Predicate::Key(KeyValue::Int(2)))),
            other => panic!("unexpected {other:?}"),
        }

        let (_, errors) = parse("find $b where [$b /k key(2.5)]");
        assert!(!errors.is_empty(), "a float key operand must not parse");
    }

    #[test]
    fn in_lists_are_typed() {
        let stmt = ok("find $b where [$b /x in('a', 'b')]");
        match &stmt.where_[0] {
            Expr::Tuple(t) => {
                assert_eq!(
                    t.predicate,
                    Some(Predicate::In(List::Text(vec!["a".into(), "b".into()])))
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        let stmt = ok("find $b where [$b /x in(1, 2)]");
        match &stmt.where_[0] {
            Expr::Tuple(t) => assert_eq!(t.predicate, Some(Predicate::In(List::Int(vec![1, 2])))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn exist_with_and_without_parens() {
        for query in ["find $b where [$b /x exist]", "find $b where [$b /x exist()]"] {
            let stmt = ok(query);
            match &stmt.where_[0] {
                Expr::Tuple(t) => assert_eq!(t.predicate, Some(Predicate::Exist)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn nested_vectors() {
        let stmt = ok("find $g where [$r / [/a eq(1)] [/b eq(2)]]");
        match &stmt.where_[0] {
            Expr::Tuple(t) => {
                assert_eq!(t.path, "/");
                match t.predicate.as_ref().unwrap() {
                    Predicate::Nested(inner) => assert_eq!(inner.len(), 2),
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn or_group() {
        let stmt = ok("find $g where {[/a eq(0.0)] [/d lt(1)]}");
        match &stmt.where_[0] {
            Expr::Or(members) => assert_eq!(members.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn selection_attributes() {
        let stmt = ok("find group-by($u), max($h), avg($d) where [$u /url] [$h /hit] [$d /duration]");
        assert_eq!(stmt.find.len(), 3);
        assert!(stmt.find[0].group);
        assert_eq!(stmt.find[1].func.as_ref().unwrap().name, FuncName::Max);
        assert_eq!(stmt.find[2].func.as_ref().unwrap().name, FuncName::Avg);
    }

    #[test]
    fn pctl_and_part() {
        let stmt = ok("find group-by(part($b, 20)), pctl($d, 0.6) where [$b /a] [$d /df]");
        assert!(stmt.find[0].group);
        assert_eq!(stmt.find[0].func.as_ref().unwrap().name, FuncName::Part);
        assert_eq!(stmt.find[1].func.as_ref().unwrap().quantile(), 0.6);
    }

    #[test]
    fn order_by_and_limit() {
        let stmt = ok("find $b where [$b /] order-by $b desc, $b asc limit 30");
        assert_eq!(stmt.order_by.len(), 2);
        assert_eq!(stmt.order_by[0].direction, Direction::Desc);
        assert_eq!(stmt.order_by[1].direction, Direction::Asc);
        assert_eq!(stmt.limit, 30);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let stmt = ok("FIND $b WHERE [$b /x EXIST] ORDER-BY $b ASC LIMIT 5");
        assert_eq!(stmt.limit, 5);
        assert_eq!(stmt.order_by[0].direction, Direction::Asc);
    }

    #[test]
    fn errors_carry_location() {
        let (_, errors) = parse("find $b where [$b /x frobnicate(1)]");
        assert!(!errors.is_empty());
        assert!(errors[0].line >= 1 && errors[0].column >= 1);
    }

    #[test]
    fn selection_only_tuple_has_no_predicate() {
        let stmt = ok("find $b where [$b /abc][/a eq(0.5)]");
        match &stmt.where_[0] {
            Expr::Tuple(t) => assert!(t.predicate.is_none()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(stmt.where_.len(), 2);
    }
}
