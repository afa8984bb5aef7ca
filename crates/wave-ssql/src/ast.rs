//! SSQL statement AST.

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Homogeneous `in(...)` list.
#[derive(Debug, Clone, PartialEq)]
pub enum List {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

/// `key(...)` operand: an integer or a text literal, nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `[$x /path [/p1 op()] [/p2 op()]]` — inner clauses correlated on the
    /// same (entity, attribute).
    Nested(Vec<Expr>),
    Between(Scalar, Scalar),
    Timeframe(i64, i64),
    Key(KeyValue),
    /// A non-text operand is a type mismatch at evaluation time.
    Contain(Scalar),
    Eq(Scalar),
    Neq(Scalar),
    Gt(Scalar),
    Ge(Scalar),
    Lt(Scalar),
    Le(Scalar),
    In(List),
    Exist,
}

/// One `[$name /path predicate]` clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple {
    pub name: Option<String>,
    pub path: String,
    pub predicate: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Tuple(Tuple),
    /// `{ [..] [..] }` — union of the member clauses.
    Or(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncName {
    Avg,
    Sum,
    Min,
    Max,
    Count,
    Pctl,
    Part,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FuncParam {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: FuncName,
    pub param: Option<FuncParam>,
}

impl Function {
    /// The quantile parameter for percentile columns, 0 otherwise.
    pub fn quantile(&self) -> f64 {
        match (self.name, &self.param) {
            (FuncName::Pctl, Some(FuncParam::Float(q))) => *q,
            (FuncName::Pctl, Some(FuncParam::Int(q))) => *q as f64,
            _ => 0.0,
        }
    }
}

/// One selected column of the `find` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub group: bool,
    pub func: Option<Function>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub name: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub find: Vec<Attribute>,
    pub where_: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    /// 0 means no limit.
    pub limit: u32,
}
