//! Syntax tree produced by the parser.

use entiql_store::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Statement {
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

/// `alias.segment.segment`, or a bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathExpr {
    pub(crate) segments: Vec<String>,
    pub(crate) offset: usize,
}

impl PathExpr {
    pub(crate) fn text(&self) -> String {
        self.segments.join(".")
    }
}

/// `Entity [as] alias`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeDecl {
    pub(crate) entity: String,
    pub(crate) alias: String,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JoinDecl {
    pub(crate) join_type: JoinType,
    pub(crate) fetch: bool,
    pub(crate) path: PathExpr,
    pub(crate) alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectItem {
    Expr(AstExpr),
    Constructor {
        type_name: String,
        args: Vec<AstExpr>,
        offset: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OrderItem {
    pub(crate) expr: AstExpr,
    pub(crate) descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectStatement {
    pub(crate) distinct: bool,
    pub(crate) items: Vec<SelectItem>,
    pub(crate) from: RangeDecl,
    pub(crate) joins: Vec<JoinDecl>,
    pub(crate) filter: Option<AstExpr>,
    pub(crate) order_by: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UpdateStatement {
    pub(crate) target: RangeDecl,
    pub(crate) assignments: Vec<(PathExpr, AstExpr)>,
    pub(crate) filter: Option<AstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeleteStatement {
    pub(crate) target: RangeDecl,
    pub(crate) filter: Option<AstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AstExpr {
    Path(PathExpr),
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
    Param {
        name: String,
        offset: usize,
    },
    Unary {
        op: UnaryOp,
        expr: Box<AstExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<AstExpr>,
        right: Box<AstExpr>,
    },
    IsNull {
        expr: Box<AstExpr>,
        negated: bool,
    },
    Like {
        expr: Box<AstExpr>,
        pattern: Box<AstExpr>,
        negated: bool,
    },
    InList {
        expr: Box<AstExpr>,
        list: Vec<AstExpr>,
        negated: bool,
    },
    Between {
        expr: Box<AstExpr>,
        low: Box<AstExpr>,
        high: Box<AstExpr>,
        negated: bool,
    },
    Case {
        branches: Vec<(AstExpr, AstExpr)>,
        otherwise: Option<Box<AstExpr>>,
    },
    /// Built-in function or aggregate; `name` is lowercase.
    Call {
        name: String,
        args: Vec<AstExpr>,
        distinct: bool,
        /// `count(*)`
        star: bool,
        offset: usize,
    },
    /// `function('name', args...)`
    NativeCall {
        name: String,
        args: Vec<AstExpr>,
    },
}
