//! Recursive-descent parser.
//!
//! Precedence, loosest first: `or`, `and`, `not`, predicates (comparison,
//! `like`, `in`, `between`, `is null`), `+ -`, `* /`, unary minus.

use super::ast::{
    AstExpr, DeleteStatement, JoinDecl, JoinType, OrderItem, PathExpr, RangeDecl, SelectItem,
    SelectStatement, Statement, UpdateStatement,
};
use super::lexer::{tokenize, Keyword, Token, TokenKind};
use crate::error::{ParseError, ParseResult};
use entiql_store::{BinaryOp, UnaryOp};

/// Parses one statement.
pub(crate) fn parse(input: &str) -> ParseResult<Statement> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let statement = parser.statement()?;
    if parser.peek() != &TokenKind::Eof {
        return Err(parser.unexpected("end of query"));
    }
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &TokenKind {
        let index = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), TokenKind::Keyword(k, _) if *k == keyword)
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.at_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword.as_str())))
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::syntax(
            self.offset(),
            format!("expected {expected}, found {}", self.peek()),
        )
    }

    fn ident(&mut self, what: &str) -> ParseResult<String> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    /// A name after a dot; reserved words are allowed there.
    fn segment(&mut self) -> ParseResult<String> {
        match self.peek() {
            TokenKind::Ident(name) | TokenKind::Keyword(_, name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn statement(&mut self) -> ParseResult<Statement> {
        if self.eat_keyword(Keyword::Select) {
            self.select().map(Statement::Select)
        } else if self.eat_keyword(Keyword::Update) {
            self.update().map(Statement::Update)
        } else if self.eat_keyword(Keyword::Delete) {
            self.delete().map(Statement::Delete)
        } else {
            Err(self.unexpected("'select', 'update' or 'delete'"))
        }
    }

    fn select(&mut self) -> ParseResult<SelectStatement> {
        let distinct = self.eat_keyword(Keyword::Distinct);
        let mut items = vec![self.select_item()?];
        while self.eat(&TokenKind::Comma) {
            items.push(self.select_item()?);
        }
        self.expect_keyword(Keyword::From)?;
        let from = self.range_decl()?;

        let mut joins = Vec::new();
        while let Some(join_type) = self.join_start()? {
            let fetch = self.eat_keyword(Keyword::Fetch);
            let path = self.path()?;
            let alias = self.alias_opt()?;
            joins.push(JoinDecl {
                join_type,
                fetch,
                path,
                alias,
            });
        }

        let filter = self.where_clause()?;

        let mut order_by = Vec::new();
        if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword(Keyword::Desc) {
                    true
                } else {
                    self.eat_keyword(Keyword::Asc);
                    false
                };
                order_by.push(OrderItem { expr, descending });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        Ok(SelectStatement {
            distinct,
            items,
            from,
            joins,
            filter,
            order_by,
        })
    }

    /// Consumes `[inner | left [outer]] join`, if present.
    fn join_start(&mut self) -> ParseResult<Option<JoinType>> {
        let join_type = if self.eat_keyword(Keyword::Inner) {
            JoinType::Inner
        } else if self.eat_keyword(Keyword::Left) {
            self.eat_keyword(Keyword::Outer);
            JoinType::Left
        } else if self.at_keyword(Keyword::Join) {
            JoinType::Inner
        } else {
            return Ok(None);
        };
        self.expect_keyword(Keyword::Join)?;
        Ok(Some(join_type))
    }

    fn update(&mut self) -> ParseResult<UpdateStatement> {
        let target = self.range_decl()?;
        self.expect_keyword(Keyword::Set)?;
        let mut assignments = Vec::new();
        loop {
            let path = self.path()?;
            self.expect(&TokenKind::Eq)?;
            let value = self.expr()?;
            assignments.push((path, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        let filter = self.where_clause()?;
        Ok(UpdateStatement {
            target,
            assignments,
            filter,
        })
    }

    fn delete(&mut self) -> ParseResult<DeleteStatement> {
        self.expect_keyword(Keyword::From)?;
        let target = self.range_decl()?;
        let filter = self.where_clause()?;
        Ok(DeleteStatement { target, filter })
    }

    fn where_clause(&mut self) -> ParseResult<Option<AstExpr>> {
        if self.eat_keyword(Keyword::Where) {
            self.expr().map(Some)
        } else {
            Ok(None)
        }
    }

    fn range_decl(&mut self) -> ParseResult<RangeDecl> {
        let offset = self.offset();
        let entity = self.ident("an entity name")?;
        let alias = match self.alias_opt()? {
            Some(alias) => alias,
            None => return Err(self.unexpected("an alias")),
        };
        Ok(RangeDecl {
            entity,
            alias,
            offset,
        })
    }

    fn alias_opt(&mut self) -> ParseResult<Option<String>> {
        if self.eat_keyword(Keyword::As) {
            return self.ident("an alias").map(Some);
        }
        match self.peek() {
            TokenKind::Ident(_) => self.ident("an alias").map(Some),
            _ => Ok(None),
        }
    }

    fn path(&mut self) -> ParseResult<PathExpr> {
        let offset = self.offset();
        let mut segments = vec![self.ident("a path")?];
        while self.eat(&TokenKind::Dot) {
            segments.push(self.segment()?);
        }
        Ok(PathExpr { segments, offset })
    }

    fn select_item(&mut self) -> ParseResult<SelectItem> {
        let offset = self.offset();
        let item = if self.eat_keyword(Keyword::New) {
            let mut type_name = self.ident("a type name")?;
            while self.eat(&TokenKind::Dot) {
                type_name.push('.');
                type_name.push_str(&self.segment()?);
            }
            self.expect(&TokenKind::LParen)?;
            let args = self.arguments()?;
            SelectItem::Constructor {
                type_name,
                args,
                offset,
            }
        } else {
            SelectItem::Expr(self.expr()?)
        };
        // Result variables are accepted and ignored.
        if self.eat_keyword(Keyword::As) {
            self.ident("a result variable")?;
        }
        Ok(item)
    }

    /// Comma-separated expressions up to and including `)`.
    fn arguments(&mut self) -> ParseResult<Vec<AstExpr>> {
        let mut args = Vec::new();
        if self.eat(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&TokenKind::RParen) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma)?;
        }
    }

    fn expr(&mut self) -> ParseResult<AstExpr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ParseResult<AstExpr> {
        let mut left = self.not_expr()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.not_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ParseResult<AstExpr> {
        if self.eat_keyword(Keyword::Not) {
            let expr = self.not_expr()?;
            return Ok(AstExpr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.predicate()
    }

    fn predicate(&mut self) -> ParseResult<AstExpr> {
        let left = self.additive()?;

        let comparison = match self.peek() {
            TokenKind::Eq => Some(BinaryOp::Eq),
            TokenKind::Ne => Some(BinaryOp::Ne),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = comparison {
            self.advance();
            let right = self.additive()?;
            return Ok(binary(op, left, right));
        }

        if self.eat_keyword(Keyword::Is) {
            let negated = self.eat_keyword(Keyword::Not);
            self.expect_keyword(Keyword::Null)?;
            return Ok(AstExpr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = matches!(self.peek(), TokenKind::Keyword(Keyword::Not, _))
            && matches!(
                self.peek_at(1),
                TokenKind::Keyword(Keyword::Like | Keyword::In | Keyword::Between, _)
            );
        if negated {
            self.advance();
        }

        if self.eat_keyword(Keyword::Like) {
            let pattern = self.additive()?;
            return Ok(AstExpr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }
        if self.eat_keyword(Keyword::In) {
            self.expect(&TokenKind::LParen)?;
            let list = self.arguments()?;
            if list.is_empty() {
                return Err(ParseError::syntax(self.offset(), "in list must not be empty"));
            }
            return Ok(AstExpr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        if self.eat_keyword(Keyword::Between) {
            let low = self.additive()?;
            self.expect_keyword(Keyword::And)?;
            let high = self.additive()?;
            return Ok(AstExpr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        Ok(left)
    }

    fn additive(&mut self) -> ParseResult<AstExpr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> ParseResult<AstExpr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> ParseResult<AstExpr> {
        if self.eat(&TokenKind::Minus) {
            if let TokenKind::Int(n) = *self.peek() {
                self.advance();
                return Ok(AstExpr::Int(-n));
            }
            let expr = self.unary()?;
            return Ok(AstExpr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        if self.eat(&TokenKind::Plus) {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult<AstExpr> {
        let offset = self.offset();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(AstExpr::Int(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(AstExpr::Str(s))
            }
            TokenKind::Param(name) => {
                self.advance();
                Ok(AstExpr::Param { name, offset })
            }
            TokenKind::Keyword(Keyword::True, _) => {
                self.advance();
                Ok(AstExpr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False, _) => {
                self.advance();
                Ok(AstExpr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null, _) => {
                self.advance();
                Ok(AstExpr::Null)
            }
            TokenKind::Keyword(Keyword::Case, _) => {
                self.advance();
                self.case_expr()
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Ident(name) if self.peek_at(1) == &TokenKind::LParen => {
                self.advance();
                self.advance();
                self.call(name, offset)
            }
            TokenKind::Ident(_) => self.path().map(AstExpr::Path),
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Parses the arguments of `name(`; the parenthesis is consumed.
    fn call(&mut self, name: String, offset: usize) -> ParseResult<AstExpr> {
        let name = name.to_ascii_lowercase();
        if name == "function" {
            let native = match self.advance() {
                TokenKind::Str(native) => native,
                _ => {
                    return Err(ParseError::syntax(
                        offset,
                        "function(...) needs the function name as a string literal",
                    ))
                }
            };
            let args = if self.eat(&TokenKind::Comma) {
                self.arguments()?
            } else {
                self.expect(&TokenKind::RParen)?;
                Vec::new()
            };
            return Ok(AstExpr::NativeCall {
                name: native.to_ascii_lowercase(),
                args,
            });
        }

        let distinct = self.eat_keyword(Keyword::Distinct);
        if self.eat(&TokenKind::Star) {
            self.expect(&TokenKind::RParen)?;
            return Ok(AstExpr::Call {
                name,
                args: Vec::new(),
                distinct,
                star: true,
                offset,
            });
        }
        let args = self.arguments()?;
        Ok(AstExpr::Call {
            name,
            args,
            distinct,
            star: false,
            offset,
        })
    }

    fn case_expr(&mut self) -> ParseResult<AstExpr> {
        if !self.at_keyword(Keyword::When) {
            return Err(if self.at_keyword(Keyword::End) {
                ParseError::malformed_case("case needs at least one when branch")
            } else {
                ParseError::malformed_case(
                    "only searched case expressions (case when <predicate> ...) are supported",
                )
            });
        }

        let mut branches = Vec::new();
        while self.eat_keyword(Keyword::When) {
            let condition = self.expr()?;
            if !self.eat_keyword(Keyword::Then) {
                return Err(ParseError::malformed_case("expected then after when condition"));
            }
            let result = self.expr()?;
            branches.push((condition, result));
        }

        let otherwise = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };

        if !self.eat_keyword(Keyword::End) {
            return Err(ParseError::malformed_case(format!(
                "missing end, found {}",
                self.peek()
            )));
        }
        Ok(AstExpr::Case {
            branches,
            otherwise,
        })
    }
}

fn binary(op: BinaryOp, left: AstExpr, right: AstExpr) -> AstExpr {
    AstExpr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
