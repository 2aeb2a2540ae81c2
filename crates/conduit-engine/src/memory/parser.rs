//! Parser for the in-memory driver's SQL subset.
//!
//! Supported: `CREATE TABLE`, `DROP TABLE`, single-row `INSERT`, `SELECT`
//! (column list, `*` or `COUNT(*)`; optional `FROM`, `WHERE`, `ORDER BY`,
//! `LIMIT`), `UPDATE` and `DELETE`. Placeholders are `?`.

use conduit_common::Value;

use super::lexer::{Lexer, Token};
use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Ast {
    Column(String),
    Literal(Value),
    Param(usize),
    Compare(Box<Ast>, CmpOp, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Not(Box<Ast>),
    IsNull(Box<Ast>, bool),
    InList(Box<Ast>, Vec<Ast>, bool),
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Projection {
    All,
    CountAll,
    Exprs(Vec<Ast>),
}

#[derive(Clone, Debug, PartialEq)]
pub(super) enum Stmt {
    CreateTable {
        name: String,
        columns: Vec<String>,
    },
    DropTable {
        name: String,
    },
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Ast>,
    },
    Select {
        projection: Projection,
        from: Option<String>,
        filter: Option<Ast>,
        order_by: Vec<(String, bool)>,
        limit: Option<Ast>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Ast)>,
        filter: Option<Ast>,
    },
    Delete {
        table: String,
        filter: Option<Ast>,
    },
}

/// Parses one statement.
pub(super) fn parse(sql: &str) -> EngineResult<Stmt> {
    let tokens = Lexer::new(sql).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        params: 0,
    };
    let stmt = parser.statement()?;
    parser.next_if(|t| *t == Token::Semicolon);
    if let Some(token) = parser.peek() {
        return Err(parse_error(format!("unexpected token {token:?}")));
    }
    Ok(stmt)
}

fn parse_error(msg: impl Into<String>) -> EngineError {
    EngineError::Driver(format!("syntax error: {}", msg.into()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    params: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> EngineResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| parse_error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn next_if(&mut self, predicate: impl Fn(&Token) -> bool) -> Option<Token> {
        let token = self.peek().filter(|t| predicate(t))?.clone();
        self.pos += 1;
        Some(token)
    }

    fn next_if_keyword(&mut self, keyword: &str) -> bool {
        self.next_if(|t| t.is_keyword(keyword)).is_some()
    }

    fn expect(&mut self, expected: Token) -> EngineResult<()> {
        match self.next()? {
            token if token == expected => Ok(()),
            token => Err(parse_error(format!("expected {expected:?}, found {token:?}"))),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> EngineResult<()> {
        if self.next_if_keyword(keyword) {
            Ok(())
        } else {
            Err(parse_error(format!("expected {keyword}")))
        }
    }

    fn ident(&mut self) -> EngineResult<String> {
        match self.next()? {
            Token::Ident(ident) => Ok(ident),
            token => Err(parse_error(format!("expected identifier, found {token:?}"))),
        }
    }

    /// Parses a possibly schema-qualified name.
    fn name(&mut self) -> EngineResult<String> {
        let mut name = self.ident()?;
        while self.next_if(|t| *t == Token::Period).is_some() {
            name.push('.');
            name.push_str(&self.ident()?);
        }
        Ok(name)
    }

    fn statement(&mut self) -> EngineResult<Stmt> {
        if self.next_if_keyword("SELECT") {
            self.select()
        } else if self.next_if_keyword("INSERT") {
            self.insert()
        } else if self.next_if_keyword("UPDATE") {
            self.update()
        } else if self.next_if_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.name()?;
            let filter = self.filter()?;
            Ok(Stmt::Delete { table, filter })
        } else if self.next_if_keyword("CREATE") {
            self.expect_keyword("TABLE")?;
            let name = self.name()?;
            self.expect(Token::OpenParen)?;
            let mut columns = Vec::new();
            loop {
                columns.push(self.ident()?);
                // Column types are accepted and ignored.
                while self.next_if(|t| matches!(t, Token::Ident(_))).is_some() {}
                if self.next_if(|t| *t == Token::OpenParen).is_some() {
                    while self
                        .next_if(|t| matches!(t, Token::Number(_) | Token::Comma))
                        .is_some()
                    {}
                    self.expect(Token::CloseParen)?;
                }
                if self.next_if(|t| *t == Token::Comma).is_none() {
                    break;
                }
            }
            self.expect(Token::CloseParen)?;
            Ok(Stmt::CreateTable { name, columns })
        } else if self.next_if_keyword("DROP") {
            self.expect_keyword("TABLE")?;
            Ok(Stmt::DropTable { name: self.name()? })
        } else {
            Err(parse_error(format!("unsupported statement {:?}", self.peek())))
        }
    }

    fn select(&mut self) -> EngineResult<Stmt> {
        let projection = if self.next_if(|t| *t == Token::Asterisk).is_some() {
            Projection::All
        } else if self.peek().is_some_and(|t| t.is_keyword("COUNT")) {
            self.pos += 1;
            self.expect(Token::OpenParen)?;
            self.expect(Token::Asterisk)?;
            self.expect(Token::CloseParen)?;
            Projection::CountAll
        } else {
            let mut exprs = vec![self.expr()?];
            while self.next_if(|t| *t == Token::Comma).is_some() {
                exprs.push(self.expr()?);
            }
            Projection::Exprs(exprs)
        };

        let from = if self.next_if_keyword("FROM") {
            Some(self.name()?)
        } else {
            None
        };
        let filter = self.filter()?;

        let mut order_by = Vec::new();
        if self.next_if_keyword("ORDER") {
            self.expect_keyword("BY")?;
            loop {
                let column = self.name()?;
                let desc = if self.next_if_keyword("DESC") {
                    true
                } else {
                    self.next_if_keyword("ASC");
                    false
                };
                order_by.push((column, desc));
                if self.next_if(|t| *t == Token::Comma).is_none() {
                    break;
                }
            }
        }

        let limit = if self.next_if_keyword("LIMIT") {
            Some(self.expr()?)
        } else {
            None
        };

        Ok(Stmt::Select {
            projection,
            from,
            filter,
            order_by,
            limit,
        })
    }

    fn insert(&mut self) -> EngineResult<Stmt> {
        self.expect_keyword("INTO")?;
        let table = self.name()?;
        self.expect(Token::OpenParen)?;
        let mut columns = vec![self.ident()?];
        while self.next_if(|t| *t == Token::Comma).is_some() {
            columns.push(self.ident()?);
        }
        self.expect(Token::CloseParen)?;
        self.expect_keyword("VALUES")?;
        self.expect(Token::OpenParen)?;
        let mut values = vec![self.expr()?];
        while self.next_if(|t| *t == Token::Comma).is_some() {
            values.push(self.expr()?);
        }
        self.expect(Token::CloseParen)?;
        if columns.len() != values.len() {
            return Err(parse_error("INSERT column and value counts differ"));
        }
        Ok(Stmt::Insert {
            table,
            columns,
            values,
        })
    }

    fn update(&mut self) -> EngineResult<Stmt> {
        let table = self.name()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            self.expect(Token::Equals)?;
            assignments.push((column, self.expr()?));
            if self.next_if(|t| *t == Token::Comma).is_none() {
                break;
            }
        }
        let filter = self.filter()?;
        Ok(Stmt::Update {
            table,
            assignments,
            filter,
        })
    }

    fn filter(&mut self) -> EngineResult<Option<Ast>> {
        if self.next_if_keyword("WHERE") {
            Ok(Some(self.expr()?))
        } else {
            Ok(None)
        }
    }

    fn expr(&mut self) -> EngineResult<Ast> {
        let mut left = self.and_expr()?;
        while self.next_if_keyword("OR") {
            left = Ast::Or(Box::new(left), Box::new(self.and_expr()?));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> EngineResult<Ast> {
        let mut left = self.not_expr()?;
        while self.next_if_keyword("AND") {
            left = Ast::And(Box::new(left), Box::new(self.not_expr()?));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> EngineResult<Ast> {
        if self.next_if_keyword("NOT") {
            return Ok(Ast::Not(Box::new(self.not_expr()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> EngineResult<Ast> {
        let left = self.operand()?;

        if self.next_if_keyword("IS") {
            let negated = self.next_if_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Ast::IsNull(Box::new(left), negated));
        }

        let negated = self.next_if_keyword("NOT");
        if self.next_if_keyword("IN") {
            self.expect(Token::OpenParen)?;
            let mut list = vec![self.operand()?];
            while self.next_if(|t| *t == Token::Comma).is_some() {
                list.push(self.operand()?);
            }
            self.expect(Token::CloseParen)?;
            return Ok(Ast::InList(Box::new(left), list, negated));
        }
        if negated {
            return Err(parse_error("expected IN after NOT"));
        }

        let op = match self.peek() {
            Some(Token::Equals) => CmpOp::Eq,
            Some(Token::NotEquals) => CmpOp::NotEq,
            Some(Token::LessThan) => CmpOp::Lt,
            Some(Token::LessOrEqual) => CmpOp::LtEq,
            Some(Token::GreaterThan) => CmpOp::Gt,
            Some(Token::GreaterOrEqual) => CmpOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.operand()?;
        Ok(Ast::Compare(Box::new(left), op, Box::new(right)))
    }

    fn operand(&mut self) -> EngineResult<Ast> {
        match self.next()? {
            Token::OpenParen => {
                let inner = self.expr()?;
                self.expect(Token::CloseParen)?;
                Ok(inner)
            }
            Token::Question => {
                self.params += 1;
                Ok(Ast::Param(self.params - 1))
            }
            Token::String(s) => Ok(Ast::Literal(Value::String(s))),
            Token::Number(n) => {
                let value = if n.contains('.') {
                    n.parse::<f64>().map(Value::Float).ok()
                } else {
                    n.parse::<i64>().map(Value::Integer).ok()
                };
                value
                    .map(Ast::Literal)
                    .ok_or_else(|| parse_error(format!("invalid number {n}")))
            }
            Token::Ident(ident) if ident.eq_ignore_ascii_case("NULL") => {
                Ok(Ast::Literal(Value::Null))
            }
            Token::Ident(ident) if ident.eq_ignore_ascii_case("TRUE") => {
                Ok(Ast::Literal(Value::Boolean(true)))
            }
            Token::Ident(ident) if ident.eq_ignore_ascii_case("FALSE") => {
                Ok(Ast::Literal(Value::Boolean(false)))
            }
            Token::Ident(ident) => {
                let mut name = ident;
                while self.next_if(|t| *t == Token::Period).is_some() {
                    name.push('.');
                    name.push_str(&self.ident()?);
                }
                Ok(Ast::Column(name))
            }
            token => Err(parse_error(format!("unexpected token {token:?}"))),
        }
    }
}
