//! Tokenizer for the in-memory driver's SQL subset.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{EngineError, EngineResult};

/// A lexer token.
#[derive(Clone, Debug, PartialEq)]
pub(super) enum Token {
    Number(String),
    String(String),
    Ident(String),
    Period,
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Asterisk,
    Question,
    OpenParen,
    CloseParen,
    Comma,
    Semicolon,
}

impl Token {
    /// Returns true if the token is the given keyword, case-insensitively.
    pub(super) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(ident) if ident.eq_ignore_ascii_case(keyword))
    }
}

pub(super) struct Lexer<'a> {
    iter: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub(super) fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            iter: input.chars().peekable(),
        }
    }

    /// Tokenizes the whole input.
    pub(super) fn tokenize(mut self) -> EngineResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.scan()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_if<F: Fn(char) -> bool>(&mut self, predicate: F) -> Option<char> {
        self.iter.peek().filter(|&c| predicate(*c))?;
        self.iter.next()
    }

    fn next_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> String {
        let mut value = String::new();
        while let Some(c) = self.next_if(&predicate) {
            value.push(c)
        }
        value
    }

    fn scan(&mut self) -> EngineResult<Option<Token>> {
        self.next_while(char::is_whitespace);
        match self.iter.peek().copied() {
            Some('\'') => self.scan_string().map(Some),
            Some(c) if c.is_ascii_digit() => Ok(Some(self.scan_number(String::new()))),
            Some(c) if c.is_alphabetic() || c == '_' => Ok(Some(self.scan_ident())),
            Some('-') => {
                self.iter.next();
                if self.iter.peek().is_some_and(char::is_ascii_digit) {
                    Ok(Some(self.scan_number("-".to_string())))
                } else {
                    Err(EngineError::Driver("unexpected character -".to_string()))
                }
            }
            Some(c) => self.scan_symbol(c).map(Some),
            None => Ok(None),
        }
    }

    fn scan_ident(&mut self) -> Token {
        Token::Ident(self.next_while(|c| c.is_alphanumeric() || c == '_'))
    }

    fn scan_number(&mut self, mut num: String) -> Token {
        num.push_str(&self.next_while(|c| c.is_ascii_digit()));
        if let Some(sep) = self.next_if(|c| c == '.') {
            num.push(sep);
            num.push_str(&self.next_while(|c| c.is_ascii_digit()));
        }
        Token::Number(num)
    }

    fn scan_string(&mut self) -> EngineResult<Token> {
        self.iter.next();
        let mut s = String::new();
        loop {
            match self.iter.next() {
                Some('\'') => {
                    if let Some(c) = self.next_if(|c| c == '\'') {
                        s.push(c)
                    } else {
                        break;
                    }
                }
                Some(c) => s.push(c),
                None => {
                    return Err(EngineError::Driver(
                        "unexpected end of string literal".to_string(),
                    ))
                }
            }
        }
        Ok(Token::String(s))
    }

    fn scan_symbol(&mut self, c: char) -> EngineResult<Token> {
        self.iter.next();
        let token = match c {
            '.' => Token::Period,
            '=' => Token::Equals,
            '*' => Token::Asterisk,
            '?' => Token::Question,
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '!' if self.next_if(|c| c == '=').is_some() => Token::NotEquals,
            '<' if self.next_if(|c| c == '=').is_some() => Token::LessOrEqual,
            '<' if self.next_if(|c| c == '>').is_some() => Token::NotEquals,
            '<' => Token::LessThan,
            '>' if self.next_if(|c| c == '=').is_some() => Token::GreaterOrEqual,
            '>' => Token::GreaterThan,
            c => return Err(EngineError::Driver(format!("unexpected character {c}"))),
        };
        Ok(token)
    }
}
