// Statement Translation
// Rewrites `?`-placeholder statements into T-SQL with named parameters.
//
// The statement is split into a restricted token stream (words, quoted
// identifiers, string literals, comments, punctuation, placeholders) and only
// two shapes are rewritten:
//   GROUP_CONCAT(expr)                      -> STRING_AGG(CAST(expr AS NVARCHAR(MAX)), ', ')
//   INSERT INTO t (cols) VALUES (vals) [;]  -> INSERT INTO t (cols) OUTPUT INSERTED.id VALUES (vals)
// Everything else passes through byte-for-byte apart from placeholder substitution.

use crate::db::params::{ParameterBinding, SqlParam};
use std::borrow::Cow;
use thiserror::Error;

/// Column returned by the identity rewrite and read back as `insert_id`
pub const IDENTITY_COLUMN: &str = "id";

const AGGREGATE_SEPARATOR: &str = "', '";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Statement has {placeholders} placeholder(s) but {params} parameter(s) were supplied")]
    PlaceholderMismatch { placeholders: usize, params: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    QuotedIdent,
    StringLit,
    Comment,
    Whitespace,
    Placeholder,
    Punct,
    /// Text produced by a rewrite; never inspected again
    Synthetic,
}

#[derive(Debug, Clone)]
struct Token<'a> {
    kind: TokenKind,
    text: Cow<'a, str>,
}

impl<'a> Token<'a> {
    fn borrowed(kind: TokenKind, text: &'a str) -> Self {
        Self {
            kind,
            text: Cow::Borrowed(text),
        }
    }

    fn synthetic(text: String) -> Self {
        Self {
            kind: TokenKind::Synthetic,
            text: Cow::Owned(text),
        }
    }

    fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '@' | '#' | '$')
}

/// Byte offset just past a quoted run starting at `start` (which holds the opening quote).
/// A doubled closing quote is an escape. Unterminated runs extend to the end of input.
fn scan_quoted(sql: &str, start: usize, close: char) -> usize {
    let bytes = sql.as_bytes();
    let close = close as u8;
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if i + 1 < bytes.len() && bytes[i + 1] == close {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let rest = &sql[start..];
        let (kind, end) = if c.is_whitespace() {
            let len = rest
                .find(|ch: char| !ch.is_whitespace())
                .unwrap_or(rest.len());
            (TokenKind::Whitespace, start + len)
        } else if rest.starts_with("--") {
            let len = rest.find('\n').unwrap_or(rest.len());
            (TokenKind::Comment, start + len)
        } else if rest.starts_with("/*") {
            let len = rest[2..].find("*/").map(|i| i + 4).unwrap_or(rest.len());
            (TokenKind::Comment, start + len)
        } else if c == '\'' {
            (TokenKind::StringLit, scan_quoted(sql, start, '\''))
        } else if (c == 'N' || c == 'n') && rest[1..].starts_with('\'') {
            (TokenKind::StringLit, scan_quoted(sql, start + 1, '\''))
        } else if c == '[' {
            (TokenKind::QuotedIdent, scan_quoted(sql, start, ']'))
        } else if c == '"' {
            (TokenKind::QuotedIdent, scan_quoted(sql, start, '"'))
        } else if c == '?' {
            (TokenKind::Placeholder, start + 1)
        } else if is_word_char(c) {
            let len = rest.find(|ch: char| !is_word_char(ch)).unwrap_or(rest.len());
            (TokenKind::Word, start + len)
        } else {
            (TokenKind::Punct, start + c.len_utf8())
        };

        tokens.push(Token::borrowed(kind, &sql[start..end]));
        while chars.peek().map_or(false, |&(i, _)| i < end) {
            chars.next();
        }
    }

    tokens
}

/// Index of the next non-trivia token at or after `from`
fn next_significant(tokens: &[Token<'_>], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// Index of the `)` matching the `(` at `open`
fn matching_paren(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// MySQL-only modifiers that have no place inside a single STRING_AGG argument
const AGGREGATE_MODIFIERS: &[&str] = &["DISTINCT", "SEPARATOR", "ORDER"];

/// True when `tokens` is one expression: non-empty, no top-level comma, no DISTINCT/SEPARATOR/ORDER BY
fn is_single_argument(tokens: &[Token<'_>]) -> bool {
    let mut depth = 0usize;
    let mut significant = 0usize;
    for token in tokens {
        if token.is_trivia() {
            continue;
        }
        significant += 1;
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth = depth.saturating_sub(1);
        } else if depth == 0
            && (token.is_punct(",") || AGGREGATE_MODIFIERS.iter().any(|kw| token.is_word(kw)))
        {
            return false;
        }
    }
    significant > 0
}

/// Re-emit a comment; a `--` comment needs its line ended before synthetic text follows it
fn push_comment<'a>(out: &mut Vec<Token<'a>>, comment: &Token<'a>) {
    out.push(comment.clone());
    if comment.text.starts_with("--") {
        out.push(Token::synthetic("\n".to_string()));
    }
}

/// GROUP_CONCAT(expr) -> STRING_AGG(CAST(expr AS NVARCHAR(MAX)), ', ')
fn rewrite_group_concat<'a>(tokens: Vec<Token<'a>>) -> (Vec<Token<'a>>, usize) {
    let mut out = Vec::with_capacity(tokens.len());
    let mut rewrites = 0;
    let mut i = 0;

    while i < tokens.len() {
        if tokens[i].is_word("GROUP_CONCAT") {
            let call = next_significant(&tokens, i + 1)
                .filter(|&open| tokens[open].is_punct("("))
                .and_then(|open| matching_paren(&tokens, open).map(|close| (open, close)));

            if let Some((open, close)) = call {
                let arg = &tokens[open + 1..close];
                if is_single_argument(arg) {
                    // Only surrounding whitespace is dropped; comments stay in place
                    let first = arg
                        .iter()
                        .position(|t| t.kind != TokenKind::Whitespace)
                        .unwrap_or(0);
                    let last = arg
                        .iter()
                        .rposition(|t| t.kind != TokenKind::Whitespace)
                        .unwrap_or(0);

                    out.push(Token::synthetic("STRING_AGG".to_string()));
                    for token in &tokens[i + 1..open] {
                        if token.kind == TokenKind::Comment {
                            push_comment(&mut out, token);
                        }
                    }
                    out.push(Token::synthetic("(CAST(".to_string()));
                    for token in &arg[first..=last] {
                        if token.kind == TokenKind::Comment {
                            push_comment(&mut out, token);
                        } else {
                            out.push(token.clone());
                        }
                    }
                    out.push(Token::synthetic(format!(
                        " AS NVARCHAR(MAX)), {})",
                        AGGREGATE_SEPARATOR
                    )));
                    rewrites += 1;
                    i = close + 1;
                    continue;
                }
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }

    (out, rewrites)
}

/// Position right after the column list of a single-row `INSERT INTO t (cols) VALUES (vals)`
fn single_row_insert_anchor(tokens: &[Token<'_>]) -> Option<usize> {
    let sig: Vec<usize> = (0..tokens.len()).filter(|&i| !tokens[i].is_trivia()).collect();
    let at = |n: usize| sig.get(n).map(|&i| &tokens[i]);

    if !at(0)?.is_word("INSERT") || !at(1)?.is_word("INTO") {
        return None;
    }

    // Table name: identifier parts separated by dots, e.g. users or [dbo].[users]
    let mut n = 2;
    loop {
        let part = at(n)?;
        if !matches!(part.kind, TokenKind::Word | TokenKind::QuotedIdent) || part.is_word("VALUES") {
            return None;
        }
        n += 1;
        if at(n)?.is_punct(".") {
            n += 1;
        } else {
            break;
        }
    }

    if !at(n)?.is_punct("(") {
        return None;
    }
    let cols_close = matching_paren(tokens, sig[n])?;
    let mut rest = sig.iter().skip_while(|&&i| i <= cols_close).copied();

    let values = rest.next()?;
    if !tokens[values].is_word("VALUES") {
        return None;
    }
    let values_open = rest.next()?;
    if !tokens[values_open].is_punct("(") {
        return None;
    }
    let values_close = matching_paren(tokens, values_open)?;

    // Nothing may follow but an optional terminator; `, (...)` means multi-row
    let mut tail = sig.iter().skip_while(|&&i| i <= values_close).copied();
    match tail.next() {
        None => {}
        Some(i) if tokens[i].is_punct(";") => {
            if tail.next().is_some() {
                return None;
            }
        }
        Some(_) => return None,
    }

    Some(cols_close + 1)
}

fn rewrite_insert_identity<'a>(mut tokens: Vec<Token<'a>>) -> (Vec<Token<'a>>, bool) {
    match single_row_insert_anchor(&tokens) {
        Some(anchor) => {
            let spacer = match tokens.get(anchor) {
                Some(t) if t.kind == TokenKind::Whitespace => "",
                _ => " ",
            };
            tokens.insert(
                anchor,
                Token::synthetic(format!(" OUTPUT INSERTED.{}{}", IDENTITY_COLUMN, spacer)),
            );
            (tokens, true)
        }
        None => (tokens, false),
    }
}

/// A statement ready for the backend
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedStatement {
    pub sql: String,
    pub bindings: Vec<ParameterBinding>,
    /// The identity rewrite was applied; the first row carries the new id
    pub returns_identity: bool,
    /// Number of GROUP_CONCAT calls rewritten
    pub aggregate_rewrites: usize,
}

impl TranslatedStatement {
    /// Statement already written in T-SQL with `@P1..@Pn` names; no rewriting is applied
    pub fn raw(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            bindings: params
                .into_iter()
                .enumerate()
                .map(|(i, value)| ParameterBinding::new(i, value))
                .collect(),
            returns_identity: false,
            aggregate_rewrites: 0,
        }
    }
}

/// Number of genuine `?` markers, ignoring those inside literals, quoted identifiers and comments
pub fn count_placeholders(sql: &str) -> usize {
    tokenize(sql)
        .iter()
        .filter(|t| t.kind == TokenKind::Placeholder)
        .count()
}

/// Translate a `?`-placeholder statement into T-SQL with bound parameters
pub fn translate(sql: &str, params: &[SqlParam]) -> Result<TranslatedStatement, TranslateError> {
    let tokens = tokenize(sql);

    let placeholders = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Placeholder)
        .count();
    if placeholders != params.len() {
        return Err(TranslateError::PlaceholderMismatch {
            placeholders,
            params: params.len(),
        });
    }

    let (tokens, aggregate_rewrites) = rewrite_group_concat(tokens);
    let (tokens, returns_identity) = rewrite_insert_identity(tokens);

    let mut out = String::with_capacity(sql.len() + 32);
    let mut bindings = Vec::with_capacity(params.len());
    for token in &tokens {
        if token.kind == TokenKind::Placeholder {
            let binding = ParameterBinding::new(bindings.len(), params[bindings.len()].clone());
            out.push_str(&binding.name);
            bindings.push(binding);
        } else {
            out.push_str(&token.text);
        }
    }

    Ok(TranslatedStatement {
        sql: out,
        bindings,
        returns_identity,
        aggregate_rewrites,
    })
}
