//! Tokenizer for the source language.
//!
//! Unlike the parser, the lexer needs no symbol information — it turns raw
//! source text into a flat token stream. Block comments (`/* ... */`) nest,
//! so an unterminated inner comment is reported at the outermost opening
//! delimiter when the file runs out before every level closes.
//!
//! Tokenization is fail-fast: the first bad character, runaway identifier,
//! or oversized number aborts with a [`CompileError`] rather than collecting
//! a batch of errors to report together.

pub mod cursor;
pub mod token;

#[cfg(test)]
mod tests;

use crate::error::{CompileError, ErrorKind};
use cursor::Cursor;
use token::{Token, TokenKind, KEYWORD_TABLE};

const MAX_IDENTIFIER_LEN: usize = 16;

pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();

    loop {
        skip_whitespace_and_comments(&mut cursor)?;
        if cursor.is_at_end() {
            break;
        }
        tokens.push(lex_token(&mut cursor)?);
    }

    Ok(tokens)
}

fn skip_whitespace_and_comments(cursor: &mut Cursor) -> Result<(), CompileError> {
    loop {
        match cursor.peek() {
            Some(c) if c.is_whitespace() => {
                cursor.advance();
            }
            Some('/') if cursor.peek_at(1) == Some('*') => {
                let start_line = cursor.line();
                cursor.advance();
                cursor.advance();
                let mut depth = 1usize;
                loop {
                    if cursor.is_at_end() {
                        return Err(CompileError::lexer(
                            ErrorKind::UnterminatedComment,
                            "skip_whitespace_and_comments",
                            start_line,
                            "block comment was never closed",
                        ));
                    }
                    if cursor.peek() == Some('/') && cursor.peek_at(1) == Some('*') {
                        cursor.advance();
                        cursor.advance();
                        depth += 1;
                    } else if cursor.peek() == Some('*') && cursor.peek_at(1) == Some('/') {
                        cursor.advance();
                        cursor.advance();
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    } else {
                        cursor.advance();
                    }
                }
            }
            _ => break,
        }
    }
    Ok(())
}

fn lex_token(cursor: &mut Cursor) -> Result<Token, CompileError> {
    let line = cursor.line();
    let ch = cursor.peek().expect("lex_token called at end of input");

    if ch.is_ascii_digit() {
        return lex_number(cursor, line);
    }
    if ch.is_ascii_alphabetic() || ch == '_' {
        return lex_word(cursor, line);
    }
    lex_operator(cursor, line)
}

fn lex_number(cursor: &mut Cursor, line: usize) -> Result<Token, CompileError> {
    let mut raw = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_digit()) {
        raw.push(cursor.advance().unwrap());
    }

    match raw.parse::<i32>() {
        Ok(value) => Ok(Token::new(TokenKind::Number(value), raw, line)),
        Err(_) => Err(CompileError::lexer(
            ErrorKind::NumberTooLong,
            "lex_number",
            line,
            format!("number literal '{}' does not fit in a 32-bit integer", raw),
        )),
    }
}

fn lex_word(cursor: &mut Cursor, line: usize) -> Result<Token, CompileError> {
    let mut word = String::new();
    while matches!(cursor.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
        word.push(cursor.advance().unwrap());
        if word.len() > MAX_IDENTIFIER_LEN {
            return Err(CompileError::lexer(
                ErrorKind::IdentifierTooLong,
                "lex_word",
                line,
                format!(
                    "identifier '{}...' exceeds the {}-character limit",
                    &word[..MAX_IDENTIFIER_LEN],
                    MAX_IDENTIFIER_LEN
                ),
            ));
        }
    }

    // `int[]`/`bool[]` are keywords spelled with trailing brackets, but those
    // brackets never end up in `word` above (they aren't identifier
    // characters) — check for an immediately-following `[]` before falling
    // back to the plain `int`/`bool` keywords.
    if (word == "int" || word == "bool") && cursor.peek() == Some('[') && cursor.peek_at(1) == Some(']') {
        cursor.advance();
        cursor.advance();
        let kind = if word == "int" { TokenKind::IntArray } else { TokenKind::BoolArray };
        let lexeme = format!("{}[]", word);
        return Ok(Token::new(kind, lexeme, line));
    }

    for (lexeme, kind) in KEYWORD_TABLE {
        if *lexeme == word {
            return Ok(Token::new(kind.clone(), word, line));
        }
    }

    Ok(Token::new(TokenKind::Identifier(word.clone()), word, line))
}

fn lex_operator(cursor: &mut Cursor, line: usize) -> Result<Token, CompileError> {
    for (lexeme, kind) in KEYWORD_TABLE {
        if lexeme.bytes().next().map_or(false, |b| b.is_ascii_alphabetic()) {
            continue;
        }
        if matches_ahead(cursor, lexeme) {
            for _ in 0..lexeme.len() {
                cursor.advance();
            }
            return Ok(Token::new(kind.clone(), *lexeme, line));
        }
    }

    let ch = cursor.advance().unwrap();
    Err(CompileError::lexer(
        ErrorKind::UnknownCharacter,
        "lex_operator",
        line,
        format!("unexpected character '{}'", ch),
    ))
}

fn matches_ahead(cursor: &Cursor, lexeme: &str) -> bool {
    lexeme.chars().enumerate().all(|(i, c)| cursor.peek_at(i) == Some(c))
}
