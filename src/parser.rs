// S-expression front end: tokeniser and reader.
//
// The tokeniser turns source text into located tokens; the reader folds
// the tokens into a tree of cells. No byte sequence is rejected by the
// tokeniser - the only parse errors are paren mismatches, and those
// carry the offending span so they can be rendered against the source.

use std::fmt;

use regex::Regex;

use crate::util::pointer_message;


// Source location of a token or cell. Lines and columns are 0-based;
// end_column is inclusive of the last character. Tokens never span
// lines: a newline always ends the current token.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub first_line: usize,
    pub first_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub text: String,
    pub span: Span,
}


#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Root { cells: Vec<Cell> },
    List { cells: Vec<Cell>, span: Span },
    Symbol { text: String, span: Span },
    Number { text: String, span: Span },
}


impl Cell {
    pub fn span(&self) -> Span {
        match self {
            Cell::Root { .. } => Span::default(),
            Cell::List { span, .. } => *span,
            Cell::Symbol { span, .. } => *span,
            Cell::Number { span, .. } => *span,
        }
    }

    // The token text for atoms; lists and roots have none.
    pub fn text(&self) -> &str {
        match self {
            Cell::Symbol { text, .. } | Cell::Number { text, .. } => text,
            _ => "",
        }
    }
}


#[derive(Clone, Debug, PartialEq)]
pub enum ParseError {
    UnmatchedClose(Span),
    UnclosedOpen(Span),
}


impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnmatchedClose(span) => *span,
            ParseError::UnclosedOpen(span) => *span,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ParseError::UnmatchedClose(_) => "Extra closing parentheses",
            ParseError::UnclosedOpen(_) => "Opened parentheses not closed",
        }
    }

    // Full pointer diagnostic rendered against the original source.
    pub fn error_message(&self, text: &str) -> String {
        pointer_message(text, self.span(), self.message())
    }
}


impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Line {}: Error: {}",
            self.span().first_line + 1,
            self.message()
        )
    }
}


fn push_token(
    tokens: &mut Vec<Token>,
    tok: &mut String,
    start_line: usize,
    start_column: usize,
    line: usize,
) {
    if !tok.is_empty() {
        let span = Span {
            first_line: start_line,
            first_column: start_column,
            end_line: line,
            end_column: start_column + tok.chars().count() - 1,
        };
        tokens.push(Token {
            text: std::mem::replace(tok, String::new()),
            span,
        });
    }
}


// Convert source text to a list of located tokens. Whitespace, parens
// and `;` line comments end the current token; parens are themselves
// single-character tokens; comments run through (but not including)
// the next newline. Columns count unicode scalar values.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut tok = String::new();
    let mut line = 0;
    let mut column = 0;
    let mut start_line = 0;
    let mut start_column = 0;
    let mut in_comment = false;

    for c in text.chars() {
        if c == ';' {
            in_comment = true;
        } else if c == '\n' {
            push_token(&mut tokens, &mut tok, start_line, start_column, line);
            in_comment = false;
            line += 1;
            column = 0;
            continue;
        } else if in_comment {
            push_token(&mut tokens, &mut tok, start_line, start_column, line);
        } else if c == '(' || c == ')' {
            push_token(&mut tokens, &mut tok, start_line, start_column, line);
            tok.push(c);
            start_line = line;
            start_column = column;
            push_token(&mut tokens, &mut tok, start_line, start_column, line);
        } else if c.is_whitespace() {
            push_token(&mut tokens, &mut tok, start_line, start_column, line);
        } else {
            if tok.is_empty() {
                start_line = line;
                start_column = column;
            }
            tok.push(c);
        }
        column += 1;
    }
    push_token(&mut tokens, &mut tok, start_line, start_column, line);

    tokens
}


lazy_static! {
    // A token is a number iff it is INF, NAN, digit-prefixed, or a
    // minus sign followed by a digit. Everything else is a symbol.
    static ref NUMBER: Regex = Regex::new(r"^(INF|NAN|[0-9].*|-[0-9].*)$").unwrap();
}


fn atom(token: Token) -> Cell {
    let Token { text, span } = token;
    if NUMBER.is_match(&text) {
        Cell::Number { text, span }
    } else {
        Cell::Symbol { text, span }
    }
}


// Fold the token list into a rooted cell tree.
pub fn read(tokens: Vec<Token>) -> Result<Cell, ParseError> {
    let mut stack: Vec<(Vec<Cell>, Span)> = vec![(Vec::new(), Span::default())];

    for token in tokens {
        match token.text.as_str() {
            "(" => stack.push((Vec::new(), token.span)),
            ")" => {
                if stack.len() == 1 {
                    return Err(ParseError::UnmatchedClose(token.span));
                }
                let (cells, span) = stack.pop().unwrap();
                stack.last_mut().unwrap().0.push(Cell::List { cells, span });
            }
            _ => stack.last_mut().unwrap().0.push(atom(token)),
        }
    }

    if stack.len() > 1 {
        let (_, span) = stack.pop().unwrap();
        return Err(ParseError::UnclosedOpen(span));
    }
    let (cells, _) = stack.pop().unwrap();
    Ok(Cell::Root { cells })
}


pub fn parse(text: &str) -> Result<Cell, ParseError> {
    read(tokenize(text))
}
