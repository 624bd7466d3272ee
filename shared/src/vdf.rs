//! Parser for Valve's KeyValues text format
//!
//! Steam stores install state in this format (`appmanifest_*.acf`) and
//! `steamcmd +app_info_print` dumps app metadata in it. The parser keeps
//! entries in file order and looks keys up case-insensitively, which is how
//! Steam itself treats them. Platform conditionals (`[$WIN32]`) and `//`
//! comments are skipped.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum VdfError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unexpected '{found}' on line {line}")]
    UnexpectedToken { found: String, line: usize },
    #[error("unterminated string starting on line {line}")]
    UnterminatedString { line: usize },
    #[error("key \"{0}\" not found")]
    KeyNotFound(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Section(Section),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Section(_) => None,
        }
    }

    pub fn as_section(&self) -> Option<&Section> {
        match self {
            Value::Section(section) => Some(section),
            Value::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    entries: Vec<(String, Value)>,
}

impl Section {
    /// First entry whose key matches, ignoring ASCII case
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn section(&self, key: &str) -> Option<&Section> {
        self.get(key).and_then(Value::as_section)
    }

    /// Walks nested sections, e.g. `["AppState", "UserConfig", "betakey"]`
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut current = self;
        for key in parents {
            current = current.section(key)?;
        }
        current.get(last)
    }

    pub fn lookup_str(&self, path: &[&str]) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Parses a whole document into its top-level section
pub fn parse(input: &str) -> Result<Section, VdfError> {
    Parser::new(input).pairs(false, None)
}

/// Parses the single top-level entry that starts at the first `"key"`
///
/// Anything before the key and after its closing brace is ignored, so this
/// works on console output that wraps a KeyValues block in log noise.
pub fn parse_from_key(input: &str, key: &str) -> Result<Section, VdfError> {
    let needle = format!("\"{}\"", key);
    let start = input
        .find(&needle)
        .ok_or_else(|| VdfError::KeyNotFound(key.to_string()))?;
    Parser::new(&input[start..]).pairs(false, Some(1))
}

#[derive(Debug, PartialEq)]
enum Token {
    Text(String),
    Open,
    Close,
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, VdfError> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(None);
            };

            match c {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '/' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'/') {
                        self.skip_line();
                    } else {
                        return Ok(Some(Token::Text(self.bare(String::from("/")))));
                    }
                }
                '[' => self.skip_conditional(),
                '{' => {
                    self.chars.next();
                    return Ok(Some(Token::Open));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some(Token::Close));
                }
                '"' => {
                    self.chars.next();
                    return self.quoted().map(Some);
                }
                _ => return Ok(Some(Token::Text(self.bare(String::new())))),
            }
        }
    }

    fn quoted(&mut self) -> Result<Token, VdfError> {
        let start = self.line;
        let mut text = String::new();

        loop {
            match self.chars.next() {
                None => return Err(VdfError::UnterminatedString { line: start }),
                Some('"') => return Ok(Token::Text(text)),
                Some('\\') => match self.chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(other) => {
                        text.push('\\');
                        text.push(other);
                    }
                    None => return Err(VdfError::UnterminatedString { line: start }),
                },
                Some(c) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    text.push(c);
                }
            }
        }
    }

    fn bare(&mut self, mut text: String) -> String {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '{' || c == '}' || c == '"' {
                break;
            }
            text.push(c);
            self.chars.next();
        }
        text
    }

    fn skip_line(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.chars.next();
        }
    }

    fn skip_conditional(&mut self) {
        for c in self.chars.by_ref() {
            if c == ']' {
                break;
            }
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: Lexer::new(input),
        }
    }

    fn unexpected(&self, found: &str) -> VdfError {
        VdfError::UnexpectedToken {
            found: found.to_string(),
            line: self.lexer.line,
        }
    }

    fn pairs(&mut self, nested: bool, limit: Option<usize>) -> Result<Section, VdfError> {
        let mut section = Section::default();

        loop {
            if limit.is_some_and(|n| section.entries.len() >= n) {
                return Ok(section);
            }

            let key = match self.lexer.next_token()? {
                None if nested => return Err(VdfError::UnexpectedEof),
                None => return Ok(section),
                Some(Token::Close) if nested => return Ok(section),
                Some(Token::Close) => return Err(self.unexpected("}")),
                Some(Token::Open) => return Err(self.unexpected("{")),
                Some(Token::Text(key)) => key,
            };

            let value = match self.lexer.next_token()? {
                None => return Err(VdfError::UnexpectedEof),
                Some(Token::Text(text)) => Value::Text(text),
                Some(Token::Open) => Value::Section(self.pairs(true, None)?),
                Some(Token::Close) => return Err(self.unexpected("}")),
            };

            section.entries.push((key, value));
        }
    }
}
