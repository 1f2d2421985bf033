//! Script parser.
//!
//! A script is split into commands, each command into words, and each word
//! into parts that are substituted at evaluation time. Braced words are taken
//! literally; quoted and bare words may contain `$var`, `[script]` and
//! backslash substitutions.

use crate::error::Exception;
use crate::list::backslash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Part {
    Text(String),
    Var(String),
    Script(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Word(pub Vec<Part>);

pub(crate) type Command = Vec<Word>;

/// Where [`Parser::parse_parts`] stops.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Stop {
    /// End of a bare word: whitespace, `;` or end of input.
    Word,
    /// A closing character such as `"`; consumed.
    Char(char),
    /// End of input only.
    End,
}

pub(crate) struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn is_inline_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\x0b' | '\x0c')
}

impl Parser {
    pub(crate) fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub(crate) fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub(crate) fn parse_script(&mut self) -> Result<Vec<Command>, Exception> {
        let mut commands = Vec::new();
        loop {
            while let Some(c) = self.peek() {
                if c.is_whitespace() || c == ';' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            match self.peek() {
                None => break,
                Some('#') => self.skip_comment(),
                Some(_) => {
                    let command = self.parse_command()?;
                    if !command.is_empty() {
                        commands.push(command);
                    }
                }
            }
        }
        Ok(commands)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => self.pos += 1,
                '\n' => break,
                _ => {}
            }
        }
    }

    fn skip_inline_space(&mut self) {
        loop {
            match self.peek() {
                Some(c) if is_inline_space(c) => self.pos += 1,
                Some('\\') if self.peek_at(1) == Some('\n') => self.pos += 2,
                _ => break,
            }
        }
    }

    fn parse_command(&mut self) -> Result<Command, Exception> {
        let mut words = Vec::new();
        loop {
            self.skip_inline_space();
            match self.peek() {
                None => return Ok(words),
                Some('\n') | Some(';') => {
                    self.pos += 1;
                    return Ok(words);
                }
                Some(_) => words.push(self.parse_word()?),
            }
        }
    }

    fn expect_word_end(&self, what: &str) -> Result<(), Exception> {
        match self.peek() {
            None | Some('\n') | Some(';') => Ok(()),
            Some(c) if is_inline_space(c) => Ok(()),
            Some('\\') if self.peek_at(1) == Some('\n') => Ok(()),
            Some(_) => Err(Exception::error(format!(
                "extra characters after close-{}",
                what
            ))),
        }
    }

    fn parse_word(&mut self) -> Result<Word, Exception> {
        match self.peek() {
            Some('{') => {
                let text = self.parse_braced()?;
                self.expect_word_end("brace")?;
                Ok(Word(vec![Part::Text(text)]))
            }
            Some('"') => {
                self.pos += 1;
                let parts = self.parse_parts(Stop::Char('"'))?;
                self.expect_word_end("quote")?;
                Ok(Word(parts))
            }
            _ => Ok(Word(self.parse_parts(Stop::Word)?)),
        }
    }

    /// Parse a braced body starting at `{`; returns the text between the
    /// outer braces, unsubstituted.
    pub(crate) fn parse_braced(&mut self) -> Result<String, Exception> {
        debug_assert_eq!(self.peek(), Some('{'));
        self.pos += 1;
        let start = self.pos;
        let mut depth = 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 1,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let text: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(text);
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(Exception::error("missing close-brace"))
    }

    /// Parse a `[script]` starting at `[`; returns the inner script text.
    pub(crate) fn parse_bracketed(&mut self) -> Result<String, Exception> {
        self.pos += 1;
        let start = self.pos;
        let mut depth = 1;
        let mut braces = 0;
        while let Some(c) = self.peek() {
            match c {
                '\\' => self.pos += 1,
                '{' => braces += 1,
                '}' if braces > 0 => braces -= 1,
                '[' if braces == 0 => depth += 1,
                ']' if braces == 0 => {
                    depth -= 1;
                    if depth == 0 {
                        let text: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(text);
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(Exception::error("missing close-bracket"))
    }

    /// Parse a variable reference at `$`. Returns `None` (without consuming
    /// anything) when no name follows, in which case `$` is literal.
    pub(crate) fn parse_var_name(&mut self) -> Result<Option<String>, Exception> {
        let mut i = self.pos + 1;
        if self.chars.get(i) == Some(&'{') {
            i += 1;
            let start = i;
            while let Some(&c) = self.chars.get(i) {
                if c == '}' {
                    let name: String = self.chars[start..i].iter().collect();
                    self.pos = i + 1;
                    return Ok(Some(name));
                }
                i += 1;
            }
            return Err(Exception::error("missing close-brace for variable name"));
        }

        let start = i;
        loop {
            match self.chars.get(i) {
                Some(c) if c.is_alphanumeric() || *c == '_' => i += 1,
                Some(':') if self.chars.get(i + 1) == Some(&':') => i += 2,
                _ => break,
            }
        }
        if i == start {
            return Ok(None);
        }
        let name: String = self.chars[start..i].iter().collect();
        self.pos = i;
        Ok(Some(name))
    }

    pub(crate) fn parse_parts(&mut self, stop: Stop) -> Result<Vec<Part>, Exception> {
        let mut parts = Vec::new();
        let mut text = String::new();

        fn flush(text: &mut String, parts: &mut Vec<Part>) {
            if !text.is_empty() {
                parts.push(Part::Text(std::mem::take(text)));
            }
        }

        loop {
            let Some(c) = self.peek() else {
                if let Stop::Char(close) = stop {
                    return Err(Exception::error(format!("missing {}", close)));
                }
                break;
            };

            match stop {
                Stop::Char(close) if c == close => {
                    self.pos += 1;
                    break;
                }
                Stop::Word if is_inline_space(c) || c == '\n' || c == ';' => break,
                _ => {}
            }

            match c {
                '\\' => {
                    if matches!(stop, Stop::Word) && self.peek_at(1) == Some('\n') {
                        break;
                    }
                    let (decoded, consumed) = backslash(&self.chars, self.pos + 1);
                    text.push_str(&decoded);
                    self.pos += 1 + consumed;
                }
                '$' => match self.parse_var_name()? {
                    Some(name) => {
                        flush(&mut text, &mut parts);
                        parts.push(Part::Var(name));
                    }
                    None => {
                        text.push('$');
                        self.pos += 1;
                    }
                },
                '[' => {
                    flush(&mut text, &mut parts);
                    let script = self.parse_bracketed()?;
                    parts.push(Part::Script(script));
                }
                other => {
                    text.push(other);
                    self.pos += 1;
                }
            }
        }

        flush(&mut text, &mut parts);
        Ok(parts)
    }
}

/// Parse a whole script into commands.
pub(crate) fn parse_script(src: &str) -> Result<Vec<Command>, Exception> {
    Parser::new(src).parse_script()
}
