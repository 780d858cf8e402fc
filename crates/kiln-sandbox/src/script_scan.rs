//! Lexical scan of inline scripts
//!
//! Scripts are never evaluated. The loader only checks that each one would get past
//! the tokenizer: balanced brackets, terminated strings, comments and template
//! literals. A fault here is what a browser would report as a load-time SyntaxError.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RENDERS: Regex = Regex::new(
        r"createElement(?:NS)?\s*\(|\.(?:inner|outer)HTML\s*\+?=[^=]|insertAdjacent(?:HTML|Element)\s*\(|\.(?:appendChild|append|prepend|replaceChildren|replaceWith|insertBefore|cloneNode)\s*\(|document\.write(?:ln)?\s*\("
    )
    .unwrap();
}

/// First syntax fault found in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFault {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

enum Frame {
    /// Open bracket, its line, and whether it opens an `if (...)`-style header
    Bracket(char, usize, bool),
    /// `${` inside a template literal
    Template(usize),
}

const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "yield", "await",
];

/// A regex may directly follow the `)` closing these statement headers
const HEADER_KEYWORDS: &[&str] = &["if", "while", "for", "with"];

struct Scanner<'a> {
    chars: &'a [char],
    pos: usize,
    line: usize,
    stack: Vec<Frame>,
    /// Last significant char; `a` stands for an identifier or literal
    last: Option<char>,
    last_word: String,
    /// `last` is a `)` that closed a statement header
    after_header: bool,
}

impl<'a> Scanner<'a> {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn fault(&self, message: impl Into<String>, line: usize) -> ScriptFault {
        ScriptFault {
            message: message.into(),
            line,
        }
    }

    fn regex_allowed(&self) -> bool {
        match self.last {
            None => true,
            Some('a') => REGEX_KEYWORDS.contains(&self.last_word.as_str()),
            Some(')') => self.after_header,
            Some(c) => "(,=:[!&|?{};+-*%<>~^".contains(c),
        }
    }

    fn run(mut self) -> Result<(), ScriptFault> {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                '/' if self.peek(1) == Some('/') => {
                    while let Some(c) = self.peek(0) {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '/' if self.peek(1) == Some('*') => self.block_comment()?,
                '\'' | '"' => {
                    self.string(c)?;
                    self.mark_value();
                }
                '`' => {
                    self.pos += 1;
                    if self.template()? {
                        self.mark_value();
                    }
                }
                '(' | '[' | '{' => {
                    let header = c == '('
                        && self.last == Some('a')
                        && HEADER_KEYWORDS.contains(&self.last_word.as_str());
                    self.stack.push(Frame::Bracket(c, self.line, header));
                    self.pos += 1;
                    self.mark(c);
                }
                ')' | ']' | '}' => {
                    match self.stack.pop() {
                        Some(Frame::Bracket(open, _, header)) if closes(open, c) => {
                            self.pos += 1;
                            self.mark(c);
                            self.after_header = header;
                        }
                        Some(Frame::Template(_)) if c == '}' => {
                            self.pos += 1;
                            if self.template()? {
                                self.mark_value();
                            }
                        }
                        _ => return Err(self.fault(format!("Unexpected token '{}'", c), self.line)),
                    }
                }
                '/' => {
                    if self.regex_allowed() {
                        self.regex();
                        self.mark_value();
                    } else {
                        self.pos += 1;
                        self.mark('/');
                    }
                }
                c if is_ident(c) => {
                    let start = self.pos;
                    while self.peek(0).map(is_ident).unwrap_or(false) {
                        self.pos += 1;
                    }
                    self.last_word = self.chars[start..self.pos].iter().collect();
                    self.last = Some('a');
                    self.after_header = false;
                }
                c => {
                    self.pos += 1;
                    self.mark(c);
                }
            }
        }

        match self.stack.last() {
            Some(Frame::Bracket(open, line, _)) => Err(self.fault(
                format!("Unexpected end of input ('{}' opened on line {} is never closed)", open, line),
                self.line,
            )),
            Some(Frame::Template(line)) => Err(self.fault(
                format!("Unterminated template literal (opened on line {})", line),
                self.line,
            )),
            None => Ok(()),
        }
    }

    fn mark(&mut self, c: char) {
        self.last = Some(c);
        self.last_word.clear();
        self.after_header = false;
    }

    fn mark_value(&mut self) {
        self.last = Some('a');
        self.last_word.clear();
        self.after_header = false;
    }

    fn block_comment(&mut self) -> Result<(), ScriptFault> {
        let start = self.line;
        self.pos += 2;
        loop {
            match self.peek(0) {
                None => return Err(self.fault("Unterminated comment", start)),
                Some('*') if self.peek(1) == Some('/') => {
                    self.pos += 2;
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ScriptFault> {
        let start = self.line;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None | Some('\n') => return Err(self.fault("Invalid or unexpected token", start)),
                Some('\\') => {
                    if self.peek(1) == Some('\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Scan template text up to the closing backtick (`true`) or the next `${`
    fn template(&mut self) -> Result<bool, ScriptFault> {
        let start = self.line;
        loop {
            match self.peek(0) {
                None => {
                    return Err(self.fault("Unterminated template literal", start));
                }
                Some('\\') => self.pos += 2,
                Some('`') => {
                    self.pos += 1;
                    return Ok(true);
                }
                Some('$') if self.peek(1) == Some('{') => {
                    self.pos += 2;
                    self.stack.push(Frame::Template(self.line));
                    self.mark('{');
                    return Ok(false);
                }
                Some('\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Regex literal; a line break before the closing slash means it was division
    fn regex(&mut self) {
        let restart = self.pos + 1;
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    self.pos = restart;
                    return;
                }
                Some('\\') => self.pos += 2,
                Some('[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some('/') if !in_class => {
                    self.pos += 1;
                    while self.peek(0).map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
                        self.pos += 1;
                    }
                    return;
                }
                Some(_) => self.pos += 1,
            }
        }
    }
}

fn closes(open: char, close: char) -> bool {
    matches!((open, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether a script builds or rewrites markup at run time
pub fn renders_elements(script: &str) -> bool {
    RENDERS.is_match(script)
}

/// Check one script for tokenizer-level faults
pub fn scan(source: &str) -> Result<(), ScriptFault> {
    let chars: Vec<char> = source.chars().collect();
    Scanner {
        chars: &chars,
        pos: 0,
        line: 1,
        stack: Vec::new(),
        last: None,
        last_word: String::new(),
        after_header: false,
    }
    .run()
}
