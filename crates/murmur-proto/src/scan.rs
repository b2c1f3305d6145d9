//! Byte-stream tokenizer and the token cursor used by the message grammar.
//!
//! The lexer is a state-function scanner: each state consumes input and
//! returns the next state, until the input is exhausted. IRC's message
//! grammar needs only single-character tokens, so there is a single state
//! that classifies each scalar into a [`TokenKind`].

/// Classification of a single input character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// ASCII letter.
    Letter,
    /// ASCII digit.
    Digit,
    /// `@` - introduces tags, separates user from host.
    At,
    /// `!` - separates nick from user in a source.
    Exclam,
    /// `:` - introduces a source or a trailing parameter.
    Colon,
    /// `;` - separates tags.
    Semicolon,
    /// `=` - separates a tag key from its value.
    Equals,
    /// `+` - marks a client-only tag.
    ClientPrefix,
    /// `/` - separates a tag vendor from its key.
    Slash,
    /// A single space.
    Space,
    /// Carriage return.
    Cr,
    /// Line feed.
    Lf,
    /// `.` - legal inside a tag vendor component.
    Dot,
    /// Anything else.
    Other,
}

/// A classified input character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// The character class.
    pub kind: TokenKind,
    /// The character itself.
    pub ch: char,
}

fn classify(c: char) -> TokenKind {
    match c {
        'a'..='z' | 'A'..='Z' => TokenKind::Letter,
        '0'..='9' => TokenKind::Digit,
        '@' => TokenKind::At,
        '!' => TokenKind::Exclam,
        ':' => TokenKind::Colon,
        ';' => TokenKind::Semicolon,
        '=' => TokenKind::Equals,
        '+' => TokenKind::ClientPrefix,
        '/' => TokenKind::Slash,
        ' ' => TokenKind::Space,
        '\r' => TokenKind::Cr,
        '\n' => TokenKind::Lf,
        '.' => TokenKind::Dot,
        _ => TokenKind::Other,
    }
}

/// A state function consumes input and yields the next state, or `None`
/// when scanning is complete.
struct StateFn(fn(&mut Lexer<'_>) -> Option<StateFn>);

/// The scanner over one input line.
struct Lexer<'a> {
    rest: std::str::Chars<'a>,
    tokens: Vec<Token>,
}

impl Lexer<'_> {
    fn emit_next(&mut self) -> bool {
        match self.rest.next() {
            Some(c) => {
                self.tokens.push(Token {
                    kind: classify(c),
                    ch: c,
                });
                true
            }
            None => false,
        }
    }
}

fn scan_any(l: &mut Lexer<'_>) -> Option<StateFn> {
    if l.emit_next() {
        Some(StateFn(scan_any))
    } else {
        None
    }
}

/// Tokenize an input line into its ordered token sequence.
pub fn lex(input: &str) -> Vec<Token> {
    let mut l = Lexer {
        rest: input.chars(),
        tokens: Vec::with_capacity(input.len()),
    };

    let mut state: Option<StateFn> = Some(StateFn(scan_any));
    while let Some(StateFn(f)) = state {
        state = f(&mut l);
    }

    l.tokens
}

/// Cursor over a token sequence, tracking how many input bytes have been
/// consumed (the grammar's size limits are counted in bytes).
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    bytes_read: usize,
}

impl<'a> Parser<'a> {
    /// Create a cursor at the start of `tokens`.
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            bytes_read: 0,
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    /// Look at the next token's kind, or `None` at end of input.
    pub fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    /// Consume and return the next token.
    pub fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).copied();
        if let Some(t) = t {
            self.pos += 1;
            self.bytes_read += t.ch.len_utf8();
        }
        t
    }

    /// Consume the next token iff it has the given kind.
    pub fn expect(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.next();
            true
        } else {
            false
        }
    }

    /// Bytes of input consumed so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}
