//! The IRC message grammar.
//!
//! ```text
//! ["@" tags SPACE] [":" source SPACE] command [params] CRLF
//! tags     = tag *(";" tag)
//! tag      = ["+"] [ vendor "/" ] key ["=" escaped-value]
//! source   = nick [ ["!" user] "@" host ]
//! command  = 1*letter / 3digit
//! params   = *(SPACE middle) [SPACE ":" trailing]
//! ```
//!
//! Size limits: the tag section may be at most 8,191 bytes and the
//! remainder of the line (source, command, parameters, CRLF) at most 512
//! bytes. Oversized lines fail with [`ParseError::MsgSizeOverflow`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ParseError;
use crate::scan::{self, Parser, TokenKind};
use crate::{MAX_BODY_LEN, MAX_TAGS_LEN};

/// The value side of a message tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// `true` when the tag carried the `+` client-only prefix.
    pub client_only: bool,
    /// Optional `vendor/` prefix (a DNS name; dots are legal here only).
    pub vendor: Option<String>,
    /// The escaped value, absent for valueless tags.
    pub value: Option<String>,
}

/// The source (prefix) of a message: who it is from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    /// Nickname, or a server name.
    pub nick: String,
    /// Username; present only together with a host.
    pub user: Option<String>,
    /// Hostname.
    pub host: Option<String>,
}

impl Source {
    /// A bare server or nick source.
    pub fn server(name: impl Into<String>) -> Self {
        Self {
            nick: name.into(),
            user: None,
            host: None,
        }
    }

    /// A full `nick!user@host` source.
    pub fn full(
        nick: impl Into<String>,
        user: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            nick: nick.into(),
            user: Some(user.into()),
            host: Some(host.into()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nick)?;
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => write!(f, "!{user}@{host}"),
            (None, Some(host)) => write!(f, "@{host}"),
            _ => Ok(()),
        }
    }
}

/// A parsed IRC message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message tags, keyed by tag key (vendor kept in the value).
    pub tags: Option<BTreeMap<String, Tag>>,
    /// Where the message came from.
    pub source: Option<Source>,
    /// The command verb: letters, or a three-digit numeric.
    pub command: String,
    /// Ordered parameters.
    pub params: Vec<String>,
    /// Whether the final parameter was given in `:trailing` form.
    pub trailing: bool,
}

impl Message {
    /// Build a message from a command and parameters, with no source.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tags: None,
            source: None,
            command: command.into(),
            params,
            trailing: false,
        }
    }

    /// Attach a source.
    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Mark the last parameter as trailing (`:`-introduced on the wire).
    #[must_use]
    pub fn with_trailing(mut self) -> Self {
        self.trailing = true;
        self
    }

    /// Parse a complete wire line, CRLF included.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(line).map_err(|_| ParseError::Parse("invalid utf-8"))?;
        let tokens = scan::lex(text);
        if tokens.is_empty() {
            return Err(ParseError::Parse("empty message"));
        }

        let mut p = Parser::new(&tokens);
        let mut msg = Message::default();

        if p.peek_kind() == Some(TokenKind::At) {
            p.next(); // consume '@'
            msg.tags = Some(parse_tags(&mut p));
            if !p.expect(TokenKind::Space) {
                return Err(ParseError::Parse("expected space after tags"));
            }
        }
        let tag_bytes = p.bytes_read();
        if tag_bytes > MAX_TAGS_LEN {
            return Err(ParseError::MsgSizeOverflow);
        }

        if p.peek_kind() == Some(TokenKind::Colon) {
            p.next(); // consume ':'
            msg.source = Some(parse_source(&mut p));
            if !p.expect(TokenKind::Space) {
                return Err(ParseError::Parse("expected space after source"));
            }
        }

        msg.command = parse_command(&mut p)?;
        let (params, trailing) = parse_params(&mut p);
        msg.params = params;
        msg.trailing = trailing;

        if !p.expect(TokenKind::Cr) {
            return Err(ParseError::Parse("no cr; ignoring"));
        }
        if !p.expect(TokenKind::Lf) {
            return Err(ParseError::Parse("no lf; ignoring"));
        }

        if p.bytes_read() - tag_bytes > MAX_BODY_LEN {
            return Err(ParseError::MsgSizeOverflow);
        }

        Ok(msg)
    }
}

/// `<tag> *[';' <tag>]` - at least one tag after `@`.
fn parse_tags(p: &mut Parser<'_>) -> BTreeMap<String, Tag> {
    let mut tags = BTreeMap::new();

    parse_tag(p, &mut tags);
    while p.peek_kind() == Some(TokenKind::Semicolon) {
        p.next(); // consume ';'
        parse_tag(p, &mut tags);
    }

    tags
}

/// `[ <client_prefix> ] <key> ['=' <escaped_value>]`
///
/// An ill-formed key (a dot outside the vendor component) rejects the
/// whole tag: its value is still consumed but nothing is stored.
fn parse_tag(p: &mut Parser<'_>, tags: &mut BTreeMap<String, Tag>) {
    let mut tag = Tag::default();

    if p.peek_kind() == Some(TokenKind::ClientPrefix) {
        tag.client_only = true;
        p.next(); // consume '+'
    }

    let key = parse_key(p, &mut tag.vendor);

    if p.peek_kind() == Some(TokenKind::Equals) {
        p.next(); // consume '='
        tag.value = Some(parse_escaped_value(p));
    }

    if let Some(key) = key {
        tags.insert(key, tag);
    }
}

fn is_keyname(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// `[ <vendor> '/' ] <key_name>`
///
/// A vendor cannot be recognized until the `/` is seen, so characters are
/// accumulated generically. A `/` reclassifies the accumulated prefix as
/// the vendor; a dot that never ends up inside a vendor makes the key
/// ill-formed and the tag is dropped.
fn parse_key(p: &mut Parser<'_>, vendor: &mut Option<String>) -> Option<String> {
    let mut name = String::new();
    let mut unused_dot = false;

    loop {
        let Some(t) = p.peek() else {
            return Some(name);
        };

        if !is_keyname(t.ch) {
            if t.ch == '.' {
                // part of a DNS name, legal only if a '/' follows later
                unused_dot = true;
            } else if t.kind == TokenKind::Slash {
                unused_dot = false;
                *vendor = Some(std::mem::take(&mut name));
                p.next(); // skip '/'
                continue;
            } else if unused_dot {
                return None;
            } else {
                return Some(name);
            }
        }
        name.push(t.ch);
        p.next();
    }
}

fn is_escaped(c: char) -> bool {
    c != '\0' && c != '\r' && c != '\n' && c != ';' && c != ' '
}

/// Any characters except NUL, CR, LF, semicolon and space.
fn parse_escaped_value(p: &mut Parser<'_>) -> String {
    let mut val = String::new();
    while let Some(t) = p.peek() {
        if !is_escaped(t.ch) {
            break;
        }
        val.push(t.ch);
        p.next();
    }
    val
}

/// `nickname [ [ "!" user ] "@" host ]`
fn parse_source(p: &mut Parser<'_>) -> Source {
    let mut source = Source::default();

    while let Some(t) = p.peek() {
        if matches!(t.kind, TokenKind::Space | TokenKind::Exclam | TokenKind::At) {
            break;
        }
        source.nick.push(t.ch);
        p.next();
    }

    if p.peek_kind() == Some(TokenKind::Exclam) {
        p.next(); // consume '!'
        let mut user = String::new();
        while let Some(t) = p.peek() {
            if matches!(t.kind, TokenKind::Space | TokenKind::At) {
                break;
            }
            user.push(t.ch);
            p.next();
        }
        source.user = Some(user);
    }

    if p.peek_kind() == Some(TokenKind::At) {
        p.next(); // consume '@'
        let mut host = String::new();
        while let Some(t) = p.peek() {
            if t.kind == TokenKind::Space {
                break;
            }
            host.push(t.ch);
            p.next();
        }
        source.host = Some(host);
    }

    source
}

/// `1*letter / 3digit`
fn parse_command(p: &mut Parser<'_>) -> Result<String, ParseError> {
    let mut cmd = String::new();

    while p.peek_kind() == Some(TokenKind::Letter) {
        cmd.push(p.next().expect("peeked").ch);
    }
    if !cmd.is_empty() {
        return Ok(cmd);
    }

    while p.peek_kind() == Some(TokenKind::Digit) {
        cmd.push(p.next().expect("peeked").ch);
    }
    if cmd.len() == 3 {
        Ok(cmd)
    } else {
        Err(ParseError::Parse("bad command"))
    }
}

/// `*( SPACE middle ) [ SPACE ":" trailing ]`
fn parse_params(p: &mut Parser<'_>) -> (Vec<String>, bool) {
    let mut params = Vec::new();

    loop {
        if p.peek_kind() == Some(TokenKind::Space) {
            p.next(); // consume space
        } else {
            return (params, false);
        }

        if p.peek_kind() == Some(TokenKind::Colon) {
            p.next(); // consume ':'
            params.push(parse_trailing(p));
            // trailing has to be at the end, so we're done
            return (params, true);
        }
        params.push(parse_middle(p));
    }
}

fn is_nospcrlfcl(c: char) -> bool {
    c != '\0' && c != '\r' && c != '\n' && c != ':' && c != ' '
}

/// `nospcrlfcl *( ":" / nospcrlfcl )`
fn parse_middle(p: &mut Parser<'_>) -> String {
    let mut out = String::new();

    while let Some(t) = p.peek() {
        if is_nospcrlfcl(t.ch) {
            out.push(t.ch);
            p.next();
        } else if t.kind == TokenKind::Colon && !out.is_empty() {
            out.push(t.ch);
            p.next();
        } else {
            break;
        }
    }
    out
}

/// `*( ":" / " " / nospcrlfcl )`
fn parse_trailing(p: &mut Parser<'_>) -> String {
    let mut out = String::new();

    while let Some(t) = p.peek() {
        if t.kind == TokenKind::Colon || t.kind == TokenKind::Space || is_nospcrlfcl(t.ch) {
            out.push(t.ch);
            p.next();
        } else {
            break;
        }
    }
    out
}

fn needs_trailing(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}

impl fmt::Display for Message {
    /// Serialize without the terminating CRLF; the connection writer adds
    /// it (together with any `@time=` tag).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = &self.tags {
            f.write_str("@")?;
            for (i, (key, tag)) in tags.iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                if tag.client_only {
                    f.write_str("+")?;
                }
                if let Some(vendor) = &tag.vendor {
                    write!(f, "{vendor}/")?;
                }
                f.write_str(key)?;
                if let Some(value) = &tag.value {
                    write!(f, "={value}")?;
                }
            }
            f.write_str(" ")?;
        }

        if let Some(source) = &self.source {
            write!(f, ":{source} ")?;
        }

        f.write_str(&self.command)?;

        if let Some((last, middles)) = self.params.split_last() {
            for param in middles {
                write!(f, " {param}")?;
            }
            if self.trailing || needs_trailing(last) {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Message {
        Message::parse(s.as_bytes()).expect("parse failed")
    }

    #[test]
    fn parses_bare_command() {
        let m = parse("QUIT\r\n");
        assert_eq!(m.command, "QUIT");
        assert!(m.params.is_empty());
        assert!(m.tags.is_none());
        assert!(m.source.is_none());
    }

    #[test]
    fn parses_params_and_trailing() {
        let m = parse("PRIVMSG #room :hello there\r\n");
        assert_eq!(m.command, "PRIVMSG");
        assert_eq!(m.params, vec!["#room", "hello there"]);
        assert!(m.trailing);
    }

    #[test]
    fn middle_may_contain_colon() {
        let m = parse("USER alice 0 * sp:lit\r\n");
        assert_eq!(m.params[3], "sp:lit");
        assert!(!m.trailing);
    }

    #[test]
    fn parses_source() {
        let m = parse(":alice!a@example.net NICK :al\r\n");
        let src = m.source.unwrap();
        assert_eq!(src.nick, "alice");
        assert_eq!(src.user.as_deref(), Some("a"));
        assert_eq!(src.host.as_deref(), Some("example.net"));
    }

    #[test]
    fn parses_server_source() {
        let m = parse(":irc.example.net 001 alice :Welcome\r\n");
        let src = m.source.unwrap();
        assert_eq!(src.nick, "irc.example.net");
        assert!(src.user.is_none());
        assert!(src.host.is_none());
        assert_eq!(m.command, "001");
    }

    #[test]
    fn parses_tags() {
        let m = parse("@time=2024-01-01T00:00:00.000Z;+example.com/key=va\\slue;flag PING\r\n");
        let tags = m.tags.unwrap();
        assert_eq!(
            tags["time"].value.as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
        let vendored = &tags["key"];
        assert!(vendored.client_only);
        assert_eq!(vendored.vendor.as_deref(), Some("example.com"));
        assert_eq!(vendored.value.as_deref(), Some("va\\slue"));
        assert!(tags["flag"].value.is_none());
    }

    #[test]
    fn dot_in_key_rejects_tag() {
        // the dot never ends up in a vendor component, so the tag is dropped
        let m = parse("@bad.key=x;ok=1 PING\r\n");
        let tags = m.tags.unwrap();
        assert!(!tags.contains_key("bad.key"));
        assert_eq!(tags["ok"].value.as_deref(), Some("1"));
    }

    #[test]
    fn missing_crlf_is_parse_error() {
        assert!(matches!(
            Message::parse(b"PING x"),
            Err(ParseError::Parse(_))
        ));
        assert!(matches!(
            Message::parse(b"PING x\n"),
            Err(ParseError::Parse(_))
        ));
        assert!(matches!(
            Message::parse(b"PING x\r"),
            Err(ParseError::Parse(_))
        ));
    }

    #[test]
    fn empty_input_is_parse_error() {
        assert!(matches!(Message::parse(b""), Err(ParseError::Parse(_))));
    }

    #[test]
    fn numeric_command_must_be_three_digits() {
        assert!(Message::parse(b"01 x\r\n").is_err());
        assert!(Message::parse(b"001 x\r\n").is_ok());
    }

    #[test]
    fn body_size_boundary() {
        // "PRIVMSG #c :" + text + "\r\n" must total exactly MAX_BODY_LEN
        let overhead = "PRIVMSG #c :".len() + 2;
        let text = "x".repeat(MAX_BODY_LEN - overhead);
        let ok = format!("PRIVMSG #c :{text}\r\n");
        assert_eq!(ok.len(), MAX_BODY_LEN);
        assert!(Message::parse(ok.as_bytes()).is_ok());

        let too_long = format!("PRIVMSG #c :{text}x\r\n");
        assert_eq!(
            Message::parse(too_long.as_bytes()),
            Err(ParseError::MsgSizeOverflow)
        );
    }

    #[test]
    fn tag_size_boundary() {
        // '@' + "k=" + value + ' ' counts toward the tag section
        let value = "a".repeat(MAX_TAGS_LEN - "@k= ".len());
        let ok = format!("@k={value} PING\r\n");
        assert!(Message::parse(ok.as_bytes()).is_ok());

        let too_long = format!("@k={value}a PING\r\n");
        assert_eq!(
            Message::parse(too_long.as_bytes()),
            Err(ParseError::MsgSizeOverflow)
        );
    }

    #[test]
    fn round_trips() {
        let lines = [
            "QUIT",
            "PRIVMSG #room :hello there",
            "PRIVMSG alice,bob beep",
            ":alice!a@h TOPIC #room :new topic",
            ":srv 433 * alice :Nickname is already in use",
            "@time=2024-01-01T00:00:00.000Z :srv PING alice",
            // tags serialize in key order
            "@id=1;+draft/reply=abc TAGMSG #room",
            "JOIN #a,#b key1,key2",
            "AWAY :",
        ];
        for line in lines {
            let m = parse(&format!("{line}\r\n"));
            assert_eq!(m.to_string(), line, "format mismatch for {line:?}");
            let again = parse(&format!("{m}\r\n"));
            assert_eq!(again, m, "round trip mismatch for {line:?}");
        }
    }
}
