//! Parser for the textual pad and link syntax of `media-ctl`:
//!
//! ```text
//! pad  := entity ':' index
//! link := pad '->' pad
//! entity := '\'' name '\'' | '"' name '"' | id
//! ```
//!
//! Whitespace is allowed around the arrow. Parsing is purely syntactic: resolving the entities
//! against an enumerated graph is done by `MediaDevice`.
use std::fmt;

use thiserror::Error;

/// How an entity is designated in a pad specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef<'a> {
    Name(&'a str),
    Id(u32),
}

impl<'a> fmt::Display for EntityRef<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Name(name) => write!(f, "'{}'", name),
            EntityRef::Id(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadSpec<'a> {
    pub entity: EntityRef<'a>,
    pub index: u16,
}

impl<'a> fmt::Display for PadSpec<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec<'a> {
    pub source: PadSpec<'a>,
    pub sink: PadSpec<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("expected an entity name or id")]
    ExpectedEntity,
    #[error("unterminated entity name")]
    UnterminatedName,
    #[error("expected ':'")]
    ExpectedColon,
    #[error("expected a pad index")]
    ExpectedPadIndex,
    #[error("expected '->'")]
    ExpectedArrow,
    #[error("unexpected trailing characters")]
    TrailingCharacters,
}

/// A syntax error, with the byte offset at which it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at position {position} of \"{input}\"")]
pub struct ParseError {
    pub input: String,
    pub position: usize,
    pub kind: ParseErrorKind,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            input: self.input.to_owned(),
            position: self.pos,
            kind,
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn number(&mut self) -> Option<u32> {
        let rest = self.rest();
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let value = rest[..len].parse().ok()?;
        self.pos += len;
        Some(value)
    }

    fn entity(&mut self) -> Result<EntityRef<'a>, ParseError> {
        let rest = self.rest();
        match rest.chars().next() {
            Some(quote @ ('\'' | '"')) => {
                let name_start = self.pos + 1;
                let len = rest[1..]
                    .find(quote)
                    .ok_or_else(|| self.error(ParseErrorKind::UnterminatedName))?;
                self.pos = name_start + len + 1;
                Ok(EntityRef::Name(&self.input[name_start..name_start + len]))
            }
            _ => self
                .number()
                .map(EntityRef::Id)
                .ok_or_else(|| self.error(ParseErrorKind::ExpectedEntity)),
        }
    }

    fn pad(&mut self) -> Result<PadSpec<'a>, ParseError> {
        let entity = self.entity()?;

        if !self.rest().starts_with(':') {
            return Err(self.error(ParseErrorKind::ExpectedColon));
        }
        self.pos += 1;

        let index = self
            .number()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| self.error(ParseErrorKind::ExpectedPadIndex))?;

        Ok(PadSpec { entity, index })
    }

    fn link(&mut self) -> Result<LinkSpec<'a>, ParseError> {
        let source = self.pad()?;

        self.skip_whitespace();
        if !self.rest().starts_with("->") {
            return Err(self.error(ParseErrorKind::ExpectedArrow));
        }
        self.pos += 2;
        self.skip_whitespace();

        let sink = self.pad()?;

        Ok(LinkSpec { source, sink })
    }

    fn end(&mut self) -> Result<(), ParseError> {
        self.skip_whitespace();
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::TrailingCharacters))
        }
    }
}

/// Parses a pad specification such as `'fe9a0000.vsp rpf.0':1`.
pub fn parse_pad_spec(input: &str) -> Result<PadSpec, ParseError> {
    let mut parser = Parser::new(input);
    let pad = parser.pad()?;
    parser.end()?;
    Ok(pad)
}

/// Parses a link specification such as `'fe9a0000.vsp rpf.0':1 -> 'fe9a0000.vsp lut':0`.
pub fn parse_link_spec(input: &str) -> Result<LinkSpec, ParseError> {
    let mut parser = Parser::new(input);
    let link = parser.link()?;
    parser.end()?;
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_pad() {
        assert_eq!(
            parse_pad_spec("'fe9a0000.vsp rpf.0':1"),
            Ok(PadSpec {
                entity: EntityRef::Name("fe9a0000.vsp rpf.0"),
                index: 1,
            })
        );
        assert_eq!(
            parse_pad_spec("\"fe9a0000.vsp wpf.0 output\":0"),
            Ok(PadSpec {
                entity: EntityRef::Name("fe9a0000.vsp wpf.0 output"),
                index: 0,
            })
        );
    }

    #[test]
    fn numeric_pad() {
        assert_eq!(
            parse_pad_spec("12:3"),
            Ok(PadSpec {
                entity: EntityRef::Id(12),
                index: 3,
            })
        );
    }

    #[test]
    fn link() {
        let link = parse_link_spec("'vsp lut':1 -> 'vsp wpf.0':0").unwrap();
        assert_eq!(link.source.entity, EntityRef::Name("vsp lut"));
        assert_eq!(link.source.index, 1);
        assert_eq!(link.sink.entity, EntityRef::Name("vsp wpf.0"));
        assert_eq!(link.sink.index, 0);

        // Whitespace around the arrow is optional.
        assert_eq!(parse_link_spec("'vsp lut':1->'vsp wpf.0':0"), Ok(link));
    }

    #[test]
    fn errors_report_position() {
        let err = parse_pad_spec("'vsp rpf.0'1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ExpectedColon);
        assert_eq!(err.position, 11);

        let err = parse_pad_spec("'vsp rpf.0").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedName);
        assert_eq!(err.position, 0);

        let err = parse_pad_spec("'vsp rpf.0':").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ExpectedPadIndex);
        assert_eq!(err.position, 12);

        let err = parse_link_spec("'a':1 => 'b':0").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ExpectedArrow);
        assert_eq!(err.position, 6);

        let err = parse_pad_spec("'a':1 [1]").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingCharacters);
        assert_eq!(err.position, 6);

        let err = parse_pad_spec(":1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ExpectedEntity);
    }

    #[test]
    fn pad_index_out_of_range() {
        let err = parse_pad_spec("'a':70000").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ExpectedPadIndex);
    }

    #[test]
    fn display_roundtrip() {
        let spec = parse_pad_spec("'vsp lut':1").unwrap();
        assert_eq!(spec.to_string(), "'vsp lut':1");
    }
}
