//! A parser for the regex subset the GBNF compiler can lower.
//!
//! The `regex` crate executes patterns but does not expose its parse tree,
//! so this module parses the safe subset directly: literals, character
//! classes (including `\d`/`\w`/`\s`), `.`, alternation, groups,
//! quantifiers, and zero-width anchors. The same tree drives two consumers:
//! the GBNF expression compiler and the maximum-match-width analysis the
//! streaming stop matcher needs to decide how much buffered text is safe to
//! release.

use thiserror::Error;

/// A regex construct this parser could not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RegexParseError {
    /// What went wrong, in terms of the offending construct.
    pub message: String,
}

impl RegexParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parsed regex tree over the safe subset.
#[derive(Debug, Clone, PartialEq)]
pub enum RegexAst {
    /// Matches the empty string.
    Empty,
    /// A single literal character.
    Literal(char),
    /// `.`, any character.
    Dot,
    /// A character class. Negated classes parse (they still have width 1)
    /// but the GBNF compiler rejects them.
    Class {
        /// Whether the class is complemented.
        negated: bool,
        /// The class members.
        items: Vec<ClassItem>,
    },
    /// A (capturing or non-capturing) group.
    Group(Box<RegexAst>),
    /// A sequence.
    Concat(Vec<RegexAst>),
    /// Alternation.
    Alternate(Vec<RegexAst>),
    /// A quantified node.
    Repeat {
        /// The quantified child.
        node: Box<RegexAst>,
        /// Minimum count.
        min: u32,
        /// Maximum count, unbounded when `None`.
        max: Option<u32>,
    },
    /// `^`, `$`, `\A`, `\z`: zero-width, a no-op under anchored decoding.
    Anchor,
    /// `\b`/`\B`: zero-width but not expressible in GBNF.
    WordBoundary,
}

/// A member of a character class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassItem {
    /// A single character.
    Char(char),
    /// An inclusive character range.
    Range(char, char),
    /// `\d`.
    Digit,
    /// `\w`.
    Word,
    /// `\s`.
    Space,
}

/// Parses a pattern into the safe-subset tree.
pub fn parse(pattern: &str) -> Result<RegexAst, RegexParseError> {
    let mut parser = Parser {
        chars: pattern.chars().collect(),
        pos: 0,
    };
    let ast = parser.parse_alternation()?;
    if parser.pos != parser.chars.len() {
        return Err(RegexParseError::new(format!(
            "unexpected '{}' at offset {}",
            parser.chars[parser.pos], parser.pos
        )));
    }
    Ok(ast)
}

/// Maximum number of characters the pattern can match, or `None` when the
/// pattern is unbounded or outside the analyzable subset. Callers holding
/// streamed text treat `None` as "nothing is safe to release".
pub fn max_match_width(pattern: &str) -> Option<usize> {
    let ast = parse(pattern).ok()?;
    width(&ast).map(|w| usize::try_from(w).unwrap_or(usize::MAX))
}

fn width(ast: &RegexAst) -> Option<u64> {
    match ast {
        RegexAst::Empty | RegexAst::Anchor | RegexAst::WordBoundary => Some(0),
        RegexAst::Literal(_) | RegexAst::Dot | RegexAst::Class { .. } => Some(1),
        RegexAst::Group(inner) => width(inner),
        RegexAst::Concat(items) => items
            .iter()
            .try_fold(0u64, |total, item| Some(total.checked_add(width(item)?)?)),
        RegexAst::Alternate(branches) => branches
            .iter()
            .try_fold(0u64, |widest, branch| Some(widest.max(width(branch)?))),
        RegexAst::Repeat { node, max, .. } => match (width(node), max) {
            (Some(0), _) => Some(0),
            (Some(w), Some(max)) => w.checked_mul(u64::from(*max)),
            (_, None) => None,
            (None, _) => None,
        },
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn expect(&mut self, expected: char) -> Result<(), RegexParseError> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            _ => Err(RegexParseError::new(format!("expected '{expected}'"))),
        }
    }

    fn parse_alternation(&mut self) -> Result<RegexAst, RegexParseError> {
        let mut branches = vec![self.parse_concat()?];
        while self.peek() == Some('|') {
            self.bump();
            branches.push(self.parse_concat()?);
        }
        if branches.len() == 1 {
            Ok(branches.remove(0))
        } else {
            Ok(RegexAst::Alternate(branches))
        }
    }

    fn parse_concat(&mut self) -> Result<RegexAst, RegexParseError> {
        let mut items = Vec::new();
        while let Some(ch) = self.peek() {
            if ch == '|' || ch == ')' {
                break;
            }
            items.push(self.parse_quantified()?);
        }
        match items.len() {
            0 => Ok(RegexAst::Empty),
            1 => Ok(items.remove(0)),
            _ => Ok(RegexAst::Concat(items)),
        }
    }

    fn parse_quantified(&mut self) -> Result<RegexAst, RegexParseError> {
        let atom = self.parse_atom()?;
        let (min, max) = match self.peek() {
            Some('*') => {
                self.bump();
                (0, None)
            }
            Some('+') => {
                self.bump();
                (1, None)
            }
            Some('?') => {
                self.bump();
                (0, Some(1))
            }
            Some('{') => {
                let mark = self.pos;
                match self.parse_counted_repeat() {
                    Some(bounds) => bounds,
                    None => {
                        // Not a counted repetition; `{` stays a literal.
                        self.pos = mark;
                        return Ok(atom);
                    }
                }
            }
            _ => return Ok(atom),
        };
        // A trailing `?` marks the quantifier lazy, which does not change
        // the matched language.
        if self.peek() == Some('?') {
            self.bump();
        }
        if matches!(self.peek(), Some('*') | Some('+') | Some('{')) {
            return Err(RegexParseError::new("nested quantifiers are not supported"));
        }
        Ok(RegexAst::Repeat {
            node: Box::new(atom),
            min,
            max,
        })
    }

    fn parse_counted_repeat(&mut self) -> Option<(u32, Option<u32>)> {
        self.bump(); // '{'
        let min = self.parse_number();
        match (min, self.peek()) {
            (Some(min), Some('}')) => {
                self.bump();
                Some((min, Some(min)))
            }
            (Some(min), Some(',')) => {
                self.bump();
                if self.peek() == Some('}') {
                    self.bump();
                    return Some((min, None));
                }
                let max = self.parse_number()?;
                if self.peek() == Some('}') {
                    self.bump();
                    Some((min, Some(max)))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn parse_number(&mut self) -> Option<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == start {
            return None;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().ok()
    }

    fn parse_atom(&mut self) -> Result<RegexAst, RegexParseError> {
        match self.bump() {
            None => Err(RegexParseError::new("unexpected end of pattern")),
            Some('(') => self.parse_group(),
            Some('[') => self.parse_class(),
            Some('.') => Ok(RegexAst::Dot),
            Some('^') | Some('$') => Ok(RegexAst::Anchor),
            Some('\\') => self.parse_escape(),
            Some(ch @ ('*' | '+' | '?')) => Err(RegexParseError::new(format!(
                "quantifier '{ch}' has nothing to repeat"
            ))),
            Some(ch) => Ok(RegexAst::Literal(ch)),
        }
    }

    fn parse_group(&mut self) -> Result<RegexAst, RegexParseError> {
        if self.peek() == Some('?') {
            self.bump();
            match self.bump() {
                Some(':') => {}
                Some('P') => {
                    self.expect('<')?;
                    self.skip_group_name()?;
                }
                Some('<') => match self.peek() {
                    Some('=') | Some('!') => {
                        return Err(RegexParseError::new("lookbehind is not supported"));
                    }
                    _ => self.skip_group_name()?,
                },
                Some('=') | Some('!') => {
                    return Err(RegexParseError::new("lookahead is not supported"));
                }
                _ => return Err(RegexParseError::new("unsupported group syntax")),
            }
        }
        let inner = self.parse_alternation()?;
        self.expect(')')?;
        Ok(RegexAst::Group(Box::new(inner)))
    }

    fn skip_group_name(&mut self) -> Result<(), RegexParseError> {
        while let Some(ch) = self.bump() {
            if ch == '>' {
                return Ok(());
            }
        }
        Err(RegexParseError::new("unterminated group name"))
    }

    fn parse_escape(&mut self) -> Result<RegexAst, RegexParseError> {
        match self.bump() {
            None => Err(RegexParseError::new("dangling escape")),
            Some('d') => Ok(class_of(ClassItem::Digit, false)),
            Some('w') => Ok(class_of(ClassItem::Word, false)),
            Some('s') => Ok(class_of(ClassItem::Space, false)),
            Some('D') => Ok(class_of(ClassItem::Digit, true)),
            Some('W') => Ok(class_of(ClassItem::Word, true)),
            Some('S') => Ok(class_of(ClassItem::Space, true)),
            Some('n') => Ok(RegexAst::Literal('\n')),
            Some('r') => Ok(RegexAst::Literal('\r')),
            Some('t') => Ok(RegexAst::Literal('\t')),
            Some('f') => Ok(RegexAst::Literal('\u{0c}')),
            Some('v') => Ok(RegexAst::Literal('\u{0b}')),
            Some('0') => Ok(RegexAst::Literal('\0')),
            Some('b') | Some('B') => Ok(RegexAst::WordBoundary),
            Some('A') | Some('z') | Some('Z') => Ok(RegexAst::Anchor),
            Some('x') => Ok(RegexAst::Literal(self.parse_hex_escape()?)),
            Some(ch) if ch.is_ascii_alphanumeric() => Err(RegexParseError::new(format!(
                "unsupported escape '\\{ch}'"
            ))),
            Some(ch) => Ok(RegexAst::Literal(ch)),
        }
    }

    fn parse_hex_escape(&mut self) -> Result<char, RegexParseError> {
        let high = self.bump();
        let low = self.bump();
        let (Some(high), Some(low)) = (high, low) else {
            return Err(RegexParseError::new("truncated hex escape"));
        };
        let (Some(high), Some(low)) = (high.to_digit(16), low.to_digit(16)) else {
            return Err(RegexParseError::new("invalid hex escape"));
        };
        char::from_u32(high * 16 + low).ok_or_else(|| RegexParseError::new("invalid hex escape"))
    }

    fn parse_class(&mut self) -> Result<RegexAst, RegexParseError> {
        let mut negated = false;
        if self.peek() == Some('^') {
            self.bump();
            negated = true;
        }
        let mut items = Vec::new();
        // A leading `]` is a literal member.
        if self.peek() == Some(']') {
            self.bump();
            items.push(ClassItem::Char(']'));
        }
        loop {
            match self.peek() {
                None => return Err(RegexParseError::new("unterminated character class")),
                Some(']') => {
                    self.bump();
                    break;
                }
                _ => {}
            }
            match self.parse_class_member()? {
                ClassMember::Category(item) => items.push(item),
                ClassMember::Char(low) => {
                    // Try `low-high`; a `-` before `]` is a literal.
                    if self.peek() == Some('-') && self.chars.get(self.pos + 1) != Some(&']') {
                        self.bump();
                        match self.parse_class_member()? {
                            ClassMember::Char(high) if low <= high => {
                                items.push(ClassItem::Range(low, high));
                            }
                            ClassMember::Char(_) => {
                                return Err(RegexParseError::new("invalid class range"));
                            }
                            ClassMember::Category(_) => {
                                return Err(RegexParseError::new(
                                    "category escape cannot end a class range",
                                ));
                            }
                        }
                    } else {
                        items.push(ClassItem::Char(low));
                    }
                }
            }
        }
        Ok(RegexAst::Class { negated, items })
    }

    fn parse_class_member(&mut self) -> Result<ClassMember, RegexParseError> {
        match self.bump() {
            None => Err(RegexParseError::new("unterminated character class")),
            Some('\\') => match self.bump() {
                None => Err(RegexParseError::new("dangling escape in character class")),
                Some('d') => Ok(ClassMember::Category(ClassItem::Digit)),
                Some('w') => Ok(ClassMember::Category(ClassItem::Word)),
                Some('s') => Ok(ClassMember::Category(ClassItem::Space)),
                Some('n') => Ok(ClassMember::Char('\n')),
                Some('r') => Ok(ClassMember::Char('\r')),
                Some('t') => Ok(ClassMember::Char('\t')),
                Some('0') => Ok(ClassMember::Char('\0')),
                Some('x') => Ok(ClassMember::Char(self.parse_hex_escape()?)),
                Some(ch) if ch.is_ascii_alphanumeric() => Err(RegexParseError::new(format!(
                    "unsupported character-class escape '\\{ch}'"
                ))),
                Some(ch) => Ok(ClassMember::Char(ch)),
            },
            Some(ch) => Ok(ClassMember::Char(ch)),
        }
    }
}

enum ClassMember {
    Char(char),
    Category(ClassItem),
}

fn class_of(item: ClassItem, negated: bool) -> RegexAst {
    RegexAst::Class {
        negated,
        items: vec![item],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_sequence() {
        assert_eq!(
            parse("ab").unwrap(),
            RegexAst::Concat(vec![RegexAst::Literal('a'), RegexAst::Literal('b')])
        );
    }

    #[test]
    fn test_parse_alternation() {
        let ast = parse("YES|NO").unwrap();
        match ast {
            RegexAst::Alternate(branches) => assert_eq!(branches.len(), 2),
            other => panic!("expected alternation, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_class_with_range_and_category() {
        let ast = parse("[a-z\\d_]").unwrap();
        assert_eq!(
            ast,
            RegexAst::Class {
                negated: false,
                items: vec![
                    ClassItem::Range('a', 'z'),
                    ClassItem::Digit,
                    ClassItem::Char('_'),
                ],
            }
        );
    }

    #[test]
    fn test_parse_negated_class() {
        let ast = parse("[^ab]").unwrap();
        assert!(matches!(ast, RegexAst::Class { negated: true, .. }));
    }

    #[test]
    fn test_counted_repeats() {
        let ast = parse("a{2,5}").unwrap();
        assert_eq!(
            ast,
            RegexAst::Repeat {
                node: Box::new(RegexAst::Literal('a')),
                min: 2,
                max: Some(5),
            }
        );
        assert!(matches!(
            parse("a{3}").unwrap(),
            RegexAst::Repeat { min: 3, max: Some(3), .. }
        ));
        assert!(matches!(
            parse("a{3,}").unwrap(),
            RegexAst::Repeat { min: 3, max: None, .. }
        ));
    }

    #[test]
    fn test_unmatched_brace_is_literal() {
        assert_eq!(
            parse("a{b").unwrap(),
            RegexAst::Concat(vec![
                RegexAst::Literal('a'),
                RegexAst::Literal('{'),
                RegexAst::Literal('b'),
            ])
        );
    }

    #[test]
    fn test_lazy_quantifier_accepted() {
        assert!(matches!(
            parse("a+?").unwrap(),
            RegexAst::Repeat { min: 1, max: None, .. }
        ));
    }

    #[test]
    fn test_lookarounds_rejected() {
        assert!(parse("(?=A)A").is_err());
        assert!(parse("(?!A)B").is_err());
        assert!(parse("(?<=A)B").is_err());
    }

    #[test]
    fn test_group_variants() {
        assert!(parse("(?:ab)+").is_ok());
        assert!(parse("(ab)+").is_ok());
        assert!(parse("(?P<name>ab)").is_ok());
        assert!(parse("(?<name>ab)").is_ok());
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(parse("[").is_err());
        assert!(parse("(ab").is_err());
        assert!(parse("*a").is_err());
        assert!(parse("\\q").is_err());
    }

    #[test]
    fn test_max_match_width_fixed() {
        assert_eq!(max_match_width("STOP"), Some(4));
        assert_eq!(max_match_width("ab|a"), Some(2));
        assert_eq!(max_match_width("a{2,5}"), Some(5));
        assert_eq!(max_match_width("^YES$"), Some(3));
        assert_eq!(max_match_width("[^x]y"), Some(2));
        assert_eq!(max_match_width(""), Some(0));
    }

    #[test]
    fn test_max_match_width_unbounded() {
        assert_eq!(max_match_width("a+b+"), None);
        assert_eq!(max_match_width("(?:ab)*"), None);
        assert_eq!(max_match_width("a{3,}"), None);
    }

    #[test]
    fn test_max_match_width_unanalyzable_is_none() {
        assert_eq!(max_match_width("(?=A)A"), None);
    }
}
