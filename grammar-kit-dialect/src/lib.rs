//! Wire-dialect serializers for grammar trees.
//!
//! Providers that accept grammar-constrained generation speak different
//! textual dialects. This crate lowers a [`grammar_kit_ast`] tree into one
//! of three: a bare regex fragment, a Lark subset, or a GBNF subset. Each
//! serializer rejects constructs its dialect cannot express with a typed
//! [`UnsupportedFeature`] error instead of emitting something a provider
//! would silently mishandle.
//!
//! # Examples
//!
//! ```
//! use grammar_kit_ast::{Grammar, regex};
//! use grammar_kit_dialect::lark;
//!
//! let grammar = Grammar::new();
//! let rendered = lark::serialize(&grammar, &regex("YES|NO")).unwrap();
//! assert_eq!(rendered, "start: /YES|NO/");
//! ```

use serde::{Deserialize, Serialize};

use grammar_kit_ast::{Grammar, GrammarNode};

/// Error type for unrepresentable grammar constructs.
pub mod error;
/// GBNF-subset serializer.
pub mod gbnf;
/// Lark-subset serializer.
pub mod lark;
/// Bare regex-fragment serializer.
pub mod regex_fragment;
/// Safe-subset regex parser shared by the GBNF compiler and width analysis.
pub mod regex_subset;

mod naming;
mod rules;

pub use error::UnsupportedFeature;
pub use regex_subset::max_match_width;

/// A grammar wire dialect understood by some provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrammarDialect {
    /// A bare regular-expression fragment.
    Regex,
    /// The Lark subset.
    Lark,
    /// The GBNF subset.
    Gbnf,
}

impl GrammarDialect {
    /// The wire name of this dialect.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrammarDialect::Regex => "regex",
            GrammarDialect::Lark => "lark",
            GrammarDialect::Gbnf => "gbnf",
        }
    }

    /// Parses a wire name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "regex" => Some(GrammarDialect::Regex),
            "lark" => Some(GrammarDialect::Lark),
            "gbnf" => Some(GrammarDialect::Gbnf),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrammarDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializes `node` in the given dialect.
pub fn serialize(
    dialect: GrammarDialect,
    grammar: &Grammar,
    node: &GrammarNode,
) -> Result<String, UnsupportedFeature> {
    match dialect {
        GrammarDialect::Regex => regex_fragment::serialize(grammar, node),
        GrammarDialect::Lark => lark::serialize(grammar, node),
        GrammarDialect::Gbnf => gbnf::serialize(grammar, node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_names_round_trip() {
        for dialect in [
            GrammarDialect::Regex,
            GrammarDialect::Lark,
            GrammarDialect::Gbnf,
        ] {
            assert_eq!(GrammarDialect::parse(dialect.as_str()), Some(dialect));
        }
        assert_eq!(GrammarDialect::parse("LARK"), Some(GrammarDialect::Lark));
        assert_eq!(GrammarDialect::parse("ebnf"), None);
    }

    #[test]
    fn test_dialect_serde_wire_form() {
        let json = serde_json::to_string(&GrammarDialect::Gbnf).unwrap();
        assert_eq!(json, "\"gbnf\"");
    }
}
