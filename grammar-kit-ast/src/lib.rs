//! Grammar node tree for constrained generation.
//!
//! A [`Grammar`] owns an arena of named rules addressed by [`RuleId`];
//! [`GrammarNode`] values reference rules by index, so rule graphs may be
//! cyclic without any reference-counting gymnastics. The crate also ships a
//! backtracking matcher used to re-validate provider output against the
//! grammar that was sent over the wire.
//!
//! # Examples
//!
//! ```
//! use grammar_kit_ast::{Grammar, Rule, literal, select};
//!
//! let mut grammar = Grammar::new();
//! let answer = grammar.add_rule(
//!     Rule::new("answer", select(vec![literal("YES"), literal("NO")])).with_capture("answer"),
//! );
//! let root = grammar.node(answer);
//!
//! let matches = grammar.match_text(&root, "YES").unwrap();
//! assert_eq!(matches.capture_text("answer"), Some("YES"));
//! ```

/// Backtracking matcher and capture extraction.
pub mod matcher;
/// Grammar nodes, rules, and the rule arena.
pub mod node;

pub use matcher::{CaptureEntry, CaptureValue, Matches};
pub use node::{
    Grammar, GrammarNode, Rule, RuleId, StopCondition, join, literal, one_or_more, optional,
    regex, repeat, select, unconstrained, zero_or_more,
};
