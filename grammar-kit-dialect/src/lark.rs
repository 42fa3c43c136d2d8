use grammar_kit_ast::{Grammar, GrammarNode};

use crate::error::UnsupportedFeature;
use crate::rules::{serialize_with, DialectBackend};

struct LarkBackend;

impl DialectBackend for LarkBackend {
    const ROOT: &'static str = "start";
    const SEPARATOR: &'static str = ": ";
    const BOUNDED_REPEAT_LIMIT: u32 = 32;
    const NAME: &'static str = "Lark";

    fn render_regex(pattern: &str) -> Result<String, UnsupportedFeature> {
        // Lark regex terminals are `/…/`; escape bare slashes and newlines.
        let mut escaped = String::with_capacity(pattern.len() + 2);
        let mut prev_backslash = false;
        for ch in pattern.chars() {
            match ch {
                '/' if !prev_backslash => escaped.push_str("\\/"),
                '\n' => escaped.push_str("\\n"),
                _ => escaped.push(ch),
            }
            prev_backslash = ch == '\\' && !prev_backslash;
        }
        Ok(format!("/{escaped}/"))
    }
}

/// Serializes a grammar in the Lark subset dialect.
///
/// The root rule is named `start`; if the tree's root is not itself a rule
/// normalizing to that name, an implicit `start` rule is synthesized.
pub fn serialize(grammar: &Grammar, node: &GrammarNode) -> Result<String, UnsupportedFeature> {
    serialize_with::<LarkBackend>(grammar, node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammar_kit_ast::{join, literal, regex, repeat, select, unconstrained, Rule};

    #[test]
    fn test_regex_root_synthesizes_start() {
        let grammar = Grammar::new();
        let rendered = serialize(&grammar, &regex("YES|NO")).unwrap();
        assert_eq!(rendered, "start: /YES|NO/");
    }

    #[test]
    fn test_literal_is_json_escaped() {
        let grammar = Grammar::new();
        let rendered = serialize(&grammar, &literal("say \"hi\"\n")).unwrap();
        assert_eq!(rendered, "start: \"say \\\"hi\\\"\\n\"");
    }

    #[test]
    fn test_regex_slash_and_newline_escaped() {
        let grammar = Grammar::new();
        let rendered = serialize(&grammar, &regex("a/b\nc")).unwrap();
        assert_eq!(rendered, "start: /a\\/b\\nc/");
    }

    #[test]
    fn test_already_escaped_slash_kept() {
        let grammar = Grammar::new();
        let rendered = serialize(&grammar, &regex("a\\/b")).unwrap();
        assert_eq!(rendered, "start: /a\\/b/");
    }

    #[test]
    fn test_join_is_space_separated_and_filters_null() {
        let grammar = Grammar::new();
        let node = join(vec![literal("a"), literal(""), literal("b")]);
        assert_eq!(serialize(&grammar, &node).unwrap(), "start: \"a\" \"b\"");
    }

    #[test]
    fn test_empty_join_is_empty_literal() {
        let grammar = Grammar::new();
        assert_eq!(serialize(&grammar, &join(vec![])).unwrap(), "start: \"\"");
    }

    #[test]
    fn test_select_parenthesized_only_when_nested() {
        let grammar = Grammar::new();
        let top = select(vec![literal("a"), literal("b")]);
        assert_eq!(serialize(&grammar, &top).unwrap(), "start: \"a\" | \"b\"");

        let nested = join(vec![select(vec![literal("a"), literal("b")]), literal("c")]);
        assert_eq!(
            serialize(&grammar, &nested).unwrap(),
            "start: (\"a\" | \"b\") \"c\""
        );
    }

    #[test]
    fn test_repeat_shapes() {
        let grammar = Grammar::new();
        assert_eq!(
            serialize(&grammar, &repeat(literal("a"), 0, None)).unwrap(),
            "start: \"a\"*"
        );
        assert_eq!(
            serialize(&grammar, &repeat(literal("a"), 1, None)).unwrap(),
            "start: \"a\"+"
        );
        assert_eq!(
            serialize(&grammar, &repeat(literal("a"), 0, Some(1))).unwrap(),
            "start: \"a\"?"
        );
        assert_eq!(
            serialize(&grammar, &repeat(literal("a"), 3, Some(3))).unwrap(),
            "start: \"a\" \"a\" \"a\""
        );
        assert_eq!(
            serialize(&grammar, &repeat(literal("a"), 2, None)).unwrap(),
            "start: \"a\" \"a\" \"a\"*"
        );
        assert_eq!(
            serialize(&grammar, &repeat(literal("a"), 1, Some(2))).unwrap(),
            "start: (\"a\" | \"a\" \"a\")"
        );
    }

    #[test]
    fn test_wide_bounded_repeat_rejected() {
        let grammar = Grammar::new();
        let node = repeat(regex("[0-9]"), 3, Some(36));
        let err = serialize(&grammar, &node).unwrap_err();
        assert!(err.reason.contains("bounded repeats"));
    }

    #[test]
    fn test_bounded_repeat_at_limit_accepted() {
        let grammar = Grammar::new();
        let node = repeat(regex("[0-9]"), 0, Some(32));
        assert!(serialize(&grammar, &node).is_ok());
    }

    #[test]
    fn test_unconstrained_rejected() {
        let grammar = Grammar::new();
        assert!(serialize(&grammar, &unconstrained()).is_err());
    }

    #[test]
    fn test_rule_attributes_rejected() {
        let mut grammar = Grammar::new();
        let id = grammar.add_rule(Rule::new("gen", regex("[A-Z]+")).with_max_tokens(3));
        let root = grammar.node(id);
        let err = serialize(&grammar, &root).unwrap_err();
        assert!(err.reason.contains("rule attributes"));
        assert!(err.reason.contains("max_tokens"));
    }

    #[test]
    fn test_start_rule_used_as_root() {
        let mut grammar = Grammar::new();
        let id = grammar.add_rule(Rule::new("start", select(vec![literal("YES"), literal("NO")])));
        let root = grammar.node(id);
        assert_eq!(
            serialize(&grammar, &root).unwrap(),
            "start: \"YES\" | \"NO\""
        );
    }

    #[test]
    fn test_named_rule_gets_forwarding_start() {
        let mut grammar = Grammar::new();
        let id = grammar.add_rule(Rule::new("Answer", literal("YES")));
        let inner = grammar.node(id);
        let rendered = serialize(&grammar, &join(vec![inner, literal("!")])).unwrap();
        assert_eq!(rendered, "answer: \"YES\"\nstart: answer \"!\"");
    }

    #[test]
    fn test_cyclic_rules_reference_by_name() {
        let mut grammar = Grammar::new();
        let expr = grammar.declare("expr");
        grammar.define(
            expr,
            select(vec![
                literal("x"),
                join(vec![literal("("), grammar.rule_ref(expr), literal(")")]),
            ]),
        );
        let root = grammar.node(expr);
        let rendered = serialize(&grammar, &root).unwrap();
        assert_eq!(
            rendered,
            "expr: \"x\" | \"(\" expr \")\"\nstart: expr"
        );
    }

    #[test]
    fn test_duplicate_rule_names_disambiguated() {
        let mut grammar = Grammar::new();
        let first = grammar.add_rule(Rule::new("item", literal("a")));
        let second = grammar.add_rule(Rule::new("item", literal("b")));
        let root = join(vec![grammar.node(first), grammar.node(second)]);
        let rendered = serialize(&grammar, &root).unwrap();
        assert!(rendered.contains("item: \"a\""));
        assert!(rendered.contains("item_2: \"b\""));
        assert!(rendered.contains("start: item item_2"));
    }

    #[test]
    fn test_repeated_rule_target_reuses_name() {
        let mut grammar = Grammar::new();
        let word = grammar.add_rule(Rule::new("word", regex("[a-z]+")));
        let root = join(vec![grammar.node(word), literal(" "), grammar.node(word)]);
        let rendered = serialize(&grammar, &root).unwrap();
        assert_eq!(
            rendered,
            "word: /[a-z]+/\nstart: word \" \" word"
        );
    }
}
