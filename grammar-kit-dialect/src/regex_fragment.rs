use grammar_kit_ast::{Grammar, GrammarNode};

use crate::error::UnsupportedFeature;

/// Serializes a grammar as a bare regex fragment.
///
/// Only two shapes are expressible: a regex node (emitted verbatim) and a
/// selection whose alternatives are all literals (emitted as a
/// non-capturing alternation of escaped literals). Everything else is
/// rejected so the richer dialects get a chance instead.
pub fn serialize(_grammar: &Grammar, node: &GrammarNode) -> Result<String, UnsupportedFeature> {
    match node {
        GrammarNode::Regex(Some(pattern)) => Ok(pattern.clone()),
        GrammarNode::Regex(None) => Err(UnsupportedFeature::new(
            "unconstrained generation cannot be expressed as a regex fragment",
        )),
        GrammarNode::Select(alternatives) => {
            let mut literals = Vec::with_capacity(alternatives.len());
            for alternative in alternatives {
                match alternative {
                    GrammarNode::Literal(value) => literals.push(regex::escape(value)),
                    _ => {
                        return Err(UnsupportedFeature::new(
                            "regex fragments only support selections of literals",
                        ));
                    }
                }
            }
            Ok(format!("(?:{})", literals.join("|")))
        }
        _ => Err(UnsupportedFeature::new(
            "regex fragments only support regex nodes and selections of literals",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grammar_kit_ast::{join, literal, regex, select, unconstrained};

    #[test]
    fn test_regex_node_verbatim() {
        let grammar = Grammar::new();
        assert_eq!(
            serialize(&grammar, &regex("YES|NO")).unwrap(),
            "YES|NO"
        );
    }

    #[test]
    fn test_select_of_literals() {
        let grammar = Grammar::new();
        let node = select(vec![literal("YES"), literal("NO")]);
        assert_eq!(serialize(&grammar, &node).unwrap(), "(?:YES|NO)");
    }

    #[test]
    fn test_select_literals_are_escaped() {
        let grammar = Grammar::new();
        let node = select(vec![literal("a.b"), literal("c+d")]);
        assert_eq!(serialize(&grammar, &node).unwrap(), "(?:a\\.b|c\\+d)");
    }

    #[test]
    fn test_unconstrained_rejected() {
        let grammar = Grammar::new();
        assert!(serialize(&grammar, &unconstrained()).is_err());
    }

    #[test]
    fn test_mixed_select_rejected() {
        let grammar = Grammar::new();
        let node = select(vec![literal("YES"), regex("[0-9]")]);
        assert!(serialize(&grammar, &node).is_err());
    }

    #[test]
    fn test_join_rejected() {
        let grammar = Grammar::new();
        assert!(serialize(&grammar, &join(vec![literal("a")])).is_err());
    }
}
