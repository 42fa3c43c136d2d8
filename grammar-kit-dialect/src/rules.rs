use std::collections::{HashMap, HashSet};

use grammar_kit_ast::{Grammar, GrammarNode, Rule, RuleId};

use crate::error::UnsupportedFeature;
use crate::naming::normalize_rule_name;

/// The pieces that differ between the rule-based dialects. Both Lark and
/// GBNF walk the tree the same way; only the root-rule name, the definition
/// separator, the regex rendering, and the bounded-repeat ceiling vary.
pub(crate) trait DialectBackend {
    const ROOT: &'static str;
    const SEPARATOR: &'static str;
    const BOUNDED_REPEAT_LIMIT: u32;
    const NAME: &'static str;

    fn render_regex(pattern: &str) -> Result<String, UnsupportedFeature>;
}

/// JSON string escaping, which is also the literal syntax of both dialects.
pub(crate) fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Lowers a repeat to dialect syntax: `*`/`+`/`?` for the open shapes,
/// copy expansion for exact counts and bounded ranges (as an alternation of
/// copy-count variants), rejecting ranges wider than the dialect ceiling.
pub(crate) fn repeat_to_expr(
    inner: &str,
    min: u32,
    max: Option<u32>,
    limit: u32,
    dialect: &str,
) -> Result<String, UnsupportedFeature> {
    if max.is_some_and(|max| max < min) {
        return Err(UnsupportedFeature::new(
            "repeat maximum must be >= minimum",
        ));
    }
    match (min, max) {
        (0, None) => Ok(format!("{inner}*")),
        (1, None) => Ok(format!("{inner}+")),
        (0, Some(1)) => Ok(format!("{inner}?")),
        (min, None) => {
            let required = vec![inner; min as usize].join(" ");
            Ok(format!("{required} {inner}*"))
        }
        (min, Some(max)) => {
            if max - min > limit {
                return Err(UnsupportedFeature::new(format!(
                    "{dialect} dialect refuses bounded repeats wider than {limit} (got {min}..{max})"
                )));
            }
            let mut variants: Vec<String> = (min..=max)
                .map(|count| {
                    if count == 0 {
                        "\"\"".to_string()
                    } else {
                        vec![inner; count as usize].join(" ")
                    }
                })
                .collect();
            if variants.len() == 1 {
                Ok(variants.remove(0))
            } else {
                Ok(format!("({})", variants.join(" | ")))
            }
        }
    }
}

/// Parenthesizes a sub-expression when it would otherwise bind wrong.
pub(crate) fn group_if_compound(expr: String) -> String {
    if expr.contains(' ') || expr.contains('|') {
        format!("({expr})")
    } else {
        expr
    }
}

pub(crate) struct RuleWalker<'g, B: DialectBackend> {
    grammar: &'g Grammar,
    names: HashMap<RuleId, String>,
    reserved: HashSet<String>,
    definitions: Vec<(String, String)>,
    _backend: std::marker::PhantomData<B>,
}

/// Serializes a grammar for a rule-based dialect: collects named rule
/// definitions via a topological walk (cycles pre-register the rule name
/// before recursing into its body) and synthesizes a root rule when the
/// tree does not already carry one.
pub(crate) fn serialize_with<B: DialectBackend>(
    grammar: &Grammar,
    node: &GrammarNode,
) -> Result<String, UnsupportedFeature> {
    let mut walker = RuleWalker::<B> {
        grammar,
        names: HashMap::new(),
        reserved: HashSet::new(),
        definitions: Vec::new(),
        _backend: std::marker::PhantomData,
    };

    let root_name = match node {
        GrammarNode::Rule(id)
            if normalize_rule_name(&grammar.rule(*id).name, B::ROOT) == B::ROOT =>
        {
            walker.visit_rule(*id)?
        }
        _ => {
            let body = walker.visit_expr(node, false)?;
            walker.reserved.insert(B::ROOT.to_string());
            walker.definitions.push((B::ROOT.to_string(), body));
            B::ROOT.to_string()
        }
    };

    let mut lines: Vec<String> = walker
        .definitions
        .iter()
        .map(|(name, body)| format!("{name}{}{body}", B::SEPARATOR))
        .collect();
    if root_name != B::ROOT && !walker.definitions.iter().any(|(name, _)| name == B::ROOT) {
        lines.insert(0, format!("{}{}{root_name}", B::ROOT, B::SEPARATOR));
    }
    Ok(lines.join("\n"))
}

impl<'g, B: DialectBackend> RuleWalker<'g, B> {
    fn unsupported_attrs(rule: &Rule) -> Vec<&'static str> {
        let mut unsupported = Vec::new();
        if rule.temperature.is_some() {
            unsupported.push("temperature");
        }
        if rule.max_tokens.is_some() {
            unsupported.push("max_tokens");
        }
        if rule.stop.is_some() {
            unsupported.push("stop");
        }
        if rule.suffix.is_some() {
            unsupported.push("suffix");
        }
        if rule.stop_capture.is_some() {
            unsupported.push("stop_capture");
        }
        if rule.lazy {
            unsupported.push("lazy");
        }
        unsupported
    }

    fn visit_rule(&mut self, id: RuleId) -> Result<String, UnsupportedFeature> {
        let rule = self.grammar.rule(id);
        let unsupported = Self::unsupported_attrs(rule);
        if !unsupported.is_empty() {
            return Err(UnsupportedFeature::new(format!(
                "{} dialect does not support rule attributes: {}",
                B::NAME,
                unsupported.join(", ")
            )));
        }

        if let Some(existing) = self.names.get(&id) {
            return Ok(existing.clone());
        }

        let base = normalize_rule_name(&rule.name, "rule");
        let mut name = base.clone();
        let mut suffix = 1;
        while self.reserved.contains(&name) {
            suffix += 1;
            name = format!("{base}_{suffix}");
        }
        // Register before recursing so cycles resolve to a reference.
        self.names.insert(id, name.clone());
        self.reserved.insert(name.clone());

        let value = rule.value.as_ref().ok_or_else(|| {
            UnsupportedFeature::new(format!("rule '{}' has no definition", rule.name))
        })?;
        let body = self.visit_expr(value, false)?;
        self.definitions.push((name.clone(), body));
        Ok(name)
    }

    fn visit_expr(&mut self, node: &GrammarNode, nested: bool) -> Result<String, UnsupportedFeature> {
        match node {
            GrammarNode::Rule(id) | GrammarNode::RuleRef(id) => self.visit_rule(*id),
            GrammarNode::Literal(value) => Ok(json_string(value)),
            GrammarNode::Regex(Some(pattern)) => B::render_regex(pattern),
            GrammarNode::Regex(None) => Err(UnsupportedFeature::new(format!(
                "unconstrained generation cannot be expressed in the {} dialect",
                B::NAME
            ))),
            GrammarNode::Join(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if child.is_null() {
                        continue;
                    }
                    parts.push(self.visit_expr(child, true)?);
                }
                if parts.is_empty() {
                    Ok("\"\"".to_string())
                } else {
                    Ok(parts.join(" "))
                }
            }
            GrammarNode::Select(alternatives) => {
                let mut parts = Vec::with_capacity(alternatives.len());
                for alternative in alternatives {
                    parts.push(self.visit_expr(alternative, true)?);
                }
                let body = parts.join(" | ");
                Ok(if nested { format!("({body})") } else { body })
            }
            GrammarNode::Repeat { node, min, max } => {
                let base = group_if_compound(self.visit_expr(node, true)?);
                repeat_to_expr(&base, *min, *max, B::BOUNDED_REPEAT_LIMIT, B::NAME)
            }
        }
    }
}
