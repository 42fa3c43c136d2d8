use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use regex::Regex;

use crate::node::{Grammar, GrammarNode};

/// One captured value with its optional log-probability. Local validation
/// has no token-level information, so `log_prob` is `None` there.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEntry {
    /// The captured text.
    pub value: String,
    /// Log-probability of the captured text, when known.
    pub log_prob: Option<f64>,
}

/// A named capture: a single value, or an append-mode list of values.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureValue {
    /// A scalar capture; later matches overwrite earlier ones.
    Single(CaptureEntry),
    /// An append-mode capture accumulating every match.
    List(Vec<CaptureEntry>),
}

/// The result of a successful [`Grammar::match_text`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matches {
    /// Captures keyed by name, in name order.
    pub captures: BTreeMap<String, CaptureValue>,
}

impl Matches {
    /// The text of a scalar capture, if present.
    pub fn capture_text(&self, name: &str) -> Option<&str> {
        match self.captures.get(name)? {
            CaptureValue::Single(entry) => Some(&entry.value),
            CaptureValue::List(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Span {
    name: String,
    start: usize,
    end: usize,
    append: bool,
}

type Cont<'c> = &'c mut dyn FnMut(&mut Vec<Span>, usize) -> bool;

struct Matcher<'g> {
    grammar: &'g Grammar,
    text: &'g str,
    regex_cache: RefCell<HashMap<String, Option<Regex>>>,
    max_rule_depth: usize,
}

impl Grammar {
    /// Matches `text` against `root`, returning captures on success.
    ///
    /// Matching is a plain backtracking walk of the node tree; rule graphs
    /// may be cyclic, bounded by a depth guard proportional to the input
    /// length. Per-rule `max_tokens` budgets are not enforced here: remote
    /// providers tokenize differently than any local tokenizer would.
    pub fn match_text(&self, root: &GrammarNode, text: &str) -> Option<Matches> {
        let matcher = Matcher {
            grammar: self,
            text,
            regex_cache: RefCell::new(HashMap::new()),
            max_rule_depth: text.len() + 32,
        };
        let mut trail = Vec::new();
        let target = text.len();
        let matched = matcher.match_node(root, 0, 0, &mut trail, &mut |_, pos| pos == target);
        matched.then(|| build_matches(&trail, text))
    }
}

impl<'g> Matcher<'g> {
    fn match_node(
        &self,
        node: &GrammarNode,
        pos: usize,
        depth: usize,
        trail: &mut Vec<Span>,
        cont: Cont<'_>,
    ) -> bool {
        match node {
            GrammarNode::Literal(value) => {
                if self.text[pos..].starts_with(value.as_str()) {
                    cont(trail, pos + value.len())
                } else {
                    false
                }
            }
            GrammarNode::Regex(None) => {
                // Unconstrained: any (greedy-first) prefix of the remainder.
                for end in self.char_ends(pos).into_iter().rev() {
                    if cont(trail, end) {
                        return true;
                    }
                }
                false
            }
            GrammarNode::Regex(Some(pattern)) => {
                let Some(re) = self.anchored(pattern) else {
                    return false;
                };
                for end in self.char_ends(pos).into_iter().rev() {
                    if re.is_match(&self.text[pos..end]) && cont(trail, end) {
                        return true;
                    }
                }
                false
            }
            GrammarNode::Join(children) => self.match_seq(children, pos, depth, trail, cont),
            GrammarNode::Select(alternatives) => {
                for alternative in alternatives {
                    if self.match_node(alternative, pos, depth, trail, &mut *cont) {
                        return true;
                    }
                }
                false
            }
            GrammarNode::Repeat { node, min, max } => {
                self.match_repeat(node, *min, *max, 0, pos, depth, trail, cont)
            }
            GrammarNode::Rule(id) | GrammarNode::RuleRef(id) => {
                if depth >= self.max_rule_depth {
                    return false;
                }
                let rule = self.grammar.rule(*id);
                let Some(value) = rule.value.as_ref() else {
                    return false;
                };
                let start = pos;
                self.match_node(value, pos, depth + 1, trail, &mut |trail, end| {
                    let mark = trail.len();
                    if let Some(capture) = rule.capture.as_ref() {
                        trail.push(Span {
                            name: capture.clone(),
                            start,
                            end,
                            append: rule.list_append,
                        });
                    }
                    if cont(trail, end) {
                        true
                    } else {
                        trail.truncate(mark);
                        false
                    }
                })
            }
        }
    }

    fn match_seq(
        &self,
        items: &[GrammarNode],
        pos: usize,
        depth: usize,
        trail: &mut Vec<Span>,
        cont: Cont<'_>,
    ) -> bool {
        match items.split_first() {
            None => cont(trail, pos),
            Some((head, rest)) => self.match_node(head, pos, depth, trail, &mut |trail, next| {
                self.match_seq(rest, next, depth, trail, &mut *cont)
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn match_repeat(
        &self,
        node: &GrammarNode,
        min: u32,
        max: Option<u32>,
        count: u32,
        pos: usize,
        depth: usize,
        trail: &mut Vec<Span>,
        cont: Cont<'_>,
    ) -> bool {
        if count >= min && cont(trail, pos) {
            return true;
        }
        if max.is_some_and(|max| count >= max) {
            return false;
        }
        self.match_node(node, pos, depth, trail, &mut |trail, next| {
            if next == pos {
                // Zero-width iteration only helps toward an unmet minimum.
                count + 1 <= min
                    && self.match_repeat(node, min, max, count + 1, next, depth, trail, &mut *cont)
            } else {
                self.match_repeat(node, min, max, count + 1, next, depth, trail, &mut *cont)
            }
        })
    }

    /// Candidate end offsets (char boundaries) from `pos` to end of text,
    /// ascending, including `pos` itself for the empty match.
    fn char_ends(&self, pos: usize) -> Vec<usize> {
        let tail = &self.text[pos..];
        let mut ends: Vec<usize> = tail.char_indices().map(|(offset, _)| pos + offset).collect();
        ends.push(self.text.len());
        ends
    }

    fn anchored(&self, pattern: &str) -> Option<Regex> {
        let mut cache = self.regex_cache.borrow_mut();
        cache
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(&format!("^(?:{pattern})$")).ok())
            .clone()
    }
}

fn build_matches(trail: &[Span], text: &str) -> Matches {
    let mut matches = Matches::default();
    for span in trail {
        let entry = CaptureEntry {
            value: text[span.start..span.end].to_string(),
            log_prob: None,
        };
        if span.append {
            match matches.captures.get_mut(&span.name) {
                Some(CaptureValue::List(entries)) => entries.push(entry),
                _ => {
                    matches
                        .captures
                        .insert(span.name.clone(), CaptureValue::List(vec![entry]));
                }
            }
        } else {
            matches
                .captures
                .insert(span.name.clone(), CaptureValue::Single(entry));
        }
    }
    matches
}
