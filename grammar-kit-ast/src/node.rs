/// Index of a rule inside a [`Grammar`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub(crate) usize);

/// A node in the grammar tree.
#[derive(Debug, Clone, PartialEq)]
pub enum GrammarNode {
    /// An exact string.
    Literal(String),

    /// A regular expression constraint. `None` is the unconstrained-generation
    /// sentinel: any output is acceptable.
    Regex(Option<String>),

    /// An ordered sequence of children.
    Join(Vec<GrammarNode>),

    /// An ordered set of alternatives.
    Select(Vec<GrammarNode>),

    /// `min..=max` repetitions of a child; `max == None` means unbounded.
    Repeat {
        /// The repeated child.
        node: Box<GrammarNode>,
        /// Minimum repetition count.
        min: u32,
        /// Maximum repetition count, unbounded when `None`.
        max: Option<u32>,
    },

    /// A rule occurrence at its definition site.
    Rule(RuleId),

    /// A reference to a rule, possibly one declared but not yet defined.
    /// This is how cyclic rule graphs are built.
    RuleRef(RuleId),
}

impl GrammarNode {
    /// Whether this node can only ever match the empty string, judged
    /// structurally without following rule references.
    pub fn is_null(&self) -> bool {
        match self {
            GrammarNode::Literal(value) => value.is_empty(),
            GrammarNode::Join(children) => children.iter().all(GrammarNode::is_null),
            _ => false,
        }
    }
}

/// A stop condition attached to a rule.
#[derive(Debug, Clone, PartialEq)]
pub enum StopCondition {
    /// Stop on an exact string; forwarded to the provider as a `stop` param.
    Literal(String),
    /// Stop on a regex match; enforced client-side while streaming.
    Regex(String),
}

/// A named rule: a grammar node plus generation attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Rule name; translators normalize it per dialect.
    pub name: String,

    /// The rule body. `None` until [`Grammar::define`] fills a declared rule.
    pub value: Option<GrammarNode>,

    /// Capture name for the text this rule matches.
    pub capture: Option<String>,

    /// When capturing, append to a list instead of overwriting.
    pub list_append: bool,

    /// Optional stop condition ending generation early.
    pub stop: Option<StopCondition>,

    /// Capture name for the matched stop text.
    pub stop_capture: Option<String>,

    /// Literal appended after the rule's output.
    pub suffix: Option<String>,

    /// Per-rule sampling temperature override.
    pub temperature: Option<f64>,

    /// Per-rule completion token budget.
    pub max_tokens: Option<u32>,

    /// Prefer the shortest match when repeating.
    pub lazy: bool,
}

impl Rule {
    /// Creates a rule with the given name and body and no extra attributes.
    pub fn new(name: impl Into<String>, value: GrammarNode) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            capture: None,
            list_append: false,
            stop: None,
            stop_capture: None,
            suffix: None,
            temperature: None,
            max_tokens: None,
            lazy: false,
        }
    }

    /// Sets the capture name.
    pub fn with_capture(mut self, capture: impl Into<String>) -> Self {
        self.capture = Some(capture.into());
        self
    }

    /// Makes the capture append to a list.
    pub fn with_list_append(mut self, list_append: bool) -> Self {
        self.list_append = list_append;
        self
    }

    /// Sets a literal stop string.
    pub fn with_stop_literal(mut self, stop: impl Into<String>) -> Self {
        self.stop = Some(StopCondition::Literal(stop.into()));
        self
    }

    /// Sets a stop regex.
    pub fn with_stop_regex(mut self, pattern: impl Into<String>) -> Self {
        self.stop = Some(StopCondition::Regex(pattern.into()));
        self
    }

    /// Sets the capture name for matched stop text.
    pub fn with_stop_capture(mut self, stop_capture: impl Into<String>) -> Self {
        self.stop_capture = Some(stop_capture.into());
        self
    }

    /// Sets the suffix literal.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Sets the per-rule temperature override.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the per-rule token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Marks the rule lazy.
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }
}

/// Arena of rules. Nodes address rules by [`RuleId`], which keeps cyclic
/// rule graphs representable and lets translators key their visited sets by
/// index instead of object identity.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    rules: Vec<Rule>,
}

impl Grammar {
    /// Creates an empty grammar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fully formed rule and returns its id.
    pub fn add_rule(&mut self, rule: Rule) -> RuleId {
        let id = RuleId(self.rules.len());
        self.rules.push(rule);
        id
    }

    /// Declares a rule by name without a body, for building cycles. The body
    /// is supplied later with [`Grammar::define`].
    pub fn declare(&mut self, name: impl Into<String>) -> RuleId {
        let mut rule = Rule::new(name, GrammarNode::Join(Vec::new()));
        rule.value = None;
        self.add_rule(rule)
    }

    /// Fills in the body of a previously declared rule.
    pub fn define(&mut self, id: RuleId, value: GrammarNode) {
        self.rules[id.0].value = Some(value);
    }

    /// Looks up a rule.
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    /// A definition-site node for the given rule.
    pub fn node(&self, id: RuleId) -> GrammarNode {
        GrammarNode::Rule(id)
    }

    /// A reference node for the given rule.
    pub fn rule_ref(&self, id: RuleId) -> GrammarNode {
        GrammarNode::RuleRef(id)
    }

    /// Number of rules in the arena.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the arena holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// An exact-string node.
pub fn literal(value: impl Into<String>) -> GrammarNode {
    GrammarNode::Literal(value.into())
}

/// A regex-constrained node.
pub fn regex(pattern: impl Into<String>) -> GrammarNode {
    GrammarNode::Regex(Some(pattern.into()))
}

/// The unconstrained-generation sentinel.
pub fn unconstrained() -> GrammarNode {
    GrammarNode::Regex(None)
}

/// An ordered sequence of children.
pub fn join(children: Vec<GrammarNode>) -> GrammarNode {
    GrammarNode::Join(children)
}

/// An ordered set of alternatives.
pub fn select(alternatives: Vec<GrammarNode>) -> GrammarNode {
    GrammarNode::Select(alternatives)
}

/// `min..=max` repetitions of a child.
pub fn repeat(node: GrammarNode, min: u32, max: Option<u32>) -> GrammarNode {
    GrammarNode::Repeat {
        node: Box::new(node),
        min,
        max,
    }
}

/// Zero or one occurrence.
pub fn optional(node: GrammarNode) -> GrammarNode {
    repeat(node, 0, Some(1))
}

/// Zero or more occurrences.
pub fn zero_or_more(node: GrammarNode) -> GrammarNode {
    repeat(node, 0, None)
}

/// One or more occurrences.
pub fn one_or_more(node: GrammarNode) -> GrammarNode {
    repeat(node, 1, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_builder() {
        let rule = Rule::new("answer", literal("YES"))
            .with_capture("answer")
            .with_stop_regex("STOP")
            .with_stop_capture("stopped");

        assert_eq!(rule.name, "answer");
        assert_eq!(rule.capture.as_deref(), Some("answer"));
        assert_eq!(rule.stop, Some(StopCondition::Regex("STOP".to_string())));
        assert_eq!(rule.stop_capture.as_deref(), Some("stopped"));
        assert!(!rule.lazy);
    }

    #[test]
    fn test_declare_then_define_builds_cycle() {
        let mut grammar = Grammar::new();
        let expr = grammar.declare("expr");
        grammar.define(
            expr,
            select(vec![
                literal("x"),
                join(vec![literal("("), grammar.rule_ref(expr), literal(")")]),
            ]),
        );

        assert_eq!(grammar.len(), 1);
        assert!(grammar.rule(expr).value.is_some());
    }

    #[test]
    fn test_is_null() {
        assert!(literal("").is_null());
        assert!(join(vec![]).is_null());
        assert!(join(vec![literal(""), literal("")]).is_null());
        assert!(!literal("x").is_null());
        assert!(!unconstrained().is_null());
    }

    #[test]
    fn test_helper_constructors() {
        assert_eq!(
            optional(literal("a")),
            repeat(literal("a"), 0, Some(1)),
        );
        assert_eq!(zero_or_more(literal("a")), repeat(literal("a"), 0, None));
        assert_eq!(one_or_more(literal("a")), repeat(literal("a"), 1, None));
    }
}
