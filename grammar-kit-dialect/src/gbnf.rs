use grammar_kit_ast::{Grammar, GrammarNode};

use crate::error::UnsupportedFeature;
use crate::regex_subset::{self, ClassItem, RegexAst};
use crate::rules::{group_if_compound, json_string, repeat_to_expr, serialize_with, DialectBackend};

const BOUNDED_REPEAT_LIMIT: u32 = 16;

struct GbnfBackend;

impl DialectBackend for GbnfBackend {
    const ROOT: &'static str = "root";
    const SEPARATOR: &'static str = " ::= ";
    const BOUNDED_REPEAT_LIMIT: u32 = BOUNDED_REPEAT_LIMIT;
    const NAME: &'static str = "GBNF";

    fn render_regex(pattern: &str) -> Result<String, UnsupportedFeature> {
        regex_to_expression(pattern)
    }
}

/// Serializes a grammar in the GBNF subset dialect.
///
/// The root rule is named `root`; regex atoms are compiled down to GBNF
/// expressions rather than passed through, since GBNF has no regex
/// terminals.
pub fn serialize(grammar: &Grammar, node: &GrammarNode) -> Result<String, UnsupportedFeature> {
    serialize_with::<GbnfBackend>(grammar, node)
}

/// Compiles a regex pattern (safe subset) to a GBNF expression.
pub fn regex_to_expression(pattern: &str) -> Result<String, UnsupportedFeature> {
    let ast = regex_subset::parse(pattern).map_err(|err| {
        UnsupportedFeature::new(format!("invalid regex for the GBNF dialect: {err}"))
    })?;
    let expr = compile(&ast)?;
    if expr.is_empty() {
        Ok("\"\"".to_string())
    } else {
        Ok(expr)
    }
}

fn compile(ast: &RegexAst) -> Result<String, UnsupportedFeature> {
    match ast {
        RegexAst::Empty | RegexAst::Anchor => Ok(String::new()),
        RegexAst::Literal(ch) => Ok(json_string(&ch.to_string())),
        RegexAst::Dot => Ok("[\\x00-\\x7F]".to_string()),
        RegexAst::Class { negated: true, .. } => Err(UnsupportedFeature::new(
            "negated character classes are not supported in the GBNF dialect",
        )),
        RegexAst::Class { items, .. } => {
            let mut body = String::new();
            for item in items {
                match item {
                    ClassItem::Char(ch) => body.push_str(&escape_class_char(*ch)),
                    ClassItem::Range(low, high) => {
                        body.push_str(&escape_class_char(*low));
                        body.push('-');
                        body.push_str(&escape_class_char(*high));
                    }
                    ClassItem::Digit => body.push_str("0-9"),
                    ClassItem::Word => body.push_str("A-Za-z0-9_"),
                    ClassItem::Space => body.push_str(" \\t\\n\\r"),
                }
            }
            Ok(format!("[{body}]"))
        }
        RegexAst::Group(inner) => {
            let expr = non_empty(compile(inner)?);
            Ok(format!("({expr})"))
        }
        RegexAst::Concat(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let expr = compile(item)?;
                if !expr.is_empty() {
                    parts.push(expr);
                }
            }
            Ok(parts.join(" "))
        }
        RegexAst::Alternate(branches) => {
            let mut parts = Vec::with_capacity(branches.len());
            for branch in branches {
                parts.push(non_empty(compile(branch)?));
            }
            Ok(format!("({})", parts.join(" | ")))
        }
        RegexAst::Repeat { node, min, max } => {
            let inner = group_if_compound(non_empty(compile(node)?));
            repeat_to_expr(&inner, *min, *max, BOUNDED_REPEAT_LIMIT, "GBNF")
        }
        RegexAst::WordBoundary => Err(UnsupportedFeature::new(
            "word boundaries are not supported in the GBNF dialect",
        )),
    }
}

fn non_empty(expr: String) -> String {
    if expr.is_empty() {
        "\"\"".to_string()
    } else {
        expr
    }
}

fn escape_class_char(ch: char) -> String {
    match ch {
        '\\' | ']' | '-' | '^' => format!("\\{ch}"),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\t' => "\\t".to_string(),
        _ => ch.to_string(),
    }
}
