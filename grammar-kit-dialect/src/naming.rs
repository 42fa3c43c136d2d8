/// Normalizes a rule name for dialect output: non-identifier characters are
/// replaced with `_`, an empty result falls back to `default`, names that
/// start with a digit get a `<default>_` prefix, and everything lowercases.
pub(crate) fn normalize_rule_name(name: &str, default: &str) -> String {
    let mut normalized: String = name
        .trim()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect();
    if normalized.is_empty() {
        normalized = default.to_string();
    }
    if normalized.chars().next().is_some_and(|ch| ch.is_ascii_digit()) {
        normalized = format!("{default}_{normalized}");
    }
    normalized.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_non_identifier_characters() {
        assert_eq!(normalize_rule_name("My Rule!", "rule"), "my_rule_");
    }

    #[test]
    fn test_empty_falls_back_to_default() {
        assert_eq!(normalize_rule_name("  ", "rule"), "rule");
        assert_eq!(normalize_rule_name("", "start"), "start");
    }

    #[test]
    fn test_leading_digit_gets_prefix() {
        assert_eq!(normalize_rule_name("2nd", "rule"), "rule_2nd");
    }

    #[test]
    fn test_lowercases() {
        assert_eq!(normalize_rule_name("ANSWER", "rule"), "answer");
    }
}
