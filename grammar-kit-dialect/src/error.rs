use thiserror::Error;

/// A grammar construct the selected dialect cannot express.
///
/// Raised synchronously before any request is made, so callers can retry
/// with a different dialect or surface the failure to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported grammar feature: {reason}")]
pub struct UnsupportedFeature {
    /// Human-readable description of the offending construct.
    pub reason: String,
}

impl UnsupportedFeature {
    /// Creates a new error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_reason() {
        let err = UnsupportedFeature::new("negated character classes");
        assert_eq!(
            err.to_string(),
            "unsupported grammar feature: negated character classes"
        );
    }
}
