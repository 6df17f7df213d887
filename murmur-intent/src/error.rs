//! Error types for the murmur-intent crate.

/// Errors produced by the local intent classifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    /// The utterance was empty or whitespace only.
    #[error("empty input")]
    EmptyInput,

    /// The utterance exceeded the maximum supported length.
    #[error("input too long: {0} characters")]
    TooLong(usize),
}

/// Convenience type alias for murmur-intent results.
pub type Result<T> = std::result::Result<T, IntentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_empty_input() {
        assert_eq!(IntentError::EmptyInput.to_string(), "empty input");
    }

    #[test]
    fn display_too_long() {
        assert_eq!(
            IntentError::TooLong(4096).to_string(),
            "input too long: 4096 characters"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IntentError>();
    }
}
