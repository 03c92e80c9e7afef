//! Readiness line detection.

#![allow(missing_docs)]

/// Recognizes the line a backend prints once its RPC listener is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessMatcher {
    expected: String,
}

impl ReadinessMatcher {
    /// `pattern` may contain `{port}`, replaced by the assigned port.
    #[must_use]
    pub fn new(pattern: &str, port: u16) -> Self {
        Self {
            expected: pattern.replace("{port}", &port.to_string()),
        }
    }

    #[must_use]
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// True when the line contains the expected text and the match is not
    /// followed by another digit (port 900 must not match `:9001`).
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        let line = line.trim_end();
        line.match_indices(self.expected.as_str()).any(|(start, found)| {
            !line[start + found.len()..]
                .chars()
                .next()
                .is_some_and(|next| next.is_ascii_digit())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_READY_PATTERN;

    #[test]
    fn matches_line_for_assigned_port_only() {
        let matcher = ReadinessMatcher::new(DEFAULT_READY_PATTERN, 9001);
        assert!(matcher.matches("[123.456] [HTTP] Starting RPC server on localhost:9001\r\n"));
        assert!(!matcher.matches("[HTTP] Starting RPC server on localhost:9002"));
        assert!(!matcher.matches("Loading trace: 12 MB"));
    }

    #[test]
    fn port_prefix_does_not_match_longer_port() {
        let matcher = ReadinessMatcher::new("listening on :{port}", 900);
        assert!(matcher.matches("listening on :900 (ipv4)"));
        assert!(!matcher.matches("listening on :9001"));
    }
}
