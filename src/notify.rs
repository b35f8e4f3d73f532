//! C5: notification filters and fan-out, grounded on
//! `original_source/src/notify.c`'s filter registration and
//! `src/hub/process.c`'s NOTIFY dispatch.

use anyhow::{anyhow, bail};

/// A single subscription filter a client has registered via
/// `NOTIFY.ADD_FILTER`. Filters within a session are OR-combined: a
/// notification is delivered if it matches *any* of the session's filters,
/// and a session with no filters at all receives nothing (default-drop).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Exact match against the whole notification text.
    Match(String),
    /// Matches when the pattern is a leading substring of the text.
    Action(String),
    /// Matches when the pattern equals the whole first whitespace-delimited
    /// token of the text (not just any leading substring — see spec.md
    /// §4.5/§9, which tightens the original C's looser prefix loop).
    Prefix(String),
}

impl Filter {
    pub fn parse(kind: &str, pattern: &str) -> anyhow::Result<Filter> {
        if pattern.is_empty() {
            bail!("filter pattern must not be empty");
        }
        match kind {
            "MATCH" => Ok(Filter::Match(pattern.to_string())),
            "ACTION" => Ok(Filter::Action(pattern.to_string())),
            "PREFIX" => Ok(Filter::Prefix(pattern.to_string())),
            other => Err(anyhow!("unknown filter kind '{}'", other)),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Filter::Match(pattern) => text == pattern,
            Filter::Action(pattern) => text.starts_with(pattern.as_str()),
            Filter::Prefix(pattern) => {
                let first_token = text.split_whitespace().next().unwrap_or("");
                first_token == pattern
            }
        }
    }
}

/// True if any filter in `filters` matches `text`.
pub fn any_matches(filters: &[Filter], text: &str) -> bool {
    filters.iter().any(|f| f.matches(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_requires_exact_equality() {
        let f = Filter::parse("MATCH", "ALARM hot").unwrap();
        assert!(f.matches("ALARM hot"));
        assert!(!f.matches("ALARM hot now"));
    }

    #[test]
    fn action_matches_any_leading_substring() {
        let f = Filter::parse("ACTION", "ALARM").unwrap();
        assert!(f.matches("ALARM hot"));
        assert!(f.matches("ALARMING")); // substring, not token-bounded
        assert!(!f.matches("pre ALARM"));
    }

    #[test]
    fn prefix_matches_whole_leading_token_only() {
        let f = Filter::parse("PREFIX", "ALARM").unwrap();
        assert!(f.matches("ALARM hot"));
        assert!(!f.matches("ALARMING")); // token is "ALARMING", not "ALARM"
        assert!(!f.matches("pre ALARM"));
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Filter::parse("BOGUS", "x").is_err());
    }

    #[test]
    fn rejects_empty_pattern() {
        assert!(Filter::parse("MATCH", "").is_err());
    }

    #[test]
    fn empty_filter_set_matches_nothing() {
        let filters: Vec<Filter> = Vec::new();
        assert!(!any_matches(&filters, "ALARM hot"));
    }

    #[test]
    fn or_combination_across_filters() {
        let filters = vec![
            Filter::parse("MATCH", "STATUS ok").unwrap(),
            Filter::parse("PREFIX", "ALARM").unwrap(),
        ];
        assert!(any_matches(&filters, "ALARM hot"));
        assert!(any_matches(&filters, "STATUS ok"));
        assert!(!any_matches(&filters, "STATUS degraded"));
    }
}
