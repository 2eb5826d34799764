//! # Text Matchers
//!
//! String rules applied to email subjects and senders.

use regex::Regex;

/// A rule matched against one text field.
#[derive(Clone, Debug)]
pub enum TextMatcher {
    /// Whole-field equality.
    Exact(String),
    /// Substring match.
    Contains(String),
    /// Regular expression match.
    Pattern(Regex),
}

impl TextMatcher {
    /// Compile a pattern matcher.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    /// Whether `text` satisfies this rule.
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Exact(expected) => text == expected,
            Self::Contains(needle) => text.contains(needle.as_str()),
            Self::Pattern(re) => re.is_match(text),
        }
    }
}

impl From<&str> for TextMatcher {
    fn from(s: &str) -> Self {
        Self::Contains(s.to_string())
    }
}

impl From<String> for TextMatcher {
    fn from(s: String) -> Self {
        Self::Contains(s)
    }
}

impl From<Regex> for TextMatcher {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}
