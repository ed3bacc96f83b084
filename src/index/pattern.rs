//! Tag-value pattern matching: literal sets, globs, and regexes.
//!
//! A predicate value starting with `:` is a comma-separated literal set;
//! one starting with `!` is a glob (`*`/`?`); anything else is a plain
//! regex.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PatternError {
    #[error("invalid pattern {0:?}: {1}")]
    BadRegex(String, regex::Error),
}

pub enum ValueMatcher {
    Set(Vec<Vec<u8>>),
    Glob(Regex),
    Regex(Regex),
}

impl ValueMatcher {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if let Some(rest) = raw.strip_prefix(':') {
            Ok(ValueMatcher::Set(
                rest.split(',').map(|s| s.as_bytes().to_vec()).collect(),
            ))
        } else if let Some(rest) = raw.strip_prefix('!') {
            let pattern = glob_to_regex(rest);
            let regex = Regex::new(&pattern)
                .map_err(|e| PatternError::BadRegex(pattern.clone(), e))?;
            Ok(ValueMatcher::Glob(regex))
        } else {
            let regex =
                Regex::new(raw).map_err(|e| PatternError::BadRegex(raw.to_string(), e))?;
            Ok(ValueMatcher::Regex(regex))
        }
    }

    pub fn matches(&self, value: &[u8]) -> bool {
        match self {
            ValueMatcher::Set(values) => values.iter().any(|v| v == value),
            ValueMatcher::Glob(re) | ValueMatcher::Regex(re) => {
                std::str::from_utf8(value).is_ok_and(|s| re.is_match(s))
            }
        }
    }
}

/// Translates a shell-style glob (`*`, `?`) to an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_matcher_matches_any_member() {
        let m = ValueMatcher::parse(":a,b,c").unwrap();
        assert!(m.matches(b"b"));
        assert!(!m.matches(b"d"));
    }

    #[test]
    fn glob_matcher_translates_wildcards() {
        let m = ValueMatcher::parse("!bo*").unwrap();
        assert!(m.matches(b"boo"));
        assert!(!m.matches(b"foo"));
    }

    #[test]
    fn plain_regex_matcher() {
        let m = ValueMatcher::parse("^(test|staging)$").unwrap();
        assert!(m.matches(b"test"));
        assert!(!m.matches(b"prod"));
    }
}
