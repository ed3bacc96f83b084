//! Aggregation rules and NaN-aware fold functions.
//!
//! A metric name resolves to an [`AggMethod`] via an ordered list of regex
//! rules, first match wins, falling back to a configured default. Every
//! method treats `NaN` as "absent": an all-NaN window folds to `NaN`.

#[cfg(test)]
mod tests;

use regex::Regex;
use thiserror::Error;

use crate::config::AggRuleConfig;

/// Errors raised while compiling aggregation rules.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AggError {
    /// A configured regex pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A method name did not match any known aggregation function.
    #[error("unknown aggregation method {0:?}")]
    UnknownMethod(String),
}

/// The aggregation functions a downsample window may be folded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggMethod {
    Avg,
    Sum,
    Max,
    Min,
    Last,
}

impl AggMethod {
    fn parse(name: &str) -> Result<Self, AggError> {
        match name {
            "avg" => Ok(AggMethod::Avg),
            "sum" => Ok(AggMethod::Sum),
            "max" => Ok(AggMethod::Max),
            "min" => Ok(AggMethod::Min),
            "last" => Ok(AggMethod::Last),
            other => Err(AggError::UnknownMethod(other.to_string())),
        }
    }

    /// Folds a window of samples, treating `NaN` as absent.
    ///
    /// Returns `NaN` when every sample in `window` is `NaN`.
    pub fn fold(self, window: &[f64]) -> f64 {
        match self {
            AggMethod::Avg => safe_avg(window),
            AggMethod::Sum => safe_sum(window),
            AggMethod::Max => safe_max(window),
            AggMethod::Min => safe_min(window),
            AggMethod::Last => safe_last(window),
        }
    }
}

fn non_nan_sum(window: &[f64]) -> (f64, usize) {
    window
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0), |(total, count), v| (total + v, count + 1))
}

/// Mean of the non-NaN values in `window`; `NaN` if none are present.
pub fn safe_avg(window: &[f64]) -> f64 {
    let (total, count) = non_nan_sum(window);
    if count == 0 {
        f64::NAN
    } else {
        total / count as f64
    }
}

/// Sum of the non-NaN values in `window`; `NaN` if none are present.
pub fn safe_sum(window: &[f64]) -> f64 {
    let (total, count) = non_nan_sum(window);
    if count == 0 { f64::NAN } else { total }
}

/// Max of the non-NaN values in `window`; `NaN` if none are present.
pub fn safe_max(window: &[f64]) -> f64 {
    window
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NEG_INFINITY, f64::max)
        .let_nan_if_empty(window)
}

/// Min of the non-NaN values in `window`; `NaN` if none are present.
pub fn safe_min(window: &[f64]) -> f64 {
    window
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::INFINITY, f64::min)
        .let_nan_if_empty(window)
}

/// Last non-NaN value in `window`, in order; `NaN` if none are present.
pub fn safe_last(window: &[f64]) -> f64 {
    window
        .iter()
        .copied()
        .rev()
        .find(|v| !v.is_nan())
        .unwrap_or(f64::NAN)
}

trait NanIfEmptyExt {
    fn let_nan_if_empty(self, window: &[f64]) -> f64;
}

impl NanIfEmptyExt for f64 {
    fn let_nan_if_empty(self, window: &[f64]) -> f64 {
        if window.iter().all(|v| v.is_nan()) {
            f64::NAN
        } else {
            self
        }
    }
}

/// A compiled, ordered rule: metric names matching `regex` use `method`.
struct CompiledRule {
    regex: Regex,
    method: AggMethod,
}

/// Ordered aggregation rules plus a default, compiled once and reused for
/// every name lookup.
pub struct AggRules {
    rules: Vec<CompiledRule>,
    default: AggMethod,
}

impl AggRules {
    /// Compiles `rules` in order; the first regex to match a name wins.
    pub fn new(rules: &[AggRuleConfig], default_method: &str) -> Result<Self, AggError> {
        let default = AggMethod::parse(default_method)?;
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex =
                Regex::new(&rule.pattern).map_err(|source| AggError::BadPattern {
                    pattern: rule.pattern.clone(),
                    source,
                })?;
            let method = AggMethod::parse(&rule.method)?;
            compiled.push(CompiledRule { regex, method });
        }
        Ok(Self {
            rules: compiled,
            default,
        })
    }

    /// Resolves a single metric name to its aggregation method.
    pub fn get_method(&self, name: &str) -> AggMethod {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(name))
            .map(|rule| rule.method)
            .unwrap_or(self.default)
    }

    /// Resolves many names at once, amortizing the rule scan.
    pub fn get_methods<'a, I>(&self, names: I) -> Vec<AggMethod>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().map(|name| self.get_method(name)).collect()
    }
}
