//! Parameterized PromQL construction.
//!
//! Queries are built from label-matcher value objects instead of
//! interpolating names into query text, so pod or namespace names
//! containing quotes or regex metacharacters cannot alter the query.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
}

impl MatchOp {
    fn as_str(self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regex => "=~",
        }
    }
}

/// One `label<op>"value"` term of a vector selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    name: String,
    op: MatchOp,
    value: String,
}

impl LabelMatcher {
    pub fn eq(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            value: value.into(),
        }
    }

    pub fn ne(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::NotEqual,
            value: value.into(),
        }
    }

    /// Matches series whose label value starts with `prefix`. The
    /// prefix is regex-escaped first.
    pub fn prefix(name: impl Into<String>, prefix: &str) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Regex,
            value: format!("{}.*", regex_escape(prefix)),
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\"{}\"",
            self.name,
            self.op.as_str(),
            escape_value(&self.value)
        )
    }
}

/// A metric name with its label matchers: `metric{a="x", b=~"y.*"}`.
#[derive(Debug, Clone)]
pub struct Selector {
    metric: String,
    matchers: Vec<LabelMatcher>,
}

impl Selector {
    pub fn new(metric: impl Into<String>, matchers: Vec<LabelMatcher>) -> Self {
        Self {
            metric: metric.into(),
            matchers,
        }
    }

    /// Selector for one pod's container series: exact namespace, pod
    /// name prefix, and the pause container filtered out.
    pub fn pod_containers(metric: impl Into<String>, namespace: &str, pod: &str) -> Self {
        Self::new(
            metric,
            vec![
                LabelMatcher::eq("namespace", namespace),
                LabelMatcher::prefix("pod", pod),
                LabelMatcher::ne("container_name", "POD"),
            ],
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.metric)?;
        for (i, matcher) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{matcher}")?;
        }
        f.write_str("}")
    }
}

/// `max(avg_over_time(selector[Ns]))`: windowed high-water average,
/// used for the memory series.
pub fn max_avg_over_time(selector: &Selector, window: Duration) -> String {
    format!(
        "max(avg_over_time({selector}[{}s]))",
        window.as_secs().max(1)
    )
}

/// `delta(selector[Ns]) / N`: average rate over the window, used for
/// the CPU counter.
pub fn windowed_rate(selector: &Selector, window: Duration) -> String {
    let secs = window.as_secs().max(1);
    format!("delta({selector}[{secs}s]) / {secs}")
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn regex_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_renders_matchers() {
        let selector =
            Selector::pod_containers("container_memory_working_set_bytes", "ns1", "pod-a");
        assert_eq!(
            selector.to_string(),
            "container_memory_working_set_bytes{namespace=\"ns1\", \
             pod=~\"pod-a.*\", container_name!=\"POD\"}"
        );
    }

    #[test]
    fn values_with_quotes_are_escaped() {
        let matcher = LabelMatcher::eq("namespace", "bad\"ns");
        assert_eq!(matcher.to_string(), "namespace=\"bad\\\"ns\"");
    }

    #[test]
    fn pod_prefix_is_regex_escaped() {
        let matcher = LabelMatcher::prefix("pod", "api.v2");
        assert_eq!(matcher.to_string(), "pod=~\"api\\.v2.*\"");
    }

    #[test]
    fn windowed_queries() {
        let selector = Selector::pod_containers("container_cpu_usage_seconds_total", "ns1", "p");
        assert_eq!(
            windowed_rate(&selector, Duration::from_secs(60)),
            format!("delta({selector}[60s]) / 60")
        );
        assert_eq!(
            max_avg_over_time(&selector, Duration::from_secs(60)),
            format!("max(avg_over_time({selector}[60s]))")
        );
    }
}
