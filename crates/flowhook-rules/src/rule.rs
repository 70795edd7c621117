//! Condition rules — `OPERATOR,VALUE[,VALUE]*`.
//!
//! Parsing happens once, at hook registration. Evaluation is a handful of
//! byte comparisons per value and never allocates for domain operators, since
//! it runs on the network hot path.

use std::net::IpAddr;
use std::str::FromStr;

use flowhook_core::{FlowView, FlowhookError};

use crate::cidr::IpCidr;

/// Why a condition string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    #[error("empty condition string")]
    Empty,
    #[error("unknown rule operator '{0}'")]
    UnknownOperator(String),
    #[error("operator {0} needs at least one value")]
    MissingValue(RuleOperator),
    #[error("empty value for operator {0}")]
    EmptyValue(RuleOperator),
    #[error("invalid CIDR block '{0}'")]
    InvalidCidr(String),
}

impl From<RuleParseError> for FlowhookError {
    fn from(e: RuleParseError) -> Self {
        FlowhookError::RuleParse(e.to_string())
    }
}

/// Rule operator keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RuleOperator {
    Domain,
    DomainSuffix,
    DomainKeyword,
    IpCidr,
}

impl RuleOperator {
    pub fn keyword(&self) -> &'static str {
        match self {
            RuleOperator::Domain => "DOMAIN",
            RuleOperator::DomainSuffix => "DOMAIN-SUFFIX",
            RuleOperator::DomainKeyword => "DOMAIN-KEYWORD",
            RuleOperator::IpCidr => "IP-CIDR",
        }
    }
}

impl std::fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for RuleOperator {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DOMAIN" => Ok(RuleOperator::Domain),
            "DOMAIN-SUFFIX" => Ok(RuleOperator::DomainSuffix),
            "DOMAIN-KEYWORD" => Ok(RuleOperator::DomainKeyword),
            "IP-CIDR" | "IP-CIDR6" => Ok(RuleOperator::IpCidr),
            other => Err(RuleParseError::UnknownOperator(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// Lowercased domain values.
    Domains(Vec<String>),
    Cidrs(Vec<IpCidr>),
}

/// A parsed, immutable condition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionRule {
    operator: RuleOperator,
    matcher: Matcher,
    source: String,
}

impl ConditionRule {
    pub fn parse(condition: &str) -> Result<Self, RuleParseError> {
        let condition = condition.trim();
        if condition.is_empty() {
            return Err(RuleParseError::Empty);
        }

        let mut parts = condition.split(',');
        let operator: RuleOperator = parts.next().unwrap_or_default().parse()?;
        let values: Vec<&str> = parts.map(str::trim).collect();
        if values.is_empty() {
            return Err(RuleParseError::MissingValue(operator));
        }

        let matcher = match operator {
            RuleOperator::IpCidr => Matcher::Cidrs(
                values
                    .iter()
                    .map(|v| IpCidr::parse(v))
                    .collect::<Result<_, _>>()?,
            ),
            _ => Matcher::Domains(
                values
                    .iter()
                    .map(|v| normalize_domain(operator, v))
                    .collect::<Result<_, _>>()?,
            ),
        };

        Ok(Self {
            operator,
            matcher,
            source: condition.to_string(),
        })
    }

    pub fn operator(&self) -> RuleOperator {
        self.operator
    }

    /// The condition string this rule was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Comparison values in canonical form.
    pub fn values(&self) -> Vec<String> {
        match &self.matcher {
            Matcher::Domains(domains) => domains.clone(),
            Matcher::Cidrs(cidrs) => cidrs.iter().map(ToString::to_string).collect(),
        }
    }

    /// Whether `host` satisfies any of the rule's values.
    pub fn matches_host(&self, host: &str) -> bool {
        match &self.matcher {
            Matcher::Domains(domains) => {
                let host = host.trim_end_matches('.');
                domains.iter().any(|d| match self.operator {
                    RuleOperator::Domain => host.eq_ignore_ascii_case(d),
                    RuleOperator::DomainSuffix => is_domain_suffix(host, d),
                    RuleOperator::DomainKeyword => contains_ignore_case(host, d),
                    RuleOperator::IpCidr => false,
                })
            }
            Matcher::Cidrs(cidrs) => {
                let host = host
                    .strip_prefix('[')
                    .and_then(|h| h.strip_suffix(']'))
                    .unwrap_or(host);
                match host.parse::<IpAddr>() {
                    Ok(ip) => cidrs.iter().any(|c| c.contains(ip)),
                    Err(_) => false,
                }
            }
        }
    }

    /// Evaluate the rule against a flow's host.
    pub fn evaluate(&self, flow: &FlowView) -> bool {
        self.matches_host(flow.normalized_host())
    }
}

impl FromStr for ConditionRule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ConditionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.operator, self.values().join(","))
    }
}

/// Parse a condition string.
pub fn parse(condition: &str) -> Result<ConditionRule, RuleParseError> {
    ConditionRule::parse(condition)
}

/// Evaluate a parsed rule against a flow.
pub fn evaluate(rule: &ConditionRule, flow: &FlowView) -> bool {
    rule.evaluate(flow)
}

fn normalize_domain(operator: RuleOperator, value: &str) -> Result<String, RuleParseError> {
    let mut value = value.trim_end_matches('.');
    if operator == RuleOperator::DomainSuffix {
        value = value.trim_start_matches('.');
    }
    if value.is_empty() {
        return Err(RuleParseError::EmptyValue(operator));
    }
    Ok(value.to_ascii_lowercase())
}

/// `host == suffix` or `host` ends with `.suffix`.
fn is_domain_suffix(host: &str, suffix: &str) -> bool {
    let (h, s) = (host.as_bytes(), suffix.as_bytes());
    if h.len() == s.len() {
        return h.eq_ignore_ascii_case(s);
    }
    h.len() > s.len()
        && h[h.len() - s.len() - 1] == b'.'
        && h[h.len() - s.len()..].eq_ignore_ascii_case(s)
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let (h, n) = (haystack.as_bytes(), needle.as_bytes());
    h.len() >= n.len() && h.windows(n.len()).any(|w| w.eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(host: &str) -> FlowView {
        FlowView::new(host, "GET", "/")
    }

    #[test]
    fn test_domain_suffix_boundaries() {
        let rule = parse("DOMAIN-SUFFIX,example.com").unwrap();
        assert!(rule.evaluate(&flow("example.com")));
        assert!(rule.evaluate(&flow("api.example.com")));
        assert!(rule.evaluate(&flow("API.Example.COM")));
        assert!(!rule.evaluate(&flow("notexample.com")));
        assert!(!rule.evaluate(&flow("example.com.evil.org")));
    }

    #[test]
    fn test_domain_exact_only() {
        let rule = parse("DOMAIN,example.com").unwrap();
        assert!(rule.evaluate(&flow("example.com")));
        assert!(rule.evaluate(&flow("EXAMPLE.com.")));
        assert!(!rule.evaluate(&flow("api.example.com")));
    }

    #[test]
    fn test_domain_keyword() {
        let rule = parse("domain-keyword,misskey").unwrap();
        assert_eq!(rule.operator(), RuleOperator::DomainKeyword);
        assert!(rule.evaluate(&flow("misskey-hub.net")));
        assert!(rule.evaluate(&flow("cdn.MISSKEY.io")));
        assert!(!rule.evaluate(&flow("mastodon.social")));
    }

    #[test]
    fn test_multiple_values_are_disjunction() {
        let rule = parse("DOMAIN-SUFFIX, misskey-hub.net , example.org").unwrap();
        assert!(rule.evaluate(&flow("misskey-hub.net")));
        assert!(rule.evaluate(&flow("www.example.org")));
        assert!(!rule.evaluate(&flow("example.net")));
        assert_eq!(rule.to_string(), "DOMAIN-SUFFIX,misskey-hub.net,example.org");
    }

    #[test]
    fn test_ip_cidr() {
        let rule = parse("IP-CIDR,10.0.0.0/8,2001:db8::/32").unwrap();
        assert!(rule.evaluate(&flow("10.2.3.4")));
        assert!(rule.evaluate(&flow("[2001:db8::1]")));
        assert!(!rule.evaluate(&flow("192.168.0.1")));
        // Hostnames are never resolved.
        assert!(!rule.evaluate(&flow("localhost")));
    }

    #[test]
    fn test_malformed_rules() {
        assert_eq!(
            parse("FOO,bar").unwrap_err(),
            RuleParseError::UnknownOperator("FOO".into())
        );
        assert_eq!(parse("").unwrap_err(), RuleParseError::Empty);
        assert_eq!(
            parse("DOMAIN").unwrap_err(),
            RuleParseError::MissingValue(RuleOperator::Domain)
        );
        assert_eq!(
            parse("DOMAIN,a.com,").unwrap_err(),
            RuleParseError::EmptyValue(RuleOperator::Domain)
        );
        assert!(matches!(
            parse("IP-CIDR,10.0.0.0/40"),
            Err(RuleParseError::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_parse_error_converts_to_flowhook_error() {
        let err: FlowhookError = parse("FOO,bar").unwrap_err().into();
        assert!(matches!(err, FlowhookError::RuleParse(_)));
    }
}
