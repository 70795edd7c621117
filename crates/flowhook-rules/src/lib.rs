//! # Flowhook Rules
//!
//! Parses condition strings of the form `OPERATOR,VALUE[,VALUE]*` and
//! evaluates them against a flow's host.
//!
//! | Operator         | Matches when the host…                          |
//! |------------------|-------------------------------------------------|
//! | `DOMAIN`         | equals a value (case-insensitive)               |
//! | `DOMAIN-SUFFIX`  | equals a value or ends with `.value`            |
//! | `DOMAIN-KEYWORD` | contains a value                                |
//! | `IP-CIDR`        | is a literal IP inside a value's CIDR block     |
//!
//! Several values after the operator form a disjunction. A parsed rule is
//! immutable and holds no interior state, so it can be shared across
//! workers without locking.

pub mod cidr;
pub mod rule;

pub use cidr::IpCidr;
pub use rule::{ConditionRule, RuleOperator, RuleParseError, evaluate, parse};
