use parse_display::{Display, FromStr};

/// The action a WAF interruption asks the proxy to take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, FromStr)]
#[display(style = "snake_case")]
pub enum Verdict {
    Deny,
    Drop,
    Redirect,
    Allow,
}

/// A single WAF finding attached to an interrupted (or merely inspected)
/// transaction.
///
/// Mirrors one `types.MatchedRule` from the WAF engine: present so the
/// firewall-log envelope has real per-rule content to fold the "last
/// non-empty value wins" merge over.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchedRule {
    pub message: String,
    pub payload: String,
    pub rule_id: i64,
    pub severity: i32,
    pub phase: i32,
    pub secmark: String,
    pub accuracy: i32,
    pub raw: String,
    pub error_log: String,
    pub uri: String,
    pub client_ip: String,
    pub server_ip: String,
}

/// The verdict an interrupted WAF phase reports back, as `{rule-id, action,
/// status, data}`.
///
/// Two verdicts are equal iff all four fields match; since this is plain
/// field-wise derived equality, `Option<InterruptVerdict>` already treats two
/// "no interruption"s as equal, matching the spec's "two null interruptions
/// are equal" rule without a hand-written `Eq` impl.
#[derive(Clone, Debug, PartialEq)]
pub struct InterruptVerdict {
    pub rule_id: i64,
    pub action: Verdict,
    pub status: i64,
    pub data: String,
}
