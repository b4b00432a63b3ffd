use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;

use thiserror::Error;

use crate::interrupt::{InterruptVerdict, MatchedRule};

/// An error raised by a WAF phase that is *not* an interruption: a
/// misconfigured rule set, an internal engine failure, and so on. Per the
/// error-handling design, this closes the transaction without a verdict
/// rather than acking with one.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// What a WAF phase call decided: keep going, or stop and report a verdict.
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseOutcome {
    Continue,
    Interrupt(InterruptVerdict),
}

impl PhaseOutcome {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, PhaseOutcome::Interrupt(_))
    }
}

/// Stands in for the out-of-scope rule engine (Coraza in the original
/// implementation). One method per phase the connection/headers/body
/// lifecycle drives, mirroring the engine's own method names so
/// [`crate::Application`]'s phase sequencing reads the same way the
/// original's does.
///
/// `Transaction` is the engine's own per-request handle; the agent treats it
/// as opaque and threads it through the TxCache between the request and
/// response phases.
pub trait WafEngine: Send + Sync + 'static {
    type Transaction: Send + 'static;

    fn new_transaction(&self, id: &str) -> Self::Transaction;

    /// When true, the engine is configured off; phases are skipped entirely
    /// and the transaction is allowed through unconditionally.
    fn is_rule_engine_off(&self) -> bool {
        false
    }

    fn process_connection(
        &self,
        tx: &mut Self::Transaction,
        src_ip: Option<IpAddr>,
        src_port: i64,
        dst_ip: Option<IpAddr>,
        dst_port: i64,
    ) -> Result<PhaseOutcome, EngineError>;

    fn process_uri(
        &self,
        tx: &mut Self::Transaction,
        uri: &str,
        method: &str,
        protocol: &str,
    ) -> Result<PhaseOutcome, EngineError>;

    fn add_request_header(&self, tx: &mut Self::Transaction, name: &str, value: &str);

    fn process_request_headers(
        &self,
        tx: &mut Self::Transaction,
    ) -> Result<PhaseOutcome, EngineError>;

    fn write_request_body(
        &self,
        tx: &mut Self::Transaction,
        body: &[u8],
    ) -> Result<PhaseOutcome, EngineError>;

    fn process_request_body(&self, tx: &mut Self::Transaction)
        -> Result<PhaseOutcome, EngineError>;

    fn add_response_header(&self, tx: &mut Self::Transaction, name: &str, value: &str);

    fn process_response_headers(
        &self,
        tx: &mut Self::Transaction,
        status: i64,
        protocol: &str,
    ) -> Result<PhaseOutcome, EngineError>;

    fn write_response_body(
        &self,
        tx: &mut Self::Transaction,
        body: &[u8],
    ) -> Result<PhaseOutcome, EngineError>;

    fn process_response_body(
        &self,
        tx: &mut Self::Transaction,
    ) -> Result<PhaseOutcome, EngineError>;

    /// Post-processing hook; a no-op if the transaction was never logged.
    fn process_logging(&self, tx: &mut Self::Transaction);

    /// Findings gathered against `tx` so far, for the firewall log.
    fn matched_rules(&self, tx: &Self::Transaction) -> Vec<MatchedRule>;

    fn close(&self, tx: Self::Transaction);
}

/// A scriptable [`WafEngine`] double: feed it a queue of canned per-phase
/// outcomes and it replays them in call order, defaulting to `Continue` once
/// exhausted. Grounded in the injectable-handler seam the teacher's
/// `handle/simple.rs` test double uses for exercising connection-level logic
/// without a real backend.
pub struct StubEngine {
    rule_engine_off: bool,
    outcomes: Mutex<VecDeque<PhaseOutcome>>,
    matched_rules: Vec<MatchedRule>,
}

impl Default for StubEngine {
    fn default() -> Self {
        StubEngine {
            rule_engine_off: false,
            outcomes: Mutex::new(VecDeque::new()),
            matched_rules: Vec::new(),
        }
    }
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes<I: IntoIterator<Item = PhaseOutcome>>(outcomes: I) -> Self {
        StubEngine {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn rule_engine_off() -> Self {
        StubEngine {
            rule_engine_off: true,
            ..Default::default()
        }
    }

    pub fn with_matched_rules(mut self, rules: Vec<MatchedRule>) -> Self {
        self.matched_rules = rules;
        self
    }

    fn next_outcome(&self) -> PhaseOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PhaseOutcome::Continue)
    }
}

impl WafEngine for StubEngine {
    type Transaction = String;

    fn new_transaction(&self, id: &str) -> Self::Transaction {
        id.to_string()
    }

    fn is_rule_engine_off(&self) -> bool {
        self.rule_engine_off
    }

    fn process_connection(
        &self,
        _tx: &mut Self::Transaction,
        _src_ip: Option<IpAddr>,
        _src_port: i64,
        _dst_ip: Option<IpAddr>,
        _dst_port: i64,
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn process_uri(
        &self,
        _tx: &mut Self::Transaction,
        _uri: &str,
        _method: &str,
        _protocol: &str,
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn add_request_header(&self, _tx: &mut Self::Transaction, _name: &str, _value: &str) {}

    fn process_request_headers(
        &self,
        _tx: &mut Self::Transaction,
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn write_request_body(
        &self,
        _tx: &mut Self::Transaction,
        _body: &[u8],
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn process_request_body(
        &self,
        _tx: &mut Self::Transaction,
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn add_response_header(&self, _tx: &mut Self::Transaction, _name: &str, _value: &str) {}

    fn process_response_headers(
        &self,
        _tx: &mut Self::Transaction,
        _status: i64,
        _protocol: &str,
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn write_response_body(
        &self,
        _tx: &mut Self::Transaction,
        _body: &[u8],
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn process_response_body(
        &self,
        _tx: &mut Self::Transaction,
    ) -> Result<PhaseOutcome, EngineError> {
        Ok(self.next_outcome())
    }

    fn process_logging(&self, _tx: &mut Self::Transaction) {}

    fn matched_rules(&self, _tx: &Self::Transaction) -> Vec<MatchedRule> {
        self.matched_rules.clone()
    }

    fn close(&self, _tx: Self::Transaction) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::Verdict;

    #[test]
    fn replays_outcomes_in_order_then_continues() {
        let verdict = InterruptVerdict {
            rule_id: 1,
            action: Verdict::Deny,
            status: 403,
            data: "xss".into(),
        };

        let engine = StubEngine::with_outcomes([PhaseOutcome::Interrupt(verdict.clone())]);
        let mut tx = engine.new_transaction("ABCDEFGHIJKLMNOP");

        assert_eq!(
            engine
                .process_connection(&mut tx, None, 0, None, 0)
                .unwrap(),
            PhaseOutcome::Interrupt(verdict)
        );
        assert_eq!(
            engine.process_uri(&mut tx, "/", "GET", "HTTP/1.1").unwrap(),
            PhaseOutcome::Continue
        );
    }
}
