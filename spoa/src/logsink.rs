use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::interrupt::MatchedRule;
use crate::model::{self, ApplicationRequest};

/// Capacity of the bounded channel between `Store` callers and the writer
/// worker. Carried over literally from `log_store.go`'s `defaultChannelSize`.
const CHANNEL_SIZE: usize = 1000;

/// Per-item insert timeout, also carried over literally from `log_store.go`.
const INSERT_TIMEOUT: Duration = Duration::from_secs(5);

const CLIENT_IP_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "true-client-ip",
    "cf-connecting-ip",
    "fastly-client-ip",
    "x-client-ip",
    "x-original-forwarded-for",
    "forwarded",
    "x-cluster-client-ip",
];

/// The document persisted by the LogSink for an interrupted (or otherwise
/// WAF-flagged) transaction.
///
/// Top-level rule fields mirror the **last non-empty** value seen across
/// `matched_rules`, per `application.go`'s `saveFirewallLog`.
#[derive(Clone, Debug)]
pub struct FirewallLogEnvelope {
    pub created_at: DateTime<Utc>,
    pub collection: String,
    pub request: String,
    /// Reserved: response bodies are not captured by this agent.
    pub response: String,
    pub domain: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: i64,
    pub dst_port: i64,
    pub request_id: String,
    pub matched_rules: Vec<MatchedRule>,
    pub rule_id: i64,
    pub raw: String,
    pub severity: i32,
    pub phase: i32,
    pub secmark: String,
    pub accuracy: i32,
    pub payload: String,
    pub message: String,
    pub uri: String,
    pub client_ip: String,
    pub server_ip: String,
}

impl FirewallLogEnvelope {
    /// Builds an envelope from the request that was interrupted (or flagged)
    /// and its matched rules, folding the "last non-empty wins" merge.
    pub fn new(
        created_at: DateTime<Utc>,
        collection: &str,
        req: &ApplicationRequest,
        matched_rules: Vec<MatchedRule>,
    ) -> Self {
        let mut env = FirewallLogEnvelope {
            created_at,
            collection: collection.to_string(),
            request: req.request_line(),
            response: String::new(),
            domain: host_from_request(req),
            src_ip: client_ip(req),
            dst_ip: req.dst_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            src_port: req.src_port,
            dst_port: req.dst_port,
            request_id: req.id.clone(),
            matched_rules: matched_rules.clone(),
            rule_id: 0,
            raw: String::new(),
            severity: 0,
            phase: 0,
            secmark: String::new(),
            accuracy: 0,
            payload: String::new(),
            message: String::new(),
            uri: String::new(),
            client_ip: String::new(),
            server_ip: String::new(),
        };

        for rule in &matched_rules {
            if rule.rule_id != 0 {
                env.rule_id = rule.rule_id;
            }
            if !rule.raw.is_empty() {
                env.raw = rule.raw.clone();
            }
            if rule.severity != 0 {
                env.severity = rule.severity;
            }
            if rule.phase != 0 {
                env.phase = rule.phase;
            }
            if !rule.secmark.is_empty() {
                env.secmark = rule.secmark.clone();
            }
            if rule.accuracy != 0 {
                env.accuracy = rule.accuracy;
            }
            if !rule.payload.is_empty() {
                env.payload = rule.payload.clone();
            }
            if !rule.message.is_empty() {
                env.message = rule.message.clone();
            }
            if !rule.uri.is_empty() {
                env.uri = rule.uri.clone();
            }
            if !rule.client_ip.is_empty() {
                env.client_ip = rule.client_ip.clone();
            }
            if !rule.server_ip.is_empty() {
                env.server_ip = rule.server_ip.clone();
            }
        }

        env
    }
}

/// The `Host` header, stripped of a trailing port by truncating at the
/// **first** `:` — deliberately not IPv6-bracket-aware, preserved literally
/// from `application.go`'s `getHostFromRequest` for behavioral parity. Falls
/// back to `dst-ip` (same truncation) when `Host` is absent.
fn host_from_request(req: &ApplicationRequest) -> String {
    if let Some(host) = model::header_value(&req.headers, "host") {
        if !host.is_empty() {
            return truncate_at_colon(&host);
        }
    }

    let dst = req.dst_ip.map(|ip| ip.to_string()).unwrap_or_default();
    truncate_at_colon(&dst)
}

fn truncate_at_colon(s: &str) -> String {
    match s.find(':') {
        Some(idx) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Selects the client IP, trying each candidate header in priority order.
///
/// Ported literally from `application.go`'s `getRealClientIP`, including its
/// quirks: `x-forwarded-for`/`x-original-forwarded-for` take the first
/// comma-separated token; `forwarded` extracts the `for=` parameter,
/// stripping quotes and IPv6 brackets; every other header (including
/// `x-real-ip` and the other vendor headers) is passed through verbatim with
/// no further parsing — this is a deliberate open-question passthrough, not
/// an oversight. Falls back to `src-ip` if nothing matched.
fn client_ip(req: &ApplicationRequest) -> String {
    for header in CLIENT_IP_HEADERS {
        let Some(value) = model::header_value(&req.headers, header) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match *header {
            "x-forwarded-for" | "x-original-forwarded-for" => {
                if let Some(first) = value.split(',').next() {
                    let ip = first.trim();
                    if !ip.is_empty() {
                        return ip.to_string();
                    }
                }
            }
            "forwarded" => {
                for part in value.split(';') {
                    let mut kv = part.splitn(2, '=');
                    let key = kv.next().unwrap_or("").trim();

                    if key.eq_ignore_ascii_case("for") {
                        if let Some(val) = kv.next() {
                            let ip = val.trim().trim_matches('"');
                            let ip = match ip.strip_prefix('[') {
                                Some(rest) => rest.split(']').next().unwrap_or(rest),
                                None => ip,
                            };
                            if !ip.is_empty() {
                                return ip.to_string();
                            }
                        }
                    }
                }
            }
            _ => return value.to_string(),
        }
    }

    req.src_ip.map(|ip| ip.to_string()).unwrap_or_default()
}

#[derive(Debug, Error)]
#[error("log store error: {0}")]
pub struct StoreError(pub String);

/// The out-of-scope document store, abstracted so `LogSink` can be exercised
/// without a real MongoDB (or any) backend.
pub trait LogStore: Send + Sync + 'static {
    fn insert(
        &self,
        envelope: FirewallLogEnvelope,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// Discards everything. Used when an application has no log collection
/// configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLogStore;

impl LogStore for NullLogStore {
    async fn insert(&self, _envelope: FirewallLogEnvelope) -> Result<(), StoreError> {
        Ok(())
    }
}

/// An in-memory store for tests.
#[derive(Default)]
pub struct VecLogStore {
    envelopes: Mutex<Vec<FirewallLogEnvelope>>,
}

impl VecLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<FirewallLogEnvelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

impl LogStore for VecLogStore {
    async fn insert(&self, envelope: FirewallLogEnvelope) -> Result<(), StoreError> {
        self.envelopes.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// A bounded async channel of firewall-log envelopes plus a single writer
/// worker, matching `log_store.go`'s `MongoLogStore` shape against a generic
/// [`LogStore`] instead of a hardcoded MongoDB client.
pub struct LogSink {
    sender: mpsc::Sender<FirewallLogEnvelope>,
}

impl LogSink {
    /// Spawns the writer worker over `store` and returns the sink plus a
    /// handle the caller should await after calling [`LogSink::close`], so
    /// shutdown waits for the worker to drain.
    pub fn start<L: LogStore>(store: L) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(CHANNEL_SIZE);

        let handle = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                match time::timeout(INSERT_TIMEOUT, store.insert(envelope)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(%err, "failed to store firewall log"),
                    Err(_) => error!("timed out storing firewall log"),
                }
            }
        });

        (LogSink { sender }, handle)
    }

    /// Non-blocking; drops the envelope and logs a warning if the channel is
    /// full. Never blocks the WAF hot path.
    pub fn store(&self, envelope: FirewallLogEnvelope) {
        if self.sender.try_send(envelope).is_err() {
            warn!("log sink channel full, dropping firewall log envelope");
        }
    }

    /// Closes the channel; the worker drains any buffered envelopes and
    /// returns. Consumes `self` since no further `store` calls are valid.
    pub fn close(self) {
        drop(self.sender);
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn request_with_headers(headers: &str) -> ApplicationRequest {
        ApplicationRequest {
            id: "ABCDEFGHIJKLMNOP".into(),
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            headers: headers.as_bytes().to_vec().into(),
            ..Default::default()
        }
    }

    #[test]
    fn client_ip_prefers_x_forwarded_for_first_token() {
        let req = request_with_headers("x-forwarded-for:  1.2.3.4 , 5.6.7.8\n");
        assert_eq!(client_ip(&req), "1.2.3.4");
    }

    #[test]
    fn client_ip_parses_forwarded_for_parameter() {
        let req = request_with_headers(r#"forwarded: for="[2001:db8::1]:4711";proto=https"#);
        assert_eq!(client_ip(&req), "2001:db8::1");
    }

    #[test]
    fn client_ip_falls_back_to_src_ip() {
        let req = request_with_headers("host: example.com\n");
        assert_eq!(client_ip(&req), "10.0.0.1");
    }

    #[test]
    fn host_from_request_strips_port() {
        let req = request_with_headers("host: example.com:8080\n");
        assert_eq!(host_from_request(&req), "example.com");
    }

    #[tokio::test]
    async fn store_drops_on_full_channel() {
        let (sink, handle) = LogSink::start(NullLogStore);

        sink.store(FirewallLogEnvelope::new(
            Utc::now(),
            "logs",
            &ApplicationRequest::default(),
            vec![],
        ));

        sink.close();
        handle.await.unwrap();
    }
}
