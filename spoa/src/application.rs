use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use spop::{Message, Scope, Typed};
use tokio::task::JoinHandle;

use crate::acker::Acker;
use crate::dispatch::DispatchError;
use crate::interrupt::InterruptVerdict;
use crate::logsink::{FirewallLogEnvelope, LogSink};
use crate::model::{self, ApplicationRequest, ApplicationResponse};
use crate::txcache::TxCache;
use crate::waf::{EngineError, PhaseOutcome, WafEngine};

const EVICTION_INTERVAL: Duration = Duration::from_secs(1);
const TX_ID_LEN: usize = 16;

/// Static per-application settings, loaded from config and immutable for the
/// application's lifetime.
#[derive(Clone, Debug)]
pub struct ApplicationConfig {
    pub name: String,
    pub response_check: bool,
    pub transaction_ttl: Duration,
    pub log_collection: Option<String>,
}

/// A live transaction's "single-consumer token": whoever `try_take`s it owns
/// finalization, losers walk away. Mirrors the spec's mutex-as-token design
/// exactly, independent of whatever atomicity the backing map happens to
/// offer, so the handler/evictor race is resolved the same way regardless of
/// which one observes the cache entry first.
struct TxSlot<T> {
    tx: Mutex<Option<T>>,
    request: ApplicationRequest,
}

impl<T> TxSlot<T> {
    fn new(tx: T, request: ApplicationRequest) -> Self {
        TxSlot {
            tx: Mutex::new(Some(tx)),
            request,
        }
    }

    fn try_take(&self) -> Option<T> {
        self.tx.try_lock().ok().and_then(|mut guard| guard.take())
    }
}

/// A named bundle of a WAF instance, its transaction cache, and an optional
/// log sink. Generic over `E: WafEngine` so the phase sequencing below is
/// fully testable against [`crate::waf::StubEngine`].
pub struct Application<E: WafEngine> {
    name: String,
    engine: Arc<E>,
    response_check: bool,
    transaction_ttl: Duration,
    log_collection: String,
    tx_cache: Arc<TxCache<Arc<TxSlot<E::Transaction>>>>,
    log_sink: Option<LogSink>,
    eviction: JoinHandle<()>,
    log_worker: Option<JoinHandle<()>>,
}

impl<E: WafEngine> Application<E> {
    pub fn new(
        config: ApplicationConfig,
        engine: E,
        log_sink: Option<(LogSink, JoinHandle<()>)>,
    ) -> Self {
        let engine = Arc::new(engine);
        let tx_cache: Arc<TxCache<Arc<TxSlot<E::Transaction>>>> = TxCache::new();

        let eviction_engine = Arc::clone(&engine);
        let app_name = config.name.clone();
        let eviction = tx_cache.spawn_eviction(EVICTION_INTERVAL, move |_id, slot| {
            // Eviction never logs: an interruption would already have been
            // logged by the phase that produced it.
            match slot.try_take() {
                Some(mut tx) => {
                    eviction_engine.process_logging(&mut tx);
                    eviction_engine.close(tx);
                }
                None => debug!(app = %app_name, "eviction called on currently used transaction"),
            }
        });

        let (log_sink, log_worker) = match log_sink {
            Some((sink, worker)) => (Some(sink), Some(worker)),
            None => (None, None),
        };

        Application {
            name: config.name,
            engine,
            response_check: config.response_check,
            transaction_ttl: config.transaction_ttl,
            log_collection: config.log_collection.unwrap_or_default(),
            tx_cache,
            log_sink,
            eviction,
            log_worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of transactions awaiting a response. Exposed for tests (P4:
    /// stays at zero when response-check is disabled).
    pub fn pending_transactions(&self) -> usize {
        self.tx_cache.len()
    }

    /// The `coraza-req` phase: parse, run the connection/URI/header/body
    /// phases in order, then either cache the transaction (response-check
    /// enabled and no interruption) or finalize it immediately.
    pub fn handle_request(&self, message: &Message, acker: &mut Acker) -> Result<(), DispatchError> {
        let mut req = ApplicationRequest::from_message(message);
        if req.id.is_empty() {
            req.id = generate_id();
        }

        let mut tx = self.engine.new_transaction(&req.id);
        acker.set_var(Scope::Transaction, "id", req.id.clone());

        let outcome = if self.engine.is_rule_engine_off() {
            warn!(app = %self.name, "rule engine is off, not processing any rule");
            Ok(PhaseOutcome::Continue)
        } else {
            self.run_request_phases(&mut tx, &req)
        };

        match outcome {
            Ok(PhaseOutcome::Continue) if self.response_check => {
                self.tx_cache.set_with_expiration(
                    req.id.clone(),
                    Arc::new(TxSlot::new(tx, req)),
                    self.transaction_ttl,
                );
                Ok(())
            }
            Ok(PhaseOutcome::Continue) => {
                self.finalize(tx, &req, None);
                Ok(())
            }
            Ok(PhaseOutcome::Interrupt(verdict)) => {
                self.finalize(tx, &req, Some(&verdict));
                write_verdict(acker, &verdict);
                Ok(())
            }
            Err(err) => {
                self.finalize(tx, &req, None);
                Err(DispatchError::Engine(err))
            }
        }
    }

    /// The `coraza-res` phase: requires response-check, pulls the cached
    /// transaction back out by id, and runs the response header/body phases.
    pub fn handle_response(
        &self,
        message: &Message,
        acker: &mut Acker,
    ) -> Result<(), DispatchError> {
        if !self.response_check {
            return Err(DispatchError::ResponseCheckDisabled(self.name.clone()));
        }

        let res = ApplicationResponse::from_message(message);
        if res.id.is_empty() {
            return Err(DispatchError::MissingField("id"));
        }

        let slot = self
            .tx_cache
            .remove(&res.id)
            .ok_or_else(|| DispatchError::CacheMiss(res.id.clone()))?;

        let Some(mut tx) = slot.try_take() else {
            // The evictor won the race; it already finalized this TX.
            return Ok(());
        };

        let outcome = self.run_response_phases(&mut tx, &res);

        match outcome {
            Ok(PhaseOutcome::Continue) => {
                self.finalize(tx, &slot.request, None);
                Ok(())
            }
            Ok(PhaseOutcome::Interrupt(verdict)) => {
                self.finalize(tx, &slot.request, Some(&verdict));
                write_verdict(acker, &verdict);
                Ok(())
            }
            Err(err) => {
                self.finalize(tx, &slot.request, None);
                Err(DispatchError::Engine(err))
            }
        }
    }

    fn run_request_phases(
        &self,
        tx: &mut E::Transaction,
        req: &ApplicationRequest,
    ) -> Result<PhaseOutcome, EngineError> {
        let outcome =
            self.engine
                .process_connection(tx, req.src_ip, req.src_port, req.dst_ip, req.dst_port)?;
        if outcome.is_interrupt() {
            return Ok(outcome);
        }

        let url = req.url();
        let uri = String::from_utf8_lossy(&url);
        let protocol = format!("HTTP/{}", req.version);
        let outcome = self.engine.process_uri(tx, &uri, &req.method, &protocol)?;
        if outcome.is_interrupt() {
            return Ok(outcome);
        }

        model::for_each_header(&req.headers, |k, v| self.engine.add_request_header(tx, k, v))
            .map_err(EngineError)?;

        let outcome = self.engine.process_request_headers(tx)?;
        if outcome.is_interrupt() {
            return Ok(outcome);
        }

        let outcome = self.engine.write_request_body(tx, &req.body)?;
        if outcome.is_interrupt() {
            return Ok(outcome);
        }

        self.engine.process_request_body(tx)
    }

    fn run_response_phases(
        &self,
        tx: &mut E::Transaction,
        res: &ApplicationResponse,
    ) -> Result<PhaseOutcome, EngineError> {
        if self.engine.is_rule_engine_off() {
            return Ok(PhaseOutcome::Continue);
        }

        model::for_each_header(&res.headers, |k, v| self.engine.add_response_header(tx, k, v))
            .map_err(EngineError)?;

        let protocol = format!("HTTP/{}", res.version);
        let outcome = self
            .engine
            .process_response_headers(tx, res.status, &protocol)?;
        if outcome.is_interrupt() {
            return Ok(outcome);
        }

        let outcome = self.engine.write_response_body(tx, &res.body)?;
        if outcome.is_interrupt() {
            return Ok(outcome);
        }

        self.engine.process_response_body(tx)
    }

    /// Finalizes a transaction that is leaving this `Application`'s care
    /// through the request or response path: logs a firewall-log envelope
    /// when interrupted and matched rules exist, then closes it.
    fn finalize(&self, tx: E::Transaction, req: &ApplicationRequest, verdict: Option<&InterruptVerdict>) {
        let mut tx = tx;

        if verdict.is_some() {
            if let Some(ref sink) = self.log_sink {
                let matched = self.engine.matched_rules(&tx);
                if !matched.is_empty() {
                    sink.store(FirewallLogEnvelope::new(
                        Utc::now(),
                        &self.log_collection,
                        req,
                        matched,
                    ));
                }
            }
        }

        self.engine.process_logging(&mut tx);
        self.engine.close(tx);
    }

    /// Closes the application: stops the eviction sweep and drains the log
    /// sink. Called by the application table once an `Application` becomes
    /// unreachable after a reload and all in-flight handlers have returned.
    pub async fn close(self) {
        self.eviction.abort();

        if let Some(sink) = self.log_sink {
            sink.close();
        }

        if let Some(worker) = self.log_worker {
            let _ = worker.await;
        }
    }
}

fn write_verdict(acker: &mut Acker, verdict: &InterruptVerdict) {
    acker.set_var(Scope::Transaction, "action", verdict.action.to_string());
    acker.set_var(Scope::Transaction, "status", Typed::Int64(verdict.status));
    acker.set_var(Scope::Transaction, "data", verdict.data.clone());
}

fn generate_id() -> String {
    let mut rng = rand::thread_rng();

    (0..TX_ID_LEN)
        .map(|_| (b'A' + rng.gen_range(0..26)) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use spop::Message;

    use super::*;
    use crate::interrupt::Verdict;
    use crate::logsink::{NullLogStore, VecLogStore};
    use crate::waf::StubEngine;

    fn request_message() -> Message {
        Message::builder("coraza-req")
            .arg("src-ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .arg("src-port", 1234i32)
            .arg("dst-ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
            .arg("dst-port", 80i32)
            .arg("method", "GET")
            .arg("path", "/healthz".as_bytes().to_vec())
            .arg("version", "1.1")
            .arg("headers", "host: a\n".as_bytes().to_vec())
            .arg("body", Vec::<u8>::new())
            .build()
    }

    fn app(engine: StubEngine, response_check: bool) -> Application<StubEngine> {
        let (sink, worker) = LogSink::start(NullLogStore);
        Application::new(
            ApplicationConfig {
                name: "site-a".into(),
                response_check,
                transaction_ttl: Duration::from_secs(30),
                log_collection: Some("firewall_logs".into()),
            },
            engine,
            Some((sink, worker)),
        )
    }

    #[tokio::test]
    async fn allow_sets_transaction_id_and_no_verdict() {
        let app = app(StubEngine::new(), false);
        let (mut acker, receiver) = Acker::new(1, 1);

        app.handle_request(&request_message(), &mut acker).unwrap();
        drop(acker);

        let ack = receiver.await.unwrap();
        assert_eq!(ack.actions.len(), 1);
        assert_eq!(app.pending_transactions(), 0);

        app.close().await;
    }

    #[tokio::test]
    async fn request_without_id_generates_sixteen_uppercase_chars() {
        let app = app(StubEngine::new(), true);
        let (mut acker, receiver) = Acker::new(1, 1);

        app.handle_request(&request_message(), &mut acker).unwrap();
        drop(acker);

        let ack = receiver.await.unwrap();
        let spop::Action::SetVar { value, .. } = &ack.actions[0] else {
            panic!("expected a SetVar action");
        };
        let spop::Typed::String(id) = value else {
            panic!("expected a string id");
        };
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_uppercase()));

        app.close().await;
    }

    #[tokio::test]
    async fn deny_finalizes_and_logs_matched_rules() {
        let verdict = InterruptVerdict {
            rule_id: 1,
            action: Verdict::Deny,
            status: 403,
            data: "xss".into(),
        };
        let engine = StubEngine::with_outcomes([PhaseOutcome::Interrupt(verdict.clone())])
            .with_matched_rules(vec![crate::interrupt::MatchedRule {
                message: "xss detected".into(),
                rule_id: 1,
                ..Default::default()
            }]);

        let store = Arc::new(VecLogStore::new());
        let (sink, worker) = {
            let store = Arc::clone(&store);
            LogSink::start(AsLogStore(store))
        };

        let app = Application::new(
            ApplicationConfig {
                name: "site-a".into(),
                response_check: true,
                transaction_ttl: Duration::from_secs(30),
                log_collection: Some("firewall_logs".into()),
            },
            engine,
            Some((sink, worker)),
        );

        let (mut acker, receiver) = Acker::new(1, 1);
        app.handle_request(&request_message(), &mut acker).unwrap();
        drop(acker);

        let ack = receiver.await.unwrap();
        assert!(ack
            .actions
            .iter()
            .any(|a| matches!(a, spop::Action::SetVar { name, .. } if name == "action")));
        assert_eq!(app.pending_transactions(), 0);

        app.close().await;

        // give the log worker a chance to drain after close()
        tokio::task::yield_now().await;
        assert_eq!(store.snapshot().len(), 1);
    }

    struct AsLogStore(Arc<VecLogStore>);

    impl crate::logsink::LogStore for AsLogStore {
        async fn insert(
            &self,
            envelope: FirewallLogEnvelope,
        ) -> Result<(), crate::logsink::StoreError> {
            self.0.insert(envelope).await
        }
    }

    #[tokio::test]
    async fn response_check_disabled_errors_on_response() {
        let app = app(StubEngine::new(), false);
        let (mut acker, _receiver) = Acker::new(1, 1);

        let res = Message::builder("coraza-res")
            .arg("id", "ABCDEFGHIJKLMNOP")
            .arg("status", 200i32)
            .build();

        assert!(matches!(
            app.handle_response(&res, &mut acker),
            Err(DispatchError::ResponseCheckDisabled(_))
        ));

        app.close().await;
    }
}
