use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use spop::{Message, Typed};

use crate::acker::Acker;
use crate::application::Application;
use crate::dispatch::{Dispatch, DispatchError};
use crate::waf::WafEngine;

/// The live map from application name to [`Application`], replaced
/// atomically as a whole on SIGHUP.
///
/// A read lock is only ever held long enough to clone the `Arc<Application>`
/// for the matched name; the WAF call that follows runs outside the lock, so
/// a reload never blocks in-flight requests and an in-flight request never
/// blocks a reload. Grounded in `application.go`'s `applications map[string]
/// *Application` plus the teacher's own preference for short-lived read
/// locks around connection-table lookups.
pub struct ApplicationTable<E: WafEngine> {
    apps: RwLock<HashMap<String, Arc<Application<E>>>>,
}

impl<E: WafEngine> ApplicationTable<E> {
    pub fn new() -> Self {
        ApplicationTable {
            apps: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_apps<I: IntoIterator<Item = (String, Application<E>)>>(apps: I) -> Self {
        let apps = apps
            .into_iter()
            .map(|(name, app)| (name, Arc::new(app)))
            .collect();

        ApplicationTable {
            apps: RwLock::new(apps),
        }
    }

    /// Atomically swaps the whole table. Returns the previous generation's
    /// applications, each still wrapped in the `Arc` any in-flight request
    /// may be holding; the caller closes each one once its `Arc::strong_count`
    /// indicates no more referents (or simply after a grace period, per the
    /// capture-on-dispatch discipline).
    pub fn replace<I>(&self, apps: I) -> Vec<Arc<Application<E>>>
    where
        I: IntoIterator<Item = (String, Application<E>)>,
    {
        let new_apps: HashMap<String, Arc<Application<E>>> = apps
            .into_iter()
            .map(|(name, app)| (name, Arc::new(app)))
            .collect();

        let mut guard = self.apps.write().unwrap();
        std::mem::replace(&mut *guard, new_apps)
            .into_values()
            .collect()
    }

    fn lookup(&self, message: &Message) -> Result<Arc<Application<E>>, DispatchError> {
        let name = message
            .args
            .iter()
            .find(|(k, _)| k == "app")
            .and_then(|(_, v)| match v {
                Typed::String(s) => Some(s.clone()),
                _ => None,
            })
            .ok_or_else(|| DispatchError::MissingField("app"))?;

        self.apps
            .read()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or(DispatchError::UnknownApp(name))
    }
}

impl<E: WafEngine> Default for ApplicationTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: WafEngine> Dispatch for ApplicationTable<E> {
    fn dispatch_request(&self, message: &Message, acker: &mut Acker) -> Result<(), DispatchError> {
        self.lookup(message)?.handle_request(message, acker)
    }

    fn dispatch_response(&self, message: &Message, acker: &mut Acker) -> Result<(), DispatchError> {
        self.lookup(message)?.handle_response(message, acker)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ApplicationConfig;
    use crate::logsink::{LogSink, NullLogStore};
    use crate::waf::StubEngine;

    fn app(name: &str) -> Application<StubEngine> {
        let (sink, worker) = LogSink::start(NullLogStore);
        Application::new(
            ApplicationConfig {
                name: name.into(),
                response_check: false,
                transaction_ttl: Duration::from_secs(30),
                log_collection: None,
            },
            StubEngine::new(),
            Some((sink, worker)),
        )
    }

    fn req_for(app_name: &str) -> Message {
        Message::builder("coraza-req")
            .arg("app", app_name)
            .arg("method", "GET")
            .arg("path", b"/".to_vec())
            .arg("version", "1.1")
            .arg("headers", Vec::<u8>::new())
            .arg("body", Vec::<u8>::new())
            .build()
    }

    #[tokio::test]
    async fn dispatches_to_the_named_application() {
        let table = ApplicationTable::from_apps([("site-a".to_string(), app("site-a"))]);
        let (mut acker, _receiver) = Acker::new(1, 1);

        table.dispatch_request(&req_for("site-a"), &mut acker).unwrap();
    }

    #[tokio::test]
    async fn unknown_app_is_reported() {
        let table: ApplicationTable<StubEngine> = ApplicationTable::new();
        let (mut acker, _receiver) = Acker::new(1, 1);

        let err = table.dispatch_request(&req_for("missing"), &mut acker).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownApp(name) if name == "missing"));
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_table_atomically() {
        let table = ApplicationTable::from_apps([("site-a".to_string(), app("site-a"))]);
        let old = table.replace([("site-b".to_string(), app("site-b"))]);
        assert_eq!(old.len(), 1);

        let (mut acker, _receiver) = Acker::new(1, 1);
        assert!(table.dispatch_request(&req_for("site-a"), &mut acker).is_err());
        table.dispatch_request(&req_for("site-b"), &mut acker).unwrap();
    }
}
