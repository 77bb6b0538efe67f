//! Connection registry: owns every session, keyed by server name.

use crate::config::{McpConfig, ServerSpec, SessionOptions};
use crate::error::McpError;
use crate::session::{Session, SessionState};
use crate::transport::Launcher;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// One name's connection attempt. Every caller that finds the cell empty or
/// in flight shares its outcome.
type Slot = Arc<OnceCell<Result<Arc<Session>, McpError>>>;

/// Table of server name → session.
///
/// Sessions are created lazily on first use. A name maps to at most one live
/// session; concurrent first uses of a name share one launch.
pub struct Registry {
    specs: BTreeMap<String, ServerSpec>,
    launcher: Arc<dyn Launcher>,
    options: SessionOptions,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Registry {
    pub fn new(specs: Vec<ServerSpec>, launcher: Arc<dyn Launcher>, options: SessionOptions) -> Self {
        Self {
            specs: specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect(),
            launcher,
            options,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &McpConfig, launcher: Arc<dyn Launcher>, options: SessionOptions) -> Self {
        Self::new(config.specs(), launcher, options)
    }

    /// Configured servers, in name order.
    pub fn specs(&self) -> impl Iterator<Item = &ServerSpec> {
        self.specs.values()
    }

    pub fn spec(&self, name: &str) -> Result<&ServerSpec, McpError> {
        self.specs.get(name).ok_or_else(|| McpError::UnknownServer {
            name: name.to_string(),
        })
    }

    /// Return the live session for `name`, connecting it first if needed.
    ///
    /// A caller arriving while another's connect is in flight waits for that
    /// attempt and receives its outcome.
    pub async fn get_or_connect(&self, name: &str) -> Result<Arc<Session>, McpError> {
        let spec = self.spec(name)?;

        let slot = {
            let mut slots = self.slots.lock().await;
            match slots.get(name).filter(|slot| reusable(slot)) {
                Some(slot) => Arc::clone(slot),
                None => {
                    let slot: Slot = Arc::new(OnceCell::new());
                    slots.insert(name.to_string(), Arc::clone(&slot));
                    slot
                }
            }
        };

        slot.get_or_init(|| self.open(spec)).await.clone()
    }

    async fn open(&self, spec: &ServerSpec) -> Result<Arc<Session>, McpError> {
        let session = Arc::new(Session::new(
            spec.clone(),
            self.options,
            Arc::clone(&self.launcher),
        ));
        session.connect().await?;
        Ok(session)
    }

    /// The live session for `name`, if any. Never connects.
    pub async fn session(&self, name: &str) -> Option<Arc<Session>> {
        let slots = self.slots.lock().await;
        match slots.get(name)?.get()? {
            Ok(session) if session.state() == SessionState::Ready => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Close and forget the session for `name`. A connect still in flight
    /// is waited for and then closed. A no-op if none is live.
    pub async fn disconnect(&self, name: &str) -> Result<(), McpError> {
        self.spec(name)?;
        let Some(slot) = self.slots.lock().await.remove(name) else {
            return Ok(());
        };
        match settle(name, &slot).await {
            Ok(session) => session.disconnect().await,
            Err(_) => Ok(()),
        }
    }

    /// Close every session, best effort. Individual failures are logged and
    /// returned, never propagated.
    pub async fn disconnect_all(&self) -> Vec<(String, McpError)> {
        let slots: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        let mut failures = Vec::new();
        for (name, slot) in slots {
            let Ok(session) = settle(&name, &slot).await else {
                continue;
            };
            if let Err(e) = session.disconnect().await {
                tracing::warn!("Failed to close MCP server '{}': {}", name, e);
                failures.push((name, e));
            }
        }
        failures
    }
}

/// The slot's outcome, waiting out an attempt that is still connecting.
/// An empty slot settles as not connected.
async fn settle<'a>(name: &str, slot: &'a Slot) -> &'a Result<Arc<Session>, McpError> {
    slot.get_or_init(|| async { Err(McpError::not_connected(name)) })
        .await
}

/// In-flight attempts and ready sessions are shared; anything that ended is
/// replaced by a fresh attempt.
fn reusable(slot: &Slot) -> bool {
    match slot.get() {
        None => true,
        Some(Ok(session)) => session.state() == SessionState::Ready,
        Some(Err(_)) => false,
    }
}
