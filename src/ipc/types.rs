use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{DaemonConfig, StoreBackend};
use crate::generation::{Generator, HttpGenerator};
use crate::orchestrator::{BusyGate, Orchestrator};
use crate::store::{ContentStore, Directory, HttpStore, LocalStore};
use crate::view::ViewState;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Clients wired for the current configuration. Rebuilt when the workspace
/// or the generation setup changes; the busy gate is carried across.
pub struct Services {
    pub store: Rc<dyn ContentStore>,
    pub directory: Rc<dyn Directory>,
    pub generator: Rc<dyn Generator>,
    pub orchestrator: Rc<Orchestrator>,
}

impl Services {
    pub fn new(
        store: Rc<dyn ContentStore>,
        directory: Rc<dyn Directory>,
        generator: Rc<dyn Generator>,
        gate: BusyGate,
    ) -> Self {
        let orchestrator = Rc::new(Orchestrator::with_gate(
            store.clone(),
            generator.clone(),
            gate,
        ));
        Self {
            store,
            directory,
            generator,
            orchestrator,
        }
    }

    /// `None` when the workspace backend is configured but no workspace is
    /// open yet.
    pub fn from_config(
        config: &DaemonConfig,
        workspace: Option<Rc<LocalStore>>,
        gate: BusyGate,
    ) -> Option<Self> {
        let g = &config.generator;
        let generator: Rc<dyn Generator> = Rc::new(HttpGenerator::new(
            g.base_url.clone(),
            g.api_key.clone(),
            g.timeout,
        ));
        match &config.store {
            StoreBackend::Remote { base_url, token } => {
                let remote = Rc::new(HttpStore::new(base_url.clone(), token.clone(), g.timeout));
                Some(Self::new(remote.clone(), remote, generator, gate))
            }
            StoreBackend::Workspace => {
                let local = workspace?;
                Some(Self::new(local.clone(), local, generator, gate))
            }
        }
    }
}

pub struct AppState {
    /// Configuration as read from the environment; workspace setup is
    /// layered on top of a fresh copy at every `workspace.select`.
    pub base_config: DaemonConfig,
    pub config: RefCell<DaemonConfig>,
    pub workspace: RefCell<Option<PathBuf>>,
    /// Workspace database: settings, and the store itself in workspace mode.
    pub db: RefCell<Option<Rc<LocalStore>>>,
    pub services: RefCell<Option<Rc<Services>>>,
    pub view: RefCell<ViewState>,
    /// Outlives every `Services` rebuild.
    gate: BusyGate,
    events: UnboundedSender<serde_json::Value>,
}

impl AppState {
    pub fn new(config: DaemonConfig, events: UnboundedSender<serde_json::Value>) -> Self {
        let gate = BusyGate::default();
        let services = Services::from_config(&config, None, gate.clone()).map(Rc::new);
        Self {
            base_config: config.clone(),
            config: RefCell::new(config),
            workspace: RefCell::new(None),
            db: RefCell::new(None),
            services: RefCell::new(services),
            view: RefCell::new(ViewState::default()),
            gate,
            events,
        }
    }

    /// Builds state around already-constructed services (tests, embedding).
    /// Their gate becomes the one later rebuilds share.
    pub fn with_services(
        config: DaemonConfig,
        services: Services,
        events: UnboundedSender<serde_json::Value>,
    ) -> Self {
        let gate = services.orchestrator.gate().clone();
        Self {
            base_config: config.clone(),
            config: RefCell::new(config),
            workspace: RefCell::new(None),
            db: RefCell::new(None),
            services: RefCell::new(Some(Rc::new(services))),
            view: RefCell::new(ViewState::default()),
            gate,
            events,
        }
    }

    pub fn services(&self) -> Option<Rc<Services>> {
        self.services.borrow().clone()
    }

    pub fn db(&self) -> Option<Rc<LocalStore>> {
        self.db.borrow().clone()
    }

    pub fn rebuild_services(&self) {
        let services =
            Services::from_config(&self.config.borrow(), self.db(), self.gate.clone()).map(Rc::new);
        *self.services.borrow_mut() = services;
    }

    /// Queues an unsolicited stdout line. A closed channel means the daemon
    /// is shutting down; the event is dropped.
    pub fn emit(&self, line: serde_json::Value) {
        let _ = self.events.send(line);
    }
}
