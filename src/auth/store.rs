use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use super::ticket::Ticket;
use crate::endpoints::{Environment, Service};

/// Persistence for the most recent ticket per (service, environment).
///
/// `get` never fails: an absent or unreadable record reads as `None` and
/// the caller renews. `put` replaces whatever was there before.
pub trait TicketStore: Send + Sync {
    fn get(&self, service: Service, environment: Environment) -> Option<Ticket>;
    fn put(&self, service: Service, environment: Environment, ticket: &Ticket) -> Result<()>;
}

/// Ticket cache holding one XML record per key, named after the service
/// with the homologation suffix in the sandbox environment.
#[derive(Debug, Clone)]
pub struct FileTicketStore {
    dir: PathBuf,
}

impl FileTicketStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, service: Service, environment: Environment) -> PathBuf {
        self.dir
            .join(format!("ta-{}{}.xml", service.id(), environment.file_suffix()))
    }
}

impl TicketStore for FileTicketStore {
    fn get(&self, service: Service, environment: Environment) -> Option<Ticket> {
        let path = self.record_path(service, environment);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        match Ticket::from_ta_xml(&raw, service) {
            Ok(ticket) => Some(ticket),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "discarding unreadable ticket record");
                None
            }
        }
    }

    fn put(&self, service: Service, environment: Environment, ticket: &Ticket) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating ticket directory {}", self.dir.display()))?;
        let path = self.record_path(service, environment);
        let xml = ticket.to_ta_xml()?;
        fs::write(&path, xml)
            .with_context(|| format!("writing ticket record {}", path.display()))?;
        debug!(path = %path.display(), service = %service, "ticket record replaced");
        Ok(())
    }
}

/// In-process ticket cache for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: RwLock<HashMap<(Service, Environment), Ticket>>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for MemoryTicketStore {
    fn get(&self, service: Service, environment: Environment) -> Option<Ticket> {
        match self.tickets.read() {
            Ok(map) => map.get(&(service, environment)).cloned(),
            Err(_) => None,
        }
    }

    fn put(&self, service: Service, environment: Environment, ticket: &Ticket) -> Result<()> {
        let mut map = self
            .tickets
            .write()
            .map_err(|_| anyhow!("ticket cache lock poisoned"))?;
        map.insert((service, environment), ticket.clone());
        Ok(())
    }
}
