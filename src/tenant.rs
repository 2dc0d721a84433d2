use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::compactor;
use crate::config::SchedulerConfig;
use crate::engine::Scheduler;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::store::MemoryStore;

/// One tenant's durable store and the scheduler bound to it.
#[derive(Clone)]
pub struct Tenant {
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<MemoryStore>,
}

/// Per-tenant stores, each with its own WAL file and compactor task.
/// Must be used inside a tokio runtime.
pub struct TenantManager {
    tenants: DashMap<Ulid, Tenant>,
    data_dir: PathBuf,
    compact_threshold: u64,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, config: SchedulerConfig) -> Self {
        Self::with_clock(data_dir, compact_threshold, config, Arc::new(SystemClock))
    }

    pub fn with_clock(data_dir: PathBuf, compact_threshold: u64, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
            config,
            clock,
        }
    }

    pub fn wal_path(&self, tenant_id: Ulid) -> PathBuf {
        self.data_dir.join(format!("{tenant_id}.wal"))
    }

    /// Get or lazily open the tenant, replaying its WAL if one exists.
    pub fn get_or_create(&self, tenant_id: Ulid) -> io::Result<Tenant> {
        if let Some(tenant) = self.tenants.get(&tenant_id) {
            return Ok(tenant.value().clone());
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let notify = Arc::new(NotifyHub::new());
        let store = Arc::new(MemoryStore::open(&self.wal_path(tenant_id), notify.clone())?);
        let scheduler = Arc::new(Scheduler::new(tenant_id, store.clone(), self.clock.clone(), self.config));
        let tenant = Tenant { scheduler, store };

        // A racing opener may have won; keep whichever landed first.
        let tenant = match self.tenants.entry(tenant_id) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(e) => e.insert(tenant).value().clone(),
        };

        let compactor_store = tenant.store.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_store, notify, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        info!("opened tenant {tenant_id} with {} bookings", tenant.store.booking_count());
        Ok(tenant)
    }

    /// Open every `<ulid>.wal` in the data directory. Other files are skipped.
    pub fn open_existing(&self) -> io::Result<Vec<Ulid>> {
        let mut opened = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wal") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Ulid::from_string(stem) {
                Ok(tenant_id) => {
                    self.get_or_create(tenant_id)?;
                    opened.push(tenant_id);
                }
                Err(_) => warn!("skipping {}: not a tenant log", path.display()),
            }
        }
        opened.sort();
        Ok(opened)
    }

    pub fn get(&self, tenant_id: Ulid) -> Option<Tenant> {
        self.tenants.get(&tenant_id).map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
