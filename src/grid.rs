//! The Grid context (design note: "a single owned Grid context object
//! created at startup and passed explicitly"): owns every piece of mutable
//! state the control thread touches, created once and threaded through the
//! command dispatcher and reconciliation loop rather than living in
//! globals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{self, StorageBackend};
use crate::buildcfg;
use crate::catalogue::ReplicaCatalogue;
use crate::error::DigsError;
use crate::identity::AdminList;
use crate::inbox::PendingPuts;
use crate::placement::PlacementWeights;
use crate::registry::NodeRegistry;
use crate::transfer::TransferManager;

pub struct Grid {
    pub registry: NodeRegistry,
    pub catalogue: ReplicaCatalogue,
    pub weights: PlacementWeights,
    pub transfers: TransferManager,
    pub admins: AdminList,
    /// Declared-but-not-yet-integrated puts, one tracker per node name.
    pub pending: HashMap<String, PendingPuts>,
    /// Grid-wide default replica count, used when a file's `replcount`
    /// attribute is unset or explicitly 0 (spec section 3: "effective
    /// replcount").
    pub min_copies: i64,
    pub cycle_interval: Duration,
    pub inbox_ttl: Duration,
    pub tmp_dir: PathBuf,
}

impl Grid {
    /// Loads the node table and status lists from `install_dir`; starts
    /// with an empty catalogue (a production deployment backs the
    /// catalogue with a database restored separately, spec section 4.3).
    pub fn load(install_dir: impl Into<PathBuf>, admins: AdminList, min_copies: i64) -> Result<Self, DigsError> {
        Ok(Grid {
            registry: NodeRegistry::load(install_dir)?,
            catalogue: ReplicaCatalogue::new(),
            weights: PlacementWeights::default(),
            transfers: TransferManager::new(),
            admins,
            pending: HashMap::new(),
            min_copies,
            cycle_interval: Duration::from_secs(buildcfg::DEFAULT_CYCLE_INTERVAL_SECS),
            inbox_ttl: Duration::from_secs(buildcfg::DEFAULT_INBOX_TTL_SECS),
            tmp_dir: buildcfg::tmp_dir(),
        })
    }

    pub fn backend_for(&self, host: &str) -> Result<Box<dyn StorageBackend>, DigsError> {
        let node = self.registry.lookup(host)?;
        Ok(backend::backend_for(node))
    }

    pub fn pending_for(&mut self, host: &str) -> &mut PendingPuts {
        self.pending.entry(host.to_string()).or_default()
    }

    /// `replcount` if set on `lfn`, else `min_copies` (spec section 3 and
    /// glossary: "effective replcount").
    pub fn effective_replcount(&self, lfn: &str) -> i64 {
        match self.catalogue.get_attribute(lfn, "replcount").parse::<i64>() {
            Ok(n) if n > 0 => n,
            _ => self.min_copies,
        }
    }

    /// Number of distinct sites among live (non-dead/disabled/retiring)
    /// nodes, the cap for `replcount` (spec section 4.7: "replcount /
    /// replcountdir").
    pub fn live_site_count(&self) -> usize {
        let mut sites: Vec<&str> = self
            .registry
            .iter()
            .filter(|(idx, _)| self.registry.status.is_live(*idx))
            .map(|(_, node)| node.site.as_str())
            .collect();
        sites.sort_unstable();
        sites.dedup();
        sites.len()
    }

    /// Sites currently holding a live replica of `lfn`: a live replica is
    /// one on a node that is not dead/disabled/retiring (spec section 4.7
    /// reconciliation step 4's "count(live replicas)").
    pub fn live_replica_sites(&self, lfn: &str) -> Vec<String> {
        self.catalogue
            .get_locations(lfn)
            .iter()
            .filter_map(|pfn| pfn.split_once(':').map(|(host, _)| host))
            .filter_map(|host| self.registry.index_of(host))
            .filter(|&idx| self.registry.status.is_live(idx))
            .filter_map(|idx| self.registry.get(idx).map(|n| n.site.clone()))
            .collect()
    }

    pub fn live_replica_count(&self, lfn: &str) -> usize {
        self.live_replica_sites(lfn).len()
    }

    /// PFNs of `lfn` that sit on a node that isn't dead — the set of
    /// replicas it's safe to read from as a replication source (spec
    /// section 4.7 reconciliation step 4). Deliberately broader than
    /// `live_replica_sites`: a retiring node is still up and readable,
    /// which is exactly what lets `replenish_one` pull off it before
    /// `retire_migrate_one` clears its replica later the same cycle.
    pub fn readable_replica_locations(&self, lfn: &str) -> Vec<crate::catalogue::Pfn> {
        self.catalogue
            .get_locations(lfn)
            .into_iter()
            .filter(|pfn| {
                pfn.split_once(':')
                    .and_then(|(host, _)| self.registry.index_of(host))
                    .is_some_and(|idx| !self.registry.status.is_dead(idx))
            })
            .collect()
    }
}
