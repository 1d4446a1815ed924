//! Control thread (C8): the single command dispatcher and reconciliation
//! loop, the sole writer of the catalogue and node-status lists (spec
//! section 4.7).

use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalogue::NULL_SENTINEL;
use crate::error::DigsError;
use crate::grid::Grid;
use crate::identity::Identity;
use crate::inbox::{self, IntegrateOutcome, PutDeclaration};
use crate::placement;

/// Every verb the command queue accepts (spec section 4.7 point 1).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Read-only: ranks live nodes as primary-placement candidates for a
    /// file of the given size (spec section 4.6 step 1: "client obtains
    /// primary candidate list from C2").
    PlaceQuery(u64),
    Integrate(PutDeclaration, String),
    Remove(String),
    Lock(String),
    LockDir(String),
    Unlock(String),
    UnlockDir(String),
    ReplCount(String, i64),
    ReplCountDir(String, i64),
    Retire(String),
    Unretire(String),
    Touch(String),
}

/// Outcome of one dispatched command: `accepted` drives the CLI exit code
/// table in spec section 6 (0 = accepted, 1 = rejected).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub accepted: bool,
    pub message: String,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        CommandOutcome { accepted: true, message: message.into() }
    }
    fn rejected(message: impl Into<String>) -> Self {
        CommandOutcome { accepted: false, message: message.into() }
    }
}

/// Runs one command to completion before the caller may start the next —
/// the control thread never interleaves commands (spec section 4.7: "each
/// command is executed to completion before the next starts").
pub async fn dispatch(grid: &mut Grid, caller: &Identity, command: Command) -> CommandOutcome {
    match command {
        Command::PlaceQuery(size) => place_query(grid, size),
        Command::Integrate(declaration, host) => integrate_command(grid, &host, declaration).await,
        Command::Remove(lfn) => remove_command(grid, &lfn).await,
        Command::Lock(lfn) => lock_one(grid, caller, &lfn),
        Command::LockDir(dir) => lock_dir(grid, caller, &dir),
        Command::Unlock(lfn) => unlock_one(grid, caller, &lfn),
        Command::UnlockDir(dir) => unlock_dir(grid, caller, &dir),
        Command::ReplCount(lfn, n) => replcount_one(grid, &lfn, n),
        Command::ReplCountDir(dir, n) => replcount_dir(grid, &dir, n),
        Command::Retire(host) => retire(grid, &host),
        Command::Unretire(host) => unretire(grid, &host),
        Command::Touch(lfn) => touch(grid, &lfn),
    }
}

/// Ranks candidate primary-placement nodes for a file of `size` bytes and
/// returns their names best-first, comma-separated, without mutating any
/// state (spec section 4.2, section 4.6 step 1).
fn place_query(grid: &Grid, size: u64) -> CommandOutcome {
    let ranked = placement::choose_for_primary(&grid.registry, size, grid.weights);
    if ranked.is_empty() {
        return CommandOutcome::rejected("no eligible node for that size".to_string());
    }
    let names: Vec<&str> = ranked
        .iter()
        .filter_map(|&idx| grid.registry.get(idx))
        .map(|n| n.name.as_str())
        .collect();
    CommandOutcome::ok(names.join(","))
}

async fn integrate_command(grid: &mut Grid, host: &str, declaration: PutDeclaration) -> CommandOutcome {
    let backend = match grid.backend_for(host) {
        Ok(b) => b,
        Err(e) => return CommandOutcome::rejected(e.to_string()),
    };
    match inbox::integrate(backend.as_ref(), host, &mut grid.catalogue, &declaration).await {
        Ok(IntegrateOutcome::Committed) => CommandOutcome::ok(format!("integrated {}", declaration.lfn)),
        Ok(IntegrateOutcome::VerificationFailed(reason)) => CommandOutcome::rejected(reason),
        Err(e) => CommandOutcome::rejected(e.to_string()),
    }
}

/// Removes every replica of `lfn`. If a backend `rm` fails the LFN is left
/// half-removed; the next reconciliation cycle retries (spec section 4.7:
/// "remove").
async fn remove_command(grid: &mut Grid, lfn: &str) -> CommandOutcome {
    if !grid.catalogue.is_known(lfn) {
        return CommandOutcome::rejected(format!("{lfn}: not found"));
    }
    let mut first_failure = None;
    for pfn in grid.catalogue.get_locations(lfn) {
        let Some((host, path)) = pfn.split_once(':') else { continue };
        let removed = match grid.backend_for(host) {
            Ok(backend) => backend.rm(host, path).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => grid.catalogue.remove_location(lfn, &pfn),
            Err(e) => {
                if first_failure.is_none() {
                    first_failure = Some(e.to_string());
                }
            }
        }
    }
    if let Some(reason) = first_failure {
        CommandOutcome::rejected(format!("{lfn}: partial removal, will retry: {reason}"))
    } else {
        grid.catalogue.remove_all(lfn);
        CommandOutcome::ok(format!("removed {lfn}"))
    }
}

fn has_lock_permission(grid: &Grid, caller: &Identity, lfn: &str) -> bool {
    let current = grid.catalogue.get_attribute(lfn, "lockedby");
    current == NULL_SENTINEL || current == caller.as_str() || grid.admins.is_admin(caller)
}

/// Sets `lockedby = caller` if unset, already the caller's, or the caller
/// is an administrator (spec section 4.7: "lock / lockdir").
fn lock_one(grid: &mut Grid, caller: &Identity, lfn: &str) -> CommandOutcome {
    if !grid.catalogue.is_known(lfn) {
        return CommandOutcome::rejected(format!("{lfn}: not found"));
    }
    if !has_lock_permission(grid, caller, lfn) {
        return CommandOutcome::rejected(format!("{lfn}: locked by another user"));
    }
    grid.catalogue.set_attribute(lfn, "lockedby", caller.as_str().to_string());
    CommandOutcome::ok(format!("locked {lfn}"))
}

fn unlock_one(grid: &mut Grid, caller: &Identity, lfn: &str) -> CommandOutcome {
    if !grid.catalogue.is_known(lfn) {
        return CommandOutcome::rejected(format!("{lfn}: not found"));
    }
    if !has_lock_permission(grid, caller, lfn) {
        return CommandOutcome::rejected(format!("{lfn}: locked by another user"));
    }
    grid.catalogue.clear_attribute(lfn, "lockedby");
    CommandOutcome::ok(format!("unlocked {lfn}"))
}

/// Recursive variants commit what they can and report only the first
/// failure (spec section 7: "partial-failure visibility").
fn lock_dir(grid: &mut Grid, caller: &Identity, dir: &str) -> CommandOutcome {
    let lfns = collect_dir(grid, dir);
    let mut first_failure = None;
    for lfn in &lfns {
        let outcome = lock_one(grid, caller, lfn);
        if !outcome.accepted && first_failure.is_none() {
            first_failure = Some(outcome.message);
        }
    }
    match first_failure {
        Some(msg) => CommandOutcome::rejected(msg),
        None => CommandOutcome::ok(format!("locked {} files under {dir}", lfns.len())),
    }
}

fn unlock_dir(grid: &mut Grid, caller: &Identity, dir: &str) -> CommandOutcome {
    let lfns = collect_dir(grid, dir);
    let mut first_failure = None;
    for lfn in &lfns {
        let outcome = unlock_one(grid, caller, lfn);
        if !outcome.accepted && first_failure.is_none() {
            first_failure = Some(outcome.message);
        }
    }
    match first_failure {
        Some(msg) => CommandOutcome::rejected(msg),
        None => CommandOutcome::ok(format!("unlocked {} files under {dir}", lfns.len())),
    }
}

fn collect_dir(grid: &Grid, dir: &str) -> Vec<String> {
    let mut out = Vec::new();
    grid.catalogue.for_each_file(dir, |lfn| {
        out.push(lfn.to_string());
        true
    });
    out
}

/// `n = 0` reverts to the grid default; `n` is capped at the number of
/// live sites, with a warning logged (spec section 4.7 and section 8
/// boundary behavior: "replcount > live-sites -> capped").
fn replcount_one(grid: &mut Grid, lfn: &str, n: i64) -> CommandOutcome {
    if !grid.catalogue.is_known(lfn) {
        return CommandOutcome::rejected(format!("{lfn}: not found"));
    }
    if n == 0 {
        grid.catalogue.clear_attribute(lfn, "replcount");
        return CommandOutcome::ok(format!("{lfn}: replcount reverted to grid default"));
    }
    let live_sites = grid.live_site_count() as i64;
    let capped = n.min(live_sites.max(1));
    if capped < n {
        log::warn!("replcount {n} for {lfn} exceeds {live_sites} live sites, capping to {capped}");
    }
    grid.catalogue.set_attribute(lfn, "replcount", capped.to_string());
    CommandOutcome::ok(format!("{lfn}: replcount set to {capped}"))
}

fn replcount_dir(grid: &mut Grid, dir: &str, n: i64) -> CommandOutcome {
    let lfns = collect_dir(grid, dir);
    let mut first_failure = None;
    for lfn in &lfns {
        let outcome = replcount_one(grid, lfn, n);
        if !outcome.accepted && first_failure.is_none() {
            first_failure = Some(outcome.message);
        }
    }
    match first_failure {
        Some(msg) => CommandOutcome::rejected(msg),
        None => CommandOutcome::ok(format!("directory {dir} replication count is {n}")),
    }
}

fn retire(grid: &mut Grid, host: &str) -> CommandOutcome {
    match grid.registry.index_of(host) {
        Some(idx) => {
            grid.registry.status.add_to_retiring(idx);
            CommandOutcome::ok(format!("{host}: marked retiring"))
        }
        None => CommandOutcome::rejected(format!("{host}: not found")),
    }
}

fn unretire(grid: &mut Grid, host: &str) -> CommandOutcome {
    match grid.registry.index_of(host) {
        Some(idx) => {
            grid.registry.status.remove_from_retiring(idx);
            CommandOutcome::ok(format!("{host}: retiring cleared"))
        }
        None => CommandOutcome::rejected(format!("{host}: not found")),
    }
}

fn touch(grid: &mut Grid, lfn: &str) -> CommandOutcome {
    if !grid.catalogue.is_known(lfn) {
        return CommandOutcome::rejected(format!("{lfn}: not found"));
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    grid.catalogue.set_attribute(lfn, "modtime", now.to_string());
    CommandOutcome::ok(format!("touched {lfn}"))
}

/// Formats a per-step failure for the reconciliation log, classifying it
/// by `DigsError::is_retryable` so an operator can tell a transient/
/// protocol hiccup that will resolve itself on the next tick apart from
/// a terminal failure for this cycle (spec section 7's retry policy).
fn failure_note(context: impl std::fmt::Display, err: &DigsError) -> String {
    if err.is_retryable() {
        format!("{context}: {err} (retrying next cycle)")
    } else {
        format!("{context}: {err}")
    }
}

/// One reconciliation pass (spec section 4.7 points 1-6). Returns a short
/// human-readable summary for logging; never aborts partway through a
/// step's failures (spec section 7: "control thread never aborts the
/// cycle").
pub async fn run_cycle(grid: &mut Grid) -> Vec<String> {
    let mut notes = Vec::new();

    // 1. ping each non-disabled node; dead <-> live transitions.
    let node_names: Vec<(usize, String)> = grid
        .registry
        .iter()
        .map(|(idx, node)| (idx, node.name.clone()))
        .collect();
    for (idx, name) in &node_names {
        if grid.registry.status.is_disabled(*idx) {
            continue;
        }
        let ping_result = match grid.backend_for(name) {
            Ok(backend) => backend.ping(name).await,
            Err(e) => Err(e),
        };
        match ping_result {
            Ok(()) => {
                if grid.registry.status.is_dead(*idx) {
                    grid.registry.status.remove_from_dead(*idx);
                    notes.push(format!("{name}: recovered, removed from dead list"));
                }
            }
            Err(e) => {
                if !grid.registry.status.is_dead(*idx) {
                    grid.registry.status.add_to_dead(*idx);
                    notes.push(format!("{}, marked dead", failure_note(format!("{name}: ping failed"), &e)));
                }
            }
        }
    }

    // 2. reparse mainnodelist.conf for disk space.
    if let Err(e) = grid.registry.reload_disk_space() {
        notes.push(failure_note("disk space reload failed", &e));
    }

    // 3. scan each live node's inbox and integrate staged files.
    let live_names: Vec<String> = grid
        .registry
        .iter()
        .filter(|(idx, _)| grid.registry.status.is_live(*idx))
        .map(|(_, node)| node.name.clone())
        .collect();
    for host in &live_names {
        let backend = match grid.backend_for(host) {
            Ok(b) => b,
            Err(e) => {
                notes.push(failure_note(host, &e));
                continue;
            }
        };
        let mut pending = grid.pending.remove(host).unwrap_or_default();
        let result = inbox::scan_and_integrate(
            backend.as_ref(),
            host,
            &mut grid.catalogue,
            &mut pending,
            grid.inbox_ttl,
        )
        .await;
        grid.pending.insert(host.clone(), pending);
        match result {
            Ok(outcomes) => {
                let committed = outcomes.iter().filter(|o| **o == IntegrateOutcome::Committed).count();
                if committed > 0 {
                    notes.push(format!("{host}: integrated {committed} staged file(s)"));
                }
            }
            Err(e) => notes.push(failure_note(format!("{host}: inbox scan failed"), &e)),
        }
    }

    // 4 & 5. replenish under-replicated files and migrate off retiring nodes.
    let lfns: Vec<String> = grid.catalogue.all_lfns().map(str::to_string).collect();
    for lfn in &lfns {
        let effective = grid.effective_replcount(lfn);
        let live_count = grid.live_replica_count(lfn) as i64;
        if live_count < effective {
            if let Err(e) = replenish_one(grid, lfn).await {
                notes.push(failure_note(format!("{lfn}: replication failed"), &e));
            } else {
                notes.push(format!("{lfn}: scheduled mirror replication"));
            }
        }
        retire_migrate_one(grid, lfn, &mut notes).await;
    }

    // 6. persist list mutations.
    if let Err(e) = grid.registry.persist_status_lists() {
        notes.push(failure_note("persisting status lists failed", &e));
    }
    if let Err(e) = grid.registry.persist() {
        notes.push(failure_note("persisting node table failed", &e));
    }

    notes
}

/// Picks a mirror and replicates `lfn` onto it by reading from an existing
/// readable (non-dead) replica — which may sit on a retiring node, since
/// that is precisely the replica `retire_migrate_one` is about to clear —
/// staging into the mirror's inbox, then integrating (spec section 4.7
/// step 4, reusing the C7 path end-to-end).
async fn replenish_one(grid: &mut Grid, lfn: &str) -> Result<(), DigsError> {
    let size = grid
        .catalogue
        .get_attribute(lfn, "size")
        .parse::<u64>()
        .unwrap_or(0);
    let current_sites = grid.live_replica_sites(lfn);
    let mirror_idx = placement::choose_for_mirror(&grid.registry, &current_sites, size)
        .ok_or_else(|| DigsError::no_space(format!("{lfn}: no eligible mirror node")))?;
    let mirror_name = grid
        .registry
        .get(mirror_idx)
        .ok_or_else(|| DigsError::not_found("mirror node vanished"))?
        .name
        .clone();

    let source_pfn = grid
        .readable_replica_locations(lfn)
        .into_iter()
        .next()
        .ok_or_else(|| DigsError::not_found(format!("{lfn}: no readable source replica")))?;
    let (source_host, source_path) = source_pfn
        .split_once(':')
        .ok_or_else(|| DigsError::invariant("malformed pfn"))?;

    let staged_name = crate::lfn::encode(lfn)?;
    let local_tmp = grid
        .tmp_dir
        .join(format!("qcdgridtmp{}-{staged_name}", std::process::id()));
    let source_backend = grid.backend_for(source_host)?;
    source_backend
        .get(source_host, source_path, local_tmp.to_string_lossy().as_ref())
        .await?;

    let mirror_backend = grid.backend_for(&mirror_name)?;
    mirror_backend
        .copy_to_inbox(&mirror_name, local_tmp.to_string_lossy().as_ref(), &staged_name)
        .await?;
    let _ = tokio::fs::remove_file(&local_tmp).await;

    let declaration = PutDeclaration {
        lfn: lfn.to_string(),
        size,
        md5sum: grid.catalogue.get_attribute(lfn, "md5sum"),
        submitter: grid.catalogue.get_attribute(lfn, "submitter"),
        group: grid.catalogue.get_attribute(lfn, "group"),
        permissions: grid.catalogue.get_attribute(lfn, "permissions"),
    };
    let outcome = inbox::integrate(mirror_backend.as_ref(), &mirror_name, &mut grid.catalogue, &declaration).await?;
    if let IntegrateOutcome::VerificationFailed(reason) = outcome {
        return Err(DigsError::protocol(format!("mirror integration failed: {reason}")));
    }
    Ok(())
}

/// Removes a retiring node's replica of `lfn` once enough live replicas
/// exist elsewhere (spec section 8 scenario 4: "N1 replica is removed only
/// when |live replicas| >= replcount still holds").
async fn retire_migrate_one(grid: &mut Grid, lfn: &str, notes: &mut Vec<String>) {
    let effective = grid.effective_replcount(lfn);
    let retiring_pfns: Vec<String> = grid
        .catalogue
        .get_locations(lfn)
        .into_iter()
        .filter(|pfn| {
            pfn.split_once(':')
                .and_then(|(host, _)| grid.registry.index_of(host))
                .map(|idx| grid.registry.status.is_retiring(idx))
                .unwrap_or(false)
        })
        .collect();
    if retiring_pfns.is_empty() {
        return;
    }
    if (grid.live_replica_count(lfn) as i64) < effective {
        return;
    }
    for pfn in retiring_pfns {
        let Some((host, path)) = pfn.split_once(':') else { continue };
        let backend = match grid.backend_for(host) {
            Ok(b) => b,
            Err(e) => {
                notes.push(failure_note(lfn, &e));
                continue;
            }
        };
        match backend.rm(host, path).await {
            Ok(()) => {
                grid.catalogue.remove_location(lfn, &pfn);
                notes.push(format!("{lfn}: migrated off retiring node {host}"));
            }
            Err(e) => notes.push(failure_note(format!("{lfn}: failed to clear retiring replica on {host}"), &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::{make_pfn, ReplicaCatalogue};
    use crate::node::{Disk, Node, NodeType, Timeouts};
    use crate::registry::NodeRegistry;
    use std::collections::HashMap;

    fn sample_node(name: &str, site: &str) -> Node {
        Node {
            name: name.to_string(),
            site: site.to_string(),
            path: "/data".to_string(),
            inbox: "/data/inbox".to_string(),
            node_type: NodeType::Globus,
            disks: vec![Disk { index: 1, quota_kb: 1_000_000 }],
            free_space_kb: 1_000_000,
            timeouts: Timeouts::default(),
            extra_rsl: None,
            extra_jss_contact: None,
            gpfs: false,
            properties: HashMap::new(),
        }
    }

    fn test_grid() -> (tempfile::TempDir, Grid) {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::new(dir.path());
        registry.add(sample_node("n1", "siteA"));
        registry.add(sample_node("n2", "siteB"));
        registry.persist().unwrap();
        registry.persist_status_lists().unwrap();
        let registry = NodeRegistry::load(dir.path()).unwrap();
        let grid = Grid {
            registry,
            catalogue: ReplicaCatalogue::new(),
            weights: Default::default(),
            transfers: crate::transfer::TransferManager::new(),
            admins: crate::identity::AdminList::new([Identity::new("admin")]),
            pending: HashMap::new(),
            min_copies: 2,
            cycle_interval: std::time::Duration::from_secs(60),
            inbox_ttl: std::time::Duration::from_secs(3600),
            tmp_dir: dir.path().to_path_buf(),
        };
        (dir, grid)
    }

    #[tokio::test]
    async fn lock_then_lock_by_same_identity_is_a_no_op() {
        let (_dir, mut grid) = test_grid();
        grid.catalogue.add_location("f", make_pfn("n1", "f"));
        let alice = Identity::new("alice");
        assert!(lock_one(&mut grid, &alice, "f").accepted);
        assert!(lock_one(&mut grid, &alice, "f").accepted);
        assert_eq!(grid.catalogue.get_attribute("f", "lockedby"), "alice");
    }

    #[tokio::test]
    async fn lock_contention_then_admin_unlock() {
        let (_dir, mut grid) = test_grid();
        grid.catalogue.add_location("data/x", make_pfn("n1", "data/x"));
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let admin = Identity::new("admin");

        assert!(lock_one(&mut grid, &alice, "data/x").accepted);
        let bob_attempt = lock_one(&mut grid, &bob, "data/x");
        assert!(!bob_attempt.accepted);
        assert_eq!(grid.catalogue.get_attribute("data/x", "lockedby"), "alice");

        assert!(unlock_one(&mut grid, &admin, "data/x").accepted);
        assert!(lock_one(&mut grid, &bob, "data/x").accepted);
        assert_eq!(grid.catalogue.get_attribute("data/x", "lockedby"), "bob");
    }

    #[test]
    fn replcount_zero_reverts_to_default() {
        let (_dir, mut grid) = test_grid();
        grid.catalogue.add_location("f", make_pfn("n1", "f"));
        grid.catalogue.set_attribute("f", "replcount", "5");
        assert!(replcount_one(&mut grid, "f", 0).accepted);
        assert_eq!(grid.catalogue.get_attribute("f", "replcount"), NULL_SENTINEL);
        assert_eq!(grid.effective_replcount("f"), 2);
    }

    #[test]
    fn replcount_is_capped_at_live_site_count() {
        let (_dir, mut grid) = test_grid();
        grid.catalogue.add_location("f", make_pfn("n1", "f"));
        let outcome = replcount_one(&mut grid, "f", 10);
        assert!(outcome.accepted);
        assert_eq!(grid.catalogue.get_attribute("f", "replcount"), "2");
    }

    #[test]
    fn replcountdir_sets_every_file_under_prefix() {
        let (_dir, mut grid) = test_grid();
        for lfn in ["veg/kale", "veg/root/carrot", "veg/root/potato"] {
            grid.catalogue.add_location(lfn, make_pfn("n1", lfn));
        }
        let outcome = replcount_dir(&mut grid, "veg", 2);
        assert!(outcome.accepted);
        for lfn in ["veg/kale", "veg/root/carrot", "veg/root/potato"] {
            assert_eq!(grid.catalogue.get_attribute(lfn, "replcount"), "2");
        }
    }

    #[test]
    fn retire_then_unretire_round_trips() {
        let (_dir, mut grid) = test_grid();
        assert!(retire(&mut grid, "n1").accepted);
        let idx = grid.registry.index_of("n1").unwrap();
        assert!(grid.registry.status.is_retiring(idx));
        assert!(unretire(&mut grid, "n1").accepted);
        assert!(!grid.registry.status.is_retiring(idx));
    }

    #[test]
    fn place_query_ranks_live_nodes_best_first() {
        let (_dir, grid) = test_grid();
        let outcome = place_query(&grid, 100);
        assert!(outcome.accepted);
        assert_eq!(outcome.message, "n1,n2");
    }

    #[test]
    fn place_query_rejects_when_no_node_fits() {
        let (_dir, grid) = test_grid();
        let outcome = place_query(&grid, 10_000_000_000);
        assert!(!outcome.accepted);
    }

    #[test]
    fn touch_sets_modtime_on_known_lfn_only() {
        let (_dir, mut grid) = test_grid();
        assert!(!touch(&mut grid, "missing").accepted);
        grid.catalogue.add_location("f", make_pfn("n1", "f"));
        assert!(touch(&mut grid, "f").accepted);
        assert_ne!(grid.catalogue.get_attribute("f", "modtime"), NULL_SENTINEL);
    }

    #[test]
    fn failure_note_marks_retryable_errors_distinctly() {
        let retryable = failure_note("n1", &DigsError::transient("timed out"));
        assert!(retryable.contains("retrying next cycle"));

        let terminal = failure_note("n1", &DigsError::invariant("bad record"));
        assert!(!terminal.contains("retrying next cycle"));
    }
}
