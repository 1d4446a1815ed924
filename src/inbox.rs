//! Inbox protocol (C7): drop-file-to-inbox then rename-commit, decoupling
//! "upload in progress" from "file present in namespace" without needing
//! atomic rename across unrelated storage backends (spec section 4.6).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::backend::StorageBackend;
use crate::catalogue::{make_pfn, ReplicaCatalogue};
use crate::error::DigsError;
use crate::lfn;

/// What a client declared when it sent `integrate lfn primary` after
/// staging a put (spec section 4.6, producer side step 3).
#[derive(Debug, Clone, PartialEq)]
pub struct PutDeclaration {
    pub lfn: String,
    pub size: u64,
    pub md5sum: String,
    pub submitter: String,
    pub group: String,
    pub permissions: String,
}

/// Tracks declared-but-not-yet-integrated puts so the scan reconciliation
/// loop can tell an expected in-flight put apart from an orphaned staged
/// file (spec section 4.6 scan reconciliation, spec section 8 scenario 5).
#[derive(Default)]
pub struct PendingPuts {
    by_staged_name: HashMap<String, (PutDeclaration, Instant)>,
}

impl PendingPuts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, declaration: PutDeclaration) -> Result<(), DigsError> {
        let staged_name = lfn::encode(&declaration.lfn)?;
        self.by_staged_name.insert(staged_name, (declaration, Instant::now()));
        Ok(())
    }

    pub fn take(&mut self, staged_name: &str) -> Option<PutDeclaration> {
        self.by_staged_name.remove(staged_name).map(|(d, _)| d)
    }

    /// Staged names declared longer than `ttl` ago with no integration —
    /// candidates for removal by the scan loop.
    pub fn expired(&self, ttl: Duration) -> Vec<String> {
        self.by_staged_name
            .iter()
            .filter(|(_, (_, at))| at.elapsed() >= ttl)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn forget(&mut self, staged_name: &str) {
        self.by_staged_name.remove(staged_name);
    }
}

/// Result of one integration attempt, for the control thread's per-cycle
/// accounting (spec section 4.7 failure policy).
#[derive(Debug, PartialEq)]
pub enum IntegrateOutcome {
    Committed,
    /// Size or checksum mismatch: the staged file is left for the next
    /// cycle to retry or for an operator to investigate.
    VerificationFailed(String),
}

/// Verifies a staged file against its declaration, promotes it to the
/// canonical path, and records it in the catalogue (spec section 4.6,
/// control-thread side steps 1-4).
///
/// Idempotent: re-integrating the same `(lfn, host)` with an identical
/// declaration after the location is already recorded is a no-op (spec
/// section 8 round-trip law).
pub async fn integrate(
    backend: &dyn StorageBackend,
    host: &str,
    catalogue: &mut ReplicaCatalogue,
    declaration: &PutDeclaration,
) -> Result<IntegrateOutcome, DigsError> {
    let staged_name = lfn::encode(&declaration.lfn)?;
    let pfn = make_pfn(host, &declaration.lfn);

    if catalogue.get_locations(&declaration.lfn).contains(&pfn) {
        return Ok(IntegrateOutcome::Committed);
    }

    // Step 1: verify the staged file exists in the inbox.
    let actual_size = backend.inbox_file_length(host, &staged_name).await?;

    // Step 2: verify length and checksum against client-declared values.
    if actual_size != declaration.size {
        return Ok(IntegrateOutcome::VerificationFailed(format!(
            "size mismatch for {}: declared {} actual {}",
            declaration.lfn, declaration.size, actual_size
        )));
    }
    let actual_checksum = backend.inbox_file_checksum(host, &staged_name).await?;
    if !declaration.md5sum.is_empty() && actual_checksum != declaration.md5sum {
        return Ok(IntegrateOutcome::VerificationFailed(format!(
            "checksum mismatch for {}",
            declaration.lfn
        )));
    }

    // Step 3: promote from inbox to canonical path.
    backend
        .copy_from_inbox(host, &staged_name, &declaration.lfn)
        .await?;

    // Step 4: insert into catalogue. The replica becomes visible to
    // readers only once addLocation succeeds (spec section 5: inbox
    // integration is atomic).
    catalogue.add_location(&declaration.lfn, pfn);
    catalogue.set_attribute(&declaration.lfn, "size", declaration.size.to_string());
    catalogue.set_attribute(&declaration.lfn, "md5sum", actual_checksum);
    catalogue.set_attribute(&declaration.lfn, "submitter", declaration.submitter.clone());
    catalogue.set_attribute(&declaration.lfn, "group", declaration.group.clone());
    catalogue.set_attribute(&declaration.lfn, "permissions", declaration.permissions.clone());

    Ok(IntegrateOutcome::Committed)
}

/// One reconciliation pass over a single SE's inbox (spec section 4.6
/// "scan reconciliation"): integrates every staged LFN with a matching
/// declaration, and reports staged files old enough to remove as orphans.
pub async fn scan_and_integrate(
    backend: &dyn StorageBackend,
    host: &str,
    catalogue: &mut ReplicaCatalogue,
    pending: &mut PendingPuts,
    inbox_ttl: Duration,
) -> Result<Vec<IntegrateOutcome>, DigsError> {
    let staged = backend.scan_inbox(host).await?;
    let mut outcomes = Vec::new();

    // Drop declarations old enough to count as orphaned before matching, so
    // a client that declared a put and then crashed doesn't get integrated
    // just because the file happens to still be sitting in the inbox.
    for staged_name in pending.expired(inbox_ttl) {
        if staged.contains(&staged_name) {
            backend.remove_inbox_file(host, &staged_name).await.ok();
        }
        pending.forget(&staged_name);
    }

    for staged_name in &staged {
        match pending.take(staged_name) {
            Some(declaration) => {
                let outcome = integrate(backend, host, catalogue, &declaration).await?;
                if outcome == IntegrateOutcome::Committed {
                    pending.forget(staged_name);
                } else {
                    // leave it declared so the next cycle can retry
                    pending.declare(declaration)?;
                }
                outcomes.push(outcome);
            }
            None => {
                // Never declared at all: the client crashed before ever
                // contacting the control thread. Age it out against the
                // file's own mtime rather than any PendingPuts bookkeeping.
                if let Ok(age) = backend.inbox_file_age(host, staged_name).await {
                    if age >= inbox_ttl {
                        backend.remove_inbox_file(host, staged_name).await.ok();
                    }
                }
            }
        }
    }

    Ok(outcomes)
}
