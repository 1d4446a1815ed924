//! Exports path and environment constants used throughout the crate.

use std::path::PathBuf;

/// Default install directory holding node table, status lists and
/// temporary session files.
pub const CONFIGDIR: &str = "/etc/digs";

#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => {
        concat!("/etc/digs", $subdir)
    };
}

pub const MAIN_NODE_LIST: &str = configdir!("/mainnodelist.conf");
pub const DEAD_NODE_LIST: &str = configdir!("/deadnodes.conf");
pub const DISABLED_NODE_LIST: &str = configdir!("/disablednodes.conf");
pub const RETIRING_NODE_LIST: &str = configdir!("/retiringnodes.conf");
pub const NODE_PREFS_LIST: &str = configdir!("/nodeprefs.conf");

/// Default reconciliation tick interval, in seconds (spec section 4.7).
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 60;

/// Default inbox staleness before an orphaned staged file is removed.
pub const DEFAULT_INBOX_TTL_SECS: u64 = 3600;

/// Ceiling on how much of a file `checksum()` will buffer in memory at
/// once (spec section 7: OutOfMemory is fatal, so this is checked before
/// allocating rather than relied on to fail gracefully after the fact).
pub const MAX_CHECKSUM_BUFFER_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// Default per-node timeouts, in seconds (spec section 4.5).
pub const DEFAULT_JOB_TIMEOUT_SECS: f64 = 45.0;
pub const DEFAULT_FTP_TIMEOUT_SECS: f64 = 45.0;
pub const DEFAULT_COPY_TIMEOUT_SECS: f64 = 600.0;

/// Returns the client-side scratch directory, honouring `QCDGRID_TMP`
/// (spec section 6).
pub fn tmp_dir() -> PathBuf {
    std::env::var_os("QCDGRID_TMP")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Parses `GLOBUS_TCP_PORT_RANGE` ("lo hi") for the transport listener,
/// falling back to the grid's default range when unset or out of bounds.
pub fn tcp_port_range() -> (u16, u16) {
    const DEFAULT_LO: u16 = 16384;
    const DEFAULT_HI: u16 = 65535;

    let Some(raw) = std::env::var_os("GLOBUS_TCP_PORT_RANGE") else {
        return (DEFAULT_LO, DEFAULT_HI);
    };
    let Some(raw) = raw.to_str() else {
        return (DEFAULT_LO, DEFAULT_HI);
    };
    let mut parts = raw.split_whitespace();
    let (Some(lo), Some(hi)) = (parts.next(), parts.next()) else {
        return (DEFAULT_LO, DEFAULT_HI);
    };
    match (lo.parse::<u32>(), hi.parse::<u32>()) {
        (Ok(lo), Ok(hi)) if lo >= 1024 && hi <= 65535 && lo <= hi => (lo as u16, hi as u16),
        _ => (DEFAULT_LO, DEFAULT_HI),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_falls_back_on_garbage_and_out_of_bounds() {
        std::env::remove_var("GLOBUS_TCP_PORT_RANGE");
        assert_eq!(tcp_port_range(), (16384, 65535));

        std::env::set_var("GLOBUS_TCP_PORT_RANGE", "1 70000");
        assert_eq!(tcp_port_range(), (16384, 65535));
        std::env::remove_var("GLOBUS_TCP_PORT_RANGE");
    }
}
