//! Control node daemon: loads the node table, builds a `Grid`, and runs
//! the reconciliation loop (C8) alongside the command transport listener
//! (C9) until killed.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use digs::control;
use digs::grid::Grid;
use digs::identity::{AdminList, Identity};
use digs::transport;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "digs-controld", about = "DiGS control node daemon")]
struct Args {
    /// Directory holding mainnodelist.conf and the node-status lists.
    #[arg(long, default_value = digs::buildcfg::CONFIGDIR)]
    install_dir: String,

    /// Address to listen on for the command transport. When omitted, binds
    /// to the low end of `GLOBUS_TCP_PORT_RANGE` (spec section 6).
    #[arg(long)]
    listen: Option<String>,

    /// Identities permitted to run admin-only verbs (remove, retire, unretire).
    #[arg(long = "admin")]
    admins: Vec<String>,

    /// Grid-wide default replica count.
    #[arg(long, default_value_t = 2)]
    min_copies: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let admins = AdminList::new(args.admins.iter().map(|s| Identity::new(s.clone())));
    let grid = Grid::load(&args.install_dir, admins.clone(), args.min_copies)
        .map_err(|e| anyhow::anyhow!("failed to load grid state from {}: {e}", args.install_dir))?;
    let cycle_interval = grid.cycle_interval;
    let grid = Arc::new(Mutex::new(grid));
    let admins = Arc::new(admins);

    let reconciler = {
        let grid = grid.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cycle_interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                let notes = {
                    let mut grid = grid.lock().await;
                    control::run_cycle(&mut grid).await
                };
                for note in notes {
                    log::info!("reconciliation: {note}");
                }
            }
        })
    };

    let listen_addr = args.listen.clone().unwrap_or_else(|| {
        let (lo, _) = digs::buildcfg::tcp_port_range();
        format!("127.0.0.1:{lo}")
    });
    tokio::select! {
        result = transport::serve(&listen_addr, grid, admins) => {
            result.map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        _ = reconciler => {}
    }

    Ok(())
}
