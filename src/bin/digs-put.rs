//! Thin CLI front-end for the producer side of the inbox protocol (spec
//! section 4.6): stages the file into the target node's inbox under its
//! DIR-encoded name, then sends `integrate` to the control thread.
//!
//! The `--inbox` flag stands in for the GridFTP/SRM/OMERO client library a
//! real deployment would use to reach the SE directly; this crate's
//! backends are simulated against local filesystem roots (spec section
//! 4.14), so staging is a local copy here too.

use clap::Parser;

#[derive(Parser)]
#[command(name = "digs-put", about = "Upload a file into the grid")]
struct Args {
    /// Local file to upload.
    local_path: String,

    /// Target logical file name.
    lfn: String,

    /// Storage element to stage the primary replica on. When omitted, the
    /// control thread's placement engine picks the best-ranked live node.
    #[arg(long)]
    host: Option<String>,

    /// The target node's inbox directory.
    #[arg(long)]
    inbox: String,

    /// Caller identity.
    #[arg(long, default_value_t = whoami())]
    identity: String,

    #[arg(long, default_value = "default")]
    group: String,

    #[arg(long, default_value = "644")]
    permissions: String,

    /// Control node address.
    #[arg(long, default_value = "127.0.0.1:9619")]
    addr: String,
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    match run(&args).await {
        Ok(outcome) => {
            println!("{}", outcome.message);
            if outcome.accepted {
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("digs-put: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> anyhow::Result<digs::control::CommandOutcome> {
    let size = tokio::fs::metadata(&args.local_path).await?.len();

    let host = match &args.host {
        Some(host) => host.clone(),
        None => {
            let placed = digs::transport::send_command(
                &args.addr,
                &args.identity,
                &format!("place {size}"),
            )
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            if !placed.accepted {
                return Ok(placed);
            }
            placed
                .message
                .split(',')
                .next()
                .ok_or_else(|| anyhow::anyhow!("placement query returned no candidates"))?
                .to_string()
        }
    };

    let staged_name = digs::lfn::encode(&args.lfn).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let dest = std::path::Path::new(&args.inbox).join(&staged_name);
    tokio::fs::create_dir_all(&args.inbox).await?;
    tokio::fs::copy(&args.local_path, &dest).await?;

    let md5sum = digs::backend::file_checksum(&dest)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let line = format!(
        "integrate {} {} {} {} {} {} {}",
        args.lfn, host, size, md5sum, args.identity, args.group, args.permissions
    );
    digs::transport::send_command(&args.addr, &args.identity, &line)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
