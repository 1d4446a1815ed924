//! Thin CLI front-end sending a single `replcount`/`replcountdir` verb to
//! the control thread over C9 (spec section 4.12, section 8 scenario 6).

use clap::Parser;

#[derive(Parser)]
#[command(name = "digs-replica-count", about = "Set a file or directory's replica count")]
struct Args {
    /// Path to set.
    lfn: String,

    /// Desired replica count (0 reverts to the grid default).
    count: i64,

    /// Apply recursively to every file under `lfn`.
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Caller identity (stands in for the resolved GSI subject in a real deployment).
    #[arg(long, default_value_t = whoami())]
    identity: String,

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
    let verb = if args.recursive { "replcountdir" } else { "replcount" };
    let line = format!("{verb} {} {}", args.lfn, args.count);
    match digs::transport::send_command(&args.addr, &args.identity, &line).await {
        Ok(outcome) => {
            println!("{}", outcome.message);
            if outcome.accepted {
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("digs-replica-count: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
