//! Thin CLI front-end sending a single `lock`/`lockdir` verb to the
//! control thread over C9 (spec section 4.12, section 6 exit-code table).

use clap::Parser;

#[derive(Parser)]
#[command(name = "digs-lock", about = "Lock a file or directory on the grid")]
struct Args {
    /// Path to lock.
    lfn: String,

    /// Lock every file under `lfn` recursively.
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
    let verb = if args.recursive { "lockdir" } else { "lock" };
    let line = format!("{verb} {}", args.lfn);
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
            eprintln!("digs-lock: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
