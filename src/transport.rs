//! Command transport (C9): an authenticated, length-prefixed message
//! channel between the CLI front-ends and the control thread (spec
//! section 4.8).
//!
//! Framing: a 4-byte little-endian length followed by that many bytes of
//! ASCII payload — the catalogue-mutation commands are verb-plus-arguments
//! lines, not the STDOUT_REQ/STATE/OUTFILES job-controller message types
//! (those belong to the out-of-scope job-submission subsystem, spec
//! section 1). `tokio_util::codec::LengthDelimitedCodec` implements the
//! framing; this module owns only parsing, dispatch, and authorization.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::control::{self, Command, CommandOutcome};
use crate::error::DigsError;
use crate::grid::Grid;
use crate::identity::{AdminList, Identity};
use crate::inbox::PutDeclaration;

/// Verbs that require the caller to be an administrator rather than
/// merely the lock owner (spec section 4.8: "admin-only verbs").
const ADMIN_ONLY_VERBS: &[&str] = &["remove", "retire", "unretire"];

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

/// Parses one wire line of the form `<identity> <verb> <args...>` into a
/// caller identity and a `Command` (spec section 4.8 framing rule; verb
/// table in spec section 6).
pub fn parse_request(line: &str) -> Result<(Identity, Command), DigsError> {
    let mut parts = line.split_whitespace();
    let identity = parts
        .next()
        .ok_or_else(|| DigsError::protocol("empty request"))?;
    let verb = parts
        .next()
        .ok_or_else(|| DigsError::protocol("missing verb"))?;
    let args: Vec<&str> = parts.collect();

    let command = match verb {
        "place" => Command::PlaceQuery(parse_int(&args, 0)? as u64),
        "lock" => Command::Lock(arg(&args, 0, "lfn")?.to_string()),
        "lockdir" => Command::LockDir(arg(&args, 0, "dir")?.to_string()),
        "unlock" => Command::Unlock(arg(&args, 0, "lfn")?.to_string()),
        "unlockdir" => Command::UnlockDir(arg(&args, 0, "dir")?.to_string()),
        "replcount" => Command::ReplCount(arg(&args, 0, "lfn")?.to_string(), parse_int(&args, 1)?),
        "replcountdir" => {
            Command::ReplCountDir(arg(&args, 0, "dir")?.to_string(), parse_int(&args, 1)?)
        }
        "retire" => Command::Retire(arg(&args, 0, "host")?.to_string()),
        "unretire" => Command::Unretire(arg(&args, 0, "host")?.to_string()),
        "touch" => Command::Touch(arg(&args, 0, "lfn")?.to_string()),
        "remove" => Command::Remove(arg(&args, 0, "lfn")?.to_string()),
        "integrate" => {
            let declaration = PutDeclaration {
                lfn: arg(&args, 0, "lfn")?.to_string(),
                size: parse_int(&args, 2)? as u64,
                md5sum: arg(&args, 3, "md5sum")?.to_string(),
                submitter: arg(&args, 4, "submitter")?.to_string(),
                group: arg(&args, 5, "group")?.to_string(),
                permissions: arg(&args, 6, "permissions")?.to_string(),
            };
            let host = arg(&args, 1, "host")?.to_string();
            Command::Integrate(declaration, host)
        }
        other => return Err(DigsError::protocol(format!("unrecognized verb '{other}'"))),
    };
    Ok((Identity::new(identity), command))
}

fn arg<'a>(args: &[&'a str], idx: usize, name: &str) -> Result<&'a str, DigsError> {
    args.get(idx)
        .copied()
        .ok_or_else(|| DigsError::protocol(format!("missing argument '{name}'")))
}

fn parse_int(args: &[&str], idx: usize) -> Result<i64, DigsError> {
    arg(args, idx, "n")?
        .parse()
        .map_err(|_| DigsError::protocol("expected an integer argument"))
}

fn verb_of(command: &Command) -> &'static str {
    match command {
        Command::PlaceQuery(_) => "place",
        Command::Integrate(..) => "integrate",
        Command::Remove(_) => "remove",
        Command::Lock(_) => "lock",
        Command::LockDir(_) => "lockdir",
        Command::Unlock(_) => "unlock",
        Command::UnlockDir(_) => "unlockdir",
        Command::ReplCount(..) => "replcount",
        Command::ReplCountDir(..) => "replcountdir",
        Command::Retire(_) => "retire",
        Command::Unretire(_) => "unretire",
        Command::Touch(_) => "touch",
    }
}

fn encode_outcome(outcome: &CommandOutcome) -> String {
    format!("{} {}", if outcome.accepted { 0 } else { 1 }, outcome.message)
}

/// Decodes a response line sent by `encode_outcome` back into an outcome,
/// for client binaries (spec section 6 exit-code table: 0 accepted, 1
/// rejected).
pub fn decode_outcome(line: &str) -> CommandOutcome {
    match line.split_once(' ') {
        Some(("0", message)) => CommandOutcome { accepted: true, message: message.to_string() },
        Some((_, message)) => CommandOutcome { accepted: false, message: message.to_string() },
        None => CommandOutcome { accepted: false, message: "malformed response".to_string() },
    }
}

/// Binds `addr` and serves connections until the process is killed; each
/// connection is handled independently but every command it carries is
/// forwarded through the single shared `Grid`, preserving the "one command
/// at a time" rule (spec section 4.7) even across concurrent clients.
pub async fn serve(addr: &str, grid: Arc<Mutex<Grid>>, admins: Arc<AdminList>) -> Result<(), DigsError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| DigsError::protocol(format!("bind {addr}: {e}")))?;
    log::info!("digs-controld listening on {addr}");
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| DigsError::transient(format!("accept: {e}")))?;
        log::debug!("accepted connection from {peer}");
        let grid = grid.clone();
        let admins = admins.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, grid, admins).await {
                log::warn!("connection from {peer} ended with error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    grid: Arc<Mutex<Grid>>,
    admins: Arc<AdminList>,
) -> Result<(), DigsError> {
    let mut framed = Framed::new(stream, codec());
    while let Some(frame) = framed.next().await {
        let frame = frame.map_err(|e| DigsError::protocol(format!("frame read: {e}")))?;
        let line = String::from_utf8_lossy(&frame).to_string();
        let outcome = match parse_request(&line) {
            Ok((identity, command)) => {
                if ADMIN_ONLY_VERBS.contains(&verb_of(&command)) && !admins.is_admin(&identity) {
                    CommandOutcome { accepted: false, message: "admin privilege required".to_string() }
                } else {
                    let mut grid = grid.lock().await;
                    control::dispatch(&mut grid, &identity, command).await
                }
            }
            Err(e) => CommandOutcome { accepted: false, message: e.to_string() },
        };
        framed
            .send(bytes::Bytes::from(encode_outcome(&outcome)))
            .await
            .map_err(|e| DigsError::protocol(format!("frame write: {e}")))?;
    }
    Ok(())
}

/// Connects to `addr`, sends one `<identity> <verb> <args...>` line, and
/// returns the decoded outcome — the single round trip every thin CLI
/// binary performs.
pub async fn send_command(addr: &str, identity: &str, verb_line: &str) -> Result<CommandOutcome, DigsError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| DigsError::transient(format!("connect {addr}: {e}")))?;
    let mut framed = Framed::new(stream, codec());
    let request = format!("{identity} {verb_line}");
    framed
        .send(bytes::Bytes::from(request))
        .await
        .map_err(|e| DigsError::protocol(format!("frame write: {e}")))?;
    let response = framed
        .next()
        .await
        .ok_or_else(|| DigsError::transient("connection closed before response"))?
        .map_err(|e| DigsError::protocol(format!("frame read: {e}")))?;
    Ok(decode_outcome(&String::from_utf8_lossy(&response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lock_and_replcount_verbs() {
        let (identity, command) = parse_request("alice lock fruit/apple").unwrap();
        assert_eq!(identity.as_str(), "alice");
        assert_eq!(command, Command::Lock("fruit/apple".to_string()));

        let (_, command) = parse_request("alice replcountdir veg 3").unwrap();
        assert_eq!(command, Command::ReplCountDir("veg".to_string(), 3));
    }

    #[test]
    fn parses_place_query() {
        let (_, command) = parse_request("alice place 1024").unwrap();
        assert_eq!(command, Command::PlaceQuery(1024));
    }

    #[test]
    fn rejects_unknown_verb_and_missing_args() {
        assert!(parse_request("alice fly-to-moon").is_err());
        assert!(parse_request("alice lock").is_err());
    }

    #[test]
    fn outcome_round_trips_through_wire_encoding() {
        let outcome = CommandOutcome { accepted: true, message: "locked f".to_string() };
        let line = encode_outcome(&outcome);
        assert_eq!(decode_outcome(&line), outcome);
    }

    #[test]
    fn admin_only_verbs_are_identified() {
        assert!(ADMIN_ONLY_VERBS.contains(&verb_of(&Command::Retire("n1".to_string()))));
        assert!(!ADMIN_ONLY_VERBS.contains(&verb_of(&Command::Lock("f".to_string()))));
    }
}
