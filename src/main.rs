//! # Flow Quota Replay
//!
//! Loads settings and rules from one JSON file, then evaluates packets read
//! as JSON lines on stdin, writing one verdict line per packet to stdout:
//!
//! ```text
//! {"source":"192.168.0.1","destination":"192.168.1.2","protocol":6,"data_size":1000}
//! {"verdict":"ok","policy":"test1"}
//! ```
//!
//! An optional `"timestamp"` (Unix seconds) stamps the packet instead of the
//! wall clock. Provider stats go to stderr at end of input.

use clap::Parser;
use flowquota::{ConversationTracker, Enforcer, JsonRuleFile, Packet, RuleMatcher, Settings};
use log::{info, warn};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "flowquota-replay", about = "Replay packets through the quota enforcer")]
struct Args {
    /// Settings and rules file
    #[arg(short = 'f', long = "file", default_value = "./settings.json")]
    file: PathBuf,

    /// Print the conversation table as JSON at end of input
    #[arg(long)]
    dump: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayPacket {
    #[serde(flatten)]
    packet: Packet,
    #[serde(default)]
    timestamp: i64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let settings = match Settings::load(&args.file) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("✗ Failed to load settings from {}: {}", args.file.display(), e);
            return Err(e.into());
        }
    };

    let tracker = Arc::new(ConversationTracker::from_settings(&settings));
    let eviction = tracker.spawn_eviction(settings.eviction_config());

    let matcher = Arc::new(RuleMatcher::new(
        Box::new(JsonRuleFile::new(&args.file)),
        Arc::clone(&tracker),
    )?);
    let enforcer = Enforcer::new(matcher);
    info!("Replaying packets from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let replay: ReplayPacket = match serde_json::from_str(&line) {
            Ok(replay) => replay,
            Err(e) => {
                warn!("Skipping line {}: {}", line_no, e);
                continue;
            }
        };

        let result = enforcer.process_at(&replay.packet, replay.timestamp);
        let mut out = serde_json::to_vec(&result)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
    }
    stdout.flush().await?;

    let stats = enforcer.stats();
    eprintln!(
        "{} packets, {} blocked ({:.1}%), {} conversations tracked",
        stats.total_packets,
        stats.blocked,
        stats.block_rate() * 100.0,
        tracker.len()
    );
    eprintln!("{}", enforcer.stats_json()?);

    if args.dump {
        println!("{}", tracker.dump_json()?);
    }

    eviction.abort();
    Ok(())
}
