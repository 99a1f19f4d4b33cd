//! This tool prints the entries of a consensus WAL, one per line.
#![allow(clippy::print_stdout)]

use anyhow::Context as _;
use clap::Parser;
use keel_roles::validator;
use keel_storage::wal;
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
struct Args {
    /// Path to the WAL file.
    path: PathBuf,
    /// Print only the entries of this height.
    #[arg(long)]
    height: Option<u64>,
}

fn describe(payload: &wal::Payload) -> String {
    match payload {
        wal::Payload::Timeout(t) => format!(
            "timeout  {}/{}/{:?} after {}ms",
            t.height, t.round, t.step, t.duration_ms
        ),
        wal::Payload::RoundStep(s) => format!("step     {s}"),
        wal::Payload::Message(m) => {
            let from = m.peer.as_ref().map_or("self".to_owned(), |p| p.to_string());
            let detail = match &m.msg {
                validator::ConsensusMsg::Vote(v) => {
                    let block = match &v.vote.block_id {
                        Some(id) => format!("{:?}", id.hash),
                        None => "nil".to_owned(),
                    };
                    format!(
                        " {:?} of validator {} for {block}",
                        v.vote.vote_type, v.validator_index
                    )
                }
                validator::ConsensusMsg::Proposal(p) => {
                    format!(" pol_round={}", p.proposal.pol_round)
                }
                validator::ConsensusMsg::BlockPart(p) => format!(" part={}", p.part.index),
            };
            format!(
                "message  {}/{} {} from {from}{detail}",
                m.msg.height(),
                m.msg.round(),
                m.msg.label()
            )
        }
    }
}

fn height(payload: &wal::Payload) -> validator::Height {
    match payload {
        wal::Payload::Timeout(t) => t.height,
        wal::Payload::RoundStep(s) => s.height,
        wal::Payload::Message(m) => m.msg.height(),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let reader =
        wal::WalReader::open(&args.path).with_context(|| args.path.display().to_string())?;
    let mut count = 0;
    for (i, entry) in reader.enumerate() {
        let entry = entry.context("WalReader")?;
        count += 1;
        if args
            .height
            .is_some_and(|h| height(&entry.payload) != validator::Height(h))
        {
            continue;
        }
        println!("{:>6} {:?} {}", i + 1, entry.time, describe(&entry.payload));
    }
    println!("{count} entries");
    Ok(())
}
