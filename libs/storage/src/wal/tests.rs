use super::*;
use assert_matches::assert_matches;
use keel_concurrency::{ctx, time};
use keel_roles::validator::{self, testonly::Setup};
use pretty_assertions::assert_eq;
use std::{fs, io::Write as _};

fn timeout(height: u64) -> validator::TimeoutInfo {
    validator::TimeoutInfo {
        duration_ms: 0,
        height: validator::Height(height),
        round: validator::Round(0),
        step: validator::RoundStep::NewHeight,
    }
}

fn marker(step: validator::RoundStep) -> validator::RoundState {
    validator::RoundState {
        height: validator::Height(1),
        round: validator::Round(0),
        step,
    }
}

fn make_entries(ctx: &ctx::Ctx) -> Vec<Entry> {
    let rng = &mut ctx.rng();
    let setup = Setup::new(rng, 1);
    let vote = validator::Vote {
        vote_type: validator::VoteType::Prevote,
        height: validator::Height(1),
        round: validator::Round(0),
        block_id: None,
    }
    .sign(
        &setup.genesis.chain_id,
        &setup.genesis.committee,
        &setup.validator_keys[0],
    );
    let t = ctx.now_utc();
    vec![
        Entry::timeout(t, timeout(1)),
        Entry::round_step(t, marker(validator::RoundStep::Propose)),
        Entry::message(
            t,
            validator::PeerMessage::internal(validator::ConsensusMsg::Vote(vote)),
        ),
    ]
}

#[test]
fn test_append_and_read() {
    let ctx = &ctx::test_root(&ctx::RealClock);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data/cs.wal");
    let want = make_entries(ctx);

    let mut wal = Wal::open(&path).unwrap();
    for e in &want {
        wal.append(e.clone()).unwrap();
    }
    assert_eq!(want.len() as u64, wal.entries_written());
    drop(wal);
    assert_eq!(want, Wal::read_all(&path).unwrap());

    // Reopening appends after the existing entries.
    let mut wal = Wal::open(&path).unwrap();
    wal.append(want[0].clone()).unwrap();
    let got = Wal::read_all(&path).unwrap();
    assert_eq!(want.len() + 1, got.len());
    assert_eq!(want[0], got[want.len()]);
}

#[test]
fn test_entry_encoding() {
    let ctx = &ctx::test_root(&ctx::ManualClock::new());
    let e = Entry::timeout(ctx.now_utc(), timeout(1));
    let json: serde_json::Value = serde_json::to_value(&e).unwrap();
    assert_eq!(
        serde_json::json!({
            "type": "timeout",
            "duration_ms": 0,
            "height": 1,
            "round": 0,
            "step": "new_height",
        }),
        json["msg"]
    );
    let time = json["time"].as_str().unwrap();
    assert!(time.ends_with('Z'), "{time}");
    assert_eq!(e, serde_json::from_value(json).unwrap());
}

#[test]
fn test_missing_log_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        Vec::<Entry>::new(),
        Wal::read_all(&dir.path().join("missing.wal")).unwrap()
    );
}

#[test]
fn test_timestamps_are_clamped() {
    let clock = ctx::ManualClock::new();
    let ctx = &ctx::test_root(&clock);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cs.wal");

    clock.advance(time::Duration::seconds(10));
    let late = ctx.now_utc();
    let early = late + time::Duration::seconds(-5);

    let mut wal = Wal::open(&path).unwrap();
    wal.append(Entry::timeout(late, timeout(1))).unwrap();
    drop(wal);
    // The last timestamp survives reopening.
    let mut wal = Wal::open(&path).unwrap();
    wal.append(Entry::timeout(early, timeout(2))).unwrap();

    let got = Wal::read_all(&path).unwrap();
    assert_eq!(late, got[1].time);
    assert_eq!(
        Payload::Timeout(timeout(2)),
        got[1].payload
    );
}

#[test]
fn test_truncated_tail() {
    let ctx = &ctx::test_root(&ctx::RealClock);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cs.wal");
    let want = make_entries(ctx);
    let mut wal = Wal::open(&path).unwrap();
    for e in &want {
        wal.append(e.clone()).unwrap();
    }
    drop(wal);

    // Crash in the middle of an append.
    let mut raw = fs::read(&path).unwrap();
    let full_len = raw.len();
    raw.extend_from_slice(br#"{"time":"2024-01-01T00:00:00Z","msg":{"ty"#);
    fs::write(&path, &raw).unwrap();

    // Reader treats the fragment as the end of the log.
    assert_eq!(want, Wal::read_all(&path).unwrap());

    // Writer truncates it.
    let mut wal = Wal::open(&path).unwrap();
    assert_eq!(full_len as u64, fs::metadata(&path).unwrap().len());
    wal.append(want[0].clone()).unwrap();
    let got = Wal::read_all(&path).unwrap();
    assert_eq!(want.len() + 1, got.len());
}

#[test]
fn test_malformed_entry() {
    let ctx = &ctx::test_root(&ctx::RealClock);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cs.wal");
    let want = make_entries(ctx);
    let mut wal = Wal::open(&path).unwrap();
    wal.append(want[0].clone()).unwrap();
    drop(wal);
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"garbage\":1}\n").unwrap();
    drop(file);
    let mut wal = Wal::open(&path).unwrap();
    wal.append(want[1].clone()).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert_eq!(want[0], reader.next().unwrap().unwrap());
    assert_matches!(reader.next(), Some(Err(Error::Malformed { line: 2, .. })));
    // Iteration ends at the corruption.
    assert!(reader.next().is_none());
    assert!(Wal::read_all(&path).is_err());
}
