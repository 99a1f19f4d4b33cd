use super::TestNode;
use crate::{
    events::{Event, EventKind},
    state_machine::{proposal, timeout, vote},
};
use assert_matches::assert_matches;
use keel_concurrency::{ctx, testonly::abort_on_panic};
use keel_roles::validator::{self, testonly::Setup, Round, RoundStep, VoteType};
use keel_storage::wal;
use rand::Rng as _;

fn state(height: u64, round: i32, step: RoundStep) -> validator::RoundState {
    validator::RoundState {
        height: validator::Height(height),
        round: Round(round),
        step,
    }
}

fn votes(msgs: &[validator::ConsensusMsg]) -> Vec<(VoteType, Round, bool)> {
    msgs.iter()
        .filter_map(|m| match m {
            validator::ConsensusMsg::Vote(v) => {
                Some((v.vote.vote_type, v.vote.round, v.vote.block_id.is_some()))
            }
            _ => None,
        })
        .collect()
}

#[test]
fn proposer_commits_with_peer_votes() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let setup = Setup::new(&mut ctx.rng(), 4);
    let dir = tempfile::tempdir().unwrap();
    // Validator 1 proposes at height 1, round 0.
    let mut node = TestNode::new(ctx, &setup, 1, &dir);
    let (_, mut blocks) = node.machine.events.subscribe_channel(EventKind::NewBlock);

    node.fire_timeout(ctx);
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Prevote));
    let out = node.take_outbound();
    assert_matches!(out[0], validator::ConsensusMsg::Proposal(_));
    assert_matches!(out[1], validator::ConsensusMsg::BlockPart(_));
    assert_eq!(votes(&out), [(VoteType::Prevote, Round(0), true)]);
    let block_id = node.machine.proposal_block_id().unwrap();

    for i in [0, 2] {
        let msg = node.peer_vote(i, VoteType::Prevote, Round(0), Some(block_id.clone()));
        node.deliver(ctx, msg);
    }
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Precommit));
    assert_eq!(node.machine.locked_block_id(), Some(block_id.clone()));
    assert_eq!(node.machine.locked_round, Round(0));
    assert_eq!(
        votes(&node.take_outbound()),
        [(VoteType::Precommit, Round(0), true)]
    );

    for i in [0, 2] {
        let msg = node.peer_vote(i, VoteType::Precommit, Round(0), Some(block_id.clone()));
        node.deliver(ctx, msg);
    }
    assert_eq!(node.round_state(), state(2, 0, RoundStep::NewHeight));
    assert_eq!(node.machine.last_block_id, Some(block_id.clone()));
    assert_eq!(node.machine.locked_block_id(), None);
    assert_matches!(
        blocks.try_recv(),
        Some(Event::NewBlock { block, block_id: id }) => {
            assert_eq!(block.height, validator::Height(1));
            assert_eq!(id, block_id);
        }
    );
    assert!(node.app.committed().contains_key(&validator::Height(1)));
    assert_eq!(*node.machine.committed_watch.borrow(), Some(validator::Height(1)));
    assert_eq!(
        node.machine.scheduled.as_ref().map(|t| (t.round_state(), t.duration_ms)),
        Some((state(2, 0, RoundStep::NewHeight), 1000))
    );
}

#[test]
fn nil_polka_moves_to_the_next_round() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let setup = Setup::new(&mut ctx.rng(), 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    let (_, mut timeouts) = node.machine.events.subscribe_channel(EventKind::TimeoutPropose);

    node.fire_timeout(ctx);
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Propose));
    assert!(node.take_outbound().is_empty());

    // No proposal arrives.
    node.fire_timeout(ctx);
    assert_eq!(
        timeouts.try_recv(),
        Some(Event::TimeoutPropose(state(1, 0, RoundStep::Propose)))
    );
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Prevote));
    assert_eq!(
        votes(&node.take_outbound()),
        [(VoteType::Prevote, Round(0), false)]
    );

    for i in [1, 2] {
        let msg = node.peer_vote(i, VoteType::Prevote, Round(0), None);
        node.deliver(ctx, msg);
    }
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Precommit));
    assert_eq!(
        votes(&node.take_outbound()),
        [(VoteType::Precommit, Round(0), false)]
    );

    for i in [1, 2] {
        let msg = node.peer_vote(i, VoteType::Precommit, Round(0), None);
        node.deliver(ctx, msg);
    }
    assert_eq!(node.round_state(), state(1, 1, RoundStep::Propose));
    assert_eq!(
        node.machine.scheduled.as_ref().map(|t| (t.round_state(), t.duration_ms)),
        Some((state(1, 1, RoundStep::Propose), 3500))
    );
}

#[test]
fn split_prevotes_wait_for_the_timeout() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let setup = Setup::new(rng, 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    node.fire_timeout(ctx);
    node.fire_timeout(ctx);
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Prevote));

    let block = setup.make_block(
        validator::Height(1),
        None,
        validator::AppHash::default(),
        rng.gen(),
    );
    let other = block.id(&block.make_part_set());
    let msg = node.peer_vote(1, VoteType::Prevote, Round(0), Some(other));
    node.deliver(ctx, msg);
    let msg = node.peer_vote(2, VoteType::Prevote, Round(0), None);
    node.deliver(ctx, msg);
    // +2/3 voted, but not for the same thing.
    assert_eq!(node.round_state(), state(1, 0, RoundStep::PrevoteWait));
    assert_eq!(
        node.machine.scheduled.as_ref().map(|t| t.round_state()),
        Some(state(1, 0, RoundStep::PrevoteWait))
    );

    node.fire_timeout(ctx);
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Precommit));
    assert_eq!(
        votes(&node.take_outbound()),
        [
            (VoteType::Prevote, Round(0), false),
            (VoteType::Precommit, Round(0), false)
        ]
    );
}

#[test]
fn prevotes_of_a_later_round_skip_ahead() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let setup = Setup::new(&mut ctx.rng(), 4);
    let dir = tempfile::tempdir().unwrap();
    // Validator 2 proposes neither in round 0 nor in round 3.
    let mut node = TestNode::new(ctx, &setup, 2, &dir);
    let (_, mut rounds) = node.machine.events.subscribe_channel(EventKind::NewRound);
    node.fire_timeout(ctx);
    assert_eq!(rounds.try_recv(), Some(Event::NewRound(state(1, 0, RoundStep::Propose))));

    for i in [0, 1] {
        let msg = node.peer_vote(i, VoteType::Prevote, Round(3), None);
        node.deliver(ctx, msg);
        assert_eq!(node.round_state(), state(1, 0, RoundStep::Propose));
    }
    let msg = node.peer_vote(3, VoteType::Prevote, Round(3), None);
    node.deliver(ctx, msg);
    assert_eq!(node.round_state(), state(1, 3, RoundStep::Propose));
    assert_eq!(rounds.try_recv(), Some(Event::NewRound(state(1, 3, RoundStep::Propose))));
    assert_eq!(
        node.machine.scheduled.as_ref().map(|t| (t.round_state(), t.duration_ms)),
        Some((state(1, 3, RoundStep::Propose), 4500))
    );
}

#[test]
fn locked_block_is_prevoted_in_later_rounds() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let setup = Setup::new(&mut ctx.rng(), 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 1, &dir);
    let (_, mut locks) = node.machine.events.subscribe_channel(EventKind::Lock);
    node.fire_timeout(ctx);
    let block_id = node.machine.proposal_block_id().unwrap();
    for i in [0, 2] {
        let msg = node.peer_vote(i, VoteType::Prevote, Round(0), Some(block_id.clone()));
        node.deliver(ctx, msg);
    }
    assert_matches!(locks.try_recv(), Some(Event::Lock { block_id: id, .. }) => {
        assert_eq!(id, block_id);
    });

    // The others precommit nil: the round fails, but the lock stays.
    for i in [0, 2] {
        let msg = node.peer_vote(i, VoteType::Precommit, Round(0), None);
        node.deliver(ctx, msg);
    }
    assert_eq!(node.round_state(), state(1, 0, RoundStep::PrecommitWait));
    let msg = node.peer_vote(3, VoteType::Precommit, Round(0), None);
    node.deliver(ctx, msg);
    assert_eq!(node.round_state(), state(1, 1, RoundStep::Propose));
    assert_eq!(node.machine.locked_block_id(), Some(block_id.clone()));
    node.take_outbound();

    // No proposal in round 1: the locked block gets the prevote.
    node.fire_timeout(ctx);
    let out = node.take_outbound();
    assert_matches!(&out[..], [validator::ConsensusMsg::Vote(v)] => {
        assert_eq!(v.vote.vote_type, VoteType::Prevote);
        assert_eq!(v.vote.round, Round(1));
        assert_eq!(v.vote.block_id, Some(block_id.clone()));
    });

    // A nil polka releases the lock.
    for i in [0, 2] {
        let msg = node.peer_vote(i, VoteType::Prevote, Round(1), None);
        node.deliver(ctx, msg);
    }
    let msg = node.peer_vote(3, VoteType::Prevote, Round(1), None);
    node.deliver(ctx, msg);
    assert_eq!(node.round_state(), state(1, 1, RoundStep::Precommit));
    assert_eq!(node.machine.locked_block_id(), None);
    assert_eq!(node.machine.locked_round, Round::NONE);
}

#[test]
fn proposal_checks() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let setup = Setup::new(rng, 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    node.fire_timeout(ctx);

    let block = setup.make_block(
        validator::Height(1),
        None,
        validator::AppHash::default(),
        crate::testonly::InMemoryApplication::payload(validator::Height(1)),
    );
    let parts = block.make_part_set();
    let make = |round: i32| validator::Proposal {
        height: validator::Height(1),
        round: Round(round),
        block_parts_header: parts.header().clone(),
        pol_round: Round::NONE,
    };
    let chain_id = &setup.genesis.chain_id;

    // Validator 2 isn't the proposer of round 0.
    let res = node
        .machine
        .on_proposal(ctx, make(0).sign(chain_id, &setup.validator_keys[2]));
    assert_matches!(res, Err(proposal::Error::InvalidMessage(_)));
    let res = node
        .machine
        .on_proposal(ctx, make(1).sign(chain_id, &setup.validator_keys[2]));
    assert_matches!(res, Err(proposal::Error::Future { round: Round(1), .. }));

    let mut locked = make(0);
    locked.pol_round = Round(0);
    let res = node
        .machine
        .on_proposal(ctx, locked.sign(chain_id, &setup.validator_keys[1]));
    assert_matches!(res, Err(proposal::Error::InvalidPolRound { .. }));

    let signed = make(0).sign(chain_id, &setup.validator_keys[1]);
    node.machine.on_proposal(ctx, signed.clone()).unwrap();
    assert_matches!(
        node.machine.on_proposal(ctx, signed),
        Err(proposal::Error::Duplicate { round: Round(0) })
    );

    // The block arrives in parts, which complete the proposal.
    for part in parts.parts() {
        node.deliver(
            ctx,
            validator::ConsensusMsg::BlockPart(validator::BlockPartMsg {
                height: validator::Height(1),
                round: Round(0),
                part: part.clone(),
            }),
        );
    }
    assert!(node.machine.is_proposal_complete());
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Prevote));
    assert_eq!(
        votes(&node.take_outbound()),
        [(VoteType::Prevote, Round(0), true)]
    );
}

#[test]
fn proposal_completed_before_the_round_waits_for_propose() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let setup = Setup::new(&mut ctx.rng(), 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    let (_, mut rounds) = node.machine.events.subscribe_channel(EventKind::NewRound);
    assert_eq!(node.round_state(), state(1, 0, RoundStep::NewHeight));

    // The proposer's commit timeout fired before ours.
    let block = setup.make_block(
        validator::Height(1),
        None,
        validator::AppHash::default(),
        crate::testonly::InMemoryApplication::payload(validator::Height(1)),
    );
    let parts = block.make_part_set();
    let proposal = validator::Proposal {
        height: validator::Height(1),
        round: Round(0),
        block_parts_header: parts.header().clone(),
        pol_round: Round::NONE,
    }
    .sign(&setup.genesis.chain_id, &setup.validator_keys[1]);
    node.deliver(ctx, validator::ConsensusMsg::Proposal(proposal));
    for part in parts.parts() {
        node.deliver(
            ctx,
            validator::ConsensusMsg::BlockPart(validator::BlockPartMsg {
                height: validator::Height(1),
                round: Round(0),
                part: part.clone(),
            }),
        );
    }
    assert!(node.machine.is_proposal_complete());
    assert_eq!(node.round_state(), state(1, 0, RoundStep::NewHeight));
    assert!(node.take_outbound().is_empty());
    assert_eq!(rounds.try_recv(), None);

    node.fire_timeout(ctx);
    assert_eq!(rounds.try_recv(), Some(Event::NewRound(state(1, 0, RoundStep::Propose))));
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Prevote));
    assert_eq!(
        votes(&node.take_outbound()),
        [(VoteType::Prevote, Round(0), true)]
    );
    let markers: Vec<_> = super::read_payloads(&dir.path().join("cs.wal"))
        .into_iter()
        .filter(|p| matches!(p, wal::Payload::RoundStep(_)))
        .collect();
    assert_eq!(
        markers[markers.len() - 2..],
        [
            super::marker(1, 0, RoundStep::Propose),
            super::marker(1, 0, RoundStep::Prevote)
        ]
    );
}

#[test]
fn invalid_block_is_rejected() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let setup = Setup::new(rng, 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    node.fire_timeout(ctx);

    // The application doesn't accept random payloads.
    let block = setup.make_block(
        validator::Height(1),
        None,
        validator::AppHash::default(),
        rng.gen(),
    );
    let parts = block.make_part_set();
    let proposal = validator::Proposal {
        height: validator::Height(1),
        round: Round(0),
        block_parts_header: parts.header().clone(),
        pol_round: Round::NONE,
    }
    .sign(&setup.genesis.chain_id, &setup.validator_keys[1]);
    node.deliver(ctx, validator::ConsensusMsg::Proposal(proposal));
    for part in parts.parts() {
        node.deliver(
            ctx,
            validator::ConsensusMsg::BlockPart(validator::BlockPartMsg {
                height: validator::Height(1),
                round: Round(0),
                part: part.clone(),
            }),
        );
    }
    assert!(node.machine.proposal_block.is_none());
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Propose));
}

#[test]
fn stale_timeout_is_ignored() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let setup = Setup::new(&mut ctx.rng(), 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    let first = node.machine.scheduled.clone().unwrap();
    node.fire_timeout(ctx);
    assert_matches!(
        node.machine.on_timeout(ctx, first),
        Err(timeout::Error::Old { .. })
    );
    assert_eq!(node.round_state(), state(1, 0, RoundStep::Propose));
}

#[test]
fn conflicting_votes_are_rejected() {
    abort_on_panic();
    let ctx = &ctx::test_root(&ctx::RealClock);
    let rng = &mut ctx.rng();
    let setup = Setup::new(rng, 4);
    let dir = tempfile::tempdir().unwrap();
    let mut node = TestNode::new(ctx, &setup, 0, &dir);
    let (_, mut events) = node.machine.events.subscribe_channel(EventKind::Vote);
    node.fire_timeout(ctx);

    let block = setup.make_block(
        validator::Height(1),
        None,
        validator::AppHash::default(),
        rng.gen(),
    );
    let block_id = block.id(&block.make_part_set());
    let nil = node.peer_vote(1, VoteType::Prevote, Round(0), None);
    let validator::ConsensusMsg::Vote(nil) = nil else {
        unreachable!()
    };
    let other = node.peer_vote(1, VoteType::Prevote, Round(0), Some(block_id));
    let validator::ConsensusMsg::Vote(other) = other else {
        unreachable!()
    };

    node.machine.on_vote(ctx, nil.clone()).unwrap();
    assert_matches!(
        node.machine.on_vote(ctx, other),
        Err(vote::Error::Conflicting(_))
    );
    // Duplicates are accepted but counted once.
    node.machine.on_vote(ctx, nil.clone()).unwrap();
    assert_matches!(events.try_recv(), Some(Event::Vote(v)) => assert_eq!(*v, nil));
    assert_eq!(events.try_recv(), None);

    let mut forged = nil.clone();
    forged.vote.round = Round(2);
    assert_matches!(
        node.machine.on_vote(ctx, forged),
        Err(vote::Error::InvalidMessage(_))
    );
    let mut old = nil;
    old.vote.height = validator::Height(0);
    assert_matches!(node.machine.on_vote(ctx, old), Err(vote::Error::Old { .. }));
}
