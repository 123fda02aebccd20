use credit_ledger::builder::SnapshotBuilder;
use credit_ledger::*;
use proptest::prelude::*;

const CHARACTERS: u64 = 4;

fn vote_sequence() -> impl Strategy<Value = Vec<(u64, i64)>> {
    let delta = prop_oneof![
        8 => -60i64..=60,
        1 => any::<i64>(),
        1 => Just(i64::MIN),
        1 => Just(i64::MAX),
    ];
    prop::collection::vec((1..=CHARACTERS, delta), 0..200)
}

proptest! {
    #[test]
    fn budget_is_never_exceeded(votes in vote_sequence()) {
        let mut allocations = AllocationMap::new();
        for (cid, delta) in votes {
            if let Ok(next) = apply_delta(&allocations, CharacterId(cid), delta) {
                allocations = next;
            }
            prop_assert!(spent_credits(&allocations) <= CREDIT_BUDGET);
            prop_assert!(allocations.iter().all(|(_, w)| w != 0));
        }
    }

    #[test]
    fn rejected_votes_leave_allocations_alone(votes in vote_sequence()) {
        let mut allocations = AllocationMap::new();
        for (cid, delta) in votes {
            let before = allocations.clone();
            match apply_delta(&allocations, CharacterId(cid), delta) {
                Ok(next) => allocations = next,
                Err(_) => prop_assert_eq!(&before, &allocations),
            }
        }
    }

    #[test]
    fn withdrawals_are_always_accepted(votes in vote_sequence(), cid in 1..=CHARACTERS) {
        let mut allocations = AllocationMap::new();
        for (c, delta) in votes {
            if let Ok(next) = apply_delta(&allocations, CharacterId(c), delta) {
                allocations = next;
            }
        }
        let current = allocations.get(CharacterId(cid));
        if current != 0 {
            let step = -current.signum();
            let res = apply_delta(&allocations, CharacterId(cid), step);
            prop_assert!(res.is_ok());
            prop_assert_eq!(res.unwrap().get(CharacterId(cid)), current + step);
        }
    }

    #[test]
    fn total_score_is_the_sum_over_players(
        w1 in -50i64..=50,
        w2 in -50i64..=50,
        w3 in -50i64..=50,
    ) {
        let snapshot = SnapshotBuilder::new()
            .characters(&["A", "B"]).unwrap()
            .player("P1").unwrap()
            .player("P2").unwrap()
            .player("P3").unwrap()
            .allocation("P1", "A", w1).unwrap()
            .allocation("P2", "A", w2).unwrap()
            .allocation("P3", "A", w3).unwrap()
            .allocation("P3", "B", 1).unwrap()
            .build();
        let a = snapshot.character_by_name("A").unwrap().id;
        prop_assert_eq!(total_score(&snapshot.players, a), w1 + w2 + w3);
        let rows = rank_characters(&snapshot, RankingMode::GroupScore, None).unwrap();
        let row = rows.iter().find(|r| r.character == a).unwrap();
        prop_assert_eq!(row.total_score, w1 + w2 + w3);
    }
}

#[test]
fn scenario_two_players() {
    let snapshot = SnapshotBuilder::new()
        .characters(&["A", "B"])
        .and_then(|b| b.player("P1"))
        .and_then(|b| b.player("P2"))
        .unwrap()
        .build();
    let p1 = snapshot.player_by_name("P1").unwrap().id;
    let p2 = snapshot.player_by_name("P2").unwrap().id;
    let a = snapshot.character_by_name("A").unwrap().id;
    let b = snapshot.character_by_name("B").unwrap().id;

    let mut current = snapshot;
    for (pid, cid, delta) in [(p1, a, 50), (p2, a, -20), (p2, b, 10)] {
        let applied = apply_vote(&current, pid, cid, delta).unwrap();
        current = current.with_allocations(pid, applied.allocations).unwrap();
    }

    let rows = rank_characters(&current, RankingMode::GroupScore, None).unwrap();
    let view: Vec<(&str, i64)> = rows
        .iter()
        .map(|r| (r.name.as_str(), r.total_score))
        .collect();
    assert_eq!(view, vec![("A", 30), ("B", 10)]);
    assert_eq!(
        remaining_credits(&current.player(p2).unwrap().allocations),
        70
    );
}
