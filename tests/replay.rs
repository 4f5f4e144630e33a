use std::fs;
use std::path::PathBuf;

use ranked_ledger::events::{GameEvent, MeetingVerdict, parse_events};
use ranked_ledger::fuzzy::indel_ratio;
use ranked_ledger::match_log::{MatchRecord, MatchResult};
use ranked_ledger::replay::{LastVote, Team, replay};

const CREW: &[&str] = &["Aiden", "Sleepy", "Chief", "Nova", "Pickle", "Moon", "Dragon", "Echo"];
const IMPS: &[&str] = &["Ghost", "Wolf"];

fn full_lobby(result: MatchResult) -> MatchRecord {
    let mut players: Vec<String> = CREW.iter().map(|s| s.to_string()).collect();
    players.extend(IMPS.iter().map(|s| s.to_string()));
    MatchRecord {
        match_id: 77,
        game_started: "4/2/2024 21:00:00".to_string(),
        result,
        players,
        impostors: IMPS.iter().map(|s| s.to_string()).collect(),
        events_log_file: "77_events.json".to_string(),
    }
}

fn death(name: &str, killer: &str, time: &str) -> GameEvent {
    GameEvent::Death {
        name: name.to_string(),
        killer: Some(killer.to_string()),
        time: Some(time.to_string()),
    }
}

fn vote(player: &str, target: &str) -> GameEvent {
    GameEvent::PlayerVote {
        player: player.to_string(),
        target: Some(target.to_string()),
        time: None,
    }
}

fn exiled(player: &str, time: &str) -> GameEvent {
    GameEvent::Exiled {
        player: player.to_string(),
        time: Some(time.to_string()),
    }
}

fn meeting_end(verdict: MeetingVerdict) -> GameEvent {
    GameEvent::MeetingEnd { verdict }
}

fn player<'a>(m: &'a ranked_ledger::replay::Match, name: &str) -> &'a ranked_ledger::replay::PlayerInMatch {
    m.players
        .iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| panic!("{name} not in match"))
}

#[test]
fn death_before_any_meeting_counts_as_first_round() {
    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![
        death("Nova", "Ghost", "4/2/2024 21:02:10"),
        GameEvent::MeetingStart {
            player: Some("Chief".to_string()),
        },
        death("Moon", "Wolf", "4/2/2024 21:04:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    let nova = player(&m, "Nova");
    assert!(!nova.alive);
    assert!(nova.died_first_round);
    assert_eq!(nova.rounds_survived, 1);

    // A meeting was called between the two deaths.
    let moon = player(&m, "Moon");
    assert!(!moon.died_first_round);

    assert_eq!(player(&m, "Ghost").number_of_kills, 1);
    assert_eq!(player(&m, "Wolf").number_of_kills, 1);
    assert_eq!(m.alive_players, 8);
}

#[test]
fn duplicate_death_events_are_idempotent() {
    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![
        death("Nova", "Ghost", "4/2/2024 21:02:10"),
        death("Nova", "Wolf", "4/2/2024 21:02:30"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert_eq!(m.alive_players, 9);
    assert_eq!(player(&m, "Ghost").number_of_kills, 1);
    assert_eq!(player(&m, "Wolf").number_of_kills, 0);
}

#[test]
fn task_completion_flags_alive_and_dead() {
    let record = full_lobby(MatchResult::CrewWin);
    let mut events: Vec<GameEvent> = (0..10)
        .map(|_| GameEvent::Task {
            name: "Aiden".to_string(),
        })
        .collect();
    events.push(death("Sleepy", "Ghost", "4/2/2024 21:02:00"));
    events.extend((0..10).map(|_| GameEvent::Task {
        name: "Sleepy".to_string(),
    }));
    // Impostor tasks are a no-op.
    events.push(GameEvent::Task {
        name: "Ghost".to_string(),
    });

    let m = replay(&record, &events, indel_ratio, 32.0);
    let aiden = player(&m, "Aiden");
    assert_eq!(aiden.tasks_complete, 10);
    assert!(aiden.finished_tasks_alive);
    assert!(!aiden.finished_tasks_dead);

    let sleepy = player(&m, "Sleepy");
    assert!(sleepy.finished_tasks_dead);
    assert!(!sleepy.finished_tasks_alive);

    assert_eq!(player(&m, "Ghost").tasks_complete, 0);
}

#[test]
fn vote_classification_and_counters() {
    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![
        vote("Aiden", "Ghost"),
        vote("Sleepy", "Chief"),
        GameEvent::PlayerVote {
            player: "Pickle".to_string(),
            target: Some("none".to_string()),
            time: None,
        },
        // Impostor votes never move the crewmate counters.
        vote("Wolf", "Aiden"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    let aiden = player(&m, "Aiden");
    assert_eq!((aiden.placed_votes, aiden.correct_votes), (1, 1));

    let sleepy = player(&m, "Sleepy");
    assert_eq!((sleepy.placed_votes, sleepy.incorrect_votes), (1, 1));

    let pickle = player(&m, "Pickle");
    assert_eq!((pickle.placed_votes, pickle.skip_votes), (1, 1));
    assert_eq!(pickle.last_voted, Some(LastVote::Skip));

    let wolf = player(&m, "Wolf");
    assert_eq!(wolf.placed_votes, 0);
    assert_eq!(wolf.last_voted, Some(LastVote::Target("Aiden".to_string())));
}

#[test]
fn misspelled_names_resolve_and_unknown_names_warn() {
    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![
        death("Sleppy", "Ghost", "4/2/2024 21:02:00"),
        death("Xyzzy", "Ghost", "4/2/2024 21:02:30"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert!(!player(&m, "Sleepy").alive);
    assert_eq!(m.alive_players, 9);
    assert_eq!(m.warnings.len(), 1);
    assert!(m.warnings[0].contains("Xyzzy"));
}

#[test]
fn early_impostor_ejection_flags_the_solo_game() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        vote("Aiden", "Ghost"),
        vote("Sleepy", "Ghost"),
        exiled("Ghost", "4/2/2024 21:03:30"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    assert!(m.solo_imp_game);
    assert!(player(&m, "Ghost").ejected_early_as_imp);
    assert!(player(&m, "Wolf").solo_imp);
    assert!(!player(&m, "Ghost").solo_imp);

    // Both correct voters collected an eject credit at ten players alive.
    let aiden = player(&m, "Aiden");
    assert_eq!(aiden.correct_vote_on_eject.len(), 1);
    assert_eq!(aiden.correct_vote_on_eject[0].players_alive, 10);
    assert_eq!(player(&m, "Sleepy").correct_vote_on_eject.len(), 1);
    assert!(player(&m, "Chief").correct_vote_on_eject.is_empty());

    // Solo impostor kills are tracked separately from then on.
    let events = vec![
        exiled("Ghost", "4/2/2024 21:03:30"),
        death("Nova", "Wolf", "4/2/2024 21:05:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    let wolf = player(&m, "Wolf");
    assert_eq!(wolf.number_of_kills, 1);
    assert_eq!(wolf.kills_as_solo_imp, 1);
    assert!(wolf.won_as_solo_imp);
}

#[test]
fn late_impostor_ejection_is_not_a_solo_game() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        death("Aiden", "Ghost", "4/2/2024 21:02:00"),
        death("Sleepy", "Ghost", "4/2/2024 21:02:20"),
        death("Chief", "Wolf", "4/2/2024 21:02:40"),
        death("Nova", "Wolf", "4/2/2024 21:03:00"),
        // Six players alive, so this ejection is not early.
        exiled("Ghost", "4/2/2024 21:04:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert!(!m.solo_imp_game);
    assert!(!player(&m, "Ghost").ejected_early_as_imp);
    assert!(!player(&m, "Wolf").solo_imp);
}

#[test]
fn crewmate_ejection_credits_voters_and_impostors() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        vote("Aiden", "Nova"),
        vote("Sleepy", "Nova"),
        vote("Chief", "Ghost"),
        exiled("Nova", "4/2/2024 21:03:30"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    assert_eq!(player(&m, "Aiden").got_crew_voted.len(), 1);
    assert_eq!(player(&m, "Aiden").got_crew_voted[0].players_alive, 10);
    assert_eq!(player(&m, "Sleepy").got_crew_voted.len(), 1);
    // Impostors get the credit regardless of their vote.
    assert_eq!(player(&m, "Ghost").got_crew_voted.len(), 1);
    assert_eq!(player(&m, "Wolf").got_crew_voted.len(), 1);
    // A crewmate who voted elsewhere gets nothing.
    assert!(player(&m, "Chief").got_crew_voted.is_empty());
    // Ten players alive is never a crit round.
    assert!(m.players.iter().all(|p| !p.voted_wrong_on_crit));
    assert!(m.players.iter().all(|p| !p.right_vote_on_crit_but_loss));
}

// Four players alive with one impostor: a recorded skip is exempt, but a
// missing vote and a missed vote are both wrong on crit.
#[test]
fn crit_rule_at_four_players() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        // Down to five alive: Ghost ejected early, then four kills.
        exiled("Ghost", "4/2/2024 21:02:00"),
        death("Aiden", "Wolf", "4/2/2024 21:03:00"),
        death("Sleepy", "Wolf", "4/2/2024 21:03:20"),
        death("Chief", "Wolf", "4/2/2024 21:03:40"),
        death("Nova", "Wolf", "4/2/2024 21:04:00"),
        // Five alive now (Pickle, Moon, Dragon, Echo, Wolf). One more death
        // leaves four for the decisive meeting.
        death("Pickle", "Wolf", "4/2/2024 21:04:20"),
        vote("Moon", "none"),
        vote("Dragon", "Echo"),
        exiled("Echo", "4/2/2024 21:05:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert_eq!(m.alive_players, 3);

    // Moon skipped on record: exempt at four players.
    assert!(!player(&m, "Moon").voted_wrong_on_crit);
    // Dragon actively voted out a crewmate.
    assert!(player(&m, "Dragon").voted_wrong_on_crit);
}

#[test]
fn crit_rule_at_four_players_flags_silent_voters() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        exiled("Ghost", "4/2/2024 21:02:00"),
        death("Aiden", "Wolf", "4/2/2024 21:03:00"),
        death("Sleepy", "Wolf", "4/2/2024 21:03:20"),
        death("Chief", "Wolf", "4/2/2024 21:03:40"),
        death("Nova", "Wolf", "4/2/2024 21:04:00"),
        death("Pickle", "Wolf", "4/2/2024 21:04:20"),
        // Moon's vote never records a target at all.
        GameEvent::PlayerVote {
            player: "Moon".to_string(),
            target: None,
            time: None,
        },
        vote("Dragon", "Wolf"),
        exiled("Echo", "4/2/2024 21:05:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    // No recorded target: flagged even at four players.
    assert!(player(&m, "Moon").voted_wrong_on_crit);
    // Dragon had the impostor but lost the vote.
    assert!(player(&m, "Dragon").right_vote_on_crit_but_loss);
    assert!(!player(&m, "Dragon").voted_wrong_on_crit);
}

#[test]
fn tie_meeting_at_crit_classifies_survivors() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        // Four deaths leave six alive with both impostors up.
        death("Aiden", "Ghost", "4/2/2024 21:02:00"),
        death("Sleepy", "Ghost", "4/2/2024 21:02:20"),
        death("Chief", "Wolf", "4/2/2024 21:02:40"),
        death("Nova", "Wolf", "4/2/2024 21:03:00"),
        vote("Pickle", "Ghost"),
        vote("Moon", "Dragon"),
        vote("Dragon", "none"),
        meeting_end(MeetingVerdict::Tie),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    assert!(player(&m, "Pickle").right_vote_on_crit_but_loss);
    assert!(player(&m, "Moon").voted_wrong_on_crit);
    assert!(player(&m, "Dragon").voted_wrong_on_crit);
    assert!(player(&m, "Echo").voted_wrong_on_crit);
    // Round advanced past the tie.
    assert_eq!(m.rounds, 2);
}

#[test]
fn tie_meeting_above_crit_thresholds_flags_nothing() {
    let record = full_lobby(MatchResult::ImpostorWin);
    let events = vec![
        vote("Pickle", "none"),
        meeting_end(MeetingVerdict::Skipped),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert!(m.players.iter().all(|p| !p.voted_wrong_on_crit));
    assert_eq!(m.rounds, 2);
}

#[test]
fn cancel_and_manual_end_stop_the_replay() {
    let record = full_lobby(MatchResult::Canceled);
    let events = vec![
        death("Nova", "Ghost", "4/2/2024 21:02:00"),
        GameEvent::GameCancel,
        death("Moon", "Wolf", "4/2/2024 21:03:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert!(player(&m, "Moon").alive);
    assert_eq!(m.alive_players, 9);

    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![
        GameEvent::ManualGameEnd,
        death("Moon", "Wolf", "4/2/2024 21:03:00"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert_eq!(m.alive_players, 10);
}

#[test]
fn disconnects_are_surfaced_not_counted() {
    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![GameEvent::Disconnect {
        name: "Chief".to_string(),
    }];
    let m = replay(&record, &events, indel_ratio, 32.0);
    assert_eq!(m.disconnects, vec!["Chief".to_string()]);
    assert!(player(&m, "Chief").alive);
}

#[test]
fn finalization_backfills_survival_and_accuracy() {
    let record = full_lobby(MatchResult::CrewWin);
    let events = vec![
        death("Nova", "Ghost", "4/2/2024 21:02:10"),
        GameEvent::MeetingStart {
            player: Some("Chief".to_string()),
        },
        vote("Aiden", "Ghost"),
        vote("Sleepy", "Chief"),
        exiled("Ghost", "4/2/2024 21:03:30"),
        GameEvent::PlayerVote {
            player: "Aiden".to_string(),
            target: Some("Wolf".to_string()),
            time: Some("4/2/2024 21:05:00".to_string()),
        },
        exiled("Wolf", "4/2/2024 21:05:30"),
    ];
    let m = replay(&record, &events, indel_ratio, 32.0);

    // Survivors are stamped with the final round count.
    assert_eq!(player(&m, "Aiden").rounds_survived, m.rounds);
    assert_eq!(player(&m, "Aiden").voting_accuracy, 1.0);
    assert_eq!(player(&m, "Sleepy").voting_accuracy, 0.0);

    // Match end tracks the latest event time, and alive time follows death.
    assert_eq!(m.duration_secs, 5 * 60);
    assert_eq!(player(&m, "Nova").alive_secs, 2 * 60 + 10);
    assert_eq!(player(&m, "Aiden").alive_secs, m.duration_secs);
    assert_eq!(player(&m, "Aiden").match_secs, m.duration_secs);
}

#[test]
fn fixture_match_replays_to_a_clean_crew_win() {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let raw = fs::read_to_string(dir.join("2214_events.json")).expect("fixture readable");
    let events = parse_events(&raw).expect("fixture parses");
    let record = ranked_ledger::match_log::load_match_record(&dir.join("2214_match.json"))
        .expect("match fixture loads");
    assert_eq!(record.match_id, 2214);
    assert_eq!(record.result, MatchResult::CrewWin);

    let m = replay(&record, &events, indel_ratio, 32.0);
    assert_eq!(m.result, MatchResult::CrewWin);
    assert_eq!(m.alive_impostors, 0);
    assert_eq!(m.alive_players, 6);
    assert_eq!(m.rounds, 2);
    assert!(m.warnings.is_empty());

    for name in ["Ghost", "Wolf"] {
        let imp = player(&m, name);
        assert_eq!(imp.team, Team::Impostor);
        assert!(!imp.alive);
        assert!(imp.ejected_in_meeting);
        assert_eq!(imp.number_of_kills, 1);
    }
    for p in m.players.iter().filter(|p| p.team == Team::Crewmate) {
        assert!(p.won);
    }
}
