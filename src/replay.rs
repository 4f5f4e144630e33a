use chrono::NaiveDateTime;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::events::{GameEvent, MeetingVerdict};
use crate::fuzzy::NameScorer;
use crate::match_log::{MatchRecord, MatchResult, parse_time};

/// Roster lookups tolerate misspellings down to this similarity.
pub const ROSTER_MATCH_THRESHOLD: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Team {
    Crewmate,
    Impostor,
}

impl Team {
    pub fn as_str(self) -> &'static str {
        match self {
            Team::Crewmate => "crewmate",
            Team::Impostor => "impostor",
        }
    }
}

/// One credit for participating in an ejection, weighted by how many players
/// were still alive when it happened. Accumulates per player; never
/// overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EjectCredit {
    pub players_alive: i64,
    pub weight: i64,
}

/// The most recent vote a player placed, for crit-round evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum LastVote {
    Skip,
    Target(String),
}

/// One player's fully replayed record within one match.
#[derive(Debug, Clone)]
pub struct PlayerInMatch {
    pub name: String,
    pub team: Team,
    pub match_id: i64,
    pub match_result: MatchResult,
    pub linked_account: i64,
    pub current_mmr: f64,
    pub crewmate_current_mmr: f64,
    pub impostor_current_mmr: f64,
    pub mmr_gain: f64,
    pub crewmate_mmr_gain: f64,
    pub impostor_mmr_gain: f64,
    pub percentage_of_winning: f64,
    pub won: bool,
    pub p: f64,
    pub performance: f64,
    pub alive: bool,
    pub time_of_death: Option<NaiveDateTime>,
    pub alive_secs: i64,
    pub match_secs: i64,
    pub rounds_survived: i64,
    pub total_rounds: i64,
    pub ejected_in_meeting: bool,
    pub placed_votes: i64,
    pub correct_votes: i64,
    pub incorrect_votes: i64,
    pub skip_votes: i64,
    pub last_voted: Option<LastVote>,
    pub voting_accuracy: f64,
    pub got_crew_voted: Vec<EjectCredit>,
    pub died_first_round: bool,
    pub finished_tasks_alive: bool,
    pub finished_tasks_dead: bool,
    pub tasks_complete: i64,
    pub voted_wrong_on_crit: bool,
    pub correct_vote_on_eject: Vec<EjectCredit>,
    pub right_vote_on_crit_but_loss: bool,
    pub number_of_kills: i64,
    pub ejected_early_as_imp: bool,
    pub solo_imp: bool,
    pub kills_as_solo_imp: i64,
    pub won_as_solo_imp: bool,
}

impl PlayerInMatch {
    fn new(name: String, team: Team) -> Self {
        Self {
            name,
            team,
            match_id: 0,
            match_result: MatchResult::Unknown,
            linked_account: 0,
            current_mmr: 0.0,
            crewmate_current_mmr: 0.0,
            impostor_current_mmr: 0.0,
            mmr_gain: 0.0,
            crewmate_mmr_gain: 0.0,
            impostor_mmr_gain: 0.0,
            percentage_of_winning: 0.0,
            won: false,
            p: 1.0,
            performance: 1.0,
            alive: true,
            time_of_death: None,
            alive_secs: 0,
            match_secs: 0,
            rounds_survived: 0,
            total_rounds: 0,
            ejected_in_meeting: false,
            placed_votes: 0,
            correct_votes: 0,
            incorrect_votes: 0,
            skip_votes: 0,
            last_voted: None,
            voting_accuracy: 0.0,
            got_crew_voted: Vec::new(),
            died_first_round: false,
            finished_tasks_alive: false,
            finished_tasks_dead: false,
            tasks_complete: 0,
            voted_wrong_on_crit: false,
            correct_vote_on_eject: Vec::new(),
            right_vote_on_crit_but_loss: false,
            number_of_kills: 0,
            ejected_early_as_imp: false,
            solo_imp: false,
            kills_as_solo_imp: 0,
            won_as_solo_imp: false,
        }
    }

    fn correct_vote(&mut self) {
        if self.team == Team::Crewmate {
            self.correct_votes += 1;
            self.placed_votes += 1;
        }
    }

    fn incorrect_vote(&mut self) {
        if self.team == Team::Crewmate {
            self.incorrect_votes += 1;
            self.placed_votes += 1;
        }
    }

    fn skipped_vote(&mut self) {
        if self.team == Team::Crewmate {
            self.skip_votes += 1;
            self.placed_votes += 1;
        }
    }

    fn finished_task(&mut self) {
        if self.team == Team::Crewmate {
            self.tasks_complete += 1;
        }
    }

    fn got_a_kill(&mut self) {
        if self.team == Team::Impostor {
            self.number_of_kills += 1;
        }
    }
}

/// One fully replayed match.
#[derive(Debug, Clone)]
pub struct Match {
    pub id: i64,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_secs: i64,
    pub result: MatchResult,
    pub players: Vec<PlayerInMatch>,
    pub crewmates_count: i64,
    pub impostors_count: i64,
    pub avg_crewmate_mmr: f64,
    pub avg_impostor_mmr: f64,
    pub crew_win_probability: f64,
    pub imp_win_probability: f64,
    pub rounds: i64,
    pub solo_imp_game: bool,
    pub alive_players: i64,
    pub alive_impostors: i64,
    pub k: f64,
    pub event_file: String,
    pub disconnects: Vec<String>,
    pub warnings: Vec<String>,
}

impl Match {
    pub fn find_player(&self, name: &str, scorer: NameScorer) -> Option<usize> {
        if let Some(idx) = self.players.iter().position(|p| p.name == name) {
            return Some(idx);
        }
        self.players
            .iter()
            .position(|p| scorer(&p.name, name) >= ROSTER_MATCH_THRESHOLD)
    }

    pub fn player_by_name(&self, name: &str, scorer: NameScorer) -> Option<&PlayerInMatch> {
        self.find_player(name, scorer).map(|idx| &self.players[idx])
    }

    pub fn is_impostor_name(&self, name: &str, scorer: NameScorer) -> bool {
        if name.eq_ignore_ascii_case("none") {
            return false;
        }
        self.player_by_name(name, scorer)
            .is_some_and(|p| p.team == Team::Impostor)
    }

    fn last_voted_impostor(&self, vote: Option<&LastVote>, scorer: NameScorer) -> bool {
        match vote {
            Some(LastVote::Target(name)) => self.is_impostor_name(name, scorer),
            _ => false,
        }
    }
}

/// Replay a match's ordered event sequence into per-player statistics.
///
/// Pure function of its inputs: corrections depend on re-running this over
/// the same events producing the same populated match.
pub fn replay(record: &MatchRecord, events: &[GameEvent], scorer: NameScorer, k: f64) -> Match {
    let mut m = build_roster(record, k);

    let mut players_alive = record.players.len() as i64;
    let mut imps_alive = record.impostors.len() as i64;
    let mut death_happened = false;
    let mut meeting_called_after_death = false;

    for event in events {
        match event {
            GameEvent::Task { name } => {
                let Some(idx) = resolve(&mut m, name, "Task", scorer) else {
                    continue;
                };
                let player = &mut m.players[idx];
                player.finished_task();
                if player.tasks_complete == 10 {
                    if player.alive {
                        player.finished_tasks_alive = true;
                    } else {
                        player.finished_tasks_dead = true;
                    }
                }
            }

            GameEvent::Death { name, killer, time } => {
                let Some(idx) = resolve(&mut m, name, "Death", scorer) else {
                    continue;
                };
                if !m.players[idx].alive {
                    continue;
                }
                players_alive -= 1;
                death_happened = true;
                let time_of_death = time.as_deref().map(|t| parse_time(Some(t)));
                let rounds = m.rounds;
                {
                    let player = &mut m.players[idx];
                    player.alive = false;
                    player.time_of_death = time_of_death;
                    player.rounds_survived = rounds;
                    player.died_first_round = !meeting_called_after_death;
                }
                if let Some(killer_name) = killer
                    && let Some(killer_idx) = m.find_player(killer_name, scorer)
                {
                    let killer = &mut m.players[killer_idx];
                    killer.got_a_kill();
                    if killer.solo_imp {
                        killer.kills_as_solo_imp += 1;
                    }
                }
                if let Some(t) = time_of_death
                    && t > m.end_time
                {
                    m.end_time = t;
                }
            }

            GameEvent::BodyReport { .. } | GameEvent::MeetingStart { .. } => {
                if death_happened {
                    meeting_called_after_death = true;
                }
            }

            GameEvent::PlayerVote {
                player,
                target,
                time,
            } => {
                if death_happened {
                    meeting_called_after_death = true;
                }
                let Some(idx) = resolve(&mut m, player, "PlayerVote", scorer) else {
                    continue;
                };
                // An explicit "none" target and an absent target both count
                // as skip votes, but only the explicit one leaves a skip on
                // record for crit evaluation.
                match target.as_deref() {
                    None => {
                        m.players[idx].skipped_vote();
                        m.players[idx].last_voted = None;
                    }
                    Some(target_name) if target_name.eq_ignore_ascii_case("none") => {
                        m.players[idx].skipped_vote();
                        m.players[idx].last_voted = Some(LastVote::Skip);
                    }
                    Some(target_name) => {
                        if m.is_impostor_name(target_name, scorer) {
                            m.players[idx].correct_vote();
                        } else {
                            m.players[idx].incorrect_vote();
                        }
                        m.players[idx].last_voted =
                            Some(LastVote::Target(target_name.to_string()));
                    }
                }
                if let Some(t) = time.as_deref() {
                    let parsed = parse_time(Some(t));
                    if parsed > m.end_time {
                        m.end_time = parsed;
                    }
                }
            }

            GameEvent::Exiled { player, time } => {
                let Some(idx) = resolve(&mut m, player, "Exiled", scorer) else {
                    continue;
                };
                if !m.players[idx].alive {
                    continue;
                }
                let ejected_name = m.players[idx].name.clone();
                let ejected_is_imp = m.players[idx].team == Team::Impostor;
                let rounds = m.rounds;
                {
                    let ejected = &mut m.players[idx];
                    ejected.alive = false;
                    ejected.time_of_death = time.as_deref().map(|t| parse_time(Some(t)));
                    ejected.rounds_survived = rounds;
                    ejected.ejected_in_meeting = true;
                }

                if ejected_is_imp {
                    imps_alive -= 1;
                    if players_alive >= 7 {
                        m.solo_imp_game = true;
                        for p in &mut m.players {
                            if p.team != Team::Impostor {
                                continue;
                            }
                            if p.name == ejected_name {
                                p.ejected_early_as_imp = true;
                            } else {
                                p.solo_imp = true;
                            }
                        }
                    }
                    for p in &mut m.players {
                        if p.team == Team::Crewmate
                            && p.alive
                            && p.last_voted == Some(LastVote::Target(ejected_name.clone()))
                        {
                            p.correct_vote_on_eject.push(EjectCredit {
                                players_alive,
                                weight: 1,
                            });
                        }
                    }
                } else {
                    // A crewmate went out the airlock. Everyone who pushed
                    // for it gets a got-crew-voted credit, and the round may
                    // be decisive (crit) for the surviving crew.
                    let crit = players_alive == 3
                        || players_alive == 4
                        || ((5..=7).contains(&players_alive) && imps_alive == 2);
                    for p_idx in 0..m.players.len() {
                        if !m.players[p_idx].alive {
                            continue;
                        }
                        let voted_for_ejected = m.players[p_idx].last_voted
                            == Some(LastVote::Target(ejected_name.clone()));
                        if m.players[p_idx].team == Team::Crewmate && voted_for_ejected {
                            m.players[p_idx].got_crew_voted.push(EjectCredit {
                                players_alive,
                                weight: 1,
                            });
                        } else if m.players[p_idx].team == Team::Impostor {
                            m.players[p_idx].got_crew_voted.push(EjectCredit {
                                players_alive,
                                weight: 1,
                            });
                        }

                        if crit && m.players[p_idx].team == Team::Crewmate && !m.players[p_idx].won
                        {
                            let last_voted = m.players[p_idx].last_voted.clone();
                            if m.last_voted_impostor(last_voted.as_ref(), scorer) {
                                m.players[p_idx].right_vote_on_crit_but_loss = true;
                            } else if matches!(players_alive, 3 | 5 | 6) {
                                m.players[p_idx].voted_wrong_on_crit = true;
                            } else if matches!(players_alive, 4 | 7)
                                && !matches!(last_voted, Some(LastVote::Skip))
                            {
                                m.players[p_idx].voted_wrong_on_crit = true;
                            }
                        }
                    }
                }

                players_alive -= 1;
                let game_over = imps_alive == 0
                    || (players_alive == 1 && imps_alive == 1)
                    || (players_alive == 2 && imps_alive == 2);
                if !game_over {
                    m.rounds += 1;
                }
            }

            GameEvent::MeetingEnd { verdict } => {
                if !matches!(verdict, MeetingVerdict::Skipped | MeetingVerdict::Tie) {
                    continue;
                }
                m.rounds += 1;
                // Note the deliberately narrower thresholds than the Exiled
                // branch: {5,6} with two impostors, or three players left.
                let crit =
                    ((5..=6).contains(&players_alive) && imps_alive == 2) || players_alive == 3;
                if !crit {
                    continue;
                }
                for p_idx in 0..m.players.len() {
                    if !m.players[p_idx].alive {
                        continue;
                    }
                    if m.players[p_idx].team != Team::Crewmate || m.players[p_idx].won {
                        continue;
                    }
                    let last_voted = m.players[p_idx].last_voted.clone();
                    if m.last_voted_impostor(last_voted.as_ref(), scorer) {
                        m.players[p_idx].right_vote_on_crit_but_loss = true;
                    } else {
                        m.players[p_idx].voted_wrong_on_crit = true;
                    }
                }
            }

            GameEvent::GameCancel => break,
            GameEvent::ManualGameEnd => break,

            GameEvent::Disconnect { name } => {
                m.disconnects.push(name.clone());
            }
        }
    }

    m.alive_players = players_alive;
    m.alive_impostors = imps_alive;
    finalize(&mut m);
    m
}

fn build_roster(record: &MatchRecord, k: f64) -> Match {
    let start_time = parse_time(Some(&record.game_started));
    let mut players = Vec::with_capacity(record.players.len());
    let mut crewmates_count = 0i64;
    let mut impostors_count = 0i64;
    for name in &record.players {
        let team = if record.impostors.contains(name) {
            impostors_count += 1;
            Team::Impostor
        } else {
            crewmates_count += 1;
            Team::Crewmate
        };
        let mut player = PlayerInMatch::new(name.clone(), team);
        player.match_id = record.match_id;
        player.match_result = record.result;
        player.won = match team {
            Team::Crewmate => record.result == MatchResult::CrewWin,
            Team::Impostor => record.result == MatchResult::ImpostorWin,
        };
        players.push(player);
    }

    Match {
        id: record.match_id,
        start_time,
        end_time: start_time,
        duration_secs: 0,
        result: record.result,
        players,
        crewmates_count,
        impostors_count,
        avg_crewmate_mmr: 0.0,
        avg_impostor_mmr: 0.0,
        crew_win_probability: 0.0,
        imp_win_probability: 0.0,
        rounds: 1,
        solo_imp_game: false,
        alive_players: record.players.len() as i64,
        alive_impostors: record.impostors.len() as i64,
        k,
        event_file: record.events_log_file.clone(),
        disconnects: Vec::new(),
        warnings: Vec::new(),
    }
}

fn finalize(m: &mut Match) {
    m.duration_secs = (m.end_time - m.start_time).num_seconds();
    let start_time = m.start_time;
    let end_time = m.end_time;
    let duration_secs = m.duration_secs;
    let rounds = m.rounds;
    let result = m.result;
    let solo_imp_game_win = result == MatchResult::ImpostorWin;

    for player in &mut m.players {
        player.total_rounds = rounds;
        let effective_votes = player.placed_votes - player.skip_votes;
        player.voting_accuracy = if player.team == Team::Crewmate && effective_votes != 0 {
            player.correct_votes as f64 / effective_votes as f64
        } else {
            0.0
        };
        let time_of_death = player.time_of_death.unwrap_or(end_time);
        player.time_of_death = Some(time_of_death);
        player.alive_secs = (time_of_death - start_time).num_seconds();
        player.match_secs = duration_secs;
        if solo_imp_game_win && player.solo_imp {
            player.won_as_solo_imp = true;
        }
        if player.rounds_survived == 0 {
            player.rounds_survived = rounds;
        }
    }
}

// Resolve a roster name, warn-and-drop on no confident match.
fn resolve(m: &mut Match, name: &str, event_tag: &str, scorer: NameScorer) -> Option<usize> {
    match m.find_player(name, scorer) {
        Some(idx) => Some(idx),
        None => {
            let message = format!(
                "match {}: {event_tag} event references unknown player {name:?}; event dropped",
                m.id
            );
            warn!("{message}");
            m.warnings.push(message);
            None
        }
    }
}
