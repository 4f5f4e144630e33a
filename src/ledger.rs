use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::match_log::MatchResult;
use crate::rating::round_to;
use crate::replay::{EjectCredit, Match, Team};

/// Append-only record of everything a processed match did to a player:
/// the pre-match MMR snapshot, the replayed statistics, and the exact
/// deltas applied. Reversal and season aggregates both read only this.
#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub match_id: i64,
    pub player_name: String,
    pub match_result: String,
    pub mmr: f64,
    pub crewmate_mmr: f64,
    pub impostor_mmr: f64,
    pub player_team: Team,
    pub mmr_gain: f64,
    pub crewmate_mmr_gain: f64,
    pub impostor_mmr_gain: f64,
    pub percentage_of_winning: f64,
    pub won: bool,
    pub alive: bool,
    pub alive_secs: i64,
    pub match_secs: i64,
    pub match_start_time: String,
    pub rounds_survived: i64,
    pub total_rounds: i64,
    pub ejected_in_meeting: bool,
    pub placed_votes: i64,
    pub correct_votes: i64,
    pub incorrect_votes: i64,
    pub skip_votes: i64,
    pub voting_accuracy: f64,
    pub died_first_round: bool,
    pub finished_tasks_alive: bool,
    pub finished_tasks_dead: bool,
    pub tasks_complete: i64,
    pub correct_vote_on_eject: Vec<EjectCredit>,
    pub voted_wrong_on_crit: bool,
    pub voted_right_on_crit_but_lost: bool,
    pub number_of_kills: i64,
    pub ejected_early_as_imp: bool,
    pub got_crew_voted: Vec<EjectCredit>,
    pub solo_imp: bool,
    pub kills_as_solo_imp: i64,
    pub won_as_solo_imp: bool,
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS match_events (
            match_id INTEGER NOT NULL,
            player_name TEXT NOT NULL,
            match_result TEXT NOT NULL,
            mmr REAL NOT NULL,
            crewmate_mmr REAL NOT NULL,
            impostor_mmr REAL NOT NULL,
            player_team TEXT NOT NULL,
            mmr_gain REAL NOT NULL,
            crewmate_mmr_gain REAL NOT NULL,
            impostor_mmr_gain REAL NOT NULL,
            percentage_of_winning REAL NOT NULL,
            won INTEGER NOT NULL,
            alive INTEGER NOT NULL,
            alive_secs INTEGER NOT NULL,
            match_secs INTEGER NOT NULL,
            match_start_time TEXT NOT NULL,
            rounds_survived INTEGER NOT NULL,
            total_rounds INTEGER NOT NULL,
            ejected_in_meeting INTEGER NOT NULL,
            placed_votes INTEGER NOT NULL,
            correct_votes INTEGER NOT NULL,
            incorrect_votes INTEGER NOT NULL,
            skip_votes INTEGER NOT NULL,
            voting_accuracy REAL NOT NULL,
            died_first_round INTEGER NOT NULL,
            finished_tasks_alive INTEGER NOT NULL,
            finished_tasks_dead INTEGER NOT NULL,
            tasks_complete INTEGER NOT NULL,
            correct_vote_on_eject TEXT NOT NULL,
            voted_wrong_on_crit INTEGER NOT NULL,
            voted_right_on_crit_but_lost INTEGER NOT NULL,
            number_of_kills INTEGER NOT NULL,
            ejected_early_as_imp INTEGER NOT NULL,
            got_crew_voted TEXT NOT NULL,
            solo_imp INTEGER NOT NULL,
            kills_as_solo_imp INTEGER NOT NULL,
            won_as_solo_imp INTEGER NOT NULL,
            PRIMARY KEY (match_id, player_name)
        );
        CREATE INDEX IF NOT EXISTS idx_match_events_player ON match_events(player_name);
        "#,
    )
    .context("create ledger schema")?;
    Ok(())
}

/// Write one ledger row per player of a replayed, rated match. Runs inside
/// the caller's transaction; the primary key rejects double-processing at
/// the storage layer as a last line of defense.
pub fn append_match(conn: &Connection, m: &Match) -> Result<()> {
    let start_time = m.start_time.format("%Y-%m-%d %H:%M:%S").to_string();
    for player in &m.players {
        conn.execute(
            r#"
            INSERT INTO match_events (
                match_id, player_name, match_result,
                mmr, crewmate_mmr, impostor_mmr, player_team,
                mmr_gain, crewmate_mmr_gain, impostor_mmr_gain,
                percentage_of_winning, won, alive,
                alive_secs, match_secs, match_start_time,
                rounds_survived, total_rounds, ejected_in_meeting,
                placed_votes, correct_votes, incorrect_votes, skip_votes,
                voting_accuracy, died_first_round,
                finished_tasks_alive, finished_tasks_dead, tasks_complete,
                correct_vote_on_eject, voted_wrong_on_crit,
                voted_right_on_crit_but_lost, number_of_kills,
                ejected_early_as_imp, got_crew_voted,
                solo_imp, kills_as_solo_imp, won_as_solo_imp
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                ?31, ?32, ?33, ?34, ?35, ?36, ?37
            )
            "#,
            params![
                m.id,
                player.name,
                m.result.canonical(),
                player.current_mmr,
                player.crewmate_current_mmr,
                player.impostor_current_mmr,
                player.team.as_str(),
                player.mmr_gain,
                player.crewmate_mmr_gain,
                player.impostor_mmr_gain,
                player.percentage_of_winning,
                player.won,
                player.alive,
                player.alive_secs,
                player.match_secs,
                start_time,
                player.rounds_survived,
                player.total_rounds,
                player.ejected_in_meeting,
                player.placed_votes,
                player.correct_votes,
                player.incorrect_votes,
                player.skip_votes,
                player.voting_accuracy,
                player.died_first_round,
                player.finished_tasks_alive,
                player.finished_tasks_dead,
                player.tasks_complete,
                serde_json::to_string(&player.correct_vote_on_eject)?,
                player.voted_wrong_on_crit,
                player.right_vote_on_crit_but_loss,
                player.number_of_kills,
                player.ejected_early_as_imp,
                serde_json::to_string(&player.got_crew_voted)?,
                player.solo_imp,
                player.kills_as_solo_imp,
                player.won_as_solo_imp,
            ],
        )
        .with_context(|| format!("insert ledger row for match {} player {}", m.id, player.name))?;
    }
    Ok(())
}

pub fn remove_match(conn: &Connection, match_id: i64) -> Result<usize> {
    conn.execute("DELETE FROM match_events WHERE match_id = ?1", params![match_id])
        .with_context(|| format!("delete ledger rows for match {match_id}"))
}

pub fn rows_for_match(conn: &Connection, match_id: i64) -> Result<Vec<LedgerRow>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {LEDGER_COLUMNS} FROM match_events WHERE match_id = ?1 ORDER BY player_name"
        ))
        .context("prepare ledger rows query")?;
    let rows = stmt
        .query_map(params![match_id], row_from_sql)
        .context("query ledger rows")?;
    collect_rows(rows)
}

/// A match counts as processed exactly when it has at least one ledger row.
pub fn processed_match_ids(conn: &Connection) -> Result<HashSet<i64>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT match_id FROM match_events")
        .context("prepare processed ids query")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))
        .context("query processed ids")?;
    let mut out = HashSet::new();
    for id in ids {
        out.insert(id.context("decode match id")?);
    }
    Ok(out)
}

/// Per-match gain series for one player across valid matches, oldest first.
/// Feeds the presentation layer's rating-history views.
pub fn mmr_history(conn: &Connection, player_name: &str) -> Result<Vec<(f64, f64, f64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT mmr_gain, crewmate_mmr_gain, impostor_mmr_gain
             FROM match_events
             WHERE player_name = ?1
               AND lower(match_result) NOT IN ('canceled', 'unknown')
             ORDER BY match_id",
        )
        .context("prepare mmr history query")?;
    let rows = stmt
        .query_map(params![player_name], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .context("query mmr history")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode mmr history row")?);
    }
    Ok(out)
}

/// Season-aggregate columns for one player, recomputed from scratch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeasonStats {
    pub total_games_played: i64,
    pub impostor_games_played: i64,
    pub crewmate_games_played: i64,
    pub impostor_games_won: i64,
    pub crewmate_games_won: i64,
    pub games_won: i64,
    pub games_died_first: i64,
    pub voted_wrong_on_crit: i64,
    pub voted_right_on_crit_but_lost: i64,
    pub crewmate_win_streak: i64,
    pub best_crewmate_win_streak: i64,
    pub impostor_win_streak: i64,
    pub best_impostor_win_streak: i64,
    pub survivability_crewmate: f64,
    pub survivability_impostor: f64,
    pub voting_accuracy: f64,
}

// Running totals that need a second pass to turn into ratios.
#[derive(Debug, Default)]
struct StatsAccumulator {
    stats: SeasonStats,
    crew_alive_secs: i64,
    crew_match_secs: i64,
    imp_alive_secs: i64,
    imp_match_secs: i64,
    correct_votes: i64,
    placed_votes: i64,
    skip_votes: i64,
}

/// Recompute every player's season aggregates from the ledger, walking valid
/// matches in match-ID order so streak runs come out right.
pub fn season_stats(conn: &Connection) -> Result<HashMap<String, SeasonStats>> {
    let mut stmt = conn
        .prepare(
            "SELECT player_name, player_team, won, died_first_round,
                    voted_wrong_on_crit, voted_right_on_crit_but_lost,
                    alive_secs, match_secs,
                    correct_votes, placed_votes, skip_votes
             FROM match_events
             WHERE lower(match_result) NOT IN ('canceled', 'unknown')
             ORDER BY player_name, match_id",
        )
        .context("prepare season stats query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, i64>(10)?,
            ))
        })
        .context("query season stats")?;

    let mut accumulators: HashMap<String, StatsAccumulator> = HashMap::new();
    for row in rows {
        let (
            player_name,
            team,
            won,
            died_first,
            voted_wrong_on_crit,
            voted_right_on_crit_but_lost,
            alive_secs,
            match_secs,
            correct_votes,
            placed_votes,
            skip_votes,
        ) = row.context("decode season stats row")?;

        let acc = accumulators.entry(player_name).or_default();
        let stats = &mut acc.stats;
        stats.total_games_played += 1;
        if won {
            stats.games_won += 1;
        }
        if died_first {
            stats.games_died_first += 1;
        }
        if voted_wrong_on_crit {
            stats.voted_wrong_on_crit += 1;
        }
        if voted_right_on_crit_but_lost {
            stats.voted_right_on_crit_but_lost += 1;
        }

        if team == "impostor" {
            stats.impostor_games_played += 1;
            if won {
                stats.impostor_games_won += 1;
                stats.impostor_win_streak += 1;
            } else {
                stats.impostor_win_streak = 0;
            }
            stats.best_impostor_win_streak =
                stats.best_impostor_win_streak.max(stats.impostor_win_streak);
            acc.imp_alive_secs += alive_secs;
            acc.imp_match_secs += match_secs;
        } else {
            stats.crewmate_games_played += 1;
            if won {
                stats.crewmate_games_won += 1;
                stats.crewmate_win_streak += 1;
            } else {
                stats.crewmate_win_streak = 0;
            }
            stats.best_crewmate_win_streak =
                stats.best_crewmate_win_streak.max(stats.crewmate_win_streak);
            acc.crew_alive_secs += alive_secs;
            acc.crew_match_secs += match_secs;
            if !died_first {
                acc.correct_votes += correct_votes;
                acc.placed_votes += placed_votes;
                acc.skip_votes += skip_votes;
            }
        }
    }

    let mut out = HashMap::with_capacity(accumulators.len());
    for (name, acc) in accumulators {
        let mut stats = acc.stats;
        stats.survivability_crewmate = survivability(acc.crew_alive_secs, acc.crew_match_secs);
        stats.survivability_impostor = survivability(acc.imp_alive_secs, acc.imp_match_secs);
        let effective_votes = acc.placed_votes - acc.skip_votes;
        stats.voting_accuracy = if effective_votes > 0 {
            round_to(acc.correct_votes as f64 / effective_votes as f64, 3)
        } else {
            0.0
        };
        out.insert(name, stats);
    }
    Ok(out)
}

/// Rename a player across the ledger; the leaderboard rename drives this.
pub fn rename_player(conn: &Connection, old_name: &str, new_name: &str) -> Result<usize> {
    conn.execute(
        "UPDATE match_events SET player_name = ?2 WHERE player_name = ?1",
        params![old_name, new_name],
    )
    .context("rename player in ledger")
}

fn survivability(alive_secs: i64, match_secs: i64) -> f64 {
    if match_secs == 0 {
        0.0
    } else {
        round_to(alive_secs as f64 / match_secs as f64, 3)
    }
}

const LEDGER_COLUMNS: &str = "match_id, player_name, match_result, \
     mmr, crewmate_mmr, impostor_mmr, player_team, \
     mmr_gain, crewmate_mmr_gain, impostor_mmr_gain, \
     percentage_of_winning, won, alive, alive_secs, match_secs, match_start_time, \
     rounds_survived, total_rounds, ejected_in_meeting, \
     placed_votes, correct_votes, incorrect_votes, skip_votes, voting_accuracy, \
     died_first_round, finished_tasks_alive, finished_tasks_dead, tasks_complete, \
     correct_vote_on_eject, voted_wrong_on_crit, voted_right_on_crit_but_lost, \
     number_of_kills, ejected_early_as_imp, got_crew_voted, \
     solo_imp, kills_as_solo_imp, won_as_solo_imp";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerRow> {
    let team: String = row.get(6)?;
    let correct_vote_on_eject: String = row.get(28)?;
    let got_crew_voted: String = row.get(33)?;
    Ok(LedgerRow {
        match_id: row.get(0)?,
        player_name: row.get(1)?,
        match_result: row.get(2)?,
        mmr: row.get(3)?,
        crewmate_mmr: row.get(4)?,
        impostor_mmr: row.get(5)?,
        player_team: if team == "impostor" {
            Team::Impostor
        } else {
            Team::Crewmate
        },
        mmr_gain: row.get(7)?,
        crewmate_mmr_gain: row.get(8)?,
        impostor_mmr_gain: row.get(9)?,
        percentage_of_winning: row.get(10)?,
        won: row.get(11)?,
        alive: row.get(12)?,
        alive_secs: row.get(13)?,
        match_secs: row.get(14)?,
        match_start_time: row.get(15)?,
        rounds_survived: row.get(16)?,
        total_rounds: row.get(17)?,
        ejected_in_meeting: row.get(18)?,
        placed_votes: row.get(19)?,
        correct_votes: row.get(20)?,
        incorrect_votes: row.get(21)?,
        skip_votes: row.get(22)?,
        voting_accuracy: row.get(23)?,
        died_first_round: row.get(24)?,
        finished_tasks_alive: row.get(25)?,
        finished_tasks_dead: row.get(26)?,
        tasks_complete: row.get(27)?,
        correct_vote_on_eject: serde_json::from_str(&correct_vote_on_eject).unwrap_or_default(),
        voted_wrong_on_crit: row.get(29)?,
        voted_right_on_crit_but_lost: row.get(30)?,
        number_of_kills: row.get(31)?,
        ejected_early_as_imp: row.get(32)?,
        got_crew_voted: serde_json::from_str(&got_crew_voted).unwrap_or_default(),
        solo_imp: row.get(34)?,
        kills_as_solo_imp: row.get(35)?,
        won_as_solo_imp: row.get(36)?,
    })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<LedgerRow>>,
) -> Result<Vec<LedgerRow>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode ledger row")?);
    }
    Ok(out)
}

/// The result string stored on a ledger row, parsed back to the enum.
pub fn row_result(row: &LedgerRow) -> MatchResult {
    MatchResult::parse(&row.match_result)
}
