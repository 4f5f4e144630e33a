use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, params};

use crate::fuzzy::{NameScorer, normalize_name};
use crate::ledger::SeasonStats;
use crate::rating::{RatingConfig, round_to};

/// Fuzzy leaderboard lookups ("looks like") are stricter than roster
/// resolution during replay.
pub const LOOKUP_MATCH_THRESHOLD: f64 = 85.0;

/// One player's current standing. Aggregate columns are never maintained
/// incrementally; they are replaced wholesale by a rebuild from the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    pub rank: i64,
    pub player_name: String,
    pub account_id: i64,
    pub mmr: f64,
    pub crewmate_mmr: f64,
    pub impostor_mmr: f64,
    pub voting_accuracy: f64,
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
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS leaderboard (
            entry_order INTEGER PRIMARY KEY AUTOINCREMENT,
            rank INTEGER NOT NULL DEFAULT 0,
            player_name TEXT NOT NULL UNIQUE,
            account_id INTEGER NOT NULL DEFAULT 0,
            mmr REAL NOT NULL,
            crewmate_mmr REAL NOT NULL,
            impostor_mmr REAL NOT NULL,
            voting_accuracy REAL NOT NULL DEFAULT 0,
            total_games_played INTEGER NOT NULL DEFAULT 0,
            impostor_games_played INTEGER NOT NULL DEFAULT 0,
            crewmate_games_played INTEGER NOT NULL DEFAULT 0,
            impostor_games_won INTEGER NOT NULL DEFAULT 0,
            crewmate_games_won INTEGER NOT NULL DEFAULT 0,
            games_won INTEGER NOT NULL DEFAULT 0,
            games_died_first INTEGER NOT NULL DEFAULT 0,
            voted_wrong_on_crit INTEGER NOT NULL DEFAULT 0,
            voted_right_on_crit_but_lost INTEGER NOT NULL DEFAULT 0,
            crewmate_win_streak INTEGER NOT NULL DEFAULT 0,
            best_crewmate_win_streak INTEGER NOT NULL DEFAULT 0,
            impostor_win_streak INTEGER NOT NULL DEFAULT 0,
            best_impostor_win_streak INTEGER NOT NULL DEFAULT 0,
            survivability_crewmate REAL NOT NULL DEFAULT 0,
            survivability_impostor REAL NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS mmr_adjustments (
            adjustment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_name TEXT NOT NULL,
            value REAL NOT NULL,
            scope TEXT NOT NULL,
            moderator TEXT NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );
        "#,
    )
    .context("create leaderboard schema")?;
    Ok(())
}

/// Case- and whitespace-insensitive lookup by player name.
pub fn get(conn: &Connection, player_name: &str) -> Result<Option<LeaderboardRow>> {
    let wanted = normalize_name(player_name);
    for row in all_rows(conn)? {
        if normalize_name(&row.player_name) == wanted {
            return Ok(Some(row));
        }
    }
    Ok(None)
}

/// Exact lookup first, then the best fuzzy candidate at or above the lookup
/// threshold. Below the threshold nothing matches, by design.
pub fn get_fuzzy(
    conn: &Connection,
    player_name: &str,
    scorer: NameScorer,
) -> Result<Option<LeaderboardRow>> {
    if let Some(row) = get(conn, player_name)? {
        return Ok(Some(row));
    }
    let wanted = normalize_name(player_name);
    let mut best: Option<(f64, LeaderboardRow)> = None;
    for row in all_rows(conn)? {
        let score = scorer(&normalize_name(&row.player_name), &wanted);
        if score >= LOOKUP_MATCH_THRESHOLD
            && best.as_ref().is_none_or(|(best_score, _)| score > *best_score)
        {
            best = Some((score, row));
        }
    }
    Ok(best.map(|(_, row)| row))
}

pub fn get_by_account(conn: &Connection, account_id: i64) -> Result<Option<LeaderboardRow>> {
    if account_id == 0 {
        return Ok(None);
    }
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ROW_COLUMNS} FROM leaderboard WHERE account_id = ?1"
        ))
        .context("prepare account lookup")?;
    stmt.query_row(params![account_id], row_from_sql)
        .optional()
        .context("query account lookup")
}

/// Insert a new player at the configured starting ratings and re-rank.
pub fn new_player(conn: &Connection, player_name: &str, cfg: &RatingConfig) -> Result<()> {
    conn.execute(
        "INSERT INTO leaderboard (rank, player_name, mmr, crewmate_mmr, impostor_mmr)
         VALUES ((SELECT COUNT(*) FROM leaderboard), ?1, ?2, ?3, ?4)",
        params![
            player_name.trim(),
            cfg.starting_mmr,
            cfg.starting_crewmate_mmr,
            cfg.starting_impostor_mmr,
        ],
    )
    .with_context(|| format!("insert new player {player_name}"))?;
    rank(conn)
}

/// A default-rating stand-in for players of unrated matches who are not on
/// the leaderboard yet; nothing is persisted for them.
pub fn placeholder_row(player_name: &str, cfg: &RatingConfig) -> LeaderboardRow {
    LeaderboardRow {
        rank: 0,
        player_name: player_name.trim().to_string(),
        account_id: 0,
        mmr: cfg.starting_mmr,
        crewmate_mmr: cfg.starting_crewmate_mmr,
        impostor_mmr: cfg.starting_impostor_mmr,
        voting_accuracy: 0.0,
        total_games_played: 0,
        impostor_games_played: 0,
        crewmate_games_played: 0,
        impostor_games_won: 0,
        crewmate_games_won: 0,
        games_won: 0,
        games_died_first: 0,
        voted_wrong_on_crit: 0,
        voted_right_on_crit_but_lost: 0,
        crewmate_win_streak: 0,
        best_crewmate_win_streak: 0,
        impostor_win_streak: 0,
        best_impostor_win_streak: 0,
        survivability_crewmate: 0.0,
        survivability_impostor: 0.0,
    }
}

/// Apply per-role MMR deltas to a player's row and re-rank. Passing negated
/// deltas reverses a previously applied match exactly.
pub fn apply_match_delta(
    conn: &Connection,
    player_name: &str,
    crew_delta: f64,
    imp_delta: f64,
) -> Result<()> {
    let Some(row) = get(conn, player_name)? else {
        warn!("player {player_name} not on the leaderboard; delta dropped");
        return Ok(());
    };
    let crewmate_mmr = round_to(row.crewmate_mmr + crew_delta, 3);
    let impostor_mmr = round_to(row.impostor_mmr + imp_delta, 3);
    let mmr = round_to((crewmate_mmr + impostor_mmr) / 2.0, 3);
    conn.execute(
        "UPDATE leaderboard SET mmr = ?1, crewmate_mmr = ?2, impostor_mmr = ?3
         WHERE player_name = ?4",
        params![mmr, crewmate_mmr, impostor_mmr, row.player_name],
    )
    .with_context(|| format!("update mmr for {player_name}"))?;
    rank(conn)
}

/// Recompute ranks: stable sort by combined MMR descending, ties keeping
/// their previous relative order, ranks written back 0-indexed.
pub fn rank(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT entry_order, mmr FROM leaderboard ORDER BY rank ASC, entry_order ASC")
        .context("prepare rank query")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)))
        .context("query rank rows")?;
    let mut ordered = Vec::new();
    for row in rows {
        ordered.push(row.context("decode rank row")?);
    }
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    for (position, (entry_order, _)) in ordered.iter().enumerate() {
        conn.execute(
            "UPDATE leaderboard SET rank = ?1 WHERE entry_order = ?2",
            params![position as i64, entry_order],
        )
        .context("write rank")?;
    }
    Ok(())
}

/// All rows in rank order.
pub fn all_rows(conn: &Connection) -> Result<Vec<LeaderboardRow>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {ROW_COLUMNS} FROM leaderboard ORDER BY rank ASC, entry_order ASC"
        ))
        .context("prepare all rows query")?;
    let rows = stmt
        .query_map([], row_from_sql)
        .context("query leaderboard rows")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode leaderboard row")?);
    }
    Ok(out)
}

/// Replace every aggregate column from a fresh ledger recomputation. Players
/// without valid matches keep their zeroed columns.
pub fn update_aggregates(conn: &Connection, stats: &HashMap<String, SeasonStats>) -> Result<()> {
    for row in all_rows(conn)? {
        let Some(s) = stats.get(&row.player_name) else {
            continue;
        };
        conn.execute(
            "UPDATE leaderboard SET
                voting_accuracy = ?1,
                total_games_played = ?2,
                impostor_games_played = ?3,
                crewmate_games_played = ?4,
                impostor_games_won = ?5,
                crewmate_games_won = ?6,
                games_won = ?7,
                games_died_first = ?8,
                voted_wrong_on_crit = ?9,
                voted_right_on_crit_but_lost = ?10,
                crewmate_win_streak = ?11,
                best_crewmate_win_streak = ?12,
                impostor_win_streak = ?13,
                best_impostor_win_streak = ?14,
                survivability_crewmate = ?15,
                survivability_impostor = ?16
             WHERE player_name = ?17",
            params![
                s.voting_accuracy,
                s.total_games_played,
                s.impostor_games_played,
                s.crewmate_games_played,
                s.impostor_games_won,
                s.crewmate_games_won,
                s.games_won,
                s.games_died_first,
                s.voted_wrong_on_crit,
                s.voted_right_on_crit_but_lost,
                s.crewmate_win_streak,
                s.best_crewmate_win_streak,
                s.impostor_win_streak,
                s.best_impostor_win_streak,
                s.survivability_crewmate,
                s.survivability_impostor,
                row.player_name,
            ],
        )
        .with_context(|| format!("update aggregates for {}", row.player_name))?;
    }
    Ok(())
}

pub fn link_account(conn: &Connection, player_name: &str, account_id: i64) -> Result<bool> {
    let Some(row) = get(conn, player_name)? else {
        return Ok(false);
    };
    conn.execute(
        "UPDATE leaderboard SET account_id = ?1 WHERE player_name = ?2",
        params![account_id, row.player_name],
    )
    .context("link account")?;
    Ok(true)
}

pub fn unlink_account(conn: &Connection, player_name: &str) -> Result<bool> {
    link_account(conn, player_name, 0)
}

pub fn rename_player(conn: &Connection, old_name: &str, new_name: &str) -> Result<bool> {
    let Some(row) = get(conn, old_name)? else {
        return Ok(false);
    };
    conn.execute(
        "UPDATE leaderboard SET player_name = ?1 WHERE player_name = ?2",
        params![new_name, row.player_name],
    )
    .with_context(|| format!("rename {old_name} to {new_name}"))?;
    Ok(true)
}

/// Scope of a moderator MMR adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentScope {
    Crew,
    Imp,
    Both,
}

impl AdjustmentScope {
    pub fn parse(raw: &str) -> AdjustmentScope {
        match raw.trim().to_lowercase().as_str() {
            "crew" => AdjustmentScope::Crew,
            "imp" => AdjustmentScope::Imp,
            _ => AdjustmentScope::Both,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            AdjustmentScope::Crew => "crew",
            AdjustmentScope::Imp => "imp",
            AdjustmentScope::Both => "both",
        }
    }
}

/// Record a moderator adjustment in the journal and apply it. The journal
/// survives full rebuilds so manual corrections can be replayed on top.
pub fn record_adjustment(
    conn: &Connection,
    player_name: &str,
    value: f64,
    scope: AdjustmentScope,
    moderator: &str,
    reason: &str,
) -> Result<bool> {
    if !apply_adjustment(conn, player_name, value, scope)? {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO mmr_adjustments (player_name, value, scope, moderator, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            player_name,
            value,
            scope.as_str(),
            moderator,
            reason,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("insert mmr adjustment")?;
    Ok(true)
}

/// Re-apply every journaled adjustment, in order. Used after a fresh
/// rebuild of the leaderboard from the ledger.
pub fn reapply_stored_adjustments(conn: &Connection) -> Result<usize> {
    let mut stmt = conn
        .prepare(
            "SELECT player_name, value, scope, moderator FROM mmr_adjustments
             ORDER BY adjustment_id",
        )
        .context("prepare adjustments query")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .context("query adjustments")?;

    let mut applied = 0usize;
    for row in rows {
        let (player_name, value, scope, moderator) = row.context("decode adjustment row")?;
        let scope = AdjustmentScope::parse(&scope);
        if apply_adjustment(conn, &player_name, value, scope)? {
            info!("applied stored MMR change: {player_name} {value:+} ({scope:?}) by {moderator}");
            applied += 1;
        } else {
            warn!("player {player_name} not found in leaderboard, skipping MMR change");
        }
    }
    Ok(applied)
}

fn apply_adjustment(
    conn: &Connection,
    player_name: &str,
    value: f64,
    scope: AdjustmentScope,
) -> Result<bool> {
    let Some(row) = get(conn, player_name)? else {
        return Ok(false);
    };
    let (crew_delta, imp_delta) = match scope {
        AdjustmentScope::Crew => (value, 0.0),
        AdjustmentScope::Imp => (0.0, value),
        AdjustmentScope::Both => (value, value),
    };
    apply_match_delta(conn, &row.player_name, crew_delta, imp_delta)?;
    Ok(true)
}

const ROW_COLUMNS: &str = "rank, player_name, account_id, mmr, crewmate_mmr, impostor_mmr, \
     voting_accuracy, total_games_played, impostor_games_played, crewmate_games_played, \
     impostor_games_won, crewmate_games_won, games_won, games_died_first, \
     voted_wrong_on_crit, voted_right_on_crit_but_lost, \
     crewmate_win_streak, best_crewmate_win_streak, \
     impostor_win_streak, best_impostor_win_streak, \
     survivability_crewmate, survivability_impostor";

fn row_from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeaderboardRow> {
    Ok(LeaderboardRow {
        rank: row.get(0)?,
        player_name: row.get(1)?,
        account_id: row.get(2)?,
        mmr: row.get(3)?,
        crewmate_mmr: row.get(4)?,
        impostor_mmr: row.get(5)?,
        voting_accuracy: row.get(6)?,
        total_games_played: row.get(7)?,
        impostor_games_played: row.get(8)?,
        crewmate_games_played: row.get(9)?,
        impostor_games_won: row.get(10)?,
        crewmate_games_won: row.get(11)?,
        games_won: row.get(12)?,
        games_died_first: row.get(13)?,
        voted_wrong_on_crit: row.get(14)?,
        voted_right_on_crit_but_lost: row.get(15)?,
        crewmate_win_streak: row.get(16)?,
        best_crewmate_win_streak: row.get(17)?,
        impostor_win_streak: row.get(18)?,
        best_impostor_win_streak: row.get(19)?,
        survivability_crewmate: row.get(20)?,
        survivability_impostor: row.get(21)?,
    })
}
