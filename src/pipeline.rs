use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use log::{error, info};
use rusqlite::Connection;
use thiserror::Error;

use crate::fuzzy::{NameScorer, indel_ratio};
use crate::leaderboard;
use crate::ledger;
use crate::match_log::{
    MatchRecord, MatchResult, SpecialSessions, find_match_file_by_id, load_match_events,
    load_match_record, sorted_match_files, write_match_result,
};
use crate::rating::{RatingConfig, apply_ratings};
use crate::replay::{Match, replay};
use crate::store::open_db;

/// Ranked matches are played with full lobbies; anything else is recorded
/// but does not move the leaderboard.
const FULL_LOBBY_SIZE: usize = 10;

/// User-facing failures of the processing and correction flows. All of them
/// are recoverable; storage failures wrap the underlying error.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("can't find match {0}")]
    MatchNotFound(i64),
    #[error("match {0} has already been processed")]
    AlreadyProcessed(i64),
    #[error("match {match_id} is already a {result}")]
    SameResult { match_id: i64, result: String },
    #[error("wrong input: {0:?} is not a recognized result")]
    UnknownResult(String),
    #[error("malformed match input: {0}")]
    Malformed(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Matches replayed, rated, and applied to the leaderboard.
    pub applied: usize,
    /// Matches recorded in the ledger but not applied (canceled, unknown,
    /// short lobbies).
    pub recorded_only: usize,
    pub errors: Vec<String>,
}

/// Single-writer orchestrator for "find unprocessed matches → replay → rate
/// → ledger-append → leaderboard-update", one match in flight at a time.
pub struct Processor {
    matches_dir: PathBuf,
    conn: Connection,
    config: RatingConfig,
    scorer: NameScorer,
    special_sessions: SpecialSessions,
}

impl Processor {
    pub fn open(matches_dir: &Path, db_path: &Path, config: RatingConfig) -> Result<Processor> {
        let conn = open_db(db_path)?;
        Ok(Processor {
            matches_dir: matches_dir.to_path_buf(),
            conn,
            config,
            scorer: indel_ratio,
            special_sessions: SpecialSessions::default(),
        })
    }

    pub fn with_scorer(mut self, scorer: NameScorer) -> Processor {
        self.scorer = scorer;
        self
    }

    pub fn with_special_sessions(mut self, special_sessions: SpecialSessions) -> Processor {
        self.special_sessions = special_sessions;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Replay and rate one match file without touching storage beyond
    /// creating leaderboard rows for new players of rated matches.
    pub fn load_match(&self, path: &Path) -> Result<Match, ProcessError> {
        load_and_rate(
            &self.conn,
            &self.matches_dir,
            path,
            &self.config,
            self.scorer,
            &self.special_sessions,
        )
    }

    /// Process one match by ID: replay, rate, append to the ledger, apply to
    /// the leaderboard, and refresh aggregates — atomically.
    pub fn process_match_by_id(&mut self, match_id: i64) -> Result<Match, ProcessError> {
        let path = find_match_file_by_id(&self.matches_dir, match_id)?
            .ok_or(ProcessError::MatchNotFound(match_id))?;
        let processed = ledger::processed_match_ids(&self.conn)?;
        if processed.contains(&match_id) {
            info!("match {match_id} has already been processed - skipping");
            return Err(ProcessError::AlreadyProcessed(match_id));
        }

        let m = load_and_rate(
            &self.conn,
            &self.matches_dir,
            &path,
            &self.config,
            self.scorer,
            &self.special_sessions,
        )?;

        let tx = self
            .conn
            .transaction()
            .context("begin match transaction")?;
        if m.result != MatchResult::Unknown {
            ledger::append_match(&tx, &m)?;
        }
        if m.result.is_rated() {
            apply_match_to_leaderboard(&tx, &m)?;
            let stats = ledger::season_stats(&tx)?;
            leaderboard::update_aggregates(&tx, &stats)?;
            info!("match {match_id} has been added to the leaderboard");
        } else {
            info!("match {match_id} is a {} - skipping", m.result.canonical());
        }
        tx.commit().context("commit match transaction")?;
        Ok(m)
    }

    /// Walk every match file in start-time order and process the ones the
    /// ledger has not seen. Per-match failures are logged and skipped; the
    /// batch never aborts on one bad file.
    pub fn process_unprocessed_matches(&mut self) -> Result<BatchSummary> {
        let mut processed = ledger::processed_match_ids(&self.conn)?;
        let fresh_calculation = processed.is_empty();
        if fresh_calculation {
            info!("ledger is empty - fresh calculation, stored MMR changes re-applied at the end");
        }

        let mut summary = BatchSummary::default();
        for path in sorted_match_files(&self.matches_dir)? {
            let record = match load_match_record(&path) {
                Ok(record) => record,
                Err(err) => {
                    let message = format!("error processing file {}: {err:#}", path.display());
                    error!("{message}");
                    summary.errors.push(message);
                    continue;
                }
            };
            if processed.contains(&record.match_id) {
                continue;
            }

            match self.process_one(&path, &record) {
                Ok(applied) => {
                    if applied {
                        info!("processed match id {}", record.match_id);
                        summary.applied += 1;
                    } else {
                        info!(
                            "skipped {} (result {}, {} players)",
                            path.display(),
                            record.result.canonical(),
                            record.players.len()
                        );
                        summary.recorded_only += 1;
                    }
                }
                Err(err) => {
                    let message = format!("error processing file {}: {err:#}", path.display());
                    error!("{message}");
                    summary.errors.push(message);
                }
            }
            processed.insert(record.match_id);
        }

        self.rebuild_aggregates()?;
        if fresh_calculation {
            let applied = leaderboard::reapply_stored_adjustments(&self.conn)?;
            info!("re-applied {applied} stored MMR changes after fresh calculation");
        }
        Ok(summary)
    }

    /// Correct a match's recorded result and replay its effects:
    /// reverse the recorded deltas, drop the ledger rows, persist the new
    /// result, and run the match through the full pipeline again.
    pub fn change_match_result(
        &mut self,
        match_id: i64,
        new_result: &str,
    ) -> Result<(Match, String), ProcessError> {
        let lower = new_result.trim().to_lowercase();
        let result = if lower.starts_with("crew") {
            MatchResult::CrewWin
        } else if lower.starts_with("imp") {
            MatchResult::ImpostorWin
        } else if lower.starts_with("canc") {
            MatchResult::Canceled
        } else {
            return Err(ProcessError::UnknownResult(new_result.to_string()));
        };

        let path = find_match_file_by_id(&self.matches_dir, match_id)?
            .ok_or(ProcessError::MatchNotFound(match_id))?;
        let record = load_match_record(&path)
            .map_err(|err| ProcessError::Malformed(format!("{err:#}")))?;
        if record.result == result {
            info!("match {match_id} is already a {}", result.canonical());
            return Err(ProcessError::SameResult {
                match_id,
                result: result.canonical().to_string(),
            });
        }

        info!("changing match {match_id} to {}", result.canonical());
        let tx = self
            .conn
            .transaction()
            .context("begin correction transaction")?;
        for row in ledger::rows_for_match(&tx, match_id)? {
            leaderboard::apply_match_delta(
                &tx,
                &row.player_name,
                -row.crewmate_mmr_gain,
                -row.impostor_mmr_gain,
            )?;
        }
        ledger::remove_match(&tx, match_id)?;
        tx.commit().context("commit correction transaction")?;

        write_match_result(&path, result)?;
        let m = self.process_match_by_id(match_id)?;
        Ok((
            m,
            format!("Match {match_id} changed to {}", result.canonical()),
        ))
    }

    /// Recompute every season-aggregate column from the ledger and re-rank.
    pub fn rebuild_aggregates(&mut self) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("begin aggregates transaction")?;
        let stats = ledger::season_stats(&tx)?;
        let players = stats.len();
        leaderboard::update_aggregates(&tx, &stats)?;
        leaderboard::rank(&tx)?;
        tx.commit().context("commit aggregates transaction")?;
        Ok(players)
    }

    /// Rename a player across the leaderboard and the ledger.
    pub fn rename_player(&mut self, old_name: &str, new_name: &str) -> Result<bool> {
        let tx = self.conn.transaction().context("begin rename transaction")?;
        let Some(row) = leaderboard::get(&tx, old_name)? else {
            return Ok(false);
        };
        leaderboard::rename_player(&tx, &row.player_name, new_name)?;
        ledger::rename_player(&tx, &row.player_name, new_name)?;
        tx.commit().context("commit rename transaction")?;
        info!("player name {old_name:?} updated to {new_name:?}");
        Ok(true)
    }

    // One match of the batch flow: replay/rate, record in the ledger, and
    // apply to the leaderboard when it is a rated full-lobby game. Returns
    // whether the leaderboard moved.
    fn process_one(&mut self, path: &Path, record: &MatchRecord) -> Result<bool, ProcessError> {
        let m = load_and_rate(
            &self.conn,
            &self.matches_dir,
            path,
            &self.config,
            self.scorer,
            &self.special_sessions,
        )?;
        let apply = m.result.is_rated() && m.players.len() == FULL_LOBBY_SIZE;

        let tx = self
            .conn
            .transaction()
            .context("begin match transaction")?;
        ledger::append_match(&tx, &m)?;
        if apply {
            apply_match_to_leaderboard(&tx, &m)?;
        }
        tx.commit().context("commit match transaction")?;
        Ok(apply)
    }
}

fn load_and_rate(
    conn: &Connection,
    matches_dir: &Path,
    path: &Path,
    config: &RatingConfig,
    scorer: NameScorer,
    special_sessions: &SpecialSessions,
) -> Result<Match, ProcessError> {
    let record =
        load_match_record(path).map_err(|err| ProcessError::Malformed(format!("{err:#}")))?;
    let events = load_match_events(matches_dir, &record)
        .map_err(|err| ProcessError::Malformed(format!("{err:#}")))?;
    let k = special_sessions.k_for(record.match_id, config.k_factor);
    if k != config.k_factor {
        info!("processing special match {} with k={k}", record.match_id);
    }

    let mut m = replay(&record, &events, scorer, k);
    hydrate_current_ratings(conn, &mut m, config)?;
    apply_ratings(&mut m, config);
    Ok(m)
}

// Pull each player's current ratings from the leaderboard. First-time
// players of rated matches get a real row; players of unrated matches get a
// stand-in at the starting ratings so nothing is persisted for them.
fn hydrate_current_ratings(
    conn: &Connection,
    m: &mut Match,
    config: &RatingConfig,
) -> Result<(), ProcessError> {
    for player in &mut m.players {
        let row = match leaderboard::get(conn, &player.name)? {
            Some(row) => row,
            None if m.result.is_rated() => {
                leaderboard::new_player(conn, &player.name, config)?;
                leaderboard::get(conn, &player.name)?
                    .ok_or_else(|| anyhow!("player {} missing after insert", player.name))?
            }
            None => leaderboard::placeholder_row(&player.name, config),
        };
        player.current_mmr = row.mmr;
        player.crewmate_current_mmr = row.crewmate_mmr;
        player.impostor_current_mmr = row.impostor_mmr;
        player.linked_account = row.account_id;
    }
    Ok(())
}

fn apply_match_to_leaderboard(conn: &Connection, m: &Match) -> Result<()> {
    for player in &m.players {
        leaderboard::apply_match_delta(
            conn,
            &player.name,
            player.crewmate_mmr_gain,
            player.impostor_mmr_gain,
        )?;
    }
    Ok(())
}

/// IDs the ledger already carries; exposed for callers that want to show
/// batch progress.
pub fn processed_ids(conn: &Connection) -> Result<HashSet<i64>> {
    ledger::processed_match_ids(conn)
}
