use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use ranked_ledger::match_log::SpecialSessions;
use ranked_ledger::pipeline::{ProcessError, Processor};
use ranked_ledger::rating::RatingConfig;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::init();

    let matches_dir = parse_path_arg("--matches-dir")
        .or_else(|| path_from_env("RANKED_MATCHES_DIR"))
        .context("no matches directory (--matches-dir or RANKED_MATCHES_DIR)")?;
    let db_path = parse_path_arg("--db")
        .or_else(|| path_from_env("RANKED_DB"))
        .unwrap_or_else(|| matches_dir.join("season_ledger.sqlite"));

    let config = parse_path_arg("--config")
        .or_else(|| path_from_env("RANKED_CONFIG"))
        .map(|path| RatingConfig::load(&path))
        .unwrap_or_default();

    let mut processor = Processor::open(&matches_dir, &db_path, config)?;
    if let Some(path) = parse_path_arg("--special-matches") {
        processor = processor.with_special_sessions(SpecialSessions::load(&path));
    }

    if let Some(match_id) = parse_match_id_arg()? {
        match processor.process_match_by_id(match_id) {
            Ok(m) => {
                println!(
                    "Processed match {match_id}: {} ({} players, {} rounds)",
                    m.result.canonical(),
                    m.players.len(),
                    m.rounds
                );
                for warning in &m.warnings {
                    println!("  warning: {warning}");
                }
            }
            Err(err @ (ProcessError::MatchNotFound(_) | ProcessError::AlreadyProcessed(_))) => {
                println!("{err}");
            }
            Err(err) => return Err(err.into()),
        }
        return Ok(());
    }

    let summary = processor.process_unprocessed_matches()?;
    println!("Batch complete");
    println!("DB: {}", db_path.display());
    println!("Applied to leaderboard: {}", summary.applied);
    println!("Recorded only: {}", summary.recorded_only);
    if !summary.errors.is_empty() {
        println!("Errors: {}", summary.errors.len());
        for err in summary.errors.iter().take(6) {
            println!(" - {err}");
        }
    }
    Ok(())
}

fn parse_match_id_arg() -> Result<Option<i64>> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix("--match-id=") {
            return Ok(Some(parse_id(raw)?));
        }
        if arg == "--match-id" {
            let Some(next) = args.get(idx + 1) else {
                return Err(anyhow!("--match-id needs a value"));
            };
            return Ok(Some(parse_id(next)?));
        }
    }
    Ok(None)
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .with_context(|| format!("invalid match id {raw:?}"))
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let prefix = format!("{flag}=");
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn path_from_env(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}
