use std::path::PathBuf;

use anyhow::{Context, Result};

use ranked_ledger::pipeline::Processor;
use ranked_ledger::rating::RatingConfig;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::init();

    let matches_dir = parse_arg("--matches-dir")
        .map(PathBuf::from)
        .or_else(|| env_path("RANKED_MATCHES_DIR"))
        .context("no matches directory (--matches-dir or RANKED_MATCHES_DIR)")?;
    let db_path = parse_arg("--db")
        .map(PathBuf::from)
        .or_else(|| env_path("RANKED_DB"))
        .unwrap_or_else(|| matches_dir.join("season_ledger.sqlite"));

    let mut processor = Processor::open(&matches_dir, &db_path, RatingConfig::default())?;
    let players = processor.rebuild_aggregates()?;
    println!("Aggregates rebuilt from ledger");
    println!("DB: {}", db_path.display());
    println!("Players with season stats: {players}");
    Ok(())
}

fn parse_arg(flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}
