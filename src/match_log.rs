use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDateTime;
use log::{error, warn};
use rayon::prelude::*;
use serde_json::Value;

use crate::events::{GameEvent, parse_events};

const TIME_FORMATS: &[&str] = &["%m/%d/%Y %H:%M:%S", "%m/%d/%Y %I:%M:%S %p"];

/// Declared outcome of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    CrewWin,
    ImpostorWin,
    Canceled,
    Unknown,
}

impl MatchResult {
    /// Parse the result strings the game server writes. Crew wins come in
    /// several spellings; impostor wins always start with "Impostor".
    pub fn parse(raw: &str) -> MatchResult {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "crewmates win" | "humansbyvote" | "humansbytask" => MatchResult::CrewWin,
            "canceled" => MatchResult::Canceled,
            _ if lower.starts_with("impostor") => MatchResult::ImpostorWin,
            _ => MatchResult::Unknown,
        }
    }

    /// Canonical spelling used when persisting a result.
    pub fn canonical(self) -> &'static str {
        match self {
            MatchResult::CrewWin => "Crewmates Win",
            MatchResult::ImpostorWin => "Impostors Win",
            MatchResult::Canceled => "Canceled",
            MatchResult::Unknown => "Unknown",
        }
    }

    /// Canceled and Unknown matches never move ratings.
    pub fn is_rated(self) -> bool {
        matches!(self, MatchResult::CrewWin | MatchResult::ImpostorWin)
    }
}

/// One match metadata file, as delivered by the game-server log writer.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub match_id: i64,
    pub game_started: String,
    pub result: MatchResult,
    pub players: Vec<String>,
    pub impostors: Vec<String>,
    pub events_log_file: String,
}

/// Parse a timestamp in either accepted wire format. Missing or malformed
/// values fall back to the minimal sentinel instead of failing the match.
pub fn parse_time(raw: Option<&str>) -> NaiveDateTime {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        warn!("missing timestamp; defaulting to minimal datetime");
        return NaiveDateTime::MIN;
    };
    for format in TIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return parsed;
        }
    }
    warn!("time format not recognized: {raw:?}; defaulting to minimal datetime");
    NaiveDateTime::MIN
}

/// Load one `<id>_match.json` metadata file. Keys are matched
/// case-insensitively.
pub fn load_match_record(path: &Path) -> Result<MatchRecord> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read match file {}", path.display()))?;
    let value: Value = serde_json::from_str(raw.trim())
        .with_context(|| format!("invalid match json {}", path.display()))?;

    let match_id = field(&value, "matchid")
        .and_then(as_i64_any)
        .ok_or_else(|| anyhow!("match file {} has no usable matchId", path.display()))?;
    let game_started = field_str(&value, "gamestarted").unwrap_or_default();
    let result = MatchResult::parse(&field_str(&value, "result").unwrap_or_default());
    let players = split_names(&field_str(&value, "players").unwrap_or_default());
    let impostors = split_names(&field_str(&value, "impostors").unwrap_or_default());
    let events_log_file = field_str(&value, "eventslogfile")
        .ok_or_else(|| anyhow!("match file {} has no eventsLogFile", path.display()))?;

    Ok(MatchRecord {
        match_id,
        game_started,
        result,
        players,
        impostors,
        events_log_file,
    })
}

/// Load the event sequence referenced by a match record.
pub fn load_match_events(matches_dir: &Path, record: &MatchRecord) -> Result<Vec<GameEvent>> {
    let path = matches_dir.join(&record.events_log_file);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("read events file {}", path.display()))?;
    parse_events(&raw)
}

/// All `*_match.json` files in the directory, sorted by their declared start
/// time so batch processing replays the season in order. Unreadable files
/// sort first (sentinel-min timestamps) and are reported downstream.
pub fn sorted_match_files(matches_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(matches_dir)
        .with_context(|| format!("read matches dir {}", matches_dir.display()))?;
    let files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.to_lowercase().ends_with("_match.json"))
        })
        .collect();

    let mut stamped: Vec<(NaiveDateTime, PathBuf)> = files
        .into_par_iter()
        .map(|path| (start_time_of(&path), path))
        .collect();
    stamped.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(stamped.into_iter().map(|(_, path)| path).collect())
}

/// Locate the metadata file carrying the given match ID.
pub fn find_match_file_by_id(matches_dir: &Path, match_id: i64) -> Result<Option<PathBuf>> {
    for path in sorted_match_files(matches_dir)? {
        match load_match_record(&path) {
            Ok(record) if record.match_id == match_id => return Ok(Some(path)),
            Ok(_) => {}
            Err(err) => error!("failed to read match file {}: {err:#}", path.display()),
        }
    }
    Ok(None)
}

/// Persist a corrected result into the match metadata file, keeping every
/// other key intact.
pub fn write_match_result(path: &Path, result: MatchResult) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read match file {}", path.display()))?;
    let mut value: Value = serde_json::from_str(raw.trim())
        .with_context(|| format!("invalid match json {}", path.display()))?;
    let map = value
        .as_object_mut()
        .ok_or_else(|| anyhow!("match file {} is not a json object", path.display()))?;

    let key = map
        .keys()
        .find(|k| k.eq_ignore_ascii_case("result"))
        .cloned()
        .unwrap_or_else(|| "result".to_string());
    map.insert(key, Value::String(result.canonical().to_string()));

    let json = serde_json::to_string_pretty(&value).context("serialize match json")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write match file {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("swap match file {}", path.display()))?;
    Ok(())
}

/// Session multipliers for special matches: a JSON map of match ID to
/// `"double"` (K=64) or `"triple"` (K=96). A missing or malformed file logs
/// and leaves every match at the default K.
#[derive(Debug, Clone, Default)]
pub struct SpecialSessions {
    multipliers: HashMap<i64, String>,
}

impl SpecialSessions {
    pub fn load(path: &Path) -> SpecialSessions {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                error!(
                    "error checking special matches file {}: {err}",
                    path.display()
                );
                return SpecialSessions::default();
            }
        };
        match serde_json::from_str::<HashMap<i64, String>>(raw.trim()) {
            Ok(multipliers) => SpecialSessions { multipliers },
            Err(err) => {
                error!(
                    "error parsing special matches file {}: {err}",
                    path.display()
                );
                SpecialSessions::default()
            }
        }
    }

    pub fn k_for(&self, match_id: i64, default_k: f64) -> f64 {
        match self.multipliers.get(&match_id).map(String::as_str) {
            Some("double") => 64.0,
            Some("triple") => 96.0,
            _ => default_k,
        }
    }
}

fn start_time_of(path: &Path) -> NaiveDateTime {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            error!("failed to read match file {}: {err}", path.display());
            return NaiveDateTime::MIN;
        }
    };
    let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
        return NaiveDateTime::MIN;
    };
    parse_time(field_str(&value, "gamestarted").as_deref())
}

fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn field_str(value: &Value, key: &str) -> Option<String> {
    field(value, key).and_then(|v| match v {
        Value::String(s) => Some(s.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::{MatchResult, parse_time, split_names};
    use chrono::NaiveDateTime;

    #[test]
    fn parses_both_wire_time_formats() {
        let plain = parse_time(Some("4/2/2024 21:03:11"));
        assert_eq!(plain.format("%H:%M:%S").to_string(), "21:03:11");
        let am_pm = parse_time(Some("4/2/2024 9:03:11 PM"));
        assert_eq!(plain, am_pm);
    }

    #[test]
    fn malformed_time_falls_back_to_sentinel() {
        assert_eq!(parse_time(None), NaiveDateTime::MIN);
        assert_eq!(parse_time(Some("yesterday-ish")), NaiveDateTime::MIN);
        assert_eq!(parse_time(Some("")), NaiveDateTime::MIN);
    }

    #[test]
    fn result_parsing_covers_all_server_spellings() {
        assert_eq!(MatchResult::parse("Crewmates Win"), MatchResult::CrewWin);
        assert_eq!(MatchResult::parse("HumansByVote"), MatchResult::CrewWin);
        assert_eq!(MatchResult::parse("HumansByTask"), MatchResult::CrewWin);
        assert_eq!(MatchResult::parse("Impostors Win"), MatchResult::ImpostorWin);
        assert_eq!(MatchResult::parse("ImpostorsByKill"), MatchResult::ImpostorWin);
        assert_eq!(MatchResult::parse("Canceled"), MatchResult::Canceled);
        assert_eq!(MatchResult::parse("whatever"), MatchResult::Unknown);
    }

    #[test]
    fn player_lists_are_comma_joined_and_trimmed() {
        assert_eq!(
            split_names("Aiden, Sleepy ,Chief"),
            vec!["Aiden", "Sleepy", "Chief"]
        );
        assert!(split_names("").is_empty());
    }
}
