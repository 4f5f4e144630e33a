use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;

/// Outcome attached to a `MeetingEnd` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetingVerdict {
    Exiled,
    Tie,
    Skipped,
}

/// One entry of a match's ordered event log.
///
/// Field names in the raw logs are case-insensitive and name values may carry
/// a trailing `" |"` decoration, which is stripped during parsing. Tags
/// outside this vocabulary are skipped so newer log writers stay compatible.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Task {
        name: String,
    },
    PlayerVote {
        player: String,
        // The raw target: the literal "none" for an explicit skip, absent
        // when the log writer recorded no target at all. The two are not
        // the same for crit-round bookkeeping.
        target: Option<String>,
        time: Option<String>,
    },
    Death {
        name: String,
        killer: Option<String>,
        time: Option<String>,
    },
    BodyReport {
        player: String,
        dead_player: Option<String>,
    },
    MeetingStart {
        player: Option<String>,
    },
    Exiled {
        player: String,
        time: Option<String>,
    },
    MeetingEnd {
        verdict: MeetingVerdict,
    },
    GameCancel,
    ManualGameEnd,
    Disconnect {
        name: String,
    },
}

/// Strip the `" |"` decoration some log writers append to names.
pub fn clean_name(raw: &str) -> String {
    let trimmed = raw.strip_suffix(" |").unwrap_or(raw);
    trimmed.trim().to_string()
}

/// Parse a raw events JSON document (an array of tagged records, or a single
/// record) into the recognized event sequence. Unrecognized tags and records
/// missing their required name field are dropped, never an error.
pub fn parse_events(raw: &str) -> Result<Vec<GameEvent>> {
    let value: Value = serde_json::from_str(raw.trim()).context("invalid events json")?;
    let records: Vec<&Value> = match &value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![&value],
        _ => Vec::new(),
    };

    let mut out = Vec::with_capacity(records.len());
    for record in records {
        if let Some(event) = parse_event(record) {
            out.push(event);
        }
    }
    Ok(out)
}

fn parse_event(record: &Value) -> Option<GameEvent> {
    let tag = field_str(record, "event")?;
    match tag.as_str() {
        "Task" => Some(GameEvent::Task {
            name: name_field(record, "name")?,
        }),
        "PlayerVote" => Some(GameEvent::PlayerVote {
            player: name_field(record, "player")?,
            target: name_field(record, "target"),
            time: field_str(record, "time"),
        }),
        "Death" => Some(GameEvent::Death {
            name: name_field(record, "name")?,
            killer: name_field(record, "killer"),
            time: field_str(record, "time"),
        }),
        "BodyReport" => Some(GameEvent::BodyReport {
            player: name_field(record, "player")?,
            dead_player: name_field(record, "deadplayer"),
        }),
        "MeetingStart" => Some(GameEvent::MeetingStart {
            player: name_field(record, "player"),
        }),
        "Exiled" => Some(GameEvent::Exiled {
            player: name_field(record, "player")?,
            time: field_str(record, "time"),
        }),
        "MeetingEnd" => {
            let verdict = match field_str(record, "result")?.as_str() {
                "Exiled" => MeetingVerdict::Exiled,
                "Tie" => MeetingVerdict::Tie,
                "Skipped" => MeetingVerdict::Skipped,
                other => {
                    debug!("skipping MeetingEnd with unknown result {other:?}");
                    return None;
                }
            };
            Some(GameEvent::MeetingEnd { verdict })
        }
        "GameCancel" => Some(GameEvent::GameCancel),
        "ManualGameEnd" => Some(GameEvent::ManualGameEnd),
        "Disconnect" => Some(GameEvent::Disconnect {
            name: name_field(record, "name")?,
        }),
        other => {
            debug!("skipping unrecognized event tag {other:?}");
            None
        }
    }
}

fn name_field(record: &Value, key: &str) -> Option<String> {
    let raw = field_str(record, key)?;
    let cleaned = clean_name(&raw);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn field_str(record: &Value, key: &str) -> Option<String> {
    let map = record.as_object()?;
    for (k, v) in map {
        if k.eq_ignore_ascii_case(key) {
            return v.as_str().map(|s| s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{GameEvent, MeetingVerdict, clean_name, parse_events};

    #[test]
    fn clean_name_strips_trailing_decoration() {
        assert_eq!(clean_name("Aiden |"), "Aiden");
        assert_eq!(clean_name("Aiden"), "Aiden");
        assert_eq!(clean_name(" Dark Lord | "), "Dark Lord |");
    }

    #[test]
    fn parses_mixed_case_keys_and_skip_votes() {
        let raw = r#"[
            {"Event": "Task", "Name": "Sleepy |"},
            {"Event": "PlayerVote", "Player": "Chief", "Target": "none", "Time": "4/2/2024 21:03:11"},
            {"Event": "PlayerVote", "Player": "Sleepy", "Target": "Aiden |"},
            {"Event": "MeetingEnd", "Result": "Skipped"},
            {"Event": "SomeFutureTag", "Name": "x"},
            {"Event": "Disconnect", "Name": "Chief"}
        ]"#;
        let events = parse_events(raw).unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            GameEvent::Task {
                name: "Sleepy".to_string()
            }
        );
        assert_eq!(
            events[1],
            GameEvent::PlayerVote {
                player: "Chief".to_string(),
                target: Some("none".to_string()),
                time: Some("4/2/2024 21:03:11".to_string()),
            }
        );
        assert_eq!(
            events[2],
            GameEvent::PlayerVote {
                player: "Sleepy".to_string(),
                target: Some("Aiden".to_string()),
                time: None,
            }
        );
        assert_eq!(
            events[3],
            GameEvent::MeetingEnd {
                verdict: MeetingVerdict::Skipped
            }
        );
        assert_eq!(
            events[4],
            GameEvent::Disconnect {
                name: "Chief".to_string()
            }
        );
    }

    #[test]
    fn tolerates_a_single_object_document() {
        let events = parse_events(r#"{"event": "GameCancel"}"#).unwrap();
        assert_eq!(events, vec![GameEvent::GameCancel]);
    }
}
