use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::match_log::MatchResult;
use crate::replay::{Match, PlayerInMatch, Team};

/// Every tuned constant of the rating model, loaded from configuration and
/// passed in explicitly. The defaults are the live season values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    // Win-probability curve: f(x) = a * ln(b*x + c) + d applied to the
    // absolute difference between team rating averages.
    pub win_prob_a: f64,
    pub win_prob_b: f64,
    pub win_prob_c: f64,
    pub win_prob_d: f64,
    pub crew_base_win_probability: f64,
    pub min_win_probability: f64,
    pub max_win_probability: f64,

    pub k_factor: f64,

    pub starting_mmr: f64,
    pub starting_crewmate_mmr: f64,
    pub starting_impostor_mmr: f64,

    // Crewmate performance weights.
    pub crew_correct_vote_bonus: f64,
    pub crew_incorrect_vote_penalty: f64,
    pub crew_got_voted_penalty: f64,
    pub crew_task_bonus: f64,
    pub crew_wrong_crit_penalty: f64,
    pub crew_correct_eject_bonus: f64,
    pub crew_right_crit_loss_bonus: f64,
    pub crew_win_survival_bonus: f64,
    pub crew_loss_survival_penalty: f64,
    pub crew_solo_imp_survival_penalty: f64,

    // Impostor performance weights.
    pub imp_early_eject_penalty: f64,
    pub imp_solo_bonus: f64,
    pub imp_got_voted_bonus: f64,
    pub imp_solo_kill_bonus: f64,
    pub imp_solo_win_bonus: f64,
    pub imp_kill_bonus: f64,

    pub min_performance: f64,
    pub died_first_win_performance: f64,
    pub max_loss_performance: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            win_prob_a: 0.043290409437842466,
            win_prob_b: 7.855256175054392,
            win_prob_c: 98.05742514755777,
            win_prob_d: -0.19883086302819628,
            crew_base_win_probability: 0.56,
            min_win_probability: 0.25,
            max_win_probability: 0.85,
            k_factor: 32.0,
            starting_mmr: 1000.0,
            starting_crewmate_mmr: 1000.0,
            starting_impostor_mmr: 1000.0,
            crew_correct_vote_bonus: 0.06,
            crew_incorrect_vote_penalty: 0.04,
            crew_got_voted_penalty: 0.05,
            crew_task_bonus: 0.02,
            crew_wrong_crit_penalty: 0.25,
            crew_correct_eject_bonus: 0.01,
            crew_right_crit_loss_bonus: 0.15,
            crew_win_survival_bonus: 0.03,
            crew_loss_survival_penalty: 0.02,
            crew_solo_imp_survival_penalty: 0.02,
            imp_early_eject_penalty: 0.30,
            imp_solo_bonus: 0.15,
            imp_got_voted_bonus: 0.03,
            imp_solo_kill_bonus: 0.05,
            imp_solo_win_bonus: 0.25,
            imp_kill_bonus: 0.04,
            min_performance: 0.70,
            died_first_win_performance: 0.35,
            max_loss_performance: 0.75,
        }
    }
}

impl RatingConfig {
    /// Load from a JSON file; a missing or malformed file logs and falls back
    /// to the defaults so a bad deploy never stalls processing.
    pub fn load(path: &Path) -> RatingConfig {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    "rating config {} not readable ({err}); using defaults",
                    path.display()
                );
                return RatingConfig::default();
            }
        };
        match serde_json::from_str::<RatingConfig>(raw.trim()) {
            Ok(config) => config,
            Err(err) => {
                warn!(
                    "rating config {} not parseable ({err}); using defaults",
                    path.display()
                );
                RatingConfig::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let json = serde_json::to_string_pretty(self).context("serialize rating config")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).context("write rating config")?;
        fs::rename(&tmp, path).context("swap rating config")?;
        Ok(())
    }
}

/// Crew win probability from the two team rating averages: the base rate
/// shifted along the bounded log curve, clamped to the configured floor and
/// ceiling.
pub fn crew_win_probability(avg_crew_mmr: f64, avg_imp_mmr: f64, cfg: &RatingConfig) -> f64 {
    let log_curve = |diff: f64| -> f64 {
        cfg.win_prob_a * (cfg.win_prob_b * diff + cfg.win_prob_c).ln() + cfg.win_prob_d
    };

    let difference = avg_crew_mmr - avg_imp_mmr;
    if difference < 0.0 {
        let prob = cfg.crew_base_win_probability - log_curve(difference.abs());
        prob.max(cfg.min_win_probability)
    } else {
        let prob = cfg.crew_base_win_probability + log_curve(difference);
        prob.min(cfg.max_win_probability)
    }
}

/// Compute team rating averages, win probabilities, and per-player MMR
/// deltas for a replayed match. Canceled and Unknown results are left
/// untouched.
pub fn apply_ratings(m: &mut Match, cfg: &RatingConfig) {
    if matches!(m.result, MatchResult::Canceled | MatchResult::Unknown) {
        return;
    }
    compute_avg_mmr(m);
    compute_win_probabilities(m, cfg);
    compute_mmr_gains(m, cfg);
}

fn compute_avg_mmr(m: &mut Match) {
    if m.crewmates_count == 0 || m.impostors_count == 0 {
        return;
    }
    let mut crewmate_mmr = 0.0;
    let mut impostor_mmr = 0.0;
    for player in &m.players {
        match player.team {
            Team::Crewmate => crewmate_mmr += player.crewmate_current_mmr,
            Team::Impostor => impostor_mmr += player.impostor_current_mmr,
        }
    }
    m.avg_crewmate_mmr = crewmate_mmr / m.crewmates_count as f64;
    m.avg_impostor_mmr = impostor_mmr / m.impostors_count as f64;
}

fn compute_win_probabilities(m: &mut Match, cfg: &RatingConfig) {
    m.crew_win_probability = crew_win_probability(m.avg_crewmate_mmr, m.avg_impostor_mmr, cfg);
    m.imp_win_probability = 1.0 - m.crew_win_probability;
    for player in &mut m.players {
        player.percentage_of_winning = match player.team {
            Team::Crewmate => m.crew_win_probability,
            Team::Impostor => m.imp_win_probability,
        };
    }
}

fn compute_mmr_gains(m: &mut Match, cfg: &RatingConfig) {
    let solo_imp_game = m.solo_imp_game;
    let k = m.k;
    for player in &mut m.players {
        player.performance = performance_multiplier(player, solo_imp_game, cfg);

        if player.won {
            if player.died_first_round {
                player.performance = cfg.died_first_win_performance;
            }
            player.p = (1.0 - player.percentage_of_winning) * player.performance;
        } else {
            if player.died_first_round {
                player.performance = cfg.max_loss_performance;
            }
            player.p = -(player.percentage_of_winning / player.performance);
        }
        player.p = round_to(player.p, 4);

        match player.team {
            Team::Impostor => player.impostor_mmr_gain = round_to(player.p * k, 2),
            Team::Crewmate => player.crewmate_mmr_gain = round_to(player.p * k, 2),
        }
        player.mmr_gain = (player.impostor_mmr_gain + player.crewmate_mmr_gain) / 2.0;
    }
}

fn performance_multiplier(player: &PlayerInMatch, solo_imp_game: bool, cfg: &RatingConfig) -> f64 {
    let mut performance = player.performance;
    match player.team {
        Team::Crewmate => {
            if player.correct_votes > 0 {
                performance *= 1.0 + player.correct_votes as f64 * cfg.crew_correct_vote_bonus;
            }
            if player.incorrect_votes > 0 {
                performance /=
                    1.0 + player.incorrect_votes as f64 * cfg.crew_incorrect_vote_penalty;
            }
            if !player.got_crew_voted.is_empty() {
                performance /=
                    1.0 + cfg.crew_got_voted_penalty * player.got_crew_voted.len() as f64;
            }
            if player.tasks_complete > 0 {
                performance *= 1.0 + player.tasks_complete as f64 * cfg.crew_task_bonus;
            }
            if player.voted_wrong_on_crit {
                performance /= 1.0 + cfg.crew_wrong_crit_penalty;
            }
            let eject_bonus: f64 = player
                .correct_vote_on_eject
                .iter()
                .map(|credit| credit.players_alive as f64 * cfg.crew_correct_eject_bonus)
                .sum();
            if eject_bonus != 0.0 {
                performance *= 1.0 + eject_bonus;
            }
            if player.right_vote_on_crit_but_loss {
                performance *= 1.0 + cfg.crew_right_crit_loss_bonus;
            }
            if player.won {
                performance *= 1.0 + player.rounds_survived as f64 * cfg.crew_win_survival_bonus;
            } else {
                performance /=
                    1.0 + player.rounds_survived as f64 * cfg.crew_loss_survival_penalty;
                if solo_imp_game {
                    performance /= 1.0
                        + player.rounds_survived as f64 * cfg.crew_solo_imp_survival_penalty;
                }
            }
        }
        Team::Impostor => {
            if player.ejected_early_as_imp {
                performance /= 1.0 + cfg.imp_early_eject_penalty;
            }
            if player.solo_imp {
                performance *= 1.0 + cfg.imp_solo_bonus;
            }
            if !player.got_crew_voted.is_empty() {
                performance *=
                    1.0 + cfg.imp_got_voted_bonus * player.got_crew_voted.len() as f64;
            }
            if player.kills_as_solo_imp > 0 {
                performance *= 1.0 + cfg.imp_solo_kill_bonus * player.kills_as_solo_imp as f64;
            }
            if player.won_as_solo_imp {
                performance *= 1.0 + cfg.imp_solo_win_bonus;
            }
            if player.number_of_kills > 0 {
                performance *= 1.0 + player.number_of_kills as f64 * cfg.imp_kill_bonus;
            }
        }
    }

    performance.max(cfg.min_performance)
}

/// Round half away from zero at the given number of decimals, matching the
/// rounding the MMR columns are persisted with.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
