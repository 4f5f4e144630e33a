/// Similarity scoring between player names, injected wherever the core needs
/// tolerant lookups so callers can swap the scoring function.
///
/// Scores are on a 0–100 scale; 100 means equal strings.
pub type NameScorer = fn(&str, &str) -> f64;

/// Indel-based similarity ratio: `100 * 2*lcs(a, b) / (len(a) + len(b))`.
pub fn indel_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut row = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
    }
    let lcs = prev[b.len()];

    100.0 * (2.0 * lcs as f64) / ((a.len() + b.len()) as f64)
}

/// Ratio over case-folded, whitespace-stripped names. This is the variant the
/// leaderboard uses so that "Dark Lord" and "darklord" compare equal.
pub fn normalized_ratio(a: &str, b: &str) -> f64 {
    indel_ratio(&normalize_name(a), &normalize_name(b))
}

/// Canonical lookup key for a player name.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "")
}

#[cfg(test)]
mod tests {
    use super::{indel_ratio, normalize_name, normalized_ratio};

    #[test]
    fn identical_names_score_100() {
        assert_eq!(indel_ratio("Aiden", "Aiden"), 100.0);
        assert_eq!(indel_ratio("", ""), 100.0);
    }

    #[test]
    fn disjoint_names_score_0() {
        assert_eq!(indel_ratio("abc", "xyz"), 0.0);
        assert_eq!(indel_ratio("abc", ""), 0.0);
    }

    #[test]
    fn close_misspellings_clear_the_roster_threshold() {
        assert!(indel_ratio("Sleepy", "Sleppy") >= 70.0);
        assert!(indel_ratio("Chief", "Cheif") >= 70.0);
        assert!(indel_ratio("Aiden", "Bob") < 70.0);
    }

    #[test]
    fn normalization_ignores_case_and_spaces() {
        assert_eq!(normalize_name("  Dark Lord "), "darklord");
        assert_eq!(normalized_ratio("Dark Lord", "darklord"), 100.0);
    }
}
