use std::collections::HashMap;

use serde::Serialize;

/// Calls made by one key over a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerRecord {
    pub key: String,
    pub email: String,
    pub calls: i64,
}

/// A caller placed on the leaderboard of the newer period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub key: String,
    pub email: String,
    pub calls: i64,
    pub rank: usize,
    /// `old_rank - new_rank`; positive when the key climbed, `None` for keys
    /// absent from the older period.
    pub rank_diff: Option<i64>,
}

/// Ranks `current` and compares each position against `previous`.
///
/// Both lists must already be ordered by calls, highest first. Keys that only
/// appear in `previous` are dropped. The result follows `current` order.
pub fn leaderboard_diff(
    previous: &[CallerRecord],
    current: Vec<CallerRecord>,
) -> Vec<LeaderboardEntry> {
    let mut previous_ranks: HashMap<&str, usize> = HashMap::with_capacity(previous.len());
    for (index, caller) in previous.iter().enumerate() {
        previous_ranks.entry(caller.key.as_str()).or_insert(index + 1);
    }

    current
        .into_iter()
        .enumerate()
        .map(|(index, caller)| {
            let rank = index + 1;
            let rank_diff = previous_ranks
                .get(caller.key.as_str())
                .map(|old_rank| *old_rank as i64 - rank as i64);
            LeaderboardEntry {
                key: caller.key,
                email: caller.email,
                calls: caller.calls,
                rank,
                rank_diff,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(key: &str, calls: i64) -> CallerRecord {
        CallerRecord {
            key: key.to_owned(),
            email: format!("{}@example.com", key.to_ascii_lowercase()),
            calls,
        }
    }

    #[test]
    fn climbers_are_positive_and_fallers_negative() {
        let previous = vec![caller("A", 10), caller("B", 5)];
        let current = vec![caller("B", 20), caller("C", 15), caller("A", 3)];

        let board = leaderboard_diff(&previous, current);

        let ranks: Vec<_> = board
            .iter()
            .map(|entry| (entry.key.as_str(), entry.rank, entry.rank_diff))
            .collect();
        assert_eq!(
            ranks,
            vec![("B", 1, Some(1)), ("C", 2, None), ("A", 3, Some(-2))]
        );
    }

    #[test]
    fn unchanged_rank_is_zero_not_none() {
        let previous = vec![caller("A", 10)];
        let board = leaderboard_diff(&previous, vec![caller("A", 11)]);
        assert_eq!(board[0].rank_diff, Some(0));
    }

    #[test]
    fn empty_previous_marks_everyone_new() {
        let board = leaderboard_diff(&[], vec![caller("A", 4), caller("B", 2)]);
        assert!(board.iter().all(|entry| entry.rank_diff.is_none()));
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn empty_current_drops_previous_callers() {
        let board = leaderboard_diff(&[caller("A", 10)], Vec::new());
        assert!(board.is_empty());
    }

    #[test]
    fn entries_keep_calls_and_email() {
        let board = leaderboard_diff(&[], vec![caller("Q", 42)]);
        assert_eq!(board[0].calls, 42);
        assert_eq!(board[0].email, "q@example.com");
    }
}
