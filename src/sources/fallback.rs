//! Deterministic sample fixtures served when a source has no other signal.
//!
//! Only reached after both the upstream and the cache came up empty, and
//! disabled entirely with `--no-sample-fallback`.

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::db::models::{Game, MatchStatus, NormalizedMatch, Team};

/// Number of matches in every sample set.
pub const SAMPLE_SIZE: usize = 3;

fn sample_teams(game: Game) -> [(&'static str, &'static str); SAMPLE_SIZE] {
    match game {
        Game::Valorant => [("Sentinels", "LOUD"), ("Fnatic", "Team Heretics"), ("Paper Rex", "DRX")],
        Game::Pubg => [("Twisted Minds", "Natus Vincere"), ("17 Gaming", "Danawa"), ("FaZe Clan", "Team Liquid")],
        Game::Tft => [("Lobby A", "Lobby B"), ("Lobby C", "Lobby D"), ("Finals Lobby", "Checkmate")],
        Game::Lol => [("G2 Esports", "Fnatic"), ("T1", "Gen.G"), ("Team Liquid", "Cloud9")],
        Game::Football => [("Arsenal", "Chelsea"), ("Real Madrid", "Barcelona"), ("Inter", "Milan")],
    }
}

/// One finished, one live and one upcoming match around the current hour.
pub fn sample_matches(source: &str, game: Game, now: DateTime<Utc>) -> Vec<NormalizedMatch> {
    let anchor = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
    let slots = [
        (MatchStatus::Finished, anchor - Duration::hours(3), Some((2, 1))),
        (MatchStatus::Live, anchor, Some((1, 1))),
        (MatchStatus::Upcoming, anchor + Duration::hours(4), None),
    ];

    sample_teams(game)
        .iter()
        .zip(slots)
        .enumerate()
        .map(|(i, ((home, away), (status, start, score)))| {
            let mut m = NormalizedMatch::new(
                format!("{}_sample_{}", source, i + 1),
                game,
                Team::new(*home).with_score(score.map(|s| s.0)),
                Team::new(*away).with_score(score.map(|s| s.1)),
                start,
                status,
            );
            m.league = "Sample data".to_string();
            m
        })
        .collect()
}
