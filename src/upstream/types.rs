//! Domain types and JSON:API payload parsing.
//!
//! Upstream answers in JSON:API documents (`data`, `included`,
//! `relationships`). Parsing is deliberately lenient about fields we do not
//! use and strict about the identifiers we key caches on.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::upstream::error::UpstreamError;

/// Upstream shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Steam,
    Psn,
    Xbox,
    Kakao,
    Stadia,
    Console,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Steam,
        Platform::Psn,
        Platform::Xbox,
        Platform::Kakao,
        Platform::Stadia,
        Platform::Console,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Steam => "steam",
            Platform::Psn => "psn",
            Platform::Xbox => "xbox",
            Platform::Kakao => "kakao",
            Platform::Stadia => "stadia",
            Platform::Console => "console",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown platform '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    #[serde(rename = "solo")]
    Solo,
    #[serde(rename = "solo-fpp")]
    SoloFpp,
    #[serde(rename = "duo")]
    Duo,
    #[serde(rename = "duo-fpp")]
    DuoFpp,
    #[serde(rename = "squad")]
    Squad,
    #[serde(rename = "squad-fpp")]
    SquadFpp,
}

impl GameMode {
    pub const ALL: [GameMode; 6] = [
        GameMode::Solo,
        GameMode::SoloFpp,
        GameMode::Duo,
        GameMode::DuoFpp,
        GameMode::Squad,
        GameMode::SquadFpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Solo => "solo",
            GameMode::SoloFpp => "solo-fpp",
            GameMode::Duo => "duo",
            GameMode::DuoFpp => "duo-fpp",
            GameMode::Squad => "squad",
            GameMode::SquadFpp => "squad-fpp",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown game mode '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    /// Most recent matches, newest first.
    #[serde(default)]
    pub match_ids: Vec<String>,
}

/// Aggregate numbers for one game mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModeStats {
    pub rounds_played: u64,
    pub wins: u64,
    pub top10s: u64,
    pub losses: u64,
    pub kills: u64,
    pub assists: u64,
    pub headshot_kills: u64,
    pub damage_dealt: f64,
    pub longest_kill: f64,
    pub time_survived: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: String,
    /// `None` for lifetime stats.
    pub season_id: Option<String>,
    /// Keyed by the upstream mode name (`solo`, `squad-fpp`, ...).
    pub modes: BTreeMap<String, ModeStats>,
}

impl PlayerStats {
    pub fn mode(&self, mode: GameMode) -> Option<&ModeStats> {
        self.modes.get(mode.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub player_id: String,
    pub name: String,
    pub rank_points: f64,
    pub wins: u64,
    pub games: u64,
    pub kills: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub id: String,
    pub is_current: bool,
    pub is_offseason: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub id: String,
    pub game_mode: String,
    pub map_name: String,
    pub duration_secs: u64,
    pub created_at: String,
    pub participant_count: usize,
    pub is_custom_match: bool,
}

/// Outcome of a client fetch. Callers never see a raw transport error.
#[derive(Debug, Clone)]
pub enum Fetched<T> {
    /// Fresh from upstream.
    Live(T),
    /// From the fresh cache tier.
    Cached(T),
    /// Upstream failed; served from the shadow copy.
    Stale {
        value: T,
        stored_at_ms: u64,
        cause: UpstreamError,
    },
    /// Upstream definitively said the resource does not exist.
    NotFound,
    /// Upstream failed and nothing was cached.
    Unavailable(UpstreamError),
}

impl<T> Fetched<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Fetched::Live(v) | Fetched::Cached(v) | Fetched::Stale { value: v, .. } => Some(v),
            Fetched::NotFound | Fetched::Unavailable(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Fetched::Live(v) | Fetched::Cached(v) | Fetched::Stale { value: v, .. } => Some(v),
            Fetched::NotFound | Fetched::Unavailable(_) => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Fetched::Stale { .. })
    }

    /// Where the value came from, for logs and response headers.
    pub fn source(&self) -> &'static str {
        match self {
            Fetched::Live(_) => "live",
            Fetched::Cached(_) => "cache",
            Fetched::Stale { .. } => "stale",
            Fetched::NotFound => "not_found",
            Fetched::Unavailable(_) => "unavailable",
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Fetched<U> {
        match self {
            Fetched::Live(v) => Fetched::Live(f(v)),
            Fetched::Cached(v) => Fetched::Cached(f(v)),
            Fetched::Stale {
                value,
                stored_at_ms,
                cause,
            } => Fetched::Stale {
                value: f(value),
                stored_at_ms,
                cause,
            },
            Fetched::NotFound => Fetched::NotFound,
            Fetched::Unavailable(e) => Fetched::Unavailable(e),
        }
    }
}

fn invalid(detail: impl Into<String>) -> UpstreamError {
    UpstreamError::InvalidResponse { detail: detail.into() }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn u64_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

fn f64_at(value: &Value, pointer: &str) -> f64 {
    value.pointer(pointer).and_then(Value::as_f64).unwrap_or(0.0)
}

/// First player of a `players?filter[playerNames]=` document.
pub fn parse_player(body: &Value, platform: Platform) -> Result<Player, UpstreamError> {
    let data = body.get("data").ok_or_else(|| invalid("missing data"))?;
    let record = match data {
        Value::Array(items) => match items.first() {
            Some(first) => first,
            None => return Err(UpstreamError::from_status(404, "no players matched", None)),
        },
        other => other,
    };

    let id = str_at(record, "/id").ok_or_else(|| invalid("player without id"))?;
    let name = str_at(record, "/attributes/name").ok_or_else(|| invalid("player without name"))?;
    let match_ids = record
        .pointer("/relationships/matches/data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(Player {
        id: id.to_string(),
        name: name.to_string(),
        platform,
        match_ids,
    })
}

/// A `playerSeason` document.
pub fn parse_player_stats(body: &Value, player_id: &str, season_id: Option<&str>) -> Result<PlayerStats, UpstreamError> {
    let modes_value = body
        .pointer("/data/attributes/gameModeStats")
        .ok_or_else(|| invalid("missing gameModeStats"))?;
    let modes: BTreeMap<String, ModeStats> =
        serde_json::from_value(modes_value.clone()).map_err(|e| invalid(format!("gameModeStats: {}", e)))?;

    Ok(PlayerStats {
        player_id: str_at(body, "/data/relationships/player/data/id")
            .unwrap_or(player_id)
            .to_string(),
        season_id: season_id.map(str::to_string),
        modes,
    })
}

/// A `seasons` listing.
pub fn parse_seasons(body: &Value) -> Result<Vec<Season>, UpstreamError> {
    let items = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("seasons data is not an array"))?;

    items
        .iter()
        .map(|item| {
            let id = str_at(item, "/id").ok_or_else(|| invalid("season without id"))?;
            Ok(Season {
                id: id.to_string(),
                is_current: item
                    .pointer("/attributes/isCurrentSeason")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                is_offseason: item
                    .pointer("/attributes/isOffseason")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// The season flagged current, if any.
pub fn current_season(seasons: Vec<Season>) -> Option<Season> {
    seasons.into_iter().find(|s| s.is_current)
}

/// A `leaderboard` document; entries come from `included` players, rank-ordered.
pub fn parse_leaderboard(body: &Value) -> Result<Vec<LeaderboardEntry>, UpstreamError> {
    if body.get("data").is_none() {
        return Err(invalid("missing data"));
    }
    let included = match body.get("included") {
        Some(Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(invalid("included is not an array")),
        None => &[][..],
    };

    let mut entries: Vec<LeaderboardEntry> = included
        .iter()
        .filter(|item| str_at(item, "/type") == Some("player"))
        .filter_map(|item| {
            let id = str_at(item, "/id")?;
            Some(LeaderboardEntry {
                rank: u64_at(item, "/attributes/rank") as u32,
                player_id: id.to_string(),
                name: str_at(item, "/attributes/name").unwrap_or_default().to_string(),
                rank_points: f64_at(item, "/attributes/stats/rankPoints"),
                wins: u64_at(item, "/attributes/stats/wins"),
                games: u64_at(item, "/attributes/stats/games"),
                kills: u64_at(item, "/attributes/stats/kills"),
            })
        })
        .collect();
    entries.sort_by_key(|e| e.rank);
    Ok(entries)
}

/// A `match` document.
pub fn parse_match(body: &Value) -> Result<MatchSummary, UpstreamError> {
    let data = body.get("data").ok_or_else(|| invalid("missing data"))?;
    let id = str_at(data, "/id").ok_or_else(|| invalid("match without id"))?;
    let participant_count = body
        .get("included")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|i| str_at(i, "/type") == Some("participant"))
                .count()
        })
        .unwrap_or(0);

    Ok(MatchSummary {
        id: id.to_string(),
        game_mode: str_at(data, "/attributes/gameMode").unwrap_or_default().to_string(),
        map_name: str_at(data, "/attributes/mapName").unwrap_or_default().to_string(),
        duration_secs: u64_at(data, "/attributes/duration"),
        created_at: str_at(data, "/attributes/createdAt").unwrap_or_default().to_string(),
        participant_count,
        is_custom_match: data
            .pointer("/attributes/isCustomMatch")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_and_mode_parse() {
        assert_eq!("STEAM".parse::<Platform>().unwrap(), Platform::Steam);
        assert!("pc".parse::<Platform>().is_err());
        assert_eq!("squad-fpp".parse::<GameMode>().unwrap(), GameMode::SquadFpp);
        assert_eq!(GameMode::DuoFpp.to_string(), "duo-fpp");
    }

    #[test]
    fn test_parse_player() {
        let body = json!({
            "data": [{
                "type": "player",
                "id": "account.abc",
                "attributes": { "name": "chocoTaco", "shardId": "steam" },
                "relationships": { "matches": { "data": [
                    { "type": "match", "id": "m1" },
                    { "type": "match", "id": "m2" }
                ]}}
            }]
        });
        let player = parse_player(&body, Platform::Steam).unwrap();
        assert_eq!(player.id, "account.abc");
        assert_eq!(player.name, "chocoTaco");
        assert_eq!(player.match_ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_empty_player_list_is_not_found() {
        let err = parse_player(&json!({ "data": [] }), Platform::Psn).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_player_stats() {
        let body = json!({
            "data": {
                "type": "playerSeason",
                "attributes": { "gameModeStats": {
                    "solo": { "roundsPlayed": 10, "wins": 2, "kills": 31, "damageDealt": 2200.5 },
                    "squad-fpp": { "roundsPlayed": 4 }
                }},
                "relationships": { "player": { "data": { "type": "player", "id": "account.abc" } } }
            }
        });
        let stats = parse_player_stats(&body, "account.abc", None).unwrap();
        let solo = stats.mode(GameMode::Solo).unwrap();
        assert_eq!(solo.rounds_played, 10);
        assert_eq!(solo.kills, 31);
        assert_eq!(solo.damage_dealt, 2200.5);
        assert_eq!(stats.mode(GameMode::SquadFpp).unwrap().wins, 0);
        assert!(stats.season_id.is_none());
    }

    #[test]
    fn test_stats_without_modes_is_invalid() {
        let err = parse_player_stats(&json!({ "data": {} }), "p", Some("s1")).unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidResponse { .. }));
    }

    #[test]
    fn test_current_season() {
        let body = json!({ "data": [
            { "type": "season", "id": "s-1", "attributes": { "isCurrentSeason": false, "isOffseason": false } },
            { "type": "season", "id": "s-2", "attributes": { "isCurrentSeason": true, "isOffseason": false } }
        ]});
        let current = current_season(parse_seasons(&body).unwrap()).unwrap();
        assert_eq!(current.id, "s-2");
    }

    #[test]
    fn test_parse_leaderboard_sorted_by_rank() {
        let body = json!({
            "data": { "type": "leaderboard", "id": "lb" },
            "included": [
                { "type": "player", "id": "b", "attributes": { "name": "B", "rank": 2, "stats": { "rankPoints": 4000.0, "wins": 20, "games": 90, "kills": 300 } } },
                { "type": "player", "id": "a", "attributes": { "name": "A", "rank": 1, "stats": { "rankPoints": 4100.0, "wins": 25, "games": 80, "kills": 320 } } }
            ]
        });
        let entries = parse_leaderboard(&body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].player_id, "a");
        assert_eq!(entries[1].rank_points, 4000.0);
    }

    #[test]
    fn test_parse_match_counts_participants() {
        let body = json!({
            "data": { "type": "match", "id": "m1", "attributes": {
                "gameMode": "squad-fpp", "mapName": "Baltic_Main", "duration": 1800,
                "createdAt": "2024-01-01T00:00:00Z", "isCustomMatch": false
            }},
            "included": [
                { "type": "participant", "id": "p1" },
                { "type": "participant", "id": "p2" },
                { "type": "roster", "id": "r1" }
            ]
        });
        let m = parse_match(&body).unwrap();
        assert_eq!(m.map_name, "Baltic_Main");
        assert_eq!(m.duration_secs, 1800);
        assert_eq!(m.participant_count, 2);
    }

    #[test]
    fn test_fetched_helpers() {
        let stale: Fetched<u32> = Fetched::Stale {
            value: 7,
            stored_at_ms: 1,
            cause: UpstreamError::timeout(std::time::Duration::from_secs(1)),
        };
        assert!(stale.is_stale());
        assert_eq!(stale.value(), Some(&7));
        assert_eq!(stale.map(|v| v * 2).into_value(), Some(14));
        assert_eq!(Fetched::<u32>::NotFound.source(), "not_found");
    }
}
