//! Offline transport.
//!
//! Serves deterministic synthetic JSON:API documents for local development
//! and demos. Numbers are derived from a blake3 digest of the request
//! identifiers, so the same player always has the same stats.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::upstream::error::UpstreamError;
use crate::upstream::transport::{Transport, UpstreamRequest, UpstreamResponse};
use crate::upstream::types::GameMode;

const SEASONS: [&str; 3] = [
    "division.bro.official.pc-2018-28",
    "division.bro.official.pc-2018-29",
    "division.bro.official.pc-2018-30",
];

#[derive(Debug, Default, Clone)]
pub struct OfflineTransport;

impl OfflineTransport {
    pub fn new() -> Self {
        Self
    }
}

/// Deterministic number in `0..modulo` for a seed.
fn derive(seed: &str, salt: &str, modulo: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(seed.as_bytes());
    hasher.update(b"/");
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes) % modulo.max(1)
}

fn player_id(name: &str) -> String {
    let digest = blake3::hash(name.to_ascii_lowercase().as_bytes());
    format!("account.{}", &digest.to_hex()[..32])
}

fn not_found(what: &str) -> UpstreamError {
    UpstreamError::from_status(404, format!("{} not found", what), None)
}

fn players(platform: &str, request: &UpstreamRequest) -> Result<Value, UpstreamError> {
    let names = request
        .params
        .iter()
        .find(|(k, _)| k == "filter[playerNames]")
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| UpstreamError::from_status(400, "filter[playerNames] is required", None))?;

    let data: Vec<Value> = names
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|name| {
            let id = player_id(name);
            let matches: Vec<Value> = (0..3)
                .map(|i| json!({ "type": "match", "id": format!("offline-{}-{}", &id[8..16], i) }))
                .collect();
            json!({
                "type": "player",
                "id": id,
                "attributes": { "name": name, "shardId": platform },
                "relationships": { "matches": { "data": matches } }
            })
        })
        .collect();
    Ok(json!({ "data": data }))
}

fn player_season(player: &str, season: &str) -> Value {
    let seed = format!("{}:{}", player, season);
    let mut modes = Map::new();
    for mode in GameMode::ALL {
        let rounds = derive(&seed, mode.as_str(), 200);
        let wins = derive(&seed, &format!("{}-wins", mode), rounds / 8 + 1);
        modes.insert(
            mode.as_str().to_string(),
            json!({
                "roundsPlayed": rounds,
                "wins": wins,
                "top10s": wins * 3,
                "losses": rounds - wins,
                "kills": derive(&seed, &format!("{}-kills", mode), rounds * 3 + 1),
                "assists": derive(&seed, &format!("{}-assists", mode), rounds + 1),
                "headshotKills": derive(&seed, &format!("{}-hs", mode), rounds + 1),
                "damageDealt": derive(&seed, &format!("{}-dmg", mode), 250 * rounds + 1) as f64,
                "longestKill": derive(&seed, &format!("{}-lk", mode), 600) as f64,
                "timeSurvived": (rounds * 900) as f64
            }),
        );
    }
    json!({
        "data": {
            "type": "playerSeason",
            "attributes": { "gameModeStats": modes },
            "relationships": {
                "player": { "data": { "type": "player", "id": player } },
                "season": { "data": { "type": "season", "id": season } }
            }
        }
    })
}

fn seasons() -> Value {
    let last = SEASONS.len() - 1;
    let data: Vec<Value> = SEASONS
        .iter()
        .enumerate()
        .map(|(i, id)| {
            json!({
                "type": "season",
                "id": id,
                "attributes": { "isCurrentSeason": i == last, "isOffseason": false }
            })
        })
        .collect();
    json!({ "data": data })
}

fn leaderboard(platform: &str, season: &str, mode: &str) -> Value {
    let seed = format!("{}:{}:{}", platform, season, mode);
    let included: Vec<Value> = (1..=10u64)
        .map(|rank| {
            let name = format!("offline_{}_{}", mode.replace('-', "_"), rank);
            json!({
                "type": "player",
                "id": player_id(&name),
                "attributes": {
                    "name": name,
                    "rank": rank,
                    "stats": {
                        "rankPoints": 5000.0 - (rank as f64) * 37.5,
                        "wins": 60 - rank * 3,
                        "games": 150 + derive(&seed, &rank.to_string(), 50),
                        "kills": 900 - rank * 40
                    }
                }
            })
        })
        .collect();
    json!({
        "data": {
            "type": "leaderboard",
            "id": season,
            "attributes": { "shardId": platform, "gameMode": mode }
        },
        "included": included
    })
}

fn match_doc(id: &str, platform: &str) -> Value {
    let mode = GameMode::ALL[derive(id, "mode", GameMode::ALL.len() as u64) as usize];
    let maps = ["Baltic_Main", "Desert_Main", "Tiger_Main", "Savage_Main"];
    let map = maps[derive(id, "map", maps.len() as u64) as usize];
    let participants = 60 + derive(id, "participants", 40);
    let included: Vec<Value> = (0..participants)
        .map(|i| json!({ "type": "participant", "id": format!("{}-p{}", id, i) }))
        .collect();
    json!({
        "data": {
            "type": "match",
            "id": id,
            "attributes": {
                "gameMode": mode.as_str(),
                "mapName": map,
                "duration": 1200 + derive(id, "duration", 800),
                "createdAt": "2024-01-01T00:00:00Z",
                "shardId": platform,
                "isCustomMatch": false
            }
        },
        "included": included
    })
}

#[async_trait]
impl Transport for OfflineTransport {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        let body = match segments.as_slice() {
            ["status"] => json!({ "data": { "type": "status", "id": "offline" } }),
            ["shards", platform, "players"] => players(platform, &request)?,
            ["shards", _, "players", player, "seasons", season] => player_season(player, season),
            ["shards", _, "seasons"] => seasons(),
            ["shards", platform, "leaderboards", season, mode] => {
                if !SEASONS.contains(season) {
                    return Err(not_found("season"));
                }
                leaderboard(platform, season, mode)
            }
            ["shards", platform, "matches", id] => match_doc(id, platform),
            _ => return Err(not_found(&request.path)),
        };
        Ok(UpstreamResponse { status: 200, body })
    }

    fn name(&self) -> &'static str {
        "offline"
    }
}
