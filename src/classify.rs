//! Resolve the concrete game behind an A2S answer.
//!
//! Steam AppIDs are authoritative. Only when the AppID is unknown do we
//! fall back to matching the free text game description.

use crate::info::ServerInfo;

/// Family name returned when nothing more specific matches.
pub const GENERIC_A2S: &str = "a2s";

const APP_IDS: &[(u32, &str)] = &[
    (730, "counter-strike"),
    (240, "counter-source"),
    (4000, "garrys-mod"),
    (440, "team-fortress-2"),
    (550, "left-4-dead-2"),
    (500, "left-4-dead"),
    (320, "half-life"),
    (300, "day-of-defeat-source"),
    (252490, "rust"),
    (346110, "ark-survival-evolved"),
    (222880, "insurgency"),
    (108600, "project-zomboid"),
    (526870, "satisfactory"),
    (251570, "7-days-to-die"),
    (892970, "valheim"),
    (107410, "arma-3"),
    (221100, "dayz"),
    (489940, "battalion-1944"),
];

/// Lowercase phrases, most specific first.
const DESCRIPTIONS: &[(&[&str], &str)] = &[
    (&["counter-strike 2", "cs2"], "counter-strike-2"),
    (&["counter-strike: global offensive", "csgo"], "counter-strike"),
    (&["counter-strike", "cs:"], "counter-strike"),
    (&["garrysmod", "garry", "gmod"], "garrys-mod"),
    (&["team fortress", "tf2"], "team-fortress-2"),
    (&["left 4 dead 2", "l4d2"], "left-4-dead-2"),
    (&["left 4 dead", "l4d"], "left-4-dead"),
    (&["rust"], "rust"),
    (&["ark", "survival evolved"], "ark-survival-evolved"),
    (&["insurgency"], "insurgency"),
    (&["day of defeat", "dod"], "day-of-defeat"),
    (&["project zomboid", "zomboid"], "project-zomboid"),
    (&["satisfactory"], "satisfactory"),
    (&["7 days to die", "7dtd"], "7-days-to-die"),
    (&["valheim"], "valheim"),
    (&["arma 3", "arma3"], "arma-3"),
    (&["dayz", "day z"], "dayz"),
    (&["battalion 1944", "battalion1944"], "battalion-1944"),
    (&["half-life", "hl2"], "half-life"),
];

pub fn game_from_app_id(app_id: u32) -> Option<&'static str> {
    APP_IDS
        .iter()
        .find(|(id, _)| *id == app_id)
        .map(|(_, game)| *game)
}

/// Case-insensitive phrase match; [GENERIC_A2S] when nothing matches.
pub fn game_from_description(description: &str) -> &'static str {
    let lower: String = description.to_lowercase();
    DESCRIPTIONS
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|phrase| lower.contains(phrase)))
        .map(|(_, game)| *game)
        .unwrap_or(GENERIC_A2S)
}

/// Game identifier for an A2S result, read from its `app_id` and `game`
/// extras and falling back to the server name.
pub fn classify_a2s(info: &ServerInfo) -> String {
    if !info.online {
        return GENERIC_A2S.to_owned();
    }

    let by_app_id: Option<&'static str> = info
        .extra("app_id")
        .and_then(|id| id.trim().parse::<u32>().ok())
        .and_then(game_from_app_id);
    if let Some(game) = by_app_id {
        return game.to_owned();
    }

    let description: &str = match info.extra("game") {
        Some(game) if !game.is_empty() => game,
        _ => &info.name,
    };
    game_from_description(description).to_owned()
}
