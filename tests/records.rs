use std::fs;
use std::path::PathBuf;

use serde_json::json;

use league_signals::error::SignalError;
use league_signals::records::{EventBundle, EventReport, GameStatus};

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn report() -> serde_json::Value {
    json!({
        "provider": "espn",
        "game": {
            "game_id": "401700001",
            "date": "2025-11-03",
            "season": "2025-26",
            "home_team_id": "2",
            "away_team_id": "17",
            "status": "final"
        },
        "teams": [
            { "team_id": "2", "display_name": "Boston Celtics" },
            { "team_id": "17", "display_name": "Brooklyn Nets" }
        ],
        "players": [
            { "player_id": "1", "first_name": "Jayson", "last_name": "Tatum", "team_id": "2" }
        ],
        "team_stats": [
            { "group": "team", "team_id": "2", "counters": { "pts": 112 } }
        ],
        "player_stats": [
            { "group": "player", "player_id": "1", "counters": { "pts": 31 } }
        ]
    })
}

#[test]
fn parses_bundle_fixture() {
    let bundle = EventBundle::from_json(
        &read_fixture("events/nba/2025-11-03/401700001.json"),
        "fallback",
    )
    .expect("fixture should parse");
    assert_eq!(bundle.event, "401700001");

    let primary = bundle.primary.expect("primary report");
    assert!(primary.is_final());
    assert_eq!(primary.game.home_score, Some(112));
    assert_eq!(primary.game.venue, None);
    assert_eq!(primary.player("4065648").unwrap().full_name(), "Jayson Tatum");
    assert_eq!(primary.team_line("team", "17").unwrap().counters["pts"], 104.0);

    let secondary = bundle.secondary.expect("secondary report");
    assert_eq!(secondary.provider, "yahoo");
    assert_eq!(secondary.game.venue.as_deref(), Some("TD Garden"));
    assert!(secondary.player_line("player", "nba.p.6014").is_some());
}

#[test]
fn null_side_is_a_missing_report() {
    let bundle = EventBundle::from_json(&read_fixture("bundle_primary_only.json"), "evt-7")
        .expect("fixture should parse");
    assert_eq!(bundle.event, "evt-7");
    assert!(bundle.secondary.is_none());
    assert_eq!(bundle.primary.unwrap().game.status, GameStatus::InProgress);
}

#[test]
fn status_defaults_to_scheduled() {
    let mut raw = report();
    raw["game"].as_object_mut().unwrap().remove("status");
    let parsed = EventReport::from_value(raw).unwrap();
    assert_eq!(parsed.game.status, GameStatus::Scheduled);
    assert!(!parsed.is_final());
}

#[test]
fn player_on_a_team_not_playing_is_rejected() {
    let mut raw = report();
    raw["players"][0]["team_id"] = json!("5");
    let err = EventReport::from_value(raw).unwrap_err();
    assert!(matches!(err, SignalError::InvalidRecord(ref msg) if msg.contains("not playing")));
}

#[test]
fn negative_counters_are_rejected() {
    let mut raw = report();
    raw["team_stats"][0]["counters"]["pts"] = json!(-3);
    assert!(matches!(
        EventReport::from_value(raw),
        Err(SignalError::InvalidRecord(_))
    ));
}

#[test]
fn lines_must_reference_listed_entities() {
    let mut raw = report();
    raw["player_stats"][0]["player_id"] = json!("99");
    assert!(EventReport::from_value(raw).is_err());

    let mut raw = report();
    raw["teams"].as_array_mut().unwrap().pop();
    assert!(EventReport::from_value(raw).is_err());
}

#[test]
fn malformed_json_is_an_invalid_record() {
    let err = EventBundle::from_json("{ not json", "x").unwrap_err();
    assert!(err.to_string().starts_with("invalid record"));
}
