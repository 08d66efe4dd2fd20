use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::formula::{Aggregation, MetricFormula, RatioSpec, Side, Terms};
use crate::identity::EntityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Basketball,
    Football,
    Baseball,
}

impl Sport {
    pub fn as_str(self) -> &'static str {
        match self {
            Sport::Basketball => "basketball",
            Sport::Football => "football",
            Sport::Baseball => "baseball",
        }
    }
}

/// One family of stat lines, e.g. team box scores or pitcher lines.
#[derive(Debug, Clone)]
pub struct SampleGroup {
    pub name: &'static str,
    pub entity_type: EntityType,
    /// Team groups are joined with the opponent's line from the same game.
    pub paired: bool,
    /// What a "sample" is worth for the minimum-sample filter. `None` counts
    /// games; pitchers count innings instead.
    pub sample_weight: Option<Terms>,
    pub metrics: Vec<MetricFormula>,
}

#[derive(Debug, Clone)]
pub struct SportProfile {
    pub sport: Sport,
    pub game_minutes: f64,
    pub groups: Vec<SampleGroup>,
}

impl SportProfile {
    pub fn for_sport(sport: Sport) -> &'static SportProfile {
        match sport {
            Sport::Basketball => &BASKETBALL,
            Sport::Football => &FOOTBALL,
            Sport::Baseball => &BASEBALL,
        }
    }

    pub fn group(&self, name: &str) -> Option<&SampleGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

static BASKETBALL: Lazy<SportProfile> = Lazy::new(|| SportProfile {
    sport: Sport::Basketball,
    game_minutes: 48.0,
    groups: vec![
        SampleGroup {
            name: "team",
            entity_type: EntityType::Team,
            paired: true,
            sample_weight: None,
            metrics: basketball_team_metrics(),
        },
        SampleGroup {
            name: "player",
            entity_type: EntityType::Player,
            paired: false,
            sample_weight: None,
            metrics: basketball_player_metrics(),
        },
    ],
});

static FOOTBALL: Lazy<SportProfile> = Lazy::new(|| SportProfile {
    sport: Sport::Football,
    game_minutes: 60.0,
    groups: vec![SampleGroup {
        name: "team",
        entity_type: EntityType::Team,
        paired: true,
        sample_weight: None,
        metrics: football_team_metrics(),
    }],
});

static BASEBALL: Lazy<SportProfile> = Lazy::new(|| SportProfile {
    sport: Sport::Baseball,
    game_minutes: 9.0,
    groups: vec![
        SampleGroup {
            name: "team",
            entity_type: EntityType::Team,
            paired: true,
            sample_weight: None,
            metrics: baseball_team_metrics(),
        },
        SampleGroup {
            name: "batter",
            entity_type: EntityType::Player,
            paired: false,
            sample_weight: Some(Terms::own("ab")),
            metrics: baseball_batter_metrics(),
        },
        SampleGroup {
            name: "pitcher",
            entity_type: EntityType::Player,
            paired: false,
            sample_weight: Some(innings()),
            metrics: baseball_pitcher_metrics(),
        },
    ],
});

fn ratio(num: Terms, den: Terms, scale: f64) -> Aggregation {
    Aggregation::Ratio(RatioSpec::new(num, den, scale))
}

fn pct(num: &str, den: &str) -> Aggregation {
    ratio(Terms::own(num), Terms::own(den), 100.0)
}

fn basketball_team_metrics() -> Vec<MetricFormula> {
    vec![
        MetricFormula::new("pts", "PTS", true, Aggregation::Mean(Terms::own("pts"))),
        MetricFormula::new("pts_median", "PTS (median)", true, Aggregation::Median(Terms::own("pts"))),
        MetricFormula::new("opp_pts", "OPP PTS", false, Aggregation::Mean(Terms::opp("pts"))),
        MetricFormula::new("fg_pct", "FG%", true, pct("fgm", "fga")),
        MetricFormula::new("fg3_pct", "3P%", true, pct("fg3m", "fg3a")),
        MetricFormula::new(
            "fg2_pct",
            "2P%",
            true,
            ratio(
                Terms::own("fgm").minus("fg3m"),
                Terms::own("fga").minus("fg3a"),
                100.0,
            ),
        ),
        MetricFormula::new("ft_pct", "FT%", true, pct("ftm", "fta")),
        MetricFormula::new(
            "efg_pct",
            "eFG%",
            true,
            ratio(
                Terms::own("fgm").with(0.5, Side::Own, "fg3m"),
                Terms::own("fga"),
                100.0,
            ),
        ),
        MetricFormula::new(
            "ts_pct",
            "TS%",
            true,
            ratio(
                Terms::own("pts"),
                Terms(Vec::new())
                    .with(2.0, Side::Own, "fga")
                    .with(0.88, Side::Own, "fta"),
                100.0,
            ),
        ),
        MetricFormula::new(
            "oreb_pct",
            "OREB%",
            true,
            Aggregation::ShareOfSum {
                part: Terms::own("oreb"),
                other: Terms::opp("dreb"),
            },
        ),
        MetricFormula::new(
            "dreb_pct",
            "DREB%",
            true,
            Aggregation::ShareOfSum {
                part: Terms::own("dreb"),
                other: Terms::opp("oreb"),
            },
        ),
        MetricFormula::new("tov_rate", "TOV%", false, pct("tov", "poss")),
        MetricFormula::new("ast_ratio", "AST/FGM", true, pct("ast", "fgm")),
        MetricFormula::new("ast_tov", "AST/TOV", true, ratio(Terms::own("ast"), Terms::own("tov"), 1.0)),
        MetricFormula::new("off_rating", "ORTG", true, pct("pts", "poss")),
        MetricFormula::new(
            "def_rating",
            "DRTG",
            false,
            ratio(Terms::opp("pts"), Terms::opp("poss"), 100.0),
        ),
        MetricFormula::new(
            "net_rating",
            "NET",
            true,
            Aggregation::EfficiencyDiff {
                off: RatioSpec::new(Terms::own("pts"), Terms::own("poss"), 100.0),
                def: RatioSpec::new(Terms::opp("pts"), Terms::opp("poss"), 100.0),
            },
        ),
        MetricFormula::new("pace", "PACE", true, Aggregation::Mean(Terms::own("poss"))),
        MetricFormula::new(
            "clutch_ts_pct",
            "Clutch TS%",
            true,
            ratio(
                Terms::own("clutch_pts"),
                Terms(Vec::new())
                    .with(2.0, Side::Own, "clutch_fga")
                    .with(0.88, Side::Own, "clutch_fta"),
                100.0,
            ),
        ),
    ]
}

fn basketball_player_metrics() -> Vec<MetricFormula> {
    let per_game = |stat: Terms| Aggregation::MinuteRate {
        stat,
        minutes: Terms::own("min"),
    };
    vec![
        MetricFormula::new("min", "MIN", true, Aggregation::Mean(Terms::own("min"))),
        MetricFormula::new("pts_rate", "PTS/G-MIN", true, per_game(Terms::own("pts"))),
        MetricFormula::new(
            "reb_rate",
            "REB/G-MIN",
            true,
            per_game(Terms::own("oreb").plus("dreb")),
        ),
        MetricFormula::new("ast_rate", "AST/G-MIN", true, per_game(Terms::own("ast"))),
        MetricFormula::new("tov_rate", "TOV/G-MIN", false, per_game(Terms::own("tov"))),
        MetricFormula::new("fg3_pct", "3P%", true, pct("fg3m", "fg3a")),
        MetricFormula::new(
            "ts_pct",
            "TS%",
            true,
            ratio(
                Terms::own("pts"),
                Terms(Vec::new())
                    .with(2.0, Side::Own, "fga")
                    .with(0.88, Side::Own, "fta"),
                100.0,
            ),
        ),
    ]
}

fn football_team_metrics() -> Vec<MetricFormula> {
    vec![
        MetricFormula::new("pts", "PTS", true, Aggregation::Mean(Terms::own("pts"))),
        MetricFormula::new("opp_pts", "OPP PTS", false, Aggregation::Mean(Terms::opp("pts"))),
        MetricFormula::new("yds_per_play", "YDS/PLAY", true, ratio(Terms::own("yds"), Terms::own("plays"), 1.0)),
        MetricFormula::new(
            "opp_yds_per_play",
            "OPP YDS/PLAY",
            false,
            ratio(Terms::opp("yds"), Terms::opp("plays"), 1.0),
        ),
        MetricFormula::new(
            "rush_ypc",
            "RUSH YPC",
            true,
            ratio(Terms::own("rush_yds"), Terms::own("rush_att"), 1.0),
        ),
        MetricFormula::new("comp_pct", "CMP%", true, pct("pass_cmp", "pass_att")),
        MetricFormula::new("third_down_pct", "3RD%", true, pct("third_down_conv", "third_down_att")),
        MetricFormula::new(
            "turnover_margin",
            "TO +/-",
            true,
            Aggregation::Mean(Terms::opp("turnovers").minus("turnovers")),
        ),
        MetricFormula::new(
            "pass_rush",
            "PASS RUSH",
            true,
            ratio(
                Terms::own("sacks").plus("qb_hits"),
                Terms::opp("pass_plays"),
                100.0,
            ),
        ),
        MetricFormula::new(
            "pass_protect",
            "PASS PRO",
            false,
            ratio(
                Terms::opp("sacks").plus_opp("qb_hits"),
                Terms::own("pass_plays"),
                100.0,
            ),
        ),
        MetricFormula::new(
            "pass_cover",
            "COVERAGE",
            true,
            Aggregation::RatioDiff {
                left: RatioSpec::new(
                    Terms::own("pass_def").plus("ints"),
                    Terms::opp("pass_plays"),
                    1.0,
                ),
                right: RatioSpec::new(Terms::opp("pass_cmp"), Terms::opp("pass_att"), 1.0),
            },
        ),
    ]
}

fn baseball_team_metrics() -> Vec<MetricFormula> {
    vec![
        MetricFormula::new("runs", "R", true, Aggregation::Mean(Terms::own("r"))),
        MetricFormula::new("opp_runs", "OPP R", false, Aggregation::Mean(Terms::opp("r"))),
        MetricFormula::new("obp", "OBP", true, on_base()),
        MetricFormula::new(
            "lob_pct",
            "LOB%",
            false,
            Aggregation::ShareOfSum {
                part: Terms::own("lob"),
                other: Terms::own("rbi"),
            },
        ),
    ]
}

fn baseball_batter_metrics() -> Vec<MetricFormula> {
    vec![
        MetricFormula::new("avg", "AVG", true, ratio(Terms::own("h"), Terms::own("ab"), 1.0)),
        MetricFormula::new("obp", "OBP", true, on_base()),
        MetricFormula::new(
            "slg",
            "SLG",
            true,
            ratio(
                Terms::own("h")
                    .plus("doubles")
                    .with(2.0, Side::Own, "triples")
                    .with(3.0, Side::Own, "hr"),
                Terms::own("ab"),
                1.0,
            ),
        ),
        MetricFormula::new("hr", "HR", true, Aggregation::Sum(Terms::own("hr"))),
        MetricFormula::new("rbi", "RBI", true, Aggregation::Sum(Terms::own("rbi"))),
    ]
}

fn baseball_pitcher_metrics() -> Vec<MetricFormula> {
    vec![
        MetricFormula::new("era", "ERA", false, ratio(Terms::own("er"), innings(), 9.0)),
        MetricFormula::new(
            "whip",
            "WHIP",
            false,
            ratio(Terms::own("bb").plus("h"), innings(), 1.0),
        ),
        MetricFormula::new("k9", "K/9", true, ratio(Terms::own("k"), innings(), 9.0)),
    ]
}

fn on_base() -> Aggregation {
    ratio(Terms::own("bb").plus("h"), Terms::own("ab").plus("bb"), 1.0)
}

/// Innings pitched: whole innings plus extra outs (`6.2` = 6 + 2/3).
fn innings() -> Terms {
    Terms::own("ip_full").with(1.0 / 3.0, Side::Own, "ip_partial")
}
