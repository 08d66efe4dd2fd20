use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    Season,
    #[serde(rename = "2Weeks")]
    TwoWeeks,
    #[serde(rename = "1Month")]
    OneMonth,
    #[serde(rename = "2Months")]
    TwoMonths,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 4] = [
        TimeWindow::Season,
        TimeWindow::TwoWeeks,
        TimeWindow::OneMonth,
        TimeWindow::TwoMonths,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimeWindow::Season => "Season",
            TimeWindow::TwoWeeks => "2Weeks",
            TimeWindow::OneMonth => "1Month",
            TimeWindow::TwoMonths => "2Months",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|w| w.label().eq_ignore_ascii_case(raw.trim()))
    }

    fn lookback_days(self) -> Option<u64> {
        match self {
            TimeWindow::Season => None,
            TimeWindow::TwoWeeks => Some(14),
            TimeWindow::OneMonth => Some(31),
            TimeWindow::TwoMonths => Some(62),
        }
    }

    /// First date inside the window. Rolling windows never reach back past the
    /// season start.
    pub fn start_date(self, run_date: NaiveDate, season_start: NaiveDate) -> NaiveDate {
        match self.lookback_days() {
            None => season_start,
            Some(days) => run_date
                .checked_sub_days(Days::new(days))
                .map(|d| d.max(season_start))
                .unwrap_or(season_start),
        }
    }

    pub fn contains(self, date: NaiveDate, run_date: NaiveDate, season_start: NaiveDate) -> bool {
        date >= self.start_date(run_date, season_start) && date <= run_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    All,
    Away,
    Home,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::All, Split::Away, Split::Home];

    pub fn label(self) -> &'static str {
        match self {
            Split::All => "all",
            Split::Away => "away",
            Split::Home => "home",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.label().eq_ignore_ascii_case(raw.trim()))
    }

    pub fn admits(self, role: Role) -> bool {
        match self {
            Split::All => true,
            Split::Away => role == Role::Away,
            Split::Home => role == Role::Home,
        }
    }
}
