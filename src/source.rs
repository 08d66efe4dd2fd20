use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::LeagueConfig;
use crate::records::EventBundle;
use crate::schedule::ScheduleUnit;

/// Where normalized event bundles come from. Implementations stand in for
/// the download agent plus normalizer; a provider outage shows up as a
/// bundle side set to `None`, not as an error.
pub trait EventSource: Send + Sync {
    fn events(&self, league: &LeagueConfig, unit: &ScheduleUnit) -> Result<Vec<EventBundle>>;
}

/// Reads `<root>/<league>/<unit-label>/*.json`, one bundle per file, in file
/// name order. A missing unit directory means no events that day or week.
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn unit_dir(&self, league: &LeagueConfig, unit: &ScheduleUnit) -> PathBuf {
        self.root.join(&league.league_id).join(unit.label())
    }
}

impl EventSource for JsonDirSource {
    fn events(&self, league: &LeagueConfig, unit: &ScheduleUnit) -> Result<Vec<EventBundle>> {
        let dir = self.unit_dir(league, unit);
        if !dir.is_dir() {
            debug!(league = %league.league_id, unit = %unit.label(), "no event directory");
            return Ok(Vec::new());
        }
        let mut files = fs::read_dir(&dir)
            .with_context(|| format!("list events in {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        files.sort();

        let mut out = Vec::with_capacity(files.len());
        for path in files {
            match read_bundle(&path) {
                Ok(bundle) => out.push(bundle),
                Err(err) => warn!(file = %path.display(), "skipping event file: {err:#}"),
            }
        }
        Ok(out)
    }
}

fn read_bundle(path: &Path) -> Result<EventBundle> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let fallback = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(EventBundle::from_json(&raw, &fallback)?)
}
