use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::round::{RoundAction, RoundData};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum StatusFilter {
    #[default]
    All,
    Completed,
    Incomplete,
}

/// Selection applied to a round listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundFilter {
    pub site_id: Option<String>,
    pub status: StatusFilter,
    /// Case-insensitive match against name, site name and notes.
    pub query: Option<String>,
}

impl RoundFilter {
    pub fn matches(&self, round: &RoundData) -> bool {
        if let Some(site_id) = &self.site_id {
            if round.site_id.as_deref() != Some(site_id.as_str()) {
                return false;
            }
        }

        match self.status {
            StatusFilter::Completed if !round.is_completed => return false,
            StatusFilter::Incomplete if round.is_completed => return false,
            _ => {}
        }

        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => {
                let query = query.to_lowercase();
                [
                    Some(round.name.as_str()),
                    round.site_name.as_deref(),
                    round.notes.as_deref(),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&query))
            }
            _ => true,
        }
    }
}

/// Keeps matching rounds, most recent start first.
pub fn select_rounds(mut rounds: Vec<RoundData>, filter: Option<&RoundFilter>) -> Vec<RoundData> {
    if let Some(filter) = filter {
        rounds.retain(|round| filter.matches(round));
    }
    rounds.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    rounds
}

/// Per-round breakdown used by the review screens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    pub action_counts: BTreeMap<RoundAction, usize>,
    pub movement_actions: usize,
    pub marker_actions: usize,
    pub walked_steps: u32,
    pub distance_m: f64,
    /// Movement actions whose step count missed their validation target.
    pub off_target_actions: usize,
}

impl RoundStats {
    pub fn from_round(round: &RoundData) -> Self {
        let mut stats = RoundStats::default();
        for step in &round.steps {
            *stats.action_counts.entry(step.action).or_insert(0) += 1;
            if step.action.is_movement() {
                stats.movement_actions += 1;
                stats.walked_steps = stats.walked_steps.saturating_add(step.steps);
                stats.distance_m += step.distance.unwrap_or(0.0);
                if matches!(step.expected_steps, Some(expected) if expected != step.steps) {
                    stats.off_target_actions += 1;
                }
            } else {
                stats.marker_actions += 1;
            }
        }
        stats
    }
}
