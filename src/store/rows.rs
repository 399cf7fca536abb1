//! Table-store row shapes and their mapping to [`RoundData`].

use chrono::{DateTime, Utc};

use crate::models::{RoundAction, RoundData, RoundStep};

#[derive(Debug, Clone, PartialEq)]
pub struct RoundRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_steps: u32,
    pub duration_ms: Option<u64>,
    pub site_id: Option<String>,
    pub site_name: Option<String>,
    pub notes: Option<String>,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRow {
    pub round_id: String,
    /// 1-based position in the round.
    pub step_number: u32,
    pub step_id: String,
    pub action: RoundAction,
    pub direction: Option<String>,
    pub steps_count: u32,
    pub expected_steps: Option<u32>,
    pub distance_m: Option<f64>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One round row joined with its step rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRecord {
    pub round: RoundRow,
    pub steps: Vec<StepRow>,
}

impl RoundRecord {
    pub fn from_round(round: &RoundData, user_id: &str) -> Self {
        let steps = round
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepRow {
                round_id: round.id.clone(),
                step_number: index as u32 + 1,
                step_id: step.id.clone(),
                action: step.action,
                direction: step.direction.clone(),
                steps_count: step.steps,
                expected_steps: step.expected_steps,
                distance_m: step.distance,
                location: step.location.clone(),
                notes: step.notes.clone(),
                timestamp: step.timestamp,
            })
            .collect();

        Self {
            round: RoundRow {
                id: round.id.clone(),
                user_id: user_id.to_string(),
                name: round.name.clone(),
                start_time: round.start_time,
                end_time: round.end_time,
                total_steps: round.total_steps,
                duration_ms: round.duration_ms,
                site_id: round.site_id.clone(),
                site_name: round.site_name.clone(),
                notes: round.notes.clone(),
                is_completed: round.is_completed,
            },
            steps,
        }
    }

    /// Rebuilds the round with steps in `step_number` order, whatever order the
    /// backend returned them in.
    pub fn into_round(self) -> RoundData {
        let RoundRecord { round, mut steps } = self;
        steps.sort_by_key(|row| row.step_number);

        RoundData {
            id: round.id,
            name: round.name,
            start_time: round.start_time,
            end_time: round.end_time,
            steps: steps
                .into_iter()
                .map(|row| RoundStep {
                    id: row.step_id,
                    timestamp: row.timestamp,
                    action: row.action,
                    direction: row.direction,
                    steps: row.steps_count,
                    expected_steps: row.expected_steps,
                    distance: row.distance_m,
                    location: row.location,
                    notes: row.notes,
                })
                .collect(),
            total_steps: round.total_steps,
            duration_ms: round.duration_ms,
            user_id: Some(round.user_id),
            site_id: round.site_id,
            site_name: round.site_name,
            notes: round.notes,
            is_completed: round.is_completed,
        }
    }
}
