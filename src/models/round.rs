//! Round and step records.
//!
//! These are the shapes mirrored into the local key-value store, so their JSON form
//! keeps camelCase keys and millisecond timestamps.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use chrono::{DateTime, Local, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time truncated to the millisecond precision rounds are stored with.
pub fn now_ms() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// What the guard did at one point of the round.
///
/// Rounds recorded before the English names were introduced carry the French button
/// labels, which are still accepted when loading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum RoundAction {
    #[serde(alias = "Tout droit")]
    Forward,
    #[serde(alias = "Reculer")]
    Backward,
    #[serde(alias = "Gauche")]
    Left,
    #[serde(alias = "Droite")]
    Right,
    #[serde(alias = "Marche")]
    Walk,
    #[serde(alias = "Pointeaux")]
    CheckPoints,
    #[serde(alias = "Porte")]
    Door,
    #[serde(alias = "Étage")]
    Floor,
    #[serde(alias = "Position")]
    Position,
}

impl RoundAction {
    pub const ALL: [RoundAction; 9] = [
        RoundAction::Forward,
        RoundAction::Backward,
        RoundAction::Left,
        RoundAction::Right,
        RoundAction::Walk,
        RoundAction::CheckPoints,
        RoundAction::Door,
        RoundAction::Floor,
        RoundAction::Position,
    ];

    /// Movement actions carry step counts; the rest are checkpoint markers.
    pub fn is_movement(&self) -> bool {
        matches!(
            self,
            RoundAction::Forward
                | RoundAction::Backward
                | RoundAction::Left
                | RoundAction::Right
                | RoundAction::Walk
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundAction::Forward => "forward",
            RoundAction::Backward => "backward",
            RoundAction::Left => "left",
            RoundAction::Right => "right",
            RoundAction::Walk => "walk",
            RoundAction::CheckPoints => "checkPoints",
            RoundAction::Door => "door",
            RoundAction::Floor => "floor",
            RoundAction::Position => "position",
        }
    }

    pub fn label_fr(&self) -> &'static str {
        match self {
            RoundAction::Forward => "Tout droit",
            RoundAction::Backward => "Reculer",
            RoundAction::Left => "Gauche",
            RoundAction::Right => "Droite",
            RoundAction::Walk => "Marche",
            RoundAction::CheckPoints => "Pointeaux",
            RoundAction::Door => "Porte",
            RoundAction::Floor => "Étage",
            RoundAction::Position => "Position",
        }
    }
}

impl fmt::Display for RoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundAction {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        RoundAction::ALL
            .into_iter()
            .find(|action| {
                action.as_str().eq_ignore_ascii_case(value) || action.label_fr() == value
            })
            .ok_or_else(|| anyhow!("unknown round action '{value}'"))
    }
}

/// One recorded event. Never mutated once appended to a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundStep {
    pub id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub action: RoundAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Measured or estimated steps walked for this event.
    #[serde(default)]
    pub steps: u32,
    /// Validation target shown next to `steps`; never overwrites it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_steps: Option<u32>,
    /// Meters, only present when distance estimation was active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Caller-supplied part of a step; the recorder fills in counts and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStep {
    pub action: RoundAction,
    pub direction: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl NewStep {
    pub fn new(action: RoundAction) -> Self {
        Self {
            action,
            direction: None,
            location: None,
            notes: None,
        }
    }

    pub fn direction(mut self, direction: impl Into<String>) -> Self {
        self.direction = Some(direction.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl RoundStep {
    /// Builds a step, dropping movement-only fields for marker actions.
    pub fn record(
        input: NewStep,
        steps: u32,
        distance: Option<f64>,
        expected_steps: Option<u32>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let movement = input.action.is_movement();
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            action: input.action,
            direction: if movement { input.direction } else { None },
            steps: if movement { steps } else { 0 },
            expected_steps: if movement { expected_steps } else { None },
            distance: if movement { distance } else { None },
            location: input.location,
            notes: input.notes,
        }
    }
}

/// Options for opening a new round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartRound {
    pub name: Option<String>,
    pub site_id: Option<String>,
    pub site_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundData {
    pub id: String,
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_time: Option<DateTime<Utc>>,
    pub steps: Vec<RoundStep>,
    /// Sum of `steps` over movement actions, kept up to date on every append.
    #[serde(default)]
    pub total_steps: u32,
    #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
}

impl RoundData {
    pub fn begin(options: StartRound, user_id: Option<String>, start_time: DateTime<Utc>) -> Self {
        let name = options
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_round_name(start_time));

        Self {
            id: Uuid::new_v4().to_string(),
            name,
            start_time,
            end_time: None,
            steps: Vec::new(),
            total_steps: 0,
            duration_ms: None,
            user_id,
            site_id: options.site_id,
            site_name: options.site_name,
            notes: options.notes,
            is_completed: false,
        }
    }

    pub(crate) fn push_step(&mut self, step: RoundStep) {
        if step.action.is_movement() {
            self.total_steps = self.total_steps.saturating_add(step.steps);
        }
        self.steps.push(step);
    }

    /// Sets the end time and duration. Has no effect on an already completed round.
    pub(crate) fn finalize(&mut self, end_time: DateTime<Utc>) {
        if self.is_completed {
            return;
        }
        let end_time = end_time.max(self.start_time);
        self.end_time = Some(end_time);
        self.duration_ms = Some((end_time - self.start_time).num_milliseconds().max(0) as u64);
        self.is_completed = true;
    }

    /// Full scan of the step log; `total_steps` must always agree with it.
    pub fn recount_steps(&self) -> u32 {
        self.steps
            .iter()
            .filter(|step| step.action.is_movement())
            .fold(0u32, |total, step| total.saturating_add(step.steps))
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0) as u64
    }
}

fn default_round_name(start_time: DateTime<Utc>) -> String {
    format!(
        "Ronde {}",
        start_time.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S")
    )
}
