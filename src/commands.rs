//! Text commands for the line-oriented host.
//!
//! A line is `<command> [words...] [; key=value ...]`, for example
//! `start Night round; site=depot-3; notes=gate B open`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;

use crate::{
    models::{NewStep, RoundAction, RoundData, RoundFilter, RoundStats, RoundStep, StartRound,
        StatusFilter},
    recorder::{RecorderError, RecorderStatus},
    replay::ReplaySession,
    settings::{EstimationMode, SettingsError},
    AppState,
};

pub const HELP: &str = "\
recording:  start [name][; site=ID; site_name=NAME; notes=TEXT]
            step <action> [direction][; location=TEXT; notes=TEXT]
            motion <magnitude> | motion <x> <y> <z> | nosensor | sensor
            pause | resume | stop | status
rounds:     list [all|completed|incomplete] [search words][; site=ID]
            stats <id> | delete <id> | retry
recovery:   recoveries | restore <id> | discard <id>
replay:     replay <id> | guide <id> | next | prev | jump <n> | rewind | done
            play [interval_ms] | halt | close
settings:   settings | set <height|speed|expected|validation|mode|threshold|debounce> <value>
            help | quit
actions:    forward backward left right walk checkPoints door floor position";

const DEFAULT_AUTOPLAY_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(StartRound),
    Step(NewStep),
    Motion(f64),
    MotionVector(f64, f64, f64),
    SensorUnavailable,
    SensorAvailable,
    Pause,
    Resume,
    Stop,
    Status,
    List(RoundFilter),
    Stats(String),
    Delete(String),
    Retry,
    Recoveries,
    Restore(String),
    Discard(String),
    Replay(String),
    Guide(String),
    Next,
    Previous,
    Jump(usize),
    Rewind,
    Done,
    Play(Duration),
    Halt,
    Close,
    Settings,
    Set { field: String, value: String },
    Help,
    Quit,
}

impl Command {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let mut sections = line.split(';');
        let head = sections.next().unwrap_or_default();
        let options: Vec<(String, String)> = sections
            .filter_map(|section| section.split_once('='))
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let mut words = head.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "start" => {
                let mut start = StartRound::default();
                if !args.is_empty() {
                    start.name = Some(args.join(" "));
                }
                for (key, value) in options {
                    match key.as_str() {
                        "site" => start.site_id = Some(value),
                        "site_name" => start.site_name = Some(value),
                        "notes" => start.notes = Some(value),
                        other => bail!("unknown start option '{other}'"),
                    }
                }
                Command::Start(start)
            }
            "step" => {
                let (action, direction) = args
                    .split_first()
                    .ok_or_else(|| anyhow!("usage: step <action> [direction]"))?;
                let mut input = NewStep::new(action.parse::<RoundAction>()?);
                if !direction.is_empty() {
                    input = input.direction(direction.join(" "));
                }
                for (key, value) in options {
                    match key.as_str() {
                        "location" => input = input.location(value),
                        "notes" => input = input.notes(value),
                        other => bail!("unknown step option '{other}'"),
                    }
                }
                Command::Step(input)
            }
            "motion" => match args.as_slice() {
                [magnitude] => Command::Motion(parse_number(magnitude)?),
                [x, y, z] => {
                    Command::MotionVector(parse_number(x)?, parse_number(y)?, parse_number(z)?)
                }
                _ => bail!("usage: motion <magnitude> | motion <x> <y> <z>"),
            },
            "nosensor" => Command::SensorUnavailable,
            "sensor" => Command::SensorAvailable,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "list" => {
                let mut filter = RoundFilter::default();
                let mut query = Vec::new();
                for word in args {
                    match word.to_ascii_lowercase().as_str() {
                        "all" => filter.status = StatusFilter::All,
                        "completed" => filter.status = StatusFilter::Completed,
                        "incomplete" => filter.status = StatusFilter::Incomplete,
                        _ => query.push(word),
                    }
                }
                if !query.is_empty() {
                    filter.query = Some(query.join(" "));
                }
                for (key, value) in options {
                    match key.as_str() {
                        "site" => filter.site_id = Some(value),
                        other => bail!("unknown list option '{other}'"),
                    }
                }
                Command::List(filter)
            }
            "stats" => Command::Stats(single_id(&args, "stats")?),
            "delete" => Command::Delete(single_id(&args, "delete")?),
            "retry" => Command::Retry,
            "recoveries" => Command::Recoveries,
            "restore" => Command::Restore(single_id(&args, "restore")?),
            "discard" => Command::Discard(single_id(&args, "discard")?),
            "replay" => Command::Replay(single_id(&args, "replay")?),
            "guide" => Command::Guide(single_id(&args, "guide")?),
            "next" => Command::Next,
            "prev" | "previous" => Command::Previous,
            "jump" => {
                let position: usize = args
                    .first()
                    .ok_or_else(|| anyhow!("usage: jump <step number>"))?
                    .parse()
                    .context("step number must be a positive integer")?;
                Command::Jump(position.saturating_sub(1))
            }
            "rewind" => Command::Rewind,
            "done" => Command::Done,
            "play" => match args.first() {
                Some(raw) => Command::Play(Duration::from_millis(
                    raw.parse().context("interval must be a number of milliseconds")?,
                )),
                None => Command::Play(DEFAULT_AUTOPLAY_INTERVAL),
            },
            "halt" => Command::Halt,
            "close" => Command::Close,
            "settings" => Command::Settings,
            "set" => match args.as_slice() {
                [field, value] => Command::Set {
                    field: field.to_ascii_lowercase(),
                    value: value.to_string(),
                },
                _ => bail!("usage: set <field> <value>"),
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => bail!("unknown command '{other}', try 'help'"),
        };

        Ok(Some(command))
    }
}

pub async fn execute(state: &AppState, command: Command) -> Result<String> {
    let recorder = &state.recorder;

    match command {
        Command::Start(options) => {
            let round = recorder.start_round(options).await?;
            Ok(format!("Round {} started: {}", short_id(&round.id), round.name))
        }
        Command::Step(input) => {
            let step = recorder.add_step_with(input).await?;
            Ok(describe_step(&step))
        }
        Command::Motion(magnitude) => Ok(match recorder.ingest_motion(magnitude).await {
            Some(step) => describe_step(&step),
            None => "Sample ignored".to_string(),
        }),
        Command::MotionVector(x, y, z) => {
            Ok(match recorder.ingest_motion_vector(x, y, z).await {
                Some(step) => describe_step(&step),
                None => "Sample ignored".to_string(),
            })
        }
        Command::SensorAvailable => {
            recorder.mark_motion_available().await;
            Ok("Motion sensor enabled".to_string())
        }
        Command::SensorUnavailable => {
            recorder.mark_motion_unavailable().await;
            Ok("Motion sensor disabled, manual steps only".to_string())
        }
        Command::Pause => {
            recorder.pause().await?;
            Ok("Recording paused".to_string())
        }
        Command::Resume => {
            recorder.resume().await?;
            Ok("Recording resumed".to_string())
        }
        Command::Stop => match recorder.stop_round().await {
            Ok(round) => Ok(format!(
                "Round {} completed: {} events, {} steps, {}",
                short_id(&round.id),
                round.steps.len(),
                round.total_steps,
                format_duration(round.duration_ms.unwrap_or(0))
            )),
            Err(RecorderError::Persistence { round, source }) => Ok(format!(
                "Round {} completed but not saved ({source}); it is kept for 'retry'",
                short_id(&round.id)
            )),
            Err(err) => Err(err.into()),
        },
        Command::Status => {
            let snapshot = recorder.snapshot().await;
            if snapshot.status == RecorderStatus::Idle {
                return Ok("Idle".to_string());
            }
            let mut lines = vec![format!(
                "{:?}: {} ({})",
                snapshot.status,
                snapshot.round_name.unwrap_or_default(),
                format_duration(snapshot.elapsed_ms)
            )];
            lines.push(format!(
                "{} events, {} steps",
                snapshot.step_events, snapshot.total_steps
            ));
            match (snapshot.mode, snapshot.estimate) {
                (Some(EstimationMode::Timer), Some(estimate)) => lines.push(format!(
                    "estimate: {:.1} m, {} steps",
                    estimate.distance_m, estimate.step_count
                )),
                (Some(EstimationMode::Motion), _) if !snapshot.motion_available => {
                    lines.push("motion sensor unavailable".to_string())
                }
                (Some(EstimationMode::Motion), _) => {
                    lines.push(format!("motion steps: {}", snapshot.motion_steps))
                }
                _ => {}
            }
            Ok(lines.join("\n"))
        }
        Command::List(filter) => {
            let rounds = state.store.load(Some(&filter)).await?;
            if rounds.is_empty() {
                return Ok("No rounds".to_string());
            }
            Ok(rounds
                .iter()
                .map(describe_round)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Stats(id) => {
            let round = find_round(state, &id).await?;
            let stats = RoundStats::from_round(&round);
            let mut lines = vec![format!(
                "{}: {} movements, {} markers, {} steps, {:.1} m",
                round.name,
                stats.movement_actions,
                stats.marker_actions,
                stats.walked_steps,
                stats.distance_m
            )];
            lines.extend(
                stats
                    .action_counts
                    .iter()
                    .map(|(action, count)| format!("  {:<12} {count}", action.label_fr())),
            );
            if stats.off_target_actions > 0 {
                lines.push(format!(
                    "  {} movements off their expected step count",
                    stats.off_target_actions
                ));
            }
            Ok(lines.join("\n"))
        }
        Command::Delete(id) => {
            let round = find_round(state, &id).await?;
            state.store.delete(&round.id).await?;
            Ok(format!("Deleted round {}", short_id(&round.id)))
        }
        Command::Retry => {
            let saved = recorder.retry_pending().await?;
            Ok(format!("Saved {saved} pending round(s)"))
        }
        Command::Recoveries => {
            let rounds = recorder.pending_recoveries().await?;
            if rounds.is_empty() {
                return Ok("No interrupted rounds".to_string());
            }
            Ok(rounds
                .iter()
                .map(describe_round)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Restore(id) => {
            let id = find_recovery(state, &id).await?;
            let round = recorder.resume_recovered(&id).await?;
            Ok(format!(
                "Resumed round {} with {} events",
                short_id(&round.id),
                round.steps.len()
            ))
        }
        Command::Discard(id) => {
            let id = find_recovery(state, &id).await?;
            recorder.discard_recovered(&id).await?;
            Ok(format!("Discarded round {}", short_id(&id)))
        }
        Command::Replay(id) => {
            let round = find_round(state, &id).await?;
            let session = ReplaySession::with_narrator(round, state.narrator.clone());
            session.narrate_current().await;
            let summary = describe_position(&session).await;
            state.open_replay(session).await;
            Ok(summary)
        }
        Command::Guide(id) => {
            let round = find_round(state, &id).await?;
            let session = ReplaySession::guided(round, state.narrator.clone()).await;
            let summary = describe_position(&session).await;
            state.open_replay(session).await;
            Ok(summary)
        }
        Command::Next => {
            let session = state.replay().await?;
            session.next().await;
            Ok(describe_position(&session).await)
        }
        Command::Previous => {
            let session = state.replay().await?;
            session.previous().await;
            Ok(describe_position(&session).await)
        }
        Command::Jump(index) => {
            let session = state.replay().await?;
            session.jump_to(index).await;
            Ok(describe_position(&session).await)
        }
        Command::Rewind => {
            let session = state.replay().await?;
            session.rewind().await;
            Ok(describe_position(&session).await)
        }
        Command::Done => {
            let session = state.replay().await?;
            session.mark_current_completed().await;
            Ok(format!(
                "{} ({} checked)",
                describe_position(&session).await,
                session.completed_count().await
            ))
        }
        Command::Play(interval) => {
            let session = state.replay().await?;
            session.autoplay(interval).await;
            Ok(format!("Autoplay every {} ms", interval.as_millis()))
        }
        Command::Halt => {
            let session = state.replay().await?;
            session.stop_autoplay().await;
            Ok(describe_position(&session).await)
        }
        Command::Close => {
            state.close_replay().await;
            Ok("Replay closed".to_string())
        }
        Command::Settings => Ok(serde_json::to_string_pretty(
            &state.settings.step_settings(),
        )?),
        Command::Set { field, value } => {
            let mut settings = state.settings.step_settings();
            match field.as_str() {
                "height" => settings.user_height_cm = value.parse().context("height in cm")?,
                "speed" => settings.walking_speed_kmh = parse_number(&value)?,
                "expected" => {
                    settings.expected_steps_per_action = value.parse().context("step count")?
                }
                "validation" => settings.validation_enabled = parse_switch(&value)?,
                "mode" => {
                    settings.estimation_mode = match value.to_ascii_lowercase().as_str() {
                        "timer" => EstimationMode::Timer,
                        "motion" => EstimationMode::Motion,
                        other => bail!("unknown estimation mode '{other}'"),
                    }
                }
                "threshold" => settings.motion_threshold = parse_number(&value)?,
                "debounce" => {
                    settings.motion_debounce_ms = value.parse().context("debounce in ms")?
                }
                other => bail!("unknown setting '{other}'"),
            }
            match state.settings.update_step_settings(settings) {
                Ok(()) => Ok("Settings saved; they apply from the next round".to_string()),
                Err(SettingsError::Invalid(err)) => bail!("rejected: {err}"),
                Err(err) => Err(err.into()),
            }
        }
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
    }
}

fn parse_number(raw: &str) -> Result<f64> {
    raw.replace(',', ".")
        .parse()
        .with_context(|| format!("'{raw}' is not a number"))
}

fn parse_switch(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => bail!("expected on/off, got '{other}'"),
    }
}

fn single_id(args: &[&str], command: &str) -> Result<String> {
    match args {
        [id] => Ok(id.to_string()),
        _ => bail!("usage: {command} <round id>"),
    }
}

/// Exact id or unambiguous id prefix among the saved rounds.
async fn find_round(state: &AppState, id: &str) -> Result<RoundData> {
    let rounds = state.store.load(None).await?;
    pick_by_id(rounds, id)
}

async fn find_recovery(state: &AppState, id: &str) -> Result<String> {
    let rounds = state.recorder.pending_recoveries().await?;
    pick_by_id(rounds, id).map(|round| round.id)
}

fn pick_by_id(rounds: Vec<RoundData>, id: &str) -> Result<RoundData> {
    if let Some(round) = rounds.iter().find(|round| round.id == id) {
        return Ok(round.clone());
    }
    let mut matches = rounds.into_iter().filter(|round| round.id.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(round), None) => Ok(round),
        (Some(_), Some(_)) => bail!("'{id}' matches several rounds"),
        (None, _) => bail!("no round matches '{id}'"),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}:{:02}", seconds / 3600, seconds / 60 % 60, seconds % 60)
}

fn describe_round(round: &RoundData) -> String {
    format!(
        "{}  {}  {}  {} events  {} steps  {}",
        short_id(&round.id),
        round
            .start_time
            .with_timezone(&Local)
            .format("%d/%m/%Y %H:%M"),
        round.name,
        round.steps.len(),
        round.total_steps,
        if round.is_completed { "completed" } else { "in progress" }
    )
}

fn describe_step(step: &RoundStep) -> String {
    let mut line = format!("{} ({})", step.action.label_fr(), step.action);
    if let Some(direction) = &step.direction {
        line.push_str(&format!(" {direction}"));
    }
    if step.action.is_movement() {
        line.push_str(&format!(", {} steps", step.steps));
        if let Some(distance) = step.distance {
            line.push_str(&format!(", {distance:.2} m"));
        }
        if let Some(expected) = step.expected_steps {
            line.push_str(&format!(" (expected {expected})"));
        }
    }
    line
}

async fn describe_position(session: &ReplaySession) -> String {
    let cursor = session.cursor().await;
    match cursor.current() {
        Some(step) => format!(
            "Step {}/{}: {}",
            cursor.position() + 1,
            cursor.len(),
            describe_step(step)
        ),
        None => "Round has no steps".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        replay::LogNarrator,
        settings::{SettingsStore, StepSettings},
        store::{memory::MemoryKeyValueStore, RoundStore, SessionContext},
    };
    use std::sync::Arc;

    fn app() -> AppState {
        let store = RoundStore::new(
            Arc::new(MemoryKeyValueStore::default()),
            None,
            SessionContext::anonymous(),
        );
        AppState::new(
            store,
            Arc::new(SettingsStore::ephemeral(StepSettings::default())),
            Arc::new(LogNarrator),
        )
    }

    async fn run(state: &AppState, line: &str) -> Result<String> {
        let command = Command::parse(line)?.expect("non-blank line");
        execute(state, command).await
    }

    #[test]
    fn parses_start_options() {
        let command = Command::parse("start Night round; site=depot-3; notes=gate B open")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            Command::Start(StartRound {
                name: Some("Night round".into()),
                site_id: Some("depot-3".into()),
                notes: Some("gate B open".into()),
                ..StartRound::default()
            })
        );
    }

    #[test]
    fn parses_steps_and_motion_samples() {
        assert_eq!(
            Command::parse("step left north east; notes=stairs").unwrap(),
            Some(Command::Step(
                NewStep::new(RoundAction::Left)
                    .direction("north east")
                    .notes("stairs")
            ))
        );
        assert_eq!(
            Command::parse("motion 0 3 4").unwrap(),
            Some(Command::MotionVector(0.0, 3.0, 4.0))
        );
        assert_eq!(Command::parse("motion 9,5").unwrap(), Some(Command::Motion(9.5)));
        assert_eq!(Command::parse("jump 3").unwrap(), Some(Command::Jump(2)));
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert!(Command::parse("step sideways").is_err());
        assert!(Command::parse("teleport").is_err());
    }

    #[test]
    fn parses_list_filters() {
        let command = Command::parse("list incomplete parking; site=depot-3")
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            Command::List(RoundFilter {
                site_id: Some("depot-3".into()),
                status: StatusFilter::Incomplete,
                query: Some("parking".into()),
            })
        );
    }

    #[tokio::test]
    async fn records_lists_and_replays_a_round() {
        let state = app();
        run(&state, "start Night round").await.unwrap();
        run(&state, "step forward").await.unwrap();
        run(&state, "step door; notes=locked").await.unwrap();
        let stopped = run(&state, "stop").await.unwrap();
        assert!(stopped.contains("2 events"));

        let listing = run(&state, "list completed night").await.unwrap();
        assert!(listing.contains("Night round"));
        let id = listing.split_whitespace().next().unwrap().to_string();

        let opened = run(&state, &format!("replay {id}")).await.unwrap();
        assert!(opened.starts_with("Step 1/2"));
        let next = run(&state, "next").await.unwrap();
        assert!(next.starts_with("Step 2/2: Porte"));
        let rewound = run(&state, "rewind").await.unwrap();
        assert!(rewound.starts_with("Step 1/2: Tout droit"));
        run(&state, "close").await.unwrap();
        assert!(run(&state, "next").await.is_err());

        run(&state, &format!("delete {id}")).await.unwrap();
        assert_eq!(run(&state, "list").await.unwrap(), "No rounds");
    }

    #[tokio::test(start_paused = true)]
    async fn motion_vectors_and_sensor_toggle_reach_the_recorder() {
        let state = app();
        run(&state, "set mode motion").await.unwrap();
        run(&state, "start").await.unwrap();

        assert_eq!(run(&state, "motion 0 0 9").await.unwrap(), "Sample ignored");
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(run(&state, "motion 0 3 4").await.unwrap().starts_with("Marche"));

        run(&state, "nosensor").await.unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(run(&state, "motion 0 0 9").await.unwrap(), "Sample ignored");

        run(&state, "sensor").await.unwrap();
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(run(&state, "motion 0 0 12").await.unwrap().starts_with("Marche"));

        let stopped = run(&state, "stop").await.unwrap();
        assert!(stopped.contains("2 events, 2 steps"));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let state = app();
        assert!(run(&state, "set height 300").await.is_err());
        run(&state, "set mode motion").await.unwrap();
        assert_eq!(
            state.settings.step_settings().estimation_mode,
            EstimationMode::Motion
        );
    }
}
