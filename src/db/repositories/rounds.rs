use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        helpers::{
            format_datetime, parse_action, parse_datetime, parse_optional_datetime, to_i64, to_u64,
        },
        Database,
    },
    store::{RoundRecord, RoundRow, StepRow, TableStore},
};

fn row_to_round(row: &Row) -> Result<RoundRow> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let duration_ms: Option<i64> = row.get("duration_ms")?;

    Ok(RoundRow {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        total_steps: row.get("total_steps")?,
        duration_ms: duration_ms
            .map(|value| to_u64(value, "duration_ms"))
            .transpose()?,
        site_id: row.get("site_id")?,
        site_name: row.get("site_name")?,
        notes: row.get("notes")?,
        is_completed: row.get("is_completed")?,
    })
}

fn row_to_step(row: &Row) -> Result<StepRow> {
    let action: String = row.get("action")?;
    let timestamp: String = row.get("timestamp")?;

    Ok(StepRow {
        round_id: row.get("round_id")?,
        step_number: row.get("step_number")?,
        step_id: row.get("step_id")?,
        action: parse_action(&action)?,
        direction: row.get("direction")?,
        steps_count: row.get("steps_count")?,
        expected_steps: row.get("expected_steps")?,
        distance_m: row.get("distance_m")?,
        location: row.get("location")?,
        notes: row.get("notes")?,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
    })
}

impl Database {
    /// Replaces the round and its full step list in one transaction.
    pub async fn upsert_round_record(&self, record: RoundRecord) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let RoundRecord { round, steps } = record;

            let owner: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM rounds WHERE id = ?1",
                    params![round.id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(owner) = owner {
                if owner != round.user_id {
                    bail!("round {} belongs to another user", round.id);
                }
            }

            let duration_ms = round.duration_ms.map(to_i64).transpose()?;
            tx.execute(
                "INSERT INTO rounds (
                    id, user_id, name, start_time, end_time, total_steps, duration_ms,
                    site_id, site_name, notes, is_completed, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    total_steps = excluded.total_steps,
                    duration_ms = excluded.duration_ms,
                    site_id = excluded.site_id,
                    site_name = excluded.site_name,
                    notes = excluded.notes,
                    is_completed = excluded.is_completed,
                    updated_at = excluded.updated_at",
                params![
                    round.id,
                    round.user_id,
                    round.name,
                    format_datetime(&round.start_time),
                    round.end_time.as_ref().map(format_datetime),
                    round.total_steps,
                    duration_ms,
                    round.site_id,
                    round.site_name,
                    round.notes,
                    round.is_completed,
                    format_datetime(&Utc::now()),
                ],
            )?;

            tx.execute(
                "DELETE FROM round_steps WHERE round_id = ?1",
                params![round.id],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO round_steps (
                        round_id, step_number, step_id, action, direction, steps_count,
                        expected_steps, distance_m, location, notes, timestamp
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for step in &steps {
                    stmt.execute(params![
                        round.id,
                        step.step_number,
                        step.step_id,
                        step.action.as_str(),
                        step.direction,
                        step.steps_count,
                        step.expected_steps,
                        step.distance_m,
                        step.location,
                        step.notes,
                        format_datetime(&step.timestamp),
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn fetch_round_records(&self, user_id: String) -> Result<Vec<RoundRecord>> {
        self.execute(move |conn| {
            let mut round_stmt = conn.prepare(
                "SELECT id, user_id, name, start_time, end_time, total_steps, duration_ms,
                        site_id, site_name, notes, is_completed
                 FROM rounds
                 WHERE user_id = ?1
                 ORDER BY start_time DESC",
            )?;
            let mut step_stmt = conn.prepare(
                "SELECT round_id, step_number, step_id, action, direction, steps_count,
                        expected_steps, distance_m, location, notes, timestamp
                 FROM round_steps
                 WHERE round_id = ?1
                 ORDER BY step_number ASC",
            )?;

            let mut rounds = Vec::new();
            let mut rows = round_stmt.query(params![user_id])?;
            while let Some(row) = rows.next()? {
                rounds.push(row_to_round(row)?);
            }

            let mut records = Vec::with_capacity(rounds.len());
            for round in rounds {
                let mut steps = Vec::new();
                let mut rows = step_stmt.query(params![round.id])?;
                while let Some(row) = rows.next()? {
                    steps.push(row_to_step(row)?);
                }
                records.push(RoundRecord { round, steps });
            }

            Ok(records)
        })
        .await
    }

    /// Step rows go with the round through `ON DELETE CASCADE`.
    pub async fn delete_round_record(&self, user_id: String, round_id: String) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM rounds WHERE id = ?1 AND user_id = ?2",
                params![round_id, user_id],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TableStore for Database {
    async fn upsert_round(&self, record: RoundRecord) -> Result<()> {
        self.upsert_round_record(record).await
    }

    async fn fetch_rounds(&self, user_id: &str) -> Result<Vec<RoundRecord>> {
        self.fetch_round_records(user_id.to_string()).await
    }

    async fn delete_round(&self, user_id: &str, round_id: &str) -> Result<()> {
        self.delete_round_record(user_id.to_string(), round_id.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_ms, NewStep, RoundAction, RoundData, RoundStep, StartRound};
    use chrono::Duration;
    use tempfile::TempDir;

    fn sample_round(user: &str) -> RoundData {
        let start = now_ms();
        let mut round = RoundData::begin(
            StartRound {
                site_name: Some("Dépôt Sud".into()),
                ..StartRound::default()
            },
            Some(user.into()),
            start,
        );
        round.push_step(RoundStep::record(
            NewStep::new(RoundAction::Left).direction("west"),
            5,
            Some(3.63),
            Some(10),
            start + Duration::seconds(4),
        ));
        round.push_step(RoundStep::record(
            NewStep::new(RoundAction::Door).notes("badge reader"),
            0,
            None,
            None,
            start + Duration::seconds(9),
        ));
        round.finalize(start + Duration::seconds(12));
        round
    }

    #[tokio::test]
    async fn rounds_round_trip_through_sqlite() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("remote.sqlite3")).unwrap();
        let round = sample_round("agent-1");

        db.upsert_round(RoundRecord::from_round(&round, "agent-1"))
            .await
            .unwrap();
        // second upsert replaces the step rows instead of duplicating them
        db.upsert_round(RoundRecord::from_round(&round, "agent-1"))
            .await
            .unwrap();

        let loaded: Vec<RoundData> = db
            .fetch_rounds("agent-1")
            .await
            .unwrap()
            .into_iter()
            .map(RoundRecord::into_round)
            .collect();
        assert_eq!(loaded, vec![round]);
        assert!(db.fetch_rounds("agent-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rounds_are_scoped_to_their_owner() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("remote.sqlite3")).unwrap();
        let round = sample_round("agent-1");
        db.upsert_round(RoundRecord::from_round(&round, "agent-1"))
            .await
            .unwrap();

        assert!(db
            .upsert_round(RoundRecord::from_round(&round, "agent-2"))
            .await
            .is_err());

        db.delete_round("agent-2", &round.id).await.unwrap();
        assert_eq!(db.fetch_rounds("agent-1").await.unwrap().len(), 1);

        db.delete_round("agent-1", &round.id).await.unwrap();
        assert!(db.fetch_rounds("agent-1").await.unwrap().is_empty());
        let orphaned: i64 = db
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM round_steps", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(orphaned, 0);
    }
}
