//! Pending and recorded reports.
//!
//! Every write returns the row joined with its arm through a CTE so callers
//! get a complete [`Report`] in one round trip.

use anyhow::Result;
use chrono::NaiveDate;

use super::{measurement_columns, Database, ReportRow};
use crate::model::{Group, Measurement, Report, ReportKey};

/// Project a CTE named `r` into [`ReportRow`] columns.
const FROM_CTE: &str = "SELECT r.id, r.trial_id, r.participant_id, r.group_id, g.name AS group_name,
            r.variable_id, r.date, r.score, r.binary_value, r.count
     FROM r LEFT JOIN trial_groups g ON g.id = r.group_id";

const REPORT_SELECT: &str = "SELECT r.id, r.trial_id, r.participant_id, r.group_id, g.name AS group_name,
            r.variable_id, r.date, r.score, r.binary_value, r.count
     FROM reports r LEFT JOIN trial_groups g ON g.id = r.group_id";

impl Database {
    pub async fn pending_report(&self, trial_id: i64, participant_id: i64) -> Result<Option<Report>> {
        let row: Option<ReportRow> = sqlx::query_as(&format!(
            "{} WHERE r.trial_id = $1 AND r.participant_id = $2 AND r.date IS NULL
             ORDER BY r.id LIMIT 1",
            REPORT_SELECT
        ))
        .bind(trial_id)
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Report::try_from).transpose()
    }

    /// Find or create the undated report and point it at `group`.
    pub async fn open_pending_report(
        &self,
        trial_id: i64,
        participant_id: i64,
        variable_id: i64,
        group: &Group,
    ) -> Result<Report> {
        let row: ReportRow = sqlx::query_as(&format!(
            "WITH r AS (
                 INSERT INTO reports (trial_id, participant_id, variable_id, group_id, self_trial)
                 VALUES ($1, $2, $3, $4, TRUE)
                 ON CONFLICT (trial_id, participant_id, variable_id) WHERE date IS NULL
                 DO UPDATE SET group_id = EXCLUDED.group_id
                 RETURNING *
             ) {}",
            FROM_CTE
        ))
        .bind(trial_id)
        .bind(participant_id)
        .bind(variable_id)
        .bind(group.id)
        .fetch_one(&self.pool)
        .await?;
        Report::try_from(row)
    }

    pub async fn complete_pending_report(
        &self,
        report_id: i64,
        date: NaiveDate,
        measurement: Measurement,
    ) -> Result<Report> {
        let (score, binary, count) = measurement_columns(measurement);
        let row: ReportRow = sqlx::query_as(&format!(
            "WITH r AS (
                 UPDATE reports
                 SET date = $2,
                     score = COALESCE($3, score),
                     binary_value = COALESCE($4, binary_value),
                     count = COALESCE($5, count)
                 WHERE id = $1
                 RETURNING *
             ) {}",
            FROM_CTE
        ))
        .bind(report_id)
        .bind(date)
        .bind(score)
        .bind(binary)
        .bind(count)
        .fetch_one(&self.pool)
        .await?;
        Report::try_from(row)
    }

    /// Insert or update the report identified by `key`.
    pub async fn upsert_report(&self, key: &ReportKey, measurement: Measurement) -> Result<Report> {
        let (score, binary, count) = measurement_columns(measurement);
        let row: ReportRow = sqlx::query_as(&format!(
            "WITH r AS (
                 INSERT INTO reports (trial_id, date, participant_id, group_id, variable_id,
                                      score, binary_value, count)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (trial_id, date, participant_id, (COALESCE(group_id, 0)), variable_id)
                     WHERE date IS NOT NULL AND NOT self_trial
                 DO UPDATE SET
                     score = COALESCE(EXCLUDED.score, reports.score),
                     binary_value = COALESCE(EXCLUDED.binary_value, reports.binary_value),
                     count = COALESCE(EXCLUDED.count, reports.count)
                 RETURNING *
             ) {}",
            FROM_CTE
        ))
        .bind(key.trial_id)
        .bind(key.date)
        .bind(key.participant_id)
        .bind(key.group_id)
        .bind(key.variable_id)
        .bind(score)
        .bind(binary)
        .bind(count)
        .fetch_one(&self.pool)
        .await?;
        Report::try_from(row)
    }

    pub async fn count_recorded_reports(&self, trial_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reports WHERE trial_id = $1 AND date IS NOT NULL",
        )
        .bind(trial_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn participant_has_recorded(&self, trial_id: i64, participant_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reports
                            WHERE trial_id = $1 AND participant_id = $2 AND date IS NOT NULL)",
        )
        .bind(trial_id)
        .bind(participant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn recorded_reports(&self, trial_id: i64) -> Result<Vec<Report>> {
        let rows: Vec<ReportRow> = sqlx::query_as(&format!(
            "{} WHERE r.trial_id = $1 AND r.date IS NOT NULL ORDER BY r.date, r.id",
            REPORT_SELECT
        ))
        .bind(trial_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Report::try_from).collect()
    }
}
