//! Trial CRUD, listings, variables and tutorial examples.
//!
//! Listings build their WHERE clause from a [`TrialQuery`], binding every
//! user-supplied value as a parameter.

use anyhow::{Context, Result};

use super::{
    trials_from_rows, Database, TrialRow, TutorialExampleRow, VariableRow, TRIAL_COLUMNS,
};
use crate::model::{Trial, TrialDraft, TutorialExample, Variable, VariableDraft};
use crate::store::TrialQuery;

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
fn like_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Database {
    /// Insert the trial and its variable in one transaction.
    pub async fn create_trial(&self, draft: &TrialDraft, variable: &VariableDraft) -> Result<Trial> {
        let mut tx = self.pool.begin().await?;

        let row: TrialRow = sqlx::query_as(&format!(
            "INSERT INTO trials (title, description, owner_id, owner_email, private, recruitment,
                                 n1trial, ending_style, ending_reports, ending_date, group_a,
                                 group_b, max_participants, featured, reporting_style,
                                 instruction_delivery)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
             RETURNING {}",
            TRIAL_COLUMNS
        ))
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.owner_id)
        .bind(&draft.owner_email)
        .bind(draft.private)
        .bind(draft.recruitment.as_str())
        .bind(draft.n1trial)
        .bind(draft.ending_style.as_str())
        .bind(draft.ending_reports)
        .bind(draft.ending_date)
        .bind(&draft.group_a)
        .bind(&draft.group_b)
        .bind(draft.max_participants)
        .bind(draft.featured)
        .bind(draft.reporting_style.as_str())
        .bind(draft.instruction_delivery.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO variables (trial_id, question, style) VALUES ($1, $2, $3)")
            .bind(row.id)
            .bind(&variable.question)
            .bind(variable.style.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Trial::try_from(row)
    }

    pub async fn get_trial(&self, id: i64) -> Result<Option<Trial>> {
        let row: Option<TrialRow> =
            sqlx::query_as(&format!("SELECT {} FROM trials WHERE id = $1", TRIAL_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Trial::try_from).transpose()
    }

    /// Save the editable fields. Lifecycle columns are left alone.
    pub async fn update_trial(&self, trial: &Trial) -> Result<()> {
        let result = sqlx::query(
            "UPDATE trials
             SET title = $2, description = $3, private = $4, recruitment = $5,
                 ending_style = $6, ending_reports = $7, ending_date = $8,
                 group_a = $9, group_b = $10, max_participants = $11,
                 reporting_style = $12, instruction_delivery = $13, is_edited = $14
             WHERE id = $1",
        )
        .bind(trial.id)
        .bind(&trial.title)
        .bind(&trial.description)
        .bind(trial.private)
        .bind(trial.recruitment.as_str())
        .bind(trial.ending_style.as_str())
        .bind(trial.ending_reports)
        .bind(trial.ending_date)
        .bind(&trial.group_a)
        .bind(&trial.group_b)
        .bind(trial.max_participants)
        .bind(trial.reporting_style.as_str())
        .bind(trial.instruction_delivery.as_str())
        .bind(trial.is_edited)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("trial {} not found", trial.id);
        }
        Ok(())
    }

    /// Mark the trial finished. Only the first call sets `stopped_at`.
    pub async fn stop_trial(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trials SET finished = TRUE, stopped_at = NOW()
             WHERE id = $1 AND NOT finished",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_trials(&self, query: &TrialQuery) -> Result<Vec<Trial>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut param_idx = 1;

        if !query.include_private {
            conditions.push("private = FALSE".to_string());
        }
        if query.recruitment.is_some() {
            conditions.push(format!("recruitment = ${}", param_idx));
            param_idx += 1;
        }
        if query.n1trial.is_some() {
            conditions.push(format!("n1trial = ${}", param_idx));
            param_idx += 1;
        }
        if query.featured.is_some() {
            conditions.push(format!("featured = ${}", param_idx));
            param_idx += 1;
        }
        if query.finished.is_some() {
            conditions.push(format!("finished = ${}", param_idx));
            param_idx += 1;
        }
        if query.title_contains.is_some() {
            conditions.push(format!("title ILIKE ${}", param_idx));
            param_idx += 1;
        }
        if query.exclude_user.is_some() {
            conditions.push(format!(
                "owner_id <> ${idx} AND NOT EXISTS (
                     SELECT 1 FROM participants p
                     WHERE p.trial_id = trials.id AND p.user_id = ${idx})",
                idx = param_idx
            ));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM trials{} ORDER BY id DESC",
            TRIAL_COLUMNS, where_clause
        );

        let mut q = sqlx::query_as::<_, TrialRow>(&sql);
        if let Some(recruitment) = query.recruitment {
            q = q.bind(recruitment.as_str());
        }
        if let Some(n1) = query.n1trial {
            q = q.bind(n1);
        }
        if let Some(featured) = query.featured {
            q = q.bind(featured);
        }
        if let Some(finished) = query.finished {
            q = q.bind(finished);
        }
        if let Some(ref title) = query.title_contains {
            q = q.bind(format!("%{}%", like_escape(title)));
        }
        if let Some(ref user) = query.exclude_user {
            q = q.bind(user.clone());
        }
        trials_from_rows(q.fetch_all(&self.pool).await?)
    }

    pub async fn owned_trials(&self, user_id: &str) -> Result<Vec<Trial>> {
        let rows: Vec<TrialRow> = sqlx::query_as(&format!(
            "SELECT {} FROM trials WHERE owner_id = $1 ORDER BY id DESC",
            TRIAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        trials_from_rows(rows)
    }

    pub async fn participating_trials(&self, user_id: &str) -> Result<Vec<Trial>> {
        let rows: Vec<TrialRow> = sqlx::query_as(&format!(
            "SELECT {} FROM trials
             WHERE id IN (SELECT trial_id FROM participants WHERE user_id = $1)
             ORDER BY id DESC",
            TRIAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        trials_from_rows(rows)
    }

    /// The trial's variable (the first, should several exist).
    pub async fn get_variable(&self, trial_id: i64) -> Result<Option<Variable>> {
        let row: Option<VariableRow> = sqlx::query_as(
            "SELECT id, trial_id, question, style FROM variables
             WHERE trial_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(trial_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Variable::try_from).transpose()
    }

    pub async fn get_tutorial_example(&self, id: i64) -> Result<Option<TutorialExample>> {
        let row: Option<TutorialExampleRow> = sqlx::query_as(
            "SELECT id, question, measure_style, measure_question, group_a, group_b
             FROM tutorial_examples WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TutorialExample::try_from).transpose()
    }

    /// Seed an example unless one with the same question exists.
    pub async fn add_tutorial_example(&self, example: &TutorialExample) -> Result<TutorialExample> {
        let existing: Option<TutorialExampleRow> = sqlx::query_as(
            "SELECT id, question, measure_style, measure_question, group_a, group_b
             FROM tutorial_examples WHERE question = $1 ORDER BY id LIMIT 1",
        )
        .bind(&example.question)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = existing {
            return TutorialExample::try_from(row);
        }
        let row: TutorialExampleRow = sqlx::query_as(
            "INSERT INTO tutorial_examples (question, measure_style, measure_question, group_a, group_b)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, question, measure_style, measure_question, group_a, group_b",
        )
        .bind(&example.question)
        .bind(example.measure_style.as_str())
        .bind(&example.measure_question)
        .bind(&example.group_a)
        .bind(&example.group_b)
        .fetch_one(&self.pool)
        .await
        .context("inserting tutorial example")?;
        TutorialExample::try_from(row)
    }
}
