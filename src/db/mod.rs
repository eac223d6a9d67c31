//! # Database: PostgreSQL Storage Layer
//!
//! [`Database`] implements [`TrialStore`] over a `sqlx::PgPool`.
//!
//! ## Schema
//!
//! Created by [`Database::migrate`] from `migrations/001_trials.sql`:
//!
//! - `trials`: configuration, ownership and lifecycle (`finished`, `stopped_at`)
//! - `variables`: the single measured quantity of each trial
//! - `trial_groups`: arms `A`/`B`, unique per trial
//! - `participants`: user links; `user_id` is cleared on leave
//! - `invitations`: unique per (trial, lower(email))
//! - `reports`: measurements; the partial unique indexes back the
//!   find-or-create operations
//! - `tutorial_examples`: seeded worked examples
//!
//! Enum columns hold the same snake_case tokens as the JSON surface and are
//! parsed back with `FromStr` when rows are converted.
//!
//! ## Module Structure
//!
//! - [`trials`]: trial CRUD, listings, variables, tutorial examples
//! - [`participants`]: participants, groups, invitations
//! - [`reports`]: pending and recorded reports

mod participants;
mod reports;
mod trials;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::model::*;
use crate::store::{TrialQuery, TrialStore};

const SCHEMA: &str = include_str!("../../migrations/001_trials.sql");

pub(crate) const TRIAL_COLUMNS: &str = "id, title, description, owner_id, owner_email, private, \
     recruitment, n1trial, ending_style, ending_reports, ending_date, finished, stopped_at, \
     group_a, group_b, max_participants, featured, reporting_style, instruction_delivery, \
     is_edited, created_at";

// ── Row types ───────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
pub(crate) struct TrialRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub owner_id: String,
    pub owner_email: String,
    pub private: bool,
    pub recruitment: String,
    pub n1trial: bool,
    pub ending_style: String,
    pub ending_reports: Option<i64>,
    pub ending_date: Option<NaiveDate>,
    pub finished: bool,
    pub stopped_at: Option<DateTime<Utc>>,
    pub group_a: String,
    pub group_b: String,
    pub max_participants: Option<i64>,
    pub featured: bool,
    pub reporting_style: String,
    pub instruction_delivery: String,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TrialRow> for Trial {
    type Error = anyhow::Error;

    fn try_from(row: TrialRow) -> Result<Self> {
        Ok(Trial {
            id: row.id,
            title: row.title,
            description: row.description,
            owner_id: row.owner_id,
            owner_email: row.owner_email,
            private: row.private,
            recruitment: row.recruitment.parse()?,
            n1trial: row.n1trial,
            ending_style: row.ending_style.parse()?,
            ending_reports: row.ending_reports,
            ending_date: row.ending_date,
            finished: row.finished,
            stopped_at: row.stopped_at,
            group_a: row.group_a,
            group_b: row.group_b,
            max_participants: row.max_participants,
            featured: row.featured,
            reporting_style: row.reporting_style.parse()?,
            instruction_delivery: row.instruction_delivery.parse()?,
            is_edited: row.is_edited,
            created_at: row.created_at,
        })
    }
}

pub(crate) fn trials_from_rows(rows: Vec<TrialRow>) -> Result<Vec<Trial>> {
    rows.into_iter().map(Trial::try_from).collect()
}

#[derive(sqlx::FromRow)]
pub(crate) struct VariableRow {
    pub id: i64,
    pub trial_id: i64,
    pub question: String,
    pub style: String,
}

impl TryFrom<VariableRow> for Variable {
    type Error = anyhow::Error;

    fn try_from(row: VariableRow) -> Result<Self> {
        Ok(Variable {
            id: row.id,
            trial_id: row.trial_id,
            question: row.question,
            style: row.style.parse()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct GroupRow {
    pub id: i64,
    pub trial_id: i64,
    pub name: String,
}

impl TryFrom<GroupRow> for Group {
    type Error = anyhow::Error;

    fn try_from(row: GroupRow) -> Result<Self> {
        Ok(Group {
            id: row.id,
            trial_id: row.trial_id,
            name: row.name.parse()?,
        })
    }
}

/// Rebuild an optional joined group from `group_id` / `group_name` columns.
fn joined_group(trial_id: i64, id: Option<i64>, name: Option<String>) -> Result<Option<Group>> {
    match (id, name) {
        (Some(id), Some(name)) => Ok(Some(Group {
            id,
            trial_id,
            name: name.parse()?,
        })),
        _ => Ok(None),
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ParticipantRow {
    pub id: i64,
    pub trial_id: i64,
    pub user_id: Option<String>,
    pub group_id: Option<i64>,
    pub group_name: Option<String>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = anyhow::Error;

    fn try_from(row: ParticipantRow) -> Result<Self> {
        Ok(Participant {
            id: row.id,
            trial_id: row.trial_id,
            user_id: row.user_id,
            group: joined_group(row.trial_id, row.group_id, row.group_name)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct InvitationRow {
    pub id: i64,
    pub trial_id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<InvitationRow> for Invitation {
    fn from(row: InvitationRow) -> Self {
        Invitation {
            id: row.id,
            trial_id: row.trial_id,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReportRow {
    pub id: i64,
    pub trial_id: i64,
    pub participant_id: i64,
    pub group_id: Option<i64>,
    pub group_name: Option<String>,
    pub variable_id: i64,
    pub date: Option<NaiveDate>,
    pub score: Option<i64>,
    pub binary_value: Option<bool>,
    pub count: Option<i64>,
}

impl TryFrom<ReportRow> for Report {
    type Error = anyhow::Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        Ok(Report {
            id: row.id,
            trial_id: row.trial_id,
            participant_id: row.participant_id,
            group: joined_group(row.trial_id, row.group_id, row.group_name)?,
            variable_id: row.variable_id,
            date: row.date,
            score: row.score,
            binary: row.binary_value,
            count: row.count,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct TutorialExampleRow {
    pub id: i64,
    pub question: String,
    pub measure_style: String,
    pub measure_question: String,
    pub group_a: String,
    pub group_b: String,
}

impl TryFrom<TutorialExampleRow> for TutorialExample {
    type Error = anyhow::Error;

    fn try_from(row: TutorialExampleRow) -> Result<Self> {
        Ok(TutorialExample {
            id: row.id,
            question: row.question,
            measure_style: row.measure_style.parse()?,
            measure_question: row.measure_question,
            group_a: row.group_a,
            group_b: row.group_b,
        })
    }
}

// ── Connection ──────────────────────────────────────────────────

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL using the provided database URL.
    ///
    /// Credentials are percent-decoded by hand so that usernames containing
    /// dots survive intact.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let url = url::Url::parse(database_url).context("parsing DATABASE_URL")?;
        let username = urlencoding::decode(url.username())?.into_owned();
        let password = url
            .password()
            .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
            .transpose()?;
        let mut opts = PgConnectOptions::new()
            .host(url.host_str().unwrap_or("localhost"))
            .port(url.port().unwrap_or(5432))
            .database(url.path().trim_start_matches('/'))
            .username(&username);
        if let Some(ref pw) = password {
            opts = opts.password(pw);
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("applying schema")?;
        Ok(())
    }

    /// Health check: execute `SELECT 1` to verify database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

/// Split a measurement into the `(score, binary_value, count)` columns.
pub(crate) fn measurement_columns(m: Measurement) -> (Option<i64>, Option<bool>, Option<i64>) {
    match m {
        Measurement::Score(v) => (Some(v), None, None),
        Measurement::Binary(v) => (None, Some(v), None),
        Measurement::Count(v) => (None, None, Some(v)),
    }
}

// ── TrialStore ──────────────────────────────────────────────────

#[async_trait]
impl TrialStore for Database {
    async fn health_check(&self) -> Result<()> {
        Database::health_check(self).await
    }

    async fn create_trial(&self, draft: &TrialDraft, variable: &VariableDraft) -> Result<Trial> {
        Database::create_trial(self, draft, variable).await
    }

    async fn get_trial(&self, id: i64) -> Result<Option<Trial>> {
        Database::get_trial(self, id).await
    }

    async fn update_trial(&self, trial: &Trial) -> Result<()> {
        Database::update_trial(self, trial).await
    }

    async fn stop_trial(&self, id: i64) -> Result<bool> {
        Database::stop_trial(self, id).await
    }

    async fn list_trials(&self, query: &TrialQuery) -> Result<Vec<Trial>> {
        Database::list_trials(self, query).await
    }

    async fn owned_trials(&self, user_id: &str) -> Result<Vec<Trial>> {
        Database::owned_trials(self, user_id).await
    }

    async fn participating_trials(&self, user_id: &str) -> Result<Vec<Trial>> {
        Database::participating_trials(self, user_id).await
    }

    async fn get_variable(&self, trial_id: i64) -> Result<Option<Variable>> {
        Database::get_variable(self, trial_id).await
    }

    async fn get_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>> {
        Database::get_participant(self, trial_id, user_id).await
    }

    async fn count_participants(&self, trial_id: i64) -> Result<i64> {
        Database::count_participants(self, trial_id).await
    }

    async fn add_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>> {
        Database::add_participant(self, trial_id, user_id).await
    }

    async fn detach_participant(&self, participant_id: i64) -> Result<()> {
        Database::detach_participant(self, participant_id).await
    }

    async fn assign_group(&self, participant_id: i64, group: &Group) -> Result<()> {
        Database::assign_group(self, participant_id, group).await
    }

    async fn has_invitation(&self, trial_id: i64, email: &str) -> Result<bool> {
        Database::has_invitation(self, trial_id, email).await
    }

    async fn get_or_create_invitation(
        &self,
        trial_id: i64,
        email: &str,
    ) -> Result<(Invitation, bool)> {
        Database::get_or_create_invitation(self, trial_id, email).await
    }

    async fn ensure_groups(&self, trial_id: i64) -> Result<Vec<Group>> {
        Database::ensure_groups(self, trial_id).await
    }

    async fn pending_report(&self, trial_id: i64, participant_id: i64) -> Result<Option<Report>> {
        Database::pending_report(self, trial_id, participant_id).await
    }

    async fn open_pending_report(
        &self,
        trial_id: i64,
        participant_id: i64,
        variable_id: i64,
        group: &Group,
    ) -> Result<Report> {
        Database::open_pending_report(self, trial_id, participant_id, variable_id, group).await
    }

    async fn complete_pending_report(
        &self,
        report_id: i64,
        date: NaiveDate,
        measurement: Measurement,
    ) -> Result<Report> {
        Database::complete_pending_report(self, report_id, date, measurement).await
    }

    async fn upsert_report(&self, key: &ReportKey, measurement: Measurement) -> Result<Report> {
        Database::upsert_report(self, key, measurement).await
    }

    async fn count_recorded_reports(&self, trial_id: i64) -> Result<i64> {
        Database::count_recorded_reports(self, trial_id).await
    }

    async fn participant_has_recorded(&self, trial_id: i64, participant_id: i64) -> Result<bool> {
        Database::participant_has_recorded(self, trial_id, participant_id).await
    }

    async fn recorded_reports(&self, trial_id: i64) -> Result<Vec<Report>> {
        Database::recorded_reports(self, trial_id).await
    }

    async fn get_tutorial_example(&self, id: i64) -> Result<Option<TutorialExample>> {
        Database::get_tutorial_example(self, id).await
    }

    async fn add_tutorial_example(&self, example: &TutorialExample) -> Result<TutorialExample> {
        Database::add_tutorial_example(self, example).await
    }
}

// ── Tests ───────────────────────────────────────────────────────
