//! # Store: Persistence Seam for Trials and Their Records
//!
//! Request handlers talk to persistence only through [`TrialStore`]. Two
//! implementations exist:
//!
//! - [`crate::db::Database`]: PostgreSQL via sqlx, used in production.
//! - [`MemoryStore`]: a mutex-guarded in-process store, used by the test
//!   suite and by `serve` when no `DATABASE_URL` is configured.
//!
//! Find-or-create operations (`add_participant`, `get_or_create_invitation`,
//! `ensure_groups`, `open_pending_report`, `upsert_report`) must be atomic in
//! the implementation: concurrent duplicates resolve to a single row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::*;

/// Lock a mutex, recovering from poisoning.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Listing filter. `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialQuery {
    pub recruitment: Option<Recruitment>,
    pub include_private: bool,
    pub n1trial: Option<bool>,
    pub featured: Option<bool>,
    pub finished: Option<bool>,
    /// Case-insensitive title substring.
    pub title_contains: Option<String>,
    /// Drop trials this user owns or participates in.
    pub exclude_user: Option<String>,
}

impl TrialQuery {
    /// Trials recruiting from the general public.
    pub fn open_recruitment(exclude_user: Option<String>) -> Self {
        TrialQuery {
            recruitment: Some(Recruitment::Anyone),
            include_private: false,
            n1trial: Some(false),
            finished: Some(false),
            exclude_user,
            ..Default::default()
        }
    }

    pub fn featured() -> Self {
        TrialQuery {
            featured: Some(true),
            ..Default::default()
        }
    }

    pub fn search(q: &str) -> Self {
        let q = q.trim();
        TrialQuery {
            title_contains: (!q.is_empty()).then(|| q.to_string()),
            ..Default::default()
        }
    }

    /// Whether a trial passes every constraint except `exclude_user`.
    pub fn matches(&self, trial: &Trial) -> bool {
        if !self.include_private && trial.private {
            return false;
        }
        if self.recruitment.is_some_and(|r| r != trial.recruitment) {
            return false;
        }
        if self.n1trial.is_some_and(|n| n != trial.n1trial) {
            return false;
        }
        if self.featured.is_some_and(|f| f != trial.featured) {
            return false;
        }
        if self.finished.is_some_and(|f| f != trial.finished) {
            return false;
        }
        if let Some(q) = &self.title_contains {
            if !trial.title.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Cheap connectivity check for `/readyz`.
    async fn health_check(&self) -> Result<()>;

    /// Persist a draft together with its single variable.
    async fn create_trial(&self, draft: &TrialDraft, variable: &VariableDraft) -> Result<Trial>;
    async fn get_trial(&self, id: i64) -> Result<Option<Trial>>;
    /// Save the editable fields of an existing trial.
    async fn update_trial(&self, trial: &Trial) -> Result<()>;
    /// Mark finished. Returns false if it already was.
    async fn stop_trial(&self, id: i64) -> Result<bool>;
    async fn list_trials(&self, query: &TrialQuery) -> Result<Vec<Trial>>;
    async fn owned_trials(&self, user_id: &str) -> Result<Vec<Trial>>;
    async fn participating_trials(&self, user_id: &str) -> Result<Vec<Trial>>;

    async fn get_variable(&self, trial_id: i64) -> Result<Option<Variable>>;

    async fn get_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>>;
    /// Participants still linked to a user.
    async fn count_participants(&self, trial_id: i64) -> Result<i64>;
    /// Link a user to the trial. `None` if the user already participates.
    async fn add_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>>;
    /// Clear the participant's user link, keeping the row.
    async fn detach_participant(&self, participant_id: i64) -> Result<()>;
    /// Record the participant's current arm.
    async fn assign_group(&self, participant_id: i64, group: &Group) -> Result<()>;

    async fn has_invitation(&self, trial_id: i64, email: &str) -> Result<bool>;
    /// Returns the invitation and whether it was newly created.
    async fn get_or_create_invitation(&self, trial_id: i64, email: &str)
        -> Result<(Invitation, bool)>;

    /// Create the trial's arms if it has none; return them in arm order.
    async fn ensure_groups(&self, trial_id: i64) -> Result<Vec<Group>>;

    /// The participant's undated report, if a cycle is open.
    async fn pending_report(&self, trial_id: i64, participant_id: i64) -> Result<Option<Report>>;
    /// Find or create the participant's undated report and assign it `group`.
    async fn open_pending_report(
        &self,
        trial_id: i64,
        participant_id: i64,
        variable_id: i64,
        group: &Group,
    ) -> Result<Report>;
    /// Date the pending report and write the measurement.
    async fn complete_pending_report(
        &self,
        report_id: i64,
        date: NaiveDate,
        measurement: Measurement,
    ) -> Result<Report>;
    /// Find or create the report identified by `key` and write the measurement.
    async fn upsert_report(&self, key: &ReportKey, measurement: Measurement) -> Result<Report>;
    /// Dated reports across the whole trial.
    async fn count_recorded_reports(&self, trial_id: i64) -> Result<i64>;
    async fn participant_has_recorded(&self, trial_id: i64, participant_id: i64) -> Result<bool>;
    async fn recorded_reports(&self, trial_id: i64) -> Result<Vec<Report>>;

    async fn get_tutorial_example(&self, id: i64) -> Result<Option<TutorialExample>>;
    /// Seed an example. An example with the same question is returned as is.
    async fn add_tutorial_example(&self, example: &TutorialExample) -> Result<TutorialExample>;
}

// ── In-memory implementation ────────────────────────────────────

#[derive(Default)]
struct Tables {
    next_id: i64,
    trials: Vec<Trial>,
    variables: Vec<Variable>,
    groups: Vec<Group>,
    participants: Vec<Participant>,
    invitations: Vec<Invitation>,
    reports: Vec<Report>,
    tutorial_examples: Vec<TutorialExample>,
}

impl Tables {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn participates(&self, trial_id: i64, user_id: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.trial_id == trial_id && p.user_id.as_deref() == Some(user_id))
    }
}

/// Process-local [`TrialStore`]. Every operation takes one lock, which makes
/// each find-or-create atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a trial's `featured` flag (editorial, not user-editable).
    pub fn set_featured(&self, trial_id: i64, featured: bool) {
        let mut t = lock_or_recover(&self.tables);
        if let Some(trial) = t.trials.iter_mut().find(|tr| tr.id == trial_id) {
            trial.featured = featured;
        }
    }

    /// Number of report rows, recorded or pending.
    pub fn report_rows(&self, trial_id: i64) -> usize {
        let t = lock_or_recover(&self.tables);
        t.reports.iter().filter(|r| r.trial_id == trial_id).count()
    }

    /// Number of participant rows, linked or detached.
    pub fn participant_rows(&self, trial_id: i64) -> usize {
        let t = lock_or_recover(&self.tables);
        t.participants.iter().filter(|p| p.trial_id == trial_id).count()
    }
}

#[async_trait]
impl TrialStore for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn create_trial(&self, draft: &TrialDraft, variable: &VariableDraft) -> Result<Trial> {
        let mut t = lock_or_recover(&self.tables);
        let id = t.id();
        let trial = Trial {
            id,
            title: draft.title.clone(),
            description: draft.description.clone(),
            owner_id: draft.owner_id.clone(),
            owner_email: draft.owner_email.clone(),
            private: draft.private,
            recruitment: draft.recruitment,
            n1trial: draft.n1trial,
            ending_style: draft.ending_style,
            ending_reports: draft.ending_reports,
            ending_date: draft.ending_date,
            finished: false,
            stopped_at: None,
            group_a: draft.group_a.clone(),
            group_b: draft.group_b.clone(),
            max_participants: draft.max_participants,
            featured: draft.featured,
            reporting_style: draft.reporting_style,
            instruction_delivery: draft.instruction_delivery,
            is_edited: false,
            created_at: Utc::now(),
        };
        let variable_id = t.id();
        t.variables.push(Variable {
            id: variable_id,
            trial_id: id,
            question: variable.question.clone(),
            style: variable.style,
        });
        t.trials.push(trial.clone());
        Ok(trial)
    }

    async fn get_trial(&self, id: i64) -> Result<Option<Trial>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.trials.iter().find(|tr| tr.id == id).cloned())
    }

    async fn update_trial(&self, trial: &Trial) -> Result<()> {
        let mut t = lock_or_recover(&self.tables);
        let slot = t
            .trials
            .iter_mut()
            .find(|tr| tr.id == trial.id)
            .with_context(|| format!("trial {} not found", trial.id))?;
        // Lifecycle fields are owned by stop_trial.
        let (finished, stopped_at, created_at) = (slot.finished, slot.stopped_at, slot.created_at);
        *slot = trial.clone();
        slot.finished = finished;
        slot.stopped_at = stopped_at;
        slot.created_at = created_at;
        Ok(())
    }

    async fn stop_trial(&self, id: i64) -> Result<bool> {
        let mut t = lock_or_recover(&self.tables);
        let trial = t
            .trials
            .iter_mut()
            .find(|tr| tr.id == id)
            .with_context(|| format!("trial {} not found", id))?;
        if trial.finished {
            return Ok(false);
        }
        trial.finished = true;
        trial.stopped_at = Some(Utc::now());
        Ok(true)
    }

    async fn list_trials(&self, query: &TrialQuery) -> Result<Vec<Trial>> {
        let t = lock_or_recover(&self.tables);
        let mut rows: Vec<Trial> = t
            .trials
            .iter()
            .filter(|tr| query.matches(tr))
            .filter(|tr| match &query.exclude_user {
                Some(user) => !tr.is_owned_by(user) && !t.participates(tr.id, user),
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn owned_trials(&self, user_id: &str) -> Result<Vec<Trial>> {
        let t = lock_or_recover(&self.tables);
        let mut rows: Vec<Trial> = t
            .trials
            .iter()
            .filter(|tr| tr.is_owned_by(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn participating_trials(&self, user_id: &str) -> Result<Vec<Trial>> {
        let t = lock_or_recover(&self.tables);
        let mut rows: Vec<Trial> = t
            .trials
            .iter()
            .filter(|tr| t.participates(tr.id, user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn get_variable(&self, trial_id: i64) -> Result<Option<Variable>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.variables.iter().find(|v| v.trial_id == trial_id).cloned())
    }

    async fn get_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.participants
            .iter()
            .find(|p| p.trial_id == trial_id && p.user_id.as_deref() == Some(user_id))
            .cloned())
    }

    async fn count_participants(&self, trial_id: i64) -> Result<i64> {
        let t = lock_or_recover(&self.tables);
        Ok(t.participants
            .iter()
            .filter(|p| p.trial_id == trial_id && p.user_id.is_some())
            .count() as i64)
    }

    async fn add_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>> {
        let mut t = lock_or_recover(&self.tables);
        if t.participates(trial_id, user_id) {
            return Ok(None);
        }
        let participant = Participant {
            id: t.id(),
            trial_id,
            user_id: Some(user_id.to_string()),
            group: None,
        };
        t.participants.push(participant.clone());
        Ok(Some(participant))
    }

    async fn detach_participant(&self, participant_id: i64) -> Result<()> {
        let mut t = lock_or_recover(&self.tables);
        let participant = t
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .with_context(|| format!("participant {} not found", participant_id))?;
        participant.user_id = None;
        Ok(())
    }

    async fn assign_group(&self, participant_id: i64, group: &Group) -> Result<()> {
        let mut t = lock_or_recover(&self.tables);
        let participant = t
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .with_context(|| format!("participant {} not found", participant_id))?;
        participant.group = Some(group.clone());
        Ok(())
    }

    async fn has_invitation(&self, trial_id: i64, email: &str) -> Result<bool> {
        let t = lock_or_recover(&self.tables);
        Ok(t.invitations
            .iter()
            .any(|i| i.trial_id == trial_id && i.email.eq_ignore_ascii_case(email)))
    }

    async fn get_or_create_invitation(
        &self,
        trial_id: i64,
        email: &str,
    ) -> Result<(Invitation, bool)> {
        let mut t = lock_or_recover(&self.tables);
        if let Some(existing) = t
            .invitations
            .iter()
            .find(|i| i.trial_id == trial_id && i.email.eq_ignore_ascii_case(email))
        {
            return Ok((existing.clone(), false));
        }
        let invitation = Invitation {
            id: t.id(),
            trial_id,
            email: email.to_string(),
            created_at: Utc::now(),
        };
        t.invitations.push(invitation.clone());
        Ok((invitation, true))
    }

    async fn ensure_groups(&self, trial_id: i64) -> Result<Vec<Group>> {
        let mut t = lock_or_recover(&self.tables);
        for arm in Arm::ALL {
            if !t.groups.iter().any(|g| g.trial_id == trial_id && g.name == arm) {
                let id = t.id();
                t.groups.push(Group {
                    id,
                    trial_id,
                    name: arm,
                });
            }
        }
        let mut groups: Vec<Group> = t
            .groups
            .iter()
            .filter(|g| g.trial_id == trial_id)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.name);
        Ok(groups)
    }

    async fn pending_report(&self, trial_id: i64, participant_id: i64) -> Result<Option<Report>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.reports
            .iter()
            .find(|r| {
                r.trial_id == trial_id && r.participant_id == participant_id && r.date.is_none()
            })
            .cloned())
    }

    async fn open_pending_report(
        &self,
        trial_id: i64,
        participant_id: i64,
        variable_id: i64,
        group: &Group,
    ) -> Result<Report> {
        let mut t = lock_or_recover(&self.tables);
        if let Some(report) = t.reports.iter_mut().find(|r| {
            r.trial_id == trial_id
                && r.participant_id == participant_id
                && r.variable_id == variable_id
                && r.date.is_none()
        }) {
            report.group = Some(group.clone());
            return Ok(report.clone());
        }
        let report = Report {
            id: t.id(),
            trial_id,
            participant_id,
            group: Some(group.clone()),
            variable_id,
            date: None,
            score: None,
            binary: None,
            count: None,
        };
        t.reports.push(report.clone());
        Ok(report)
    }

    async fn complete_pending_report(
        &self,
        report_id: i64,
        date: NaiveDate,
        measurement: Measurement,
    ) -> Result<Report> {
        let mut t = lock_or_recover(&self.tables);
        let report = t
            .reports
            .iter_mut()
            .find(|r| r.id == report_id)
            .with_context(|| format!("report {} not found", report_id))?;
        report.date = Some(date);
        report.apply(measurement);
        Ok(report.clone())
    }

    async fn upsert_report(&self, key: &ReportKey, measurement: Measurement) -> Result<Report> {
        let mut t = lock_or_recover(&self.tables);
        let existing = t.reports.iter_mut().find(|r| {
            r.trial_id == key.trial_id
                && r.date == Some(key.date)
                && r.participant_id == key.participant_id
                && r.group.as_ref().map(|g| g.id) == key.group_id
                && r.variable_id == key.variable_id
        });
        if let Some(report) = existing {
            report.apply(measurement);
            return Ok(report.clone());
        }
        let group = key
            .group_id
            .and_then(|gid| t.groups.iter().find(|g| g.id == gid).cloned());
        let mut report = Report {
            id: t.id(),
            trial_id: key.trial_id,
            participant_id: key.participant_id,
            group,
            variable_id: key.variable_id,
            date: Some(key.date),
            score: None,
            binary: None,
            count: None,
        };
        report.apply(measurement);
        t.reports.push(report.clone());
        Ok(report)
    }

    async fn count_recorded_reports(&self, trial_id: i64) -> Result<i64> {
        let t = lock_or_recover(&self.tables);
        Ok(t.reports
            .iter()
            .filter(|r| r.trial_id == trial_id && r.is_recorded())
            .count() as i64)
    }

    async fn participant_has_recorded(&self, trial_id: i64, participant_id: i64) -> Result<bool> {
        let t = lock_or_recover(&self.tables);
        Ok(t.reports.iter().any(|r| {
            r.trial_id == trial_id && r.participant_id == participant_id && r.is_recorded()
        }))
    }

    async fn recorded_reports(&self, trial_id: i64) -> Result<Vec<Report>> {
        let t = lock_or_recover(&self.tables);
        let mut rows: Vec<Report> = t
            .reports
            .iter()
            .filter(|r| r.trial_id == trial_id && r.is_recorded())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn get_tutorial_example(&self, id: i64) -> Result<Option<TutorialExample>> {
        let t = lock_or_recover(&self.tables);
        Ok(t.tutorial_examples.iter().find(|e| e.id == id).cloned())
    }

    async fn add_tutorial_example(&self, example: &TutorialExample) -> Result<TutorialExample> {
        let mut t = lock_or_recover(&self.tables);
        if let Some(existing) = t
            .tutorial_examples
            .iter()
            .find(|e| e.question == example.question)
        {
            return Ok(existing.clone());
        }
        let stored = TutorialExample {
            id: t.id(),
            ..example.clone()
        };
        t.tutorial_examples.push(stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(owner: &str) -> (TrialDraft, VariableDraft) {
        TrialForm {
            title: "Morning walk".to_string(),
            description: String::new(),
            group_a: "Walk".to_string(),
            group_b: "Rest".to_string(),
            private: false,
            recruitment: Recruitment::Anyone,
            ending_style: EndingStyle::Manual,
            ending_reports: None,
            ending_date: None,
            max_participants: None,
            reporting_style: ReportingStyle::Daily,
            instruction_delivery: InstructionDelivery::Email,
            variable: Some(VariableForm {
                question: "Mood".to_string(),
                style: VariableStyle::Score,
            }),
        }
        .into_draft(owner, &format!("{}@example.com", owner))
    }

    #[tokio::test]
    async fn create_trial_stores_its_variable() {
        let store = MemoryStore::new();
        let (d, v) = draft("alice");
        let trial = store.create_trial(&d, &v).await.unwrap();
        let variable = store.get_variable(trial.id).await.unwrap().unwrap();
        assert_eq!(variable.question, "Mood");
        assert_eq!(store.get_trial(trial.id).await.unwrap(), Some(trial));
    }

    #[tokio::test]
    async fn add_participant_twice_keeps_one_row() {
        let store = MemoryStore::new();
        let (d, v) = draft("alice");
        let trial = store.create_trial(&d, &v).await.unwrap();
        assert!(store.add_participant(trial.id, "bob").await.unwrap().is_some());
        assert!(store.add_participant(trial.id, "bob").await.unwrap().is_none());
        assert_eq!(store.participant_rows(trial.id), 1);
        assert_eq!(store.count_participants(trial.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn detach_keeps_row_but_unlinks_user() {
        let store = MemoryStore::new();
        let (d, v) = draft("alice");
        let trial = store.create_trial(&d, &v).await.unwrap();
        let p = store.add_participant(trial.id, "bob").await.unwrap().unwrap();
        store.detach_participant(p.id).await.unwrap();
        assert_eq!(store.participant_rows(trial.id), 1);
        assert_eq!(store.count_participants(trial.id).await.unwrap(), 0);
        assert!(store.get_participant(trial.id, "bob").await.unwrap().is_none());
        // Rejoining after leaving links a fresh row.
        assert!(store.add_participant(trial.id, "bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = MemoryStore::new();
        let (d, v) = draft("alice");
        let trial = store.create_trial(&d, &v).await.unwrap();
        assert!(store.stop_trial(trial.id).await.unwrap());
        let first = store.get_trial(trial.id).await.unwrap().unwrap().stopped_at;
        assert!(!store.stop_trial(trial.id).await.unwrap());
        let again = store.get_trial(trial.id).await.unwrap().unwrap();
        assert!(again.finished);
        assert_eq!(again.stopped_at, first);
    }

    #[tokio::test]
    async fn update_never_reopens() {
        let store = MemoryStore::new();
        let (d, v) = draft("alice");
        let mut trial = store.create_trial(&d, &v).await.unwrap();
        store.stop_trial(trial.id).await.unwrap();
        trial.title = "Renamed".to_string();
        trial.finished = false;
        store.update_trial(&trial).await.unwrap();
        let stored = store.get_trial(trial.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
        assert!(stored.finished);
    }

    #[tokio::test]
    async fn ensure_groups_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.ensure_groups(1).await.unwrap();
        let second = store.ensure_groups(1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|g| g.name).collect::<Vec<_>>(),
            vec![Arm::A, Arm::B]
        );
    }

    #[tokio::test]
    async fn invitations_are_unique_per_email() {
        let store = MemoryStore::new();
        let (a, created) = store.get_or_create_invitation(1, "x@example.com").await.unwrap();
        assert!(created);
        let (b, created) = store.get_or_create_invitation(1, "X@example.com").await.unwrap();
        assert!(!created);
        assert_eq!(a.id, b.id);
        assert!(store.has_invitation(1, "x@example.com").await.unwrap());
        assert!(!store.has_invitation(2, "x@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_report_updates_the_keyed_row() {
        let store = MemoryStore::new();
        let key = ReportKey {
            trial_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            participant_id: 2,
            group_id: None,
            variable_id: 3,
        };
        store.upsert_report(&key, Measurement::Score(4)).await.unwrap();
        let report = store.upsert_report(&key, Measurement::Score(6)).await.unwrap();
        assert_eq!(report.score, Some(6));
        assert_eq!(store.report_rows(1), 1);
        assert_eq!(store.count_recorded_reports(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pending_report_is_reused_and_regrouped() {
        let store = MemoryStore::new();
        let groups = store.ensure_groups(1).await.unwrap();
        let first = store.open_pending_report(1, 2, 3, &groups[0]).await.unwrap();
        let second = store.open_pending_report(1, 2, 3, &groups[1]).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.group.unwrap().name, Arm::B);
        assert_eq!(store.count_recorded_reports(1).await.unwrap(), 0);

        let done = store
            .complete_pending_report(first.id, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(), Measurement::Count(3))
            .await
            .unwrap();
        assert!(done.is_recorded());
        assert!(store.pending_report(1, 2).await.unwrap().is_none());
        assert!(store.participant_has_recorded(1, 2).await.unwrap());
    }

    #[tokio::test]
    async fn listing_filters_and_excludes_user() {
        let store = MemoryStore::new();
        let (d, v) = draft("alice");
        let open = store.create_trial(&d, &v).await.unwrap();
        let (mut d2, v2) = draft("alice");
        d2.private = true;
        store.create_trial(&d2, &v2).await.unwrap();
        let (d3, v3) = draft("carol");
        let joined = store.create_trial(&d3, &v3).await.unwrap();
        store.add_participant(joined.id, "bob").await.unwrap();

        let all_open = store
            .list_trials(&TrialQuery::open_recruitment(None))
            .await
            .unwrap();
        assert_eq!(all_open.len(), 2);

        let for_alice = store
            .list_trials(&TrialQuery::open_recruitment(Some("alice".into())))
            .await
            .unwrap();
        assert_eq!(for_alice.iter().map(|t| t.id).collect::<Vec<_>>(), vec![joined.id]);

        let for_bob = store
            .list_trials(&TrialQuery::open_recruitment(Some("bob".into())))
            .await
            .unwrap();
        assert_eq!(for_bob.iter().map(|t| t.id).collect::<Vec<_>>(), vec![open.id]);

        let found = store.list_trials(&TrialQuery::search("WALK")).await.unwrap();
        assert_eq!(found.len(), 2);
    }
}
