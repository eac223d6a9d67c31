//! # Reporting: Measurements, Cycles and Trial Closing
//!
//! A report submission resolves to one [`Measurement`] for the trial's
//! variable and is written through one of two paths:
//!
//! - **Self-trials** run an explicit per-participant cycle:
//!
//!   ```text
//!   AwaitingRandomization ──randomise──▶ AwaitingReport ──report──▶ Recorded
//!            ▲                               │    ▲                     │
//!            │                               └────┘ (re-randomise)      │
//!            └──────────────────────────── randomise ───────────────────┘
//!   ```
//!
//!   Reporting completes the pending record opened by randomisation.
//! - **Multi-participant trials** upsert the report keyed by
//!   (trial, date, participant, group, variable).
//!
//! After every write the closing rule is evaluated against the number of
//! recorded (dated) reports.

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::model::{
    Arm, EndingStyle, Measurement, Participant, Report, ReportKey, Trial, Variable, VariableStyle,
};
use crate::store::TrialStore;

/// Day-first date format used by the report form.
pub const REPORT_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Invalid date '{0}', expected DD/MM/YYYY")]
    BadDate(String),
    #[error("Missing field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid value '{value}' for '{field}'")]
    BadValue { field: &'static str, value: String },
    #[error("Randomise before reporting")]
    NotRandomised,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Report form as posted. Only the field matching the variable's style is read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportForm {
    #[serde(default)]
    pub date: String,
    pub score: Option<String>,
    pub binary: Option<String>,
    pub count: Option<String>,
}

pub fn parse_report_date(raw: &str) -> Result<NaiveDate, ReportError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, REPORT_DATE_FORMAT)
        .map_err(|_| ReportError::BadDate(raw.to_string()))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl ReportForm {
    /// The measurement for a variable of the given style.
    pub fn measurement(&self, style: VariableStyle) -> Result<Measurement, ReportError> {
        let int = |field: &'static str, raw: &Option<String>| -> Result<i64, ReportError> {
            let raw = raw.as_deref().ok_or(ReportError::MissingField(field))?;
            raw.trim().parse().map_err(|_| ReportError::BadValue {
                field,
                value: raw.to_string(),
            })
        };
        match style {
            VariableStyle::Score => Ok(Measurement::Score(int("score", &self.score)?)),
            VariableStyle::Count => Ok(Measurement::Count(int("count", &self.count)?)),
            // An unticked checkbox is simply absent from the form.
            VariableStyle::Binary => match self.binary.as_deref() {
                None => Ok(Measurement::Binary(false)),
                Some(raw) => parse_bool(raw).map(Measurement::Binary).ok_or_else(|| {
                    ReportError::BadValue {
                        field: "binary",
                        value: raw.to_string(),
                    }
                }),
            },
        }
    }
}

// ── Self-trial cycle ────────────────────────────────────────────

/// Where a self-trial participant is in the current reporting cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CycleState {
    /// No arm drawn for the next measurement yet.
    AwaitingRandomization,
    /// An arm was drawn; the pending report waits for its date and value.
    AwaitingReport { report_id: i64, arm: Option<Arm> },
    /// The last cycle was completed and no new one was opened.
    Recorded,
}

impl CycleState {
    pub async fn load(store: &dyn TrialStore, trial_id: i64, participant_id: i64) -> Result<Self> {
        if let Some(pending) = store.pending_report(trial_id, participant_id).await? {
            return Ok(CycleState::AwaitingReport {
                report_id: pending.id,
                arm: pending.group.map(|g| g.name),
            });
        }
        if store.participant_has_recorded(trial_id, participant_id).await? {
            Ok(CycleState::Recorded)
        } else {
            Ok(CycleState::AwaitingRandomization)
        }
    }

    /// The pending report a submission completes.
    pub fn pending_report(&self) -> Result<i64, ReportError> {
        match self {
            CycleState::AwaitingReport { report_id, .. } => Ok(*report_id),
            _ => Err(ReportError::NotRandomised),
        }
    }
}

// ── Closing ─────────────────────────────────────────────────────

/// Why a trial was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ReportCount,
    EndDate,
    Stopped,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ReportCount => "report_count",
            CloseReason::EndDate => "end_date",
            CloseReason::Stopped => "stopped",
        }
    }
}

/// Evaluate the trial's ending rule after a report dated `report_date`.
pub fn closing_due(
    trial: &Trial,
    recorded_reports: i64,
    report_date: NaiveDate,
    today: NaiveDate,
) -> Option<CloseReason> {
    if trial.finished {
        return None;
    }
    match trial.ending_style {
        EndingStyle::Manual => None,
        EndingStyle::ReportNum => match trial.ending_reports {
            Some(n) if recorded_reports >= n => Some(CloseReason::ReportCount),
            _ => None,
        },
        EndingStyle::Date => match trial.ending_date {
            Some(end) if report_date >= end || today >= end => Some(CloseReason::EndDate),
            _ => None,
        },
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub report: Report,
    pub closed: Option<CloseReason>,
}

/// Record one measurement and close the trial if its ending rule is met.
pub async fn submit_report(
    store: &dyn TrialStore,
    trial: &Trial,
    participant: &Participant,
    variable: &Variable,
    date: NaiveDate,
    measurement: Measurement,
    today: NaiveDate,
) -> Result<Submission, ReportError> {
    let report = if trial.n1trial {
        let pending = CycleState::load(store, trial.id, participant.id)
            .await?
            .pending_report()?;
        store.complete_pending_report(pending, date, measurement).await?
    } else {
        let key = ReportKey {
            trial_id: trial.id,
            date,
            participant_id: participant.id,
            group_id: participant.group.as_ref().map(|g| g.id),
            variable_id: variable.id,
        };
        store.upsert_report(&key, measurement).await?
    };
    info!(
        trial_id = trial.id,
        participant_id = participant.id,
        report_id = report.id,
        %date,
        "report recorded"
    );

    let recorded = store.count_recorded_reports(trial.id).await?;
    let mut closed = None;
    if let Some(reason) = closing_due(trial, recorded, date, today) {
        if store.stop_trial(trial.id).await? {
            info!(trial_id = trial.id, reason = reason.as_str(), recorded, "trial closed");
            closed = Some(reason);
        }
    }
    Ok(Submission { report, closed })
}

// ── Results ─────────────────────────────────────────────────────

/// Per-arm aggregate shown on the owner's peek page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    /// Arm name, or `None` for reports without an assigned arm.
    pub group: Option<Arm>,
    pub reports: usize,
    pub mean_score: Option<f64>,
    pub mean_count: Option<f64>,
    pub binary_rate: Option<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Summarise recorded reports by arm, arms in order.
pub fn summarise(reports: &[Report]) -> Vec<GroupSummary> {
    let mut by_arm: BTreeMap<Option<Arm>, Vec<&Report>> = BTreeMap::new();
    for report in reports.iter().filter(|r| r.is_recorded()) {
        by_arm
            .entry(report.group.as_ref().map(|g| g.name))
            .or_default()
            .push(report);
    }
    by_arm
        .into_iter()
        .map(|(group, rows)| {
            let scores: Vec<f64> = rows.iter().filter_map(|r| r.score).map(|v| v as f64).collect();
            let counts: Vec<f64> = rows.iter().filter_map(|r| r.count).map(|v| v as f64).collect();
            let binary: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.binary)
                .map(|b| if b { 1.0 } else { 0.0 })
                .collect();
            GroupSummary {
                group,
                reports: rows.len(),
                mean_score: mean(&scores),
                mean_count: mean(&counts),
                binary_rate: mean(&binary),
            }
        })
        .collect()
}

/// Raw export: `group,date,score`, one row per recorded report.
pub fn render_csv(reports: &[Report]) -> String {
    let mut out = String::from("group,date,score\n");
    for report in reports.iter() {
        let Some(date) = report.date else { continue };
        let group = report.group.as_ref().map(|g| g.name.as_str()).unwrap_or("");
        let score = report.score.map(|s| s.to_string()).unwrap_or_default();
        out.push_str(&format!("{},{},{}\n", group, date.format("%Y-%m-%d"), score));
    }
    out
}
