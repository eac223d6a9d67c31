//! # Participation: Join, Leave, Randomise
//!
//! Join failures are a closed set ([`JoinError`]) that the join page turns
//! into messages; they are values, not store errors, so callers match on them
//! exhaustively. Store failures travel separately as `anyhow::Error`.
//!
//! Randomisation draws from an injected [`StdRng`], so a configured seed
//! makes group assignment reproducible.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Mutex;
use tracing::info;

use crate::access::Identity;
use crate::model::{Group, Participant, Trial, TrialDraft, Variable, VariableDraft};
use crate::store::{lock_or_recover, TrialStore};

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Too many participants on this trial already")]
    CapacityExceeded,
    #[error("You were already participating in this trial!")]
    AlreadyJoined,
    #[error("This is your trial - joining it would be wonky!")]
    OwnerCannotJoin,
    #[error("This trial has already finished!")]
    TrialFinished,
}

impl JoinError {
    /// Label for the joins counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            JoinError::CapacityExceeded => "capacity_exceeded",
            JoinError::AlreadyJoined => "already_joined",
            JoinError::OwnerCannotJoin => "owner",
            JoinError::TrialFinished => "finished",
        }
    }
}

/// Admission rules, in order: finished, self-trial, owner, already joined,
/// capacity.
///
/// A self-trial has exactly one participant, its owner, enrolled at creation.
/// Anyone else is refused as over capacity whatever the stored cap says.
pub fn admission(
    trial: &Trial,
    user_id: &str,
    already_joined: bool,
    participant_count: i64,
) -> Result<(), JoinError> {
    if trial.finished {
        return Err(JoinError::TrialFinished);
    }
    if trial.n1trial && !trial.is_owned_by(user_id) {
        return Err(JoinError::CapacityExceeded);
    }
    if !trial.n1trial && trial.is_owned_by(user_id) {
        return Err(JoinError::OwnerCannotJoin);
    }
    if already_joined {
        return Err(JoinError::AlreadyJoined);
    }
    if !trial.accepts_participants(participant_count) {
        return Err(JoinError::CapacityExceeded);
    }
    Ok(())
}

/// Enrol the requester. The outer `Result` carries store failures.
pub async fn join(
    store: &dyn TrialStore,
    trial: &Trial,
    identity: &Identity,
) -> Result<Result<Participant, JoinError>> {
    let already = store
        .get_participant(trial.id, &identity.user_id)
        .await?
        .is_some();
    let count = store.count_participants(trial.id).await?;
    if let Err(e) = admission(trial, &identity.user_id, already, count) {
        return Ok(Err(e));
    }
    // A concurrent join by the same user loses the insert and reads as a duplicate.
    match store.add_participant(trial.id, &identity.user_id).await? {
        Some(participant) => {
            info!(trial_id = trial.id, user_id = %identity.user_id, "participant joined");
            Ok(Ok(participant))
        }
        None => Ok(Err(JoinError::AlreadyJoined)),
    }
}

/// Detach the participant from its user. The row and its reports remain.
pub async fn leave(store: &dyn TrialStore, participant: &Participant) -> Result<()> {
    store.detach_participant(participant.id).await?;
    info!(
        trial_id = participant.trial_id,
        participant_id = participant.id,
        "participant left"
    );
    Ok(())
}

/// Persist a new trial. Self-trials enrol their owner straight away.
pub async fn launch(
    store: &dyn TrialStore,
    draft: &TrialDraft,
    variable: &VariableDraft,
) -> Result<Trial> {
    let trial = store.create_trial(draft, variable).await?;
    if trial.n1trial {
        store
            .add_participant(trial.id, &trial.owner_id)
            .await
            .context("enrolling self-trial owner")?;
    }
    info!(trial_id = trial.id, n1 = trial.n1trial, owner = %trial.owner_id, "trial created");
    Ok(trial)
}

/// Pick one of the trial's groups uniformly, creating them on first use.
async fn draw_group(store: &dyn TrialStore, rng: &Mutex<StdRng>, trial: &Trial) -> Result<Group> {
    let groups = store.ensure_groups(trial.id).await?;
    let group = {
        let mut rng = lock_or_recover(rng);
        groups.choose(&mut *rng).cloned()
    };
    group.with_context(|| format!("trial {} has no groups", trial.id))
}

/// Give a multi-participant trial's participant its arm for the whole trial.
///
/// An arm already assigned is kept; only unassigned participants draw.
pub async fn allocate(
    store: &dyn TrialStore,
    rng: &Mutex<StdRng>,
    trial: &Trial,
    participant: &Participant,
) -> Result<Group> {
    if let Some(group) = &participant.group {
        return Ok(group.clone());
    }
    let group = draw_group(store, rng, trial).await?;
    store.assign_group(participant.id, &group).await?;
    info!(
        trial_id = trial.id,
        participant_id = participant.id,
        arm = %group.name,
        "allocated"
    );
    Ok(group)
}

/// Draw an arm for the next self-trial reporting cycle.
///
/// Picks uniformly from the trial's groups (created on first use), opens or
/// reuses the participant's pending report and stamps the arm on it and on
/// the participant.
pub async fn randomise(
    store: &dyn TrialStore,
    rng: &Mutex<StdRng>,
    trial: &Trial,
    participant: &Participant,
    variable: &Variable,
) -> Result<Group> {
    let group = draw_group(store, rng, trial).await?;
    store.assign_group(participant.id, &group).await?;
    let report = store
        .open_pending_report(trial.id, participant.id, variable.id, &group)
        .await?;
    info!(
        trial_id = trial.id,
        participant_id = participant.id,
        report_id = report.id,
        arm = %group.name,
        "randomised"
    );
    Ok(group)
}
