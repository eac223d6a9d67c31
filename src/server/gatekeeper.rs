//! Runs a gate chain against the store.
//!
//! `Authenticated` is evaluated before the trial is loaded; the participant
//! and invitation lookups only happen when a gate in the chain needs them.

use crate::access::{check_chain, resolve_detail, DetailPage, Gate, GateSubject, Identity, VisibilityLookups};
use crate::model::{Participant, Recruitment, Trial, Variable};

use super::errors::ViewError;
use super::middleware_auth::Requester;
use super::AppState;

/// A trial that passed its gates, with the requester's participant record
/// when the chain loaded it.
#[derive(Debug)]
pub struct Guarded {
    pub trial: Trial,
    pub participant: Option<Participant>,
}

impl Guarded {
    /// The participant record. Only call after a chain containing `Participant`.
    pub fn participant(&self) -> Result<&Participant, ViewError> {
        self.participant
            .as_ref()
            .ok_or_else(|| ViewError::Forbidden("You are not participating in this trial".into()))
    }
}

pub async fn guard(
    state: &AppState,
    chain: &[Gate],
    requester: &Requester,
    pk: i64,
) -> Result<Guarded, ViewError> {
    let identity = requester.identity();
    if chain.first() == Some(&Gate::Authenticated) && identity.is_none() {
        return Err(ViewError::login(&state.config, &requester.path));
    }

    let trial = load_trial(state, pk).await?;

    let participant = match identity {
        Some(id) if chain.iter().any(Gate::needs_participant) => {
            state.store.get_participant(trial.id, &id.user_id).await?
        }
        _ => None,
    };
    let invited = match identity {
        Some(id) if chain.iter().any(Gate::needs_invitation) => {
            state.store.has_invitation(trial.id, &id.email).await?
        }
        _ => false,
    };

    let subject = GateSubject {
        identity,
        trial: &trial,
        participant: participant.as_ref(),
        invited,
    };
    check_chain(chain, &subject)
        .map_err(|denial| ViewError::from_denial(denial, &state.config, &requester.path))?;

    Ok(Guarded { trial, participant })
}

pub async fn load_trial(state: &AppState, pk: i64) -> Result<Trial, ViewError> {
    state
        .store
        .get_trial(pk)
        .await?
        .ok_or(ViewError::NotFound("Trial"))
}

pub async fn load_variable(state: &AppState, trial_id: i64) -> Result<Variable, ViewError> {
    state
        .store
        .get_variable(trial_id)
        .await?
        .ok_or(ViewError::NotFound("Variable"))
}

/// Gather what the visibility resolver needs for this requester.
pub async fn visibility_lookups(
    state: &AppState,
    trial: &Trial,
    identity: Option<&Identity>,
) -> Result<VisibilityLookups, ViewError> {
    let mut lookups = VisibilityLookups::default();
    if let Some(id) = identity {
        if let Some(p) = state.store.get_participant(trial.id, &id.user_id).await? {
            lookups.is_participant = true;
            lookups.participant_arm = p.arm();
        }
        if trial.private || trial.recruitment == Recruitment::Invitation {
            lookups.invited = state.store.has_invitation(trial.id, &id.email).await?;
        }
    }
    if trial.recruitment == Recruitment::Invitation {
        let count = state.store.count_participants(trial.id).await?;
        lookups.admission_open = trial.accepts_participants(count);
    }
    Ok(lookups)
}

/// Resolve the detail page, failing with 401 when it is hidden from the requester.
pub async fn visible(
    state: &AppState,
    trial: &Trial,
    identity: Option<&Identity>,
) -> Result<DetailPage, ViewError> {
    let lookups = visibility_lookups(state, trial, identity).await?;
    let page = resolve_detail(trial, identity, &lookups);
    if page.is_denied() {
        return Err(ViewError::Unauthorized);
    }
    Ok(page)
}
