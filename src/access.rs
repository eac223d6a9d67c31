//! # Access: Identity, Ownership and Visibility Decisions
//!
//! Every trial endpoint runs a fixed, visible list of [`Gate`]s before its
//! handler body. The lists live in [`chains`]; a handler names the chain it
//! runs, so the order of checks is readable at the call site instead of being
//! implied by layering.
//!
//! ```text
//! request ─▶ Authenticated? ─▶ load trial ─▶ Owner? / Participant? / ... ─▶ handler
//!              (redirect)        (404)          (403 / 409)
//! ```
//!
//! [`Gate::Authenticated`] is only ever the first entry of a chain: an
//! anonymous request is turned away before any trial state is read.
//!
//! The detail page decision ([`resolve_detail`]) is a pure function of the
//! trial snapshot, the requester and a handful of precomputed lookups, so
//! every branch is testable without a store.

use serde::Serialize;

use crate::model::{Arm, Participant, Recruitment, Trial};

/// The authenticated requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

/// A single access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The request carries an identity. Failure redirects to login.
    Authenticated,
    /// The requester owns the trial. Anonymous requesters fail too.
    Owner,
    /// The requester holds a participant record on the trial.
    Participant,
    /// The trial is a self-trial.
    SelfTrial,
    /// The trial recruits by invitation only.
    InvitationOnly,
    /// On invitation-only trials, the requester's email holds an invitation.
    InvitedIfRequired,
    /// The trial has not finished.
    NotFinished,
    /// The requester is not the owner of a self-trial.
    NotSelfTrialOwner,
}

/// Gate lists, one per endpoint family.
pub mod chains {
    use super::Gate::{self, *};

    /// Edit: owner only, and only while the trial runs.
    pub const EDIT: &[Gate] = &[Owner, NotFinished];
    /// Peek and stop: owner only. Stopping a finished trial is a no-op.
    pub const OWNER: &[Gate] = &[Owner];
    /// Invitation creation.
    pub const INVITE: &[Gate] = &[Owner, InvitationOnly, NotFinished];
    /// Join: the join workflow reports finished trials itself.
    pub const JOIN: &[Gate] = &[Authenticated, InvitedIfRequired];
    /// Leave: a self-trial owner stays enrolled in their own trial.
    pub const LEAVE: &[Gate] = &[Authenticated, NotFinished, NotSelfTrialOwner, Participant];
    pub const REPORT: &[Gate] = &[Authenticated, Participant, NotFinished];
    pub const RANDOMISE: &[Gate] = &[Authenticated, SelfTrial, Participant, NotFinished];
    /// Pages that only need a signed-in user (create, reproduce, leave page).
    pub const SIGNED_IN: &[Gate] = &[Authenticated];

    pub const ALL: &[&[Gate]] = &[EDIT, OWNER, INVITE, JOIN, LEAVE, REPORT, RANDOMISE, SIGNED_IN];
}

/// Why a gate turned the request away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    AuthenticationRequired,
    Forbidden(&'static str),
    Finished,
}

/// Everything a gate may look at.
#[derive(Debug, Clone, Copy)]
pub struct GateSubject<'a> {
    pub identity: Option<&'a Identity>,
    pub trial: &'a Trial,
    pub participant: Option<&'a Participant>,
    pub invited: bool,
}

impl Gate {
    /// True for gates that need the participant record loaded.
    pub fn needs_participant(&self) -> bool {
        matches!(self, Gate::Participant)
    }

    /// True for gates that need the invitation lookup.
    pub fn needs_invitation(&self) -> bool {
        matches!(self, Gate::InvitedIfRequired)
    }

    pub fn check(&self, subject: &GateSubject<'_>) -> Result<(), Denial> {
        let trial = subject.trial;
        match self {
            Gate::Authenticated => match subject.identity {
                Some(_) => Ok(()),
                None => Err(Denial::AuthenticationRequired),
            },
            Gate::Owner => match subject.identity {
                Some(id) if trial.is_owned_by(&id.user_id) => Ok(()),
                _ => Err(Denial::Forbidden("Not Your Trial!")),
            },
            Gate::Participant => match subject.participant {
                Some(_) => Ok(()),
                None => Err(Denial::Forbidden("You are not participating in this trial")),
            },
            Gate::SelfTrial => {
                if trial.n1trial {
                    Ok(())
                } else {
                    Err(Denial::Forbidden("Only self-trials can be randomised on demand"))
                }
            }
            Gate::InvitationOnly => {
                if trial.recruitment == Recruitment::Invitation {
                    Ok(())
                } else {
                    Err(Denial::Forbidden("This trial is open to anyone"))
                }
            }
            Gate::InvitedIfRequired => {
                let owner = subject
                    .identity
                    .is_some_and(|id| trial.is_owned_by(&id.user_id));
                if trial.recruitment != Recruitment::Invitation || subject.invited || owner {
                    Ok(())
                } else {
                    Err(Denial::Forbidden("This trial is by invitation only"))
                }
            }
            Gate::NotFinished => {
                if trial.finished {
                    Err(Denial::Finished)
                } else {
                    Ok(())
                }
            }
            Gate::NotSelfTrialOwner => match subject.identity {
                Some(id) if trial.n1trial && trial.is_owned_by(&id.user_id) => {
                    Err(Denial::Forbidden("You can't leave your own self-trial"))
                }
                _ => Ok(()),
            },
        }
    }
}

/// Run the gates in order, stopping at the first denial.
pub fn check_chain(chain: &[Gate], subject: &GateSubject<'_>) -> Result<(), Denial> {
    chain.iter().try_for_each(|gate| gate.check(subject))
}

// ── Visibility ──────────────────────────────────────────────────

/// The detail-page presentations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailVariant {
    Recruiting,
    Report,
    Owner,
    Participant,
    Unauthorized,
}

impl DetailVariant {
    pub fn template(&self) -> &'static str {
        match self {
            DetailVariant::Recruiting => "trials/trial_detail_recruiting.html",
            DetailVariant::Report => "trials/trial_detail_report.html",
            DetailVariant::Owner => "trials/trial_detail_owner.html",
            DetailVariant::Participant => "trials/trial_detail_participant.html",
            DetailVariant::Unauthorized => "unauthorized",
        }
    }

    pub fn page_title(&self) -> &'static str {
        match self {
            DetailVariant::Recruiting => "Recruiting Trial",
            DetailVariant::Report => "Trial Report",
            DetailVariant::Owner => "Your Trial",
            DetailVariant::Participant => "Participating In",
            DetailVariant::Unauthorized => "Unauthorized",
        }
    }

    /// HTTP status the variant is served with.
    pub fn status(&self) -> u16 {
        match self {
            DetailVariant::Unauthorized => 401,
            _ => 200,
        }
    }
}

/// Store lookups the resolver needs, computed by the caller for the requester.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VisibilityLookups {
    /// The requester has a (linked) participant record.
    pub is_participant: bool,
    /// The participant's assigned arm, once randomised.
    pub participant_arm: Option<Arm>,
    /// The requester's email holds an invitation on the trial.
    pub invited: bool,
    /// The trial's admission predicate currently holds.
    pub admission_open: bool,
}

/// The resolved detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailPage {
    pub variant: DetailVariant,
    pub detail_template: &'static str,
    pub page_title: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_owner: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub participant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_join: Option<bool>,
}

impl DetailPage {
    fn new(variant: DetailVariant) -> Self {
        DetailPage {
            variant,
            detail_template: variant.template(),
            page_title: variant.page_title(),
            is_owner: false,
            participant: false,
            instructions: None,
            can_join: None,
        }
    }

    pub fn is_denied(&self) -> bool {
        self.variant == DetailVariant::Unauthorized
    }
}

/// Decide whether and how the requester sees a trial's detail page.
///
/// Private trials are visible to their owner; private self-trials to nobody
/// else; other private trials to participants and invitees only.
pub fn resolve_detail(
    trial: &Trial,
    identity: Option<&Identity>,
    lookups: &VisibilityLookups,
) -> DetailPage {
    let is_owner = identity.is_some_and(|id| trial.is_owned_by(&id.user_id));

    if trial.private && !is_owner {
        let allowed = !trial.n1trial
            && identity.is_some()
            && (lookups.is_participant || lookups.invited);
        if !allowed {
            return DetailPage::new(DetailVariant::Unauthorized);
        }
    }

    let mut page = if trial.finished {
        let mut page = DetailPage::new(DetailVariant::Report);
        page.is_owner = is_owner;
        page
    } else if is_owner {
        let mut page = DetailPage::new(DetailVariant::Owner);
        page.is_owner = true;
        page
    } else if identity.is_some() && lookups.is_participant {
        let mut page = DetailPage::new(DetailVariant::Participant);
        page.participant = true;
        page.instructions = lookups
            .participant_arm
            .map(|arm| trial.instructions_for(arm).to_string());
        page
    } else {
        DetailPage::new(DetailVariant::Recruiting)
    };

    if trial.recruitment == Recruitment::Invitation {
        page.can_join = Some(lookups.admission_open && identity.is_some() && lookups.invited);
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_trial;
    use crate::model::Group;

    fn user(id: &str) -> Identity {
        Identity {
            user_id: id.to_string(),
            email: format!("{}@example.com", id),
        }
    }

    fn participant(arm: Option<Arm>) -> Participant {
        Participant {
            id: 1,
            trial_id: 7,
            user_id: Some("p".to_string()),
            group: arm.map(|name| Group {
                id: 9,
                trial_id: 7,
                name,
            }),
        }
    }

    #[test]
    fn authenticated_only_ever_leads_a_chain() {
        for chain in chains::ALL {
            for (i, gate) in chain.iter().enumerate() {
                if *gate == Gate::Authenticated {
                    assert_eq!(i, 0, "Authenticated must be the outermost gate");
                }
            }
        }
    }

    #[test]
    fn owner_gate_rejects_strangers_and_anonymous() {
        let trial = sample_trial();
        let owner = user("owner");
        let stranger = user("stranger");
        let subject = |identity| GateSubject {
            identity,
            trial: &trial,
            participant: None,
            invited: false,
        };
        assert_eq!(check_chain(chains::OWNER, &subject(Some(&owner))), Ok(()));
        assert_eq!(
            check_chain(chains::OWNER, &subject(Some(&stranger))),
            Err(Denial::Forbidden("Not Your Trial!"))
        );
        assert_eq!(
            check_chain(chains::OWNER, &subject(None)),
            Err(Denial::Forbidden("Not Your Trial!"))
        );
    }

    #[test]
    fn edit_chain_checks_ownership_before_finish() {
        let mut trial = sample_trial();
        trial.finished = true;
        let stranger = user("stranger");
        let owner = user("owner");
        let subject = |identity| GateSubject {
            identity,
            trial: &trial,
            participant: None,
            invited: false,
        };
        assert!(matches!(
            check_chain(chains::EDIT, &subject(Some(&stranger))),
            Err(Denial::Forbidden(_))
        ));
        assert_eq!(
            check_chain(chains::EDIT, &subject(Some(&owner))),
            Err(Denial::Finished)
        );
    }

    #[test]
    fn anonymous_report_is_sent_to_login_first() {
        let mut trial = sample_trial();
        trial.finished = true;
        let subject = GateSubject {
            identity: None,
            trial: &trial,
            participant: None,
            invited: false,
        };
        assert_eq!(
            check_chain(chains::REPORT, &subject),
            Err(Denial::AuthenticationRequired)
        );
    }

    #[test]
    fn randomise_requires_self_trial_and_participation() {
        let mut trial = sample_trial();
        let me = user("p");
        let p = participant(None);
        let with = |trial: &Trial, participant| {
            check_chain(
                chains::RANDOMISE,
                &GateSubject {
                    identity: Some(&me),
                    trial,
                    participant,
                    invited: false,
                },
            )
        };
        assert!(matches!(with(&trial, Some(&p)), Err(Denial::Forbidden(_))));
        trial.n1trial = true;
        assert!(matches!(with(&trial, None), Err(Denial::Forbidden(_))));
        assert_eq!(with(&trial, Some(&p)), Ok(()));
    }

    #[test]
    fn join_on_invitation_trial_needs_invite() {
        let mut trial = sample_trial();
        trial.recruitment = Recruitment::Invitation;
        let me = user("p");
        let subject = |invited| GateSubject {
            identity: Some(&me),
            trial: &trial,
            participant: None,
            invited,
        };
        assert!(check_chain(chains::JOIN, &subject(false)).is_err());
        assert_eq!(check_chain(chains::JOIN, &subject(true)), Ok(()));
    }

    #[test]
    fn self_trial_owner_cannot_leave() {
        let mut trial = sample_trial();
        trial.n1trial = true;
        let owner = user("owner");
        let p = participant(None);
        let leave = |trial: &Trial| {
            check_chain(
                chains::LEAVE,
                &GateSubject {
                    identity: Some(&owner),
                    trial,
                    participant: Some(&p),
                    invited: false,
                },
            )
        };
        assert_eq!(
            leave(&trial),
            Err(Denial::Forbidden("You can't leave your own self-trial"))
        );

        trial.n1trial = false;
        assert_eq!(leave(&trial), Ok(()));
    }

    #[test]
    fn invite_chain_requires_invitation_recruitment() {
        let trial = sample_trial();
        let owner = user("owner");
        let subject = GateSubject {
            identity: Some(&owner),
            trial: &trial,
            participant: None,
            invited: false,
        };
        assert!(check_chain(chains::INVITE, &subject).is_err());
    }

    // ── resolve_detail ───────────────────────────────────────────

    #[test]
    fn private_self_trial_hidden_from_everyone_but_owner() {
        let mut trial = sample_trial();
        trial.private = true;
        trial.n1trial = true;
        let lookups = VisibilityLookups {
            is_participant: true,
            invited: true,
            ..Default::default()
        };
        let stranger = user("stranger");
        assert!(resolve_detail(&trial, None, &lookups).is_denied());
        assert!(resolve_detail(&trial, Some(&stranger), &lookups).is_denied());

        let owner = user("owner");
        let page = resolve_detail(&trial, Some(&owner), &lookups);
        assert_eq!(page.variant, DetailVariant::Owner);
    }

    #[test]
    fn private_trial_requires_authentication() {
        let mut trial = sample_trial();
        trial.private = true;
        let page = resolve_detail(&trial, None, &VisibilityLookups::default());
        assert_eq!(page.variant, DetailVariant::Unauthorized);
        assert_eq!(page.variant.status(), 401);
    }

    #[test]
    fn private_trial_admits_participants_and_invitees_only() {
        let mut trial = sample_trial();
        trial.private = true;
        let me = user("p");

        let denied = resolve_detail(&trial, Some(&me), &VisibilityLookups::default());
        assert!(denied.is_denied());

        let invited = VisibilityLookups {
            invited: true,
            ..Default::default()
        };
        let page = resolve_detail(&trial, Some(&me), &invited);
        assert_eq!(page.variant, DetailVariant::Recruiting);

        let participating = VisibilityLookups {
            is_participant: true,
            ..Default::default()
        };
        let page = resolve_detail(&trial, Some(&me), &participating);
        assert_eq!(page.variant, DetailVariant::Participant);
    }

    #[test]
    fn finished_trial_shows_report_and_flags_owner() {
        let mut trial = sample_trial();
        trial.finished = true;
        let owner = user("owner");
        let page = resolve_detail(&trial, Some(&owner), &VisibilityLookups::default());
        assert_eq!(page.variant, DetailVariant::Report);
        assert!(page.is_owner);

        let other = user("other");
        let page = resolve_detail(&trial, Some(&other), &VisibilityLookups::default());
        assert_eq!(page.variant, DetailVariant::Report);
        assert!(!page.is_owner);

        let page = resolve_detail(&trial, None, &VisibilityLookups::default());
        assert_eq!(page.variant, DetailVariant::Report);
    }

    #[test]
    fn participant_sees_arm_instructions() {
        let trial = sample_trial();
        let me = user("p");
        let lookups = VisibilityLookups {
            is_participant: true,
            participant_arm: Some(Arm::B),
            ..Default::default()
        };
        let page = resolve_detail(&trial, Some(&me), &lookups);
        assert_eq!(page.variant, DetailVariant::Participant);
        assert!(page.participant);
        assert_eq!(page.instructions.as_deref(), Some("Drink tea"));

        let unassigned = VisibilityLookups {
            participant_arm: None,
            ..lookups
        };
        let page = resolve_detail(&trial, Some(&me), &unassigned);
        assert_eq!(page.instructions, None);
    }

    #[test]
    fn anonymous_on_public_trial_sees_recruiting_page() {
        let trial = sample_trial();
        let page = resolve_detail(&trial, None, &VisibilityLookups::default());
        assert_eq!(page.variant, DetailVariant::Recruiting);
        assert_eq!(page.page_title, "Recruiting Trial");
        assert_eq!(page.can_join, None);
    }

    #[test]
    fn can_join_only_on_invitation_trials() {
        let mut trial = sample_trial();
        trial.recruitment = Recruitment::Invitation;
        let me = user("p");
        let open_invited = VisibilityLookups {
            invited: true,
            admission_open: true,
            ..Default::default()
        };
        assert_eq!(
            resolve_detail(&trial, Some(&me), &open_invited).can_join,
            Some(true)
        );
        assert_eq!(
            resolve_detail(&trial, None, &open_invited).can_join,
            Some(false)
        );
        let full = VisibilityLookups {
            admission_open: false,
            ..open_invited
        };
        assert_eq!(resolve_detail(&trial, Some(&me), &full).can_join, Some(false));
        let uninvited = VisibilityLookups {
            invited: false,
            ..open_invited
        };
        assert_eq!(
            resolve_detail(&trial, Some(&me), &uninvited).can_join,
            Some(false)
        );
    }

    #[test]
    fn detail_page_serializes_only_set_flags() {
        let trial = sample_trial();
        let page = resolve_detail(&trial, None, &VisibilityLookups::default());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["variant"], "recruiting");
        assert!(json.get("is_owner").is_none());
        assert!(json.get("can_join").is_none());
    }
}
