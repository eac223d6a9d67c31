//! # Model: Trials, Arms, Participants, Invitations, Reports
//!
//! The entity layer the request handlers operate on. Entities are plain data
//! snapshots loaded through a [`crate::store::TrialStore`]; the rules that only
//! depend on a snapshot (admission predicate, canonical URL, arm instructions,
//! form validation, draft derivation) live here so they can be tested without
//! a database.
//!
//! ## Lifecycle
//!
//! ```text
//! TrialForm ──validate──▶ TrialDraft + VariableDraft ──store──▶ Trial (recruiting)
//!                                                                │ join / report
//!                                                                ▼
//!                                                          Trial (running)
//!                                                                │ stop / closing rule
//!                                                                ▼
//!                                                          Trial (finished, terminal)
//! ```
//!
//! ## Module Structure
//!
//! - [`types`]: entities, enums and their text encodings
//! - [`forms`]: creation/edit forms, field errors, drafts, reproduction, N=1 defaults

mod forms;
mod types;

pub use forms::*;
pub use types::*;
