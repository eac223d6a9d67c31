//! Creation and edit forms, field-level validation, and trial drafts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::*;

const MAX_TITLE_LEN: usize = 200;

/// Field name → messages, rendered as `{"errors": {...}}` on the form-invalid path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when no field failed.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<&str> = self.0.keys().map(String::as_str).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

/// The measured variable as submitted with a trial form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableForm {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub style: VariableStyle,
}

/// Payload for creating, reproducing or editing a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group_a: String,
    #[serde(default)]
    pub group_b: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub recruitment: Recruitment,
    #[serde(default)]
    pub ending_style: EndingStyle,
    pub ending_reports: Option<i64>,
    pub ending_date: Option<NaiveDate>,
    pub max_participants: Option<i64>,
    #[serde(default)]
    pub reporting_style: ReportingStyle,
    #[serde(default)]
    pub instruction_delivery: InstructionDelivery,
    pub variable: Option<VariableForm>,
}

impl TrialForm {
    /// Validate every field, collecting all failures.
    ///
    /// `require_variable` is false for edits, which never touch the variable.
    pub fn validate(&self, require_variable: bool) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        let title = self.title.trim();
        if title.is_empty() {
            errors.add("title", "This field is required.");
        } else if title.chars().count() > MAX_TITLE_LEN {
            errors.add(
                "title",
                format!("Ensure this value has at most {} characters.", MAX_TITLE_LEN),
            );
        }
        if self.group_a.trim().is_empty() {
            errors.add("group_a", "This field is required.");
        }
        if self.group_b.trim().is_empty() {
            errors.add("group_b", "This field is required.");
        }
        match self.ending_style {
            EndingStyle::ReportNum => match self.ending_reports {
                Some(n) if n >= 1 => {}
                _ => errors.add("ending_reports", "Enter a report count of at least 1."),
            },
            EndingStyle::Date if self.ending_date.is_none() => {
                errors.add("ending_date", "Enter the date this trial ends.");
            }
            _ => {}
        }
        if let Some(max) = self.max_participants {
            if max < 1 {
                errors.add("max_participants", "Ensure this value is at least 1.");
            }
        }
        match &self.variable {
            Some(v) if v.question.trim().is_empty() => {
                errors.add("variable.question", "This field is required.");
            }
            None if require_variable => errors.add("variable", "This field is required."),
            _ => {}
        }
        errors.into_result()
    }

    /// Build the unsaved trial and variable this form describes.
    ///
    /// Call after [`TrialForm::validate`] succeeded.
    pub fn into_draft(self, owner_id: &str, owner_email: &str) -> (TrialDraft, VariableDraft) {
        let variable = self.variable.clone().unwrap_or(VariableForm {
            question: String::new(),
            style: VariableStyle::Score,
        });
        let draft = TrialDraft {
            title: self.title.trim().to_string(),
            description: self.description,
            owner_id: owner_id.to_string(),
            owner_email: owner_email.to_string(),
            private: self.private,
            recruitment: self.recruitment,
            n1trial: false,
            ending_style: self.ending_style,
            ending_reports: self.ending_reports,
            ending_date: self.ending_date,
            group_a: self.group_a,
            group_b: self.group_b,
            max_participants: self.max_participants,
            featured: false,
            reporting_style: self.reporting_style,
            instruction_delivery: self.instruction_delivery,
        };
        (
            draft,
            VariableDraft {
                question: variable.question.trim().to_string(),
                style: variable.style,
            },
        )
    }

    /// Overwrite the editable fields of an existing trial and flag it as edited.
    ///
    /// Ownership, lifecycle state and the N=1 flag are never changed by an
    /// edit, and a self-trial keeps its self-trial settings.
    pub fn apply_to(&self, trial: &mut Trial) {
        trial.title = self.title.trim().to_string();
        trial.description = self.description.clone();
        trial.group_a = self.group_a.clone();
        trial.group_b = self.group_b.clone();
        trial.private = self.private;
        trial.recruitment = self.recruitment;
        trial.ending_style = self.ending_style;
        trial.ending_reports = self.ending_reports;
        trial.ending_date = self.ending_date;
        trial.max_participants = self.max_participants;
        trial.reporting_style = self.reporting_style;
        trial.instruction_delivery = self.instruction_delivery;
        if trial.n1trial {
            trial.max_participants = Some(1);
            trial.reporting_style = ReportingStyle::Whenever;
            trial.instruction_delivery = InstructionDelivery::OnDemand;
        }
        trial.is_edited = true;
    }
}

/// An unsaved trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialDraft {
    pub title: String,
    pub description: String,
    pub owner_id: String,
    pub owner_email: String,
    pub private: bool,
    pub recruitment: Recruitment,
    pub n1trial: bool,
    pub ending_style: EndingStyle,
    pub ending_reports: Option<i64>,
    pub ending_date: Option<NaiveDate>,
    pub group_a: String,
    pub group_b: String,
    pub max_participants: Option<i64>,
    pub featured: bool,
    pub reporting_style: ReportingStyle,
    pub instruction_delivery: InstructionDelivery,
}

impl TrialDraft {
    /// Force the settings every self-trial runs with.
    pub fn into_n1(mut self) -> Self {
        self.n1trial = true;
        self.reporting_style = ReportingStyle::Whenever;
        self.instruction_delivery = InstructionDelivery::OnDemand;
        self.max_participants = Some(1);
        self
    }
}

/// An unsaved variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableDraft {
    pub question: String,
    pub style: VariableStyle,
}

/// Derive a new draft, owned by the requester, from an existing trial.
///
/// The copy starts fresh: not finished, not featured, not edited. The
/// template's single variable is duplicated alongside.
pub fn derive_draft(
    template: &Trial,
    variable: &Variable,
    owner_id: &str,
    owner_email: &str,
) -> (TrialDraft, VariableDraft) {
    let draft = TrialDraft {
        title: template.title.clone(),
        description: template.description.clone(),
        owner_id: owner_id.to_string(),
        owner_email: owner_email.to_string(),
        private: template.private,
        recruitment: template.recruitment,
        n1trial: template.n1trial,
        ending_style: template.ending_style,
        ending_reports: template.ending_reports,
        ending_date: template.ending_date,
        group_a: template.group_a.clone(),
        group_b: template.group_b.clone(),
        max_participants: template.max_participants,
        featured: false,
        reporting_style: template.reporting_style,
        instruction_delivery: template.instruction_delivery,
    };
    (
        draft,
        VariableDraft {
            question: variable.question.clone(),
            style: variable.style,
        },
    )
}

impl From<&TrialDraft> for TrialForm {
    fn from(draft: &TrialDraft) -> Self {
        TrialForm {
            title: draft.title.clone(),
            description: draft.description.clone(),
            group_a: draft.group_a.clone(),
            group_b: draft.group_b.clone(),
            private: draft.private,
            recruitment: draft.recruitment,
            ending_style: draft.ending_style,
            ending_reports: draft.ending_reports,
            ending_date: draft.ending_date,
            max_participants: draft.max_participants,
            reporting_style: draft.reporting_style,
            instruction_delivery: draft.instruction_delivery,
            variable: None,
        }
    }
}

/// Current values of a trial, for the edit page.
impl From<&Trial> for TrialForm {
    fn from(trial: &Trial) -> Self {
        TrialForm {
            title: trial.title.clone(),
            description: trial.description.clone(),
            group_a: trial.group_a.clone(),
            group_b: trial.group_b.clone(),
            private: trial.private,
            recruitment: trial.recruitment,
            ending_style: trial.ending_style,
            ending_reports: trial.ending_reports,
            ending_date: trial.ending_date,
            max_participants: trial.max_participants,
            reporting_style: trial.reporting_style,
            instruction_delivery: trial.instruction_delivery,
            variable: None,
        }
    }
}

/// The guided-creation form: just enough to run a self-trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TutorialForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub group_a: String,
    #[serde(default)]
    pub group_b: String,
    #[serde(default)]
    pub measure_style: VariableStyle,
    #[serde(default)]
    pub measure_question: String,
}

impl TutorialForm {
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::default();
        for (field, value) in [
            ("title", &self.title),
            ("group_a", &self.group_a),
            ("group_b", &self.group_b),
            ("measure_question", &self.measure_question),
        ] {
            if value.trim().is_empty() {
                errors.add(field, "This field is required.");
            }
        }
        errors.into_result()
    }

    pub fn is_blank(&self) -> bool {
        [&self.title, &self.group_a, &self.group_b, &self.measure_question]
            .iter()
            .all(|value| value.trim().is_empty())
    }

    /// The answers as a query string, so they survive a trip through login.
    pub fn to_query(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("title", &self.title)
            .append_pair("group_a", &self.group_a)
            .append_pair("group_b", &self.group_b)
            .append_pair("measure_style", self.measure_style.as_str())
            .append_pair("measure_question", &self.measure_question)
            .finish()
    }
}

impl From<&TutorialExample> for TutorialForm {
    fn from(example: &TutorialExample) -> Self {
        TutorialForm {
            title: example.question.clone(),
            group_a: example.group_a.clone(),
            group_b: example.group_b.clone(),
            measure_style: example.measure_style,
            measure_question: example.measure_question.clone(),
        }
    }
}

/// A private, manually-ended self-trial built from the tutorial's answers.
pub fn n1_with_sane_defaults(
    owner_id: &str,
    owner_email: &str,
    form: &TutorialForm,
) -> (TrialDraft, VariableDraft) {
    let draft = TrialDraft {
        title: form.title.trim().to_string(),
        description: String::new(),
        owner_id: owner_id.to_string(),
        owner_email: owner_email.to_string(),
        private: true,
        recruitment: Recruitment::Invitation,
        n1trial: false,
        ending_style: EndingStyle::Manual,
        ending_reports: None,
        ending_date: None,
        group_a: form.group_a.clone(),
        group_b: form.group_b.clone(),
        max_participants: None,
        featured: false,
        reporting_style: ReportingStyle::Whenever,
        instruction_delivery: InstructionDelivery::OnDemand,
    }
    .into_n1();
    (
        draft,
        VariableDraft {
            question: form.measure_question.trim().to_string(),
            style: form.measure_style,
        },
    )
}
