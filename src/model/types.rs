//! Entity types and enums.
//!
//! Enums are persisted as text. The text form is the same snake_case token
//! used on the JSON surface, so a row value and a request payload value are
//! interchangeable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Implements `Display`/`FromStr` for a fieldless enum from a fixed token table.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                match s {
                    $($token => Ok($name::$variant),)+
                    other => anyhow::bail!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ),
                }
            }
        }
    };
}

/// Who may join a trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recruitment {
    /// Anyone with an account may join.
    #[default]
    Anyone,
    /// Only emails holding an [`Invitation`] may join.
    Invitation,
}

text_enum!(Recruitment {
    Anyone => "anyone",
    Invitation => "invitation",
});

/// The rule that closes a trial automatically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingStyle {
    /// Only the owner's stop request closes the trial.
    #[default]
    Manual,
    /// Closes once the recorded report count reaches `ending_reports`.
    ReportNum,
    /// Closes once `ending_date` has been reached.
    Date,
}

text_enum!(EndingStyle {
    Manual => "manual",
    ReportNum => "report_num",
    Date => "date",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingStyle {
    #[default]
    Whenever,
    Daily,
    Weekly,
    Monthly,
}

text_enum!(ReportingStyle {
    Whenever => "whenever",
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionDelivery {
    #[default]
    Email,
    OnDemand,
}

text_enum!(InstructionDelivery {
    Email => "email",
    OnDemand => "on_demand",
});

/// Which report field is authoritative for a [`Variable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableStyle {
    #[default]
    Score,
    Binary,
    Count,
}

text_enum!(VariableStyle {
    Score => "score",
    Binary => "binary",
    Count => "count",
});

/// One of the two arms of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Arm {
    A,
    B,
}

text_enum!(Arm {
    A => "A",
    B => "B",
});

impl Arm {
    pub const ALL: [Arm; 2] = [Arm::A, Arm::B];
}

/// A configured experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    pub id: i64,
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
    pub finished: bool,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Instructions for arm A.
    pub group_a: String,
    /// Instructions for arm B.
    pub group_b: String,
    pub max_participants: Option<i64>,
    pub featured: bool,
    pub reporting_style: ReportingStyle,
    pub instruction_delivery: InstructionDelivery,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
}

impl Trial {
    /// Canonical detail URL.
    pub fn url(&self) -> String {
        format!("/trial/{}", self.id)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    /// Admission predicate: the trial is still open and has room for one more.
    pub fn accepts_participants(&self, participant_count: i64) -> bool {
        if self.finished {
            return false;
        }
        match self.max_participants {
            Some(max) => participant_count < max,
            None => true,
        }
    }

    /// Instructions text for the given arm.
    pub fn instructions_for(&self, arm: Arm) -> &str {
        match arm {
            Arm::A => &self.group_a,
            Arm::B => &self.group_b,
        }
    }
}

/// A persisted arm of a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: i64,
    pub trial_id: i64,
    pub name: Arm,
}

/// A user's enrollment in a trial.
///
/// `user_id` is cleared when the user leaves; the row is kept so that
/// historical reports still point at it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: i64,
    pub trial_id: i64,
    pub user_id: Option<String>,
    pub group: Option<Group>,
}

impl Participant {
    pub fn arm(&self) -> Option<Arm> {
        self.group.as_ref().map(|g| g.name)
    }
}

/// An email pre-authorised to join an invitation-only trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invitation {
    pub id: i64,
    pub trial_id: i64,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// The single measured quantity of a trial.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variable {
    pub id: i64,
    pub trial_id: i64,
    pub question: String,
    pub style: VariableStyle,
}

/// One value written into a report, matching the variable's style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    Score(i64),
    Binary(bool),
    Count(i64),
}

impl Measurement {
    pub fn style(&self) -> VariableStyle {
        match self {
            Measurement::Score(_) => VariableStyle::Score,
            Measurement::Binary(_) => VariableStyle::Binary,
            Measurement::Count(_) => VariableStyle::Count,
        }
    }
}

/// One measurement instance.
///
/// A report with `date == None` is the pending record of a self-trial
/// reporting cycle: randomised, not yet filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: i64,
    pub trial_id: i64,
    pub participant_id: i64,
    pub group: Option<Group>,
    pub variable_id: i64,
    pub date: Option<NaiveDate>,
    pub score: Option<i64>,
    pub binary: Option<bool>,
    pub count: Option<i64>,
}

impl Report {
    /// Write exactly one measurement field.
    pub fn apply(&mut self, measurement: Measurement) {
        match measurement {
            Measurement::Score(v) => self.score = Some(v),
            Measurement::Binary(v) => self.binary = Some(v),
            Measurement::Count(v) => self.count = Some(v),
        }
    }

    pub fn is_recorded(&self) -> bool {
        self.date.is_some()
    }
}

/// Uniqueness key of a multi-participant report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKey {
    pub trial_id: i64,
    pub date: NaiveDate,
    pub participant_id: i64,
    pub group_id: Option<i64>,
    pub variable_id: i64,
}

/// A worked example offered by the tutorial.
///
/// Examples are seeded from configuration; `id` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorialExample {
    #[serde(default)]
    pub id: i64,
    pub question: String,
    pub measure_style: VariableStyle,
    pub measure_question: String,
    pub group_a: String,
    pub group_b: String,
}
