//! Database integration tests.
//!
//! All tests require TEST_DATABASE_URL to be set.
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test db_integration
//!
//! Tests should be run single-threaded to avoid conflicts:
//!   cargo test --test db_integration -- --test-threads=1

mod common;

use chrono::NaiveDate;
use randomise_me::db::Database;
use randomise_me::model::*;
use randomise_me::participation::{self, JoinError};
use randomise_me::access::Identity;
use randomise_me::store::{TrialQuery, TrialStore};

/// Skip the test if TEST_DATABASE_URL is not set.
macro_rules! require_db {
    () => {
        if !common::has_test_db() {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return;
        }
    };
}

async fn setup() -> Database {
    common::setup_test_db().await
}

fn form(title: &str) -> TrialForm {
    TrialForm {
        title: title.to_string(),
        description: String::new(),
        group_a: "Stretch".to_string(),
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
            question: "Back pain (1-10)".to_string(),
            style: VariableStyle::Score,
        }),
    }
}

async fn create(db: &Database, owner: &str, form: TrialForm) -> Trial {
    let (draft, variable) = form.into_draft(owner, &format!("{}@example.com", owner));
    TrialStore::create_trial(db, &draft, &variable).await.unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
}

// --- Trials ---

#[tokio::test]
async fn connect_to_test_db() {
    require_db!();
    let db = setup().await;
    TrialStore::health_check(&db).await.unwrap();
}

#[tokio::test]
async fn create_trial_round_trips_all_fields() {
    require_db!();
    let db = setup().await;

    let mut f = form("Stretching");
    f.recruitment = Recruitment::Invitation;
    f.ending_style = EndingStyle::Date;
    f.ending_date = Some(day(30));
    f.max_participants = Some(12);
    let trial = create(&db, "alice", f).await;

    let stored = db.get_trial(trial.id).await.unwrap().unwrap();
    assert_eq!(stored, trial);
    assert_eq!(stored.recruitment, Recruitment::Invitation);
    assert_eq!(stored.ending_date, Some(day(30)));
    assert_eq!(stored.max_participants, Some(12));
    assert!(!stored.finished);

    let variable = db.get_variable(trial.id).await.unwrap().unwrap();
    assert_eq!(variable.question, "Back pain (1-10)");
    assert_eq!(variable.style, VariableStyle::Score);
}

#[tokio::test]
async fn get_missing_trial_is_none() {
    require_db!();
    let db = setup().await;
    assert!(db.get_trial(999).await.unwrap().is_none());
}

#[tokio::test]
async fn update_trial_marks_edit_but_never_reopens() {
    require_db!();
    let db = setup().await;
    let mut trial = create(&db, "alice", form("Stretching")).await;

    assert!(db.stop_trial(trial.id).await.unwrap());
    trial.title = "Evening stretching".to_string();
    trial.is_edited = true;
    trial.finished = false;
    db.update_trial(&trial).await.unwrap();

    let stored = db.get_trial(trial.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Evening stretching");
    assert!(stored.is_edited);
    assert!(stored.finished);
}

#[tokio::test]
async fn stop_trial_is_idempotent() {
    require_db!();
    let db = setup().await;
    let trial = create(&db, "alice", form("Stretching")).await;

    assert!(db.stop_trial(trial.id).await.unwrap());
    let first = db.get_trial(trial.id).await.unwrap().unwrap().stopped_at;
    assert!(first.is_some());

    assert!(!db.stop_trial(trial.id).await.unwrap());
    let again = db.get_trial(trial.id).await.unwrap().unwrap();
    assert!(again.finished);
    assert_eq!(again.stopped_at, first);
}

// --- Listings ---

#[tokio::test]
async fn open_recruitment_excludes_private_owned_and_joined() {
    require_db!();
    let db = setup().await;

    let open = create(&db, "alice", form("Open stretching")).await;
    let mut private = form("Private stretching");
    private.private = true;
    create(&db, "alice", private).await;
    let carols = create(&db, "carol", form("Carol's stretching")).await;
    db.add_participant(carols.id, "bob").await.unwrap();

    let all = db
        .list_trials(&TrialQuery::open_recruitment(None))
        .await
        .unwrap();
    let mut ids: Vec<i64> = all.iter().map(|t| t.id).collect();
    ids.sort();
    assert_eq!(ids, vec![open.id, carols.id]);

    let for_alice = db
        .list_trials(&TrialQuery::open_recruitment(Some("alice".into())))
        .await
        .unwrap();
    assert_eq!(for_alice.iter().map(|t| t.id).collect::<Vec<_>>(), vec![carols.id]);

    let for_bob = db
        .list_trials(&TrialQuery::open_recruitment(Some("bob".into())))
        .await
        .unwrap();
    assert_eq!(for_bob.iter().map(|t| t.id).collect::<Vec<_>>(), vec![open.id]);
}

#[tokio::test]
async fn search_is_case_insensitive_and_skips_private() {
    require_db!();
    let db = setup().await;

    create(&db, "alice", form("Morning STRETCH")).await;
    let mut hidden = form("Hidden stretch");
    hidden.private = true;
    create(&db, "alice", hidden).await;
    create(&db, "alice", form("Cold showers")).await;

    let found = db.list_trials(&TrialQuery::search("stretch")).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].title, "Morning STRETCH");
}

#[tokio::test]
async fn owned_and_participating_lists() {
    require_db!();
    let db = setup().await;

    let mine = create(&db, "alice", form("Alice's")).await;
    let theirs = create(&db, "carol", form("Carol's")).await;
    db.add_participant(theirs.id, "alice").await.unwrap();

    let owned = db.owned_trials("alice").await.unwrap();
    assert_eq!(owned.iter().map(|t| t.id).collect::<Vec<_>>(), vec![mine.id]);
    let joined = db.participating_trials("alice").await.unwrap();
    assert_eq!(joined.iter().map(|t| t.id).collect::<Vec<_>>(), vec![theirs.id]);
}

// --- Participants ---

#[tokio::test]
async fn add_participant_twice_keeps_one_link() {
    require_db!();
    let db = setup().await;
    let trial = create(&db, "alice", form("Stretching")).await;

    let first = db.add_participant(trial.id, "bob").await.unwrap();
    assert!(first.is_some());
    assert!(db.add_participant(trial.id, "bob").await.unwrap().is_none());
    assert_eq!(db.count_participants(trial.id).await.unwrap(), 1);
}

#[tokio::test]
async fn detached_participant_can_rejoin() {
    require_db!();
    let db = setup().await;
    let trial = create(&db, "alice", form("Stretching")).await;

    let p = db.add_participant(trial.id, "bob").await.unwrap().unwrap();
    db.detach_participant(p.id).await.unwrap();
    assert_eq!(db.count_participants(trial.id).await.unwrap(), 0);
    assert!(db.get_participant(trial.id, "bob").await.unwrap().is_none());

    let again = db.add_participant(trial.id, "bob").await.unwrap().unwrap();
    assert_ne!(again.id, p.id);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM participants WHERE trial_id = $1")
        .bind(trial.id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn join_refuses_a_full_trial() {
    require_db!();
    let db = setup().await;
    let mut f = form("Stretching");
    f.max_participants = Some(1);
    let trial = create(&db, "alice", f).await;

    let bob = Identity {
        user_id: "bob".into(),
        email: "bob@example.com".into(),
    };
    let carol = Identity {
        user_id: "carol".into(),
        email: "carol@example.com".into(),
    };
    assert!(participation::join(&db, &trial, &bob).await.unwrap().is_ok());
    assert_eq!(
        participation::join(&db, &trial, &carol).await.unwrap(),
        Err(JoinError::CapacityExceeded)
    );
    assert_eq!(
        participation::join(&db, &trial, &bob).await.unwrap(),
        Err(JoinError::AlreadyJoined)
    );
}

// --- Groups and invitations ---

#[tokio::test]
async fn ensure_groups_creates_both_arms_once() {
    require_db!();
    let db = setup().await;
    let trial = create(&db, "alice", form("Stretching")).await;

    let first = db.ensure_groups(trial.id).await.unwrap();
    let second = db.ensure_groups(trial.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(|g| g.name).collect::<Vec<_>>(),
        vec![Arm::A, Arm::B]
    );
}

#[tokio::test]
async fn invitations_are_unique_per_email_ignoring_case() {
    require_db!();
    let db = setup().await;
    let trial = create(&db, "alice", form("Stretching")).await;

    let (a, created) = db
        .get_or_create_invitation(trial.id, "Bob@Example.com")
        .await
        .unwrap();
    assert!(created);
    let (b, created) = db
        .get_or_create_invitation(trial.id, "bob@example.com")
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(a.id, b.id);
    assert!(db.has_invitation(trial.id, "BOB@example.com").await.unwrap());
    assert!(!db.has_invitation(trial.id, "carol@example.com").await.unwrap());
}

// --- Reports ---

#[tokio::test]
async fn upsert_report_overwrites_the_same_key() {
    require_db!();
    let db = setup().await;
    let trial = create(&db, "alice", form("Stretching")).await;
    let variable = db.get_variable(trial.id).await.unwrap().unwrap();
    let p = db.add_participant(trial.id, "bob").await.unwrap().unwrap();

    let key = ReportKey {
        trial_id: trial.id,
        date: day(3),
        participant_id: p.id,
        group_id: None,
        variable_id: variable.id,
    };
    db.upsert_report(&key, Measurement::Score(4)).await.unwrap();
    let report = db.upsert_report(&key, Measurement::Score(7)).await.unwrap();
    assert_eq!(report.score, Some(7));
    assert_eq!(db.count_recorded_reports(trial.id).await.unwrap(), 1);

    let next_day = ReportKey { date: day(4), ..key };
    db.upsert_report(&next_day, Measurement::Score(2)).await.unwrap();
    assert_eq!(db.count_recorded_reports(trial.id).await.unwrap(), 2);
    assert!(db.participant_has_recorded(trial.id, p.id).await.unwrap());
}

#[tokio::test]
async fn pending_report_is_reused_then_completed() {
    require_db!();
    let db = setup().await;
    let mut f = form("Self stretching");
    f.variable = Some(VariableForm {
        question: "Steps".to_string(),
        style: VariableStyle::Count,
    });
    let trial = create(&db, "alice", f).await;
    let variable = db.get_variable(trial.id).await.unwrap().unwrap();
    let p = db.add_participant(trial.id, "alice").await.unwrap().unwrap();
    let groups = db.ensure_groups(trial.id).await.unwrap();

    let first = db
        .open_pending_report(trial.id, p.id, variable.id, &groups[0])
        .await
        .unwrap();
    let second = db
        .open_pending_report(trial.id, p.id, variable.id, &groups[1])
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.group.map(|g| g.name), Some(Arm::B));
    assert_eq!(db.count_recorded_reports(trial.id).await.unwrap(), 0);

    let done = db
        .complete_pending_report(first.id, day(5), Measurement::Count(4200))
        .await
        .unwrap();
    assert!(done.is_recorded());
    assert_eq!(done.count, Some(4200));
    assert!(db.pending_report(trial.id, p.id).await.unwrap().is_none());

    let recorded = db.recorded_reports(trial.id).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].date, Some(day(5)));
}

// --- Tutorial examples ---

#[tokio::test]
async fn tutorial_examples_are_seeded_once_per_question() {
    require_db!();
    let db = setup().await;
    let example = TutorialExample {
        id: 0,
        question: "Does coffee help me focus?".to_string(),
        measure_style: VariableStyle::Score,
        measure_question: "Focus (1-10)".to_string(),
        group_a: "Coffee".to_string(),
        group_b: "No coffee".to_string(),
    };

    let first = db.add_tutorial_example(&example).await.unwrap();
    let second = db.add_tutorial_example(&example).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(
        db.get_tutorial_example(first.id).await.unwrap().unwrap().question,
        example.question
    );
}
