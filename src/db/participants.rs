//! Participants, arms and invitations.
//!
//! Joins and invitations rely on the partial unique indexes in the schema:
//! a concurrent duplicate insert hits `ON CONFLICT DO NOTHING` and the caller
//! sees the existing row instead.

use anyhow::Result;

use super::{Database, GroupRow, InvitationRow, ParticipantRow};
use crate::model::{Group, Invitation, Participant};

const PARTICIPANT_SELECT: &str = "SELECT p.id, p.trial_id, p.user_id, p.group_id, g.name AS group_name
     FROM participants p LEFT JOIN trial_groups g ON g.id = p.group_id";

impl Database {
    pub async fn get_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(&format!(
            "{} WHERE p.trial_id = $1 AND p.user_id = $2",
            PARTICIPANT_SELECT
        ))
        .bind(trial_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Participant::try_from).transpose()
    }

    pub async fn count_participants(&self, trial_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM participants WHERE trial_id = $1 AND user_id IS NOT NULL",
        )
        .bind(trial_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Link a user to a trial. `None` when the user is already linked.
    pub async fn add_participant(&self, trial_id: i64, user_id: &str) -> Result<Option<Participant>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO participants (trial_id, user_id) VALUES ($1, $2)
             ON CONFLICT (trial_id, user_id) WHERE user_id IS NOT NULL DO NOTHING
             RETURNING id",
        )
        .bind(trial_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| Participant {
            id,
            trial_id,
            user_id: Some(user_id.to_string()),
            group: None,
        }))
    }

    pub async fn detach_participant(&self, participant_id: i64) -> Result<()> {
        sqlx::query("UPDATE participants SET user_id = NULL WHERE id = $1")
            .bind(participant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn assign_group(&self, participant_id: i64, group: &Group) -> Result<()> {
        sqlx::query("UPDATE participants SET group_id = $2 WHERE id = $1")
            .bind(participant_id)
            .bind(group.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create arms A and B if missing, then return them in order.
    pub async fn ensure_groups(&self, trial_id: i64) -> Result<Vec<Group>> {
        sqlx::query(
            "INSERT INTO trial_groups (trial_id, name) VALUES ($1, 'A'), ($1, 'B')
             ON CONFLICT (trial_id, name) DO NOTHING",
        )
        .bind(trial_id)
        .execute(&self.pool)
        .await?;
        let rows: Vec<GroupRow> = sqlx::query_as(
            "SELECT id, trial_id, name FROM trial_groups WHERE trial_id = $1 ORDER BY name",
        )
        .bind(trial_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Group::try_from).collect()
    }

    pub async fn has_invitation(&self, trial_id: i64, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM invitations WHERE trial_id = $1 AND lower(email) = lower($2))",
        )
        .bind(trial_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Returns the invitation and whether this call created it.
    pub async fn get_or_create_invitation(
        &self,
        trial_id: i64,
        email: &str,
    ) -> Result<(Invitation, bool)> {
        let inserted: Option<InvitationRow> = sqlx::query_as(
            "INSERT INTO invitations (trial_id, email) VALUES ($1, $2)
             ON CONFLICT (trial_id, lower(email)) DO NOTHING
             RETURNING id, trial_id, email, created_at",
        )
        .bind(trial_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }
        let row: InvitationRow = sqlx::query_as(
            "SELECT id, trial_id, email, created_at FROM invitations
             WHERE trial_id = $1 AND lower(email) = lower($2)",
        )
        .bind(trial_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.into(), false))
    }
}
