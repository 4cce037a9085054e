// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{SqliteStore, decode, decode_opt, from_json, to_json};
use crate::error::Result;
use crate::journey::{
    Attachment, AttachmentStatus, FormRevision, JourneyChanges, NodeDeadline, NodeEvent,
    NodeEventKind, NodeInstance, NodeState, ReviewOutcome, Slot, SlotStatus,
};
use crate::persistence::JourneyStore;
use crate::playbook::Multiplicity;

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    tenant_id: String,
    user_id: String,
    playbook_version_id: String,
    node_slug: String,
    state: String,
    locale: Option<String>,
    current_rev: i64,
    review_outcome: Option<String>,
    opened_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    lock_version: i64,
}

impl TryFrom<InstanceRow> for NodeInstance {
    type Error = crate::error::Error;

    fn try_from(row: InstanceRow) -> Result<Self> {
        Ok(Self {
            state: decode("node state", &row.state, NodeState::parse)?,
            review_outcome: decode_opt(
                "review outcome",
                row.review_outcome.as_deref(),
                ReviewOutcome::parse,
            )?,
            id: row.id,
            tenant_id: row.tenant_id,
            user_id: row.user_id,
            playbook_version_id: row.playbook_version_id,
            node_slug: row.node_slug,
            locale: row.locale,
            current_rev: row.current_rev,
            opened_at: row.opened_at,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
            lock_version: row.lock_version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: String,
    node_instance_id: String,
    slot_key: String,
    required: bool,
    multiplicity: String,
    mime_whitelist: String,
    status: String,
}

impl TryFrom<SlotRow> for Slot {
    type Error = crate::error::Error;

    fn try_from(row: SlotRow) -> Result<Self> {
        Ok(Self {
            multiplicity: Multiplicity::parse(&row.multiplicity),
            mime_whitelist: from_json("mime_whitelist", &row.mime_whitelist)?,
            status: decode("slot status", &row.status, SlotStatus::parse)?,
            id: row.id,
            node_instance_id: row.node_instance_id,
            slot_key: row.slot_key,
            required: row.required,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttachmentRow {
    id: String,
    slot_id: String,
    node_instance_id: String,
    position: i64,
    blob_version_id: String,
    filename: String,
    size_bytes: i64,
    mime: String,
    uploaded_by: String,
    attached_at: DateTime<Utc>,
    is_active: bool,
    status: String,
    reviewed_document_version_id: Option<String>,
    reviewer_id: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    review_note: Option<String>,
}

impl TryFrom<AttachmentRow> for Attachment {
    type Error = crate::error::Error;

    fn try_from(row: AttachmentRow) -> Result<Self> {
        Ok(Self {
            status: decode("attachment status", &row.status, AttachmentStatus::parse)?,
            id: row.id,
            slot_id: row.slot_id,
            node_instance_id: row.node_instance_id,
            position: row.position,
            blob_version_id: row.blob_version_id,
            filename: row.filename,
            size_bytes: row.size_bytes,
            mime: row.mime,
            uploaded_by: row.uploaded_by,
            attached_at: row.attached_at,
            is_active: row.is_active,
            reviewed_document_version_id: row.reviewed_document_version_id,
            reviewer_id: row.reviewer_id,
            reviewed_at: row.reviewed_at,
            review_note: row.review_note,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RevisionRow {
    node_instance_id: String,
    rev: i64,
    form_data: String,
    edited_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<RevisionRow> for FormRevision {
    type Error = crate::error::Error;

    fn try_from(row: RevisionRow) -> Result<Self> {
        Ok(Self {
            form_data: from_json("form_data", &row.form_data)?,
            node_instance_id: row.node_instance_id,
            rev: row.rev,
            edited_by: row.edited_by,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    node_instance_id: String,
    tenant_id: String,
    kind: String,
    actor_id: String,
    payload: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for NodeEvent {
    type Error = crate::error::Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(Self {
            kind: decode("event kind", &row.kind, NodeEventKind::parse)?,
            payload: from_json("payload", &row.payload)?,
            id: row.id,
            node_instance_id: row.node_instance_id,
            tenant_id: row.tenant_id,
            actor_id: row.actor_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeadlineRow {
    tenant_id: String,
    user_id: String,
    node_slug: String,
    due_at: DateTime<Utc>,
    set_by: String,
    updated_at: DateTime<Utc>,
}

const INSTANCE_COLUMNS: &str = "id, tenant_id, user_id, playbook_version_id, node_slug, state, \
     locale, current_rev, review_outcome, opened_at, started_at, submitted_at, completed_at, \
     updated_at, lock_version";

const ATTACHMENT_COLUMNS: &str = "id, slot_id, node_instance_id, position, blob_version_id, \
     filename, size_bytes, mime, uploaded_by, attached_at, is_active, status, \
     reviewed_document_version_id, reviewer_id, reviewed_at, review_note";

/// Unique-key violations on insert mean a concurrent writer created the row first.
fn lost_insert_race(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl JourneyStore for SqliteStore {
    async fn get_node_instance(
        &self,
        tenant_id: &str,
        user_id: &str,
        playbook_version_id: &str,
        node_slug: &str,
    ) -> Result<Option<NodeInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM node_instances \
             WHERE tenant_id = ? AND user_id = ? AND playbook_version_id = ? AND node_slug = ?"
        ))
        .bind(tenant_id)
        .bind(user_id)
        .bind(playbook_version_id)
        .bind(node_slug)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_node_instance_by_id(&self, id: &str) -> Result<Option<NodeInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM node_instances WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_node_instances(
        &self,
        tenant_id: &str,
        user_id: &str,
        playbook_version_id: &str,
    ) -> Result<Vec<NodeInstance>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM node_instances \
             WHERE tenant_id = ? AND user_id = ? AND playbook_version_id = ? \
             ORDER BY opened_at, node_slug"
        ))
        .bind(tenant_id)
        .bind(user_id)
        .bind(playbook_version_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_slots(&self, node_instance_id: &str) -> Result<Vec<Slot>> {
        let rows = sqlx::query_as::<_, SlotRow>(
            r#"
            SELECT id, node_instance_id, slot_key, required, multiplicity, mime_whitelist, status
            FROM node_slots
            WHERE node_instance_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(node_instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_attachments(&self, node_instance_id: &str) -> Result<Vec<Attachment>> {
        let rows = sqlx::query_as::<_, AttachmentRow>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM node_attachments \
             WHERE node_instance_id = ? ORDER BY attached_at, rowid"
        ))
        .bind(node_instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>> {
        let row = sqlx::query_as::<_, AttachmentRow>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM node_attachments WHERE id = ?"
        ))
        .bind(attachment_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_form_revision(
        &self,
        node_instance_id: &str,
        rev: i64,
    ) -> Result<Option<FormRevision>> {
        let row = sqlx::query_as::<_, RevisionRow>(
            r#"
            SELECT node_instance_id, rev, form_data, edited_by, created_at
            FROM node_form_revisions
            WHERE node_instance_id = ? AND rev = ?
            "#,
        )
        .bind(node_instance_id)
        .bind(rev)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_form_revisions(&self, node_instance_id: &str) -> Result<Vec<FormRevision>> {
        let rows = sqlx::query_as::<_, RevisionRow>(
            r#"
            SELECT node_instance_id, rev, form_data, edited_by, created_at
            FROM node_form_revisions
            WHERE node_instance_id = ?
            ORDER BY rev
            "#,
        )
        .bind(node_instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_node_events(&self, node_instance_id: &str) -> Result<Vec<NodeEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, node_instance_id, tenant_id, kind, actor_id, payload, created_at
            FROM node_events
            WHERE node_instance_id = ?
            ORDER BY seq
            "#,
        )
        .bind(node_instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_deadline(
        &self,
        tenant_id: &str,
        user_id: &str,
        node_slug: &str,
    ) -> Result<Option<NodeDeadline>> {
        let row = sqlx::query_as::<_, DeadlineRow>(
            r#"
            SELECT tenant_id, user_id, node_slug, due_at, set_by, updated_at
            FROM node_deadlines
            WHERE tenant_id = ? AND user_id = ? AND node_slug = ?
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(node_slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| NodeDeadline {
            tenant_id: r.tenant_id,
            user_id: r.user_id,
            node_slug: r.node_slug,
            due_at: r.due_at,
            set_by: r.set_by,
            updated_at: r.updated_at,
        }))
    }

    async fn apply_journey_changes(&self, changes: &JourneyChanges) -> Result<bool> {
        if changes.is_empty() {
            return Ok(true);
        }

        let mut tx = self.pool.begin().await?;

        for instance in &changes.insert_instances {
            let inserted = sqlx::query(
                r#"
                INSERT INTO node_instances (
                    id, tenant_id, user_id, playbook_version_id, node_slug, state, locale,
                    current_rev, review_outcome, opened_at, started_at, submitted_at,
                    completed_at, updated_at, lock_version
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&instance.id)
            .bind(&instance.tenant_id)
            .bind(&instance.user_id)
            .bind(&instance.playbook_version_id)
            .bind(&instance.node_slug)
            .bind(instance.state.as_str())
            .bind(&instance.locale)
            .bind(instance.current_rev)
            .bind(instance.review_outcome.map(|o| o.as_str()))
            .bind(instance.opened_at)
            .bind(instance.started_at)
            .bind(instance.submitted_at)
            .bind(instance.completed_at)
            .bind(instance.updated_at)
            .bind(instance.lock_version)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if lost_insert_race(&e) => {
                    debug!(node = %instance.node_slug, "Node instance created concurrently");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }

        for instance in &changes.update_instances {
            let result = sqlx::query(
                r#"
                UPDATE node_instances
                SET state = ?,
                    locale = ?,
                    current_rev = ?,
                    review_outcome = ?,
                    started_at = ?,
                    submitted_at = ?,
                    completed_at = ?,
                    updated_at = ?,
                    lock_version = lock_version + 1
                WHERE id = ? AND lock_version = ?
                "#,
            )
            .bind(instance.state.as_str())
            .bind(&instance.locale)
            .bind(instance.current_rev)
            .bind(instance.review_outcome.map(|o| o.as_str()))
            .bind(instance.started_at)
            .bind(instance.submitted_at)
            .bind(instance.completed_at)
            .bind(instance.updated_at)
            .bind(&instance.id)
            .bind(instance.lock_version)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(instance_id = %instance.id, "Node instance changed concurrently");
                return Ok(false);
            }
        }

        for slot in &changes.insert_slots {
            sqlx::query(
                r#"
                INSERT INTO node_slots (
                    id, node_instance_id, slot_key, required, multiplicity, mime_whitelist, status
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&slot.id)
            .bind(&slot.node_instance_id)
            .bind(&slot.slot_key)
            .bind(slot.required)
            .bind(slot.multiplicity.as_str())
            .bind(to_json(&slot.mime_whitelist)?)
            .bind(slot.status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for slot in &changes.update_slots {
            sqlx::query("UPDATE node_slots SET status = ? WHERE id = ?")
                .bind(slot.status.as_str())
                .bind(&slot.id)
                .execute(&mut *tx)
                .await?;
        }

        // Deactivations first so the active-cell index never sees two rows.
        for attachment in &changes.update_attachments {
            sqlx::query(
                r#"
                UPDATE node_attachments
                SET is_active = ?,
                    status = ?,
                    reviewed_document_version_id = ?,
                    reviewer_id = ?,
                    reviewed_at = ?,
                    review_note = ?
                WHERE id = ?
                "#,
            )
            .bind(attachment.is_active)
            .bind(attachment.status.as_str())
            .bind(&attachment.reviewed_document_version_id)
            .bind(&attachment.reviewer_id)
            .bind(attachment.reviewed_at)
            .bind(&attachment.review_note)
            .bind(&attachment.id)
            .execute(&mut *tx)
            .await?;
        }

        for attachment in &changes.insert_attachments {
            let inserted = sqlx::query(
                r#"
                INSERT INTO node_attachments (
                    id, slot_id, node_instance_id, position, blob_version_id, filename,
                    size_bytes, mime, uploaded_by, attached_at, is_active, status,
                    reviewed_document_version_id, reviewer_id, reviewed_at, review_note
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&attachment.id)
            .bind(&attachment.slot_id)
            .bind(&attachment.node_instance_id)
            .bind(attachment.position)
            .bind(&attachment.blob_version_id)
            .bind(&attachment.filename)
            .bind(attachment.size_bytes)
            .bind(&attachment.mime)
            .bind(&attachment.uploaded_by)
            .bind(attachment.attached_at)
            .bind(attachment.is_active)
            .bind(attachment.status.as_str())
            .bind(&attachment.reviewed_document_version_id)
            .bind(&attachment.reviewer_id)
            .bind(attachment.reviewed_at)
            .bind(&attachment.review_note)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if lost_insert_race(&e) => {
                    debug!(slot_id = %attachment.slot_id, "Slot cell filled concurrently");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }

        for revision in &changes.insert_revisions {
            let inserted = sqlx::query(
                r#"
                INSERT INTO node_form_revisions (node_instance_id, rev, form_data, edited_by, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&revision.node_instance_id)
            .bind(revision.rev)
            .bind(to_json(&revision.form_data)?)
            .bind(&revision.edited_by)
            .bind(revision.created_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(e) if lost_insert_race(&e) => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        for deadline in &changes.upsert_deadlines {
            sqlx::query(
                r#"
                INSERT INTO node_deadlines (tenant_id, user_id, node_slug, due_at, set_by, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(tenant_id, user_id, node_slug) DO UPDATE SET
                    due_at = excluded.due_at,
                    set_by = excluded.set_by,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&deadline.tenant_id)
            .bind(&deadline.user_id)
            .bind(&deadline.node_slug)
            .bind(deadline.due_at)
            .bind(&deadline.set_by)
            .bind(deadline.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        for event in &changes.events {
            sqlx::query(
                r#"
                INSERT INTO node_events (id, node_instance_id, tenant_id, kind, actor_id, payload, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.id)
            .bind(&event.node_instance_id)
            .bind(&event.tenant_id)
            .bind(event.kind.as_str())
            .bind(&event.actor_id)
            .bind(to_json(&event.payload)?)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PlaybookStore;
    use crate::playbook::{PlaybookVersion, checksum_hex};
    use serde_json::json;

    async fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_version(&PlaybookVersion {
                id: "pv".into(),
                playbook_id: "phd".into(),
                version: "1".into(),
                checksum: checksum_hex(b"pv"),
                raw: b"pv".to_vec(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    fn instance(id: &str, slug: &str) -> NodeInstance {
        let now = Utc::now();
        NodeInstance {
            id: id.to_string(),
            tenant_id: "t".into(),
            user_id: "u".into(),
            playbook_version_id: "pv".into(),
            node_slug: slug.to_string(),
            state: NodeState::Active,
            locale: Some("en".into()),
            current_rev: 0,
            review_outcome: None,
            opened_at: now,
            started_at: None,
            submitted_at: None,
            completed_at: None,
            updated_at: now,
            lock_version: 0,
        }
    }

    #[tokio::test]
    async fn test_insert_and_update_with_lock_version() {
        let store = store().await;
        let inst = instance("n1", "A");
        let mut changes = JourneyChanges::default();
        changes.insert_instances.push(inst.clone());
        changes.event(&inst, NodeEventKind::Opened, "u", json!({}), Utc::now());
        assert!(store.apply_journey_changes(&changes).await.unwrap());

        let mut updated = inst.clone();
        updated.state = NodeState::InProgress;
        let mut changes = JourneyChanges::default();
        changes.update_instance(updated.clone());
        assert!(store.apply_journey_changes(&changes).await.unwrap());

        // Replaying the same read version loses.
        updated.state = NodeState::Submitted;
        let mut changes = JourneyChanges::default();
        changes.update_instance(updated);
        changes.event(&inst, NodeEventKind::Submitted, "u", json!({}), Utc::now());
        assert!(!store.apply_journey_changes(&changes).await.unwrap());

        let stored = store.get_node_instance_by_id("n1").await.unwrap().unwrap();
        assert_eq!(stored.state, NodeState::InProgress);
        assert_eq!(stored.lock_version, 1);
        let events = store.list_node_events("n1").await.unwrap();
        assert_eq!(events.len(), 1, "rolled-back event must not persist");
    }

    #[tokio::test]
    async fn test_duplicate_natural_key_reports_conflict() {
        let store = store().await;
        let mut changes = JourneyChanges::default();
        changes.insert_instances.push(instance("n1", "A"));
        assert!(store.apply_journey_changes(&changes).await.unwrap());

        let mut changes = JourneyChanges::default();
        changes.insert_instances.push(instance("n2", "A"));
        assert!(!store.apply_journey_changes(&changes).await.unwrap());
        let all = store.list_node_instances("t", "u", "pv").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_attachment_in_one_change_set() {
        let store = store().await;
        let inst = instance("n1", "A");
        let slot = Slot {
            id: "s1".into(),
            node_instance_id: "n1".into(),
            slot_key: "cv".into(),
            required: true,
            multiplicity: Multiplicity::Single,
            mime_whitelist: vec!["application/pdf".into()],
            status: SlotStatus::Filled,
        };
        let attachment = |id: &str| Attachment {
            id: id.to_string(),
            slot_id: "s1".into(),
            node_instance_id: "n1".into(),
            position: 0,
            blob_version_id: format!("blob-{id}"),
            filename: "cv.pdf".into(),
            size_bytes: 10,
            mime: "application/pdf".into(),
            uploaded_by: "u".into(),
            attached_at: Utc::now(),
            is_active: true,
            status: AttachmentStatus::Submitted,
            reviewed_document_version_id: None,
            reviewer_id: None,
            reviewed_at: None,
            review_note: None,
        };

        let mut changes = JourneyChanges::default();
        changes.insert_instances.push(inst);
        changes.insert_slots.push(slot.clone());
        changes.insert_attachments.push(attachment("a1"));
        assert!(store.apply_journey_changes(&changes).await.unwrap());

        let mut old = attachment("a1");
        old.is_active = false;
        let mut changes = JourneyChanges::default();
        changes.update_attachments.push(old);
        changes.insert_attachments.push(attachment("a2"));
        assert!(store.apply_journey_changes(&changes).await.unwrap());

        let all = store.list_attachments("n1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|a| a.is_active).count(), 1);
        let slots = store.list_slots("n1").await.unwrap();
        assert_eq!(slots[0].mime_whitelist, vec!["application/pdf"]);

        // A second active row in the same cell is rejected as a race.
        let mut changes = JourneyChanges::default();
        changes.insert_attachments.push(attachment("a3"));
        assert!(!store.apply_journey_changes(&changes).await.unwrap());
    }

    #[tokio::test]
    async fn test_deadline_upsert() {
        let store = store().await;
        let deadline = |days: i64, by: &str| NodeDeadline {
            tenant_id: "t".into(),
            user_id: "u".into(),
            node_slug: "A".into(),
            due_at: Utc::now() + chrono::Duration::days(days),
            set_by: by.to_string(),
            updated_at: Utc::now(),
        };
        let mut changes = JourneyChanges::default();
        changes.upsert_deadlines.push(deadline(7, "adv"));
        assert!(store.apply_journey_changes(&changes).await.unwrap());
        let mut changes = JourneyChanges::default();
        changes.upsert_deadlines.push(deadline(14, "admin"));
        assert!(store.apply_journey_changes(&changes).await.unwrap());

        let stored = store.get_deadline("t", "u", "A").await.unwrap().unwrap();
        assert_eq!(stored.set_by, "admin");
    }
}
