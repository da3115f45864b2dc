use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Condition, Expr, ExprTrait, Func, Query, SelectStatement};
use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::db::*;
use crate::fields::clamp_position;
use crate::store::{RefugeStore, audit_image, count_rows, id_value};
use refuge_core::{
    ActorId, AuditAction, AuditEntityType, Dataset, Field, FieldDeleteOutcome, FieldLifecycleApi,
    FieldUsage, Id, Lifecycle, NewAuditEntry, RefugeError, RefugeResult, RelationTarget,
    Timestamp,
};

/// Where a reposition moves the fields between the old and new slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Shuffle {
    None,
    /// Fields in `new..old` move one slot later.
    Earlier { lower: i32, upper: i32 },
    /// Fields in `old+1..=new` move one slot earlier.
    Later { lower: i32, upper: i32 },
}

pub(crate) fn plan_shuffle(current: i32, target: i32) -> Shuffle {
    if target < current {
        Shuffle::Earlier {
            lower: target,
            upper: current - 1,
        }
    } else if target > current {
        Shuffle::Later {
            lower: current + 1,
            upper: target,
        }
    } else {
        Shuffle::None
    }
}

impl RefugeStore {
    pub(crate) fn live_record_ids(&self, dataset_id: Id) -> SelectStatement {
        Query::select()
            .from(RefugeRecords::Table)
            .column(RefugeRecords::Id)
            .and_where(Expr::col(RefugeRecords::DatasetId).eq(id_value(self.backend, dataset_id)))
            .and_where(Expr::col(RefugeRecords::DeletedAt).is_null())
            .to_owned()
    }

    /// Values held by `field` across the live records of its dataset.
    pub(crate) async fn usage_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        field: &Field,
    ) -> RefugeResult<FieldUsage> {
        let mut usage = FieldUsage::default();
        if field.field_type.is_atomic() {
            let select = Query::select()
                .from(RefugeRecords::Table)
                .expr_as(Func::count(Expr::col(RefugeRecords::Id)), Alias::new("count"))
                .cond_where(
                    Condition::all()
                        .add(
                            Expr::col(RefugeRecords::DatasetId)
                                .eq(id_value(self.backend, field.dataset_id)),
                        )
                        .add(Expr::col(RefugeRecords::DeletedAt).is_null())
                        .add(self.payload_has_key(&field.key)),
                )
                .to_owned();
            usage.payload_values = count_rows(conn, &select).await?;
        } else if field.field_type.is_select() {
            let select = Query::select()
                .from(RefugeRecordOptionValues::Table)
                .expr_as(
                    Func::count(Expr::col(RefugeRecordOptionValues::OptionId)),
                    Alias::new("count"),
                )
                .and_where(
                    Expr::col(RefugeRecordOptionValues::FieldId).eq(id_value(self.backend, field.id)),
                )
                .and_where(
                    Expr::col(RefugeRecordOptionValues::RecordId)
                        .in_subquery(self.live_record_ids(field.dataset_id)),
                )
                .to_owned();
            usage.option_values = count_rows(conn, &select).await?;
        } else {
            match field.relation_target {
                Some(RelationTarget::Dynamic { .. }) => {
                    let select = Query::select()
                        .from(RefugeRecordRelations::Table)
                        .expr_as(
                            Func::count(Expr::col(RefugeRecordRelations::TargetRecordId)),
                            Alias::new("count"),
                        )
                        .and_where(
                            Expr::col(RefugeRecordRelations::FieldId)
                                .eq(id_value(self.backend, field.id)),
                        )
                        .and_where(
                            Expr::col(RefugeRecordRelations::RecordId)
                                .in_subquery(self.live_record_ids(field.dataset_id)),
                        )
                        .to_owned();
                    usage.dynamic_relations = count_rows(conn, &select).await?;
                }
                Some(RelationTarget::Core { .. }) => {
                    let select = Query::select()
                        .from(RefugeRecordCoreRelations::Table)
                        .expr_as(
                            Func::count(Expr::col(RefugeRecordCoreRelations::TargetId)),
                            Alias::new("count"),
                        )
                        .and_where(
                            Expr::col(RefugeRecordCoreRelations::FieldId)
                                .eq(id_value(self.backend, field.id)),
                        )
                        .and_where(
                            Expr::col(RefugeRecordCoreRelations::RecordId)
                                .in_subquery(self.live_record_ids(field.dataset_id)),
                        )
                        .to_owned();
                    usage.core_relations = count_rows(conn, &select).await?;
                }
                None => {
                    return Err(RefugeError::storage(format!(
                        "relation field {} has no target",
                        field.id
                    )));
                }
            }
        }
        Ok(usage)
    }

    async fn owning_dataset<C: ConnectionTrait>(
        &self,
        conn: &C,
        field: &Field,
    ) -> RefugeResult<Dataset> {
        self.fetch_dataset(conn, field.dataset_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("dataset {}", field.dataset_id)))
    }
}

#[async_trait]
impl FieldLifecycleApi for RefugeStore {
    async fn reposition_field(
        &self,
        field_id: Id,
        actor: ActorId,
        position: i32,
    ) -> RefugeResult<Field> {
        let tx = self.conn.begin().await?;
        let before = self
            .fetch_field_for_update(&tx, field_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("field {field_id}")))?;
        if !before.is_listed() {
            return Err(RefugeError::validation(format!(
                "field {field_id} is inactive or deleted and cannot be repositioned"
            )));
        }
        let dataset = self.owning_dataset(&tx, &before).await?;
        let listed = self.listed_field_count(&tx, before.dataset_id).await?;
        let target = clamp_position(position, listed);
        if target != position {
            log::debug!("reposition of field {field_id} clamped {position} -> {target}");
        }
        let shuffle = plan_shuffle(before.position, target);
        if shuffle == Shuffle::None {
            return Ok(before);
        }
        let now = Timestamp::now();
        self.set_field_position(&tx, field_id, -1, actor, now)
            .await?;
        match shuffle {
            Shuffle::Earlier { lower, upper } => {
                self.shift_positions(&tx, before.dataset_id, lower, Some(upper), 1)
                    .await?;
            }
            Shuffle::Later { lower, upper } => {
                self.shift_positions(&tx, before.dataset_id, lower, Some(upper), -1)
                    .await?;
            }
            Shuffle::None => {}
        }
        self.set_field_position(&tx, field_id, target, actor, now)
            .await?;
        let mut after = before.clone();
        after.position = target;
        after.updated_by = Some(actor);
        after.updated_at = now;
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor,
                action: AuditAction::Reposition,
                entity_type: AuditEntityType::Field,
                entity_id: field_id,
                before: audit_image(&before)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        tx.commit().await?;
        log::info!(
            "field repositioned id={field_id} from={} to={target}",
            before.position
        );
        Ok(after)
    }

    async fn field_usage(&self, field_id: Id) -> RefugeResult<FieldUsage> {
        let field = self
            .fetch_field(&self.conn, field_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("field {field_id}")))?;
        let usage = self.usage_of(&self.conn, &field).await?;
        log::debug!("field usage id={field_id} total={}", usage.total());
        Ok(usage)
    }

    async fn delete_field(
        &self,
        field_id: Id,
        actor: ActorId,
        confirm: bool,
    ) -> RefugeResult<FieldDeleteOutcome> {
        let tx = self.conn.begin().await?;
        let Some(before) = self.fetch_field(&tx, field_id).await? else {
            return Ok(FieldDeleteOutcome::Deleted);
        };
        if before.lifecycle.is_deleted() {
            return Ok(FieldDeleteOutcome::Deleted);
        }
        if before.required {
            log::debug!("delete of required field {field_id} blocked");
            return Ok(FieldDeleteOutcome::BlockedRequired);
        }
        let usage = self.usage_of(&tx, &before).await?;
        if usage.total() > 0 && !confirm {
            log::debug!(
                "delete of field {field_id} needs confirmation usage={}",
                usage.total()
            );
            return Ok(FieldDeleteOutcome::NeedsConfirmation { usage });
        }
        let dataset = self.owning_dataset(&tx, &before).await?;
        let mut after = before.clone();
        after.lifecycle = Lifecycle::Deleted {
            at: Timestamp::now(),
            by: Some(actor),
        };
        after.is_active = false;
        self.persist_field_change(&tx, &dataset, &before, after, actor)
            .await?;
        tx.commit().await?;
        log::info!(
            "field deleted id={field_id} dataset={} usage={}",
            before.dataset_id,
            usage.total()
        );
        Ok(FieldDeleteOutcome::Deleted)
    }
}
