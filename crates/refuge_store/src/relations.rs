use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, OnConflict, Order, Query};
use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::db::*;
use crate::store::{
    RefugeStore, col_name, count_rows, exec_count, id_value, id_values, query_all, read_id,
};
use refuge_core::{
    ActorId, AuditAction, AuditEntityType, CellKey, CoreKind, CoreTarget, Field, FieldType, Id,
    NewAuditEntry, Record, RecordLinks, RefugeError, RefugeResult, RelationResolverApi,
    RelationTarget, Timestamp,
};

impl RefugeStore {
    pub(crate) async fn insert_option_value<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field_id: Id,
        option_id: Id,
    ) -> RefugeResult<bool> {
        let insert = Query::insert()
            .into_table(RefugeRecordOptionValues::Table)
            .columns([
                RefugeRecordOptionValues::RecordId,
                RefugeRecordOptionValues::FieldId,
                RefugeRecordOptionValues::OptionId,
                RefugeRecordOptionValues::CreatedAt,
            ])
            .values_panic([
                id_value(self.backend, record_id).into(),
                id_value(self.backend, field_id).into(),
                id_value(self.backend, option_id).into(),
                Timestamp::now().as_micros().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    RefugeRecordOptionValues::RecordId,
                    RefugeRecordOptionValues::FieldId,
                    RefugeRecordOptionValues::OptionId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_owned();
        Ok(exec_count(conn, &insert).await? > 0)
    }

    pub(crate) async fn insert_dynamic_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field_id: Id,
        target_record_id: Id,
    ) -> RefugeResult<bool> {
        let insert = Query::insert()
            .into_table(RefugeRecordRelations::Table)
            .columns([
                RefugeRecordRelations::RecordId,
                RefugeRecordRelations::FieldId,
                RefugeRecordRelations::TargetRecordId,
                RefugeRecordRelations::CreatedAt,
            ])
            .values_panic([
                id_value(self.backend, record_id).into(),
                id_value(self.backend, field_id).into(),
                id_value(self.backend, target_record_id).into(),
                Timestamp::now().as_micros().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    RefugeRecordRelations::RecordId,
                    RefugeRecordRelations::FieldId,
                    RefugeRecordRelations::TargetRecordId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_owned();
        Ok(exec_count(conn, &insert).await? > 0)
    }

    pub(crate) async fn insert_core_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field_id: Id,
        target: CoreTarget,
    ) -> RefugeResult<bool> {
        let insert = Query::insert()
            .into_table(RefugeRecordCoreRelations::Table)
            .columns([
                RefugeRecordCoreRelations::RecordId,
                RefugeRecordCoreRelations::FieldId,
                RefugeRecordCoreRelations::TargetCore,
                RefugeRecordCoreRelations::TargetId,
                RefugeRecordCoreRelations::CreatedAt,
            ])
            .values_panic([
                id_value(self.backend, record_id).into(),
                id_value(self.backend, field_id).into(),
                target.target_core.as_str().into(),
                id_value(self.backend, target.target_id).into(),
                Timestamp::now().as_micros().into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    RefugeRecordCoreRelations::RecordId,
                    RefugeRecordCoreRelations::FieldId,
                    RefugeRecordCoreRelations::TargetCore,
                    RefugeRecordCoreRelations::TargetId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_owned();
        Ok(exec_count(conn, &insert).await? > 0)
    }

    pub(crate) async fn clear_option_values<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
    ) -> RefugeResult<u64> {
        let delete = Query::delete()
            .from_table(RefugeRecordOptionValues::Table)
            .and_where(
                Expr::col(RefugeRecordOptionValues::RecordId).eq(id_value(self.backend, record_id)),
            )
            .to_owned();
        exec_count(conn, &delete).await
    }

    pub(crate) async fn clear_dynamic_links<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
    ) -> RefugeResult<u64> {
        let delete = Query::delete()
            .from_table(RefugeRecordRelations::Table)
            .and_where(
                Expr::col(RefugeRecordRelations::RecordId).eq(id_value(self.backend, record_id)),
            )
            .to_owned();
        exec_count(conn, &delete).await
    }

    pub(crate) async fn clear_core_links<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
    ) -> RefugeResult<u64> {
        let delete = Query::delete()
            .from_table(RefugeRecordCoreRelations::Table)
            .and_where(
                Expr::col(RefugeRecordCoreRelations::RecordId)
                    .eq(id_value(self.backend, record_id)),
            )
            .to_owned();
        exec_count(conn, &delete).await
    }

    /// Links already held by one relation cell.
    async fn cell_link_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field: &Field,
    ) -> RefugeResult<u64> {
        let select = match field.relation_target {
            Some(RelationTarget::Core { .. }) => Query::select()
                .from(RefugeRecordCoreRelations::Table)
                .expr_as(
                    Func::count(Expr::col(RefugeRecordCoreRelations::TargetId)),
                    Alias::new("count"),
                )
                .and_where(
                    Expr::col(RefugeRecordCoreRelations::RecordId)
                        .eq(id_value(self.backend, record_id)),
                )
                .and_where(
                    Expr::col(RefugeRecordCoreRelations::FieldId)
                        .eq(id_value(self.backend, field.id)),
                )
                .to_owned(),
            _ => Query::select()
                .from(RefugeRecordRelations::Table)
                .expr_as(
                    Func::count(Expr::col(RefugeRecordRelations::TargetRecordId)),
                    Alias::new("count"),
                )
                .and_where(
                    Expr::col(RefugeRecordRelations::RecordId)
                        .eq(id_value(self.backend, record_id)),
                )
                .and_where(
                    Expr::col(RefugeRecordRelations::FieldId).eq(id_value(self.backend, field.id)),
                )
                .to_owned(),
        };
        count_rows(conn, &select).await
    }

    /// Record and relation field for a single-link write, both validated.
    async fn link_context<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field_id: Id,
    ) -> RefugeResult<(Record, Field)> {
        let record = self.require_live_record(conn, record_id).await?;
        let field = self.require_live_field(conn, field_id).await?;
        if field.dataset_id != record.dataset_id || !field.is_listed() {
            return Err(RefugeError::validation(format!(
                "field {field_id} is not an active field of dataset {}",
                record.dataset_id
            )));
        }
        if field.field_type != FieldType::Relation {
            return Err(RefugeError::validation(format!(
                "field '{}' is not a relation field",
                field.key
            )));
        }
        Ok((record, field))
    }

    async fn ensure_cell_capacity<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field: &Field,
    ) -> RefugeResult<()> {
        let existing = self.cell_link_count(conn, record_id, field).await?;
        let capacity = if field.accepts_many() {
            self.limits.max_links_per_cell as u64
        } else {
            1
        };
        if existing >= capacity {
            return Err(RefugeError::validation(format!(
                "field '{}' already holds {existing} of {capacity} allowed links",
                field.key
            )));
        }
        Ok(())
    }

    async fn finish_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        record: &Record,
        actor: ActorId,
        image: serde_json::Value,
    ) -> RefugeResult<()> {
        let bumped = self.bump_version(conn, record, actor).await?;
        self.insert_audit(
            conn,
            NewAuditEntry {
                activation_id: Some(record.activation_id),
                actor,
                action: AuditAction::Link,
                entity_type: AuditEntityType::Record,
                entity_id: record.id,
                before: None,
                after: Some(serde_json::json!({
                    "version": bumped,
                    "link": image,
                })),
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RelationResolverApi for RefugeStore {
    async fn link_record(
        &self,
        record_id: Id,
        field_id: Id,
        target_record_id: Id,
        actor: ActorId,
    ) -> RefugeResult<bool> {
        let tx = self.conn.begin().await?;
        let (record, field) = self.link_context(&tx, record_id, field_id).await?;
        let Some(RelationTarget::Dynamic { dataset_id }) = field.relation_target else {
            return Err(RefugeError::validation(format!(
                "field '{}' does not link to dataset records",
                field.key
            )));
        };
        let target = self.require_live_record(&tx, target_record_id).await?;
        if target.dataset_id != dataset_id {
            return Err(RefugeError::validation(format!(
                "record {target_record_id} does not belong to dataset {dataset_id}"
            )));
        }
        if self
            .has_dynamic_link(&tx, record_id, field_id, target_record_id)
            .await?
        {
            return Ok(false);
        }
        self.ensure_cell_capacity(&tx, record_id, &field).await?;
        let inserted = self
            .insert_dynamic_link(&tx, record_id, field_id, target_record_id)
            .await?;
        if inserted {
            self.finish_link(
                &tx,
                &record,
                actor,
                serde_json::json!({
                    "field_id": field_id,
                    "target_record_id": target_record_id,
                }),
            )
            .await?;
        }
        tx.commit().await?;
        log::debug!(
            "record link record={record_id} field={field_id} target={target_record_id} \
             inserted={inserted}"
        );
        Ok(inserted)
    }

    async fn link_core(
        &self,
        record_id: Id,
        field_id: Id,
        target: CoreTarget,
        actor: ActorId,
    ) -> RefugeResult<bool> {
        let tx = self.conn.begin().await?;
        let (record, field) = self.link_context(&tx, record_id, field_id).await?;
        let Some(RelationTarget::Core { core }) = field.relation_target else {
            return Err(RefugeError::validation(format!(
                "field '{}' does not link to core entities",
                field.key
            )));
        };
        ensure_core_kind(&field, core, &target)?;
        if self.has_core_link(&tx, record_id, field_id, target).await? {
            return Ok(false);
        }
        self.ensure_cell_capacity(&tx, record_id, &field).await?;
        let inserted = self
            .insert_core_link(&tx, record_id, field_id, target)
            .await?;
        if inserted {
            self.finish_link(
                &tx,
                &record,
                actor,
                serde_json::json!({
                    "field_id": field_id,
                    "target": target,
                }),
            )
            .await?;
        }
        tx.commit().await?;
        log::debug!(
            "core link record={record_id} field={field_id} core={} inserted={inserted}",
            target.target_core
        );
        Ok(inserted)
    }

    async fn fetch_links(&self, record_ids: &[Id]) -> RefugeResult<RecordLinks> {
        self.links_for(&self.conn, record_ids).await
    }
}

impl RefugeStore {
    async fn has_dynamic_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field_id: Id,
        target_record_id: Id,
    ) -> RefugeResult<bool> {
        let select = Query::select()
            .from(RefugeRecordRelations::Table)
            .expr_as(
                Func::count(Expr::col(RefugeRecordRelations::TargetRecordId)),
                Alias::new("count"),
            )
            .and_where(
                Expr::col(RefugeRecordRelations::RecordId).eq(id_value(self.backend, record_id)),
            )
            .and_where(
                Expr::col(RefugeRecordRelations::FieldId).eq(id_value(self.backend, field_id)),
            )
            .and_where(
                Expr::col(RefugeRecordRelations::TargetRecordId)
                    .eq(id_value(self.backend, target_record_id)),
            )
            .to_owned();
        Ok(count_rows(conn, &select).await? > 0)
    }

    async fn has_core_link<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        field_id: Id,
        target: CoreTarget,
    ) -> RefugeResult<bool> {
        let select = Query::select()
            .from(RefugeRecordCoreRelations::Table)
            .expr_as(
                Func::count(Expr::col(RefugeRecordCoreRelations::TargetId)),
                Alias::new("count"),
            )
            .and_where(
                Expr::col(RefugeRecordCoreRelations::RecordId)
                    .eq(id_value(self.backend, record_id)),
            )
            .and_where(
                Expr::col(RefugeRecordCoreRelations::FieldId).eq(id_value(self.backend, field_id)),
            )
            .and_where(
                Expr::col(RefugeRecordCoreRelations::TargetCore).eq(target.target_core.as_str()),
            )
            .and_where(
                Expr::col(RefugeRecordCoreRelations::TargetId)
                    .eq(id_value(self.backend, target.target_id)),
            )
            .to_owned();
        Ok(count_rows(conn, &select).await? > 0)
    }

    /// Both relation stores for `record_ids`, one query each, grouped per cell.
    pub(crate) async fn links_for<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_ids: &[Id],
    ) -> RefugeResult<RecordLinks> {
        let mut links = RecordLinks::default();
        if record_ids.is_empty() {
            return Ok(links);
        }
        let dynamic = Query::select()
            .from(RefugeRecordRelations::Table)
            .columns([
                RefugeRecordRelations::RecordId,
                RefugeRecordRelations::FieldId,
                RefugeRecordRelations::TargetRecordId,
            ])
            .and_where(
                Expr::col(RefugeRecordRelations::RecordId)
                    .is_in(id_values(self.backend, record_ids)),
            )
            .order_by(RefugeRecordRelations::CreatedAt, Order::Asc)
            .to_owned();
        for row in query_all(conn, &dynamic).await? {
            let key = CellKey::new(
                read_id(&row, RefugeRecordRelations::RecordId)?,
                read_id(&row, RefugeRecordRelations::FieldId)?,
            );
            let target = read_id(&row, RefugeRecordRelations::TargetRecordId)?;
            links.dynamic.entry(key).or_default().push(target);
        }
        let core = Query::select()
            .from(RefugeRecordCoreRelations::Table)
            .columns([
                RefugeRecordCoreRelations::RecordId,
                RefugeRecordCoreRelations::FieldId,
                RefugeRecordCoreRelations::TargetCore,
                RefugeRecordCoreRelations::TargetId,
            ])
            .and_where(
                Expr::col(RefugeRecordCoreRelations::RecordId)
                    .is_in(id_values(self.backend, record_ids)),
            )
            .order_by(RefugeRecordCoreRelations::CreatedAt, Order::Asc)
            .to_owned();
        for row in query_all(conn, &core).await? {
            let key = CellKey::new(
                read_id(&row, RefugeRecordCoreRelations::RecordId)?,
                read_id(&row, RefugeRecordCoreRelations::FieldId)?,
            );
            let target_core: String =
                row.try_get("", &col_name(RefugeRecordCoreRelations::TargetCore))?;
            let target = CoreTarget {
                target_core: target_core.parse()?,
                target_id: read_id(&row, RefugeRecordCoreRelations::TargetId)?,
            };
            links.core.entry(key).or_default().push(target);
        }
        Ok(links)
    }
}

pub(crate) fn ensure_core_kind(
    field: &Field,
    core: CoreKind,
    target: &CoreTarget,
) -> RefugeResult<()> {
    if target.target_core != core {
        return Err(RefugeError::validation(format!(
            "field '{}' links {core} entities, not {}",
            field.key, target.target_core
        )));
    }
    Ok(())
}
