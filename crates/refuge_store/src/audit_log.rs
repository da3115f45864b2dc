use async_trait::async_trait;
use sea_orm::sea_query::{Condition, Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{QueryResult, TransactionTrait};

use crate::db::*;
use crate::store::{
    RefugeStore, col_name, id_value, query_all, read_actor, read_id, read_opt_activation,
    read_opt_json, read_timestamp,
};
use refuge_core::{
    AuditEntityType, AuditEntry, AuditFilter, AuditLogApi, Id, NewAuditEntry, RefugeResult,
};

fn audit_select() -> SelectStatement {
    Query::select()
        .from(RefugeAuditLog::Table)
        .columns([
            RefugeAuditLog::Id,
            RefugeAuditLog::ActivationId,
            RefugeAuditLog::ActorId,
            RefugeAuditLog::Action,
            RefugeAuditLog::EntityType,
            RefugeAuditLog::EntityId,
            RefugeAuditLog::CreatedAt,
            RefugeAuditLog::BeforeJson,
            RefugeAuditLog::AfterJson,
        ])
        .to_owned()
}

fn audit_from_row(row: &QueryResult) -> RefugeResult<AuditEntry> {
    let action: String = row.try_get("", &col_name(RefugeAuditLog::Action))?;
    let entity_type: String = row.try_get("", &col_name(RefugeAuditLog::EntityType))?;
    Ok(AuditEntry {
        id: read_id(row, RefugeAuditLog::Id)?,
        activation_id: read_opt_activation(row, RefugeAuditLog::ActivationId)?,
        actor: read_actor(row, RefugeAuditLog::ActorId)?,
        action: action.parse()?,
        entity_type: entity_type.parse()?,
        entity_id: read_id(row, RefugeAuditLog::EntityId)?,
        created_at: read_timestamp(row, RefugeAuditLog::CreatedAt)?,
        before: read_opt_json(row, RefugeAuditLog::BeforeJson)?,
        after: read_opt_json(row, RefugeAuditLog::AfterJson)?,
    })
}

fn entity_clause(entity_type: AuditEntityType, ids: SelectStatement) -> Condition {
    Condition::all()
        .add(Expr::col(RefugeAuditLog::EntityType).eq(entity_type.as_str()))
        .add(Expr::col(RefugeAuditLog::EntityId).in_subquery(ids))
}

impl RefugeStore {
    fn dataset_field_ids(&self, dataset_id: Id) -> SelectStatement {
        Query::select()
            .from(RefugeFields::Table)
            .column(RefugeFields::Id)
            .and_where(Expr::col(RefugeFields::DatasetId).eq(id_value(self.backend, dataset_id)))
            .to_owned()
    }

    /// Entries on the dataset row, its fields, its records and its fields' options.
    fn dataset_audit_condition(&self, dataset_id: Id) -> Condition {
        let record_ids = Query::select()
            .from(RefugeRecords::Table)
            .column(RefugeRecords::Id)
            .and_where(Expr::col(RefugeRecords::DatasetId).eq(id_value(self.backend, dataset_id)))
            .to_owned();
        let option_ids = Query::select()
            .from(RefugeFieldOptions::Table)
            .column(RefugeFieldOptions::Id)
            .and_where(
                Expr::col(RefugeFieldOptions::FieldId)
                    .in_subquery(self.dataset_field_ids(dataset_id)),
            )
            .to_owned();
        Condition::any()
            .add(
                Condition::all()
                    .add(
                        Expr::col(RefugeAuditLog::EntityType)
                            .eq(AuditEntityType::Dataset.as_str()),
                    )
                    .add(Expr::col(RefugeAuditLog::EntityId).eq(id_value(self.backend, dataset_id))),
            )
            .add(entity_clause(
                AuditEntityType::Field,
                self.dataset_field_ids(dataset_id),
            ))
            .add(entity_clause(AuditEntityType::Record, record_ids))
            .add(entity_clause(AuditEntityType::FieldOption, option_ids))
    }
}

#[async_trait]
impl AuditLogApi for RefugeStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> RefugeResult<AuditEntry> {
        let tx = self.conn.begin().await?;
        let stored = self.insert_audit(&tx, entry).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_audit(&self, filter: AuditFilter) -> RefugeResult<Vec<AuditEntry>> {
        let mut select = audit_select();
        if let Some(activation_id) = filter.activation_id {
            select.and_where(
                Expr::col(RefugeAuditLog::ActivationId).eq(id_value(self.backend, activation_id.0)),
            );
        }
        if let Some(entity_type) = filter.entity_type {
            select.and_where(Expr::col(RefugeAuditLog::EntityType).eq(entity_type.as_str()));
        }
        if let Some(entity_id) = filter.entity_id {
            select.and_where(
                Expr::col(RefugeAuditLog::EntityId).eq(id_value(self.backend, entity_id)),
            );
        }
        select
            .order_by(RefugeAuditLog::CreatedAt, Order::Desc)
            .limit(self.page_limit(filter.limit));
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn list_dataset_audit(
        &self,
        dataset_id: Id,
        limit: Option<u64>,
    ) -> RefugeResult<Vec<AuditEntry>> {
        let limit = self.page_limit(limit);
        let select = audit_select()
            .cond_where(self.dataset_audit_condition(dataset_id))
            .order_by(RefugeAuditLog::CreatedAt, Order::Desc)
            .limit(limit)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        log::debug!("dataset audit dataset={dataset_id} entries={}", rows.len());
        rows.iter().map(audit_from_row).collect()
    }
}
