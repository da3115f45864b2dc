use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, QueryResult, TransactionTrait};

use crate::db::*;
use crate::store::{
    RefugeStore, audit_image, col_name, exec, exec_count, id_value, next_position,
    normalize_option_value, query_all, query_one, read_id, read_timestamp,
};
use refuge_core::{
    ActorId, AuditAction, AuditEntityType, CreateOptionInput, Dataset, Field, FieldOption, Id,
    NewAuditEntry, OptionCatalogApi, OptionPatch, RefugeError, RefugeResult, Timestamp,
    validate_name,
};

pub(crate) fn option_select() -> SelectStatement {
    Query::select()
        .from(RefugeFieldOptions::Table)
        .columns([
            RefugeFieldOptions::Id,
            RefugeFieldOptions::FieldId,
            RefugeFieldOptions::Label,
            RefugeFieldOptions::Value,
            RefugeFieldOptions::Color,
            RefugeFieldOptions::Position,
            RefugeFieldOptions::IsActive,
            RefugeFieldOptions::CreatedAt,
            RefugeFieldOptions::UpdatedAt,
        ])
        .to_owned()
}

pub(crate) fn option_from_row(row: &QueryResult) -> RefugeResult<FieldOption> {
    Ok(FieldOption {
        id: read_id(row, RefugeFieldOptions::Id)?,
        field_id: read_id(row, RefugeFieldOptions::FieldId)?,
        label: row.try_get("", &col_name(RefugeFieldOptions::Label))?,
        value: row.try_get("", &col_name(RefugeFieldOptions::Value))?,
        color: row.try_get("", &col_name(RefugeFieldOptions::Color))?,
        position: row.try_get("", &col_name(RefugeFieldOptions::Position))?,
        is_active: row.try_get("", &col_name(RefugeFieldOptions::IsActive))?,
        created_at: read_timestamp(row, RefugeFieldOptions::CreatedAt)?,
        updated_at: read_timestamp(row, RefugeFieldOptions::UpdatedAt)?,
    })
}

fn normalized_value(raw: &str) -> RefugeResult<String> {
    let value = normalize_option_value(raw);
    if value.is_empty() {
        return Err(RefugeError::validation("option value must not be blank"));
    }
    Ok(value)
}

impl RefugeStore {
    pub(crate) async fn fetch_option<C: ConnectionTrait>(
        &self,
        conn: &C,
        option_id: Id,
    ) -> RefugeResult<Option<FieldOption>> {
        let select = option_select()
            .and_where(Expr::col(RefugeFieldOptions::Id).eq(id_value(self.backend, option_id)))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| option_from_row(&row))
            .transpose()
    }

    /// Active options of the given fields, ordered by position then creation.
    pub(crate) async fn active_options<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_ids: &[Id],
    ) -> RefugeResult<Vec<FieldOption>> {
        if field_ids.is_empty() {
            return Ok(Vec::new());
        }
        let select = option_select()
            .and_where(
                Expr::col(RefugeFieldOptions::FieldId)
                    .is_in(field_ids.iter().map(|id| id_value(self.backend, *id))),
            )
            .and_where(Expr::col(RefugeFieldOptions::IsActive).eq(true))
            .order_by(RefugeFieldOptions::Position, Order::Asc)
            .order_by(RefugeFieldOptions::CreatedAt, Order::Asc)
            .to_owned();
        let rows = query_all(conn, &select).await?;
        rows.iter().map(option_from_row).collect()
    }

    async fn option_owner<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_id: Id,
    ) -> RefugeResult<(Dataset, Field)> {
        let field = self.require_live_field(conn, field_id).await?;
        let dataset = self
            .fetch_dataset(conn, field.dataset_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("dataset {}", field.dataset_id)))?;
        Ok((dataset, field))
    }

    async fn ensure_option_value_free<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_id: Id,
        value: &str,
        except: Option<Id>,
    ) -> RefugeResult<()> {
        let mut select = Query::select()
            .from(RefugeFieldOptions::Table)
            .column(RefugeFieldOptions::Id)
            .and_where(Expr::col(RefugeFieldOptions::FieldId).eq(id_value(self.backend, field_id)))
            .and_where(Expr::col(RefugeFieldOptions::Value).eq(value))
            .and_where(Expr::col(RefugeFieldOptions::IsActive).eq(true))
            .limit(1)
            .to_owned();
        if let Some(except) = except {
            select.and_where(Expr::col(RefugeFieldOptions::Id).ne(id_value(self.backend, except)));
        }
        if query_one(conn, &select).await?.is_some() {
            return Err(RefugeError::duplicate_key(format!(
                "option value '{value}' already exists on field {field_id}"
            )));
        }
        Ok(())
    }

    pub(crate) async fn insert_option<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset: &Dataset,
        field: &Field,
        input: CreateOptionInput,
    ) -> RefugeResult<FieldOption> {
        if !field.field_type.is_select() {
            return Err(RefugeError::validation(format!(
                "field '{}' of type {} does not take options",
                field.key, field.field_type
            )));
        }
        validate_name(&input.label)?;
        let value = normalized_value(input.value.as_deref().unwrap_or(&input.label))?;
        self.ensure_option_value_free(conn, field.id, &value, None)
            .await?;
        let position = match input.position {
            Some(position) => position,
            None => {
                let select = Query::select()
                    .from(RefugeFieldOptions::Table)
                    .expr_as(
                        Func::max(Expr::col(RefugeFieldOptions::Position)),
                        Alias::new("max_position"),
                    )
                    .and_where(
                        Expr::col(RefugeFieldOptions::FieldId).eq(id_value(self.backend, field.id)),
                    )
                    .to_owned();
                next_position(conn, &select).await?
            }
        };
        let now = Timestamp::now();
        let option = FieldOption {
            id: Id::new(),
            field_id: field.id,
            label: input.label.trim().to_string(),
            value,
            color: input.color,
            position,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let insert = Query::insert()
            .into_table(RefugeFieldOptions::Table)
            .columns([
                RefugeFieldOptions::Id,
                RefugeFieldOptions::FieldId,
                RefugeFieldOptions::Label,
                RefugeFieldOptions::Value,
                RefugeFieldOptions::Color,
                RefugeFieldOptions::Position,
                RefugeFieldOptions::IsActive,
                RefugeFieldOptions::CreatedAt,
                RefugeFieldOptions::UpdatedAt,
            ])
            .values_panic([
                id_value(self.backend, option.id).into(),
                id_value(self.backend, field.id).into(),
                option.label.clone().into(),
                option.value.clone().into(),
                option.color.clone().into(),
                position.into(),
                true.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;
        self.insert_audit(
            conn,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor: input.actor,
                action: AuditAction::Create,
                entity_type: AuditEntityType::FieldOption,
                entity_id: option.id,
                before: None,
                after: audit_image(&option)?,
            },
        )
        .await?;
        Ok(option)
    }

    async fn write_option<C: ConnectionTrait>(
        &self,
        conn: &C,
        option: &FieldOption,
    ) -> RefugeResult<()> {
        let update = Query::update()
            .table(RefugeFieldOptions::Table)
            .values([
                (RefugeFieldOptions::Label, option.label.clone().into()),
                (RefugeFieldOptions::Value, option.value.clone().into()),
                (RefugeFieldOptions::Color, option.color.clone().into()),
                (RefugeFieldOptions::Position, option.position.into()),
                (RefugeFieldOptions::IsActive, option.is_active.into()),
                (
                    RefugeFieldOptions::UpdatedAt,
                    option.updated_at.as_micros().into(),
                ),
            ])
            .and_where(Expr::col(RefugeFieldOptions::Id).eq(id_value(self.backend, option.id)))
            .to_owned();
        exec(conn, &update).await
    }
}

#[async_trait]
impl OptionCatalogApi for RefugeStore {
    async fn list_options(&self, field_id: Id) -> RefugeResult<Vec<FieldOption>> {
        self.require_live_field(&self.conn, field_id).await?;
        self.active_options(&self.conn, &[field_id]).await
    }

    async fn get_option(&self, option_id: Id) -> RefugeResult<FieldOption> {
        self.fetch_option(&self.conn, option_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("option {option_id}")))
    }

    async fn create_option(&self, input: CreateOptionInput) -> RefugeResult<FieldOption> {
        let tx = self.conn.begin().await?;
        let (dataset, field) = self.option_owner(&tx, input.field_id).await?;
        let option = self.insert_option(&tx, &dataset, &field, input).await?;
        tx.commit().await?;
        log::debug!(
            "option created id={} field={} value={}",
            option.id,
            option.field_id,
            option.value
        );
        Ok(option)
    }

    async fn update_option(
        &self,
        option_id: Id,
        actor: ActorId,
        patch: OptionPatch,
    ) -> RefugeResult<FieldOption> {
        let tx = self.conn.begin().await?;
        let before = self
            .fetch_option(&tx, option_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("option {option_id}")))?;
        let (dataset, _) = self.option_owner(&tx, before.field_id).await?;
        let mut after = before.clone();
        if let Some(label) = patch.label.into_option() {
            validate_name(&label)?;
            after.label = label.trim().to_string();
        }
        if let Some(value) = patch.value.into_option() {
            after.value = value;
        }
        after.value = normalized_value(&after.value)?;
        patch.color.apply_to(&mut after.color);
        patch.position.apply_to(&mut after.position);
        patch.is_active.apply_to(&mut after.is_active);
        if after.is_active && (after.value != before.value || !before.is_active) {
            self.ensure_option_value_free(&tx, after.field_id, &after.value, Some(option_id))
                .await?;
        }
        after.updated_at = Timestamp::now();
        self.write_option(&tx, &after).await?;
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor,
                action: AuditAction::Update,
                entity_type: AuditEntityType::FieldOption,
                entity_id: option_id,
                before: audit_image(&before)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(after)
    }

    async fn deactivate_option(
        &self,
        option_id: Id,
        actor: ActorId,
    ) -> RefugeResult<Option<FieldOption>> {
        let tx = self.conn.begin().await?;
        let Some(before) = self.fetch_option(&tx, option_id).await? else {
            return Ok(None);
        };
        let now = Timestamp::now();
        let update = Query::update()
            .table(RefugeFieldOptions::Table)
            .values([
                (RefugeFieldOptions::IsActive, false.into()),
                (RefugeFieldOptions::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(Expr::col(RefugeFieldOptions::Id).eq(id_value(self.backend, option_id)))
            .and_where(Expr::col(RefugeFieldOptions::IsActive).eq(true))
            .to_owned();
        if exec_count(&tx, &update).await? == 0 {
            return Ok(None);
        }
        let mut after = before.clone();
        after.is_active = false;
        after.updated_at = now;
        let dataset = self
            .fetch_field(&tx, before.field_id)
            .await?
            .map(|field| field.dataset_id);
        let activation_id = match dataset {
            Some(dataset_id) => self
                .fetch_dataset(&tx, dataset_id)
                .await?
                .map(|dataset| dataset.activation_id),
            None => None,
        };
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id,
                actor,
                action: AuditAction::Delete,
                entity_type: AuditEntityType::FieldOption,
                entity_id: option_id,
                before: audit_image(&before)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        tx.commit().await?;
        log::debug!("option deactivated id={option_id}");
        Ok(Some(after))
    }
}
