use async_trait::async_trait;
use sea_orm::sea_query::{Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, QueryResult, TransactionTrait};

use crate::db::*;
use crate::store::{
    RefugeStore, audit_image, col_name, exec, exec_count, id_value, json_text, opt_json_text,
    query_all, query_one, read_actor, read_id, read_json, read_opt_actor, read_opt_json,
    read_timestamp,
};
use refuge_core::{
    ActivationId, ActorId, AuditAction, AuditEntityType, CreateDatasetInput, CreateFieldInput,
    CreateFromTemplateInput, CreateOptionInput, Dataset, DatasetPatch, DatasetRegistryApi, Id,
    Lifecycle, LocationId, NewAuditEntry, RefugeError, RefugeResult, Timestamp, validate_key,
    validate_name,
};

fn dataset_select() -> SelectStatement {
    Query::select()
        .from(RefugeDatasets::Table)
        .columns([
            RefugeDatasets::Id,
            RefugeDatasets::ActivationId,
            RefugeDatasets::LocationId,
            RefugeDatasets::Name,
            RefugeDatasets::Key,
            RefugeDatasets::ConfigJson,
            RefugeDatasets::SchemaSnapshotJson,
            RefugeDatasets::CreatedBy,
            RefugeDatasets::UpdatedBy,
            RefugeDatasets::CreatedAt,
            RefugeDatasets::UpdatedAt,
            RefugeDatasets::DeletedAt,
            RefugeDatasets::DeletedBy,
        ])
        .to_owned()
}

fn dataset_from_row(row: &QueryResult) -> RefugeResult<Dataset> {
    let deleted_at: Option<i64> = row.try_get("", &col_name(RefugeDatasets::DeletedAt))?;
    let deleted_by: Option<i64> = row.try_get("", &col_name(RefugeDatasets::DeletedBy))?;
    Ok(Dataset {
        id: read_id(row, RefugeDatasets::Id)?,
        activation_id: ActivationId(read_id(row, RefugeDatasets::ActivationId)?),
        location_id: LocationId(read_id(row, RefugeDatasets::LocationId)?),
        name: row.try_get("", &col_name(RefugeDatasets::Name))?,
        key: row.try_get("", &col_name(RefugeDatasets::Key))?,
        config: read_json(row, RefugeDatasets::ConfigJson)?,
        schema_snapshot: read_opt_json(row, RefugeDatasets::SchemaSnapshotJson)?,
        created_by: read_actor(row, RefugeDatasets::CreatedBy)?,
        updated_by: read_opt_actor(row, RefugeDatasets::UpdatedBy)?,
        created_at: read_timestamp(row, RefugeDatasets::CreatedAt)?,
        updated_at: read_timestamp(row, RefugeDatasets::UpdatedAt)?,
        lifecycle: Lifecycle::from_columns(deleted_at, deleted_by),
    })
}

impl RefugeStore {
    /// Any dataset row with this id, tombstoned or not.
    pub(crate) async fn fetch_dataset<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
    ) -> RefugeResult<Option<Dataset>> {
        let select = dataset_select()
            .and_where(Expr::col(RefugeDatasets::Id).eq(id_value(self.backend, dataset_id)))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| dataset_from_row(&row))
            .transpose()
    }

    pub(crate) async fn require_live_dataset<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
    ) -> RefugeResult<Dataset> {
        match self.fetch_dataset(conn, dataset_id).await? {
            Some(dataset) if dataset.lifecycle.is_active() => Ok(dataset),
            _ => Err(RefugeError::not_found(format!("dataset {dataset_id}"))),
        }
    }

    async fn ensure_dataset_key_free<C: ConnectionTrait>(
        &self,
        conn: &C,
        activation_id: ActivationId,
        key: &str,
    ) -> RefugeResult<()> {
        let select = Query::select()
            .from(RefugeDatasets::Table)
            .column(RefugeDatasets::Id)
            .and_where(
                Expr::col(RefugeDatasets::ActivationId).eq(id_value(self.backend, activation_id.0)),
            )
            .and_where(Expr::col(RefugeDatasets::Key).eq(key))
            .limit(1)
            .to_owned();
        if query_one(conn, &select).await?.is_some() {
            return Err(RefugeError::duplicate_key(format!(
                "dataset key '{key}' already exists in activation {activation_id}"
            )));
        }
        Ok(())
    }

    /// Inserts the dataset row and its audit entry on `conn`.
    async fn insert_dataset<C: ConnectionTrait>(
        &self,
        conn: &C,
        input: CreateDatasetInput,
    ) -> RefugeResult<Dataset> {
        validate_name(&input.name)?;
        validate_key(&input.key)?;
        self.ensure_dataset_key_free(conn, input.activation_id, &input.key)
            .await?;
        let now = Timestamp::now();
        let dataset = Dataset {
            id: Id::new(),
            activation_id: input.activation_id,
            location_id: input.location_id,
            name: input.name.trim().to_string(),
            key: input.key,
            config: input.config.unwrap_or_default(),
            schema_snapshot: input.schema_snapshot,
            created_by: input.actor,
            updated_by: None,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        };
        let insert = Query::insert()
            .into_table(RefugeDatasets::Table)
            .columns([
                RefugeDatasets::Id,
                RefugeDatasets::ActivationId,
                RefugeDatasets::LocationId,
                RefugeDatasets::Name,
                RefugeDatasets::Key,
                RefugeDatasets::ConfigJson,
                RefugeDatasets::SchemaSnapshotJson,
                RefugeDatasets::CreatedBy,
                RefugeDatasets::CreatedAt,
                RefugeDatasets::UpdatedAt,
            ])
            .values_panic([
                id_value(self.backend, dataset.id).into(),
                id_value(self.backend, dataset.activation_id.0).into(),
                id_value(self.backend, dataset.location_id.0).into(),
                dataset.name.clone().into(),
                dataset.key.clone().into(),
                json_text(&dataset.config)?.into(),
                opt_json_text(dataset.schema_snapshot.as_ref())?.into(),
                dataset.created_by.0.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;
        self.insert_audit(
            conn,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor: dataset.created_by,
                action: AuditAction::Create,
                entity_type: AuditEntityType::Dataset,
                entity_id: dataset.id,
                before: None,
                after: audit_image(&dataset)?,
            },
        )
        .await?;
        Ok(dataset)
    }

    async fn tombstone_dataset<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset: &Dataset,
        actor: ActorId,
    ) -> RefugeResult<bool> {
        let now = Timestamp::now();
        let update = Query::update()
            .table(RefugeDatasets::Table)
            .values([
                (RefugeDatasets::DeletedAt, now.as_micros().into()),
                (RefugeDatasets::DeletedBy, actor.0.into()),
                (RefugeDatasets::UpdatedBy, actor.0.into()),
                (RefugeDatasets::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(Expr::col(RefugeDatasets::Id).eq(id_value(self.backend, dataset.id)))
            .and_where(Expr::col(RefugeDatasets::DeletedAt).is_null())
            .to_owned();
        if exec_count(conn, &update).await? == 0 {
            return Ok(false);
        }
        let mut after = dataset.clone();
        after.lifecycle = Lifecycle::Deleted {
            at: now,
            by: Some(actor),
        };
        after.updated_by = Some(actor);
        after.updated_at = now;
        self.insert_audit(
            conn,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor,
                action: AuditAction::Delete,
                entity_type: AuditEntityType::Dataset,
                entity_id: dataset.id,
                before: audit_image(dataset)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        Ok(true)
    }
}

#[async_trait]
impl DatasetRegistryApi for RefugeStore {
    async fn list_datasets(&self, activation_id: ActivationId) -> RefugeResult<Vec<Dataset>> {
        let select = dataset_select()
            .and_where(
                Expr::col(RefugeDatasets::ActivationId).eq(id_value(self.backend, activation_id.0)),
            )
            .and_where(Expr::col(RefugeDatasets::DeletedAt).is_null())
            .order_by(RefugeDatasets::CreatedAt, Order::Desc)
            .to_owned();
        let rows = query_all(&self.conn, &select).await?;
        rows.iter().map(dataset_from_row).collect()
    }

    async fn get_dataset(&self, dataset_id: Id) -> RefugeResult<Dataset> {
        self.fetch_dataset(&self.conn, dataset_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("dataset {dataset_id}")))
    }

    async fn create_dataset(&self, input: CreateDatasetInput) -> RefugeResult<Dataset> {
        let tx = self.conn.begin().await?;
        let dataset = self.insert_dataset(&tx, input).await?;
        tx.commit().await?;
        log::info!(
            "dataset created id={} key={} activation={}",
            dataset.id,
            dataset.key,
            dataset.activation_id
        );
        Ok(dataset)
    }

    async fn create_dataset_from_template(
        &self,
        input: CreateFromTemplateInput,
    ) -> RefugeResult<Dataset> {
        let template = input.template;
        let snapshot = serde_json::to_value(&template)
            .map_err(|err| RefugeError::storage(format!("encode template: {err}")))?;
        let tx = self.conn.begin().await?;
        let dataset = self
            .insert_dataset(
                &tx,
                CreateDatasetInput {
                    activation_id: input.activation_id,
                    location_id: input.location_id,
                    actor: input.actor,
                    name: template.name,
                    key: template.key,
                    config: template.config,
                    schema_snapshot: Some(snapshot),
                },
            )
            .await?;
        for template_field in template.fields {
            if !template_field.options.is_empty() && !template_field.field_type.is_select() {
                return Err(RefugeError::validation(format!(
                    "field '{}' of type {} cannot carry options",
                    template_field.key, template_field.field_type
                )));
            }
            let field = self
                .insert_field(
                    &tx,
                    &dataset,
                    CreateFieldInput {
                        dataset_id: dataset.id,
                        actor: input.actor,
                        name: template_field.name,
                        key: template_field.key,
                        field_type: template_field.field_type,
                        required: template_field.required,
                        unique: template_field.unique,
                        multiple: template_field.multiple,
                        config: template_field.config,
                        position: None,
                        relation_target: template_field.relation_target,
                    },
                )
                .await?;
            for option in template_field.options {
                self.insert_option(
                    &tx,
                    &dataset,
                    &field,
                    CreateOptionInput {
                        field_id: field.id,
                        actor: input.actor,
                        label: option.label,
                        value: option.value,
                        color: option.color,
                        position: None,
                    },
                )
                .await?;
            }
        }
        tx.commit().await?;
        log::info!(
            "dataset created from template id={} key={}",
            dataset.id,
            dataset.key
        );
        Ok(dataset)
    }

    async fn update_dataset(
        &self,
        dataset_id: Id,
        actor: ActorId,
        patch: DatasetPatch,
    ) -> RefugeResult<Dataset> {
        let tx = self.conn.begin().await?;
        let before = self
            .fetch_dataset(&tx, dataset_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("dataset {dataset_id}")))?;
        if patch.is_empty() {
            return Ok(before);
        }
        let now = Timestamp::now();
        let mut after = before.clone();
        if let Some(name) = patch.name.into_option() {
            validate_name(&name)?;
            after.name = name.trim().to_string();
        }
        patch.config.apply_to(&mut after.config);
        match patch.deleted.into_option() {
            Some(true) if after.lifecycle.is_active() => {
                after.lifecycle = Lifecycle::Deleted {
                    at: now,
                    by: Some(actor),
                };
            }
            Some(false) => after.lifecycle = Lifecycle::Active,
            _ => {}
        }
        after.updated_by = Some(actor);
        after.updated_at = now;
        let (deleted_at, deleted_by) = match after.lifecycle {
            Lifecycle::Active => (None, None),
            Lifecycle::Deleted { at, by } => (Some(at.as_micros()), by.map(|by| by.0)),
        };
        let update = Query::update()
            .table(RefugeDatasets::Table)
            .values([
                (RefugeDatasets::Name, after.name.clone().into()),
                (RefugeDatasets::ConfigJson, json_text(&after.config)?.into()),
                (RefugeDatasets::UpdatedBy, actor.0.into()),
                (RefugeDatasets::UpdatedAt, now.as_micros().into()),
                (RefugeDatasets::DeletedAt, deleted_at.into()),
                (RefugeDatasets::DeletedBy, deleted_by.into()),
            ])
            .and_where(Expr::col(RefugeDatasets::Id).eq(id_value(self.backend, dataset_id)))
            .to_owned();
        exec(&tx, &update).await?;
        let action = if before.lifecycle.is_active() && after.lifecycle.is_deleted() {
            AuditAction::Delete
        } else {
            AuditAction::Update
        };
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id: Some(after.activation_id),
                actor,
                action,
                entity_type: AuditEntityType::Dataset,
                entity_id: dataset_id,
                before: audit_image(&before)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        tx.commit().await?;
        log::debug!("dataset updated id={dataset_id}");
        Ok(after)
    }

    async fn delete_dataset(&self, dataset_id: Id, actor: ActorId) -> RefugeResult<bool> {
        let tx = self.conn.begin().await?;
        let Some(dataset) = self.fetch_dataset(&tx, dataset_id).await? else {
            return Ok(false);
        };
        if dataset.lifecycle.is_deleted() {
            return Ok(false);
        }
        let deleted = self.tombstone_dataset(&tx, &dataset, actor).await?;
        tx.commit().await?;
        if deleted {
            log::info!("dataset deleted id={dataset_id} actor={}", actor.0);
        }
        Ok(deleted)
    }
}
