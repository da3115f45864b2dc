use async_trait::async_trait;
use sea_orm::sea_query::{
    Alias, Expr, ExprTrait, Func, Order, Query, SelectStatement, Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, TransactionTrait};

use crate::db::*;
use crate::store::{
    RefugeStore, audit_image, col_name, count_rows, exec, exec_count, id_value, json_text,
    none_id_value, query_all, query_one, read_actor, read_id, read_json, read_opt_actor,
    read_opt_id, read_timestamp,
};
use refuge_core::{
    ActorId, AuditAction, AuditEntityType, CoreKind, CreateFieldInput, Dataset, Field,
    FieldCatalogApi, FieldPatch, FieldType, Id, Lifecycle, NewAuditEntry, RefugeError,
    RefugeResult, RelationTarget, Timestamp, validate_field_shape, validate_key, validate_name,
};

fn field_select() -> SelectStatement {
    Query::select()
        .from(RefugeFields::Table)
        .columns([
            RefugeFields::Id,
            RefugeFields::DatasetId,
            RefugeFields::Name,
            RefugeFields::Key,
            RefugeFields::FieldType,
            RefugeFields::IsRequired,
            RefugeFields::IsUnique,
            RefugeFields::ConfigJson,
            RefugeFields::Position,
            RefugeFields::IsActive,
            RefugeFields::IsMultiple,
            RefugeFields::TargetKind,
            RefugeFields::TargetDatasetId,
            RefugeFields::TargetCore,
            RefugeFields::CreatedBy,
            RefugeFields::UpdatedBy,
            RefugeFields::CreatedAt,
            RefugeFields::UpdatedAt,
            RefugeFields::DeletedAt,
            RefugeFields::DeletedBy,
        ])
        .to_owned()
}

fn field_from_row(row: &QueryResult) -> RefugeResult<Field> {
    let field_type: String = row.try_get("", &col_name(RefugeFields::FieldType))?;
    let target_kind: Option<String> = row.try_get("", &col_name(RefugeFields::TargetKind))?;
    let target_core: Option<String> = row.try_get("", &col_name(RefugeFields::TargetCore))?;
    let relation_target = match target_kind.as_deref() {
        None => None,
        Some("dynamic") => {
            let dataset_id = read_opt_id(row, RefugeFields::TargetDatasetId)?
                .ok_or_else(|| RefugeError::storage("dynamic relation without target dataset"))?;
            Some(RelationTarget::Dynamic { dataset_id })
        }
        Some("core") => {
            let core = target_core
                .ok_or_else(|| RefugeError::storage("core relation without target kind"))?;
            Some(RelationTarget::Core {
                core: core.parse::<CoreKind>()?,
            })
        }
        Some(other) => {
            return Err(RefugeError::storage(format!(
                "unknown relation target kind '{other}'"
            )));
        }
    };
    let deleted_at: Option<i64> = row.try_get("", &col_name(RefugeFields::DeletedAt))?;
    let deleted_by: Option<i64> = row.try_get("", &col_name(RefugeFields::DeletedBy))?;
    Ok(Field {
        id: read_id(row, RefugeFields::Id)?,
        dataset_id: read_id(row, RefugeFields::DatasetId)?,
        name: row.try_get("", &col_name(RefugeFields::Name))?,
        key: row.try_get("", &col_name(RefugeFields::Key))?,
        field_type: field_type.parse()?,
        required: row.try_get("", &col_name(RefugeFields::IsRequired))?,
        unique: row.try_get("", &col_name(RefugeFields::IsUnique))?,
        config: read_json(row, RefugeFields::ConfigJson)?,
        position: row.try_get("", &col_name(RefugeFields::Position))?,
        is_active: row.try_get("", &col_name(RefugeFields::IsActive))?,
        multiple: row.try_get("", &col_name(RefugeFields::IsMultiple))?,
        relation_target,
        created_by: read_actor(row, RefugeFields::CreatedBy)?,
        updated_by: read_opt_actor(row, RefugeFields::UpdatedBy)?,
        created_at: read_timestamp(row, RefugeFields::CreatedAt)?,
        updated_at: read_timestamp(row, RefugeFields::UpdatedAt)?,
        lifecycle: Lifecycle::from_columns(deleted_at, deleted_by),
    })
}

/// Column values for the three relation target columns.
fn target_values(
    backend: DatabaseBackend,
    target: Option<&RelationTarget>,
) -> (Option<String>, SeaValue, Option<String>) {
    let kind = target.map(|target| target.kind_str().to_string());
    match target {
        None => (kind, none_id_value(backend), None),
        Some(RelationTarget::Dynamic { dataset_id }) => {
            (kind, id_value(backend, *dataset_id), None)
        }
        Some(RelationTarget::Core { core }) => {
            (kind, none_id_value(backend), Some(core.as_str().to_string()))
        }
    }
}

/// Clamps a requested 1-based slot into `1..=upper`.
pub(crate) fn clamp_position(requested: i32, upper: i32) -> i32 {
    Ord::clamp(requested, 1, Ord::max(upper, 1))
}

fn listed_condition(select: &mut SelectStatement) {
    select
        .and_where(Expr::col(RefugeFields::IsActive).eq(true))
        .and_where(Expr::col(RefugeFields::DeletedAt).is_null());
}

impl RefugeStore {
    /// Any field row with this id, tombstoned or not.
    pub(crate) async fn fetch_field<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_id: Id,
    ) -> RefugeResult<Option<Field>> {
        let select = field_select()
            .and_where(Expr::col(RefugeFields::Id).eq(id_value(self.backend, field_id)))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| field_from_row(&row))
            .transpose()
    }

    pub(crate) async fn fetch_field_for_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_id: Id,
    ) -> RefugeResult<Option<Field>> {
        let mut select = field_select()
            .and_where(Expr::col(RefugeFields::Id).eq(id_value(self.backend, field_id)))
            .limit(1)
            .to_owned();
        self.lock_for_update(&mut select);
        query_one(conn, &select)
            .await?
            .map(|row| field_from_row(&row))
            .transpose()
    }

    pub(crate) async fn require_live_field<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_id: Id,
    ) -> RefugeResult<Field> {
        match self.fetch_field(conn, field_id).await? {
            Some(field) if field.lifecycle.is_active() => Ok(field),
            _ => Err(RefugeError::not_found(format!("field {field_id}"))),
        }
    }

    /// Active, non-deleted fields in display order.
    pub(crate) async fn listed_fields<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
    ) -> RefugeResult<Vec<Field>> {
        let mut select = field_select()
            .and_where(Expr::col(RefugeFields::DatasetId).eq(id_value(self.backend, dataset_id)))
            .to_owned();
        listed_condition(&mut select);
        select
            .order_by(RefugeFields::Position, Order::Asc)
            .order_by(RefugeFields::CreatedAt, Order::Asc);
        let rows = query_all(conn, &select).await?;
        rows.iter().map(field_from_row).collect()
    }

    /// Number of listed fields, which is also the highest occupied position.
    pub(crate) async fn listed_field_count<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
    ) -> RefugeResult<i32> {
        let mut select = Query::select()
            .from(RefugeFields::Table)
            .expr_as(Func::count(Expr::col(RefugeFields::Id)), Alias::new("count"))
            .and_where(Expr::col(RefugeFields::DatasetId).eq(id_value(self.backend, dataset_id)))
            .to_owned();
        listed_condition(&mut select);
        let count = count_rows(conn, &select).await?;
        i32::try_from(count).map_err(|_| RefugeError::storage("field count out of range"))
    }

    /// Adds `delta` to the position of every listed field in `lower..=upper`.
    pub(crate) async fn shift_positions<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
        lower: i32,
        upper: Option<i32>,
        delta: i32,
    ) -> RefugeResult<u64> {
        let mut update = Query::update()
            .table(RefugeFields::Table)
            .value(
                RefugeFields::Position,
                Expr::col(RefugeFields::Position).add(delta),
            )
            .and_where(Expr::col(RefugeFields::DatasetId).eq(id_value(self.backend, dataset_id)))
            .and_where(Expr::col(RefugeFields::IsActive).eq(true))
            .and_where(Expr::col(RefugeFields::DeletedAt).is_null())
            .and_where(Expr::col(RefugeFields::Position).gte(lower))
            .to_owned();
        if let Some(upper) = upper {
            update.and_where(Expr::col(RefugeFields::Position).lte(upper));
        }
        exec_count(conn, &update).await
    }

    pub(crate) async fn set_field_position<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_id: Id,
        position: i32,
        actor: ActorId,
        now: Timestamp,
    ) -> RefugeResult<()> {
        let update = Query::update()
            .table(RefugeFields::Table)
            .values([
                (RefugeFields::Position, position.into()),
                (RefugeFields::UpdatedBy, actor.0.into()),
                (RefugeFields::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(Expr::col(RefugeFields::Id).eq(id_value(self.backend, field_id)))
            .to_owned();
        exec(conn, &update).await
    }

    async fn ensure_field_key_free<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
        key: &str,
    ) -> RefugeResult<()> {
        let select = Query::select()
            .from(RefugeFields::Table)
            .column(RefugeFields::Id)
            .and_where(Expr::col(RefugeFields::DatasetId).eq(id_value(self.backend, dataset_id)))
            .and_where(Expr::col(RefugeFields::Key).eq(key))
            .limit(1)
            .to_owned();
        if query_one(conn, &select).await?.is_some() {
            return Err(RefugeError::duplicate_key(format!(
                "field key '{key}' already exists in dataset {dataset_id}"
            )));
        }
        Ok(())
    }

    async fn validate_relation_target<C: ConnectionTrait>(
        &self,
        conn: &C,
        field_type: FieldType,
        target: Option<&RelationTarget>,
    ) -> RefugeResult<()> {
        validate_field_shape(field_type, target)?;
        if let Some(RelationTarget::Dynamic { dataset_id }) = target {
            self.require_live_dataset(conn, *dataset_id).await?;
        }
        Ok(())
    }

    /// Inserts a field at its clamped slot, shifting later fields, and audits it.
    pub(crate) async fn insert_field<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset: &Dataset,
        input: CreateFieldInput,
    ) -> RefugeResult<Field> {
        validate_name(&input.name)?;
        validate_key(&input.key)?;
        self.validate_relation_target(conn, input.field_type, input.relation_target.as_ref())
            .await?;
        self.ensure_field_key_free(conn, dataset.id, &input.key)
            .await?;
        let listed = self.listed_field_count(conn, dataset.id).await?;
        let position = match input.position {
            Some(requested) => clamp_position(requested, listed + 1),
            None => listed + 1,
        };
        if position <= listed {
            self.shift_positions(conn, dataset.id, position, None, 1)
                .await?;
        }
        let now = Timestamp::now();
        let field = Field {
            id: Id::new(),
            dataset_id: dataset.id,
            name: input.name.trim().to_string(),
            key: input.key,
            field_type: input.field_type,
            required: input.required,
            unique: input.unique,
            config: input.config.unwrap_or_default(),
            position,
            is_active: true,
            multiple: input.multiple,
            relation_target: input.relation_target,
            created_by: input.actor,
            updated_by: None,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        };
        let (target_kind, target_dataset, target_core) =
            target_values(self.backend, field.relation_target.as_ref());
        let insert = Query::insert()
            .into_table(RefugeFields::Table)
            .columns([
                RefugeFields::Id,
                RefugeFields::DatasetId,
                RefugeFields::Name,
                RefugeFields::Key,
                RefugeFields::FieldType,
                RefugeFields::IsRequired,
                RefugeFields::IsUnique,
                RefugeFields::ConfigJson,
                RefugeFields::Position,
                RefugeFields::IsActive,
                RefugeFields::IsMultiple,
                RefugeFields::TargetKind,
                RefugeFields::TargetDatasetId,
                RefugeFields::TargetCore,
                RefugeFields::CreatedBy,
                RefugeFields::CreatedAt,
                RefugeFields::UpdatedAt,
            ])
            .values_panic([
                id_value(self.backend, field.id).into(),
                id_value(self.backend, dataset.id).into(),
                field.name.clone().into(),
                field.key.clone().into(),
                field.field_type.as_str().into(),
                field.required.into(),
                field.unique.into(),
                json_text(&field.config)?.into(),
                position.into(),
                true.into(),
                field.multiple.into(),
                target_kind.into(),
                target_dataset.into(),
                target_core.into(),
                field.created_by.0.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;
        self.insert_audit(
            conn,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor: field.created_by,
                action: AuditAction::Create,
                entity_type: AuditEntityType::Field,
                entity_id: field.id,
                before: None,
                after: audit_image(&field)?,
            },
        )
        .await?;
        Ok(field)
    }

    /// Writes `after` over `before`, keeping listed positions gapless.
    ///
    /// A field leaving the listed set closes its slot; a field re-entering it
    /// is appended after the last listed field.
    pub(crate) async fn persist_field_change<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset: &Dataset,
        before: &Field,
        mut after: Field,
        actor: ActorId,
    ) -> RefugeResult<Field> {
        let now = Timestamp::now();
        match (before.is_listed(), after.is_listed()) {
            (true, false) => {
                self.shift_positions(conn, dataset.id, before.position + 1, None, -1)
                    .await?;
                after.position = 0;
            }
            (false, true) => {
                after.position = self.listed_field_count(conn, dataset.id).await? + 1;
            }
            _ => {}
        }
        after.updated_by = Some(actor);
        after.updated_at = now;
        let (deleted_at, deleted_by) = match after.lifecycle {
            Lifecycle::Active => (None, None),
            Lifecycle::Deleted { at, by } => (Some(at.as_micros()), by.map(|by| by.0)),
        };
        let (target_kind, target_dataset, target_core) =
            target_values(self.backend, after.relation_target.as_ref());
        let update = Query::update()
            .table(RefugeFields::Table)
            .values([
                (RefugeFields::Name, after.name.clone().into()),
                (RefugeFields::Key, after.key.clone().into()),
                (RefugeFields::FieldType, after.field_type.as_str().into()),
                (RefugeFields::IsRequired, after.required.into()),
                (RefugeFields::IsUnique, after.unique.into()),
                (RefugeFields::ConfigJson, json_text(&after.config)?.into()),
                (RefugeFields::Position, after.position.into()),
                (RefugeFields::IsActive, after.is_active.into()),
                (RefugeFields::IsMultiple, after.multiple.into()),
                (RefugeFields::TargetKind, target_kind.into()),
                (RefugeFields::TargetDatasetId, target_dataset.into()),
                (RefugeFields::TargetCore, target_core.into()),
                (RefugeFields::UpdatedBy, actor.0.into()),
                (RefugeFields::UpdatedAt, now.as_micros().into()),
                (RefugeFields::DeletedAt, deleted_at.into()),
                (RefugeFields::DeletedBy, deleted_by.into()),
            ])
            .and_where(Expr::col(RefugeFields::Id).eq(id_value(self.backend, before.id)))
            .to_owned();
        exec(conn, &update).await?;
        let action = if before.lifecycle.is_active() && after.lifecycle.is_deleted() {
            AuditAction::Delete
        } else {
            AuditAction::Update
        };
        self.insert_audit(
            conn,
            NewAuditEntry {
                activation_id: Some(dataset.activation_id),
                actor,
                action,
                entity_type: AuditEntityType::Field,
                entity_id: before.id,
                before: audit_image(before)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        Ok(after)
    }
}

#[async_trait]
impl FieldCatalogApi for RefugeStore {
    async fn list_fields(&self, dataset_id: Id) -> RefugeResult<Vec<Field>> {
        self.require_live_dataset(&self.conn, dataset_id).await?;
        self.listed_fields(&self.conn, dataset_id).await
    }

    async fn get_field(&self, field_id: Id) -> RefugeResult<Field> {
        self.fetch_field(&self.conn, field_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("field {field_id}")))
    }

    async fn create_field(&self, input: CreateFieldInput) -> RefugeResult<Field> {
        let tx = self.conn.begin().await?;
        let dataset = self.require_live_dataset(&tx, input.dataset_id).await?;
        let field = self.insert_field(&tx, &dataset, input).await?;
        tx.commit().await?;
        log::info!(
            "field created id={} dataset={} key={} position={}",
            field.id,
            field.dataset_id,
            field.key,
            field.position
        );
        Ok(field)
    }

    async fn update_field(
        &self,
        field_id: Id,
        actor: ActorId,
        patch: FieldPatch,
    ) -> RefugeResult<Field> {
        let tx = self.conn.begin().await?;
        let before = self.require_live_field(&tx, field_id).await?;
        let dataset = self.require_live_dataset(&tx, before.dataset_id).await?;
        let mut after = before.clone();
        if let Some(name) = patch.name.into_option() {
            validate_name(&name)?;
            after.name = name.trim().to_string();
        }
        if let Some(key) = patch.key.into_option()
            && key != before.key
        {
            validate_key(&key)?;
            self.ensure_field_key_free(&tx, dataset.id, &key).await?;
            after.key = key;
        }
        patch.field_type.apply_to(&mut after.field_type);
        patch.required.apply_to(&mut after.required);
        patch.unique.apply_to(&mut after.unique);
        patch.config.apply_to(&mut after.config);
        patch.multiple.apply_to(&mut after.multiple);
        patch.relation_target.apply_to(&mut after.relation_target);
        patch.is_active.apply_to(&mut after.is_active);
        if let Some(true) = patch.deleted.into_option() {
            if after.required {
                return Err(RefugeError::validation(format!(
                    "required field '{}' cannot be deleted",
                    after.key
                )));
            }
            after.lifecycle = Lifecycle::Deleted {
                at: Timestamp::now(),
                by: Some(actor),
            };
            after.is_active = false;
        }
        let shape_changed = after.field_type != before.field_type
            || after.relation_target != before.relation_target;
        if shape_changed {
            self.validate_relation_target(&tx, after.field_type, after.relation_target.as_ref())
                .await?;
            let usage = self.usage_of(&tx, &before).await?;
            if usage.total() > 0 {
                return Err(RefugeError::validation(format!(
                    "field '{}' holds {} values; its type or target cannot change",
                    before.key,
                    usage.total()
                )));
            }
        }
        if after.key != before.key && before.field_type.is_atomic() {
            let moved = self
                .rename_payload_key(&tx, dataset.id, &before.key, &after.key, actor)
                .await?;
            log::info!(
                "field key renamed id={field_id} from={} to={} records={moved}",
                before.key,
                after.key
            );
        }
        let field = self
            .persist_field_change(&tx, &dataset, &before, after, actor)
            .await?;
        tx.commit().await?;
        if field.lifecycle.is_deleted() {
            log::info!("field deleted id={field_id} dataset={}", field.dataset_id);
        } else {
            log::debug!("field updated id={field_id} position={}", field.position);
        }
        Ok(field)
    }
}
