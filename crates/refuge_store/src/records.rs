use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sea_orm::sea_query::{Condition, Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, QueryResult, TransactionTrait};
use serde_json::Value as JsonValue;

use crate::db::*;
use crate::relations::ensure_core_kind;
use crate::store::{
    RefugeStore, audit_image, col_name, exec, exec_count, id_value, id_values, json_text,
    query_all, query_one, read_actor, read_id, read_json, read_opt_actor, read_timestamp,
};
use refuge_core::{
    ActivationId, ActorId, AuditAction, AuditEntityType, CoreLinkAssignment, CreateRecordInput,
    DynamicLinkAssignment, Field, FieldValue, Id, Lifecycle, ListRecordsInput, NewAuditEntry,
    OptionAssignment, RECORD_BASE_VERSION, Record, RecordPayload, RecordStoreApi, RefugeError,
    RefugeResult, RelationTarget, Timestamp, UpdateRecordInput, payload_contains,
};

fn record_select() -> SelectStatement {
    Query::select()
        .from(RefugeRecords::Table)
        .columns([
            RefugeRecords::Id,
            RefugeRecords::DatasetId,
            RefugeRecords::ActivationId,
            RefugeRecords::Version,
            RefugeRecords::PayloadJson,
            RefugeRecords::CreatedBy,
            RefugeRecords::UpdatedBy,
            RefugeRecords::CreatedAt,
            RefugeRecords::UpdatedAt,
            RefugeRecords::DeletedAt,
            RefugeRecords::DeletedBy,
        ])
        .to_owned()
}

fn record_from_row(row: &QueryResult) -> RefugeResult<Record> {
    let deleted_at: Option<i64> = row.try_get("", &col_name(RefugeRecords::DeletedAt))?;
    let deleted_by: Option<i64> = row.try_get("", &col_name(RefugeRecords::DeletedBy))?;
    Ok(Record {
        id: read_id(row, RefugeRecords::Id)?,
        dataset_id: read_id(row, RefugeRecords::DatasetId)?,
        activation_id: ActivationId(read_id(row, RefugeRecords::ActivationId)?),
        version: row.try_get("", &col_name(RefugeRecords::Version))?,
        payload: read_json(row, RefugeRecords::PayloadJson)?,
        created_by: read_actor(row, RefugeRecords::CreatedBy)?,
        updated_by: read_opt_actor(row, RefugeRecords::UpdatedBy)?,
        created_at: read_timestamp(row, RefugeRecords::CreatedAt)?,
        updated_at: read_timestamp(row, RefugeRecords::UpdatedAt)?,
        lifecycle: Lifecycle::from_columns(deleted_at, deleted_by),
    })
}

/// Record row plus whichever sub-value sets the write touched.
fn record_image(
    record: &Record,
    options: Option<&[OptionAssignment]>,
    dynamic_links: Option<&[DynamicLinkAssignment]>,
    core_links: Option<&[CoreLinkAssignment]>,
) -> RefugeResult<Option<JsonValue>> {
    let mut image = audit_image(record)?;
    if let Some(JsonValue::Object(map)) = image.as_mut() {
        if let Some(options) = options {
            map.insert("options".to_string(), serde_json::json!(options));
        }
        if let Some(dynamic_links) = dynamic_links {
            map.insert("dynamic_links".to_string(), serde_json::json!(dynamic_links));
        }
        if let Some(core_links) = core_links {
            map.insert("core_links".to_string(), serde_json::json!(core_links));
        }
    }
    Ok(image)
}

fn is_blank(value: Option<&FieldValue>) -> bool {
    match value {
        None => true,
        Some(FieldValue::Text(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn distinct<T: Copy + Eq + std::hash::Hash>(values: &[T]) -> Vec<T> {
    let mut seen = HashSet::new();
    values
        .iter()
        .copied()
        .filter(|value| seen.insert(*value))
        .collect()
}

fn listed_field<'a>(fields: &'a [Field], field_id: Id) -> RefugeResult<&'a Field> {
    fields
        .iter()
        .find(|field| field.id == field_id)
        .ok_or_else(|| {
            RefugeError::validation(format!("field {field_id} is not an active field of the dataset"))
        })
}

fn ensure_single_assignment(seen: &mut HashSet<Id>, field_id: Id) -> RefugeResult<()> {
    if !seen.insert(field_id) {
        return Err(RefugeError::validation(format!(
            "field {field_id} is assigned more than once"
        )));
    }
    Ok(())
}

impl RefugeStore {
    pub(crate) async fn fetch_record<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
    ) -> RefugeResult<Option<Record>> {
        let select = record_select()
            .and_where(Expr::col(RefugeRecords::Id).eq(id_value(self.backend, record_id)))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| record_from_row(&row))
            .transpose()
    }

    pub(crate) async fn require_live_record<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
    ) -> RefugeResult<Record> {
        match self.fetch_record(conn, record_id).await? {
            Some(record) if record.lifecycle.is_active() => Ok(record),
            _ => Err(RefugeError::not_found(format!("record {record_id}"))),
        }
    }

    /// Live records of a dataset, oldest first.
    pub(crate) async fn live_records<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
    ) -> RefugeResult<Vec<Record>> {
        let select = record_select()
            .and_where(Expr::col(RefugeRecords::DatasetId).eq(id_value(self.backend, dataset_id)))
            .and_where(Expr::col(RefugeRecords::DeletedAt).is_null())
            .order_by(RefugeRecords::CreatedAt, Order::Asc)
            .to_owned();
        let rows = query_all(conn, &select).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Live records of a dataset whose payload holds `key`, oldest first.
    async fn live_records_with_key<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
        key: &str,
    ) -> RefugeResult<Vec<Record>> {
        let select = record_select()
            .cond_where(
                Condition::all()
                    .add(Expr::col(RefugeRecords::DatasetId).eq(id_value(self.backend, dataset_id)))
                    .add(Expr::col(RefugeRecords::DeletedAt).is_null())
                    .add(self.payload_has_key(key)),
            )
            .order_by(RefugeRecords::CreatedAt, Order::Asc)
            .to_owned();
        let rows = query_all(conn, &select).await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Moves payload values stored under `from` to `to` in every live record
    /// of the dataset, bumping each rewritten record's version.
    pub(crate) async fn rename_payload_key<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
        from: &str,
        to: &str,
        actor: ActorId,
    ) -> RefugeResult<u64> {
        let records = self.live_records_with_key(conn, dataset_id, from).await?;
        for before in &records {
            let mut after = before.clone();
            if let Some(value) = after.payload.remove(from) {
                after.payload.insert(to.to_string(), value);
            }
            after.version = before.version + 1;
            after.updated_by = Some(actor);
            after.updated_at = Timestamp::now();
            let update = Query::update()
                .table(RefugeRecords::Table)
                .values([
                    (RefugeRecords::PayloadJson, json_text(&after.payload)?.into()),
                    (RefugeRecords::Version, after.version.into()),
                    (RefugeRecords::UpdatedBy, actor.0.into()),
                    (RefugeRecords::UpdatedAt, after.updated_at.as_micros().into()),
                ])
                .and_where(Expr::col(RefugeRecords::Id).eq(id_value(self.backend, before.id)))
                .to_owned();
            exec(conn, &update).await?;
            self.insert_audit(
                conn,
                NewAuditEntry {
                    activation_id: Some(after.activation_id),
                    actor,
                    action: AuditAction::Update,
                    entity_type: AuditEntityType::Record,
                    entity_id: after.id,
                    before: audit_image(before)?,
                    after: audit_image(&after)?,
                },
            )
            .await?;
        }
        Ok(records.len() as u64)
    }

    async fn live_records_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_ids: &[Id],
    ) -> RefugeResult<HashMap<Id, Record>> {
        if record_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let select = record_select()
            .and_where(Expr::col(RefugeRecords::Id).is_in(id_values(self.backend, record_ids)))
            .and_where(Expr::col(RefugeRecords::DeletedAt).is_null())
            .to_owned();
        let rows = query_all(conn, &select).await?;
        rows.iter()
            .map(|row| record_from_row(row).map(|record| (record.id, record)))
            .collect()
    }

    /// Adds one to the stored version and returns the new value.
    pub(crate) async fn bump_version<C: ConnectionTrait>(
        &self,
        conn: &C,
        record: &Record,
        actor: ActorId,
    ) -> RefugeResult<i64> {
        let update = Query::update()
            .table(RefugeRecords::Table)
            .value(RefugeRecords::Version, Expr::col(RefugeRecords::Version).add(1))
            .values([
                (RefugeRecords::UpdatedBy, actor.0.into()),
                (RefugeRecords::UpdatedAt, Timestamp::now().as_micros().into()),
            ])
            .and_where(Expr::col(RefugeRecords::Id).eq(id_value(self.backend, record.id)))
            .to_owned();
        exec(conn, &update).await?;
        Ok(record.version + 1)
    }

    fn check_cell_size(&self, field: &Field, count: usize) -> RefugeResult<()> {
        if count > 1 && !field.accepts_many() {
            return Err(RefugeError::validation(format!(
                "field '{}' holds a single value but {count} were given",
                field.key
            )));
        }
        if count > self.limits.max_links_per_cell {
            return Err(RefugeError::validation(format!(
                "field '{}' accepts at most {} values per record",
                field.key, self.limits.max_links_per_cell
            )));
        }
        Ok(())
    }

    /// Checks keys, types, formats and required fields of a full payload.
    fn validate_payload(&self, fields: &[Field], payload: &RecordPayload) -> RefugeResult<()> {
        let size = json_text(payload)?.len();
        if size > self.limits.max_payload_bytes {
            return Err(RefugeError::validation(format!(
                "payload is {size} bytes; the limit is {}",
                self.limits.max_payload_bytes
            )));
        }
        for (key, value) in payload {
            let Some(field) = fields.iter().find(|field| &field.key == key) else {
                self.validation_failure(format!("payload key '{key}' names no active field"))?;
                continue;
            };
            if !field.field_type.is_atomic() {
                return Err(RefugeError::validation(format!(
                    "field '{key}' is a {} field; its values are assigned separately",
                    field.field_type
                )));
            }
            if value.field_type() != field.field_type {
                return Err(RefugeError::validation(format!(
                    "field '{key}' expects {} but got {}",
                    field.field_type,
                    value.field_type()
                )));
            }
            value.validate_format()?;
        }
        for field in fields
            .iter()
            .filter(|field| field.required && field.field_type.is_atomic())
        {
            if is_blank(payload.get(&field.key)) {
                return Err(RefugeError::validation(format!(
                    "required field '{}' is missing",
                    field.key
                )));
            }
        }
        Ok(())
    }

    /// Rejects values of unique fields already held by another live record.
    async fn ensure_unique_values<C: ConnectionTrait>(
        &self,
        conn: &C,
        dataset_id: Id,
        fields: &[Field],
        payload: &RecordPayload,
        except: Option<Id>,
    ) -> RefugeResult<()> {
        let unique_fields: Vec<&Field> = fields
            .iter()
            .filter(|field| {
                field.unique && field.field_type.is_atomic() && payload.contains_key(&field.key)
            })
            .collect();
        if unique_fields.is_empty() {
            return Ok(());
        }
        for field in unique_fields {
            let value = payload.get(&field.key);
            let taken = self
                .live_records_with_key(conn, dataset_id, &field.key)
                .await?
                .iter()
                .filter(|record| Some(record.id) != except)
                .any(|record| record.payload.get(&field.key) == value);
            if taken {
                return Err(RefugeError::duplicate_key(format!(
                    "value of unique field '{}' is already used in dataset {dataset_id}",
                    field.key
                )));
            }
        }
        Ok(())
    }

    async fn validate_option_assignments<C: ConnectionTrait>(
        &self,
        conn: &C,
        fields: &[Field],
        assignments: &[OptionAssignment],
    ) -> RefugeResult<()> {
        let mut seen = HashSet::new();
        for assignment in assignments {
            ensure_single_assignment(&mut seen, assignment.field_id)?;
            let field = listed_field(fields, assignment.field_id)?;
            if !field.field_type.is_select() {
                return Err(RefugeError::validation(format!(
                    "field '{}' does not take options",
                    field.key
                )));
            }
            self.check_cell_size(field, distinct(&assignment.option_ids).len())?;
        }
        let field_ids: Vec<Id> = seen.into_iter().collect();
        let options = self.active_options(conn, &field_ids).await?;
        for assignment in assignments {
            for option_id in &assignment.option_ids {
                let known = options
                    .iter()
                    .any(|option| option.id == *option_id && option.field_id == assignment.field_id);
                if !known {
                    return Err(RefugeError::validation(format!(
                        "option {option_id} is not an active option of field {}",
                        assignment.field_id
                    )));
                }
            }
        }
        Ok(())
    }

    async fn validate_dynamic_links<C: ConnectionTrait>(
        &self,
        conn: &C,
        fields: &[Field],
        assignments: &[DynamicLinkAssignment],
    ) -> RefugeResult<()> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for assignment in assignments {
            ensure_single_assignment(&mut seen, assignment.field_id)?;
            let field = listed_field(fields, assignment.field_id)?;
            let Some(RelationTarget::Dynamic { dataset_id }) = field.relation_target else {
                return Err(RefugeError::validation(format!(
                    "field '{}' does not link to dataset records",
                    field.key
                )));
            };
            self.check_cell_size(field, distinct(&assignment.target_record_ids).len())?;
            for target in &assignment.target_record_ids {
                targets.push((*target, dataset_id));
            }
        }
        let ids: Vec<Id> = targets.iter().map(|(id, _)| *id).collect();
        let found = self.live_records_by_id(conn, &distinct(&ids)).await?;
        for (target_id, dataset_id) in targets {
            match found.get(&target_id) {
                Some(record) if record.dataset_id == dataset_id => {}
                Some(_) => {
                    return Err(RefugeError::validation(format!(
                        "record {target_id} does not belong to dataset {dataset_id}"
                    )));
                }
                None => return Err(RefugeError::not_found(format!("record {target_id}"))),
            }
        }
        Ok(())
    }

    fn validate_core_links(
        &self,
        fields: &[Field],
        assignments: &[CoreLinkAssignment],
    ) -> RefugeResult<()> {
        let mut seen = HashSet::new();
        for assignment in assignments {
            ensure_single_assignment(&mut seen, assignment.field_id)?;
            let field = listed_field(fields, assignment.field_id)?;
            let Some(RelationTarget::Core { core }) = field.relation_target else {
                return Err(RefugeError::validation(format!(
                    "field '{}' does not link to core entities",
                    field.key
                )));
            };
            self.check_cell_size(field, distinct(&assignment.targets).len())?;
            for target in &assignment.targets {
                ensure_core_kind(field, core, target)?;
            }
        }
        Ok(())
    }

    async fn write_option_values<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        assignments: &[OptionAssignment],
    ) -> RefugeResult<()> {
        for assignment in assignments {
            for option_id in &assignment.option_ids {
                self.insert_option_value(conn, record_id, assignment.field_id, *option_id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_dynamic_links<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        assignments: &[DynamicLinkAssignment],
    ) -> RefugeResult<()> {
        for assignment in assignments {
            for target in &assignment.target_record_ids {
                self.insert_dynamic_link(conn, record_id, assignment.field_id, *target)
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_core_links<C: ConnectionTrait>(
        &self,
        conn: &C,
        record_id: Id,
        assignments: &[CoreLinkAssignment],
    ) -> RefugeResult<()> {
        for assignment in assignments {
            for target in &assignment.targets {
                self.insert_core_link(conn, record_id, assignment.field_id, *target)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStoreApi for RefugeStore {
    async fn list_records(&self, input: ListRecordsInput) -> RefugeResult<Vec<Record>> {
        self.require_live_dataset(&self.conn, input.dataset_id)
            .await?;
        let limit = self.page_limit(input.limit);
        let mut select = record_select()
            .and_where(
                Expr::col(RefugeRecords::DatasetId).eq(id_value(self.backend, input.dataset_id)),
            )
            .and_where(Expr::col(RefugeRecords::DeletedAt).is_null())
            .order_by(RefugeRecords::CreatedAt, Order::Desc)
            .to_owned();
        match input.contains {
            None => {
                select.limit(limit).offset(input.offset);
                let rows = query_all(&self.conn, &select).await?;
                rows.iter().map(record_from_row).collect()
            }
            Some(subset) => {
                let rows = query_all(&self.conn, &select).await?;
                let mut records = Vec::new();
                for row in &rows {
                    let record = record_from_row(row)?;
                    if payload_contains(&record.payload, &subset) {
                        records.push(record);
                    }
                }
                Ok(records
                    .into_iter()
                    .skip(input.offset as usize)
                    .take(limit as usize)
                    .collect())
            }
        }
    }

    async fn get_record(&self, record_id: Id) -> RefugeResult<Record> {
        self.fetch_record(&self.conn, record_id)
            .await?
            .ok_or_else(|| RefugeError::not_found(format!("record {record_id}")))
    }

    async fn create_record(&self, input: CreateRecordInput) -> RefugeResult<Record> {
        let tx = self.conn.begin().await?;
        let dataset = self.require_live_dataset(&tx, input.dataset_id).await?;
        let fields = self.listed_fields(&tx, dataset.id).await?;
        self.validate_payload(&fields, &input.payload)?;
        self.ensure_unique_values(&tx, dataset.id, &fields, &input.payload, None)
            .await?;
        self.validate_option_assignments(&tx, &fields, &input.options)
            .await?;
        self.validate_dynamic_links(&tx, &fields, &input.dynamic_links)
            .await?;
        self.validate_core_links(&fields, &input.core_links)?;

        let now = Timestamp::now();
        let record = Record {
            id: Id::new(),
            dataset_id: dataset.id,
            activation_id: dataset.activation_id,
            version: RECORD_BASE_VERSION,
            payload: input.payload,
            created_by: input.actor,
            updated_by: None,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        };
        let insert = Query::insert()
            .into_table(RefugeRecords::Table)
            .columns([
                RefugeRecords::Id,
                RefugeRecords::DatasetId,
                RefugeRecords::ActivationId,
                RefugeRecords::Version,
                RefugeRecords::PayloadJson,
                RefugeRecords::CreatedBy,
                RefugeRecords::CreatedAt,
                RefugeRecords::UpdatedAt,
            ])
            .values_panic([
                id_value(self.backend, record.id).into(),
                id_value(self.backend, dataset.id).into(),
                id_value(self.backend, dataset.activation_id.0).into(),
                record.version.into(),
                json_text(&record.payload)?.into(),
                record.created_by.0.into(),
                now.as_micros().into(),
                now.as_micros().into(),
            ])
            .to_owned();
        exec(&tx, &insert).await?;
        self.maybe_failpoint("after_record_insert")?;
        self.write_option_values(&tx, record.id, &input.options)
            .await?;
        self.maybe_failpoint("after_option_values_insert")?;
        self.write_dynamic_links(&tx, record.id, &input.dynamic_links)
            .await?;
        self.write_core_links(&tx, record.id, &input.core_links)
            .await?;
        self.maybe_failpoint("after_relations_insert")?;
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id: Some(record.activation_id),
                actor: record.created_by,
                action: AuditAction::Create,
                entity_type: AuditEntityType::Record,
                entity_id: record.id,
                before: None,
                after: record_image(
                    &record,
                    Some(input.options.as_slice()),
                    Some(input.dynamic_links.as_slice()),
                    Some(input.core_links.as_slice()),
                )?,
            },
        )
        .await?;
        tx.commit().await?;
        log::debug!(
            "record created id={} dataset={} options={} dynamic_links={} core_links={}",
            record.id,
            record.dataset_id,
            input.options.len(),
            input.dynamic_links.len(),
            input.core_links.len()
        );
        Ok(record)
    }

    async fn update_record(&self, input: UpdateRecordInput) -> RefugeResult<Record> {
        let record_id = input.record_id;
        let tx = self.conn.begin().await?;
        let before = self.require_live_record(&tx, record_id).await?;
        if before.version != input.expected_version {
            log::warn!(
                "record update rejected id={record_id} expected={} actual={}",
                input.expected_version,
                before.version
            );
            return Err(RefugeError::version_conflict(
                input.expected_version,
                before.version,
            ));
        }
        let fields = self.listed_fields(&tx, before.dataset_id).await?;
        let patch = input.patch;
        if let Some(payload) = patch.payload.as_ref().into_option() {
            self.validate_payload(&fields, payload)?;
            self.ensure_unique_values(&tx, before.dataset_id, &fields, payload, Some(record_id))
                .await?;
        }
        if let Some(options) = patch.options.as_ref().into_option() {
            self.validate_option_assignments(&tx, &fields, options)
                .await?;
        }
        if let Some(dynamic_links) = patch.dynamic_links.as_ref().into_option() {
            self.validate_dynamic_links(&tx, &fields, dynamic_links)
                .await?;
        }
        if let Some(core_links) = patch.core_links.as_ref().into_option() {
            self.validate_core_links(&fields, core_links)?;
        }

        let now = Timestamp::now();
        let mut after = before.clone();
        patch.payload.clone().apply_to(&mut after.payload);
        after.version = before.version + 1;
        after.updated_by = Some(input.actor);
        after.updated_at = now;
        let update = Query::update()
            .table(RefugeRecords::Table)
            .values([
                (RefugeRecords::PayloadJson, json_text(&after.payload)?.into()),
                (RefugeRecords::Version, after.version.into()),
                (RefugeRecords::UpdatedBy, input.actor.0.into()),
                (RefugeRecords::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(Expr::col(RefugeRecords::Id).eq(id_value(self.backend, record_id)))
            .and_where(Expr::col(RefugeRecords::Version).eq(input.expected_version))
            .and_where(Expr::col(RefugeRecords::DeletedAt).is_null())
            .to_owned();
        if exec_count(&tx, &update).await? == 0 {
            let actual = self
                .fetch_record(&tx, record_id)
                .await?
                .map(|record| record.version)
                .unwrap_or(before.version);
            log::warn!(
                "record update lost race id={record_id} expected={} actual={actual}",
                input.expected_version
            );
            return Err(RefugeError::version_conflict(input.expected_version, actual));
        }
        self.maybe_failpoint("after_record_update")?;
        if let Some(options) = patch.options.as_ref().into_option() {
            self.clear_option_values(&tx, record_id).await?;
            self.write_option_values(&tx, record_id, options).await?;
        }
        if let Some(dynamic_links) = patch.dynamic_links.as_ref().into_option() {
            self.clear_dynamic_links(&tx, record_id).await?;
            self.write_dynamic_links(&tx, record_id, dynamic_links)
                .await?;
        }
        self.maybe_failpoint("after_links_replace")?;
        if let Some(core_links) = patch.core_links.as_ref().into_option() {
            self.clear_core_links(&tx, record_id).await?;
            self.write_core_links(&tx, record_id, core_links).await?;
        }
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id: Some(after.activation_id),
                actor: input.actor,
                action: AuditAction::Update,
                entity_type: AuditEntityType::Record,
                entity_id: record_id,
                before: audit_image(&before)?,
                after: record_image(
                    &after,
                    patch.options.as_ref().into_option().map(Vec::as_slice),
                    patch.dynamic_links.as_ref().into_option().map(Vec::as_slice),
                    patch.core_links.as_ref().into_option().map(Vec::as_slice),
                )?,
            },
        )
        .await?;
        tx.commit().await?;
        log::debug!("record updated id={record_id} version={}", after.version);
        Ok(after)
    }

    async fn delete_record(&self, record_id: Id, actor: ActorId) -> RefugeResult<bool> {
        let tx = self.conn.begin().await?;
        let Some(before) = self.fetch_record(&tx, record_id).await? else {
            return Ok(false);
        };
        let now = Timestamp::now();
        let update = Query::update()
            .table(RefugeRecords::Table)
            .values([
                (RefugeRecords::DeletedAt, now.as_micros().into()),
                (RefugeRecords::DeletedBy, actor.0.into()),
                (RefugeRecords::UpdatedBy, actor.0.into()),
                (RefugeRecords::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(Expr::col(RefugeRecords::Id).eq(id_value(self.backend, record_id)))
            .and_where(Expr::col(RefugeRecords::DeletedAt).is_null())
            .to_owned();
        if exec_count(&tx, &update).await? == 0 {
            return Ok(false);
        }
        let mut after = before.clone();
        after.lifecycle = Lifecycle::Deleted {
            at: now,
            by: Some(actor),
        };
        after.updated_by = Some(actor);
        after.updated_at = now;
        self.insert_audit(
            &tx,
            NewAuditEntry {
                activation_id: Some(before.activation_id),
                actor,
                action: AuditAction::Delete,
                entity_type: AuditEntityType::Record,
                entity_id: record_id,
                before: audit_image(&before)?,
                after: audit_image(&after)?,
            },
        )
        .await?;
        tx.commit().await?;
        log::debug!("record deleted id={record_id}");
        Ok(true)
    }
}
