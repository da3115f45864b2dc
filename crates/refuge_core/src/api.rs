use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    ActivationId, ActorId, AuditEntry, AuditFilter, CoreLinkAssignment, CoreTarget, Dataset,
    DatasetPatch, DatasetSnapshot, DynamicLinkAssignment, Field, FieldDeleteOutcome, FieldOption,
    FieldPatch, FieldType, FieldUsage, Id, JsonMap, LocationId, NewAuditEntry, OptionAssignment,
    OptionPatch, Record, RecordLinks, RecordPatch, RecordPayload, RefugeResult, RelationTarget,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateDatasetInput {
    pub activation_id: ActivationId,
    pub location_id: LocationId,
    pub actor: ActorId,
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub config: Option<JsonMap>,
    #[serde(default)]
    pub schema_snapshot: Option<JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateOption {
    pub label: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub key: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub config: Option<JsonMap>,
    #[serde(default)]
    pub relation_target: Option<RelationTarget>,
    #[serde(default)]
    pub options: Vec<TemplateOption>,
}

/// Reusable dataset definition; stored verbatim as the schema snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetTemplate {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub config: Option<JsonMap>,
    pub fields: Vec<TemplateField>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateFromTemplateInput {
    pub activation_id: ActivationId,
    pub location_id: LocationId,
    pub actor: ActorId,
    pub template: DatasetTemplate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateFieldInput {
    pub dataset_id: Id,
    pub actor: ActorId,
    pub name: String,
    pub key: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub config: Option<JsonMap>,
    /// 1-based slot; `None` appends after the last active field.
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub relation_target: Option<RelationTarget>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateOptionInput {
    pub field_id: Id,
    pub actor: ActorId,
    pub label: String,
    /// Defaults to the label; always stored normalized.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListRecordsInput {
    pub dataset_id: Id,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Only records whose payload is a superset of this one.
    #[serde(default)]
    pub contains: Option<RecordPayload>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRecordInput {
    pub dataset_id: Id,
    pub actor: ActorId,
    #[serde(default)]
    pub payload: RecordPayload,
    #[serde(default)]
    pub options: Vec<OptionAssignment>,
    #[serde(default)]
    pub dynamic_links: Vec<DynamicLinkAssignment>,
    #[serde(default)]
    pub core_links: Vec<CoreLinkAssignment>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecordInput {
    pub record_id: Id,
    pub actor: ActorId,
    /// Version the caller last observed.
    pub expected_version: i64,
    #[serde(default)]
    pub patch: RecordPatch,
}

#[async_trait]
pub trait DatasetRegistryApi {
    async fn list_datasets(&self, activation_id: ActivationId) -> RefugeResult<Vec<Dataset>>;
    async fn get_dataset(&self, dataset_id: Id) -> RefugeResult<Dataset>;
    async fn create_dataset(&self, input: CreateDatasetInput) -> RefugeResult<Dataset>;
    async fn create_dataset_from_template(
        &self,
        input: CreateFromTemplateInput,
    ) -> RefugeResult<Dataset>;
    async fn update_dataset(
        &self,
        dataset_id: Id,
        actor: ActorId,
        patch: DatasetPatch,
    ) -> RefugeResult<Dataset>;
    /// Returns whether this call tombstoned the dataset.
    async fn delete_dataset(&self, dataset_id: Id, actor: ActorId) -> RefugeResult<bool>;
}

#[async_trait]
pub trait FieldCatalogApi {
    async fn list_fields(&self, dataset_id: Id) -> RefugeResult<Vec<Field>>;
    async fn get_field(&self, field_id: Id) -> RefugeResult<Field>;
    async fn create_field(&self, input: CreateFieldInput) -> RefugeResult<Field>;
    async fn update_field(
        &self,
        field_id: Id,
        actor: ActorId,
        patch: FieldPatch,
    ) -> RefugeResult<Field>;
}

#[async_trait]
pub trait FieldLifecycleApi {
    /// Moves a field to `position`, clamped into the active range.
    async fn reposition_field(
        &self,
        field_id: Id,
        actor: ActorId,
        position: i32,
    ) -> RefugeResult<Field>;
    async fn field_usage(&self, field_id: Id) -> RefugeResult<FieldUsage>;
    async fn delete_field(
        &self,
        field_id: Id,
        actor: ActorId,
        confirm: bool,
    ) -> RefugeResult<FieldDeleteOutcome>;
}

#[async_trait]
pub trait OptionCatalogApi {
    async fn list_options(&self, field_id: Id) -> RefugeResult<Vec<FieldOption>>;
    async fn get_option(&self, option_id: Id) -> RefugeResult<FieldOption>;
    async fn create_option(&self, input: CreateOptionInput) -> RefugeResult<FieldOption>;
    async fn update_option(
        &self,
        option_id: Id,
        actor: ActorId,
        patch: OptionPatch,
    ) -> RefugeResult<FieldOption>;
    /// `None` when the option was already inactive.
    async fn deactivate_option(
        &self,
        option_id: Id,
        actor: ActorId,
    ) -> RefugeResult<Option<FieldOption>>;
}

#[async_trait]
pub trait RecordStoreApi {
    async fn list_records(&self, input: ListRecordsInput) -> RefugeResult<Vec<Record>>;
    async fn get_record(&self, record_id: Id) -> RefugeResult<Record>;
    async fn create_record(&self, input: CreateRecordInput) -> RefugeResult<Record>;
    /// Fails with `VersionConflict` and writes nothing when the stored
    /// version differs from `expected_version`.
    async fn update_record(&self, input: UpdateRecordInput) -> RefugeResult<Record>;
    async fn delete_record(&self, record_id: Id, actor: ActorId) -> RefugeResult<bool>;
}

#[async_trait]
pub trait RelationResolverApi {
    /// Returns whether a new link was written; duplicates are ignored.
    async fn link_record(
        &self,
        record_id: Id,
        field_id: Id,
        target_record_id: Id,
        actor: ActorId,
    ) -> RefugeResult<bool>;
    async fn link_core(
        &self,
        record_id: Id,
        field_id: Id,
        target: CoreTarget,
        actor: ActorId,
    ) -> RefugeResult<bool>;
    async fn fetch_links(&self, record_ids: &[Id]) -> RefugeResult<RecordLinks>;
}

#[async_trait]
pub trait SnapshotApi {
    async fn dataset_snapshot(&self, dataset_id: Id) -> RefugeResult<DatasetSnapshot>;
}

#[async_trait]
pub trait AuditLogApi {
    async fn append_audit(&self, entry: NewAuditEntry) -> RefugeResult<AuditEntry>;
    async fn list_audit(&self, filter: AuditFilter) -> RefugeResult<Vec<AuditEntry>>;
    /// Entries on the dataset and on everything it owns, newest first.
    async fn list_dataset_audit(
        &self,
        dataset_id: Id,
        limit: Option<u64>,
    ) -> RefugeResult<Vec<AuditEntry>>;
}
