use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum RefugeDatasets {
    Table,
    Id,
    ActivationId,
    LocationId,
    Name,
    Key,
    ConfigJson,
    SchemaSnapshotJson,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    DeletedBy,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeFields {
    Table,
    Id,
    DatasetId,
    Name,
    Key,
    FieldType,
    IsRequired,
    IsUnique,
    ConfigJson,
    Position,
    IsActive,
    IsMultiple,
    TargetKind,
    TargetDatasetId,
    TargetCore,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    DeletedBy,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeFieldOptions {
    Table,
    Id,
    FieldId,
    Label,
    Value,
    Color,
    Position,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeRecords {
    Table,
    Id,
    DatasetId,
    ActivationId,
    Version,
    PayloadJson,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
    DeletedBy,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeRecordOptionValues {
    Table,
    RecordId,
    FieldId,
    OptionId,
    CreatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeRecordRelations {
    Table,
    RecordId,
    FieldId,
    TargetRecordId,
    CreatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeRecordCoreRelations {
    Table,
    RecordId,
    FieldId,
    TargetCore,
    TargetId,
    CreatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum RefugeAuditLog {
    Table,
    Id,
    ActivationId,
    ActorId,
    Action,
    EntityType,
    EntityId,
    CreatedAt,
    BeforeJson,
    AfterJson,
}
