use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

use crate::db::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(RefugeDatasets::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeDatasets::Id, false))
                    .col(id_col(backend, RefugeDatasets::ActivationId, false))
                    .col(id_col(backend, RefugeDatasets::LocationId, false))
                    .col(ColumnDef::new(RefugeDatasets::Name).string().not_null())
                    .col(ColumnDef::new(RefugeDatasets::Key).string_len(64).not_null())
                    .col(ColumnDef::new(RefugeDatasets::ConfigJson).text().not_null())
                    .col(ColumnDef::new(RefugeDatasets::SchemaSnapshotJson).text())
                    .col(
                        ColumnDef::new(RefugeDatasets::CreatedBy)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RefugeDatasets::UpdatedBy).big_integer())
                    .col(
                        ColumnDef::new(RefugeDatasets::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefugeDatasets::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RefugeDatasets::DeletedAt).big_integer())
                    .col(ColumnDef::new(RefugeDatasets::DeletedBy).big_integer())
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_datasets")
                            .col(RefugeDatasets::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeFields::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeFields::Id, false))
                    .col(id_col(backend, RefugeFields::DatasetId, false))
                    .col(ColumnDef::new(RefugeFields::Name).string().not_null())
                    .col(ColumnDef::new(RefugeFields::Key).string_len(64).not_null())
                    .col(ColumnDef::new(RefugeFields::FieldType).string_len(16).not_null())
                    .col(ColumnDef::new(RefugeFields::IsRequired).boolean().not_null())
                    .col(ColumnDef::new(RefugeFields::IsUnique).boolean().not_null())
                    .col(ColumnDef::new(RefugeFields::ConfigJson).text().not_null())
                    .col(ColumnDef::new(RefugeFields::Position).integer().not_null())
                    .col(ColumnDef::new(RefugeFields::IsActive).boolean().not_null())
                    .col(ColumnDef::new(RefugeFields::IsMultiple).boolean().not_null())
                    .col(ColumnDef::new(RefugeFields::TargetKind).string_len(16))
                    .col(id_col(backend, RefugeFields::TargetDatasetId, true))
                    .col(ColumnDef::new(RefugeFields::TargetCore).string_len(32))
                    .col(ColumnDef::new(RefugeFields::CreatedBy).big_integer().not_null())
                    .col(ColumnDef::new(RefugeFields::UpdatedBy).big_integer())
                    .col(ColumnDef::new(RefugeFields::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(RefugeFields::UpdatedAt).big_integer().not_null())
                    .col(ColumnDef::new(RefugeFields::DeletedAt).big_integer())
                    .col(ColumnDef::new(RefugeFields::DeletedBy).big_integer())
                    .primary_key(Index::create().name("pk_refuge_fields").col(RefugeFields::Id))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeFieldOptions::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeFieldOptions::Id, false))
                    .col(id_col(backend, RefugeFieldOptions::FieldId, false))
                    .col(ColumnDef::new(RefugeFieldOptions::Label).string().not_null())
                    .col(ColumnDef::new(RefugeFieldOptions::Value).string().not_null())
                    .col(ColumnDef::new(RefugeFieldOptions::Color).string_len(32))
                    .col(
                        ColumnDef::new(RefugeFieldOptions::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefugeFieldOptions::IsActive)
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefugeFieldOptions::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RefugeFieldOptions::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_field_options")
                            .col(RefugeFieldOptions::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeRecords::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeRecords::Id, false))
                    .col(id_col(backend, RefugeRecords::DatasetId, false))
                    .col(id_col(backend, RefugeRecords::ActivationId, false))
                    .col(ColumnDef::new(RefugeRecords::Version).big_integer().not_null())
                    .col(ColumnDef::new(RefugeRecords::PayloadJson).text().not_null())
                    .col(ColumnDef::new(RefugeRecords::CreatedBy).big_integer().not_null())
                    .col(ColumnDef::new(RefugeRecords::UpdatedBy).big_integer())
                    .col(ColumnDef::new(RefugeRecords::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(RefugeRecords::UpdatedAt).big_integer().not_null())
                    .col(ColumnDef::new(RefugeRecords::DeletedAt).big_integer())
                    .col(ColumnDef::new(RefugeRecords::DeletedBy).big_integer())
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_records")
                            .col(RefugeRecords::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeRecordOptionValues::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeRecordOptionValues::RecordId, false))
                    .col(id_col(backend, RefugeRecordOptionValues::FieldId, false))
                    .col(id_col(backend, RefugeRecordOptionValues::OptionId, false))
                    .col(
                        ColumnDef::new(RefugeRecordOptionValues::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_record_option_values")
                            .col(RefugeRecordOptionValues::RecordId)
                            .col(RefugeRecordOptionValues::FieldId)
                            .col(RefugeRecordOptionValues::OptionId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeRecordRelations::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeRecordRelations::RecordId, false))
                    .col(id_col(backend, RefugeRecordRelations::FieldId, false))
                    .col(id_col(backend, RefugeRecordRelations::TargetRecordId, false))
                    .col(
                        ColumnDef::new(RefugeRecordRelations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_record_relations")
                            .col(RefugeRecordRelations::RecordId)
                            .col(RefugeRecordRelations::FieldId)
                            .col(RefugeRecordRelations::TargetRecordId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeRecordCoreRelations::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeRecordCoreRelations::RecordId, false))
                    .col(id_col(backend, RefugeRecordCoreRelations::FieldId, false))
                    .col(
                        ColumnDef::new(RefugeRecordCoreRelations::TargetCore)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(id_col(backend, RefugeRecordCoreRelations::TargetId, false))
                    .col(
                        ColumnDef::new(RefugeRecordCoreRelations::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_record_core_relations")
                            .col(RefugeRecordCoreRelations::RecordId)
                            .col(RefugeRecordCoreRelations::FieldId)
                            .col(RefugeRecordCoreRelations::TargetCore)
                            .col(RefugeRecordCoreRelations::TargetId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RefugeAuditLog::Table)
                    .if_not_exists()
                    .col(id_col(backend, RefugeAuditLog::Id, false))
                    .col(id_col(backend, RefugeAuditLog::ActivationId, true))
                    .col(ColumnDef::new(RefugeAuditLog::ActorId).big_integer().not_null())
                    .col(ColumnDef::new(RefugeAuditLog::Action).string_len(32).not_null())
                    .col(
                        ColumnDef::new(RefugeAuditLog::EntityType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(id_col(backend, RefugeAuditLog::EntityId, false))
                    .col(ColumnDef::new(RefugeAuditLog::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(RefugeAuditLog::BeforeJson).text())
                    .col(ColumnDef::new(RefugeAuditLog::AfterJson).text())
                    .primary_key(
                        Index::create()
                            .name("pk_refuge_audit_log")
                            .col(RefugeAuditLog::Id),
                    )
                    .to_owned(),
            )
            .await?;

        create_indexes(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RefugeAuditLog::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeRecordCoreRelations::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeRecordRelations::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeRecordOptionValues::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeRecords::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeFieldOptions::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeFields::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RefugeDatasets::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

async fn create_indexes(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    manager
        .create_index(
            Index::create()
                .name("refuge_datasets_key_idx")
                .table(RefugeDatasets::Table)
                .col(RefugeDatasets::ActivationId)
                .col(RefugeDatasets::Key)
                .unique()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_datasets_activation_idx")
                .table(RefugeDatasets::Table)
                .col(RefugeDatasets::ActivationId)
                .col(RefugeDatasets::CreatedAt)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_fields_key_idx")
                .table(RefugeFields::Table)
                .col(RefugeFields::DatasetId)
                .col(RefugeFields::Key)
                .unique()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_fields_position_idx")
                .table(RefugeFields::Table)
                .col(RefugeFields::DatasetId)
                .col(RefugeFields::Position)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_field_options_field_idx")
                .table(RefugeFieldOptions::Table)
                .col(RefugeFieldOptions::FieldId)
                .col(RefugeFieldOptions::Position)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_records_dataset_idx")
                .table(RefugeRecords::Table)
                .col(RefugeRecords::DatasetId)
                .col(RefugeRecords::CreatedAt)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_record_option_values_field_idx")
                .table(RefugeRecordOptionValues::Table)
                .col(RefugeRecordOptionValues::FieldId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_record_relations_field_idx")
                .table(RefugeRecordRelations::Table)
                .col(RefugeRecordRelations::FieldId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_record_core_relations_field_idx")
                .table(RefugeRecordCoreRelations::Table)
                .col(RefugeRecordCoreRelations::FieldId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_audit_log_entity_idx")
                .table(RefugeAuditLog::Table)
                .col(RefugeAuditLog::EntityType)
                .col(RefugeAuditLog::EntityId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("refuge_audit_log_activation_idx")
                .table(RefugeAuditLog::Table)
                .col(RefugeAuditLog::ActivationId)
                .col(RefugeAuditLog::CreatedAt)
                .to_owned(),
        )
        .await?;
    Ok(())
}

fn id_col(backend: DatabaseBackend, col: impl Iden, nullable: bool) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Postgres => {
            col_def.uuid();
        }
        DatabaseBackend::MySql => {
            col_def.binary_len(16);
        }
        DatabaseBackend::Sqlite => {
            col_def.string_len(36);
        }
        _ => {
            col_def.string_len(36);
        }
    }
    if nullable {
        col_def.null();
    } else {
        col_def.not_null();
    }
    col_def.to_owned()
}
