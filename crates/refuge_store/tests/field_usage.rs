use std::path::Path;

use refuge_store::{
    ActivationId, ActorId, CellValue, CoreKind, CoreLinkAssignment, CoreTarget,
    CreateDatasetInput, CreateFieldInput, CreateOptionInput, CreateRecordInput, Dataset,
    DatasetRegistryApi, DynamicLinkAssignment, Field, FieldCatalogApi, FieldDeleteOutcome,
    FieldLifecycleApi, FieldPatch, FieldType, FieldUsage, FieldValue, Id, LocationId,
    OptionAssignment, OptionCatalogApi, Patch, RECORD_BASE_VERSION, RecordStoreApi, RefugeConfig,
    RefugeResult, RefugeStore, RelationTarget, SnapshotApi,
};
use tempfile::tempdir;

const ACTOR: ActorId = ActorId(31);

async fn open(base: &Path) -> RefugeResult<(RefugeStore, Dataset)> {
    let config = RefugeConfig::default_sqlite(base.join("usage.sqlite").to_string_lossy());
    let store = RefugeStore::connect(&config, base).await?;
    let dataset = create_dataset(&store, "Shelter Roll", "shelter_roll").await?;
    Ok((store, dataset))
}

async fn create_dataset(store: &RefugeStore, name: &str, key: &str) -> RefugeResult<Dataset> {
    store
        .create_dataset(CreateDatasetInput {
            activation_id: ActivationId(Id::new()),
            location_id: LocationId(Id::new()),
            actor: ACTOR,
            name: name.to_string(),
            key: key.to_string(),
            config: None,
            schema_snapshot: None,
        })
        .await
}

fn field_input(dataset_id: Id, key: &str, field_type: FieldType) -> CreateFieldInput {
    CreateFieldInput {
        dataset_id,
        actor: ACTOR,
        name: key.to_string(),
        key: key.to_string(),
        field_type,
        required: false,
        unique: false,
        multiple: false,
        config: None,
        position: None,
        relation_target: None,
    }
}

fn empty_record(dataset_id: Id) -> CreateRecordInput {
    CreateRecordInput {
        dataset_id,
        actor: ACTOR,
        payload: Default::default(),
        options: Vec::new(),
        dynamic_links: Vec::new(),
        core_links: Vec::new(),
    }
}

/// Walks a populated field through count, refused delete, confirmed delete.
async fn assert_guarded_delete(
    store: &RefugeStore,
    field: &Field,
    usage: FieldUsage,
) -> RefugeResult<()> {
    assert_eq!(store.field_usage(field.id).await?, usage);

    let outcome = store.delete_field(field.id, ACTOR, false).await?;
    assert_eq!(outcome, FieldDeleteOutcome::NeedsConfirmation { usage });
    let listed = store.list_fields(field.dataset_id).await?;
    assert!(listed.iter().any(|listed| listed.id == field.id));
    assert!(store.get_field(field.id).await?.lifecycle.is_active());

    let outcome = store.delete_field(field.id, ACTOR, true).await?;
    assert_eq!(outcome, FieldDeleteOutcome::Deleted);
    let listed = store.list_fields(field.dataset_id).await?;
    assert!(listed.iter().all(|listed| listed.id != field.id));
    assert!(store.get_field(field.id).await?.lifecycle.is_deleted());
    Ok(())
}

#[tokio::test]
async fn payload_values_need_confirmation() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open(dir.path()).await?;
    let note = store
        .create_field(field_input(dataset.id, "note", FieldType::Text))
        .await?;
    assert_eq!(store.field_usage(note.id).await?, FieldUsage::default());

    for text in ["first", "second"] {
        store
            .create_record(CreateRecordInput {
                payload: [(note.key.clone(), FieldValue::Text(text.to_string()))]
                    .into_iter()
                    .collect(),
                ..empty_record(dataset.id)
            })
            .await?;
    }
    store.create_record(empty_record(dataset.id)).await?;
    let gone = store
        .create_record(CreateRecordInput {
            payload: [(note.key.clone(), FieldValue::Text("gone".to_string()))]
                .into_iter()
                .collect(),
            ..empty_record(dataset.id)
        })
        .await?;
    store.delete_record(gone.id, ACTOR).await?;

    assert_guarded_delete(
        &store,
        &note,
        FieldUsage {
            payload_values: 2,
            ..FieldUsage::default()
        },
    )
    .await
}

#[tokio::test]
async fn option_values_need_confirmation() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open(dir.path()).await?;
    let needs = store
        .create_field(field_input(dataset.id, "needs", FieldType::MultiSelect))
        .await?;
    let mut option_ids = Vec::new();
    for label in ["Food", "Water"] {
        let option = store
            .create_option(CreateOptionInput {
                field_id: needs.id,
                actor: ACTOR,
                label: label.to_string(),
                value: None,
                color: None,
                position: None,
            })
            .await?;
        option_ids.push(option.id);
    }
    store
        .create_record(CreateRecordInput {
            options: vec![OptionAssignment {
                field_id: needs.id,
                option_ids: option_ids.clone(),
            }],
            ..empty_record(dataset.id)
        })
        .await?;

    assert_guarded_delete(
        &store,
        &needs,
        FieldUsage {
            option_values: 2,
            ..FieldUsage::default()
        },
    )
    .await
}

#[tokio::test]
async fn dynamic_links_need_confirmation() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open(dir.path()).await?;
    let families = create_dataset(&store, "Families", "families").await?;
    let family = store.create_record(empty_record(families.id)).await?;
    let household = store
        .create_field(CreateFieldInput {
            relation_target: Some(RelationTarget::Dynamic {
                dataset_id: families.id,
            }),
            ..field_input(dataset.id, "household", FieldType::Relation)
        })
        .await?;
    store
        .create_record(CreateRecordInput {
            dynamic_links: vec![DynamicLinkAssignment {
                field_id: household.id,
                target_record_ids: vec![family.id],
            }],
            ..empty_record(dataset.id)
        })
        .await?;

    assert_guarded_delete(
        &store,
        &household,
        FieldUsage {
            dynamic_relations: 1,
            ..FieldUsage::default()
        },
    )
    .await
}

#[tokio::test]
async fn core_links_need_confirmation() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open(dir.path()).await?;
    let caseworker = store
        .create_field(CreateFieldInput {
            relation_target: Some(RelationTarget::Core {
                core: CoreKind::Person,
            }),
            ..field_input(dataset.id, "caseworker", FieldType::Relation)
        })
        .await?;
    store
        .create_record(CreateRecordInput {
            core_links: vec![CoreLinkAssignment {
                field_id: caseworker.id,
                targets: vec![CoreTarget {
                    target_core: CoreKind::Person,
                    target_id: Id::new(),
                }],
            }],
            ..empty_record(dataset.id)
        })
        .await?;

    assert_guarded_delete(
        &store,
        &caseworker,
        FieldUsage {
            core_relations: 1,
            ..FieldUsage::default()
        },
    )
    .await
}

#[tokio::test]
async fn renaming_a_key_carries_payload_values() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open(dir.path()).await?;
    let name = store
        .create_field(field_input(dataset.id, "name", FieldType::Text))
        .await?;
    let record = store
        .create_record(CreateRecordInput {
            payload: [(name.key.clone(), FieldValue::Text("Ana".to_string()))]
                .into_iter()
                .collect(),
            ..empty_record(dataset.id)
        })
        .await?;
    assert_eq!(record.version, RECORD_BASE_VERSION);

    let renamed = store
        .update_field(
            name.id,
            ACTOR,
            FieldPatch {
                key: Patch::Set("full_name".to_string()),
                ..FieldPatch::default()
            },
        )
        .await?;
    assert_eq!(renamed.key, "full_name");

    let stored = store.get_record(record.id).await?;
    assert_eq!(
        stored.payload.get("full_name"),
        Some(&FieldValue::Text("Ana".to_string()))
    );
    assert!(!stored.payload.contains_key("name"));
    assert_eq!(stored.version, record.version + 1);

    let snapshot = store.dataset_snapshot(dataset.id).await?;
    assert_eq!(snapshot.field_keys, vec!["full_name"]);
    assert_eq!(
        snapshot.rows_matrix[0][0],
        CellValue::Atomic(FieldValue::Text("Ana".to_string()))
    );

    assert_guarded_delete(
        &store,
        &renamed,
        FieldUsage {
            payload_values: 1,
            ..FieldUsage::default()
        },
    )
    .await
}
