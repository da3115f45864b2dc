use refuge_store::{
    ActivationId, ActorId, AuditEntityType, AuditFilter, AuditLogApi, CreateDatasetInput,
    CreateFromTemplateInput, DatasetPatch, DatasetRegistryApi, DatasetTemplate, FieldCatalogApi,
    FieldType, Id, LocationId, OptionCatalogApi, Patch, RefugeConfig, RefugeError, RefugeResult,
    RefugeStore, TemplateField, TemplateOption,
};
use serde_json::json;
use tempfile::tempdir;

fn dataset_input(activation_id: ActivationId, key: &str) -> CreateDatasetInput {
    CreateDatasetInput {
        activation_id,
        location_id: LocationId(Id::new()),
        actor: ActorId(7),
        name: "Shelter Roll".to_string(),
        key: key.to_string(),
        config: None,
        schema_snapshot: None,
    }
}

#[tokio::test]
async fn dataset_keys_are_unique_per_activation() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = RefugeConfig::default_sqlite(base.join("datasets.sqlite").to_string_lossy());
    let store = RefugeStore::connect(&config, base).await?;
    let activation = ActivationId(Id::new());

    let first = store
        .create_dataset(dataset_input(activation, "shelter_roll"))
        .await?;
    assert_eq!(first.key, "shelter_roll");
    assert!(first.lifecycle.is_active());

    let err = store
        .create_dataset(dataset_input(activation, "shelter_roll"))
        .await
        .expect_err("duplicate key");
    assert_eq!(err.code(), "DUPLICATE_KEY");

    let other_activation = ActivationId(Id::new());
    store
        .create_dataset(dataset_input(other_activation, "shelter_roll"))
        .await?;

    let err = store
        .create_dataset(dataset_input(activation, "bad key!"))
        .await
        .expect_err("invalid key");
    assert!(matches!(err, RefugeError::Validation { .. }));
    Ok(())
}

#[tokio::test]
async fn list_is_newest_first_and_skips_tombstones() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = RefugeConfig::default_sqlite(base.join("datasets.sqlite").to_string_lossy());
    let store = RefugeStore::connect(&config, base).await?;
    let activation = ActivationId(Id::new());

    let older = store.create_dataset(dataset_input(activation, "older")).await?;
    let newer = store.create_dataset(dataset_input(activation, "newer")).await?;
    let listed = store.list_datasets(activation).await?;
    let ids: Vec<Id> = listed.iter().map(|dataset| dataset.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);

    assert!(store.delete_dataset(older.id, ActorId(7)).await?);
    assert!(!store.delete_dataset(older.id, ActorId(7)).await?);
    assert!(!store.delete_dataset(Id::new(), ActorId(7)).await?);

    let listed = store.list_datasets(activation).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, newer.id);

    let tombstoned = store.get_dataset(older.id).await?;
    assert!(tombstoned.lifecycle.is_deleted());

    let err = store.get_dataset(Id::new()).await.expect_err("missing");
    assert_eq!(err.code(), "NOT_FOUND");
    Ok(())
}

#[tokio::test]
async fn update_patches_attributes_and_restores() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = RefugeConfig::default_sqlite(base.join("datasets.sqlite").to_string_lossy());
    let store = RefugeStore::connect(&config, base).await?;
    let activation = ActivationId(Id::new());
    let dataset = store.create_dataset(dataset_input(activation, "roll")).await?;

    let unchanged = store
        .update_dataset(dataset.id, ActorId(8), DatasetPatch::default())
        .await?;
    assert_eq!(unchanged, dataset);

    let config_map = json!({"color": "teal"})
        .as_object()
        .cloned()
        .expect("object");
    let renamed = store
        .update_dataset(
            dataset.id,
            ActorId(8),
            DatasetPatch {
                name: Patch::Set("Evening Roll".to_string()),
                config: Patch::Set(config_map.clone()),
                ..DatasetPatch::default()
            },
        )
        .await?;
    assert_eq!(renamed.name, "Evening Roll");
    assert_eq!(renamed.config, config_map);
    assert_eq!(renamed.key, "roll");
    assert_eq!(renamed.updated_by, Some(ActorId(8)));
    assert!(renamed.updated_at > dataset.updated_at);

    let deleted = store
        .update_dataset(
            dataset.id,
            ActorId(8),
            DatasetPatch {
                deleted: Patch::Set(true),
                ..DatasetPatch::default()
            },
        )
        .await?;
    assert!(deleted.lifecycle.is_deleted());
    assert!(store.list_datasets(activation).await?.is_empty());

    let restored = store
        .update_dataset(
            dataset.id,
            ActorId(8),
            DatasetPatch {
                deleted: Patch::Set(false),
                ..DatasetPatch::default()
            },
        )
        .await?;
    assert!(restored.lifecycle.is_active());
    assert_eq!(store.list_datasets(activation).await?.len(), 1);

    let entries = store
        .list_audit(AuditFilter {
            entity_type: Some(AuditEntityType::Dataset),
            entity_id: Some(dataset.id),
            ..AuditFilter::default()
        })
        .await?;
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|entry| entry.activation_id == Some(activation)));
    Ok(())
}

#[tokio::test]
async fn templates_create_fields_and_options_together() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let base = dir.path();
    let config = RefugeConfig::default_sqlite(base.join("datasets.sqlite").to_string_lossy());
    let store = RefugeStore::connect(&config, base).await?;
    let activation = ActivationId(Id::new());
    let template = DatasetTemplate {
        name: "Shelter Roll".to_string(),
        key: "shelter_roll".to_string(),
        config: None,
        fields: vec![
            TemplateField {
                name: "Name".to_string(),
                key: "name".to_string(),
                field_type: FieldType::Text,
                required: true,
                unique: false,
                multiple: false,
                config: None,
                relation_target: None,
                options: Vec::new(),
            },
            TemplateField {
                name: "Status".to_string(),
                key: "status".to_string(),
                field_type: FieldType::Select,
                required: false,
                unique: false,
                multiple: false,
                config: None,
                relation_target: None,
                options: vec![
                    TemplateOption {
                        label: "Active".to_string(),
                        value: None,
                        color: Some("green".to_string()),
                    },
                    TemplateOption {
                        label: "Departed".to_string(),
                        value: None,
                        color: None,
                    },
                ],
            },
        ],
    };

    let dataset = store
        .create_dataset_from_template(CreateFromTemplateInput {
            activation_id: activation,
            location_id: LocationId(Id::new()),
            actor: ActorId(1),
            template: template.clone(),
        })
        .await?;
    assert_eq!(
        dataset.schema_snapshot,
        Some(serde_json::to_value(&template).expect("encode"))
    );

    let fields = store.list_fields(dataset.id).await?;
    let keys: Vec<&str> = fields.iter().map(|field| field.key.as_str()).collect();
    assert_eq!(keys, vec!["name", "status"]);
    assert_eq!(fields[0].position, 1);
    assert_eq!(fields[1].position, 2);

    let options = store.list_options(fields[1].id).await?;
    let values: Vec<&str> = options.iter().map(|option| option.value.as_str()).collect();
    assert_eq!(values, vec!["active", "departed"]);
    assert_eq!(options[0].color.as_deref(), Some("green"));

    let mut broken = template;
    broken.key = "broken".to_string();
    broken.fields[0].options.push(TemplateOption {
        label: "Nope".to_string(),
        value: None,
        color: None,
    });
    let err = store
        .create_dataset_from_template(CreateFromTemplateInput {
            activation_id: activation,
            location_id: LocationId(Id::new()),
            actor: ActorId(1),
            template: broken,
        })
        .await
        .expect_err("options on text field");
    assert_eq!(err.code(), "VALIDATION");
    assert_eq!(store.list_datasets(activation).await?.len(), 1);
    Ok(())
}
