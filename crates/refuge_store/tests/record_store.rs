use std::path::Path;

use refuge_store::{
    ActivationId, ActorId, AuditEntityType, AuditFilter, AuditLogApi, CoreKind, CoreLinkAssignment,
    CoreTarget, CreateDatasetInput, CreateFieldInput, CreateOptionInput, CreateRecordInput,
    Dataset, DatasetRegistryApi, DynamicLinkAssignment, Field, FieldCatalogApi, FieldOption,
    FieldType, FieldValue, Id, ListRecordsInput, LocationId, OptionAssignment, OptionCatalogApi,
    Patch, RECORD_BASE_VERSION, RecordPatch, RecordPayload, RecordStoreApi, RefugeConfig,
    RefugeError, RefugeResult, RefugeStore, RelationResolverApi, RelationTarget,
    UpdateRecordInput, ValidationMode,
};
use tempfile::tempdir;

const ACTOR: ActorId = ActorId(11);

struct Roll {
    dataset: Dataset,
    name: Field,
    tag: Field,
    status: Field,
    needs: Field,
    guardian: Field,
    people: Field,
    active: FieldOption,
    departed: FieldOption,
    food: FieldOption,
    water: FieldOption,
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

fn option_input(field_id: Id, label: &str) -> CreateOptionInput {
    CreateOptionInput {
        field_id,
        actor: ACTOR,
        label: label.to_string(),
        value: None,
        color: None,
        position: None,
    }
}

async fn open(base: &Path, config: RefugeConfig) -> RefugeResult<(RefugeStore, Roll)> {
    let store = RefugeStore::connect(&config, base).await?;
    let dataset = store
        .create_dataset(CreateDatasetInput {
            activation_id: ActivationId(Id::new()),
            location_id: LocationId(Id::new()),
            actor: ACTOR,
            name: "Shelter Roll".to_string(),
            key: "shelter_roll".to_string(),
            config: None,
            schema_snapshot: None,
        })
        .await?;
    let name = store
        .create_field(CreateFieldInput {
            required: true,
            ..field_input(dataset.id, "name", FieldType::Text)
        })
        .await?;
    let tag = store
        .create_field(CreateFieldInput {
            unique: true,
            ..field_input(dataset.id, "tag", FieldType::Number)
        })
        .await?;
    let status = store
        .create_field(field_input(dataset.id, "status", FieldType::Select))
        .await?;
    let needs = store
        .create_field(field_input(dataset.id, "needs", FieldType::MultiSelect))
        .await?;
    let guardian = store
        .create_field(CreateFieldInput {
            relation_target: Some(RelationTarget::Dynamic {
                dataset_id: dataset.id,
            }),
            ..field_input(dataset.id, "guardian", FieldType::Relation)
        })
        .await?;
    let people = store
        .create_field(CreateFieldInput {
            multiple: true,
            relation_target: Some(RelationTarget::Core {
                core: CoreKind::Person,
            }),
            ..field_input(dataset.id, "people", FieldType::Relation)
        })
        .await?;
    let active = store.create_option(option_input(status.id, "Active")).await?;
    let departed = store
        .create_option(option_input(status.id, "Departed"))
        .await?;
    let food = store.create_option(option_input(needs.id, "Food")).await?;
    let water = store.create_option(option_input(needs.id, "Water")).await?;
    Ok((
        store,
        Roll {
            dataset,
            name,
            tag,
            status,
            needs,
            guardian,
            people,
            active,
            departed,
            food,
            water,
        },
    ))
}

fn default_config(base: &Path) -> RefugeConfig {
    RefugeConfig::default_sqlite(base.join("records.sqlite").to_string_lossy())
}

fn payload(entries: &[(&str, FieldValue)]) -> RecordPayload {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn named(dataset_id: Id, name: &str) -> CreateRecordInput {
    CreateRecordInput {
        dataset_id,
        actor: ACTOR,
        payload: payload(&[("name", FieldValue::Text(name.to_string()))]),
        options: Vec::new(),
        dynamic_links: Vec::new(),
        core_links: Vec::new(),
    }
}

#[tokio::test]
async fn create_validates_payload_against_fields() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;

    let record = store.create_record(named(roll.dataset.id, "Ana")).await?;
    assert_eq!(record.version, RECORD_BASE_VERSION);
    assert_eq!(record.activation_id, roll.dataset.activation_id);
    assert_eq!(store.get_record(record.id).await?, record);

    let mut missing = named(roll.dataset.id, "  ");
    let err = store
        .create_record(missing.clone())
        .await
        .expect_err("blank required");
    assert_eq!(err.code(), "VALIDATION");

    missing.payload = payload(&[
        ("name", FieldValue::Text("Ben".to_string())),
        ("tag", FieldValue::Text("7".to_string())),
    ]);
    let err = store
        .create_record(missing.clone())
        .await
        .expect_err("wrong variant");
    assert_eq!(err.code(), "VALIDATION");

    missing.payload = payload(&[
        ("name", FieldValue::Text("Ben".to_string())),
        ("ghost", FieldValue::Bool(true)),
    ]);
    let err = store
        .create_record(missing.clone())
        .await
        .expect_err("unknown key");
    assert_eq!(err.code(), "VALIDATION");

    missing.payload = payload(&[
        ("name", FieldValue::Text("Ben".to_string())),
        ("status", FieldValue::Text("active".to_string())),
    ]);
    let err = store
        .create_record(missing)
        .await
        .expect_err("select values are not payload");
    assert_eq!(err.code(), "VALIDATION");
    Ok(())
}

#[tokio::test]
async fn unknown_keys_pass_in_warn_mode() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut config = default_config(dir.path());
    config.validation_mode = Some(ValidationMode::Warn);
    let (store, roll) = open(dir.path(), config).await?;
    let mut input = named(roll.dataset.id, "Ana");
    input
        .payload
        .insert("legacy".to_string(), FieldValue::Number(2.0));
    let record = store.create_record(input).await?;
    assert!(record.payload.contains_key("legacy"));
    Ok(())
}

#[tokio::test]
async fn unique_fields_reject_repeated_values() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;
    let mut first = named(roll.dataset.id, "Ana");
    first.payload.insert("tag".to_string(), FieldValue::Number(4.0));
    let ana = store.create_record(first).await?;

    let mut second = named(roll.dataset.id, "Ben");
    second
        .payload
        .insert("tag".to_string(), FieldValue::Number(4.0));
    let err = store
        .create_record(second.clone())
        .await
        .expect_err("tag taken");
    assert_eq!(err.code(), "DUPLICATE_KEY");

    assert!(roll.tag.unique);
    assert!(store.delete_record(ana.id, ACTOR).await?);
    store.create_record(second).await?;
    Ok(())
}

#[tokio::test]
async fn stale_versions_are_rejected_without_writing() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;
    let record = store.create_record(named(roll.dataset.id, "Ana")).await?;

    let updated = store
        .update_record(UpdateRecordInput {
            record_id: record.id,
            actor: ActorId(12),
            expected_version: record.version,
            patch: RecordPatch {
                payload: Patch::Set(payload(&[(
                    "name",
                    FieldValue::Text("Ana Maria".to_string()),
                )])),
                ..RecordPatch::default()
            },
        })
        .await?;
    assert_eq!(updated.version, record.version + 1);
    assert_eq!(updated.updated_by, Some(ActorId(12)));

    let err = store
        .update_record(UpdateRecordInput {
            record_id: record.id,
            actor: ActorId(13),
            expected_version: record.version,
            patch: RecordPatch {
                payload: Patch::Set(payload(&[("name", FieldValue::Text("Lost".to_string()))])),
                ..RecordPatch::default()
            },
        })
        .await
        .expect_err("stale version");
    match err {
        RefugeError::VersionConflict { expected, actual } => {
            assert_eq!(expected, record.version);
            assert_eq!(actual, record.version + 1);
        }
        other => panic!("expected version conflict, got {other:?}"),
    }
    assert_eq!(store.get_record(record.id).await?, updated);

    let untouched = store
        .update_record(UpdateRecordInput {
            record_id: record.id,
            actor: ACTOR,
            expected_version: updated.version,
            patch: RecordPatch::default(),
        })
        .await?;
    assert_eq!(untouched.payload, updated.payload);
    assert_eq!(untouched.version, updated.version + 1);
    Ok(())
}

#[tokio::test]
async fn set_assignments_replace_whole_sets() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;
    let guardian = store.create_record(named(roll.dataset.id, "Carla")).await?;
    let person_a = Id::new();
    let person_b = Id::new();
    let mut input = named(roll.dataset.id, "Ana");
    input.options = vec![
        OptionAssignment {
            field_id: roll.status.id,
            option_ids: vec![roll.active.id],
        },
        OptionAssignment {
            field_id: roll.needs.id,
            option_ids: vec![roll.food.id, roll.water.id],
        },
    ];
    input.dynamic_links = vec![DynamicLinkAssignment {
        field_id: roll.guardian.id,
        target_record_ids: vec![guardian.id],
    }];
    input.core_links = vec![CoreLinkAssignment {
        field_id: roll.people.id,
        targets: vec![
            CoreTarget {
                target_core: CoreKind::Person,
                target_id: person_a,
            },
            CoreTarget {
                target_core: CoreKind::Person,
                target_id: person_b,
            },
        ],
    }];
    let record = store.create_record(input).await?;

    let links = store.fetch_links(&[record.id]).await?;
    assert_eq!(links.dynamic.len(), 1);
    assert_eq!(links.core.values().next().map(Vec::len), Some(2));

    let updated = store
        .update_record(UpdateRecordInput {
            record_id: record.id,
            actor: ACTOR,
            expected_version: record.version,
            patch: RecordPatch {
                options: Patch::Set(vec![OptionAssignment {
                    field_id: roll.status.id,
                    option_ids: vec![roll.departed.id],
                }]),
                dynamic_links: Patch::Set(Vec::new()),
                ..RecordPatch::default()
            },
        })
        .await?;
    assert_eq!(updated.payload, record.payload);

    let links = store.fetch_links(&[record.id]).await?;
    assert!(links.dynamic.is_empty());
    assert_eq!(links.core.values().next().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn assignments_are_checked_against_field_shape() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;

    let mut two_statuses = named(roll.dataset.id, "Ana");
    two_statuses.options = vec![OptionAssignment {
        field_id: roll.status.id,
        option_ids: vec![roll.active.id, roll.departed.id],
    }];
    let err = store
        .create_record(two_statuses)
        .await
        .expect_err("single select");
    assert_eq!(err.code(), "VALIDATION");

    let mut foreign_option = named(roll.dataset.id, "Ana");
    foreign_option.options = vec![OptionAssignment {
        field_id: roll.status.id,
        option_ids: vec![roll.food.id],
    }];
    let err = store
        .create_record(foreign_option)
        .await
        .expect_err("option of another field");
    assert_eq!(err.code(), "VALIDATION");

    let mut wrong_core = named(roll.dataset.id, "Ana");
    wrong_core.core_links = vec![CoreLinkAssignment {
        field_id: roll.people.id,
        targets: vec![CoreTarget {
            target_core: CoreKind::Center,
            target_id: Id::new(),
        }],
    }];
    let err = store
        .create_record(wrong_core)
        .await
        .expect_err("core kind mismatch");
    assert_eq!(err.code(), "VALIDATION");

    let mut missing_target = named(roll.dataset.id, "Ana");
    missing_target.dynamic_links = vec![DynamicLinkAssignment {
        field_id: roll.guardian.id,
        target_record_ids: vec![Id::new()],
    }];
    let err = store
        .create_record(missing_target)
        .await
        .expect_err("missing target record");
    assert_eq!(err.code(), "NOT_FOUND");

    let listed = store
        .list_records(ListRecordsInput {
            dataset_id: roll.dataset.id,
            offset: 0,
            limit: None,
            contains: None,
        })
        .await?;
    assert!(listed.is_empty());
    Ok(())
}

#[tokio::test]
async fn single_links_bump_the_version_once() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;
    let guardian = store.create_record(named(roll.dataset.id, "Carla")).await?;
    let other = store.create_record(named(roll.dataset.id, "Dora")).await?;
    let record = store.create_record(named(roll.dataset.id, "Ana")).await?;

    assert!(
        store
            .link_record(record.id, roll.guardian.id, guardian.id, ACTOR)
            .await?
    );
    assert!(
        !store
            .link_record(record.id, roll.guardian.id, guardian.id, ACTOR)
            .await?
    );
    assert_eq!(store.get_record(record.id).await?.version, record.version + 1);

    let err = store
        .link_record(record.id, roll.guardian.id, other.id, ACTOR)
        .await
        .expect_err("single relation cell is full");
    assert_eq!(err.code(), "VALIDATION");

    let target = CoreTarget {
        target_core: CoreKind::Person,
        target_id: Id::new(),
    };
    assert!(store.link_core(record.id, roll.people.id, target, ACTOR).await?);
    assert!(!store.link_core(record.id, roll.people.id, target, ACTOR).await?);
    assert_eq!(store.get_record(record.id).await?.version, record.version + 2);

    let err = store
        .link_record(record.id, roll.name.id, guardian.id, ACTOR)
        .await
        .expect_err("not a relation field");
    assert_eq!(err.code(), "VALIDATION");

    let links = store
        .list_audit(AuditFilter {
            entity_type: Some(AuditEntityType::Record),
            entity_id: Some(record.id),
            ..AuditFilter::default()
        })
        .await?;
    assert_eq!(links.len(), 3);
    Ok(())
}

#[tokio::test]
async fn listing_pages_newest_first_and_filters_by_payload() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, roll) = open(dir.path(), default_config(dir.path())).await?;
    let mut ids = Vec::new();
    for (index, name) in ["Ana", "Ben", "Carla", "Dora"].into_iter().enumerate() {
        let mut input = named(roll.dataset.id, name);
        input
            .payload
            .insert("tag".to_string(), FieldValue::Number(index as f64));
        ids.push(store.create_record(input).await?.id);
    }
    store.delete_record(ids[3], ACTOR).await?;
    assert!(!store.delete_record(ids[3], ACTOR).await?);

    let page = store
        .list_records(ListRecordsInput {
            dataset_id: roll.dataset.id,
            offset: 1,
            limit: Some(1),
            contains: None,
        })
        .await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[1]);

    let filtered = store
        .list_records(ListRecordsInput {
            dataset_id: roll.dataset.id,
            offset: 0,
            limit: None,
            contains: Some(payload(&[("tag", FieldValue::Number(2.0))])),
        })
        .await?;
    let filtered: Vec<Id> = filtered.iter().map(|record| record.id).collect();
    assert_eq!(filtered, vec![ids[2]]);

    let mismatched = store
        .list_records(ListRecordsInput {
            dataset_id: roll.dataset.id,
            offset: 0,
            limit: None,
            contains: Some(payload(&[
                ("name", FieldValue::Text("Ana".to_string())),
                ("tag", FieldValue::Number(1.0)),
            ])),
        })
        .await?;
    assert!(mismatched.is_empty());

    let tombstoned = store.get_record(ids[3]).await?;
    assert!(tombstoned.lifecycle.is_deleted());
    Ok(())
}

#[tokio::test]
async fn failed_create_leaves_no_rows() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut config = default_config(dir.path());
    config.failpoints = Some(vec!["after_option_values_insert".to_string()]);
    let (store, roll) = open(dir.path(), config).await?;

    let mut input = named(roll.dataset.id, "Ana");
    input.options = vec![OptionAssignment {
        field_id: roll.status.id,
        option_ids: vec![roll.active.id],
    }];
    let err = store.create_record(input).await.expect_err("failpoint");
    assert_eq!(err.code(), "STORAGE");

    let records = store
        .list_records(ListRecordsInput {
            dataset_id: roll.dataset.id,
            offset: 0,
            limit: None,
            contains: None,
        })
        .await?;
    assert!(records.is_empty());
    let audit = store
        .list_audit(AuditFilter {
            entity_type: Some(AuditEntityType::Record),
            ..AuditFilter::default()
        })
        .await?;
    assert!(audit.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_update_keeps_version_and_links() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let mut config = default_config(dir.path());
    config.failpoints = Some(vec!["after_links_replace".to_string()]);
    let (store, roll) = open(dir.path(), config).await?;

    let mut input = named(roll.dataset.id, "Ana");
    input.options = vec![OptionAssignment {
        field_id: roll.status.id,
        option_ids: vec![roll.active.id],
    }];
    let record = store.create_record(input).await?;

    let err = store
        .update_record(UpdateRecordInput {
            record_id: record.id,
            actor: ACTOR,
            expected_version: record.version,
            patch: RecordPatch {
                payload: Patch::Set(payload(&[("name", FieldValue::Text("Eve".to_string()))])),
                options: Patch::Set(vec![OptionAssignment {
                    field_id: roll.status.id,
                    option_ids: vec![roll.departed.id],
                }]),
                ..RecordPatch::default()
            },
        })
        .await
        .expect_err("failpoint");
    assert_eq!(err.code(), "STORAGE");
    assert_eq!(store.get_record(record.id).await?, record);
    Ok(())
}
