use refuge_store::{
    ActivationId, ActorId, CreateDatasetInput, CreateFieldInput, Dataset, DatasetRegistryApi,
    Field, FieldCatalogApi, FieldDeleteOutcome, FieldLifecycleApi, FieldPatch, FieldType, Id,
    LocationId, Patch, RefugeConfig, RefugeResult, RefugeStore,
};
use tempfile::tempdir;

const ACTOR: ActorId = ActorId(3);

async fn open_with_dataset(base: &std::path::Path) -> RefugeResult<(RefugeStore, Dataset)> {
    let config = RefugeConfig::default_sqlite(base.join("fields.sqlite").to_string_lossy());
    let store = RefugeStore::connect(&config, base).await?;
    let dataset = store
        .create_dataset(CreateDatasetInput {
            activation_id: ActivationId(Id::new()),
            location_id: LocationId(Id::new()),
            actor: ACTOR,
            name: "Intake".to_string(),
            key: "intake".to_string(),
            config: None,
            schema_snapshot: None,
        })
        .await?;
    Ok((store, dataset))
}

fn text_field(dataset_id: Id, key: &str, position: Option<i32>) -> CreateFieldInput {
    CreateFieldInput {
        dataset_id,
        actor: ACTOR,
        name: key.to_uppercase(),
        key: key.to_string(),
        field_type: FieldType::Text,
        required: false,
        unique: false,
        multiple: false,
        config: None,
        position,
        relation_target: None,
    }
}

async fn listed(store: &RefugeStore, dataset_id: Id) -> RefugeResult<Vec<(String, i32)>> {
    Ok(store
        .list_fields(dataset_id)
        .await?
        .into_iter()
        .map(|field: Field| (field.key, field.position))
        .collect())
}

fn expected(keys: &[&str]) -> Vec<(String, i32)> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| (key.to_string(), index as i32 + 1))
        .collect()
}

#[tokio::test]
async fn create_appends_or_inserts_at_clamped_slot() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open_with_dataset(dir.path()).await?;

    store.create_field(text_field(dataset.id, "a", None)).await?;
    store.create_field(text_field(dataset.id, "b", None)).await?;
    assert_eq!(listed(&store, dataset.id).await?, expected(&["a", "b"]));

    store
        .create_field(text_field(dataset.id, "c", Some(1)))
        .await?;
    assert_eq!(listed(&store, dataset.id).await?, expected(&["c", "a", "b"]));

    let far = store
        .create_field(text_field(dataset.id, "d", Some(99)))
        .await?;
    assert_eq!(far.position, 4);
    let low = store
        .create_field(text_field(dataset.id, "e", Some(-5)))
        .await?;
    assert_eq!(low.position, 1);
    assert_eq!(
        listed(&store, dataset.id).await?,
        expected(&["e", "c", "a", "b", "d"])
    );

    let err = store
        .create_field(text_field(dataset.id, "a", None))
        .await
        .expect_err("duplicate field key");
    assert_eq!(err.code(), "DUPLICATE_KEY");
    Ok(())
}

#[tokio::test]
async fn reposition_shifts_the_fields_in_between() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open_with_dataset(dir.path()).await?;
    let mut ids = Vec::new();
    for key in ["a", "b", "c", "d"] {
        ids.push(store.create_field(text_field(dataset.id, key, None)).await?.id);
    }

    let moved = store.reposition_field(ids[3], ACTOR, 1).await?;
    assert_eq!(moved.position, 1);
    assert_eq!(listed(&store, dataset.id).await?, expected(&["d", "a", "b", "c"]));

    store.reposition_field(ids[3], ACTOR, 3).await?;
    assert_eq!(listed(&store, dataset.id).await?, expected(&["a", "b", "d", "c"]));

    let clamped = store.reposition_field(ids[0], ACTOR, 50).await?;
    assert_eq!(clamped.position, 4);
    assert_eq!(listed(&store, dataset.id).await?, expected(&["b", "d", "c", "a"]));

    let clamped = store.reposition_field(ids[0], ACTOR, 0).await?;
    assert_eq!(clamped.position, 1);
    assert_eq!(listed(&store, dataset.id).await?, expected(&["a", "b", "d", "c"]));
    Ok(())
}

#[tokio::test]
async fn reposition_to_current_slot_changes_nothing() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open_with_dataset(dir.path()).await?;
    store.create_field(text_field(dataset.id, "a", None)).await?;
    let b = store.create_field(text_field(dataset.id, "b", None)).await?;

    let same = store.reposition_field(b.id, ACTOR, 2).await?;
    assert_eq!(same, b);
    let again = store.get_field(b.id).await?;
    assert_eq!(again.updated_at, b.updated_at);
    Ok(())
}

#[tokio::test]
async fn delete_and_deactivate_close_the_gap() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open_with_dataset(dir.path()).await?;
    let mut ids = Vec::new();
    for key in ["a", "b", "c", "d"] {
        ids.push(store.create_field(text_field(dataset.id, key, None)).await?.id);
    }

    let outcome = store.delete_field(ids[1], ACTOR, false).await?;
    assert_eq!(outcome, FieldDeleteOutcome::Deleted);
    assert_eq!(listed(&store, dataset.id).await?, expected(&["a", "c", "d"]));
    let deleted = store.get_field(ids[1]).await?;
    assert!(deleted.lifecycle.is_deleted());
    assert!(!deleted.is_active);

    let outcome = store.delete_field(ids[1], ACTOR, false).await?;
    assert_eq!(outcome, FieldDeleteOutcome::Deleted);
    let err = store
        .reposition_field(ids[1], ACTOR, 1)
        .await
        .expect_err("deleted field");
    assert_eq!(err.code(), "VALIDATION");

    let inactive = store
        .update_field(
            ids[0],
            ACTOR,
            FieldPatch {
                is_active: Patch::Set(false),
                ..FieldPatch::default()
            },
        )
        .await?;
    assert!(!inactive.is_active);
    assert_eq!(listed(&store, dataset.id).await?, expected(&["c", "d"]));

    let reactivated = store
        .update_field(
            ids[0],
            ACTOR,
            FieldPatch {
                is_active: Patch::Set(true),
                ..FieldPatch::default()
            },
        )
        .await?;
    assert_eq!(reactivated.position, 3);
    assert_eq!(listed(&store, dataset.id).await?, expected(&["c", "d", "a"]));
    Ok(())
}

#[tokio::test]
async fn deleted_field_keys_stay_reserved() -> RefugeResult<()> {
    let dir = tempdir().expect("tempdir");
    let (store, dataset) = open_with_dataset(dir.path()).await?;
    let a = store.create_field(text_field(dataset.id, "a", None)).await?;
    store.delete_field(a.id, ACTOR, true).await?;
    let err = store
        .create_field(text_field(dataset.id, "a", None))
        .await
        .expect_err("key held by tombstone");
    assert_eq!(err.code(), "DUPLICATE_KEY");
    Ok(())
}
