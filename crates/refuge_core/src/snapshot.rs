use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer};

use crate::{CoreTarget, Dataset, Field, FieldType, FieldValue, Id, Record, RelationTarget};

/// Lookup key for every auxiliary value of one record cell.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CellKey {
    pub record_id: Id,
    pub field_id: Id,
}

impl CellKey {
    pub fn new(record_id: Id, field_id: Id) -> Self {
        Self {
            record_id,
            field_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub id: Id,
    pub value: String,
    pub label: String,
    pub color: Option<String>,
    pub position: i32,
}

/// Links of a set of records grouped per cell, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordLinks {
    pub dynamic: HashMap<CellKey, Vec<Id>>,
    pub core: HashMap<CellKey, Vec<CoreTarget>>,
}

/// Resolved value of one record × field pair.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Empty,
    Atomic(FieldValue),
    Options(Vec<OptionDescriptor>),
    Records(Vec<Id>),
    Core(Vec<CoreTarget>),
}

impl Serialize for CellValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            CellValue::Empty => serializer.serialize_none(),
            CellValue::Atomic(value) => value.to_plain_json().serialize(serializer),
            CellValue::Options(options) => options.serialize(serializer),
            CellValue::Records(ids) => ids.serialize(serializer),
            CellValue::Core(targets) => targets.serialize(serializer),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SnapshotRecord {
    #[serde(flatten)]
    pub record: Record,
    pub cells: Vec<CellValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetSnapshot {
    pub dataset: Dataset,
    pub fields: Vec<Field>,
    pub field_keys: Vec<String>,
    pub field_ids: Vec<Id>,
    pub records: Vec<SnapshotRecord>,
    pub rows_matrix: Vec<Vec<CellValue>>,
}

/// Joins pre-fetched rows into the column-ordered cells matrix.
///
/// `fields` must already be in display order. Every lookup is in memory; the
/// caller fetches each auxiliary store once for the whole record set.
pub fn assemble_snapshot(
    dataset: Dataset,
    fields: Vec<Field>,
    records: Vec<Record>,
    option_values: &HashMap<CellKey, Vec<OptionDescriptor>>,
    links: &RecordLinks,
) -> DatasetSnapshot {
    let field_keys = fields.iter().map(|field| field.key.clone()).collect();
    let field_ids = fields.iter().map(|field| field.id).collect();
    let mut snapshot_records = Vec::with_capacity(records.len());
    let mut rows_matrix = Vec::with_capacity(records.len());
    for record in records {
        let cells: Vec<CellValue> = fields
            .iter()
            .map(|field| resolve_cell(field, &record, option_values, links))
            .collect();
        rows_matrix.push(cells.clone());
        snapshot_records.push(SnapshotRecord { record, cells });
    }
    DatasetSnapshot {
        dataset,
        fields,
        field_keys,
        field_ids,
        records: snapshot_records,
        rows_matrix,
    }
}

pub fn resolve_cell(
    field: &Field,
    record: &Record,
    option_values: &HashMap<CellKey, Vec<OptionDescriptor>>,
    links: &RecordLinks,
) -> CellValue {
    let key = CellKey::new(record.id, field.id);
    match (field.field_type, field.relation_target) {
        (field_type, _) if field_type.is_atomic() => record
            .payload
            .get(&field.key)
            .cloned()
            .map(CellValue::Atomic)
            .unwrap_or(CellValue::Empty),
        (FieldType::Select | FieldType::MultiSelect, _) => {
            CellValue::Options(option_values.get(&key).cloned().unwrap_or_default())
        }
        (FieldType::Relation, Some(RelationTarget::Dynamic { .. })) => {
            CellValue::Records(links.dynamic.get(&key).cloned().unwrap_or_default())
        }
        (FieldType::Relation, Some(RelationTarget::Core { .. })) => {
            CellValue::Core(links.core.get(&key).cloned().unwrap_or_default())
        }
        _ => CellValue::Empty,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::{CellKey, CellValue, OptionDescriptor, RecordLinks, assemble_snapshot};
    use crate::{
        ActivationId, ActorId, CoreKind, CoreTarget, Dataset, Field, FieldType, FieldValue, Id,
        JsonMap, Lifecycle, LocationId, Record, RecordPayload, RelationTarget, Timestamp,
    };

    fn dataset() -> Dataset {
        Dataset {
            id: Id::new(),
            activation_id: ActivationId(Id::new()),
            location_id: LocationId(Id::new()),
            name: "Shelter Roll".to_string(),
            key: "shelter_roll".to_string(),
            config: JsonMap::new(),
            schema_snapshot: None,
            created_by: ActorId(1),
            updated_by: None,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            lifecycle: Lifecycle::Active,
        }
    }

    fn field(
        dataset_id: Id,
        key: &str,
        field_type: FieldType,
        position: i32,
        relation_target: Option<RelationTarget>,
    ) -> Field {
        Field {
            id: Id::new(),
            dataset_id,
            name: key.to_string(),
            key: key.to_string(),
            field_type,
            required: false,
            unique: false,
            config: JsonMap::new(),
            position,
            is_active: true,
            multiple: false,
            relation_target,
            created_by: ActorId(1),
            updated_by: None,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            lifecycle: Lifecycle::Active,
        }
    }

    fn record(dataset: &Dataset, payload: RecordPayload) -> Record {
        Record {
            id: Id::new(),
            dataset_id: dataset.id,
            activation_id: dataset.activation_id,
            version: 1,
            payload,
            created_by: ActorId(1),
            updated_by: None,
            created_at: Timestamp::now(),
            updated_at: Timestamp::now(),
            lifecycle: Lifecycle::Active,
        }
    }

    #[test]
    fn cells_resolve_by_field_type() {
        let dataset = dataset();
        let name = field(dataset.id, "name", FieldType::Text, 1, None);
        let status = field(dataset.id, "status", FieldType::Select, 2, None);
        let family = field(
            dataset.id,
            "family",
            FieldType::Relation,
            3,
            Some(RelationTarget::Dynamic {
                dataset_id: dataset.id,
            }),
        );
        let person = field(
            dataset.id,
            "person",
            FieldType::Relation,
            4,
            Some(RelationTarget::Core {
                core: CoreKind::Person,
            }),
        );
        let notes = field(dataset.id, "notes", FieldType::Text, 5, None);

        let mut payload = RecordPayload::new();
        payload.insert("name".to_string(), FieldValue::Text("Ana".to_string()));
        let ana = record(&dataset, payload);
        let other = record(&dataset, RecordPayload::new());

        let active = OptionDescriptor {
            id: Id::new(),
            value: "active".to_string(),
            label: "Active".to_string(),
            color: None,
            position: 1,
        };
        let mut option_values = HashMap::new();
        option_values.insert(CellKey::new(ana.id, status.id), vec![active.clone()]);
        let mut links = RecordLinks::default();
        links
            .dynamic
            .insert(CellKey::new(ana.id, family.id), vec![other.id]);
        let core_target = CoreTarget {
            target_core: CoreKind::Person,
            target_id: Id::new(),
        };
        links
            .core
            .insert(CellKey::new(ana.id, person.id), vec![core_target]);

        let snapshot = assemble_snapshot(
            dataset,
            vec![name, status, family, person, notes],
            vec![ana.clone(), other.clone()],
            &option_values,
            &links,
        );

        assert_eq!(
            snapshot.field_keys,
            vec!["name", "status", "family", "person", "notes"]
        );
        assert_eq!(snapshot.records.len(), 2);
        let cells = &snapshot.records[0].cells;
        assert_eq!(
            cells[0],
            CellValue::Atomic(FieldValue::Text("Ana".to_string()))
        );
        assert_eq!(cells[1], CellValue::Options(vec![active]));
        assert_eq!(cells[2], CellValue::Records(vec![other.id]));
        assert_eq!(cells[3], CellValue::Core(vec![core_target]));
        assert_eq!(cells[4], CellValue::Empty);

        let empty_row = &snapshot.records[1].cells;
        assert_eq!(empty_row[0], CellValue::Empty);
        assert_eq!(empty_row[1], CellValue::Options(Vec::new()));
        assert_eq!(empty_row[2], CellValue::Records(Vec::new()));
        assert_eq!(empty_row[3], CellValue::Core(Vec::new()));

        for (row, record) in snapshot.rows_matrix.iter().zip(&snapshot.records) {
            assert_eq!(row, &record.cells);
        }
    }

    #[test]
    fn cells_serialize_as_plain_json() {
        let target_id = Id::new();
        assert_eq!(serde_json::to_value(CellValue::Empty).expect("null"), json!(null));
        assert_eq!(
            serde_json::to_value(CellValue::Atomic(FieldValue::Number(3.0))).expect("num"),
            json!(3.0)
        );
        assert_eq!(
            serde_json::to_value(CellValue::Core(vec![CoreTarget {
                target_core: CoreKind::Center,
                target_id,
            }]))
            .expect("core"),
            json!([{"target_core": "center", "target_id": target_id.to_uuid_string()}])
        );
    }
}
