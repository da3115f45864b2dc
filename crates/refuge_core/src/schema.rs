use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    ActivationId, ActorId, FieldType, Id, LocationId, RecordPayload, RefugeError, RefugeResult,
    Timestamp,
};

pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Version assigned to a freshly created record.
pub const RECORD_BASE_VERSION: i64 = 1;

const MAX_KEY_LEN: usize = 64;

/// Soft-delete state shared by datasets, fields and records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at: Timestamp, by: Option<ActorId> },
}

impl Lifecycle {
    pub fn from_columns(deleted_at: Option<i64>, deleted_by: Option<i64>) -> Self {
        match deleted_at {
            Some(at) => Lifecycle::Deleted {
                at: Timestamp::from_micros(at),
                by: deleted_by.map(ActorId),
            },
            None => Lifecycle::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Active)
    }

    pub fn is_deleted(&self) -> bool {
        !self.is_active()
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Deleted { at, .. } => Some(*at),
        }
    }
}

/// Fixed entity classes managed outside the dataset engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreKind {
    Person,
    Center,
    Location,
    Activation,
    InventoryItem,
}

impl CoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CoreKind::Person => "person",
            CoreKind::Center => "center",
            CoreKind::Location => "location",
            CoreKind::Activation => "activation",
            CoreKind::InventoryItem => "inventory_item",
        }
    }
}

impl fmt::Display for CoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoreKind {
    type Err = RefugeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "person" => Ok(CoreKind::Person),
            "center" => Ok(CoreKind::Center),
            "location" => Ok(CoreKind::Location),
            "activation" => Ok(CoreKind::Activation),
            "inventory_item" => Ok(CoreKind::InventoryItem),
            other => Err(RefugeError::validation(format!("unknown core kind '{other}'"))),
        }
    }
}

/// Where a relation field points. Only relation fields carry one.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationTarget {
    Dynamic { dataset_id: Id },
    Core { core: CoreKind },
}

impl RelationTarget {
    pub fn kind_str(&self) -> &'static str {
        match self {
            RelationTarget::Dynamic { .. } => "dynamic",
            RelationTarget::Core { .. } => "core",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Id,
    pub activation_id: ActivationId,
    pub location_id: LocationId,
    pub name: String,
    pub key: String,
    pub config: JsonMap,
    pub schema_snapshot: Option<JsonValue>,
    pub created_by: ActorId,
    pub updated_by: Option<ActorId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub lifecycle: Lifecycle,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: Id,
    pub dataset_id: Id,
    pub name: String,
    pub key: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    pub config: JsonMap,
    pub position: i32,
    pub is_active: bool,
    pub multiple: bool,
    pub relation_target: Option<RelationTarget>,
    pub created_by: ActorId,
    pub updated_by: Option<ActorId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub lifecycle: Lifecycle,
}

impl Field {
    /// Active and not tombstoned; only these fields hold a position slot.
    pub fn is_listed(&self) -> bool {
        self.is_active && self.lifecycle.is_active()
    }

    /// Whether a cell of this field may hold more than one option or link.
    pub fn accepts_many(&self) -> bool {
        self.field_type == FieldType::MultiSelect || self.multiple
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub id: Id,
    pub field_id: Id,
    pub label: String,
    pub value: String,
    pub color: Option<String>,
    pub position: i32,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Id,
    pub dataset_id: Id,
    pub activation_id: ActivationId,
    pub version: i64,
    pub payload: RecordPayload,
    pub created_by: ActorId,
    pub updated_by: Option<ActorId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub lifecycle: Lifecycle,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CoreTarget {
    pub target_core: CoreKind,
    pub target_id: Id,
}

/// Options selected for one select/multi_select field of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionAssignment {
    pub field_id: Id,
    pub option_ids: Vec<Id>,
}

/// Records linked from one dynamic relation field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DynamicLinkAssignment {
    pub field_id: Id,
    pub target_record_ids: Vec<Id>,
}

/// Core entities linked from one core relation field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoreLinkAssignment {
    pub field_id: Id,
    pub targets: Vec<CoreTarget>,
}

/// Rows referencing a field, per storage location.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldUsage {
    pub payload_values: u64,
    pub option_values: u64,
    pub dynamic_relations: u64,
    pub core_relations: u64,
}

impl FieldUsage {
    pub fn total(&self) -> u64 {
        self.payload_values + self.option_values + self.dynamic_relations + self.core_relations
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldDeleteOutcome {
    Deleted,
    BlockedRequired,
    NeedsConfirmation { usage: FieldUsage },
}

pub fn validate_key(key: &str) -> RefugeResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(RefugeError::validation(format!(
            "key must be 1..={MAX_KEY_LEN} characters"
        )));
    }
    let valid = key
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if !valid {
        return Err(RefugeError::validation(format!(
            "key '{key}' may only contain ascii letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> RefugeResult<()> {
    if name.trim().is_empty() {
        return Err(RefugeError::validation("name must not be blank"));
    }
    Ok(())
}

/// A relation field needs exactly one target; no other type may carry one.
pub fn validate_field_shape(
    field_type: FieldType,
    relation_target: Option<&RelationTarget>,
) -> RefugeResult<()> {
    match (field_type, relation_target) {
        (FieldType::Relation, Some(_)) => Ok(()),
        (FieldType::Relation, None) => Err(RefugeError::validation(
            "relation field requires a relation target",
        )),
        (other, Some(_)) => Err(RefugeError::validation(format!(
            "{other} field cannot carry a relation target"
        ))),
        (_, None) => Ok(()),
    }
}
