use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{ActivationId, ActorId, Id, RefugeError, Timestamp};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Dataset,
    Field,
    FieldOption,
    Record,
}

impl AuditEntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEntityType::Dataset => "dataset",
            AuditEntityType::Field => "field",
            AuditEntityType::FieldOption => "field_option",
            AuditEntityType::Record => "record",
        }
    }
}

impl FromStr for AuditEntityType {
    type Err = RefugeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "dataset" => Ok(AuditEntityType::Dataset),
            "field" => Ok(AuditEntityType::Field),
            "field_option" => Ok(AuditEntityType::FieldOption),
            "record" => Ok(AuditEntityType::Record),
            other => Err(RefugeError::storage(format!("unknown audit entity '{other}'"))),
        }
    }
}

impl fmt::Display for AuditEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Reposition,
    Link,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Reposition => "reposition",
            AuditAction::Link => "link",
        }
    }
}

impl FromStr for AuditAction {
    type Err = RefugeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "reposition" => Ok(AuditAction::Reposition),
            "link" => Ok(AuditAction::Link),
            other => Err(RefugeError::storage(format!("unknown audit action '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Id,
    pub activation_id: Option<ActivationId>,
    pub actor: ActorId,
    pub action: AuditAction,
    pub entity_type: AuditEntityType,
    pub entity_id: Id,
    pub created_at: Timestamp,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub activation_id: Option<ActivationId>,
    pub actor: ActorId,
    pub action: AuditAction,
    pub entity_type: AuditEntityType,
    pub entity_id: Id,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub activation_id: Option<ActivationId>,
    pub entity_type: Option<AuditEntityType>,
    pub entity_id: Option<Id>,
    pub limit: Option<u64>,
}
