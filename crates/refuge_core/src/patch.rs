use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CoreLinkAssignment, DynamicLinkAssignment, JsonMap, OptionAssignment};
use crate::{FieldType, RecordPayload, RelationTarget};

/// One attribute of a partial update: left as is, or replaced.
///
/// Nullable attributes use `Patch<Option<T>>`, so `Set(None)` clears them.
/// In JSON an absent member is `Unchanged` and a present one is `Set`; pair it
/// with `#[serde(default, skip_serializing_if = "Patch::is_unchanged")]`.
#[derive(Clone, Debug, PartialEq)]
pub enum Patch<T> {
    Unchanged,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Unchanged
    }
}

impl<T> Patch<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Patch::Unchanged)
    }

    pub fn is_set(&self) -> bool {
        !self.is_unchanged()
    }

    pub fn as_ref(&self) -> Patch<&T> {
        match self {
            Patch::Unchanged => Patch::Unchanged,
            Patch::Set(value) => Patch::Set(value),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Patch::Unchanged => None,
            Patch::Set(value) => Some(value),
        }
    }

    /// Writes a set value into `target`; returns whether anything was written.
    pub fn apply_to(self, target: &mut T) -> bool {
        match self {
            Patch::Unchanged => false,
            Patch::Set(value) => {
                *target = value;
                true
            }
        }
    }
}

impl<T> From<Option<T>> for Patch<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Patch::Set(value),
            None => Patch::Unchanged,
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Patch::Unchanged => serializer.serialize_none(),
            Patch::Set(value) => value.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Patch::Set)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetPatch {
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub name: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub config: Patch<JsonMap>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub deleted: Patch<bool>,
}

impl DatasetPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_unchanged() && self.config.is_unchanged() && self.deleted.is_unchanged()
    }
}

/// Partial field update. Position changes go through reposition so the
/// ordering invariant is maintained in one place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldPatch {
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub name: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub key: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub field_type: Patch<FieldType>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub required: Patch<bool>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub unique: Patch<bool>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub config: Patch<JsonMap>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub multiple: Patch<bool>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub relation_target: Patch<Option<RelationTarget>>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub is_active: Patch<bool>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub deleted: Patch<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionPatch {
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub label: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub value: Patch<String>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub color: Patch<Option<String>>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub position: Patch<i32>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub is_active: Patch<bool>,
}

/// Record sub-values to replace alongside the payload. Every `Set` member
/// replaces the whole set for the record; there is no incremental merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub payload: Patch<RecordPayload>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub options: Patch<Vec<OptionAssignment>>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub dynamic_links: Patch<Vec<DynamicLinkAssignment>>,
    #[serde(skip_serializing_if = "Patch::is_unchanged")]
    pub core_links: Patch<Vec<CoreLinkAssignment>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DatasetPatch, FieldPatch, Patch};

    #[test]
    fn absent_members_stay_unchanged() {
        let patch: DatasetPatch = serde_json::from_value(json!({"name": "Roll"})).expect("decode");
        assert_eq!(patch.name, Patch::Set("Roll".to_string()));
        assert!(patch.config.is_unchanged());
        assert!(patch.deleted.is_unchanged());
        assert!(!patch.is_empty());
        assert!(DatasetPatch::default().is_empty());
    }

    #[test]
    fn explicit_null_clears_nullable_members() {
        let patch: FieldPatch =
            serde_json::from_value(json!({"relation_target": null})).expect("decode");
        assert_eq!(patch.relation_target, Patch::Set(None));
        assert!(patch.required.is_unchanged());
    }

    #[test]
    fn unchanged_members_are_not_serialized() {
        let patch = FieldPatch {
            required: Patch::Set(false),
            ..FieldPatch::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).expect("encode"),
            json!({"required": false})
        );
    }

    #[test]
    fn apply_to_reports_writes() {
        let mut name = "old".to_string();
        assert!(!Patch::Unchanged.apply_to(&mut name));
        assert_eq!(name, "old");
        assert!(Patch::Set("new".to_string()).apply_to(&mut name));
        assert_eq!(name, "new");
        assert_eq!(Patch::from(Some(3)).into_option(), Some(3));
        assert!(Patch::<i32>::from(None).is_unchanged());
    }
}
