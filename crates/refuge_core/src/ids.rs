use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{RefugeError, RefugeResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(pub [u8; 16]);

impl Id {
    pub fn new() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub fn from_uuid_str(value: &str) -> RefugeResult<Self> {
        let uuid = Uuid::parse_str(value)
            .map_err(|err| RefugeError::validation(format!("invalid uuid '{value}': {err}")))?;
        Ok(Self(*uuid.as_bytes()))
    }

    pub fn from_ulid_str(value: &str) -> RefugeResult<Self> {
        let ulid = ulid::Ulid::from_string(value)
            .map_err(|err| RefugeError::validation(format!("invalid ulid '{value}': {err}")))?;
        Ok(Self(ulid.to_bytes()))
    }

    pub fn parse(value: &str) -> RefugeResult<Self> {
        Self::from_uuid_str(value)
            .or_else(|_| Self::from_ulid_str(value))
            .map_err(|_| RefugeError::validation(format!("invalid id '{value}'")))
    }

    pub fn to_uuid_string(self) -> String {
        Uuid::from_bytes(self.0).to_string()
    }

    pub fn as_uuid(self) -> Uuid {
        Uuid::from_bytes(self.0)
    }

    pub fn as_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn as_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uuid = Uuid::from_bytes(self.0);
        write!(f, "{uuid}")
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_uuid_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Id::parse(&value).map_err(|_| serde::de::Error::custom("invalid Id string"))
    }
}

/// Disaster activation (tenant) that owns datasets and records.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ActivationId(pub Id);

/// Physical location a dataset is attached to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct LocationId(pub Id);

/// Integer user id supplied by the caller for attribution only.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub i64);

macro_rules! id_wrapper_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                Ok(Self(Id::deserialize(deserializer)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_wrapper_serde!(ActivationId);
id_wrapper_serde!(LocationId);

#[cfg(test)]
mod tests {
    use super::{ActivationId, ActorId, Id};

    #[test]
    fn id_parses_uuid_and_ulid() {
        let id = Id::new();
        let uuid = id.to_uuid_string();
        let ulid = ulid::Ulid::from_bytes(id.as_bytes()).to_string();
        assert_eq!(Id::parse(&uuid).expect("uuid parse"), id);
        assert_eq!(Id::parse(&ulid).expect("ulid parse"), id);
    }

    #[test]
    fn id_rejects_invalid_strings() {
        assert!(Id::from_uuid_str("not-a-uuid").is_err());
        assert!(Id::from_ulid_str("not-a-ulid").is_err());
        assert!(Id::parse("").is_err());
    }

    #[test]
    fn wrappers_serialize_transparently() {
        let id = Id::new();
        let activation = ActivationId(id);
        let encoded = serde_json::to_string(&activation).expect("encode");
        assert_eq!(encoded, format!("\"{}\"", id.to_uuid_string()));
        let decoded: ActivationId = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, activation);
        assert_eq!(serde_json::to_string(&ActorId(42)).expect("actor"), "42");
    }
}
