//! Identity domain types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::IdentityRecord;
use crate::types::IdentityId;

/// Privilege level of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "ADMIN" => Ok(Self::Admin),
            other => Err(anyhow::anyhow!("Unknown role: {}", other)),
        }
    }
}

/// The durable record of a person or guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub role: Role,
    pub is_guest: bool,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl TryFrom<IdentityRecord> for Identity {
    type Error = anyhow::Error;

    fn try_from(record: IdentityRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: IdentityId::new(record.identity_id),
            name: record.name,
            email: record.email,
            image: record.image,
            role: record.role.parse()?,
            is_guest: record.is_guest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surrealdb::RecordId;

    #[test]
    fn test_role_serde_is_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"ADMIN\"");
        let role: Role = serde_json::from_str("\"USER\"").unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn test_role_parse_rejects_unknown() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_identity_from_record() {
        let record = IdentityRecord {
            id: RecordId::from_table_key("identity", "r1"),
            identity_id: "guest_abc".to_string(),
            name: Some("Quiet Heron 0001".to_string()),
            email: None,
            image: None,
            role: "USER".to_string(),
            is_guest: true,
            created_at: None,
            updated_at: None,
        };

        let identity = Identity::try_from(record).unwrap();
        assert_eq!(identity.id.as_str(), "guest_abc");
        assert_eq!(identity.role, Role::User);
        assert!(identity.is_guest);
        assert!(!identity.is_admin());
    }

    #[test]
    fn test_identity_serializes_camel_case() {
        let identity = Identity {
            id: IdentityId::new("abc"),
            name: None,
            email: Some("a@example.com".to_string()),
            image: None,
            role: Role::Admin,
            is_guest: false,
        };
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["isGuest"], false);
        assert_eq!(json["role"], "ADMIN");
    }
}
