//! Caller identity as asserted by the upstream gateway.

use super::UnknownVariant;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of back-office roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    AgencyAdmin,
    Landlord,
    Agent,
    Caretaker,
    Tenant,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::AgencyAdmin,
        Role::Landlord,
        Role::Agent,
        Role::Caretaker,
        Role::Tenant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::AgencyAdmin => "agency_admin",
            Role::Landlord => "landlord",
            Role::Agent => "agent",
            Role::Caretaker => "caretaker",
            Role::Tenant => "tenant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "super_admin" => Some(Role::SuperAdmin),
            "agency_admin" => Some(Role::AgencyAdmin),
            "landlord" => Some(Role::Landlord),
            "agent" => Some(Role::Agent),
            "caretaker" => Some(Role::Caretaker),
            "tenant" => Some(Role::Tenant),
            _ => None,
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(UnknownVariant::new("role", value))
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
    /// Set when `role` is [`Role::Tenant`].
    pub tenant_id: Option<Uuid>,
}

impl Actor {
    pub fn staff(user_id: Uuid, company_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            company_id,
            role,
            tenant_id: None,
        }
    }

    pub fn tenant(user_id: Uuid, company_id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            user_id,
            company_id,
            role: Role::Tenant,
            tenant_id: Some(tenant_id),
        }
    }
}
