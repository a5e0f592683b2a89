//! Access policy for payment and settlement operations.
//!
//! Every permission decision in the service goes through [`AccessPolicy::evaluate`],
//! a pure function of (actor, action, resource scope). Callers that need an
//! `AppError` use [`AccessPolicy::authorize`], which also writes the audit log.

use crate::models::{Actor, Role};
use crate::services::metrics::record_policy_denial;
use service_core::error::AppError;
use tracing::warn;
use uuid::Uuid;

/// Operations subject to access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ListPayments,
    ViewPayment,
    CreatePayment,
    UpdatePayment,
    ApprovePayment,
    DeletePayment,
    SettleInvoices,
    ReservePlaceholder,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ListPayments => "list_payments",
            Action::ViewPayment => "view_payment",
            Action::CreatePayment => "create_payment",
            Action::UpdatePayment => "update_payment",
            Action::ApprovePayment => "approve_payment",
            Action::DeletePayment => "delete_payment",
            Action::SettleInvoices => "settle_invoices",
            Action::ReservePlaceholder => "reserve_placeholder",
        }
    }
}

/// Ownership of the resource an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceScope {
    pub company_id: Uuid,
    /// Tenant the resource belongs to, when it belongs to one.
    pub tenant_id: Option<Uuid>,
}

impl ResourceScope {
    pub fn company(company_id: Uuid) -> Self {
        Self {
            company_id,
            tenant_id: None,
        }
    }

    pub fn tenant(company_id: Uuid, tenant_id: Uuid) -> Self {
        Self {
            company_id,
            tenant_id: Some(tenant_id),
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The role may never perform this action.
    RoleNotPermitted,
    /// The resource belongs to another company.
    OutsideCompany,
    /// A tenant caller targeted another tenant's resource.
    NotOwnResource,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RoleNotPermitted => "role_not_permitted",
            DenyReason::OutsideCompany => "outside_company",
            DenyReason::NotOwnResource => "not_own_resource",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::RoleNotPermitted => {
                write!(f, "Role is not permitted to perform this action")
            }
            DenyReason::OutsideCompany => write!(f, "Resource belongs to another company"),
            DenyReason::NotOwnResource => write!(f, "Resource belongs to another tenant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Visibility of a list query after policy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    AllCompanies,
    Company(Uuid),
    Tenant { company_id: Uuid, tenant_id: Uuid },
}

impl ListScope {
    pub fn contains(&self, company_id: Uuid, tenant_id: Uuid) -> bool {
        match *self {
            ListScope::AllCompanies => true,
            ListScope::Company(c) => c == company_id,
            ListScope::Tenant {
                company_id: c,
                tenant_id: t,
            } => c == company_id && t == tenant_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    /// Roles allowed to perform `action` at all, before scope is considered.
    pub fn role_permits(role: Role, action: Action) -> bool {
        use Role::*;
        match action {
            Action::ListPayments | Action::ViewPayment => true,
            Action::CreatePayment => {
                matches!(role, SuperAdmin | AgencyAdmin | Landlord | Agent | Caretaker)
            }
            Action::UpdatePayment | Action::ReservePlaceholder => {
                matches!(role, SuperAdmin | AgencyAdmin | Landlord | Agent)
            }
            Action::ApprovePayment | Action::DeletePayment => {
                matches!(role, SuperAdmin | AgencyAdmin | Landlord)
            }
            Action::SettleInvoices => {
                matches!(role, SuperAdmin | AgencyAdmin | Landlord | Agent | Tenant)
            }
        }
    }

    pub fn evaluate(actor: &Actor, action: Action, scope: &ResourceScope) -> Decision {
        if !Self::role_permits(actor.role, action) {
            return Decision::Deny(DenyReason::RoleNotPermitted);
        }

        match actor.role {
            Role::SuperAdmin => Decision::Allow,
            _ if actor.company_id != scope.company_id => {
                Decision::Deny(DenyReason::OutsideCompany)
            }
            Role::Tenant => match (actor.tenant_id, scope.tenant_id) {
                (Some(own), Some(target)) if own == target => Decision::Allow,
                _ => Decision::Deny(DenyReason::NotOwnResource),
            },
            _ => Decision::Allow,
        }
    }

    /// Evaluate and turn a denial into `Forbidden`, logging it for audit.
    pub fn authorize(actor: &Actor, action: Action, scope: &ResourceScope) -> Result<(), AppError> {
        match Self::evaluate(actor, action, scope) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                warn!(
                    user_id = %actor.user_id,
                    role = actor.role.as_str(),
                    actor_company_id = %actor.company_id,
                    target_company_id = %scope.company_id,
                    target_tenant_id = ?scope.tenant_id,
                    action = action.as_str(),
                    reason = reason.as_str(),
                    "Access denied"
                );
                record_policy_denial(action.as_str(), reason.as_str());
                Err(AppError::Forbidden(anyhow::anyhow!("{}", reason)))
            }
        }
    }

    /// Role check for actions with no single target resource yet.
    pub fn authorize_role(actor: &Actor, action: Action) -> Result<(), AppError> {
        let scope = ResourceScope {
            company_id: actor.company_id,
            tenant_id: actor.tenant_id,
        };
        Self::authorize(actor, action, &scope)
    }

    /// Which payments a list query may return for this actor.
    pub fn list_scope(actor: &Actor) -> Result<ListScope, AppError> {
        match actor.role {
            Role::SuperAdmin => Ok(ListScope::AllCompanies),
            Role::Tenant => match actor.tenant_id {
                Some(tenant_id) => Ok(ListScope::Tenant {
                    company_id: actor.company_id,
                    tenant_id,
                }),
                None => Err(AppError::Forbidden(anyhow::anyhow!(
                    "Tenant caller has no tenant identity"
                ))),
            },
            _ => Ok(ListScope::Company(actor.company_id)),
        }
    }
}
