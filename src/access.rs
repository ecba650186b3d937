//! Workspace-scoped authorization.
//!
//! Every handler that touches a workspace, or anything nested below one,
//! resolves the owning workspace first and then asks [`decide`] whether the
//! principal may perform the requested [`WorkspaceAction`]. The decision is a
//! value, not an error, so list endpoints can degrade to empty results while
//! single-object endpoints turn it into NotFound or Forbidden.

use std::str::FromStr;

use diesel::{dsl::exists, prelude::*, PgConnection};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::models::{ApartmentUnit, Complaint, UnitTenancy, Workspace};
use crate::schema::{apartment_units, complaints, unit_tenancies, workspace_memberships, workspaces};

/// The authenticated caller as seen by access checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipRole {
    Resident,
    Admin,
}

impl MembershipRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipRole::Resident => "resident",
            MembershipRole::Admin => "admin",
        }
    }
}

impl FromStr for MembershipRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resident" => Ok(MembershipRole::Resident),
            "admin" => Ok(MembershipRole::Admin),
            _ => Err(DomainError::validation(
                "membership role must be one of: resident, admin",
            )),
        }
    }
}

/// How a user relates to one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkspaceRelation {
    pub is_owner: bool,
    pub membership: Option<MembershipRole>,
}

impl WorkspaceRelation {
    pub fn is_member(&self) -> bool {
        self.membership.is_some()
    }

    pub fn is_owner_or_admin(&self) -> bool {
        self.is_owner || self.membership == Some(MembershipRole::Admin)
    }

    pub fn is_related(&self) -> bool {
        self.is_owner || self.is_member()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceAction {
    View,
    Mutate,
    DeleteWorkspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// The principal can see the target but may not perform the action.
    Deny,
    /// The target does not exist or the principal has no relation to it.
    Hidden,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == AccessDecision::Allow
    }

    pub fn into_result(self, what: &'static str) -> DomainResult<()> {
        match self {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny => Err(DomainError::forbidden(format!(
                "you do not have permission to modify this {what}"
            ))),
            AccessDecision::Hidden => Err(DomainError::NotFound(what)),
        }
    }
}

/// `relation` is `None` when the workspace itself could not be resolved.
pub fn decide(
    principal: &Principal,
    relation: Option<&WorkspaceRelation>,
    action: WorkspaceAction,
) -> AccessDecision {
    let Some(relation) = relation else {
        return AccessDecision::Hidden;
    };

    if principal.is_superuser {
        return AccessDecision::Allow;
    }

    if !relation.is_related() {
        return AccessDecision::Hidden;
    }

    let permitted = match action {
        WorkspaceAction::View => true,
        WorkspaceAction::Mutate => relation.is_owner_or_admin(),
        WorkspaceAction::DeleteWorkspace => relation.is_owner,
    };

    if permitted {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny
    }
}

/// Which rows of a workspace-scoped collection a principal may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    All,
    Own(Uuid),
}

impl ListScope {
    pub fn includes(self, author: Option<Uuid>) -> bool {
        match self {
            ListScope::All => true,
            ListScope::Own(user_id) => author == Some(user_id),
        }
    }
}

pub fn list_scope(principal: &Principal, relation: &WorkspaceRelation) -> Option<ListScope> {
    if principal.is_superuser || relation.is_owner_or_admin() {
        Some(ListScope::All)
    } else if relation.is_member() {
        Some(ListScope::Own(principal.user_id))
    } else {
        None
    }
}

/// A workspace the principal is allowed to act on, with the relation that
/// justified it.
#[derive(Debug, Clone)]
pub struct WorkspaceAccess {
    pub principal: Principal,
    pub workspace: Workspace,
    pub relation: WorkspaceRelation,
}

impl WorkspaceAccess {
    pub fn can(&self, action: WorkspaceAction) -> bool {
        decide(&self.principal, Some(&self.relation), action).is_allowed()
    }

    pub fn require(&self, action: WorkspaceAction, what: &'static str) -> DomainResult<()> {
        decide(&self.principal, Some(&self.relation), action).into_result(what)
    }

    pub fn scope(&self) -> ListScope {
        list_scope(&self.principal, &self.relation).unwrap_or(ListScope::Own(self.principal.user_id))
    }

    /// Owners and admins may modify anything in the workspace; everyone else
    /// only what they authored.
    pub fn can_modify_authored(&self, author: Option<Uuid>) -> bool {
        self.can(WorkspaceAction::Mutate) || author == Some(self.principal.user_id)
    }
}

pub fn load_relation(
    conn: &mut PgConnection,
    user_id: Uuid,
    workspace: &Workspace,
) -> DomainResult<WorkspaceRelation> {
    let role: Option<String> = workspace_memberships::table
        .filter(workspace_memberships::user_id.eq(user_id))
        .filter(workspace_memberships::workspace_id.eq(workspace.id))
        .select(workspace_memberships::role)
        .first(conn)
        .optional()?;

    Ok(WorkspaceRelation {
        is_owner: workspace.owner_id == Some(user_id),
        membership: role.as_deref().map(MembershipRole::from_str).transpose()?,
    })
}

pub fn is_workspace_member(
    conn: &mut PgConnection,
    user_id: Uuid,
    workspace_id: Uuid,
) -> DomainResult<bool> {
    let member = diesel::select(exists(
        workspace_memberships::table
            .filter(workspace_memberships::user_id.eq(user_id))
            .filter(workspace_memberships::workspace_id.eq(workspace_id)),
    ))
    .get_result(conn)?;
    Ok(member)
}

pub fn is_owner_or_admin(
    conn: &mut PgConnection,
    user_id: Uuid,
    workspace_id: Uuid,
) -> DomainResult<bool> {
    let owner: bool = diesel::select(exists(
        workspaces::table
            .filter(workspaces::id.eq(workspace_id))
            .filter(workspaces::owner_id.eq(user_id)),
    ))
    .get_result(conn)?;
    if owner {
        return Ok(true);
    }

    let admin = diesel::select(exists(
        workspace_memberships::table
            .filter(workspace_memberships::user_id.eq(user_id))
            .filter(workspace_memberships::workspace_id.eq(workspace_id))
            .filter(workspace_memberships::role.eq(MembershipRole::Admin.as_str())),
    ))
    .get_result(conn)?;
    Ok(admin)
}

pub fn evaluate(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
    action: WorkspaceAction,
) -> DomainResult<AccessDecision> {
    let workspace: Option<Workspace> = workspaces::table
        .find(workspace_id)
        .first(conn)
        .optional()?;
    let relation = match &workspace {
        Some(workspace) => Some(load_relation(conn, principal.user_id, workspace)?),
        None => None,
    };
    Ok(decide(principal, relation.as_ref(), action))
}

pub fn can_view(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
) -> DomainResult<bool> {
    Ok(evaluate(conn, principal, workspace_id, WorkspaceAction::View)?.is_allowed())
}

pub fn can_mutate(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
) -> DomainResult<bool> {
    Ok(evaluate(conn, principal, workspace_id, WorkspaceAction::Mutate)?.is_allowed())
}

pub fn can_delete_workspace(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
) -> DomainResult<bool> {
    Ok(evaluate(conn, principal, workspace_id, WorkspaceAction::DeleteWorkspace)?.is_allowed())
}

pub fn authorize(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
    action: WorkspaceAction,
) -> DomainResult<WorkspaceAccess> {
    let workspace: Workspace = workspaces::table
        .find(workspace_id)
        .first(conn)
        .optional()?
        .ok_or(DomainError::NotFound("workspace"))?;
    let relation = load_relation(conn, principal.user_id, &workspace)?;

    decide(principal, Some(&relation), action).into_result("workspace")?;

    Ok(WorkspaceAccess {
        principal: *principal,
        workspace,
        relation,
    })
}

/// Visibility check for list endpoints: `None` means "return nothing".
pub fn scope_for(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
) -> DomainResult<Option<WorkspaceAccess>> {
    match authorize(conn, principal, workspace_id, WorkspaceAction::View) {
        Ok(access) => Ok(Some(access)),
        Err(DomainError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub fn workspace_of_unit(conn: &mut PgConnection, unit_id: Uuid) -> DomainResult<Option<Uuid>> {
    Ok(apartment_units::table
        .find(unit_id)
        .select(apartment_units::workspace_id)
        .first(conn)
        .optional()?)
}

pub fn workspace_of_complaint(
    conn: &mut PgConnection,
    complaint_id: Uuid,
) -> DomainResult<Option<Uuid>> {
    Ok(complaints::table
        .find(complaint_id)
        .select(complaints::workspace_id)
        .first(conn)
        .optional()?)
}

pub fn workspace_of_tenancy(
    conn: &mut PgConnection,
    tenancy_id: Uuid,
) -> DomainResult<Option<Uuid>> {
    Ok(unit_tenancies::table
        .inner_join(apartment_units::table)
        .filter(unit_tenancies::id.eq(tenancy_id))
        .select(apartment_units::workspace_id)
        .first(conn)
        .optional()?)
}

/// Resolves a unit addressed below `workspace_id`; a unit that lives in a
/// different workspace is reported as missing.
pub fn authorize_unit(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
    unit_id: Uuid,
    action: WorkspaceAction,
) -> DomainResult<(WorkspaceAccess, ApartmentUnit)> {
    if workspace_of_unit(conn, unit_id)? != Some(workspace_id) {
        return Err(DomainError::NotFound("apartment unit"));
    }
    let access = authorize(conn, principal, workspace_id, WorkspaceAction::View)?;
    access.require(action, "apartment unit")?;
    let unit = apartment_units::table.find(unit_id).first(conn)?;
    Ok((access, unit))
}

pub fn authorize_tenancy(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
    unit_id: Uuid,
    tenancy_id: Uuid,
    action: WorkspaceAction,
) -> DomainResult<(WorkspaceAccess, ApartmentUnit, UnitTenancy)> {
    if workspace_of_tenancy(conn, tenancy_id)? != Some(workspace_id) {
        return Err(DomainError::NotFound("tenancy"));
    }
    let (access, unit) = authorize_unit(conn, principal, workspace_id, unit_id, action)?;
    let tenancy: UnitTenancy = unit_tenancies::table.find(tenancy_id).first(conn)?;
    if tenancy.unit_id != unit.id {
        return Err(DomainError::NotFound("tenancy"));
    }
    Ok((access, unit, tenancy))
}

/// Resolves a complaint addressed below `workspace_id`. Residents only see
/// complaints they filed; anything else is reported as missing.
pub fn authorize_complaint(
    conn: &mut PgConnection,
    principal: &Principal,
    workspace_id: Uuid,
    complaint_id: Uuid,
) -> DomainResult<(WorkspaceAccess, Complaint)> {
    if workspace_of_complaint(conn, complaint_id)? != Some(workspace_id) {
        return Err(DomainError::NotFound("complaint"));
    }
    let access = authorize(conn, principal, workspace_id, WorkspaceAction::View)?;
    let complaint: Complaint = complaints::table.find(complaint_id).first(conn)?;
    if !access.scope().includes(Some(complaint.user_id)) {
        return Err(DomainError::NotFound("complaint"));
    }
    Ok((access, complaint))
}
