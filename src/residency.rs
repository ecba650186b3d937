//! Workspace memberships and unit tenancies.

use std::str::FromStr;

use chrono::NaiveDate;
use diesel::{
    dsl::exists,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    PgConnection,
};
use tracing::info;
use uuid::Uuid;

use crate::access::{self, MembershipRole};
use crate::error::{DomainError, DomainResult};
use crate::models::{
    ApartmentUnit, NewUnitTenancy, NewWorkspaceMembership, UnitTenancy, WorkspaceMembership,
};
use crate::schema::{unit_tenancies, users, workspace_memberships};

const PRIMARY_RESIDENT_INDEX: &str = "unit_tenancies_primary_resident_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TenancyRole {
    Owner,
    #[default]
    Tenant,
}

impl TenancyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TenancyRole::Owner => "owner",
            TenancyRole::Tenant => "tenant",
        }
    }
}

impl FromStr for TenancyRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(TenancyRole::Owner),
            "tenant" => Ok(TenancyRole::Tenant),
            _ => Err(DomainError::validation(
                "tenancy role must be one of: owner, tenant",
            )),
        }
    }
}

fn ensure_user_exists(conn: &mut PgConnection, user_id: Uuid) -> DomainResult<()> {
    let found: bool = diesel::select(exists(users::table.filter(users::id.eq(user_id))))
        .get_result(conn)?;
    if found {
        Ok(())
    } else {
        Err(DomainError::validation("user does not exist"))
    }
}

pub fn add_member(
    conn: &mut PgConnection,
    workspace_id: Uuid,
    user_id: Uuid,
    role: MembershipRole,
) -> DomainResult<WorkspaceMembership> {
    ensure_user_exists(conn, user_id)?;
    if access::is_workspace_member(conn, user_id, workspace_id)? {
        return Err(DomainError::conflict(
            "this user is already a member of the workspace",
        ));
    }

    let new_membership = NewWorkspaceMembership {
        id: Uuid::new_v4(),
        user_id,
        workspace_id,
        role: role.as_str().to_string(),
    };

    match diesel::insert_into(workspace_memberships::table)
        .values(&new_membership)
        .get_result::<WorkspaceMembership>(conn)
    {
        Ok(membership) => {
            info!(workspace_id = %workspace_id, user_id = %user_id, role = role.as_str(), "member added");
            Ok(membership)
        }
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Err(
            DomainError::conflict("this user is already a member of the workspace"),
        ),
        Err(err) => Err(err.into()),
    }
}

pub fn change_member_role(
    conn: &mut PgConnection,
    membership: &WorkspaceMembership,
    role: MembershipRole,
) -> DomainResult<WorkspaceMembership> {
    Ok(diesel::update(workspace_memberships::table.find(membership.id))
        .set(workspace_memberships::role.eq(role.as_str()))
        .get_result(conn)?)
}

#[derive(Debug, Clone)]
pub struct TenancyDraft {
    pub user_id: Uuid,
    pub role: TenancyRole,
    pub is_primary_resident: bool,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
}

fn primary_resident_taken(
    conn: &mut PgConnection,
    unit_id: Uuid,
    except: Option<Uuid>,
) -> DomainResult<bool> {
    let mut query = unit_tenancies::table
        .filter(unit_tenancies::unit_id.eq(unit_id))
        .filter(unit_tenancies::is_primary_resident.eq(true))
        .select(unit_tenancies::id)
        .into_boxed();
    if let Some(except) = except {
        query = query.filter(unit_tenancies::id.ne(except));
    }
    Ok(query.first::<Uuid>(conn).optional()?.is_some())
}

fn map_tenancy_violation(err: DieselError) -> DomainError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
            if info.constraint_name() == Some(PRIMARY_RESIDENT_INDEX) =>
        {
            DomainError::validation("this unit already has a primary resident")
        }
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            DomainError::conflict("this user already has a tenancy for this unit")
        }
        other => other.into(),
    }
}

fn validate_lease(start: Option<NaiveDate>, end: Option<NaiveDate>) -> DomainResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(DomainError::validation(
            "lease_end_date must not be before lease_start_date",
        )),
        _ => Ok(()),
    }
}

/// A tenant must already belong to the unit's workspace; each unit has at most
/// one primary resident.
pub fn add_tenancy(
    conn: &mut PgConnection,
    unit: &ApartmentUnit,
    draft: TenancyDraft,
) -> DomainResult<UnitTenancy> {
    ensure_user_exists(conn, draft.user_id)?;
    if !access::is_workspace_member(conn, draft.user_id, unit.workspace_id)? {
        return Err(DomainError::validation(
            "user must be a member of the unit's workspace",
        ));
    }
    validate_lease(draft.lease_start_date, draft.lease_end_date)?;

    let duplicate: bool = diesel::select(exists(
        unit_tenancies::table
            .filter(unit_tenancies::unit_id.eq(unit.id))
            .filter(unit_tenancies::user_id.eq(draft.user_id)),
    ))
    .get_result(conn)?;
    if duplicate {
        return Err(DomainError::conflict(
            "this user already has a tenancy for this unit",
        ));
    }
    if draft.is_primary_resident && primary_resident_taken(conn, unit.id, None)? {
        return Err(DomainError::validation(
            "this unit already has a primary resident",
        ));
    }

    let tenancy: UnitTenancy = diesel::insert_into(unit_tenancies::table)
        .values(&NewUnitTenancy {
            id: Uuid::new_v4(),
            user_id: draft.user_id,
            unit_id: unit.id,
            role: draft.role.as_str().to_string(),
            is_primary_resident: draft.is_primary_resident,
            lease_start_date: draft.lease_start_date,
            lease_end_date: draft.lease_end_date,
        })
        .get_result(conn)
        .map_err(map_tenancy_violation)?;

    info!(tenancy_id = %tenancy.id, unit_id = %unit.id, user_id = %tenancy.user_id, "tenancy created");
    Ok(tenancy)
}

#[derive(AsChangeset, Default, Debug)]
#[diesel(table_name = unit_tenancies)]
pub struct TenancyChanges {
    pub role: Option<String>,
    pub is_primary_resident: Option<bool>,
    pub lease_start_date: Option<Option<NaiveDate>>,
    pub lease_end_date: Option<Option<NaiveDate>>,
}

impl TenancyChanges {
    fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.is_primary_resident.is_none()
            && self.lease_start_date.is_none()
            && self.lease_end_date.is_none()
    }
}

pub fn update_tenancy(
    conn: &mut PgConnection,
    tenancy: &UnitTenancy,
    changes: TenancyChanges,
) -> DomainResult<UnitTenancy> {
    if changes.is_empty() {
        return Ok(tenancy.clone());
    }
    if let Some(role) = &changes.role {
        TenancyRole::from_str(role)?;
    }
    validate_lease(
        changes.lease_start_date.unwrap_or(tenancy.lease_start_date),
        changes.lease_end_date.unwrap_or(tenancy.lease_end_date),
    )?;
    if changes.is_primary_resident == Some(true)
        && !tenancy.is_primary_resident
        && primary_resident_taken(conn, tenancy.unit_id, Some(tenancy.id))?
    {
        return Err(DomainError::validation(
            "this unit already has a primary resident",
        ));
    }

    diesel::update(unit_tenancies::table.find(tenancy.id))
        .set(&changes)
        .get_result(conn)
        .map_err(map_tenancy_violation)
}
