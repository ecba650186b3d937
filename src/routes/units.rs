use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, WorkspaceAction};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{ApartmentUnit, NewApartmentUnit, UnitTenancy};
use crate::residency::{self, TenancyChanges, TenancyDraft, TenancyRole};
use crate::routes::to_iso;
use crate::schema::{apartment_units, unit_tenancies};
use crate::state::AppState;
use crate::utils::json::{classify_nullable, NullableValue};

/// Parses a non-negative decimal amount with at most two fraction digits into
/// cents.
fn parse_rent(value: &str) -> Result<i64, String> {
    let value = value.trim();
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    let digits_only = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !digits_only(whole) || !digits_only(fraction) || fraction.len() > 2 {
        return Err(format!(
            "rent_amount must be a decimal with at most two fraction digits, got {value:?}"
        ));
    }

    let whole: i64 = whole
        .parse()
        .map_err(|_| "rent_amount is too large".to_string())?;
    let cents: i64 = format!("{fraction:0<2}")
        .parse()
        .map_err(|_| "rent_amount is invalid".to_string())?;
    whole
        .checked_mul(100)
        .and_then(|amount| amount.checked_add(cents))
        .ok_or_else(|| "rent_amount is too large".to_string())
}

fn format_rent(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn non_negative(field: &str, value: Option<i32>) -> AppResult<Option<i32>> {
    match value {
        Some(v) if v < 0 => Err(AppError::bad_request(format!(
            "{field} must not be negative"
        ))),
        other => Ok(other),
    }
}

#[derive(Serialize)]
pub struct UnitResponse {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub unit_number: String,
    pub rent_amount: Option<String>,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
    pub square_footage: Option<i32>,
    pub number_of_bedrooms: Option<i32>,
    pub number_of_bathrooms: Option<f64>,
    pub is_occupied: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ApartmentUnit> for UnitResponse {
    fn from(unit: ApartmentUnit) -> Self {
        Self {
            id: unit.id,
            workspace_id: unit.workspace_id,
            unit_number: unit.unit_number,
            rent_amount: unit.rent_amount_cents.map(format_rent),
            lease_start_date: unit.lease_start_date,
            lease_end_date: unit.lease_end_date,
            square_footage: unit.square_footage,
            number_of_bedrooms: unit.number_of_bedrooms,
            number_of_bathrooms: unit.number_of_bathrooms,
            is_occupied: unit.is_occupied,
            created_at: to_iso(unit.created_at),
            updated_at: to_iso(unit.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct TenancyResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub unit_id: Uuid,
    pub role: String,
    pub is_primary_resident: bool,
    pub lease_start_date: Option<NaiveDate>,
    pub lease_end_date: Option<NaiveDate>,
    pub created_at: String,
}

impl From<UnitTenancy> for TenancyResponse {
    fn from(tenancy: UnitTenancy) -> Self {
        Self {
            id: tenancy.id,
            user_id: tenancy.user_id,
            unit_id: tenancy.unit_id,
            role: tenancy.role,
            is_primary_resident: tenancy.is_primary_resident,
            lease_start_date: tenancy.lease_start_date,
            lease_end_date: tenancy.lease_end_date,
            created_at: to_iso(tenancy.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateUnitRequest {
    pub unit_number: String,
    #[serde(default)]
    pub rent_amount: Option<String>,
    #[serde(default)]
    pub lease_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub lease_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub square_footage: Option<i32>,
    #[serde(default)]
    pub number_of_bedrooms: Option<i32>,
    #[serde(default)]
    pub number_of_bathrooms: Option<f64>,
    #[serde(default)]
    pub is_occupied: bool,
}

pub async fn list_units(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Json<Vec<UnitResponse>>> {
    let mut conn = state.db()?;
    if access::scope_for(&mut conn, &user.principal(), workspace_id)?.is_none() {
        return Ok(Json(Vec::new()));
    }

    let units: Vec<ApartmentUnit> = apartment_units::table
        .filter(apartment_units::workspace_id.eq(workspace_id))
        .order(apartment_units::unit_number.asc())
        .load(&mut conn)?;
    Ok(Json(units.into_iter().map(Into::into).collect()))
}

pub async fn create_unit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<CreateUnitRequest>,
) -> AppResult<(StatusCode, Json<UnitResponse>)> {
    let mut conn = state.db()?;
    access::authorize(
        &mut conn,
        &user.principal(),
        workspace_id,
        WorkspaceAction::Mutate,
    )?;

    let unit_number = payload.unit_number.trim();
    if unit_number.is_empty() {
        return Err(AppError::bad_request("unit_number must not be empty"));
    }
    let rent_amount_cents = payload
        .rent_amount
        .as_deref()
        .map(parse_rent)
        .transpose()
        .map_err(AppError::bad_request)?;

    let new_unit = NewApartmentUnit {
        id: Uuid::new_v4(),
        workspace_id,
        unit_number: unit_number.to_string(),
        rent_amount_cents,
        lease_start_date: payload.lease_start_date,
        lease_end_date: payload.lease_end_date,
        square_footage: non_negative("square_footage", payload.square_footage)?,
        number_of_bedrooms: non_negative("number_of_bedrooms", payload.number_of_bedrooms)?,
        number_of_bathrooms: payload.number_of_bathrooms,
        is_occupied: payload.is_occupied,
    };

    let unit: ApartmentUnit = match diesel::insert_into(apartment_units::table)
        .values(&new_unit)
        .get_result(&mut conn)
    {
        Ok(unit) => unit,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            return Err(AppError::conflict(
                "a unit with this number already exists in the workspace",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    info!(unit_id = %unit.id, workspace_id = %workspace_id, "unit created");
    Ok((StatusCode::CREATED, Json(unit.into())))
}

pub async fn get_unit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<UnitResponse>> {
    let mut conn = state.db()?;
    let (_, unit) = access::authorize_unit(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        WorkspaceAction::View,
    )?;
    Ok(Json(unit.into()))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = apartment_units)]
struct UpdateUnitChangeset {
    unit_number: Option<String>,
    rent_amount_cents: Option<Option<i64>>,
    lease_start_date: Option<Option<NaiveDate>>,
    lease_end_date: Option<Option<NaiveDate>>,
    square_footage: Option<Option<i32>>,
    number_of_bedrooms: Option<Option<i32>>,
    number_of_bathrooms: Option<Option<f64>>,
    is_occupied: Option<bool>,
}

pub async fn update_unit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<Value>,
) -> AppResult<Json<UnitResponse>> {
    let mut conn = state.db()?;
    let (_, unit) = access::authorize_unit(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        WorkspaceAction::Mutate,
    )?;

    let rent_amount_cents = match classify_nullable::<String>(&body, "rent_amount")
        .map_err(AppError::bad_request)?
    {
        NullableValue::Omitted => None,
        NullableValue::Null => Some(None),
        NullableValue::Value(value) => Some(Some(parse_rent(&value).map_err(AppError::bad_request)?)),
    };

    let changes = UpdateUnitChangeset {
        unit_number: classify_nullable::<String>(&body, "unit_number")
            .and_then(|value| value.required("unit_number"))
            .map_err(AppError::bad_request)?
            .map(|number| number.trim().to_string()),
        rent_amount_cents,
        lease_start_date: classify_nullable(&body, "lease_start_date")
            .map_err(AppError::bad_request)?
            .into_change(),
        lease_end_date: classify_nullable(&body, "lease_end_date")
            .map_err(AppError::bad_request)?
            .into_change(),
        square_footage: classify_nullable::<i32>(&body, "square_footage")
            .map_err(AppError::bad_request)?
            .into_change()
            .map(|value| non_negative("square_footage", value))
            .transpose()?,
        number_of_bedrooms: classify_nullable::<i32>(&body, "number_of_bedrooms")
            .map_err(AppError::bad_request)?
            .into_change()
            .map(|value| non_negative("number_of_bedrooms", value))
            .transpose()?,
        number_of_bathrooms: classify_nullable(&body, "number_of_bathrooms")
            .map_err(AppError::bad_request)?
            .into_change(),
        is_occupied: classify_nullable(&body, "is_occupied")
            .and_then(|value| value.required("is_occupied"))
            .map_err(AppError::bad_request)?,
    };
    if changes.unit_number.as_deref() == Some("") {
        return Err(AppError::bad_request("unit_number must not be empty"));
    }

    let nothing_to_change = changes.unit_number.is_none()
        && changes.rent_amount_cents.is_none()
        && changes.lease_start_date.is_none()
        && changes.lease_end_date.is_none()
        && changes.square_footage.is_none()
        && changes.number_of_bedrooms.is_none()
        && changes.number_of_bathrooms.is_none()
        && changes.is_occupied.is_none();
    if nothing_to_change {
        return Ok(Json(unit.into()));
    }

    match diesel::update(apartment_units::table.find(unit.id))
        .set((&changes, apartment_units::updated_at.eq(Utc::now().naive_utc())))
        .get_result::<ApartmentUnit>(&mut conn)
    {
        Ok(updated) => Ok(Json(updated.into())),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => Err(AppError::conflict(
            "a unit with this number already exists in the workspace",
        )),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn delete_unit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (_, unit) = access::authorize_unit(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        WorkspaceAction::Mutate,
    )?;

    diesel::delete(apartment_units::table.find(unit.id)).execute(&mut conn)?;
    info!(unit_id = %unit.id, workspace_id = %workspace_id, "unit deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_tenancies(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<TenancyResponse>>> {
    let mut conn = state.db()?;
    let (_, unit) = access::authorize_unit(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        WorkspaceAction::View,
    )?;

    let tenancies: Vec<UnitTenancy> = unit_tenancies::table
        .filter(unit_tenancies::unit_id.eq(unit.id))
        .order(unit_tenancies::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(tenancies.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize)]
pub struct CreateTenancyRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_primary_resident: bool,
    #[serde(default)]
    pub lease_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub lease_end_date: Option<NaiveDate>,
}

pub async fn create_tenancy(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CreateTenancyRequest>,
) -> AppResult<(StatusCode, Json<TenancyResponse>)> {
    let mut conn = state.db()?;
    let (_, unit) = access::authorize_unit(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        WorkspaceAction::Mutate,
    )?;

    let role = match payload.role.as_deref() {
        Some(role) => role.parse::<TenancyRole>()?,
        None => TenancyRole::default(),
    };
    let draft = TenancyDraft {
        user_id: payload.user_id,
        role,
        is_primary_resident: payload.is_primary_resident,
        lease_start_date: payload.lease_start_date,
        lease_end_date: payload.lease_end_date,
    };

    let tenancy = conn.transaction(|conn| residency::add_tenancy(conn, &unit, draft))?;
    Ok((StatusCode::CREATED, Json(tenancy.into())))
}

pub async fn update_tenancy(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id, tenancy_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(body): Json<Value>,
) -> AppResult<Json<TenancyResponse>> {
    let mut conn = state.db()?;
    let (_, _, tenancy) = access::authorize_tenancy(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        tenancy_id,
        WorkspaceAction::Mutate,
    )?;

    let changes = TenancyChanges {
        role: classify_nullable::<String>(&body, "role")
            .and_then(|value| value.required("role"))
            .map_err(AppError::bad_request)?
            .map(|role| role.trim().to_ascii_lowercase()),
        is_primary_resident: classify_nullable(&body, "is_primary_resident")
            .and_then(|value| value.required("is_primary_resident"))
            .map_err(AppError::bad_request)?,
        lease_start_date: classify_nullable(&body, "lease_start_date")
            .map_err(AppError::bad_request)?
            .into_change(),
        lease_end_date: classify_nullable(&body, "lease_end_date")
            .map_err(AppError::bad_request)?
            .into_change(),
    };

    let updated = conn.transaction(|conn| residency::update_tenancy(conn, &tenancy, changes))?;
    Ok(Json(updated.into()))
}

pub async fn delete_tenancy(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((workspace_id, unit_id, tenancy_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (_, _, tenancy) = access::authorize_tenancy(
        &mut conn,
        &user.principal(),
        workspace_id,
        unit_id,
        tenancy_id,
        WorkspaceAction::Mutate,
    )?;

    diesel::delete(unit_tenancies::table.find(tenancy.id)).execute(&mut conn)?;
    info!(tenancy_id = %tenancy.id, unit_id = %unit_id, "tenancy removed");
    Ok(StatusCode::NO_CONTENT)
}
