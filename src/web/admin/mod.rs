//! Admin API handlers.
//!
//! Reads accept staff (`StaffUser`); writes require `AdminUser`. Both return
//! 401/403 as needed.

pub mod courts;
pub mod sessions;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, trace};
use ts_rs::TS;
use uuid::Uuid;

use crate::data::bookings::{self, BookingFilter};
use crate::data::models::{AppRole, Booking};
use crate::data::profiles::{self, ProfileListParams, ProfileWithRoles};
use crate::data::{accounts, kv, roles, sessions as session_rows, user_sessions};
use crate::maintenance::KV_LAST_SWEEP;
use crate::state::{AppState, ServiceStatus};
use crate::web::auth::extractors::{AdminUser, StaffUser};
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdminServiceInfo {
    name: String,
    status: ServiceStatus,
    #[ts(type = "number")]
    reported_secs_ago: u64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdminStatusResponse {
    #[ts(type = "number")]
    member_count: i64,
    #[ts(type = "number")]
    active_session_count: i64,
    #[ts(type = "number")]
    upcoming_booking_count: i64,
    #[ts(type = "number")]
    upcoming_group_session_count: i64,
    #[ts(type = "number")]
    cached_sessions: usize,
    payments_enabled: bool,
    last_maintenance_sweep: Option<DateTime<Utc>>,
    services: Vec<AdminServiceInfo>,
}

/// `GET /api/admin/status`: facility and system overview.
#[instrument(skip_all)]
pub async fn admin_status(
    StaffUser(_user): StaffUser,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ApiError> {
    let pool = &state.db_pool;
    let member_count = accounts::count(pool)
        .await
        .map_err(|e| db_error("Account count", e))?;
    let active_session_count = user_sessions::count_active(pool)
        .await
        .map_err(|e| db_error("Session count", e))?;
    let upcoming_booking_count = bookings::count_upcoming(pool)
        .await
        .map_err(|e| db_error("Booking count", e))?;
    let upcoming_group_session_count = session_rows::count_upcoming(pool)
        .await
        .map_err(|e| db_error("Group session count", e))?;
    let last_maintenance_sweep = kv::get_timestamp(pool, KV_LAST_SWEEP)
        .await
        .map_err(|e| db_error("Maintenance timestamp", e.into()))?;

    let services: Vec<AdminServiceInfo> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status, reported_secs_ago)| AdminServiceInfo {
            name,
            status,
            reported_secs_ago,
        })
        .collect();

    trace!(
        member_count,
        active_session_count,
        upcoming_booking_count,
        service_count = services.len(),
        "Fetched admin status"
    );

    Ok(Json(AdminStatusResponse {
        member_count,
        active_session_count,
        upcoming_booking_count,
        upcoming_group_session_count,
        cached_sessions: state.session_cache.len(),
        payments_enabled: state.stripe.is_some(),
        last_maintenance_sweep,
        services,
    }))
}

/// `GET /api/admin/users?search=&limit=&offset=`
#[instrument(skip_all)]
pub async fn list_users(
    StaffUser(_user): StaffUser,
    State(state): State<AppState>,
    Query(params): Query<ProfileListParams>,
) -> Result<Json<Vec<ProfileWithRoles>>, ApiError> {
    let users = profiles::list_with_roles(&state.db_pool, &params)
        .await
        .map_err(|e| db_error("User list", e))?;

    trace!(count = users.len(), "Listed users");
    Ok(Json(users))
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct SetRoleBody {
    pub role: AppRole,
    pub granted: bool,
}

/// `PUT /api/admin/users/{id}/role`: grant or revoke a role.
#[instrument(skip_all, fields(target = %id))]
pub async fn set_user_role(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetRoleBody>,
) -> Result<Json<ProfileWithRoles>, ApiError> {
    if id == admin.id && body.role == AppRole::Admin && !body.granted {
        return Err(ApiError::conflict("Admins cannot remove their own admin role"));
    }
    let profile = profiles::get(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Profile lookup", e))?
        .or_not_found("User", id)?;

    if body.granted {
        roles::grant(&state.db_pool, id, body.role)
            .await
            .map_err(|e| db_error("Role grant", e))?;
    } else {
        roles::revoke(&state.db_pool, id, body.role)
            .await
            .map_err(|e| db_error("Role revoke", e))?;
    }
    state.session_cache.evict_user(id);

    info!(
        by = %admin.id,
        role = ?body.role,
        granted = body.granted,
        "Updated user role"
    );

    let roles = roles::for_user(&state.db_pool, id)
        .await
        .map_err(|e| db_error("Role lookup", e))?;
    Ok(Json(ProfileWithRoles { profile, roles }))
}

/// `GET /api/admin/bookings?from=&to=&status=&court_id=`
#[instrument(skip_all)]
pub async fn list_bookings(
    StaffUser(_user): StaffUser,
    State(state): State<AppState>,
    Query(filter): Query<BookingFilter>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    if let (Some(from), Some(to)) = (filter.from, filter.to)
        && to <= from
    {
        return Err(ApiError::bad_request("`to` must be after `from`"));
    }
    let bookings = bookings::list(&state.db_pool, &filter)
        .await
        .map_err(|e| db_error("Booking list", e))?;
    trace!(count = bookings.len(), "Listed bookings");
    Ok(Json(bookings))
}
