//! Member profile handlers.

use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use ts_rs::TS;

use crate::booking::pricing;
use crate::data::models::{MembershipTier, Profile};
use crate::data::profiles::{self, ProfileUpdate};
use crate::state::AppState;
use crate::web::auth::extractors::AuthUser;
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};

const MAX_FIELD_LEN: usize = 120;

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: Profile,
    pub effective_tier: MembershipTier,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            effective_tier: pricing::effective_tier(&profile, Utc::now()),
            profile,
        }
    }
}

/// Trim each field; reject overlong values. Empty strings clear nothing.
fn sanitize(update: ProfileUpdate) -> Result<ProfileUpdate, ApiError> {
    let clean = |value: Option<String>, field: &str| -> Result<Option<String>, ApiError> {
        let Some(value) = value else { return Ok(None) };
        let trimmed = value.trim();
        if trimmed.chars().count() > MAX_FIELD_LEN {
            return Err(ApiError::bad_request(format!(
                "{field} must be at most {MAX_FIELD_LEN} characters"
            )));
        }
        Ok(Some(trimmed.to_owned()).filter(|v| !v.is_empty()))
    };
    Ok(ProfileUpdate {
        full_name: clean(update.full_name, "fullName")?,
        phone: clean(update.phone, "phone")?,
        skill_level: clean(update.skill_level, "skillLevel")?,
    })
}

/// `GET /api/profile`
pub async fn get_profile(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = profiles::get(&state.db_pool, user.id)
        .await
        .map_err(|e| db_error("Profile lookup", e))?
        .or_not_found("Profile", user.id)?;
    Ok(Json(profile.into()))
}

/// `PUT /api/profile`
pub async fn update_profile(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let update = sanitize(body)?;
    let profile = profiles::update(&state.db_pool, user.id, &update)
        .await
        .map_err(|e| db_error("Profile update", e))?
        .or_not_found("Profile", user.id)?;
    info!(user_id = %user.id, "Profile updated");
    Ok(Json(profile.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_trims_and_drops_blanks() {
        let update = sanitize(ProfileUpdate {
            full_name: Some("  Dana Reyes ".into()),
            phone: Some("   ".into()),
            skill_level: None,
        })
        .unwrap();
        assert_eq!(update.full_name.as_deref(), Some("Dana Reyes"));
        assert_eq!(update.phone, None);
        assert_eq!(update.skill_level, None);
    }

    #[test]
    fn sanitize_rejects_long_values() {
        let err = sanitize(ProfileUpdate {
            skill_level: Some("x".repeat(MAX_FIELD_LEN + 1)),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.message.contains("skillLevel"));
    }
}
