use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::repository::{BannedDeviceFilter, BannedUserFilter, CredentialStore, UnitOfWork};

/// Identity fields to check against the ban tables. Unset fields are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct BanQuery<'a> {
    email: Option<&'a str>,
    user_id: Option<Uuid>,
    device_identifier: Option<&'a str>,
    device_id: Option<Uuid>,
}

impl<'a> BanQuery<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email(mut self, email: &'a str) -> Self {
        self.email = Some(email);
        self
    }

    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn device_identifier(mut self, device_identifier: &'a str) -> Self {
        self.device_identifier = Some(device_identifier);
        self
    }

    pub fn device_id(mut self, device_id: Uuid) -> Self {
        self.device_id = Some(device_id);
        self
    }
}

/// Fails with `Banned` if any supplied identity has a ban in force at `now`.
/// Bans are read from the store, never from the cache.
pub fn ensure_not_banned(
    store: &CredentialStore,
    uow: &UnitOfWork<'_>,
    query: &BanQuery<'_>,
    now: DateTime<Utc>,
) -> AuthResult<()> {
    let mut user_filters = Vec::new();
    if let Some(email) = query.email {
        user_filters.push(BannedUserFilter::Email(email.to_string()));
    }
    if let Some(user_id) = query.user_id {
        user_filters.push(BannedUserFilter::UserId(user_id));
    }
    for filter in &user_filters {
        if store
            .banned_users
            .list(uow, filter)?
            .iter()
            .any(|ban| ban.in_force(now))
        {
            info!(email = ?query.email, user_id = ?query.user_id, "rejected banned user");
            return Err(AuthError::Banned);
        }
    }

    let mut device_filters = Vec::new();
    if let Some(identifier) = query.device_identifier {
        device_filters.push(BannedDeviceFilter::DeviceIdentifier(identifier.to_string()));
    }
    if let Some(device_id) = query.device_id {
        device_filters.push(BannedDeviceFilter::DeviceId(device_id));
    }
    for filter in &device_filters {
        if store
            .banned_devices
            .list(uow, filter)?
            .iter()
            .any(|ban| ban.in_force(now))
        {
            info!(
                device_identifier = ?query.device_identifier,
                device_id = ?query.device_id,
                "rejected banned device"
            );
            return Err(AuthError::Banned);
        }
    }

    Ok(())
}
