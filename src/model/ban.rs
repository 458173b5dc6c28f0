use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A ban on an account, addressed by email, user id, or both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BannedUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>, // None = permanent
}

/// A ban on a device, addressed by natural identifier, surrogate id, or both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BannedDevice {
    pub id: Uuid,
    #[serde(default)]
    pub device_identifier: Option<String>,
    #[serde(default)]
    pub device_id: Option<Uuid>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
}

fn in_force(expiration_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    expiration_time.map_or(true, |expires| expires > now)
}

impl BannedUser {
    pub fn in_force(&self, now: DateTime<Utc>) -> bool {
        in_force(self.expiration_time, now)
    }
}

impl BannedDevice {
    pub fn in_force(&self, now: DateTime<Utc>) -> bool {
        in_force(self.expiration_time, now)
    }
}
