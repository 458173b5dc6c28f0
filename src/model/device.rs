use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client installation, keyed by the identifier the app generates on first launch.
///
/// Devices are upserted on every authenticated interaction and never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: Uuid,
    pub device_identifier: String,
    pub platform: String,
    pub system_version: String,
    #[serde(default)]
    pub firebase_cloud_messaging_id: Option<String>,
    pub model: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}
