use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity anchor. Only the fields the session subsystem reads are modelled here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String, // unique, normalised to lower case
    pub alias: String,
    pub full_name: String,
    #[serde(default)]
    pub is_legal_age: bool,
    pub create_time: DateTime<Utc>,
}
