use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerificationCodeType {
    SignIn,
    SignUp,
    ChangeUserEmail,
}

impl VerificationCodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationCodeType::SignIn => "sign_in",
            VerificationCodeType::SignUp => "sign_up",
            VerificationCodeType::ChangeUserEmail => "change_user_email",
        }
    }

    /// Whether issuing this kind of code requires the account to exist already.
    pub fn requires_existing_user(&self) -> bool {
        matches!(
            self,
            VerificationCodeType::SignIn | VerificationCodeType::ChangeUserEmail
        )
    }
}

/// Single-use 6-digit code. At most one exists per (email, type, device identifier).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationCode {
    pub id: Uuid,
    pub code: String,
    pub email: String,
    #[serde(rename = "type")]
    pub kind: VerificationCodeType,
    pub device_identifier: String,
    pub create_time: DateTime<Utc>,
}

impl VerificationCode {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.create_time + ttl <= now
    }
}
