use uuid::Uuid;

use super::Entity;
use crate::auth::utils::normalize_email;
use crate::db::{Filter, Lookup, Record};
use crate::model::{BannedDevice, BannedUser};

impl Record for BannedUser {
    const TABLE: &'static str = "banned_user";

    fn id(&self) -> Uuid {
        self.id
    }

    // Ban rows are written by operators; the email key is normalised here so
    // a mixed-case entry still matches the normalised caller.
    fn index_keys(&self) -> Vec<(&'static str, String)> {
        let mut keys = Vec::new();
        if let Some(email) = &self.email {
            keys.push(("email", normalize_email(email)));
        }
        if let Some(user_id) = self.user_id {
            keys.push(("user_id", user_id.to_string()));
        }
        keys
    }
}

impl Entity for BannedUser {
    const CACHE_TTL: Option<std::time::Duration> = None;
}

impl Record for BannedDevice {
    const TABLE: &'static str = "banned_device";

    fn id(&self) -> Uuid {
        self.id
    }

    fn index_keys(&self) -> Vec<(&'static str, String)> {
        let mut keys = Vec::new();
        if let Some(identifier) = &self.device_identifier {
            keys.push(("device_identifier", identifier.clone()));
        }
        if let Some(device_id) = self.device_id {
            keys.push(("device_id", device_id.to_string()));
        }
        keys
    }
}

impl Entity for BannedDevice {
    const CACHE_TTL: Option<std::time::Duration> = None;
}

pub enum BannedUserFilter {
    Email(String),
    UserId(Uuid),
}

impl Filter<BannedUser> for BannedUserFilter {
    fn lookup(&self) -> Lookup {
        match self {
            BannedUserFilter::Email(email) => Lookup::Indexed {
                index: "email",
                value: normalize_email(email),
            },
            BannedUserFilter::UserId(user_id) => Lookup::Indexed {
                index: "user_id",
                value: user_id.to_string(),
            },
        }
    }
}

pub enum BannedDeviceFilter {
    DeviceIdentifier(String),
    DeviceId(Uuid),
}

impl Filter<BannedDevice> for BannedDeviceFilter {
    fn lookup(&self) -> Lookup {
        match self {
            BannedDeviceFilter::DeviceIdentifier(identifier) => Lookup::Indexed {
                index: "device_identifier",
                value: identifier.clone(),
            },
            BannedDeviceFilter::DeviceId(device_id) => Lookup::Indexed {
                index: "device_id",
                value: device_id.to_string(),
            },
        }
    }
}
