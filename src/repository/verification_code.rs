use uuid::Uuid;

use super::Entity;
use crate::db::{Filter, Lookup, Record};
use crate::model::{VerificationCode, VerificationCodeType};

fn slot(email: &str, kind: VerificationCodeType, device_identifier: &str) -> String {
    format!("{email}|{}|{device_identifier}", kind.as_str())
}

impl Record for VerificationCode {
    const TABLE: &'static str = "verification_code";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("slot", slot(&self.email, self.kind, &self.device_identifier))]
    }
}

// Single-use codes are never mirrored: a stale entry would let a consumed code
// be replayed.
impl Entity for VerificationCode {
    const CACHE_TTL: Option<std::time::Duration> = None;
}

pub enum VerificationCodeFilter {
    /// The one live code for (email, type, device).
    Slot {
        email: String,
        kind: VerificationCodeType,
        device_identifier: String,
    },
    Id(Uuid),
}

impl Filter<VerificationCode> for VerificationCodeFilter {
    fn lookup(&self) -> Lookup {
        match self {
            VerificationCodeFilter::Slot {
                email,
                kind,
                device_identifier,
            } => Lookup::Unique {
                index: "slot",
                value: slot(email, *kind, device_identifier),
            },
            VerificationCodeFilter::Id(id) => Lookup::Id(*id),
        }
    }
}
