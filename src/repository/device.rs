use uuid::Uuid;

use super::{Entity, SESSION_CACHE_TTL};
use crate::db::{Filter, Lookup, Record};
use crate::model::Device;

impl Record for Device {
    const TABLE: &'static str = "device";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("device_identifier", self.device_identifier.clone())]
    }
}

impl Entity for Device {
    const CACHE_TTL: Option<std::time::Duration> = Some(SESSION_CACHE_TTL);

    fn cache_keys(&self) -> Vec<String> {
        vec![format!("device:{}", self.device_identifier)]
    }
}

pub enum DeviceFilter {
    DeviceIdentifier(String),
    Ids(Vec<Uuid>),
}

impl Filter<Device> for DeviceFilter {
    fn lookup(&self) -> Lookup {
        match self {
            DeviceFilter::DeviceIdentifier(identifier) => Lookup::Unique {
                index: "device_identifier",
                value: identifier.clone(),
            },
            DeviceFilter::Ids(ids) => {
                Lookup::AnyOf(ids.iter().copied().map(Lookup::Id).collect())
            }
        }
    }

    fn cache_key(&self) -> Option<String> {
        match self {
            DeviceFilter::DeviceIdentifier(identifier) => Some(format!("device:{identifier}")),
            DeviceFilter::Ids(_) => None,
        }
    }
}
