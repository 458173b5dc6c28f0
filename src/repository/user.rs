use uuid::Uuid;

use super::{Entity, SESSION_CACHE_TTL};
use crate::db::{Filter, Lookup, Record};
use crate::model::User;

impl Record for User {
    const TABLE: &'static str = "user";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("email", self.email.clone())]
    }
}

impl Entity for User {
    const CACHE_TTL: Option<std::time::Duration> = Some(SESSION_CACHE_TTL);

    fn cache_keys(&self) -> Vec<String> {
        vec![format!("user:{}", self.id)]
    }
}

pub enum UserFilter {
    Id(Uuid),
    /// Already normalised.
    Email(String),
}

impl Filter<User> for UserFilter {
    fn lookup(&self) -> Lookup {
        match self {
            UserFilter::Id(id) => Lookup::Id(*id),
            UserFilter::Email(email) => Lookup::Unique {
                index: "email",
                value: email.clone(),
            },
        }
    }

    fn cache_key(&self) -> Option<String> {
        match self {
            UserFilter::Id(id) => Some(format!("user:{id}")),
            // sign-in and sign-up resolve by email; always read the store
            UserFilter::Email(_) => None,
        }
    }
}
