use uuid::Uuid;

use super::{CredentialStore, Entity, UnitOfWork, SESSION_CACHE_TTL};
use crate::db::{Filter, Lookup, Record, StoreResult};
use crate::error::StoreError;
use crate::model::{AuthorizationToken, RefreshToken};

impl Record for RefreshToken {
    const TABLE: &'static str = "refresh_token";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("user_device", format!("{}:{}", self.user_id, self.device_id))]
    }

    fn index_keys(&self) -> Vec<(&'static str, String)> {
        vec![("user_id", self.user_id.to_string())]
    }
}

impl Entity for RefreshToken {
    const CACHE_TTL: Option<std::time::Duration> = Some(SESSION_CACHE_TTL);

    fn cache_keys(&self) -> Vec<String> {
        vec![format!("refresh_token:{}", self.id)]
    }
}

impl Record for AuthorizationToken {
    const TABLE: &'static str = "authorization_token";

    fn id(&self) -> Uuid {
        self.id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![("refresh_token_id", self.refresh_token_id.to_string())]
    }

    fn index_keys(&self) -> Vec<(&'static str, String)> {
        vec![("user_id", self.user_id.to_string())]
    }
}

impl Entity for AuthorizationToken {
    const CACHE_TTL: Option<std::time::Duration> = Some(SESSION_CACHE_TTL);

    fn cache_keys(&self) -> Vec<String> {
        vec![format!("authorization_token:{}", self.id)]
    }
}

pub enum RefreshTokenFilter {
    Id(Uuid),
    UserDevice { user_id: Uuid, device_id: Uuid },
    User(Uuid),
}

impl Filter<RefreshToken> for RefreshTokenFilter {
    fn lookup(&self) -> Lookup {
        match self {
            RefreshTokenFilter::Id(id) => Lookup::Id(*id),
            RefreshTokenFilter::UserDevice { user_id, device_id } => Lookup::Unique {
                index: "user_device",
                value: format!("{user_id}:{device_id}"),
            },
            RefreshTokenFilter::User(user_id) => Lookup::Indexed {
                index: "user_id",
                value: user_id.to_string(),
            },
        }
    }

    fn cache_key(&self) -> Option<String> {
        match self {
            RefreshTokenFilter::Id(id) => Some(format!("refresh_token:{id}")),
            _ => None,
        }
    }
}

pub enum AuthorizationTokenFilter {
    Id(Uuid),
    RefreshTokenIds(Vec<Uuid>),
    User(Uuid),
}

impl Filter<AuthorizationToken> for AuthorizationTokenFilter {
    fn lookup(&self) -> Lookup {
        match self {
            AuthorizationTokenFilter::Id(id) => Lookup::Id(*id),
            AuthorizationTokenFilter::RefreshTokenIds(ids) => Lookup::AnyOf(
                ids.iter()
                    .map(|id| Lookup::Unique {
                        index: "refresh_token_id",
                        value: id.to_string(),
                    })
                    .collect(),
            ),
            AuthorizationTokenFilter::User(user_id) => Lookup::Indexed {
                index: "user_id",
                value: user_id.to_string(),
            },
        }
    }

    fn cache_key(&self) -> Option<String> {
        match self {
            AuthorizationTokenFilter::Id(id) => Some(format!("authorization_token:{id}")),
            _ => None,
        }
    }
}

impl CredentialStore {
    /// Delete refresh tokens and, in the same transaction, the authorization
    /// token bound to each of them. `NotFound` when no refresh token matched.
    pub fn revoke_refresh_tokens(
        &self,
        uow: &mut UnitOfWork<'_>,
        filter: &RefreshTokenFilter,
    ) -> StoreResult<Vec<RefreshToken>> {
        let revoked = self.refresh_tokens.delete(uow, filter)?;
        let ids = revoked.iter().map(|t| t.id).collect();

        match self
            .authorization_tokens
            .delete(uow, &AuthorizationTokenFilter::RefreshTokenIds(ids))
        {
            Ok(_) | Err(StoreError::NotFound) => Ok(revoked),
            Err(error) => Err(error),
        }
    }
}
