//! Session authority: verification codes, sign-in/up, token rotation,
//! sign-out and session inspection.
//!
//! Each operation runs in one store transaction. Tokens are minted after the
//! transaction commits; nothing is persisted if the caller goes away first,
//! because an uncommitted [`UnitOfWork`] rolls back when dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::ban_guard::{ensure_not_banned, BanQuery};
use crate::auth::device_registrar::upsert_device;
use crate::auth::jwt::TokenCodec;
use crate::auth::notifier::CodeNotifier;
use crate::auth::types::{
    ClientMetadata, SessionCheck, SessionInfo, SignInRequest, SignOutRequest, SignUpRequest,
    TokenPair,
};
use crate::auth::utils::{generate_code, normalize_email};
use crate::error::{AuthError, AuthResult, StoreError};
use crate::model::{
    AuthorizationToken, Device, RefreshToken, User, VerificationCode, VerificationCodeType,
};
use crate::repository::{
    AuthorizationTokenFilter, CredentialStore, DeviceFilter, RefreshTokenFilter, UnitOfWork,
    UserFilter, VerificationCodeFilter,
};

/// The resolved authorization → refresh → user chain of a caller.
struct Caller {
    authorization: AuthorizationToken,
    user: User,
}

pub struct SessionAuthority {
    store: Arc<CredentialStore>,
    codec: TokenCodec,
    notifier: Arc<dyn CodeNotifier>,
    verification_code_ttl: Duration,
}

fn tolerate_not_found<T>(result: Result<T, StoreError>) -> Result<(), StoreError> {
    match result {
        Ok(_) | Err(StoreError::NotFound) => Ok(()),
        Err(error) => Err(error),
    }
}

impl SessionAuthority {
    pub fn new(
        store: Arc<CredentialStore>,
        codec: TokenCodec,
        notifier: Arc<dyn CodeNotifier>,
        verification_code_ttl: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            notifier,
            verification_code_ttl,
        }
    }

    // ============================================================
    // VERIFICATION CODES
    // ============================================================

    /// Issue a fresh code for (email, type, device), replacing any earlier one.
    pub async fn create_verification_code(
        &self,
        email: &str,
        kind: VerificationCodeType,
        device_identifier: &str,
    ) -> AuthResult<VerificationCode> {
        let email = normalize_email(email);
        let now = Utc::now();
        let mut uow = self.store.begin();

        ensure_not_banned(
            &self.store,
            &uow,
            &BanQuery::new()
                .email(&email)
                .device_identifier(device_identifier),
            now,
        )?;

        let user = self
            .store
            .users
            .find(&mut uow, &UserFilter::Email(email.clone()))
            .await?;
        match (&user, kind.requires_existing_user()) {
            (None, true) => return Err(AuthError::UserNotFound),
            (Some(_), false) => return Err(AuthError::UserAlreadyExists),
            (Some(user), true) => ensure_not_banned(
                &self.store,
                &uow,
                &BanQuery::new().user_id(user.id),
                now,
            )?,
            (None, false) => {}
        }

        let slot = VerificationCodeFilter::Slot {
            email: email.clone(),
            kind,
            device_identifier: device_identifier.to_string(),
        };
        tolerate_not_found(self.store.verification_codes.delete(&mut uow, &slot))?;

        let code = self.store.verification_codes.create(
            &mut uow,
            VerificationCode {
                id: Uuid::new_v4(),
                code: generate_code(),
                email,
                kind,
                device_identifier: device_identifier.to_string(),
                create_time: now,
            },
        )?;
        self.store.commit(uow).await?;

        if let Err(error) = self.notifier.deliver(&code).await {
            warn!(email = %code.email, %error, "verification code delivery failed");
        }
        Ok(code)
    }

    /// Look up a live code without consuming it.
    pub async fn get_verification_code(
        &self,
        code: &str,
        email: &str,
        kind: VerificationCodeType,
        device_identifier: &str,
    ) -> AuthResult<VerificationCode> {
        let email = normalize_email(email);
        let mut uow = self.store.begin();
        self.find_live_code(&mut uow, code, &email, kind, device_identifier, Utc::now())
            .await
    }

    async fn find_live_code(
        &self,
        uow: &mut UnitOfWork<'_>,
        code: &str,
        email: &str,
        kind: VerificationCodeType,
        device_identifier: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<VerificationCode> {
        let slot = VerificationCodeFilter::Slot {
            email: email.to_string(),
            kind,
            device_identifier: device_identifier.to_string(),
        };
        let stored = self
            .store
            .verification_codes
            .find(uow, &slot)
            .await?
            .ok_or(AuthError::CodeNotFound)?;

        if stored.code != code || stored.is_expired(self.verification_code_ttl, now) {
            return Err(AuthError::CodeNotFound);
        }
        Ok(stored)
    }

    /// Delete the code inside `uow`; it is gone once the transaction commits.
    async fn consume_code(
        &self,
        uow: &mut UnitOfWork<'_>,
        code: &str,
        email: &str,
        kind: VerificationCodeType,
        device_identifier: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        let stored = self
            .find_live_code(uow, code, email, kind, device_identifier, now)
            .await?;
        match self
            .store
            .verification_codes
            .delete(uow, &VerificationCodeFilter::Id(stored.id))
        {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => Err(AuthError::CodeNotFound),
            Err(error) => Err(error.into()),
        }
    }

    // ============================================================
    // SIGN IN / SIGN UP / ROTATION
    // ============================================================

    pub async fn sign_in(
        &self,
        req: SignInRequest,
        metadata: &ClientMetadata,
    ) -> AuthResult<TokenPair> {
        let email = normalize_email(&req.email);
        let now = Utc::now();
        let mut uow = self.store.begin();

        self.consume_code(
            &mut uow,
            &req.code,
            &email,
            VerificationCodeType::SignIn,
            &metadata.device_identifier,
            now,
        )
        .await?;

        let user = self
            .store
            .users
            .find(&mut uow, &UserFilter::Email(email.clone()))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let device = upsert_device(&self.store, &mut uow, metadata).await?;
        ensure_not_banned(
            &self.store,
            &uow,
            &BanQuery::new()
                .email(&email)
                .user_id(user.id)
                .device_identifier(&device.device_identifier)
                .device_id(device.id),
            now,
        )?;

        let (refresh, authorization) = self.open_session(&mut uow, &user, &device, metadata)?;
        self.store.commit(uow).await?;

        info!(user_id = %user.id, device_id = %device.id, "signed in");
        self.mint_pair(&user, &refresh, &authorization)
    }

    pub async fn sign_up(
        &self,
        req: SignUpRequest,
        metadata: &ClientMetadata,
    ) -> AuthResult<TokenPair> {
        let email = normalize_email(&req.email);
        let now = Utc::now();
        let mut uow = self.store.begin();

        self.consume_code(
            &mut uow,
            &req.code,
            &email,
            VerificationCodeType::SignUp,
            &metadata.device_identifier,
            now,
        )
        .await?;

        if self
            .store
            .users
            .find(&mut uow, &UserFilter::Email(email.clone()))
            .await?
            .is_some()
        {
            return Err(AuthError::UserAlreadyExists);
        }

        let device = upsert_device(&self.store, &mut uow, metadata).await?;
        ensure_not_banned(
            &self.store,
            &uow,
            &BanQuery::new()
                .email(&email)
                .device_identifier(&device.device_identifier)
                .device_id(device.id),
            now,
        )?;

        let user = User {
            id: Uuid::new_v4(),
            email,
            alias: req.alias.trim().to_string(),
            full_name: req.full_name.trim().to_string(),
            is_legal_age: req.is_legal_age,
            create_time: now,
        };
        let user = match self.store.users.create(&mut uow, user) {
            Ok(user) => user,
            Err(StoreError::AlreadyExists(_)) => return Err(AuthError::UserAlreadyExists),
            Err(error) => return Err(error.into()),
        };

        let (refresh, authorization) = self.open_session(&mut uow, &user, &device, metadata)?;
        self.store.commit(uow).await?;

        info!(user_id = %user.id, device_id = %device.id, "signed up");
        self.mint_pair(&user, &refresh, &authorization)
    }

    /// Exchange a refresh token for a new pair. The presented token's row is
    /// deleted, so the same token can never be exchanged twice.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        metadata: &ClientMetadata,
    ) -> AuthResult<TokenPair> {
        let refresh_token_id = self.codec.parse_refresh_token(refresh_token)?;
        let mut uow = self.store.begin();

        let current = self
            .store
            .refresh_tokens
            .find(&mut uow, &RefreshTokenFilter::Id(refresh_token_id))
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let user = self
            .store
            .users
            .find(&mut uow, &UserFilter::Id(current.user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        // Device first, then tokens: the same lock order as sign-in.
        let device = upsert_device(&self.store, &mut uow, metadata).await?;

        // The lookup above may have been answered by the cache; the delete is
        // what proves the row is still live.
        match self
            .store
            .revoke_refresh_tokens(&mut uow, &RefreshTokenFilter::Id(refresh_token_id))
        {
            Ok(_) => {}
            Err(StoreError::NotFound) => return Err(AuthError::Unauthenticated),
            Err(error) => return Err(error.into()),
        }

        let (refresh, authorization) = self.open_session(&mut uow, &user, &device, metadata)?;
        self.store.commit(uow).await?;

        info!(user_id = %user.id, device_id = %device.id, "refresh token rotated");
        self.mint_pair(&user, &refresh, &authorization)
    }

    /// Replace whatever session (user, device) had with a fresh token pair.
    fn open_session(
        &self,
        uow: &mut UnitOfWork<'_>,
        user: &User,
        device: &Device,
        metadata: &ClientMetadata,
    ) -> AuthResult<(RefreshToken, AuthorizationToken)> {
        tolerate_not_found(self.store.revoke_refresh_tokens(
            uow,
            &RefreshTokenFilter::UserDevice {
                user_id: user.id,
                device_id: device.id,
            },
        ))?;

        let now = Utc::now();
        let refresh = self.store.refresh_tokens.create(
            uow,
            RefreshToken {
                id: Uuid::new_v4(),
                user_id: user.id,
                device_id: device.id,
                create_time: now,
            },
        )?;
        let authorization = self.store.authorization_tokens.create(
            uow,
            AuthorizationToken {
                id: Uuid::new_v4(),
                refresh_token_id: refresh.id,
                user_id: user.id,
                device_id: device.id,
                app: metadata.app.clone(),
                app_version: metadata.app_version.clone(),
                create_time: now,
            },
        )?;
        Ok((refresh, authorization))
    }

    fn mint_pair(
        &self,
        user: &User,
        refresh: &RefreshToken,
        authorization: &AuthorizationToken,
    ) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            user_id: user.id,
            refresh_token: self.codec.mint_refresh_token(refresh.id)?,
            authorization_token: self.codec.mint_authorization_token(authorization.id)?,
        })
    }

    // ============================================================
    // AUTHENTICATED CALLS
    // ============================================================

    /// Resolve the caller's authorization token to its live session and user.
    async fn authenticate(
        &self,
        uow: &mut UnitOfWork<'_>,
        metadata: &ClientMetadata,
    ) -> AuthResult<Caller> {
        let token = metadata
            .authorization
            .as_deref()
            .ok_or(AuthError::Unauthenticated)?;
        let authorization_token_id = self.codec.parse_authorization_token(token)?;

        let authorization = self
            .store
            .authorization_tokens
            .find(uow, &AuthorizationTokenFilter::Id(authorization_token_id))
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let refresh = self
            .store
            .refresh_tokens
            .find(uow, &RefreshTokenFilter::Id(authorization.refresh_token_id))
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        let user = self
            .store
            .users
            .find(uow, &UserFilter::Id(refresh.user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(Caller {
            authorization,
            user,
        })
    }

    pub async fn sign_out(&self, req: SignOutRequest, metadata: &ClientMetadata) -> AuthResult<()> {
        let mut uow = self.store.begin();
        let caller = self.authenticate(&mut uow, metadata).await?;
        let user_id = caller.user.id;

        let filter = if req.all {
            RefreshTokenFilter::User(user_id)
        } else if let Some(target_id) = req.authorization_token_id {
            let target = self
                .store
                .authorization_tokens
                .find(&mut uow, &AuthorizationTokenFilter::Id(target_id))
                .await?
                .ok_or(AuthError::PermissionDenied)?;
            if target.user_id != user_id {
                warn!(%user_id, target_user_id = %target.user_id, "cross-user sign-out rejected");
                return Err(AuthError::PermissionDenied);
            }
            RefreshTokenFilter::UserDevice {
                user_id,
                device_id: target.device_id,
            }
        } else {
            RefreshTokenFilter::UserDevice {
                user_id,
                device_id: caller.authorization.device_id,
            }
        };

        tolerate_not_found(self.store.revoke_refresh_tokens(&mut uow, &filter))?;
        self.store.commit(uow).await?;

        info!(%user_id, all = req.all, "signed out");
        Ok(())
    }

    /// Register the calling device and, if an authorization token is present,
    /// confirm it still resolves. Never touches tokens.
    pub async fn check_session(&self, metadata: &ClientMetadata) -> AuthResult<SessionCheck> {
        let now = Utc::now();
        let mut uow = self.store.begin();

        let device = upsert_device(&self.store, &mut uow, metadata).await?;
        ensure_not_banned(
            &self.store,
            &uow,
            &BanQuery::new()
                .device_identifier(&device.device_identifier)
                .device_id(device.id),
            now,
        )?;

        let user = if metadata.authorization.is_some() {
            let caller = self.authenticate(&mut uow, metadata).await?;
            ensure_not_banned(
                &self.store,
                &uow,
                &BanQuery::new()
                    .email(&caller.user.email)
                    .user_id(caller.user.id),
                now,
            )?;
            Some(caller.user)
        } else {
            None
        };

        self.store.commit(uow).await?;
        Ok(SessionCheck { device, user })
    }

    /// Every session of the caller's user, newest first.
    pub async fn list_sessions(&self, metadata: &ClientMetadata) -> AuthResult<Vec<SessionInfo>> {
        let mut uow = self.store.begin();
        let caller = self.authenticate(&mut uow, metadata).await?;

        let tokens = self
            .store
            .authorization_tokens
            .list(&uow, &AuthorizationTokenFilter::User(caller.user.id))?;
        let device_ids = tokens.iter().map(|t| t.device_id).collect();
        let devices: HashMap<Uuid, Device> = self
            .store
            .devices
            .list(&uow, &DeviceFilter::Ids(device_ids))?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        let mut sessions: Vec<SessionInfo> = tokens
            .into_iter()
            .filter_map(|token| {
                let Some(device) = devices.get(&token.device_id) else {
                    warn!(authorization_token_id = %token.id, "session device missing");
                    return None;
                };
                Some(SessionInfo {
                    authorization_token_id: token.id,
                    current: token.id == caller.authorization.id,
                    app: token.app,
                    app_version: token.app_version,
                    create_time: token.create_time,
                    device: device.clone(),
                })
            })
            .collect();
        sessions.sort_by(|a, b| b.create_time.cmp(&a.create_time));

        self.store.commit(uow).await?;
        Ok(sessions)
    }
}
