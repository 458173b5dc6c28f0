#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use courier_session::auth::types::{ClientMetadata, SignUpRequest, TokenPair};
use courier_session::auth::{LogNotifier, SessionAuthority, TokenCodec, TokenSettings};
use courier_session::cache::{Fields, MemoryCache, SideCache};
use courier_session::db::DBLayer;
use courier_session::error::CacheError;
use courier_session::model::{BannedDevice, BannedUser, VerificationCodeType};
use courier_session::repository::{CredentialStore, InvalidationMode};

/// Memory cache whose deletes can be made to fail on demand.
#[derive(Default)]
pub struct FlakyCache {
    pub inner: MemoryCache,
    fail_deletes: AtomicBool,
    pub failed_deletes: AtomicUsize,
}

impl FlakyCache {
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    fn check_delete(&self) -> Result<(), CacheError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            self.failed_deletes.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::Unavailable("injected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SideCache for FlakyCache {
    async fn get_hash(&self, key: &str) -> Result<Option<Fields>, CacheError> {
        self.inner.get_hash(key).await
    }

    async fn set_hash(&self, key: &str, fields: Fields, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set_hash(key, fields, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check_delete()?;
        self.inner.delete(key).await
    }

    async fn delete_pipelined(&self, keys: &[String]) -> Result<(), CacheError> {
        self.check_delete()?;
        self.inner.delete_pipelined(keys).await
    }
}

pub struct Harness {
    pub authority: Arc<SessionAuthority>,
    pub store: Arc<CredentialStore>,
    pub cache: Arc<FlakyCache>,
    _dir: TempDir,
}

pub fn token_settings() -> TokenSettings {
    TokenSettings {
        refresh_secret: "test-refresh-secret".into(),
        authorization_secret: "test-authorization-secret".into(),
        refresh_ttl: chrono::Duration::days(30),
        authorization_ttl: chrono::Duration::minutes(60),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_mode(InvalidationMode::Detached)
    }

    pub fn with_mode(mode: InvalidationMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();
        let cache = Arc::new(FlakyCache::default());
        let store = Arc::new(CredentialStore::new(db, cache.clone(), mode));
        let authority = Arc::new(SessionAuthority::new(
            store.clone(),
            TokenCodec::new(&token_settings()),
            Arc::new(LogNotifier),
            chrono::Duration::minutes(10),
        ));
        Self {
            authority,
            store,
            cache,
            _dir: dir,
        }
    }

    pub async fn flush(&self) {
        self.store.worker().flush().await;
    }

    pub async fn sign_up(&self, email: &str, metadata: &ClientMetadata) -> TokenPair {
        let code = self
            .authority
            .create_verification_code(
                email,
                VerificationCodeType::SignUp,
                &metadata.device_identifier,
            )
            .await
            .unwrap();
        self.authority
            .sign_up(
                SignUpRequest {
                    full_name: "Ada Lovelace".into(),
                    alias: "ada".into(),
                    code: code.code,
                    email: email.into(),
                    is_legal_age: true,
                },
                metadata,
            )
            .await
            .unwrap()
    }

    pub async fn sign_in(&self, email: &str, metadata: &ClientMetadata) -> TokenPair {
        let code = self
            .authority
            .create_verification_code(
                email,
                VerificationCodeType::SignIn,
                &metadata.device_identifier,
            )
            .await
            .unwrap();
        self.authority
            .sign_in(
                courier_session::auth::types::SignInRequest {
                    code: code.code,
                    email: email.into(),
                },
                metadata,
            )
            .await
            .unwrap()
    }

    pub async fn ban_email(&self, email: &str, expiration_time: Option<chrono::DateTime<Utc>>) {
        let mut uow = self.store.begin();
        self.store
            .banned_users
            .create(
                &mut uow,
                BannedUser {
                    id: Uuid::new_v4(),
                    email: Some(email.into()),
                    user_id: None,
                    expiration_time,
                },
            )
            .unwrap();
        self.store.commit(uow).await.unwrap();
    }

    pub async fn ban_device(&self, device_identifier: &str) {
        let mut uow = self.store.begin();
        self.store
            .banned_devices
            .create(
                &mut uow,
                BannedDevice {
                    id: Uuid::new_v4(),
                    device_identifier: Some(device_identifier.into()),
                    device_id: None,
                    expiration_time: None,
                },
            )
            .unwrap();
        self.store.commit(uow).await.unwrap();
    }
}

pub fn device(identifier: &str) -> ClientMetadata {
    ClientMetadata {
        platform: "ios".into(),
        device_identifier: identifier.into(),
        system_version: "17.4".into(),
        model: "iPhone15,2".into(),
        app: Some("courier".into()),
        app_version: Some("3.1.0".into()),
        ..Default::default()
    }
}

/// `metadata` carrying `pair`'s authorization token.
pub fn authorized(metadata: &ClientMetadata, pair: &TokenPair) -> ClientMetadata {
    ClientMetadata {
        authorization: Some(pair.authorization_token.clone()),
        ..metadata.clone()
    }
}
