use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::types::ClientMetadata;
use crate::error::{AuthResult, StoreError};
use crate::model::Device;
use crate::repository::{CredentialStore, DeviceFilter, UnitOfWork};

/// Insert the calling device or refresh its attributes, keyed by its natural
/// identifier. Runs on every authenticated interaction.
pub async fn upsert_device(
    store: &CredentialStore,
    uow: &mut UnitOfWork<'_>,
    metadata: &ClientMetadata,
) -> AuthResult<Device> {
    let filter = DeviceFilter::DeviceIdentifier(metadata.device_identifier.clone());

    if store.devices.find(uow, &filter).await?.is_none() {
        if let Some(device) = register(store, uow, metadata)? {
            return Ok(device);
        }
    }

    match store.devices.update(uow, &filter, |device| refresh(device, metadata)) {
        Err(StoreError::NotFound) => {}
        other => return Ok(other?),
    }

    // the cached row outlived its store row
    warn!(device_identifier = %metadata.device_identifier, "stale device mirror");
    if let Some(device) = register(store, uow, metadata)? {
        return Ok(device);
    }
    Ok(store.devices.update(uow, &filter, |device| refresh(device, metadata))?)
}

/// Create the device row. `None` when another caller registered it first.
fn register(
    store: &CredentialStore,
    uow: &mut UnitOfWork<'_>,
    metadata: &ClientMetadata,
) -> Result<Option<Device>, StoreError> {
    let now = Utc::now();
    let device = Device {
        id: Uuid::new_v4(),
        device_identifier: metadata.device_identifier.clone(),
        platform: metadata.platform.clone(),
        system_version: metadata.system_version.clone(),
        firebase_cloud_messaging_id: metadata.firebase_cloud_messaging_id.clone(),
        model: metadata.model.clone(),
        create_time: now,
        update_time: now,
    };
    match store.devices.create(uow, device) {
        Ok(device) => {
            debug!(device_id = %device.id, "device registered");
            Ok(Some(device))
        }
        Err(StoreError::AlreadyExists(_)) => Ok(None),
        Err(error) => Err(error),
    }
}

fn refresh(device: &mut Device, metadata: &ClientMetadata) {
    device.platform = metadata.platform.clone();
    device.system_version = metadata.system_version.clone();
    device.model = metadata.model.clone();
    if let Some(fcm) = &metadata.firebase_cloud_messaging_id {
        device.firebase_cloud_messaging_id = Some(fcm.clone());
    }
    device.update_time = Utc::now();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{MemoryCache, SideCache};
    use crate::db::DBLayer;
    use crate::repository::{to_fields, InvalidationMode, SESSION_CACHE_TTL};

    fn metadata(identifier: &str) -> ClientMetadata {
        ClientMetadata {
            platform: "android".into(),
            device_identifier: identifier.into(),
            system_version: "14".into(),
            model: "Pixel 8".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn registers_then_refreshes_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();
        let store = CredentialStore::new(
            db,
            Arc::new(MemoryCache::new()),
            InvalidationMode::Detached,
        );

        let mut uow = store.begin();
        let created = upsert_device(&store, &mut uow, &metadata("pixel")).await.unwrap();
        store.commit(uow).await.unwrap();

        let mut upgraded = metadata("pixel");
        upgraded.system_version = "15".into();
        let mut uow = store.begin();
        let updated = upsert_device(&store, &mut uow, &upgraded).await.unwrap();
        store.commit(uow).await.unwrap();

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.system_version, "15");
    }

    #[tokio::test]
    async fn stale_cache_entry_falls_back_to_registration() {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();
        let cache = Arc::new(MemoryCache::new());
        let store = CredentialStore::new(db, cache.clone(), InvalidationMode::Detached);

        // mirrored, but never written to the store
        let now = Utc::now();
        let ghost = Device {
            id: Uuid::new_v4(),
            device_identifier: "ghost".into(),
            platform: "android".into(),
            system_version: "13".into(),
            firebase_cloud_messaging_id: None,
            model: "Pixel 7".into(),
            create_time: now,
            update_time: now,
        };
        cache
            .set_hash("device:ghost", to_fields(&ghost).unwrap(), SESSION_CACHE_TTL)
            .await
            .unwrap();

        let mut uow = store.begin();
        let device = upsert_device(&store, &mut uow, &metadata("ghost")).await.unwrap();
        store.commit(uow).await.unwrap();

        assert_ne!(device.id, ghost.id);
        assert_eq!(device.system_version, "14");

        let uow = store.begin();
        let stored = store
            .devices
            .list(&uow, &DeviceFilter::Ids(vec![device.id]))
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
