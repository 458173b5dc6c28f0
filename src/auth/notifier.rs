use async_trait::async_trait;
use tracing::info;

use crate::model::VerificationCode;

/// Out-of-band delivery of verification codes (email, push).
#[async_trait]
pub trait CodeNotifier: Send + Sync {
    async fn deliver(&self, code: &VerificationCode) -> anyhow::Result<()>;
}

/// Logs the delivery instead of sending anything.
pub struct LogNotifier;

#[async_trait]
impl CodeNotifier for LogNotifier {
    async fn deliver(&self, code: &VerificationCode) -> anyhow::Result<()> {
        info!(
            email = %code.email,
            kind = code.kind.as_str(),
            device_identifier = %code.device_identifier,
            "verification code issued"
        );
        Ok(())
    }
}
