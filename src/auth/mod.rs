pub mod authority;
pub mod ban_guard;
pub mod device_registrar;
pub mod jwt;
pub mod notifier;
pub mod types;
pub mod utils;

pub use authority::SessionAuthority;
pub use jwt::{TokenCodec, TokenSettings};
pub use notifier::{CodeNotifier, LogNotifier};
