pub mod ban;
pub mod device;
pub mod token;
pub mod user;
pub mod verification_code;

pub use ban::{BannedDevice, BannedUser};
pub use device::Device;
pub use token::{AuthorizationToken, RefreshToken};
pub use user::User;
pub use verification_code::{VerificationCode, VerificationCodeType};
