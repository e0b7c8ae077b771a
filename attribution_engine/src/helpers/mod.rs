mod identity;
mod shutdown;

pub use identity::{email_digest, normalize_email, normalize_phone, phone_digest, sha256_hex};
pub use shutdown::ShutdownFlag;
