//! Server-side secret encryption and zero-knowledge envelope helpers.

pub mod secrets;
pub mod zk;

pub use secrets::MasterKey;
pub use zk::{validate_zk_envelope, ZK_PREFIX};
