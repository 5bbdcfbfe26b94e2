use serde::{Deserialize, Serialize};

pub const PRIMARY_ALGORITHM: &str = "blake3";
pub const SECONDARY_ALGORITHM: &str = "md5";

// Two independent digests over the persisted payload; both must match on
// verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub primary: String,
    pub secondary: String,
}

pub fn checksums(bytes: &[u8]) -> Checksums {
    Checksums {
        primary: blake3::hash(bytes).to_hex().to_string(),
        secondary: format!("{:x}", md5::compute(bytes)),
    }
}
