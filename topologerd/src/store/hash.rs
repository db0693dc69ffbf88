use sha2::{Sha256, Digest};
use shared::types::MapProjection;

/// SHA-256 of the map projection, hex encoded.
/// Routers and links come back from the store in id order, so the digest
/// only changes when the drawn topology does.
pub fn compute_hash(map: &MapProjection) -> String {
    let json = serde_json::to_string(map)
        .expect("Failed to serialize map projection for hashing");

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}
