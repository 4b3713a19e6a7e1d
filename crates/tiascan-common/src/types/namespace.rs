//! Namespace rows and their per-block message links

use {
    crate::types::Height,
    serde::{Deserialize, Serialize},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    /// Hex-encoded on-chain namespace identity.
    pub namespace_id: String,
    pub version: i32,
    pub size: i64,
    pub pfb_count: i64,
    /// Height of the first PFB that touched this namespace.
    pub first_height: Height,
}

/// Link between a pay-for-blob message and the namespace it wrote into,
/// with the blob size it contributed. Rollback re-derives namespace
/// counters from these rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamespaceMessage {
    pub namespace_id: String,
    pub msg_id: i64,
    pub height: Height,
    pub size: i64,
}
