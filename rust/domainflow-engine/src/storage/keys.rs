//! Key encodings for the state store
//!
//! Composite keys are `|`-joined segments; numeric segments are zero-padded to
//! 20 digits so that lexicographic tree order equals numeric order.

use crate::campaign::CampaignId;

/// Zero-padded numeric segment
pub fn seq(n: u64) -> String {
    format!("{:020}", n)
}

/// Primary key of a generated-domain row
pub fn domain_key(campaign_id: CampaignId, offset_index: u64) -> Vec<u8> {
    format!("{}|{}", campaign_id, seq(offset_index)).into_bytes()
}

/// Prefix covering every domain row of one campaign
pub fn domain_prefix(campaign_id: CampaignId) -> Vec<u8> {
    format!("{}|", campaign_id).into_bytes()
}

/// Primary key of a batch row; batch_number gives FIFO scan order
pub fn batch_key(campaign_id: CampaignId, batch_number: u64) -> Vec<u8> {
    format!("{}|{}", campaign_id, seq(batch_number)).into_bytes()
}

/// Prefix covering every batch of one campaign
pub fn batch_prefix(campaign_id: CampaignId) -> Vec<u8> {
    format!("{}|", campaign_id).into_bytes()
}

/// Primary key of a state-transition record
pub fn transition_key(campaign_id: CampaignId, sequence: u64) -> Vec<u8> {
    format!("{}|{}", campaign_id, seq(sequence)).into_bytes()
}

/// Primary key of a resource-lock row
pub fn lock_key(resource_type: &str, resource_id: &str, lock_id: &str) -> Vec<u8> {
    format!("{}|{}|{}", resource_type, resource_id, lock_id).into_bytes()
}

/// Prefix covering every lock over one resource
pub fn lock_prefix(resource_type: &str, resource_id: &str) -> Vec<u8> {
    format!("{}|{}|", resource_type, resource_id).into_bytes()
}

/// Primary key of an endpoint-authorization rule
pub fn endpoint_rule_key(method: &str, pattern: &str) -> Vec<u8> {
    format!("{}|{}", method.to_uppercase(), pattern).into_bytes()
}

/// Primary key of a campaign-access grant
pub fn grant_key(campaign_id: CampaignId, user_id: &str) -> Vec<u8> {
    format!("{}|{}", campaign_id, user_id).into_bytes()
}

/// Append-log key ordered by timestamp then a unique suffix
pub fn log_key(epoch_nanos: i64, id: &str) -> Vec<u8> {
    format!("{:020}|{}", epoch_nanos.max(0), id).into_bytes()
}
