//! Normalization of a caller-supplied block descriptor before it is staged.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use ulid::Ulid;

use super::meta::{BlockMeta, UPLOAD_SOURCE};
use crate::{error::BlockUploadError, tenant::TenantId};

pub const TENANT_ID_LABEL: &str = "__org_id__";
pub const COMPACTOR_SHARD_ID_LABEL: &str = "__compactor_shard_id__";
pub const INGESTER_ID_LABEL: &str = "__ingester_id__";
pub const DEPRECATED_SHARD_ID_LABEL: &str = "__shard_id__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPolicy {
    Preserve,
    Strip,
    Reject,
}

/// Every external label this service understands. Anything else is rejected.
const LABEL_POLICIES: &[(&str, LabelPolicy)] = &[
    (TENANT_ID_LABEL, LabelPolicy::Preserve),
    (COMPACTOR_SHARD_ID_LABEL, LabelPolicy::Preserve),
    (INGESTER_ID_LABEL, LabelPolicy::Strip),
    (DEPRECATED_SHARD_ID_LABEL, LabelPolicy::Strip),
];

pub fn label_policy(name: &str) -> LabelPolicy {
    LABEL_POLICIES
        .iter()
        .find(|(label, _)| *label == name)
        .map(|(_, policy)| *policy)
        .unwrap_or(LabelPolicy::Reject)
}

/// Stamps the session's block ID and tenant onto `meta`, applies the label
/// policy and marks the block as uploaded.
///
/// Fails without returning a partially sanitized descriptor if any label is
/// rejected.
pub fn sanitize_meta(
    mut meta: BlockMeta,
    block_id: Ulid,
    tenant: &TenantId,
) -> Result<BlockMeta, BlockUploadError> {
    meta.ulid = block_id;

    let mut labels = meta.thanos.labels.take().unwrap_or_default();
    labels.insert(TENANT_ID_LABEL.to_string(), tenant.to_string());

    let mut sanitized = BTreeMap::new();
    let mut rejected = Vec::new();
    for (name, value) in labels {
        match label_policy(&name) {
            LabelPolicy::Preserve => {
                sanitized.insert(name, value);
            }
            LabelPolicy::Strip => {
                debug!(
                    label = %name,
                    value = %value,
                    "removing unused external label from meta.json"
                );
            }
            LabelPolicy::Reject => rejected.push(name),
        }
    }

    if !rejected.is_empty() {
        warn!(
            labels = %rejected.join(","),
            "rejecting unsupported external label(s) in meta.json"
        );
        return Err(BlockUploadError::UnsupportedLabels(rejected));
    }

    meta.thanos.labels = Some(sanitized);
    meta.thanos.source = UPLOAD_SOURCE.to_string();
    Ok(meta)
}
