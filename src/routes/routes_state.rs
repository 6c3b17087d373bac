use std::sync::Arc;

use blob_store::BlobStorage;
use ulid::Ulid;

use crate::{tenant::TenantId, upload::BlockUploadSession};

#[derive(Clone)]
pub struct RouteState {
    pub blob_storage: Arc<BlobStorage>,
}

impl RouteState {
    /// Session for `block_id` backed by the tenant's bucket.
    pub fn upload_session(&self, tenant: TenantId, block_id: Ulid) -> BlockUploadSession {
        let bucket = Arc::new(self.blob_storage.tenant_bucket(tenant.as_str()));
        BlockUploadSession::new(bucket, tenant, block_id)
    }
}
