use serde::{Deserialize, Serialize};

use docpipe_core::{BatchId, DomainResult, RequestId};
use docpipe_generation::{
    ConcurrencyMode, GenerationItem, GenerationRequest, ItemSpec, RequestStatus, VersionSelector,
};
use docpipe_infra::service::RequestStatusView;
use docpipe_infra::work_store::{ItemStatusCounts, RequestFilter};
use docpipe_loadtest::LoadTestPlan;

// -------------------------
// Request DTOs
// -------------------------

/// One document to generate. Exactly one of `version` / `environment` must be set.
#[derive(Debug, Deserialize)]
pub struct ItemRequest {
    pub template_ref: String,
    pub variant_ref: String,
    pub version: Option<String>,
    pub environment: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub filename: Option<String>,
    pub correlation_id: Option<String>,
}

impl ItemRequest {
    pub fn into_spec(self) -> DomainResult<ItemSpec> {
        let version = selector(self.version, self.environment)?;
        let mut spec = ItemSpec::new(self.template_ref, self.variant_ref, version, self.data);
        spec.filename = self.filename;
        spec.correlation_id = self.correlation_id;
        Ok(spec)
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    pub items: Vec<ItemRequest>,
    #[serde(default)]
    pub concurrency: ConcurrencyMode,
}

impl SubmitBatchRequest {
    pub fn into_specs(self) -> DomainResult<Vec<ItemSpec>> {
        self.items.into_iter().map(ItemRequest::into_spec).collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLoadTestRequest {
    pub target_count: u32,
    pub template_ref: String,
    pub variant_ref: String,
    pub version: Option<String>,
    pub environment: Option<String>,
    #[serde(default)]
    pub test_data: Vec<serde_json::Value>,
}

impl CreateLoadTestRequest {
    pub fn into_plan(self) -> DomainResult<LoadTestPlan> {
        Ok(LoadTestPlan {
            target_count: self.target_count,
            version: selector(self.version, self.environment)?,
            template_ref: self.template_ref,
            variant_ref: self.variant_ref,
            test_data: self.test_data,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PublishTemplateRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateVersionRequest {
    pub version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<String>,
    pub batch_id: Option<String>,
    pub limit: Option<usize>,
}

impl ListRequestsQuery {
    pub fn into_filter(self) -> DomainResult<RequestFilter> {
        let mut filter = RequestFilter::default();
        if let Some(status) = self.status {
            filter.status = Some(status.to_ascii_lowercase().parse::<RequestStatus>()?);
        }
        if let Some(batch_id) = self.batch_id {
            filter.batch_id = Some(batch_id.parse::<BatchId>()?);
        }
        if let Some(limit) = self.limit {
            filter.limit = limit.clamp(1, 500);
        }
        Ok(filter)
    }
}

fn selector(version: Option<String>, environment: Option<String>) -> DomainResult<VersionSelector> {
    VersionSelector::from_parts(version, environment).map_err(|_| {
        docpipe_core::DomainError::validation("exactly one of 'version' or 'environment' must be set")
    })
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmittedResponse {
    pub request_id: RequestId,
}

#[derive(Debug, Serialize)]
pub struct BatchSubmittedResponse {
    pub batch_id: BatchId,
    pub request_id: RequestId,
    pub item_count: u32,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    #[serde(flatten)]
    pub request: GenerationRequest,
    pub items: ItemStatusCounts,
}

impl From<RequestStatusView> for RequestResponse {
    fn from(view: RequestStatusView) -> Self {
        Self {
            request: view.request,
            items: view.items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub id: docpipe_core::ItemId,
    pub sequence: u32,
    pub status: docpipe_generation::ItemStatus,
    pub correlation_id: Option<String>,
    pub filename: Option<String>,
    pub output_ref: Option<docpipe_generation::OutputRef>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<GenerationItem> for ItemResponse {
    fn from(item: GenerationItem) -> Self {
        Self {
            id: item.id,
            sequence: item.sequence,
            status: item.status,
            correlation_id: item.correlation_id,
            filename: item.filename,
            output_ref: item.output_ref,
            error_message: item.error_message,
            created_at: item.created_at,
            started_at: item.started_at,
            completed_at: item.completed_at,
        }
    }
}
