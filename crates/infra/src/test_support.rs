//! Fixtures shared by the unit and integration tests of this crate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use docpipe_core::TenantId;
use docpipe_generation::{
    ConcurrencyMode, EnvironmentId, GenerationItem, GenerationRequest, ItemSpec, RequestKind,
    VersionId, VersionSelector,
};

use crate::jobs::PipelineDeps;
use crate::output_store::InMemoryOutputStore;
use crate::rendering::{
    PlaceholderRenderer, RenderError, Renderer, ResolveError, TemplateDefinition, TemplateResolver,
};
use crate::work_store::{NewRequest, WorkStore};

pub const BODY: &str = "Hello {{name}}";

/// Item spec `n` of a test batch; renders to `Hello customer-<n>`.
pub fn spec(n: usize) -> ItemSpec {
    ItemSpec::new(
        "invoice",
        "a4",
        VersionSelector::explicit("v1"),
        serde_json::json!({ "name": format!("customer-{n}") }),
    )
}

/// A pending batch request with `n` items, ready for `insert_request`.
pub fn new_request(tenant_id: TenantId, n: usize) -> NewRequest {
    let now = Utc::now();
    let request = GenerationRequest::new(
        tenant_id,
        RequestKind::Batch,
        n as u32,
        None,
        ConcurrencyMode::Bounded,
        now,
    )
    .unwrap();
    let items = (0..n)
        .map(|i| GenerationItem::from_spec(request.id, tenant_id, i as u32, spec(i), now))
        .collect();
    NewRequest { request, items }
}

/// Resolves any tenant's `invoice/a4` template; environment `prod` maps to `v1`.
#[derive(Debug, Default)]
pub struct OpenCatalog;

#[async_trait]
impl TemplateResolver for OpenCatalog {
    async fn resolve_version(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        version: &VersionId,
    ) -> Result<TemplateDefinition, ResolveError> {
        Ok(TemplateDefinition {
            tenant_id,
            template_ref: template_ref.to_string(),
            variant_ref: variant_ref.to_string(),
            version: version.clone(),
            body: BODY.to_string(),
        })
    }

    async fn active_version(
        &self,
        _tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        environment: &EnvironmentId,
    ) -> Result<VersionId, ResolveError> {
        if environment.0 == "prod" {
            return Ok(VersionId("v1".to_string()));
        }
        Err(ResolveError::NoActiveVersion {
            template_ref: template_ref.to_string(),
            variant_ref: variant_ref.to_string(),
            environment: environment.clone(),
        })
    }
}

/// Placeholder renderer that fails validation for chosen `name` values.
#[derive(Debug, Default)]
pub struct ScriptedRenderer {
    failing: HashSet<String>,
    delay: Option<Duration>,
}

impl ScriptedRenderer {
    pub fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            delay: None,
        }
    }

    pub fn failing_all() -> Self {
        Self::failing_on(&["*"])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(
        &self,
        definition: &TemplateDefinition,
        data: &serde_json::Value,
    ) -> Result<Vec<u8>, RenderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let name = data.get("name").and_then(|v| v.as_str()).unwrap_or_default();
        if self.failing.contains("*") || self.failing.contains(name) {
            return Err(RenderError::Validation(format!("rejected record '{name}'")));
        }
        PlaceholderRenderer.render(definition, data).await
    }
}

pub fn deps(store: Arc<dyn WorkStore>, renderer: Arc<dyn Renderer>) -> PipelineDeps {
    PipelineDeps {
        store,
        outputs: Arc::new(InMemoryOutputStore::new()),
        resolver: Arc::new(OpenCatalog),
        renderer,
    }
}
