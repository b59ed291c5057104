//! Rendering collaborators: template resolution and the renderer itself.
//!
//! The pipeline only depends on the two traits here. The in-process
//! implementations (`StaticTemplateCatalog`, `PlaceholderRenderer`) back the
//! dev server, tests and load tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use docpipe_core::TenantId;
use docpipe_generation::{EnvironmentId, VersionId, VersionSelector};

/// A resolved, renderable template version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub tenant_id: TenantId,
    pub template_ref: String,
    pub variant_ref: String,
    pub version: VersionId,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("template version '{version}' not found for {template_ref}/{variant_ref}")]
    VersionNotFound {
        template_ref: String,
        variant_ref: String,
        version: VersionId,
    },
    #[error("no active version for environment '{environment}' on {template_ref}/{variant_ref}")]
    NoActiveVersion {
        template_ref: String,
        variant_ref: String,
        environment: EnvironmentId,
    },
    #[error("template backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The data payload does not satisfy the template.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("render timed out: {0}")]
    Timeout(String),
    #[error("render engine error: {0}")]
    Engine(String),
}

/// Looks up template versions and environment bindings.
#[async_trait]
pub trait TemplateResolver: Send + Sync {
    async fn resolve_version(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        version: &VersionId,
    ) -> Result<TemplateDefinition, ResolveError>;

    /// The version currently active in `environment`.
    async fn active_version(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        environment: &EnvironmentId,
    ) -> Result<VersionId, ResolveError>;

    /// Resolve an item's routing to a definition.
    async fn resolve(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        selector: &VersionSelector,
    ) -> Result<TemplateDefinition, ResolveError> {
        match selector {
            VersionSelector::ExplicitVersion(version) => {
                self.resolve_version(tenant_id, template_ref, variant_ref, version)
                    .await
            }
            VersionSelector::ResolveViaEnvironment(environment) => {
                let version = self
                    .active_version(tenant_id, template_ref, variant_ref, environment)
                    .await?;
                self.resolve_version(tenant_id, template_ref, variant_ref, &version)
                    .await
            }
        }
    }
}

/// Turns a definition plus a data payload into document bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        definition: &TemplateDefinition,
        data: &serde_json::Value,
    ) -> Result<Vec<u8>, RenderError>;
}

type TemplateKey = (TenantId, String, String);

#[derive(Debug, Default)]
struct Catalog {
    versions: HashMap<(TemplateKey, VersionId), String>,
    active: HashMap<(TemplateKey, EnvironmentId), VersionId>,
}

/// In-memory template catalog.
#[derive(Debug, Default)]
pub struct StaticTemplateCatalog {
    catalog: RwLock<Catalog>,
}

impl StaticTemplateCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a template version body.
    pub fn publish(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        version: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), ResolveError> {
        let key = (tenant_id, template_ref.to_string(), variant_ref.to_string());
        self.catalog
            .write()
            .map_err(|_| ResolveError::Backend("catalog lock poisoned".to_string()))?
            .versions
            .insert((key, VersionId(version.into())), body.into());
        Ok(())
    }

    /// Make `version` the active one in `environment`.
    pub fn activate(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        environment: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<(), ResolveError> {
        let key = (tenant_id, template_ref.to_string(), variant_ref.to_string());
        self.catalog
            .write()
            .map_err(|_| ResolveError::Backend("catalog lock poisoned".to_string()))?
            .active
            .insert((key, EnvironmentId(environment.into())), VersionId(version.into()));
        Ok(())
    }
}

#[async_trait]
impl TemplateResolver for StaticTemplateCatalog {
    async fn resolve_version(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        version: &VersionId,
    ) -> Result<TemplateDefinition, ResolveError> {
        let catalog = self
            .catalog
            .read()
            .map_err(|_| ResolveError::Backend("catalog lock poisoned".to_string()))?;
        let key = (tenant_id, template_ref.to_string(), variant_ref.to_string());
        let body = catalog
            .versions
            .get(&(key, version.clone()))
            .ok_or_else(|| ResolveError::VersionNotFound {
                template_ref: template_ref.to_string(),
                variant_ref: variant_ref.to_string(),
                version: version.clone(),
            })?;

        Ok(TemplateDefinition {
            tenant_id,
            template_ref: template_ref.to_string(),
            variant_ref: variant_ref.to_string(),
            version: version.clone(),
            body: body.clone(),
        })
    }

    async fn active_version(
        &self,
        tenant_id: TenantId,
        template_ref: &str,
        variant_ref: &str,
        environment: &EnvironmentId,
    ) -> Result<VersionId, ResolveError> {
        let catalog = self
            .catalog
            .read()
            .map_err(|_| ResolveError::Backend("catalog lock poisoned".to_string()))?;
        let key = (tenant_id, template_ref.to_string(), variant_ref.to_string());
        catalog
            .active
            .get(&(key, environment.clone()))
            .cloned()
            .ok_or_else(|| ResolveError::NoActiveVersion {
                template_ref: template_ref.to_string(),
                variant_ref: variant_ref.to_string(),
                environment: environment.clone(),
            })
    }
}

/// Substitutes `{{field}}` placeholders with values from the data payload.
///
/// Dotted paths (`{{customer.name}}`) walk nested objects. String values are
/// inserted verbatim, everything else as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    pub fn render_body(body: &str, data: &serde_json::Value) -> Result<String, RenderError> {
        let mut out = String::with_capacity(body.len());
        let mut rest = body;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| RenderError::Engine("unterminated placeholder".to_string()))?;
            let path = after[..end].trim();
            if path.is_empty() {
                return Err(RenderError::Engine("empty placeholder".to_string()));
            }

            let value = path
                .split('.')
                .try_fold(data, |node, key| node.get(key))
                .filter(|v| !v.is_null())
                .ok_or_else(|| RenderError::Validation(format!("missing field '{path}'")))?;
            match value {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }

            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

#[async_trait]
impl Renderer for PlaceholderRenderer {
    async fn render(
        &self,
        definition: &TemplateDefinition,
        data: &serde_json::Value,
    ) -> Result<Vec<u8>, RenderError> {
        Self::render_body(&definition.body, data).map(String::into_bytes)
    }
}
