//! Generation items: one document to render inside a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docpipe_core::{DomainError, DomainResult, ItemId, RequestId, TenantId};

use crate::message::bounded_message;

const MAX_REF_LEN: usize = 255;

/// Explicit template version identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub String);

/// Deployment environment whose active version should be used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(pub String);

impl core::fmt::Display for VersionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which template version an item renders with.
///
/// Exactly one routing mode per item: a pinned version, or whatever version is
/// active in an environment at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    ExplicitVersion(VersionId),
    ResolveViaEnvironment(EnvironmentId),
}

impl VersionSelector {
    pub fn explicit(version: impl Into<String>) -> Self {
        Self::ExplicitVersion(VersionId(version.into()))
    }

    pub fn environment(environment: impl Into<String>) -> Self {
        Self::ResolveViaEnvironment(EnvironmentId(environment.into()))
    }

    /// Rebuild from the two nullable storage columns; exactly one must be set.
    pub fn from_parts(version: Option<String>, environment: Option<String>) -> DomainResult<Self> {
        match (version, environment) {
            (Some(v), None) => Ok(Self::ExplicitVersion(VersionId(v))),
            (None, Some(e)) => Ok(Self::ResolveViaEnvironment(EnvironmentId(e))),
            (Some(_), Some(_)) => Err(DomainError::invariant(
                "item has both an explicit version and an environment",
            )),
            (None, None) => Err(DomainError::invariant(
                "item has neither an explicit version nor an environment",
            )),
        }
    }

    /// Split into `(version, environment)` storage columns.
    pub fn to_parts(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::ExplicitVersion(v) => (Some(v.0.as_str()), None),
            Self::ResolveViaEnvironment(e) => (None, Some(e.0.as_str())),
        }
    }

    fn validate(&self) -> DomainResult<()> {
        let (label, value) = match self {
            Self::ExplicitVersion(v) => ("version", &v.0),
            Self::ResolveViaEnvironment(e) => ("environment", &e.0),
        };
        validate_ref(label, value)
    }
}

/// Handle to a persisted output document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRef(pub Uuid);

impl OutputRef {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OutputRef {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Item lifecycle status: `PENDING → IN_PROGRESS → {COMPLETED, FAILED}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ItemStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "in_progress" => Ok(ItemStatus::InProgress),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            other => Err(DomainError::validation(format!("unknown item status '{other}'"))),
        }
    }
}

/// Submission input for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub template_ref: String,
    pub variant_ref: String,
    pub version: VersionSelector,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl ItemSpec {
    pub fn new(
        template_ref: impl Into<String>,
        variant_ref: impl Into<String>,
        version: VersionSelector,
        data: serde_json::Value,
    ) -> Self {
        Self {
            template_ref: template_ref.into(),
            variant_ref: variant_ref.into(),
            version,
            data,
            filename: None,
            correlation_id: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_ref("template_ref", &self.template_ref)?;
        validate_ref("variant_ref", &self.variant_ref)?;
        self.version.validate()?;
        if let Some(filename) = &self.filename {
            validate_ref("filename", filename)?;
        }
        if let Some(correlation_id) = &self.correlation_id {
            validate_ref("correlation_id", correlation_id)?;
        }
        Ok(())
    }
}

fn validate_ref(label: &str, value: &str) -> DomainResult<()> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{label} must not be blank")));
    }
    if value.chars().count() > MAX_REF_LEN {
        return Err(DomainError::validation(format!(
            "{label} exceeds {MAX_REF_LEN} characters"
        )));
    }
    Ok(())
}

/// One document to generate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationItem {
    pub id: ItemId,
    pub request_id: RequestId,
    pub tenant_id: TenantId,
    /// Zero-based position in the submission.
    pub sequence: u32,
    pub template_ref: String,
    pub variant_ref: String,
    pub version: VersionSelector,
    pub data: serde_json::Value,
    pub filename: Option<String>,
    pub correlation_id: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
    pub output_ref: Option<OutputRef>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationItem {
    /// Materialise a pending item from its submission spec.
    pub fn from_spec(
        request_id: RequestId,
        tenant_id: TenantId,
        sequence: u32,
        spec: ItemSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ItemId::new(),
            request_id,
            tenant_id,
            sequence,
            template_ref: spec.template_ref,
            variant_ref: spec.variant_ref,
            version: spec.version,
            data: spec.data,
            filename: spec.filename,
            correlation_id: spec.correlation_id,
            status: ItemStatus::Pending,
            error_message: None,
            output_ref: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(ItemStatus::Pending)?;
        self.status = ItemStatus::InProgress;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, output_ref: OutputRef, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(ItemStatus::InProgress)?;
        self.status = ItemStatus::Completed;
        self.output_ref = Some(output_ref);
        self.error_message = None;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(ItemStatus::InProgress)?;
        self.status = ItemStatus::Failed;
        self.output_ref = None;
        self.error_message = Some(bounded_message(message));
        self.completed_at = Some(now);
        Ok(())
    }

    /// Undo an abandoned start so another worker can pick the item up.
    pub fn reset_to_pending(&mut self) {
        if self.status == ItemStatus::InProgress {
            self.status = ItemStatus::Pending;
            self.started_at = None;
        }
    }

    /// Check the routing and output invariants of a loaded item.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.output_ref.is_some() != (self.status == ItemStatus::Completed) {
            return Err(DomainError::invariant(format!(
                "item {} has status {} but output_ref is {}",
                self.id,
                self.status,
                if self.output_ref.is_some() { "set" } else { "unset" }
            )));
        }
        Ok(())
    }

    fn expect_status(&self, expected: ItemStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::conflict(format!(
                "item {} is {}, expected {}",
                self.id, self.status, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ItemSpec {
        ItemSpec::new(
            "invoice",
            "a4",
            VersionSelector::explicit("v3"),
            serde_json::json!({"customer": "ACME"}),
        )
    }

    fn item() -> GenerationItem {
        GenerationItem::from_spec(RequestId::new(), TenantId::new(), 0, spec(), Utc::now())
    }

    #[test]
    fn selector_storage_columns_are_mutually_exclusive() {
        let explicit = VersionSelector::from_parts(Some("v1".into()), None).unwrap();
        assert_eq!(explicit.to_parts(), (Some("v1"), None));

        let env = VersionSelector::from_parts(None, Some("prod".into())).unwrap();
        assert_eq!(env.to_parts(), (None, Some("prod")));

        assert!(VersionSelector::from_parts(Some("v1".into()), Some("prod".into())).is_err());
        assert!(VersionSelector::from_parts(None, None).is_err());
    }

    #[test]
    fn spec_validation_rejects_blank_refs() {
        assert!(spec().validate().is_ok());

        let mut bad = spec();
        bad.template_ref = "  ".into();
        assert!(bad.validate().is_err());

        let bad = spec().with_correlation_id("");
        assert!(bad.validate().is_err());

        let mut bad = spec();
        bad.version = VersionSelector::environment("");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn output_ref_only_on_completed_items() {
        let mut done = item();
        done.start(Utc::now()).unwrap();
        done.complete(OutputRef::new(), Utc::now()).unwrap();
        assert!(done.check_invariants().is_ok());

        let mut failed = item();
        failed.start(Utc::now()).unwrap();
        failed.fail("boom", Utc::now()).unwrap();
        assert!(failed.output_ref.is_none());
        assert!(failed.check_invariants().is_ok());

        failed.output_ref = Some(OutputRef::new());
        assert!(failed.check_invariants().is_err());
    }

    #[test]
    fn transitions_require_expected_status() {
        let mut item = item();
        assert!(item.complete(OutputRef::new(), Utc::now()).is_err());
        item.start(Utc::now()).unwrap();
        assert!(item.start(Utc::now()).is_err());

        item.reset_to_pending();
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.started_at.is_none());
    }

    #[test]
    fn failure_messages_are_bounded() {
        let mut item = item();
        item.start(Utc::now()).unwrap();
        item.fail(&"x".repeat(5000), Utc::now()).unwrap();
        assert_eq!(item.error_message.unwrap().len(), crate::MAX_MESSAGE_CHARS);
    }
}
