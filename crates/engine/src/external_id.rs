use crate::error::EngineError;
use common::config::components::external_id::ExternalIdSettings;
use common::types::{ObjectDescribe, OrgId};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use shared_clients::{PlatformError, RateLimitedClient};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use templates::MigrationTemplate;

/// Which candidate field matched, in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    NamespacedManaged,
    NamespacedUnmanaged,
    Fallback,
}

impl Display for DetectionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionStrategy::NamespacedManaged => write!(f, "managed"),
            DetectionStrategy::NamespacedUnmanaged => write!(f, "unmanaged"),
            DetectionStrategy::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedField {
    pub org_id: OrgId,
    pub object_type: String,
    pub field: String,
    pub strategy: DetectionStrategy,
}

/// The join key of one object type for a source/target pair. Extraction keys
/// on the source org's field, loads write the target org's field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalIdConfig {
    pub object_type: String,
    pub source: ResolvedField,
    pub target: ResolvedField,
}

impl ExternalIdConfig {
    pub fn extract_field(&self) -> &str {
        &self.source.field
    }

    pub fn load_field(&self) -> &str {
        &self.target.field
    }

    pub fn is_aligned(&self) -> bool {
        self.source.field == self.target.field
    }
}

/// Resolved join keys of one run, by object type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExternalIdMap(BTreeMap<String, ExternalIdConfig>);

impl ExternalIdMap {
    pub fn insert(&mut self, config: ExternalIdConfig) {
        self.0.insert(config.object_type.clone(), config);
    }

    #[track_caller]
    pub fn get(&self, object_type: &str) -> Result<&ExternalIdConfig, EngineError> {
        self.0.get(object_type).ok_or_else(|| {
            EngineError::schema(format!(
                "no external identifier was resolved for {object_type}"
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalIdConfig> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ExternalIdConfig> for ExternalIdMap {
    fn from_iter<T: IntoIterator<Item = ExternalIdConfig>>(iter: T) -> Self {
        let mut map = Self::default();
        for config in iter {
            map.insert(config);
        }
        map
    }
}

/// First candidate present in `describe`, returned with the schema's own
/// spelling of the field name.
pub fn detect(
    describe: &ObjectDescribe,
    settings: &ExternalIdSettings,
) -> Option<(String, DetectionStrategy)> {
    let candidates = [
        (settings.managed_field(), DetectionStrategy::NamespacedManaged),
        (
            settings.unmanaged_field().to_string(),
            DetectionStrategy::NamespacedUnmanaged,
        ),
        (settings.fallback_field.clone(), DetectionStrategy::Fallback),
    ];
    candidates
        .into_iter()
        .find_map(|(name, strategy)| describe.field(&name).map(|f| (f.name.clone(), strategy)))
}

type CacheKey = (OrgId, String);

/// Detects join-key fields from live schemas. One resolver serves one run:
/// results and describes are cached for its lifetime only, since an org's
/// schema may change between runs.
pub struct ExternalIdResolver {
    client: Arc<RateLimitedClient>,
    settings: ExternalIdSettings,
    resolved: Mutex<HashMap<CacheKey, ResolvedField>>,
    describes: Mutex<HashMap<CacheKey, Arc<ObjectDescribe>>>,
}

impl ExternalIdResolver {
    pub fn new(client: Arc<RateLimitedClient>, settings: ExternalIdSettings) -> Self {
        Self {
            client,
            settings,
            resolved: Mutex::new(HashMap::new()),
            describes: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ExternalIdSettings {
        &self.settings
    }

    /// Cached describe of `object_type` in `org`. A type the org does not
    /// know is a schema error.
    pub async fn describe(
        &self,
        org: &OrgId,
        object_type: &str,
    ) -> Result<Arc<ObjectDescribe>, EngineError> {
        let key = (org.clone(), object_type.to_string());
        let cached = self.describes.lock().get(&key).cloned();
        if let Some(describe) = cached {
            return Ok(describe);
        }
        let describe = match self.client.describe(org, object_type).await {
            Ok(d) => Arc::new(d),
            Err(PlatformError::Rejected { status: 404, .. }) => {
                return Err(EngineError::schema(format!(
                    "object type {object_type} does not exist in org {org}"
                )))
            }
            Err(err) => return Err(err.into()),
        };
        self.describes.lock().insert(key, Arc::clone(&describe));
        Ok(describe)
    }

    pub async fn resolve(&self, org: &OrgId, object_type: &str) -> Result<ResolvedField, EngineError> {
        let key = (org.clone(), object_type.to_string());
        let cached = self.resolved.lock().get(&key).cloned();
        if let Some(field) = cached {
            return Ok(field);
        }

        let describe = self.describe(org, object_type).await?;
        let (field, strategy) = detect(&describe, &self.settings).ok_or_else(|| {
            EngineError::schema(format!(
                "{object_type} in org {org} has none of the fields [{}, {}, {}]",
                self.settings.managed_field(),
                self.settings.unmanaged_field(),
                self.settings.fallback_field
            ))
        })?;
        debug!("org={org} object={object_type} external_id={field} strategy={strategy}");

        let resolved = ResolvedField {
            org_id: org.clone(),
            object_type: object_type.to_string(),
            field,
            strategy,
        };
        self.resolved.lock().insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Resolves both sides independently. Either side lacking a field fails
    /// the pair; differing fields are kept apart, source for extraction and
    /// target for loads.
    pub async fn reconcile(
        &self,
        source: &OrgId,
        target: &OrgId,
        object_type: &str,
    ) -> Result<ExternalIdConfig, EngineError> {
        let source_field = self.resolve(source, object_type).await?;
        let target_field = self.resolve(target, object_type).await?;
        let config = ExternalIdConfig {
            object_type: object_type.to_string(),
            source: source_field,
            target: target_field,
        };
        if !config.is_aligned() {
            info!(
                "object={object_type} external id differs between orgs, extract={} load={}",
                config.extract_field(),
                config.load_field()
            );
        }
        Ok(config)
    }

    /// Join keys for every object type `template` touches.
    pub async fn resolve_template(
        &self,
        template: &MigrationTemplate,
        source: &OrgId,
        target: &OrgId,
    ) -> Result<ExternalIdMap, EngineError> {
        let mut map = ExternalIdMap::default();
        for object_type in template.object_types() {
            map.insert(self.reconcile(source, target, &object_type).await?);
        }
        Ok(map)
    }
}
