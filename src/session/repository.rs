//! Repository entry point
//!
//! A [`Repository`] holds what sessions share: the provider (usually the
//! caching decorator), the schema resolver, the namespace registry, the
//! path factory and the stable handle table. It is `Send + Sync`; wrap it
//! in an `Arc` to log in from several threads.

use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use super::session::Session;
use crate::error::{Result, StoreError};
use crate::item::{PermissiveSchema, PropertyRecord, SchemaResolver, Value};
use crate::path::{
    HandleTable, NamespaceRegistry, Path, PathFactory, QualifiedName, DEFAULT_HANDLE_CAPACITY,
    DEFAULT_INTERN_CAPACITY,
};
use crate::storage::{
    registry, CachingProvider, MemoryProvider, RepositoryConfig, RepositoryHome, StorageProvider,
};

pub const DEFAULT_WORKSPACE: &str = "default";

pub struct Repository {
    provider: Arc<dyn StorageProvider>,
    schema: Arc<dyn SchemaResolver>,
    namespaces: Arc<NamespaceRegistry>,
    factory: Arc<PathFactory>,
    handles: Arc<HandleTable>,
    default_workspace: String,
}

impl Repository {
    /// A repository over `provider` with a permissive schema. Creates the
    /// default workspace.
    pub fn new(provider: Arc<dyn StorageProvider>) -> Result<Self> {
        Self::build(
            provider,
            DEFAULT_WORKSPACE,
            DEFAULT_INTERN_CAPACITY,
            DEFAULT_HANDLE_CAPACITY,
        )
    }

    fn build(
        provider: Arc<dyn StorageProvider>,
        default_workspace: &str,
        intern_capacity: usize,
        handle_capacity: usize,
    ) -> Result<Self> {
        let namespaces = Arc::new(NamespaceRegistry::new());
        let factory = Arc::new(PathFactory::with_capacity(
            Arc::clone(&namespaces) as _,
            intern_capacity,
        ));
        let repo = Self {
            provider,
            schema: Arc::new(PermissiveSchema),
            namespaces,
            factory,
            handles: Arc::new(HandleTable::new(handle_capacity)),
            default_workspace: default_workspace.to_string(),
        };
        repo.create_workspace(default_workspace)?;
        Ok(repo)
    }

    /// A process-local repository behind the caching decorator
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(CachingProvider::new(Arc::new(MemoryProvider::new()))))
    }

    /// Builds a repository from configuration; backend locations resolve
    /// against `home`
    pub fn from_config(config: &RepositoryConfig, home: &FsPath) -> anyhow::Result<Self> {
        config.validate()?;
        let provider = registry::open_provider(config, home)?;
        let repo = Self::build(
            provider,
            &config.default_workspace,
            config.paths.intern_capacity,
            config.paths.handle_capacity,
        )?;

        for (prefix, uri) in &config.namespaces {
            repo.namespaces
                .register(prefix, uri)
                .with_context(|| format!("Failed to register namespace prefix '{}'", prefix))?;
        }
        for workspace in config.all_workspaces() {
            repo.create_workspace(&workspace)?;
        }

        info!(
            provider = %config.provider.kind,
            cache = config.cache.enabled,
            default_workspace = %repo.default_workspace,
            "opened repository"
        );
        Ok(repo)
    }

    /// Opens the repository configured in a repository home
    pub fn open_home(home: &RepositoryHome) -> anyhow::Result<Self> {
        Self::from_config(home.config(), home.root())
    }

    pub fn with_schema(mut self, schema: Arc<dyn SchemaResolver>) -> Self {
        self.schema = schema;
        self
    }

    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn factory(&self) -> &Arc<PathFactory> {
        &self.factory
    }

    pub fn default_workspace(&self) -> &str {
        &self.default_workspace
    }

    pub fn workspaces(&self) -> Result<Vec<String>> {
        self.provider.workspaces()
    }

    /// Creates a workspace if missing and gives its root a primary type
    pub fn create_workspace(&self, workspace: &str) -> Result<()> {
        if workspace.is_empty() {
            return Err(StoreError::provider(workspace, "/", "workspace name is empty"));
        }
        self.provider.create_workspace(workspace)?;
        let type_path = Path::root().child_named(QualifiedName::primary_type());
        if !self.provider.property_exists(workspace, &type_path)? {
            let record = PropertyRecord::single(Value::Name(QualifiedName::unstructured()));
            self.provider.put_property(workspace, &type_path, &record)?;
            debug!(workspace, "initialised workspace root");
        }
        Ok(())
    }

    /// Opens a session on `workspace`, or the default workspace. The
    /// workspace must exist.
    pub fn login(&self, workspace: Option<&str>) -> Result<Session> {
        let workspace = workspace.unwrap_or(&self.default_workspace);
        if !self.workspaces()?.iter().any(|w| w == workspace) {
            return Err(StoreError::provider(workspace, "/", "no such workspace"));
        }
        Session::open(
            workspace,
            Arc::clone(&self.provider),
            Arc::clone(&self.schema),
            Arc::clone(&self.factory),
            Arc::clone(&self.handles),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_workspace_is_ready() {
        let repo = Repository::in_memory().unwrap();
        let session = repo.login(None).unwrap();
        let root = session.root_node();

        assert_eq!(session.workspace(), "default");
        assert_eq!(session.primary_type(root).unwrap(), QualifiedName::unstructured());
    }

    #[test]
    fn unknown_workspace_is_refused() {
        let repo = Repository::in_memory().unwrap();

        assert!(matches!(
            repo.login(Some("nope")),
            Err(StoreError::ProviderFailure { .. })
        ));
        repo.create_workspace("nope").unwrap();
        assert!(repo.login(Some("nope")).is_ok());
    }

    #[test]
    fn config_registers_namespaces_and_workspaces() {
        let dir = TempDir::new().unwrap();
        let mut config = RepositoryConfig::default();
        config.workspaces = vec!["staging".to_string()];
        config
            .namespaces
            .insert("ex".to_string(), "http://example.com/ns".to_string());

        let repo = Repository::from_config(&config, dir.path()).unwrap();

        assert_eq!(repo.workspaces().unwrap(), vec!["default", "staging"]);
        let path = repo.factory().parse("/ex:item").unwrap();
        assert_eq!(path.name().unwrap().uri(), "http://example.com/ns");
    }

    #[test]
    fn open_home_uses_its_backend() {
        let dir = TempDir::new().unwrap();
        let home = RepositoryHome::init(dir.path()).unwrap();
        {
            let repo = Repository::open_home(&home).unwrap();
            let mut session = repo.login(None).unwrap();
            session.add_node("/kept", None).unwrap();
            session.save().unwrap();
        }

        let repo = Repository::open_home(&home).unwrap();
        let mut session = repo.login(None).unwrap();
        assert!(session.item_exists("/kept").unwrap());
    }
}
