//! Module discovery.
//!
//! Candidates come from three sources, processed in this order:
//! 1. **Manifests**: `*.module.toml` files (configurable glob) under the search paths.
//!    A manifest carries the module metadata and names the linked entry that provides
//!    its hooks and instantiator.
//! 2. **Linked registrations**: modules compiled into the binary that submitted a
//!    [`Registrator`] through `inventory` (only when `include_already_loaded` is set).
//! 3. **Explicit registrations**: handed to [`ModuleDiscovery::with_registration`].
//!
//! Discovery is read-only. It never calls module code besides the registrator
//! functions, and it never instantiates modules.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::contracts::{Module, ModuleInstantiator, ModuleSetup, NoSetup};
use crate::descriptor::{DependencySpec, ModuleDescriptor, ModuleSource};
use crate::services::ResolutionScope;

pub const DEFAULT_MANIFEST_PATTERN: &str = "*.module.toml";

/// Predicate applied to every manifest file before it is parsed.
pub type PathFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Where and how to look for modules.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryOptions {
    pub search_paths: Vec<PathBuf>,
    pub file_pattern: String,
    pub include_already_loaded: bool,
    pub recursive: bool,
    pub excluded_names: BTreeSet<String>,
    #[serde(skip)]
    pub custom_filter: Option<PathFilter>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            file_pattern: DEFAULT_MANIFEST_PATTERN.to_owned(),
            include_already_loaded: true,
            recursive: false,
            excluded_names: BTreeSet::new(),
            custom_filter: None,
        }
    }
}

impl DiscoveryOptions {
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded_names.insert(name.into());
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.custom_filter = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for DiscoveryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryOptions")
            .field("search_paths", &self.search_paths)
            .field("file_pattern", &self.file_pattern)
            .field("include_already_loaded", &self.include_already_loaded)
            .field("recursive", &self.recursive)
            .field("excluded_names", &self.excluded_names)
            .field("custom_filter", &self.custom_filter.is_some())
            .finish()
    }
}

/// A module candidate: its descriptor plus the handles needed to configure and build it.
#[derive(Clone)]
pub struct ModuleRegistration {
    descriptor: ModuleDescriptor,
    setup: Arc<dyn ModuleSetup>,
    instantiator: Arc<dyn ModuleInstantiator>,
}

impl ModuleRegistration {
    pub fn new<F>(descriptor: ModuleDescriptor, instantiator: F) -> Self
    where
        F: Fn(&ResolutionScope<'_>) -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        Self::with_instantiator(descriptor, Arc::new(instantiator))
    }

    #[must_use]
    pub fn with_instantiator(
        descriptor: ModuleDescriptor,
        instantiator: Arc<dyn ModuleInstantiator>,
    ) -> Self {
        Self {
            descriptor,
            setup: Arc::new(NoSetup),
            instantiator,
        }
    }

    #[must_use]
    pub fn with_setup(mut self, setup: impl ModuleSetup) -> Self {
        self.setup = Arc::new(setup);
        self
    }

    #[must_use]
    pub fn with_shared_setup(mut self, setup: Arc<dyn ModuleSetup>) -> Self {
        self.setup = setup;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn setup(&self) -> &Arc<dyn ModuleSetup> {
        &self.setup
    }

    #[must_use]
    pub fn instantiator(&self) -> &Arc<dyn ModuleInstantiator> {
        &self.instantiator
    }

    fn sourced(mut self, source: ModuleSource) -> Self {
        self.descriptor = self.descriptor.with_source(source);
        self
    }
}

impl fmt::Debug for ModuleRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistration")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Collects registrations from one linked registrator.
#[derive(Default)]
pub struct RegistrationSink {
    entries: Vec<ModuleRegistration>,
}

impl RegistrationSink {
    pub fn register(&mut self, registration: ModuleRegistration) {
        self.entries.push(registration);
    }
}

/// Link-time registration hook.
///
/// ```ignore
/// modhost::inventory::submit! {
///     modhost::Registrator(|sink| sink.register(storage_registration()))
/// }
/// ```
pub struct Registrator(pub fn(&mut RegistrationSink));

inventory::collect!(Registrator);

/// Every registration submitted through `inventory`, sorted by module name.
#[must_use]
pub fn linked_registrations() -> Vec<ModuleRegistration> {
    let mut sink = RegistrationSink::default();
    for registrator in inventory::iter::<Registrator> {
        (registrator.0)(&mut sink);
    }
    let mut entries = sink.entries;
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    entries
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("module '{name}' discovered twice: {first} and {second}")]
    DuplicateModule {
        name: String,
        first: ModuleSource,
        second: ModuleSource,
    },

    #[error("invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read manifest {}: {source}", path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("manifest {} refers to entry '{entry}' which is not linked into this binary", path.display())]
    UnresolvedEntry { path: PathBuf, entry: String },
}

/// Non-fatal findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryWarning {
    MissingLocation { path: PathBuf },
    NotADirectory { path: PathBuf },
}

impl fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLocation { path } => {
                write!(f, "search path does not exist: {}", path.display())
            }
            Self::NotADirectory { path } => {
                write!(f, "search path is not a directory: {}", path.display())
            }
        }
    }
}

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovered {
    pub modules: Vec<ModuleRegistration>,
    pub warnings: Vec<DiscoveryWarning>,
}

impl Discovered {
    #[must_use]
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.modules.iter().map(|m| m.descriptor.clone()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModuleManifest {
    name: String,
    version: Option<String>,
    #[serde(default)]
    description: String,
    entry: Option<String>,
    #[serde(default)]
    dependencies: Vec<ManifestDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestDependency {
    Name(String),
    Detailed {
        name: String,
        version: Option<String>,
        #[serde(default)]
        optional: bool,
    },
}

impl ModuleManifest {
    fn from_file(path: &Path) -> Result<Self, DiscoveryError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| DiscoveryError::ManifestRead {
                path: path.to_path_buf(),
                source,
            })?;
        let manifest: ModuleManifest =
            toml::from_str(&contents).map_err(|source| DiscoveryError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })?;

        if manifest.name.trim().is_empty() {
            return Err(DiscoveryError::InvalidManifest {
                path: path.to_path_buf(),
                reason: "module name cannot be empty".to_owned(),
            });
        }
        Ok(manifest)
    }

    fn entry(&self) -> &str {
        self.entry.as_deref().unwrap_or(&self.name)
    }

    /// Manifest metadata replaces the linked entry's descriptor.
    fn descriptor(
        &self,
        path: &Path,
        linked: &ModuleDescriptor,
    ) -> Result<ModuleDescriptor, DiscoveryError> {
        let version = self
            .version
            .clone()
            .unwrap_or_else(|| linked.version().to_owned());
        let mut descriptor = ModuleDescriptor::new(self.name.clone())
            .with_version(version)
            .with_description(self.description.clone())
            .with_source(ModuleSource::Manifest(path.to_path_buf()));

        for dep in &self.dependencies {
            let spec = match dep {
                ManifestDependency::Name(name) => DependencySpec::required(name.clone()),
                ManifestDependency::Detailed {
                    name,
                    version,
                    optional,
                } => {
                    let base = if *optional {
                        DependencySpec::optional(name.clone())
                    } else {
                        DependencySpec::required(name.clone())
                    };
                    match version {
                        Some(req) => base.with_version(req).map_err(|e| {
                            DiscoveryError::InvalidManifest {
                                path: path.to_path_buf(),
                                reason: format!("dependency '{name}': {e}"),
                            }
                        })?,
                        None => base,
                    }
                }
            };
            descriptor = descriptor.depends_on(spec);
        }
        Ok(descriptor)
    }
}

/// Discovery engine.
pub struct ModuleDiscovery {
    options: DiscoveryOptions,
    linked: Option<Vec<ModuleRegistration>>,
    explicit: Vec<ModuleRegistration>,
}

impl ModuleDiscovery {
    #[must_use]
    pub fn new(options: DiscoveryOptions) -> Self {
        Self {
            options,
            linked: None,
            explicit: Vec::new(),
        }
    }

    /// Add an explicit registration.
    #[must_use]
    pub fn with_registration(mut self, registration: ModuleRegistration) -> Self {
        self.explicit.push(registration);
        self
    }

    /// Use `entries` as the set of linked registrations instead of the `inventory` ones.
    #[must_use]
    pub fn with_linked(mut self, mut entries: Vec<ModuleRegistration>) -> Self {
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        self.linked = Some(entries);
        self
    }

    /// Run discovery.
    ///
    /// # Errors
    /// Returns `DiscoveryError` for duplicate module names, unreadable or invalid
    /// manifests, manifests naming an entry that is not linked, an invalid file pattern,
    /// or a directory scan failure.
    pub fn discover(self) -> Result<Discovered, DiscoveryError> {
        let Self {
            options,
            linked,
            explicit,
        } = self;

        let pattern = glob::Pattern::new(&options.file_pattern).map_err(|source| {
            DiscoveryError::InvalidPattern {
                pattern: options.file_pattern.clone(),
                source,
            }
        })?;

        let mut linked: BTreeMap<String, ModuleRegistration> = linked
            .unwrap_or_else(linked_registrations)
            .into_iter()
            .map(|r| (r.name().to_owned(), r))
            .collect();

        let mut out = Discovered::default();
        let mut seen: BTreeMap<String, ModuleSource> = BTreeMap::new();
        let mut consumed_entries: BTreeSet<String> = BTreeSet::new();

        for root in &options.search_paths {
            for path in scan_location(root, &pattern, &options, &mut out.warnings)? {
                let manifest = ModuleManifest::from_file(&path)?;
                let entry_name = manifest.entry().to_owned();
                let Some(entry) = linked.get(&entry_name) else {
                    return Err(DiscoveryError::UnresolvedEntry {
                        path,
                        entry: entry_name,
                    });
                };
                let descriptor = manifest.descriptor(&path, entry.descriptor())?;
                let registration = ModuleRegistration {
                    descriptor,
                    setup: entry.setup.clone(),
                    instantiator: entry.instantiator.clone(),
                };
                consumed_entries.insert(entry_name);
                accept(registration, &options, &mut seen, &mut out)?;
            }
        }

        if options.include_already_loaded {
            for name in &consumed_entries {
                linked.remove(name);
            }
            for registration in linked.into_values() {
                accept(registration.sourced(ModuleSource::Linked), &options, &mut seen, &mut out)?;
            }
        }

        for registration in explicit {
            accept(registration.sourced(ModuleSource::Explicit), &options, &mut seen, &mut out)?;
        }

        tracing::info!(
            modules = out.modules.len(),
            warnings = out.warnings.len(),
            "Module discovery complete"
        );
        Ok(out)
    }
}

fn accept(
    registration: ModuleRegistration,
    options: &DiscoveryOptions,
    seen: &mut BTreeMap<String, ModuleSource>,
    out: &mut Discovered,
) -> Result<(), DiscoveryError> {
    let name = registration.name().to_owned();
    if options.excluded_names.contains(&name) {
        tracing::debug!(module = %name, "Module excluded by configuration");
        return Ok(());
    }

    let source = registration.descriptor().source().clone();
    if let Some(first) = seen.get(&name) {
        return Err(DiscoveryError::DuplicateModule {
            name,
            first: first.clone(),
            second: source,
        });
    }

    tracing::debug!(module = %name, source = %source, "Discovered module");
    seen.insert(name, source);
    out.modules.push(registration);
    Ok(())
}

/// Manifest files under `root`, sorted by path. Missing locations yield a warning.
fn scan_location(
    root: &Path,
    pattern: &glob::Pattern,
    options: &DiscoveryOptions,
    warnings: &mut Vec<DiscoveryWarning>,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.exists() {
        tracing::warn!(path = %root.display(), "Module search path does not exist");
        warnings.push(DiscoveryWarning::MissingLocation {
            path: root.to_path_buf(),
        });
        return Ok(Vec::new());
    }
    if !root.is_dir() {
        tracing::warn!(path = %root.display(), "Module search path is not a directory");
        warnings.push(DiscoveryWarning::NotADirectory {
            path: root.to_path_buf(),
        });
        return Ok(Vec::new());
    }

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| DiscoveryError::Scan {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| pattern.matches(name));
        if !matches {
            continue;
        }
        if let Some(filter) = &options.custom_filter
            && !filter(entry.path())
        {
            tracing::debug!(path = %entry.path().display(), "Manifest rejected by filter");
            continue;
        }
        found.push(entry.into_path());
    }
    found.sort();
    Ok(found)
}
