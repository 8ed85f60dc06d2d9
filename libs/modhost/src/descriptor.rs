//! Static module metadata.

use std::fmt;
use std::path::PathBuf;

use crate::version::{Version, VersionError, VersionReq};

/// Where a module candidate was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// Registered at link time through `inventory`.
    Linked,
    /// Declared by a manifest file on disk.
    Manifest(PathBuf),
    /// Handed to discovery explicitly by the host.
    Explicit,
}

impl fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked => f.write_str("linked"),
            Self::Manifest(path) => write!(f, "manifest:{}", path.display()),
            Self::Explicit => f.write_str("explicit"),
        }
    }
}

/// A declared dependency on another module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    name: String,
    requirement: Option<VersionReq>,
    optional: bool,
}

impl DependencySpec {
    /// Required dependency with no version constraint.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirement: None,
            optional: false,
        }
    }

    /// Optional dependency: ordered like a required one when present, ignored when absent.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirement: None,
            optional: true,
        }
    }

    /// Attach a version requirement.
    ///
    /// # Errors
    /// Returns `VersionError` if `req` is not a valid requirement expression.
    pub fn with_version(mut self, req: &str) -> Result<Self, VersionError> {
        let parsed: VersionReq = req.parse()?;
        self.requirement = (!parsed.is_any()).then_some(parsed);
        Ok(self)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn requirement(&self) -> Option<&VersionReq> {
        self.requirement.as_ref()
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

impl From<&str> for DependencySpec {
    fn from(name: &str) -> Self {
        Self::required(name)
    }
}

/// Identity and static metadata for one module.
///
/// Built once at discovery time. All builder methods consume `self`, and there are
/// no setters once the descriptor has been handed to discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    name: String,
    version: String,
    description: String,
    dependencies: Vec<DependencySpec>,
    source: ModuleSource,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "0.0.0".to_owned(),
            description: String::new(),
            dependencies: Vec::new(),
            source: ModuleSource::Explicit,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a dependency. A second declaration of the same name replaces the first.
    #[must_use]
    pub fn depends_on(mut self, dep: impl Into<DependencySpec>) -> Self {
        let dep = dep.into();
        if let Some(existing) = self
            .dependencies
            .iter_mut()
            .find(|d| d.name == dep.name)
        {
            *existing = dep;
        } else {
            self.dependencies.push(dep);
        }
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: ModuleSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Parsed version, if the declared string is a valid dotted version.
    ///
    /// # Errors
    /// Returns `VersionError` if the declared version cannot be parsed.
    pub fn parsed_version(&self) -> Result<Version, VersionError> {
        self.version.parse()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn dependencies(&self) -> &[DependencySpec] {
        &self.dependencies
    }

    #[must_use]
    pub fn source(&self) -> &ModuleSource {
        &self.source
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn dependencies_are_deduplicated_by_name() {
        let d = ModuleDescriptor::new("orders")
            .depends_on("storage")
            .depends_on(DependencySpec::optional("audit"))
            .depends_on(DependencySpec::optional("storage"));

        let names: Vec<_> = d.dependencies().iter().map(DependencySpec::name).collect();
        assert_eq!(names, vec!["storage", "audit"]);
        assert!(d.dependencies()[0].is_optional(), "later declaration wins");
    }

    #[test]
    fn wildcard_requirement_is_dropped() {
        let dep = DependencySpec::required("storage").with_version("*").unwrap();
        assert!(dep.requirement().is_none());

        let dep = DependencySpec::required("storage")
            .with_version("^1.0")
            .unwrap();
        assert_eq!(dep.requirement().unwrap().to_string(), "^1.0");
    }

    #[test]
    fn invalid_requirement_is_rejected() {
        assert!(
            DependencySpec::required("storage")
                .with_version(">=abc")
                .is_err()
        );
    }

    #[test]
    fn source_display() {
        assert_eq!(ModuleSource::Linked.to_string(), "linked");
        assert_eq!(
            ModuleSource::Manifest(PathBuf::from("/opt/m/a.module.toml")).to_string(),
            "manifest:/opt/m/a.module.toml"
        );
    }
}
