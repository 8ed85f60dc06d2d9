//! Dependency graph construction and topological ordering.
//!
//! The resolver is pure: it reads descriptors and produces either a
//! [`ResolvedOrder`] or a [`ResolveError`]. The same descriptor set always yields
//! the same order regardless of the order it was discovered in, because roots and
//! dependency lists are both visited in module-name order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::descriptor::ModuleDescriptor;
use crate::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("module '{name}' appears more than once in the descriptor set")]
    DuplicateModule { name: String },

    #[error("module '{module}' depends on '{missing}', which was not discovered")]
    MissingDependency { module: String, missing: String },

    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error(
        "module '{module}' requires '{dependency}' {required}, but version {actual} was discovered"
    )]
    VersionMismatch {
        module: String,
        dependency: String,
        required: String,
        actual: String,
    },

    #[error("module '{module}' declares an unparsable version '{version}': {source}")]
    InvalidVersion {
        module: String,
        version: String,
        #[source]
        source: VersionError,
    },
}

/// Non-fatal findings from graph construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    OptionalDependencyAbsent { module: String, dependency: String },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OptionalDependencyAbsent { module, dependency } => write!(
                f,
                "optional dependency '{dependency}' of module '{module}' is not present"
            ),
        }
    }
}

/// Directed graph of module dependencies. Built fresh for every bootstrap and never
/// mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
    dependents: BTreeMap<String, Vec<String>>,
    warnings: Vec<ResolveWarning>,
}

impl DependencyGraph {
    /// Build the graph, validating every edge.
    ///
    /// Modules are checked in name order and the first problem found is returned.
    /// An absent optional dependency produces a warning and no edge.
    ///
    /// # Errors
    /// Returns `ResolveError` for duplicate names, missing required dependencies,
    /// unsatisfied version requirements, or unparsable versions of required targets.
    pub fn build(descriptors: &[ModuleDescriptor]) -> Result<Self, ResolveError> {
        let mut by_name: BTreeMap<&str, &ModuleDescriptor> = BTreeMap::new();
        for d in descriptors {
            if by_name.insert(d.name(), d).is_some() {
                return Err(ResolveError::DuplicateModule {
                    name: d.name().to_owned(),
                });
            }
        }

        let mut graph = Self::default();
        for (&name, descriptor) in &by_name {
            let mut deps = Vec::with_capacity(descriptor.dependencies().len());
            for dep in descriptor.dependencies() {
                let Some(target) = by_name.get(dep.name()) else {
                    if dep.is_optional() {
                        tracing::warn!(
                            module = name,
                            dependency = dep.name(),
                            "Optional dependency not present"
                        );
                        graph.warnings.push(ResolveWarning::OptionalDependencyAbsent {
                            module: name.to_owned(),
                            dependency: dep.name().to_owned(),
                        });
                        continue;
                    }
                    return Err(ResolveError::MissingDependency {
                        module: name.to_owned(),
                        missing: dep.name().to_owned(),
                    });
                };

                if let Some(req) = dep.requirement() {
                    let actual =
                        target
                            .parsed_version()
                            .map_err(|source| ResolveError::InvalidVersion {
                                module: target.name().to_owned(),
                                version: target.version().to_owned(),
                                source,
                            })?;
                    if !req.matches(&actual) {
                        return Err(ResolveError::VersionMismatch {
                            module: name.to_owned(),
                            dependency: dep.name().to_owned(),
                            required: req.to_string(),
                            actual: target.version().to_owned(),
                        });
                    }
                }

                deps.push(dep.name().to_owned());
            }
            deps.sort();

            for dep in &deps {
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(name.to_owned());
            }
            graph.edges.insert(name.to_owned(), deps);
        }

        Ok(graph)
    }

    /// Topologically sort the graph: every dependency precedes its dependents.
    ///
    /// # Errors
    /// Returns `ResolveError::CircularDependency` carrying the full cycle, starting and
    /// ending with the first module found to be on it.
    pub fn resolve(&self) -> Result<ResolvedOrder, ResolveError> {
        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.edges.len());
        let mut path: Vec<&str> = Vec::new();
        let mut order: Vec<String> = Vec::with_capacity(self.edges.len());

        for root in self.edges.keys() {
            self.visit(root, &mut marks, &mut path, &mut order)?;
        }

        Ok(ResolvedOrder::new(order))
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|n| *n == node).unwrap_or_default();
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|n| (*n).to_owned()).collect();
                cycle.push(node.to_owned());
                return Err(ResolveError::CircularDependency { cycle });
            }
            None => {}
        }

        marks.insert(node, Mark::InProgress);
        path.push(node);
        for dep in self.dependencies_of(node) {
            self.visit(dep, marks, path, order)?;
        }
        path.pop();
        marks.insert(node, Mark::Done);
        order.push(node.to_owned());
        Ok(())
    }

    /// Direct dependencies of `module` that are present in the graph, sorted by name.
    #[must_use]
    pub fn dependencies_of(&self, module: &str) -> &[String] {
        self.edges.get(module).map(Vec::as_slice).unwrap_or_default()
    }

    /// Modules that directly depend on `module`, sorted by name.
    #[must_use]
    pub fn dependents_of(&self, module: &str) -> &[String] {
        self.dependents.get(module).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every module that depends on `module` directly or transitively.
    #[must_use]
    pub fn transitive_dependents(&self, module: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = vec![module];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents_of(current) {
                if seen.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        seen
    }

    #[must_use]
    pub fn contains(&self, module: &str) -> bool {
        self.edges.contains_key(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[must_use]
    pub fn warnings(&self) -> &[ResolveWarning] {
        &self.warnings
    }
}

#[derive(Clone, Copy)]
enum Mark {
    InProgress,
    Done,
}

/// Build and sort in one step.
///
/// # Errors
/// See [`DependencyGraph::build`] and [`DependencyGraph::resolve`].
pub fn resolve(descriptors: &[ModuleDescriptor]) -> Result<ResolvedOrder, ResolveError> {
    DependencyGraph::build(descriptors)?.resolve()
}

/// Module names in dependency order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOrder {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ResolvedOrder {
    fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.names.iter().map(String::as_str)
    }

    /// Teardown order: the exact reverse.
    pub fn reversed(&self) -> impl Iterator<Item = &str> {
        self.iter().rev()
    }

    #[must_use]
    pub fn position(&self, module: &str) -> Option<usize> {
        self.positions.get(module).copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for ResolvedOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names.join(" -> "))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::DependencySpec;

    fn m(name: &str, deps: &[&str]) -> ModuleDescriptor {
        deps.iter()
            .fold(ModuleDescriptor::new(name), |d, dep| d.depends_on(*dep))
    }

    fn order(descriptors: &[ModuleDescriptor]) -> Vec<String> {
        resolve(descriptors).unwrap().as_slice().to_vec()
    }

    #[test]
    fn chain_resolves_dependencies_first() {
        let set = [m("c", &["a", "b"]), m("b", &["a"]), m("a", &[])];
        assert_eq!(order(&set), vec!["a", "b", "c"]);
    }

    #[test]
    fn independent_modules_are_ordered_by_name() {
        let set = [m("zeta", &[]), m("alpha", &[]), m("mid", &[])];
        assert_eq!(order(&set), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn order_does_not_depend_on_input_order() {
        let base = vec![
            m("api", &["auth", "storage"]),
            m("auth", &["storage"]),
            m("audit", &[]),
            m("storage", &[]),
            m("tasks", &["storage", "audit"]),
        ];
        let expected = order(&base);

        let mut reversed = base.clone();
        reversed.reverse();
        assert_eq!(order(&reversed), expected);

        for shift in 1..base.len() {
            let mut rotated = base.clone();
            rotated.rotate_left(shift);
            assert_eq!(order(&rotated), expected, "rotation {shift}");
        }
    }

    #[test]
    fn every_dependency_precedes_its_dependent() {
        let set = [
            m("api", &["auth", "storage"]),
            m("auth", &["storage", "crypto"]),
            m("crypto", &[]),
            m("storage", &["crypto"]),
            m("web", &["api"]),
        ];
        let resolved = resolve(&set).unwrap();
        for d in &set {
            for dep in d.dependencies() {
                assert!(
                    resolved.position(dep.name()) < resolved.position(d.name()),
                    "{} must precede {}",
                    dep.name(),
                    d.name()
                );
            }
        }
    }

    #[test]
    fn missing_dependency_names_module_and_target() {
        let err = resolve(&[m("a", &[]), m("b", &["z"])]).unwrap_err();
        match err {
            ResolveError::MissingDependency { module, missing } => {
                assert_eq!(module, "b");
                assert_eq!(missing, "z");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn two_node_cycle_reports_full_path() {
        let err = resolve(&[m("a", &["b"]), m("b", &["a"])]).unwrap_err();
        match err {
            ResolveError::CircularDependency { cycle } => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn three_node_cycle_reports_members_in_traversal_order() {
        let err = resolve(&[m("a", &["b"]), m("b", &["c"]), m("c", &["a"]), m("d", &[])])
            .unwrap_err();
        assert_eq!(err.to_string(), "circular dependency: a -> b -> c -> a");
    }

    #[test]
    fn cycle_behind_an_acyclic_prefix_excludes_the_prefix() {
        let err = resolve(&[m("a", &["b"]), m("b", &["c"]), m("c", &["b"])]).unwrap_err();
        match err {
            ResolveError::CircularDependency { cycle } => assert_eq!(cycle, vec!["b", "c", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = resolve(&[m("a", &["a"])]).unwrap_err();
        assert!(matches!(err, ResolveError::CircularDependency { ref cycle } if cycle == &["a", "a"]));
    }

    #[test]
    fn absent_optional_dependency_is_a_warning() {
        let set = [
            ModuleDescriptor::new("tasks").depends_on(DependencySpec::optional("metrics")),
            m("storage", &[]),
        ];
        let graph = DependencyGraph::build(&set).unwrap();
        assert!(graph.dependencies_of("tasks").is_empty());
        assert_eq!(
            graph.warnings(),
            &[ResolveWarning::OptionalDependencyAbsent {
                module: "tasks".to_owned(),
                dependency: "metrics".to_owned()
            }]
        );
        assert_eq!(graph.resolve().unwrap().len(), 2);
    }

    #[test]
    fn present_optional_dependency_orders_like_required() {
        let set = [
            ModuleDescriptor::new("audit"),
            ModuleDescriptor::new("aardvark").depends_on(DependencySpec::optional("audit")),
        ];
        assert_eq!(order(&set), vec!["audit", "aardvark"]);
    }

    #[test]
    fn version_requirements_are_checked() {
        let dep = DependencySpec::required("storage")
            .with_version("^2.0")
            .unwrap();
        let set = [
            ModuleDescriptor::new("storage").with_version("1.4.0"),
            ModuleDescriptor::new("orders").depends_on(dep.clone()),
        ];
        match resolve(&set).unwrap_err() {
            ResolveError::VersionMismatch {
                module,
                dependency,
                required,
                actual,
            } => {
                assert_eq!(module, "orders");
                assert_eq!(dependency, "storage");
                assert_eq!(required, "^2.0");
                assert_eq!(actual, "1.4.0");
            }
            other => panic!("unexpected error: {other}"),
        }

        let set = [
            ModuleDescriptor::new("storage").with_version("2.3.1"),
            ModuleDescriptor::new("orders").depends_on(dep),
        ];
        assert_eq!(order(&set), vec!["storage", "orders"]);
    }

    #[test]
    fn unparsable_target_version_fails_only_when_constrained() {
        let set = [
            ModuleDescriptor::new("storage").with_version("nightly"),
            ModuleDescriptor::new("orders").depends_on("storage"),
        ];
        assert!(resolve(&set).is_ok());

        let set = [
            ModuleDescriptor::new("storage").with_version("nightly"),
            ModuleDescriptor::new("orders")
                .depends_on(DependencySpec::required("storage").with_version(">=1").unwrap()),
        ];
        assert!(matches!(
            resolve(&set),
            Err(ResolveError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn duplicate_descriptors_are_rejected() {
        assert!(matches!(
            resolve(&[m("a", &[]), m("a", &[])]),
            Err(ResolveError::DuplicateModule { .. })
        ));
    }

    #[test]
    fn dependents_and_reverse_order() {
        let set = [m("a", &[]), m("b", &["a"]), m("c", &["b"]), m("d", &[])];
        let graph = DependencyGraph::build(&set).unwrap();
        assert_eq!(graph.dependents_of("a"), &["b".to_owned()]);
        assert_eq!(
            graph.transitive_dependents("a"),
            BTreeSet::from(["b".to_owned(), "c".to_owned()])
        );

        let resolved = graph.resolve().unwrap();
        let forward: Vec<_> = resolved.iter().collect();
        let mut backward: Vec<_> = resolved.reversed().collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(resolved.to_string(), "a -> b -> c -> d");
    }

    #[test]
    fn empty_set_resolves_to_empty_order() {
        assert!(resolve(&[]).unwrap().is_empty());
    }
}
