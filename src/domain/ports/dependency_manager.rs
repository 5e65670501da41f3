use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::domain::models::{DependencyEdge, DependencyGraph};

/// Builds the dependency graph for a set of specs and checks it for cycles.
#[async_trait]
pub trait DependencyManager: Send + Sync {
    async fn build_dependency_graph(
        &self,
        spec_names: &[String],
    ) -> anyhow::Result<DependencyGraph>;

    /// A non-empty path means the graph is cyclic; `None` means acyclic.
    fn detect_circular_dependencies(&self, graph: &DependencyGraph) -> Option<Vec<String>> {
        graph.find_cycle()
    }
}

/// In-memory dependency map. Each entry maps a spec to its prerequisites.
#[derive(Debug, Clone, Default)]
pub struct StaticDependencyManager {
    dependencies: HashMap<String, Vec<String>>,
}

impl StaticDependencyManager {
    pub fn new(dependencies: HashMap<String, Vec<String>>) -> Self {
        Self { dependencies }
    }

    /// A manager with no edges at all.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DependencyManager for StaticDependencyManager {
    async fn build_dependency_graph(
        &self,
        spec_names: &[String],
    ) -> anyhow::Result<DependencyGraph> {
        let mut edges = Vec::new();
        for spec in spec_names {
            if let Some(prereqs) = self.dependencies.get(spec) {
                for prereq in prereqs {
                    edges.push(DependencyEdge {
                        from: spec.clone(),
                        to: prereq.clone(),
                    });
                }
            }
        }

        Ok(DependencyGraph {
            nodes: spec_names.to_vec(),
            edges,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct DepsManifest {
    #[serde(default)]
    depends_on: Vec<String>,
}

/// Reads dependency declarations from `.kiro/specs/<name>/deps.json`.
///
/// Specs without a manifest have no prerequisites. Prerequisites that are
/// not part of the requested spec set are rejected before planning.
#[derive(Debug, Clone)]
pub struct ManifestDependencyManager {
    workspace_root: PathBuf,
}

impl ManifestDependencyManager {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn manifest_path(&self, spec_name: &str) -> PathBuf {
        self.workspace_root
            .join(".kiro")
            .join("specs")
            .join(spec_name)
            .join("deps.json")
    }
}

#[async_trait]
impl DependencyManager for ManifestDependencyManager {
    async fn build_dependency_graph(
        &self,
        spec_names: &[String],
    ) -> anyhow::Result<DependencyGraph> {
        let mut edges = Vec::new();

        for spec in spec_names {
            let path = self.manifest_path(spec);
            if !path.exists() {
                continue;
            }

            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read {}: {e}", path.display())
            })?;
            let manifest: DepsManifest = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid deps manifest {}: {e}", path.display()))?;

            for prereq in manifest.depends_on {
                if !spec_names.contains(&prereq) {
                    anyhow::bail!(
                        "Spec '{spec}' depends on '{prereq}', which is not part of this run"
                    );
                }
                edges.push(DependencyEdge {
                    from: spec.clone(),
                    to: prereq,
                });
            }
        }

        Ok(DependencyGraph {
            nodes: spec_names.to_vec(),
            edges,
        })
    }
}
