//! Seams the embedding application implements.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::types::ProjectContext;

/// Resolves project metadata by name for prompt enrichment.
///
/// The gateway calls this once per `generate_text` that names a project.
/// Unknown names resolve to `None`; the gateway then enriches with the bare
/// project name.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn lookup(&self, name: &str) -> Option<ProjectContext>;
}

#[async_trait]
impl ProjectDirectory for HashMap<String, ProjectContext> {
    async fn lookup(&self, name: &str) -> Option<ProjectContext> {
        self.get(name).cloned()
    }
}

#[async_trait]
impl ProjectDirectory for BTreeMap<String, ProjectContext> {
    async fn lookup(&self, name: &str) -> Option<ProjectContext> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn map_lookup() {
        let mut projects = HashMap::new();
        projects.insert(
            "demo".to_string(),
            ProjectContext::new("demo").detail("genre", "noir"),
        );
        let found = projects.lookup("demo").await.unwrap();
        assert_eq!(found.details["genre"], "noir");
        assert!(projects.lookup("other").await.is_none());
    }
}
