//! Key schema under `<cluster>/`.

/// Builds store keys for one cluster.
#[derive(Debug, Clone)]
pub struct Keys {
    cluster: String,
}

impl Keys {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into().trim_matches('/').to_string(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Join segments under the cluster prefix, dropping empty segments.
    pub fn join(&self, segments: &[&str]) -> String {
        std::iter::once(self.cluster.as_str())
            .chain(segments.iter().map(|s| s.trim_matches('/')).filter(|s| !s.is_empty()))
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn instances_dir(&self) -> String {
        self.join(&["instances"])
    }

    pub fn leases_dir(&self) -> String {
        self.join(&["leases"])
    }

    pub fn machines_dir(&self) -> String {
        self.join(&["machines"])
    }

    pub fn machine(&self, mac: &str) -> String {
        self.join(&["machines", mac])
    }

    pub fn variables_dir(&self) -> String {
        self.join(&["variables"])
    }

    pub fn workspace_update(&self) -> String {
        self.join(&["workspace-update"])
    }
}

/// Rewrite a dotted variable path into a slash-separated key suffix.
#[must_use]
pub fn dotted_to_path(dotted: &str) -> String {
    dotted
        .split('.')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
