//! Template repository: embedded base templates plus the workspace overlay.

use crate::context::{ServerAddrs, TemplateData};
use crate::error::TemplateError;
use crate::eval::{FunctionHost, Renderer, TemplateSet};
use crate::functions::MachineFunctions;
use datastore::{DataStore, MacAddr};
use crate::merge::merge_cloud_config;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Entry template of every artifact.
pub const MAIN: &str = "main";

/// A per-machine artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    CloudConfig,
    Ignition,
    BootParams,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [Artifact::CloudConfig, Artifact::Ignition, Artifact::BootParams];

    /// Directory name under `config/`, also the embedded file name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Artifact::CloudConfig => "cloudconfig",
            Artifact::Ignition => "ignition",
            Artifact::BootParams => "bootparams",
        }
    }

    fn base_text(self) -> &'static str {
        match self {
            Artifact::CloudConfig => include_str!("../files/cloudconfig"),
            Artifact::Ignition => include_str!("../files/ignition"),
            Artifact::BootParams => include_str!("../files/bootparams"),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One parsed generation of templates.
#[derive(Debug, Default)]
pub struct Templates {
    base: HashMap<Artifact, TemplateSet>,
    user: HashMap<Artifact, TemplateSet>,
}

impl Templates {
    /// Parse the embedded templates and the overlay under `<workspace>/config`.
    pub fn load(workspace: &Path) -> Result<Self, TemplateError> {
        let mut templates = Templates::default();
        for artifact in Artifact::ALL {
            let mut base = TemplateSet::new();
            base.add(MAIN, artifact.base_text())?;
            templates.base.insert(artifact, base);

            let dir = workspace.join("config").join(artifact.name());
            templates.user.insert(artifact, load_dir(&dir)?);
        }
        Ok(templates)
    }

    /// Whether the workspace overrides `artifact`.
    pub fn has_overlay(&self, artifact: Artifact) -> bool {
        self.user.get(&artifact).is_some_and(|set| set.contains(MAIN))
    }

    /// Render `artifact`, combining base and overlay.
    pub async fn render(
        &self,
        artifact: Artifact,
        host: &dyn FunctionHost,
        data: &TemplateData,
    ) -> Result<String, TemplateError> {
        let empty = TemplateSet::new();
        let base = self.base.get(&artifact).unwrap_or(&empty);
        let user = self.user.get(&artifact).unwrap_or(&empty);
        let root = data.to_value();

        let base_out = Renderer::new(vec![base, user], host, root.clone()).render(MAIN).await?;
        let base_out = base_out.trim_matches('\n');
        if !user.contains(MAIN) {
            return Ok(base_out.to_string());
        }
        let user_out = Renderer::new(vec![user, base], host, root).render(MAIN).await?;
        let user_out = user_out.trim_matches('\n');

        let combined = match artifact {
            Artifact::CloudConfig => merge_cloud_config(base_out, user_out)?,
            Artifact::Ignition | Artifact::BootParams => format!("{}\n{}", base_out, user_out),
        };
        Ok(combined.trim_matches('\n').to_string())
    }
}

/// Every non-hidden file in `dir`, named by its file name.
fn load_dir(dir: &Path) -> Result<TemplateSet, TemplateError> {
    let mut set = TemplateSet::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(set),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.file_type()?.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())?;
        set.add(&name, &text)?;
        debug!("Loaded template {}", entry.path().display());
    }
    Ok(set)
}

/// The live template generation, swapped whole on reload.
#[derive(Debug)]
pub struct TemplateRepo {
    workspace: PathBuf,
    current: RwLock<Arc<Templates>>,
}

impl TemplateRepo {
    pub fn new(workspace: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let workspace = workspace.into();
        let templates = Templates::load(&workspace)?;
        Ok(Self {
            workspace,
            current: RwLock::new(Arc::new(templates)),
        })
    }

    /// Re-read the workspace. On error the previous generation stays live.
    pub fn reload(&self) -> Result<(), TemplateError> {
        let templates = Arc::new(Templates::load(&self.workspace)?);
        match self.current.write() {
            Ok(mut guard) => *guard = templates,
            Err(poisoned) => *poisoned.into_inner() = templates,
        }
        info!("Reloaded templates from {}", self.workspace.display());
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<Templates> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn render(
        &self,
        artifact: Artifact,
        host: &dyn FunctionHost,
        data: &TemplateData,
    ) -> Result<String, TemplateError> {
        self.snapshot().render(artifact, host, data).await
    }

    /// Render `artifact` for `mac` with datastore-backed functions.
    pub async fn render_machine(
        &self,
        artifact: Artifact,
        datastore: &Arc<DataStore>,
        mac: &MacAddr,
        addrs: &ServerAddrs,
    ) -> Result<String, TemplateError> {
        let data = TemplateData::for_machine(datastore, mac, addrs).await?;
        let host = MachineFunctions::new(Arc::clone(datastore), *mac, data.clone());
        self.render(artifact, &host, &data).await
    }
}
