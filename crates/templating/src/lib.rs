//! Provisioning Templates
//!
//! Renders the per-machine artifacts served to booting nodes: the
//! cloud-config, the ignition document and the kernel command line. Each
//! artifact is an embedded base template optionally extended by a workspace
//! overlay under `config/<artifact>/`; cloud-configs are merged structurally,
//! the others are concatenated.
//!
//! # Example
//!
//! ```no_run
//! use datastore::{DataStore, MacAddr};
//! use std::sync::Arc;
//! use templating::{Artifact, MachineFunctions, TemplateData, TemplateRepo};
//!
//! # async fn example(ds: Arc<DataStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let repo = TemplateRepo::new("/workspace")?;
//! let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse()?;
//! let data = TemplateData {
//!     mac: mac.to_string(),
//!     web_server_addr: "10.0.0.1:8000".to_string(),
//!     ..Default::default()
//! };
//! let functions = MachineFunctions::new(ds, mac, data.clone());
//! let cloud_config = repo.render(Artifact::CloudConfig, &functions, &data).await?;
//! println!("{}", cloud_config);
//! # Ok(())
//! # }
//! ```
//!
//! # Template functions
//!
//! `machine_variable`, `cluster_variable`, `array_variable`, `variable`,
//! `b64`, `b64template`, `render`, `b64file`, `pathSplit` and `join`, plus
//! the comparison helpers `eq`, `ne`, `not`, `and`, `or` and `len`.

pub mod context;
pub mod error;
pub mod eval;
pub mod functions;
pub mod merge;
pub mod parse;
pub mod repo;
pub mod validate;
pub mod value;

pub use context::{ServerAddrs, TemplateData};
pub use error::TemplateError;
pub use eval::{FunctionHost, Renderer, TemplateSet};
pub use functions::MachineFunctions;
pub use merge::{CLOUD_CONFIG_HEADER, merge_cloud_config};
pub use repo::{Artifact, TemplateRepo, Templates};
pub use validate::{Entry, Severity, append_report, validate};
pub use value::Value;
