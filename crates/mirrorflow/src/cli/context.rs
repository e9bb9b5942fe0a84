//! Resolved home directory and configuration shared by every command.
//!
//! All paths are under `$MIRRORFLOW_HOME` (default `~/.mirrorflow/`).

use crate::cli::error::HelpfulError;
use crate::cli::output::print_json;
use anyhow::Result;
use mirrorflow_catalog::CatalogStore;
use mirrorflow_ops::Supervisor;
use mirrorflow_protocol::paths::Layout;
use mirrorflow_protocol::MirrorflowConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppContext {
    pub layout: Layout,
    pub config: MirrorflowConfig,
}

impl AppContext {
    pub fn load() -> Result<Self> {
        Self::with_layout(Layout::from_env())
    }

    pub fn with_layout(layout: Layout) -> Result<Self> {
        let path = layout.config_file();
        let config = MirrorflowConfig::load_or_default(&path).map_err(|e| {
            HelpfulError::new(format!("Invalid configuration: {}", e))
                .with_code(mirrorflow_protocol::ErrorCode::ValidationError)
                .with_context(format!("While reading {}", path.display()))
                .with_suggestion("TRY: mirrorflow config   # Show the effective settings")
        })?;
        Ok(Self { layout, config })
    }

    pub fn supervisor(&self) -> Result<Supervisor> {
        Ok(Supervisor::open(
            self.layout.clone(),
            self.config.operations.clone(),
        )?)
    }

    pub fn catalog_store(&self) -> CatalogStore {
        CatalogStore::new(self.layout.catalog_dir())
    }
}

#[derive(Debug, Serialize)]
struct ConfigOutput<'a> {
    home: PathBuf,
    config_file: PathBuf,
    config_file_exists: bool,
    configs_dir: PathBuf,
    catalog_dir: PathBuf,
    logs_dir: PathBuf,
    settings: &'a MirrorflowConfig,
}

/// `mirrorflow config`: effective paths and settings.
pub fn run_show(ctx: &AppContext, json: bool) -> Result<()> {
    let layout = &ctx.layout;
    let output = ConfigOutput {
        home: layout.home.clone(),
        config_file: layout.config_file(),
        config_file_exists: layout.config_file().exists(),
        configs_dir: layout.configs_dir(),
        catalog_dir: layout.catalog_dir(),
        logs_dir: layout.logs_dir(),
        settings: &ctx.config,
    };

    if json {
        return print_json(&output);
    }

    println!("Home:            {}", output.home.display());
    println!(
        "Config file:     {}{}",
        output.config_file.display(),
        if output.config_file_exists { "" } else { " (not found, using defaults)" }
    );
    println!("Mirror configs:  {}", output.configs_dir.display());
    println!("Catalog data:    {}", output.catalog_dir.display());
    println!("Logs:            {}", output.logs_dir.display());
    println!();
    print!("{}", toml::to_string_pretty(&ctx.config)?);
    Ok(())
}
