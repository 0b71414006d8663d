// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

/// `[render]` section of `carto.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Enable the validation layer and the debug-utils messenger.
    pub validation: bool,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub clear_color: [f32; 4],
    pub shader_dir: PathBuf,
    pub staging_initial_bytes: u64,
    /// Per-frame transform slots, including the identity slot 0.
    pub transform_capacity: usize,
    pub descriptor_initial_sets: u32,
    /// Persist the pipeline cache blob next to the working directory.
    pub pipeline_cache: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            shader_dir: crate::default_shader_dir(),
            staging_initial_bytes: 1 << 20,
            transform_capacity: 4096,
            descriptor_initial_sets: 64,
            pipeline_cache: true,
        }
    }
}

impl RendererConfig {
    /// `CARTO_VALIDATION=0|1` and `CARTO_SHADER_DIR=<dir>` override the file.
    pub fn with_env_overrides(self) -> Self {
        self.overridden_by(|name| std::env::var(name).ok())
    }

    fn overridden_by(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("CARTO_VALIDATION") {
            self.validation = is_truthy(&v);
        }
        if let Some(dir) = var("CARTO_SHADER_DIR").filter(|d| !d.is_empty()) {
            self.shader_dir = PathBuf::from(dir);
        }
        self
    }
}

/// `1`, `true`, `yes` and `on` count as set.
fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
