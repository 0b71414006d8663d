// SPDX-License-Identifier: CEPL-1.0
use crate::backend::GpuBackend;
use crate::error::{RenderError, Result};
use ash::util::read_spv;
use ash::vk;
use carto_render::{ColorVertex, DrawConstants, TexturedVertex};
use std::collections::HashMap;
use std::io::Cursor;
use std::mem::{offset_of, size_of};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Filled, per-vertex colored triangles (land, water, area fills).
    Flat,
    /// Sprites, tiles, glyphs.
    Textured,
    /// Roads, borders, grid lines.
    Lines,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 3] = [PipelineKind::Flat, PipelineKind::Textured, PipelineKind::Lines];

    pub fn shader_name(self) -> &'static str {
        match self {
            PipelineKind::Flat | PipelineKind::Lines => "flat",
            PipelineKind::Textured => "textured",
        }
    }

    pub fn topology(self) -> vk::PrimitiveTopology {
        match self {
            PipelineKind::Lines => vk::PrimitiveTopology::LINE_LIST,
            PipelineKind::Flat | PipelineKind::Textured => vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }

    pub fn vertex_layout(self) -> VertexLayout {
        match self {
            PipelineKind::Flat | PipelineKind::Lines => VertexLayout {
                stride: size_of::<ColorVertex>() as u32,
                attributes: vec![
                    (0, vk::Format::R32G32B32_SFLOAT, offset_of!(ColorVertex, pos) as u32),
                    (1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(ColorVertex, color) as u32),
                ],
            },
            PipelineKind::Textured => VertexLayout {
                stride: size_of::<TexturedVertex>() as u32,
                attributes: vec![
                    (0, vk::Format::R32G32B32_SFLOAT, offset_of!(TexturedVertex, pos) as u32),
                    (1, vk::Format::R32G32_SFLOAT, offset_of!(TexturedVertex, uv) as u32),
                    (2, vk::Format::R32G32B32A32_SFLOAT, offset_of!(TexturedVertex, color) as u32),
                ],
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    /// (location, format, offset)
    pub attributes: Vec<(u32, vk::Format, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderPair {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

pub struct PipelineDesc<'a> {
    pub kind: PipelineKind,
    pub shaders: &'a ShaderPair,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
}

/// Named shader bytecode pairs: `<name>.vert.spv` and `<name>.frag.spv` under a
/// directory, or registered in memory.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    dir: Option<PathBuf>,
    loaded: HashMap<String, ShaderPair>,
}

impl ShaderLibrary {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            loaded: HashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Register a pair from raw bytecode; both blobs must be word aligned.
    pub fn with_bytes(mut self, name: &str, vertex: &[u8], fragment: &[u8]) -> Result<Self> {
        let pair = ShaderPair {
            vertex: words(name, vertex)?,
            fragment: words(name, fragment)?,
        };
        self.loaded.insert(name.to_owned(), pair);
        Ok(self)
    }

    pub fn load(&mut self, name: &str) -> Result<&ShaderPair> {
        if !self.loaded.contains_key(name) {
            let dir = self.dir.as_deref().ok_or_else(|| RenderError::Shader {
                name: name.to_owned(),
                reason: "not registered and no shader directory configured".into(),
            })?;
            let pair = ShaderPair {
                vertex: read_blob(dir, name, "vert")?,
                fragment: read_blob(dir, name, "frag")?,
            };
            info!("shaders: loaded `{name}` from {}", dir.display());
            self.loaded.insert(name.to_owned(), pair);
        }
        self.loaded.get(name).ok_or_else(|| RenderError::Shader {
            name: name.to_owned(),
            reason: "missing after load".into(),
        })
    }
}

fn read_blob(dir: &Path, name: &str, stage: &str) -> Result<Vec<u32>> {
    let path = dir.join(format!("{name}.{stage}.spv"));
    let bytes = std::fs::read(&path).map_err(|e| RenderError::Shader {
        name: name.to_owned(),
        reason: format!("{}: {e}", path.display()),
    })?;
    words(name, &bytes)
}

fn words(name: &str, bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(RenderError::Shader {
            name: name.to_owned(),
            reason: format!("bytecode is {} bytes, not a whole number of words", bytes.len()),
        });
    }
    read_spv(&mut Cursor::new(bytes)).map_err(|e| RenderError::Shader {
        name: name.to_owned(),
        reason: e.to_string(),
    })
}

/// One pipeline per kind, all sharing a layout: set 0 transforms, set 1 texture,
/// push constants `DrawConstants`.
#[derive(Debug)]
pub struct PipelineSet {
    pub layout: vk::PipelineLayout,
    pipelines: Vec<(PipelineKind, vk::Pipeline)>,
    render_pass: vk::RenderPass,
}

impl PipelineSet {
    pub fn create<G: GpuBackend + ?Sized>(
        gpu: &G,
        shaders: &mut ShaderLibrary,
        render_pass: vk::RenderPass,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self> {
        let layout = gpu.create_pipeline_layout(set_layouts, size_of::<DrawConstants>() as u32)?;
        let mut set = Self {
            layout,
            pipelines: Vec::new(),
            render_pass,
        };
        for kind in PipelineKind::ALL {
            let built = shaders.load(kind.shader_name()).and_then(|pair| {
                gpu.create_pipeline(&PipelineDesc {
                    kind,
                    shaders: pair,
                    render_pass,
                    layout,
                })
            });
            match built {
                Ok(p) => set.pipelines.push((kind, p)),
                Err(e) => {
                    set.destroy(gpu);
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    pub fn get(&self, kind: PipelineKind) -> vk::Pipeline {
        self.pipelines
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|&(_, p)| p)
            .unwrap_or(vk::Pipeline::null())
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn destroy<G: GpuBackend + ?Sized>(&mut self, gpu: &G) {
        for (_, p) in self.pipelines.drain(..) {
            gpu.destroy_pipeline(p);
        }
        if self.layout != vk::PipelineLayout::null() {
            gpu.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn blob(extra_words: usize) -> Vec<u8> {
        let mut v = SPIRV_MAGIC.to_le_bytes().to_vec();
        for i in 0..extra_words {
            v.extend_from_slice(&(i as u32).to_le_bytes());
        }
        v
    }

    #[test]
    fn misaligned_bytecode_is_rejected() {
        let mut bad = blob(2);
        bad.push(0);
        let err = ShaderLibrary::in_memory()
            .with_bytes("flat", &bad, &blob(1))
            .unwrap_err();
        assert!(matches!(err, RenderError::Shader { .. }));
        assert!(err.is_fatal());
        assert!(ShaderLibrary::in_memory().with_bytes("flat", &[], &blob(1)).is_err());
    }

    #[test]
    fn loads_pairs_from_directory() {
        let dir = std::env::temp_dir().join(format!("carto-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("flat.vert.spv"), blob(3)).unwrap();
        std::fs::write(dir.join("flat.frag.spv"), blob(1)).unwrap();

        let mut lib = ShaderLibrary::from_dir(&dir);
        let pair = lib.load("flat").unwrap().clone();
        assert_eq!(pair.vertex.len(), 4);
        assert_eq!(pair.vertex[0], SPIRV_MAGIC);
        assert_eq!(pair.fragment.len(), 2);
        assert!(lib.load("textured").is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn kinds_map_to_layouts() {
        assert_eq!(PipelineKind::Lines.topology(), vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(PipelineKind::Lines.shader_name(), "flat");
        let t = PipelineKind::Textured.vertex_layout();
        assert_eq!(t.stride, 36);
        assert_eq!(t.attributes[1], (1, vk::Format::R32G32_SFLOAT, 12));
        assert_eq!(PipelineKind::Flat.vertex_layout().attributes[1].2, 12);
    }
}
