//! Shader modules, programs (shader-stage combinations), pipeline layouts,
//! and the concrete-pipeline cache.

use std::collections::HashMap;

use ash::vk;
use fxhash::FxHasher64;

use crate::cache::TwoListCache;
use crate::cookie::Cookie;
use crate::descriptor::{DescriptorSetLayoutDesc, MAX_SETS};
use crate::error::Error;

/// A per-stage resource layout, produced by the external shader-manager's
/// reflection step. The core does not parse SPIR-V beyond a header
/// sanity-check; it only unions layouts supplied to it.
#[derive(Debug, Clone, Default)]
pub struct ShaderResourceLayout {
    pub sets: Vec<Option<DescriptorSetLayoutDesc>>,
    pub push_constant_range: Option<vk::PushConstantRange>,
}

pub struct Shader {
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    words: Vec<u32>,
    layout: ShaderResourceLayout,
    cookie: Cookie,
}

impl Shader {
    /// Hashes the raw SPIR-V bytes (fxhash, matching the teacher's
    /// dependency choice) for its cache key, sanity-checks the SPIR-V magic
    /// number, and stores a pre-computed resource layout supplied by the
    /// caller's reflection step.
    pub fn from_spirv(
        device: &ash::Device,
        stage: vk::ShaderStageFlags,
        spirv: &[u8],
        layout: ShaderResourceLayout,
        cookie: Cookie,
    ) -> Result<Shader, Error> {
        if spirv.len() < 4 || spirv.len() % 4 != 0 {
            return Err(Error::IncompatibleState(
                "SPIR-V blob length must be a non-zero multiple of 4".into(),
            ));
        }
        let magic = u32::from_le_bytes([spirv[0], spirv[1], spirv[2], spirv[3]]);
        if magic != 0x0723_0203 {
            return Err(Error::IncompatibleState(
                "SPIR-V magic number mismatch".into(),
            ));
        }

        let words: Vec<u32> = spirv
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { device.create_shader_module(&info, None).map_err(Error::from)? };

        Ok(Shader {
            module,
            stage,
            words,
            layout,
            cookie,
        })
    }

    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn layout(&self) -> &ShaderResourceLayout {
        &self.layout
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_shader_module(self.module, None);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgramResourceLayout {
    pub sets: [Option<DescriptorSetLayoutDesc>; MAX_SETS],
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

fn union_layouts(shaders: &[Shader]) -> Result<ProgramResourceLayout, Error> {
    let mut out = ProgramResourceLayout::default();
    for shader in shaders {
        for (set_index, set) in shader.layout.sets.iter().enumerate() {
            let Some(set) = set else { continue };
            if set_index >= MAX_SETS {
                return Err(Error::IncompatibleState(format!(
                    "set index {set_index} exceeds MAX_SETS"
                )));
            }
            match &mut out.sets[set_index] {
                None => out.sets[set_index] = Some(set.clone()),
                Some(existing) => {
                    if existing.mask.sampled_image & set.mask.sampled_image != 0
                        && existing.mask != set.mask
                    {
                        return Err(Error::IncompatibleState(format!(
                            "conflicting binding types at set {set_index}"
                        )));
                    }
                    existing.stage_mask |= set.stage_mask;
                    existing.mask.sampled_image |= set.mask.sampled_image;
                    existing.mask.sampled_buffer |= set.mask.sampled_buffer;
                    existing.mask.storage_image |= set.mask.storage_image;
                    existing.mask.storage_buffer |= set.mask.storage_buffer;
                    existing.mask.uniform_buffer |= set.mask.uniform_buffer;
                    existing.mask.sampler |= set.mask.sampler;
                    existing.mask.separate_image |= set.mask.separate_image;
                    existing.mask.input_attachment |= set.mask.input_attachment;
                }
            }
        }
        if let Some(range) = shader.layout.push_constant_range {
            out.push_constant_ranges.push(range);
        }
    }
    Ok(out)
}

pub struct PipelineLayout {
    raw: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    resource_layout: ProgramResourceLayout,
}

impl PipelineLayout {
    pub fn new(
        device: &ash::Device,
        resource_layout: ProgramResourceLayout,
        set_layouts: Vec<vk::DescriptorSetLayout>,
    ) -> Result<PipelineLayout, Error> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&resource_layout.push_constant_ranges);
        let raw = unsafe { device.create_pipeline_layout(&info, None).map_err(Error::from)? };
        Ok(PipelineLayout {
            raw,
            set_layouts,
            resource_layout,
        })
    }

    pub fn raw(&self) -> vk::PipelineLayout {
        self.raw
    }

    pub fn resource_layout(&self) -> &ProgramResourceLayout {
        &self.resource_layout
    }

    pub fn set_layout(&self, set: usize) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set).copied()
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline_layout(self.raw, None);
    }
}

/// The mutable state that, combined with the program identity, forms a
/// concrete pipeline's cache key. Hashed with fxhash rather than derived
/// `Hash` + `DefaultHasher`, matching the teacher's dependency on `fxhash`
/// for hot-path hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStateKey {
    pub render_pass_compat_hash: u64,
    pub subpass: u32,
    pub vertex_input_hash: u64,
    pub blend_state_hash: u64,
    pub depth_stencil_state_hash: u64,
    pub rasterizer_state_hash: u64,
    pub sample_count: u32,
}

impl PipelineStateKey {
    pub fn combined_hash(&self, program_cookie: Cookie) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = FxHasher64::default();
        program_cookie.get().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }
}

pub struct Program {
    shaders: Vec<Shader>,
    layout: PipelineLayout,
    cookie: Cookie,
    pipelines: TwoListCache<u64, vk::Pipeline>,
}

impl Program {
    pub fn new(
        device: &ash::Device,
        shaders: Vec<Shader>,
        cookie: Cookie,
        set_layouts: Vec<vk::DescriptorSetLayout>,
    ) -> Result<Program, Error> {
        let resource_layout = union_layouts(&shaders)?;
        let layout = PipelineLayout::new(device, resource_layout, set_layouts)?;
        Ok(Program {
            shaders,
            layout,
            cookie,
            pipelines: TwoListCache::new(),
        })
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    pub fn shader_stages(&self) -> impl Iterator<Item = &Shader> {
        self.shaders.iter()
    }

    /// Lock-free read; returns `None` if the pipeline hasn't been built (or
    /// promoted into the read-only list) yet.
    pub fn get_pipeline(&self, key: PipelineStateKey) -> Option<vk::Pipeline> {
        self.pipelines
            .get_or_pending(&key.combined_hash(self.cookie))
            .map(|p| *p)
    }

    /// Idempotent: a second insert for an already-cached key is a no-op.
    pub fn add_pipeline(&self, key: PipelineStateKey, pipeline: vk::Pipeline) {
        self.pipelines.insert(key.combined_hash(self.cookie), pipeline);
    }

    pub fn promote_pipelines(&self) {
        self.pipelines.promote_read_write_to_read_only();
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        for shader in &self.shaders {
            shader.destroy(device);
        }
        self.layout.destroy(device);
    }
}

/// Top-level cache from program cookie to `Program`, and a map of in-flight
/// shaders by content hash (so identical SPIR-V blobs across programs share
/// one `Shader`).
pub struct ProgramCache {
    shaders_by_hash: HashMap<u64, std::sync::Arc<Shader>>,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramCache {
    pub fn new() -> Self {
        ProgramCache {
            shaders_by_hash: HashMap::new(),
        }
    }

    pub fn shader_hash(spirv: &[u8]) -> u64 {
        use std::hash::Hasher;
        let mut hasher = FxHasher64::default();
        hasher.write(spirv);
        hasher.finish()
    }

    pub fn get_shader(&self, hash: u64) -> Option<std::sync::Arc<Shader>> {
        self.shaders_by_hash.get(&hash).cloned()
    }

    pub fn insert_shader(&mut self, hash: u64, shader: Shader) -> std::sync::Arc<Shader> {
        self.shaders_by_hash
            .entry(hash)
            .or_insert_with(|| std::sync::Arc::new(shader))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_state_key_hash_is_stable() {
        let key = PipelineStateKey {
            render_pass_compat_hash: 1,
            subpass: 0,
            vertex_input_hash: 2,
            blend_state_hash: 3,
            depth_stencil_state_hash: 4,
            rasterizer_state_hash: 5,
            sample_count: 1,
        };
        let cookie = Cookie::NONE;
        assert_eq!(key.combined_hash(cookie), key.combined_hash(cookie));
    }

    #[test]
    fn different_programs_hash_differently_for_same_state() {
        let key = PipelineStateKey {
            render_pass_compat_hash: 1,
            subpass: 0,
            vertex_input_hash: 2,
            blend_state_hash: 3,
            depth_stencil_state_hash: 4,
            rasterizer_state_hash: 5,
            sample_count: 1,
        };
        let alloc = crate::cookie::CookieAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_ne!(key.combined_hash(a), key.combined_hash(b));
    }
}
