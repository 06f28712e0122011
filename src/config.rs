//! Engine-wide GPU configuration, read through the `config` crate the same
//! way the rest of the engine's collaborators do (`cfg.get::<T>("gfx....")`).

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct GfxConfig {
    /// Number of frames-in-flight (frame contexts the Device cycles through).
    pub frames_in_flight: u32,
    /// Growth factor applied to a descriptor pool when it runs out of sets.
    pub descriptor_pool_growth: f32,
    /// Default block size for the transient-attachment ring, in frames.
    pub transient_ring_size: u32,
    /// Default bump-allocator block size for per-frame buffer pools.
    pub buffer_pool_block_size: u64,
    /// Instance extensions requested in addition to the surface extensions
    /// mandated by the windowing backend.
    pub instance_extensions: Vec<String>,
    /// Device extensions requested in addition to `VK_KHR_swapchain`.
    pub device_extensions: Vec<String>,
    /// Whether to enable `VK_LAYER_KHRONOS_validation`. Opt-in: unlike the
    /// teacher's unconditional push of the old LunarG layer name, this is
    /// not assumed to be installed on a release machine.
    pub validation: bool,
}

impl Default for GfxConfig {
    fn default() -> Self {
        GfxConfig {
            frames_in_flight: 2,
            descriptor_pool_growth: 1.5,
            transient_ring_size: 8,
            buffer_pool_block_size: 64 * 1024,
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            validation: false,
        }
    }
}

impl GfxConfig {
    pub fn from_config(cfg: &config::Config) -> Result<Self, Error> {
        let mut out = GfxConfig::default();

        if let Ok(v) = cfg.get::<u32>("gfx.frames_in_flight") {
            out.frames_in_flight = v;
        }
        if let Ok(v) = cfg.get::<f32>("gfx.descriptor_pool_growth") {
            out.descriptor_pool_growth = v;
        }
        if let Ok(v) = cfg.get::<u32>("gfx.transient_ring_size") {
            out.transient_ring_size = v;
        }
        if let Ok(v) = cfg.get::<u64>("gfx.buffer_pool_block_size") {
            out.buffer_pool_block_size = v;
        }
        if let Ok(v) = cfg.get::<Vec<String>>("gfx.instance_extensions") {
            out.instance_extensions = v;
        }
        if let Ok(v) = cfg.get::<Vec<String>>("gfx.device_extensions") {
            out.device_extensions = v;
        }
        if let Ok(v) = cfg.get::<bool>("debug.validation") {
            out.validation = v;
        }

        if out.frames_in_flight == 0 {
            return Err(Error::InitializationFailed(
                "gfx.frames_in_flight must be >= 1".into(),
            ));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GfxConfig::default();
        assert_eq!(cfg.frames_in_flight, 2);
        assert!(!cfg.validation);
    }

    #[test]
    fn from_config_overrides_defaults() {
        let raw = config::Config::builder()
            .set_override("gfx.frames_in_flight", 3)
            .unwrap()
            .set_override("debug.validation", true)
            .unwrap()
            .build()
            .unwrap();
        let cfg = GfxConfig::from_config(&raw).unwrap();
        assert_eq!(cfg.frames_in_flight, 3);
        assert!(cfg.validation);
    }
}
