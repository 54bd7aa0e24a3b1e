// SPDX-License-Identifier: CEPL-1.0
use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::{RenderError, RenderResult};

/// Precompiled SPIR-V from disk.
pub fn read_shader_bytes(path: &Path) -> RenderResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Reinterprets a SPIR-V blob as words, checking size and magic number.
pub fn spirv_words(path: &Path, bytes: &[u8]) -> RenderResult<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| RenderError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Shader module; only needed until the pipeline using it is built.
pub struct ShaderModule {
    ctx: Arc<DeviceContext>,
    handle: vk::ShaderModule,
}

impl ShaderModule {
    pub fn from_file(ctx: &Arc<DeviceContext>, path: &Path) -> RenderResult<Self> {
        let bytes = read_shader_bytes(path)?;
        let words = spirv_words(path, &bytes)?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        let handle = unsafe { ctx.device().create_shader_module(&info, None)? };
        debug!("vk: shader module {:?} ({} bytes)", path, bytes.len());
        Ok(Self {
            ctx: Arc::clone(ctx),
            handle,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.ctx.device().destroy_shader_module(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_missing_shader_is_load_error() {
        let err = read_shader_bytes(Path::new("does/not/exist.spv")).unwrap_err();
        assert!(matches!(err, RenderError::ShaderLoad { .. }));
    }

    #[test]
    fn test_spirv_words() {
        let mut blob = SPIRV_MAGIC.to_le_bytes().to_vec();
        blob.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = spirv_words(Path::new("mem"), &blob).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_spirv_rejects_truncated_blob() {
        let blob = [0x03, 0x02, 0x23];
        assert!(spirv_words(Path::new("mem"), &blob).is_err());
    }

    #[test]
    fn test_built_shaders_are_spirv() {
        let dir = Path::new(env!("EMBER_SHADER_DIR"));
        for name in ["mesh.vert.spv", "mesh.frag.spv"] {
            let path = dir.join(name);
            let bytes = read_shader_bytes(&path).unwrap();
            let words = spirv_words(&path, &bytes).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC, "{name}");
        }
    }
}
