// Shader module loading
//
// SPIR-V is read from disk at startup (build.rs compiles the GLSL next to
// it) and only lives until the pipeline has been created.

use anyhow::{Context, Result};
use ash::vk;
use std::fs::File;
use std::path::Path;
use super::VulkanDevice;

/// Read a SPIR-V binary into 4-byte aligned words
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();

    let mut file = File::open(path)
        .with_context(|| format!("Could not open SPIR-V file {:?}. Was glslc run?", path))?;

    // read_spv checks the length and the magic number, and fixes endianness
    let words = ash::util::read_spv(&mut file)
        .with_context(|| format!("{:?} is not valid SPIR-V", path))?;

    log::debug!("Loaded {:?} ({} words)", path, words.len());

    Ok(words)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device.device.create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("vk_triangle_{}_{}", std::process::id(), name));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_spirv("shaders/does_not_exist.spv").unwrap_err();
        assert!(format!("{:#}", err).contains("does_not_exist.spv"));
    }

    #[test]
    fn test_rejects_unaligned_length() {
        let path = temp_file("unaligned.spv", &[0x03, 0x02, 0x23, 0x07, 0x00]);
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let path = temp_file("bad_magic.spv", &[0u8; 8]);
        let result = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn test_loads_words() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SPIRV_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let path = temp_file("header.spv", &bytes);
        let words = load_spirv(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(words.unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }
}
