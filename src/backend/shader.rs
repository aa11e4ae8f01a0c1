// SPIR-V shader loading
//
// Shaders reach the pipeline as opaque binary blobs read from disk. A blob
// is a sequence of 4-byte words; any other length is rejected before the
// driver sees it. No header or magic verification beyond that.

use std::fs;
use std::io;
use std::path::Path;

use ash::vk;

use super::error::{BootstrapError, BootstrapResult, Stage};

/// Read a SPIR-V blob and repack it as the 32-bit words Vulkan expects.
pub fn load_spirv(path: &Path) -> BootstrapResult<Vec<u32>> {
    let bytes = fs::read(path).map_err(|source| BootstrapError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;

    let words = decode_words(&bytes).map_err(|source| BootstrapError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;

    log::debug!("Loaded {} ({} words)", path.display(), words.len());
    Ok(words)
}

fn decode_words(bytes: &[u8]) -> io::Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bytecode length {} is not a multiple of 4", bytes.len()),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Wrap decoded bytecode in a driver shader module.
///
/// Modules are transient: the pipeline keeps no reference to them once it is
/// created, so callers destroy them right after the pipeline-creation call,
/// whether it succeeded or not.
pub fn create_shader_module(
    device: &ash::Device,
    code: &[u32],
) -> BootstrapResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|source| {
        BootstrapError::DriverCall {
            stage: Stage::ShaderModule,
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_aligned_bytes_decode() {
        let words = decode_words(&[0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], u32::from_ne_bytes([0x03, 0x02, 0x23, 0x07]));
    }

    #[test]
    fn empty_blob_decodes_to_no_words() {
        assert_eq!(decode_words(&[]).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn misaligned_blob_is_rejected() {
        let err = decode_words(&[0x03, 0x02, 0x23]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unreadable_file_reports_its_path() {
        let missing = Path::new("shaders/definitely-not-here.spv");
        match load_spirv(missing) {
            Err(BootstrapError::ShaderRead { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected ShaderRead, got {:?}", other.map(|w| w.len())),
        }
    }
}
