use std::path::PathBuf;

pub struct Args {
    pub model: PathBuf,
    pub animation: PathBuf,
    pub static_mesh: Option<PathBuf>,
    pub texture_dir: Option<PathBuf>,
    pub rows: u32,
    pub cols: u32,
    pub window_width: u32,
    pub window_height: u32,
    pub heap_sizes: HeapSizes,
}

/// Heap capacities in MiB.
#[derive(Clone, Copy, Debug)]
pub struct HeapSizes {
    pub device_local: u64,
    pub upload: u64,
    pub readback: u64,
    pub image: u64,
}

impl TryFrom<HeapSizes> for crate::render::resource::HeapConfig {
    type Error = crate::error::Error;

    fn try_from(value: HeapSizes) -> Result<Self, Self::Error> {
        const MIB: u64 = 1024 * 1024;

        let to_bytes = |name: &str, mebibytes: u64| {
            mebibytes.checked_mul(MIB).ok_or_else(|| {
                crate::error::Error::ContractViolation(format!(
                    "The {name} heap size of {mebibytes} MiB does not fit in 64 bits"
                ))
            })
        };

        Ok(Self {
            device_local: to_bytes("device-local", value.device_local)?,
            upload: to_bytes("upload", value.upload)?,
            readback: to_bytes("readback", value.readback)?,
            image: to_bytes("image", value.image)?,
        })
    }
}
