use std::path::PathBuf;

use clap::{Args, Parser};

/// A viewer for md5 skinned meshes, drawn as an animated grid on explicitly managed GPU heaps
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the .md5mesh model drawn in every grid cell
    pub model: PathBuf,

    /// Path to the .md5anim animation played by every instance
    pub animation: PathBuf,

    /// Path to an .obj mesh drawn without animation at the center of the grid
    #[arg(short = 'm', long)]
    pub static_mesh: Option<PathBuf>,

    /// Directory searched before the model's own directory for its textures
    #[arg(short = 't', long)]
    pub texture_dir: Option<PathBuf>,

    /// Number of grid rows
    #[arg(short = 'r', long, default_value_t = 10)]
    pub rows: u32,

    /// Number of grid columns
    #[arg(short = 'c', long, default_value_t = 10)]
    pub cols: u32,

    /// Initial window width in pixels
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Initial window height in pixels
    #[arg(long, default_value_t = 480)]
    pub height: u32,

    #[command(flatten)]
    pub heap_sizes: HeapSizes,
}

#[derive(Args, Debug, Clone)]
pub struct HeapSizes {
    /// Capacity of the device-local buffer heap in MiB
    #[arg(long, default_value_t = 64)]
    pub device_local_heap_mib: u64,

    /// Capacity of the host-visible upload heap in MiB
    #[arg(long, default_value_t = 32)]
    pub upload_heap_mib: u64,

    /// Capacity of the host-visible readback heap in MiB
    #[arg(long, default_value_t = 4)]
    pub readback_heap_mib: u64,

    /// Budget of the image heap in MiB
    #[arg(long, default_value_t = 128)]
    pub image_heap_mib: u64,
}

impl From<HeapSizes> for skinned_viewer::args::HeapSizes {
    fn from(value: HeapSizes) -> Self {
        skinned_viewer::args::HeapSizes {
            device_local: value.device_local_heap_mib,
            upload: value.upload_heap_mib,
            readback: value.readback_heap_mib,
            image: value.image_heap_mib,
        }
    }
}
