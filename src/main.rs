use clap::Parser;

use crate::cli::Cli;
use skinned_viewer::args::Args;
use skinned_viewer::run;

mod cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(Args {
        model: cli.model,
        animation: cli.animation,
        static_mesh: cli.static_mesh,
        texture_dir: cli.texture_dir,
        rows: cli.rows,
        cols: cli.cols,
        window_width: cli.width,
        window_height: cli.height,
        heap_sizes: cli.heap_sizes.into(),
    })
}
