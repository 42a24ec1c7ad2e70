use anyhow::Result;

use crate::app::App;
use crate::args::Args;

mod animation;
mod app;
pub mod args;
mod camera;
mod data;
mod error;
mod memory;
mod render;
mod resource;
mod view;

pub fn run(args: Args) -> Result<()> {
    env_logger::init();

    let event_loop = App::create_event_loop()?;
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut app = App::new(&event_loop, args);
    event_loop.run_app(&mut app)?;

    app.finish()
}
