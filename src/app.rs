use std::time::Instant;

use anyhow::Result;
use winit::application::ApplicationHandler;
use winit::error::EventLoopError;
use winit::event::{DeviceEvent, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::args::Args;
use crate::render::command::FrameStatus;
use crate::view::ViewSystem;

const WINDOW_TITLE: &str = "Skinned Viewer";

pub struct App {
    event_loop_proxy: EventLoopProxy<UserEvent>,
    args: Args,
    view_system: Option<ViewSystem>,
    is_initialized: bool,
    last_render_time: Instant,
    exit_error: Option<anyhow::Error>,
}

impl App {
    pub fn new(event_loop: &EventLoop<UserEvent>, args: Args) -> Self {
        App {
            event_loop_proxy: event_loop.create_proxy(),
            args,
            view_system: None,
            is_initialized: false,
            last_render_time: Instant::now(),
            exit_error: None,
        }
    }

    pub fn create_event_loop() -> Result<EventLoop<UserEvent>, EventLoopError> {
        EventLoop::<UserEvent>::with_user_event().build()
    }

    /// Hands back the error that stopped the event loop, if any.
    pub fn finish(self) -> Result<()> {
        match self.exit_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Window> {
        let attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.args.window_width,
                self.args.window_height,
            ));

        Ok(event_loop.create_window(attributes)?)
    }

    async fn initialize_view_system(
        event_loop_proxy: EventLoopProxy<UserEvent>,
        window: Window,
        args: &Args,
    ) -> Result<()> {
        let view_system = ViewSystem::from_window(window, args).await?;

        if event_loop_proxy
            .send_event(UserEvent::ViewSystemReady(view_system))
            .is_err()
        {
            log::warn!("Event loop closed before the view system was ready");
        }

        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.exit_error = Some(error);
        event_loop.exit();
    }
}

impl ApplicationHandler<UserEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.is_initialized {
            return;
        }
        self.is_initialized = true;

        log::info!("Application resumed");

        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(error) => return self.fail(event_loop, error),
        };

        let event_loop_proxy = self.event_loop_proxy.clone();
        let result = pollster::block_on(App::initialize_view_system(
            event_loop_proxy,
            window,
            &self.args,
        ));

        if let Err(error) = result {
            self.fail(event_loop, error);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        let view_system = match &mut self.view_system {
            Some(view_system) => view_system,
            None => return,
        };

        if view_system.window.id() != window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(new_size) => {
                if let Err(error) = view_system.render_system.set_view_dimensions(new_size) {
                    self.fail(event_loop, error);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let delta_time = now - self.last_render_time;
                self.last_render_time = now;

                match view_system.update_view(delta_time) {
                    Ok(FrameStatus::Presented) => {}
                    Ok(status) => log::trace!("Frame not presented: {:?}", status),
                    Err(error) => return self.fail(event_loop, error),
                }

                view_system.window.request_redraw();
            }
            WindowEvent::MouseInput {
                device_id: _,
                state,
                button,
            } => {
                view_system
                    .camera_controller
                    .handle_mouse_input(button, state);
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        let view_system = match &mut self.view_system {
            Some(view_system) => view_system,
            None => return,
        };

        if let DeviceEvent::MouseMotion { delta } = event {
            view_system
                .camera_controller
                .handle_mouse_movement(delta.0 as f32, delta.1 as f32);
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: UserEvent) {
        let UserEvent::ViewSystemReady(mut view_system) = event;

        log::info!("View system created");

        if let Err(error) = view_system.load_scene(&self.args) {
            return self.fail(event_loop, error);
        }

        view_system.window.request_redraw();
        self.view_system = Some(view_system);
        self.last_render_time = Instant::now();
    }
}

pub enum UserEvent {
    ViewSystemReady(ViewSystem),
}
