// GPU context lifecycle manager
// The wgpu context lives and dies on one owning thread
//
// Invariant: once the context is created on the event-loop thread it is
// never touched from any other thread. Other threads talk to the renderer
// exclusively through channel commands, which makes cross-thread context
// rebinding structurally impossible rather than a matter of discipline.

use super::stereo::StereoRenderer;
use super::{RenderState, RendererError};
use crate::decoder::StereoImage;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent as WinitWindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

/// Events surfaced to the hosting application.
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    Resized(u32, u32),
    CloseRequested,
    Focused(bool),
    /// Context or program init failed; the session is over and the host
    /// decides whether to retry or report.
    Fatal(String),
}

enum ViewerCommand {
    Present(Arc<StereoImage>),
    SetTitle(String),
    Close,
}

/// Handle to drive the viewer window from other threads. Explicitly owned
/// and passed by the host; there is no global renderer.
#[derive(Clone)]
pub struct ViewerHandle {
    command_tx: Sender<ViewerCommand>,
    event_rx: Receiver<ViewerEvent>,
    is_open: Arc<AtomicBool>,
}

impl ViewerHandle {
    /// Queue a decoded stereo frame for upload and redraw.
    pub fn present(&self, frame: Arc<StereoImage>) -> Result<(), RendererError> {
        if !self.is_open.load(Ordering::Relaxed) {
            return Err(RendererError::Window("Viewer closed".to_string()));
        }
        self.command_tx
            .send(ViewerCommand::Present(frame))
            .map_err(|_| RendererError::Window("Failed to send frame".to_string()))
    }

    pub fn set_title(&self, title: &str) -> Result<(), RendererError> {
        self.command_tx
            .send(ViewerCommand::SetTitle(title.to_string()))
            .map_err(|_| RendererError::Window("Failed to send command".to_string()))
    }

    /// Close the window and drive the renderer to `Destroyed`.
    pub fn close(&self) {
        let _ = self.command_tx.send(ViewerCommand::Close);
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Relaxed)
    }

    pub fn try_recv_event(&self) -> Option<ViewerEvent> {
        self.event_rx.try_recv().ok()
    }
}

/// Viewer window state, owned by the event-loop thread.
pub struct ViewerWindow {
    title: String,
    width: u32,
    height: u32,
    clear_color: [f64; 4],
    command_rx: Receiver<ViewerCommand>,
    event_tx: Sender<ViewerEvent>,
    is_open: Arc<AtomicBool>,
    window: Option<Arc<Window>>,
    renderer: Option<StereoRenderer>,
    pending: Option<Arc<StereoImage>>,
}

impl ViewerWindow {
    /// Spawn the window thread and return the control handle.
    pub fn create(
        title: &str,
        width: u32,
        height: u32,
        clear_color: [f64; 4],
    ) -> Result<ViewerHandle, RendererError> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let is_open = Arc::new(AtomicBool::new(true));
        let is_open_clone = is_open.clone();
        let event_tx_clone = event_tx.clone();
        let title = title.to_string();
        let title_clone = title.clone();

        std::thread::spawn(move || {
            let event_loop = match EventLoop::new() {
                Ok(el) => el,
                Err(e) => {
                    let _ = event_tx_clone
                        .send(ViewerEvent::Fatal(format!("Event loop init failed: {}", e)));
                    is_open_clone.store(false, Ordering::Relaxed);
                    return;
                }
            };
            event_loop.set_control_flow(ControlFlow::Poll);

            let mut app = ViewerWindow {
                title: title_clone,
                width,
                height,
                clear_color,
                command_rx,
                event_tx: event_tx_clone,
                is_open: is_open_clone.clone(),
                window: None,
                renderer: None,
                pending: None,
            };

            if event_loop.run_app(&mut app).is_err() {
                log::error!("Viewer event loop exited with an error");
            }
            is_open_clone.store(false, Ordering::Relaxed);
        });

        Ok(ViewerHandle {
            command_tx,
            event_rx,
            is_open,
        })
    }

    fn process_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            match cmd {
                ViewerCommand::Present(frame) => {
                    self.pending = Some(frame);
                    if let Some(ref window) = self.window {
                        window.request_redraw();
                    }
                }
                ViewerCommand::SetTitle(title) => {
                    if let Some(ref window) = self.window {
                        window.set_title(&title);
                    }
                }
                ViewerCommand::Close => {
                    self.is_open.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.destroy();
            debug_assert_eq!(renderer.state(), RenderState::Destroyed);
        }
        self.renderer = None;
        self.window = None;
        self.is_open.store(false, Ordering::Relaxed);
    }
}

impl ApplicationHandler for ViewerWindow {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title(&self.title)
            .with_inner_size(PhysicalSize::new(self.width, self.height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                let _ = self
                    .event_tx
                    .send(ViewerEvent::Fatal(format!("Window creation failed: {}", e)));
                event_loop.exit();
                return;
            }
        };

        // The context is created here, on the event-loop thread, and is
        // only ever used from this thread.
        let renderer = pollster::block_on(StereoRenderer::new_with_surface(
            window.clone(),
            self.clear_color,
        ));

        match renderer {
            Ok(r) => {
                self.renderer = Some(r);
                log::info!("Viewer window created: {}x{}", self.width, self.height);
            }
            Err(e) => {
                // Fatal for the session; no silent retry
                log::error!("Failed to create stereo renderer: {}", e);
                let _ = self.event_tx.send(ViewerEvent::Fatal(e.to_string()));
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WinitWindowEvent,
    ) {
        match event {
            WinitWindowEvent::CloseRequested => {
                self.is_open.store(false, Ordering::Relaxed);
                let _ = self.event_tx.send(ViewerEvent::CloseRequested);
                event_loop.exit();
            }
            WinitWindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                // Resize only reconfigures stored surface dimensions
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
                let _ = self
                    .event_tx
                    .send(ViewerEvent::Resized(size.width, size.height));
            }
            WinitWindowEvent::Focused(focused) => {
                let _ = self.event_tx.send(ViewerEvent::Focused(focused));
            }
            WinitWindowEvent::RedrawRequested => {
                self.process_commands();

                if let Some(ref mut renderer) = self.renderer {
                    if let Some(frame) = self.pending.take() {
                        if let Err(e) = renderer.upload(&frame) {
                            log::error!("Failed to upload frame: {}", e);
                        }
                    }
                    // With no new frame this redraws the last uploaded
                    // textures instead of waiting
                    if let Err(e) = renderer.render() {
                        log::error!("Render failed: {}", e);
                    }
                }
            }
            _ => {}
        }

        if !self.is_open.load(Ordering::Relaxed) {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.process_commands();
        if !self.is_open.load(Ordering::Relaxed) {
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}
