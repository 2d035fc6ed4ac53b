//! Windowed front end: a winit window presenting the VGA framebuffer.
//!
//! The window drives the machine in slices: each redraw runs a chunk of
//! instructions, blits the latest synced frame, and schedules the next
//! redraw. Host key events feed the guest keyboard device. The window mode
//! is batch-like: the guest runs until it ends (or the window closes);
//! interactive debugging stays on the terminal.

use std::process;

use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::keyboard_map;
use crate::machine::{Machine, RunState};
use crate::vga::{VGA_HEIGHT, VGA_WIDTH};

/// Window scale factor.
const SCALE: u32 = 2;

/// Instructions executed per redraw.
const EXEC_CHUNK: u64 = 2_000_000;

struct App {
    machine: Machine,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
}

impl App {
    fn update_pixels(&mut self) {
        let Some(frame) = self.machine.take_frame() else {
            return;
        };
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };

        let buffer = pixels.frame_mut();
        // Convert ARGB32 -> RGBA8 for the pixels buffer
        for (i, &argb) in frame.pixels.iter().enumerate() {
            let offset = i * 4;
            buffer[offset] = ((argb >> 16) & 0xff) as u8;
            buffer[offset + 1] = ((argb >> 8) & 0xff) as u8;
            buffer[offset + 2] = (argb & 0xff) as u8;
            buffer[offset + 3] = 0xff;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already created
        }

        let size = winit::dpi::LogicalSize::new(VGA_WIDTH * SCALE, VGA_HEIGHT * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("emu-rv32")
            .with_inner_size(size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // Leak the window for a 'static reference: it lives for the
                // whole process and the OS reclaims it on exit.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(VGA_WIDTH, VGA_HEIGHT, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixels: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.machine.state = RunState::Quit;
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.repeat {
                    return;
                }
                if let PhysicalKey::Code(code) = event.physical_key
                    && let Some(key) = keyboard_map::map_keycode(code)
                {
                    self.machine
                        .key_event(key, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                match self.machine.state {
                    RunState::Running | RunState::Stop => self.machine.cpu_exec(EXEC_CHUNK),
                    RunState::End | RunState::Abort | RunState::Quit => {
                        event_loop.exit();
                        return;
                    }
                }

                self.update_pixels();
                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        eprintln!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

/// Run the machine under a window until the guest ends or the window
/// closes. Returns the machine for post-run inspection (exit code,
/// screenshots).
pub fn run(machine: Machine) -> Machine {
    let event_loop = match EventLoop::new() {
        Ok(el) => el,
        Err(e) => {
            eprintln!("Failed to create event loop: {e}");
            process::exit(2);
        }
    };

    let mut app = App {
        machine,
        window: None,
        pixels: None,
    };
    if let Err(e) = event_loop.run_app(&mut app) {
        eprintln!("Event loop error: {e}");
        process::exit(2);
    }
    app.machine
}
