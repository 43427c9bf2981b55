//! Terminal surface for the image viewer
//!
//! Renders with upper half blocks (`▀`): one character cell carries two pixel
//! rows, foreground = top pixel, background = bottom pixel. Focus-change events
//! from the terminal drive the viewer's blur guard.
//!
//! The image is decoded once per viewer. The decoded pixels and every scaled
//! frame are wiped as soon as they are no longer needed.

use std::io::{self, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind, KeyModifiers,
};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{
    self, disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{execute, queue};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::debug;
use zeroize::Zeroize;

use sealdrop_client::viewer::ViewerController;
use sealdrop_client::{Surface, ViewerControl};

const INPUT_POLL: Duration = Duration::from_millis(100);

/// Raw mode + alternate screen + focus reporting, undone on drop.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let guard = RawModeGuard;
        execute!(io::stdout(), EnterAlternateScreen, EnableFocusChange, Hide)?;
        Ok(guard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, DisableFocusChange, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

pub struct TerminalSurface {
    out: Stdout,
    ephemeral: bool,
    decoded: Option<RgbImage>,
}

impl TerminalSurface {
    pub fn new(ephemeral: bool) -> Self {
        Self {
            out: io::stdout(),
            ephemeral,
            decoded: None,
        }
    }

    fn size() -> (u16, u16) {
        terminal::size().unwrap_or((80, 24))
    }

    fn decode(&mut self, bytes: &[u8]) -> image::ImageResult<&RgbImage> {
        let img = match self.decoded.take() {
            Some(img) => img,
            None => image::load_from_memory(bytes)?.into_rgb8(),
        };
        Ok(&*self.decoded.insert(img))
    }

    fn forget_image(&mut self) {
        if let Some(mut img) = self.decoded.take() {
            wipe(&mut img);
        }
    }

    fn draw_image(&mut self, bytes: &[u8], zoomed: bool) -> io::Result<()> {
        let (cols, rows) = Self::size();
        queue!(self.out, Clear(ClearType::All))?;

        // last row is the status line
        let max_w = u32::from(cols).max(1);
        let max_h = (u32::from(rows.saturating_sub(1)) * 2).max(2);
        let (max_w, max_h) = if zoomed {
            (max_w, max_h)
        } else {
            ((max_w / 2).max(1), (max_h / 2).max(2))
        };

        let scaled = self.decode(bytes).map(|img| {
            let (w, h) = fit(img.dimensions(), (max_w, max_h));
            imageops::resize(img, w, h, FilterType::Triangle)
        });
        let mut frame = match scaled {
            Ok(frame) => frame,
            Err(e) => {
                queue!(
                    self.out,
                    MoveTo(0, 0),
                    Print(format!("cannot render image: {e}"))
                )?;
                return self.draw_hints(rows);
            }
        };

        let drawn = self.draw_frame(&frame);
        wipe(&mut frame);
        drawn?;
        self.draw_hints(rows)
    }

    fn draw_frame(&mut self, frame: &RgbImage) -> io::Result<()> {
        let (w, h) = frame.dimensions();
        for y in (0..h).step_by(2) {
            queue!(self.out, MoveTo(0, (y / 2) as u16))?;
            for x in 0..w {
                let (top, bottom) = cell(frame, x, y);
                queue!(
                    self.out,
                    SetForegroundColor(rgb(top)),
                    SetBackgroundColor(rgb(bottom)),
                    Print('▀')
                )?;
            }
            queue!(self.out, ResetColor)?;
        }
        Ok(())
    }

    fn draw_hints(&mut self, rows: u16) -> io::Result<()> {
        if !self.ephemeral {
            queue!(
                self.out,
                MoveTo(0, rows.saturating_sub(1)),
                Clear(ClearType::CurrentLine),
                Print("z zoom · q close")
            )?;
        }
        self.out.flush()
    }

    fn draw_blur(&mut self) -> io::Result<()> {
        queue!(
            self.out,
            ResetColor,
            Clear(ClearType::All),
            MoveTo(2, 1),
            Print("hidden while the terminal is out of focus")
        )?;
        self.out.flush()
    }

    fn draw_countdown(&mut self, remaining: u32) -> io::Result<()> {
        let (_, rows) = Self::size();
        queue!(
            self.out,
            ResetColor,
            MoveTo(0, rows.saturating_sub(1)),
            Clear(ClearType::CurrentLine),
            Print(format!("closes in {remaining}s · z zoom · q close"))
        )?;
        self.out.flush()
    }

    fn draw_clear(&mut self) -> io::Result<()> {
        self.forget_image();
        queue!(self.out, ResetColor, Clear(ClearType::Purge), Clear(ClearType::All))?;
        self.out.flush()
    }
}

impl Drop for TerminalSurface {
    fn drop(&mut self) {
        self.forget_image();
    }
}

impl Surface for TerminalSurface {
    fn paint(&mut self, image: &[u8], zoomed: bool) {
        if let Err(e) = self.draw_image(image, zoomed) {
            debug!("paint failed: {e}");
        }
    }

    fn blur(&mut self) {
        if let Err(e) = self.draw_blur() {
            debug!("blur failed: {e}");
        }
    }

    fn countdown(&mut self, remaining: u32) {
        if let Err(e) = self.draw_countdown(remaining) {
            debug!("countdown failed: {e}");
        }
    }

    fn clear(&mut self) {
        if let Err(e) = self.draw_clear() {
            debug!("clear failed: {e}");
        }
    }
}

fn rgb(px: [u8; 3]) -> Color {
    Color::Rgb {
        r: px[0],
        g: px[1],
        b: px[2],
    }
}

fn wipe(img: &mut RgbImage) {
    let pixels: &mut [u8] = img;
    pixels.zeroize();
}

/// Largest size with the source aspect ratio that fits in `max`.
fn fit((w, h): (u32, u32), (max_w, max_h): (u32, u32)) -> (u32, u32) {
    if w == 0 || h == 0 {
        return (1, 1);
    }
    let scale = f64::min(f64::from(max_w) / f64::from(w), f64::from(max_h) / f64::from(h));
    let fw = (f64::from(w) * scale).round().max(1.0) as u32;
    let fh = (f64::from(h) * scale).round().max(1.0) as u32;
    (fw.min(max_w), fh.min(max_h))
}

/// `(top, bottom)` pixels of the cell covering rows `y` and `y + 1`.
/// An odd last row gets black below.
fn cell(img: &RgbImage, x: u32, y: u32) -> ([u8; 3], [u8; 3]) {
    let top = img.get_pixel(x, y).0;
    let bottom = if y + 1 < img.height() {
        img.get_pixel(x, y + 1).0
    } else {
        [0, 0, 0]
    };
    (top, bottom)
}

/// Map a terminal event to a viewer control.
pub fn control_for(event: &Event) -> Option<ViewerControl> {
    match event {
        Event::FocusLost => Some(ViewerControl::Hide),
        Event::FocusGained => Some(ViewerControl::Show),
        Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
            KeyCode::Char('q') | KeyCode::Esc => Some(ViewerControl::Close),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(ViewerControl::Close)
            }
            KeyCode::Char('z') => Some(ViewerControl::ToggleZoom),
            _ => None,
        },
        _ => None,
    }
}

/// Forward terminal input to the viewer until `stop` is set or the viewer is gone.
/// Controls are never dropped while the viewer runs, so the loop only ends on
/// close.
pub fn spawn_input(
    controller: ViewerController,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !stop.load(Ordering::Acquire) {
            match event::poll(INPUT_POLL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("terminal poll failed: {e}");
                    break;
                }
            }
            let control = match event::read() {
                Ok(ev) => control_for(&ev),
                Err(e) => {
                    debug!("terminal read failed: {e}");
                    break;
                }
            };
            if let Some(control) = control {
                if !controller.send(control) {
                    break;
                }
            }
        }
    })
}
