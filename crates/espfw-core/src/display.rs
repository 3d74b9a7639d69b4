//! Display and font rendering wrappers.
//!
//! A [`Canvas`] is the display driver plus font renderer. [`TextRenderer`]
//! adds the cursor adjustment the framework uses for centred text and the
//! size/colour shorthands the splash and clock screens are drawn with.

use tracing::{debug, info};

/// RGB565 colour.
pub type Color = u16;

pub const BLACK: Color = 0x0000;
pub const WHITE: Color = 0xFFFF;

pub const BASE_FONT_SIZE: u16 = 72;
pub const APP_NAME_FONT_SIZE: u16 = 56;
pub const FRIENDLY_NAME_FONT_SIZE: u16 = 24;
pub const INSTANCE_ID_FONT_SIZE: u16 = 18;
pub const TIME_FONT_SIZE: u16 = 128;

/// Text anchor relative to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    TopLeft,
    MiddleCenter,
}

/// A display with a text renderer attached.
pub trait Canvas: Send {
    fn width(&self) -> i32;
    fn height(&self) -> i32;
    fn fill_screen(&mut self, color: Color);
    fn set_font_size(&mut self, size: u16);
    fn set_font_color(&mut self, color: Color, background: Option<Color>);
    fn set_alignment(&mut self, align: Align);
    /// Draw `text` anchored at the cursor.
    fn draw_text(&mut self, text: &str, x: i32, y: i32);
}

impl<T: Canvas + ?Sized> Canvas for Box<T> {
    fn width(&self) -> i32 {
        (**self).width()
    }
    fn height(&self) -> i32 {
        (**self).height()
    }
    fn fill_screen(&mut self, color: Color) {
        (**self).fill_screen(color)
    }
    fn set_font_size(&mut self, size: u16) {
        (**self).set_font_size(size)
    }
    fn set_font_color(&mut self, color: Color, background: Option<Color>) {
        (**self).set_font_color(color, background)
    }
    fn set_alignment(&mut self, align: Align) {
        (**self).set_alignment(align)
    }
    fn draw_text(&mut self, text: &str, x: i32, y: i32) {
        (**self).draw_text(text, x, y)
    }
}

/// Draws strings with the framework's positioning rules.
pub struct TextRenderer<C> {
    canvas: C,
    font_size: u16,
    align: Align,
}

impl<C: Canvas> TextRenderer<C> {
    /// Clear the screen and set white-on-black, centred text.
    pub fn new(mut canvas: C) -> Self {
        info!("Setting up display.");
        canvas.fill_screen(BLACK);
        canvas.set_font_color(WHITE, Some(BLACK));
        canvas.set_font_size(BASE_FONT_SIZE);
        canvas.set_alignment(Align::MiddleCenter);
        Self {
            canvas,
            font_size: BASE_FONT_SIZE,
            align: Align::MiddleCenter,
        }
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn center(&self) -> (i32, i32) {
        (self.canvas.width() / 2, self.canvas.height() / 2)
    }

    pub fn set_alignment(&mut self, align: Align) {
        self.align = align;
        self.canvas.set_alignment(align);
    }

    pub fn clear(&mut self) {
        self.canvas.fill_screen(BLACK);
    }

    /// Centred text sits slightly high with the renderer's metrics, so
    /// middle-centre strings are raised by a fifth of the font size plus 2.
    pub fn draw_string(&mut self, text: &str, x: i32, y: i32) {
        let y = match self.align {
            Align::MiddleCenter => y - i32::from(self.font_size) / 5 - 2,
            Align::TopLeft => y,
        };
        self.canvas.draw_text(text, x, y);
    }

    pub fn draw_string_sized(&mut self, text: &str, x: i32, y: i32, font_size: u16) {
        self.font_size = font_size;
        self.canvas.set_font_size(font_size);
        self.draw_string(text, x, y);
    }

    pub fn draw_string_colored(&mut self, text: &str, x: i32, y: i32, font_size: u16, color: Color) {
        self.canvas.set_font_color(color, None);
        self.draw_string_sized(text, x, y, font_size);
    }

    pub fn draw_string_with_bg(
        &mut self,
        text: &str,
        x: i32,
        y: i32,
        font_size: u16,
        color: Color,
        background: Color,
    ) {
        self.canvas.set_font_color(color, Some(background));
        self.draw_string_sized(text, x, y, font_size);
    }

    /// Clear the screen and draw the time in the middle.
    pub fn draw_time(&mut self, time: &str) {
        debug!("Drawing time {}", time);
        self.clear();
        let (x, y) = self.center();
        self.draw_string_sized(time, x, y, TIME_FONT_SIZE);
    }
}

/// Boot screen showing the app and device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplashScreen<'a> {
    pub app_name: &'a str,
    pub friendly_name: &'a str,
    pub instance_id: i32,
}

impl SplashScreen<'_> {
    /// Line under the app name.
    pub fn status_line(&self) -> String {
        if self.instance_id < 0 {
            "Configuring...".to_string()
        } else {
            format!("Name: {}", self.friendly_name)
        }
    }

    pub fn draw<C: Canvas>(&self, renderer: &mut TextRenderer<C>) {
        let (x, y) = renderer.center();
        let height = renderer.canvas().height();
        let name_size = i32::from(APP_NAME_FONT_SIZE);
        let status_size = i32::from(FRIENDLY_NAME_FONT_SIZE);
        let id_size = i32::from(INSTANCE_ID_FONT_SIZE);

        renderer.draw_string_sized(self.app_name, x, y, APP_NAME_FONT_SIZE);
        renderer.draw_string_sized(
            &self.status_line(),
            x,
            y + name_size / 2 + status_size,
            FRIENDLY_NAME_FONT_SIZE,
        );
        renderer.draw_string_sized(
            &format!("Device ID: {}", self.instance_id),
            x,
            height - id_size / 2,
            INSTANCE_ID_FONT_SIZE,
        );
    }
}
