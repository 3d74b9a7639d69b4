//! OV2640 sensor and flash LED on the AI-Thinker ESP32-CAM.

use espfw_core::camera::{CameraError, CameraSettings, FlashLight, Frame, FrameSize, FrameSource};
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_svc::sys::camera::{
    camera_config_t, esp_camera_deinit, esp_camera_fb_get, esp_camera_fb_return, esp_camera_init,
    framesize_t, framesize_t_FRAMESIZE_CIF, framesize_t_FRAMESIZE_QVGA, framesize_t_FRAMESIZE_SVGA,
    framesize_t_FRAMESIZE_SXGA, framesize_t_FRAMESIZE_UXGA, framesize_t_FRAMESIZE_VGA,
    framesize_t_FRAMESIZE_XGA, pixformat_t_PIXFORMAT_JPEG,
};
use esp_idf_svc::sys::{ledc_channel_t_LEDC_CHANNEL_0, ledc_timer_t_LEDC_TIMER_0, ESP_OK};
use log::{error, info};

/// AI-Thinker module wiring.
mod pinout {
    pub const PWDN: i32 = 32;
    pub const RESET: i32 = -1;
    pub const XCLK: i32 = 0;
    pub const SIOD: i32 = 26;
    pub const SIOC: i32 = 27;
    pub const Y9: i32 = 35;
    pub const Y8: i32 = 34;
    pub const Y7: i32 = 39;
    pub const Y6: i32 = 36;
    pub const Y5: i32 = 21;
    pub const Y4: i32 = 19;
    pub const Y3: i32 = 18;
    pub const Y2: i32 = 5;
    pub const VSYNC: i32 = 25;
    pub const HREF: i32 = 23;
    pub const PCLK: i32 = 22;
}

const XCLK_FREQ_HZ: i32 = 20_000_000;

fn driver_frame_size(size: FrameSize) -> framesize_t {
    match size {
        FrameSize::Qvga => framesize_t_FRAMESIZE_QVGA,
        FrameSize::Cif => framesize_t_FRAMESIZE_CIF,
        FrameSize::Vga => framesize_t_FRAMESIZE_VGA,
        FrameSize::Svga => framesize_t_FRAMESIZE_SVGA,
        FrameSize::Xga => framesize_t_FRAMESIZE_XGA,
        FrameSize::Sxga => framesize_t_FRAMESIZE_SXGA,
        FrameSize::Uxga => framesize_t_FRAMESIZE_UXGA,
    }
}

/// The esp32-camera driver. Only one instance may be initialized.
#[derive(Debug, Default)]
pub struct EspCamera {
    settings: Option<CameraSettings>,
}

impl EspCamera {
    pub fn new() -> Self {
        Self::default()
    }

    fn config(settings: &CameraSettings) -> camera_config_t {
        let mut config = camera_config_t::default();
        config.pin_pwdn = pinout::PWDN;
        config.pin_reset = pinout::RESET;
        config.pin_xclk = pinout::XCLK;
        config.pin_d7 = pinout::Y9;
        config.pin_d6 = pinout::Y8;
        config.pin_d5 = pinout::Y7;
        config.pin_d4 = pinout::Y6;
        config.pin_d3 = pinout::Y5;
        config.pin_d2 = pinout::Y4;
        config.pin_d1 = pinout::Y3;
        config.pin_d0 = pinout::Y2;
        config.pin_vsync = pinout::VSYNC;
        config.pin_href = pinout::HREF;
        config.pin_pclk = pinout::PCLK;
        config.__bindgen_anon_1.pin_sccb_sda = pinout::SIOD;
        config.__bindgen_anon_2.pin_sccb_scl = pinout::SIOC;

        config.xclk_freq_hz = XCLK_FREQ_HZ;
        config.ledc_timer = ledc_timer_t_LEDC_TIMER_0;
        config.ledc_channel = ledc_channel_t_LEDC_CHANNEL_0;
        config.pixel_format = pixformat_t_PIXFORMAT_JPEG;
        config.frame_size = driver_frame_size(settings.frame_size);
        config.jpeg_quality = settings.jpeg_quality as _;
        config.fb_count = settings.fb_count as _;
        config
    }
}

impl FrameSource for EspCamera {
    fn init(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        if self.settings.is_some() {
            // SAFETY: the driver was initialized by this instance.
            unsafe { esp_camera_deinit() };
            self.settings = None;
        }
        let config = Self::config(settings);
        // SAFETY: `config` outlives the call; the driver copies it.
        let err = unsafe { esp_camera_init(&config) };
        if err != ESP_OK {
            error!("Camera init failed with error 0x{:x}", err);
            return Err(CameraError::InitFailed(format!("error 0x{:x}", err)));
        }
        info!("Camera ready at {:?}", settings.frame_size);
        self.settings = Some(*settings);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.settings.is_some()
    }

    fn capture(&mut self) -> Result<Frame, CameraError> {
        if self.settings.is_none() {
            return Err(CameraError::NotInitialized);
        }
        // SAFETY: the driver is initialized; the buffer is copied out and
        // returned before leaving this block. Fields are read unaligned
        // because the struct is packed by bindgen.
        unsafe {
            let fb = esp_camera_fb_get();
            if fb.is_null() {
                return Err(CameraError::CaptureFailed("no frame buffer".into()));
            }
            let buf = std::ptr::addr_of!((*fb).buf).read_unaligned();
            let len = std::ptr::addr_of!((*fb).len).read_unaligned();
            let width = std::ptr::addr_of!((*fb).width).read_unaligned();
            let height = std::ptr::addr_of!((*fb).height).read_unaligned();
            let frame = if buf.is_null() || len == 0 {
                Err(CameraError::CaptureFailed("empty frame".into()))
            } else {
                Ok(Frame {
                    data: std::slice::from_raw_parts(buf, len).to_vec(),
                    width: width as u16,
                    height: height as u16,
                })
            };
            esp_camera_fb_return(fb);
            frame
        }
    }
}

/// The white LED on GPIO 4.
pub struct EspFlashLight {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl EspFlashLight {
    pub fn new(pin: AnyOutputPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::output(pin)?;
        pin.set_low()?;
        Ok(Self { pin })
    }
}

impl FlashLight for EspFlashLight {
    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = result {
            error!("Flash LED: {}", e);
        }
    }
}
