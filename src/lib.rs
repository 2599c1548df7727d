#![cfg_attr(not(test), no_std)]

mod color;
mod instruction;

use core::marker::PhantomData;

use embedded_graphics_core::geometry::Size;
use embedded_graphics_core::pixelcolor::Rgb565;
use embedded_hal::digital::{ErrorKind as PinErrorKind, OutputPin};
#[cfg(not(feature = "async"))]
use embedded_hal::spi::SpiDevice;
#[cfg(feature = "async")]
use embedded_hal_async::spi::SpiDevice;

pub use color::{
    PixelLayout, PixelSource, RgbImage, raw565, rgb565_from_rgb888, rgb888_from_rgb565,
};
pub use instruction::{DEFAULT_MADCTL, INIT_SEQUENCE, Instruction};

// Screen dimensions for the GC9A01A 240×240 round panel
pub const SCREEN_WIDTH: u16 = 240;
pub const SCREEN_HEIGHT: u16 = 240;
/// Bytes in one full RGB565 frame.
pub const FRAME_BYTES: usize = SCREEN_WIDTH as usize * SCREEN_HEIGHT as usize * 2;

// Buffer size for chunked operations
pub const BUF_SIZE: usize = 4096;
/// Largest single SPI write issued by default.
pub const MAX_TRANSFER: usize = 4096;

const RESET_SETTLE_MS: u64 = 10;
const SLEEP_OUT_MS: u64 = 120;
const DISPLAY_ON_MS: u64 = 20;

/// Memory access control (MADCTL) row/column exchange bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Orientation {
    Portrait = 0x40,
    Landscape = 0x20,
    PortraitSwapped = 0x80,
    LandscapeSwapped = 0xE0,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// RGB subpixel order instead of the panel's usual BGR.
    pub rgb: bool,
    /// Send display-inversion-on instead of off at the end of `init`.
    pub inverted: bool,
    pub orientation: Orientation,
    /// Upper bound for one SPI write. Some transports truncate or fail on
    /// longer transfers.
    pub max_transfer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rgb: false,
            inverted: false,
            orientation: Orientation::Portrait,
            max_transfer: MAX_TRANSFER,
        }
    }
}

impl Config {
    fn madctl(&self) -> u8 {
        if self.rgb {
            self.orientation as u8
        } else {
            self.orientation as u8 | 0x08
        }
    }
}

/// Level of the D/C line for the next bus write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Frame {
    /// D/C low: a single opcode byte.
    Command,
    /// D/C high: arguments or pixel data for the preceding command.
    Data,
}

/// Controller bring-up progress as last driven by `reset` and `init`.
///
/// Later power commands (`sleep`, `wake`, `display_off`, `display_on`) do
/// not move it; it stays at [`State::DisplayOn`] once `init` has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Uninitialized,
    Resetting,
    Configuring,
    SleepingOut,
    DisplayOn,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E = ()> {
    /// Communication error
    Comm(E),
    /// Pin setting error
    Pin(PinErrorKind),
    /// Scratch buffer or transfer limit cannot hold a single pixel
    Config,
    /// `show` was given an image that is not exactly the panel size
    DimensionMismatch { expected: Size, actual: Size },
    /// Zero-sized window, or an end coordinate past `u16::MAX`
    InvalidWindow,
}

/// GC9A01A session over one SPI device and its D/C, reset and backlight pins.
///
/// Pixel writes are only meaningful once [`init`](Self::init) has reached
/// [`State::DisplayOn`]; the driver does not check this.
pub struct GC9A01A<'b, SPI, DC, RST, BL, TIMER>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BL: OutputPin,
    TIMER: Timer,
{
    spi: SPI,
    dc: DC,
    rst: RST,
    bl: BL,
    config: Config,
    buffer: &'b mut [u8],
    chunk_len: usize,
    state: State,
    _timer: PhantomData<TIMER>,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "GC9A01A",),
    async(feature = "async", keep_self)
)]
impl<'b, SPI, DC, RST, BL, E, TIMER> GC9A01A<'b, SPI, DC, RST, BL, TIMER>
where
    SPI: SpiDevice<Error = E>,
    DC: OutputPin,
    RST: OutputPin,
    BL: OutputPin,
    TIMER: Timer,
{
    /// Take ownership of the transport handles. No bus or pin traffic
    /// happens here.
    ///
    /// `buffer` is the scratch space for pixel streaming; each SPI write is
    /// at most `min(buffer.len(), config.max_transfer)` bytes, rounded down
    /// to whole pixels.
    pub fn new(
        config: Config,
        spi: SPI,
        dc: DC,
        rst: RST,
        bl: BL,
        buffer: &'b mut [u8],
    ) -> Result<Self, Error<E>> {
        let chunk_len = buffer.len().min(config.max_transfer) & !1;
        if chunk_len == 0 {
            return Err(Error::Config);
        }

        Ok(Self {
            spi,
            dc,
            rst,
            bl,
            config,
            buffer,
            chunk_len,
            state: State::Uninitialized,
            _timer: PhantomData,
        })
    }

    /// Progress of the last `reset` / `init`, see [`State`].
    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hand back the SPI device and the D/C, reset and backlight pins.
    pub fn release(self) -> (SPI, DC, RST, BL) {
        (self.spi, self.dc, self.rst, self.bl)
    }

    pub async fn init(&mut self) -> Result<(), Error<E>> {
        #[cfg(feature = "defmt")]
        defmt::info!("GC9A01A init");

        self.reset().await?;

        self.state = State::Configuring;
        for &(cmd, params) in INIT_SEQUENCE {
            self.write_command(cmd, params).await?;
        }

        self.write_command(Instruction::TearingEffectEnable as u8, &[])
            .await?;
        let inversion = if self.config.inverted {
            Instruction::DisplayInversionOn
        } else {
            Instruction::DisplayInversionOff
        };
        self.write_command(inversion as u8, &[]).await?;

        self.write_command(Instruction::SleepOut as u8, &[]).await?;
        self.state = State::SleepingOut;
        TIMER::delay_ms(SLEEP_OUT_MS).await;

        self.write_command(Instruction::DisplayOn as u8, &[]).await?;
        TIMER::delay_ms(DISPLAY_ON_MS).await;
        self.state = State::DisplayOn;

        // The register table leaves the panel in portrait BGR
        let madctl = self.config.madctl();
        if madctl != DEFAULT_MADCTL {
            self.write_command(Instruction::MemoryAccessControl as u8, &[madctl])
                .await?;
        }

        #[cfg(feature = "defmt")]
        defmt::info!("GC9A01A display on");
        Ok(())
    }

    pub async fn reset(&mut self) -> Result<(), Error<E>> {
        self.state = State::Resetting;
        self.rst.set_high().map_err(Self::pin_error)?;
        TIMER::delay_ms(RESET_SETTLE_MS).await;
        self.rst.set_low().map_err(Self::pin_error)?;
        TIMER::delay_ms(RESET_SETTLE_MS).await;
        self.rst.set_high().map_err(Self::pin_error)?;
        TIMER::delay_ms(RESET_SETTLE_MS).await;
        self.state = State::Uninitialized;

        Ok(())
    }

    pub async fn set_orientation(&mut self, orientation: Orientation) -> Result<(), Error<E>> {
        let madctl = Config {
            orientation,
            ..self.config
        }
        .madctl();
        self.write_command(Instruction::MemoryAccessControl as u8, &[madctl])
            .await?;
        self.config.orientation = orientation;
        Ok(())
    }

    pub async fn set_invert(&mut self, inverted: bool) -> Result<(), Error<E>> {
        let cmd = if inverted {
            Instruction::DisplayInversionOn
        } else {
            Instruction::DisplayInversionOff
        };
        self.write_command(cmd as u8, &[]).await?;
        self.config.inverted = inverted;
        Ok(())
    }

    pub async fn sleep(&mut self) -> Result<(), Error<E>> {
        self.write_command(Instruction::SleepIn as u8, &[]).await?;
        TIMER::delay_ms(SLEEP_OUT_MS).await;
        Ok(())
    }

    pub async fn wake(&mut self) -> Result<(), Error<E>> {
        self.write_command(Instruction::SleepOut as u8, &[]).await?;
        TIMER::delay_ms(SLEEP_OUT_MS).await;
        Ok(())
    }

    pub async fn display_on(&mut self) -> Result<(), Error<E>> {
        self.write_command(Instruction::DisplayOn as u8, &[]).await
    }

    pub async fn display_off(&mut self) -> Result<(), Error<E>> {
        self.write_command(Instruction::DisplayOff as u8, &[]).await
    }

    /// Drive the backlight pin: on for any `level > 0`, off otherwise.
    ///
    /// The pin is plain GPIO, so `level` is not a brightness; every positive
    /// value gives full brightness.
    pub fn set_backlight(&mut self, level: i32) -> Result<(), Error<E>> {
        #[cfg(feature = "defmt")]
        defmt::debug!("backlight level {}", level);

        if level > 0 {
            self.bl.set_high().map_err(Self::pin_error)
        } else {
            self.bl.set_low().map_err(Self::pin_error)
        }
    }

    /// Send one opcode byte with D/C low.
    ///
    /// Raw access: the driver does not track what the opcode changes.
    pub async fn send_command(&mut self, opcode: u8) -> Result<(), Error<E>> {
        self.send(Frame::Command, &[opcode]).await
    }

    /// Send `data` with D/C high, split into transfer-sized writes.
    pub async fn send_data(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        self.send(Frame::Data, data).await
    }

    async fn send(&mut self, frame: Frame, bytes: &[u8]) -> Result<(), Error<E>> {
        self.select(frame)?;
        for part in bytes.chunks(self.chunk_len) {
            self.spi.write(part).await.map_err(Error::Comm)?;
        }
        Ok(())
    }

    /// Write command with optional parameters
    async fn write_command(&mut self, cmd: u8, params: &[u8]) -> Result<(), Error<E>> {
        self.send_command(cmd).await?;

        if !params.is_empty() {
            self.send_data(params).await?;
        }
        Ok(())
    }

    fn select(&mut self, frame: Frame) -> Result<(), Error<E>> {
        match frame {
            Frame::Command => self.dc.set_low(),
            Frame::Data => self.dc.set_high(),
        }
        .map_err(Self::pin_error)
    }

    fn pin_error<P: embedded_hal::digital::Error>(err: P) -> Error<E> {
        Error::Pin(err.kind())
    }

    /// Program the inclusive column/row range and arm memory write.
    pub async fn set_address_window(
        &mut self,
        sx: u16,
        sy: u16,
        ex: u16,
        ey: u16,
    ) -> Result<(), Error<E>> {
        #[cfg(feature = "defmt")]
        defmt::debug!("window x {}..={} y {}..={}", sx, ex, sy, ey);

        let [sx_hi, sx_lo] = sx.to_be_bytes();
        let [ex_hi, ex_lo] = ex.to_be_bytes();
        self.write_command(
            Instruction::ColumnAddressSet as u8,
            &[sx_hi, sx_lo, ex_hi, ex_lo],
        )
        .await?;

        let [sy_hi, sy_lo] = sy.to_be_bytes();
        let [ey_hi, ey_lo] = ey.to_be_bytes();
        self.write_command(
            Instruction::RowAddressSet as u8,
            &[sy_hi, sy_lo, ey_hi, ey_lo],
        )
        .await?;

        // Next data frame is the pixel stream
        self.write_command(Instruction::MemoryWrite as u8, &[]).await
    }

    /// Address the `width`×`height` rectangle at `(x, y)` for the next
    /// pixel stream. Must be reissued before every independent transfer.
    ///
    /// Staying on the panel is the caller's job; the controller silently
    /// accepts out-of-range windows.
    pub async fn set_window(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    ) -> Result<(), Error<E>> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidWindow);
        }
        let (ex, ey) = match (x.checked_add(width - 1), y.checked_add(height - 1)) {
            (Some(ex), Some(ey)) => (ex, ey),
            _ => return Err(Error::InvalidWindow),
        };

        self.set_address_window(x, y, ex, ey).await
    }

    /// Fill the whole panel with a raw RGB565 color.
    pub async fn fill(&mut self, color: u16) -> Result<(), Error<E>> {
        self.set_window(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT).await?;
        self.write_repeated(color, SCREEN_WIDTH as u32 * SCREEN_HEIGHT as u32)
            .await
    }

    pub async fn fill_color(&mut self, color: Rgb565) -> Result<(), Error<E>> {
        self.fill(raw565(color)).await
    }

    pub async fn clear(&mut self) -> Result<(), Error<E>> {
        self.fill(0x0000).await
    }

    /// Fill a rectangular area, clipped to the panel
    pub async fn fill_rect(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        color: Rgb565,
    ) -> Result<(), Error<E>> {
        // Bounds checking
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return Ok(()); // Outside screen bounds
        }

        let actual_width = width.min(SCREEN_WIDTH - x);
        let actual_height = height.min(SCREEN_HEIGHT - y);

        if actual_width == 0 || actual_height == 0 {
            return Ok(()); // Nothing to draw
        }

        self.set_window(x, y, actual_width, actual_height).await?;
        self.write_repeated(raw565(color), actual_width as u32 * actual_height as u32)
            .await
    }

    pub async fn set_pixel(&mut self, x: u16, y: u16, color: Rgb565) -> Result<(), Error<E>> {
        if x >= SCREEN_WIDTH || y >= SCREEN_HEIGHT {
            return Ok(()); // Outside bounds
        }

        self.set_window(x, y, 1, 1).await?;
        self.send_data(&raw565(color).to_be_bytes()).await
    }

    /// Convert `image` to RGB565 and stream it as one full frame.
    ///
    /// The image must be exactly 240×240; otherwise nothing is sent.
    pub async fn show<I>(&mut self, image: &I) -> Result<(), Error<E>>
    where
        I: PixelSource + ?Sized,
    {
        let expected = Size::new(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
        let actual = image.size();
        if actual != expected {
            #[cfg(feature = "defmt")]
            defmt::warn!("image is {}, panel is {}", actual, expected);
            return Err(Error::DimensionMismatch { expected, actual });
        }

        self.set_window(0, 0, SCREEN_WIDTH, SCREEN_HEIGHT).await?;
        self.write_pixels(SCREEN_WIDTH, SCREEN_HEIGHT, |x, y| {
            color::pack(image.pixel(x, y))
        })
        .await
    }

    /// Stream `pixels` copies of `color` into the armed window.
    async fn write_repeated(&mut self, color: u16, pixels: u32) -> Result<(), Error<E>> {
        let [hi, lo] = color.to_be_bytes();
        let chunk = self.chunk_len;
        for pair in self.buffer[..chunk].chunks_exact_mut(2) {
            pair[0] = hi;
            pair[1] = lo;
        }

        self.select(Frame::Data)?;
        let mut remaining = pixels as usize * 2;
        while remaining > 0 {
            let len = remaining.min(chunk);
            self.spi
                .write(&self.buffer[..len])
                .await
                .map_err(Error::Comm)?;
            remaining -= len;
        }
        Ok(())
    }

    /// Stream a row-major `width`×`height` block produced by `pixel`.
    async fn write_pixels<F>(
        &mut self,
        width: u16,
        height: u16,
        mut pixel: F,
    ) -> Result<(), Error<E>>
    where
        F: FnMut(u32, u32) -> u16,
    {
        let chunk = self.chunk_len;
        self.select(Frame::Data)?;

        let mut filled = 0;
        for y in 0..height as u32 {
            for x in 0..width as u32 {
                let [hi, lo] = pixel(x, y).to_be_bytes();
                self.buffer[filled] = hi;
                self.buffer[filled + 1] = lo;
                filled += 2;

                if filled == chunk {
                    self.spi
                        .write(&self.buffer[..filled])
                        .await
                        .map_err(Error::Comm)?;
                    filled = 0;
                }
            }
        }

        if filled > 0 {
            self.spi
                .write(&self.buffer[..filled])
                .await
                .map_err(Error::Comm)?;
        }
        Ok(())
    }
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Timer",),
    async(feature = "async", keep_self)
)]
/// Simplified timer trait for delay operations.
pub trait Timer {
    /// Delay for the specified number of milliseconds.
    async fn delay_ms(milliseconds: u64);
}

/// [`Timer`] backed by the embassy time driver.
#[cfg(feature = "embassy-time")]
pub struct EmbassyTimer;

#[cfg(all(feature = "embassy-time", feature = "async"))]
impl Timer for EmbassyTimer {
    async fn delay_ms(milliseconds: u64) {
        embassy_time::Timer::after_millis(milliseconds).await;
    }
}

#[cfg(all(feature = "embassy-time", not(feature = "async")))]
impl Timer for EmbassyTimer {
    fn delay_ms(milliseconds: u64) {
        embassy_time::block_for(embassy_time::Duration::from_millis(milliseconds));
    }
}
