#![no_std]

//! Driver for daisy-chained MAX7219 LED dot-matrix controllers.
//!
//! Each MAX7219 drives one 8x8 matrix. Any number of chips can be cascaded
//! on a single bus: DIN of the first chip goes to MOSI, DOUT of each chip
//! feeds DIN of the next, and all chips share CLK and the LOAD (chip-select)
//! line. Chip positions are 0-indexed from the transport.
//!
//! The driver is generic over any [`SpiBus`] implementation, so a hardware
//! SPI peripheral and a bit-banged/emulated bus are interchangeable, plus an
//! [`OutputPin`] for LOAD. With the default `async` feature the API is
//! async on top of `embedded-hal-async`; without it the same methods are
//! blocking on `embedded-hal`.
//!
//! ```ignore
//! let mut display = Max7219::new(spi, load, 4, FONT_5X7);
//! display.init().await?;
//! display.draw_str("8:15").await?;
//! for pixel in -32..=40 {
//!     display.draw_str_scrolled("Hello", pixel).await?;
//!     // delay between steps is up to the caller
//! }
//! ```

use core::convert::Infallible;

use embedded_hal::digital::OutputPin;
#[cfg(not(feature = "async"))]
use embedded_hal::spi::SpiBus;
#[cfg(feature = "async")]
use embedded_hal_async::spi::SpiBus;

#[cfg(feature = "font-rendering")]
mod font;
#[cfg(feature = "font-rendering")]
pub use font::FONT_5X7;

/// Rows and columns of the matrix behind each chip.
pub const MATRIX_SIZE: usize = 8;

/// MAX7219 register addresses. Digit-row registers are the raw codes
/// 1 to 8 (one per hardware row) and are computed, not listed here.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// No-Op (00h) - pipeline padding for cascaded chips
    Noop = 0x00,
    /// Decode Mode (09h) - BCD decode per digit; 0 selects raw bitmaps
    DecodeMode = 0x09,
    /// Intensity (0Ah) - brightness, low 4 bits
    Intensity = 0x0A,
    /// Scan Limit (0Bh) - number of active rows minus one
    ScanLimit = 0x0B,
    /// Shutdown (0Ch) - 0 powers the chip down, 1 is normal operation
    Shutdown = 0x0C,
    /// Display Test (0Fh) - all-LEDs-on test mode
    DisplayTest = 0x0F,
}

/// One character as 8 column bytes. Byte `c` is pixel column `c` of the
/// character; bit `i` of that byte is the pixel at row `i`.
pub type Glyph = [u8; MATRIX_SIZE];

/// The all-off glyph, rendered for every character the font does not cover.
pub const BLANK_GLYPH: Glyph = [0; MATRIX_SIZE];

/// An 8x8 bitmap font covering a contiguous run of character codes,
/// borrowed from the caller and never mutated.
#[derive(Debug, Clone, Copy)]
pub struct Font<'a> {
    first_code: u8,
    glyphs: &'a [Glyph],
}

impl<'a> Font<'a> {
    /// Build a font from a glyph table starting at `first_code`.
    pub const fn new(first_code: u8, glyphs: &'a [Glyph]) -> Self {
        Self { first_code, glyphs }
    }

    /// Look up the glyph for a character code. Codes outside the covered
    /// range map to [`BLANK_GLYPH`].
    pub fn glyph(&self, code: u8) -> Glyph {
        let index = (code as usize).wrapping_sub(self.first_code as usize);
        match self.glyphs.get(index) {
            Some(glyph) => *glyph,
            None => BLANK_GLYPH,
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E = ()> {
    /// Communication error
    Comm(E),
    /// Pin setting error
    Pin(Infallible),
}

/// A chain of one or more cascaded MAX7219 chips behind a shared bus and
/// LOAD line, exclusively owned for the session.
pub struct Max7219<'f, SPI, LOAD>
where
    SPI: SpiBus<u8>,
    LOAD: OutputPin<Error = Infallible>,
{
    spi: SPI,
    load: LOAD,
    chips: u8,
    font: Font<'f>,
}

#[maybe_async_cfg::maybe(
    sync(cfg(not(feature = "async")), self = "Max7219",),
    async(feature = "async", keep_self)
)]
impl<'f, SPI, LOAD, E> Max7219<'f, SPI, LOAD>
where
    SPI: SpiBus<u8, Error = E>,
    LOAD: OutputPin<Error = Infallible>,
{
    /// Take ownership of the bus and LOAD pin for a chain of `chips`
    /// cascaded controllers. A chain length of 0 is treated as 1.
    pub fn new(spi: SPI, load: LOAD, chips: u8, font: Font<'f>) -> Self {
        Self {
            spi,
            load,
            chips: chips.max(1),
            font,
        }
    }

    /// Bring the whole chain up: raise LOAD to its idle level, then walk
    /// every chip out of whatever mode it powered up in and leave the
    /// chain blank at full intensity.
    pub async fn init(&mut self) -> Result<(), Error<E>> {
        self.load.set_high().map_err(Error::Pin)?;

        // Chips may power up in display-test mode, which draws a lot of
        // current, so configure repeatedly before leaving shutdown.
        for _ in 0..self.chips {
            self.send_to_all(Register::ScanLimit as u8, 7).await?;
            self.send_to_all(Register::DecodeMode as u8, 0).await?;
            self.send_to_all(Register::DisplayTest as u8, 0).await?;
            self.send_to_all(Register::Intensity as u8, 0x0F).await?;
            self.draw_str("").await?;
            self.send_to_all(Register::Shutdown as u8, 1).await?;
        }
        Ok(())
    }

    /// Put every chip into power-down mode. The register contents survive,
    /// so a later shutdown-register write can light the panel back up.
    pub async fn shutdown(&mut self) -> Result<(), Error<E>> {
        self.send_to_all(Register::Shutdown as u8, 0).await
    }

    /// Give the bus and the LOAD pin back.
    pub fn release(self) -> (SPI, LOAD) {
        (self.spi, self.load)
    }

    /// Set the brightness of the whole chain. Values above 15 are masked
    /// to the low 4 bits, matching the width of the intensity register.
    pub async fn set_intensity(&mut self, level: u8) -> Result<(), Error<E>> {
        self.send_to_all(Register::Intensity as u8, level & 0x0F).await
    }

    /// Render one character at a chip position.
    pub async fn draw_char(&mut self, position: u8, code: u8) -> Result<(), Error<E>> {
        let glyph = self.font.glyph(code);
        self.draw_glyph(position, &glyph).await
    }

    /// Render a raw glyph at a chip position.
    ///
    /// Each of the 8 columns is rotated into the chip's row-major register
    /// layout and latched in its own chip-select pulse, so every column
    /// write stays synchronized across the chain.
    pub async fn draw_glyph(&mut self, position: u8, glyph: &Glyph) -> Result<(), Error<E>> {
        for col in 0..MATRIX_SIZE as u8 {
            self.send_to_position(position, col + 1, rotated_column(glyph, col))
                .await?;
        }
        Ok(())
    }

    /// Render a string, one character per chip. Positions past the end of
    /// the string get the blank (space) glyph, so a shorter string never
    /// leaves stale pixels behind a longer one.
    pub async fn draw_str(&mut self, s: &str) -> Result<(), Error<E>> {
        let codes = s.as_bytes();
        for position in 0..self.chips {
            let code = codes.get(position as usize).copied().unwrap_or(b' ');
            self.draw_char(position, code).await?;
        }
        Ok(())
    }

    /// Render a string shifted left by `pixel` columns, for pixel-granular
    /// scrolling. `pixel` is the global pixel column shown at the chain's
    /// leftmost column; it may be negative or run past the end of the
    /// string, and columns outside the string are blank.
    ///
    /// The composition is stateless. Animation is the caller's loop:
    /// re-render at each successive offset.
    pub async fn draw_str_scrolled(&mut self, s: &str, pixel: i32) -> Result<(), Error<E>> {
        let (first_glyph, sub) = split_pixel_offset(pixel);
        for position in 0..self.chips {
            let window =
                scrolled_window(&self.font, s.as_bytes(), first_glyph + position as i32, sub);
            self.draw_glyph(position, &window).await?;
        }
        Ok(())
    }

    /// Deliver one (register, value) frame to a single chip position
    /// within one chip-select pulse. Leading no-op frames shift the real
    /// frame past the chips in front of the target; trailing no-ops keep
    /// it from drifting further. On latch every chip applies what sits in
    /// its shift register, so only the target sees a real write.
    async fn send_to_position(&mut self, position: u8, reg: u8, value: u8) -> Result<(), Error<E>> {
        self.load.set_low().map_err(Error::Pin)?;
        for slot in 0..self.chips {
            if slot == position {
                self.send_frame(reg, value).await?;
            } else {
                self.send_frame(Register::Noop as u8, 0x00).await?;
            }
        }
        self.spi.flush().await.map_err(Error::Comm)?;
        self.load.set_high().map_err(Error::Pin)
    }

    /// Deliver the same (register, value) frame to every chip in one
    /// chip-select pulse. Used for the global configuration registers.
    async fn send_to_all(&mut self, reg: u8, value: u8) -> Result<(), Error<E>> {
        self.load.set_low().map_err(Error::Pin)?;
        for _ in 0..self.chips {
            self.send_frame(reg, value).await?;
        }
        self.spi.flush().await.map_err(Error::Comm)?;
        self.load.set_high().map_err(Error::Pin)
    }

    async fn send_frame(&mut self, reg: u8, value: u8) -> Result<(), Error<E>> {
        self.spi.write(&[reg, value]).await.map_err(Error::Comm)
    }
}

/// Rotate one glyph column into the chip's register layout: bit `(7 - i)`
/// of the result is bit `col` of glyph byte `i`, turning the column-major
/// glyph 90 degrees into one row-register byte per matrix column.
fn rotated_column(glyph: &Glyph, col: u8) -> u8 {
    let mut out = 0;
    for (row, byte) in glyph.iter().enumerate() {
        out |= ((byte >> col) & 1) << (7 - row);
    }
    out
}

/// Split a pixel offset into the index of the first visible character and
/// the sub-character column offset within it.
///
/// Uses floor division, so the remainder stays in 0..=7 for negative
/// offsets too: -1 is the last column of character -1, not an off-by-one
/// peek into character 0 (which is what truncating division would give).
fn split_pixel_offset(pixel: i32) -> (i32, usize) {
    (
        pixel.div_euclid(MATRIX_SIZE as i32),
        pixel.rem_euclid(MATRIX_SIZE as i32) as usize,
    )
}

/// The 8 visible columns of the chip showing character `index` of `text`
/// at sub-character offset `sub`, possibly blending two adjacent
/// characters. Out-of-range neighbour indices contribute blank columns.
fn scrolled_window(font: &Font<'_>, text: &[u8], index: i32, sub: usize) -> Glyph {
    // Scratch of the character plus one neighbour on each side; the
    // window at `8 + sub` can only ever straddle two of them.
    let mut scratch = [0u8; 3 * MATRIX_SIZE];
    for (slot, neighbour) in [index - 1, index, index + 1].into_iter().enumerate() {
        if neighbour >= 0 && (neighbour as usize) < text.len() {
            let glyph = font.glyph(text[neighbour as usize]);
            scratch[slot * MATRIX_SIZE..][..MATRIX_SIZE].copy_from_slice(&glyph);
        }
    }

    let mut window = BLANK_GLYPH;
    window.copy_from_slice(&scratch[MATRIX_SIZE + sub..][..MATRIX_SIZE]);
    window
}

#[cfg(test)]
extern crate std;
