//! One-wire bus access for the DS18B20 temperature probes.
//!
//! [`OneWireBus`] is the bit-level seam: [`PinBus`] drives it over a single
//! open-drain GPIO with standard-speed slot timings, and the ROM search and
//! DS18B20 commands are written against the trait only.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use heapless::Vec;
use thiserror::Error;

const SEARCH_ROM: u8 = 0xF0;
const MATCH_ROM: u8 = 0x55;
const SKIP_ROM: u8 = 0xCC;
const CONVERT_T: u8 = 0x44;
const READ_SCRATCHPAD: u8 = 0xBE;

/// DS18B20 family code (first ROM byte).
pub const DS18B20_FAMILY: u8 = 0x28;

/// Worst-case 12-bit conversion time in milliseconds.
pub const CONVERSION_TIME_MS: u64 = 750;

/// Hex string for a ROM address ("28FF4B6A61160412").
pub type AddressString = heapless::String<16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OneWireError<E> {
    #[error("one-wire pin error: {0:?}")]
    Bus(E),
    #[error("no device answered the reset pulse")]
    NoPresence,
    #[error("CRC mismatch")]
    CrcMismatch,
}

impl<E> From<E> for OneWireError<E> {
    fn from(e: E) -> Self {
        OneWireError::Bus(e)
    }
}

/// Bit-level one-wire operations. Bytes go out least-significant bit first.
pub trait OneWireBus {
    type Error;

    /// Issue a reset pulse; returns whether any device answered with presence.
    fn reset(&mut self) -> Result<bool, Self::Error>;

    fn write_bit(&mut self, bit: bool) -> Result<(), Self::Error>;

    fn read_bit(&mut self) -> Result<bool, Self::Error>;

    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        for i in 0..8 {
            self.write_bit((byte >> i) & 1 == 1)?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Self::Error> {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }
}

/// Bit-banged bus on an open-drain pin with an external pull-up.
pub struct PinBus<P, D> {
    pin: P,
    delay: D,
}

impl<P, D> PinBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self { pin, delay }
    }
}

impl<P, D> OneWireBus for PinBus<P, D>
where
    P: InputPin + OutputPin,
    D: DelayNs,
{
    type Error = P::Error;

    fn reset(&mut self) -> Result<bool, P::Error> {
        self.pin.set_low()?;
        self.delay.delay_us(480);
        self.pin.set_high()?;
        self.delay.delay_us(70);
        let presence = self.pin.is_low()?;
        self.delay.delay_us(410);
        Ok(presence)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), P::Error> {
        self.pin.set_low()?;
        if bit {
            self.delay.delay_us(6);
            self.pin.set_high()?;
            self.delay.delay_us(64);
        } else {
            self.delay.delay_us(60);
            self.pin.set_high()?;
            self.delay.delay_us(10);
        }
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, P::Error> {
        self.pin.set_low()?;
        self.delay.delay_us(6);
        self.pin.set_high()?;
        self.delay.delay_us(9);
        let bit = self.pin.is_high()?;
        self.delay.delay_us(55);
        Ok(bit)
    }
}

/// Dallas/Maxim CRC-8 (polynomial x^8 + x^5 + x^4 + 1, reflected).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        let mut b = byte;
        for _ in 0..8 {
            let mix = (crc ^ b) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            b >>= 1;
        }
    }
    crc
}

/// 64-bit device ROM: family code, 48-bit serial, CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomAddress(pub [u8; 8]);

impl RomAddress {
    pub fn family(&self) -> u8 {
        self.0[0]
    }

    /// True if the trailing CRC byte matches the first seven.
    pub fn crc_ok(&self) -> bool {
        crc8(&self.0[..7]) == self.0[7]
    }

    /// Write the ROM as 16 upper-case hex digits.
    pub fn format(&self, buf: &mut AddressString) {
        use core::fmt::Write;
        for byte in self.0 {
            let _ = write!(buf, "{:02X}", byte);
        }
    }
}

/// Search-ROM state machine; each [`RomSearch::next`] yields one device.
pub struct RomSearch {
    rom: [u8; 8],
    last_discrepancy: u8,
    last_device: bool,
}

impl RomSearch {
    pub const fn new() -> Self {
        Self {
            rom: [0; 8],
            last_discrepancy: 0,
            last_device: false,
        }
    }

    /// Find the next device on the bus, or `None` once all have been seen.
    pub fn next<B: OneWireBus>(&mut self, bus: &mut B) -> Result<Option<RomAddress>, B::Error> {
        if self.last_device {
            return Ok(None);
        }
        if !bus.reset()? {
            *self = Self::new();
            return Ok(None);
        }

        bus.write_byte(SEARCH_ROM)?;

        let mut last_zero = 0u8;
        for bit_number in 1..=64u8 {
            let id_bit = bus.read_bit()?;
            let cmp_bit = bus.read_bit()?;
            if id_bit && cmp_bit {
                // Nobody is driving the line
                *self = Self::new();
                return Ok(None);
            }

            let byte = usize::from((bit_number - 1) / 8);
            let mask = 1u8 << ((bit_number - 1) % 8);

            let direction = if id_bit != cmp_bit {
                id_bit
            } else {
                // Discrepancy: devices disagree on this bit
                let dir = if bit_number < self.last_discrepancy {
                    self.rom[byte] & mask != 0
                } else {
                    bit_number == self.last_discrepancy
                };
                if !dir {
                    last_zero = bit_number;
                }
                dir
            };

            if direction {
                self.rom[byte] |= mask;
            } else {
                self.rom[byte] &= !mask;
            }
            bus.write_bit(direction)?;
        }

        self.last_discrepancy = last_zero;
        if last_zero == 0 {
            self.last_device = true;
        }
        Ok(Some(RomAddress(self.rom)))
    }
}

impl Default for RomSearch {
    fn default() -> Self {
        Self::new()
    }
}

/// Enumerate DS18B20 probes on the bus, up to `N`.
///
/// Devices with a bad ROM CRC or a different family code are skipped.
pub fn discover<B: OneWireBus, const N: usize>(
    bus: &mut B,
) -> Result<Vec<RomAddress, N>, B::Error> {
    let mut found = Vec::new();
    let mut search = RomSearch::new();

    while let Some(rom) = search.next(bus)? {
        if !rom.crc_ok() {
            log::warn!("Skipping one-wire device with bad ROM CRC");
            continue;
        }
        if rom.family() != DS18B20_FAMILY {
            log::debug!("Skipping one-wire device family {:#04x}", rom.family());
            continue;
        }
        if found.push(rom).is_err() {
            log::warn!("More than {} probes on the bus, ignoring the rest", N);
            break;
        }
    }

    Ok(found)
}

/// Ask every probe on the bus to start a temperature conversion.
pub fn start_conversion<B: OneWireBus>(bus: &mut B) -> Result<(), OneWireError<B::Error>> {
    if !bus.reset()? {
        return Err(OneWireError::NoPresence);
    }
    bus.write_byte(SKIP_ROM)?;
    bus.write_byte(CONVERT_T)?;
    Ok(())
}

/// Read the last converted temperature (°C) from one probe.
pub fn read_temperature<B: OneWireBus>(
    bus: &mut B,
    rom: &RomAddress,
) -> Result<f32, OneWireError<B::Error>> {
    if !bus.reset()? {
        return Err(OneWireError::NoPresence);
    }
    bus.write_byte(MATCH_ROM)?;
    for byte in rom.0 {
        bus.write_byte(byte)?;
    }
    bus.write_byte(READ_SCRATCHPAD)?;

    let mut scratchpad = [0u8; 9];
    for b in scratchpad.iter_mut() {
        *b = bus.read_byte()?;
    }
    if crc8(&scratchpad[..8]) != scratchpad[8] {
        return Err(OneWireError::CrcMismatch);
    }

    Ok(decode_temperature(scratchpad[0], scratchpad[1]))
}

/// Convert the scratchpad temperature register (1/16 °C, two's complement).
pub fn decode_temperature(lsb: u8, msb: u8) -> f32 {
    i16::from_le_bytes([lsb, msb]) as f32 / 16.0
}
