/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and bus addresses
/// selected at compile time via feature flags.

#[cfg(feature = "board-devkit")]
mod hw {
    pub const MQ2_PIN: u8 = 36; // ADC1_CH0, smoke/combustible gas
    pub const MQ7_PIN: u8 = 39; // ADC1_CH3, carbon monoxide
    pub const ONE_WIRE_PIN: u8 = 4; // DS18B20 probes, 4.7k pull-up
    pub const I2C_SDA_PIN: u8 = 21;
    pub const I2C_SCL_PIN: u8 = 22;
    pub const RS485_DE_PIN: u8 = 32;
    pub const RS485_RE_PIN: u8 = 33;
    pub const RS485_RX_PIN: u8 = 16;
    pub const RS485_TX_PIN: u8 = 17;
    pub const BOARD_NAME: &str = "esp32_devkit";
}

#[cfg(not(feature = "board-devkit"))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// BME280 I2C address (SDO tied low)
pub const BME280_ADDR: u8 = 0x76;

/// Flash offset of the identity slot (start of the NVS partition)
pub const IDENTITY_FLASH_OFFSET: u32 = 0x9000;
