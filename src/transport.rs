// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

use i2cdev::core::{I2CMessage, I2CTransfer};
use i2cdev::linux::{LinuxI2CBus, LinuxI2CError, LinuxI2CMessage};
use log::{debug, warn};
use std::fs;
use std::path::Path;
use std::sync::Once;

/// Default I2C bus on a Raspberry Pi
pub const DEFAULT_BUS_PATH: &str = "/dev/i2c-1";

/// Highest bus speed (Hz) at which the CCS811 clock stretching is reliable
/// on a Raspberry Pi
const MAX_STRETCH_BAUDRATE: u32 = 10_000;

const BOOT_CONFIG_PATHS: [&str; 2] = ["/boot/config.txt", "/boot/firmware/config.txt"];

static PLATFORM_CHECK: Once = Once::new();

///
/// Register based bus access used by the driver.
/// Every operation is addressed by the 7 bit device address
/// and may fail with the transport error.
///
pub trait Transport {
    /// Error returned when a bus transaction fails
    type Error: std::error::Error;

    /// Checks if a device answers on the given address
    fn probe(&mut self, address: u16) -> bool;

    /// Reads one byte from a register
    fn read_byte(&mut self, address: u16, register: u8) -> Result<u8, Self::Error>;

    /// Writes one byte to a register
    fn write_byte(&mut self, address: u16, register: u8, value: u8) -> Result<(), Self::Error>;

    /// Reads a big endian 16 bit word from a register
    fn read_word(&mut self, address: u16, register: u8) -> Result<u16, Self::Error>;

    /// Writes a big endian 16 bit word to a register
    fn write_word(&mut self, address: u16, register: u8, value: u16) -> Result<(), Self::Error>;

    /// Reads `len` bytes starting at a register
    fn read_block(&mut self, address: u16, register: u8, len: usize)
        -> Result<Vec<u8>, Self::Error>;

    /// Writes a block of bytes to a register
    fn write_block(&mut self, address: u16, register: u8, data: &[u8]) -> Result<(), Self::Error>;

    /// Writes a register index with no payload
    fn write_command(&mut self, address: u16, register: u8) -> Result<(), Self::Error>;
}

/// Linux I2C bus transport, wraps a LinuxI2CBus
/// so one opened adapter serves any device address.
///
pub struct LinuxTransport {
    bus: LinuxI2CBus,
}

impl LinuxTransport {
    /// Opens the I2C adapter at `path`, e.g. `/dev/i2c-1`.
    /// If fails, return an LinuxI2CError from i2cdev
    ///
    pub fn new<P: AsRef<Path>>(path: P) -> Result<LinuxTransport, LinuxI2CError> {
        PLATFORM_CHECK.call_once(check_platform);
        let bus = LinuxI2CBus::new(path)?;
        Ok(LinuxTransport { bus })
    }

    fn write_raw(&mut self, address: u16, data: &[u8]) -> Result<(), LinuxI2CError> {
        let mut msgs = [LinuxI2CMessage::write(data).with_address(address)];
        self.bus.transfer(&mut msgs)?;
        Ok(())
    }

    fn read_into(
        &mut self,
        address: u16,
        register: u8,
        buffer: &mut [u8],
    ) -> Result<(), LinuxI2CError> {
        let pointer = [register];
        let mut msgs = [
            LinuxI2CMessage::write(&pointer).with_address(address),
            LinuxI2CMessage::read(buffer).with_address(address),
        ];
        self.bus.transfer(&mut msgs)?;
        Ok(())
    }
}

impl Transport for LinuxTransport {
    type Error = LinuxI2CError;

    fn probe(&mut self, address: u16) -> bool {
        let mut buffer = [0u8; 1];
        let mut msgs = [LinuxI2CMessage::read(&mut buffer).with_address(address)];
        self.bus.transfer(&mut msgs).is_ok()
    }

    fn read_byte(&mut self, address: u16, register: u8) -> Result<u8, LinuxI2CError> {
        let mut buffer = [0u8; 1];
        self.read_into(address, register, &mut buffer)?;
        Ok(buffer[0])
    }

    fn write_byte(&mut self, address: u16, register: u8, value: u8) -> Result<(), LinuxI2CError> {
        self.write_raw(address, &[register, value])
    }

    fn read_word(&mut self, address: u16, register: u8) -> Result<u16, LinuxI2CError> {
        let mut buffer = [0u8; 2];
        self.read_into(address, register, &mut buffer)?;
        Ok(u16::from_be_bytes(buffer))
    }

    fn write_word(&mut self, address: u16, register: u8, value: u16) -> Result<(), LinuxI2CError> {
        let [msb, lsb] = value.to_be_bytes();
        self.write_raw(address, &[register, msb, lsb])
    }

    fn read_block(
        &mut self,
        address: u16,
        register: u8,
        len: usize,
    ) -> Result<Vec<u8>, LinuxI2CError> {
        let mut buffer = vec![0u8; len];
        self.read_into(address, register, &mut buffer)?;
        Ok(buffer)
    }

    fn write_block(
        &mut self,
        address: u16,
        register: u8,
        data: &[u8],
    ) -> Result<(), LinuxI2CError> {
        let mut buffer = Vec::with_capacity(data.len() + 1);
        buffer.push(register);
        buffer.extend_from_slice(data);
        self.write_raw(address, &buffer)
    }

    fn write_command(&mut self, address: u16, register: u8) -> Result<(), LinuxI2CError> {
        self.write_raw(address, &[register])
    }
}

/// The CCS811 stretches the clock while it prepares data. The Raspberry Pi
/// I2C controller only copes with that at low bus speeds, so warn once per
/// process when the boot config does not slow the bus down.
fn check_platform() {
    let config = BOOT_CONFIG_PATHS
        .iter()
        .find_map(|path| fs::read_to_string(path).ok());
    let Some(config) = config else {
        debug!("No Raspberry Pi boot config found, skipping bus speed check");
        return;
    };
    match i2c_baudrate(&config) {
        Some(rate) if rate <= MAX_STRETCH_BAUDRATE => {
            debug!("I2C baudrate set to {} Hz", rate);
        }
        Some(rate) => warn!(
            "I2C baudrate is {} Hz, CCS811 clock stretching needs dtparam=i2c_arm_baudrate={}",
            rate, MAX_STRETCH_BAUDRATE
        ),
        None => warn!(
            "I2C baudrate not configured, CCS811 clock stretching needs dtparam=i2c_arm_baudrate={}",
            MAX_STRETCH_BAUDRATE
        ),
    }
}

/// Last `i2c_arm_baudrate` value set in a boot config, ignoring comments
fn i2c_baudrate(config: &str) -> Option<u32> {
    config
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter_map(|line| line.strip_prefix("dtparam="))
        .flat_map(|params| params.split(','))
        .filter_map(|param| param.trim().strip_prefix("i2c_arm_baudrate="))
        .filter_map(|value| value.trim().parse().ok())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baudrate_from_boot_config() {
        let config = "dtparam=i2c_arm=on\n# Enable I2C clock stretching\ndtparam=i2c_arm_baudrate=10000\n";
        assert_eq!(i2c_baudrate(config), Some(10_000));
    }

    #[test]
    fn baudrate_in_combined_dtparam() {
        assert_eq!(
            i2c_baudrate("dtparam=i2c_arm=on,i2c_arm_baudrate=400000"),
            Some(400_000)
        );
    }

    #[test]
    fn commented_baudrate_is_ignored() {
        assert_eq!(i2c_baudrate("#dtparam=i2c_arm_baudrate=10000\ndtparam=spi=on"), None);
    }
}
