// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

use crate::transport::{LinuxTransport, Transport, DEFAULT_BUS_PATH};
use i2cdev::linux::LinuxI2CError;
use log::{debug, warn};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::{thread, time};

// Register map
const STATUS: u8 = 0x00;
const MEAS_MODE: u8 = 0x01;
const ALG_RESULT_DATA: u8 = 0x02;
const RAW_DATA: u8 = 0x03;
const ENV_DATA: u8 = 0x05;
const NTC: u8 = 0x06;
const BASELINE: u8 = 0x11;
const HW_ID: u8 = 0x20;
const HW_VERSION: u8 = 0x21;
const FW_BOOT_VERSION: u8 = 0x23;
const FW_APP_VERSION: u8 = 0x24;
const ERROR_ID: u8 = 0xE0;
const APP_START: u8 = 0xF4;
const SW_RESET: u8 = 0xFF;

const RESET_KEY: [u8; 4] = [0x11, 0xE5, 0x72, 0x8A];
const VALID_CHIP_IDS: [u8; 1] = [0x81];

// STATUS bits
const STATUS_ERROR: u8 = 1 << 0;
const STATUS_DATA_READY: u8 = 1 << 3;
const STATUS_APP_VALID: u8 = 1 << 4;

// MEAS_MODE bits
const INTERRUPT_BIT: u8 = 1 << 3;
const DRIVE_MODE_SHIFT: u8 = 4;
const DRIVE_MODE_MASK: u8 = 0b0000_0111 << DRIVE_MODE_SHIFT;

/// Returned by `get_error_register` when the bus read fails,
/// every error bit set.
pub const ERROR_REGISTER_COMM_FAILURE: u8 = 0xFF;

/// Default reference resistor of the NTC divider, in ohms
pub const DEFAULT_REFERENCE_RESISTANCE: f64 = 10000.0;

/// Wait for the sensor to come up before the reset
pub const POWER_UP_DELAY: time::Duration = time::Duration::from_millis(100);

/// Wait between the software reset and the ID check. Some boards need
/// up to 500 ms here, raise it through `Config::reset_delay` if `begin`
/// reports an ID error of 0xFF.
pub const RESET_DELAY: time::Duration = time::Duration::from_millis(200);

///
/// CCS811 error enum. Communication wraps the error
/// of the bus transport, the rest are raised by the
/// driver itself.
///
#[derive(Debug)]
pub enum Ccs811Error<E> {
    /// Bus transaction failed
    Communication(E),
    /// Hardware ID register did not hold a known CCS811 ID
    InvalidId(u8),
    /// Status reports an error or no valid application firmware
    Internal,
    /// Humidity or temperature outside the accepted range
    InvalidInput,
    /// Thermistor reading cannot be converted to a temperature
    Domain,
    /// Address is not one of the CCS811 addresses
    InvalidAddress(u16),
    /// Block read returned fewer bytes than the register holds
    ShortRead(usize),
}

impl<E> From<E> for Ccs811Error<E> {
    fn from(e: E) -> Self {
        Ccs811Error::Communication(e)
    }
}

impl<E: fmt::Display> fmt::Display for Ccs811Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Ccs811Error::Communication(ref e) => {
                write!(f, "Communication error with device: {}", e)
            }
            Ccs811Error::InvalidId(id) => write!(f, "Invalid Chip ID: 0x{:02X}", id),
            Ccs811Error::Internal => fmt::Display::fmt("Sensor internal error", f),
            Ccs811Error::InvalidInput => fmt::Display::fmt("Environmental data out of range", f),
            Ccs811Error::Domain => fmt::Display::fmt("NTC resistance out of conversion domain", f),
            Ccs811Error::InvalidAddress(address) => {
                write!(f, "0x{:02X} is not a CCS811 address", address)
            }
            Ccs811Error::ShortRead(len) => write!(f, "Short read, got {} bytes", len),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> Error for Ccs811Error<E> {}

/// I2C address of the sensor, selected with the ADDR pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Address {
    /// ADDR high
    #[default]
    Primary = 0x5B,
    /// ADDR low
    Secondary = 0x5A,
}

impl Address {
    /// All addresses, the first one is the default
    pub const ALL: [Address; 2] = [Address::Primary, Address::Secondary];

    /// Raw 7 bit address
    pub fn raw(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Address {
    type Error = u16;

    fn try_from(address: u16) -> Result<Self, Self::Error> {
        Address::ALL
            .into_iter()
            .find(|a| a.raw() == address)
            .ok_or(address)
    }
}

/// Sampling period of the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriveMode {
    /// Measurements disabled
    Idle = 0,
    /// Every second
    Sec1 = 1,
    /// Every 10 seconds
    Sec10 = 2,
    /// Every 60 seconds
    Sec60 = 3,
    /// Raw data only, every 250 ms
    Raw = 4,
}

/// Anything above 4 is clamped to `DriveMode::Raw`
impl From<u8> for DriveMode {
    fn from(mode: u8) -> Self {
        match mode {
            0 => DriveMode::Idle,
            1 => DriveMode::Sec1,
            2 => DriveMode::Sec10,
            3 => DriveMode::Sec60,
            _ => DriveMode::Raw,
        }
    }
}

/// Firmware version as major.minor.trivial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub trivial: u8,
}

impl From<u16> for FirmwareVersion {
    fn from(word: u16) -> Self {
        let [high, low] = word.to_be_bytes();
        FirmwareVersion {
            major: high >> 4,
            minor: high & 0x0F,
            trivial: low,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.trivial)
    }
}

/// Sensor current and ADC reading of the RAW_DATA register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawData {
    /// Current through the sensor, 0 to 63 uA
    pub current_ua: u8,
    /// Voltage across the sensor, 1023 = 1.65 V
    pub adc: u16,
}

/// Content of the ERROR_ID register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFlags(pub u8);

impl ErrorFlags {
    /// Write to an invalid register
    pub fn write_reg_invalid(&self) -> bool {
        self.0 & 1 << 0 != 0
    }

    /// Read from an invalid register
    pub fn read_reg_invalid(&self) -> bool {
        self.0 & 1 << 1 != 0
    }

    /// Unsupported drive mode written to MEAS_MODE
    pub fn meas_mode_invalid(&self) -> bool {
        self.0 & 1 << 2 != 0
    }

    /// Sensor resistance reached the top of its range
    pub fn max_resistance(&self) -> bool {
        self.0 & 1 << 3 != 0
    }

    /// Heater current out of range
    pub fn heater_fault(&self) -> bool {
        self.0 & 1 << 4 != 0
    }

    /// Heater voltage not applied correctly
    pub fn heater_supply(&self) -> bool {
        self.0 & 1 << 5 != 0
    }

    /// No error bit set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Driver settings, `Config::default()` matches the SparkFun breakout
#[derive(Debug, Clone)]
pub struct Config {
    /// I2C adapter, used by `Ccs811::from_config`
    pub bus_path: PathBuf,
    pub address: Address,
    /// NTC divider reference resistor, in ohms
    pub reference_resistance: f64,
    pub power_up_delay: time::Duration,
    pub reset_delay: time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bus_path: PathBuf::from(DEFAULT_BUS_PATH),
            address: Address::Primary,
            reference_resistance: DEFAULT_REFERENCE_RESISTANCE,
            power_up_delay: POWER_UP_DELAY,
            reset_delay: RESET_DELAY,
        }
    }
}

/// CCS811 Struct, wraps a bus transport
/// and caches the last readings.
///
pub struct Ccs811<T: Transport> {
    transport: T,
    address: Address,
    reference_resistance: f64,
    power_up_delay: time::Duration,
    reset_delay: time::Duration,
    co2: u16,
    tvoc: u16,
    vref_counts: u16,
    ntc_counts: u16,
    resistance: f64,
    temperature: f64,
}

impl Ccs811<LinuxTransport> {
    /// Create a new CCS811 Struct
    ///
    /// Opens /dev/i2c-1 and talks to the default address 0x5B.
    /// If fails, return an LinuxI2CError from i2cdev
    ///
    pub fn new() -> Result<Self, LinuxI2CError> {
        Self::from_config(Config::default())
    }

    /// Opens the bus named in the config
    pub fn from_config(config: Config) -> Result<Self, LinuxI2CError> {
        let transport = LinuxTransport::new(&config.bus_path)?;
        Ok(Self::with_config(transport, config))
    }
}

impl<T: Transport> Ccs811<T> {
    /// Wraps an already opened transport. `address` must be 0x5B or 0x5A,
    /// `None` selects 0x5B.
    ///
    pub fn with_transport(
        transport: T,
        address: Option<u16>,
    ) -> Result<Self, Ccs811Error<T::Error>> {
        let address = match address {
            Some(raw) => Address::try_from(raw).map_err(Ccs811Error::InvalidAddress)?,
            None => Address::default(),
        };
        let config = Config {
            address,
            ..Config::default()
        };
        Ok(Self::with_config(transport, config))
    }

    /// Wraps an already opened transport with the given settings,
    /// `bus_path` is not used.
    pub fn with_config(transport: T, config: Config) -> Self {
        Ccs811 {
            transport,
            address: config.address,
            reference_resistance: config.reference_resistance,
            power_up_delay: config.power_up_delay,
            reset_delay: config.reset_delay,
            co2: 0,
            tvoc: 0,
            vref_counts: 0,
            ntc_counts: 0,
            resistance: 0.0,
            temperature: 0.0,
        }
    }

    /// Gives the transport back
    pub fn release(self) -> T {
        self.transport
    }

    /// Address the driver talks to
    pub fn address(&self) -> Address {
        self.address
    }

    /// Checks if something answers on the sensor address.
    /// Does not check it is a CCS811.
    pub fn is_connected(&mut self) -> bool {
        self.transport.probe(self.address.raw())
    }

    /// Resets the sensor, checks it is a CCS811 with valid firmware,
    /// starts the application and sets a 1 second drive mode.
    /// No retries, call again if it fails.
    ///
    pub fn begin(&mut self) -> Result<(), Ccs811Error<T::Error>> {
        thread::sleep(self.power_up_delay);

        // A sensor in a bad state reads 0xFF as its ID until it is reset
        self.transport
            .write_block(self.address.raw(), SW_RESET, &RESET_KEY)?;
        debug!("CCS811 at 0x{:02X} reset", self.address.raw());

        thread::sleep(self.reset_delay);

        let chip_id = self.transport.read_byte(self.address.raw(), HW_ID)?;
        if !VALID_CHIP_IDS.contains(&chip_id) {
            warn!("Invalid Chip ID: 0x{:02X}", chip_id);
            return Err(Ccs811Error::InvalidId(chip_id));
        }

        if self.check_for_status_error()? || !self.app_valid() {
            // ERROR_ID clears on read, leave it for the caller
            warn!("CCS811 internal error");
            return Err(Ccs811Error::Internal);
        }

        self.transport.write_command(self.address.raw(), APP_START)?;
        debug!("CCS811 application started");

        self.set_drive_mode(DriveMode::Sec1)
    }

    /// Reads eCO2 and TVOC and keeps them for `get_co2` and `get_tvoc`
    pub fn read_algorithm_results(&mut self) -> Result<(), Ccs811Error<T::Error>> {
        let data = self.read_array::<4>(ALG_RESULT_DATA)?;
        self.co2 = u16::from_be_bytes([data[0], data[1]]);
        self.tvoc = u16::from_be_bytes([data[2], data[3]]);
        Ok(())
    }

    /// True if the error bit of the status register is set
    pub fn check_for_status_error(&mut self) -> Result<bool, Ccs811Error<T::Error>> {
        let status = self.transport.read_byte(self.address.raw(), STATUS)?;
        Ok(status & STATUS_ERROR != 0)
    }

    /// True if a new sample is ready. A failed read counts as not ready.
    pub fn data_available(&mut self) -> bool {
        self.read_status_or_clear() & STATUS_DATA_READY != 0
    }

    /// True if valid application firmware is loaded. A failed read counts as invalid.
    pub fn app_valid(&mut self) -> bool {
        self.read_status_or_clear() & STATUS_APP_VALID != 0
    }

    /// Raw ERROR_ID register, or `0xFF` if the read fails
    pub fn get_error_register(&mut self) -> u8 {
        self.read_byte_or(ERROR_ID, ERROR_REGISTER_COMM_FAILURE)
    }

    /// `get_error_register` decoded, all flags set if the read fails
    pub fn error_flags(&mut self) -> ErrorFlags {
        ErrorFlags(self.get_error_register())
    }

    /// Baseline for "clean" air, record it with the sensor in clean air.
    /// Returns 0 if the read fails.
    pub fn get_baseline(&mut self) -> u16 {
        match self.transport.read_word(self.address.raw(), BASELINE) {
            Ok(baseline) => baseline,
            Err(e) => {
                warn!("Baseline read failed: {}", e);
                0
            }
        }
    }

    /// Restores a baseline recorded with `get_baseline`
    pub fn set_baseline(&mut self, baseline: u16) -> Result<(), Ccs811Error<T::Error>> {
        self.transport
            .write_word(self.address.raw(), BASELINE, baseline)?;
        Ok(())
    }

    /// Enables the nINT signal on new data
    pub fn enable_interrupts(&mut self) -> Result<(), Ccs811Error<T::Error>> {
        self.update_meas_mode(|mode| mode | INTERRUPT_BIT)
    }

    /// Disables the nINT signal
    pub fn disable_interrupts(&mut self) -> Result<(), Ccs811Error<T::Error>> {
        self.update_meas_mode(|mode| mode & !INTERRUPT_BIT)
    }

    /// Sets the sampling period, other MEAS_MODE bits are kept
    pub fn set_drive_mode(&mut self, mode: DriveMode) -> Result<(), Ccs811Error<T::Error>> {
        debug!("CCS811 drive mode {:?}", mode);
        self.update_meas_mode(|value| {
            (value & !DRIVE_MODE_MASK) | ((mode as u8) << DRIVE_MODE_SHIFT)
        })
    }

    /// Current sampling period
    pub fn drive_mode(&mut self) -> Result<DriveMode, Ccs811Error<T::Error>> {
        let value = self.transport.read_byte(self.address.raw(), MEAS_MODE)?;
        Ok(DriveMode::from((value & DRIVE_MODE_MASK) >> DRIVE_MODE_SHIFT))
    }

    /// Sends ambient humidity (%) and temperature (Celsius) to the sensor
    /// for compensation. Accepts 0..=100 % and -25..=50 C, anything else is
    /// `InvalidInput` and nothing is written.
    ///
    pub fn set_environmental_data(
        &mut self,
        relative_humidity: f64,
        temperature: f64,
    ) -> Result<(), Ccs811Error<T::Error>> {
        let data = encode_environmental_data(relative_humidity, temperature)
            .ok_or(Ccs811Error::InvalidInput)?;
        debug!(
            "CCS811 compensation {} %RH {} C as {:?}",
            relative_humidity, temperature, data
        );
        self.transport
            .write_block(self.address.raw(), ENV_DATA, &data)?;
        Ok(())
    }

    /// Sets the NTC divider reference resistor, in ohms
    pub fn set_ref_resistance(&mut self, ohms: f64) {
        self.reference_resistance = ohms;
    }

    /// NTC divider reference resistor, in ohms
    pub fn get_ref_resistance(&self) -> f64 {
        self.reference_resistance
    }

    /// Reads the thermistor divider and converts it to a temperature.
    /// Fails with `Domain` if either count is zero, in that case the
    /// previous temperature is kept.
    ///
    pub fn read_ntc(&mut self) -> Result<(), Ccs811Error<T::Error>> {
        let data = self.read_array::<4>(NTC)?;
        self.vref_counts = u16::from_be_bytes([data[0], data[1]]);
        self.ntc_counts = u16::from_be_bytes([data[2], data[3]]);

        if self.vref_counts == 0 {
            warn!("NTC reference counts are zero");
            return Err(Ccs811Error::Domain);
        }
        self.resistance =
            f64::from(self.ntc_counts) * self.reference_resistance / f64::from(self.vref_counts);
        self.temperature = ntc_temperature(self.resistance).ok_or(Ccs811Error::Domain)?;
        Ok(())
    }

    /// Raw current and voltage of the sensing element
    pub fn read_raw_data(&mut self) -> Result<RawData, Ccs811Error<T::Error>> {
        let word = self.transport.read_word(self.address.raw(), RAW_DATA)?;
        Ok(RawData {
            current_ua: (word >> 10) as u8,
            adc: word & 0x03FF,
        })
    }

    /// HW_VERSION register, 0x1X for the CCS811
    pub fn hardware_version(&mut self) -> Result<u8, Ccs811Error<T::Error>> {
        Ok(self.transport.read_byte(self.address.raw(), HW_VERSION)?)
    }

    /// Version of the boot loader
    pub fn firmware_boot_version(&mut self) -> Result<FirmwareVersion, Ccs811Error<T::Error>> {
        let word = self.transport.read_word(self.address.raw(), FW_BOOT_VERSION)?;
        Ok(FirmwareVersion::from(word))
    }

    /// Version of the application firmware
    pub fn firmware_app_version(&mut self) -> Result<FirmwareVersion, Ccs811Error<T::Error>> {
        let word = self.transport.read_word(self.address.raw(), FW_APP_VERSION)?;
        Ok(FirmwareVersion::from(word))
    }

    /// Total volatile organic compounds (ppb) of the last `read_algorithm_results`
    pub fn get_tvoc(&self) -> u16 {
        self.tvoc
    }

    /// eCO2 (ppm) of the last `read_algorithm_results`
    pub fn get_co2(&self) -> u16 {
        self.co2
    }

    /// NTC resistance (ohms) of the last `read_ntc`
    pub fn get_resistance(&self) -> f64 {
        self.resistance
    }

    /// NTC temperature (Celsius) of the last successful `read_ntc`
    pub fn get_temperature(&self) -> f64 {
        self.temperature
    }

    /// Reference voltage counts of the last `read_ntc`
    pub fn vref_counts(&self) -> u16 {
        self.vref_counts
    }

    /// NTC voltage counts of the last `read_ntc`
    pub fn ntc_counts(&self) -> u16 {
        self.ntc_counts
    }

    fn read_status_or_clear(&mut self) -> u8 {
        self.read_byte_or(STATUS, 0)
    }

    fn read_byte_or(&mut self, register: u8, fallback: u8) -> u8 {
        match self.transport.read_byte(self.address.raw(), register) {
            Ok(value) => value,
            Err(e) => {
                warn!("Read of register 0x{:02X} failed: {}", register, e);
                fallback
            }
        }
    }

    fn read_array<const N: usize>(
        &mut self,
        register: u8,
    ) -> Result<[u8; N], Ccs811Error<T::Error>> {
        let data = self.transport.read_block(self.address.raw(), register, N)?;
        data.as_slice()
            .try_into()
            .map_err(|_| Ccs811Error::ShortRead(data.len()))
    }

    fn update_meas_mode<F>(&mut self, update: F) -> Result<(), Ccs811Error<T::Error>>
    where
        F: FnOnce(u8) -> u8,
    {
        let value = self.transport.read_byte(self.address.raw(), MEAS_MODE)?;
        self.transport
            .write_byte(self.address.raw(), MEAS_MODE, update(value))?;
        Ok(())
    }
}

/// ENV_DATA payload: humidity and temperature (offset by 25 C), both in
/// 0.5 steps in the upper byte, the fraction byte is always zero.
/// `None` if out of range.
fn encode_environmental_data(relative_humidity: f64, temperature: f64) -> Option<[u8; 4]> {
    if !(-25.0..=50.0).contains(&temperature) || !(0.0..=100.0).contains(&relative_humidity) {
        return None;
    }
    // Both are non-negative here, integer division floors
    let rh = (relative_humidity * 1000.0).round() as u32;
    let temp = (temperature * 1000.0).round() as i32 + 25000;
    let temp = temp as u32;
    Some([((rh + 250) / 500) as u8, 0, ((temp + 250) / 500) as u8, 0])
}

/// Steinhart-Hart conversion of a thermistor resistance to Celsius,
/// `None` for a zero or NaN resistance.
fn ntc_temperature(resistance: f64) -> Option<f64> {
    if !(resistance > 0.0) {
        return None;
    }
    let x = resistance.ln();
    let kelvin = 1.0 / (0.001129148 + 0.000234125 * x + 0.0000000876741 * x * x * x);
    Some(kelvin - 273.15)
}
