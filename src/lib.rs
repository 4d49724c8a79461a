// Copyright 2024, F. Stan
//
// Licensed under the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// This file may not be copied, modified, or distributed
// except according to those terms.

//! CCS811 driver implementing the I2C operations of the
//! CCS811 eCO2 and TVOC air quality sensor
//!
//! Register map taken from the [datasheet](https://www.sciosense.com/wp-content/uploads/documents/SC-001232-DS-2-CCS811B-Datasheet-Revision-2.pdf)
//!
//! On a Raspberry Pi the sensor needs I2C clock stretching, set
//! `dtparam=i2c_arm_baudrate=10000` in `/boot/config.txt`. A warning is
//! logged through the `log` facade the first time a bus is opened without it.
//!
//! ## Basic Example
//!
//! Obtaining eCO2 and TVOC, compensated with the ambient conditions
//!
//!```no_run
//!use ccs811_i2c::Ccs811;
//!use std::thread;
//!use std::time::Duration;
//!
//!fn main() {
//!    // Open /dev/i2c-1, sensor on 0x5B
//!    let mut ccs = Ccs811::new().unwrap();
//!    if let Err(e) = ccs.begin() {
//!        println!("Sensor did not start: {}", e);
//!        return;
//!    }
//!
//!    ccs.set_environmental_data(48.5, 21.0).unwrap();
//!
//!    loop {
//!        if ccs.data_available() {
//!            match ccs.read_algorithm_results() {
//!                Ok(()) => println!("CO2: {} ppm TVOC: {} ppb", ccs.get_co2(), ccs.get_tvoc()),
//!                Err(e) => println!("Error obtaining measurements: {}", e),
//!            }
//!        }
//!        thread::sleep(Duration::from_secs(1));
//!    }
//!}
//!```
//!

/// CCS811 device related operations
pub mod ccs811;
/// Register based bus access, Linux implementation over i2cdev
pub mod transport;

pub use ccs811::{Address, Ccs811, Ccs811Error, Config, DriveMode};
pub use transport::{LinuxTransport, Transport};
