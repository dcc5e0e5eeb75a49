//! Linux hardware backend: MCP3008 ADC over spidev and a sysfs GPIO output.
//!
//! The piezo sensor is read through a 10-bit MCP3008 on the SPI bus, the
//! actuator (MOSFET, coil or piezo driver) hangs off a single GPIO pin.

use crate::config::HardwareConfig;
use crate::error::HardwareError;
use crate::hardware::HardwareIo;
use std::time::Duration;

/// Highest single-ended MCP3008 channel.
pub const MCP3008_MAX_CHANNEL: u8 = 7;

/// Build the 3-byte MCP3008 request frame for a single-ended read.
///
/// Start bit, then single-ended flag and channel in the upper nibble of the
/// second byte, then a dummy byte clocking out the low result bits.
pub fn mcp3008_request(channel: u8) -> Result<[u8; 3], HardwareError> {
    if channel > MCP3008_MAX_CHANNEL {
        return Err(HardwareError::ChannelOutOfRange(channel));
    }
    Ok([0x01, (0x08 + channel) << 4, 0x00])
}

/// Extract the 10-bit conversion result from an MCP3008 response frame.
pub fn mcp3008_decode(rx: &[u8; 3]) -> u16 {
    (((rx[1] & 0x03) as u16) << 8) | rx[2] as u16
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};

    /// `_IOW('k', 0, char[32])`: one `spi_ioc_transfer`.
    const SPI_IOC_MESSAGE_1: u32 = 0x4020_6b00;
    /// `_IOW('k', 4, __u32)`.
    const SPI_IOC_WR_MAX_SPEED_HZ: u32 = 0x4004_6b04;

    const GPIO_ROOT: &str = "/sys/class/gpio";

    /// C-compatible `struct spi_ioc_transfer` from `linux/spi/spidev.h`.
    #[repr(C)]
    #[derive(Debug, Default)]
    struct SpiIocTransfer {
        tx_buf: u64,
        rx_buf: u64,
        len: u32,
        speed_hz: u32,
        delay_usecs: u16,
        bits_per_word: u8,
        cs_change: u8,
        tx_nbits: u8,
        rx_nbits: u8,
        word_delay_usecs: u8,
        pad: u8,
    }

    /// Output pin exported through the sysfs GPIO interface.
    struct SysfsPin {
        pin: u32,
        value_path: PathBuf,
    }

    impl SysfsPin {
        fn export(pin: u32) -> Result<Self, HardwareError> {
            let root = Path::new(GPIO_ROOT);
            let pin_dir = root.join(format!("gpio{}", pin));

            if !pin_dir.exists() {
                write_sysfs(&root.join("export"), &pin.to_string())?;
            }
            write_sysfs(&pin_dir.join("direction"), "out")?;

            let pin = Self {
                pin,
                value_path: pin_dir.join("value"),
            };
            pin.set(false)?;
            Ok(pin)
        }

        fn set(&self, high: bool) -> Result<(), HardwareError> {
            write_sysfs(&self.value_path, if high { "1" } else { "0" })
        }
    }

    impl Drop for SysfsPin {
        fn drop(&mut self) {
            // Leave the actuator deasserted, then release the pin
            let _ = self.set(false);
            let _ = std::fs::write(Path::new(GPIO_ROOT).join("unexport"), self.pin.to_string());
        }
    }

    fn write_sysfs(path: &Path, value: &str) -> Result<(), HardwareError> {
        std::fs::write(path, value).map_err(|source| HardwareError::GpioFailed {
            path: path.display().to_string(),
            source,
        })
    }

    /// MCP3008 sensor plus GPIO actuator.
    pub struct LinuxHardware {
        spi: File,
        speed_hz: u32,
        channel: u8,
        output: SysfsPin,
        asserted: bool,
    }

    impl LinuxHardware {
        /// Open the SPI device and export the output pin.
        pub fn open(config: &HardwareConfig) -> Result<Self, HardwareError> {
            // Validate the channel before touching any device
            mcp3008_request(config.adc_channel)?;

            let spi = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&config.spi_device)
                .map_err(|source| HardwareError::OpenFailed {
                    path: config.spi_device.display().to_string(),
                    source,
                })?;

            let speed = config.spi_speed_hz;
            let rc = unsafe {
                libc::ioctl(
                    spi.as_raw_fd(),
                    SPI_IOC_WR_MAX_SPEED_HZ as _,
                    &speed as *const u32,
                )
            };
            if rc < 0 {
                return Err(HardwareError::TransferFailed(std::io::Error::last_os_error()));
            }

            let output = SysfsPin::export(config.output_pin)?;

            tracing::info!(
                "Opened {:?} at {} Hz (channel {}), output on GPIO {}",
                config.spi_device,
                speed,
                config.adc_channel,
                config.output_pin
            );

            Ok(Self {
                spi,
                speed_hz: speed,
                channel: config.adc_channel,
                output,
                asserted: false,
            })
        }

        fn transfer(&self, tx: &[u8; 3]) -> Result<[u8; 3], HardwareError> {
            let mut rx = [0u8; 3];
            let mut xfer = SpiIocTransfer {
                tx_buf: tx.as_ptr() as u64,
                rx_buf: rx.as_mut_ptr() as u64,
                len: tx.len() as u32,
                speed_hz: self.speed_hz,
                bits_per_word: 8,
                ..SpiIocTransfer::default()
            };

            // Safety: tx and rx outlive the ioctl and are both `len` bytes long
            let rc = unsafe {
                libc::ioctl(
                    self.spi.as_raw_fd(),
                    SPI_IOC_MESSAGE_1 as _,
                    &mut xfer as *mut SpiIocTransfer,
                )
            };
            if rc < 0 {
                return Err(HardwareError::TransferFailed(std::io::Error::last_os_error()));
            }
            Ok(rx)
        }
    }

    impl HardwareIo for LinuxHardware {
        async fn read_sample(&mut self) -> Result<f64, HardwareError> {
            let request = mcp3008_request(self.channel)?;
            let response = self.transfer(&request)?;
            Ok(mcp3008_decode(&response) as f64)
        }

        async fn actuate(&mut self, duration: Duration) -> Result<(), HardwareError> {
            if self.asserted {
                return Err(HardwareError::AlreadyAsserted);
            }
            self.asserted = true;
            self.output.set(true)?;
            tokio::time::sleep(duration).await;
            self.output.set(false)?;
            self.asserted = false;
            Ok(())
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::LinuxHardware;

/// Stub implementation for platforms without spidev/sysfs GPIO.
#[cfg(not(target_os = "linux"))]
pub struct LinuxHardware {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl LinuxHardware {
    /// Stub: Returns NotAvailable on non-Linux platforms.
    pub fn open(_config: &HardwareConfig) -> Result<Self, HardwareError> {
        Err(HardwareError::NotAvailable)
    }
}

#[cfg(not(target_os = "linux"))]
impl HardwareIo for LinuxHardware {
    async fn read_sample(&mut self) -> Result<f64, HardwareError> {
        Err(HardwareError::NotAvailable)
    }

    async fn actuate(&mut self, _duration: Duration) -> Result<(), HardwareError> {
        Err(HardwareError::NotAvailable)
    }
}
