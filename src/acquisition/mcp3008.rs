//! MCP3008 10-bit ADC on the Linux spidev interface.
//!
//! One conversion is a single 3-byte full-duplex transfer:
//!
//! ```text
//! tx: 0x01 | (8 + ch) << 4 | 0x00
//! rx: ---- | ......XX      | XXXXXXXX   -> ((rx[1] & 0x03) << 8) | rx[2]
//! ```

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

use super::{check_channel, AcquisitionError, AnalogChannel, RawSample};

/// `SPI_IOC_MESSAGE(1)`: `_IOW('k', 0, [u8; 32])`.
const SPI_IOC_MESSAGE_1: u64 = 0x4020_6B00;

const START_BIT: u8 = 0x01;
const SINGLE_ENDED: u8 = 0x08;

/// `struct spi_ioc_transfer` from `<linux/spi/spidev.h>`.
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

/// Command frame selecting a single-ended conversion on `channel`.
const fn command(channel: u8) -> [u8; 3] {
    [START_BIT, (SINGLE_ENDED + channel) << 4, 0x00]
}

/// Extract the 10-bit result from a response frame.
fn decode(rx: [u8; 3]) -> RawSample {
    (RawSample::from(rx[1] & 0x03) << 8) | RawSample::from(rx[2])
}

/// Hardware converter behind `/dev/spidevB.D`.
pub struct Mcp3008 {
    device: File,
    speed_hz: u32,
}

impl Mcp3008 {
    /// Open the spidev node. Fails when the device is missing or not accessible.
    pub fn open(path: &Path, speed_hz: u32) -> Result<Self, AcquisitionError> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| AcquisitionError::Open {
                device: path.display().to_string(),
                source,
            })?;
        tracing::info!(device = %path.display(), speed_hz, "Opened MCP3008");
        Ok(Self { device, speed_hz })
    }

    fn transfer(&self, channel: u8, tx: [u8; 3]) -> Result<[u8; 3], AcquisitionError> {
        let mut rx = [0u8; 3];
        let xfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: 3,
            speed_hz: self.speed_hz,
            bits_per_word: 8,
            ..SpiIocTransfer::default()
        };

        // SAFETY: `xfer` points at two live 3-byte buffers for the duration of
        // the call and matches the kernel's spi_ioc_transfer layout.
        let ret = unsafe {
            libc::ioctl(
                self.device.as_raw_fd(),
                SPI_IOC_MESSAGE_1 as _,
                &xfer as *const SpiIocTransfer,
            )
        };
        if ret < 0 {
            return Err(AcquisitionError::Transport {
                channel,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(rx)
    }
}

impl AnalogChannel for Mcp3008 {
    fn read(&self, channel: u8) -> Result<RawSample, AcquisitionError> {
        check_channel(channel)?;
        let rx = self.transfer(channel, command(channel))?;
        Ok(decode(rx))
    }

    fn source_name(&self) -> &str {
        "MCP3008"
    }
}
