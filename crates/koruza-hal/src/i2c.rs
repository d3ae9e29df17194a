//! Linux i2c-dev transport (`/dev/i2c-N`).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use crate::bus::RawBus;

/// `ioctl` request selecting the target address of subsequent transfers.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// A `/dev/i2c-N` character device.
pub struct LinuxI2cBus {
    file: File,
    selected: Option<u8>,
}

impl LinuxI2cBus {
    /// Open bus `id`.
    pub fn open(id: u8) -> io::Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{id}"));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self {
            file,
            selected: None,
        })
    }

    fn select(&mut self, address: u8) -> io::Result<()> {
        if self.selected == Some(address) {
            return Ok(());
        }
        // SAFETY: the descriptor is owned by `self.file` and stays open for
        // the duration of the call; I2C_SLAVE takes the address by value.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            self.selected = None;
            return Err(io::Error::last_os_error());
        }
        self.selected = Some(address);
        Ok(())
    }
}

impl RawBus for LinuxI2cBus {
    fn write_byte(&mut self, address: u8, value: u8) -> io::Result<()> {
        self.select(address)?;
        self.file.write_all(&[value])
    }

    fn read_byte(&mut self, address: u8) -> io::Result<u8> {
        self.select(address)?;
        let mut buf = [0u8; 1];
        self.file.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn write_block(&mut self, address: u8, data: &[u8]) -> io::Result<()> {
        self.select(address)?;
        let written = self.file.write(data)?;
        if written != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {written} of {} bytes", data.len()),
            ));
        }
        Ok(())
    }
}
