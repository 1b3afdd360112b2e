//! [`Bus`] implementation for serial ports, for USB RS485 adapters and
//! UARTs with the transceiver's driver enable wired to RTS.

use std::io::{Read, Write};

use log::trace;
use serialport::{ClearBuffer, SerialPort};

use crate::master::io::Bus;

/// How the transceiver is switched to transmit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriverEnable {
    /// The adapter switches direction by itself.
    Automatic,
    /// RTS high while transmitting.
    Rts,
    /// RTS low while transmitting.
    RtsInverted,
}

/// Drops the echo of our own query from the received bytes.
#[derive(Debug, Default)]
struct EchoFilter {
    pending: usize,
}

impl EchoFilter {
    fn reset(&mut self) {
        self.pending = 0;
    }

    fn sent(&mut self, len: usize) {
        self.pending += len;
    }

    fn accept(&mut self, byte: u8) -> Option<u8> {
        if self.pending > 0 {
            self.pending -= 1;
            trace!("echo {:#04x}", byte);
            None
        } else {
            Some(byte)
        }
    }
}

/// A serial port used as a half-duplex bus.
///
/// Stale input is discarded when a transmission begins, not when the
/// receiver is enabled, so a node answering within the grace period is
/// still heard. Adapters that hear their own transmission need
/// [`SerialBus::with_echo`], which skips exactly the bytes written.
pub struct SerialBus {
    port: Box<dyn SerialPort>,
    driver_enable: DriverEnable,
    receiving: bool,
    echo: Option<EchoFilter>,
}

impl SerialBus {
    pub fn new(port: Box<dyn SerialPort>, driver_enable: DriverEnable) -> Self {
        Self {
            port,
            driver_enable,
            receiving: false,
            echo: None,
        }
    }

    /// Skip the echo of every query, for transceivers whose receiver stays
    /// enabled while transmitting.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = if echo { Some(EchoFilter::default()) } else { None };
        self
    }

    /// Open `path` at the given speed, 8N1.
    /// # Errors
    /// Returns the `serialport` error if the port can't be opened.
    pub fn open(path: &str, baud_rate: u32, driver_enable: DriverEnable) -> serialport::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(std::time::Duration::from_millis(10))
            .open()?;
        Ok(Self::new(port, driver_enable))
    }

    fn set_driver(&mut self, transmit: bool) -> std::io::Result<()> {
        match self.driver_enable {
            DriverEnable::Automatic => Ok(()),
            DriverEnable::Rts => Ok(self.port.write_request_to_send(transmit)?),
            DriverEnable::RtsInverted => Ok(self.port.write_request_to_send(!transmit)?),
        }
    }
}

impl Bus for SerialBus {
    fn begin(&mut self, baud_rate: u32) -> std::io::Result<()> {
        self.port.set_baud_rate(baud_rate)?;
        self.set_driver(false)
    }

    fn begin_transmission(&mut self) -> std::io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        if let Some(echo) = self.echo.as_mut() {
            echo.reset();
        }
        self.set_driver(true)
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.port.write_all(data)?;
        if let Some(echo) = self.echo.as_mut() {
            echo.sent(data.len());
        }
        Ok(())
    }

    fn end_transmission(&mut self) -> std::io::Result<()> {
        // the last byte must be out before the driver is switched off
        self.port.flush()?;
        self.set_driver(false)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }

    fn receive(&mut self) -> std::io::Result<()> {
        self.receiving = true;
        Ok(())
    }

    fn no_receive(&mut self) -> std::io::Result<()> {
        self.receiving = false;
        Ok(())
    }

    fn available(&mut self) -> std::io::Result<bool> {
        Ok(self.receiving && self.port.bytes_to_read()? > 0)
    }

    fn read(&mut self) -> std::io::Result<Option<u8>> {
        if !self.receiving {
            return Ok(None);
        }
        let mut buf = [0];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => {
                let byte = match self.echo.as_mut() {
                    Some(echo) => echo.accept(buf[0]),
                    None => Some(buf[0]),
                };
                if let Some(byte) = byte {
                    trace!("rx {:#04x}", byte);
                }
                Ok(byte)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}
