// Direction control for the shared wheel controller line
//
// Enabling the transmitter disables the receiver and vice versa. Bytes are lost
// if the direction flips before the transmitter has drained.

use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

/// Platform capability needed by the controller protocol
pub trait HalfDuplex {
    fn enable_transmit(&mut self) -> io::Result<()>;

    fn enable_receive(&mut self) -> io::Result<()>;

    /// Queue bytes for transmission; only valid while transmitting
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Block until the last queued byte has left the wire
    fn wait_transmit_complete(&mut self) -> io::Result<()>;

    /// Read one byte, giving up at `deadline`
    fn read_byte_or_timeout(&mut self, deadline: Instant) -> io::Result<Option<u8>>;

    /// Drop stale bytes left over from an earlier exchange
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// RS-485 style adapter: RTS drives the transceiver's driver-enable line
pub struct SerialHalfDuplex {
    port: Box<dyn SerialPort>,
}

impl SerialHalfDuplex {
    pub fn open(port_name: &str, baudrate: u32) -> serialport::Result<Self> {
        let mut port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(1))
            .open()?;
        port.write_request_to_send(false)?;
        debug!("Opened half-duplex port {} at {} baud", port_name, baudrate);
        Ok(Self { port })
    }
}

impl HalfDuplex for SerialHalfDuplex {
    fn enable_transmit(&mut self) -> io::Result<()> {
        self.port.write_request_to_send(true)?;
        Ok(())
    }

    fn enable_receive(&mut self) -> io::Result<()> {
        self.port.write_request_to_send(false)?;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn wait_transmit_complete(&mut self) -> io::Result<()> {
        // tcdrain on unix
        self.port.flush()
    }

    fn read_byte_or_timeout(&mut self, deadline: Instant) -> io::Result<Option<u8>> {
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        self.port.set_timeout(deadline - now)?;

        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
