//! Abstractions for working with the load bank's serial port.

use serialport::{ClearBuffer, Error, ErrorKind, FlowControl, SerialPort};

use std::io::{self, Read, Write};
use std::time::Duration;

/// How long a read waits for data before giving up. Bounds how long the reader takes to notice a
/// shutdown signal.
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// A function for opening serial ports given a path and a baud rate.
pub type OpenPortFn =
    Box<dyn Fn(&str, u32) -> serialport::Result<Box<dyn SerialPort>> + Send + Sync>;

/// A wrapper around an open serial port that checks whether the device on the other end is still
/// there before every access.
pub struct Port {
    /// The internal serial port.
    port: Box<dyn SerialPort>,
    /// Whether the device reported that it is ready the last time the port was checked.
    device_ready: bool,
}

impl Port {
    /// Opens the serial port at `path` by calling `open`. Returns `Err` if this fails or if the
    /// port opened but the device is not ready.
    pub fn open(path: &str, baud_rate: u32, open: &OpenPortFn) -> serialport::Result<Self> {
        let mut port = Port {
            port: open(path, baud_rate)?,
            device_ready: false,
        };

        port.update_port_state()?;

        if port.device_ready {
            Ok(port)
        } else {
            Err(Error::new(
                ErrorKind::NoDevice,
                "The serial port is open but the device is not ready",
            ))
        }
    }

    /// Returns a second handle to the same serial port, for use on another thread.
    pub fn try_clone(&self) -> serialport::Result<Self> {
        Ok(Port {
            port: self.port.try_clone()?,
            device_ready: self.device_ready,
        })
    }

    /// Returns whether the device was ready the last time the port was accessed.
    #[cfg(test)]
    pub(crate) fn is_device_ready(&self) -> bool {
        self.device_ready
    }

    /// Updates the device ready flag. Returns `Err` if the port can no longer be accessed at all.
    fn update_port_state(&mut self) -> serialport::Result<()> {
        match is_device_ready(self.port.as_mut()) {
            Ok(ready) => {
                self.device_ready = ready;
                Ok(())
            }
            Err(e) => {
                self.device_ready = false;
                Err(e)
            }
        }
    }

    /// Calls `f` on the internal serial port if the device is ready, or returns `Err` otherwise.
    fn map_port<F, G>(&mut self, f: F) -> io::Result<G>
    where
        F: FnOnce(&mut dyn SerialPort) -> io::Result<G>
    {
        self.update_port_state()?;

        if self.device_ready {
            f(self.port.as_mut())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "device is not ready"))
        }
    }
}

impl Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.map_port(|p| p.read(buf))
    }
}

impl Write for Port {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.map_port(|p| p.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.map_port(|p| p.flush())
    }
}

/// Opens the system serial port at `path`.
pub fn open_serial_port(path: &str, baud_rate: u32) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(path, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()
        .and_then(|p| {
            // Drop anything the device sent before we were listening
            p.clear(ClearBuffer::All).map(|_| p)
        })
}

/// Returns whether the device on the serial port is ready, or `Err` if the port could not be
/// accessed.
fn is_device_ready<P: SerialPort + ?Sized>(port: &mut P) -> serialport::Result<bool> {
    match port.flow_control()? {
        // Without flow control there is no ready signal, but the port must still be accessed in
        // some way to detect errors
        FlowControl::None => port.bytes_to_read().map(|_| true),
        FlowControl::Hardware | FlowControl::Software => port.read_clear_to_send(),
    }
}

#[cfg(test)]
mod tests {
    use mock::serial::TestPort;

    use super::*;

    const FAKE_PORT: &str = "fakeport";

    fn test_opener(test_port: &TestPort) -> OpenPortFn {
        Box::new(mock::open_test_port(test_port))
    }

    #[test]
    fn test_open() {
        let test_port = TestPort::new().unwrap();
        let port = Port::open(FAKE_PORT, 57_600, &test_opener(&test_port)).unwrap();

        assert!(port.is_device_ready());
        // The requested baud rate is applied
        assert_eq!(57_600, test_port.baud_rate().unwrap());
    }

    #[test]
    fn test_open_missing() {
        let open: OpenPortFn = Box::new(mock::open_missing_port());
        let error = Port::open(FAKE_PORT, 57_600, &open).err().unwrap();

        assert_eq!(ErrorKind::NoDevice, error.kind());
    }

    #[test]
    fn test_open_device_not_ready() {
        let test_port = TestPort::new().unwrap();
        test_port.set_cts(false);

        assert!(Port::open(FAKE_PORT, 57_600, &test_opener(&test_port)).is_err());
    }

    #[test]
    fn test_io() {
        let test_port = TestPort::new().unwrap();
        let mut port = Port::open(FAKE_PORT, 57_600, &test_opener(&test_port)).unwrap();

        port.write_all(b"toggle 1\n").unwrap();
        let mut buf = [0; 16];
        assert_eq!(9, port.read(&mut buf).unwrap());

        // Make the device not ready
        test_port.set_cts(false);

        assert_eq!(io::ErrorKind::NotConnected, port.write(&[1]).unwrap_err().kind());
        assert_eq!(io::ErrorKind::NotConnected, port.read(&mut buf).unwrap_err().kind());
        assert!(!port.is_device_ready());

        // The device is ready again
        test_port.set_cts(true);

        assert!(port.write(&[1]).is_ok());
        assert!(port.is_device_ready());

        // Disconnect the device by causing an error
        test_port.set_has_error(true);

        assert!(port.write(&[1]).is_err());
        assert!(port.read(&mut buf).is_err());
        assert!(!port.is_device_ready());
    }

    #[test]
    fn test_try_clone() {
        let test_port = TestPort::new().unwrap();
        test_port.set_echo(false);
        let mut writer = Port::open(FAKE_PORT, 57_600, &test_opener(&test_port)).unwrap();
        let mut reader = writer.try_clone().unwrap();

        writer.write_all(b"toggle 3\n").unwrap();
        test_port.push_incoming(b"ok\n");

        let mut buf = [0; 8];
        assert_eq!(3, reader.read(&mut buf).unwrap());
        assert_eq!(b"ok\n", &buf[..3]);
        assert_eq!(b"toggle 3\n".to_vec(), test_port.written());
    }
}
