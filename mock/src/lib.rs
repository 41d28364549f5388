//! Mock types for testing.

pub mod serial;

use serialport::{Error, ErrorKind, SerialPort};

use serial::TestPort;

/// The signature shared by the functions below and the load bank's port opener.
pub type OpenResult = serialport::Result<Box<dyn SerialPort>>;

/// Returns a port opener that hands out clones of `port`, applying the requested baud rate.
pub fn open_test_port(port: &TestPort) -> impl Fn(&str, u32) -> OpenResult + Send + Sync + 'static {
    let port = port.clone();
    move |_: &str, baud_rate: u32| {
        let mut handle = port.try_clone()?;
        handle.set_baud_rate(baud_rate)?;
        Ok(handle)
    }
}

/// Returns a port opener that always fails as if the port did not exist.
pub fn open_missing_port() -> impl Fn(&str, u32) -> OpenResult + Send + Sync + 'static {
    |path: &str, _: u32| Err(Error::new(ErrorKind::NoDevice, format!("{} does not exist", path)))
}
