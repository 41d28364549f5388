//! A mock serial port implementation.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

/// How long a read waits before timing out when there is nothing to read.
const IDLE_READ_DELAY: Duration = Duration::from_millis(1);

/// An in-memory serial port standing in for the load bank's microcontroller. This type is a
/// handle that can be cloned to control the port from multiple locations.
///
/// Data pushed with [`push_incoming`][Self::push_incoming] is returned by reads, as if the device
/// had sent it. Everything written to the port is kept in a separate log and, if echo is enabled,
/// is also queued to be read back.
#[derive(Clone)]
pub struct TestPort {
    /// Data the device has sent that has not been read yet.
    incoming: Arc<Mutex<Vec<u8>>>,
    /// Every byte written to the port.
    written: Arc<Mutex<Vec<u8>>>,
    /// Whether written data is echoed back.
    echo: Arc<AtomicBool>,
    /// Whether the port has an error. Simulates a physical disconnect if `true`.
    has_error: Arc<AtomicBool>,
    /// The clear-to-send line. If `false`, the port will not produce errors but the device is not
    /// ready to communicate.
    cts: Arc<AtomicBool>,
    /// The configured baud rate.
    baud_rate: Arc<AtomicU32>,
}

impl TestPort {
    /// Returns a new `TestPort` that has no errors, has a device ready and echoes written data.
    pub fn new() -> serialport::Result<Self> {
        Ok(Self {
            incoming: Arc::new(Mutex::new(Vec::new())),
            written: Arc::new(Mutex::new(Vec::new())),
            echo: Arc::new(true.into()),
            has_error: Arc::new(false.into()),
            cts: Arc::new(true.into()),
            baud_rate: Arc::new(57_600.into()),
        })
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    pub fn set_has_error(&self, has_error: bool) {
        self.has_error.store(has_error, Ordering::SeqCst);
    }

    pub fn cts(&self) -> bool {
        self.cts.load(Ordering::SeqCst)
    }

    pub fn set_cts(&self, cts: bool) {
        self.cts.store(cts, Ordering::SeqCst);
    }

    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    /// Queues `data` as if the device had sent it.
    pub fn push_incoming(&self, data: &[u8]) {
        self.incoming().extend_from_slice(data);
    }

    /// Returns a copy of everything written to the port so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    // Returns `Err` if the `has_error` flag is true, or `Ok` otherwise (even if `cts` is false).
    pub fn try_access(&self) -> io::Result<()> {
        if self.has_error() {
            Err(io::ErrorKind::BrokenPipe.into())
        } else {
            Ok(())
        }
    }

    fn incoming(&self) -> MutexGuard<Vec<u8>> {
        self.incoming.lock().unwrap()
    }
}

impl Write for TestPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.try_access()?;

        self.written.lock().unwrap().extend_from_slice(buf);
        if self.echo.load(Ordering::SeqCst) {
            self.push_incoming(buf);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.try_access()
    }
}

impl Read for TestPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.try_access()?;

        let mut incoming = self.incoming();
        if incoming.is_empty() {
            drop(incoming);
            // Behave like a real port whose read timed out
            thread::sleep(IDLE_READ_DELAY);
            return Err(io::ErrorKind::TimedOut.into());
        }

        let bytes = buf.len().min(incoming.len());
        buf[..bytes].copy_from_slice(&incoming[..bytes]);
        incoming.drain(..bytes);

        Ok(bytes)
    }
}

impl SerialPort for TestPort {
    fn name(&self) -> Option<String> {
        Some("testport".to_string())
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        self.try_access()
            .map(|_| self.baud_rate.load(Ordering::SeqCst))
            .map_err(Into::into)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        self.try_access().map(|_| DataBits::Eight).map_err(Into::into)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        self.try_access().map(|_| FlowControl::Hardware).map_err(Into::into)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        self.try_access().map(|_| Parity::None).map_err(Into::into)
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> serialport::Result<()> {
        self.try_access()
            .map(|_| self.baud_rate.store(baud_rate, Ordering::SeqCst))
            .map_err(Into::into)
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        self.try_access().map(|_| StopBits::One).map_err(Into::into)
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn set_timeout(&mut self, _timeout: Duration) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| self.cts()).map_err(Into::into)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| true).map_err(Into::into)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| true).map_err(Into::into)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        self.try_access()
            .map(|_| self.incoming().len() as u32)
            .map_err(Into::into)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        self.try_access().map(|_| 0).map_err(Into::into)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        self.try_access().map(|_| true).map_err(Into::into)
    }

    fn clear(&self, buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
        self.try_access()?;
        if let ClearBuffer::Input | ClearBuffer::All = buffer_to_clear {
            self.incoming().clear();
        }
        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        self.try_access()?;
        Ok(Box::new(self.clone()))
    }

    fn set_break(&self) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }

    fn clear_break(&self) -> serialport::Result<()> {
        self.try_access().map_err(Into::into)
    }
}
