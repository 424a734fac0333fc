//! Serial L1 transport: a local TTY opened in raw mode at 2400 (or faster,
//! for enhanced adapters) baud, 8N1, no flow control.

use super::RingBuffer;
use crate::error::{Error, Result};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;

/// Host-side latency added on top of a logical read timeout for a serial
/// link (§4.1 default).
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(10);

struct RawFile(RawFd);

impl AsRawFd for RawFile {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// A locally attached eBUS adapter reachable through a TTY device node.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    fd: Option<AsyncFd<RawFile>>,
    ring: RingBuffer,
}

impl SerialTransport {
    /// Build a transport for `path` at the standard eBUS rate of 2400 baud.
    pub fn new(path: String) -> Self {
        Self::with_baud_rate(path, 2400)
    }

    /// Build a transport for `path` at an explicit baud rate (enhanced
    /// adapters commonly run at 9600 or 115200).
    pub fn with_baud_rate(path: String, baud_rate: u32) -> Self {
        Self {
            path,
            baud_rate,
            fd: None,
            ring: RingBuffer::new(super::ring::MIN_CAPACITY),
        }
    }

    fn baud_constant(&self) -> Result<libc::speed_t> {
        Ok(match self.baud_rate {
            2400 => libc::B2400,
            9600 => libc::B9600,
            19200 => libc::B19200,
            38400 => libc::B38400,
            57600 => libc::B57600,
            115200 => libc::B115200,
            other => {
                return Err(Error::invalid_field(
                    "baud_rate",
                    format!("unsupported baud rate {other}"),
                ));
            }
        })
    }

    pub(crate) async fn open(&mut self) -> Result<()> {
        let cpath = std::ffi::CString::new(self.path.clone())
            .map_err(|e| Error::invalid_field("device", e.to_string()))?;
        let raw_fd = unsafe {
            libc::open(
                cpath.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK,
            )
        };
        if raw_fd < 0 {
            return Err(Error::TransportIo(io::Error::last_os_error()));
        }
        let speed = self.baud_constant()?;
        unsafe {
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(raw_fd, &mut tio) != 0 {
                libc::close(raw_fd);
                return Err(Error::TransportIo(io::Error::last_os_error()));
            }
            libc::cfmakeraw(&mut tio);
            libc::cfsetispeed(&mut tio, speed);
            libc::cfsetospeed(&mut tio, speed);
            tio.c_cflag |= libc::CLOCAL | libc::CREAD;
            tio.c_cflag &= !libc::CRTSCTS;
            tio.c_cc[libc::VMIN] = 0;
            tio.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(raw_fd, libc::TCSANOW, &tio) != 0 {
                libc::close(raw_fd);
                return Err(Error::TransportIo(io::Error::last_os_error()));
            }
        }
        self.fd = Some(AsyncFd::new(RawFile(raw_fd))?);
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        self.fd = None;
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    pub(crate) async fn read(&mut self, timeout: Duration) -> Result<&[u8]> {
        let fd = self.fd.as_mut().ok_or(Error::NoSignal)?;
        let mut scratch = [0u8; 256];
        let poll = async {
            loop {
                let mut guard = fd.readable().await?;
                let res = guard.try_io(|inner| {
                    let n = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            scratch.as_mut_ptr() as *mut libc::c_void,
                            scratch.len(),
                        )
                    };
                    if n < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(n as usize)
                    }
                });
                match res {
                    Ok(Ok(n)) => return Ok::<usize, io::Error>(n),
                    Ok(Err(e)) => return Err(e),
                    Err(_would_block) => continue,
                }
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(n)) => {
                self.ring.fill_from(&scratch[..n])?;
                Ok(self.ring.as_slice())
            }
            Ok(Err(e)) => Err(Error::TransportIo(e)),
            Err(_elapsed) => Ok(self.ring.as_slice()),
        }
    }

    pub(crate) fn consume(&mut self, n: usize) {
        self.ring.consume(n);
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<()> {
        let fd = self.fd.as_mut().ok_or(Error::NoSignal)?;
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = fd.writable().await?;
            let res = guard.try_io(|inner| {
                let n = unsafe {
                    libc::write(
                        inner.as_raw_fd(),
                        data[offset..].as_ptr() as *const libc::c_void,
                        data.len() - offset,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match res {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(Error::TransportIo(e)),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    pub(crate) fn latency(&self) -> Duration {
        DEFAULT_LATENCY
    }
}
