use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;

use crate::chardev::CharBackend;
use crate::err::ChardevError;

/// Blocking socket-backed chardev over a Unix domain socket or TCP stream.
///
/// Connectivity latches: once the peer hangs up or the stream fails, the
/// backend reports disconnected for the rest of its life and refuses
/// further I/O. There are no timeouts; a read blocks until the requested
/// bytes arrive or the stream is gone.
pub struct SocketChardev {
    inner: StreamInner,
    connected: bool,
}

enum StreamInner {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl SocketChardev {
    /// Connects to a listening Unix domain socket.
    #[cfg(unix)]
    pub fn connect_unix(path: impl AsRef<Path>) -> Result<Self, ChardevError> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| ChardevError::Connect {
            target: path.display().to_string(),
            source,
        })?;
        log::debug!("chardev connected to unix socket {}", path.display());
        Ok(Self::from_unix(stream))
    }

    /// Connects to a TCP endpoint.
    pub fn connect_tcp(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self, ChardevError> {
        let stream = TcpStream::connect(&addr).map_err(|source| ChardevError::Connect {
            target: addr.to_string(),
            source,
        })?;
        log::debug!("chardev connected to tcp endpoint {addr}");
        Ok(Self::from_tcp(stream))
    }

    /// Wraps an already-connected Unix stream (e.g. one half of a pair).
    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> Self {
        Self {
            inner: StreamInner::Unix(stream),
            connected: true,
        }
    }

    /// Wraps an already-connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: StreamInner::Tcp(stream),
            connected: true,
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.read(buf),
            StreamInner::Tcp(stream) => stream.read(buf),
        }
    }

    fn write_whole(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            StreamInner::Unix(stream) => stream.write_all(buf),
            StreamInner::Tcp(stream) => stream.write_all(buf),
        }
    }
}

impl CharBackend for SocketChardev {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), ChardevError> {
        if !self.connected {
            return Err(ChardevError::Disconnected);
        }
        self.write_whole(buf).map_err(|err| {
            log::debug!("chardev write failed: {err}");
            self.connected = false;
            ChardevError::Io(err)
        })
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ChardevError> {
        if !self.connected {
            return Err(ChardevError::Disconnected);
        }
        // Manual fill loop so a mid-buffer EOF can report how many bytes
        // actually arrived.
        let mut got = 0;
        while got < buf.len() {
            match self.read_some(&mut buf[got..]) {
                Ok(0) => {
                    log::debug!("chardev peer closed after {got} of {} bytes", buf.len());
                    self.connected = false;
                    return Err(ChardevError::ShortRead {
                        got,
                        expected: buf.len(),
                    });
                }
                Ok(n) => got += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.connected = false;
                    return Err(ChardevError::Io(err));
                }
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chardev;
    use crate::devices::{MmioDevice, ProxyDevice};
    use crate::proto::{Op, Request, REQUEST_LEN};
    use std::net::TcpListener;
    use std::thread;

    /// Serves a tiny register file over the wire protocol until the peer
    /// hangs up or `max_requests` have been answered.
    fn serve_register_file(mut stream: TcpStream, max_requests: usize) {
        let mut regs = [0u8; 0x1000];
        let mut buf = [0u8; REQUEST_LEN];
        for _ in 0..max_requests {
            if stream.read_exact(&mut buf).is_err() {
                return;
            }
            let request = Request::decode(&buf).unwrap();
            let offset = request.addr as usize;
            let width = request.size as usize;
            match request.op {
                Op::Read => {
                    let mut reply = [0u8; 8];
                    for (i, byte) in reply.iter_mut().enumerate().take(width) {
                        *byte = regs.get(offset + i).copied().unwrap_or(0);
                    }
                    if stream.write_all(&reply[..width]).is_err() {
                        return;
                    }
                }
                Op::Write => {
                    let payload = request.val.to_le_bytes();
                    for i in 0..width {
                        if let Some(slot) = regs.get_mut(offset + i) {
                            *slot = payload[i];
                        }
                    }
                    if stream.write_all(&[1u8]).is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn loopback_backend(max_requests: usize) -> (SocketChardev, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serve_register_file(stream, max_requests);
        });
        (SocketChardev::connect_tcp(addr).unwrap(), handler)
    }

    #[test]
    fn test_proxy_round_trip_over_tcp() {
        let (backend, handler) = loopback_backend(4);

        let mut proxy = ProxyDevice::new(0x1000);
        proxy.bind_chardev(chardev::shared(backend));

        proxy.write(0x10, 4, 0xDEAD_BEEF).unwrap();
        proxy.write(0x20, 8, 0x0123_4567_89AB_CDEF).unwrap();

        assert_eq!(proxy.read(0x10, 4).unwrap(), 0xDEAD_BEEF);
        assert_eq!(proxy.read(0x20, 8).unwrap(), 0x0123_4567_89AB_CDEF);

        drop(proxy);
        handler.join().unwrap();
    }

    #[test]
    fn test_peer_hangup_latches_disconnected() {
        // Handler answers exactly one request, then drops the stream.
        let (backend, handler) = loopback_backend(1);

        let binding = chardev::shared(backend);
        let mut proxy = ProxyDevice::new(0x1000);
        proxy.bind_chardev(binding.clone());

        assert_eq!(proxy.read(0x0, 4).unwrap(), 0);
        handler.join().unwrap();

        // The next exchange fails (short read or broken pipe) and yields
        // the fallback value instead of propagating.
        assert_eq!(proxy.read(0x0, 4).unwrap(), 0);
        assert!(!binding.lock().unwrap().is_connected());

        // Once latched, every further access soft-fails at the
        // connectivity gate without touching the stream.
        assert_eq!(proxy.read(0x8, 8).unwrap(), 0);
        proxy.write(0x8, 8, 0x55).unwrap();
    }
}
