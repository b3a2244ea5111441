use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use colored::Colorize;
use mmio_proxy::chardev::{self, SocketChardev};
use mmio_proxy::devices::{MmioBus, ProxyDevice};
use mmio_proxy::proto::{Op, Request, REQUEST_LEN};
use mmio_proxy::ProxyError;

const PROXY_BASE: u64 = 0x9000_0000; // Base address for the proxied window
const PROXY_SIZE: u64 = 0x1000;

/// Handler side of the wire protocol: backs the proxied window with a
/// plain byte array. Real deployments run this loop in a separate process
/// on the far end of a socket or serial port; for the demo an in-process
/// thread is enough.
fn serve_registers(mut stream: TcpStream) -> Result<(), ProxyError> {
    let mut regs = vec![0u8; PROXY_SIZE as usize];
    let mut buf = [0u8; REQUEST_LEN];
    loop {
        stream.read_exact(&mut buf)?;
        let request = Request::decode(&buf)?;

        let offset = request.addr as usize;
        let width = request.size as usize;
        match request.op {
            Op::Read => {
                // The device only bounds-checks the start address, so a
                // wide access may poke past the window; answer the
                // out-of-range tail with zeroes.
                let mut reply = [0u8; 8];
                for (i, byte) in reply.iter_mut().enumerate().take(width) {
                    *byte = regs.get(offset + i).copied().unwrap_or(0);
                }
                stream.write_all(&reply[..width])?;
            }
            Op::Write => {
                let payload = request.val.to_le_bytes();
                for i in 0..width {
                    if let Some(slot) = regs.get_mut(offset + i) {
                        *slot = payload[i];
                    }
                }
                stream.write_all(&[1u8])?;
            }
        }
    }
}

fn run() -> Result<(), ProxyError> {
    env_logger::init();

    // Handler end of the channel
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            if let Err(err) = serve_registers(stream) {
                log::debug!("handler stopped: {err}");
            }
        }
    });

    // Device end: a proxy region on the bus, backed by the socket
    let mut proxy = ProxyDevice::new(PROXY_SIZE);
    proxy.bind_chardev(chardev::shared(SocketChardev::connect_tcp(addr)?));

    let mut bus = MmioBus::default();
    bus.register_device(PROXY_BASE, Box::new(proxy))?;

    println!(
        "{}",
        format!(
            "mmio-proxy demo: {:#x}..{:#x} backed by {addr}",
            PROXY_BASE,
            PROXY_BASE + PROXY_SIZE
        )
        .bright_cyan()
        .bold()
    );

    bus.write(PROXY_BASE + 0x10, 4, 0xDEAD_BEEF)?;
    bus.write(PROXY_BASE + 0x18, 8, 0x0123_4567_89AB_CDEF)?;

    let word = bus.read(PROXY_BASE + 0x10, 4)?;
    let quad = bus.read(PROXY_BASE + 0x18, 8)?;
    let untouched = bus.read(PROXY_BASE + 0x20, 4)?;

    println!(
        "read {:#x} -> {}",
        PROXY_BASE + 0x10,
        format!("{word:#010x}").bright_green()
    );
    println!(
        "read {:#x} -> {}",
        PROXY_BASE + 0x18,
        format!("{quad:#018x}").bright_green()
    );
    println!(
        "read {:#x} -> {} (never written)",
        PROXY_BASE + 0x20,
        format!("{untouched:#x}").bright_yellow()
    );

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", format!("error: {err}").bright_red());
        std::process::exit(1);
    }
}
