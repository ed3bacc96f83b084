//! Carbon line-protocol ingest: a blocking TCP listener (one thread per
//! connection, newline-delimited) and a blocking UDP listener (one or more
//! newline-joined records per datagram).
//!
//! Each line is `name value timestamp`, whitespace-separated; a
//! fractional timestamp is truncated to whole seconds.

use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffer::Buffer;

const POLL_BACKOFF: Duration = Duration::from_millis(50);

/// Parses one `name value timestamp` record. `timestamp` may carry a
/// fractional part; it is truncated to whole seconds. Any line that isn't
/// exactly three whitespace-separated fields, or whose value/timestamp
/// don't parse as numbers, is rejected.
pub fn parse_line(line: &str) -> Option<(&str, f64, i64)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let value: f64 = parts.next()?.parse().ok()?;
    let ts: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((name, value, ts as i64))
}

fn feed_line(buffer: &RwLock<Buffer>, line: &str, skipped: &AtomicU64) {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return;
    }
    match parse_line(line) {
        Some((name, value, ts)) => {
            buffer
                .write()
                .expect("buffer lock poisoned")
                .add(ts, name.as_bytes(), value);
        }
        None => {
            skipped.fetch_add(1, Ordering::Relaxed);
            debug!(line, "skipped unparsable carbon line");
        }
    }
}

/// Spawns the Carbon TCP listener on its own thread. Each accepted
/// connection is handled on a further thread for the duration of the
/// connection.
pub fn spawn_tcp_listener(
    bind: &str,
    buffer: Arc<RwLock<Buffer>>,
    shutdown: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let listener = TcpListener::bind(bind)?;
    listener.set_nonblocking(true)?;
    Ok(thread::spawn(move || {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let buffer = buffer.clone();
                    let skipped = skipped.clone();
                    thread::spawn(move || handle_tcp_client(stream, &buffer, &skipped));
                }
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_BACKOFF);
                }
                Err(err) => {
                    warn!(%err, "carbon tcp accept error");
                    thread::sleep(POLL_BACKOFF);
                }
            }
        }
    }))
}

fn handle_tcp_client(stream: TcpStream, buffer: &RwLock<Buffer>, skipped: &AtomicU64) {
    let _ = stream.set_nonblocking(false);
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => feed_line(buffer, &line, skipped),
            Err(err) => {
                warn!(%err, "carbon tcp read error");
                break;
            }
        }
    }
}

/// Spawns the Carbon UDP listener on its own thread.
pub fn spawn_udp_listener(
    bind: &str,
    buffer: Arc<RwLock<Buffer>>,
    shutdown: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let socket = UdpSocket::bind(bind)?;
    socket.set_read_timeout(Some(POLL_BACKOFF))?;
    Ok(thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            match socket.recv_from(&mut buf) {
                Ok((n, _addr)) => {
                    let text = String::from_utf8_lossy(&buf[..n]);
                    for line in text.lines() {
                        feed_line(&buffer, line, &skipped);
                    }
                }
                Err(ref err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => warn!(%err, "carbon udp recv error"),
            }
        }
    }))
}
