//! Link RPC: the fetch protocol between a [`crate::reader::Reader`] and a
//! remote ingest server's live [`Buffer`], framed with this crate's
//! [`crate::encoding`] module.
//!
//! A client writes one request, half-closes the socket, and reads the
//! response to EOF. The only method calls through to `Buffer::get_data`;
//! an unknown method or any error along the way replies with an error
//! payload rather than closing the connection abruptly.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::buffer::{Buffer, FlushPayload};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::reader::{LinkError, LinkFetch};

const POLL_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LinkServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

struct FetchRequest {
    keys: Vec<Vec<u8>>,
    now: i64,
}

impl Encode for FetchRequest {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        "fetch".encode_to(buf)?;
        self.now.encode_to(buf)?;
        encoding::encode_vec(&self.keys, buf)?;
        Ok(())
    }
}

impl Decode for FetchRequest {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (method, mut off) = String::decode_from(buf)?;
        if method != "fetch" {
            return Err(EncodingError::Custom(format!(
                "unknown link rpc method {method:?}"
            )));
        }
        let (now, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (keys, n) = encoding::decode_vec::<Vec<u8>>(&buf[off..])?;
        off += n;
        Ok((FetchRequest { keys, now }, off))
    }
}

enum FetchResponse {
    Ok {
        start: i64,
        resolution: u32,
        size: u32,
        rows: Vec<(Vec<u8>, Vec<f64>)>,
    },
    Error(String),
}

impl Encode for FetchResponse {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            FetchResponse::Ok { start, resolution, size, rows } => {
                0u8.encode_to(buf)?;
                start.encode_to(buf)?;
                resolution.encode_to(buf)?;
                size.encode_to(buf)?;
                (rows.len() as u32).encode_to(buf)?;
                for (name, values) in rows {
                    name.encode_to(buf)?;
                    encoding::encode_vec(values, buf)?;
                }
            }
            FetchResponse::Error(message) => {
                1u8.encode_to(buf)?;
                message.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for FetchResponse {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u8::decode_from(buf)?;
        match tag {
            0 => {
                let (start, n) = i64::decode_from(&buf[off..])?;
                off += n;
                let (resolution, n) = u32::decode_from(&buf[off..])?;
                off += n;
                let (size, n) = u32::decode_from(&buf[off..])?;
                off += n;
                let (count, n) = u32::decode_from(&buf[off..])?;
                off += n;
                let mut rows = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (name, n) = Vec::<u8>::decode_from(&buf[off..])?;
                    off += n;
                    let (values, n) = encoding::decode_vec::<f64>(&buf[off..])?;
                    off += n;
                    rows.push((name, values));
                }
                Ok((FetchResponse::Ok { start, resolution, size, rows }, off))
            }
            1 => {
                let (message, n) = String::decode_from(&buf[off..])?;
                off += n;
                Ok((FetchResponse::Error(message), off))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other as u32,
                type_name: "FetchResponse",
            }),
        }
    }
}

/// Serves `fetch` RPC calls against a live [`Buffer`], one thread per
/// connection.
pub struct LinkServer;

impl LinkServer {
    pub fn spawn(
        bind: &str,
        buffer: Arc<RwLock<Buffer>>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<thread::JoinHandle<()>, LinkServerError> {
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
                        thread::spawn(move || handle_connection(stream, &buffer));
                    }
                    Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(POLL_BACKOFF);
                    }
                    Err(err) => {
                        warn!(%err, "link rpc accept error");
                        thread::sleep(POLL_BACKOFF);
                    }
                }
            }
        }))
    }
}

fn handle_connection(mut stream: TcpStream, buffer: &RwLock<Buffer>) {
    let _ = stream.set_nonblocking(false);
    let mut request_bytes = Vec::new();
    if let Err(err) = stream.read_to_end(&mut request_bytes) {
        warn!(%err, "link rpc read error");
        return;
    }

    let response = match encoding::decode_from_slice::<FetchRequest>(&request_bytes) {
        Ok((request, _)) => {
            let payload = buffer
                .read()
                .expect("buffer lock poisoned")
                .get_data(&request.keys, request.now);
            FetchResponse::Ok {
                start: payload.start,
                resolution: payload.resolution,
                size: payload.size,
                rows: payload.rows,
            }
        }
        Err(err) => FetchResponse::Error(err.to_string()),
    };

    match encoding::encode_to_vec(&response) {
        Ok(bytes) => {
            let _ = stream.write_all(&bytes);
        }
        Err(err) => warn!(%err, "failed to encode link rpc response"),
    }
}

/// Client side of the link protocol, used by a [`crate::reader::Reader`]
/// running against a remote server's live buffer.
pub struct LinkClient {
    addr: String,
    timeout: Duration,
}

impl LinkClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self { addr: addr.into(), timeout }
    }
}

impl LinkFetch for LinkClient {
    fn fetch(&self, names: &[Vec<u8>], now: i64) -> Result<FlushPayload, LinkError> {
        let mut stream = TcpStream::connect(&self.addr).map_err(|err| LinkError(err.to_string()))?;
        stream.set_read_timeout(Some(self.timeout)).ok();
        stream.set_write_timeout(Some(self.timeout)).ok();

        let request = FetchRequest { keys: names.to_vec(), now };
        let bytes = encoding::encode_to_vec(&request).map_err(|err| LinkError(err.to_string()))?;
        stream.write_all(&bytes).map_err(|err| LinkError(err.to_string()))?;
        stream.shutdown(Shutdown::Write).ok();

        let mut response_bytes = Vec::new();
        stream
            .read_to_end(&mut response_bytes)
            .map_err(|err| LinkError(err.to_string()))?;
        let (response, _) = encoding::decode_from_slice::<FetchResponse>(&response_bytes)
            .map_err(|err| LinkError(err.to_string()))?;

        match response {
            FetchResponse::Ok { start, resolution, size, rows } => {
                Ok(FlushPayload { start, resolution, size, rows })
            }
            FetchResponse::Error(message) => Err(LinkError(message)),
        }
    }
}
