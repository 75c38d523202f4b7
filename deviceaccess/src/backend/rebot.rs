//! TCP-tunneled register backend (Rebot).

use super::numeric::NumericAddressedBackend;
use super::rebot_protocol as protocol;
use super::RawMemoryPort;
use crate::catalogue::numeric::NumericAddressedRegisterCatalogue;
use crate::error::{Error, Result};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time after which the heartbeat thread pings a protocol-1 server.
const HEARTBEAT_IDLE: Duration = Duration::from_millis(2500);
const HEARTBEAT_SLICE: Duration = Duration::from_millis(100);

struct RebotConnection {
    stream: TcpStream,
    version: u32,
}

/// Shared with the heartbeat thread so `close_port` never has to wait for a
/// sleeping thread: the thread re-checks the quit flag every slice.
struct ThreadInformer {
    quit: Mutex<bool>,
    last_send: Mutex<Instant>,
}

/// Blocking TCP client with a watchdog-style socket timeout.
pub struct RebotPort {
    host: String,
    port: u16,
    timeout: Duration,
    connection: Mutex<Option<RebotConnection>>,
    informer: Arc<ThreadInformer>,
    heartbeat_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl RebotPort {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Arc<Self> {
        Arc::new(RebotPort {
            host: host.into(),
            port,
            timeout,
            connection: Mutex::new(None),
            informer: Arc::new(ThreadInformer {
                quit: Mutex::new(false),
                last_send: Mutex::new(Instant::now()),
            }),
            heartbeat_thread: Mutex::new(None),
        })
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::runtime(format!("cannot resolve {}:{}: {e}", self.host, self.port)))?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(Error::runtime(format!(
            "cannot connect to {}:{}: {}",
            self.host,
            self.port,
            last_error.map_or("no address".into(), |e| e.to_string())
        )))
    }

    fn mark_send(&self) {
        *self.informer.last_send.lock().unwrap() = Instant::now();
    }

    fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut TcpStream, u32) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.connection.lock().unwrap();
        let connection = guard
            .as_mut()
            .ok_or_else(|| Error::runtime("rebot connection is not open"))?;
        let result = f(&mut connection.stream, connection.version);
        if result.is_err() {
            // a failed or timed-out exchange leaves the stream desynchronised
            *guard = None;
        } else {
            self.mark_send();
        }
        result
    }

    fn heartbeat_loop(port: &RebotPort) {
        loop {
            thread::sleep(HEARTBEAT_SLICE);
            if *port.informer.quit.lock().unwrap() {
                return;
            }
            let idle = port.informer.last_send.lock().unwrap().elapsed();
            if idle < HEARTBEAT_IDLE {
                continue;
            }
            let mut guard = port.connection.lock().unwrap();
            let mut broken = false;
            if let Some(connection) = guard.as_mut() {
                if connection.version >= 1 {
                    if let Err(e) = protocol::send_ping(&mut connection.stream) {
                        log::warn!("rebot heartbeat failed: {e}");
                        broken = true;
                    }
                }
            }
            if broken {
                *guard = None;
            } else {
                drop(guard);
                port.mark_send();
            }
        }
    }
}

impl RawMemoryPort for Arc<RebotPort> {
    fn open_port(&self) -> Result<()> {
        let mut stream = self.connect()?;
        let version = protocol::negotiate_protocol(&mut stream)?;
        *self.connection.lock().unwrap() = Some(RebotConnection { stream, version });
        self.mark_send();

        let mut thread_slot = self.heartbeat_thread.lock().unwrap();
        if thread_slot.is_none() {
            *self.informer.quit.lock().unwrap() = false;
            let port = self.clone();
            *thread_slot = Some(
                thread::Builder::new()
                    .name("rebot-heartbeat".into())
                    .spawn(move || RebotPort::heartbeat_loop(&port))
                    .expect("spawning the rebot heartbeat thread failed"),
            );
        }
        Ok(())
    }

    fn close_port(&self) {
        *self.informer.quit.lock().unwrap() = true;
        if let Some(handle) = self.heartbeat_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.connection.lock().unwrap() = None;
    }

    fn read_raw(&self, bar: u64, address_bytes: u64, data: &mut [i32]) -> Result<()> {
        check_rebot_addressing(bar, address_bytes)?;
        self.with_connection(|stream, version| {
            protocol::read_registers(stream, version, (address_bytes / 4) as u32, data)
        })
    }

    fn write_raw(&self, bar: u64, address_bytes: u64, data: &[i32]) -> Result<()> {
        check_rebot_addressing(bar, address_bytes)?;
        self.with_connection(|stream, version| {
            protocol::write_registers(stream, version, (address_bytes / 4) as u32, data)
        })
    }

    fn port_info(&self) -> String {
        format!("rebot device at {}:{}", self.host, self.port)
    }
}

/// Addressing violations are caught on the client side before anything is
/// sent, per the protocol contract.
fn check_rebot_addressing(bar: u64, address_bytes: u64) -> Result<()> {
    if bar != 0 {
        return Err(Error::logic(format!(
            "rebot devices expose a single bar, got bar {bar}"
        )));
    }
    if address_bytes % 4 != 0 {
        return Err(Error::logic(format!(
            "rebot addresses must be multiples of 4, got byte {address_bytes}"
        )));
    }
    Ok(())
}

/// Builds a Rebot backend from an already-parsed register map.
pub fn new_rebot_backend(
    host: &str,
    port: u16,
    timeout: Duration,
    map: NumericAddressedRegisterCatalogue,
) -> Arc<NumericAddressedBackend> {
    let rebot = RebotPort::new(host, port, timeout);
    NumericAddressedBackend::new(Box::new(map), Box::new(rebot))
}
