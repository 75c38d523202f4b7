//! Dummy server for the Rebot register tunnel.
//!
//! Serves a flat word-addressed register space over TCP, speaking either the
//! legacy protocol 0 or protocol 1. Used by the integration tests of the
//! `deviceaccess` crate and runnable standalone through the `rebot-dummy`
//! binary.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const SINGLE_WORD_WRITE: i32 = 1;
pub const MULTI_WORD_WRITE: i32 = 2;
pub const MULTI_WORD_READ: i32 = 3;
pub const HELLO: i32 = 4;
pub const PING: i32 = 5;

pub const WRITE_SUCCESS_INDICATION: i32 = 1;
pub const TOO_MUCH_DATA_REQUESTED: i32 = -1024;
pub const UNKNOWN_INSTRUCTION: i32 = -1040;

/// "rbot" in ASCII.
pub const REBOT_MAGIC_WORD: i32 = 0x7262_6F74;

/// Read requests above this word count are refused in protocol 0.
pub const PROTOCOL0_MAX_WORDS_PER_READ: usize = 361;

/// One running dummy server with its register space.
pub struct RebotDummyServer {
    register_space: Arc<Mutex<Vec<i32>>>,
    protocol_version: u32,
    local_port: u16,
    stop: Arc<AtomicBool>,
    accept_thread: Option<thread::JoinHandle<()>>,
}

impl RebotDummyServer {
    /// Binds to an ephemeral localhost port and starts accepting sessions.
    ///
    /// `protocol_version` is the highest version the server offers in the
    /// hello exchange; `0` emulates a legacy server that knows no hello.
    pub fn start(n_words: usize, protocol_version: u32) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let local_port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        let register_space = Arc::new(Mutex::new(vec![0i32; n_words]));
        let stop = Arc::new(AtomicBool::new(false));

        let space = register_space.clone();
        let stop_flag = stop.clone();
        let accept_thread = thread::Builder::new()
            .name("rebot-dummy-accept".into())
            .spawn(move || {
                accept_loop(&listener, &space, protocol_version, &stop_flag);
            })?;

        log::info!("rebot dummy server listening on port {local_port}");
        Ok(RebotDummyServer {
            register_space,
            protocol_version,
            local_port,
            stop,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn port(&self) -> u16 {
        self.local_port
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Direct access to the register space, for test assertions.
    pub fn peek(&self, word_address: usize) -> i32 {
        self.register_space.lock().unwrap()[word_address]
    }

    pub fn poke(&self, word_address: usize, value: i32) {
        self.register_space.lock().unwrap()[word_address] = value;
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RebotDummyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &TcpListener,
    register_space: &Arc<Mutex<Vec<i32>>>,
    protocol_version: u32,
    stop: &AtomicBool,
) {
    let mut sessions: Vec<thread::JoinHandle<()>> = Vec::new();
    let mut session_stops: Vec<Arc<AtomicBool>> = Vec::new();
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("rebot dummy: session from {peer}");
                let space = register_space.clone();
                let session_stop = Arc::new(AtomicBool::new(false));
                let session_stop_flag = session_stop.clone();
                let handle = thread::Builder::new()
                    .name("rebot-dummy-session".into())
                    .spawn(move || {
                        let mut session = Session {
                            space,
                            negotiated_version: 0,
                            max_version: protocol_version,
                        };
                        if let Err(e) = session.run(stream, &session_stop_flag) {
                            log::debug!("rebot dummy: session ended: {e}");
                        }
                    })
                    .expect("spawning a session thread failed");
                sessions.push(handle);
                session_stops.push(session_stop);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                log::error!("rebot dummy: accept failed: {e}");
                break;
            }
        }
    }
    for session_stop in &session_stops {
        session_stop.store(true, Ordering::Release);
    }
    for handle in sessions {
        let _ = handle.join();
    }
}

struct Session {
    space: Arc<Mutex<Vec<i32>>>,
    negotiated_version: u32,
    max_version: u32,
}

impl Session {
    fn run(&mut self, mut stream: TcpStream, stop: &AtomicBool) -> std::io::Result<()> {
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        loop {
            match read_command_word(&mut stream, stop)? {
                Some(command) => self.dispatch(&mut stream, command)?,
                None => return Ok(()),
            }
        }
    }

    fn dispatch(&mut self, stream: &mut TcpStream, command: i32) -> std::io::Result<()> {
        match command {
            SINGLE_WORD_WRITE => self.single_word_write(stream),
            MULTI_WORD_WRITE => self.multi_word_write(stream),
            MULTI_WORD_READ => self.multi_word_read(stream),
            HELLO => self.hello(stream),
            PING => self.ping(stream),
            _ => send_words(stream, &[UNKNOWN_INSTRUCTION]),
        }
    }

    fn single_word_write(&mut self, stream: &mut TcpStream) -> std::io::Result<()> {
        let args = recv_blocking(stream, 2)?;
        let (address, value) = (args[0] as u32 as usize, args[1]);
        let mut space = self.space.lock().unwrap();
        if address >= space.len() {
            drop(space);
            return send_words(stream, &[TOO_MUCH_DATA_REQUESTED]);
        }
        space[address] = value;
        drop(space);
        send_words(stream, &[WRITE_SUCCESS_INDICATION])
    }

    fn multi_word_write(&mut self, stream: &mut TcpStream) -> std::io::Result<()> {
        let header = recv_blocking(stream, 2)?;
        let (address, n_words) = (header[0] as u32 as usize, header[1] as u32 as usize);
        // the full frame is consumed either way to keep the stream in sync
        let data = recv_blocking(stream, n_words)?;
        if self.negotiated_version < 1 {
            // protocol 0 has no multi-word write
            return send_words(stream, &[UNKNOWN_INSTRUCTION]);
        }
        let mut space = self.space.lock().unwrap();
        if address + n_words > space.len() {
            drop(space);
            return send_words(stream, &[TOO_MUCH_DATA_REQUESTED]);
        }
        space[address..address + n_words].copy_from_slice(&data);
        drop(space);
        send_words(stream, &[WRITE_SUCCESS_INDICATION])
    }

    fn multi_word_read(&mut self, stream: &mut TcpStream) -> std::io::Result<()> {
        let args = recv_blocking(stream, 2)?;
        let (address, n_words) = (args[0] as u32 as usize, args[1] as u32 as usize);
        if self.negotiated_version < 1 && n_words > PROTOCOL0_MAX_WORDS_PER_READ {
            return send_words(stream, &[TOO_MUCH_DATA_REQUESTED]);
        }
        let space = self.space.lock().unwrap();
        if address + n_words > space.len() {
            drop(space);
            return send_words(stream, &[TOO_MUCH_DATA_REQUESTED]);
        }
        let data = space[address..address + n_words].to_vec();
        drop(space);
        send_words(stream, &data)
    }

    fn hello(&mut self, stream: &mut TcpStream) -> std::io::Result<()> {
        let args = recv_blocking(stream, 2)?;
        if self.max_version == 0 {
            // a legacy server does not know the hello instruction
            return send_words(stream, &[UNKNOWN_INSTRUCTION]);
        }
        let client_version = args[1] as u32;
        self.negotiated_version = client_version.min(self.max_version);
        send_words(
            stream,
            &[HELLO, REBOT_MAGIC_WORD, self.negotiated_version as i32],
        )
    }

    fn ping(&mut self, stream: &mut TcpStream) -> std::io::Result<()> {
        let _ = recv_blocking(stream, 2)?;
        if self.negotiated_version < 1 {
            return send_words(stream, &[UNKNOWN_INSTRUCTION]);
        }
        send_words(stream, &[WRITE_SUCCESS_INDICATION])
    }
}

pub fn send_words(stream: &mut TcpStream, words: &[i32]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    stream.write_all(&bytes)
}

pub fn recv_words(stream: &mut TcpStream, n_words: usize) -> std::io::Result<Vec<i32>> {
    let mut bytes = vec![0u8; n_words * 4];
    stream.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Waits for the next command word; `None` on peer hangup or server stop.
/// Timeouts between commands are expected and never split a word, because
/// partial reads are carried over.
fn read_command_word(stream: &mut TcpStream, stop: &AtomicBool) -> std::io::Result<Option<i32>> {
    let mut bytes = [0u8; 4];
    let mut filled = 0usize;
    loop {
        if stop.load(Ordering::Acquire) && filled == 0 {
            return Ok(None);
        }
        match stream.read(&mut bytes[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(ErrorKind::UnexpectedEof.into())
                };
            }
            Ok(n) => {
                filled += n;
                if filled == 4 {
                    return Ok(Some(i32::from_le_bytes(bytes)));
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e),
        }
    }
}

/// Like `recv_words`, but rides out read timeouts mid-frame.
fn recv_blocking(stream: &mut TcpStream, n_words: usize) -> std::io::Result<Vec<i32>> {
    let mut bytes = vec![0u8; n_words * 4];
    let mut filled = 0usize;
    while filled < bytes.len() {
        match stream.read(&mut bytes[filled..]) {
            Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e),
        }
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
