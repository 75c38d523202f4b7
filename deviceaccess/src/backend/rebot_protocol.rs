//! Client side of the Rebot register tunnel: framing and the per-version
//! protocol implementors.
//!
//! All frames are sequences of 32-bit little-endian words. Protocol 0 knows
//! single-word writes and reads of at most 361 words; protocol 1 adds
//! multi-word writes, the hello exchange and the heartbeat ping.

use crate::error::{Error, Result};
use static_assertions::const_assert_eq;
use std::io::{Read, Write};
use std::net::TcpStream;

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

pub const CLIENT_PROTOCOL_VERSION: u32 = 1;

/// Hard limit of one read request in protocol 0; larger reads are chunked.
pub const PROTOCOL0_MAX_WORDS_PER_READ: usize = 361;

const WORD_BYTES: usize = 4;
const_assert_eq!(WORD_BYTES, std::mem::size_of::<i32>());

pub fn send_words(stream: &mut TcpStream, words: &[i32]) -> Result<()> {
    let mut bytes = Vec::with_capacity(words.len() * WORD_BYTES);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    stream.write_all(&bytes)?;
    Ok(())
}

pub fn recv_words(stream: &mut TcpStream, n_words: usize) -> Result<Vec<i32>> {
    let mut bytes = vec![0u8; n_words * WORD_BYTES];
    stream.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(WORD_BYTES)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn recv_word(stream: &mut TcpStream) -> Result<i32> {
    Ok(recv_words(stream, 1)?[0])
}

/// Performs the hello exchange and returns the negotiated protocol version.
///
/// A legacy protocol-0 server answers `UNKNOWN_INSTRUCTION`; a newer server
/// replies `[HELLO, magic, version]`.
pub fn negotiate_protocol(stream: &mut TcpStream) -> Result<u32> {
    send_words(
        stream,
        &[HELLO, REBOT_MAGIC_WORD, CLIENT_PROTOCOL_VERSION as i32],
    )?;
    let first = recv_word(stream)?;
    if first == UNKNOWN_INSTRUCTION {
        log::info!("rebot server speaks legacy protocol 0");
        return Ok(0);
    }
    if first != HELLO {
        return Err(Error::runtime(format!(
            "unexpected hello reply word {first:#x}"
        )));
    }
    let rest = recv_words(stream, 2)?;
    if rest[0] != REBOT_MAGIC_WORD {
        return Err(Error::runtime(format!(
            "bad magic word {:#x} in hello reply",
            rest[0]
        )));
    }
    let server_version = rest[1] as u32;
    let version = server_version.min(CLIENT_PROTOCOL_VERSION);
    log::info!("rebot server protocol version {server_version}, using {version}");
    Ok(version)
}

fn check_write_ack(stream: &mut TcpStream) -> Result<()> {
    match recv_word(stream)? {
        WRITE_SUCCESS_INDICATION => Ok(()),
        UNKNOWN_INSTRUCTION => Err(Error::runtime(
            "rebot server rejected the instruction as unknown",
        )),
        TOO_MUCH_DATA_REQUESTED => Err(Error::runtime("rebot server: too much data requested")),
        other => Err(Error::runtime(format!(
            "unexpected write reply word {other:#x}"
        ))),
    }
}

/// Reads `data.len()` words starting at `word_address`, chunking requests to
/// the protocol-0 limit when talking to a legacy server.
pub fn read_registers(
    stream: &mut TcpStream,
    version: u32,
    word_address: u32,
    data: &mut [i32],
) -> Result<()> {
    let chunk_limit = if version == 0 {
        PROTOCOL0_MAX_WORDS_PER_READ
    } else {
        data.len().max(1)
    };
    let mut offset = 0usize;
    while offset < data.len() {
        let n = (data.len() - offset).min(chunk_limit);
        send_words(
            stream,
            &[MULTI_WORD_READ, word_address as i32 + offset as i32, n as i32],
        )?;
        let words = recv_words(stream, n)?;
        data[offset..offset + n].copy_from_slice(&words);
        offset += n;
    }
    Ok(())
}

/// Writes `data` starting at `word_address`. Protocol 0 loops single-word
/// writes; protocol 1 sends one multi-word frame.
pub fn write_registers(
    stream: &mut TcpStream,
    version: u32,
    word_address: u32,
    data: &[i32],
) -> Result<()> {
    if version == 0 {
        for (i, word) in data.iter().enumerate() {
            send_words(
                stream,
                &[SINGLE_WORD_WRITE, word_address as i32 + i as i32, *word],
            )?;
            check_write_ack(stream)?;
        }
        return Ok(());
    }
    let mut frame = Vec::with_capacity(3 + data.len());
    frame.extend_from_slice(&[MULTI_WORD_WRITE, word_address as i32, data.len() as i32]);
    frame.extend_from_slice(data);
    send_words(stream, &frame)?;
    check_write_ack(stream)
}

/// Heartbeat of protocol 1. A protocol-0 server knows no ping.
pub fn send_ping(stream: &mut TcpStream) -> Result<()> {
    send_words(stream, &[PING, 0, 0])?;
    check_write_ack(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_encoding_is_little_endian() {
        assert_eq!(0x0102_0304i32.to_le_bytes(), [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(REBOT_MAGIC_WORD.to_le_bytes(), *b"tobr");
    }

    #[test]
    fn test_status_words_are_distinct() {
        let words = [
            WRITE_SUCCESS_INDICATION,
            TOO_MUCH_DATA_REQUESTED,
            UNKNOWN_INSTRUCTION,
            HELLO,
        ];
        for (i, a) in words.iter().enumerate() {
            for b in &words[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
