//! Bounded, direction-tagged relay buffer.
//!
//! # Responsibilities
//! - Hold the in-flight request or the in-flight response, never both
//! - Drain a non-blocking reader until WouldBlock, EOF or a stop condition
//! - Drain into a non-blocking writer, remembering how much was sent
//!
//! # Design Decisions
//! - Capacity is a hard bound: overflow is an error, never a truncation
//! - Storage grows on demand up to the bound, so idle connections stay small
//! - `reset` switches direction and discards everything held

use std::fmt;
use std::io::{self, Read, Write};

const READ_CHUNK: usize = 16 * 1024;

/// Which leg of the exchange the buffer currently carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → origin.
    Request,
    /// Origin → client.
    Response,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a read pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Reader returned WouldBlock; wait for the next readable event.
    Drained,
    /// Reader reached EOF.
    Eof,
    /// The stop condition matched the held bytes.
    Stopped,
}

/// How a write pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Writer returned WouldBlock with bytes still pending.
    Pending,
    /// Every held byte has been written.
    Done,
}

/// Failure while filling the buffer.
#[derive(Debug)]
pub enum FillError {
    /// More bytes arrived than the buffer can hold.
    Full,
    Io(io::Error),
}

#[derive(Debug)]
pub struct RelayBuffer {
    data: Vec<u8>,
    capacity: usize,
    sent: usize,
    direction: Direction,
}

impl RelayBuffer {
    /// An empty buffer carrying a request.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
            sent: 0,
            direction: Direction::Request,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Bytes held but not yet written.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.sent
    }

    /// Discard everything and carry `direction` from now on.
    pub fn reset(&mut self, direction: Direction) {
        self.data.clear();
        self.sent = 0;
        self.direction = direction;
    }

    /// Replace the contents with `bytes`, carrying `direction`.
    pub fn load(&mut self, direction: Direction, bytes: &[u8]) -> Result<(), FillError> {
        if bytes.len() > self.capacity {
            return Err(FillError::Full);
        }
        self.reset(direction);
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Read from `src` until it would block, hits EOF, or `until` holds for
    /// the accumulated bytes.
    ///
    /// A request that fills the buffer without satisfying `until` is an
    /// overflow. A full response buffer is probed with a one-byte read so
    /// that an origin closing exactly at capacity still counts as EOF.
    pub fn fill_from<R, F>(&mut self, src: &mut R, until: F) -> Result<Fill, FillError>
    where
        R: Read,
        F: Fn(&[u8]) -> bool,
    {
        loop {
            let start = self.data.len();
            let room = self.capacity - start;

            if room == 0 {
                if self.direction == Direction::Request {
                    return Err(FillError::Full);
                }
                let mut probe = [0u8; 1];
                match src.read(&mut probe) {
                    Ok(0) => return Ok(Fill::Eof),
                    Ok(_) => return Err(FillError::Full),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Fill::Drained),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(FillError::Io(e)),
                }
            }

            self.data.resize(start + room.min(READ_CHUNK), 0);
            match src.read(&mut self.data[start..]) {
                Ok(0) => {
                    self.data.truncate(start);
                    return Ok(Fill::Eof);
                }
                Ok(n) => {
                    self.data.truncate(start + n);
                    if until(&self.data) {
                        return Ok(Fill::Stopped);
                    }
                }
                Err(e) => {
                    self.data.truncate(start);
                    match e.kind() {
                        io::ErrorKind::WouldBlock => return Ok(Fill::Drained),
                        io::ErrorKind::Interrupted => continue,
                        _ => return Err(FillError::Io(e)),
                    }
                }
            }
        }
    }

    /// Write pending bytes to `dst` until done or it would block.
    ///
    /// A write that accepts zero bytes is reported as `WriteZero`.
    pub fn flush_into<W: Write>(&mut self, dst: &mut W) -> io::Result<Flush> {
        while self.sent < self.data.len() {
            match dst.write(&self.data[self.sent..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Flush::Done)
    }
}
