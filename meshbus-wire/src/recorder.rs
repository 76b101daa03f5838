//! The metadata replay file.
//!
//! A compact append-only record of every message an endpoint published,
//! meant for offline replay tooling. Topics are interned on first use and
//! referenced by 16-bit ids afterwards.
//!
//! Layout: a fixed header (`MAGIC`, `VERSION`), then entries of
//! `entry type (u8)` followed by a type-specific body:
//! - `new_topic`: `u16` id, length-prefixed topic string
//! - `data_message` / `command_message`: `u16` topic id, encoded body

use crate::codec::{self, Result, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshbus_core::message::{DataMessage, Payload};
use meshbus_core::status::CoreObserver;
use meshbus_core::topic::Topic;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::warn;

/// File format marker.
pub const MAGIC: u32 = 0x2EEC_C0DE;

/// Current format version.
pub const VERSION: u8 = 1;

const ENTRY_NEW_TOPIC: u8 = 0;
const ENTRY_DATA_MESSAGE: u8 = 1;
const ENTRY_COMMAND_MESSAGE: u8 = 2;

/// Default number of buffered bytes before an automatic flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4096;

/// Appends published messages to a metadata file.
pub struct MetaFileWriter {
    file: File,
    buf: BytesMut,
    topic_table: Vec<Topic>,
    flush_threshold: usize,
}

impl MetaFileWriter {
    /// Creates (truncating) the file and writes the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        let mut buf = BytesMut::new();
        buf.put_u32(MAGIC);
        buf.put_u8(VERSION);
        Ok(Self {
            file,
            buf,
            topic_table: Vec::new(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        })
    }

    #[must_use]
    pub const fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    pub fn set_flush_threshold(&mut self, bytes: usize) {
        self.flush_threshold = bytes;
    }

    /// Appends one message, interning its topic if needed.
    pub fn write(&mut self, msg: &DataMessage) -> Result<()> {
        let id = self.topic_id(&msg.topic)?;
        match &msg.payload {
            Payload::Data(value) => {
                self.buf.put_u8(ENTRY_DATA_MESSAGE);
                self.buf.put_u16(id);
                codec::put_data(value, &mut self.buf)?;
            }
            Payload::Command(command) => {
                self.buf.put_u8(ENTRY_COMMAND_MESSAGE);
                self.buf.put_u16(id);
                codec::put_command(command, &mut self.buf)?;
            }
        }
        if self.buf.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes buffered entries out.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.file.flush()?;
        Ok(())
    }

    fn topic_id(&mut self, topic: &Topic) -> Result<u16> {
        if let Some(at) = self.topic_table.iter().position(|t| t == topic) {
            return Ok(at as u16);
        }
        if self.topic_table.len() > usize::from(u16::MAX) {
            return Err(WireError::TopicTableFull);
        }
        let id = self.topic_table.len() as u16;
        self.topic_table.push(topic.clone());
        self.buf.put_u8(ENTRY_NEW_TOPIC);
        self.buf.put_u16(id);
        codec::put_string(topic.as_str(), &mut self.buf)?;
        Ok(id)
    }
}

impl Drop for MetaFileWriter {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            warn!(%error, "failed to flush metadata file");
        }
    }
}

impl CoreObserver for MetaFileWriter {
    fn on_message(&mut self, msg: &DataMessage) {
        if let Err(error) = self.write(msg) {
            warn!(%error, "failed to record message");
        }
    }

    fn on_terminated(&mut self) {
        let _ = self.flush();
    }
}

/// Replays a metadata file.
pub struct MetaFileReader {
    src: Bytes,
    topic_table: Vec<Topic>,
}

impl MetaFileReader {
    /// Opens a file and validates its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut raw = Vec::new();
        File::open(path)?.read_to_end(&mut raw)?;
        let mut src = Bytes::from(raw);
        if src.remaining() < 5 || src.get_u32() != MAGIC || src.get_u8() != VERSION {
            return Err(WireError::BadHeader);
        }
        Ok(Self {
            src,
            topic_table: Vec::new(),
        })
    }

    /// Reads the next recorded message, resolving interned topics.
    pub fn next_message(&mut self) -> Result<Option<DataMessage>> {
        loop {
            if !self.src.has_remaining() {
                return Ok(None);
            }
            match self.src.get_u8() {
                ENTRY_NEW_TOPIC => {
                    let id = usize::from(self.read_u16()?);
                    let topic = Topic::from(codec::get_string(&mut self.src)?);
                    if id != self.topic_table.len() {
                        return Err(WireError::BadHeader);
                    }
                    self.topic_table.push(topic);
                }
                ENTRY_DATA_MESSAGE => {
                    let topic = self.lookup_topic()?;
                    let value = codec::get_data(&mut self.src)?;
                    return Ok(Some(DataMessage::data(topic, value)));
                }
                ENTRY_COMMAND_MESSAGE => {
                    let topic = self.lookup_topic()?;
                    let command = codec::get_command(&mut self.src)?;
                    return Ok(Some(DataMessage::command(topic, command)));
                }
                other => return Err(WireError::UnknownTag(other)),
            }
        }
    }

    /// Reads the whole file into memory.
    pub fn replay(mut self) -> Result<Vec<DataMessage>> {
        let mut out = Vec::new();
        while let Some(msg) = self.next_message()? {
            out.push(msg);
        }
        Ok(out)
    }

    fn lookup_topic(&mut self) -> Result<Topic> {
        let id = usize::from(self.read_u16()?);
        self.topic_table
            .get(id)
            .cloned()
            .ok_or(WireError::BadHeader)
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.src.remaining() < 2 {
            return Err(WireError::Truncated);
        }
        Ok(self.src.get_u16())
    }
}
