//! Binary entry codec.
//!
//! Encodes one [`WireEntry`] to a byte cursor and decodes it back. The same
//! encoding is used for `.ckmon` files (a sequence of entries terminated by
//! the sentinel control word or raw EOF) and for datagrams (exactly one
//! multicast entry per datagram, no extra framing).
//!
//! Layout, in exact field order (little-endian integer fields):
//! - `control: u16` — low 6 bits level, bits 6-7 entry kind, bits 8-14
//!   presence flags, bit 15 reserved. `0x0000` is the end-of-stream
//!   sentinel.
//! - `timestamp: i64` — UTC microsecond tick
//! - `uniquifier: u8` — only if [`FLAG_UNIQUIFIER`]
//! - line/open-group payload: tag-set canonical string ([`FLAG_TAGS`]) →
//!   file name string + `line: u32` ([`FLAG_SOURCE_LOCATION`]) → exception
//!   record ([`FLAG_EXCEPTION`]) → text string (omitted when
//!   [`FLAG_TEXT_IS_EXCEPTION`]; the text is then the exception message)
//! - close-group payload: `count: u32` ([`FLAG_CONCLUSIONS`]) followed by
//!   `count` (tag-set string, text string) pairs
//! - `monitor_id: [u8; 16]` + `depth: u32` — only if [`FLAG_MULTICAST`],
//!   appended after the payload for all three kinds
//!
//! Strings are a `u32` byte length followed by UTF-8 bytes. An exception
//! record is its message string, a `u32` frame count plus that many frame
//! strings, and a cause byte (0/1) followed by the cause record when 1.
//!
//! Failure policy: EOF while reading the control word is a normal, silent
//! end of stream (`Ok(None)`), which covers streams not terminated by the
//! sentinel. Any failure after a control word has been read is fatal for the
//! stream; the codec never resynchronizes.

use std::io::{ErrorKind, Read, Write};

use chrono::{DateTime, Utc};

use crate::error::{Result, WireError};
use crate::exception::ExceptionRecord;
use crate::tags::TagRegistry;
use crate::types::{
    CloseGroupEntry, Conclusion, Envelope, Level, LineEntry, LogEntry, MonitorId, OpenGroupEntry,
    SourceLocation, WireEntry,
};

/// End-of-stream sentinel control word.
pub const SENTINEL: u16 = 0x0000;

const LEVEL_MASK: u16 = 0x003f;
const KIND_SHIFT: u16 = 6;
const KIND_MASK: u16 = 0b11 << KIND_SHIFT;
const KIND_LINE: u16 = 1;
const KIND_OPEN_GROUP: u16 = 2;
const KIND_CLOSE_GROUP: u16 = 3;

/// Multicast envelope present.
pub const FLAG_MULTICAST: u16 = 1 << 8;
/// Tag set present.
pub const FLAG_TAGS: u16 = 1 << 9;
/// Exception record present.
pub const FLAG_EXCEPTION: u16 = 1 << 10;
/// Text equals the exception message and is elided from the payload.
pub const FLAG_TEXT_IS_EXCEPTION: u16 = 1 << 11;
/// Source location present.
pub const FLAG_SOURCE_LOCATION: u16 = 1 << 12;
/// Uniquifier byte present.
pub const FLAG_UNIQUIFIER: u16 = 1 << 13;
/// Conclusion list present.
pub const FLAG_CONCLUSIONS: u16 = 1 << 14;

const RESERVED_MASK: u16 = 1 << 15;

// Decode-side sanity caps. Entries are small; anything past these bounds is
// a corrupt stream, not a real payload.
const MAX_STRING_LEN: u32 = 1 << 24;
const MAX_LIST_LEN: u32 = 1 << 20;

/// Writes the end-of-stream sentinel.
pub fn write_sentinel(w: &mut impl Write) -> Result<()> {
    w.write_all(&SENTINEL.to_le_bytes())?;
    Ok(())
}

/// Encodes one entry onto the cursor.
pub fn encode(entry: &WireEntry, w: &mut impl Write) -> Result<()> {
    let word = control_word(entry);
    w.write_all(&word.to_le_bytes())?;
    w.write_all(&entry.entry.timestamp().timestamp_micros().to_le_bytes())?;
    if word & FLAG_UNIQUIFIER != 0 {
        w.write_all(&[entry.entry.uniquifier()])?;
    }

    match &entry.entry {
        LogEntry::Line(line) => {
            encode_body(
                w,
                line.tags.as_ref().map(crate::tags::TagSet::canonical),
                line.origin.as_ref(),
                line.exception.as_ref(),
                &line.text,
            )?;
        }
        LogEntry::OpenGroup(open) => {
            encode_body(
                w,
                open.tags.as_ref().map(crate::tags::TagSet::canonical),
                open.origin.as_ref(),
                open.exception.as_ref(),
                &open.text,
            )?;
        }
        LogEntry::CloseGroup(close) => {
            if !close.conclusions.is_empty() {
                write_u32(w, close.conclusions.len() as u32)?;
                for conclusion in &close.conclusions {
                    write_string(w, conclusion.tags.canonical())?;
                    write_string(w, &conclusion.text)?;
                }
            }
        }
    }

    if let Some(envelope) = &entry.envelope {
        w.write_all(envelope.monitor_id.as_bytes())?;
        write_u32(w, envelope.depth)?;
    }
    Ok(())
}

/// Encodes one entry into a fresh buffer (one datagram's worth).
pub fn encode_to_vec(entry: &WireEntry) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    encode(entry, &mut buf)?;
    Ok(buf)
}

/// Decodes the next entry from the cursor.
///
/// Returns `Ok(None)` on the sentinel control word, or on EOF where the next
/// control word would begin.
///
/// # Errors
///
/// Any failure after a control word has been read — truncation, an invalid
/// kind or flag combination, bad UTF-8, an out-of-range timestamp — is fatal
/// for this stream.
pub fn decode(r: &mut impl Read, registry: &TagRegistry) -> Result<Option<WireEntry>> {
    let mut word_bytes = [0_u8; 2];
    match r.read_exact(&mut word_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(WireError::Io(e)),
    }
    let word = u16::from_le_bytes(word_bytes);
    if word == SENTINEL {
        return Ok(None);
    }
    validate_control_word(word)?;

    let level = Level::from_wire((word & LEVEL_MASK) as u8)
        .ok_or_else(|| WireError::Malformed(format!("invalid level {}", word & LEVEL_MASK)))?;
    let micros = i64::from_le_bytes(read_array(r, "timestamp")?);
    let timestamp = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| WireError::Malformed(format!("timestamp out of range: {micros}")))?;
    let uniquifier = if word & FLAG_UNIQUIFIER != 0 {
        read_array::<1>(r, "uniquifier")?[0]
    } else {
        0
    };

    let entry = match (word & KIND_MASK) >> KIND_SHIFT {
        KIND_LINE => {
            let (tags, origin, exception, text) = decode_body(r, registry, word)?;
            LogEntry::Line(LineEntry {
                timestamp,
                uniquifier,
                level,
                text,
                origin,
                tags,
                exception,
            })
        }
        KIND_OPEN_GROUP => {
            let (tags, origin, exception, text) = decode_body(r, registry, word)?;
            LogEntry::OpenGroup(OpenGroupEntry {
                timestamp,
                uniquifier,
                level,
                text,
                origin,
                tags,
                exception,
            })
        }
        KIND_CLOSE_GROUP => {
            let mut conclusions = Vec::new();
            if word & FLAG_CONCLUSIONS != 0 {
                let count = read_u32(r, "conclusion count")?;
                if count == 0 || count > MAX_LIST_LEN {
                    return Err(WireError::Malformed(format!(
                        "conclusion count out of range: {count}"
                    )));
                }
                conclusions.reserve(count as usize);
                for _ in 0..count {
                    let tags = registry.register(&read_string(r, "conclusion tags")?);
                    let text = read_string(r, "conclusion text")?;
                    conclusions.push(Conclusion { tags, text });
                }
            }
            LogEntry::CloseGroup(CloseGroupEntry {
                timestamp,
                uniquifier,
                level,
                conclusions,
            })
        }
        kind => return Err(WireError::Malformed(format!("invalid entry kind {kind}"))),
    };

    let envelope = if word & FLAG_MULTICAST != 0 {
        let monitor_id = MonitorId::from_bytes(read_array(r, "monitor id")?);
        let depth = read_u32(r, "depth")?;
        Some(Envelope { monitor_id, depth })
    } else {
        None
    };

    Ok(Some(WireEntry { entry, envelope }))
}

fn control_word(entry: &WireEntry) -> u16 {
    let mut word = u16::from(entry.entry.level().to_wire()) & LEVEL_MASK;
    if entry.entry.uniquifier() != 0 {
        word |= FLAG_UNIQUIFIER;
    }
    if entry.envelope.is_some() {
        word |= FLAG_MULTICAST;
    }
    match &entry.entry {
        LogEntry::Line(line) => {
            word |= KIND_LINE << KIND_SHIFT;
            word |= body_flags(
                line.tags.is_some(),
                line.origin.is_some(),
                line.exception.as_ref(),
                &line.text,
            );
        }
        LogEntry::OpenGroup(open) => {
            word |= KIND_OPEN_GROUP << KIND_SHIFT;
            word |= body_flags(
                open.tags.is_some(),
                open.origin.is_some(),
                open.exception.as_ref(),
                &open.text,
            );
        }
        LogEntry::CloseGroup(close) => {
            word |= KIND_CLOSE_GROUP << KIND_SHIFT;
            if !close.conclusions.is_empty() {
                word |= FLAG_CONCLUSIONS;
            }
        }
    }
    word
}

fn body_flags(
    has_tags: bool,
    has_origin: bool,
    exception: Option<&ExceptionRecord>,
    text: &str,
) -> u16 {
    let mut flags = 0;
    if has_tags {
        flags |= FLAG_TAGS;
    }
    if has_origin {
        flags |= FLAG_SOURCE_LOCATION;
    }
    if let Some(record) = exception {
        flags |= FLAG_EXCEPTION;
        if record.message == text {
            flags |= FLAG_TEXT_IS_EXCEPTION;
        }
    }
    flags
}

fn validate_control_word(word: u16) -> Result<()> {
    if word & RESERVED_MASK != 0 {
        return Err(WireError::Malformed("reserved control bit set".to_string()));
    }
    if word & FLAG_TEXT_IS_EXCEPTION != 0 && word & FLAG_EXCEPTION == 0 {
        return Err(WireError::Malformed(
            "text-is-exception flag without exception".to_string(),
        ));
    }
    let kind = (word & KIND_MASK) >> KIND_SHIFT;
    let line_only = FLAG_TAGS | FLAG_EXCEPTION | FLAG_TEXT_IS_EXCEPTION | FLAG_SOURCE_LOCATION;
    if kind == KIND_CLOSE_GROUP && word & line_only != 0 {
        return Err(WireError::Malformed(
            "close group carries line-only flags".to_string(),
        ));
    }
    if kind != KIND_CLOSE_GROUP && word & FLAG_CONCLUSIONS != 0 {
        return Err(WireError::Malformed(
            "conclusions flag on a non-close entry".to_string(),
        ));
    }
    Ok(())
}

fn encode_body(
    w: &mut impl Write,
    tags: Option<&str>,
    origin: Option<&SourceLocation>,
    exception: Option<&ExceptionRecord>,
    text: &str,
) -> Result<()> {
    if let Some(canonical) = tags {
        write_string(w, canonical)?;
    }
    if let Some(location) = origin {
        write_string(w, &location.file)?;
        write_u32(w, location.line)?;
    }
    if let Some(record) = exception {
        encode_exception(w, record)?;
    }
    let text_elided = exception.is_some_and(|record| record.message == text);
    if !text_elided {
        write_string(w, text)?;
    }
    Ok(())
}

fn decode_body(
    r: &mut impl Read,
    registry: &TagRegistry,
    word: u16,
) -> Result<(
    Option<crate::tags::TagSet>,
    Option<SourceLocation>,
    Option<ExceptionRecord>,
    String,
)> {
    let tags = if word & FLAG_TAGS != 0 {
        Some(registry.register(&read_string(r, "tags")?))
    } else {
        None
    };
    let origin = if word & FLAG_SOURCE_LOCATION != 0 {
        let file = read_string(r, "file name")?;
        let line = read_u32(r, "line number")?;
        Some(SourceLocation { file, line })
    } else {
        None
    };
    let exception = if word & FLAG_EXCEPTION != 0 {
        Some(decode_exception(r)?)
    } else {
        None
    };
    let text = if word & FLAG_TEXT_IS_EXCEPTION != 0 {
        // Validated: the exception flag is set whenever this one is.
        exception
            .as_ref()
            .map(|record| record.message.clone())
            .unwrap_or_default()
    } else {
        read_string(r, "text")?
    };
    Ok((tags, origin, exception, text))
}

// The chain is written outermost-first as a flat run of records, each ending
// in a has-cause byte. Iterative on both sides so a hostile cause depth
// cannot exhaust the decode stack.
fn encode_exception(w: &mut impl Write, record: &ExceptionRecord) -> Result<()> {
    let mut current = Some(record);
    while let Some(record) = current {
        write_string(w, &record.message)?;
        write_u32(w, record.stack.len() as u32)?;
        for frame in &record.stack {
            write_string(w, frame)?;
        }
        w.write_all(&[u8::from(record.cause.is_some())])?;
        current = record.cause.as_deref();
    }
    Ok(())
}

fn decode_exception(r: &mut impl Read) -> Result<ExceptionRecord> {
    let mut records = Vec::new();
    loop {
        let message = read_string(r, "exception message")?;
        let frame_count = read_u32(r, "stack frame count")?;
        if frame_count > MAX_LIST_LEN {
            return Err(WireError::Malformed(format!(
                "stack frame count out of range: {frame_count}"
            )));
        }
        let mut stack = Vec::with_capacity(frame_count as usize);
        for _ in 0..frame_count {
            stack.push(read_string(r, "stack frame")?);
        }
        records.push(ExceptionRecord {
            message,
            stack,
            cause: None,
        });
        if records.len() as u32 > MAX_LIST_LEN {
            return Err(WireError::Malformed("exception chain too long".to_string()));
        }
        let has_cause = read_array::<1>(r, "cause marker")?[0];
        match has_cause {
            0 => break,
            1 => {}
            other => {
                return Err(WireError::Malformed(format!("invalid cause marker {other}")));
            }
        }
    }

    let mut chain = None;
    while let Some(mut record) = records.pop() {
        record.cause = chain.map(Box::new);
        chain = Some(record);
    }
    // The loop above always pushes at least one record.
    chain.ok_or_else(|| WireError::Malformed("empty exception chain".to_string()))
}

fn write_u32(w: &mut impl Write, value: u32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_string(w: &mut impl Write, s: &str) -> Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_array<const N: usize>(r: &mut impl Read, what: &'static str) -> Result<[u8; N]> {
    let mut buf = [0_u8; N];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            WireError::Truncated(what)
        } else {
            WireError::Io(e)
        }
    })?;
    Ok(buf)
}

fn read_u32(r: &mut impl Read, what: &'static str) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(r, what)?))
}

fn read_string(r: &mut impl Read, what: &'static str) -> Result<String> {
    let len = read_u32(r, what)?;
    if len > MAX_STRING_LEN {
        return Err(WireError::Malformed(format!(
            "{what} length out of range: {len}"
        )));
    }
    let mut buf = vec![0_u8; len as usize];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            WireError::Truncated(what)
        } else {
            WireError::Io(e)
        }
    })?;
    String::from_utf8(buf).map_err(|e| WireError::Malformed(format!("{what}: {e}")))
}
