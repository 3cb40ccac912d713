//! The wire decoder: a typed [`Source`] on top of a [`ByteSource`].
//!
//! The decoder parses tags, looks each field number up in the current
//! message descriptor, and hands typed values to the caller on demand.
//! Submessages and groups become stack frames; the caller enters them with
//! `start_message` and may leave early with `end_message`, in which case
//! the decoder skips to the frame's end on its own.

use std::mem;
use std::sync::Arc;

use log::trace;

use crate::bytestr::ByteString;
use crate::descriptor::{DescriptorPool, FieldType, Label, MessageIndex};
use crate::encoding::{peek_varint, split_key, WireType};
use crate::error::{Error, ErrorCode, Result};
use crate::stream::{ByteSource, FieldInfo, Source, Value};
use crate::DEFAULT_NESTING_LIMIT;

#[derive(Clone, Copy)]
enum FrameKind {
    Root,
    Delimited { end: u64 },
    Group { number: u32, done: bool },
}

struct Frame {
    msg: MessageIndex,
    kind: FrameKind,
}

/// What the most recent `next_field` left for the caller to consume.
enum Pending {
    None,
    Scalar { field_type: FieldType },
    Str { len: u64 },
    Message { len: u64, msg: MessageIndex },
    Group { number: u32, msg: MessageIndex },
}

struct PackedRun {
    info: FieldInfo,
    end: u64,
}

pub struct Decoder<B> {
    pool: Arc<DescriptorPool>,
    src: B,
    // Buffered region of the stream; `base` is its absolute offset and
    // `pos` the absolute cursor. `pos` never moves backwards.
    window: ByteString,
    base: u64,
    pos: u64,
    frames: Vec<Frame>,
    max_depth: usize,
    pending: Pending,
    packed: Option<PackedRun>,
    eof: bool,
}

impl<B: ByteSource> Decoder<B> {
    /// A decoder positioned at the start of a `root`-typed message.
    pub fn new(pool: Arc<DescriptorPool>, root: MessageIndex, src: B) -> Decoder<B> {
        Decoder {
            pool,
            src,
            window: ByteString::new(),
            base: 0,
            pos: 0,
            frames: vec![Frame {
                msg: root,
                kind: FrameKind::Root,
            }],
            max_depth: DEFAULT_NESTING_LIMIT,
            pending: Pending::None,
            packed: None,
            eof: false,
        }
    }

    /// Overrides the maximum submessage/group nesting depth.
    pub fn with_nesting_limit(mut self, limit: usize) -> Decoder<B> {
        self.max_depth = limit;
        self
    }

    /// The absolute byte offset of the cursor.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn rel(&self) -> usize {
        (self.pos - self.base) as usize
    }

    fn avail(&self) -> usize {
        self.window.len() - self.rel()
    }

    fn bytes(&self) -> &[u8] {
        &self.window.as_bytes()[self.rel()..]
    }

    /// Grows the window until `need` bytes are available from the cursor or
    /// the stream ends. Returns the bytes actually available.
    fn refill(&mut self, need: usize) -> Result<usize> {
        while self.avail() < need {
            let got = if self.rel() == self.window.len() {
                self.base = self.pos;
                self.src.pull(&mut self.window, need)?
            } else {
                let short = need - self.avail();
                self.src.extend(&mut self.window, short)?
            };
            if got == 0 {
                break;
            }
        }
        Ok(self.avail())
    }

    fn ensure(&mut self, need: usize) -> Result<()> {
        if self.refill(need)? < need {
            return Err(Error::new(
                ErrorCode::PrematureEof,
                "input ended inside a value",
            ));
        }
        Ok(())
    }

    /// Reads one varint, refilling as needed. `Ok(None)` means the stream
    /// ended cleanly before the first byte.
    fn read_varint_opt(&mut self) -> Result<Option<u64>> {
        loop {
            if let Some((value, len)) = peek_varint(self.bytes())? {
                self.pos += len as u64;
                return Ok(Some(value));
            }
            let have = self.avail();
            if self.refill(have + 1)? == have {
                if have == 0 {
                    return Ok(None);
                }
                return Err(Error::new(
                    ErrorCode::UnterminatedVarint,
                    "varint continues past end of input",
                ));
            }
        }
    }

    fn read_varint(&mut self) -> Result<u64> {
        self.read_varint_opt()?.ok_or_else(|| {
            Error::new(ErrorCode::PrematureEof, "expected varint, found end of input")
        })
    }

    /// The nearest enclosing length-delimited bound. Groups and the root
    /// frame are unbounded.
    fn parent_end(&self) -> u64 {
        for frame in self.frames.iter().rev() {
            if let FrameKind::Delimited { end } = frame.kind {
                return end;
            }
        }
        u64::MAX
    }

    /// The absolute end of a `len`-byte delimited region starting at the
    /// cursor. A declared length is attacker-controlled and a varint may
    /// decode to `u64::MAX`, so the region is checked against the
    /// enclosing bound without ever adding `len` to an unchecked sum.
    fn delimited_end(&self, len: u64) -> Result<u64> {
        match self.pos.checked_add(len) {
            Some(end) if end <= self.parent_end() => Ok(end),
            _ => Err(exceeds_parent()),
        }
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("root frame is never popped")
    }

    fn check_depth(&self) -> Result<()> {
        if self.frames.len() - 1 >= self.max_depth {
            return Err(Error::new(
                ErrorCode::NestingOverflow,
                "submessage nesting exceeds the configured limit",
            ));
        }
        Ok(())
    }

    /// Advances the cursor to `target`, pulling the stream as needed.
    fn skip_to(&mut self, target: u64) -> Result<()> {
        while self.pos < target {
            let step = ((target - self.pos) as usize).min(self.avail());
            if step == 0 {
                if self.refill(1)? == 0 {
                    return Err(Error::new(
                        ErrorCode::PrematureEof,
                        "input ended inside a skipped region",
                    ));
                }
                continue;
            }
            self.pos += step as u64;
        }
        Ok(())
    }

    /// Skips one non-group value of the given wire type.
    fn skip_value_of(&mut self, wire: WireType) -> Result<()> {
        match wire {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::SixtyFourBit => {
                self.ensure(8)?;
                self.pos += 8;
            }
            WireType::ThirtyTwoBit => {
                self.ensure(4)?;
                self.pos += 4;
            }
            WireType::LengthDelimited => {
                let len = self.read_varint()?;
                let end = self.delimited_end(len)?;
                self.skip_to(end)?;
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    "group tags have no single-value skip",
                ))
            }
        }
        Ok(())
    }

    /// Scans forward over a group's contents until its matching END_GROUP
    /// tag, descending into nested groups.
    fn skip_group(&mut self, number: u32) -> Result<()> {
        let mut open = vec![number];
        while let Some(&current) = open.last() {
            let (num, wire) = split_key(self.read_varint()?)?;
            match wire {
                WireType::EndGroup => {
                    if num != current {
                        return Err(Error::new(
                            ErrorCode::GroupMismatch,
                            format!("group {} terminated by end-group {}", current, num),
                        ));
                    }
                    open.pop();
                }
                WireType::StartGroup => {
                    if open.len() >= self.max_depth {
                        return Err(Error::new(
                            ErrorCode::NestingOverflow,
                            "group nesting exceeds the configured limit",
                        ));
                    }
                    open.push(num);
                }
                _ => self.skip_value_of(wire)?,
            }
        }
        Ok(())
    }

    /// Consumes whatever the last `next_field` yielded, if the caller
    /// didn't.
    fn drain_pending(&mut self) -> Result<()> {
        match mem::replace(&mut self.pending, Pending::None) {
            Pending::None => Ok(()),
            Pending::Scalar { field_type } => match field_type.wire_type() {
                WireType::Varint => self.read_varint().map(drop),
                WireType::SixtyFourBit => {
                    self.ensure(8)?;
                    self.pos += 8;
                    Ok(())
                }
                WireType::ThirtyTwoBit => {
                    self.ensure(4)?;
                    self.pos += 4;
                    Ok(())
                }
                _ => unreachable!("scalar pending is always a scalar wire type"),
            },
            Pending::Str { len } | Pending::Message { len, .. } => self.skip_to(self.pos + len),
            Pending::Group { number, .. } => self.skip_group(number),
        }
    }

    fn next_field_inner(&mut self) -> Result<Option<FieldInfo>> {
        self.drain_pending()?;
        loop {
            if let Some(run) = &self.packed {
                if self.pos < run.end {
                    let info = run.info;
                    self.pending = Pending::Scalar {
                        field_type: info.field_type,
                    };
                    return Ok(Some(info));
                }
                if self.pos > run.end {
                    return Err(Error::new(
                        ErrorCode::SubmessageExceedsParent,
                        "packed element overran its delimiter",
                    ));
                }
                self.packed = None;
            }

            match self.top().kind {
                FrameKind::Delimited { end } => {
                    if self.pos == end {
                        self.eof = true;
                        return Ok(None);
                    }
                    if self.pos > end {
                        return Err(exceeds_parent());
                    }
                }
                FrameKind::Group { done: true, .. } => {
                    self.eof = true;
                    return Ok(None);
                }
                _ => {}
            }

            let key = match self.read_varint_opt()? {
                Some(key) => key,
                None => {
                    if matches!(self.top().kind, FrameKind::Root) {
                        self.eof = true;
                        return Ok(None);
                    }
                    return Err(Error::new(
                        ErrorCode::PrematureEof,
                        "input ended inside a submessage",
                    ));
                }
            };
            let (number, wire) = split_key(key)?;

            if wire == WireType::EndGroup {
                match &mut self
                    .frames
                    .last_mut()
                    .expect("root frame is never popped")
                    .kind
                {
                    FrameKind::Group { number: open, done } if *open == number => {
                        *done = true;
                        self.eof = true;
                        return Ok(None);
                    }
                    FrameKind::Group { number: open, .. } => {
                        return Err(Error::new(
                            ErrorCode::GroupMismatch,
                            format!("group {} terminated by end-group {}", open, number),
                        ));
                    }
                    _ => {
                        return Err(Error::new(
                            ErrorCode::GroupMismatch,
                            "end-group tag outside any group",
                        ));
                    }
                }
            }

            let msg = self.top().msg;
            let looked_up = {
                let message = self.pool.message(msg);
                message
                    .field_by_number(number)
                    .map(|field| (FieldInfo::from(field), field.message_type()))
            };
            let Some((info, target)) = looked_up else {
                trace!("skipping unknown field {} ({:?})", number, wire);
                match wire {
                    WireType::StartGroup => self.skip_group(number)?,
                    _ => self.skip_value_of(wire)?,
                }
                continue;
            };

            let expected = info.field_type.wire_type();
            if wire == expected {
                match wire {
                    WireType::Varint | WireType::SixtyFourBit | WireType::ThirtyTwoBit => {
                        self.pending = Pending::Scalar {
                            field_type: info.field_type,
                        };
                    }
                    WireType::LengthDelimited => {
                        let len = self.read_varint()?;
                        self.delimited_end(len)?;
                        self.pending = match info.field_type {
                            FieldType::Message => Pending::Message {
                                len,
                                msg: target.ok_or_else(unresolved_target)?,
                            },
                            _ => Pending::Str { len },
                        };
                    }
                    WireType::StartGroup => {
                        self.pending = Pending::Group {
                            number,
                            msg: target.ok_or_else(unresolved_target)?,
                        };
                    }
                    WireType::EndGroup => unreachable!("handled above"),
                }
                return Ok(Some(info));
            }

            // The one permitted mismatch: a packable repeated field may
            // arrive as a single length-delimited run.
            if wire == WireType::LengthDelimited
                && info.label == Label::Repeated
                && info.field_type.is_packable()
            {
                let len = self.read_varint()?;
                let end = self.delimited_end(len)?;
                if len == 0 {
                    continue;
                }
                self.packed = Some(PackedRun { info, end });
                self.pending = Pending::Scalar {
                    field_type: info.field_type,
                };
                return Ok(Some(info));
            }

            return Err(Error::new(
                ErrorCode::BadWireType,
                format!(
                    "field {} declared {:?} but encoded as {:?}",
                    number, info.field_type, wire
                ),
            ));
        }
    }
}

#[cold]
fn exceeds_parent() -> Error {
    Error::new(
        ErrorCode::SubmessageExceedsParent,
        "length-delimited region extends beyond its enclosing message",
    )
}

#[cold]
fn unresolved_target() -> Error {
    Error::new(
        ErrorCode::BadReference,
        "message field has no resolved target type",
    )
}

impl<B: ByteSource> Source for Decoder<B> {
    fn next_field(&mut self) -> Result<Option<FieldInfo>> {
        self.next_field_inner()
    }

    fn value(&mut self) -> Result<Value> {
        let field_type = match mem::replace(&mut self.pending, Pending::None) {
            Pending::Scalar { field_type } => field_type,
            other => {
                self.pending = other;
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    "no scalar value is pending; call next_field first",
                ));
            }
        };
        match field_type.wire_type() {
            WireType::Varint => {
                let raw = self.read_varint()?;
                Value::from_varint(field_type, raw)
            }
            WireType::SixtyFourBit => {
                self.ensure(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.bytes()[..8]);
                self.pos += 8;
                Value::from_fixed64(field_type, u64::from_le_bytes(raw))
            }
            WireType::ThirtyTwoBit => {
                self.ensure(4)?;
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&self.bytes()[..4]);
                self.pos += 4;
                Value::from_fixed32(field_type, u32::from_le_bytes(raw))
            }
            _ => Err(Error::new(
                ErrorCode::BadWireType,
                format!("{:?} is not a scalar type", field_type),
            )),
        }
    }

    fn string(&mut self) -> Result<ByteString> {
        let len = match mem::replace(&mut self.pending, Pending::None) {
            Pending::Str { len } => len,
            // A submessage may be fetched raw for pass-through.
            Pending::Message { len, .. } => len,
            other => {
                self.pending = other;
                return Err(Error::new(
                    ErrorCode::BadWireType,
                    "no length-delimited value is pending; call next_field first",
                ));
            }
        };
        let len = len as usize;
        self.ensure(len)?;
        let start = self.rel();
        let bytes = self.window.share_slice(start, start + len);
        self.pos += len as u64;
        Ok(bytes)
    }

    fn skip(&mut self) -> Result<()> {
        self.drain_pending()
    }

    fn start_message(&mut self) -> Result<()> {
        match mem::replace(&mut self.pending, Pending::None) {
            Pending::Message { len, msg } => {
                self.check_depth()?;
                trace!(
                    "entering submessage {} ({} bytes)",
                    self.pool.message(msg).name(),
                    len
                );
                self.frames.push(Frame {
                    msg,
                    kind: FrameKind::Delimited {
                        end: self.pos + len,
                    },
                });
                Ok(())
            }
            Pending::Group { number, msg } => {
                self.check_depth()?;
                trace!(
                    "entering group {} ({})",
                    number,
                    self.pool.message(msg).name()
                );
                self.frames.push(Frame {
                    msg,
                    kind: FrameKind::Group {
                        number,
                        done: false,
                    },
                });
                Ok(())
            }
            other => {
                self.pending = other;
                Err(Error::new(
                    ErrorCode::BadWireType,
                    "start_message without a pending submessage or group field",
                ))
            }
        }
    }

    fn end_message(&mut self) -> Result<()> {
        if self.frames.len() == 1 {
            return Err(Error::new(
                ErrorCode::BadWireType,
                "end_message at the top level",
            ));
        }
        self.drain_pending()?;
        let frame = self.frames.pop().expect("root frame is never popped");
        match frame.kind {
            FrameKind::Delimited { end } => self.skip_to(end)?,
            FrameKind::Group { done: true, .. } => {}
            FrameKind::Group {
                number,
                done: false,
            } => self.skip_group(number)?,
            FrameKind::Root => unreachable!("guarded above"),
        }
        self.packed = None;
        self.eof = false;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.eof
    }
}
