//! The resumable push parser.
//!
//! Where the [`Decoder`](crate::Decoder) lets the consumer pull, the
//! [`Parser`] drives consumer callbacks: one [`Events::tag`] per wire
//! element, then exactly one of `value`, `string`, or the
//! `submsg_start`/`submsg_end` bracket. The consumer decides per tag
//! whether to parse (returning the declared type) or to skip (returning
//! `None`); wire/declared compatibility is the consumer's lookout, checked
//! here only far enough to keep the engine itself sound.
//!
//! `parse` never consumes a partial wire element, so it can be re-invoked
//! with the unconsumed tail plus more data at any split point. The one
//! exception is a length-delimited string payload, which may stream across
//! calls: the parser accumulates it and fires the `string` callback once,
//! handing over a buffer that aliases the input when the payload arrived
//! in one piece and an owned copy when it straddled a boundary.

use std::mem;

use bytes::Bytes;

use crate::bytestr::ByteString;
use crate::descriptor::FieldType;
use crate::encoding::{peek_key, peek_varint, WireType};
use crate::error::{Error, ErrorCode, Result};
use crate::stream::Value;
use crate::DEFAULT_NESTING_LIMIT;

/// Consumer callbacks. `Frame` is the per-depth user data: one slot per
/// nesting level, allocated once when the parser is built and reused
/// across submessage enter/leave. The parser does not clear a slot on
/// entry; initialize it in `submsg_start` if the previous tenant's state
/// matters.
pub trait Events {
    type Frame: Default;

    /// Decides the fate of the field: `Some(declared_type)` to parse its
    /// value, `None` to skip it.
    fn tag(
        &mut self,
        frame: &mut Self::Frame,
        number: u32,
        wire_type: WireType,
    ) -> Result<Option<FieldType>>;

    /// One scalar value; for packed runs, once per packed element.
    fn value(&mut self, frame: &mut Self::Frame, value: Value) -> Result<()>;

    /// One length-delimited string or bytes payload.
    fn string(&mut self, frame: &mut Self::Frame, bytes: ByteString) -> Result<()>;

    /// Brackets every submessage and group.
    fn submsg_start(&mut self, frame: &mut Self::Frame) -> Result<()>;

    fn submsg_end(&mut self, frame: &mut Self::Frame) -> Result<()>;
}

#[derive(Clone, Copy)]
enum FrameKind {
    Delimited { end: u64 },
    Group { number: u32 },
}

struct Frame {
    kind: FrameKind,
    // Events are suppressed inside frames opened for unknown groups.
    skipping: bool,
}

/// Payload state carried across `parse` calls.
enum Pending {
    /// Unknown delimited field being discarded.
    Skip { remaining: u64 },
    /// String payload being accumulated.
    Str { remaining: u64, buf: ByteString },
}

pub struct Parser<F> {
    offset: u64,
    frames: Vec<Frame>,
    slab: Vec<F>,
    max_depth: usize,
    packed: Option<(FieldType, u64)>,
    pending: Option<Pending>,
}

impl<F: Default> Parser<F> {
    /// A parser for one top-level message, with the per-depth user-data
    /// slab allocated up front.
    pub fn new(max_depth: usize) -> Parser<F> {
        let mut slab = Vec::with_capacity(max_depth + 1);
        slab.resize_with(max_depth + 1, F::default);
        Parser {
            offset: 0,
            frames: Vec::with_capacity(max_depth),
            slab,
            max_depth,
            packed: None,
            pending: None,
        }
    }

    /// The absolute stream offset consumed so far.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Current submessage/group depth.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The user-data slot for the current depth.
    pub fn frame_data(&mut self) -> &mut F {
        &mut self.slab[self.frames.len()]
    }

    /// Rewinds the parser for an unrelated message. The slab is kept
    /// allocated; slot contents are left to the consumer.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.frames.clear();
        self.packed = None;
        self.pending = None;
    }

    /// Consumes wire elements from `input`, firing callbacks, until the
    /// input is exhausted or an element is split across the boundary.
    /// Returns the number of bytes consumed; re-invoke with the
    /// unconsumed tail plus more data to resume.
    pub fn parse<E: Events<Frame = F>>(
        &mut self,
        input: &Bytes,
        events: &mut E,
    ) -> Result<usize> {
        let len = input.len();
        let mut pos = 0usize;

        loop {
            // Drain a payload left over from the previous call.
            if let Some(pending) = &mut self.pending {
                let avail = (len - pos) as u64;
                match pending {
                    Pending::Skip { remaining } => {
                        let take = (*remaining).min(avail);
                        pos += take as usize;
                        self.offset += take;
                        *remaining -= take;
                        if *remaining > 0 {
                            return Ok(pos);
                        }
                    }
                    Pending::Str { remaining, buf } => {
                        let take = (*remaining).min(avail) as usize;
                        buf.append(&input[pos..pos + take])?;
                        pos += take;
                        self.offset += take as u64;
                        *remaining -= take as u64;
                        if *remaining > 0 {
                            return Ok(pos);
                        }
                        let bytes = mem::take(buf);
                        let depth = self.frames.len();
                        events.string(&mut self.slab[depth], bytes)?;
                    }
                }
                self.pending = None;
            }

            // A packed run that has reached its delimiter is over.
            if let Some((_, end)) = self.packed {
                if self.offset == end {
                    self.packed = None;
                }
            }

            // Close every delimited frame ending here.
            loop {
                let (end, skipping) = match self.frames.last() {
                    Some(Frame {
                        kind: FrameKind::Delimited { end },
                        skipping,
                    }) => (*end, *skipping),
                    _ => break,
                };
                if self.offset != end {
                    break;
                }
                let depth = self.frames.len();
                if !skipping {
                    events.submsg_end(&mut self.slab[depth])?;
                }
                self.frames.pop();
            }

            if pos == len {
                return Ok(pos);
            }

            // One element of an in-progress packed run.
            if let Some((elem, end)) = self.packed {
                let room = end - self.offset;
                let depth = self.frames.len();
                match self.packed_element(&input[pos..], room, elem)? {
                    None => return Ok(pos),
                    Some((value, consumed)) => {
                        events.value(&mut self.slab[depth], value)?;
                        pos += consumed;
                        self.offset += consumed as u64;
                    }
                }
                continue;
            }

            let Some((number, wire, key_len)) = peek_key(&input[pos..])? else {
                return Ok(pos);
            };

            if wire == WireType::EndGroup {
                let open = match self.frames.last() {
                    Some(Frame {
                        kind: FrameKind::Group { number: open },
                        skipping,
                    }) => Some((*open, *skipping)),
                    _ => None,
                };
                let Some((open, skipping)) = open else {
                    return Err(Error::new(
                        ErrorCode::GroupMismatch,
                        "end-group tag outside any group",
                    ));
                };
                if open != number {
                    return Err(Error::new(
                        ErrorCode::GroupMismatch,
                        format!("group {} terminated by end-group {}", open, number),
                    ));
                }
                let depth = self.frames.len();
                if !skipping {
                    events.submsg_end(&mut self.slab[depth])?;
                }
                self.frames.pop();
                pos += key_len;
                self.offset += key_len as u64;
                continue;
            }

            let skipping = self.frames.last().map_or(false, |frame| frame.skipping);
            let rest = &input[pos + key_len..];

            match wire {
                WireType::Varint => {
                    let Some((raw, value_len)) = peek_varint(rest)? else {
                        return Ok(pos);
                    };
                    let declared = self.field_fate(events, skipping, number, wire)?;
                    pos += key_len + value_len;
                    self.offset += (key_len + value_len) as u64;
                    if let Some(field_type) = declared {
                        let value = Value::from_varint(field_type, raw)?;
                        let depth = self.frames.len();
                        events.value(&mut self.slab[depth], value)?;
                    }
                }
                WireType::SixtyFourBit | WireType::ThirtyTwoBit => {
                    let width = if wire == WireType::SixtyFourBit { 8 } else { 4 };
                    if rest.len() < width {
                        return Ok(pos);
                    }
                    let declared = self.field_fate(events, skipping, number, wire)?;
                    if let Some(field_type) = declared {
                        let value = fixed_value(field_type, &rest[..width])?;
                        let depth = self.frames.len();
                        events.value(&mut self.slab[depth], value)?;
                    }
                    pos += key_len + width;
                    self.offset += (key_len + width) as u64;
                }
                WireType::StartGroup => {
                    let declared = self.field_fate(events, skipping, number, wire)?;
                    pos += key_len;
                    self.offset += key_len as u64;
                    match declared {
                        None => self.push_frame(
                            FrameKind::Group { number },
                            true,
                            events,
                        )?,
                        Some(FieldType::Group) => self.push_frame(
                            FrameKind::Group { number },
                            false,
                            events,
                        )?,
                        Some(other) => {
                            return Err(Error::new(
                                ErrorCode::BadWireType,
                                format!("{:?} cannot be parsed from a group", other),
                            ));
                        }
                    }
                }
                WireType::LengthDelimited => {
                    let Some((payload_len, len_len)) = peek_varint(rest)? else {
                        return Ok(pos);
                    };
                    let declared = self.field_fate(events, skipping, number, wire)?;
                    pos += key_len + len_len;
                    self.offset += (key_len + len_len) as u64;
                    // The declared length is attacker-controlled and a
                    // varint may decode to u64::MAX; never add it to the
                    // offset before the bound has been established.
                    let payload_end = match self.offset.checked_add(payload_len) {
                        Some(end) if end <= self.enclosing_end() => end,
                        _ => {
                            return Err(Error::new(
                                ErrorCode::SubmessageExceedsParent,
                                "length-delimited region extends beyond its enclosing message",
                            ));
                        }
                    };
                    match declared {
                        None => {
                            self.pending = Some(Pending::Skip {
                                remaining: payload_len,
                            });
                        }
                        Some(FieldType::Message) => {
                            self.push_frame(
                                FrameKind::Delimited { end: payload_end },
                                false,
                                events,
                            )?;
                        }
                        Some(FieldType::Group) => {
                            return Err(Error::new(
                                ErrorCode::BadWireType,
                                "group field encoded as length-delimited",
                            ));
                        }
                        Some(FieldType::String) | Some(FieldType::Bytes) => {
                            let avail = (len - pos) as u64;
                            if payload_len <= avail {
                                // Whole payload in hand: alias the input.
                                let take = payload_len as usize;
                                let bytes =
                                    ByteString::from(input.slice(pos..pos + take));
                                pos += take;
                                self.offset += payload_len;
                                let depth = self.frames.len();
                                events.string(&mut self.slab[depth], bytes)?;
                            } else {
                                self.pending = Some(Pending::Str {
                                    remaining: payload_len,
                                    buf: ByteString::new(),
                                });
                            }
                        }
                        Some(packable) => {
                            // A scalar declared type under a DELIMITED wire
                            // is a packed run.
                            self.packed = Some((packable, payload_end));
                        }
                    }
                }
                WireType::EndGroup => unreachable!("handled above"),
            }
        }
    }

    /// Declares the end of input. Errors if the stream stopped mid-element
    /// (pass any unconsumed tail) or inside an open submessage.
    pub fn finish(&mut self, tail: &[u8]) -> Result<()> {
        if !tail.is_empty() {
            return Err(classify_tail(tail));
        }
        if self.pending.is_some() || self.packed.is_some() {
            return Err(Error::new(
                ErrorCode::PrematureEof,
                "input ended inside a length-delimited field",
            ));
        }
        if !self.frames.is_empty() {
            return Err(Error::new(
                ErrorCode::PrematureEof,
                "input ended inside an open submessage or group",
            ));
        }
        Ok(())
    }

    fn enclosing_end(&self) -> u64 {
        for frame in self.frames.iter().rev() {
            if let FrameKind::Delimited { end } = frame.kind {
                return end;
            }
        }
        u64::MAX
    }

    fn push_frame<E: Events<Frame = F>>(
        &mut self,
        kind: FrameKind,
        skipping: bool,
        events: &mut E,
    ) -> Result<()> {
        if self.frames.len() >= self.max_depth {
            return Err(Error::new(
                ErrorCode::NestingOverflow,
                "submessage nesting exceeds the configured limit",
            ));
        }
        self.frames.push(Frame { kind, skipping });
        if !skipping {
            let depth = self.frames.len();
            events.submsg_start(&mut self.slab[depth])?;
        }
        Ok(())
    }

    fn field_fate<E: Events<Frame = F>>(
        &mut self,
        events: &mut E,
        skipping: bool,
        number: u32,
        wire: WireType,
    ) -> Result<Option<FieldType>> {
        if skipping {
            return Ok(None);
        }
        let depth = self.frames.len();
        events.tag(&mut self.slab[depth], number, wire)
    }

    /// Decodes one element of a packed run, bounded by both the available
    /// input and the run delimiter. `Ok(None)` asks for more input.
    fn packed_element(
        &self,
        input: &[u8],
        room: u64,
        elem: FieldType,
    ) -> Result<Option<(Value, usize)>> {
        match elem.wire_type() {
            WireType::Varint => {
                let bounded = &input[..input.len().min(room as usize).min(10)];
                match peek_varint(bounded)? {
                    Some((raw, consumed)) => {
                        Ok(Some((Value::from_varint(elem, raw)?, consumed)))
                    }
                    None if (bounded.len() as u64) < room => Ok(None),
                    None => Err(Error::new(
                        ErrorCode::SubmessageExceedsParent,
                        "packed element overran its delimiter",
                    )),
                }
            }
            WireType::SixtyFourBit | WireType::ThirtyTwoBit => {
                let width = if elem.wire_type() == WireType::SixtyFourBit {
                    8
                } else {
                    4
                };
                if room < width as u64 {
                    return Err(Error::new(
                        ErrorCode::SubmessageExceedsParent,
                        "packed element overran its delimiter",
                    ));
                }
                if input.len() < width {
                    return Ok(None);
                }
                Ok(Some((fixed_value(elem, &input[..width])?, width)))
            }
            _ => Err(Error::new(
                ErrorCode::BadWireType,
                format!("{:?} is not packable", elem),
            )),
        }
    }
}

fn fixed_value(field_type: FieldType, bytes: &[u8]) -> Result<Value> {
    match bytes.len() {
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Value::from_fixed64(field_type, u64::from_le_bytes(raw))
        }
        4 => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(bytes);
            Value::from_fixed32(field_type, u32::from_le_bytes(raw))
        }
        _ => unreachable!("fixed values are 4 or 8 bytes"),
    }
}

/// Names the way a stream that ends with `tail` unconsumed is broken.
fn classify_tail(tail: &[u8]) -> Error {
    let premature = Error::new(
        ErrorCode::PrematureEof,
        "input ended inside a wire element",
    );
    let unterminated = Error::new(
        ErrorCode::UnterminatedVarint,
        "input ended inside a varint",
    );
    match peek_key(tail) {
        Err(_) | Ok(None) => unterminated,
        Ok(Some((_, wire, key_len))) => match wire {
            WireType::Varint | WireType::LengthDelimited => {
                match peek_varint(&tail[key_len..]) {
                    Ok(None) => unterminated,
                    _ => premature,
                }
            }
            _ => premature,
        },
    }
}

impl<F: Default> Default for Parser<F> {
    fn default() -> Parser<F> {
        Parser::new(DEFAULT_NESTING_LIMIT)
    }
}
