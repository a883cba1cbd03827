//! Event sequence encoding for opaque event buffers.
//!
//! `FETCH_MESSAGES` serializes the matching messages of a frame into an
//! event buffer. The layout is a compact atom sequence, little-endian:
//!
//! ```text
//! header:  u32 body_size   u32 SEQUENCE_TYPE
//! event:   i64 frame       u32 size   u32 ATOM_TYPE   [size bytes]  [pad to 8]
//! ```
//!
//! `body_size` counts the bytes following the header. Bytes after the last
//! event are zero.

/// Type tag of the sequence header.
pub const SEQUENCE_TYPE: u32 = 0x5153_4550;
/// Type tag of a single event.
pub const ATOM_TYPE: u32 = 0x4d4f_5441;

const HEADER_SIZE: usize = 8;
const EVENT_HEADER_SIZE: usize = 16;

fn padded(len: usize) -> usize {
    len.div_ceil(8) * 8
}

/// Writes an event sequence into a byte buffer.
pub struct SequenceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    dropped: usize,
}

impl<'a> SequenceWriter<'a> {
    /// Clears `buf` and starts an empty sequence in it.
    ///
    /// `buf` must hold at least the 8-byte header; shorter buffers accept no
    /// events.
    pub fn new(buf: &'a mut [u8]) -> Self {
        buf.fill(0);
        let mut writer = Self {
            buf,
            pos: HEADER_SIZE,
            dropped: 0,
        };
        writer.write_header();
        writer
    }

    /// Appends an event. Returns false and counts a drop if it does not fit.
    pub fn push(&mut self, frame: i64, data: &[u8]) -> bool {
        let needed = EVENT_HEADER_SIZE + padded(data.len());
        if self.buf.len() < HEADER_SIZE || self.pos + needed > self.buf.len() {
            self.dropped += 1;
            return false;
        }
        let p = self.pos;
        self.buf[p..p + 8].copy_from_slice(&frame.to_le_bytes());
        self.buf[p + 8..p + 12].copy_from_slice(&(data.len() as u32).to_le_bytes());
        self.buf[p + 12..p + 16].copy_from_slice(&ATOM_TYPE.to_le_bytes());
        self.buf[p + 16..p + 16 + data.len()].copy_from_slice(data);
        self.pos += needed;
        self.write_header();
        true
    }

    /// Number of events that did not fit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Bytes used so far, header included.
    pub fn len(&self) -> usize {
        self.pos
    }

    /// Returns true if no event has been written.
    pub fn is_empty(&self) -> bool {
        self.pos == HEADER_SIZE
    }

    fn write_header(&mut self) {
        if self.buf.len() < HEADER_SIZE {
            return;
        }
        let body = (self.pos - HEADER_SIZE) as u32;
        self.buf[0..4].copy_from_slice(&body.to_le_bytes());
        self.buf[4..8].copy_from_slice(&SEQUENCE_TYPE.to_le_bytes());
    }
}

/// A decoded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event<'a> {
    /// Frame offset of the event.
    pub frame: i64,
    /// Event payload.
    pub data: &'a [u8],
}

/// Read-only view of an encoded event sequence.
pub struct EventSequence<'a> {
    body: &'a [u8],
}

impl<'a> EventSequence<'a> {
    /// Parses the header of `bytes`. Returns `None` if it is not a sequence.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let body = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
        let ty = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        if ty != SEQUENCE_TYPE || HEADER_SIZE + body > bytes.len() {
            return None;
        }
        Some(Self {
            body: &bytes[HEADER_SIZE..HEADER_SIZE + body],
        })
    }

    /// Iterates over the events in the sequence.
    pub fn iter(&self) -> impl Iterator<Item = Event<'a>> + 'a {
        let body = self.body;
        let mut pos = 0usize;
        core::iter::from_fn(move || {
            if pos + EVENT_HEADER_SIZE > body.len() {
                return None;
            }
            let frame = i64::from_le_bytes(body[pos..pos + 8].try_into().ok()?);
            let size = u32::from_le_bytes(body[pos + 8..pos + 12].try_into().ok()?) as usize;
            let start = pos + EVENT_HEADER_SIZE;
            if start + size > body.len() {
                return None;
            }
            let data = &body[start..start + size];
            pos = start + padded(size);
            Some(Event { frame, data })
        })
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if the sequence holds no events.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sequence() {
        let mut buf = vec![0xFF; 64];
        let writer = SequenceWriter::new(&mut buf);
        assert!(writer.is_empty());
        let seq = EventSequence::parse(&buf).unwrap();
        assert!(seq.is_empty());
        assert!(buf[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_events_in_order() {
        let mut buf = vec![0u8; 128];
        let mut writer = SequenceWriter::new(&mut buf);
        assert!(writer.push(0, b"note-on"));
        assert!(writer.push(3, b"cc"));
        assert_eq!(writer.dropped(), 0);

        let seq = EventSequence::parse(&buf).unwrap();
        let events: Vec<_> = seq.iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, b"note-on");
        assert_eq!(events[1].frame, 3);
        assert_eq!(events[1].data, b"cc");
    }

    #[test]
    fn test_overflow_drops_event() {
        let mut buf = vec![0u8; HEADER_SIZE + EVENT_HEADER_SIZE + 8];
        let mut writer = SequenceWriter::new(&mut buf);
        assert!(writer.push(0, &[1; 8]));
        assert!(!writer.push(0, &[2; 1]));
        assert_eq!(writer.dropped(), 1);
        assert_eq!(EventSequence::parse(&buf).unwrap().len(), 1);
    }

    #[test]
    fn test_rewrite_zeroes_stale_tail() {
        let mut buf = vec![0u8; 128];
        {
            let mut writer = SequenceWriter::new(&mut buf);
            writer.push(0, &[7; 40]);
        }
        {
            let mut writer = SequenceWriter::new(&mut buf);
            writer.push(0, &[1; 2]);
        }
        let used = HEADER_SIZE + EVENT_HEADER_SIZE + 8;
        assert!(buf[used..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(EventSequence::parse(&[0u8; 4]).is_none());
        assert!(EventSequence::parse(&[0u8; 16]).is_none());
    }
}
