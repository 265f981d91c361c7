//! ISO Base Media File Format box primitives
//!
//! Every box is a 4-byte big-endian length, a 4-byte ASCII tag, and a
//! payload. The length always counts itself and the tag:
//!
//! ```text
//! +-----------+-----------+------------------------------+
//! | size (4)  | tag (4)   | payload (size - 8 bytes)     |
//! +-----------+-----------+------------------------------+
//! ```
//!
//! Boxes are built as values. A leaf box buffers the fields written by its
//! builder closure; a container box holds child boxes. Lengths are computed
//! bottom-up when the tree is encoded, so nesting depth never matters.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;

/// Four-character box type
pub type FourCc = [u8; 4];

/// Size of the length + tag header
pub const HEADER_LEN: usize = 8;

/// Box tags whose payload is a plain sequence of child boxes
const CONTAINER_TAGS: &[&FourCc] = &[
    b"moov", b"trak", b"mdia", b"minf", b"dinf", b"stbl", b"mvex", b"moof", b"traf", b"edts",
    b"udta",
];

/// Write `value` as a big-endian integer of `width` bytes.
///
/// Negative values are written in two's complement, so `-1` produces an
/// all-ones field of any width.
///
/// # Panics
///
/// Panics if `width` is not one of 1, 2, 4, 6 or 8.
pub fn write_be_int(buf: &mut BytesMut, value: i64, width: usize) {
    assert!(
        matches!(width, 1 | 2 | 4 | 6 | 8),
        "unsupported field width: {}",
        width
    );
    buf.put_slice(&value.to_be_bytes()[8 - width..]);
}

/// Writes the fields of a single box payload
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    fn new() -> Self {
        Self::default()
    }

    /// Append a big-endian integer of the given width
    pub fn int(&mut self, value: i64, width: usize) -> &mut Self {
        write_be_int(&mut self.buf, value, width);
        self
    }

    /// Append a 32-bit big-endian field
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append raw ASCII (brands, handler types)
    pub fn ascii(&mut self, s: &str) -> &mut Self {
        self.buf.put_slice(s.as_bytes());
        self
    }

    /// Append raw bytes verbatim
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Append `n` zero bytes
    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf.put_bytes(0, n);
        self
    }

    /// Append a nested box built by `build`
    pub fn child(&mut self, tag: &FourCc, build: impl FnOnce(&mut FieldWriter)) -> &mut Self {
        Mp4Box::new(tag, build).write_to(&mut self.buf);
        self
    }

    /// Append an already built box
    pub fn boxed(&mut self, b: &Mp4Box) -> &mut Self {
        b.write_to(&mut self.buf);
        self
    }

    fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Payload of a box
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxBody {
    /// Opaque payload bytes (fields, possibly with nested boxes inside)
    Raw(Bytes),
    /// Ordered child boxes
    Children(Vec<Mp4Box>),
}

/// A box and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Box {
    tag: FourCc,
    body: BoxBody,
}

impl Mp4Box {
    /// Build a leaf box from the fields written by `build`
    pub fn new(tag: &FourCc, build: impl FnOnce(&mut FieldWriter)) -> Self {
        let mut writer = FieldWriter::new();
        build(&mut writer);
        Self::raw(tag, writer.finish())
    }

    /// Build a leaf box around an existing payload
    pub fn raw(tag: &FourCc, payload: Bytes) -> Self {
        Self {
            tag: *tag,
            body: BoxBody::Raw(payload),
        }
    }

    /// Build a container box
    pub fn container(tag: &FourCc, children: Vec<Mp4Box>) -> Self {
        Self {
            tag: *tag,
            body: BoxBody::Children(children),
        }
    }

    pub fn tag(&self) -> &FourCc {
        &self.tag
    }

    pub fn body(&self) -> &BoxBody {
        &self.body
    }

    /// Child boxes, or an empty slice for leaf boxes
    pub fn children(&self) -> &[Mp4Box] {
        match &self.body {
            BoxBody::Children(children) => children,
            BoxBody::Raw(_) => &[],
        }
    }

    /// Follow a path of tags through nested containers
    pub fn find(&self, path: &[&FourCc]) -> Option<&Mp4Box> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        self.children()
            .iter()
            .find(|c| &c.tag == *first)
            .and_then(|c| c.find(rest))
    }

    /// Length of the encoded payload
    pub fn payload_len(&self) -> usize {
        match &self.body {
            BoxBody::Raw(payload) => payload.len(),
            BoxBody::Children(children) => children.iter().map(Mp4Box::encoded_len).sum(),
        }
    }

    /// Length of the encoded box, header included
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    /// Append the encoded box to `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the box does not fit a 32-bit length. Frames are bounded
    /// by [`CodedFrame`](crate::media::CodedFrame) before they get here.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        let len = u32::try_from(len).expect("box length exceeds 32 bits");

        buf.reserve(len as usize);
        buf.put_u32(len);
        buf.put_slice(&self.tag);
        match &self.body {
            BoxBody::Raw(payload) => buf.put_slice(payload),
            BoxBody::Children(children) => {
                for child in children {
                    child.write_to(buf);
                }
            }
        }
    }

    /// Encode the box into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Decode a sequence of boxes, descending into known container types
    pub fn decode(data: &[u8]) -> Result<Vec<Mp4Box>, MediaError> {
        BoxIter::new(data)
            .map(|item| {
                let (tag, payload) = item?;
                if CONTAINER_TAGS.contains(&&tag) {
                    Ok(Mp4Box::container(&tag, Mp4Box::decode(payload)?))
                } else {
                    Ok(Mp4Box::raw(&tag, Bytes::copy_from_slice(payload)))
                }
            })
            .collect()
    }
}

impl std::fmt::Display for Mp4Box {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", String::from_utf8_lossy(&self.tag), self.encoded_len())?;
        if let BoxBody::Children(children) = &self.body {
            write!(f, "[")?;
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Iterator over the top-level boxes of a byte slice
pub struct BoxIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<(FourCc, &'a [u8]), MediaError>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.data[self.offset..];
        if remaining.is_empty() {
            return None;
        }
        if remaining.len() < HEADER_LEN {
            self.offset = self.data.len();
            return Some(Err(MediaError::TruncatedBox));
        }

        let size =
            u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
        if size < HEADER_LEN || size > remaining.len() {
            self.offset = self.data.len();
            return Some(Err(MediaError::TruncatedBox));
        }

        let tag = [remaining[4], remaining[5], remaining[6], remaining[7]];
        self.offset += size;
        Some(Ok((tag, &remaining[HEADER_LEN..size])))
    }
}
