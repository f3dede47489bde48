//! # Duopack
//!
//! A bounded, self-describing codec for dynamic values.
//!
//! ## Philosophy
//!
//! - **One Value Model**: Everything on the wire is a `Value`. There is no schema;
//!   the receiver inspects tags and decides what it accepts.
//! - **TLV Architecture**: `[Tag][Length?][Value]` keeps every item skippable and
//!   every length checkable before a single byte of payload is touched.
//! - **Bounded**: Decoders are zero-copy, bounds-checked views. Nesting is capped at
//!   `MAX_DEPTH` in both directions, so hostile input cannot blow the stack.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]`
//! - **Containers**: `[Tag: 1b][Len: 4b][Body: Len]`
//! - **Map entries**: each entry is a `Variant` container holding the key string
//!   followed by exactly one payload value.
//!
//! All integers are Little-Endian. Integers always travel as `S64`.

mod value;

#[cfg(test)]
mod tests;

pub use value::TypeTag;
pub use value::Value;

/// Maximum container nesting accepted by the encoder and decoder.
pub const MAX_DEPTH: usize = 64;

/// Duopack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Byte does not correspond to a valid `Tag`, or the tag is not allowed here.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Blob or container length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// Nesting deeper than `MAX_DEPTH`.
    RecursionLimitExceeded,
    /// A complete value was decoded but bytes remain.
    TrailingBytes(usize),
    /// A container body did not have the expected shape.
    Malformed(&'static str),
    /// A `Value` was converted into a Rust type it does not hold.
    TypeMismatch { expected: TypeTag, found: TypeTag },
    /// An integer does not fit the requested Rust type.
    OutOfRange(i64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "Invalid Tag byte: {:#04x}", b),
            Error::BlobTooLarge(n) => write!(f, "Blob of {} bytes does not fit a u32 length", n),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            Error::Malformed(what) => write!(f, "Malformed container: {}", what),
            Error::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Error::OutOfRange(n) => write!(f, "Integer {} out of range", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Duopack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of the encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    BoolTrue = 0x01,
    BoolFalse = 0x02,
    S64 = 0x0A,
    F64 = 0x0C,
    Unit = 0x0E,

    // Blobs (Tag + u32 Len + Bytes)
    String = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Len + Body)
    List = 0x20,
    Map = 0x21,
    Variant = 0x33,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::BoolTrue),
            0x02 => Some(Tag::BoolFalse),
            0x0A => Some(Tag::S64),
            0x0C => Some(Tag::F64),
            0x0E => Some(Tag::Unit),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x21 => Some(Tag::Map),
            0x33 => Some(Tag::Variant),
            _ => None,
        }
    }
}

/// Serializes a value into a fresh buffer.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.value(value)?;
    Ok(enc.into_bytes())
}

/// Deserializes exactly one value, rejecting leftover bytes.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut dec = Decoder::new(bytes);
    let value = dec.value()?;
    match dec.remaining() {
        0 => Ok(value),
        n => Err(Error::TrailingBytes(n)),
    }
}

/// A recursive value encoder.
///
/// Container lengths are unknown until the body is written, so each container
/// reserves a 4-byte placeholder and back-patches it on close.
pub struct Encoder {
    buf: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(256) }
    }

    /// Consumes the encoder and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Appends one value.
    pub fn value(&mut self, value: &Value) -> Result<()> {
        self.value_at(value, 0)
    }

    fn value_at(&mut self, value: &Value, depth: usize) -> Result<()> {
        match value {
            Value::Nil => self.tag(Tag::Unit),
            Value::Bool(true) => self.tag(Tag::BoolTrue),
            Value::Bool(false) => self.tag(Tag::BoolFalse),
            Value::Int(n) => {
                self.tag(Tag::S64);
                self.buf.extend_from_slice(&n.to_le_bytes());
            }
            Value::Float(x) => {
                self.tag(Tag::F64);
                self.buf.extend_from_slice(&x.to_le_bytes());
            }
            Value::Str(s) => self.blob(Tag::String, s.as_bytes())?,
            Value::Bytes(b) => self.blob(Tag::Bytes, b)?,
            Value::List(items) => {
                let start = self.begin(Tag::List, depth)?;
                for item in items {
                    self.value_at(item, depth + 1)?;
                }
                self.end(start)?;
            }
            Value::Map(entries) => {
                let start = self.begin(Tag::Map, depth)?;
                for (key, item) in entries {
                    let entry = self.begin(Tag::Variant, depth + 1)?;
                    self.blob(Tag::String, key.as_bytes())?;
                    self.value_at(item, depth + 2)?;
                    self.end(entry)?;
                }
                self.end(start)?;
            }
        }
        Ok(())
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    fn len(&mut self, n: usize) -> Result<()> {
        let n = u32::try_from(n).map_err(|_| Error::BlobTooLarge(n))?;
        self.buf.extend_from_slice(&n.to_le_bytes());
        Ok(())
    }

    fn blob(&mut self, tag: Tag, bytes: &[u8]) -> Result<()> {
        self.tag(tag);
        self.len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Writes the tag and a length placeholder, returning where the body starts.
    fn begin(&mut self, tag: Tag, depth: usize) -> Result<usize> {
        if depth >= MAX_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }
        self.tag(tag);
        self.buf.extend_from_slice(&[0; 4]);
        Ok(self.buf.len())
    }

    fn end(&mut self, start: usize) -> Result<()> {
        let body = self.buf.len() - start;
        let body = u32::try_from(body).map_err(|_| Error::BlobTooLarge(body))?;
        self.buf[start - 4..start].copy_from_slice(&body.to_le_bytes());
        Ok(())
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Container reads hand out new `Decoder`s restricted to the container body, so a
/// lying length can never reach past its parent.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Peeks the next Tag without advancing.
    pub fn peek_tag(&self) -> Result<Tag> {
        let Some(&b) = self.buf.first() else { return Err(Error::UnexpectedEnd) };
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    /// Reads the next value.
    pub fn value(&mut self) -> Result<Value> {
        self.value_at(0)
    }

    fn value_at(&mut self, depth: usize) -> Result<Value> {
        let tag = self.peek_tag()?;
        self.read_u8()?;

        match tag {
            Tag::Unit => Ok(Value::Nil),
            Tag::BoolTrue => Ok(Value::Bool(true)),
            Tag::BoolFalse => Ok(Value::Bool(false)),
            Tag::S64 => Ok(Value::Int(i64::from_le_bytes(self.read_array()?))),
            Tag::F64 => Ok(Value::Float(f64::from_le_bytes(self.read_array()?))),
            Tag::String => Ok(Value::Str(self.read_str()?.to_owned())),
            Tag::Bytes => {
                let n = self.read_len()?;
                Ok(Value::Bytes(self.read_bytes(n)?.to_vec()))
            }
            Tag::List => {
                let mut body = self.enter(depth)?;
                let mut items = Vec::new();
                while body.remaining() > 0 {
                    items.push(body.value_at(depth + 1)?);
                }
                Ok(Value::List(items))
            }
            Tag::Map => {
                let mut body = self.enter(depth)?;
                let mut entries = Vec::new();
                while body.remaining() > 0 {
                    if body.peek_tag()? != Tag::Variant {
                        return Err(Error::Malformed("map entry is not a variant"));
                    }
                    body.read_u8()?;
                    let mut entry = body.enter(depth + 1)?;
                    if entry.peek_tag()? != Tag::String {
                        return Err(Error::Malformed("map key is not a string"));
                    }
                    entry.read_u8()?;
                    let key = entry.read_str()?.to_owned();
                    let item = entry.value_at(depth + 2)?;
                    if entry.remaining() > 0 {
                        return Err(Error::Malformed("map entry holds more than one value"));
                    }
                    entries.push((key, item));
                }
                Ok(Value::Map(entries))
            }
            // Variants only appear inside maps.
            Tag::Variant => Err(Error::InvalidTag(Tag::Variant as u8)),
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let (&b, tail) = self.buf.split_first().ok_or(Error::UnexpectedEnd)?;
        self.buf = tail;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        bytes.try_into().map_err(|_| Error::UnexpectedEnd)
    }

    fn read_len(&mut self) -> Result<usize> {
        let n = u32::from_le_bytes(self.read_array()?);
        usize::try_from(n).map_err(|_| Error::BlobTooLarge(usize::MAX))
    }

    fn read_str(&mut self) -> Result<&'a str> {
        let n = self.read_len()?;
        let bytes = self.read_bytes(n)?;
        std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8)
    }

    /// Reads a container length and returns a view over its body.
    fn enter(&mut self, depth: usize) -> Result<Decoder<'a>> {
        if depth >= MAX_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }
        let n = self.read_len()?;
        Ok(Decoder::new(self.read_bytes(n)?))
    }
}
