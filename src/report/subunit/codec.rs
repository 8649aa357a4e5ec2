//! Subunit v2 packet codec.
//!
//! ```text
//! signature  u8      0xB3
//! flags      u16 BE  version nibble 0x2, feature bits, status in the low 3 bits
//! length     varint  whole packet, including signature and CRC
//! timestamp  u32 BE seconds + varint nanoseconds        (TIMESTAMP)
//! test id    string                                     (TEST_ID)
//! tags       varint count + strings                     (TAGS)
//! mime type  string                                     (MIME_TYPE)
//! file       name string + varint length + bytes        (FILE_CONTENT)
//! route code string                                     (ROUTE_CODE)
//! crc32      u32 BE over every preceding byte
//! ```
//!
//! Varints use the top two bits of the first byte as a width marker (1 to 4
//! bytes); the largest encodable value is `0x3FFF_FFFF`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use super::SubunitError;

pub const SIGNATURE: u8 = 0xB3;
const VERSION: u16 = 0x2000;
const VERSION_MASK: u16 = 0xF000;

pub const FLAG_TEST_ID: u16 = 0x0800;
pub const FLAG_ROUTE_CODE: u16 = 0x0400;
pub const FLAG_TIMESTAMP: u16 = 0x0200;
pub const FLAG_RUNNABLE: u16 = 0x0100;
pub const FLAG_TAGS: u16 = 0x0080;
pub const FLAG_FILE_CONTENT: u16 = 0x0040;
pub const FLAG_MIME_TYPE: u16 = 0x0020;
pub const FLAG_EOF: u16 = 0x0010;
const STATUS_MASK: u16 = 0x0007;

const MAX_VARINT: u32 = 0x3FFF_FFFF;
/// Largest packet the length field may announce.
pub const MAX_PACKET: usize = 4_194_303;
const CRC_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Undefined,
    Exists,
    InProgress,
    Success,
    UxSuccess,
    Skip,
    Fail,
    Xfail,
}

impl TestStatus {
    fn bits(self) -> u16 {
        match self {
            TestStatus::Undefined => 0,
            TestStatus::Exists => 1,
            TestStatus::InProgress => 2,
            TestStatus::Success => 3,
            TestStatus::UxSuccess => 4,
            TestStatus::Skip => 5,
            TestStatus::Fail => 6,
            TestStatus::Xfail => 7,
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits & STATUS_MASK {
            1 => TestStatus::Exists,
            2 => TestStatus::InProgress,
            3 => TestStatus::Success,
            4 => TestStatus::UxSuccess,
            5 => TestStatus::Skip,
            6 => TestStatus::Fail,
            7 => TestStatus::Xfail,
            _ => TestStatus::Undefined,
        }
    }

    /// Whether the status closes a test.
    pub fn is_final(self) -> bool {
        !matches!(self, TestStatus::Undefined | TestStatus::Exists | TestStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Undefined => "undefined",
            TestStatus::Exists => "exists",
            TestStatus::InProgress => "inprogress",
            TestStatus::Success => "success",
            TestStatus::UxSuccess => "uxsuccess",
            TestStatus::Skip => "skip",
            TestStatus::Fail => "fail",
            TestStatus::Xfail => "xfail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub name: String,
    pub content: Bytes,
}

/// One subunit v2 event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub status: TestStatus,
    pub test_id: Option<String>,
    pub route_code: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub runnable: bool,
    pub tags: Option<Vec<String>>,
    pub mime_type: Option<String>,
    pub file: Option<FileContent>,
    pub eof: bool,
}

impl Packet {
    fn flags(&self) -> u16 {
        let mut flags = VERSION | self.status.bits();
        let mut set = |on: bool, flag: u16| {
            if on {
                flags |= flag;
            }
        };
        set(self.test_id.is_some(), FLAG_TEST_ID);
        set(self.route_code.is_some(), FLAG_ROUTE_CODE);
        set(self.timestamp.is_some(), FLAG_TIMESTAMP);
        set(self.runnable, FLAG_RUNNABLE);
        set(self.tags.is_some(), FLAG_TAGS);
        set(self.file.is_some(), FLAG_FILE_CONTENT);
        set(self.mime_type.is_some(), FLAG_MIME_TYPE);
        set(self.eof, FLAG_EOF);
        flags
    }

    /// Append the wire form of this packet to `out`.
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), SubunitError> {
        let mut body = BytesMut::new();
        if let Some(ts) = &self.timestamp {
            let secs = u32::try_from(ts.timestamp()).map_err(|_| SubunitError::TimestampRange(*ts))?;
            body.put_u32(secs);
            put_varint(&mut body, ts.timestamp_subsec_nanos())?;
        }
        if let Some(id) = &self.test_id {
            put_string(&mut body, id)?;
        }
        if let Some(tags) = &self.tags {
            put_varint(&mut body, varint_len(tags.len())?)?;
            for tag in tags {
                put_string(&mut body, tag)?;
            }
        }
        if let Some(mime) = &self.mime_type {
            put_string(&mut body, mime)?;
        }
        if let Some(file) = &self.file {
            put_string(&mut body, &file.name)?;
            put_varint(&mut body, varint_len(file.content.len())?)?;
            body.extend_from_slice(&file.content);
        }
        if let Some(route) = &self.route_code {
            put_string(&mut body, route)?;
        }

        let length = packet_length(body.len())?;
        let start = out.len();
        out.reserve(length);
        out.put_u8(SIGNATURE);
        out.put_u16(self.flags());
        put_varint(out, length as u32)?;
        out.extend_from_slice(&body);
        let crc = crc32fast::hash(&out[start..]);
        out.put_u32(crc);
        debug_assert_eq!(out.len() - start, length);
        Ok(())
    }
}

/// Total packet length for a body of `body` bytes. The length field counts
/// itself, so its width depends on the result.
fn packet_length(body: usize) -> Result<usize, SubunitError> {
    let base = 3 + body + CRC_LEN;
    let length = if base <= 62 {
        base + 1
    } else if base <= 16_381 {
        base + 2
    } else if base <= 4_194_300 {
        base + 3
    } else {
        return Err(SubunitError::PacketTooLarge(base));
    };
    Ok(length)
}

fn varint_len(n: usize) -> Result<u32, SubunitError> {
    u32::try_from(n)
        .ok()
        .filter(|v| *v <= MAX_VARINT)
        .ok_or(SubunitError::VarintRange(n as u64))
}

pub(crate) fn put_varint(buf: &mut BytesMut, value: u32) -> Result<(), SubunitError> {
    if value < 0x40 {
        buf.put_u8(value as u8);
    } else if value < 0x4000 {
        buf.put_u16(value as u16 | 0x4000);
    } else if value < 0x40_0000 {
        let v = value | 0x80_0000;
        buf.put_u8((v >> 16) as u8);
        buf.put_u16(v as u16);
    } else if value <= MAX_VARINT {
        buf.put_u32(value | 0xC000_0000);
    } else {
        return Err(SubunitError::VarintRange(u64::from(value)));
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), SubunitError> {
    put_varint(buf, varint_len(s.len())?)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over one packet.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> Result<(), SubunitError> {
        if self.buf.remaining() < n {
            return Err(SubunitError::Truncated { offset: self.offset });
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) {
        self.buf.advance(n);
        self.offset += n;
    }

    fn u8(&mut self) -> Result<u8, SubunitError> {
        self.need(1)?;
        self.offset += 1;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, SubunitError> {
        self.need(2)?;
        self.offset += 2;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, SubunitError> {
        self.need(4)?;
        self.offset += 4;
        Ok(self.buf.get_u32())
    }

    fn varint(&mut self) -> Result<u32, SubunitError> {
        let first = self.u8()?;
        let value = u32::from(first & 0x3F);
        let extra = usize::from(first >> 6);
        self.need(extra)?;
        let mut value = value;
        for _ in 0..extra {
            value = (value << 8) | u32::from(self.u8()?);
        }
        Ok(value)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], SubunitError> {
        self.need(n)?;
        let (head, _) = self.buf.split_at(n);
        self.advance(n);
        Ok(head)
    }

    fn string(&mut self) -> Result<String, SubunitError> {
        let len = self.varint()? as usize;
        let offset = self.offset;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| SubunitError::InvalidUtf8 { offset })
    }
}

/// Parse a complete stream into packets, verifying every signature, length
/// and checksum.
pub fn decode(stream: &[u8]) -> Result<Vec<Packet>, SubunitError> {
    let mut packets = Vec::new();
    let mut offset = 0;
    while offset < stream.len() {
        let (packet, length) = decode_one(&stream[offset..], offset)?;
        packets.push(packet);
        offset += length;
    }
    Ok(packets)
}

fn decode_one(input: &[u8], base: usize) -> Result<(Packet, usize), SubunitError> {
    let mut header = Reader { buf: input, offset: base };
    let signature = header.u8()?;
    if signature != SIGNATURE {
        return Err(SubunitError::BadSignature {
            offset: base,
            found: signature,
        });
    }
    let flags = header.u16()?;
    if flags & VERSION_MASK != VERSION {
        return Err(SubunitError::BadVersion { offset: base, flags });
    }
    let length = header.varint()? as usize;
    let header_len = header.offset - base;
    if length < header_len + CRC_LEN || length > MAX_PACKET {
        return Err(SubunitError::BadLength { offset: base, length });
    }
    if input.len() < length {
        return Err(SubunitError::Truncated { offset: base });
    }

    let (covered, mut crc) = input[..length].split_at(length - CRC_LEN);
    let expected = crc.get_u32();
    let actual = crc32fast::hash(covered);
    if expected != actual {
        return Err(SubunitError::BadCrc {
            offset: base,
            expected,
            actual,
        });
    }

    let mut r = Reader {
        buf: &covered[header_len..],
        offset: base + header_len,
    };
    let mut packet = Packet {
        status: TestStatus::from_bits(flags),
        runnable: flags & FLAG_RUNNABLE != 0,
        eof: flags & FLAG_EOF != 0,
        ..Default::default()
    };

    if flags & FLAG_TIMESTAMP != 0 {
        let offset = r.offset;
        let secs = r.u32()?;
        let nanos = r.varint()?;
        packet.timestamp = Some(
            Utc.timestamp_opt(i64::from(secs), nanos)
                .single()
                .ok_or(SubunitError::BadTimestamp { offset })?,
        );
    }
    if flags & FLAG_TEST_ID != 0 {
        packet.test_id = Some(r.string()?);
    }
    if flags & FLAG_TAGS != 0 {
        let count = r.varint()?;
        let tags = (0..count).map(|_| r.string()).collect::<Result<Vec<_>, _>>()?;
        packet.tags = Some(tags);
    }
    if flags & FLAG_MIME_TYPE != 0 {
        packet.mime_type = Some(r.string()?);
    }
    if flags & FLAG_FILE_CONTENT != 0 {
        let name = r.string()?;
        let len = r.varint()? as usize;
        let content = Bytes::copy_from_slice(r.bytes(len)?);
        packet.file = Some(FileContent { name, content });
    }
    if flags & FLAG_ROUTE_CODE != 0 {
        packet.route_code = Some(r.string()?);
    }
    if r.buf.has_remaining() {
        return Err(SubunitError::BadLength { offset: base, length });
    }

    Ok((packet, length))
}
