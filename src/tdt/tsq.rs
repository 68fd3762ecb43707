//! TSQ event index records.
//!
//! A `.tsq` file is a flat array of 40-byte little-endian records. Each record
//! describes one event; data-carrying events point into the `.tev` file.
//!
//! ```text
//! offset  size  field
//!      0     4  size (32-bit words, header included)
//!      4     4  type
//!      8     4  code (store name, 4 ASCII bytes)
//!     12     2  channel (1-based)
//!     14     2  sort code
//!     16     8  timestamp (seconds, f64)
//!     24     8  offset into .tev (u64), or strobe value (f64)
//!     32     4  data format
//!     36     4  sampling frequency (f32)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Size of one TSQ record in bytes
pub const RECORD_SIZE: usize = 40;
/// Header words counted in `size`
pub const HEADER_WORDS: i32 = 10;

/// Event type: continuous stream chunk
pub const EVTYPE_STREAM: i32 = 0x8101;
/// Event type: block marker
pub const EVTYPE_MARK: i32 = 0x8801;
/// Event type: strobe on
pub const EVTYPE_STRON: i32 = 0x101;
/// Event type: scalar
pub const EVTYPE_SCALAR: i32 = 0x201;
/// Event type: snippet
pub const EVTYPE_SNIP: i32 = 0x8201;
/// Code of the start-of-block marker
pub const EVMARK_STARTBLOCK: u32 = 0x0001;
/// Code of the end-of-block marker
pub const EVMARK_STOPBLOCK: u32 = 0x0002;

/// Sample encoding of a data event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// 32-bit float
    Float,
    /// 32-bit signed integer
    Long,
    /// 16-bit signed integer
    Short,
    /// 8-bit signed integer
    Byte,
    /// 64-bit float
    Double,
    /// 64-bit signed integer
    QWord,
}

impl DataFormat {
    /// Decode the format field of a record
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DataFormat::Float),
            1 => Some(DataFormat::Long),
            2 => Some(DataFormat::Short),
            3 => Some(DataFormat::Byte),
            4 => Some(DataFormat::Double),
            5 => Some(DataFormat::QWord),
            _ => None,
        }
    }

    /// Format field value
    pub fn code(self) -> i32 {
        match self {
            DataFormat::Float => 0,
            DataFormat::Long => 1,
            DataFormat::Short => 2,
            DataFormat::Byte => 3,
            DataFormat::Double => 4,
            DataFormat::QWord => 5,
        }
    }

    /// Bytes per sample
    pub fn sample_size(self) -> usize {
        match self {
            DataFormat::Byte => 1,
            DataFormat::Short => 2,
            DataFormat::Float | DataFormat::Long => 4,
            DataFormat::Double | DataFormat::QWord => 8,
        }
    }

    /// Decode a little-endian byte buffer into samples
    pub fn decode(self, bytes: &[u8]) -> io::Result<Vec<f64>> {
        let count = bytes.len() / self.sample_size();
        let mut cursor = io::Cursor::new(bytes);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let value = match self {
                DataFormat::Float => f64::from(cursor.read_f32::<LittleEndian>()?),
                DataFormat::Long => f64::from(cursor.read_i32::<LittleEndian>()?),
                DataFormat::Short => f64::from(cursor.read_i16::<LittleEndian>()?),
                DataFormat::Byte => f64::from(cursor.read_i8()?),
                DataFormat::Double => cursor.read_f64::<LittleEndian>()?,
                DataFormat::QWord => cursor.read_i64::<LittleEndian>()? as f64,
            };
            out.push(value);
        }
        Ok(out)
    }
}

/// One TSQ record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TsqRecord {
    /// Event size in 32-bit words, header included
    pub size: i32,
    /// Event type
    pub event_type: i32,
    /// Store code
    pub code: [u8; 4],
    /// Channel number (1-based)
    pub channel: u16,
    /// Sort code
    pub sort_code: u16,
    /// Event time in seconds
    pub timestamp: f64,
    /// Raw offset / strobe field
    pub offset_bits: u64,
    /// Data format field
    pub format: i32,
    /// Sampling frequency in Hz
    pub frequency: f32,
}

impl TsqRecord {
    /// Read one record
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let size = reader.read_i32::<LittleEndian>()?;
        let event_type = reader.read_i32::<LittleEndian>()?;
        let mut code = [0u8; 4];
        reader.read_exact(&mut code)?;
        let channel = reader.read_u16::<LittleEndian>()?;
        let sort_code = reader.read_u16::<LittleEndian>()?;
        let timestamp = reader.read_f64::<LittleEndian>()?;
        let offset_bits = reader.read_u64::<LittleEndian>()?;
        let format = reader.read_i32::<LittleEndian>()?;
        let frequency = reader.read_f32::<LittleEndian>()?;
        Ok(Self {
            size,
            event_type,
            code,
            channel,
            sort_code,
            timestamp,
            offset_bits,
            format,
            frequency,
        })
    }

    /// Write one record
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.size)?;
        writer.write_i32::<LittleEndian>(self.event_type)?;
        writer.write_all(&self.code)?;
        writer.write_u16::<LittleEndian>(self.channel)?;
        writer.write_u16::<LittleEndian>(self.sort_code)?;
        writer.write_f64::<LittleEndian>(self.timestamp)?;
        writer.write_u64::<LittleEndian>(self.offset_bits)?;
        writer.write_i32::<LittleEndian>(self.format)?;
        writer.write_f32::<LittleEndian>(self.frequency)?;
        Ok(())
    }

    /// Block marker record (start or stop)
    pub fn mark(code: u32, timestamp: f64) -> Self {
        Self {
            size: HEADER_WORDS,
            event_type: EVTYPE_MARK,
            code: code.to_le_bytes(),
            channel: 0,
            sort_code: 0,
            timestamp,
            offset_bits: 0,
            format: 0,
            frequency: 0.0,
        }
    }

    /// Stream chunk record pointing at `data_bytes` bytes at `offset` in the TEV
    pub fn stream_chunk(
        store: &str,
        channel: u16,
        timestamp: f64,
        offset: u64,
        data_bytes: usize,
        format: DataFormat,
        frequency: f32,
    ) -> Self {
        let mut code = [0u8; 4];
        for (slot, byte) in code.iter_mut().zip(store.bytes()) {
            *slot = byte;
        }
        Self {
            size: HEADER_WORDS + (data_bytes / 4) as i32,
            event_type: EVTYPE_STREAM,
            code,
            channel,
            sort_code: 0,
            timestamp,
            offset_bits: offset,
            format: format.code(),
            frequency,
        }
    }

    /// Code as a little-endian integer (marker records)
    pub fn code_value(&self) -> u32 {
        u32::from_le_bytes(self.code)
    }

    /// Store name from the code bytes
    pub fn store_name(&self) -> String {
        self.code
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| char::from(*b))
            .collect()
    }

    /// True for continuous stream chunks
    pub fn is_stream(&self) -> bool {
        self.event_type == EVTYPE_STREAM
    }

    /// Byte offset of the payload in the TEV file
    pub fn data_offset(&self) -> u64 {
        self.offset_bits
    }

    /// Payload length in bytes, `None` when `size` is smaller than the header
    pub fn data_len(&self) -> Option<usize> {
        let words = self.size.checked_sub(HEADER_WORDS)?;
        usize::try_from(words).ok()?.checked_mul(4)
    }

    /// Decoded data format
    pub fn data_format(&self) -> Option<DataFormat> {
        DataFormat::from_code(self.format)
    }
}

/// Read every record of a TSQ buffer
pub fn read_records(bytes: &[u8]) -> io::Result<Vec<TsqRecord>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "TSQ length {} is not a multiple of {RECORD_SIZE}",
                bytes.len()
            ),
        ));
    }
    let mut cursor = io::Cursor::new(bytes);
    (0..bytes.len() / RECORD_SIZE)
        .map(|_| TsqRecord::read_from(&mut cursor))
        .collect()
}
