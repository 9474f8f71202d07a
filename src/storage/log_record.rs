//! The on-disk log record format and its codec.
//!
//! ```text
//!  +------------+------+----------+------------+-----+-------+
//!  |   CRC32    | kind | key_len  | value_len  | key | value |
//!  +------------+------+----------+------------+-----+-------+
//!  |<-- 4 B --->|<1 B >|<-varint->|<- varint ->|
//!  |------------------ header -----------------|
//! ```
//!
//! The CRC covers every byte after itself. `key_len`/`value_len` are
//! encoded as *signed* zigzag varints, so a decoder reading a truncated or
//! corrupted tail is far more likely to observe an implausible (often
//! negative) length than to silently read past the end of the file.

use bytes::{Buf, BufMut, BytesMut};
use prost::encoding::{decode_varint, encode_varint};

use crate::error::{Error, Result};

/// Sentinel key for a [`LogRecordType::TxnFinished`] marker.
pub const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// The kind of a [`LogRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogRecordType {
    /// A live Put.
    Normal = 0,
    /// A Delete marker; removed from the index on recovery/apply.
    Tombstone = 1,
    /// Marks a write batch (identified by `txn_id`) as committed.
    TxnFinished = 2,
}

impl LogRecordType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(LogRecordType::Normal),
            1 => Ok(LogRecordType::Tombstone),
            2 => Ok(LogRecordType::TxnFinished),
            other => Err(Error::DataCorrupted(format!("unknown log record kind {other}"))),
        }
    }
}

/// The unit of persistence.
///
/// `txn_id` is a logical attribute of a record, but it is never
/// encoded as a separate on-disk field: it is folded into `key` by
/// [`super::batch::encode_key_with_seq`] before the record is written, and
/// split back out by [`super::batch::parse_key_with_seq`] on read. This
/// keeps single-key Put/Delete and batched writes on one wire format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: LogRecordType,
}

/// A [`LogRecord`] staged during recovery of an in-flight write batch,
/// paired with the position it would occupy in the index once its
/// batch's commit marker is found.
pub struct TransactionRecord {
    pub record: LogRecord,
    pub pos: LogRecordPos,
}

/// Identifies where a record lives on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// The result of decoding one record off disk: the record itself and the
/// number of bytes it occupied, so callers can advance their read cursor.
pub struct ReadLogRecord {
    pub record: LogRecord,
    pub size: u64,
}

fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

fn encode_signed_varint(n: i64, buf: &mut BytesMut) {
    encode_varint(zigzag_encode(n), buf)
}

fn decode_signed_varint(buf: &mut impl Buf) -> Result<i64> {
    let raw = decode_varint(buf).map_err(|e| Error::DataCorrupted(e.to_string()))?;
    Ok(zigzag_decode(raw))
}

fn signed_varint_len(n: i64) -> usize {
    prost::encoding::encoded_len_varint(zigzag_encode(n))
}

/// Upper bound on the header size of any record: 4 (CRC) + 1 (kind) + two
/// varint-encoded lengths, each at most 10 bytes for a 64-bit value.
pub fn max_log_record_header_size() -> usize {
    4 + 1 + 10 + 10
}

impl LogRecord {
    /// Encodes the record to its on-disk byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let crc = crc32fast::hash(&body);

        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32_le(crc);
        buf.extend_from_slice(&body);
        buf.to_vec()
    }

    /// The CRC32 that would be stored for this record, computed over the
    /// same bytes [`LogRecord::encode`] would checksum. Exposed for tests.
    pub fn crc(&self) -> u32 {
        crc32fast::hash(&self.encode_body())
    }

    /// Everything after the CRC: kind, lengths, key, value.
    fn encode_body(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1 + self.key.len() + self.value.len() + 20);
        buf.put_u8(self.kind as u8);
        encode_signed_varint(self.key.len() as i64, &mut buf);
        encode_signed_varint(self.value.len() as i64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.to_vec()
    }

    pub fn encoded_len(&self) -> usize {
        4 + 1
            + signed_varint_len(self.key.len() as i64)
            + signed_varint_len(self.value.len() as i64)
            + self.key.len()
            + self.value.len()
    }
}

/// The decoded record header: everything needed to know how
/// many more bytes to read for the payload.
pub struct DecodedHeader {
    pub crc: u32,
    pub kind: LogRecordType,
    pub key_len: usize,
    pub value_len: usize,
    /// Total bytes consumed by CRC + kind + both length varints.
    pub header_len: usize,
}

/// Decodes a record header from a bounded slice (at most
/// [`max_log_record_header_size`] bytes, fewer at end of file). A short
/// slice that cannot even hold a CRC and a kind byte is treated as a
/// clean EOF by the caller, not as corruption.
pub fn decode_header(mut buf: &[u8]) -> Result<DecodedHeader> {
    if buf.len() < 5 {
        return Err(Error::DataCorrupted("short record header".into()));
    }
    let crc = buf.get_u32_le();
    let kind = LogRecordType::from_u8(buf.get_u8())?;
    let key_len = decode_signed_varint(&mut buf)?;
    let value_len = decode_signed_varint(&mut buf)?;
    if key_len < 0 || value_len < 0 {
        return Err(Error::DataCorrupted("negative length in record header".into()));
    }
    let consumed = max_log_record_header_size() - buf.remaining();
    Ok(DecodedHeader {
        crc,
        kind,
        key_len: key_len as usize,
        value_len: value_len as usize,
        header_len: consumed,
    })
}

/// Decodes the key/value payload that follows a header, and verifies the
/// CRC against the header+payload bytes supplied by the caller.
///
/// `header_body` must be exactly the header bytes *after* the CRC (kind +
/// both length varints, i.e. `header_len - 4` bytes from [`DecodedHeader`]).
pub fn decode_payload(
    header: &DecodedHeader,
    header_body: &[u8],
    payload: &[u8],
) -> Result<(Vec<u8>, Vec<u8>)> {
    if payload.len() != header.key_len + header.value_len {
        return Err(Error::DataCorrupted("short record payload".into()));
    }
    let mut crc_buf = Vec::with_capacity(header_body.len() + payload.len());
    crc_buf.extend_from_slice(header_body);
    crc_buf.extend_from_slice(payload);
    let computed = crc32fast::hash(&crc_buf);
    if computed != header.crc {
        return Err(Error::DataCorrupted(format!(
            "crc mismatch: stored {}, computed {computed}",
            header.crc
        )));
    }
    let key = payload[..header.key_len].to_vec();
    let value = payload[header.key_len..].to_vec();
    Ok((key, value))
}

impl LogRecordPos {
    /// Encodes a position as an unsigned varint triple, the format used
    /// for hint-file values.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_varint(self.file_id as u64, &mut buf);
        encode_varint(self.offset, &mut buf);
        encode_varint(self.size as u64, &mut buf);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        let file_id = decode_varint(&mut buf).map_err(|e| Error::DataCorrupted(e.to_string()))?;
        let offset = decode_varint(&mut buf).map_err(|e| Error::DataCorrupted(e.to_string()))?;
        let size = decode_varint(&mut buf).map_err(|e| Error::DataCorrupted(e.to_string()))?;
        Ok(LogRecordPos { file_id: file_id as u32, offset, size: size as u32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let record =
            LogRecord { key: b"name".to_vec(), value: b"bitcask".to_vec(), kind: LogRecordType::Normal };
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());

        let header = decode_header(&encoded).unwrap();
        assert_eq!(header.key_len, 4);
        assert_eq!(header.value_len, 7);

        let header_body = &encoded[4..header.header_len];
        let payload = &encoded[header.header_len..];
        let (key, value) = decode_payload(&header, header_body, payload).unwrap();
        assert_eq!(key, record.key);
        assert_eq!(value, record.value);
    }

    #[test]
    fn empty_value_round_trips() {
        let record = LogRecord { key: b"k".to_vec(), value: vec![], kind: LogRecordType::Tombstone };
        let encoded = record.encode();
        let header = decode_header(&encoded).unwrap();
        assert_eq!(header.kind, LogRecordType::Tombstone);
        assert_eq!(header.value_len, 0);
    }

    #[test]
    fn crc_mismatch_is_detected() {
        let record = LogRecord { key: b"k".to_vec(), value: b"v".to_vec(), kind: LogRecordType::Normal };
        let mut encoded = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let header = decode_header(&encoded).unwrap();
        let header_body = &encoded[4..header.header_len];
        let payload = &encoded[header.header_len..];
        assert!(decode_payload(&header, header_body, payload).is_err());
    }

    #[test]
    fn log_record_pos_round_trip() {
        let pos = LogRecordPos { file_id: 42, offset: 123_456, size: 789 };
        let decoded = LogRecordPos::decode(&pos.encode()).unwrap();
        assert_eq!(pos, decoded);
    }
}
