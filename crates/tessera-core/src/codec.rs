//! Canonical wire codec for the Tessera protocol.
//!
//! Every consensus-relevant byte sequence (transaction hashes, block hashes,
//! persisted records, wire payloads) is produced by this codec. Integers are
//! little-endian. Sequences carry a variable-length size prefix:
//!
//! | value            | encoding                 |
//! |------------------|--------------------------|
//! | `n < 0xFD`       | 1 byte                   |
//! | `n <= 0xFFFF`    | `0xFD` + 2 bytes         |
//! | `n <= 0xFFFFFFFF`| `0xFE` + 4 bytes         |
//! | otherwise        | `0xFF` + 8 bytes         |
//!
//! Decoding is fallible and cursor-driven: short input fails with
//! [`CodecError::UnexpectedEnd`], and any size prefix above
//! [`MAX_MESSAGE_SIZE`] fails with [`CodecError::SizeTooLarge`] before a
//! single element is read.

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::CodecError;

/// Types that serialize themselves into the canonical byte form.
///
/// Composite encodings are the concatenation of the fields' encodings in
/// declaration order.
pub trait Encodable {
    /// Append the canonical encoding of `self` to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Canonical encoding of `self` as a fresh buffer.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

/// Types that parse themselves from the canonical byte form.
pub trait Decodable: Sized {
    /// Decode a value from the cursor, advancing it past the consumed bytes.
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError>;

    /// Decode a value that must occupy the entire input.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let value = Self::decode_from(&mut r)?;
        if !r.is_empty() {
            return Err(CodecError::TrailingBytes { remaining: r.remaining() });
        }
        Ok(value)
    }
}

/// A consuming cursor over a byte buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.read_u64()? as i64)
    }

    /// Consume a fixed-length byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N)?);
        Ok(arr)
    }

    /// Decode a variable-length integer per the prefix table.
    pub fn read_var_int(&mut self) -> Result<u64, CodecError> {
        match self.read_u8()? {
            0xFD => Ok(self.read_u16()? as u64),
            0xFE => Ok(self.read_u32()? as u64),
            0xFF => self.read_u64(),
            n => Ok(n as u64),
        }
    }

    /// Decode a size prefix, enforcing the [`MAX_MESSAGE_SIZE`] cap.
    pub fn read_size(&mut self) -> Result<usize, CodecError> {
        let n = self.read_var_int()?;
        if n > MAX_MESSAGE_SIZE as u64 {
            return Err(CodecError::SizeTooLarge { size: n });
        }
        Ok(n as usize)
    }

    /// Decode a size-prefixed byte string.
    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_size()?;
        Ok(self.take(len)?.to_vec())
    }
}

/// Append the variable-length encoding of `n`.
pub fn write_var_int(n: u64, out: &mut Vec<u8>) {
    if n < 0xFD {
        out.push(n as u8);
    } else if n <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

/// Append a size-prefixed byte string.
pub fn write_var_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    write_var_int(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

/// Encoded length of the variable-length prefix for `n`.
pub fn var_int_len(n: u64) -> usize {
    if n < 0xFD {
        1
    } else if n <= 0xFFFF {
        3
    } else if n <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

impl Encodable for u16 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decodable for u16 {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.read_u16()
    }
}

impl Encodable for u32 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decodable for u32 {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.read_u32()
    }
}

impl Encodable for u64 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decodable for u64 {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.read_u64()
    }
}

impl Encodable for i64 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl Decodable for i64 {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.read_i64()
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode_into(&self, out: &mut Vec<u8>) {
        write_var_int(self.len() as u64, out);
        for item in self {
            item.encode_into(out);
        }
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = r.read_size()?;
        // Each element occupies at least one byte, so a count beyond the
        // remaining input can never decode; fail before allocating.
        if count > r.remaining() {
            return Err(CodecError::UnexpectedEnd);
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode_from(r)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn var_int_bytes(n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        write_var_int(n, &mut out);
        out
    }

    // --- var int encoding table ---

    #[test]
    fn var_int_one_byte_forms() {
        assert_eq!(var_int_bytes(0), vec![0x00]);
        assert_eq!(var_int_bytes(1), vec![0x01]);
        assert_eq!(var_int_bytes(252), vec![0xFC]);
    }

    #[test]
    fn var_int_three_byte_forms() {
        assert_eq!(var_int_bytes(253), vec![0xFD, 0xFD, 0x00]);
        assert_eq!(var_int_bytes(0xFFFF), vec![0xFD, 0xFF, 0xFF]);
    }

    #[test]
    fn var_int_five_byte_forms() {
        assert_eq!(var_int_bytes(0x10000), vec![0xFE, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(
            var_int_bytes(0xFFFF_FFFF),
            vec![0xFE, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn var_int_nine_byte_forms() {
        assert_eq!(
            var_int_bytes(0x1_0000_0000),
            vec![0xFF, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
        assert_eq!(var_int_bytes(u64::MAX), {
            let mut v = vec![0xFF];
            v.extend_from_slice(&u64::MAX.to_le_bytes());
            v
        });
    }

    #[test]
    fn var_int_len_matches_encoding() {
        for n in [0u64, 1, 252, 253, 0xFFFF, 0x10000, 0xFFFF_FFFF, 0x1_0000_0000, u64::MAX] {
            assert_eq!(var_int_len(n), var_int_bytes(n).len(), "n={n}");
        }
    }

    // --- reader primitives ---

    #[test]
    fn reader_little_endian_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut r = Reader::new(&data);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert_eq!(r.read_u32().unwrap(), 0x0605_0403);
        assert_eq!(r.remaining(), 2);
    }

    #[test]
    fn reader_take_past_end_fails() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.take(4).unwrap_err(), CodecError::UnexpectedEnd);
        // Failed take consumes nothing.
        assert_eq!(r.remaining(), 3);
    }

    #[test]
    fn reader_partial_u64_fails() {
        let mut r = Reader::new(&[1, 2, 3, 4]);
        assert_eq!(r.read_u64().unwrap_err(), CodecError::UnexpectedEnd);
    }

    #[test]
    fn reader_truncated_var_int_fails() {
        let mut r = Reader::new(&[0xFD, 0x01]);
        assert_eq!(r.read_var_int().unwrap_err(), CodecError::UnexpectedEnd);
    }

    // --- size cap ---

    #[test]
    fn size_above_cap_rejected() {
        let mut buf = Vec::new();
        write_var_int(MAX_MESSAGE_SIZE as u64 + 1, &mut buf);
        let mut r = Reader::new(&buf);
        assert!(matches!(
            r.read_size().unwrap_err(),
            CodecError::SizeTooLarge { .. }
        ));
    }

    #[test]
    fn size_at_cap_accepted() {
        let mut buf = Vec::new();
        write_var_int(MAX_MESSAGE_SIZE as u64, &mut buf);
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_size().unwrap(), MAX_MESSAGE_SIZE);
    }

    #[test]
    fn huge_vec_count_fails_before_allocating() {
        // Claims ~16 MiB of u32 elements with 2 bytes of actual payload.
        let mut buf = Vec::new();
        write_var_int(4_000_000, &mut buf);
        buf.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(
            Vec::<u32>::decode(&buf).unwrap_err(),
            CodecError::UnexpectedEnd
        );
    }

    // --- var bytes ---

    #[test]
    fn var_bytes_round_trip() {
        let mut buf = Vec::new();
        write_var_bytes(b"tessera", &mut buf);
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_var_bytes().unwrap(), b"tessera");
        assert!(r.is_empty());
    }

    #[test]
    fn var_bytes_truncated_body_fails() {
        let mut buf = Vec::new();
        write_var_bytes(b"tessera", &mut buf);
        buf.pop();
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_var_bytes().unwrap_err(), CodecError::UnexpectedEnd);
    }

    // --- whole-input decode ---

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut buf = 7u32.encode();
        buf.push(0x00);
        assert_eq!(
            u32::decode(&buf).unwrap_err(),
            CodecError::TrailingBytes { remaining: 1 }
        );
    }

    #[test]
    fn vec_round_trip() {
        let values: Vec<u64> = vec![0, 1, u64::MAX, 42];
        let encoded = values.encode();
        assert_eq!(Vec::<u64>::decode(&encoded).unwrap(), values);
    }

    #[test]
    fn empty_vec_is_single_zero_byte() {
        let values: Vec<u32> = Vec::new();
        assert_eq!(values.encode(), vec![0x00]);
    }

    // --- properties ---

    proptest! {
        #[test]
        fn prop_var_int_round_trip(n in any::<u64>()) {
            let mut buf = Vec::new();
            write_var_int(n, &mut buf);
            let mut r = Reader::new(&buf);
            prop_assert_eq!(r.read_var_int().unwrap(), n);
            prop_assert!(r.is_empty());
        }

        #[test]
        fn prop_var_int_length_table(n in any::<u64>()) {
            let expected = if n < 253 { 1 } else if n <= 0xFFFF { 3 }
                else if n <= 0xFFFF_FFFF { 5 } else { 9 };
            prop_assert_eq!(var_int_bytes(n).len(), expected);
        }

        #[test]
        fn prop_var_bytes_round_trip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = Vec::new();
            write_var_bytes(&data, &mut buf);
            let mut r = Reader::new(&buf);
            prop_assert_eq!(r.read_var_bytes().unwrap(), data);
        }

        #[test]
        fn prop_integer_round_trips(a in any::<u16>(), b in any::<u32>(), c in any::<u64>(), d in any::<i64>()) {
            prop_assert_eq!(u16::decode(&a.encode()).unwrap(), a);
            prop_assert_eq!(u32::decode(&b.encode()).unwrap(), b);
            prop_assert_eq!(u64::decode(&c.encode()).unwrap(), c);
            prop_assert_eq!(i64::decode(&d.encode()).unwrap(), d);
        }
    }
}
