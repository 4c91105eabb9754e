//! Binary encodings used by the VAPID credential.
//!
//! - base64url without padding (RFC 4648 §5), tolerant of padded input.
//! - ECDSA signature conversion from ASN.1 DER `SEQUENCE { r INTEGER, s INTEGER }`
//!   to the fixed 64-byte `r || s` form required by JWS ES256.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::errors::PushError;

/// Width of one P-256 scalar in the raw signature.
pub const SCALAR_LEN: usize = 32;

/// Length of a raw `r || s` ES256 signature.
pub const RAW_SIGNATURE_LEN: usize = 2 * SCALAR_LEN;

const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;

// ── base64url ────────────────────────────────────────────────

/// Encode bytes as unpadded base64url.
pub fn b64url_encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64URL.encode(bytes)
}

/// Decode base64url, accepting input with or without `=` padding.
pub fn b64url_decode(input: &str) -> Result<Vec<u8>, PushError> {
    BASE64URL
        .decode(input.trim())
        .map_err(|e| PushError::Encoding(format!("invalid base64url: {}", e)))
}

// ── DER → raw ────────────────────────────────────────────────

/// Convert a DER-encoded ECDSA signature into the raw 64-byte `r || s` form.
///
/// Each integer has its sign-padding zero byte stripped and is left-padded
/// with zeros up to 32 bytes. Integers that still exceed 32 bytes after
/// stripping are rejected.
pub fn der_to_raw(der: &[u8]) -> Result<[u8; RAW_SIGNATURE_LEN], PushError> {
    let mut reader = DerReader { buf: der, pos: 0 };

    reader.expect_tag(DER_SEQUENCE)?;
    let seq_len = reader.read_len()?;
    if seq_len != reader.remaining() {
        return Err(malformed("sequence length does not match signature size"));
    }

    reader.expect_tag(DER_INTEGER)?;
    let r_len = reader.read_len()?;
    let r = reader.take(r_len)?;

    reader.expect_tag(DER_INTEGER)?;
    let s_len = reader.read_len()?;
    let s = reader.take(s_len)?;

    if reader.remaining() != 0 {
        return Err(malformed("trailing bytes after s"));
    }

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    write_fixed(r, &mut raw[..SCALAR_LEN])?;
    write_fixed(s, &mut raw[SCALAR_LEN..])?;
    Ok(raw)
}

/// Right-align a big-endian integer into `out`, dropping leading zero bytes.
fn write_fixed(int: &[u8], out: &mut [u8]) -> Result<(), PushError> {
    let first_significant = int.iter().position(|&b| b != 0).unwrap_or(int.len());
    let digits = &int[first_significant..];
    if digits.len() > out.len() {
        return Err(malformed("integer wider than 32 bytes"));
    }
    let offset = out.len() - digits.len();
    out[..offset].fill(0);
    out[offset..].copy_from_slice(digits);
    Ok(())
}

fn malformed(what: &str) -> PushError {
    PushError::Signing(format!("malformed DER signature: {}", what))
}

struct DerReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn byte(&mut self) -> Result<u8, PushError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| malformed("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn expect_tag(&mut self, tag: u8) -> Result<(), PushError> {
        let got = self.byte()?;
        if got != tag {
            return Err(malformed(&format!("expected tag 0x{:02x}, got 0x{:02x}", tag, got)));
        }
        Ok(())
    }

    /// Short form (< 0x80) or long form with one or two length bytes.
    fn read_len(&mut self) -> Result<usize, PushError> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 2 {
            return Err(malformed("unsupported length encoding"));
        }
        let mut len = 0usize;
        for _ in 0..n {
            len = (len << 8) | self.byte()? as usize;
        }
        Ok(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PushError> {
        if len > self.remaining() {
            return Err(malformed("length exceeds input"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Build `SEQUENCE { INTEGER r, INTEGER s }` from raw integer bytes.
    fn der(r: &[u8], s: &[u8]) -> Vec<u8> {
        let body_len = 2 + r.len() + 2 + s.len();
        let mut out = vec![DER_SEQUENCE, body_len as u8, DER_INTEGER, r.len() as u8];
        out.extend_from_slice(r);
        out.push(DER_INTEGER);
        out.push(s.len() as u8);
        out.extend_from_slice(s);
        out
    }

    #[test]
    fn test_der_to_raw_32_byte_integers() {
        let r = [0x11u8; 32];
        let s = [0x22u8; 32];
        let raw = der_to_raw(&der(&r, &s)).unwrap();
        assert_eq!(raw.len(), 64);
        assert_eq!(&raw[..32], &r);
        assert_eq!(&raw[32..], &s);
    }

    #[test]
    fn test_der_to_raw_strips_sign_padding_from_33_byte_integers() {
        let mut r = vec![0x00];
        r.extend_from_slice(&[0x81u8; 32]);
        let mut s = vec![0x00];
        s.extend_from_slice(&[0xffu8; 32]);

        let raw = der_to_raw(&der(&r, &s)).unwrap();
        assert_eq!(raw.len(), 64);
        assert_eq!(&raw[..32], &[0x81u8; 32]);
        assert_eq!(&raw[32..], &[0xffu8; 32]);
    }

    #[test]
    fn test_der_to_raw_left_pads_31_byte_integers() {
        let r = [0x7fu8; 31];
        let s = [0x01u8; 31];
        let raw = der_to_raw(&der(&r, &s)).unwrap();
        assert_eq!(raw[0], 0x00);
        assert_eq!(&raw[1..32], &r);
        assert_eq!(raw[32], 0x00);
        assert_eq!(&raw[33..], &s);
    }

    #[test]
    fn test_der_to_raw_mixed_widths() {
        let r = [0x05u8; 31];
        let mut s = vec![0x00];
        s.extend_from_slice(&[0x90u8; 32]);
        let raw = der_to_raw(&der(&r, &s)).unwrap();
        assert_eq!(raw.len(), RAW_SIGNATURE_LEN);
        assert_eq!(&raw[1..32], &r);
        assert_eq!(&raw[32..], &[0x90u8; 32]);
    }

    #[test]
    fn test_der_to_raw_rejects_garbage() {
        assert!(der_to_raw(&[]).is_err());
        assert!(der_to_raw(&[0x31, 0x00]).is_err());
        // r claims more bytes than present
        assert!(der_to_raw(&[0x30, 0x04, 0x02, 0x10, 0x01, 0x02]).is_err());
        // 33 significant bytes cannot fit
        let wide = [0x01u8; 33];
        assert!(der_to_raw(&der(&wide, &[0x01])).is_err());
    }

    #[test]
    fn test_b64url_is_unpadded_and_url_safe_for_all_lengths() {
        let data: Vec<u8> = (0u8..=255).rev().collect();
        for len in 0..=64 {
            let encoded = b64url_encode(&data[..len]);
            assert!(!encoded.contains('='), "padding at len {}", len);
            assert!(!encoded.contains('+') && !encoded.contains('/'), "len {}", len);
            assert_eq!(b64url_decode(&encoded).unwrap(), &data[..len]);
            // re-encoding the decoded bytes yields the same text
            assert_eq!(b64url_encode(b64url_decode(&encoded).unwrap()), encoded);
        }
    }

    #[test]
    fn test_b64url_decode_accepts_padding() {
        assert_eq!(b64url_decode("YQ==").unwrap(), b"a");
        assert_eq!(b64url_decode("YQ").unwrap(), b"a");
        assert!(b64url_decode("not base64!").is_err());
    }
}
