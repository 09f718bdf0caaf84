//! STUN/TURN wire codec
//!
//! Encodes and decodes STUN messages: the fixed 20-byte header, the
//! 4-byte-aligned attribute TLV sequence, XOR-mapped addresses,
//! MESSAGE-INTEGRITY, FINGERPRINT and the compact ChannelData framing.
// Copyright 2025 The Icebridge Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{RelayError, RelayResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::net::{IpAddr, SocketAddr};

type HmacSha1 = Hmac<Sha1>;

pub const MAGIC_COOKIE: u32 = 0x2112A442;
pub const HEADER_LEN: usize = 20;
pub const TRANSACTION_ID_LEN: usize = 12;

const FINGERPRINT_XOR: u32 = 0x5354554E;
const INTEGRITY_LEN: usize = 20;

/// Channel number range for channel bindings
pub const CHANNEL_MIN: u16 = 0x4000;
pub const CHANNEL_MAX: u16 = 0x7FFE;

/// STUN/TURN attribute types
pub mod attr {
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ERROR_CODE: u16 = 0x0009;
    pub const CHANNEL_NUMBER: u16 = 0x000C;
    pub const LIFETIME: u16 = 0x000D;
    pub const XOR_PEER_ADDRESS: u16 = 0x0012;
    pub const DATA: u16 = 0x0013;
    pub const REALM: u16 = 0x0014;
    pub const NONCE: u16 = 0x0015;
    pub const XOR_RELAYED_ADDRESS: u16 = 0x0016;
    pub const REQUESTED_TRANSPORT: u16 = 0x0019;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const SOFTWARE: u16 = 0x8022;
    pub const FINGERPRINT: u16 = 0x8028;
}

/// Protocol error codes
pub mod error_code {
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const ALLOCATION_MISMATCH: u16 = 437;
    pub const STALE_NONCE: u16 = 438;
    pub const ALLOCATION_QUOTA_REACHED: u16 = 486;

    pub fn reason(code: u16) -> &'static str {
        match code {
            BAD_REQUEST => "Bad Request",
            UNAUTHORIZED => "Unauthorized",
            ALLOCATION_MISMATCH => "Allocation Mismatch",
            STALE_NONCE => "Stale Nonce",
            ALLOCATION_QUOTA_REACHED => "Allocation Quota Reached",
            _ => "Error",
        }
    }
}

/// STUN method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Binding,
    Allocate,
    Refresh,
    Send,
    Data,
    CreatePermission,
    ChannelBind,
}

impl Method {
    fn from_code(code: u16) -> Option<Self> {
        match code {
            0x001 => Some(Method::Binding),
            0x003 => Some(Method::Allocate),
            0x004 => Some(Method::Refresh),
            0x006 => Some(Method::Send),
            0x007 => Some(Method::Data),
            0x008 => Some(Method::CreatePermission),
            0x009 => Some(Method::ChannelBind),
            _ => None,
        }
    }

    fn code(self) -> u16 {
        match self {
            Method::Binding => 0x001,
            Method::Allocate => 0x003,
            Method::Refresh => 0x004,
            Method::Send => 0x006,
            Method::Data => 0x007,
            Method::CreatePermission => 0x008,
            Method::ChannelBind => 0x009,
        }
    }
}

/// STUN message class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Request,
    Indication,
    SuccessResponse,
    ErrorResponse,
}

impl Class {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0b00 => Class::Request,
            0b01 => Class::Indication,
            0b10 => Class::SuccessResponse,
            _ => Class::ErrorResponse,
        }
    }

    fn bits(self) -> u16 {
        match self {
            Class::Request => 0b00,
            Class::Indication => 0b01,
            Class::SuccessResponse => 0b10,
            Class::ErrorResponse => 0b11,
        }
    }
}

/// A raw STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub kind: u16,
    pub value: Vec<u8>,
}

/// A decoded STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub class: Class,
    pub method: Method,
    pub transaction_id: [u8; TRANSACTION_ID_LEN],
    pub attributes: Vec<Attribute>,
}

impl Message {
    pub fn new(class: Class, method: Method, transaction_id: [u8; TRANSACTION_ID_LEN]) -> Self {
        Message {
            class,
            method,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Decode a STUN message, validating the header and attribute framing.
    ///
    /// Any mismatch (magic cookie, declared length, truncated attribute)
    /// fails the whole message; nothing is partially processed.
    pub fn decode(buf: &[u8]) -> RelayResult<Message> {
        if buf.len() < HEADER_LEN {
            return Err(RelayError::Protocol("short header".to_string()));
        }
        if buf[0] & 0xC0 != 0 {
            return Err(RelayError::Protocol("not a STUN message".to_string()));
        }

        let raw_type = u16::from_be_bytes([buf[0], buf[1]]);
        let declared_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if cookie != MAGIC_COOKIE {
            return Err(RelayError::Protocol("bad magic cookie".to_string()));
        }
        if declared_len != buf.len() - HEADER_LEN || declared_len % 4 != 0 {
            return Err(RelayError::Protocol(format!(
                "declared length {} does not match buffer",
                declared_len
            )));
        }

        let class = Class::from_bits(((raw_type >> 7) & 0b10) | ((raw_type >> 4) & 0b01));
        let method_code =
            ((raw_type >> 2) & 0x0F80) | ((raw_type >> 1) & 0x0070) | (raw_type & 0x000F);
        let method = Method::from_code(method_code).ok_or_else(|| {
            RelayError::Protocol(format!("unknown method 0x{:03x}", method_code))
        })?;

        let mut transaction_id = [0u8; TRANSACTION_ID_LEN];
        transaction_id.copy_from_slice(&buf[8..HEADER_LEN]);

        let mut attributes = Vec::new();
        let mut pos = HEADER_LEN;
        while pos < buf.len() {
            if pos + 4 > buf.len() {
                return Err(RelayError::Protocol("truncated attribute header".to_string()));
            }
            let kind = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
            if pos + 4 + len > buf.len() {
                return Err(RelayError::Protocol("truncated attribute value".to_string()));
            }
            attributes.push(Attribute {
                kind,
                value: buf[pos + 4..pos + 4 + len].to_vec(),
            });
            pos += 4 + len + padding(len);
        }
        if pos != buf.len() {
            return Err(RelayError::Protocol("attribute overrun".to_string()));
        }

        Ok(Message {
            class,
            method,
            transaction_id,
            attributes,
        })
    }

    /// Encode the message with a correct length field
    pub fn encode(&self) -> Vec<u8> {
        let body: usize = self
            .attributes
            .iter()
            .map(|a| 4 + a.value.len() + padding(a.value.len()))
            .sum();

        let mut buf = Vec::with_capacity(HEADER_LEN + body);
        buf.extend_from_slice(&self.type_code().to_be_bytes());
        buf.extend_from_slice(&(body as u16).to_be_bytes());
        buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf.extend_from_slice(&self.transaction_id);
        for a in &self.attributes {
            push_attribute(&mut buf, a.kind, &a.value);
        }
        buf
    }

    fn type_code(&self) -> u16 {
        let m = self.method.code();
        let c = self.class.bits();
        ((m & 0x0F80) << 2) | ((m & 0x0070) << 1) | (m & 0x000F) | ((c & 0b10) << 7) | ((c & 0b01) << 4)
    }

    pub fn add(&mut self, kind: u16, value: impl Into<Vec<u8>>) {
        self.attributes.push(Attribute {
            kind,
            value: value.into(),
        });
    }

    pub fn attribute(&self, kind: u16) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.kind == kind)
            .map(|a| a.value.as_slice())
    }

    /// All values of a repeatable attribute (XOR-PEER-ADDRESS may appear
    /// several times in one CreatePermission request)
    pub fn attributes_of(&self, kind: u16) -> impl Iterator<Item = &[u8]> {
        self.attributes
            .iter()
            .filter(move |a| a.kind == kind)
            .map(|a| a.value.as_slice())
    }

    pub fn attr_string(&self, kind: u16) -> Option<&str> {
        self.attribute(kind)
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn attr_u32(&self, kind: u16) -> Option<u32> {
        self.attribute(kind).and_then(|v| {
            let bytes: [u8; 4] = v.try_into().ok()?;
            Some(u32::from_be_bytes(bytes))
        })
    }

    pub fn add_xor_address(&mut self, kind: u16, addr: SocketAddr) {
        let value = encode_xor_address(addr, &self.transaction_id);
        self.add(kind, value);
    }

    pub fn xor_address(&self, kind: u16) -> Option<SocketAddr> {
        self.attribute(kind)
            .and_then(|v| decode_xor_address(v, &self.transaction_id))
    }

    /// All XOR-encoded addresses of a repeatable attribute
    pub fn xor_addresses(&self, kind: u16) -> Vec<SocketAddr> {
        self.attributes_of(kind)
            .filter_map(|v| decode_xor_address(v, &self.transaction_id))
            .collect()
    }

    pub fn add_error_code(&mut self, code: u16) {
        let reason = error_code::reason(code);
        let mut value = Vec::with_capacity(4 + reason.len());
        value.extend_from_slice(&[0, 0, (code / 100) as u8, (code % 100) as u8]);
        value.extend_from_slice(reason.as_bytes());
        self.add(attr::ERROR_CODE, value);
    }

    pub fn error_code(&self) -> Option<u16> {
        self.attribute(attr::ERROR_CODE).and_then(|v| {
            if v.len() < 4 {
                return None;
            }
            Some(u16::from(v[2]) * 100 + u16::from(v[3]))
        })
    }
}

/// Quick check for the STUN framing of an inbound datagram
pub fn is_stun(buf: &[u8]) -> bool {
    buf.len() >= HEADER_LEN
        && buf[0] & 0xC0 == 0
        && u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) == MAGIC_COOKIE
}

/// ChannelData framing check: the first two bits are 0b01
pub fn is_channel_data(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[0] & 0xC0 == 0x40
}

/// A ChannelData frame: 4-byte header instead of a full Data indication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelData<'a> {
    pub number: u16,
    pub data: &'a [u8],
}

impl<'a> ChannelData<'a> {
    pub fn decode(buf: &'a [u8]) -> RelayResult<Self> {
        if buf.len() < 4 {
            return Err(RelayError::Protocol("short channel data".to_string()));
        }
        let number = u16::from_be_bytes([buf[0], buf[1]]);
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Err(RelayError::Protocol("truncated channel data".to_string()));
        }
        Ok(ChannelData {
            number,
            data: &buf[4..4 + len],
        })
    }

    pub fn encode(number: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + data.len());
        buf.extend_from_slice(&number.to_be_bytes());
        buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
        buf.extend_from_slice(data);
        buf
    }
}

/// Append MESSAGE-INTEGRITY over the message so far.
///
/// The HMAC covers the message with its length field already counting the
/// attribute being appended.
pub fn append_integrity(buf: &mut Vec<u8>, key: &[u8]) {
    let new_len = buf.len() - HEADER_LEN + 4 + INTEGRITY_LEN;
    set_length(buf, new_len);
    let tag = hmac_sha1(key, buf);
    push_attribute(buf, attr::MESSAGE_INTEGRITY, &tag);
}

/// Verify MESSAGE-INTEGRITY against a key; false when absent or mismatched
pub fn verify_integrity(raw: &[u8], key: &[u8]) -> bool {
    let offset = match find_attribute(raw, attr::MESSAGE_INTEGRITY) {
        Some(o) => o,
        None => return false,
    };
    if raw.len() < offset + 4 + INTEGRITY_LEN {
        return false;
    }
    let mut prefix = raw[..offset].to_vec();
    set_length(&mut prefix, offset - HEADER_LEN + 4 + INTEGRITY_LEN);
    let expected = hmac_sha1(key, &prefix);
    constant_time_eq(&expected, &raw[offset + 4..offset + 4 + INTEGRITY_LEN])
}

/// Append FINGERPRINT over the message so far
pub fn append_fingerprint(buf: &mut Vec<u8>) {
    let new_len = buf.len() - HEADER_LEN + 8;
    set_length(buf, new_len);
    let fp = crc32(buf) ^ FINGERPRINT_XOR;
    push_attribute(buf, attr::FINGERPRINT, &fp.to_be_bytes());
}

/// Validate FINGERPRINT; called before any other attribute is trusted
pub fn verify_fingerprint(raw: &[u8]) -> RelayResult<()> {
    let offset = find_attribute(raw, attr::FINGERPRINT)
        .ok_or_else(|| RelayError::Protocol("no fingerprint".to_string()))?;
    if raw.len() < offset + 8 {
        return Err(RelayError::Protocol("truncated fingerprint".to_string()));
    }
    let mut prefix = raw[..offset].to_vec();
    set_length(&mut prefix, offset - HEADER_LEN + 8);
    let expected = crc32(&prefix) ^ FINGERPRINT_XOR;
    let got = u32::from_be_bytes([
        raw[offset + 4],
        raw[offset + 5],
        raw[offset + 6],
        raw[offset + 7],
    ]);
    if expected != got {
        return Err(RelayError::Protocol("fingerprint mismatch".to_string()));
    }
    Ok(())
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn push_attribute(buf: &mut Vec<u8>, kind: u16, value: &[u8]) {
    buf.extend_from_slice(&kind.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
    buf.extend_from_slice(value);
    for _ in 0..padding(value.len()) {
        buf.push(0);
    }
}

fn set_length(buf: &mut [u8], len: usize) {
    buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
}

/// Byte offset of the first attribute of the given type, walking the raw TLVs
fn find_attribute(raw: &[u8], kind: u16) -> Option<usize> {
    let mut pos = HEADER_LEN;
    while pos + 4 <= raw.len() {
        let k = u16::from_be_bytes([raw[pos], raw[pos + 1]]);
        let len = u16::from_be_bytes([raw[pos + 2], raw[pos + 3]]) as usize;
        if k == kind {
            return Some(pos);
        }
        pos += 4 + len + padding(len);
    }
    None
}

fn encode_xor_address(addr: SocketAddr, transaction_id: &[u8; TRANSACTION_ID_LEN]) -> Vec<u8> {
    let xor_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let mut value = Vec::with_capacity(20);
    value.push(0);
    match addr.ip() {
        IpAddr::V4(ip) => {
            value.push(0x01);
            value.extend_from_slice(&xor_port.to_be_bytes());
            for (i, octet) in ip.octets().iter().enumerate() {
                value.push(octet ^ cookie[i]);
            }
        }
        IpAddr::V6(ip) => {
            value.push(0x02);
            value.extend_from_slice(&xor_port.to_be_bytes());
            let mut mask = [0u8; 16];
            mask[..4].copy_from_slice(&cookie);
            mask[4..].copy_from_slice(transaction_id);
            for (i, octet) in ip.octets().iter().enumerate() {
                value.push(octet ^ mask[i]);
            }
        }
    }
    value
}

fn decode_xor_address(value: &[u8], transaction_id: &[u8; TRANSACTION_ID_LEN]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
    let cookie = MAGIC_COOKIE.to_be_bytes();
    match value[1] {
        0x01 => {
            let mut octets = [0u8; 4];
            for i in 0..4 {
                octets[i] = value[4 + i] ^ cookie[i];
            }
            Some(SocketAddr::new(IpAddr::from(octets), port))
        }
        0x02 if value.len() >= 20 => {
            let mut mask = [0u8; 16];
            mask[..4].copy_from_slice(&cookie);
            mask[4..].copy_from_slice(transaction_id);
            let mut octets = [0u8; 16];
            for i in 0..16 {
                octets[i] = value[4 + i] ^ mask[i];
            }
            Some(SocketAddr::new(IpAddr::from(octets), port))
        }
        _ => None,
    }
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> [u8; INTEGRITY_LEN] {
    // HMAC accepts keys of any length
    let mut mac = HmacSha1::new_from_slice(key).expect("hmac key");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// CRC32 (IEEE reflected, polynomial 0xEDB88320)
fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid() -> [u8; TRANSACTION_ID_LEN] {
        [7u8; TRANSACTION_ID_LEN]
    }

    #[test]
    fn test_roundtrip_preserves_bytes() {
        let mut msg = Message::new(Class::Request, Method::Allocate, txid());
        msg.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
        msg.add(attr::LIFETIME, 600u32.to_be_bytes().to_vec());
        msg.add(attr::USERNAME, b"1700000000:alice".to_vec());
        msg.add_xor_address(attr::XOR_PEER_ADDRESS, "192.0.2.7:4242".parse().unwrap());

        let bytes = msg.encode();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_type_codes_match_rfc() {
        let allocate = Message::new(Class::Request, Method::Allocate, txid());
        assert_eq!(allocate.type_code(), 0x0003);
        let allocate_ok = Message::new(Class::SuccessResponse, Method::Allocate, txid());
        assert_eq!(allocate_ok.type_code(), 0x0103);
        let allocate_err = Message::new(Class::ErrorResponse, Method::Allocate, txid());
        assert_eq!(allocate_err.type_code(), 0x0113);
        let send = Message::new(Class::Indication, Method::Send, txid());
        assert_eq!(send.type_code(), 0x0016);
        let data = Message::new(Class::Indication, Method::Data, txid());
        assert_eq!(data.type_code(), 0x0017);
        let channel_bind = Message::new(Class::Request, Method::ChannelBind, txid());
        assert_eq!(channel_bind.type_code(), 0x0009);
    }

    #[test]
    fn test_bad_cookie_rejected() {
        let mut bytes = Message::new(Class::Request, Method::Binding, txid()).encode();
        bytes[4] = 0xFF;
        assert!(matches!(
            Message::decode(&bytes),
            Err(RelayError::Protocol(_))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut msg = Message::new(Class::Request, Method::Binding, txid());
        msg.add(attr::SOFTWARE, b"test".to_vec());
        let mut bytes = msg.encode();
        bytes[3] = bytes[3].wrapping_add(4);
        assert!(matches!(
            Message::decode(&bytes),
            Err(RelayError::Protocol(_))
        ));
        // truncated buffer with an intact length field fails too
        let bytes = msg.encode();
        assert!(Message::decode(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_truncated_attribute_rejected() {
        let mut bytes = Message::new(Class::Request, Method::Binding, txid()).encode();
        // attribute header claiming 8 bytes of value with only 4 present
        bytes.extend_from_slice(&attr::SOFTWARE.to_be_bytes());
        bytes.extend_from_slice(&8u16.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let len = (bytes.len() - HEADER_LEN) as u16;
        bytes[2..4].copy_from_slice(&len.to_be_bytes());
        assert!(matches!(
            Message::decode(&bytes),
            Err(RelayError::Protocol(_))
        ));
    }

    #[test]
    fn test_xor_address_roundtrip_v4_and_v6() {
        let mut msg = Message::new(Class::SuccessResponse, Method::Binding, txid());
        let v4: SocketAddr = "203.0.113.9:50000".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        msg.add_xor_address(attr::XOR_MAPPED_ADDRESS, v4);
        msg.add_xor_address(attr::XOR_PEER_ADDRESS, v6);
        assert_eq!(msg.xor_address(attr::XOR_MAPPED_ADDRESS), Some(v4));
        assert_eq!(msg.xor_address(attr::XOR_PEER_ADDRESS), Some(v6));
    }

    #[test]
    fn test_error_code_roundtrip() {
        let mut msg = Message::new(Class::ErrorResponse, Method::Allocate, txid());
        msg.add_error_code(error_code::ALLOCATION_MISMATCH);
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.error_code(), Some(437));
    }

    #[test]
    fn test_integrity_sign_and_verify() {
        let key = b"0123456789abcdef";
        let mut msg = Message::new(Class::Request, Method::Refresh, txid());
        msg.add(attr::USERNAME, b"1700000000:bob".to_vec());
        let mut bytes = msg.encode();
        append_integrity(&mut bytes, key);

        assert!(verify_integrity(&bytes, key));
        assert!(!verify_integrity(&bytes, b"wrong key"));

        // any tamper after signing breaks verification
        let mut tampered = bytes.clone();
        tampered[HEADER_LEN + 4] ^= 0x01;
        assert!(!verify_integrity(&tampered, key));

        // the signed message still decodes
        assert!(Message::decode(&bytes).is_ok());
    }

    #[test]
    fn test_fingerprint_after_integrity() {
        let key = b"key";
        let mut msg = Message::new(Class::Request, Method::Allocate, txid());
        msg.add(attr::REQUESTED_TRANSPORT, vec![17, 0, 0, 0]);
        let mut bytes = msg.encode();
        append_integrity(&mut bytes, key);
        append_fingerprint(&mut bytes);

        assert!(verify_fingerprint(&bytes).is_ok());
        // integrity still verifies with the fingerprint appended after it
        assert!(verify_integrity(&bytes, key));

        let mut tampered = bytes.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(verify_fingerprint(&tampered).is_err());
    }

    #[test]
    fn test_channel_data_framing() {
        let frame = ChannelData::encode(0x4001, b"media payload");
        assert!(is_channel_data(&frame));
        assert!(!is_stun(&frame));
        let decoded = ChannelData::decode(&frame).unwrap();
        assert_eq!(decoded.number, 0x4001);
        assert_eq!(decoded.data, b"media payload");

        assert!(ChannelData::decode(&frame[..3]).is_err());
    }

    #[test]
    fn test_crc32_known_vector() {
        // CRC32("123456789") = 0xCBF43926
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }
}
