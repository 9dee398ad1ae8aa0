//! SNMP v1/v2c 报文的 BER 编解码
//!
//! 只覆盖轮询需要的子集：Get / GetNext 请求与 GetResponse 响应。

use bytes::{BufMut, BytesMut};

use super::oid::Oid;
use crate::error::{AppError, Result};

mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_IDENTIFIER: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const IP_ADDRESS: u8 = 0x40;
    pub const COUNTER32: u8 = 0x41;
    pub const GAUGE32: u8 = 0x42;
    pub const TIMETICKS: u8 = 0x43;
    pub const OPAQUE: u8 = 0x44;
    pub const COUNTER64: u8 = 0x46;
    pub const NO_SUCH_OBJECT: u8 = 0x80;
    pub const NO_SUCH_INSTANCE: u8 = 0x81;
    pub const END_OF_MIB_VIEW: u8 = 0x82;
    pub const GET_REQUEST: u8 = 0xA0;
    pub const GET_NEXT_REQUEST: u8 = 0xA1;
    pub const GET_RESPONSE: u8 = 0xA2;
}

/// v1 的 noSuchName 错误码，遍历时视为子树结束
pub const ERROR_NO_SUCH_NAME: i64 = 2;

/// 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2c,
}

impl Version {
    /// 配置中的版本号：1 => v1，2 => v2c，其余不支持
    pub fn from_config(version: u8) -> Option<Version> {
        match version {
            1 => Some(Version::V1),
            2 => Some(Version::V2c),
            _ => None,
        }
    }

    fn wire(self) -> i64 {
        match self {
            Version::V1 => 0,
            Version::V2c => 1,
        }
    }

    fn from_wire(v: i64) -> Result<Version> {
        match v {
            0 => Ok(Version::V1),
            1 => Ok(Version::V2c),
            other => Err(AppError::Codec(format!("不支持的协议版本: {}", other))),
        }
    }
}

/// 变量值
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_octets(&self) -> Option<&[u8]> {
        match self {
            SnmpValue::OctetString(v) => Some(v),
            _ => None,
        }
    }

    /// v2c 的异常值（对象不存在 / 遍历结束）
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }
}

/// 变量绑定
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: SnmpValue) -> Self {
        Self { oid, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    GetResponse,
}

impl PduType {
    fn tag(self) -> u8 {
        match self {
            PduType::GetRequest => tag::GET_REQUEST,
            PduType::GetNextRequest => tag::GET_NEXT_REQUEST,
            PduType::GetResponse => tag::GET_RESPONSE,
        }
    }

    fn from_tag(t: u8) -> Result<PduType> {
        match t {
            tag::GET_REQUEST => Ok(PduType::GetRequest),
            tag::GET_NEXT_REQUEST => Ok(PduType::GetNextRequest),
            tag::GET_RESPONSE => Ok(PduType::GetResponse),
            other => Err(AppError::Codec(format!("不支持的 PDU 类型: 0x{:02x}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub kind: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

/// 完整报文
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: Version,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    /// 构造请求报文，变量值全部为 Null
    pub fn request(
        version: Version,
        community: &str,
        kind: PduType,
        request_id: i32,
        oids: &[Oid],
    ) -> Self {
        Self {
            version,
            community: community.as_bytes().to_vec(),
            pdu: Pdu {
                kind,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: oids
                    .iter()
                    .map(|oid| VarBind::new(oid.clone(), SnmpValue::Null))
                    .collect(),
            },
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut varbinds = BytesMut::new();
        for vb in &self.pdu.varbinds {
            let mut inner = BytesMut::new();
            write_tlv(&mut inner, tag::OBJECT_IDENTIFIER, &encode_oid(&vb.oid));
            encode_value(&mut inner, &vb.value);
            write_tlv(&mut varbinds, tag::SEQUENCE, &inner);
        }

        let mut pdu = BytesMut::new();
        write_tlv(&mut pdu, tag::INTEGER, &encode_integer(self.pdu.request_id as i64));
        write_tlv(&mut pdu, tag::INTEGER, &encode_integer(self.pdu.error_status));
        write_tlv(&mut pdu, tag::INTEGER, &encode_integer(self.pdu.error_index));
        write_tlv(&mut pdu, tag::SEQUENCE, &varbinds);

        let mut body = BytesMut::new();
        write_tlv(&mut body, tag::INTEGER, &encode_integer(self.version.wire()));
        write_tlv(&mut body, tag::OCTET_STRING, &self.community);
        write_tlv(&mut body, self.pdu.kind.tag(), &pdu);

        let mut out = BytesMut::with_capacity(body.len() + 4);
        write_tlv(&mut out, tag::SEQUENCE, &body);
        out.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Message> {
        let mut outer = Reader::new(buf);
        let mut body = Reader::new(outer.expect(tag::SEQUENCE)?);

        let version = Version::from_wire(decode_integer(body.expect(tag::INTEGER)?)?)?;
        let community = body.expect(tag::OCTET_STRING)?.to_vec();

        let (pdu_tag, pdu_content) = body.read_tlv()?;
        let kind = PduType::from_tag(pdu_tag)?;
        let mut pdu = Reader::new(pdu_content);
        let request_id = decode_integer(pdu.expect(tag::INTEGER)?)? as i32;
        let error_status = decode_integer(pdu.expect(tag::INTEGER)?)?;
        let error_index = decode_integer(pdu.expect(tag::INTEGER)?)?;

        let mut list = Reader::new(pdu.expect(tag::SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut vb = Reader::new(list.expect(tag::SEQUENCE)?);
            let oid = decode_oid(vb.expect(tag::OBJECT_IDENTIFIER)?)?;
            let (value_tag, value_content) = vb.read_tlv()?;
            varbinds.push(VarBind::new(oid, decode_value(value_tag, value_content)?));
        }

        Ok(Message {
            version,
            community,
            pdu: Pdu {
                kind,
                request_id,
                error_status,
                error_index,
                varbinds,
            },
        })
    }
}

/// 根据报文头计算完整报文长度，字节不足时返回 None（用于 TCP 分帧）
pub fn frame_length(header: &[u8]) -> Option<usize> {
    if header.len() < 2 {
        return None;
    }
    let first = header[1];
    if first & 0x80 == 0 {
        return Some(2 + first as usize);
    }
    let n = (first & 0x7f) as usize;
    if header.len() < 2 + n {
        return None;
    }
    let len = header[2..2 + n]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Some(2 + n + len)
}

fn encode_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    buf.put_u8(0x80 | significant.len() as u8);
    buf.put_slice(significant);
}

fn write_tlv(buf: &mut BytesMut, t: u8, content: &[u8]) {
    buf.put_u8(t);
    encode_length(buf, content.len());
    buf.put_slice(content);
}

fn encode_integer(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_unsigned(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

fn encode_base128(buf: &mut Vec<u8>, mut v: u32) {
    let mut groups = vec![(v & 0x7f) as u8];
    v >>= 7;
    while v > 0 {
        groups.push(((v & 0x7f) as u8) | 0x80);
        v >>= 7;
    }
    groups.reverse();
    buf.extend_from_slice(&groups);
}

fn encode_oid(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut out = Vec::with_capacity(arcs.len() + 1);
    match arcs {
        [first, second, rest @ ..] => {
            encode_base128(&mut out, first * 40 + second);
            for arc in rest {
                encode_base128(&mut out, *arc);
            }
        }
        [only] => encode_base128(&mut out, only * 40),
        [] => {}
    }
    out
}

fn encode_value(buf: &mut BytesMut, value: &SnmpValue) {
    match value {
        SnmpValue::Integer(v) => write_tlv(buf, tag::INTEGER, &encode_integer(*v)),
        SnmpValue::OctetString(v) => write_tlv(buf, tag::OCTET_STRING, v),
        SnmpValue::Null => write_tlv(buf, tag::NULL, &[]),
        SnmpValue::ObjectIdentifier(oid) => write_tlv(buf, tag::OBJECT_IDENTIFIER, &encode_oid(oid)),
        SnmpValue::IpAddress(v) => write_tlv(buf, tag::IP_ADDRESS, v),
        SnmpValue::Counter32(v) => write_tlv(buf, tag::COUNTER32, &encode_unsigned(*v as u64)),
        SnmpValue::Gauge32(v) => write_tlv(buf, tag::GAUGE32, &encode_unsigned(*v as u64)),
        SnmpValue::TimeTicks(v) => write_tlv(buf, tag::TIMETICKS, &encode_unsigned(*v as u64)),
        SnmpValue::Opaque(v) => write_tlv(buf, tag::OPAQUE, v),
        SnmpValue::Counter64(v) => write_tlv(buf, tag::COUNTER64, &encode_unsigned(*v)),
        SnmpValue::NoSuchObject => write_tlv(buf, tag::NO_SUCH_OBJECT, &[]),
        SnmpValue::NoSuchInstance => write_tlv(buf, tag::NO_SUCH_INSTANCE, &[]),
        SnmpValue::EndOfMibView => write_tlv(buf, tag::END_OF_MIB_VIEW, &[]),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let buf: &'a [u8] = self.buf;
        let truncated = || AppError::Codec("报文被截断".to_string());
        let t = *buf.first().ok_or_else(truncated)?;
        let first = *buf.get(1).ok_or_else(truncated)?;
        let (len, header) = if first & 0x80 == 0 {
            (first as usize, 2)
        } else {
            let n = (first & 0x7f) as usize;
            if n == 0 || n > 4 {
                return Err(AppError::Codec(format!("不支持的长度编码: 0x{:02x}", first)));
            }
            let bytes = buf.get(2..2 + n).ok_or_else(truncated)?;
            let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (len, 2 + n)
        };
        let content = buf.get(header..header + len).ok_or_else(truncated)?;
        self.buf = &buf[header + len..];
        Ok((t, content))
    }

    fn expect(&mut self, want: u8) -> Result<&'a [u8]> {
        let (t, content) = self.read_tlv()?;
        if t != want {
            return Err(AppError::Codec(format!(
                "期望类型 0x{:02x}，实际 0x{:02x}",
                want, t
            )));
        }
        Ok(content)
    }
}

fn decode_integer(content: &[u8]) -> Result<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(AppError::Codec(format!("整数长度非法: {}", content.len())));
    }
    let init: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(content
        .iter()
        .fold(init, |acc, b| (acc << 8) | *b as i64))
}

fn decode_unsigned(content: &[u8]) -> Result<u64> {
    let content = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if content.is_empty() || content.len() > 8 {
        return Err(AppError::Codec(format!("无符号数长度非法: {}", content.len())));
    }
    Ok(content.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_oid(content: &[u8]) -> Result<Oid> {
    let mut subids = Vec::new();
    let mut current: u32 = 0;
    let mut pending = false;
    for b in content {
        current = current
            .checked_mul(128)
            .ok_or_else(|| AppError::Codec("OID 子标识溢出".to_string()))?
            | (b & 0x7f) as u32;
        pending = true;
        if b & 0x80 == 0 {
            subids.push(current);
            current = 0;
            pending = false;
        }
    }
    if pending || subids.is_empty() {
        return Err(AppError::Codec("OID 编码不完整".to_string()));
    }

    let first = subids[0];
    let (a, b) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(a);
    arcs.push(b);
    arcs.extend_from_slice(&subids[1..]);
    Ok(Oid::new(arcs))
}

fn decode_value(t: u8, content: &[u8]) -> Result<SnmpValue> {
    let value = match t {
        tag::INTEGER => SnmpValue::Integer(decode_integer(content)?),
        tag::OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        tag::NULL => SnmpValue::Null,
        tag::OBJECT_IDENTIFIER => SnmpValue::ObjectIdentifier(decode_oid(content)?),
        tag::IP_ADDRESS => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| AppError::Codec(format!("IpAddress 长度非法: {}", content.len())))?;
            SnmpValue::IpAddress(octets)
        }
        tag::COUNTER32 => SnmpValue::Counter32(decode_unsigned(content)? as u32),
        tag::GAUGE32 => SnmpValue::Gauge32(decode_unsigned(content)? as u32),
        tag::TIMETICKS => SnmpValue::TimeTicks(decode_unsigned(content)? as u32),
        tag::OPAQUE => SnmpValue::Opaque(content.to_vec()),
        tag::COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        tag::NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        tag::NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        tag::END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => return Err(AppError::Codec(format!("未知的值类型: 0x{:02x}", other))),
    };
    Ok(value)
}
