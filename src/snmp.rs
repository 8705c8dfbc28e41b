//! Minimal SNMPv2c agent: BER codec for GET, GETNEXT and GETBULK requests
//! and their responses, answering from an [`OidMapper`].

use crate::{
    oid::{Oid, OidMapper, OidValue, VarBind},
    Error,
};

pub const VERSION_2C: i64 = 1;

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

const PDU_GET: u8 = 0xA0;
const PDU_GET_NEXT: u8 = 0xA1;
const PDU_RESPONSE: u8 = 0xA2;
const PDU_GET_BULK: u8 = 0xA5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Message truncated")]
    Truncated,
    #[error("Expected tag 0x{expected:02X}, found 0x{found:02X}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("Unsupported length encoding 0x{0:02X}")]
    Length(u8),
    #[error("Integer does not fit in 64 bits")]
    IntegerOverflow,
    #[error("Malformed object identifier")]
    Oid,
    #[error("Unsupported PDU type 0x{0:02X}")]
    UnsupportedPdu(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    GetNext,
    GetBulk {
        non_repeaters: usize,
        max_repetitions: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub version: i64,
    pub community: Vec<u8>,
    pub request_id: i64,
    pub kind: RequestKind,
    pub oids: Vec<Oid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: i64,
    pub community: Vec<u8>,
    pub request_id: i64,
    pub varbinds: Vec<VarBind>,
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

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let first = self.take(1)?[0];
        if first < 0x80 {
            return Ok(usize::from(first));
        }
        let count = usize::from(first & 0x7F);
        if count == 0 || count > 4 {
            return Err(DecodeError::Length(first));
        }
        Ok(self
            .take(count)?
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b)))
    }

    fn any(&mut self) -> Result<(u8, &'a [u8]), DecodeError> {
        let tag = self.take(1)?[0];
        let length = self.length()?;
        Ok((tag, self.take(length)?))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], DecodeError> {
        let (found, content) = self.any()?;
        if found != expected {
            return Err(DecodeError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }

    fn integer(&mut self) -> Result<i64, DecodeError> {
        let content = self.expect(TAG_INTEGER)?;
        if content.is_empty() || content.len() > 8 {
            return Err(DecodeError::IntegerOverflow);
        }
        let negative = content[0] & 0x80 != 0;
        let init = if negative { -1i64 } else { 0 };
        Ok(content
            .iter()
            .fold(init, |acc, &b| (acc << 8) | i64::from(b)))
    }

    fn oid(&mut self) -> Result<Oid, DecodeError> {
        decode_oid(self.expect(TAG_OID)?)
    }
}

fn decode_oid(content: &[u8]) -> Result<Oid, DecodeError> {
    let mut subids = Vec::new();
    let mut current: u32 = 0;
    let mut pending = false;
    for &b in content {
        current = current
            .checked_mul(128)
            .ok_or(DecodeError::Oid)?
            | u32::from(b & 0x7F);
        pending = b & 0x80 != 0;
        if !pending {
            subids.push(current);
            current = 0;
        }
    }
    if pending || subids.is_empty() {
        return Err(DecodeError::Oid);
    }
    let first = subids[0];
    let (x, y) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut components = vec![x, y];
    components.extend_from_slice(&subids[1..]);
    Ok(Oid::new(components))
}

impl Request {
    pub fn decode(datagram: &[u8]) -> Result<Self, DecodeError> {
        let mut message = Reader::new(Reader::new(datagram).expect(TAG_SEQUENCE)?);
        let version = message.integer()?;
        let community = message.expect(TAG_OCTET_STRING)?.to_vec();

        let (tag, pdu) = message.any()?;
        if !matches!(tag, PDU_GET | PDU_GET_NEXT | PDU_GET_BULK) {
            return Err(DecodeError::UnsupportedPdu(tag));
        }
        let mut pdu = Reader::new(pdu);
        let request_id = pdu.integer()?;
        let first = pdu.integer()?;
        let second = pdu.integer()?;

        let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
        let mut oids = Vec::new();
        while !list.is_empty() {
            let mut varbind = Reader::new(list.expect(TAG_SEQUENCE)?);
            oids.push(varbind.oid()?);
            // request values are NULL placeholders
            varbind.any()?;
        }

        let kind = match tag {
            PDU_GET => RequestKind::Get,
            PDU_GET_NEXT => RequestKind::GetNext,
            _ => RequestKind::GetBulk {
                non_repeaters: usize::try_from(first.max(0)).unwrap_or(0),
                max_repetitions: usize::try_from(second.max(0)).unwrap_or(0),
            },
        };
        Ok(Self {
            version,
            community,
            request_id,
            kind,
            oids,
        })
    }
}

fn push_length(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    push_length(out, content.len());
    out.extend_from_slice(content);
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // strip redundant sign bytes, keep the sign bit of the next byte intact
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

fn encode_subid(out: &mut Vec<u8>, mut value: u32) {
    let mut tmp = [0u8; 5];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = tmp.len() - 1;
    for (j, b) in tmp.iter().enumerate().skip(i) {
        out.push(if j == last { *b } else { *b | 0x80 });
    }
}

fn encode_oid(oid: &Oid) -> Vec<u8> {
    let components = oid.components();
    let mut out = Vec::new();
    match components {
        [] => out.push(0),
        [x] => encode_subid(&mut out, x.saturating_mul(40)),
        [x, y, rest @ ..] => {
            encode_subid(&mut out, x.saturating_mul(40).saturating_add(*y));
            for &c in rest {
                encode_subid(&mut out, c);
            }
        }
    }
    out
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        let mut list = Vec::new();
        for varbind in &self.varbinds {
            let mut entry = Vec::new();
            push_tlv(&mut entry, TAG_OID, &encode_oid(&varbind.oid));
            match &varbind.value {
                OidValue::Str(s) => push_tlv(&mut entry, TAG_OCTET_STRING, s.as_bytes()),
                OidValue::NoSuchObject => push_tlv(&mut entry, TAG_NO_SUCH_OBJECT, &[]),
                OidValue::EndOfMibView => push_tlv(&mut entry, TAG_END_OF_MIB_VIEW, &[]),
            }
            push_tlv(&mut list, TAG_SEQUENCE, &entry);
        }

        let mut pdu = Vec::new();
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(self.request_id));
        push_tlv(&mut pdu, TAG_INTEGER, &[0]);
        push_tlv(&mut pdu, TAG_INTEGER, &[0]);
        push_tlv(&mut pdu, TAG_SEQUENCE, &list);

        let mut message = Vec::new();
        push_tlv(&mut message, TAG_INTEGER, &encode_integer(self.version));
        push_tlv(&mut message, TAG_OCTET_STRING, &self.community);
        push_tlv(&mut message, PDU_RESPONSE, &pdu);

        let mut out = Vec::with_capacity(message.len() + 4);
        push_tlv(&mut out, TAG_SEQUENCE, &message);
        out
    }
}

/// Answers v2c requests for one community.
#[derive(Debug, Clone)]
pub struct SnmpAgent {
    mapper: OidMapper,
    community: String,
    max_repetitions: usize,
}

impl SnmpAgent {
    pub fn new(mapper: OidMapper, community: impl Into<String>, max_repetitions: usize) -> Self {
        Self {
            mapper,
            community: community.into(),
            max_repetitions,
        }
    }

    pub fn mapper(&self) -> &OidMapper {
        &self.mapper
    }

    /// Builds the response for one request. Requests with the wrong version
    /// or community yield `None`.
    pub fn respond(&self, request: Request) -> Option<Response> {
        if request.version != VERSION_2C {
            log::warn!("Dropping SNMP request with version {}", request.version);
            return None;
        }
        if request.community != self.community.as_bytes() {
            log::warn!(
                "Dropping SNMP request with community {:?}",
                String::from_utf8_lossy(&request.community)
            );
            return None;
        }

        let view = self.mapper.view();
        let varbinds = match request.kind {
            RequestKind::Get => request
                .oids
                .iter()
                .map(|oid| VarBind::new(oid.clone(), view.get(oid)))
                .collect(),
            RequestKind::GetNext => request.oids.iter().map(|oid| view.next(oid)).collect(),
            RequestKind::GetBulk {
                non_repeaters,
                max_repetitions,
            } => view.bulk(
                non_repeaters,
                max_repetitions.min(self.max_repetitions),
                &request.oids,
            ),
        };
        log::debug!(
            "SNMP {:?} id={} -> {} varbinds",
            request.kind,
            request.request_id,
            varbinds.len()
        );
        Some(Response {
            version: request.version,
            community: request.community,
            request_id: request.request_id,
            varbinds,
        })
    }

    /// Decodes a datagram and encodes the answer, if any.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let request = Request::decode(datagram)?;
        Ok(self.respond(request).map(|response| response.encode()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TelemetryStore;
    use std::sync::Arc;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn request(version: i64, community: &str, tag: u8, fields: (i64, i64), oids: &[Oid]) -> Vec<u8> {
        let mut list = Vec::new();
        for o in oids {
            let mut entry = Vec::new();
            push_tlv(&mut entry, TAG_OID, &encode_oid(o));
            push_tlv(&mut entry, 0x05, &[]);
            push_tlv(&mut list, TAG_SEQUENCE, &entry);
        }
        let mut pdu = Vec::new();
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(4242));
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(fields.0));
        push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(fields.1));
        push_tlv(&mut pdu, TAG_SEQUENCE, &list);
        let mut message = Vec::new();
        push_tlv(&mut message, TAG_INTEGER, &encode_integer(version));
        push_tlv(&mut message, TAG_OCTET_STRING, community.as_bytes());
        push_tlv(&mut message, tag, &pdu);
        let mut out = Vec::new();
        push_tlv(&mut out, TAG_SEQUENCE, &message);
        out
    }

    fn agent() -> SnmpAgent {
        let store = Arc::new(TelemetryStore::new());
        store.put(3, 5, 10, 13.25);
        store.put(3, 5, 126, 72.1);
        SnmpAgent::new(OidMapper::new(oid("1.3.6.5"), store), "public", 64)
    }

    /// Pulls the varbind list back out of an encoded response.
    fn varbinds(encoded: &[u8]) -> Vec<(Oid, u8, Vec<u8>)> {
        let mut message = Reader::new(Reader::new(encoded).expect(TAG_SEQUENCE).unwrap());
        assert_eq!(message.integer().unwrap(), VERSION_2C);
        message.expect(TAG_OCTET_STRING).unwrap();
        let mut pdu = Reader::new(message.expect(PDU_RESPONSE).unwrap());
        assert_eq!(pdu.integer().unwrap(), 4242);
        assert_eq!(pdu.integer().unwrap(), 0);
        assert_eq!(pdu.integer().unwrap(), 0);
        let mut list = Reader::new(pdu.expect(TAG_SEQUENCE).unwrap());
        let mut out = Vec::new();
        while !list.is_empty() {
            let mut vb = Reader::new(list.expect(TAG_SEQUENCE).unwrap());
            let o = vb.oid().unwrap();
            let (tag, content) = vb.any().unwrap();
            out.push((o, tag, content.to_vec()));
        }
        out
    }

    #[test]
    fn integer_encoding() {
        assert_eq!(encode_integer(0), vec![0x00]);
        assert_eq!(encode_integer(127), vec![0x7F]);
        assert_eq!(encode_integer(128), vec![0x00, 0x80]);
        assert_eq!(encode_integer(-1), vec![0xFF]);
        assert_eq!(encode_integer(-129), vec![0xFF, 0x7F]);
    }

    #[test]
    fn oid_encoding() {
        assert_eq!(
            encode_oid(&oid("1.3.6.5.10.3.5.126.0")),
            vec![0x2B, 0x06, 0x05, 0x0A, 0x03, 0x05, 0x7E, 0x00]
        );
        assert_eq!(encode_oid(&oid("1.3.6.1.4.1.200")), vec![0x2B, 6, 1, 4, 1, 0x81, 0x48]);
        assert_eq!(decode_oid(&[0x2B, 6, 1, 4, 1, 0x81, 0x48]).unwrap(), oid("1.3.6.1.4.1.200"));
        assert_eq!(decode_oid(&[0x2B, 0x81]), Err(DecodeError::Oid));
    }

    #[test]
    fn long_form_length() {
        let mut out = Vec::new();
        push_tlv(&mut out, TAG_OCTET_STRING, &[b'x'; 200]);
        assert_eq!(&out[..3], &[0x04, 0x81, 200]);
        let mut reader = Reader::new(&out);
        assert_eq!(reader.expect(TAG_OCTET_STRING).unwrap().len(), 200);
    }

    #[test]
    fn decode_get_bulk() {
        let bytes = request(1, "public", PDU_GET_BULK, (1, 10), &[oid("1.3.6.5.1.0"), oid("1.3.6.5.10")]);
        let request = Request::decode(&bytes).unwrap();
        assert_eq!(request.community, b"public");
        assert_eq!(request.request_id, 4242);
        assert_eq!(
            request.kind,
            RequestKind::GetBulk {
                non_repeaters: 1,
                max_repetitions: 10
            }
        );
        assert_eq!(request.oids.len(), 2);
    }

    #[test]
    fn get_reading_and_unreported_instance() {
        let agent = agent();
        let bytes = request(
            1,
            "public",
            PDU_GET,
            (0, 0),
            &[oid("1.3.6.5.10.3.5.126.0"), oid("1.3.6.5.10.3.6.10.0"), oid("1.3.6.1.2.1.1.1.0")],
        );
        let response = agent.handle_datagram(&bytes).unwrap().unwrap();
        let vbs = varbinds(&response);
        assert_eq!(vbs[0], (oid("1.3.6.5.10.3.5.126.0"), TAG_OCTET_STRING, b"72.1".to_vec()));
        assert_eq!(vbs[1], (oid("1.3.6.5.10.3.6.10.0"), TAG_OCTET_STRING, b"0".to_vec()));
        assert_eq!(vbs[2].1, TAG_NO_SUCH_OBJECT);
    }

    #[test]
    fn get_next_walks_into_battery_data() {
        let agent = agent();
        let bytes = request(1, "public", PDU_GET_NEXT, (0, 0), &[oid("1.3.6.5.10.0")]);
        let vbs = varbinds(&agent.handle_datagram(&bytes).unwrap().unwrap());
        assert_eq!(vbs[0], (oid("1.3.6.5.10.1.2.10.0"), TAG_OCTET_STRING, b"0".to_vec()));

        let bytes = request(1, "public", PDU_GET_NEXT, (0, 0), &[oid("1.3.6.5.10.3.4.126.0")]);
        let vbs = varbinds(&agent.handle_datagram(&bytes).unwrap().unwrap());
        assert_eq!(vbs[0], (oid("1.3.6.5.10.3.5.10.0"), TAG_OCTET_STRING, b"13.25".to_vec()));

        let bytes = request(1, "public", PDU_GET_NEXT, (0, 0), &[oid("1.3.6.5.10.4.5.126.0")]);
        let vbs = varbinds(&agent.handle_datagram(&bytes).unwrap().unwrap());
        assert_eq!(vbs[0].1, TAG_END_OF_MIB_VIEW);
    }

    #[test]
    fn bulk_is_capped_by_configuration() {
        let store = Arc::new(TelemetryStore::new());
        let agent = SnmpAgent::new(OidMapper::new(oid("1.3.6.5"), store), "public", 3);
        let bytes = request(1, "public", PDU_GET_BULK, (0, 100), &[oid("1.3.6.5")]);
        let vbs = varbinds(&agent.handle_datagram(&bytes).unwrap().unwrap());
        assert_eq!(vbs.len(), 3);
        assert_eq!(vbs[2].0, oid("1.3.6.5.3.0"));
    }

    #[test]
    fn wrong_community_or_version_is_dropped() {
        let agent = agent();
        let bytes = request(1, "private", PDU_GET, (0, 0), &[oid("1.3.6.5.1.0")]);
        assert_eq!(agent.handle_datagram(&bytes).unwrap(), None);
        let bytes = request(0, "public", PDU_GET, (0, 0), &[oid("1.3.6.5.1.0")]);
        assert_eq!(agent.handle_datagram(&bytes).unwrap(), None);
    }

    #[test]
    fn malformed_datagrams_are_errors() {
        let agent = agent();
        assert!(agent.handle_datagram(&[]).is_err());
        assert!(agent.handle_datagram(&[0x30, 0x05, 0x02]).is_err());
        let set = request(1, "public", 0xA3, (0, 0), &[oid("1.3.6.5.1.0")]);
        assert!(matches!(
            agent.handle_datagram(&set),
            Err(Error::Snmp(DecodeError::UnsupportedPdu(0xA3)))
        ));
    }
}
