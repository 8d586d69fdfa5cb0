use crate::sequence_number::SequenceNumber;
use crate::target::AddressFamily;
use pnet_packet::icmp::{
    echo_reply::EchoReplyPacket, echo_request::MutableEchoRequestPacket, IcmpCode, IcmpPacket,
    IcmpTypes,
};
use pnet_packet::icmpv6::{
    echo_reply::EchoReplyPacket as EchoReplyPacketV6,
    echo_request::MutableEchoRequestPacket as MutableEchoRequestPacketV6, Icmpv6Code, Icmpv6Types,
};
use pnet_packet::{ipv4::Ipv4Packet, util, Packet};
use std::{error::Error, fmt};

/// Echo header: type, code, checksum, identifier, sequence number.
pub(crate) const ECHO_HEADER_SIZE: usize = 8;
/// Microsecond send timestamp embedded at the start of the payload.
pub(crate) const TIMESTAMP_SIZE: usize = 8;
const IPV4_MIN_HEADER_SIZE: usize = 20;
const IPV6_HEADER_SIZE: usize = 40;

#[derive(Debug)]
pub struct EncodeError(pub(crate) String);

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for EncodeError {}

#[derive(Debug)]
pub struct MalformedPacket(pub(crate) String);

impl fmt::Display for MalformedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed packet: {}", self.0)
    }
}

impl Error for MalformedPacket {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum EchoKind {
    Request,
    Reply,
    Other,
}

/// Fields of a decoded ICMP echo message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct DecodedEcho {
    pub kind: EchoKind,
    pub identifier: u16,
    pub sequence: SequenceNumber,
    pub send_timestamp_micros: u64,
    pub payload_len: usize,
}

/// Builds an echo request: type/code for the family, the sender's identity
/// in the identifier field, and a payload of the 8-byte big-endian send
/// timestamp followed by `payload_size` filler bytes where byte k = k mod 256.
/// The ones-complement checksum over the whole buffer is patched in last.
pub(crate) fn encode(
    identifier: u16,
    sequence: SequenceNumber,
    payload_size: usize,
    family: AddressFamily,
    send_timestamp_micros: u64,
) -> Result<Vec<u8>, EncodeError> {
    let mut payload = Vec::with_capacity(TIMESTAMP_SIZE + payload_size);
    payload.extend_from_slice(&send_timestamp_micros.to_be_bytes());
    #[allow(clippy::cast_possible_truncation)]
    payload.extend((0..payload_size).map(|k| k as u8));

    let buf = vec![0u8; ECHO_HEADER_SIZE + payload.len()];
    match family {
        AddressFamily::V4 => {
            let mut packet = MutableEchoRequestPacket::owned(buf)
                .ok_or_else(|| EncodeError("out of memory".to_string()))?;
            packet.set_icmp_type(IcmpTypes::EchoRequest);
            packet.set_icmp_code(IcmpCode::new(0));
            packet.set_identifier(identifier);
            packet.set_sequence_number(sequence.into());
            packet.set_payload(&payload);
            let checksum = pnet_packet::icmp::checksum(
                &IcmpPacket::new(packet.packet())
                    .ok_or_else(|| EncodeError("out of memory".to_string()))?,
            );
            packet.set_checksum(checksum);
            Ok(packet.packet().to_vec())
        }
        AddressFamily::V6 => {
            let mut packet = MutableEchoRequestPacketV6::owned(buf)
                .ok_or_else(|| EncodeError("out of memory".to_string()))?;
            packet.set_icmpv6_type(Icmpv6Types::EchoRequest);
            packet.set_icmpv6_code(Icmpv6Code::new(0));
            packet.set_identifier(identifier);
            packet.set_sequence_number(sequence.into());
            packet.set_payload(&payload);
            // The kernel overwrites the ICMPv6 checksum with the
            // pseudo-header sum on raw sockets.
            let checksum = util::checksum(packet.packet(), 1);
            packet.set_checksum(checksum);
            Ok(packet.packet().to_vec())
        }
    }
}

/// Parses an inbound packet: skips the IPv4 header (IHL x 4 bytes) or the
/// fixed 40-byte IPv6 header, then reads the echo fields. The IP source
/// address is not checked; correlation rests on identifier + sequence.
pub(crate) fn decode(buffer: &[u8], family: AddressFamily) -> Result<DecodedEcho, MalformedPacket> {
    let offset = match family {
        AddressFamily::V4 => {
            let ip = Ipv4Packet::new(buffer)
                .ok_or_else(|| MalformedPacket("buffer shorter than an IPv4 header".to_string()))?;
            let header_len = usize::from(ip.get_header_length()) * 4;
            if header_len < IPV4_MIN_HEADER_SIZE {
                return Err(MalformedPacket(format!("bad IPv4 header length {header_len}")));
            }
            header_len
        }
        AddressFamily::V6 => IPV6_HEADER_SIZE,
    };

    if buffer.len() < offset + ECHO_HEADER_SIZE + TIMESTAMP_SIZE {
        return Err(MalformedPacket(format!(
            "{} bytes after the IP header, need at least {}",
            buffer.len().saturating_sub(offset),
            ECHO_HEADER_SIZE + TIMESTAMP_SIZE
        )));
    }
    let icmp_bytes = &buffer[offset..];

    // Echo request and reply share one layout; the reply view reads both.
    let (kind, identifier, sequence, payload) = match family {
        AddressFamily::V4 => {
            let echo = EchoReplyPacket::new(icmp_bytes)
                .ok_or_else(|| MalformedPacket("echo header truncated".to_string()))?;
            let kind = match echo.get_icmp_type() {
                t if t == IcmpTypes::EchoReply => EchoKind::Reply,
                t if t == IcmpTypes::EchoRequest => EchoKind::Request,
                _ => EchoKind::Other,
            };
            (kind, echo.get_identifier(), echo.get_sequence_number(), echo.payload().to_vec())
        }
        AddressFamily::V6 => {
            let echo = EchoReplyPacketV6::new(icmp_bytes)
                .ok_or_else(|| MalformedPacket("echo header truncated".to_string()))?;
            let kind = match echo.get_icmpv6_type() {
                t if t == Icmpv6Types::EchoReply => EchoKind::Reply,
                t if t == Icmpv6Types::EchoRequest => EchoKind::Request,
                _ => EchoKind::Other,
            };
            (kind, echo.get_identifier(), echo.get_sequence_number(), echo.payload().to_vec())
        }
    };

    let mut timestamp_bytes = [0u8; TIMESTAMP_SIZE];
    timestamp_bytes.copy_from_slice(&payload[..TIMESTAMP_SIZE]);

    Ok(DecodedEcho {
        kind,
        identifier,
        sequence: sequence.into(),
        send_timestamp_micros: u64::from_be_bytes(timestamp_bytes),
        payload_len: payload.len(),
    })
}
