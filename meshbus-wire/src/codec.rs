//! Byte-level codec for the peering protocol.
//!
//! Fixed-width big-endian integers, `u16`-length-prefixed UTF-8 strings,
//! `u32`-prefixed container counts, one tag byte per variant. Frames are
//! encoded without an outer length; the transport is expected to deliver
//! whole frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meshbus_core::data::{Data, EnumValue, Port, PortProto, Subnet, Timespan, Timestamp};
use meshbus_core::filter::Filter;
use meshbus_core::ids::{NodeId, StreamId};
use meshbus_core::message::{Command, DataMessage, Payload};
use meshbus_core::protocol::{CloseReason, Frame};
use meshbus_core::topic::Topic;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Wire protocol errors.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("truncated input")]
    Truncated,

    #[error("unknown tag {0:#04x}")]
    UnknownTag(u8),

    #[error("string of {0} bytes exceeds the length prefix")]
    StringTooLong(usize),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("topic table full")]
    TopicTableFull,

    #[error("bad file header")]
    BadHeader,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

// --- frame tags --------------------------------------------------------------

const TAG_HELLO: u8 = 1;
const TAG_HELLO_ACK: u8 = 2;
const TAG_OPEN: u8 = 3;
const TAG_ACK_OPEN: u8 = 4;
const TAG_BATCH: u8 = 5;
const TAG_BATCH_ACK: u8 = 6;
const TAG_FILTER_UPDATE: u8 = 7;
const TAG_CLOSE: u8 = 8;
const TAG_BYE: u8 = 9;

// --- encoding ----------------------------------------------------------------

/// Encodes one frame into `dst`.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    match frame {
        Frame::Hello { node, filter } => {
            dst.put_u8(TAG_HELLO);
            dst.put_u64(node.raw());
            put_filter(filter, dst)?;
        }
        Frame::HelloAck { node, filter, sid } => {
            dst.put_u8(TAG_HELLO_ACK);
            dst.put_u64(node.raw());
            put_filter(filter, dst)?;
            dst.put_u64(sid.raw());
        }
        Frame::Open { sid } => {
            dst.put_u8(TAG_OPEN);
            dst.put_u64(sid.raw());
        }
        Frame::AckOpen { sid } => {
            dst.put_u8(TAG_ACK_OPEN);
            dst.put_u64(sid.raw());
        }
        Frame::Batch {
            sid,
            batch_id,
            messages,
        } => {
            dst.put_u8(TAG_BATCH);
            dst.put_u64(sid.raw());
            dst.put_u64(*batch_id);
            dst.put_u32(messages.len() as u32);
            for msg in messages {
                put_message(msg, dst)?;
            }
        }
        Frame::BatchAck {
            sid,
            batch_id,
            new_credit,
        } => {
            dst.put_u8(TAG_BATCH_ACK);
            dst.put_u64(sid.raw());
            dst.put_u64(*batch_id);
            dst.put_u64(*new_credit);
        }
        Frame::FilterUpdate { filter } => {
            dst.put_u8(TAG_FILTER_UPDATE);
            put_filter(filter, dst)?;
        }
        Frame::Close { sid, reason } => {
            dst.put_u8(TAG_CLOSE);
            dst.put_u64(sid.raw());
            dst.put_u8(close_reason_tag(*reason));
        }
        Frame::Bye => dst.put_u8(TAG_BYE),
    }
    Ok(())
}

/// Convenience wrapper returning a frozen buffer.
pub fn frame_to_bytes(frame: &Frame) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_frame(frame, &mut dst)?;
    Ok(dst.freeze())
}

/// Decodes one frame from `src`, consuming exactly its bytes.
pub fn decode_frame(src: &mut Bytes) -> Result<Frame> {
    let tag = get_u8(src)?;
    let frame = match tag {
        TAG_HELLO => Frame::Hello {
            node: NodeId::from_raw(get_u64(src)?),
            filter: get_filter(src)?,
        },
        TAG_HELLO_ACK => Frame::HelloAck {
            node: NodeId::from_raw(get_u64(src)?),
            filter: get_filter(src)?,
            sid: StreamId::from_raw(get_u64(src)?),
        },
        TAG_OPEN => Frame::Open {
            sid: StreamId::from_raw(get_u64(src)?),
        },
        TAG_ACK_OPEN => Frame::AckOpen {
            sid: StreamId::from_raw(get_u64(src)?),
        },
        TAG_BATCH => {
            let sid = StreamId::from_raw(get_u64(src)?);
            let batch_id = get_u64(src)?;
            let count = get_u32(src)? as usize;
            let mut messages = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                messages.push(get_message(src)?);
            }
            Frame::Batch {
                sid,
                batch_id,
                messages,
            }
        }
        TAG_BATCH_ACK => Frame::BatchAck {
            sid: StreamId::from_raw(get_u64(src)?),
            batch_id: get_u64(src)?,
            new_credit: get_u64(src)?,
        },
        TAG_FILTER_UPDATE => Frame::FilterUpdate {
            filter: get_filter(src)?,
        },
        TAG_CLOSE => Frame::Close {
            sid: StreamId::from_raw(get_u64(src)?),
            reason: close_reason_from(get_u8(src)?)?,
        },
        TAG_BYE => Frame::Bye,
        other => return Err(WireError::UnknownTag(other)),
    };
    Ok(frame)
}

// --- payloads ----------------------------------------------------------------

const DATA_NONE: u8 = 0;
const DATA_BOOLEAN: u8 = 1;
const DATA_COUNT: u8 = 2;
const DATA_INTEGER: u8 = 3;
const DATA_REAL: u8 = 4;
const DATA_STRING: u8 = 5;
const DATA_ADDRESS: u8 = 6;
const DATA_SUBNET: u8 = 7;
const DATA_PORT: u8 = 8;
const DATA_TIMESTAMP: u8 = 9;
const DATA_TIMESPAN: u8 = 10;
const DATA_ENUM: u8 = 11;
const DATA_SET: u8 = 12;
const DATA_TABLE: u8 = 13;
const DATA_VECTOR: u8 = 14;

/// Encodes one data value, containers recursively.
pub fn put_data(value: &Data, dst: &mut BytesMut) -> Result<()> {
    match value {
        Data::None => dst.put_u8(DATA_NONE),
        Data::Boolean(x) => {
            dst.put_u8(DATA_BOOLEAN);
            dst.put_u8(u8::from(*x));
        }
        Data::Count(x) => {
            dst.put_u8(DATA_COUNT);
            dst.put_u64(*x);
        }
        Data::Integer(x) => {
            dst.put_u8(DATA_INTEGER);
            dst.put_i64(*x);
        }
        Data::Real(x) => {
            dst.put_u8(DATA_REAL);
            dst.put_u64(x.to_bits());
        }
        Data::String(x) => {
            dst.put_u8(DATA_STRING);
            put_string(x, dst)?;
        }
        Data::Address(x) => {
            dst.put_u8(DATA_ADDRESS);
            put_address(*x, dst);
        }
        Data::Subnet(x) => {
            dst.put_u8(DATA_SUBNET);
            put_address(x.network, dst);
            dst.put_u8(x.length);
        }
        Data::Port(x) => {
            dst.put_u8(DATA_PORT);
            dst.put_u16(x.number);
            dst.put_u8(match x.proto {
                PortProto::Unknown => 0,
                PortProto::Tcp => 1,
                PortProto::Udp => 2,
                PortProto::Icmp => 3,
            });
        }
        Data::Timestamp(x) => {
            dst.put_u8(DATA_TIMESTAMP);
            dst.put_i64(x.0 .0);
        }
        Data::Timespan(x) => {
            dst.put_u8(DATA_TIMESPAN);
            dst.put_i64(x.0);
        }
        Data::Enum(x) => {
            dst.put_u8(DATA_ENUM);
            put_string(&x.name, dst)?;
        }
        Data::Set(xs) => {
            dst.put_u8(DATA_SET);
            dst.put_u32(xs.len() as u32);
            for x in xs {
                put_data(x, dst)?;
            }
        }
        Data::Table(xs) => {
            dst.put_u8(DATA_TABLE);
            dst.put_u32(xs.len() as u32);
            for (k, v) in xs {
                put_data(k, dst)?;
                put_data(v, dst)?;
            }
        }
        Data::Vector(xs) => {
            dst.put_u8(DATA_VECTOR);
            dst.put_u32(xs.len() as u32);
            for x in xs {
                put_data(x, dst)?;
            }
        }
    }
    Ok(())
}

/// Decodes one data value.
pub fn get_data(src: &mut Bytes) -> Result<Data> {
    let tag = get_u8(src)?;
    let value = match tag {
        DATA_NONE => Data::None,
        DATA_BOOLEAN => Data::Boolean(get_u8(src)? != 0),
        DATA_COUNT => Data::Count(get_u64(src)?),
        DATA_INTEGER => Data::Integer(get_i64(src)?),
        DATA_REAL => Data::Real(f64::from_bits(get_u64(src)?)),
        DATA_STRING => Data::String(get_string(src)?),
        DATA_ADDRESS => Data::Address(get_address(src)?),
        DATA_SUBNET => {
            let network = get_address(src)?;
            let length = get_u8(src)?;
            Data::Subnet(Subnet::new(network, length))
        }
        DATA_PORT => {
            let number = get_u16(src)?;
            let proto = match get_u8(src)? {
                0 => PortProto::Unknown,
                1 => PortProto::Tcp,
                2 => PortProto::Udp,
                3 => PortProto::Icmp,
                other => return Err(WireError::UnknownTag(other)),
            };
            Data::Port(Port::new(number, proto))
        }
        DATA_TIMESTAMP => Data::Timestamp(Timestamp(Timespan(get_i64(src)?))),
        DATA_TIMESPAN => Data::Timespan(Timespan(get_i64(src)?)),
        DATA_ENUM => Data::Enum(EnumValue::new(get_string(src)?)),
        DATA_SET => {
            let count = get_u32(src)?;
            let mut xs = meshbus_core::data::Set::new();
            for _ in 0..count {
                xs.insert(get_data(src)?);
            }
            Data::Set(xs)
        }
        DATA_TABLE => {
            let count = get_u32(src)?;
            let mut xs = meshbus_core::data::Table::new();
            for _ in 0..count {
                let k = get_data(src)?;
                let v = get_data(src)?;
                xs.insert(k, v);
            }
            Data::Table(xs)
        }
        DATA_VECTOR => {
            let count = get_u32(src)? as usize;
            let mut xs = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                xs.push(get_data(src)?);
            }
            Data::Vector(xs)
        }
        other => return Err(WireError::UnknownTag(other)),
    };
    Ok(value)
}

const CMD_PUT: u8 = 0;
const CMD_ERASE: u8 = 1;
const CMD_CLEAR: u8 = 2;

/// Encodes one data-store command.
pub fn put_command(command: &Command, dst: &mut BytesMut) -> Result<()> {
    match command {
        Command::Put { key, value } => {
            dst.put_u8(CMD_PUT);
            put_data(key, dst)?;
            put_data(value, dst)?;
        }
        Command::Erase { key } => {
            dst.put_u8(CMD_ERASE);
            put_data(key, dst)?;
        }
        Command::Clear => dst.put_u8(CMD_CLEAR),
    }
    Ok(())
}

/// Decodes one data-store command.
pub fn get_command(src: &mut Bytes) -> Result<Command> {
    match get_u8(src)? {
        CMD_PUT => Ok(Command::Put {
            key: get_data(src)?,
            value: get_data(src)?,
        }),
        CMD_ERASE => Ok(Command::Erase {
            key: get_data(src)?,
        }),
        CMD_CLEAR => Ok(Command::Clear),
        other => Err(WireError::UnknownTag(other)),
    }
}

const PAYLOAD_DATA: u8 = 0;
const PAYLOAD_COMMAND: u8 = 1;

/// Encodes a payload with its tag byte.
pub fn put_payload(payload: &Payload, dst: &mut BytesMut) -> Result<()> {
    match payload {
        Payload::Data(value) => {
            dst.put_u8(PAYLOAD_DATA);
            put_data(value, dst)
        }
        Payload::Command(command) => {
            dst.put_u8(PAYLOAD_COMMAND);
            put_command(command, dst)
        }
    }
}

/// Decodes a tagged payload.
pub fn get_payload(src: &mut Bytes) -> Result<Payload> {
    match get_u8(src)? {
        PAYLOAD_DATA => Ok(Payload::Data(get_data(src)?)),
        PAYLOAD_COMMAND => Ok(Payload::Command(get_command(src)?)),
        other => Err(WireError::UnknownTag(other)),
    }
}

/// Encodes a routed message as `(topic, tag, body)`. The local origin
/// marker never goes on the wire; receivers stamp their own.
pub fn put_message(msg: &DataMessage, dst: &mut BytesMut) -> Result<()> {
    put_string(msg.topic.as_str(), dst)?;
    put_payload(&msg.payload, dst)
}

/// Decodes one routed message.
pub fn get_message(src: &mut Bytes) -> Result<DataMessage> {
    let topic = Topic::from(get_string(src)?);
    let payload = get_payload(src)?;
    Ok(DataMessage {
        topic,
        payload,
        origin: None,
    })
}

// --- primitives ---------------------------------------------------------------

pub(crate) fn put_string(s: &str, dst: &mut BytesMut) -> Result<()> {
    let len = s.len();
    if len > usize::from(u16::MAX) {
        return Err(WireError::StringTooLong(len));
    }
    dst.put_u16(len as u16);
    dst.put_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn get_string(src: &mut Bytes) -> Result<String> {
    let len = usize::from(get_u16(src)?);
    if src.remaining() < len {
        return Err(WireError::Truncated);
    }
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

fn put_filter(filter: &Filter, dst: &mut BytesMut) -> Result<()> {
    dst.put_u32(filter.len() as u32);
    for topic in filter.entries() {
        put_string(topic.as_str(), dst)?;
    }
    Ok(())
}

fn get_filter(src: &mut Bytes) -> Result<Filter> {
    let count = get_u32(src)?;
    let mut topics = Vec::with_capacity((count as usize).min(4096));
    for _ in 0..count {
        topics.push(Topic::from(get_string(src)?));
    }
    Ok(Filter::from_topics(topics))
}

fn put_address(addr: IpAddr, dst: &mut BytesMut) {
    match addr {
        IpAddr::V4(v4) => {
            dst.put_u8(4);
            dst.put_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            dst.put_u8(16);
            dst.put_slice(&v6.octets());
        }
    }
}

fn get_address(src: &mut Bytes) -> Result<IpAddr> {
    match get_u8(src)? {
        4 => {
            if src.remaining() < 4 {
                return Err(WireError::Truncated);
            }
            let mut octets = [0u8; 4];
            src.copy_to_slice(&mut octets);
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            if src.remaining() < 16 {
                return Err(WireError::Truncated);
            }
            let mut octets = [0u8; 16];
            src.copy_to_slice(&mut octets);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        other => Err(WireError::UnknownTag(other)),
    }
}

const fn close_reason_tag(reason: CloseReason) -> u8 {
    match reason {
        CloseReason::UserShutdown => 0,
        CloseReason::ProtocolError => 1,
        CloseReason::Disconnected => 2,
    }
}

fn close_reason_from(tag: u8) -> Result<CloseReason> {
    match tag {
        0 => Ok(CloseReason::UserShutdown),
        1 => Ok(CloseReason::ProtocolError),
        2 => Ok(CloseReason::Disconnected),
        other => Err(WireError::UnknownTag(other)),
    }
}

fn get_u8(src: &mut Bytes) -> Result<u8> {
    if src.remaining() < 1 {
        return Err(WireError::Truncated);
    }
    Ok(src.get_u8())
}

fn get_u16(src: &mut Bytes) -> Result<u16> {
    if src.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    Ok(src.get_u16())
}

fn get_u32(src: &mut Bytes) -> Result<u32> {
    if src.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(src.get_u32())
}

fn get_u64(src: &mut Bytes) -> Result<u64> {
    if src.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    Ok(src.get_u64())
}

fn get_i64(src: &mut Bytes) -> Result<i64> {
    if src.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    Ok(src.get_i64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbus_core::data::{Set, Table};

    fn round_trip_data(value: Data) {
        let mut dst = BytesMut::new();
        put_data(&value, &mut dst).unwrap();
        let mut src = dst.freeze();
        let decoded = get_data(&mut src).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(src.remaining(), 0);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip_data(Data::None);
        round_trip_data(Data::from(true));
        round_trip_data(Data::from(u64::MAX));
        round_trip_data(Data::from(i64::MIN));
        round_trip_data(Data::from(3.5));
        round_trip_data(Data::from("päivää"));
        round_trip_data(Data::from("10.0.0.1".parse::<IpAddr>().unwrap()));
        round_trip_data(Data::from("::1".parse::<IpAddr>().unwrap()));
        round_trip_data(Data::from(Port::new(443, PortProto::Tcp)));
        round_trip_data(Data::from(Subnet::new("10.0.0.0".parse().unwrap(), 8)));
        round_trip_data(Data::from(Timestamp(Timespan(1_700_000_000))));
        round_trip_data(Data::from(EnumValue::new("red")));
    }

    #[test]
    fn nested_containers_round_trip() {
        let mut table = Table::new();
        table.insert(
            Data::from("inner"),
            Data::Set(Set::from([Data::from(1u64), Data::from(2u64)])),
        );
        let value = Data::Vector(vec![
            Data::Table(table),
            Data::Vector(vec![Data::None, Data::from(false)]),
        ]);
        round_trip_data(value);
    }

    #[test]
    fn nan_survives_the_wire() {
        round_trip_data(Data::from(f64::NAN));
    }

    #[test]
    fn every_frame_kind_round_trips() {
        let node = NodeId::from_raw(0xA1B2_C3D4_E5F6_0718);
        let sid = StreamId::new(node, 42);
        let filter = meshbus_core::filter::filter_of(["a/b", "c"]);
        let frames = vec![
            Frame::Hello {
                node,
                filter: filter.clone(),
            },
            Frame::HelloAck {
                node,
                filter: filter.clone(),
                sid,
            },
            Frame::Open { sid },
            Frame::AckOpen { sid },
            Frame::Batch {
                sid,
                batch_id: 7,
                messages: vec![
                    DataMessage::data("a/b", 42u64),
                    DataMessage::command(
                        "c/store",
                        Command::Put {
                            key: Data::from("k"),
                            value: Data::from(1u64),
                        },
                    ),
                ],
            },
            Frame::BatchAck {
                sid,
                batch_id: 7,
                new_credit: 12,
            },
            Frame::FilterUpdate { filter },
            Frame::Close {
                sid,
                reason: CloseReason::UserShutdown,
            },
            Frame::Bye,
        ];
        for frame in frames {
            let mut src = frame_to_bytes(&frame).unwrap();
            let decoded = decode_frame(&mut src).unwrap();
            assert_eq!(decoded, frame);
            assert_eq!(src.remaining(), 0);
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut src = frame_to_bytes(&Frame::Open {
            sid: StreamId::from_raw(1),
        })
        .unwrap();
        let mut short = src.split_to(src.len() - 1);
        assert!(matches!(
            decode_frame(&mut short),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        let mut src = Bytes::from_static(&[0xFF]);
        assert!(matches!(
            decode_frame(&mut src),
            Err(WireError::UnknownTag(0xFF))
        ));
    }
}
