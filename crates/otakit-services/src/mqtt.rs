//! Minimal MQTT 3.1.1 client over a plain TCP stream.
//!
//! Covers exactly what the OTA exchange needs: CONNECT, SUBSCRIBE at QoS 1,
//! PUBLISH at QoS 0/1, PUBACK for inbound deliveries, PINGREQ on idle, and
//! DISCONNECT. Packets are assembled by hand; the wire format is small
//! enough that a dependency would be heavier than the code.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// Packet type in the high nibble of the fixed-header byte.
const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82; // reserved flags 0b0010
const SUBACK: u8 = 0x90;
const PINGREQ: u8 = 0xc0;
const PINGRESP: u8 = 0xd0;
const DISCONNECT: u8 = 0xe0;

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("broker refused the connection: return code {0}")]
    ConnectRefused(u8),

    #[error("broker rejected the subscription: return code {0:#04x}")]
    SubscribeRejected(u8),

    #[error("malformed {0} packet from broker")]
    MalformedPacket(&'static str),

    #[error("remaining-length varint exceeds four bytes")]
    BadLength,
}

/// An inbound application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

pub struct MqttClient {
    stream: TcpStream,
    next_packet_id: u16,
    /// Publishes that arrived while waiting for an ack.
    pending: VecDeque<Publish>,
}

impl MqttClient {
    /// Open a TCP connection and complete the MQTT handshake.
    pub async fn connect(
        host: &str,
        port: u16,
        client_id: &str,
        keep_alive_secs: u16,
    ) -> Result<Self, MqttError> {
        let stream = TcpStream::connect((host, port)).await?;
        let mut client = Self {
            stream,
            next_packet_id: 1,
            pending: VecDeque::new(),
        };

        client
            .send(&packet::connect(client_id, keep_alive_secs))
            .await?;
        let (first, body) = client.read_frame().await?;
        if first != CONNACK || body.len() < 2 {
            return Err(MqttError::MalformedPacket("CONNACK"));
        }
        if body[1] != 0 {
            return Err(MqttError::ConnectRefused(body[1]));
        }
        tracing::debug!(host, port, client_id, "connected");
        Ok(client)
    }

    /// Subscribe at QoS 1 and wait for the broker's grant.
    pub async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        let packet_id = self.take_packet_id();
        self.send(&packet::subscribe(packet_id, topic, 1)).await?;

        loop {
            let (first, body) = self.read_frame().await?;
            match first & 0xf0 {
                SUBACK => {
                    if body.len() < 3 {
                        return Err(MqttError::MalformedPacket("SUBACK"));
                    }
                    let code = body[2];
                    if code == 0x80 {
                        return Err(MqttError::SubscribeRejected(code));
                    }
                    tracing::debug!(topic, granted_qos = code, "subscribed");
                    return Ok(());
                }
                _ => self.absorb(first, body).await?,
            }
        }
    }

    /// Publish at QoS 0 (fire and forget) or QoS 1 (wait for PUBACK).
    pub async fn publish(&mut self, topic: &str, payload: &[u8], qos: u8) -> Result<(), MqttError> {
        if qos == 0 {
            return self.send(&packet::publish(topic, payload, 0, 0)).await;
        }

        let packet_id = self.take_packet_id();
        self.send(&packet::publish(topic, payload, 1, packet_id))
            .await?;
        loop {
            let (first, body) = self.read_frame().await?;
            if first & 0xf0 == PUBACK {
                if body.len() < 2 {
                    return Err(MqttError::MalformedPacket("PUBACK"));
                }
                let acked = u16::from_be_bytes([body[0], body[1]]);
                if acked == packet_id {
                    return Ok(());
                }
                tracing::debug!(acked, expected = packet_id, "stale puback, ignoring");
            } else {
                self.absorb(first, body).await?;
            }
        }
    }

    /// Wait up to `wait` for the next application message. Returns `None`
    /// on idle timeout, after nudging the broker with a ping. Inbound QoS 1
    /// deliveries are acknowledged before they are returned.
    pub async fn poll(&mut self, wait: Duration) -> Result<Option<Publish>, MqttError> {
        loop {
            if let Some(publish) = self.pending.pop_front() {
                return Ok(Some(publish));
            }
            match tokio::time::timeout(wait, self.read_frame()).await {
                Err(_elapsed) => {
                    self.send(&packet::pingreq()).await?;
                    return Ok(None);
                }
                Ok(frame) => {
                    let (first, body) = frame?;
                    self.absorb(first, body).await?;
                }
            }
        }
    }

    pub async fn disconnect(mut self) -> Result<(), MqttError> {
        self.send(&packet::disconnect()).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// File a frame received while waiting for something else. Publishes are
    /// acked and queued; control responses are dropped.
    async fn absorb(&mut self, first: u8, body: Vec<u8>) -> Result<(), MqttError> {
        match first & 0xf0 {
            PUBLISH => {
                let (publish, packet_id) = packet::parse_publish(first, &body)?;
                if let Some(id) = packet_id {
                    self.send(&packet::puback(id)).await?;
                }
                self.pending.push_back(publish);
            }
            PINGRESP | PUBACK => {}
            other => tracing::debug!(packet = format_args!("{other:#04x}"), "ignoring packet"),
        }
        Ok(())
    }

    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        id
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), MqttError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Read one full packet: fixed-header byte, remaining-length varint,
    /// then exactly that many body bytes.
    async fn read_frame(&mut self) -> Result<(u8, Vec<u8>), MqttError> {
        let first = self.stream.read_u8().await?;

        let mut remaining: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.stream.read_u8().await?;
            remaining |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 21 {
                return Err(MqttError::BadLength);
            }
        }

        let mut body = vec![0u8; remaining as usize];
        self.stream.read_exact(&mut body).await?;
        Ok((first, body))
    }
}

// ── Packet assembly ───────────────────────────────────────────────────────────

pub(crate) mod packet {
    use super::*;

    pub fn connect(client_id: &str, keep_alive_secs: u16) -> Vec<u8> {
        let mut body = BytesMut::new();
        put_mqtt_string(&mut body, "MQTT");
        body.put_u8(4); // protocol level 3.1.1
        body.put_u8(0x02); // clean session
        body.put_u16(keep_alive_secs);
        put_mqtt_string(&mut body, client_id);
        wrap_fixed_header(CONNECT, &body)
    }

    pub fn subscribe(packet_id: u16, topic: &str, qos: u8) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u16(packet_id);
        put_mqtt_string(&mut body, topic);
        body.put_u8(qos);
        wrap_fixed_header(SUBSCRIBE, &body)
    }

    pub fn publish(topic: &str, payload: &[u8], qos: u8, packet_id: u16) -> Vec<u8> {
        let mut body = BytesMut::new();
        put_mqtt_string(&mut body, topic);
        if qos > 0 {
            body.put_u16(packet_id);
        }
        body.put_slice(payload);
        wrap_fixed_header(PUBLISH | (qos << 1), &body)
    }

    pub fn puback(packet_id: u16) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u16(packet_id);
        wrap_fixed_header(PUBACK, &body)
    }

    pub fn pingreq() -> Vec<u8> {
        vec![PINGREQ, 0]
    }

    pub fn disconnect() -> Vec<u8> {
        vec![DISCONNECT, 0]
    }

    /// Parse a PUBLISH body; returns the message and, for QoS > 0, the
    /// packet id the broker expects acknowledged.
    pub fn parse_publish(
        first: u8,
        body: &[u8],
    ) -> Result<(Publish, Option<u16>), MqttError> {
        let qos = (first >> 1) & 0x03;
        if body.len() < 2 {
            return Err(MqttError::MalformedPacket("PUBLISH"));
        }
        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let mut at = 2 + topic_len;
        if body.len() < at {
            return Err(MqttError::MalformedPacket("PUBLISH"));
        }
        let topic = std::str::from_utf8(&body[2..at])
            .map_err(|_| MqttError::MalformedPacket("PUBLISH"))?
            .to_string();

        let packet_id = if qos > 0 {
            if body.len() < at + 2 {
                return Err(MqttError::MalformedPacket("PUBLISH"));
            }
            let id = u16::from_be_bytes([body[at], body[at + 1]]);
            at += 2;
            Some(id)
        } else {
            None
        };

        let payload = body[at..].to_vec();
        Ok((Publish { topic, payload, qos }, packet_id))
    }

    fn put_mqtt_string(buf: &mut BytesMut, s: &str) {
        buf.put_u16(s.len() as u16);
        buf.put_slice(s.as_bytes());
    }

    fn encode_variable_int(buf: &mut BytesMut, mut value: u32) {
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value > 0 {
                byte |= 0x80;
            }
            buf.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn wrap_fixed_header(first_byte: u8, body: &[u8]) -> Vec<u8> {
        let mut packet = BytesMut::new();
        packet.put_u8(first_byte);
        encode_variable_int(&mut packet, body.len() as u32);
        packet.put_slice(body);
        packet.to_vec()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
