//! Minimal STUN (RFC 5389) client: encodes a Binding Request, sends it to a
//! STUN server, and decodes the XOR-MAPPED-ADDRESS from the response.
//!
//! This is the concrete backend behind [`super::NatProbe`]; callers of the
//! probe never see STUN message types directly.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

/// STUN magic cookie (RFC 5389 §6).
const MAGIC_COOKIE: u32 = 0x2112_A442;
/// STUN message header size.
const HEADER_SIZE: usize = 20;
/// Default per-server query timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Binding Request message type + class, encoded (method=0x0001, class=Request).
const BINDING_REQUEST: u16 = 0x0001;
/// Binding Success Response message type + class.
const BINDING_SUCCESS_RESPONSE: u16 = 0x0101;
/// XOR-MAPPED-ADDRESS attribute type.
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// A minimal STUN Binding Request message.
struct BindingRequest {
    transaction_id: [u8; 12],
}

impl BindingRequest {
    fn new() -> Self {
        let mut transaction_id = [0u8; 12];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut transaction_id);
        Self { transaction_id }
    }

    fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);
        bytes.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes()); // length: no attributes
        bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(&self.transaction_id);
        bytes
    }
}

/// Errors talking to a single STUN server. The [`super::NatProbe`] caller
/// treats all of these as "try the next server", never fatal.
#[derive(Debug, Error)]
pub enum StunError {
    /// Network I/O failure.
    #[error("STUN I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No response within the configured timeout.
    #[error("STUN query timeout")]
    Timeout,
    /// Response shorter than a STUN header.
    #[error("STUN response too short")]
    MessageTooShort,
    /// Magic cookie did not match RFC 5389.
    #[error("invalid STUN magic cookie")]
    InvalidMagicCookie,
    /// Response was not a Binding Success Response.
    #[error("unexpected STUN message type")]
    UnexpectedMessageType,
    /// Transaction ID did not match the request.
    #[error("STUN transaction ID mismatch")]
    TransactionMismatch,
    /// Response had no XOR-MAPPED-ADDRESS attribute.
    #[error("STUN response missing XOR-MAPPED-ADDRESS")]
    MissingAddress,
}

/// Query a single STUN server for our server-reflexive address.
pub(super) async fn query(socket: &UdpSocket, server: SocketAddr) -> Result<SocketAddr, StunError> {
    query_with_timeout(socket, server, DEFAULT_TIMEOUT).await
}

async fn query_with_timeout(
    socket: &UdpSocket,
    server: SocketAddr,
    timeout: Duration,
) -> Result<SocketAddr, StunError> {
    let request = BindingRequest::new();
    socket.send_to(&request.encode(), server).await?;

    let mut buf = [0u8; 1024];
    let (len, _from) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| StunError::Timeout)??;

    decode_response(&buf[..len], &request.transaction_id)
}

fn decode_response(bytes: &[u8], expected_transaction_id: &[u8; 12]) -> Result<SocketAddr, StunError> {
    if bytes.len() < HEADER_SIZE {
        return Err(StunError::MessageTooShort);
    }

    let msg_type = u16::from_be_bytes([bytes[0], bytes[1]]);
    let msg_length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let magic_cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

    if magic_cookie != MAGIC_COOKIE {
        return Err(StunError::InvalidMagicCookie);
    }
    if msg_type != BINDING_SUCCESS_RESPONSE {
        return Err(StunError::UnexpectedMessageType);
    }

    let mut transaction_id = [0u8; 12];
    transaction_id.copy_from_slice(&bytes[8..20]);
    if &transaction_id != expected_transaction_id {
        return Err(StunError::TransactionMismatch);
    }

    let mut offset = HEADER_SIZE;
    while offset + 4 <= bytes.len() && offset - HEADER_SIZE < msg_length {
        let attr_type = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
        let attr_length = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
        offset += 4;
        if offset + attr_length > bytes.len() {
            break;
        }
        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            if let Some(addr) = decode_xor_mapped_address(&bytes[offset..offset + attr_length]) {
                return Ok(addr);
            }
        }
        offset += attr_length;
        offset += (4 - (attr_length % 4)) % 4; // skip padding to 4-byte boundary
    }

    Err(StunError::MissingAddress)
}

fn decode_xor_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let family = value[1];
    if family != 0x01 {
        return None; // IPv6 mapped addresses aren't needed by the core discovery contract
    }
    let xor_port = u16::from_be_bytes([value[2], value[3]]);
    let port = xor_port ^ (MAGIC_COOKIE >> 16) as u16;

    let magic_bytes = MAGIC_COOKIE.to_be_bytes();
    let mut ip_bytes = [0u8; 4];
    for i in 0..4 {
        ip_bytes[i] = value[4 + i] ^ magic_bytes[i];
    }
    let ip = std::net::Ipv4Addr::from(ip_bytes);
    Some(SocketAddr::new(ip.into(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_round_trips() {
        let addr: SocketAddr = "192.0.2.1:32853".parse().unwrap();

        let magic_bytes = MAGIC_COOKIE.to_be_bytes();
        let mut value = vec![0u8, 0x01];
        let xor_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;
        value.extend_from_slice(&xor_port.to_be_bytes());
        if let std::net::IpAddr::V4(ipv4) = addr.ip() {
            for (i, octet) in ipv4.octets().iter().enumerate() {
                value.push(octet ^ magic_bytes[i]);
            }
        }

        assert_eq!(decode_xor_mapped_address(&value), Some(addr));
    }

    #[test]
    fn decode_response_rejects_bad_magic_cookie() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&BINDING_SUCCESS_RESPONSE.to_be_bytes());
        let err = decode_response(&bytes, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, StunError::InvalidMagicCookie));
    }

    #[test]
    fn decode_response_rejects_short_message() {
        let err = decode_response(&[0u8; 4], &[0u8; 12]).unwrap_err();
        assert!(matches!(err, StunError::MessageTooShort));
    }
}
