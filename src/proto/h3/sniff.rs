//! QUIC packet header sniffing.
//!
//! Servers have to route datagrams to connections before any connection
//! object exists, so the demultiplexer and the deferred server handshake
//! both peek at packet headers without consuming them.

use quiche::Header;

use crate::{Error, Result};

/// QUIC packets below this size cannot be Initial packets (RFC 9000 §14.1).
pub(crate) const MIN_INITIAL_SIZE: usize = 1200;

/// The interesting parts of a QUIC packet header.
#[derive(Clone, Debug)]
pub(crate) struct PacketInfo {
    /// The QUIC version, 0 for short-header packets.
    pub version: u32,
    /// The destination connection id, used for routing.
    pub dcid: Vec<u8>,
    is_initial_type: bool,
    length: usize,
}

impl PacketInfo {
    /// Whether this datagram can open a new connection.
    pub fn is_initial(&self) -> bool {
        self.is_initial_type && self.length >= MIN_INITIAL_SIZE
    }
}

/// Parses the header of the first QUIC packet in a datagram.
///
/// `connection_id_length` is the length of connection ids this endpoint
/// issues; short-header packets carry no explicit length, so the value is
/// needed to slice the destination id out.
pub(crate) fn sniff_packet(data: &[u8], connection_id_length: usize) -> Result<PacketInfo> {
    let mut scratch = data.to_vec();
    let header = Header::from_slice(&mut scratch, connection_id_length)
        .map_err(|_| Error::invalid_input("invalid QUIC packet header"))?;
    Ok(PacketInfo {
        version: header.version,
        dcid: header.dcid.to_vec(),
        is_initial_type: header.ty == quiche::Type::Initial,
        length: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal long-header Initial packet: first byte with the long-header
    // and fixed bits plus the Initial type, QUIC v1, 16-byte dcid and scid.
    fn build_initial(total_len: usize) -> Vec<u8> {
        let mut packet = vec![0xc0];
        packet.extend_from_slice(&1u32.to_be_bytes());
        packet.push(16);
        packet.extend_from_slice(&[0xab; 16]);
        packet.push(16);
        packet.extend_from_slice(&[0xcd; 16]);
        // Token length (0), then padding up to the requested size.
        packet.push(0);
        packet.resize(total_len, 0);
        packet
    }

    #[test]
    fn test_sniff_initial() {
        let packet = build_initial(1200);
        let info = sniff_packet(&packet, 16).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.dcid, vec![0xab; 16]);
        assert!(info.is_initial());
    }

    #[test]
    fn test_short_initial_is_not_initial() {
        let packet = build_initial(600);
        let info = sniff_packet(&packet, 16).unwrap();
        assert!(!info.is_initial());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(sniff_packet(&[], 16).is_err());
    }
}
