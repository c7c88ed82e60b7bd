//! RFC 1071 ones-complement checksum.
//!
//! Used for the IPv4 header checksum, the ICMP checksum, and the optional
//! UDP/TCP checksum over the pseudo-header + payload.

use byteorder::{ByteOrder, NetworkEndian};

/// Sum `data` as a sequence of big-endian 16-bit words, returning the 32-bit
/// accumulator (not yet folded or complemented). Callers combine multiple
/// regions (pseudo-header, header, payload) by adding their accumulators
/// before a single [`finish`].
pub fn accumulate(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += NetworkEndian::read_u16(chunk) as u32;
    }
    if let [last] = *chunks.remainder() {
        sum += (last as u32) << 8;
    }
    sum
}

/// Fold a 32-bit accumulator down to 16 bits and take the ones' complement.
pub fn finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !sum as u16
}

/// One-shot checksum of a single buffer.
pub fn data(buf: &[u8]) -> u16 {
    finish(accumulate(buf))
}

/// Checksum of the IPv4/IPv6 pseudo-header used by UDP and TCP, combined with
/// the accumulator of the header+payload that follows it.
pub fn combine(parts: &[u32]) -> u16 {
    finish(parts.iter().sum())
}

/// Accumulator contribution of an IPv4 pseudo-header: src, dst, zero, protocol, length.
pub fn pseudo_header_v4(src: &[u8; 4], dst: &[u8; 4], protocol: u8, length: u16) -> u32 {
    let mut buf = [0u8; 12];
    buf[0..4].copy_from_slice(src);
    buf[4..8].copy_from_slice(dst);
    buf[9] = protocol;
    NetworkEndian::write_u16(&mut buf[10..12], length);
    accumulate(&buf)
}

/// Incrementally update a checksum in place when a single 16-bit field changes
/// value (RFC 1624), avoiding recomputation over the whole packet. Used by the
/// ICMP echo responder and ARP-driven IP rewrite paths, which only flip a
/// handful of fields in an otherwise-untouched buffer.
pub fn adjust(checksum: u16, old: u16, new: u16) -> u16 {
    let mut sum = (!checksum) as u32 + (!old) as u32 + new as u32;
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_all_ones() {
        let buf = [0x45u8, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01];
        let c = data(&buf);
        let mut extended = buf.to_vec();
        extended.push((c >> 8) as u8);
        extended.push((c & 0xff) as u8);
        assert_eq!(data(&extended), 0x0000);
        // RFC 1071 invariant: summing the buffer with its own complement
        // yields all-ones.
        assert_eq!(accumulate(&extended) as u16 | (accumulate(&extended) >> 16) as u16, 0xffff);
    }

    #[test]
    fn odd_length_buffer() {
        let buf = [0xffu8, 0x00, 0x01];
        // 0xff00 + 0x0100 (padded) = 0x10000 -> fold -> 0x0001 -> !0x0001
        assert_eq!(data(&buf), !0x0101u16);
    }

    #[test]
    fn incremental_adjust_matches_recompute() {
        let mut buf = [0x45u8, 0x00, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0, 0];
        let full = data(&buf[..10]);
        buf[10] = (full >> 8) as u8;
        buf[11] = (full & 0xff) as u8;
        // flip TTL from 0x40 to 0x39
        let old_word = NetworkEndian::read_u16(&buf[8..10]);
        buf[8] = 0x39;
        let new_word = NetworkEndian::read_u16(&buf[8..10]);
        let adjusted = adjust(full, old_word, new_word);
        let recomputed = data(&buf[..10]);
        assert_eq!(adjusted, recomputed);
    }
}
