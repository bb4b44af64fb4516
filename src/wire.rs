//! Encoding and decoding of the 48-byte NTPv4 client/server packet (RFC 5905 §7.3).

use core::mem::size_of;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
pub(crate) const NTP_TIMESTAMP_DELTA: u64 = 2_208_988_800;

pub(crate) const LI_MASK: u8 = 0b1100_0000;
pub(crate) const LI_SHIFT: u8 = 6;
pub(crate) const VERSION_MASK: u8 = 0b0011_1000;
pub(crate) const VERSION_SHIFT: u8 = 3;
pub(crate) const MODE_MASK: u8 = 0b0000_0111;
pub(crate) const MODE_SHIFT: u8 = 0;

/// `LI` value meaning "clock not synchronized", per RFC 5905.
pub(crate) const LI_NOSYNC: u8 = 3;
/// NTPv4.
pub(crate) const VERSION: u8 = 4;
/// Client mode.
pub(crate) const MODE_CLIENT: u8 = 3;
/// Broadcast mode, used only to recognize and discard unsolicited replies.
pub(crate) const MODE_BROADCAST: u8 = 5;
/// A stratum this large (or larger) marks an unsynchronized server.
pub(crate) const MAXSTRAT: u8 = 16;
/// Root delay/dispersion at or above this many seconds marks the server unusable.
pub(crate) const MAXDISP: f64 = 16.0;

/// Convert a seconds-since-Unix-epoch value to the 64-bit NTP fixed-point format
/// (32 bits of seconds, 32 bits of fraction).
#[must_use]
pub(crate) fn unix_to_ntp64(unix_secs: f64) -> u64 {
    let ntp_secs = unix_secs + NTP_TIMESTAMP_DELTA as f64;
    let whole = ntp_secs.trunc() as u64;
    let frac = (ntp_secs.fract() * (1u64 << 32) as f64) as u64;
    (whole << 32) | (frac & 0xffff_ffff)
}

/// Inverse of [`unix_to_ntp64`].
#[must_use]
pub(crate) fn ntp64_to_unix(value: u64) -> f64 {
    let whole = (value >> 32) as f64;
    let frac = (value & 0xffff_ffff) as f64 / (1u64 << 32) as f64;
    whole + frac - NTP_TIMESTAMP_DELTA as f64
}

/// Header byte packing `LI`, `VN` and `Mode`, with named accessors in place of
/// bitfield macros.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct HeaderByte(pub(crate) u8);

impl HeaderByte {
    pub(crate) fn new(li: u8, version: u8, mode: u8) -> Self {
        HeaderByte(
            (li << LI_SHIFT) & LI_MASK
                | (version << VERSION_SHIFT) & VERSION_MASK
                | (mode << MODE_SHIFT) & MODE_MASK,
        )
    }

    pub(crate) fn li(self) -> u8 {
        (self.0 & LI_MASK) >> LI_SHIFT
    }

    pub(crate) fn version(self) -> u8 {
        (self.0 & VERSION_MASK) >> VERSION_SHIFT
    }

    pub(crate) fn mode(self) -> u8 {
        (self.0 & MODE_MASK) >> MODE_SHIFT
    }
}

/// In-memory representation of an NTP packet. Field values are in host byte
/// order; [`NtpPacket::encode`]/[`NtpPacket::decode`] handle the wire's
/// big-endian layout.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct NtpPacket {
    pub(crate) header: HeaderByte,
    pub(crate) stratum: u8,
    pub(crate) poll: i8,
    pub(crate) precision: i8,
    pub(crate) root_delay: u32,
    pub(crate) root_dispersion: u32,
    pub(crate) ref_id: u32,
    pub(crate) reference_ts: u64,
    pub(crate) origin_ts: u64,
    pub(crate) receive_ts: u64,
    pub(crate) transmit_ts: u64,
}

/// Wire size of [`NtpPacket`]: 12 header bytes plus four 64-bit timestamps.
pub(crate) const PACKET_SIZE: usize = 48;

impl NtpPacket {
    /// Build the client request packet sent at the start of a poll cycle.
    pub(crate) fn client_request(transmit_ts: u64, reference_ts: u64) -> Self {
        NtpPacket {
            header: HeaderByte::new(LI_NOSYNC, VERSION, MODE_CLIENT),
            stratum: MAXSTRAT,
            poll: 6, // MINPOLL
            precision: -18, // CKPRECISION
            root_delay: 0,
            root_dispersion: 0,
            ref_id: u32::from_be_bytes(*b"NTPS"),
            reference_ts,
            origin_ts: 0,
            receive_ts: 0,
            transmit_ts,
        }
    }

    pub(crate) fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        buf[0] = self.header.0;
        buf[1] = self.stratum;
        buf[2] = self.poll as u8;
        buf[3] = self.precision as u8;
        buf[4..8].copy_from_slice(&self.root_delay.to_be_bytes());
        buf[8..12].copy_from_slice(&self.root_dispersion.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ref_id.to_be_bytes());
        buf[16..24].copy_from_slice(&self.reference_ts.to_be_bytes());
        buf[24..32].copy_from_slice(&self.origin_ts.to_be_bytes());
        buf[32..40].copy_from_slice(&self.receive_ts.to_be_bytes());
        buf[40..48].copy_from_slice(&self.transmit_ts.to_be_bytes());
        buf
    }

    pub(crate) fn decode(buf: &[u8; PACKET_SIZE]) -> Self {
        let u32_at = |r: core::ops::Range<usize>| {
            let mut tmp = [0u8; size_of::<u32>()];
            tmp.copy_from_slice(&buf[r]);
            u32::from_be_bytes(tmp)
        };
        let u64_at = |r: core::ops::Range<usize>| {
            let mut tmp = [0u8; size_of::<u64>()];
            tmp.copy_from_slice(&buf[r]);
            u64::from_be_bytes(tmp)
        };

        NtpPacket {
            header: HeaderByte(buf[0]),
            stratum: buf[1],
            poll: buf[2] as i8,
            precision: buf[3] as i8,
            root_delay: u32_at(4..8),
            root_dispersion: u32_at(8..12),
            ref_id: u32_at(12..16),
            reference_ts: u64_at(16..24),
            origin_ts: u64_at(24..32),
            receive_ts: u64_at(32..40),
            transmit_ts: u64_at(40..48),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let packet = NtpPacket::client_request(0x1122_3344_5566_7788, 0);
        let decoded = NtpPacket::decode(&packet.encode());

        assert_eq!(decoded.header.0, packet.header.0);
        assert_eq!(decoded.stratum, packet.stratum);
        assert_eq!(decoded.poll, packet.poll);
        assert_eq!(decoded.precision, packet.precision);
        assert_eq!(decoded.transmit_ts, packet.transmit_ts);
        assert_eq!(decoded.ref_id, packet.ref_id);
    }

    #[test]
    fn encodes_exactly_48_bytes() {
        let packet = NtpPacket::client_request(0, 0);
        assert_eq!(packet.encode().len(), PACKET_SIZE);
    }

    #[test]
    fn header_byte_accessors_match_construction() {
        let header = HeaderByte::new(LI_NOSYNC, VERSION, MODE_CLIENT);
        assert_eq!(header.li(), LI_NOSYNC);
        assert_eq!(header.version(), VERSION);
        assert_eq!(header.mode(), MODE_CLIENT);
    }

    #[test]
    fn ntp64_unix_round_trip_is_close() {
        let now = 1_700_000_000.25;
        let ntp = unix_to_ntp64(now);
        let back = ntp64_to_unix(ntp);
        assert!((back - now).abs() < 1e-6);
    }
}
