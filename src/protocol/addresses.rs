/// PAN shared by the gateway and its nodes.
pub const NETWORK_PAN: u16 = 0x22;

/// Source PAN written by nodes into every data frame.
pub const NODE_SRC_PAN: u16 = 0x1234;

/// Frame control: data frame.
pub const FCF_DATA: u8 = 0x41;

/// Frame control (second byte): source addressed by short address.
pub const FCA_SRC_SADDR: u8 = 0x80;

/// Derive a short address from an EUI-64.
///
/// The short address is the first two bytes of the extended address, little-endian.
pub fn short_addr_from_eui64(eui64: &[u8; 8]) -> u16 {
    u16::from_le_bytes([eui64[0], eui64[1]])
}

/// Parse an EUI-64 written as 16 hex digits, optionally separated by `:` or `-`.
pub fn parse_eui64(s: &str) -> Option<[u8; 8]> {
    let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
    if digits.len() != 16 || !digits.is_ascii() {
        return None;
    }

    let mut eui = [0u8; 8];
    for (i, byte) in eui.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).ok()?;
    }

    Some(eui)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_addr_is_low_bytes_le() {
        let eui = [0x78, 0x56, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(short_addr_from_eui64(&eui), 0x5678);
    }

    #[test]
    fn parse_eui64_accepts_separators() {
        assert_eq!(
            parse_eui64("02:00:00:00:00:00:12:34"),
            Some([0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34])
        );
        assert_eq!(parse_eui64("0200000000001234"), parse_eui64("02-00-00-00-00-00-12-34"));
        assert_eq!(parse_eui64("0200"), None);
        assert_eq!(parse_eui64("zz00000000001234"), None);
    }
}
