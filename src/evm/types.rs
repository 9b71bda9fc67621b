use primitive_types::{H160, U256};
use sha3::{Digest, Keccak256};

pub type EVMAddress = H160;
pub type EVMU256 = U256;

/// Transaction hash as returned by the node, kept in its `0x`-prefixed text form.
pub type TxHash = String;

pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(input));
    out
}

/// Take the low 20 bytes of a stack word as an address.
pub fn convert_u256_to_h160(v: EVMU256) -> EVMAddress {
    let mut word = [0u8; 32];
    v.to_big_endian(&mut word);
    EVMAddress::from_slice(&word[12..])
}

/// Parse a hex quantity with or without `0x`. Empty strings parse as zero.
pub fn parse_u256(s: &str) -> Option<EVMU256> {
    let digits = s.trim_start_matches("0x");
    if digits.is_empty() {
        return Some(EVMU256::zero());
    }
    EVMU256::from_str_radix(digits, 16).ok()
}

pub fn parse_address(s: &str) -> Option<EVMAddress> {
    let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
    if bytes.len() != 20 {
        return None;
    }
    Some(EVMAddress::from_slice(&bytes))
}

/// EIP-55 mixed-case encoding of an address.
pub fn checksum(address: &EVMAddress) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 { hash[i / 2] >> 4 } else { hash[i / 2] & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Largest value representable in `bits` bits.
pub fn max_for_bits(bits: usize) -> EVMU256 {
    if bits >= 256 {
        EVMU256::MAX
    } else {
        (EVMU256::one() << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        let addr = parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(checksum(&addr), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_convert_u256_to_h160() {
        let word = parse_u256("0xffffffffffffffffffffffff00000000000000000000000000000000deadbeef").unwrap();
        let addr = convert_u256_to_h160(word);
        assert_eq!(hex::encode(addr.as_bytes()), "00000000000000000000000000000000deadbeef");
    }

    #[test]
    fn test_parse_u256() {
        assert_eq!(parse_u256("0x"), Some(EVMU256::zero()));
        assert_eq!(parse_u256("ff"), Some(EVMU256::from(255)));
        assert_eq!(parse_u256("0xzz"), None);
    }

    #[test]
    fn test_max_for_bits() {
        assert_eq!(max_for_bits(8), EVMU256::from(255));
        assert_eq!(max_for_bits(256), EVMU256::MAX);
    }
}
