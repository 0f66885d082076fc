//! AWS-shaped resource identifiers.

use rand::Rng;

const HEX: &[u8] = b"0123456789abcdef";
const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_chars(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// `i-0a1b2c…` style identifier (17 hex chars, current EC2 format).
pub fn ec2_id(prefix: &str) -> String {
    format!("{prefix}-{}", random_chars(HEX, 17))
}

/// API Gateway REST API / resource identifier: 10 lowercase alphanumerics.
pub fn apigateway_id() -> String {
    random_chars(ALNUM, 10)
}

/// Deterministic 32-hex content tag (FNV-1a over the payload, folded).
/// Stands in for the content ETag without pulling a digest stack.
pub fn content_etag(data: &[u8]) -> String {
    let mut forward: u64 = 0xcbf29ce484222325;
    for b in data {
        forward ^= u64::from(*b);
        forward = forward.wrapping_mul(0x100000001b3);
    }
    let mut backward: u64 = 0xcbf29ce484222325;
    for b in data.iter().rev() {
        backward ^= u64::from(*b);
        backward = backward.wrapping_mul(0x100000001b3);
    }
    format!("{forward:016x}{backward:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec2_id_shape() {
        let id = ec2_id("i");
        assert!(id.starts_with("i-"));
        assert_eq!(id.len(), 19);
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn apigateway_id_shape() {
        let id = apigateway_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn etag_is_deterministic_and_content_sensitive() {
        assert_eq!(content_etag(b"hello"), content_etag(b"hello"));
        assert_ne!(content_etag(b"hello"), content_etag(b"world"));
        assert_eq!(content_etag(b"x").len(), 32);
    }
}
