//! Static region enumeration and canonical placeholder identities.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Region used when a request does not encode one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Account used when the signing collaborator supplies no identity.
pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";

/// Commercial-partition regions accepted by every regional service.
/// Service models may restrict further, never extend.
pub static VALID_REGIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "us-east-1",
        "us-east-2",
        "us-west-1",
        "us-west-2",
        "af-south-1",
        "ap-east-1",
        "ap-south-1",
        "ap-south-2",
        "ap-northeast-1",
        "ap-northeast-2",
        "ap-northeast-3",
        "ap-southeast-1",
        "ap-southeast-2",
        "ap-southeast-3",
        "ca-central-1",
        "eu-central-1",
        "eu-central-2",
        "eu-west-1",
        "eu-west-2",
        "eu-west-3",
        "eu-north-1",
        "eu-south-1",
        "eu-south-2",
        "me-central-1",
        "me-south-1",
        "sa-east-1",
    ]
    .into_iter()
    .collect()
});

pub fn is_valid_region(region: &str) -> bool {
    VALID_REGIONS.contains(region)
}

/// Does this host label look like a region (`us-east-1` style)?
///
/// Purely syntactic: extraction from an endpoint subdomain must also
/// capture misspelled regions so validation can reject them, rather
/// than silently falling back to the default.
pub fn looks_like_region(label: &str) -> bool {
    let parts: Vec<&str> = label.split('-').collect();
    if parts.len() < 3 {
        return false;
    }
    let (number, words) = parts.split_last().expect("len checked above");
    !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
        && words
            .iter()
            .all(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_lowercase()))
}
