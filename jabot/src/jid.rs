//! Address normalization.
//!
//! Every place that stores or compares an identity goes through [`bare`], so a
//! full address like `alice@example.com/phone` and its bare form always map to
//! the same contact.

/// Strip the `/resource` suffix from an address.
pub fn bare(addr: &str) -> &str {
    match addr.split_once('/') {
        Some((bare, _)) => bare,
        None => addr,
    }
}

/// Local part of an address (`alice` for `alice@example.com/phone`).
///
/// Addresses without `@` are returned bare as-is.
pub fn local_part(addr: &str) -> &str {
    let bare = bare(addr);
    match bare.split_once('@') {
        Some((local, _)) => local,
        None => bare,
    }
}

/// Domain part of an address, empty when the address has no `@`.
pub fn domain(addr: &str) -> &str {
    bare(addr).split_once('@').map_or("", |(_, domain)| domain)
}

/// Lookup key for an address: bare, trimmed and lowercased.
pub fn key(addr: &str) -> String {
    bare(addr.trim()).to_ascii_lowercase()
}

/// Whether two addresses name the same bare identity.
pub fn same_identity(a: &str, b: &str) -> bool {
    key(a) == key(b)
}
