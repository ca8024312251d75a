use civitas_types::Hash;

/// Domain tags. Every signed or content-addressed byte string in Civitas is
/// prefixed with one of these so digests of different kinds never collide.
pub mod domain {
    pub const VOTE: &str = "civitas/vote/v1";
    pub const APPROVAL: &str = "civitas/approval/v1";
    pub const TIMELOCK_ACTION: &str = "civitas/timelock-action/v1";
    pub const OPERATION: &str = "civitas/operation/v1";
}

pub fn hash(data: &[u8]) -> Hash {
    Hash::compute(data)
}

pub fn hash_multi(data: &[&[u8]]) -> Hash {
    Hash::compute_multi(data)
}

/// Hash with a domain separator.
///
/// The domain is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
pub fn hash_with_domain(data: &[u8], domain: &str) -> Hash {
    let len = (domain.len() as u32).to_le_bytes();
    hash_multi(&[&len, domain.as_bytes(), data])
}

/// Hash for a message bound to one chain.
pub fn hash_for_chain(data: &[u8], domain: &str, chain_id: u64) -> Hash {
    let len = (domain.len() as u32).to_le_bytes();
    hash_multi(&[&len, domain.as_bytes(), &chain_id.to_le_bytes(), data])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_multi() {
        assert_eq!(hash_multi(&[b"hello ", b"world"]), hash(b"hello world"));
    }

    #[test]
    fn test_hash_with_domain() {
        let a = hash_with_domain(b"data", domain::VOTE);
        let b = hash_with_domain(b"data", domain::APPROVAL);
        assert_ne!(a, b);
        assert_eq!(a, hash_with_domain(b"data", domain::VOTE));
    }

    #[test]
    fn test_domain_boundary_is_unambiguous() {
        assert_ne!(hash_with_domain(b"c", "ab"), hash_with_domain(b"bc", "a"));
    }

    #[test]
    fn test_chain_id_separates() {
        let a = hash_for_chain(b"ballot", domain::VOTE, 1);
        let b = hash_for_chain(b"ballot", domain::VOTE, 2);
        assert_ne!(a, b);
    }
}
