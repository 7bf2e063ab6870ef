//! Identity hashing for exact-duplicate detection.

use sha2::{Digest, Sha256};

use crate::types::{CandidateEntity, EntityType};

/// Normalize an entity name for identity comparison: lowercase, with
/// whitespace, `-`, `_` and other separators removed. Symbols that change
/// what a name refers to are kept: `+`, `#`, `&`, and `.` when a word
/// character follows it. "Open AI" and "OpenAI" normalize the same, while
/// "C++", "C#" and "C" stay distinct.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_alphanumeric() => out.extend(c.to_lowercase()),
            '+' | '#' | '&' => out.push(c),
            '.' if chars.peek().is_some_and(|next| next.is_alphanumeric()) => out.push(c),
            _ => {}
        }
    }
    out
}

/// SHA-256 over `(normalized name, type, source_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityHash([u8; 32]);

impl IdentityHash {
    pub fn compute(name: &str, entity_type: EntityType, source_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_name(name).as_bytes());
        hasher.update([0x1f]);
        hasher.update(entity_type.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(source_id.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn of(candidate: &CandidateEntity) -> Self {
        Self::compute(&candidate.name, candidate.entity_type, &candidate.source_id)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Two independent 64-bit lanes, for double hashing.
    pub fn lanes(&self) -> (u64, u64) {
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        a.copy_from_slice(&self.0[0..8]);
        b.copy_from_slice(&self.0[8..16]);
        (u64::from_le_bytes(a), u64::from_le_bytes(b))
    }

    /// Bucket index in `[0, buckets)`.
    pub fn bucket(&self, buckets: usize) -> usize {
        (self.lanes().0 % buckets.max(1) as u64) as usize
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_spacing_and_punctuation() {
        assert_eq!(normalize_name("Open AI"), "openai");
        assert_eq!(normalize_name("  OpenAI "), "openai");
        assert_eq!(normalize_name("GPT-4"), "gpt4");
        assert_eq!(normalize_name("gpt_4"), "gpt4");
        assert_eq!(normalize_name("Acme Inc."), normalize_name("Acme Inc"));
    }

    #[test]
    fn normalization_keeps_meaningful_symbols() {
        assert_eq!(normalize_name("C++"), "c++");
        assert_eq!(normalize_name("C#"), "c#");
        assert_eq!(normalize_name("Node.js"), "node.js");
        assert_eq!(normalize_name("AT&T"), "at&t");
        assert_ne!(normalize_name("C++"), normalize_name("C"));
        assert_ne!(normalize_name("C#"), normalize_name("C"));

        let cpp = IdentityHash::compute("C++", EntityType::Technology, "hn");
        let csharp = IdentityHash::compute("C#", EntityType::Technology, "hn");
        let c = IdentityHash::compute("C", EntityType::Technology, "hn");
        assert_ne!(cpp, csharp);
        assert_ne!(cpp, c);
        assert_ne!(csharp, c);
    }

    #[test]
    fn identity_depends_on_type_and_source() {
        let a = IdentityHash::compute("Apple", EntityType::Company, "yt");
        let b = IdentityHash::compute("apple", EntityType::Company, "yt");
        let c = IdentityHash::compute("Apple", EntityType::Person, "yt");
        let d = IdentityHash::compute("Apple", EntityType::Company, "reddit");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn hex_round_trip() {
        let a = IdentityHash::compute("Anthropic", EntityType::Company, "hn");
        assert_eq!(IdentityHash::from_hex(&a.to_hex()), Some(a));
        assert_eq!(IdentityHash::from_hex("zz"), None);
    }

    #[test]
    fn bucket_is_in_range() {
        let a = IdentityHash::compute("Mistral", EntityType::Company, "hn");
        assert!(a.bucket(64) < 64);
        assert_eq!(a.bucket(1), 0);
    }
}
