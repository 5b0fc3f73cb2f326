use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::constants::{
    CHUNK_TOKEN_TAG_LEN, FILE_KEY_PREFIX, MAX_CHUNK_ID_LEN, MAX_FILENAME_ENC_LEN, NODE_KEY_PREFIX,
};
use crate::error::KeyError;

// '.' stays encoded so it can separate the parts of a chunk id.
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

/// A validated file name together with its canonical percent-encoded form.
///
/// The encoded form is what ends up in metadata keys and chunk ids, so it only
/// contains `[A-Za-z0-9%_-]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    raw: String,
    enc: String,
}

impl FileName {
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.is_empty() {
            return Err(KeyError::Length);
        }
        if s.chars().any(|c| c == '/' || c.is_control()) {
            return Err(KeyError::Forbidden);
        }

        let enc = utf8_percent_encode(s, FILENAME_ENCODE_SET).to_string();
        if enc.len() > MAX_FILENAME_ENC_LEN {
            return Err(KeyError::Length);
        }

        Ok(Self {
            raw: s.to_string(),
            enc,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn enc(&self) -> &str {
        &self.enc
    }
}

/// Hex BLAKE3 digest of an access token. Namespaces metadata without storing
/// the token itself in keys or on storage nodes.
pub fn token_tag(access_token: &str) -> String {
    blake3::hash(access_token.as_bytes()).to_hex().to_string()
}

/// Deterministic id of chunk `chunk_index` of `name` uploaded under `access_token`.
pub fn chunk_id_for(name: &FileName, chunk_index: u64, access_token: &str) -> String {
    let tag = token_tag(access_token);
    format!(
        "{}.chunk{}.{}",
        name.enc(),
        chunk_index,
        &tag[..CHUNK_TOKEN_TAG_LEN]
    )
}

pub fn file_meta_prefix(access_token: &str) -> String {
    format!("{}:{}:", FILE_KEY_PREFIX, token_tag(access_token))
}

pub fn file_meta_key(name: &FileName, access_token: &str) -> String {
    format!("{}{}", file_meta_prefix(access_token), name.enc())
}

pub fn node_key(node_id: &str) -> String {
    format!("{}:{}", NODE_KEY_PREFIX, node_id)
}

/// Chunk ids arrive from the network and become file names on the volume.
pub fn validate_chunk_id(chunk_id: &str) -> Result<(), KeyError> {
    if chunk_id.is_empty() || chunk_id.len() > MAX_CHUNK_ID_LEN {
        return Err(KeyError::Length);
    }
    if chunk_id.starts_with('.') {
        return Err(KeyError::Forbidden);
    }
    let allowed = |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'%' | b'.' | b'_' | b'-');
    if !chunk_id.bytes().all(allowed) {
        return Err(KeyError::Forbidden);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_encoding_is_case_preserving() {
        let upper = FileName::parse("Report.PDF").unwrap();
        let lower = FileName::parse("report.pdf").unwrap();
        assert_eq!(upper.enc(), "Report%2EPDF");
        assert_ne!(upper.enc(), lower.enc());
        assert_eq!(upper.as_str(), "Report.PDF");
    }

    #[test]
    fn file_name_rejects_bad_input() {
        assert_eq!(FileName::parse(""), Err(KeyError::Length));
        assert_eq!(FileName::parse("a/b"), Err(KeyError::Forbidden));
        assert_eq!(FileName::parse("a\nb"), Err(KeyError::Forbidden));
        assert_eq!(FileName::parse(&"x".repeat(500)), Err(KeyError::Length));
    }

    #[test]
    fn chunk_ids_depend_on_name_index_and_token() {
        let name = FileName::parse("movie.mkv").unwrap();
        let a = chunk_id_for(&name, 0, "alice");
        let b = chunk_id_for(&name, 1, "alice");
        let c = chunk_id_for(&name, 0, "bob");

        assert_eq!(a, chunk_id_for(&name, 0, "alice"));
        assert!(a.starts_with("movie%2Emkv.chunk0."));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(!a.contains("alice"));
        validate_chunk_id(&a).unwrap();
    }

    #[test]
    fn longest_name_still_yields_valid_chunk_id() {
        let name = FileName::parse(&"n".repeat(MAX_FILENAME_ENC_LEN)).unwrap();
        let id = chunk_id_for(&name, u64::MAX, "token");
        validate_chunk_id(&id).unwrap();
    }

    #[test]
    fn meta_keys_are_scoped_by_token() {
        let name = FileName::parse("notes.txt").unwrap();
        let key = file_meta_key(&name, "alice");
        assert!(key.starts_with(&file_meta_prefix("alice")));
        assert!(!key.starts_with(&file_meta_prefix("bob")));
        assert!(key.ends_with("notes%2Etxt"));
    }

    #[test]
    fn chunk_id_validation() {
        assert!(validate_chunk_id("abc%2E.chunk1.00ff").is_ok());
        assert_eq!(validate_chunk_id(""), Err(KeyError::Length));
        assert_eq!(validate_chunk_id("../etc"), Err(KeyError::Forbidden));
        assert_eq!(validate_chunk_id("a/b"), Err(KeyError::Forbidden));
        assert_eq!(validate_chunk_id(".hidden"), Err(KeyError::Forbidden));
    }
}
