//! Extended-attribute name/value vector encoding.
//!
//! `kXR_fattr` requests carry attributes as two packed vectors: a name
//! vector of `rc[2] | name | NUL` entries followed by a value vector of
//! `vlen[4] | value` entries. Responses reuse the same layout; the decoder
//! walks both vectors in lockstep to recover `(name, rc, value)` triples.

use crate::{
    byte_order::{read_network_u16, read_network_u32, write_network_u32},
    error::{Error, Result},
};

/// Maximum number of attributes per request.
pub const MAX_VARS: usize = 16;

/// Maximum total length of the packed name vector.
pub const MAX_NLEN: usize = 248;

/// Maximum total length of the packed value vector.
pub const MAX_VLEN: usize = 65536;

// 2 bytes for the rc placeholder plus the terminating NUL.
const NAME_OVERHEAD: usize = 3;
// 4 bytes for the value length.
const VALUE_OVERHEAD: usize = 4;

/// One decoded extended attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct XAttr {
    /// Attribute name.
    pub name: String,
    /// Per-attribute status code reported by the server.
    pub rc: u16,
    /// Attribute value bytes.
    pub value: Vec<u8>,
}

/// Encode a `(name, value)` attribute list into `[name-vec | value-vec]`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgs`] when the list exceeds [`MAX_VARS`] entries
/// or either packed vector would exceed its protocol limit.
pub fn encode_attr_vec(attrs: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    if attrs.is_empty() {
        return Ok(Vec::new());
    }
    if attrs.len() > MAX_VARS {
        return Err(Error::InvalidArgs(format!(
            "too many attributes: {} > {MAX_VARS}",
            attrs.len()
        )));
    }

    let nlen: usize = attrs.iter().map(|(name, _)| name.len() + NAME_OVERHEAD).sum();
    let vlen: usize = attrs
        .iter()
        .map(|(_, value)| value.len() + VALUE_OVERHEAD)
        .sum();
    if nlen > MAX_NLEN {
        return Err(Error::InvalidArgs(format!(
            "name vector too long: {nlen} > {MAX_NLEN}"
        )));
    }
    if vlen > MAX_VLEN {
        return Err(Error::InvalidArgs(format!(
            "value vector too long: {vlen} > {MAX_VLEN}"
        )));
    }

    let mut out = Vec::with_capacity(nlen + vlen);
    for (name, _) in attrs {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    for (_, value) in attrs {
        out.extend_from_slice(&write_network_u32(u32::try_from(value.len()).unwrap_or(0)));
        out.extend_from_slice(value);
    }
    Ok(out)
}

/// Encode a name-only attribute list into a packed name vector.
///
/// # Errors
///
/// Returns [`Error::InvalidArgs`] under the same limits as
/// [`encode_attr_vec`].
pub fn encode_name_vec(names: &[String]) -> Result<Vec<u8>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    if names.len() > MAX_VARS {
        return Err(Error::InvalidArgs(format!(
            "too many attributes: {} > {MAX_VARS}",
            names.len()
        )));
    }
    let nlen: usize = names.iter().map(|name| name.len() + NAME_OVERHEAD).sum();
    if nlen > MAX_NLEN {
        return Err(Error::InvalidArgs(format!(
            "name vector too long: {nlen} > {MAX_NLEN}"
        )));
    }

    let mut out = Vec::with_capacity(nlen);
    for name in names {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    Ok(out)
}

/// Decode `count` attributes from a packed `[name-vec | value-vec]` body.
///
/// # Errors
///
/// Returns [`Error::Protocol`] when either vector is truncated or the entry
/// counts do not line up with `count`.
pub fn decode_attr_vec(body: &[u8], count: usize) -> Result<Vec<XAttr>> {
    let mut cursor = 0usize;
    let mut names = Vec::with_capacity(count);

    for _ in 0..count {
        if body.len() < cursor + 2 {
            return Err(Error::Protocol("truncated xattr name vector".into()));
        }
        let rc = read_network_u16([body[cursor], body[cursor + 1]]);
        cursor += 2;
        let terminator = body[cursor..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Protocol("unterminated xattr name".into()))?;
        let name = String::from_utf8(body[cursor..cursor + terminator].to_vec())
            .map_err(|_| Error::Protocol("xattr name is not valid UTF-8".into()))?;
        cursor += terminator + 1;
        names.push((name, rc));
    }

    let mut out = Vec::with_capacity(count);
    for (name, rc) in names {
        if body.len() < cursor + 4 {
            return Err(Error::Protocol("truncated xattr value vector".into()));
        }
        let vlen = read_network_u32([
            body[cursor],
            body[cursor + 1],
            body[cursor + 2],
            body[cursor + 3],
        ]) as usize;
        cursor += 4;
        if body.len() < cursor + vlen {
            return Err(Error::Protocol("truncated xattr value".into()));
        }
        let value = body[cursor..cursor + vlen].to_vec();
        cursor += vlen;
        out.push(XAttr { name, rc, value });
    }

    if cursor != body.len() {
        return Err(Error::Protocol("trailing bytes after xattr vectors".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn attrs(entries: &[(&str, &[u8])]) -> Vec<(String, Vec<u8>)> {
        entries
            .iter()
            .map(|(n, v)| ((*n).to_owned(), v.to_vec()))
            .collect()
    }

    #[test]
    fn empty_lists_encode_to_nothing() {
        assert_eq!(encode_attr_vec(&[]).expect("empty list"), Vec::<u8>::new());
        assert_eq!(encode_name_vec(&[]).expect("empty list"), Vec::<u8>::new());
    }

    #[test]
    fn attribute_vectors_round_trip() {
        let input = attrs(&[("user.checksum", b"adler32"), ("user.owner", b"alice")]);
        let encoded = encode_attr_vec(&input).expect("encode should succeed");
        let decoded = decode_attr_vec(&encoded, input.len()).expect("decode should succeed");
        for (entry, (name, value)) in decoded.iter().zip(&input) {
            assert_eq!(&entry.name, name);
            assert_eq!(&entry.value, value);
            assert_eq!(entry.rc, 0);
        }
    }

    #[rstest]
    #[case(MAX_VARS + 1)]
    fn too_many_attributes_are_rejected(#[case] count: usize) {
        let input: Vec<_> = (0..count).map(|i| (format!("a{i}"), vec![0u8])).collect();
        assert!(matches!(
            encode_attr_vec(&input),
            Err(Error::InvalidArgs(_))
        ));
    }

    #[test]
    fn oversized_name_vectors_are_rejected() {
        let input = attrs(&[("n".repeat(MAX_NLEN).as_str(), b"v")]);
        assert!(matches!(encode_attr_vec(&input), Err(Error::InvalidArgs(_))));
    }

    #[test]
    fn truncated_bodies_fail_with_protocol_errors() {
        let input = attrs(&[("user.a", b"hello")]);
        let encoded = encode_attr_vec(&input).expect("encode should succeed");
        let err = decode_attr_vec(&encoded[..encoded.len() - 2], 1)
            .expect_err("truncated body should fail");
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn mismatched_counts_fail_with_protocol_errors() {
        let input = attrs(&[("user.a", b"x"), ("user.b", b"y")]);
        let encoded = encode_attr_vec(&input).expect("encode should succeed");
        assert!(decode_attr_vec(&encoded, 1).is_err());
        assert!(decode_attr_vec(&encoded, 3).is_err());
    }

    proptest! {
        #[test]
        fn any_in_limit_list_round_trips(
            entries in proptest::collection::vec(
                ("[a-z.]{1,12}", proptest::collection::vec(any::<u8>(), 0..32)),
                1..8,
            )
        ) {
            let input: Vec<_> = entries
                .into_iter()
                .map(|(name, value)| (name, value))
                .collect();
            let encoded = encode_attr_vec(&input).expect("encode within limits");
            let decoded = decode_attr_vec(&encoded, input.len()).expect("decode within limits");
            let flattened: Vec<_> = decoded
                .into_iter()
                .map(|entry| (entry.name, entry.value))
                .collect();
            prop_assert_eq!(flattened, input);
        }
    }
}
