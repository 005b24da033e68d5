//! CGI parameter merging and in-place request path rewrites.
//!
//! Redirect handling rewrites the path and CGI embedded in a request body:
//! the target's parameters are merged into the existing ones and the result
//! is spliced back into the frame with `dlen` recomputed. Only the
//! path-bearing opcodes are touched; for `kXR_mv` the second of the two
//! space-separated paths is the one rewritten.

use crate::{
    error::{Error, Result},
    message::Message,
    protocol::RequestCode,
    url::{ParamsMap, Url},
};

/// Merge `src` into `dst`.
///
/// With `replace` set, `src` entries overwrite unconditionally. Otherwise an
/// absent key is assigned, an empty existing value is assigned, and a
/// non-empty existing value grows into a comma-joined list.
pub fn merge_params(dst: &mut ParamsMap, src: &ParamsMap, replace: bool) {
    for (key, value) in src {
        if replace || !dst.contains_key(key) {
            dst.insert(key.clone(), value.clone());
        } else if let Some(existing) = dst.get_mut(key) {
            if existing.is_empty() {
                existing.clone_from(value);
            } else {
                existing.push(',');
                existing.push_str(value);
            }
        }
    }
}

/// Rewrite the path and CGI carried in a request body.
///
/// `new_cgi` is merged into the body's existing CGI under the
/// [`merge_params`] rules; `new_path` replaces the path component when
/// provided. Requests whose opcode carries no path are left untouched.
///
/// # Errors
///
/// Returns [`Error::InvalidArgs`] when the body is not valid UTF-8 or a
/// `kXR_mv` body lacks its two space-separated paths.
pub fn rewrite_cgi_and_path(
    msg: &mut Message,
    new_cgi: &ParamsMap,
    replace: bool,
    new_path: Option<&str>,
) -> Result<()> {
    let Some(code) = msg.request_code() else {
        return Ok(());
    };
    if !code.is_path_bearing() {
        return Ok(());
    }

    let body = std::str::from_utf8(msg.request_body())
        .map_err(|_| Error::InvalidArgs("request body is not valid UTF-8".into()))?;

    let (prefix, target) = if code == RequestCode::Mv {
        let (first, second) = body
            .split_once(' ')
            .ok_or_else(|| Error::InvalidArgs("mv body lacks a second path".into()))?;
        (Some(first.to_owned()), second.to_owned())
    } else {
        (None, body.to_owned())
    };

    let mut current = Url::from_path_with_params(&target);
    merge_params(current.params_mut(), new_cgi, replace);
    if let Some(path) = new_path {
        current.set_path(path);
    }

    let rewritten = match prefix {
        Some(first) => format!("{first} {}", current.path_with_params()),
        None => current.path_with_params(),
    };
    msg.set_request_body(rewritten.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::request;

    fn map(entries: &[(&str, &str)]) -> ParamsMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[rstest]
    #[case(map(&[]), map(&[("a", "1")]), map(&[("a", "1")]))]
    #[case(map(&[("a", "")]), map(&[("a", "1")]), map(&[("a", "1")]))]
    #[case(map(&[("a", "1")]), map(&[("a", "2")]), map(&[("a", "1,2")]))]
    fn merge_without_replace_appends(
        #[case] mut dst: ParamsMap,
        #[case] src: ParamsMap,
        #[case] expected: ParamsMap,
    ) {
        merge_params(&mut dst, &src, false);
        assert_eq!(dst, expected);
    }

    #[test]
    fn merge_with_replace_overwrites() {
        let mut dst = map(&[("a", "1"), ("b", "x")]);
        merge_params(&mut dst, &map(&[("a", "2")]), true);
        assert_eq!(dst, map(&[("a", "2"), ("b", "x")]));
    }

    proptest! {
        #[test]
        fn merge_obeys_the_append_algebra(
            a in proptest::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..6),
            b in proptest::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..6),
        ) {
            let mut merged = a.clone();
            merge_params(&mut merged, &b, false);
            for (key, value) in &b {
                let expected = match a.get(key) {
                    None => value.clone(),
                    Some(existing) if existing.is_empty() => value.clone(),
                    Some(existing) => format!("{existing},{value}"),
                };
                prop_assert_eq!(merged.get(key), Some(&expected));
            }
            for (key, value) in &a {
                if !b.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }

            let mut replaced = a.clone();
            merge_params(&mut replaced, &b, true);
            for (key, value) in &b {
                prop_assert_eq!(replaced.get(key), Some(value));
            }
        }
    }

    #[test]
    fn stat_bodies_gain_the_merged_cgi() {
        let mut msg = request::stat("/data/f?cgi=old");
        rewrite_cgi_and_path(&mut msg, &map(&[("tried", "host1")]), false, None)
            .expect("rewrite should succeed");
        assert_eq!(msg.request_body(), b"/data/f?cgi=old&tried=host1");
        assert_eq!(msg.request_dlen() as usize, msg.request_body().len());
    }

    #[test]
    fn mv_rewrites_only_the_second_path() {
        let mut msg = request::mv("/src/a", "/dst/b");
        rewrite_cgi_and_path(&mut msg, &map(&[("tried", "h1")]), false, None)
            .expect("rewrite should succeed");
        let body = std::str::from_utf8(msg.request_body()).expect("body should stay UTF-8");
        let (first, second) = body.split_once(' ').expect("mv separator should survive");
        assert_eq!(first, "/src/a");
        assert_eq!(second, "/dst/b?tried=h1");
    }

    #[test]
    fn mv_without_separator_is_rejected() {
        let mut msg = Message::request(RequestCode::Mv, [0u8; 16], b"/only-one-path");
        let err = rewrite_cgi_and_path(&mut msg, &ParamsMap::new(), false, None)
            .expect_err("missing separator should fail");
        assert!(matches!(err, Error::InvalidArgs(_)));
    }

    #[test]
    fn non_path_requests_are_left_untouched() {
        let mut msg = request::read([0u8; 4], 0, 128);
        let before = msg.clone();
        rewrite_cgi_and_path(&mut msg, &map(&[("tried", "h1")]), false, None)
            .expect("no-op rewrite should succeed");
        assert_eq!(msg, before);
    }
}
