//! Weighted `Accept-Encoding` / `Accept-Language` header parsing.
//!
//! Both headers share the same `token;q=0.x, token;q=0.y` grammar
//! ([RFC 9110, Section 12.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-12.5.1)),
//! so a single weighted-list parser backs both.

use memchr::memchr;

/// Parses a `q`-weighted comma-separated list (shared grammar of
/// `Accept-Encoding`, `Accept-Language` and `Accept`) and returns the tokens
/// sorted by weight descending, ties broken by original order. Entries with
/// `q=0` are dropped (they mean "not acceptable").
pub(crate) fn parse_weighted(header: &'static [u8], out: &mut Vec<&'static [u8]>) {
    let mut scored: Vec<(&'static [u8], u16, usize)> = Vec::new();

    for (index, item) in header.split(|&b| b == b',').enumerate() {
        let item = trim(item);
        if item.is_empty() {
            continue;
        }

        let (token, params) = match memchr(b';', item) {
            Some(pos) => (trim(&item[..pos]), &item[pos + 1..]),
            None => (item, &item[0..0]),
        };

        if token.is_empty() {
            continue;
        }

        let weight = parse_q(params).unwrap_or(1000);
        if weight == 0 {
            continue;
        }

        scored.push((token, weight, index));
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    out.clear();
    out.extend(scored.into_iter().map(|(token, _, _)| token));
}

/// Parses a `;q=0.xxx` parameter list down to a fixed-point weight in
/// thousandths (so `q=1` is `1000`, `q=0.5` is `500`). Returns `None` if no
/// `q` parameter is present or it fails to parse, in which case the default
/// weight of `1.0` applies.
fn parse_q(params: &[u8]) -> Option<u16> {
    for param in params.split(|&b| b == b';') {
        let param = trim(param);
        let Some(eq) = memchr(b'=', param) else {
            continue;
        };
        let key = trim(&param[..eq]);
        if !key.eq_ignore_ascii_case(b"q") {
            continue;
        }

        let value = trim(&param[eq + 1..]);
        return parse_fixed_point(value);
    }
    None
}

/// Parses a decimal like `0.8` or `1` or `1.000` into thousandths, clamped
/// to `[0, 1000]` per RFC 9110's three-fractional-digit `qvalue` grammar.
fn parse_fixed_point(value: &[u8]) -> Option<u16> {
    let dot = memchr(b'.', value);
    let (int_part, frac_part) = match dot {
        Some(pos) => (&value[..pos], &value[pos + 1..]),
        None => (value, &value[0..0]),
    };

    if int_part.is_empty() || int_part.len() > 1 || !int_part[0].is_ascii_digit() {
        return None;
    }
    let whole = (int_part[0] - b'0') as u16;
    if whole > 1 {
        return None;
    }

    let mut frac: u16 = 0;
    let mut scale = 100u16;
    for &b in frac_part.iter().take(3) {
        if !b.is_ascii_digit() {
            return None;
        }
        frac += (b - b'0') as u16 * scale;
        scale /= 10;
    }

    let total = whole * 1000 + frac;
    Some(total.min(1000))
}

#[inline(always)]
fn trim(src: &[u8]) -> &[u8] {
    let start = src.iter().position(|b| *b != b' ' && *b != b'\t');
    let Some(start) = start else {
        return b"";
    };
    let end = src.iter().rposition(|b| *b != b' ' && *b != b'\t').unwrap();
    &src[start..=end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak(bytes: &[u8]) -> &'static [u8] {
        Box::leak(bytes.to_vec().into_boxed_slice())
    }

    #[test]
    fn sorts_by_weight_desc() {
        let mut out = Vec::new();
        parse_weighted(leak(b"gzip;q=0.5, br;q=1.0, deflate;q=0.8"), &mut out);

        assert_eq!(out, vec![b"br".as_ref(), b"deflate".as_ref(), b"gzip".as_ref()]);
    }

    #[test]
    fn default_weight_is_one() {
        let mut out = Vec::new();
        parse_weighted(leak(b"gzip, br;q=0.5"), &mut out);

        assert_eq!(out, vec![b"gzip".as_ref(), b"br".as_ref()]);
    }

    #[test]
    fn zero_weight_is_excluded() {
        let mut out = Vec::new();
        parse_weighted(leak(b"gzip;q=0, br;q=0.5"), &mut out);

        assert_eq!(out, vec![b"br".as_ref()]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut out = Vec::new();
        parse_weighted(leak(b"en-US;q=0.8, fr;q=0.8, de;q=0.8"), &mut out);

        assert_eq!(out, vec![b"en-US".as_ref(), b"fr".as_ref(), b"de".as_ref()]);
    }

    #[test]
    fn accept_language_example() {
        let mut out = Vec::new();
        parse_weighted(leak(b"da, en-gb;q=0.8, en;q=0.7"), &mut out);

        assert_eq!(out, vec![b"da".as_ref(), b"en-gb".as_ref(), b"en".as_ref()]);
    }
}
