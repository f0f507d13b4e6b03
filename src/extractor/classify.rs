//! Natural ordering and compact labels for codestream groups.

use std::cmp::Ordering;

/// Compare two strings treating runs of ASCII digits as numbers.
///
/// `15.4u9` sorts before `15.4u10`, unlike plain string order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.as_bytes();
    let mut right = b.as_bytes();

    loop {
        match (left.first(), right.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let (lnum, lrest) = split_digits(left);
                let (rnum, rrest) = split_digits(right);
                let ord = compare_digit_runs(lnum, rnum);
                if ord != Ordering::Equal {
                    return ord;
                }
                left = lrest;
                right = rrest;
            }
            (Some(l), Some(r)) => {
                let ord = l.cmp(r);
                if ord != Ordering::Equal {
                    return ord;
                }
                left = &left[1..];
                right = &right[1..];
            }
        }
    }
}

fn split_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let end = s.iter().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn compare_digit_runs(a: &[u8], b: &[u8]) -> Ordering {
    let trim = |s: &[u8]| -> usize { s.iter().take_while(|&&b| b == b'0').count() };
    let a_sig = &a[trim(a)..];
    let b_sig = &b[trim(b)..];
    a_sig
        .len()
        .cmp(&b_sig.len())
        .then_with(|| a_sig.cmp(b_sig))
        // Equal values: fewer leading zeros first
        .then_with(|| a.len().cmp(&b.len()))
}

/// Sort codestream ids in natural order.
pub fn natural_sort(ids: &mut [String]) {
    ids.sort_by(|a, b| natural_cmp(a, b));
}

/// Render a naturally sorted group as compact range tokens.
///
/// Ids sharing the same prefix (everything before the last `u`) with
/// consecutive update numbers collapse into `<prefix>u<first>-u<last>`:
///
/// ```
/// use klpgen::extractor::classify_codestreams;
///
/// let ids = ["15.4u10", "15.4u11", "15.4u13"].map(String::from);
/// assert_eq!(classify_codestreams(&ids), vec!["15.4u10-u11", "15.4u13"]);
/// ```
///
/// Ids that do not end in `u<number>` are kept as they are.
pub fn classify_codestreams(ids: &[String]) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run: Option<(&str, u64, u64)> = None;

    for id in ids {
        match split_update(id) {
            Some((prefix, update)) => match run {
                Some((p, first, last)) if p == prefix && last.checked_add(1) == Some(update) => {
                    run = Some((p, first, update));
                }
                _ => {
                    if let Some(done) = run.take() {
                        tokens.push(range_token(done));
                    }
                    run = Some((prefix, update, update));
                }
            },
            None => {
                if let Some(done) = run.take() {
                    tokens.push(range_token(done));
                }
                tokens.push(id.clone());
            }
        }
    }
    if let Some(done) = run {
        tokens.push(range_token(done));
    }

    tokens
}

fn split_update(id: &str) -> Option<(&str, u64)> {
    let (prefix, update) = id.rsplit_once('u')?;
    if update.is_empty() || !update.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    update.parse().ok().map(|u| (prefix, u))
}

fn range_token((prefix, first, last): (&str, u64, u64)) -> String {
    if first == last {
        format!("{}u{}", prefix, first)
    } else {
        format!("{}u{}-u{}", prefix, first, last)
    }
}
