//! Hashtag grammar.
//!
//! A tag starts at a `#` that sits at the start of the text or right after
//! whitespace. Its body is a run of letters (with their combining marks),
//! digits and `- _ + . :`, where `.` and `:` may only appear inside the run:
//! a run cannot start with them and any trailing `.`/`:` are stripped as
//! sentence punctuation. Tags keep their case.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters that may only appear between other body characters.
const INNER_SYMBOLS: [char; 2] = ['.', ':'];

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)#([\p{L}\p{M}\p{N}_+\-][\p{L}\p{M}\p{N}_+\-.:]*)").expect("tag pattern")
});

static TAG_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{M}\p{N}_+\-.:]+$").expect("tag body pattern"));

/// Extract the set of tags written in `text`.
pub fn extract_tags(text: &str) -> BTreeSet<String> {
    if !text.contains('#') {
        return BTreeSet::new();
    }

    TAG_PATTERN
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim_end_matches(INNER_SYMBOLS))
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether `tag` is a name the grammar could produce.
///
/// The tag index only accepts canonical names, which also keeps every tag
/// usable as a file name.
pub fn is_canonical_tag(tag: &str) -> bool {
    let (Some(first), Some(last)) = (tag.chars().next(), tag.chars().last()) else {
        return false;
    };
    !INNER_SYMBOLS.contains(&first)
        && !INNER_SYMBOLS.contains(&last)
        && TAG_BODY.is_match(tag)
}
