/// Scores a catalog entry against positive/negative keyword sets.
///
/// An entry matches when every positive keyword is a case-insensitive
/// substring of the title or the separator-normalized handle, and no
/// negative keyword is. An empty positive set never matches, so a
/// misconfigured query cannot sweep in the whole catalog.
pub fn matches_keywords(
    title: &str,
    handle: &str,
    positive: &[String],
    negative: &[String],
) -> bool {
    if positive.is_empty() {
        return false;
    }
    let title = title.to_uppercase();
    let handle = handle.replace(['-', '_'], " ").to_uppercase();
    let contains = |keyword: &String| {
        let keyword = keyword.trim().to_uppercase();
        !keyword.is_empty() && (title.contains(&keyword) || handle.contains(&keyword))
    };
    positive.iter().all(contains) && !negative.iter().any(contains)
}
