//! Closed sets and fixed values shared across extractors, normalizer and loader.

/// Fixed category written for every GPU product row.
pub const GPU_CATEGORY: &str = "그래픽카드";

/// Price source name for the 다나와 extractor.
pub const DANAWA_SOURCE: &str = "다나와";

/// 다나와 listing search endpoint.
pub const DANAWA_BASE_URL: &str = "http://prod.danawa.com/list/";

/// 다나와 graphics-card category code.
pub const DANAWA_GPU_CATEGORY_CODE: &str = "112758";

/// Known GPU board brands, English and Korean spellings.
///
/// Korean spellings are mapped to their canonical English names by the
/// normalizer; see [`canonical_brand`].
pub const BRANDS: &[&str] = &[
    "ASUS", "MSI", "GIGABYTE", "기가바이트", "ZOTAC", "PALIT", "팔릿",
    "GALAX", "GAINWARD", "이엠텍", "EMTEK", "PNY", "INNO3D",
    "COLORFUL", "MANLI", "KFA2", "EVGA", "LEADTEK",
];

/// Map a matched brand token to its canonical English name.
pub fn canonical_brand(raw: &str) -> String {
    let upper = raw.to_uppercase();
    match upper.as_str() {
        "기가바이트" => "GIGABYTE".to_string(),
        "팔릿" => "PALIT".to_string(),
        "이엠텍" => "EMTEK".to_string(),
        _ => upper,
    }
}

/// Curated keyword set scanned against community posts.
pub const SIGNAL_KEYWORDS: &[&str] = &[
    "New Release",
    "Leak",
    "Issues",
    "Price Drop",
    "Used Market",
];

/// Subreddits monitored by default.
pub const DEFAULT_SUBREDDITS: &[&str] = &["nvidia", "pcmasterrace"];

/// Reddit RSS feed URL template; `{subreddit}` is substituted.
pub const REDDIT_RSS_URL: &str = "https://www.reddit.com/r/{subreddit}/.rss";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn korean_brands_map_to_english() {
        assert_eq!(canonical_brand("기가바이트"), "GIGABYTE");
        assert_eq!(canonical_brand("팔릿"), "PALIT");
        assert_eq!(canonical_brand("이엠텍"), "EMTEK");
    }

    #[test]
    fn english_brands_uppercase() {
        assert_eq!(canonical_brand("Asus"), "ASUS");
        assert_eq!(canonical_brand("zotac"), "ZOTAC");
    }
}
