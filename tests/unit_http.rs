use monitor_mcp::filter;
use monitor_mcp::http::{
    decode_cursor, encode_cursor, encode_path_segment, extract_rate_signal, PageCursor,
};
use reqwest::header::HeaderMap;

#[test]
fn cursor_codec_roundtrip() {
    let c = PageCursor {
        offset: 150,
        size: 50,
    };
    let enc = encode_cursor(c.clone());
    let dec = decode_cursor(&enc).unwrap();
    assert_eq!(c, dec);
}

#[test]
fn rate_signal_headers() {
    let mut h = HeaderMap::new();
    h.insert("x-rate-limit-limit", "500".parse().unwrap());
    h.insert("x-rate-limit-remaining", "499".parse().unwrap());
    h.insert("x-rate-limit-window", "60".parse().unwrap());
    let sig = extract_rate_signal(&h).unwrap();
    assert_eq!(sig.limit, 500);
    assert_eq!(sig.remaining, 499);
    assert_eq!(sig.window_secs, 60);

    h.remove("x-rate-limit-window");
    assert!(extract_rate_signal(&h).is_none());
}

#[test]
fn url_path_segment_encoding() {
    // Spaces, slash, percent and unicode should be percent-encoded
    assert_eq!(encode_path_segment("Prod Env/Blue%"), "Prod%20Env%2FBlue%25");
    assert_eq!(encode_path_segment("abc-._~123"), "abc-._~123");
}

#[test]
fn filter_translation_examples() {
    assert_eq!(
        filter::translate("displayName ~ prod && port > 80").unwrap(),
        "displayName~\"prod\",port>80"
    );
    assert_eq!(
        filter::translate("severity = error || severity = critical").unwrap(),
        "severity:\"error\"|severity:\"critical\""
    );
    assert!(filter::translate("not a clause").is_err());
}
