//! Conditional gzip compression
//!
//! A materialized body is compressed only when the client advertises gzip
//! (or a wildcard) in `Accept-Encoding` and the formatted body exceeds the
//! size threshold. Streaming bodies bypass compression entirely.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use warp::http::header::ACCEPT_ENCODING;
use warp::http::HeaderMap;

/// Bodies at or below this many bytes are sent uncompressed.
pub const MIN_COMPRESS_BYTES: usize = 1024;

/// Whether the request's `Accept-Encoding` advertises gzip or a wildcard.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.split(';').next().unwrap_or("").trim())
        .any(|encoding| encoding.eq_ignore_ascii_case("gzip") || encoding == "*")
}

pub fn should_compress(headers: &HeaderMap, body_len: usize) -> bool {
    body_len > MIN_COMPRESS_BYTES && accepts_gzip(headers)
}

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use warp::http::HeaderValue;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_accept_encoding_parsing() {
        assert!(accepts_gzip(&headers_with("gzip")));
        assert!(accepts_gzip(&headers_with("br, gzip;q=0.8")));
        assert!(accepts_gzip(&headers_with("*")));
        assert!(!accepts_gzip(&headers_with("br, deflate")));
        assert!(!accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn test_threshold_boundary() {
        let headers = headers_with("gzip");
        assert!(!should_compress(&headers, 1024));
        assert!(should_compress(&headers, 1025));
    }

    #[test]
    fn test_round_trip_reproduces_input() {
        let body = "x".repeat(4096);
        let compressed = gzip(body.as_bytes()).unwrap();
        assert!(compressed.len() < body.len());

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, body);
    }
}
