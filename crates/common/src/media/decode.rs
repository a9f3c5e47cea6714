//! Decoding of the video-info payload
//!
//! The payload is a percent-encoded blob, nested five deep, that
//! concatenates every stream URL the upstream offers together with a table
//! describing each stream format (`itag`). Recovering the variants is a
//! matter of peeling the encoding, splitting the URLs apart and joining each
//! one with its format table entry.

use std::collections::HashMap;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use super::VideoVariant;

const SCHEME: &str = "https://";
const URL_MARKER: &str = "&url=https://";
/// Stands in for `URL_MARKER`; never produced by the decoding steps
const DELIMITER: char = '\u{1e}';
const ENCODING_DEPTH: usize = 5;

/// One row of the format table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ItagInfo {
    width: u32,
    height: u32,
    codec: String,
}

static ITAG_TABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(\d+)/(\d+)x(\d+)/(\d+/\d+/\d+)&?,?").expect("static regex")
});

static STREAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)itag=(\d+).*?type=video/([^&]+)&quality=(\w+)").expect("static regex")
});

/// Canonical format name for an upstream container string.
pub fn canonical_format(container: &str) -> Option<&'static str> {
    match container {
        "x-flv" => Some("flv"),
        "webm" => Some("WebM"),
        "mp4;+codecs=\"avc1.42001E,+mp4a.40.2\"" => Some("MP4"),
        _ => None,
    }
}

fn codec_name(triple: &str) -> String {
    match triple {
        "9/0/115" => "h.264/aac".to_string(),
        "99/0/0" => "VP8/vorbis".to_string(),
        other => other.to_string(),
    }
}

/// Undo the nested percent-encoding and the two escapes it leaves behind.
pub fn unwrap_payload(body: &str) -> String {
    let mut decoded = body.to_string();
    for _ in 0..ENCODING_DEPTH {
        decoded = percent_decode_str(&decoded).decode_utf8_lossy().into_owned();
    }
    decoded.replace("\\u003d", "=").replace("\\u0026", "&")
}

fn parse_itag_table(payload: &str) -> HashMap<String, ItagInfo> {
    let mut table = HashMap::new();
    for caps in ITAG_TABLE_REGEX.captures_iter(payload) {
        let (Ok(width), Ok(height)) = (caps[2].parse::<u32>(), caps[3].parse::<u32>()) else {
            continue;
        };
        table.insert(
            caps[1].to_string(),
            ItagInfo {
                width,
                height,
                codec: codec_name(&caps[4]),
            },
        );
    }
    table
}

/// Decode a raw video-info body into the variants whose format is in
/// `allowed_formats` (lowercase), in the order the upstream lists them.
pub fn decode_variants(body: &str, allowed_formats: &[String]) -> Vec<VideoVariant> {
    let payload = unwrap_payload(body).replace(URL_MARKER, &DELIMITER.to_string());
    let itags = parse_itag_table(&payload);

    let mut variants = Vec::new();
    // Anything before the first marker is not a URL
    for fragment in payload.split(DELIMITER).skip(1) {
        if fragment.is_empty() {
            continue;
        }
        let url = format!("{}{}", SCHEME, fragment.trim_end_matches('/'));

        for caps in STREAM_REGEX.captures_iter(&url) {
            let (itag, container, quality) = (&caps[1], &caps[2], &caps[3]);

            let Some(format) = canonical_format(container) else {
                tracing::debug!(container, "skipping unknown container");
                continue;
            };
            let extension = format.to_lowercase();
            if !allowed_formats.iter().any(|f| *f == extension) {
                continue;
            }
            let Some(info) = itags.get(itag) else {
                tracing::debug!(itag, "no format table entry for stream");
                continue;
            };

            variants.push(VideoVariant {
                quality: quality.to_string(),
                width: info.width,
                height: info.height,
                codec: info.codec.clone(),
                container: container.to_string(),
                extension,
                url: url.clone(),
                size: None,
            });
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Percent-encode `s` `depth` times (only the characters that matter here).
    fn nest(s: &str, depth: usize) -> String {
        let mut out = s.to_string();
        for _ in 0..depth {
            out = out
                .replace('%', "%25")
                .replace('&', "%26")
                .replace('=', "%3D")
                .replace('/', "%2F")
                .replace(',', "%2C");
        }
        out
    }

    #[test]
    fn test_single_flv_variant() {
        let body = "fmt_list=5/640x360/9/0/115&x=1&url=https://r1.example/videoplayback?itag=5&type=video/x-flv&quality=small";
        let variants = decode_variants(body, &formats(&["flv"]));

        assert_eq!(variants.len(), 1);
        let v = &variants[0];
        assert_eq!(v.quality, "small");
        assert_eq!(v.width, 640);
        assert_eq!(v.height, 360);
        assert_eq!(v.codec, "h.264/aac");
        assert_eq!(v.container, "x-flv");
        assert_eq!(v.extension, "flv");
        assert_eq!(
            v.url,
            "https://r1.example/videoplayback?itag=5&type=video/x-flv&quality=small"
        );
        assert!(v.size.is_none());
    }

    #[test]
    fn test_disallowed_format_is_dropped() {
        let body = "fmt_list=43/854x480/99/0/0&url=https://r1.example/v?itag=43&type=video/webm&quality=medium";
        assert!(decode_variants(body, &formats(&["mp4", "flv"])).is_empty());

        let kept = decode_variants(body, &formats(&["webm"]));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].extension, "webm");
        assert_eq!(kept[0].codec, "VP8/vorbis");
    }

    #[test]
    fn test_nested_encoding_and_escapes() {
        let inner = "fmt_list=22/1280x720/9/0/115,18/640x360/9/0/115\\u0026url=https://r2.example/v?itag=22&type=video/mp4;+codecs=\"avc1.42001E,+mp4a.40.2\"&quality=hd720&url=https://r3.example/v?itag=18\\u0026type=video/mp4;+codecs=\"avc1.42001E,+mp4a.40.2\"&quality=medium//";
        let body = nest(inner, 5);
        assert!(!body.contains("&url="));

        let variants = decode_variants(&body, &formats(&["mp4"]));
        assert_eq!(variants.len(), 2);

        assert_eq!(variants[0].quality, "hd720");
        assert_eq!(variants[0].height, 720);
        assert_eq!(variants[0].extension, "mp4");
        assert!(variants[0].url.starts_with("https://r2.example/"));

        assert_eq!(variants[1].quality, "medium");
        assert_eq!(variants[1].width, 640);
        // trailing slashes are stripped
        assert!(variants[1].url.ends_with("quality=medium"));
    }

    #[test]
    fn test_order_follows_payload() {
        let body = "fmt_list=22/1280x720/9/0/115,43/854x480/99/0/0\
            &url=https://a.example/v?itag=43&type=video/webm&quality=medium\
            &url=https://b.example/v?itag=22&type=video/mp4;+codecs=\"avc1.42001E,+mp4a.40.2\"&quality=hd720";
        let variants = decode_variants(body, &formats(&["mp4", "webm"]));
        let heights: Vec<u32> = variants.iter().map(|v| v.height).collect();
        assert_eq!(heights, vec![480, 720]);
    }

    #[test]
    fn test_unknown_codec_kept_verbatim() {
        let body = "fmt_list=36/320x240/1/2/3&url=https://a.example/v?itag=36&type=video/x-flv&quality=small";
        let variants = decode_variants(body, &formats(&["flv"]));
        assert_eq!(variants[0].codec, "1/2/3");
    }

    #[test]
    fn test_unknown_container_and_itag_are_skipped() {
        let body = "fmt_list=5/640x360/9/0/115\
            &url=https://a.example/v?itag=5&type=video/3gpp&quality=small\
            &url=https://b.example/v?itag=99&type=video/x-flv&quality=small";
        assert!(decode_variants(body, &formats(&["flv", "3gpp"])).is_empty());
    }

    #[test]
    fn test_text_before_first_url_is_ignored() {
        let body = "status=ok&itag=5&type=video/x-flv&quality=small";
        assert!(decode_variants(body, &formats(&["flv"])).is_empty());
    }

    #[test]
    fn test_canonical_format() {
        assert_eq!(canonical_format("x-flv"), Some("flv"));
        assert_eq!(canonical_format("webm"), Some("WebM"));
        assert_eq!(canonical_format("mp4"), None);
    }
}
