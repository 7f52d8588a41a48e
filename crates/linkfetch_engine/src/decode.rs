use chardetng::EncodingDetector;
use encoding_rs::Encoding;

/// Where the charset used for a body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSource {
    ByteOrderMark,
    ContentType,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding_label: String,
    pub source: CharsetSource,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("body is not valid {encoding}")]
    Malformed { encoding: String },
}

/// Decodes a response body to UTF-8. A byte order mark wins over a
/// `charset=` parameter, which wins over statistical detection. Malformed
/// input is an error rather than being replaced.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Result<DecodedText, DecodeError> {
    let (encoding, body, source) = sniff(bytes, content_type);
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .ok_or_else(|| DecodeError::Malformed {
            encoding: encoding.name().to_string(),
        })?;
    Ok(DecodedText {
        text: text.into_owned(),
        encoding_label: encoding.name().to_string(),
        source,
    })
}

fn sniff<'a>(
    bytes: &'a [u8],
    content_type: Option<&str>,
) -> (&'static Encoding, &'a [u8], CharsetSource) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        return (encoding, &bytes[bom_len..], CharsetSource::ByteOrderMark);
    }
    if let Some(encoding) = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        return (encoding, bytes, CharsetSource::ContentType);
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    (detector.guess(None, true), bytes, CharsetSource::Detected)
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').trim_matches('\''))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_parameter_beats_detection() {
        let cafe = [0x43, 0x61, 0x66, 0xe9];
        let decoded = decode_body(&cafe, Some("text/html; Charset=\"ISO-8859-1\"")).unwrap();
        assert_eq!(decoded.text, "Café");
        assert_eq!(decoded.encoding_label, "windows-1252");
        assert_eq!(decoded.source, CharsetSource::ContentType);
    }

    #[test]
    fn byte_order_mark_beats_charset_parameter() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("Größe".as_bytes());
        let decoded = decode_body(&bytes, Some("text/html; charset=windows-1252")).unwrap();
        assert_eq!(decoded.text, "Größe");
        assert_eq!(decoded.encoding_label, "UTF-8");
        assert_eq!(decoded.source, CharsetSource::ByteOrderMark);
    }

    #[test]
    fn plain_ascii_without_charset_is_detected() {
        let decoded = decode_body(b"EAN 4006381333931", Some("text/plain")).unwrap();
        assert_eq!(decoded.text, "EAN 4006381333931");
        assert_eq!(decoded.source, CharsetSource::Detected);
    }

    #[test]
    fn malformed_utf8_is_rejected() {
        let err = decode_body(&[0x66, 0xff, 0xfe, 0x6f], Some("text/html; charset=utf-8"));
        assert_eq!(
            err,
            Err(DecodeError::Malformed {
                encoding: "UTF-8".into()
            })
        );
    }
}
