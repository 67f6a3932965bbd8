//! Multipart/x-mixed-replace framing for MJPEG responses.
//!
//! One response carries one boundary marker for its whole lifetime; each
//! encoded frame becomes one part.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

/// Boundary marker for a new response, unique enough per response and
/// constant for its lifetime.
pub fn response_boundary() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("kinoscope_{seconds}")
}

/// Content type for an MJPEG response with the given boundary.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={boundary}")
}

/// One stream part: boundary line, part headers, JPEG payload, CRLF.
pub fn part(boundary: &str, frame: &Bytes) -> Bytes {
    let mut data = BytesMut::with_capacity(boundary.len() + frame.len() + 64);
    data.put_slice(b"--");
    data.put_slice(boundary.as_bytes());
    data.put_slice(b"\r\nContent-Type: image/jpeg\r\n\r\n");
    data.put_slice(frame);
    data.put_slice(b"\r\n");
    data.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_matches_multipart_grammar() {
        let frame = Bytes::from_static(b"\xff\xd8jpeg\xff\xd9");
        let part = part("kinoscope_123", &frame);
        assert_eq!(
            part,
            Bytes::from_static(
                b"--kinoscope_123\r\nContent-Type: image/jpeg\r\n\r\n\xff\xd8jpeg\xff\xd9\r\n"
            )
        );
    }

    #[test]
    fn content_type_names_the_boundary() {
        assert_eq!(
            content_type("kinoscope_123"),
            "multipart/x-mixed-replace; boundary=kinoscope_123"
        );
    }

    #[test]
    fn boundary_is_wellformed() {
        let boundary = response_boundary();
        assert!(boundary.starts_with("kinoscope_"));
        assert!(boundary["kinoscope_".len()..]
            .chars()
            .all(|c| c.is_ascii_digit()));
    }
}
