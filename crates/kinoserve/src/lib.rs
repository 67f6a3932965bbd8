//! Kinoserve: HTTP front end for a Kinoscope camera.
//!
//! Maps the camera's two sink kinds onto HTTP responses: a
//! [`kinoscope::FrameStream`] becomes a `multipart/x-mixed-replace`
//! MJPEG stream, a snapshot becomes a single `image/jpeg` response.

pub mod mjpeg;
pub mod serve;

pub use serve::{router, run, AppState, ServeConfig};
