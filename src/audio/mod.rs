pub mod capture;
#[cfg(feature = "audio-io")]
pub mod input;

pub use capture::{AudioCapture, NullCapture, SampleCallback};
#[cfg(feature = "audio-io")]
pub use input::CpalCapture;
