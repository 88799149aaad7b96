//! Audio capture and analysis module

pub mod capture;
pub mod fft;
pub mod frame;
pub mod level;
pub mod rate;
pub mod resample;

pub use capture::{list_input_devices, CaptureBackend, CaptureRequest, CaptureSession, CpalBackend, InputDevice};
pub use fft::SpectrumContext;
pub use frame::{CaptureFormat, FrameProcessor};
pub use level::LevelMeter;
pub use rate::RateLimiter;
pub use resample::resample;
