pub mod turn;

pub use turn::{TurnRecorder, TurnRecorderConfig, TurnRecording, RESPONSE_SAMPLE_RATE};
