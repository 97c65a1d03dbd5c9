pub mod status;
pub mod sweep;
pub mod transcribe;
