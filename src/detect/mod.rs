//! Page detectors: required/optional classification, sensitive-field
//! detection, and tiered button matching with an AI fallback.

pub mod buttons;
pub mod required;
pub mod sensitive;
