//! Model plumbing shared by the embedder and the local generator

pub mod cell;
pub mod device;
pub mod hub;
pub mod tokenizer;

pub use cell::{ModelCell, ModelLoadError};
pub use device::{device_label, select_device, DevicePreference};
pub use hub::{cache_key, ModelCache, ModelFiles};
pub use tokenizer::{EncodedInput, TokenizerWrapper};
