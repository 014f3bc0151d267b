//! Core of the hand-sign recognition pipeline.
//!
//! Everything in this crate is backend agnostic: frames come in as raw byte
//! slices, the network is reached through [`model::InferenceBackend`], and the
//! decode/validation stages operate on plain host buffers. The TorchScript
//! backend lives behind the `with-tch` feature.

pub mod decode;
#[cfg(feature = "with-tch")]
pub mod detector;
pub mod geometry;
pub mod labels;
pub mod mapping;
pub mod model;
pub mod nms;
pub mod preprocess;
pub mod results;
pub mod tensor;
pub mod validation;

pub use decode::{DecodeError, DecodeParams, Detection, decode};
pub use geometry::{BoundingBox, ZoneRect};
pub use labels::{LabelVocabulary, VocabularyError};
pub use mapping::CoordinateMapper;
pub use model::{
    InferenceBackend, InferenceError, ModelError, ModelHandle, ModelLoader, ModelSource,
    ModelStatus,
};
pub use preprocess::{FramePreprocessor, PixelLayout, PreprocessError};
pub use results::{ResultEvent, ResultStream};
pub use tensor::{HostTensor, TensorLedger};

#[cfg(feature = "with-tch")]
pub use tch;
