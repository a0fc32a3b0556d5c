pub mod carving;
pub mod config;
pub mod converter;
pub mod document;
mod error;
pub mod families;
pub mod formats;
pub mod io;
pub mod package;
pub mod pipeline;
pub mod pixels;
pub mod scanners;
pub mod sniff;
mod traits;
mod types;
pub mod xml;

pub use carving::{CandidateRegion, CarveAnomaly, CarveReport, Carver};
pub use config::{ConverterConfig, Limits, SanitizerConfig};
pub use error::{
    ContentWarning, CoreError, ExtractionFailure, IdentificationFailure, PersistFailure,
    PipelineError, RebuildFailure, Result,
};
pub use pipeline::{Outcome, Phase, Rebuilt, Sanitizer};
pub use pixels::{PixelError, PixelSanitizer, SanitizedImage};
pub use scanners::MarkerScanner;
pub use sniff::{identify, identify_path};
pub use traits::{ReconstructionPipeline, SourceFile};
pub use types::{Family, FileType, RasterFormat};

