pub mod error_report;
pub mod guess;
pub mod loaders;
pub mod metrics;
pub mod queue;
pub mod response;

pub use error_report::{ErrorReport, ErrorType};
pub use guess::{Guess, GuessAccuracy};
pub use loaders::{load_all_response_files, load_response_file, ResponseFile};
pub use metrics::{
    Distribution, GuessAccuracyStats, InteractionPatterns, QuestionMetrics, Quadrants,
    SpatialDistribution, TimeStats,
};
pub use queue::QueueEntry;
pub use response::{
    Device, DeviceClass, InputMethod, Interaction, InteractionKind, Position, Response,
    ResponseCandidate, ResponseMetadata, ResponseValue, SpatialValue,
};
