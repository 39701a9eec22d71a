pub mod observation;

pub use observation::{
    EnrichedRecord, EvaluationMetrics, ObservationRecord, RawTable, FEATURE_COLUMNS,
};
