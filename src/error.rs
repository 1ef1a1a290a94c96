use thiserror::Error;

/// Error taxonomy for the scheduling plane.
///
/// `ResourceExhausted` is reserved for the sheddable-drop case so the
/// ext-proc handler can match on it directly instead of inspecting message
/// text (see `extproc::server`).
#[derive(Debug, Error)]
pub enum EppError {
    #[error("datastore not initialized: pool has not been reconciled yet")]
    NotInitialized,

    #[error("no model object for {0}")]
    ModelNotFound(String),

    #[error("weighted draw over target models returned nothing")]
    WeightedDrawEmpty,

    #[error("no pods available after filtering: {0}")]
    ResourceExhausted(String),

    #[error("filter stage {0} produced an empty result")]
    FilterEmptyResult(String),

    #[error("failed to scrape metrics from {pod}: {source}")]
    ScrapeFailure {
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse body: {0}")]
    ParseFailure(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("scheduling produced no candidate pods")]
    SchedulingFailed,
}

pub type Result<T> = std::result::Result<T, EppError>;
