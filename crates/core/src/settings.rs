//! Assembly and pipeline settings.
//!
//! These are the typed knobs the engine and pipeline read; the config crate
//! embeds them in the TOML file under `[assembler]` and `[pipeline]`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// When a subject's buffer is considered complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessPolicy {
    /// The first patch of a never-seen subject marks every other buffered
    /// subject ready. Assumes a subject-contiguous stream.
    #[default]
    SubjectChange,
    /// A subject is ready once every voxel of its buffer has been written.
    Coverage,
}

/// What to do with index expressions that reach past the buffer extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsPolicy {
    /// Reject the batch.
    #[default]
    Strict,
    /// Shrink the region to the extent; a start past the end selects nothing.
    Clip,
}

/// Coordinate system of each item in a prediction batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchLayout {
    /// Items live in full-volume coordinates; the index expression is applied
    /// to both the item and the buffer.
    #[default]
    Aligned,
    /// Items are exactly the addressed region and are written whole.
    Local,
}

/// What happens when an already-retrieved subject shows up again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisitPolicy {
    #[default]
    Reject,
    /// Start a fresh zero buffer.
    Recreate,
}

/// What the pipeline does with a batch the assembler rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorPolicy {
    /// Stop the stream and return the error.
    #[default]
    Abort,
    /// Log, count and continue with the next batch.
    Skip,
}

macro_rules! snake_case_from_str {
    ($ty:ty, $($text:literal => $variant:expr),+ $(,)?) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(format!(
                        "unknown value '{other}', expected one of: {}",
                        [$($text),+].join(", ")
                    )),
                }
            }
        }
    };
}

snake_case_from_str!(ReadinessPolicy,
    "subject_change" => ReadinessPolicy::SubjectChange,
    "coverage" => ReadinessPolicy::Coverage,
);
snake_case_from_str!(BoundsPolicy,
    "strict" => BoundsPolicy::Strict,
    "clip" => BoundsPolicy::Clip,
);
snake_case_from_str!(PatchLayout,
    "aligned" => PatchLayout::Aligned,
    "local" => PatchLayout::Local,
);
snake_case_from_str!(RevisitPolicy,
    "reject" => RevisitPolicy::Reject,
    "recreate" => RevisitPolicy::Recreate,
);
snake_case_from_str!(BatchErrorPolicy,
    "abort" => BatchErrorPolicy::Abort,
    "skip" => BatchErrorPolicy::Skip,
);

/// Engine behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerConfig {
    #[serde(default)]
    pub readiness: ReadinessPolicy,

    #[serde(default)]
    pub bounds: BoundsPolicy,

    #[serde(default)]
    pub layout: PatchLayout,

    #[serde(default)]
    pub revisit: RevisitPolicy,
}

/// Streaming driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bounded capacity of the batch channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Hand out still-buffered subjects when the producer hangs up.
    #[serde(default = "default_true")]
    pub flush_on_close: bool,

    #[serde(default)]
    pub on_batch_error: BatchErrorPolicy,
}

fn default_channel_capacity() -> usize {
    16
}
fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            flush_on_close: true,
            on_batch_error: BatchErrorPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_subject_change_contract() {
        let config = AssemblerConfig::default();
        assert_eq!(config.readiness, ReadinessPolicy::SubjectChange);
        assert_eq!(config.bounds, BoundsPolicy::Strict);
        assert_eq!(config.layout, PatchLayout::Aligned);
        assert_eq!(config.revisit, RevisitPolicy::Reject);
    }

    #[test]
    fn policies_parse_from_str() {
        assert_eq!("coverage".parse::<ReadinessPolicy>(), Ok(ReadinessPolicy::Coverage));
        assert_eq!(" Clip ".parse::<BoundsPolicy>(), Ok(BoundsPolicy::Clip));
        assert_eq!("local".parse::<PatchLayout>(), Ok(PatchLayout::Local));
        assert_eq!("skip".parse::<BatchErrorPolicy>(), Ok(BatchErrorPolicy::Skip));
        let err = "sometimes".parse::<RevisitPolicy>().unwrap_err();
        assert!(err.contains("reject, recreate"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: AssemblerConfig = serde_json::from_str(r#"{"readiness":"coverage"}"#).unwrap();
        assert_eq!(config.readiness, ReadinessPolicy::Coverage);
        assert_eq!(config.bounds, BoundsPolicy::Strict);

        let pipeline: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(pipeline.channel_capacity, 16);
        assert!(pipeline.flush_on_close);
    }
}
