use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("Parallelism must be positive, got {0}")]
    NonPositiveParallelism(i32),
    #[error("Max parallelism {max} is lower than parallelism {parallelism}")]
    MaxParallelismTooLow { parallelism: i32, max: i32 },
    #[error("Job name must not be empty")]
    EmptyJobName,
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJSONError(#[from] serde_json::Error),
}

fn default_parallelism() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_job_name() -> String {
    "pipeline-translator".to_string()
}

/// Knobs read once before a translation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default = "default_parallelism")]
    pub parallelism: i32,
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Lower `CombinePerKey` to one keyed aggregation instead of expanding it.
    #[serde(default = "default_true")]
    pub native_combine: bool,
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default)]
    pub max_parallelism: Option<i32>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            streaming: true,
            native_combine: true,
            job_name: default_job_name(),
            max_parallelism: None,
        }
    }
}

impl PipelineOptions {
    pub fn with_parallelism(mut self, parallelism: i32) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_native_combine(mut self, native_combine: bool) -> Self {
        self.native_combine = native_combine;
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.parallelism <= 0 {
            return Err(OptionsError::NonPositiveParallelism(self.parallelism));
        }
        if let Some(max) = self.max_parallelism {
            if max < self.parallelism {
                return Err(OptionsError::MaxParallelismTooLow {
                    parallelism: self.parallelism,
                    max,
                });
            }
        }
        if self.job_name.trim().is_empty() {
            return Err(OptionsError::EmptyJobName);
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self, OptionsError> {
        let json = std::fs::read_to_string(path)?;
        log::debug!("Loading pipeline options from {}", path.display());
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = PipelineOptions::from_json(r#"{"parallelism": 4}"#).unwrap();
        assert_eq!(options.parallelism, 4);
        assert!(options.streaming);
        assert!(options.native_combine);
        assert_eq!(options.job_name, "pipeline-translator");
        assert_eq!(options.max_parallelism, None);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            PipelineOptions::from_json(r#"{"parallelism": 0}"#),
            Err(OptionsError::NonPositiveParallelism(0))
        ));
        assert!(matches!(
            PipelineOptions::from_json(r#"{"parallelism": 8, "max_parallelism": 4}"#),
            Err(OptionsError::MaxParallelismTooLow { .. })
        ));
        assert!(matches!(
            PipelineOptions::from_json(r#"{"job_name": " "}"#),
            Err(OptionsError::EmptyJobName)
        ));
    }
}
