//! Summarization stage: one prompt in, generated text out.
//!
//! The stage is deliberately thin. Prompt wording lives in
//! [`crate::prompts`], window selection in [`super::window`], and transport
//! retries in the concrete [`TextGenerator`]. A failure here is fatal for the
//! run; nothing is retried at this level.

use crate::config::DecodingParams;
use crate::error::PipelineError;
use crate::services::TextGenerator;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub struct SummarizationStage {
    generator: Arc<dyn TextGenerator>,
}

impl SummarizationStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Send `prompt_text` with `params` and return the model output verbatim.
    pub async fn summarize(
        &self,
        prompt_text: &str,
        params: &DecodingParams,
    ) -> Result<String, PipelineError> {
        let start = Instant::now();
        let summary = self
            .generator
            .predict(prompt_text, params)
            .await
            .map_err(PipelineError::Summarization)?;
        debug!(
            "Summarized {} prompt chars into {} chars in {:?}",
            prompt_text.chars().count(),
            summary.chars().count(),
            start.elapsed()
        );
        Ok(summary)
    }
}
