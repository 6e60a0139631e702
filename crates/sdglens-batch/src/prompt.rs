//! Classification prompt.

use std::path::Path;

use sdglens_core::{Error, PipelineConfig, Result};

pub const PLACEHOLDER: &str = "{sentence}";

/// Asks for SDG labels, an AI flag and a sentiment as one literal list.
pub const DEFAULT_TEMPLATE: &str = "
For the following SENTENCE
1) Generate a classification for the SENTENCE into one or more Sustainable Development Goals as a list.
2) Classify as True or False based on if the SENTENCE talks about Artificial Intelligence or related terms and append to the list.
3) Classify the sentiment of the text as Positive or Negative and append to the list.

Provide the answer strictly in the following format as a single List:
[SDGA, SDGB, ..., True/False, Positive/Negative]

If SENTENCE doesn't fall into any SDG, just return 0 instead of a goal

example1 - [1, 5, True, Negative]
example2 - [11, 12, False, Negative]
example3 - [0, False, Positive]

Here is the SENTENCE - {sentence}
";

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(PLACEHOLDER) {
            return Err(Error::Config(format!(
                "prompt template has no {} placeholder",
                PLACEHOLDER
            )));
        }
        Ok(Self { template })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::new(text)
    }

    /// The configured template file, or the built-in one.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        match &config.prompt_template_path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn render(&self, sentence: &str) -> String {
        self.template.replace(PLACEHOLDER, sentence)
    }
}
