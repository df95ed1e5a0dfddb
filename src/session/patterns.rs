use std::fmt;

use regex::Regex;

/// Matches a resolved prompt at the end of shell output, including the
/// mode-decorated variants a device shows inside configuration modes.
///
/// A prompt `(UBNT) #` also matches `(UBNT) (Config)#` and
/// `(UBNT) (Interface 0/1)#`; `sw1>` also matches `sw1#` and
/// `sw1(config-if)#`. Prompts that do not end in `#` or `>` only match
/// themselves.
#[derive(Debug, Clone)]
pub struct PromptPattern {
    prompt: String,
    pattern: Option<Regex>,
}

impl PromptPattern {
    pub fn new(prompt: &str) -> Result<Self, regex::Error> {
        let prompt = prompt.trim_end();
        let stem = prompt.trim_end_matches(['#', '>']);
        if prompt.is_empty() {
            return Ok(Self {
                prompt: String::new(),
                pattern: None,
            });
        }
        let source = if stem.len() == prompt.len() {
            format!(r"(?m)^{}[ \t]*\z", regex::escape(prompt))
        } else {
            format!(
                r"(?m)^{}(?:[ \t]*\([^()\n]*\))*[ \t]*[#>][ \t]*\z",
                regex::escape(stem.trim_end())
            )
        };
        Ok(Self {
            prompt: prompt.to_string(),
            pattern: Some(Regex::new(&source)?),
        })
    }

    /// The prompt this pattern was built from.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Byte offset where the trailing prompt line starts.
    pub fn find(&self, buffer: &str) -> Option<usize> {
        self.pattern.as_ref()?.find(buffer).map(|m| m.start())
    }
}

impl fmt::Display for PromptPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prompt)
    }
}
