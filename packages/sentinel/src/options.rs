use crate::delims::{Delims, LanguageSpec};
use serde::{Deserialize, Serialize};

/// Codec configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodecOptions {
    /// Page width written to the `@@pagewidth` header pragma
    pub page_width: usize,

    /// Tab width; negative values mean "tabs are converted to spaces" in the
    /// editor, the codec only records the value
    pub tab_width: i32,

    pub line_ending: LineEnding,

    /// Which ancestor scope wins when a section name is defined at several
    pub section_policy: SectionPolicy,

    /// Language used when neither the file nor the outline names one
    pub default_language: String,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            page_width: 132,
            tab_width: -4,
            line_ending: LineEnding::Lf,
            section_policy: SectionPolicy::Nearest,
            default_language: "python".to_string(),
        }
    }
}

impl CodecOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The default language, falling back to python for unknown names
    pub fn default_language_spec(&self) -> LanguageSpec {
        LanguageSpec::lookup(&self.default_language)
            .or_else(|| LanguageSpec::lookup("python"))
            .unwrap_or_else(|| LanguageSpec::custom("python", Delims::default_line()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    Lf,
    Crlf,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::Crlf => "\r\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionPolicy {
    /// The scope closest to the referencing node wins
    Nearest,
    /// The scope closest to the file root wins
    Outermost,
}

/// Formatting state threaded through one write or read.
///
/// Pragmas update it as they are met; a node's children start from a copy
/// of the state in effect where they are expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattingState {
    pub language: LanguageSpec,
    pub tab_width: i32,
    pub page_width: usize,
    pub nocolor: bool,
    /// `@nocolor-node`: applies to the current node only
    pub nocolor_node: bool,
    pub killbeautify: bool,
}

impl FormattingState {
    pub fn new(language: LanguageSpec, options: &CodecOptions) -> Self {
        Self {
            language,
            tab_width: options.tab_width,
            page_width: options.page_width,
            nocolor: false,
            nocolor_node: false,
            killbeautify: false,
        }
    }

    /// State inherited by a child node
    pub fn for_child(&self) -> Self {
        Self {
            nocolor_node: false,
            ..self.clone()
        }
    }

    /// Apply a directive. Returns false if the directive does not affect
    /// formatting or its value does not parse.
    pub fn apply(&mut self, name: &str, value: &str) -> bool {
        let value = value.trim();
        match name {
            "language" => match LanguageSpec::lookup(value) {
                Some(language) => {
                    self.language = language;
                    true
                }
                None => false,
            },
            "tabwidth" => match value.parse() {
                Ok(width) if width != 0 => {
                    self.tab_width = width;
                    true
                }
                _ => false,
            },
            "pagewidth" => match value.parse() {
                Ok(width) if width > 0 => {
                    self.page_width = width;
                    true
                }
                _ => false,
            },
            "nocolor" | "killcolor" => {
                self.nocolor = true;
                true
            }
            "color" => {
                self.nocolor = false;
                true
            }
            "nocolor-node" => {
                self.nocolor_node = true;
                true
            }
            "killbeautify" => {
                self.killbeautify = true;
                true
            }
            "beautify" => {
                self.killbeautify = false;
                true
            }
            _ => false,
        }
    }

    /// Columns per tab stop
    pub fn tab_columns(&self) -> usize {
        (self.tab_width.unsigned_abs() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CodecOptions::default();
        assert_eq!(options.page_width, 132);
        assert_eq!(options.tab_width, -4);
        assert_eq!(options.section_policy, SectionPolicy::Nearest);
        assert_eq!(options.default_language_spec().name(), "python");
    }

    #[test]
    fn test_parse_options() {
        let options = CodecOptions::from_json(
            r#"{ "tabWidth": 8, "lineEnding": "crlf", "sectionPolicy": "outermost" }"#,
        )
        .unwrap();
        assert_eq!(options.tab_width, 8);
        assert_eq!(options.line_ending, LineEnding::Crlf);
        assert_eq!(options.section_policy, SectionPolicy::Outermost);
        assert_eq!(options.page_width, 132);
    }

    #[test]
    fn test_apply_pragmas() {
        let options = CodecOptions::default();
        let mut state = FormattingState::new(options.default_language_spec(), &options);

        assert!(state.apply("language", " c"));
        assert_eq!(state.language.name(), "c");
        assert!(state.apply("tabwidth", " 8"));
        assert_eq!(state.tab_columns(), 8);
        assert!(!state.apply("tabwidth", " zero"));
        assert!(state.apply("nocolor-node", ""));
        assert!(!state.for_child().nocolor_node);
        assert!(!state.apply("path", " src"));
    }
}
