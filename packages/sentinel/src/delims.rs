//! # Delimiter Resolver
//!
//! Maps a host language to its comment delimiters and picks the pair that
//! wraps sentinels: the line comment when the language has one, otherwise the
//! block comment pair.
//!
//! Delimiter strings use the `@comment` convention: one token is a line
//! comment, two tokens are a block pair, three are a line comment followed by
//! a block pair.

use crate::error::{SentinelError, SentinelResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

const LANGUAGE_DELIMS: &[(&str, &str)] = &[
    ("ada", "--"),
    ("actionscript", "// /* */"),
    ("autohotkey", "; /* */"),
    ("c", "// /* */"),
    ("cpp", "// /* */"),
    ("csharp", "// /* */"),
    ("css", "/* */"),
    ("elisp", ";"),
    ("fortran", "C"),
    ("fortran90", "!"),
    ("go", "// /* */"),
    ("html", "<!-- -->"),
    ("ini", ";"),
    ("java", "// /* */"),
    ("javascript", "// /* */"),
    ("latex", "%"),
    ("lua", "--"),
    ("pascal", "// { }"),
    ("perl", "#"),
    ("php", "// /* */"),
    ("plain", "#"),
    ("plsql", "-- /* */"),
    ("python", "#"),
    ("rapidq", "'"),
    ("rebol", ";"),
    ("rust", "// /* */"),
    ("shell", "#"),
    ("tcltk", "#"),
    ("tex", "%"),
    ("unknown", "#"),
    ("vimoutline", "#"),
    ("xml", "<!-- -->"),
];

const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("ada", "ada"),
    ("adb", "ada"),
    ("ahk", "autohotkey"),
    ("as", "actionscript"),
    ("bas", "rapidq"),
    ("c", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cs", "csharp"),
    ("css", "css"),
    ("el", "elisp"),
    ("f", "fortran90"),
    ("f90", "fortran90"),
    ("go", "go"),
    ("h", "c"),
    ("hpp", "cpp"),
    ("htm", "html"),
    ("html", "html"),
    ("ini", "ini"),
    ("java", "java"),
    ("js", "javascript"),
    ("lua", "lua"),
    ("otl", "vimoutline"),
    ("p", "pascal"),
    ("php", "php"),
    ("pl", "perl"),
    ("py", "python"),
    ("pyw", "python"),
    ("r", "rebol"),
    ("rs", "rust"),
    ("sh", "shell"),
    ("sql", "plsql"),
    ("tcl", "tcltk"),
    ("tex", "tex"),
    ("txt", "plain"),
    ("xml", "xml"),
];

/// Comment delimiters of a host language
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delims {
    pub line: Option<String>,
    pub block: Option<(String, String)>,
}

impl Delims {
    /// Parse a whitespace-separated delimiter string (1, 2 or 3 tokens)
    pub fn parse(spec: &str) -> Option<Self> {
        let tokens: Vec<&str> = spec.split_whitespace().collect();
        match tokens.as_slice() {
            [line] => Some(Self {
                line: Some(line.to_string()),
                block: None,
            }),
            [open, close] => Some(Self {
                line: None,
                block: Some((open.to_string(), close.to_string())),
            }),
            [line, open, close] => Some(Self {
                line: Some(line.to_string()),
                block: Some((open.to_string(), close.to_string())),
            }),
            _ => None,
        }
    }

    /// `#` line comments
    pub fn default_line() -> Self {
        Self {
            line: Some("#".to_string()),
            block: None,
        }
    }

    /// The delimiters that wrap sentinel lines
    pub fn sentinel_delims(&self) -> SentinelDelims {
        match (&self.line, &self.block) {
            (Some(line), _) => SentinelDelims::new(line.clone(), ""),
            (None, Some((open, close))) => SentinelDelims::new(open.clone(), close.clone()),
            (None, None) => SentinelDelims::new("#", ""),
        }
    }
}

/// The comment open/close pair actually used for sentinels in one file.
///
/// `close` is empty for line-comment languages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentinelDelims {
    pub open: String,
    pub close: String,
}

impl SentinelDelims {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    pub fn is_block(&self) -> bool {
        !self.close.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageSpec {
    name: String,
    delims: Delims,
}

impl LanguageSpec {
    /// Look up a language by (case-insensitive) name
    pub fn lookup(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        LANGUAGE_DELIMS
            .iter()
            .find(|(lang, _)| *lang == lower)
            .and_then(|(lang, spec)| {
                Delims::parse(spec).map(|delims| Self {
                    name: lang.to_string(),
                    delims,
                })
            })
    }

    pub fn named(name: &str) -> SentinelResult<Self> {
        Self::lookup(name).ok_or_else(|| SentinelError::UnknownLanguage(name.to_string()))
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let lower = ext.trim_start_matches('.').to_lowercase();
        EXTENSION_LANGUAGES
            .iter()
            .find(|(e, _)| *e == lower)
            .and_then(|(_, lang)| Self::lookup(lang))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// A language outside the built-in table
    pub fn custom(name: impl Into<String>, delims: Delims) -> Self {
        Self {
            name: name.into(),
            delims,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delims(&self) -> &Delims {
        &self.delims
    }

    pub fn sentinel_delims(&self) -> SentinelDelims {
        self.delims.sentinel_delims()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_line_comment() {
        let c = LanguageSpec::named("C").unwrap();
        assert_eq!(c.name(), "c");
        assert_eq!(c.sentinel_delims(), SentinelDelims::new("//", ""));
        assert_eq!(
            c.delims().block,
            Some(("/*".to_string(), "*/".to_string()))
        );
    }

    #[test]
    fn test_block_only_language() {
        let html = LanguageSpec::named("html").unwrap();
        let delims = html.sentinel_delims();
        assert!(delims.is_block());
        assert_eq!(delims.open, "<!--");
        assert_eq!(delims.close, "-->");
    }

    #[test]
    fn test_unknown_language() {
        assert!(matches!(
            LanguageSpec::named("klingon"),
            Err(SentinelError::UnknownLanguage(_))
        ));
    }

    #[test]
    fn test_from_extension() {
        assert_eq!(LanguageSpec::from_extension("py").unwrap().name(), "python");
        assert_eq!(LanguageSpec::from_extension(".RS").unwrap().name(), "rust");
        assert_eq!(
            LanguageSpec::from_path(Path::new("src/page.html")).unwrap().name(),
            "html"
        );
        assert!(LanguageSpec::from_extension("zzz").is_none());
    }

    #[test]
    fn test_delims_parse() {
        assert!(Delims::parse("").is_none());
        assert!(Delims::parse("a b c d").is_none());
        let pascal = Delims::parse("// { }").unwrap();
        assert_eq!(pascal.line.as_deref(), Some("//"));
    }
}
