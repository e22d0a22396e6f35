//! Turns guest runtime errors into log lines a script author can act on
//! without attaching a debugger.

use std::fmt::{self, Write as _};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::error;

use crate::environment::SharedEnvironment;
use crate::error::{ScriptError, StackFrame};

/// Lines shown on each side of the failing line.
pub const EXCERPT_RADIUS: u32 = 2;

const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    CallNil,
    IndexNil,
    ArithmeticOnNil,
    Concatenation,
    BadArgument,
    StackOverflow,
}

struct HintRule {
    needle: &'static str,
    category: ErrorCategory,
    hint: &'static str,
}

const HINT_RULES: &[HintRule] = &[
    HintRule {
        needle: "attempt to call a nil value",
        category: ErrorCategory::CallNil,
        hint: "The function does not exist. Check the spelling, and that the script defining it loaded before this one.",
    },
    HintRule {
        needle: "attempt to index a nil value",
        category: ErrorCategory::IndexNil,
        hint: "A table you are reading from is nil. Guard the lookup or make sure the value was created first.",
    },
    HintRule {
        needle: "attempt to perform arithmetic on a nil value",
        category: ErrorCategory::ArithmeticOnNil,
        hint: "A number in this expression is nil. Give the variable a default value before doing math with it.",
    },
    HintRule {
        needle: "attempt to concatenate",
        category: ErrorCategory::Concatenation,
        hint: "Only strings and numbers can be joined with '..'. Wrap other values in tostring().",
    },
    HintRule {
        needle: "bad argument",
        category: ErrorCategory::BadArgument,
        hint: "A function received an argument of the wrong type. Compare the call with the function's expected parameters.",
    },
    HintRule {
        needle: "stack overflow",
        category: ErrorCategory::StackOverflow,
        hint: "A function keeps calling itself. Look for recursion without a stopping condition.",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcerptLine {
    pub number: u32,
    pub text: String,
    pub is_error: bool,
}

/// A fully built error report.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub context: String,
    pub path: PathBuf,
    pub message: String,
    pub line: Option<u32>,
    pub excerpt: Vec<ExcerptLine>,
    pub frames: Vec<StackFrame>,
    pub category: Option<ErrorCategory>,
    pub hint: Option<&'static str>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[{}] {}: {}", self.context, self.path.display(), self.message);

        if !self.excerpt.is_empty() {
            let width = self
                .excerpt
                .iter()
                .map(|line| line.number.to_string().len())
                .max()
                .unwrap_or(1);
            for line in &self.excerpt {
                let marker = if line.is_error { ">>" } else { "  " };
                let _ = writeln!(out, "{} {:>width$} | {}", marker, line.number, line.text, width = width);
            }
        }

        let _ = writeln!(out, "stack traceback:");
        for frame in &self.frames {
            let _ = writeln!(out, "    {}", frame);
        }

        if let Some(hint) = self.hint {
            let _ = writeln!(out, "hint: {}", hint);
        }
        if !self.suggestions.is_empty() {
            let _ = writeln!(out, "did you mean: {}", self.suggestions.join(", "));
        }

        out.trim_end().to_string()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Builds and logs [`Diagnostic`]s. Holds the host namespace so it can suggest
/// near-miss names for calls to undefined functions.
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    globals: SharedEnvironment,
}

impl ErrorReporter {
    pub fn new(globals: SharedEnvironment) -> Self {
        Self { globals }
    }

    pub fn build(&self, error: &ScriptError, context: &str, path: &Path) -> Diagnostic {
        let message = error.to_string();
        let line = extract_line_number(&message);
        let excerpt = line
            .and_then(|line| read_excerpt(path, line))
            .unwrap_or_default();

        let frames = if error.traceback().is_empty() {
            vec![StackFrame::new(path.display().to_string(), line)]
        } else {
            error.traceback().to_vec()
        };

        let rule = HINT_RULES.iter().find(|rule| message.contains(rule.needle));
        let category = rule.map(|rule| rule.category);
        let suggestions = match category {
            Some(ErrorCategory::CallNil) => extract_nil_identifier(&message)
                .map(|ident| self.near_names(&ident))
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        Diagnostic {
            context: context.to_string(),
            path: path.to_path_buf(),
            message,
            line,
            excerpt,
            frames,
            category,
            hint: rule.map(|rule| rule.hint),
            suggestions,
        }
    }

    /// Log a detailed report. Falls back to the raw message if building it fails.
    pub fn report(&self, error: &ScriptError, context: &str, path: &Path) {
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            self.build(error, context, path).render()
        }))
        .unwrap_or_else(|_| format!("[{}] {}: {}", context, path.display(), error));

        error!(target: "scripting", "{}", rendered);
    }

    /// Host globals whose names resemble `ident`, closest first.
    pub fn near_names(&self, ident: &str) -> Vec<String> {
        let wanted = ident.to_lowercase();
        let mut candidates: Vec<(usize, String)> = self
            .globals
            .names()
            .into_iter()
            .filter(|name| name != ident)
            .filter_map(|name| {
                let lowered = name.to_lowercase();
                let distance = strsim::levenshtein(&lowered, &wanted);
                let similar = lowered.contains(&wanted) || (ident.len() > 3 && distance <= 3);
                similar.then_some((distance, name))
            })
            .collect();
        candidates.sort_by_key(|(distance, _)| *distance);
        candidates
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, name)| name)
            .collect()
    }
}

/// First integer token when the message is split on `:`, e.g. `init.lua:12: ...` → 12.
pub fn extract_line_number(message: &str) -> Option<u32> {
    message
        .split(':')
        .find_map(|part| part.trim().parse::<u32>().ok())
}

/// The identifier named in "attempt to call a nil value (global 'Foo')".
pub fn extract_nil_identifier(message: &str) -> Option<String> {
    const MARKERS: [&str; 5] = ["global '", "field '", "method '", "local '", "upvalue '"];
    MARKERS.iter().find_map(|marker| {
        let start = message.find(marker)? + marker.len();
        let rest = &message[start..];
        let end = rest.find('\'')?;
        Some(rest[..end].to_string()).filter(|ident| !ident.is_empty())
    })
}

fn read_excerpt(path: &Path, line: u32) -> Option<Vec<ExcerptLine>> {
    let source = fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = source.lines().collect();
    let total = u32::try_from(lines.len()).ok()?;
    if line == 0 || line > total {
        return None;
    }

    let first = line.saturating_sub(EXCERPT_RADIUS).max(1);
    let last = (line + EXCERPT_RADIUS).min(total);
    Some(
        (first..=last)
            .map(|number| ExcerptLine {
                number,
                text: lines[(number - 1) as usize].to_string(),
                is_error: number == line,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ScriptFunction, ScriptValue};
    use tempfile::TempDir;

    fn reporter_with(names: &[&str]) -> ErrorReporter {
        let globals = SharedEnvironment::new();
        for name in names {
            globals.set(
                *name,
                ScriptValue::Function(ScriptFunction::new(|_, _| Ok(ScriptValue::Nil))),
            );
        }
        ErrorReporter::new(globals)
    }

    #[test]
    fn test_extract_line_number() {
        assert_eq!(extract_line_number("init.lua:12: attempt to call"), Some(12));
        assert_eq!(extract_line_number("no line here"), None);
        assert_eq!(extract_line_number("[string \"x\"]:3: oops"), Some(3));
    }

    #[test]
    fn test_extract_nil_identifier() {
        assert_eq!(
            extract_nil_identifier("init.lua:4: attempt to call a nil value (global 'RegisterComand')"),
            Some("RegisterComand".to_string())
        );
        assert_eq!(
            extract_nil_identifier("attempt to call a nil value (method 'Spawn')"),
            Some("Spawn".to_string())
        );
        assert_eq!(extract_nil_identifier("attempt to call a nil value"), None);
    }

    #[test]
    fn test_excerpt_window_marks_failing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("init.lua");
        fs::write(&path, "l1\nl2\nl3\nl4\nl5\nl6\nl7\n").unwrap();

        let reporter = reporter_with(&[]);
        let diagnostic = reporter.build(
            &ScriptError::runtime("init.lua:4: attempt to index a nil value"),
            "Initialize",
            &path,
        );

        let numbers: Vec<u32> = diagnostic.excerpt.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![2, 3, 4, 5, 6]);
        assert!(diagnostic.excerpt[2].is_error);
        assert_eq!(diagnostic.category, Some(ErrorCategory::IndexNil));
        assert!(diagnostic.render().contains(">> 4 | l4"));
    }

    #[test]
    fn test_excerpt_clamped_at_file_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.lua");
        fs::write(&path, "first\nsecond\n").unwrap();

        let diagnostic =
            reporter_with(&[]).build(&ScriptError::runtime("a.lua:1: boom"), "load", &path);
        let numbers: Vec<u32> = diagnostic.excerpt.iter().map(|l| l.number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_synthetic_frame_without_traceback() {
        let diagnostic = reporter_with(&[]).build(
            &ScriptError::runtime("a.lua:9: boom"),
            "Update",
            Path::new("/missing/a.lua"),
        );
        assert!(diagnostic.excerpt.is_empty(), "unreadable source has no excerpt");
        assert_eq!(diagnostic.frames.len(), 1);
        assert_eq!(diagnostic.frames[0].line, Some(9));
    }

    #[test]
    fn test_runtime_traceback_is_kept() {
        let error = ScriptError::runtime("a.lua:2: boom")
            .with_frame(StackFrame::new("a.lua", Some(2)).in_function("helper"))
            .with_frame(StackFrame::new("a.lua", Some(7)).in_function("Initialize"));
        let diagnostic = reporter_with(&[]).build(&error, "Initialize", Path::new("a.lua"));
        assert_eq!(diagnostic.frames.len(), 2);
        assert!(diagnostic.render().contains("a.lua:7 in function 'Initialize'"));
    }

    #[test]
    fn test_call_nil_suggests_near_names() {
        let reporter = reporter_with(&[
            "RegisterCommand",
            "UnregisterCommand",
            "Log",
            "GetModExport",
        ]);
        let diagnostic = reporter.build(
            &ScriptError::runtime(
                "init.lua:3: attempt to call a nil value (global 'RegisterComand')",
            ),
            "Initialize",
            Path::new("init.lua"),
        );

        assert_eq!(diagnostic.category, Some(ErrorCategory::CallNil));
        assert_eq!(diagnostic.suggestions.first().map(String::as_str), Some("RegisterCommand"));
        assert!(!diagnostic.suggestions.contains(&"Log".to_string()));
    }

    #[test]
    fn test_short_names_only_match_by_substring() {
        let reporter = reporter_with(&["Log", "LogError", "Lag"]);
        let suggestions = reporter.near_names("Log");
        assert!(suggestions.contains(&"LogError".to_string()));
        assert!(!suggestions.contains(&"Lag".to_string()));
    }

    #[test]
    fn test_suggestions_are_capped() {
        let names: Vec<String> = (0..10).map(|i| format!("SpawnThing{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let reporter = reporter_with(&refs);
        assert_eq!(reporter.near_names("SpawnThing").len(), MAX_SUGGESTIONS);
    }

    #[test]
    fn test_unknown_message_has_no_hint() {
        let diagnostic = reporter_with(&[]).build(
            &ScriptError::runtime("something odd happened"),
            "event",
            Path::new("x.lua"),
        );
        assert!(diagnostic.hint.is_none());
        assert!(diagnostic.category.is_none());
        assert!(diagnostic.line.is_none());
    }
}
