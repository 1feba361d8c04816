use std::collections::HashMap;
use std::path::Path;

use crate::config::LanguageConfig;

/// Tag given to languages without a toolchain mapping.
pub const PLAIN_TEXT_TAG: &str = "txt";

const USAGE_NOTE: &str = "You need to add input and output yourself in your preferred language. \
You can click on the input format to see in what format the input will be provided to you. \
The button is located at the bottom of each test case.\n";

/// Maps a provider language label (`"C++"`, `"Python3"`) to a file extension tag
///
/// Unknown labels degrade to `txt` so scaffolding always succeeds.
pub fn resolve_extension(language: &str) -> &'static str {
    match language {
        "C++" => "cpp",
        "Java" => "java",
        "Python" | "Python3" => "py",
        "C" => "c",
        "C#" => "cs",
        "JavaScript" | "Node.js" => "js",
        "TypeScript" => "ts",
        "PHP" => "php",
        "Swift" => "swift",
        "Kotlin" => "kt",
        "Dart" => "dart",
        "Go" => "go",
        "Ruby" => "rb",
        "Scala" => "scala",
        "Rust" => "rs",
        "Racket" => "rkt",
        "Erlang" => "erl",
        "Elixir" => "ex",
        _ => PLAIN_TEXT_TAG,
    }
}

/// Usage note prepended to scaffolded source files, in the tag's comment syntax
pub fn comment_prefix(tag: &str) -> String {
    let token = match tag {
        "py" | "ex" => "#",
        "rkt" => ";",
        "erl" => "%",
        _ => "//",
    };
    format!("{token} {USAGE_NOTE}")
}

/// Built-in command templates: zero or more compile steps followed by the run step
fn builtin_template(tag: &str) -> Option<&'static [&'static [&'static str]]> {
    let steps: &'static [&'static [&'static str]] = match tag {
        "js" => &[&["node", "%FILE%"]],
        "py" => &[&["python", "%FILE%"]],
        "cpp" => &[&["g++", "%FILE%", "-o", "%BINARY%"], &["%BINARY%"]],
        "c" => &[&["gcc", "%FILE%", "-o", "%BINARY%"], &["%BINARY%"]],
        "java" => &[&["javac", "%FILE%"], &["java", "-cp", "%DIR%", "%STEM%"]],
        "cs" => &[&["csc", "-out:%DIR%/%STEM%.exe", "%FILE%"], &["%DIR%/%STEM%.exe"]],
        "ts" => &[&["tsc", "%FILE%"], &["node", "%SCRIPT%"]],
        "php" => &[&["php", "%FILE%"]],
        "swift" => &[&["swift", "%FILE%"]],
        "kt" => &[
            &["kotlinc", "%FILE%", "-include-runtime", "-d", "%JAR%"],
            &["java", "-jar", "%JAR%"],
        ],
        "dart" => &[&["dart", "%FILE%"]],
        "go" => &[&["go", "run", "%FILE%"]],
        "rb" => &[&["ruby", "%FILE%"]],
        "scala" => &[&["scala", "%FILE%"]],
        "rs" => &[&["rustc", "%FILE%", "-o", "%BINARY%"], &["%BINARY%"]],
        "rkt" => &[&["racket", "%FILE%"]],
        "erl" => &[
            &["erlc", "-o", "%DIR%", "%FILE%"],
            &["erl", "-noshell", "-pa", "%DIR%", "-s", "%STEM%", "main", "-s", "init", "stop"],
        ],
        "ex" => &[&["elixir", "%FILE%"]],
        _ => return None,
    };
    Some(steps)
}

/// A resolved toolchain invocation for one source file
///
/// Every step is an argument vector handed to the process spawner as-is;
/// nothing is passed through a shell. Only the last step receives the
/// test input on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub compile: Vec<Vec<String>>,
    pub run: Vec<String>,
}

/// Language tag lookup with optional per-tag overrides from the configuration
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    overrides: HashMap<String, Vec<Vec<String>>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry where configured languages replace the built-in templates
    pub fn with_overrides(languages: &[LanguageConfig]) -> Self {
        let mut overrides = HashMap::new();
        for language in languages {
            if language.command.is_empty() {
                log::warn!("Ignoring language override {} with empty command", language.name);
                continue;
            }
            let mut steps = language.compile.clone().unwrap_or_default();
            steps.push(language.command.clone());
            overrides.insert(language.name.to_lowercase(), steps);
        }
        Self { overrides }
    }

    /// Whether a run plan exists for the tag
    pub fn supports(&self, tag: &str) -> bool {
        self.overrides.contains_key(tag) || builtin_template(tag).is_some()
    }

    /// Resolves the command template for `file` under `tag`
    ///
    /// Returns `None` for tags without a toolchain, which callers treat as
    /// "unsupported, do not run".
    pub fn build_run_command(&self, file: &Path, tag: &str) -> Option<RunPlan> {
        let template: Vec<Vec<String>> = match self.overrides.get(tag) {
            Some(steps) => steps.clone(),
            None => builtin_template(tag)?
                .iter()
                .map(|step| step.iter().map(|s| s.to_string()).collect())
                .collect(),
        };

        let mapping = placeholder_mapping(file);
        let mut steps: Vec<Vec<String>> = template
            .iter()
            .map(|step| apply_template(step, &mapping))
            .collect();

        let run = steps.pop()?;
        Some(RunPlan {
            compile: steps,
            run,
        })
    }
}

/// Values substituted into command templates for a source file
fn placeholder_mapping(file: &Path) -> Vec<(&'static str, String)> {
    let file_str = file.to_string_lossy().to_string();
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let binary_suffix = if cfg!(windows) { ".exe" } else { ".out" };

    vec![
        ("%BINARY%", format!("{file_str}{binary_suffix}")),
        ("%JAR%", format!("{file_str}.jar")),
        (
            "%SCRIPT%",
            file.with_extension("js").to_string_lossy().to_string(),
        ),
        ("%DIR%", dir),
        ("%STEM%", stem),
        ("%FILE%", file_str),
    ]
}

/// Replaces every placeholder in every argument of one step
fn apply_template(step: &[String], mapping: &[(&'static str, String)]) -> Vec<String> {
    step.iter().map(|arg| substitute(arg, mapping)).collect()
}

/// Left-to-right substitution; inserted values are never scanned again
fn substitute(arg: &str, mapping: &[(&'static str, String)]) -> String {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match mapping.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
