use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's own Rust sources.
const SOURCE_DIRS: [&str; 4] = ["glm", "src", "tests", "benches"];

// Which rule a collector enforces; selects the line filter and the error text.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenCommentWord,
    StarsInComment,
    UppercaseComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Rule::ForbiddenCommentWord => {
                r"(//|/\*).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Rule::StarsInComment => r"(//|/\*).*\*\*",
            Rule::UppercaseComment => r"(//|/\*).*",
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed names are not allowed. Either use the binding (removing the underscore) or remove it completely."
            }
            Rule::ForbiddenCommentWord => {
                "Comments containing 'FIX', 'NEW', 'CHANGE', 'MODIFY', 'UPDATE' or 'CORRECTED' (and their inflections) are not allowed. Remove them completely."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (it is allowed in doc comments)."
            }
            Rule::UppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are not allowed. Either use the code or remove it."
            }
        }
    }

    // Decides whether a line that matched the pattern is a real violation.
    fn is_violation(self, line_text: &str) -> bool {
        match self {
            Rule::UnderscorePrefix => !is_comment(line_text) && !underscore_only_in_strings(line_text),
            Rule::ForbiddenCommentWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !is_doc_comment(line_text),
            Rule::UppercaseComment => comment_text(line_text).is_some_and(|text| {
                let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }),
        }
    }
}

// Collects every violating line of one file.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} source hygiene violations in {}:\n",
            self.violations.len(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.description()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();

        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

// True when every underscore-prefixed word on the line sits inside a string literal.
fn underscore_only_in_strings(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .all(|(_, outside)| !has_underscore_prefixed_word(outside))
}

fn has_underscore_prefixed_word(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        let starts_word = i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
        let followed = bytes
            .get(i + 1)
            .is_some_and(|next| next.is_ascii_alphanumeric() || *next == b'_');
        b == b'_' && starts_word && followed
    })
}

// The text of a line comment, without its leading markers.
fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for marker in ["///", "//!", "//"] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }
    let start = line.find("/*")?;
    let body = &line[start + 2..];
    Some(body.find("*/").map_or(body, |end| &body[..end]).trim())
}

fn rust_sources() -> impl Iterator<Item = PathBuf> {
    SOURCE_DIRS.into_iter().flat_map(|dir| {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
            .map(|e| e.into_path())
    })
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();

    for path in rust_sources() {
        let mut collector = ViolationCollector::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    for rule in [
        Rule::UnderscorePrefix,
        Rule::ForbiddenCommentWord,
        Rule::StarsInComment,
        Rule::UppercaseComment,
        Rule::AllowDeadCode,
    ] {
        if let Err(e) = scan(rule) {
            // Printed to stderr so cargo shows it with the failed build.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
