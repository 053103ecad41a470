/// `when.fileGlob` matching.
///
/// Semantics:
///   `**` → any sequence, including `/`
///   `*`  → any sequence except `/`
///   `?`  → exactly one character
///   everything else is literal; matching is anchored to the whole subject.
///
/// Backslashes are normalized to `/` in both pattern and path. A pattern
/// without any `/` is matched against the base file name only, so `*.md`
/// matches at any directory depth.
use regex::Regex;

#[derive(Debug, Clone)]
pub struct FileGlob {
    pattern:   String,
    regex:     Regex,
    uses_path: bool,
}

impl FileGlob {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let normalized = normalize_separators(pattern);
        let regex = Regex::new(&glob_to_regex(&normalized))?;
        Ok(Self {
            uses_path: normalized.contains('/'),
            pattern:   normalized,
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, target: &str) -> bool {
        let target = normalize_separators(target);
        let subject = if self.uses_path {
            target.as_str()
        } else {
            basename(&target)
        };
        self.regex.is_match(subject)
    }
}

fn normalize_separators(value: &str) -> String {
    value.replace('\\', "/")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push('.'),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    out.push('$');
    out
}
