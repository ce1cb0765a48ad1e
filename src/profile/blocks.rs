//! Line-oriented view of an AWS shared file.
//!
//! A managed block is the region between the exact lines `#s-<name>` and `#e-<name>`.
//! Sections outside any managed block belong to the user.

/// Which of the two shared files a document comes from; decides how section
/// headers name a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `[name]`
    Credentials,
    /// `[profile name]`, with `[default]` as the one bare exception
    Config,
}

impl FileKind {
    pub fn section_header(self, profile: &str) -> String {
        match self {
            Self::Credentials => format!("[{profile}]"),
            Self::Config if profile == "default" => "[default]".to_string(),
            Self::Config => format!("[profile {profile}]"),
        }
    }

    /// Profile named by a section header line, if it is one
    fn profile_of(self, line: &str) -> Option<String> {
        let inner = line.trim().strip_prefix('[')?.strip_suffix(']')?.trim();
        match self {
            Self::Credentials => Some(inner.to_string()),
            Self::Config if inner == "default" => Some(inner.to_string()),
            Self::Config => inner
                .strip_prefix("profile")
                .filter(|rest| rest.starts_with(char::is_whitespace))
                .map(|rest| rest.trim().to_string()),
        }
    }
}

pub fn start_marker(profile: &str) -> String {
    format!("#s-{profile}")
}

pub fn end_marker(profile: &str) -> String {
    format!("#e-{profile}")
}

/// A named region of a document, with inclusive line bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub managed: bool,
    pub start_line: usize,
    pub end_line: usize,
}

/// Split a document into managed blocks and user-owned sections.
pub fn parse_blocks(kind: FileKind, lines: &[String]) -> Vec<Block> {
    let mut managed = Vec::new();
    let mut open: Option<(String, usize)> = None;

    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix("#s-") {
            // A second start before an end leaves the first one unbalanced
            open = Some((name.to_string(), idx));
        } else if let Some(name) = trimmed.strip_prefix("#e-") {
            if let Some((open_name, start)) = open.take() {
                if open_name == name {
                    managed.push(Block {
                        name: open_name,
                        managed: true,
                        start_line: start,
                        end_line: idx,
                    });
                } else {
                    open = Some((open_name, start));
                }
            }
        }
    }

    let inside_managed = |idx: usize| {
        managed
            .iter()
            .any(|b| b.start_line <= idx && idx <= b.end_line)
    };

    let mut blocks = managed.clone();
    let mut current: Option<Block> = None;
    for (idx, line) in lines.iter().enumerate() {
        let is_header = is_section_header(line);
        let is_marker = line.trim().starts_with("#s-") || line.trim().starts_with("#e-");
        let owned = inside_managed(idx);

        if is_header || is_marker || owned {
            if let Some(section) = current.take() {
                blocks.push(section);
            }
        }

        if owned {
            continue;
        }
        if is_header {
            if let Some(name) = kind.profile_of(line) {
                current = Some(Block {
                    name,
                    managed: false,
                    start_line: idx,
                    end_line: idx,
                });
            }
        } else if let Some(section) = current.as_mut() {
            if !is_marker {
                section.end_line = idx;
            }
        }
    }
    if let Some(section) = current.take() {
        blocks.push(section);
    }

    blocks.sort_by_key(|b| b.start_line);
    blocks
}

fn is_section_header(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('[') && trimmed.ends_with(']')
}
