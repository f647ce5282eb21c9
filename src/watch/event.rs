use std::fmt;

use crate::ConfigFileId;

/// Kind of transition observed for a watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// File appeared on the remote side
    Added,
    /// Content changed
    Modified,
    /// File disappeared from the remote side
    Deleted,
    /// Remote reported a change but the content is identical
    NotChanged,
}

impl fmt::Display for ChangeType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "added",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::NotChanged => "not_changed",
        };
        f.write_str(s)
    }
}

/// One observed transition of a watched file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFileChangeEvent {
    pub file: ConfigFileId,
    /// Remote version after the transition
    pub version: u64,
    pub change_type: ChangeType,
    /// Previous content, empty for `Added`
    pub old_value: String,
    /// New content, empty for `Deleted`
    pub new_value: String,
}

/// Last observed content of a watched file.
///
/// `NotExisted` stands for "absent on the remote side", which is distinct
/// from a file that exists with empty content. It never leaves the engine:
/// listeners see an empty string on `Added`/`Deleted` boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    NotExisted,
    Present(String),
}

impl FileContent {
    fn as_value(&self) -> &str {
        match self {
            FileContent::NotExisted => "",
            FileContent::Present(s) => s,
        }
    }
}

/// Classify the move from `old` to `new` and return the values listeners see.
pub fn classify(
    old: &FileContent,
    new: &FileContent,
) -> (ChangeType, String, String) {
    let change_type = match (old, new) {
        (FileContent::NotExisted, FileContent::Present(_)) => ChangeType::Added,
        (FileContent::Present(_), FileContent::NotExisted) => ChangeType::Deleted,
        (FileContent::Present(a), FileContent::Present(b)) if a != b => ChangeType::Modified,
        _ => ChangeType::NotChanged,
    };

    (change_type, old.as_value().to_string(), new.as_value().to_string())
}
