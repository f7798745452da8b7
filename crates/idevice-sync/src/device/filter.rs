//! Directory listing filters and entry types.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Filter for `DeviceSession::read_directory`.
    ///
    /// The empty set lists everything. Name-based flags cost nothing; as soon as one of
    /// the type flags is set, every remaining entry is stat-ed (one round trip each),
    /// since AFC listings carry names only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirFilter: u32 {
        /// Keep regular files.
        const FILES = 1 << 0;
        /// Keep directories.
        const DIRS = 1 << 1;
        /// Keep symbolic links.
        const SYMLINKS = 1 << 2;
        /// Drop `.` and `..`.
        const NO_DOT_AND_DOT_DOT = 1 << 3;
        /// Drop names starting with a dot.
        const NO_HIDDEN = 1 << 4;
    }
}

impl DirFilter {
    /// The flags that select by entry type.
    const TYPE_MASK: DirFilter = DirFilter::FILES.union(DirFilter::DIRS).union(DirFilter::SYMLINKS);

    /// Files and directories without dot entries or hidden names: what the tree copy walks.
    pub const TREE: DirFilter = DirFilter::FILES
        .union(DirFilter::DIRS)
        .union(DirFilter::NO_DOT_AND_DOT_DOT)
        .union(DirFilter::NO_HIDDEN);

    /// True if entries have to be stat-ed to apply this filter.
    pub fn needs_entry_kind(self) -> bool {
        self.intersects(Self::TYPE_MASK)
    }

    /// Applies the name-based part of the filter.
    pub fn accepts_name(self, name: &str) -> bool {
        if self.contains(Self::NO_DOT_AND_DOT_DOT) && (name == "." || name == "..") {
            return false;
        }
        if self.contains(Self::NO_HIDDEN) && name.starts_with('.') {
            return false;
        }
        true
    }

    /// Applies the type-based part of the filter. An entry whose type can't be determined
    /// never matches a type filter.
    pub fn accepts_kind(self, kind: Option<EntryKind>) -> bool {
        if !self.needs_entry_kind() {
            return true;
        }
        match kind {
            Some(EntryKind::File) => self.contains(Self::FILES),
            Some(EntryKind::Directory) => self.contains(Self::DIRS),
            Some(EntryKind::Symlink) => self.contains(Self::SYMLINKS),
            Some(EntryKind::Unknown) | None => false,
        }
    }
}

/// Type of a directory entry, derived from the `st_ifmt` file info value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// Devices, FIFOs, sockets.
    Unknown,
}

impl EntryKind {
    pub fn from_ifmt(ifmt: &str) -> Self {
        match ifmt {
            "S_IFREG" => Self::File,
            "S_IFDIR" => Self::Directory,
            "S_IFLNK" => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = DirFilter::empty();
        assert!(filter.accepts_name("."));
        assert!(filter.accepts_name(".hidden"));
        assert!(!filter.needs_entry_kind());
        assert!(filter.accepts_kind(None));
    }

    #[test]
    fn test_no_dot_and_dot_dot_keeps_hidden() {
        let filter = DirFilter::NO_DOT_AND_DOT_DOT;
        assert!(!filter.accepts_name("."));
        assert!(!filter.accepts_name(".."));
        assert!(filter.accepts_name(".hidden"));
        assert!(filter.accepts_name("iTunesDB"));
    }

    #[test]
    fn test_no_hidden_drops_dot_names() {
        let filter = DirFilter::NO_HIDDEN;
        assert!(!filter.accepts_name(".hidden"));
        assert!(!filter.accepts_name("."));
        assert!(filter.accepts_name("visible"));
    }

    #[test]
    fn test_type_filters() {
        let files = DirFilter::FILES;
        assert!(files.accepts_kind(Some(EntryKind::File)));
        assert!(!files.accepts_kind(Some(EntryKind::Directory)));
        assert!(!files.accepts_kind(Some(EntryKind::Symlink)));
        assert!(!files.accepts_kind(None));

        let mixed = DirFilter::DIRS | DirFilter::SYMLINKS;
        assert!(mixed.accepts_kind(Some(EntryKind::Directory)));
        assert!(mixed.accepts_kind(Some(EntryKind::Symlink)));
        assert!(!mixed.accepts_kind(Some(EntryKind::File)));
        assert!(!mixed.accepts_kind(Some(EntryKind::Unknown)));
    }

    #[test]
    fn test_tree_filter_excludes_symlinks() {
        assert!(DirFilter::TREE.needs_entry_kind());
        assert!(!DirFilter::TREE.accepts_kind(Some(EntryKind::Symlink)));
        assert!(!DirFilter::TREE.accepts_name(".."));
    }

    #[test]
    fn test_named_flags_are_only_the_filters() {
        let names: Vec<&str> = DirFilter::all().iter_names().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["FILES", "DIRS", "SYMLINKS", "NO_DOT_AND_DOT_DOT", "NO_HIDDEN"]);
        assert!(DirFilter::SYMLINKS.needs_entry_kind());
        assert!(!(DirFilter::NO_HIDDEN | DirFilter::NO_DOT_AND_DOT_DOT).needs_entry_kind());
    }

    #[test]
    fn test_entry_kind_from_ifmt() {
        assert_eq!(EntryKind::from_ifmt("S_IFREG"), EntryKind::File);
        assert_eq!(EntryKind::from_ifmt("S_IFDIR"), EntryKind::Directory);
        assert_eq!(EntryKind::from_ifmt("S_IFLNK"), EntryKind::Symlink);
        assert_eq!(EntryKind::from_ifmt("S_IFIFO"), EntryKind::Unknown);
    }
}
