// Notification filter requested from the directory read
// Mirrors the FILE_NOTIFY_CHANGE_* bits understood by ReadDirectoryChangesW

use bitflags::bitflags;
use crate::record::ChangeAction;

bitflags! {
    /// Kinds of change a directory read asks to be woken for.
    ///
    /// The set is closed: raw values coming from elsewhere go through
    /// [`NotifyFilter::from_raw`] or [`NotifyFilter::supported`], which drop
    /// any bit this crate does not know about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifyFilter: u32 {
        const FILE_NAME = 0x0000_0001;
        const DIR_NAME = 0x0000_0002;
        const ATTRIBUTES = 0x0000_0004;
        const SIZE = 0x0000_0008;
        const LAST_WRITE = 0x0000_0010;
        const LAST_ACCESS = 0x0000_0020;
        const CREATION = 0x0000_0040;
        const SECURITY = 0x0000_0100;
    }
}

impl NotifyFilter {
    /// Name, size and last-write changes.
    pub const DEFAULT: NotifyFilter = NotifyFilter::FILE_NAME
        .union(NotifyFilter::SIZE)
        .union(NotifyFilter::LAST_WRITE);

    const CONTENT: NotifyFilter = NotifyFilter::ATTRIBUTES
        .union(NotifyFilter::SIZE)
        .union(NotifyFilter::LAST_WRITE)
        .union(NotifyFilter::LAST_ACCESS)
        .union(NotifyFilter::CREATION)
        .union(NotifyFilter::SECURITY);

    /// Build a filter from raw bits, clearing reserved ones.
    pub fn from_raw(raw: u32) -> Self {
        NotifyFilter::from_bits_truncate(raw)
    }

    /// Intersect with the supported set.
    pub fn supported(self) -> Self {
        self.intersection(NotifyFilter::all())
    }

    /// Whether a change record of this kind would be delivered under the filter.
    pub fn admits(self, action: ChangeAction) -> bool {
        match action {
            ChangeAction::Added
            | ChangeAction::Removed
            | ChangeAction::RenamedOldName
            | ChangeAction::RenamedNewName => {
                self.intersects(NotifyFilter::FILE_NAME | NotifyFilter::DIR_NAME)
            }
            ChangeAction::Modified => self.intersects(NotifyFilter::CONTENT),
        }
    }
}

impl Default for NotifyFilter {
    fn default() -> Self {
        NotifyFilter::DEFAULT
    }
}
