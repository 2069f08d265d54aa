// Change records delivered by a directory read
// Decodes and encodes the FILE_NOTIFY_INFORMATION layout

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the buffer handed to each directory read
pub const CHANGE_BUFFER_SIZE: usize = 4096;

// FILE_NOTIFY_INFORMATION: NextEntryOffset, Action, FileNameLength, FileName[]
const HEADER_LEN: usize = 12;

// ============================================================================
// Change Record Types
// ============================================================================

/// What happened to a file inside the watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Added,
    Removed,
    Modified,
    RenamedOldName,
    RenamedNewName,
}

impl ChangeAction {
    /// Convert from a FILE_ACTION_* code
    pub fn from_raw(action: u32) -> Option<Self> {
        match action {
            1 => Some(ChangeAction::Added),
            2 => Some(ChangeAction::Removed),
            3 => Some(ChangeAction::Modified),
            4 => Some(ChangeAction::RenamedOldName),
            5 => Some(ChangeAction::RenamedNewName),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            ChangeAction::Added => 1,
            ChangeAction::Removed => 2,
            ChangeAction::Modified => 3,
            ChangeAction::RenamedOldName => 4,
            ChangeAction::RenamedNewName => 5,
        }
    }

    /// The name now exists in the directory (created or renamed into place)
    pub fn is_arrival(self) -> bool {
        matches!(self, ChangeAction::Added | ChangeAction::RenamedNewName)
    }
}

/// A single decoded change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Type of change
    pub action: ChangeAction,

    /// File name relative to the watched directory
    pub file_name: String,
}

impl ChangeRecord {
    pub fn new(action: ChangeAction, file_name: impl Into<String>) -> Self {
        ChangeRecord {
            action,
            file_name: file_name.into(),
        }
    }

    fn encoded_len(&self) -> usize {
        align_entry(HEADER_LEN + self.file_name.encode_utf16().count() * 2)
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.action, self.file_name)
    }
}

// ============================================================================
// Change Buffer
// ============================================================================

/// Fixed buffer filled by one asynchronous directory read.
///
/// Entries must start on DWORD boundaries, so the buffer itself is aligned.
#[repr(C, align(8))]
pub struct ChangeBuffer {
    bytes: [u8; CHANGE_BUFFER_SIZE],
}

impl ChangeBuffer {
    pub fn boxed() -> Box<Self> {
        Box::new(ChangeBuffer {
            bytes: [0u8; CHANGE_BUFFER_SIZE],
        })
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The first `len` bytes, clamped to the buffer size
    pub fn filled(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(CHANGE_BUFFER_SIZE)]
    }
}

impl fmt::Debug for ChangeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBuffer")
            .field("capacity", &CHANGE_BUFFER_SIZE)
            .finish()
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Iterator over the change records packed into a filled buffer.
///
/// Iteration stops at the last entry, or at the first entry that does not fit
/// inside the buffer. Entries with an unknown action code are skipped.
pub struct ChangeRecords<'a> {
    buffer: &'a [u8],
    offset: Option<usize>,
}

impl<'a> ChangeRecords<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        ChangeRecords {
            buffer,
            offset: if buffer.is_empty() { None } else { Some(0) },
        }
    }
}

impl<'a> Iterator for ChangeRecords<'a> {
    type Item = ChangeRecord;

    fn next(&mut self) -> Option<ChangeRecord> {
        loop {
            let offset = self.offset.take()?;
            let entry = self.buffer.get(offset..)?;

            if entry.len() < HEADER_LEN {
                log::debug!("Truncated change record header at offset {}", offset);
                return None;
            }

            let next_entry = read_u32(entry, 0) as usize;
            let action = read_u32(entry, 4);
            let name_len = read_u32(entry, 8) as usize;

            let name_end = HEADER_LEN.checked_add(name_len);
            let name_bytes = match name_end.and_then(|end| entry.get(HEADER_LEN..end)) {
                Some(bytes) => bytes,
                None => {
                    log::debug!("Change record name overruns buffer at offset {}", offset);
                    return None;
                }
            };

            if next_entry != 0 {
                self.offset = offset.checked_add(next_entry);
            }

            // File names are UTF-16LE, 2 bytes per unit
            let units: Vec<u16> = name_bytes
                .chunks_exact(2)
                .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
                .collect();

            match ChangeAction::from_raw(action) {
                Some(action) => {
                    return Some(ChangeRecord {
                        action,
                        file_name: String::from_utf16_lossy(&units),
                    });
                }
                None => {
                    log::trace!("Skipping change record with unknown action {}", action);
                }
            }
        }
    }
}

fn read_u32(buffer: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
}

// ============================================================================
// Encoding
// ============================================================================

fn align_entry(len: usize) -> usize {
    (len + 3) & !3
}

/// Total bytes the records occupy once packed
pub fn encoded_len(records: &[ChangeRecord]) -> usize {
    records.iter().map(ChangeRecord::encoded_len).sum()
}

/// Pack records into `buffer` in the layout `ChangeRecords` reads.
///
/// Returns the number of bytes written, or `None` if the records do not fit,
/// which callers report the same way the kernel reports an overflow.
pub fn encode_records(records: &[ChangeRecord], buffer: &mut [u8]) -> Option<usize> {
    if encoded_len(records) > buffer.len() {
        return None;
    }

    let mut offset = 0;
    for (index, record) in records.iter().enumerate() {
        let units: Vec<u16> = record.file_name.encode_utf16().collect();
        let name_len = units.len() * 2;
        let entry_len = record.encoded_len();
        let next_entry = if index + 1 == records.len() { 0 } else { entry_len };

        let entry = &mut buffer[offset..offset + entry_len];
        entry[0..4].copy_from_slice(&(next_entry as u32).to_le_bytes());
        entry[4..8].copy_from_slice(&record.action.as_raw().to_le_bytes());
        entry[8..12].copy_from_slice(&(name_len as u32).to_le_bytes());
        for (i, unit) in units.iter().enumerate() {
            let at = HEADER_LEN + i * 2;
            entry[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
        for pad in &mut entry[HEADER_LEN + name_len..] {
            *pad = 0;
        }

        offset += entry_len;
    }

    Some(offset)
}
