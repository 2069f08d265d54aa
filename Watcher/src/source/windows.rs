// I/O completion port source built on ReadDirectoryChangesW
// The directory handle is bound to the port under the session key; posted
// packets (no OVERLAPPED) carry the sentinel keys

use super::{ChangeReader, Completion, CompletionKey, CompletionSignal, SourcePair};
use crate::error::{WatcherError, WatcherResult};
use crate::filter::NotifyFilter;
use crate::record::{ChangeBuffer, CHANGE_BUFFER_SIZE};
use crate::target::WatchTarget;
use log::{debug, warn};
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::Arc;

use winapi::shared::basetsd::ULONG_PTR;
use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::shared::winerror::{ERROR_NOTIFY_ENUM_DIR, ERROR_OPERATION_ABORTED, WAIT_TIMEOUT};
use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::{
    CancelIoEx, CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus,
};
use winapi::um::minwinbase::{LPOVERLAPPED, OVERLAPPED};
use winapi::um::winbase::{
    ReadDirectoryChangesW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED, INFINITE,
};
use winapi::um::winnt::{
    FILE_LIST_DIRECTORY, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, HANDLE,
};

// How long teardown waits for a cancelled read to come back from the kernel
const CANCEL_DRAIN_MS: DWORD = 1000;

// ============================================================================
// Owned Handles
// ============================================================================

/// A kernel handle closed exactly once, on drop
#[derive(Debug)]
pub(crate) struct OwnedHandle(HANDLE);

// Kernel handles are process-wide values; closing is the only state change
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

// ============================================================================
// Read Request
// ============================================================================

/// OVERLAPPED and buffer handed to the kernel for one read; must stay at a
/// fixed address until the read completes
#[repr(C)]
struct ReadRequest {
    overlapped: OVERLAPPED,
    buffer: ChangeBuffer,
}

impl ReadRequest {
    fn boxed() -> Box<Self> {
        // OVERLAPPED and the byte buffer are both valid when zeroed
        unsafe { Box::new(mem::zeroed()) }
    }
}

pub(crate) struct IocpReader {
    request: Box<ReadRequest>,
    directory: Arc<OwnedHandle>,
    port: Arc<OwnedHandle>,
    key: CompletionKey,
    filter: NotifyFilter,
    filled: usize,
    in_flight: bool,
}

// The OVERLAPPED holds raw pointers, but only this thread and the kernel touch it
unsafe impl Send for IocpReader {}

pub(crate) struct IocpSignal {
    // Field order is release order: directory before completion port
    directory: Arc<OwnedHandle>,
    port: Arc<OwnedHandle>,
}

pub(crate) fn open(
    target: &WatchTarget,
    key: CompletionKey,
    filter: NotifyFilter,
) -> WatcherResult<SourcePair> {
    let path = target.directory();
    let wide: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            wide.as_ptr(),
            FILE_LIST_DIRECTORY,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            ptr::null_mut(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(WatcherError::initialization(path, io::Error::last_os_error()));
    }
    let directory = Arc::new(OwnedHandle(handle));

    let port = unsafe {
        CreateIoCompletionPort(directory.raw(), ptr::null_mut(), key.as_raw() as ULONG_PTR, 1)
    };
    if port.is_null() {
        return Err(WatcherError::resource(
            "I/O completion port",
            io::Error::last_os_error(),
        ));
    }
    let port = Arc::new(OwnedHandle(port));

    debug!("Opened {} and bound it to a completion port", path.display());

    let reader = IocpReader {
        request: ReadRequest::boxed(),
        directory: Arc::clone(&directory),
        port: Arc::clone(&port),
        key,
        filter,
        filled: 0,
        in_flight: false,
    };
    Ok((Box::new(reader), Box::new(IocpSignal { directory, port })))
}

impl ChangeReader for IocpReader {
    fn arm(&mut self) -> io::Result<()> {
        if self.in_flight {
            // One read at a time; the buffer is still owned by the kernel
            return Ok(());
        }
        let request = &mut *self.request;
        request.overlapped = unsafe { mem::zeroed() };

        let ok = unsafe {
            ReadDirectoryChangesW(
                self.directory.raw(),
                request.buffer.as_mut_bytes().as_mut_ptr() as *mut _,
                CHANGE_BUFFER_SIZE as DWORD,
                FALSE,
                self.filter.supported().bits(),
                ptr::null_mut(),
                &mut request.overlapped,
                None,
            )
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        self.in_flight = true;
        Ok(())
    }

    fn next_completion(&mut self) -> Completion {
        let mut bytes: DWORD = 0;
        let mut key: ULONG_PTR = 0;
        let mut overlapped: LPOVERLAPPED = ptr::null_mut();

        let ok = unsafe {
            GetQueuedCompletionStatus(self.port.raw(), &mut bytes, &mut key, &mut overlapped, INFINITE)
        };
        let key = CompletionKey(key as usize);

        if ok == FALSE {
            let err = io::Error::last_os_error();
            if overlapped.is_null() {
                // The wait itself failed; nothing was dequeued
                return Completion::Failed(err);
            }
            self.in_flight = false;
            self.filled = 0;
            return match err.raw_os_error().map(|code| code as DWORD) {
                Some(ERROR_OPERATION_ABORTED) => Completion::Cancelled,
                Some(ERROR_NOTIFY_ENUM_DIR) => Completion::Read { key, bytes: 0 },
                _ => Completion::Failed(err),
            };
        }

        if overlapped.is_null() {
            return Completion::Posted(key);
        }

        self.in_flight = false;
        self.filled = bytes as usize;
        Completion::Read {
            key,
            bytes: bytes as usize,
        }
    }

    fn buffer(&self) -> &[u8] {
        self.request.buffer.filled(self.filled)
    }
}

impl IocpReader {
    /// Wait for a cancelled read to be handed back so its buffer can be freed
    fn drain_cancelled_read(&mut self) -> bool {
        let target: LPOVERLAPPED = &mut self.request.overlapped;
        unsafe { CancelIoEx(self.directory.raw(), target) };

        loop {
            let mut bytes: DWORD = 0;
            let mut key: ULONG_PTR = 0;
            let mut overlapped: LPOVERLAPPED = ptr::null_mut();
            let ok = unsafe {
                GetQueuedCompletionStatus(
                    self.port.raw(),
                    &mut bytes,
                    &mut key,
                    &mut overlapped,
                    CANCEL_DRAIN_MS,
                )
            };
            if overlapped == target {
                return true;
            }
            if ok == FALSE && overlapped.is_null() {
                let timed_out = io::Error::last_os_error().raw_os_error() == Some(WAIT_TIMEOUT as i32);
                if timed_out {
                    return false;
                }
            }
        }
    }
}

impl Drop for IocpReader {
    fn drop(&mut self) {
        if !self.in_flight {
            return;
        }
        if !self.drain_cancelled_read() {
            warn!("Cancelled directory read did not complete; leaking its buffer");
            let request = mem::replace(&mut self.request, ReadRequest::boxed());
            mem::forget(request);
        }
    }
}

impl CompletionSignal for IocpSignal {
    fn post(&self, key: CompletionKey) -> io::Result<()> {
        let ok = unsafe {
            PostQueuedCompletionStatus(self.port.raw(), 0, key.as_raw() as ULONG_PTR, ptr::null_mut())
        };
        if ok == FALSE {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn cancel_pending(&self) -> io::Result<()> {
        let ok = unsafe { CancelIoEx(self.directory.raw(), ptr::null_mut()) };
        if ok == FALSE {
            // ERROR_NOT_FOUND: nothing was outstanding
            let err = io::Error::last_os_error();
            debug!("CancelIoEx found nothing to cancel: {}", err);
        }
        Ok(())
    }
}
