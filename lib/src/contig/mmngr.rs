//! Allocator backed by the R-Car memory manager (`libmmngr`), which reserves physically
//! contiguous memory from a carve-out and can export it as DMABUF through `libmmngrbuf`.
use std::fmt;
use std::os::raw::{c_int, c_ulong};
use std::os::unix::io::BorrowedFd;
use std::ptr::NonNull;
use std::sync::Arc;

use libloading::Library;
use log::{debug, error};

use super::*;

const LIBMMNGR: &str = "libmmngr.so.1";
const LIBMMNGRBUF: &str = "libmmngrbuf.so.1";

/// Request a user-space virtual mapping of the allocation.
const MMNGR_VA_SUPPORT: c_ulong = 0;

type AllocFn = unsafe extern "C" fn(
    *mut c_int,
    usize,
    *mut c_ulong,
    *mut c_ulong,
    *mut c_ulong,
    c_ulong,
) -> c_int;
type FreeFn = unsafe extern "C" fn(c_int) -> c_int;
type ExportStartFn = unsafe extern "C" fn(*mut c_int, usize, c_ulong, *mut c_int) -> c_int;
type ExportEndFn = unsafe extern "C" fn(c_int) -> c_int;

struct MmngrApi {
    alloc: AllocFn,
    free: FreeFn,
    export_start: ExportStartFn,
    export_end: ExportEndFn,
    // The function pointers above are only valid while these are loaded.
    _mmngr: Library,
    _mmngrbuf: Library,
}

fn load(name: &'static str) -> Result<Library, ContigError> {
    // Safe because these libraries have no initialization routines with preconditions.
    unsafe { Library::new(name) }.map_err(|e| ContigError::LibraryLoad(name, e))
}

fn symbol<T: Copy>(lib: &Library, name: &'static str) -> Result<T, ContigError> {
    let mut symbol = name.as_bytes().to_vec();
    symbol.push(0);
    // Safe as long as `T` matches the prototype of the symbol, which the callers ensure.
    unsafe { lib.get::<T>(&symbol) }
        .map(|s| *s)
        .map_err(|e| ContigError::Symbol(name, e))
}

/// The mmngr allocator. Cloning is cheap and shares the loaded libraries.
#[derive(Clone)]
pub struct Mmngr {
    api: Arc<MmngrApi>,
}

impl fmt::Debug for Mmngr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mmngr").finish_non_exhaustive()
    }
}

impl Mmngr {
    /// Loads `libmmngr` and `libmmngrbuf`.
    pub fn open() -> Result<Self, ContigError> {
        let mmngr = load(LIBMMNGR)?;
        let mmngrbuf = load(LIBMMNGRBUF)?;

        let api = MmngrApi {
            alloc: symbol::<AllocFn>(&mmngr, "mmngr_alloc_in_user")?,
            free: symbol::<FreeFn>(&mmngr, "mmngr_free_in_user")?,
            export_start: symbol::<ExportStartFn>(&mmngrbuf, "mmngr_export_start_in_user")?,
            export_end: symbol::<ExportEndFn>(&mmngrbuf, "mmngr_export_end_in_user")?,
            _mmngr: mmngr,
            _mmngrbuf: mmngrbuf,
        };

        Ok(Mmngr { api: Arc::new(api) })
    }
}

impl ContiguousAllocator for Mmngr {
    fn allocate(&self, size: usize) -> Result<Box<dyn ContiguousBuffer>, ContigError> {
        if size == 0 {
            return Err(ContigError::ZeroSize);
        }

        let mut id: c_int = 0;
        let mut phys: c_ulong = 0;
        let mut hard: c_ulong = 0;
        let mut virt: c_ulong = 0;

        let ret = unsafe {
            (self.api.alloc)(
                &mut id,
                size,
                &mut phys,
                &mut hard,
                &mut virt,
                MMNGR_VA_SUPPORT,
            )
        };
        if ret != 0 {
            return Err(ContigError::Mmngr("mmngr_alloc_in_user", ret));
        }

        let buffer = MmngrBuffer {
            api: Arc::clone(&self.api),
            id,
            hard_addr: hard,
            virt: NonNull::new(virt as *mut u8),
            size,
            export: None,
        };
        debug!(
            "mmngr: allocated {} bytes, id {}, phys 0x{:x}, hard 0x{:x}",
            size, id, phys, hard
        );

        if buffer.virt.is_none() {
            // Dropping the buffer frees the allocation.
            return Err(ContigError::Mmngr("mmngr_alloc_in_user", -1));
        }

        Ok(Box::new(buffer))
    }
}

struct MmngrExport {
    mbid: c_int,
    dmafd: c_int,
}

pub struct MmngrBuffer {
    api: Arc<MmngrApi>,
    id: c_int,
    hard_addr: c_ulong,
    virt: Option<NonNull<u8>>,
    size: usize,
    export: Option<MmngrExport>,
}

impl fmt::Debug for MmngrBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmngrBuffer")
            .field("id", &self.id)
            .field("hard_addr", &format_args!("0x{:x}", self.hard_addr))
            .field("size", &self.size)
            .field("dmafd", &self.export.as_ref().map(|e| e.dmafd))
            .finish()
    }
}

impl ContiguousBuffer for MmngrBuffer {
    fn as_slice(&self) -> &[u8] {
        match self.virt {
            // Safe because mmngr mapped `size` bytes at `virt` for the lifetime of the allocation.
            Some(virt) => unsafe { std::slice::from_raw_parts(virt.as_ptr(), self.size) },
            None => &[],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.virt {
            // Safe because mmngr mapped `size` bytes at `virt` for the lifetime of the allocation,
            // and we have exclusive access to `self`.
            Some(virt) => unsafe { std::slice::from_raw_parts_mut(virt.as_ptr(), self.size) },
            None => &mut [],
        }
    }

    fn dmabuf(&mut self) -> Result<BorrowedFd<'_>, ContigError> {
        let dmafd = match &self.export {
            Some(export) => export.dmafd,
            None => {
                let mut mbid: c_int = 0;
                let mut dmafd: c_int = -1;
                let ret = unsafe {
                    (self.api.export_start)(&mut mbid, self.size, self.hard_addr, &mut dmafd)
                };
                if ret != 0 {
                    return Err(ContigError::Mmngr("mmngr_export_start_in_user", ret));
                }
                debug!("mmngr: exported id {} as dmabuf {}", self.id, dmafd);

                self.export = Some(MmngrExport { mbid, dmafd });
                dmafd
            }
        };

        // Safe because the descriptor stays open until the export ends, which requires a mutable
        // borrow of `self`.
        Ok(unsafe { BorrowedFd::borrow_raw(dmafd) })
    }

    fn release_dmabuf(&mut self) -> Result<(), ContigError> {
        if let Some(export) = self.export.take() {
            let ret = unsafe { (self.api.export_end)(export.mbid) };
            if ret != 0 {
                return Err(ContigError::Mmngr("mmngr_export_end_in_user", ret));
            }
            debug!("mmngr: ended export of id {}", self.id);
        }

        Ok(())
    }
}

impl Drop for MmngrBuffer {
    fn drop(&mut self) {
        // The export must end before the memory is released. Ending it also closes the dmafd.
        if let Err(e) = self.release_dmabuf() {
            error!("{}", e);
        }

        let ret = unsafe { (self.api.free)(self.id) };
        if ret != 0 {
            error!("mmngr_free_in_user({}) failed: {}", self.id, ret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library() {
        // The BSP libraries are not available on development hosts.
        if std::path::Path::new("/usr/lib/libmmngr.so.1").exists() {
            return;
        }
        assert!(matches!(
            Mmngr::open(),
            Err(ContigError::LibraryLoad(LIBMMNGR, _))
        ));
    }
}
