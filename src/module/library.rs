//! Dynamic library loading and symbol resolution
//!
//! Platform wrapper around dlopen/LoadLibrary. The library is closed on drop.

use crate::error::{BridgeError, Result};
use core::ffi::c_void;
use core::ptr::NonNull;
use std::ffi::CString;
use std::path::{Path, PathBuf};

pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

// The loader's handle may be used from any thread
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    pub fn open(path: &Path) -> Result<Self> {
        let handle = Self::open_impl(path)?;
        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }

    #[cfg(unix)]
    fn open_impl(path: &Path) -> Result<NonNull<c_void>> {
        let name = path_cstring(path)?;
        unsafe {
            let handle = libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL);
            NonNull::new(handle).ok_or_else(|| BridgeError::Library(last_dl_error(path)))
        }
    }

    #[cfg(windows)]
    fn open_impl(path: &Path) -> Result<NonNull<c_void>> {
        use std::os::windows::ffi::OsStrExt;

        extern "system" {
            fn LoadLibraryW(filename: *const u16) -> *mut c_void;
            fn GetLastError() -> u32;
        }

        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle).ok_or_else(|| {
                BridgeError::Library(format!("{}: error code {}", path.display(), GetLastError()))
            })
        }
    }

    /// Address of an exported symbol
    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>> {
        let cname = CString::new(name).map_err(|_| BridgeError::Library(format!("invalid symbol name '{name}'")))?;
        let ptr = self.symbol_impl(&cname);
        NonNull::new(ptr).ok_or_else(|| {
            BridgeError::Library(format!("symbol '{name}' not found in {}", self.path.display()))
        })
    }

    #[cfg(unix)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) }
    }

    #[cfg(windows)]
    fn symbol_impl(&self, name: &CString) -> *mut c_void {
        extern "system" {
            fn GetProcAddress(module: *mut c_void, name: *const u8) -> *mut c_void;
        }
        unsafe { GetProcAddress(self.handle.as_ptr(), name.as_ptr() as *const u8) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle.as_ptr());
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        extern "system" {
            fn FreeLibrary(module: *mut c_void) -> i32;
        }
        unsafe {
            FreeLibrary(self.handle.as_ptr());
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library").field("path", &self.path).finish()
    }
}

#[cfg(unix)]
fn path_cstring(path: &Path) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BridgeError::Library(format!("invalid library path {}", path.display())))
}

#[cfg(unix)]
fn last_dl_error(path: &Path) -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        format!("{}: unknown loader error", path.display())
    } else {
        unsafe { std::ffi::CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}
