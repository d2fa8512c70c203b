//! C FFI surface for the crawl scheduler (C17).
//!
//! Mirrors the shape already established in this codebase's extraction FFI: `string_to_ptr`/
//! `CString` round trips, and `std::panic::catch_unwind` at every entry point so a panic inside
//! Rust never unwinds across the ABI boundary into the host process.

use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::extractor::DefaultExtractor;
use crate::progress::ProgressSnapshot;
use crate::shutdown::Interrupt;
use crate::sink::{ResultRecord, ResultSink};
use crate::transport::ReqwestTransport;
use crate::{crawl_with_collaborators, CrawlOutcome, CrawlRequest};

/// Result of one `crawl_ffi` call: exactly one of `outcome_json_ptr` / `error_ptr` is non-null.
#[repr(C)]
pub struct CrawlResultFfi {
    pub outcome_json_ptr: *mut c_char,
    pub error_ptr: *mut c_char,
}

fn ok_result(outcome: &CrawlOutcome) -> CrawlResultFfi {
    match serde_json::to_string(outcome) {
        Ok(json) => CrawlResultFfi {
            outcome_json_ptr: string_to_ptr(json),
            error_ptr: ptr::null_mut(),
        },
        Err(e) => err_result(format!("failed to serialize crawl outcome: {e}")),
    }
}

fn err_result(message: impl Into<String>) -> CrawlResultFfi {
    CrawlResultFfi {
        outcome_json_ptr: ptr::null_mut(),
        error_ptr: string_to_ptr(message.into()),
    }
}

fn string_to_ptr(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// A `ResultSink` that forwards each flushed batch, JSON-encoded, to a host callback, and
/// optionally delegates staleness lookups to a host-supplied query over its own store.
struct CallbackSink {
    callback: extern "C" fn(*const c_char, *mut c_void),
    user_data: usize,
    /// Returns the Unix timestamp (seconds) `url` was last crawled, or a negative value if there
    /// is no existing row. `None` when the host registered no lookup callback (every sitemap URL
    /// is then treated as new).
    lookup: Option<extern "C" fn(*const c_char, *mut c_void) -> i64>,
    lookup_user_data: usize,
}

// The host guarantees `user_data`/`lookup_user_data` are safe to hand back across threads;
// workers call through this sink behind the batcher's own mutex, so calls are already serialized.
unsafe impl Send for CallbackSink {}
unsafe impl Sync for CallbackSink {}

impl ResultSink for CallbackSink {
    fn write_batch(&self, rows: &[ResultRecord]) -> Result<(), String> {
        let json = serde_json::to_string(rows).map_err(|e| e.to_string())?;
        let c_json = CString::new(json).map_err(|e| e.to_string())?;
        (self.callback)(c_json.as_ptr(), self.user_data as *mut c_void);
        Ok(())
    }

    fn lookup_crawled_at(&self, url: &str) -> Option<DateTime<Utc>> {
        let lookup = self.lookup?;
        let c_url = CString::new(url).ok()?;
        let secs = lookup(c_url.as_ptr(), self.lookup_user_data as *mut c_void);
        if secs < 0 {
            return None;
        }
        Utc.timestamp_opt(secs, 0).single()
    }
}

/// Opaque cancellation handle: a host holds one across the `crawl_ffi` call it wants to be able to
/// interrupt, since `crawl_ffi` itself blocks its calling thread until the crawl finishes.
pub struct CrawlHandle {
    interrupt: Arc<Interrupt>,
}

/// Allocate a new cancellation handle for an upcoming `crawl_ffi` call.
#[no_mangle]
pub extern "C" fn new_crawl_handle() -> *mut CrawlHandle {
    Box::into_raw(Box::new(CrawlHandle {
        interrupt: Interrupt::new(),
    }))
}

/// Release a handle allocated by [`new_crawl_handle`].
///
/// # Safety
/// `handle` must be a pointer returned by `new_crawl_handle`, not already freed, and the crawl it
/// was passed to must have finished.
#[no_mangle]
pub unsafe extern "C" fn free_crawl_handle(handle: *mut CrawlHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Ask the crawl associated with `handle` to wind down. A second call within 3 seconds of the
/// first terminates the process immediately rather than waiting for in-flight requests to drain.
///
/// # Safety
/// `handle` must be a live pointer returned by `new_crawl_handle`, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn interrupt_crawl(handle: *const CrawlHandle) {
    let Some(handle) = handle.as_ref() else {
        return;
    };
    if handle.interrupt.signal() {
        std::process::exit(130);
    }
}

/// Run a crawl to completion. `request_json` is a [`CrawlRequest`] JSON object. `row_callback` is
/// invoked once per flushed batch with a JSON array of result rows; `progress_callback`, if
/// non-null, is invoked at most every 250ms with a JSON [`ProgressSnapshot`]. `lookup_callback`,
/// if non-null, is asked for the Unix timestamp (seconds) a URL was last crawled — a negative
/// return means no existing row — so sitemap-driven discovery can skip fresh URLs (§4.6); pass
/// null to treat every discovered URL as new. `handle`, if non-null, lets a host cancel the crawl
/// from another thread via [`interrupt_crawl`]. All callbacks receive their respective
/// `*_user_data` verbatim so the host can recover its own context.
///
/// # Safety
/// `request_json` must be a valid null-terminated UTF-8 C string. `row_callback` must be safe to
/// call from the thread `crawl_ffi` runs on with a valid, null-terminated JSON C string; likewise
/// for `lookup_callback`. `handle`, if non-null, must be a live pointer from [`new_crawl_handle`].
/// The returned [`CrawlResultFfi`] must be released with [`free_crawl_result`].
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn crawl_ffi(
    request_json: *const c_char,
    row_callback: extern "C" fn(*const c_char, *mut c_void),
    row_user_data: *mut c_void,
    progress_callback: Option<extern "C" fn(*const c_char, *mut c_void)>,
    progress_user_data: *mut c_void,
    lookup_callback: Option<extern "C" fn(*const c_char, *mut c_void) -> i64>,
    lookup_user_data: *mut c_void,
    handle: *const CrawlHandle,
) -> CrawlResultFfi {
    let row_user_data = row_user_data as usize;
    let progress_user_data = progress_user_data as usize;
    let lookup_user_data = lookup_user_data as usize;
    let request_json = request_json as usize;
    let handle = handle as usize;

    let result = std::panic::catch_unwind(move || {
        crawl_ffi_inner(
            request_json as *const c_char,
            row_callback,
            row_user_data as *mut c_void,
            progress_callback,
            progress_user_data as *mut c_void,
            lookup_callback,
            lookup_user_data as *mut c_void,
            handle as *const CrawlHandle,
        )
    });

    match result {
        Ok(r) => r,
        Err(_) => err_result("panic inside crawl_ffi"),
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn crawl_ffi_inner(
    request_json: *const c_char,
    row_callback: extern "C" fn(*const c_char, *mut c_void),
    row_user_data: *mut c_void,
    progress_callback: Option<extern "C" fn(*const c_char, *mut c_void)>,
    progress_user_data: *mut c_void,
    lookup_callback: Option<extern "C" fn(*const c_char, *mut c_void) -> i64>,
    lookup_user_data: *mut c_void,
    handle: *const CrawlHandle,
) -> CrawlResultFfi {
    let request_str = match CStr::from_ptr(request_json).to_str() {
        Ok(s) => s,
        Err(e) => return err_result(format!("invalid UTF-8 in request: {e}")),
    };

    let request: CrawlRequest = match serde_json::from_str(request_str) {
        Ok(r) => r,
        Err(e) => return err_result(format!("invalid request JSON: {e}")),
    };

    crate::logging::init();

    let sink = CallbackSink {
        callback: row_callback,
        user_data: row_user_data as usize,
        lookup: lookup_callback,
        lookup_user_data: lookup_user_data as usize,
    };

    let progress_user_data_for_closure = progress_user_data as usize;
    let progress_closure = progress_callback.map(|cb| {
        move |snapshot: ProgressSnapshot| {
            if let Ok(json) = serde_json::to_string(&snapshot) {
                if let Ok(c_json) = CString::new(json) {
                    cb(c_json.as_ptr(), progress_user_data_for_closure as *mut c_void);
                }
            }
        }
    });
    let progress_ref: Option<&(dyn Fn(ProgressSnapshot) + Sync)> =
        progress_closure.as_ref().map(|f| f as &(dyn Fn(ProgressSnapshot) + Sync));

    let transport: Arc<dyn crate::transport::HttpTransport> = Arc::new(ReqwestTransport::default());
    let extractor: Arc<dyn crate::extractor::Extractor> = Arc::new(DefaultExtractor);
    let interrupt = handle.as_ref().map_or_else(Interrupt::new, |h| h.interrupt.clone());

    match crawl_with_collaborators(request, &sink, transport, extractor, progress_ref, interrupt) {
        Ok(outcome) => ok_result(&outcome),
        Err(e) => err_result(e.to_string()),
    }
}

/// Release a [`CrawlResultFfi`] returned by [`crawl_ffi`].
///
/// # Safety
/// Must only be called once, with a value returned from `crawl_ffi`.
#[no_mangle]
pub unsafe extern "C" fn free_crawl_result(result: CrawlResultFfi) {
    if !result.outcome_json_ptr.is_null() {
        drop(CString::from_raw(result.outcome_json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

/// Free a string allocated by Rust and handed across the FFI boundary.
///
/// # Safety
/// Must only be called with a pointer previously returned by this crate's FFI functions, and only
/// once.
#[no_mangle]
pub unsafe extern "C" fn free_rust_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Crate version string, for host diagnostics.
#[no_mangle]
pub extern "C" fn sql_crawler_version() -> *const c_char {
    static VERSION: &[u8] = b"0.1.0\0";
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    static CAPTURED_ROWS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static CALL_COUNT: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn capture_row_callback(json_ptr: *const c_char, _user_data: *mut c_void) {
        CALL_COUNT.fetch_add(1, Ordering::SeqCst);
        let json = unsafe { CStr::from_ptr(json_ptr) }.to_string_lossy().into_owned();
        CAPTURED_ROWS.lock().unwrap().push(json);
    }

    #[test]
    fn crawl_ffi_round_trips_through_c_strings() {
        CALL_COUNT.store(0, Ordering::SeqCst);
        CAPTURED_ROWS.lock().unwrap().clear();

        let request = CString::new(
            r#"{"seeds": [], "sites": [], "config": {"user_agent": "TestBot/1.0", "threads": 1}}"#,
        )
        .unwrap();

        let result = unsafe {
            crawl_ffi(
                request.as_ptr(),
                capture_row_callback,
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                ptr::null(),
            )
        };

        assert!(!result.outcome_json_ptr.is_null());
        assert!(result.error_ptr.is_null());
        let outcome_json = unsafe { CStr::from_ptr(result.outcome_json_ptr) }
            .to_string_lossy()
            .into_owned();
        assert!(outcome_json.contains("rows_written"));

        unsafe { free_crawl_result(result) };
    }

    #[test]
    fn crawl_ffi_reports_invalid_json_as_an_error_not_a_panic() {
        let request = CString::new("not json").unwrap();
        let result = unsafe {
            crawl_ffi(
                request.as_ptr(),
                capture_row_callback,
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                ptr::null(),
            )
        };
        assert!(result.outcome_json_ptr.is_null());
        assert!(!result.error_ptr.is_null());
        unsafe { free_crawl_result(result) };
    }

    #[test]
    fn interrupt_crawl_handle_round_trips() {
        let handle = new_crawl_handle();
        unsafe {
            interrupt_crawl(handle);
            free_crawl_handle(handle);
        }
    }

    extern "C" fn no_existing_row_lookup(_url: *const c_char, _user_data: *mut c_void) -> i64 {
        -1
    }

    #[test]
    fn crawl_ffi_accepts_a_lookup_callback() {
        let request = CString::new(
            r#"{"seeds": [], "sites": [], "config": {"user_agent": "TestBot/1.0", "threads": 1}}"#,
        )
        .unwrap();

        let result = unsafe {
            crawl_ffi(
                request.as_ptr(),
                capture_row_callback,
                ptr::null_mut(),
                None,
                ptr::null_mut(),
                Some(no_existing_row_lookup),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        assert!(!result.outcome_json_ptr.is_null());
        unsafe { free_crawl_result(result) };
    }
}
