//! Bridges C-style `(function pointer, user data)` callbacks to Rust closures.

use std::ffi::c_void;
use std::fmt;

/// The callback ABI native display libraries expect: the event payload and
/// the user data pointer registered alongside the function.
pub type NativeCallback = unsafe extern "C" fn(payload: *mut c_void, user_data: *mut c_void);

struct ListenerInner<T> {
    handle: *mut c_void,
    callback: Box<dyn FnMut(&T)>,
}

/// Owns a closure and exposes it as a [`NativeCallback`] plus user data.
///
/// The closure lives in a heap allocation whose address never changes, so the
/// raw pair stays valid for as long as the listener does. Whoever registers the
/// raw pair with a native library must keep the listener alive until the
/// registration is removed.
pub struct NativeListener<T> {
    inner: Box<ListenerInner<T>>,
}

impl<T> fmt::Debug for NativeListener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeListener")
            .field("handle", &self.inner.handle)
            .finish()
    }
}

unsafe extern "C" fn trampoline<T>(payload: *mut c_void, user_data: *mut c_void) {
    if payload.is_null() || user_data.is_null() {
        return;
    }
    // SAFETY: `user_data` is the pointer handed out by `as_raw` on a live
    // listener and `payload` points at a `T` owned by the caller for the
    // duration of the call.
    let inner = unsafe { &mut *(user_data as *mut ListenerInner<T>) };
    let payload = unsafe { &*(payload as *const T) };
    (inner.callback)(payload);
}

impl<T> NativeListener<T> {
    /// `handle` is the opaque native object the listener is attached to.
    pub fn new<F>(handle: *mut c_void, callback: F) -> Self
    where
        F: FnMut(&T) + 'static,
    {
        Self {
            inner: Box::new(ListenerInner {
                handle,
                callback: Box::new(callback),
            }),
        }
    }

    pub fn handle(&self) -> *mut c_void {
        self.inner.handle
    }

    /// The function pointer and user data to register natively.
    pub fn as_raw(&mut self) -> (NativeCallback, *mut c_void) {
        let user_data = &mut *self.inner as *mut ListenerInner<T> as *mut c_void;
        (trampoline::<T>, user_data)
    }
}

/// Invokes a raw registration the way a native library would.
///
/// # Safety
///
/// `user_data` must come from [`NativeListener::as_raw`] on a listener of the
/// same `T` that is still alive.
pub unsafe fn emit<T>(callback: NativeCallback, user_data: *mut c_void, payload: &T) {
    unsafe { callback(payload as *const T as *mut c_void, user_data) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn raw_pair_reaches_the_closure() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut listener = NativeListener::new(std::ptr::null_mut(), move |value: &u64| {
            sink.borrow_mut().push(*value)
        });
        let (callback, user_data) = listener.as_raw();
        unsafe {
            emit(callback, user_data, &7u64);
            emit(callback, user_data, &9u64);
            callback(std::ptr::null_mut(), user_data);
        }
        assert_eq!(*seen.borrow(), vec![7, 9]);
    }
}
