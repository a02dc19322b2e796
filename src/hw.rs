//! QSV hardware device handle.

use std::ptr;

use ffmpeg_the_third as ffmpeg;

use ffmpeg::ffi;

use crate::error::{Error, Result};

/// Owned reference to a QSV hardware device context.
///
/// Codec contexts take their own `av_buffer_ref` and release it when they are
/// freed; this wrapper releases exactly the one reference it created.
pub(crate) struct HwDevice {
    ptr: *mut ffi::AVBufferRef,
}

impl HwDevice {
    /// Create a QSV device context.
    pub(crate) fn new() -> Result<Self> {
        let mut device = ptr::null_mut();
        let ret = unsafe {
            ffi::av_hwdevice_ctx_create(
                &mut device,
                ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };
        if ret < 0 || device.is_null() {
            return Err(Error::hw_device(format!(
                "failed to create QSV device: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(Self { ptr: device })
    }

    /// Mint a new owned reference for transfer into a codec context.
    pub(crate) fn new_ref(&self) -> Result<*mut ffi::AVBufferRef> {
        let reference = unsafe { ffi::av_buffer_ref(self.ptr) };
        if reference.is_null() {
            return Err(Error::hw_device("failed to reference QSV device"));
        }
        Ok(reference)
    }
}

impl Drop for HwDevice {
    fn drop(&mut self) {
        unsafe {
            ffi::av_buffer_unref(&mut self.ptr);
        }
    }
}

/// `get_format` callback that pins decoder output to QSV hardware surfaces.
pub(crate) unsafe extern "C" fn request_qsv_surface(
    _ctx: *mut ffi::AVCodecContext,
    formats: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    let mut cursor = formats;
    unsafe {
        while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            if *cursor == ffi::AVPixelFormat::AV_PIX_FMT_QSV {
                return ffi::AVPixelFormat::AV_PIX_FMT_QSV;
            }
            cursor = cursor.add(1);
        }
    }
    ffi::AVPixelFormat::AV_PIX_FMT_NONE
}
