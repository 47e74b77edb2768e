use super::{EventSource, Fragments};
use crate::error::Result;
use crate::types::{QueryFilter, SourceTarget};

/// Events rendered through the native event log query API.
///
/// Handles are fetched in batches of [`BATCH_SIZE`] and each one is rendered
/// to XML and closed before the next is touched.
pub struct NativeSource {
    target: SourceTarget,
}

/// Maximum number of event handles requested per `EvtNext` call.
pub const BATCH_SIZE: usize = 32;

impl NativeSource {
    pub fn new(target: SourceTarget) -> Self {
        Self { target }
    }
}

impl EventSource for NativeSource {
    fn name(&self) -> &'static str {
        "native"
    }

    fn fragments(&mut self, filter: &QueryFilter) -> Result<Fragments<'_>> {
        #[cfg(target_os = "windows")]
        {
            let fragments = windows_impl::NativeFragments::open(&self.target, &filter.render())?;
            Ok(Box::new(fragments))
        }

        #[cfg(not(target_os = "windows"))]
        {
            let _ = filter;
            log::warn!(
                "Native event log query for {} not available on non-Windows platforms",
                self.target
            );
            Err(crate::error::Error::SourceUnavailable(
                "native event log API requires Windows".to_string(),
            ))
        }
    }
}

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::collections::VecDeque;

    use log::{debug, info};
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, ERROR_NO_MORE_ITEMS};
    use windows::Win32::System::EventLog::{
        EvtClose, EvtNext, EvtQuery, EvtQueryChannelPath, EvtQueryFilePath,
        EvtQueryReverseDirection, EvtRender, EvtRenderEventXml, EVT_HANDLE,
    };
    use windows::Win32::System::Threading::INFINITE;

    use super::BATCH_SIZE;
    use crate::error::{Error, Result};
    use crate::types::SourceTarget;

    /// Owns one `EVT_HANDLE` and closes it on drop.
    struct EvtHandle(EVT_HANDLE);

    impl Drop for EvtHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = EvtClose(self.0);
            }
        }
    }

    pub(super) struct NativeFragments {
        query: EvtHandle,
        pending: VecDeque<EvtHandle>,
        exhausted: bool,
        failed: bool,
    }

    impl NativeFragments {
        pub(super) fn open(target: &SourceTarget, filter: &str) -> Result<Self> {
            let (path, flags) = match target {
                SourceTarget::Channel(name) => (
                    HSTRING::from(name.as_str()),
                    EvtQueryChannelPath.0 | EvtQueryReverseDirection.0,
                ),
                SourceTarget::File(path) => (HSTRING::from(path.as_path()), EvtQueryFilePath.0),
            };
            let query = HSTRING::from(filter);

            info!("Querying {} via EvtQuery", target);
            let handle = unsafe { EvtQuery(EVT_HANDLE::default(), &path, &query, flags) };
            let handle = handle.map_err(|e| {
                Error::SourceUnavailable(format!("EvtQuery failed for {target}: {e}"))
            })?;

            Ok(Self {
                query: EvtHandle(handle),
                pending: VecDeque::with_capacity(BATCH_SIZE),
                exhausted: false,
                failed: false,
            })
        }

        fn fetch_batch(&mut self) -> Result<()> {
            let mut raw = [0isize; BATCH_SIZE];
            let mut returned = 0u32;

            match unsafe { EvtNext(self.query.0, &mut raw, INFINITE, 0, &mut returned) } {
                Ok(()) => {
                    let returned = (returned as usize).min(BATCH_SIZE);
                    debug!("EvtNext returned {} handles", returned);
                    let handles = raw[..returned].iter().map(|&h| EvtHandle(EVT_HANDLE(h)));
                    self.pending.extend(handles);
                    Ok(())
                }
                Err(e) if e.code() == ERROR_NO_MORE_ITEMS.to_hresult() => {
                    self.exhausted = true;
                    Ok(())
                }
                Err(e) => Err(Error::backend("native", format!("EvtNext failed: {e}"))),
            }
        }
    }

    impl Iterator for NativeFragments {
        type Item = Result<String>;

        fn next(&mut self) -> Option<Self::Item> {
            if self.failed {
                return None;
            }

            loop {
                if let Some(event) = self.pending.pop_front() {
                    let rendered = render_xml(&event);
                    drop(event);

                    if rendered.is_err() {
                        self.failed = true;
                        self.pending.clear();
                    }
                    return Some(rendered);
                }

                if self.exhausted {
                    return None;
                }

                if let Err(e) = self.fetch_batch() {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }

    fn render_xml(event: &EvtHandle) -> Result<String> {
        let mut used = 0u32;
        let mut properties = 0u32;

        let sizing = unsafe {
            EvtRender(
                EVT_HANDLE::default(),
                event.0,
                EvtRenderEventXml.0,
                0,
                None,
                &mut used,
                &mut properties,
            )
        };
        if let Err(e) = sizing {
            if e.code() != ERROR_INSUFFICIENT_BUFFER.to_hresult() {
                return Err(Error::backend("native", format!("EvtRender failed: {e}")));
            }
        }

        let mut buffer = vec![0u16; (used as usize).div_ceil(2)];
        unsafe {
            EvtRender(
                EVT_HANDLE::default(),
                event.0,
                EvtRenderEventXml.0,
                (buffer.len() * 2) as u32,
                Some(buffer.as_mut_ptr().cast()),
                &mut used,
                &mut properties,
            )
        }
        .map_err(|e| Error::backend("native", format!("EvtRender failed: {e}")))?;

        let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
        Ok(String::from_utf16_lossy(&buffer[..len]))
    }
}
