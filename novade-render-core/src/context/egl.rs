//! EGL implementation of context negotiation.
//!
//! libEGL is loaded at runtime. The context is made current without a window
//! surface: through `EGL_KHR_surfaceless_context` when available, otherwise on
//! a 1x1 pbuffer.

use super::{negotiate, CandidateList, ContextApi, ContextAttributes, ContextCreator, ContextRequest, SurfaceFormat};
use crate::error::ContextError;
use khronos_egl as egl;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, info, warn};

const EXT_SURFACELESS_CONTEXT: &str = "EGL_KHR_surfaceless_context";

type Instance = egl::DynamicInstance<egl::EGL1_4>;

struct DisplayInner {
    egl: Instance,
    display: egl::Display,
    version: (i32, i32),
    extensions: HashSet<String>,
}

impl Drop for DisplayInner {
    fn drop(&mut self) {
        if let Err(e) = self.egl.terminate(self.display) {
            warn!(target: "egl", "eglTerminate failed: {}", e);
        }
    }
}

/// An initialized EGL display. Cheap to clone.
#[derive(Clone)]
pub struct EglDisplay {
    inner: Rc<DisplayInner>,
}

impl std::fmt::Debug for EglDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EglDisplay")
            .field("version", &self.inner.version)
            .field("extensions", &self.inner.extensions.len())
            .finish()
    }
}

impl EglDisplay {
    /// Loads libEGL and initializes the platform's default display.
    pub fn open_default() -> Result<Self, ContextError> {
        // SAFETY: the default display needs no native handle.
        unsafe { Self::open(egl::DEFAULT_DISPLAY) }
    }

    /// Loads libEGL and initializes the display of `native`.
    ///
    /// # Safety
    ///
    /// `native` must be a valid native display handle (or
    /// `EGL_DEFAULT_DISPLAY`) that outlives the returned display.
    pub unsafe fn open(native: egl::NativeDisplayType) -> Result<Self, ContextError> {
        let instance = Instance::load_required()
            .map_err(|e| ContextError::NoDisplay(format!("loading libEGL: {}", e)))?;
        let display = instance
            .get_display(native)
            .ok_or_else(|| ContextError::NoDisplay("eglGetDisplay returned no display".to_string()))?;
        let version = instance
            .initialize(display)
            .map_err(|e| ContextError::NoDisplay(format!("eglInitialize: {}", e)))?;

        let extensions: HashSet<String> = match instance.query_string(Some(display), egl::EXTENSIONS) {
            Ok(list) => list
                .to_string_lossy()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!(target: "egl", "Querying EGL extensions failed: {}", e);
                HashSet::new()
            }
        };
        let vendor = instance
            .query_string(Some(display), egl::VENDOR)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(target: "egl", "EGL {}.{} ({}), {} extensions", version.0, version.1, vendor, extensions.len());

        Ok(Self {
            inner: Rc::new(DisplayInner {
                egl: instance,
                display,
                version,
                extensions,
            }),
        })
    }

    pub fn version(&self) -> (i32, i32) {
        self.inner.version
    }

    pub fn extensions(&self) -> &HashSet<String> {
        &self.inner.extensions
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.inner.extensions.contains(name)
    }

    fn choose_config(&self, api: ContextApi, format: SurfaceFormat) -> Result<egl::Config, ContextError> {
        let renderable = match api {
            ContextApi::OpenGlEs => egl::OPENGL_ES2_BIT,
            ContextApi::OpenGl => egl::OPENGL_BIT,
        };
        let attribs = [
            egl::SURFACE_TYPE,
            egl::PBUFFER_BIT,
            egl::RENDERABLE_TYPE,
            renderable,
            egl::RED_SIZE,
            format.red as i32,
            egl::GREEN_SIZE,
            format.green as i32,
            egl::BLUE_SIZE,
            format.blue as i32,
            egl::ALPHA_SIZE,
            format.alpha as i32,
            egl::DEPTH_SIZE,
            format.depth as i32,
            egl::NONE,
        ];
        self.inner
            .egl
            .choose_first_config(self.inner.display, &attribs)
            .map_err(|e| {
                warn!(target: "egl", "eglChooseConfig: {}", e);
                ContextError::NoConfig
            })?
            .ok_or(ContextError::NoConfig)
    }

    /// Negotiates a context for `request`, makes it current and loads GL.
    pub fn create_context(&self, request: &ContextRequest) -> Result<EglContext, ContextError> {
        let config = self.choose_config(request.api, request.format)?;
        let candidates = CandidateList::build(request, &self.inner.extensions);
        let mut creator = EglCreator { display: self, config };
        let (context, attributes) = negotiate(&mut creator, &candidates)?;

        let egl = &self.inner.egl;
        let surface = if self.has_extension(EXT_SURFACELESS_CONTEXT) {
            None
        } else {
            let attribs = [egl::WIDTH, 1, egl::HEIGHT, 1, egl::NONE];
            match egl.create_pbuffer_surface(self.inner.display, config, &attribs) {
                Ok(surface) => Some(surface),
                Err(e) => {
                    let _ = egl.destroy_context(self.inner.display, context);
                    return Err(ContextError::MakeCurrent(format!("eglCreatePbufferSurface: {}", e)));
                }
            }
        };

        if let Err(e) = egl.make_current(self.inner.display, surface, surface, Some(context)) {
            if let Some(surface) = surface {
                let _ = egl.destroy_surface(self.inner.display, surface);
            }
            let _ = egl.destroy_context(self.inner.display, context);
            return Err(ContextError::MakeCurrent(e.to_string()));
        }

        // SAFETY: the context is current on this thread.
        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                egl.get_proc_address(name)
                    .map_or(std::ptr::null(), |f| f as *const std::ffi::c_void)
            })
        };
        debug!(target: "egl", "Loaded GL entry points for {}", attributes);
        Ok(EglContext {
            display: self.clone(),
            context,
            surface,
            attributes,
            gl: Rc::new(gl),
        })
    }
}

struct EglCreator<'a> {
    display: &'a EglDisplay,
    config: egl::Config,
}

impl ContextCreator for EglCreator<'_> {
    type Context = egl::Context;

    fn try_create(&mut self, attributes: &ContextAttributes) -> Result<egl::Context, ContextError> {
        let inner = &self.display.inner;
        let api = match attributes.api {
            ContextApi::OpenGlEs => egl::OPENGL_ES_API,
            ContextApi::OpenGl => egl::OPENGL_API,
        };
        inner
            .egl
            .bind_api(api)
            .map_err(|e| ContextError::CandidateRejected(format!("eglBindAPI: {}", e)))?;
        inner
            .egl
            .create_context(inner.display, self.config, None, &attributes.to_egl_attribs())
            .map_err(|e| ContextError::CandidateRejected(format!("eglCreateContext: {}", e)))
    }
}

/// A negotiated EGL context together with the GL functions loaded for it.
pub struct EglContext {
    display: EglDisplay,
    context: egl::Context,
    surface: Option<egl::Surface>,
    attributes: ContextAttributes,
    gl: Rc<glow::Context>,
}

impl std::fmt::Debug for EglContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EglContext")
            .field("attributes", &self.attributes)
            .field("surfaceless", &self.surface.is_none())
            .finish()
    }
}

impl EglContext {
    pub fn display(&self) -> &EglDisplay {
        &self.display
    }

    /// The attribute set the context was created with.
    pub fn attributes(&self) -> &ContextAttributes {
        &self.attributes
    }

    pub fn gl(&self) -> &Rc<glow::Context> {
        &self.gl
    }

    pub fn make_current(&self) -> Result<(), ContextError> {
        let inner = &self.display.inner;
        inner
            .egl
            .make_current(inner.display, self.surface, self.surface, Some(self.context))
            .map_err(|e| ContextError::MakeCurrent(e.to_string()))
    }

    pub fn done_current(&self) -> Result<(), ContextError> {
        let inner = &self.display.inner;
        inner
            .egl
            .make_current(inner.display, None, None, None)
            .map_err(|e| ContextError::MakeCurrent(e.to_string()))
    }

    pub fn is_current(&self) -> bool {
        self.display.inner.egl.get_current_context() == Some(self.context)
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        let inner = &self.display.inner;
        if self.is_current() {
            let _ = inner.egl.make_current(inner.display, None, None, None);
        }
        if let Some(surface) = self.surface.take() {
            if let Err(e) = inner.egl.destroy_surface(inner.display, surface) {
                warn!(target: "egl", "eglDestroySurface failed: {}", e);
            }
        }
        if let Err(e) = inner.egl.destroy_context(inner.display, self.context) {
            warn!(target: "egl", "eglDestroyContext failed: {}", e);
        }
    }
}
