//! Rendering context negotiation.
//!
//! A [`ContextRequest`] plus the platform's extension set produce a ranked,
//! immutable [`CandidateList`]: most capable first (robust + high priority),
//! then robust only, then priority only, then the bare minimum. Candidates
//! whose prerequisite extensions are missing are never emitted. Creation is
//! attempted strictly in rank order through a [`ContextCreator`]; the first
//! success wins and exhaustion is a hard error.

#[cfg(feature = "backend_egl")]
pub mod egl;

use crate::error::ContextError;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

pub const EXT_CREATE_CONTEXT: &str = "EGL_KHR_create_context";
pub const EXT_CONTEXT_ROBUSTNESS: &str = "EGL_EXT_create_context_robustness";
pub const EXT_CONTEXT_PRIORITY: &str = "EGL_IMG_context_priority";
pub const EXT_VIDEO_MEMORY_PURGE: &str = "EGL_NV_robustness_video_memory_purge";

// EGL attribute names and values used in context attribute lists.
const EGL_NONE: i32 = 0x3038;
const EGL_TRUE: i32 = 1;
const EGL_CONTEXT_CLIENT_VERSION: i32 = 0x3098;
const EGL_CONTEXT_MAJOR_VERSION_KHR: i32 = 0x3098;
const EGL_CONTEXT_MINOR_VERSION_KHR: i32 = 0x30FB;
const EGL_CONTEXT_FLAGS_KHR: i32 = 0x30FC;
const EGL_CONTEXT_OPENGL_PROFILE_MASK_KHR: i32 = 0x30FD;
const EGL_CONTEXT_OPENGL_CORE_PROFILE_BIT_KHR: i32 = 0x1;
const EGL_CONTEXT_OPENGL_ROBUST_ACCESS_BIT_KHR: i32 = 0x4;
const EGL_CONTEXT_OPENGL_RESET_NOTIFICATION_STRATEGY_KHR: i32 = 0x31BD;
const EGL_CONTEXT_OPENGL_ROBUST_ACCESS_EXT: i32 = 0x30BF;
const EGL_CONTEXT_OPENGL_RESET_NOTIFICATION_STRATEGY_EXT: i32 = 0x3138;
const EGL_LOSE_CONTEXT_ON_RESET: i32 = 0x31BF;
const EGL_CONTEXT_PRIORITY_LEVEL_IMG: i32 = 0x3100;
const EGL_CONTEXT_PRIORITY_HIGH_IMG: i32 = 0x3101;
const EGL_GENERATE_RESET_ON_VIDEO_MEMORY_PURGE_NV: i32 = 0x334C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextApi {
    OpenGlEs,
    OpenGl,
}

/// Colour and depth bits of the surfaces the context renders to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceFormat {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
    pub depth: u8,
}

impl Default for SurfaceFormat {
    fn default() -> Self {
        Self {
            red: 8,
            green: 8,
            blue: 8,
            alpha: 8,
            depth: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextRequest {
    pub api: ContextApi,
    pub format: SurfaceFormat,
    /// Lowest `(major, minor)` version asked for. For desktop GL this is the
    /// version of the core profile; legacy contexts leave it to the driver.
    pub version: (u32, u32),
    /// Desktop GL only: try a core profile before legacy contexts.
    pub prefer_core_profile: bool,
}

impl ContextRequest {
    /// OpenGL ES 2.0.
    pub fn gles() -> Self {
        Self {
            api: ContextApi::OpenGlEs,
            format: SurfaceFormat::default(),
            version: (2, 0),
            prefer_core_profile: false,
        }
    }

    /// Desktop GL, trying a 3.1 core profile first when asked to.
    pub fn desktop(prefer_core_profile: bool) -> Self {
        Self {
            api: ContextApi::OpenGl,
            format: SurfaceFormat::default(),
            version: (3, 1),
            prefer_core_profile,
        }
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = (major, minor);
        self
    }
}

/// One attribute set to try at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAttributes {
    pub api: ContextApi,
    /// `None` leaves the version to the driver.
    pub version: Option<(u32, u32)>,
    pub core_profile: bool,
    pub robust: bool,
    pub high_priority: bool,
    pub reset_on_video_memory_purge: bool,
}

impl ContextAttributes {
    fn new(api: ContextApi, version: Option<(u32, u32)>, core_profile: bool) -> Self {
        Self {
            api,
            version,
            core_profile,
            robust: false,
            high_priority: false,
            reset_on_video_memory_purge: false,
        }
    }

    fn robust(mut self, purge: bool) -> Self {
        self.robust = true;
        self.reset_on_video_memory_purge = purge;
        self
    }

    fn high_priority(mut self) -> Self {
        self.high_priority = true;
        self
    }

    /// Platform extensions this attribute set cannot be expressed without.
    pub fn required_extensions(&self) -> Vec<&'static str> {
        let mut required = Vec::new();
        let desktop = self.api == ContextApi::OpenGl;
        let gles_minor = !desktop && self.version.is_some_and(|(_, minor)| minor != 0);
        if (desktop && (self.core_profile || self.robust)) || gles_minor {
            required.push(EXT_CREATE_CONTEXT);
        }
        if self.robust {
            required.push(EXT_CONTEXT_ROBUSTNESS);
        }
        if self.high_priority {
            required.push(EXT_CONTEXT_PRIORITY);
        }
        if self.reset_on_video_memory_purge {
            required.push(EXT_VIDEO_MEMORY_PURGE);
        }
        required
    }

    /// The `EGL_NONE` terminated attribute list for `eglCreateContext`.
    pub fn to_egl_attribs(&self) -> Vec<i32> {
        let mut attribs = Vec::with_capacity(16);
        match self.api {
            ContextApi::OpenGlEs => {
                let (major, minor) = self.version.unwrap_or((2, 0));
                attribs.extend([EGL_CONTEXT_CLIENT_VERSION, major as i32]);
                if minor != 0 {
                    attribs.extend([EGL_CONTEXT_MINOR_VERSION_KHR, minor as i32]);
                }
                if self.robust {
                    attribs.extend([
                        EGL_CONTEXT_OPENGL_ROBUST_ACCESS_EXT,
                        EGL_TRUE,
                        EGL_CONTEXT_OPENGL_RESET_NOTIFICATION_STRATEGY_EXT,
                        EGL_LOSE_CONTEXT_ON_RESET,
                    ]);
                }
            }
            ContextApi::OpenGl => {
                if let Some((major, minor)) = self.version {
                    attribs.extend([
                        EGL_CONTEXT_MAJOR_VERSION_KHR,
                        major as i32,
                        EGL_CONTEXT_MINOR_VERSION_KHR,
                        minor as i32,
                    ]);
                }
                if self.core_profile {
                    attribs.extend([
                        EGL_CONTEXT_OPENGL_PROFILE_MASK_KHR,
                        EGL_CONTEXT_OPENGL_CORE_PROFILE_BIT_KHR,
                    ]);
                }
                if self.robust {
                    attribs.extend([
                        EGL_CONTEXT_FLAGS_KHR,
                        EGL_CONTEXT_OPENGL_ROBUST_ACCESS_BIT_KHR,
                        EGL_CONTEXT_OPENGL_RESET_NOTIFICATION_STRATEGY_KHR,
                        EGL_LOSE_CONTEXT_ON_RESET,
                    ]);
                }
            }
        }
        if self.reset_on_video_memory_purge {
            attribs.extend([EGL_GENERATE_RESET_ON_VIDEO_MEMORY_PURGE_NV, EGL_TRUE]);
        }
        if self.high_priority {
            attribs.extend([EGL_CONTEXT_PRIORITY_LEVEL_IMG, EGL_CONTEXT_PRIORITY_HIGH_IMG]);
        }
        attribs.push(EGL_NONE);
        attribs
    }
}

impl fmt::Display for ContextAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.api {
            ContextApi::OpenGlEs => write!(f, "GLES")?,
            ContextApi::OpenGl => write!(f, "GL")?,
        }
        if let Some((major, minor)) = self.version {
            write!(f, " {}.{}", major, minor)?;
        }
        if self.core_profile {
            write!(f, " core")?;
        }
        if self.robust {
            write!(f, " robust")?;
        }
        if self.high_priority {
            write!(f, " high-priority")?;
        }
        Ok(())
    }
}

/// The ranked candidates for one request; fixed once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList {
    candidates: Box<[ContextAttributes]>,
}

impl CandidateList {
    /// Ranks attribute sets for `request` given the platform's extensions.
    pub fn build(request: &ContextRequest, extensions: &HashSet<String>) -> Self {
        let has = |name: &str| extensions.contains(name);
        let robustness = has(EXT_CONTEXT_ROBUSTNESS);
        let priority = has(EXT_CONTEXT_PRIORITY);
        let create_context = has(EXT_CREATE_CONTEXT);
        let purge = has(EXT_VIDEO_MEMORY_PURGE);

        let mut candidates = Vec::new();
        let mut ladder = |base: ContextAttributes, robust_allowed: bool| {
            if robust_allowed && priority {
                candidates.push(base.robust(purge).high_priority());
            }
            if robust_allowed {
                candidates.push(base.robust(purge));
            }
            if priority {
                candidates.push(base.high_priority());
            }
            candidates.push(base);
        };

        match request.api {
            ContextApi::OpenGlEs => {
                let (major, minor) = request.version;
                // A minor version can only be asked for through EGL_KHR_create_context.
                let version = if minor != 0 && !create_context {
                    warn!(
                        target: "egl",
                        "{} missing; requesting GLES {}.0 instead of {}.{}",
                        EXT_CREATE_CONTEXT, major, major, minor
                    );
                    (major, 0)
                } else {
                    (major, minor)
                };
                ladder(
                    ContextAttributes::new(ContextApi::OpenGlEs, Some(version), false),
                    robustness,
                );
            }
            ContextApi::OpenGl => {
                if request.prefer_core_profile && create_context {
                    ladder(
                        ContextAttributes::new(ContextApi::OpenGl, Some(request.version), true),
                        robustness,
                    );
                }
                ladder(
                    ContextAttributes::new(ContextApi::OpenGl, None, false),
                    robustness && create_context,
                );
            }
        }

        debug_assert!(candidates
            .iter()
            .all(|c| c.required_extensions().iter().all(|e| has(*e))));
        Self {
            candidates: candidates.into_boxed_slice(),
        }
    }

    pub fn candidates(&self) -> &[ContextAttributes] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Platform hook that tries to create a context from one attribute set.
pub trait ContextCreator {
    type Context;

    fn try_create(&mut self, attributes: &ContextAttributes) -> Result<Self::Context, ContextError>;
}

/// Tries every candidate in rank order and returns the first context created.
pub fn negotiate<C: ContextCreator>(
    creator: &mut C,
    candidates: &CandidateList,
) -> Result<(C::Context, ContextAttributes), ContextError> {
    for (rank, attributes) in candidates.candidates().iter().enumerate() {
        debug!(target: "egl", "Trying context candidate {}: {}", rank, attributes);
        match creator.try_create(attributes) {
            Ok(context) => {
                info!(target: "egl", "Created rendering context: {}", attributes);
                return Ok((context, *attributes));
            }
            Err(e) => warn!(target: "egl", "Context candidate {} ({}) rejected: {}", rank, attributes, e),
        }
    }
    Err(ContextError::Exhausted {
        attempts: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extensions(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    const ALL: &[&str] = &[
        EXT_CREATE_CONTEXT,
        EXT_CONTEXT_ROBUSTNESS,
        EXT_CONTEXT_PRIORITY,
    ];

    #[test]
    fn gles_ladder_is_ranked_most_capable_first() {
        let list = CandidateList::build(&ContextRequest::gles(), &extensions(ALL));
        let flags: Vec<(bool, bool)> = list.candidates().iter().map(|c| (c.robust, c.high_priority)).collect();
        assert_eq!(flags, vec![(true, true), (true, false), (false, true), (false, false)]);
        assert!(list.candidates().iter().all(|c| c.version == Some((2, 0))));
    }

    #[test]
    fn desktop_tries_core_profile_before_legacy() {
        let list = CandidateList::build(&ContextRequest::desktop(true), &extensions(ALL));
        assert_eq!(list.len(), 8);
        assert!(list.candidates()[..4].iter().all(|c| c.core_profile && c.version == Some((3, 1))));
        assert!(list.candidates()[4..].iter().all(|c| !c.core_profile && c.version.is_none()));

        let legacy_only = CandidateList::build(&ContextRequest::desktop(false), &extensions(ALL));
        assert_eq!(legacy_only.len(), 4);
    }

    #[test]
    fn missing_create_context_drops_core_and_desktop_robustness() {
        let list = CandidateList::build(
            &ContextRequest::desktop(true),
            &extensions(&[EXT_CONTEXT_ROBUSTNESS, EXT_CONTEXT_PRIORITY]),
        );
        let flags: Vec<(bool, bool, bool)> = list
            .candidates()
            .iter()
            .map(|c| (c.core_profile, c.robust, c.high_priority))
            .collect();
        assert_eq!(flags, vec![(false, false, true), (false, false, false)]);
    }

    #[test]
    fn attribute_lists_are_terminated_and_complete() {
        let list = CandidateList::build(
            &ContextRequest::gles(),
            &extensions(&[EXT_CONTEXT_ROBUSTNESS, EXT_CONTEXT_PRIORITY, EXT_VIDEO_MEMORY_PURGE]),
        );
        assert_eq!(
            list.candidates()[0].to_egl_attribs(),
            vec![
                0x3098, 2, 0x30BF, 1, 0x3138, 0x31BF, 0x334C, 1, 0x3100, 0x3101, 0x3038
            ]
        );
        assert_eq!(list.candidates()[3].to_egl_attribs(), vec![0x3098, 2, 0x3038]);

        let desktop = CandidateList::build(&ContextRequest::desktop(true), &extensions(ALL));
        assert_eq!(
            desktop.candidates()[1].to_egl_attribs(),
            vec![0x3098, 3, 0x30FB, 1, 0x30FD, 1, 0x30FC, 0x4, 0x31BD, 0x31BF, 0x3038]
        );
    }

    struct Scripted {
        accept_from: usize,
        tried: Vec<ContextAttributes>,
    }

    impl ContextCreator for Scripted {
        type Context = usize;

        fn try_create(&mut self, attributes: &ContextAttributes) -> Result<usize, ContextError> {
            self.tried.push(*attributes);
            if self.tried.len() > self.accept_from {
                Ok(self.tried.len() - 1)
            } else {
                Err(ContextError::CandidateRejected("EGL_BAD_MATCH".to_string()))
            }
        }
    }

    #[test]
    fn negotiation_walks_candidates_in_order() {
        let list = CandidateList::build(&ContextRequest::gles(), &extensions(ALL));
        let mut creator = Scripted {
            accept_from: 2,
            tried: Vec::new(),
        };
        let (rank, chosen) = negotiate(&mut creator, &list).unwrap();
        assert_eq!(rank, 2);
        assert_eq!(chosen, list.candidates()[2]);
        assert_eq!(creator.tried, list.candidates()[..3].to_vec());
    }

    #[test]
    fn exhaustion_is_reported() {
        let list = CandidateList::build(&ContextRequest::gles(), &HashSet::new());
        let mut creator = Scripted {
            accept_from: usize::MAX,
            tried: Vec::new(),
        };
        assert_eq!(
            negotiate(&mut creator, &list),
            Err(ContextError::Exhausted { attempts: 1 })
        );
    }
}
