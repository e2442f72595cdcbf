//! Context negotiation against simulated EGL drivers.

use novade_render_core::context::{
    negotiate, CandidateList, ContextApi, ContextAttributes, ContextCreator, ContextRequest, EXT_CONTEXT_PRIORITY,
    EXT_CONTEXT_ROBUSTNESS, EXT_CREATE_CONTEXT, EXT_VIDEO_MEMORY_PURGE,
};
use novade_render_core::ContextError;
use pretty_assertions::assert_eq;
use std::collections::HashSet;

const EXTENSIONS: [&str; 4] = [
    EXT_CREATE_CONTEXT,
    EXT_CONTEXT_ROBUSTNESS,
    EXT_CONTEXT_PRIORITY,
    EXT_VIDEO_MEMORY_PURGE,
];

fn subset(mask: usize) -> HashSet<String> {
    EXTENSIONS
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, name)| name.to_string())
        .collect()
}

fn requests() -> [ContextRequest; 4] {
    [
        ContextRequest::gles(),
        ContextRequest::gles().with_version(3, 1),
        ContextRequest::desktop(true),
        ContextRequest::desktop(false),
    ]
}

/// A driver advertising every extension but refusing some attribute sets.
struct Driver<F> {
    accepts: F,
    attempts: Vec<ContextAttributes>,
}

impl<F: Fn(&ContextAttributes) -> bool> ContextCreator for Driver<F> {
    type Context = ContextAttributes;

    fn try_create(&mut self, attributes: &ContextAttributes) -> Result<ContextAttributes, ContextError> {
        self.attempts.push(*attributes);
        if (self.accepts)(attributes) {
            Ok(*attributes)
        } else {
            Err(ContextError::CandidateRejected("EGL_BAD_ATTRIBUTE".to_string()))
        }
    }
}

#[test]
fn candidates_only_use_advertised_extensions() {
    for mask in 0..1 << EXTENSIONS.len() {
        let extensions = subset(mask);
        for request in requests() {
            let list = CandidateList::build(&request, &extensions);
            assert!(!list.is_empty());
            for candidate in list.candidates() {
                for required in candidate.required_extensions() {
                    assert!(
                        extensions.contains(required),
                        "{} needs {} which is not advertised ({:?})",
                        candidate,
                        required,
                        extensions
                    );
                }
            }

            let last = list.candidates()[list.len() - 1];
            assert!(!last.robust && !last.high_priority && !last.core_profile);
            assert_eq!(last.api, request.api);
        }
    }
}

#[test]
fn no_robust_candidate_without_the_robustness_extension() {
    let extensions = subset(0b1101);
    for request in requests() {
        let list = CandidateList::build(&request, &extensions);
        assert!(list.candidates().iter().all(|c| !c.robust && !c.reset_on_video_memory_purge));
    }
}

#[test]
fn candidates_are_ranked_by_capability() {
    let list = CandidateList::build(&ContextRequest::desktop(true), &subset(0b1111));
    let names: Vec<String> = list.candidates().iter().map(ToString::to_string).collect();
    assert_eq!(
        names,
        vec![
            "GL 3.1 core robust high-priority",
            "GL 3.1 core robust",
            "GL 3.1 core high-priority",
            "GL 3.1 core",
            "GL robust high-priority",
            "GL robust",
            "GL high-priority",
            "GL",
        ]
    );
    assert!(list.candidates()[..2].iter().all(|c| c.reset_on_video_memory_purge));
}

#[test]
fn falls_back_past_rejected_attribute_sets() -> anyhow::Result<()> {
    let list = CandidateList::build(&ContextRequest::gles(), &subset(0b1111));
    let mut driver = Driver {
        accepts: |c: &ContextAttributes| !c.robust,
        attempts: Vec::new(),
    };

    let (context, chosen) = negotiate(&mut driver, &list)?;
    assert_eq!(context, chosen);
    assert!(!chosen.robust && chosen.high_priority);
    assert_eq!(chosen.api, ContextApi::OpenGlEs);
    assert_eq!(driver.attempts.len(), 3);
    assert_eq!(driver.attempts, list.candidates()[..3].to_vec());
    Ok(())
}

#[test]
fn exhausted_candidates_are_reported() {
    let list = CandidateList::build(&ContextRequest::desktop(true), &subset(0b0111));
    let mut driver = Driver {
        accepts: |_: &ContextAttributes| false,
        attempts: Vec::new(),
    };

    assert_eq!(
        negotiate(&mut driver, &list),
        Err(ContextError::Exhausted { attempts: list.len() })
    );
    assert_eq!(driver.attempts.len(), list.len());
}

#[test]
fn requested_version_reaches_the_attribute_list() {
    let request = ContextRequest::gles().with_version(3, 2);
    let list = CandidateList::build(&request, &subset(0b0001));
    let names: Vec<String> = list.candidates().iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["GLES 3.2"]);
    assert_eq!(list.candidates()[0].to_egl_attribs(), vec![0x3098, 3, 0x30FB, 2, 0x3038]);

    // Only the major version is expressible without EGL_KHR_create_context.
    let list = CandidateList::build(&request, &subset(0b0000));
    assert_eq!(list.candidates()[0].version, Some((3, 0)));
    assert_eq!(list.candidates()[0].to_egl_attribs(), vec![0x3098, 3, 0x3038]);

    let list = CandidateList::build(&ContextRequest::desktop(true).with_version(4, 5), &subset(0b0001));
    let names: Vec<String> = list.candidates().iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["GL 4.5 core", "GL"]);
}
