//! The render core entry point.
//!
//! A [`Renderer`] owns a backend, the GPU objects shared by all outputs on its
//! device (shaders, streaming buffer, target stack, texture pool) and one
//! [`OutputFramePipeline`] per output. Lifecycle changes are announced on its
//! [`EventBus`].

use crate::backend::{EventBus, OutputId, RenderBackend, RenderEvent};
use crate::config::RenderConfig;
use crate::error::{BackendError, FrameError, RenderError};
use crate::geometry::Region;
use crate::output::{FrameOutcome, OutputFramePipeline, RenderPass, RenderResources};
use crate::render_target::RenderTargetStack;
use crate::shader::ShaderManager;
use crate::texture_pool::TexturePool;
use crate::vertex::BufferManager;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub struct Renderer<B: RenderBackend> {
    config: RenderConfig,
    events: EventBus,
    pipelines: BTreeMap<OutputId, OutputFramePipeline>,
    // Everything below lives on the backend's device and is declared before
    // the backend so it drops first.
    shaders: ShaderManager,
    buffers: BufferManager,
    stack: RenderTargetStack,
    pool: TexturePool,
    backend: B,
}

impl<B: RenderBackend> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend.name())
            .field("outputs", &self.pipelines.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn make_current(backend: &mut dyn RenderBackend) -> Result<(), BackendError> {
    match backend.make_current() {
        Ok(()) | Err(BackendError::Unsupported(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B, config: RenderConfig) -> Result<Self, RenderError> {
        Self::with_events(backend, config, EventBus::new())
    }

    fn with_events(mut backend: B, config: RenderConfig, mut events: EventBus) -> Result<Self, RenderError> {
        config.validate()?;
        make_current(&mut backend)?;
        let device = backend.device();
        let shaders = ShaderManager::new(device.clone());
        let buffers = BufferManager::new(device.clone(), &config)?;
        let stack = RenderTargetStack::new(device.clone());
        let pool = backend.texture_pool();

        let renderer = device.info().renderer.clone();
        info!(target: "frame", "Renderer on backend {} ({})", backend.name(), renderer);
        events.publish(RenderEvent::DeviceAdded { renderer });

        let mut this = Self {
            config,
            events,
            pipelines: BTreeMap::new(),
            shaders,
            buffers,
            stack,
            pool,
            backend,
        };
        this.sync_outputs();
        Ok(this)
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Outputs added or removed through this must be followed by
    /// [`sync_outputs`](Self::sync_outputs).
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn events(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn texture_pool(&self) -> &TexturePool {
        &self.pool
    }

    pub fn pipeline(&self, output: OutputId) -> Option<&OutputFramePipeline> {
        self.pipelines.get(&output)
    }

    pub fn outputs(&self) -> Vec<OutputId> {
        self.pipelines.keys().copied().collect()
    }

    /// Creates pipelines for new backend outputs and drops those of vanished
    /// ones.
    pub fn sync_outputs(&mut self) {
        let current = self.backend.outputs();
        let removed: Vec<OutputId> = self
            .pipelines
            .keys()
            .copied()
            .filter(|id| !current.contains(id))
            .collect();
        for id in removed {
            self.pipelines.remove(&id);
            debug!(target: "frame", "Output {} removed", id);
            self.events.publish(RenderEvent::OutputRemoved(id));
        }
        for id in current {
            if self.pipelines.contains_key(&id) {
                continue;
            }
            self.pipelines
                .insert(id, OutputFramePipeline::new(id, &self.config));
            debug!(target: "frame", "Output {} added", id);
            self.events.publish(RenderEvent::OutputAdded(id));
        }
    }

    /// Renders one frame of `output`. `damage` is the scene damage since the
    /// output's previous frame, in output-local coordinates.
    pub fn render_output<F>(&mut self, output: OutputId, damage: &Region, draw: F) -> Result<FrameOutcome, FrameError>
    where
        F: FnOnce(&mut RenderPass<'_, '_>) -> Result<(), FrameError>,
    {
        let Some(pipeline) = self.pipelines.get_mut(&output) else {
            return Err(FrameError::UnknownOutput(output));
        };
        make_current(&mut self.backend)?;

        let mut resources = RenderResources {
            device: self.backend.device(),
            pool: &self.pool,
            shaders: &self.shaders,
            buffers: &mut self.buffers,
            stack: &mut self.stack,
        };
        let result = pipeline.render_frame(&mut self.backend, &mut resources, damage, draw);
        let sequence = pipeline.presented_frames();

        match &result {
            Ok(FrameOutcome::Presented) => {
                self.events.publish(RenderEvent::FramePresented { output, sequence });
            }
            Ok(FrameOutcome::RolledBack) => {
                self.events.publish(RenderEvent::FrameRolledBack { output });
            }
            Err(FrameError::ContextLost) => self.handle_context_lost(),
            Err(_) => {}
        }
        result
    }

    /// Forgets the damage history of every output and announces the loss.
    pub fn handle_context_lost(&mut self) {
        warn!(target: "frame", "Rendering context lost; every output repaints fully");
        for pipeline in self.pipelines.values_mut() {
            pipeline.invalidate_history();
        }
        self.events.publish(RenderEvent::ContextLost);
    }

    /// Replaces the backend. Every GPU object of the old device is released
    /// first; outputs of the new backend start without damage history.
    pub fn swap_backend<N: RenderBackend>(self, backend: N) -> Result<Renderer<N>, RenderError> {
        let Renderer {
            config,
            mut events,
            pipelines,
            shaders,
            buffers,
            stack,
            pool,
            backend: old,
        } = self;

        for (id, mut pipeline) in pipelines {
            pipeline.release_resources();
            drop(pipeline);
            events.publish(RenderEvent::OutputRemoved(id));
        }
        drop(shaders);
        drop(buffers);
        drop(stack);
        drop(pool);
        let renderer = old.device().info().renderer.clone();
        info!(target: "frame", "Switching backend {} -> {}", old.name(), backend.name());
        drop(old);
        events.publish(RenderEvent::DeviceRemoved { renderer });

        Renderer::with_events(backend, config, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RenderEventKind, SoftwareBackend};
    use crate::geometry::{Rect, Size};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn backend_with_output(id: OutputId) -> SoftwareBackend {
        let mut backend = SoftwareBackend::new(&RenderConfig::default());
        backend.add_output(id, Size::new(32, 32)).unwrap();
        backend
    }

    fn record(renderer: &mut Renderer<impl RenderBackend>, kinds: &[RenderEventKind]) -> Rc<RefCell<Vec<RenderEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in kinds {
            let sink = log.clone();
            renderer
                .events()
                .subscribe(*kind, move |event| sink.borrow_mut().push(event.clone()));
        }
        log
    }

    #[test]
    fn frames_are_announced() {
        let mut renderer = Renderer::new(backend_with_output(1), RenderConfig::default()).unwrap();
        let log = record(&mut renderer, &[RenderEventKind::FramePresented, RenderEventKind::FrameRolledBack]);

        let damage = Region::from_rect(Rect::new(0, 0, 4, 4));
        renderer
            .render_output(1, &damage, |pass| {
                pass.clear([0.0, 0.0, 0.0, 1.0]);
                Ok(())
            })
            .unwrap();
        renderer.render_output(1, &Region::new(), |_| Ok(())).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                RenderEvent::FramePresented { output: 1, sequence: 1 },
                RenderEvent::FrameRolledBack { output: 1 },
            ]
        );
    }

    #[test]
    fn outputs_follow_the_backend() {
        let mut renderer = Renderer::new(backend_with_output(1), RenderConfig::default()).unwrap();
        let log = record(&mut renderer, &[RenderEventKind::OutputAdded, RenderEventKind::OutputRemoved]);

        renderer.backend_mut().add_output(2, Size::new(8, 8)).unwrap();
        renderer.backend_mut().remove_output(1);
        renderer.sync_outputs();

        assert_eq!(renderer.outputs(), vec![2]);
        assert_eq!(
            *log.borrow(),
            vec![RenderEvent::OutputRemoved(1), RenderEvent::OutputAdded(2)]
        );
        assert_eq!(
            renderer.render_output(1, &Region::new(), |_| Ok(())),
            Err(FrameError::UnknownOutput(1))
        );
    }

    #[test]
    fn context_loss_resets_every_output() {
        let mut backend = backend_with_output(1);
        backend.add_output(2, Size::new(16, 16)).unwrap();
        let device = backend.software_device().clone();
        let mut renderer = Renderer::new(backend, RenderConfig::default()).unwrap();
        let log = record(&mut renderer, &[RenderEventKind::ContextLost]);

        for id in [1, 2] {
            let damage = Region::from_rect(Rect::new(0, 0, 2, 2));
            renderer.render_output(id, &damage, |_| Ok(())).unwrap();
        }
        device.set_context_lost(true);
        let err = renderer.render_output(1, &Region::new(), |_| Ok(())).unwrap_err();
        assert_eq!(err, FrameError::ContextLost);
        assert_eq!(*log.borrow(), vec![RenderEvent::ContextLost]);
        for id in [1, 2] {
            assert!(renderer.pipeline(id).unwrap().history().is_empty());
        }
    }

    #[test]
    fn swapping_backends_releases_the_old_device() {
        let old = backend_with_output(1);
        let old_device = old.software_device().clone();
        let mut renderer = Renderer::new(old, RenderConfig::default()).unwrap();
        let log = record(
            &mut renderer,
            &[RenderEventKind::DeviceRemoved, RenderEventKind::DeviceAdded, RenderEventKind::OutputAdded],
        );
        renderer
            .render_output(1, &Region::from_rect(Rect::new(0, 0, 8, 8)), |pass| {
                pass.fill_rect(Rect::new(0, 0, 8, 8), [1.0; 4])
            })
            .unwrap();

        let renderer = renderer.swap_backend(backend_with_output(7)).unwrap();
        assert_eq!(renderer.outputs(), vec![7]);
        assert!(renderer.pipeline(7).unwrap().history().is_empty());
        assert_eq!(old_device.live_texture_count(), 0);
        assert_eq!(old_device.live_framebuffer_count(), 0);

        let log = log.borrow();
        assert!(matches!(log[0], RenderEvent::DeviceRemoved { .. }));
        assert!(matches!(log[1], RenderEvent::DeviceAdded { .. }));
        assert_eq!(log[2], RenderEvent::OutputAdded(7));
    }
}
