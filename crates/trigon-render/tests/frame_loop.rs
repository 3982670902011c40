// SPDX-License-Identifier: CEPL-1.0
//! Drives `FramePresenter` against a backend that models fences, semaphores and
//! swapchain generations in plain memory.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use trigon_render::{
    DropReason, FrameError, FrameOutcome, FramePresenter, PresentBackend, RenderSize, SwapStatus,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fence {
    Signaled,
    Unsignaled,
    /// Submitted work not yet observed complete.
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Reset(usize),
    Acquire(usize),
    Discard(usize),
    Submit {
        slot: usize,
        image: u32,
        generation: u32,
    },
    Present(usize, u32),
    Idle,
    Rebuild(RenderSize),
}

#[derive(Clone, Debug)]
struct Generation {
    id: u32,
    extent: RenderSize,
    images: u32,
    views: u32,
    framebuffers: Vec<RenderSize>,
    command_buffers: usize,
}

impl Generation {
    fn build(id: u32, extent: RenderSize, min_image_count: u32) -> Self {
        let framebuffers = vec![extent; min_image_count as usize];
        Generation {
            id,
            extent,
            images: min_image_count,
            views: min_image_count,
            command_buffers: framebuffers.len(),
            framebuffers,
        }
    }
}

struct MockBackend {
    fences: Vec<Fence>,
    image_available: Vec<bool>,
    calls: Vec<Call>,
    surface: RenderSize,
    min_image_count: u32,
    generation: Generation,
    retired: Vec<u32>,
    next_image: u32,
    acquire_script: VecDeque<SwapStatus<()>>,
    present_script: VecDeque<Result<SwapStatus<()>, String>>,
    fail_wait_on: Option<usize>,
    max_in_flight: usize,
    /// Shared so it can still be read after the presenter consumes the backend.
    idles: Rc<Cell<usize>>,
}

impl MockBackend {
    fn new(slots: usize, surface: RenderSize) -> Self {
        MockBackend {
            fences: vec![Fence::Signaled; slots],
            image_available: vec![false; slots],
            calls: Vec::new(),
            surface,
            min_image_count: 3,
            generation: Generation::build(0, surface, 3),
            retired: Vec::new(),
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fail_wait_on: None,
            max_in_flight: 0,
            idles: Rc::new(Cell::new(0)),
        }
    }

    fn in_flight(&self) -> usize {
        self.fences.iter().filter(|f| **f != Fence::Signaled).count()
    }

    fn submissions(&self) -> Vec<(usize, u32, u32)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit {
                    slot,
                    image,
                    generation,
                } => Some((*slot, *image, *generation)),
                _ => None,
            })
            .collect()
    }
}

impl PresentBackend for MockBackend {
    fn frame_slots(&self) -> usize {
        self.fences.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        self.calls.push(Call::Wait(slot));
        if self.fail_wait_on == Some(slot) {
            return Err(FrameError::DeviceLost);
        }
        match self.fences[slot] {
            // The GPU finishes exactly the one submission that used this slot.
            Fence::Pending | Fence::Signaled => {
                self.fences[slot] = Fence::Signaled;
                Ok(())
            }
            Fence::Unsignaled => Err(FrameError::FenceWait {
                slot,
                reason: "reset fence with no submission would never signal".into(),
            }),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        self.calls.push(Call::Reset(slot));
        // A slot may only be reused once its previous submission has been waited on.
        if self.fences[slot] != Fence::Signaled {
            return Err(FrameError::FenceReset {
                slot,
                reason: "fence still in use".into(),
            });
        }
        self.fences[slot] = Fence::Unsignaled;
        self.max_in_flight = self.max_in_flight.max(self.in_flight());
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Result<SwapStatus<u32>, FrameError> {
        self.calls.push(Call::Acquire(slot));
        let status = self
            .acquire_script
            .pop_front()
            .unwrap_or(SwapStatus::Ready(()));
        if status == SwapStatus::OutOfDate {
            return Ok(SwapStatus::OutOfDate);
        }
        if self.image_available[slot] {
            return Err(FrameError::Acquire(
                "image-available semaphore already signaled".into(),
            ));
        }
        self.image_available[slot] = true;
        let image = self.next_image % self.generation.images;
        self.next_image += 1;
        Ok(match status {
            SwapStatus::Suboptimal(()) => SwapStatus::Suboptimal(image),
            _ => SwapStatus::Ready(image),
        })
    }

    fn discard_acquire(&mut self, slot: usize) -> Result<(), FrameError> {
        self.calls.push(Call::Discard(slot));
        if !std::mem::take(&mut self.image_available[slot]) {
            return Err(FrameError::Submit("discarding an unsignaled semaphore".into()));
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        self.calls.push(Call::Submit {
            slot,
            image,
            generation: self.generation.id,
        });
        if self.fences[slot] != Fence::Unsignaled {
            return Err(FrameError::Submit("fence not reset before submission".into()));
        }
        if !std::mem::take(&mut self.image_available[slot]) {
            return Err(FrameError::Submit("waiting on an unsignaled semaphore".into()));
        }
        if image as usize >= self.generation.command_buffers {
            return Err(FrameError::Submit(format!("no command buffer for image {image}")));
        }
        self.fences[slot] = Fence::Pending;
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<SwapStatus<()>, FrameError> {
        self.calls.push(Call::Present(slot, image));
        match self.present_script.pop_front() {
            None => Ok(SwapStatus::Ready(())),
            Some(Ok(status)) => Ok(status),
            Some(Err(reason)) => Err(FrameError::Present(reason)),
        }
    }

    fn surface_extent(&mut self) -> Result<RenderSize, FrameError> {
        Ok(self.surface)
    }

    fn rebuild(&mut self, extent: RenderSize) -> Result<RenderSize, FrameError> {
        assert_eq!(
            self.calls.last(),
            Some(&Call::Idle),
            "rebuild must follow a device idle"
        );
        assert_eq!(self.in_flight(), 0, "work still in flight during rebuild");
        if self.surface.is_empty() {
            return Ok(RenderSize::new(0, 0));
        }
        self.calls.push(Call::Rebuild(extent));
        self.retired.push(self.generation.id);
        self.generation = Generation::build(self.generation.id + 1, extent, self.min_image_count);
        Ok(extent)
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        self.calls.push(Call::Idle);
        self.idles.set(self.idles.get() + 1);
        for fence in &mut self.fences {
            if *fence == Fence::Pending {
                *fence = Fence::Signaled;
            }
        }
        Ok(())
    }
}

fn presenter(slots: usize, surface: RenderSize) -> FramePresenter<MockBackend> {
    FramePresenter::new(MockBackend::new(slots, surface), surface).unwrap()
}

#[test]
fn test_two_slots_alternate_over_five_frames() {
    let mut p = presenter(2, RenderSize::new(800, 600));

    let slots: Vec<usize> = (0..5)
        .map(|_| match p.render_one_frame().unwrap() {
            FrameOutcome::Presented { slot, .. } => slot,
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();

    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert!(
        p.backend().max_in_flight <= 2,
        "reset_slot rejects a fence whose submission was not waited on"
    );
    assert_eq!(p.rebuild_count(), 0);
}

#[test]
fn test_each_frame_waits_resets_then_submits() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    for _ in 0..4 {
        p.render_one_frame().unwrap();
    }

    let calls = &p.backend().calls;
    assert_eq!(calls.len(), 4 * 5);
    for (i, frame) in calls.chunks(5).enumerate() {
        let slot = i % 2;
        assert_eq!(frame[0], Call::Wait(slot));
        assert_eq!(frame[1], Call::Acquire(slot));
        assert_eq!(frame[2], Call::Reset(slot));
        assert!(matches!(frame[3], Call::Submit { slot: s, .. } if s == slot));
        assert!(matches!(frame[4], Call::Present(s, _) if s == slot));
    }
}

#[test]
fn test_stale_acquire_rebuilds_and_drops_frame() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.render_one_frame().unwrap();

    p.backend_mut().surface = RenderSize::new(1024, 768);
    p.backend_mut().acquire_script.push_back(SwapStatus::OutOfDate);
    let before = p.backend().submissions().len();

    let outcome = p.render_one_frame().unwrap();

    assert_eq!(outcome, FrameOutcome::Dropped(DropReason::StaleOnAcquire));
    assert_eq!(p.extent(), RenderSize::new(1024, 768));
    assert_eq!(p.backend().generation.extent, RenderSize::new(1024, 768));
    assert_eq!(p.backend().submissions().len(), before);
    assert!(!p.backend().calls.iter().any(|c| matches!(c, Call::Present(1, _))));

    // The dropped slot's fence was never reset, so its next use cannot hang.
    for _ in 0..4 {
        assert!(matches!(
            p.render_one_frame().unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }
}

#[test]
fn test_stale_present_rebuilds_after_submission() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.backend_mut().surface = RenderSize::new(640, 480);
    p.backend_mut().present_script.push_back(Ok(SwapStatus::OutOfDate));

    let outcome = p.render_one_frame().unwrap();

    assert_eq!(outcome, FrameOutcome::Dropped(DropReason::StaleOnPresent));
    assert_eq!(p.backend().submissions().len(), 1);
    assert_eq!(p.extent(), RenderSize::new(640, 480));
    let tail = &p.backend().calls[p.backend().calls.len() - 2..];
    assert_eq!(tail, &[Call::Idle, Call::Rebuild(RenderSize::new(640, 480))]);
}

#[test]
fn test_suboptimal_acquire_rebuilds_and_drops_frame() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.backend_mut().surface = RenderSize::new(801, 600);
    p.backend_mut().acquire_script.push_back(SwapStatus::Suboptimal(()));

    let outcome = p.render_one_frame().unwrap();

    assert_eq!(outcome, FrameOutcome::Dropped(DropReason::StaleOnAcquire));
    assert!(p.backend().submissions().is_empty());
    assert!(!p.backend().calls.iter().any(|c| matches!(c, Call::Present(..))));
    assert!(!p.backend().calls.contains(&Call::Reset(0)));
    assert!(!p.backend().image_available[0]);
    assert_eq!(p.rebuild_count(), 1);
    assert_eq!(p.extent(), RenderSize::new(801, 600));
    assert_eq!(
        &p.backend().calls[..],
        &[
            Call::Wait(0),
            Call::Acquire(0),
            Call::Discard(0),
            Call::Idle,
            Call::Rebuild(RenderSize::new(801, 600)),
        ]
    );

    // The slot is reusable: its fence stayed signaled and its semaphore was consumed.
    for _ in 0..4 {
        assert!(matches!(
            p.render_one_frame().unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }
}

#[test]
fn test_suboptimal_acquire_rebuilds_even_if_present_would_fail() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.backend_mut().surface = RenderSize::new(801, 600);
    p.backend_mut().acquire_script.push_back(SwapStatus::Suboptimal(()));
    p.backend_mut()
        .present_script
        .push_back(Err("flake".to_owned()));

    assert_eq!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Dropped(DropReason::StaleOnAcquire)
    );
    assert_eq!(p.rebuild_count(), 1);
    assert_eq!(p.extent(), RenderSize::new(801, 600));
    assert_eq!(p.backend().generation.extent, RenderSize::new(801, 600));

    // The scripted failure lands on the next present, against the new generation.
    assert_eq!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Dropped(DropReason::PresentFailed)
    );
    assert_eq!(p.rebuild_count(), 1);
}

#[test]
fn test_suboptimal_present_keeps_frame_then_rebuilds() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.backend_mut().surface = RenderSize::new(900, 600);
    p.backend_mut()
        .present_script
        .push_back(Ok(SwapStatus::Suboptimal(())));

    assert!(matches!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Presented { slot: 0, .. }
    ));
    assert_eq!(p.backend().submissions().len(), 1);
    assert_eq!(p.rebuild_count(), 1);
    assert_eq!(p.extent(), RenderSize::new(900, 600));
}

#[test]
fn test_present_failure_is_logged_not_fatal() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.backend_mut()
        .present_script
        .push_back(Err("surface lost".to_owned()));

    assert_eq!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Dropped(DropReason::PresentFailed)
    );
    assert_eq!(p.rebuild_count(), 0);
    assert!(matches!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Presented { slot: 1, .. }
    ));
}

#[test]
fn test_fence_failure_is_fatal() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.render_one_frame().unwrap();
    p.backend_mut().fail_wait_on = Some(1);

    let err = p.render_one_frame().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, FrameError::DeviceLost));
}

#[test]
fn test_in_flight_bounded_under_churn() {
    let k = 3;
    let mut p = presenter(k, RenderSize::new(800, 600));

    for i in 0..120u32 {
        match i % 17 {
            3 => p.backend_mut().acquire_script.push_back(SwapStatus::OutOfDate),
            7 => p.backend_mut().present_script.push_back(Ok(SwapStatus::OutOfDate)),
            11 => p.backend_mut().present_script.push_back(Err("flake".into())),
            13 => p.backend_mut().acquire_script.push_back(SwapStatus::Suboptimal(())),
            _ => {}
        }
        if i % 29 == 0 {
            p.backend_mut().surface = RenderSize::new(800 + i, 600);
        }
        p.render_one_frame().unwrap();
        assert!(p.backend().in_flight() <= k);
    }

    assert!(
        p.backend().max_in_flight <= k,
        "reset_slot rejects a fence whose submission was not waited on"
    );
    assert!(p.rebuild_count() > 0);
    assert!(p.backend().image_available.iter().all(|s| !s));
}

#[test]
fn test_rebuild_leaves_no_stale_generation_behind() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.render_one_frame().unwrap();

    p.backend_mut().surface = RenderSize::new(1280, 720);
    p.request_rebuild(RenderSize::new(1280, 720));
    let before = p.backend().submissions().len();
    for _ in 0..6 {
        p.render_one_frame().unwrap();
    }

    let backend = p.backend();
    let generation = &backend.generation;
    assert_eq!(generation.extent, RenderSize::new(1280, 720));
    assert!(generation.framebuffers.iter().all(|fb| *fb == generation.extent));
    assert_eq!(generation.command_buffers, generation.framebuffers.len());
    assert_eq!(generation.images, backend.min_image_count);
    assert_eq!(generation.views, generation.images);

    let after: Vec<_> = backend.submissions()[before..].to_vec();
    assert_eq!(after.len(), 6);
    assert!(after.iter().all(|(_, _, g)| *g == generation.id));
    assert!(after.iter().all(|(_, _, g)| !backend.retired.contains(g)));
}

#[test]
fn test_zero_area_suspends_until_surface_returns() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.render_one_frame().unwrap();

    p.backend_mut().surface = RenderSize::new(0, 0);
    p.request_rebuild(RenderSize::new(0, 0));
    let calls_before = p.backend().calls.len();

    for _ in 0..3 {
        assert_eq!(p.render_one_frame().unwrap(), FrameOutcome::Suspended);
    }
    assert!(p.is_suspended());
    assert_eq!(p.backend().calls.len(), calls_before);

    // Restored without a resize event.
    p.backend_mut().surface = RenderSize::new(800, 600);
    assert!(matches!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Presented { .. }
    ));
    assert!(!p.is_suspended());
    assert_eq!(p.extent(), RenderSize::new(800, 600));
}

#[test]
fn test_stale_acquire_on_minimized_surface_suspends() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.backend_mut().surface = RenderSize::new(0, 0);
    p.backend_mut().acquire_script.push_back(SwapStatus::OutOfDate);

    assert_eq!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Dropped(DropReason::StaleOnAcquire)
    );
    assert!(p.is_suspended());
    assert_eq!(p.rebuild_count(), 0);
    assert_eq!(p.render_one_frame().unwrap(), FrameOutcome::Suspended);
}

#[test]
fn test_resize_raced_by_minimize_keeps_generation() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.render_one_frame().unwrap();

    p.request_rebuild(RenderSize::new(1024, 768));
    p.backend_mut().surface = RenderSize::new(0, 0);

    assert_eq!(p.render_one_frame().unwrap(), FrameOutcome::Suspended);
    assert!(p.is_suspended());
    assert_eq!(p.rebuild_count(), 0);
    assert_eq!(p.backend().generation.id, 0);
    assert_eq!(p.extent(), RenderSize::new(800, 600));

    p.backend_mut().surface = RenderSize::new(1024, 768);
    assert!(matches!(
        p.render_one_frame().unwrap(),
        FrameOutcome::Presented { .. }
    ));
    assert_eq!(p.extent(), RenderSize::new(1024, 768));
    assert_eq!(p.backend().generation.id, 1);
}

#[test]
fn test_zero_slots_rejected() {
    let backend = MockBackend::new(0, RenderSize::new(800, 600));
    let err = FramePresenter::new(backend, RenderSize::new(800, 600))
        .err()
        .expect("zero slots must fail");
    assert!(matches!(err, FrameError::NoFrameSlots));
}

#[test]
fn test_shutdown_idles_device() {
    let mut p = presenter(2, RenderSize::new(800, 600));
    p.render_one_frame().unwrap();
    let idles = Rc::clone(&p.backend().idles);
    assert_eq!(idles.get(), 0);

    p.shutdown().unwrap();

    assert_eq!(idles.get(), 1);
}
