mod common;

use common::{assets, params, recorded_controller, Call, Journal, RecordingUnit};
use raytile_core::ParamsError;
use raytile_session::{SessionConfig, SessionController, SessionError, SessionPhase, Stage};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn batch_render_covers_every_task_once() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    controller.render(params(30, 30, 3, 9), assets()).unwrap();

    assert_eq!(controller.phase(), SessionPhase::Completed);
    let session = controller.session().unwrap();
    assert!(!session.is_aborted());
    assert!(session.failure().is_none());
    assert_eq!(session.worker_count(), 3);

    let rendered: Vec<u64> = journal
        .calls()
        .into_iter()
        .filter_map(|(_, call)| match call {
            Call::Render(task_id) => Some(task_id),
            _ => None,
        })
        .collect();
    let unique: HashSet<u64> = rendered.iter().copied().collect();
    assert_eq!(rendered.len(), 9);
    assert_eq!(unique, (0..9).collect::<HashSet<u64>>());

    let image = controller.image().unwrap();
    assert_eq!(image.tiles().len(), 9);
    assert!(image.rgba().chunks(4).all(|px| px[3] == 255));

    let progress = controller.render_progress();
    assert!(progress.is_complete);
    assert_eq!(progress.completed_steps, 9);
    assert_eq!(progress.total_steps, 9);
}

#[test]
fn index_is_built_once_and_loaded_everywhere() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    controller.render(params(16, 16, 4, 4), assets()).unwrap();

    assert_eq!(journal.count(|call| *call == Call::BuildIndex), 1);
    assert_eq!(journal.count(|call| *call == Call::LoadIndex), 4);
    assert_eq!(controller.session().unwrap().index_builds(), 1);
}

#[test]
fn setup_barriers_complete_before_rendering() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    controller.render(params(16, 16, 4, 4), assets()).unwrap();

    let calls: Vec<Call> = journal.calls().into_iter().map(|(_, call)| call).collect();
    let last = |wanted: fn(&Call) -> bool| calls.iter().rposition(wanted).unwrap();
    let first = |wanted: fn(&Call) -> bool| calls.iter().position(wanted).unwrap();

    assert!(last(|c| *c == Call::Initialize) < first(|c| *c == Call::BuildIndex));
    assert!(first(|c| *c == Call::BuildIndex) < first(|c| *c == Call::LoadIndex));
    assert!(last(|c| *c == Call::LoadIndex) < first(|c| matches!(c, Call::Render(_))));
}

#[test]
fn incremental_render_refines_one_tile_per_worker() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);
    let mut params = params(16, 16, 4, 1);
    params.incremental = true;
    params.camera.rays_per_pixel = 3;

    controller.render(params, assets()).unwrap();

    assert_eq!(controller.phase(), SessionPhase::Completed);
    for worker_id in 0..4 {
        let passes: Vec<u32> = journal
            .calls()
            .into_iter()
            .filter(|(id, _)| *id == worker_id)
            .filter_map(|(_, call)| match call {
                Call::RenderPass(_, pass) => Some(pass),
                _ => None,
            })
            .collect();
        assert_eq!(passes, vec![0, 1, 2], "worker {worker_id}");
    }

    let image = controller.image().unwrap();
    assert_eq!(image.tiles().len(), 4);
    assert!(image.tiles().iter().all(|tile| tile.pass == Some(2)));
    assert_eq!(controller.render_progress().completed_steps, 4);
}

#[test]
fn surplus_workers_idle_in_incremental_mode() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);
    // Three workers round down to a 1x1 grid: a single tile.
    let mut params = params(8, 8, 3, 1);
    params.incremental = true;

    controller.render(params, assets()).unwrap();

    assert_eq!(controller.phase(), SessionPhase::Completed);
    assert_eq!(controller.image().unwrap().tiles().len(), 1);
    let renderers: HashSet<usize> = journal
        .calls()
        .into_iter()
        .filter(|(_, call)| matches!(call, Call::RenderPass(..)))
        .map(|(id, _)| id)
        .collect();
    assert_eq!(renderers.len(), 1);
}

#[test]
fn failed_tiles_do_not_stall_the_render() {
    let journal = Journal::new();
    let unit_journal = Arc::clone(&journal);
    let mut controller = SessionController::from_fn(move |id| {
        let unit = RecordingUnit::new(id, Arc::clone(&unit_journal));
        if id == 0 {
            Box::new(unit.failing_renders())
        } else {
            Box::new(unit)
        }
    });

    controller.render(params(16, 16, 2, 4), assets()).unwrap();

    assert_eq!(controller.phase(), SessionPhase::Completed);
    let tiles = controller.image().unwrap().tiles().len();
    assert_eq!(tiles + journal.failed_renders(), 4);
    assert_eq!(controller.render_progress().completed_steps as usize, tiles);
}

#[test]
fn render_waits_when_not_auto_started() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);
    let mut params = params(16, 16, 2, 4);
    params.render_after_initialization = false;

    controller.setup(params, assets()).unwrap();
    assert_eq!(controller.phase(), SessionPhase::Ready);
    assert_eq!(journal.count(|call| matches!(call, Call::Render(_))), 0);

    controller.start_render().unwrap();
    assert_eq!(controller.phase(), SessionPhase::Rendering);
    controller.run_to_completion().unwrap();
    assert_eq!(controller.phase(), SessionPhase::Completed);
}

#[test]
fn re_render_reuses_pool_with_fresh_task_ids() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    controller.render(params(16, 16, 2, 4), assets()).unwrap();
    assert_eq!(controller.next_task_id(), 4);

    controller.start_render().unwrap();
    controller.run_to_completion().unwrap();

    assert_eq!(controller.phase(), SessionPhase::Completed);
    assert_eq!(controller.next_task_id(), 8);
    assert_eq!(journal.count(|call| *call == Call::Initialize), 2);
    assert_eq!(journal.count(|call| *call == Call::BuildIndex), 1);
    let image = controller.image().unwrap();
    assert!(image.tiles().iter().all(|tile| tile.task.task_id >= 4));
}

#[test]
fn start_render_requires_a_ready_session() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    let err = controller.start_render().unwrap_err();
    assert!(matches!(
        err,
        SessionError::WrongPhase {
            phase: "idle",
            ..
        }
    ));
}

#[test]
fn invalid_params_never_spawn_workers() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    let err = controller.render(params(0, 16, 2, 4), assets()).unwrap_err();

    assert!(matches!(
        err,
        SessionError::InvalidParams(ParamsError::EmptyImage { .. })
    ));
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert!(journal.calls().is_empty());
}

#[test]
fn stalled_initialization_times_out() {
    let journal = Journal::new();
    let unit_journal = Arc::clone(&journal);
    let mut controller = SessionController::from_fn(move |id| {
        let unit = RecordingUnit::new(id, Arc::clone(&unit_journal));
        if id == 1 {
            Box::new(unit.with_init_delay(Duration::from_millis(500)))
        } else {
            Box::new(unit)
        }
    })
    .with_config(SessionConfig::default().with_ack_timeout(Some(Duration::from_millis(50))));

    let err = controller.render(params(16, 16, 2, 4), assets()).unwrap_err();

    match err {
        SessionError::AckTimeout { stage, missing, .. } => {
            assert_eq!(stage, Stage::Initialize);
            assert_eq!(missing, vec![1]);
        }
        other => panic!("unexpected error: {other}"),
    }
    let session = controller.session().unwrap();
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(session.failure().is_some());
    assert!(!session.is_aborted());
    assert!(session.pool().is_none());
}

#[test]
fn abort_is_idempotent() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);

    controller.abort();
    controller.abort();
    assert_eq!(controller.phase(), SessionPhase::Idle);

    let mut params = params(16, 16, 2, 4);
    params.render_after_initialization = false;
    controller.setup(params, assets()).unwrap();

    controller.abort();
    controller.abort();

    let session = controller.session().unwrap();
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(session.is_aborted());
    assert!(session.pool().is_none());
    assert!(controller.progress_snapshot().workers.is_empty());
}

#[test]
fn abort_after_completion_only_releases_workers() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);
    controller.render(params(16, 16, 2, 4), assets()).unwrap();

    controller.abort();

    let session = controller.session().unwrap();
    assert!(!session.is_aborted());
    assert!(session.pool().is_none());
    assert_eq!(session.image().tiles().len(), 4);
    assert!(controller.start_render().is_err());
}

#[test]
fn abort_from_another_thread_stops_rendering() {
    let journal = Journal::new();
    let unit_journal = Arc::clone(&journal);
    let mut controller = SessionController::from_fn(move |id| {
        Box::new(
            RecordingUnit::new(id, Arc::clone(&unit_journal)).with_row_delay(Duration::from_millis(20)),
        )
    });
    let handle = controller.abort_handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.abort();
    });

    let started = Instant::now();
    controller.render(params(64, 64, 2, 4), assets()).unwrap();
    aborter.join().unwrap();

    // Four 32-row tiles on two workers would take over a second.
    assert!(started.elapsed() < Duration::from_millis(1000));
    let session = controller.session().unwrap();
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(session.is_aborted());
    assert!(session.image().tiles().is_empty());
    assert!(session.progress().is_empty());
}

#[test]
fn abort_during_index_load_tears_down() {
    let journal = Journal::new();
    let unit_journal = Arc::clone(&journal);
    let mut controller = SessionController::from_fn(move |id| {
        let unit = RecordingUnit::new(id, Arc::clone(&unit_journal));
        if id == 2 {
            Box::new(unit.with_load_delay(Duration::from_millis(600)))
        } else {
            Box::new(unit)
        }
    });
    let handle = controller.abort_handle();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        handle.abort();
    });

    let started = Instant::now();
    controller.render(params(16, 16, 3, 4), assets()).unwrap();
    aborter.join().unwrap();

    // The barrier gives up without waiting for the stalled load.
    assert!(started.elapsed() < Duration::from_millis(550));
    let session = controller.session().unwrap();
    assert_eq!(session.phase(), SessionPhase::Completed);
    assert!(session.is_aborted());
    assert!(session.pool().is_none());
    assert_eq!(session.index_source(), None);
    assert!(journal.calls().contains(&(2, Call::LoadIndex)));
    assert_eq!(
        journal.count(|call| matches!(call, Call::Render(_) | Call::RenderPass(..))),
        0
    );
}

#[test]
fn new_render_after_abort_starts_clean() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);
    let mut first = params(16, 16, 2, 4);
    first.render_after_initialization = false;
    controller.setup(first, assets()).unwrap();
    controller.abort_handle().abort();
    controller.abort();

    controller.render(params(16, 16, 2, 4), assets()).unwrap();

    let session = controller.session().unwrap();
    assert!(!session.is_aborted());
    assert_eq!(session.image().tiles().len(), 4);
}

#[test]
fn summary_reports_finished_render() {
    let journal = Journal::new();
    let mut controller = recorded_controller(&journal);
    controller.render(params(16, 16, 2, 4), assets()).unwrap();

    let summary = controller.summary().unwrap();
    assert_eq!(summary.phase, SessionPhase::Completed);
    assert_eq!(summary.worker_count, 2);
    assert!(summary.total_rays > 0);
    assert_eq!(
        controller.progress_snapshot().total_rays,
        summary.total_rays
    );

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains(r#""phase":"Completed""#), "{json}");
}
