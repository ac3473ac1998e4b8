#[cfg(test)]
mod integration_tests {
    use crate::channel::EventReceiver;
    use crate::config::EngineConfig;
    use crate::error::{ErrorKind, PlayerError, SurfaceError};
    use crate::logging::PlaybackEventType;
    use crate::models::{CommandKind, Event, PlayerState, VideoFrame};
    use crate::render::Surface;
    use crate::source::test_support::write_test_wav;
    use crate::PlaybackEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

    fn headless() -> PlaybackEngine {
        PlaybackEngine::new(EngineConfig::headless()).expect("engine")
    }

    async fn next_event(events: &mut EventReceiver) -> Event {
        timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Wait for the first event matching `wanted`, failing on an unexpected error
    async fn wait_for<F: Fn(&Event) -> bool>(events: &mut EventReceiver, wanted: F) -> Event {
        loop {
            let event = next_event(events).await;
            if wanted(&event) {
                return event;
            }
            if let Event::Error { .. } = event {
                panic!("unexpected error event: {:?}", event);
            }
        }
    }

    async fn prepared(locator: &str) -> (PlaybackEngine, EventReceiver, i64) {
        prepared_with(EngineConfig::headless(), locator).await
    }

    async fn prepared_with(config: EngineConfig, locator: &str) -> (PlaybackEngine, EventReceiver, i64) {
        let engine = PlaybackEngine::new(config).expect("engine");
        let mut events = engine.subscribe();
        engine.set_data_source(locator).unwrap();
        engine.prepare().unwrap();
        match next_event(&mut events).await {
            Event::Prepared { duration_ms } => (engine, events, duration_ms),
            other => panic!("expected Prepared, got {:?}", other),
        }
    }

    fn assert_near(actual: i64, expected: i64, slack: i64) {
        assert!(
            (actual - expected).abs() <= slack,
            "position {} not within {} of {}",
            actual,
            slack,
            expected
        );
    }

    struct CountingSurface {
        blits: Arc<AtomicUsize>,
    }

    impl Surface for CountingSurface {
        fn blit(&mut self, frame: &VideoFrame, _pts: Duration) -> Result<(), SurfaceError> {
            assert_eq!(frame.data.len(), frame.format.buffer_len(frame.width, frame.height));
            self.blits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_play_pause_seek_release() {
        let (engine, mut events, duration_ms) = prepared("testsrc:duration=5000").await;
        assert_eq!(duration_ms, 5000);
        assert_eq!(engine.state(), PlayerState::Prepared);
        assert_eq!(engine.duration_ms().unwrap(), 5000);

        engine.start().unwrap();
        assert_eq!(engine.state(), PlayerState::Started);
        sleep(Duration::from_millis(1000)).await;
        assert_near(engine.current_position_ms().unwrap(), 1000, 100);

        engine.pause().unwrap();
        assert_eq!(engine.state(), PlayerState::Paused);
        let frozen = engine.current_position_ms().unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_near(engine.current_position_ms().unwrap(), frozen, 20);

        engine.seek_to(2000).unwrap();
        let event = wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;
        assert_eq!(event, Event::SeekComplete { position_ms: 2000 });
        assert_eq!(engine.state(), PlayerState::Paused);
        assert_near(engine.current_position_ms().unwrap(), 2000, 50);

        engine.start().unwrap();
        sleep(Duration::from_millis(500)).await;
        assert_near(engine.current_position_ms().unwrap(), 2500, 100);

        engine.release();
        assert_eq!(engine.state(), PlayerState::Released);
        assert_eq!(timeout(EVENT_TIMEOUT, events.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_reported() {
        let engine = headless();
        for result in [engine.prepare(), engine.start(), engine.pause(), engine.seek_to(10)] {
            assert!(matches!(
                result,
                Err(PlayerError::IllegalState { state: PlayerState::Idle, .. })
            ));
        }

        engine.set_data_source("testsrc:duration=2000&open_delay=400").unwrap();
        assert!(matches!(
            engine.start(),
            Err(PlayerError::IllegalState { command: CommandKind::Start, state: PlayerState::Initialized })
        ));

        engine.prepare().unwrap();
        assert_eq!(engine.state(), PlayerState::Preparing);
        for result in [engine.start(), engine.pause(), engine.seek_to(0), engine.prepare()] {
            assert!(matches!(
                result,
                Err(PlayerError::IllegalState { state: PlayerState::Preparing, .. })
            ));
        }
        assert!(matches!(
            engine.duration_ms(),
            Err(PlayerError::DurationUnavailable { state: PlayerState::Preparing })
        ));
    }

    #[tokio::test]
    async fn test_pause_requires_started() {
        let (engine, _events, _) = prepared("testsrc:duration=2000").await;
        assert!(matches!(
            engine.pause(),
            Err(PlayerError::IllegalState { command: CommandKind::Pause, state: PlayerState::Prepared })
        ));
        engine.start().unwrap();
        assert!(matches!(
            engine.start(),
            Err(PlayerError::IllegalState { command: CommandKind::Start, state: PlayerState::Started })
        ));
        engine.pause().unwrap();
        engine.start().unwrap();
    }

    #[tokio::test]
    async fn test_second_data_source_needs_new_player() {
        let (engine, _events, _) = prepared("testsrc:duration=1000").await;
        match engine.set_data_source("testsrc:duration=2000") {
            Err(err @ PlayerError::InvalidOperation { .. }) => {
                assert_eq!(err.kind(), ErrorKind::InvalidOperationError)
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.state(), PlayerState::Prepared);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (engine, mut events, _) = prepared("testsrc:duration=3000").await;
        engine.start().unwrap();
        sleep(Duration::from_millis(100)).await;

        engine.release();
        engine.release();
        assert_eq!(engine.state(), PlayerState::Released);
        assert_eq!(timeout(EVENT_TIMEOUT, events.recv()).await.unwrap(), None);

        for (result, command) in [
            (engine.start(), CommandKind::Start),
            (engine.seek_to(0), CommandKind::SeekTo),
            (engine.set_surface(None), CommandKind::SetSurface),
            (engine.set_data_source("testsrc:"), CommandKind::SetDataSource),
        ] {
            match result {
                Err(PlayerError::IllegalState { command: c, state }) => {
                    assert_eq!(c, command);
                    assert_eq!(state, PlayerState::Released);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        drop(engine);
    }

    #[tokio::test]
    async fn test_release_cancels_prepare_in_flight() {
        let engine = headless();
        let mut events = engine.subscribe();
        engine.set_data_source("testsrc:open_delay=5000").unwrap();
        engine.prepare().unwrap();
        sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        engine.release();
        assert!(started.elapsed() < Duration::from_secs(2), "release waited for the open");
        assert_eq!(engine.state(), PlayerState::Released);
        assert_eq!(timeout(EVENT_TIMEOUT, events.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drop_releases_prepare_in_flight() {
        let started = Instant::now();
        {
            let engine = headless();
            engine.set_data_source("testsrc:open_delay=5000").unwrap();
            engine.prepare().unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_detached_surface_gets_no_more_blits() {
        let (engine, _events, _) = prepared("testsrc:duration=4000&audio=0").await;
        let blits = Arc::new(AtomicUsize::new(0));
        engine
            .set_surface(Some(Box::new(CountingSurface { blits: Arc::clone(&blits) })))
            .unwrap();
        engine.start().unwrap();
        sleep(Duration::from_millis(400)).await;
        assert!(blits.load(Ordering::SeqCst) > 0);

        engine.set_surface(None).unwrap();
        let after_detach = blits.load(Ordering::SeqCst);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(blits.load(Ordering::SeqCst), after_detach);
        assert_eq!(engine.state(), PlayerState::Started);
        assert!(engine.stats().frames_presented >= after_detach as u64);
    }

    #[tokio::test]
    async fn test_surface_swap_moves_blits_to_new_surface() {
        let (engine, _events, _) = prepared("testsrc:duration=4000").await;
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        engine
            .set_surface(Some(Box::new(CountingSurface { blits: Arc::clone(&first) })))
            .unwrap();
        engine.start().unwrap();
        sleep(Duration::from_millis(300)).await;

        engine
            .set_surface(Some(Box::new(CountingSurface { blits: Arc::clone(&second) })))
            .unwrap();
        let first_total = first.load(Ordering::SeqCst);
        sleep(Duration::from_millis(300)).await;
        assert!(first_total > 0);
        assert_eq!(first.load(Ordering::SeqCst), first_total);
        assert!(second.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn test_seek_targets_are_clamped() {
        let (engine, mut events, _) = prepared("testsrc:duration=3000").await;

        engine.seek_to(-500).unwrap();
        let event = wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;
        assert_eq!(event, Event::SeekComplete { position_ms: 0 });
        assert_eq!(engine.current_position_ms().unwrap(), 0);

        engine.seek_to(99_999).unwrap();
        let event = wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;
        assert_eq!(event, Event::SeekComplete { position_ms: 3000 });
        assert_eq!(engine.current_position_ms().unwrap(), 3000);

        // Playing from the very end completes right away
        engine.start().unwrap();
        wait_for(&mut events, |e| *e == Event::PlaybackComplete).await;
        assert_eq!(engine.state(), PlayerState::Paused);
        assert_eq!(engine.current_position_ms().unwrap(), 3000);
    }

    #[tokio::test]
    async fn test_rapid_seeks_settle_on_the_last_target() {
        // Each seek keeps the decoder busy, so the later requests queue up behind the first
        let (engine, mut events, _) = prepared("testsrc:duration=5000&seek_delay=200").await;
        engine.start().unwrap();
        for target in [500, 1000, 1500, 2000, 2500, 3000] {
            engine.seek_to(target).unwrap();
        }

        let event = wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;
        assert_eq!(event, Event::SeekComplete { position_ms: 3000 });
        match timeout(Duration::from_millis(600), events.recv()).await {
            Err(_) => {}
            Ok(Some(Event::SeekComplete { position_ms })) => panic!("extra seek completion at {}", position_ms),
            Ok(other) => panic!("unexpected {:?}", other),
        }
        let position = engine.current_position_ms().unwrap();
        assert!((3000..4200).contains(&position), "position {} after settling at 3000", position);
    }

    #[tokio::test]
    async fn test_completion_then_start_rewinds() {
        let (engine, mut events, _) = prepared("testsrc:duration=600").await;
        engine.start().unwrap();
        wait_for(&mut events, |e| *e == Event::PlaybackComplete).await;
        assert_eq!(engine.state(), PlayerState::Paused);
        assert_eq!(engine.current_position_ms().unwrap(), 600);

        engine.start().unwrap();
        sleep(Duration::from_millis(150)).await;
        assert!(engine.current_position_ms().unwrap() < 450);
        wait_for(&mut events, |e| *e == Event::PlaybackComplete).await;
    }

    #[tokio::test]
    async fn test_loop_count_plays_every_pass() {
        let mut config = EngineConfig::headless();
        config.playback.loop_count = 2;
        let (engine, mut events, _) = prepared_with(config, "testsrc:duration=500").await;

        let started = Instant::now();
        engine.start().unwrap();
        let mut seen = Vec::new();
        loop {
            let event = next_event(&mut events).await;
            if event == Event::PlaybackComplete {
                break;
            }
            seen.push(event);
        }
        assert!(started.elapsed() >= Duration::from_millis(900), "finished after {:?}", started.elapsed());
        // Rewinds between passes are not announced
        assert!(seen.is_empty(), "unexpected events {:?}", seen);
    }

    #[tokio::test]
    async fn test_start_position() {
        let mut config = EngineConfig::headless();
        config.playback.start_position_ms = Some(1500);
        let (engine, _events, _) = prepared_with(config, "testsrc:duration=4000").await;
        assert_eq!(engine.current_position_ms().unwrap(), 1500);
        engine.start().unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_near(engine.current_position_ms().unwrap(), 1800, 200);
    }

    #[tokio::test]
    async fn test_video_only_source_uses_external_clock() {
        let (engine, mut events, duration_ms) = prepared("testsrc:duration=800&audio=0").await;
        assert_eq!(duration_ms, 800);
        assert_eq!(engine.stats().master, crate::models::SyncMaster::External);
        engine.start().unwrap();
        sleep(Duration::from_millis(400)).await;
        assert_near(engine.current_position_ms().unwrap(), 400, 150);
        wait_for(&mut events, |e| *e == Event::PlaybackComplete).await;
    }

    #[tokio::test]
    async fn test_corrupt_frames_are_skipped() {
        let (engine, mut events, _) = prepared("testsrc:duration=800&corrupt_every=7").await;
        engine.start().unwrap();
        wait_for(&mut events, |e| *e == Event::PlaybackComplete).await;
        assert!(engine.stats().frames_corrupt_skipped > 0);
    }

    #[tokio::test]
    async fn test_persistent_corruption_fails_playback() {
        let engine = headless();
        let mut events = engine.subscribe();
        engine.set_data_source("testsrc:duration=20000&fail_after=100").unwrap();
        engine.prepare().unwrap();

        // The failure may arrive before or after Prepared
        let error = loop {
            match next_event(&mut events).await {
                Event::Prepared { .. } => {
                    let _ = engine.start();
                }
                Event::Error { kind, message } => break (kind, message),
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(error.0, ErrorKind::DecodeFailure);
        assert!(error.1.contains("consecutive corrupt frames"));
        assert_eq!(engine.state(), PlayerState::Stopped);
        assert!(matches!(
            engine.start(),
            Err(PlayerError::IllegalState { state: PlayerState::Stopped, .. })
        ));
    }

    #[tokio::test]
    async fn test_wav_file_plays_to_completion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 44_100, 2, 700);

        let (engine, mut events, duration_ms) = prepared(path.to_str().unwrap()).await;
        assert_near(duration_ms, 700, 1);
        let info = engine.media_info().unwrap();
        assert!(info.has_audio());
        assert!(!info.has_video());

        engine.start().unwrap();
        wait_for(&mut events, |e| *e == Event::PlaybackComplete).await;
        assert_near(engine.current_position_ms().unwrap(), 700, 1);
    }

    #[tokio::test]
    async fn test_unreadable_and_unsupported_sources() {
        let dir = TempDir::new().unwrap();
        let garbage = dir.path().join("noise.xyz");
        std::fs::write(&garbage, vec![0x5au8; 4096]).unwrap();
        let missing = dir.path().join("missing.wav");

        let cases = [
            (missing.to_string_lossy().into_owned(), ErrorKind::SourceUnreadable),
            (garbage.to_string_lossy().into_owned(), ErrorKind::UnsupportedFormat),
            ("rtsp://camera.local/stream".to_string(), ErrorKind::SourceUnreadable),
            ("testsrc:fps=abc".to_string(), ErrorKind::UnsupportedFormat),
        ];
        for (locator, expected) in cases {
            let engine = headless();
            let mut events = engine.subscribe();
            engine.set_data_source(&locator).unwrap();
            engine.prepare().unwrap();
            match next_event(&mut events).await {
                Event::Error { kind, .. } => assert_eq!(kind, expected, "locator {}", locator),
                other => panic!("expected an error for {}, got {:?}", locator, other),
            }
            assert_eq!(engine.state(), PlayerState::Stopped);
            assert!(engine.duration_ms().is_err());
        }
    }

    #[tokio::test]
    async fn test_commands_from_many_threads() {
        let (engine, mut events, _) = prepared("testsrc:duration=5000").await;
        let engine = Arc::new(engine);
        engine.start().unwrap();

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        engine.seek_to((i * 10 + j) * 50).unwrap();
                        let _ = engine.stats();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(engine.state(), PlayerState::Started);
        wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;

        let releaser = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.release())
        };
        let _ = engine.pause();
        releaser.join().unwrap();
        assert_eq!(engine.state(), PlayerState::Released);
    }

    #[tokio::test]
    async fn test_events_serialize_for_hosts() {
        let (engine, mut events, duration_ms) = prepared("testsrc:duration=1200").await;
        let json = serde_json::to_string(&Event::Prepared { duration_ms }).unwrap();
        assert_eq!(json, r#"{"type":"prepared","duration_ms":1200}"#);

        engine.seek_to(600).unwrap();
        let event = wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "seek_complete");
        assert_eq!(value["position_ms"], 600);

        let stats = serde_json::to_value(engine.stats()).unwrap();
        assert_eq!(stats["state"], "Prepared");
        assert_eq!(stats["duration_ms"], 1200);
    }

    #[tokio::test]
    async fn test_history_records_transitions_and_seeks() {
        let (engine, mut events, _) = prepared("testsrc:duration=2000").await;
        engine.seek_to(1000).unwrap();
        wait_for(&mut events, |e| matches!(e, Event::SeekComplete { .. })).await;

        let logger = engine.logger();
        let states: Vec<String> = logger
            .events_of_type(PlaybackEventType::StateChanged)
            .into_iter()
            .map(|event| event.details)
            .collect();
        assert!(states[0].starts_with("Idle -> Initialized"), "{:?}", states);
        assert!(states.iter().any(|s| s.starts_with("Preparing -> Prepared")));
        assert_eq!(logger.events_of_type(PlaybackEventType::SourceOpened).len(), 1);
        assert_eq!(logger.events_of_type(PlaybackEventType::SeekRequested).len(), 1);
        let completed = logger.events_of_type(PlaybackEventType::SeekCompleted);
        assert_eq!(completed.len(), 1);
        assert!(completed[0].duration.is_some());
    }
}
