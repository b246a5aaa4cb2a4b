//! Integration tests for queue management functionality.
//!
//! This module contains tests that verify queue manager behavior including
//! auto-advance, failed-load skipping, event publication and navigation,
//! driven through a recording stand-in for the audio engine.

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering::SeqCst},
        },
    };

    use {
        parking_lot::Mutex,
        tokio::{
            sync::broadcast,
            time::{Duration, sleep, timeout},
        },
    };

    use crate::{
        audio::{
            engine::{EngineEvent, PlaybackControl},
            metadata::AudioMetadata,
            queue::RepeatMode,
            queue_manager::{QueueEvent, QueueManager},
        },
        error::AudioError,
    };

    // Default timeout in milliseconds for test async operations
    const TEST_TIMEOUT_MS: u64 = 1000;

    #[derive(Debug, Clone, PartialEq)]
    enum Command {
        Play(String),
        Stop,
    }

    #[derive(Default)]
    struct RecordingPlayer {
        commands: Arc<Mutex<Vec<Command>>>,
        broken: Arc<Mutex<HashSet<String>>>,
        position_ms: Arc<AtomicU64>,
    }

    impl RecordingPlayer {
        fn played(&self) -> Vec<String> {
            self.commands
                .lock()
                .iter()
                .filter_map(|c| match c {
                    Command::Play(path) => Some(path.clone()),
                    Command::Stop => None,
                })
                .collect()
        }

        fn last(&self) -> Option<Command> {
            self.commands.lock().last().cloned()
        }
    }

    impl PlaybackControl for RecordingPlayer {
        fn load_and_play(&self, track: &AudioMetadata) -> Result<(), AudioError> {
            if self.broken.lock().contains(&track.path) {
                return Err(AudioError::InvalidOperation {
                    reason: format!("cannot decode {}", track.path),
                });
            }
            self.commands.lock().push(Command::Play(track.path.clone()));
            self.position_ms.store(0, SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<(), AudioError> {
            self.commands.lock().push(Command::Stop);
            Ok(())
        }

        fn position_ms(&self) -> u64 {
            self.position_ms.load(SeqCst)
        }
    }

    fn create_test_tracks(count: usize) -> Vec<AudioMetadata> {
        (0..count)
            .map(|i| AudioMetadata {
                title: Some(format!("Track {i}")),
                duration_ms: 300_000,
                ..AudioMetadata::from_path(format!("/path/to/track_{i}.flac"))
            })
            .collect()
    }

    fn path(i: usize) -> String {
        format!("/path/to/track_{i}.flac")
    }

    fn manager_with(count: usize) -> QueueManager<RecordingPlayer> {
        let manager = QueueManager::new(RecordingPlayer::default());
        manager.set_queue(create_test_tracks(count), 0);
        manager
    }

    #[test]
    fn test_set_queue_does_not_play() {
        let manager = manager_with(3);
        let queue = manager.get_queue();
        assert_eq!(queue.tracks.len(), 3);
        assert_eq!(queue.current_index, Some(0));
        assert!(manager.player().played().is_empty());
    }

    #[test]
    fn test_next_previous_navigation() {
        let manager = manager_with(3);
        assert!(manager.play_index(0));

        // Repeat off: previous at the start replays the first track.
        assert!(manager.previous_track());
        assert_eq!(manager.get_queue().current_index, Some(0));

        assert!(manager.next_track());
        assert!(manager.next_track());
        assert_eq!(manager.get_queue().current_index, Some(2));

        // Repeat off: next at the end keeps the last track.
        assert!(!manager.next_track());
        assert_eq!(manager.get_queue().current_index, Some(2));

        assert!(manager.previous_track());
        assert_eq!(manager.get_queue().current_index, Some(1));

        assert_eq!(
            manager.player().played(),
            vec![path(0), path(0), path(1), path(2), path(1)]
        );
    }

    #[test]
    fn test_previous_restarts_after_threshold() {
        let manager = manager_with(3);
        manager.play_index(1);
        manager.player().position_ms.store(10_000, SeqCst);

        assert!(manager.previous_track());
        assert_eq!(manager.get_queue().current_index, Some(1));
        assert_eq!(manager.player().played(), vec![path(1), path(1)]);

        // Freshly restarted, so previous now goes back.
        assert!(manager.previous_track());
        assert_eq!(manager.get_queue().current_index, Some(0));
    }

    #[test]
    fn test_repeat_all_wraps_on_user_next() {
        let manager = manager_with(2);
        manager.set_repeat_mode(RepeatMode::All);
        manager.play_index(1);
        assert!(manager.next_track());
        assert_eq!(manager.get_queue().current_index, Some(0));
    }

    #[test]
    fn test_track_finished_end_of_queue_stops() {
        let manager = manager_with(2);
        manager.play_index(1);

        manager.handle_track_finished();

        assert_eq!(manager.get_queue().current_index, Some(1));
        assert_eq!(manager.player().last(), Some(Command::Stop));
    }

    #[test]
    fn test_repeat_one_replays_on_finish() {
        let manager = manager_with(3);
        manager.set_repeat_mode(RepeatMode::One);
        manager.play_index(1);

        manager.handle_track_finished();
        assert_eq!(manager.get_queue().current_index, Some(1));

        // The user can still move on.
        manager.next_track();
        assert_eq!(manager.get_queue().current_index, Some(2));
        assert_eq!(manager.player().played(), vec![path(1), path(1), path(2)]);
    }

    #[test]
    fn test_failed_loads_are_skipped() {
        let manager = manager_with(4);
        {
            let mut broken = manager.player().broken.lock();
            broken.insert(path(1));
            broken.insert(path(2));
        }

        manager.play_index(0);
        assert!(manager.next_track());

        assert_eq!(manager.get_queue().current_index, Some(3));
        assert_eq!(manager.player().played(), vec![path(0), path(3)]);
    }

    #[test]
    fn test_all_tracks_broken_stops_once_around() {
        let manager = manager_with(3);
        manager.set_repeat_mode(RepeatMode::All);
        {
            let mut broken = manager.player().broken.lock();
            for i in 0..3 {
                broken.insert(path(i));
            }
        }

        assert!(!manager.play_index(0));
        assert!(manager.player().played().is_empty());
        assert_eq!(manager.player().last(), Some(Command::Stop));
    }

    #[test]
    fn test_shuffle_keeps_current_and_restores() {
        let manager = manager_with(8);
        manager.play_index(3);
        let original = manager.get_queue().tracks;

        assert!(manager.toggle_shuffle());
        let shuffled = manager.get_queue();
        assert_eq!(shuffled.current_index, Some(0));
        assert_eq!(shuffled.tracks[0].path, path(3));
        assert!(manager.is_shuffled());

        assert!(!manager.toggle_shuffle());
        let restored = manager.get_queue();
        assert_eq!(restored.tracks, original);
        assert_eq!(restored.current_index, Some(3));

        // Shuffling does not interrupt playback.
        assert_eq!(manager.player().played(), vec![path(3)]);
    }

    #[test]
    fn test_enqueue_play_next_remove_clear() {
        let manager = QueueManager::new(RecordingPlayer::default());
        let tracks = create_test_tracks(3);

        manager.enqueue(tracks[0].clone());
        manager.enqueue(tracks[2].clone());
        manager.play_next(tracks[1].clone());
        let paths: Vec<String> = manager
            .get_queue()
            .tracks
            .iter()
            .map(|t| t.path.clone())
            .collect();
        assert_eq!(paths, vec![path(0), path(1), path(2)]);

        manager.play_index(0);
        let removed = manager.remove(0).map(|t| t.path);
        assert_eq!(removed, Some(path(0)));
        // The track that took its place starts playing.
        assert_eq!(manager.player().last(), Some(Command::Play(path(1))));

        assert!(manager.remove(10).is_none());

        manager.clear();
        assert!(manager.get_queue().tracks.is_empty());
        assert_eq!(manager.player().last(), Some(Command::Stop));
    }

    #[test]
    fn test_events_are_published() {
        let manager = QueueManager::new(RecordingPlayer::default());
        let mut events = manager.subscribe();

        manager.set_queue(create_test_tracks(2), 1);

        match events.try_recv() {
            Ok(QueueEvent::QueueChanged(queue)) => {
                assert_eq!(queue.tracks.len(), 2);
                assert_eq!(queue.current_index, Some(1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match events.try_recv() {
            Ok(QueueEvent::CurrentTrackChanged(Some(track))) => assert_eq!(track.path, path(1)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auto_advance_on_track_completion() {
        let manager = manager_with(3);
        let (engine_tx, engine_rx) = broadcast::channel(16);
        let listener = manager.start_auto_advance(engine_rx);

        manager.play_index(0);

        for expected in 1..=2 {
            engine_tx
                .send(EngineEvent::TrackFinished {
                    path: path(expected - 1),
                })
                .unwrap();

            timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
                while manager.get_queue().current_index != Some(expected) {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("Queue did not auto-advance after track completion");
        }

        // Other engine events are ignored.
        engine_tx
            .send(EngineEvent::PositionChanged {
                position_ms: 1,
                duration_ms: 2,
            })
            .unwrap();

        // End of queue with repeat off stops and keeps the cursor.
        engine_tx
            .send(EngineEvent::TrackFinished { path: path(2) })
            .unwrap();
        timeout(Duration::from_millis(TEST_TIMEOUT_MS), async {
            while manager.player().last() != Some(Command::Stop) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Queue did not stop at end");
        assert_eq!(manager.get_queue().current_index, Some(2));

        drop(engine_tx);
        timeout(Duration::from_millis(TEST_TIMEOUT_MS), listener)
            .await
            .expect("Listener did not stop")
            .unwrap();
    }
}
