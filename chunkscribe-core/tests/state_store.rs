use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tempfile::tempdir;

use chunkscribe_core::pipeline::{
    Chunk, PipelinePhase, PipelineState, SourceFingerprint, TranscriptResult, TranscriptSegment,
    STATE_FILE_NAME,
};
use chunkscribe_core::store::{JsonStore, StoreError};

fn fingerprint() -> SourceFingerprint {
    SourceFingerprint {
        file_name: "talk.mp4".into(),
        duration_seconds: 150.0,
        size_bytes: 4096,
        modified_ms: Some(1_700_000_000_000),
        created_ms: None,
        bitrate: Some(128_000),
        video_codec: Some("h264".into()),
        audio_codec: Some("aac".into()),
    }
}

#[test]
fn state_document_uses_camel_case_fields() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(STATE_FILE_NAME);
    let store: JsonStore<PipelineState> = JsonStore::builder(&path).build();

    let mut state = PipelineState::new("/media/talk.mp4", dir.path(), fingerprint(), Utc::now());
    state.phase = PipelinePhase::ChunksReady;
    let mut done = Chunk::new(0.0, dir.path().join("chunk_0000.mp3"));
    done.result = Some(TranscriptResult::new(vec![TranscriptSegment {
        start_seconds: 1.0,
        end_seconds: 2.0,
        text: "hi".into(),
    }]));
    state.chunks = vec![done, Chunk::new(60.0, dir.path().join("chunk_0001.mp3"))];
    store.save(&state).unwrap();

    let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["phase"], "chunks_ready");
    assert!(raw["lastUpdated"].is_i64());
    assert_eq!(raw["sourceFingerprint"]["sizeBytes"], 4096);
    assert_eq!(raw["chunks"][0]["offsetSeconds"], 0.0);
    assert_eq!(raw["chunks"][0]["result"]["segments"][0]["text"], "hi");
    assert!(raw["chunks"][1].get("result").is_none());

    assert_eq!(store.read().unwrap(), state);
}

#[test]
fn invalid_state_is_reset_to_default_with_hooks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(STATE_FILE_NAME);
    let mut ready = PipelineState::new("/media/talk.mp4", dir.path(), fingerprint(), Utc::now());
    ready.phase = PipelinePhase::ChunksReady;
    std::fs::write(&path, serde_json::to_vec(&ready).unwrap()).unwrap();

    let invalid = Arc::new(AtomicUsize::new(0));
    let repaired = Arc::new(AtomicUsize::new(0));
    let default = PipelineState::new("/media/talk.mp4", dir.path(), fingerprint(), Utc::now());
    let store = JsonStore::builder(&path)
        .default_value(default.clone())
        .on_invalid({
            let invalid = Arc::clone(&invalid);
            move |err: &StoreError| {
                assert!(matches!(err, StoreError::InvalidConfig { .. }));
                invalid.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_auto_repaired({
            let repaired = Arc::clone(&repaired);
            move |state: &PipelineState| {
                assert_eq!(state.phase, PipelinePhase::Init);
                repaired.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build();

    assert_eq!(store.load().unwrap(), default);
    assert_eq!(invalid.load(Ordering::SeqCst), 1);
    assert_eq!(repaired.load(Ordering::SeqCst), 1);
    assert_eq!(store.read().unwrap(), default);
}
