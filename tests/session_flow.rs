//! End-to-end session scenarios against scripted collaborators.

mod support;

use std::sync::Arc;
use std::time::Duration;

use support::*;
use voxbridge::hub::SessionHub;
use voxbridge::metrics::metric_names;
use voxbridge::{BridgeConfig, Notification, Providers, SessionState, Signal, FRAME_SAMPLES};

fn providers(synth: ScriptedSynth, transcriber: ScriptedTranscriber) -> (Providers, Arc<ScriptedTranscriber>) {
    let transcriber = Arc::new(transcriber);
    let providers = Providers::new(Arc::new(synth), Arc::clone(&transcriber) as _);
    (providers, transcriber)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn negotiation_reaches_idle_and_streams_silence() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    assert_eq!(h.handle.state(), SessionState::Connecting);

    h.connect().await;
    h.send(Signal::Ping);
    h.expect(|n| *n == Notification::Pong).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let frames = h.endpoint.frames_since(0);
    assert!(frames.len() >= 5, "only {} frames", frames.len());
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.len(), FRAME_SAMPLES);
        assert_eq!(frame.pts(), (i * FRAME_SAMPLES) as u64);
        assert!(frame.is_silent());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signals_before_media_are_rejected() {
    let (p, transcriber) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());

    h.send(Signal::MicStart);
    h.expect(|n| matches!(n, Notification::Error { .. })).await;
    h.send(Signal::MediaReady);
    h.expect(|n| matches!(n, Notification::Error { .. })).await;

    assert_eq!(h.handle.state(), SessionState::Connecting);
    assert_eq!(transcriber.call_count(), 0);
    assert_eq!(h.endpoint.frame_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn negotiation_failure_closes_session() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());

    h.send(Signal::Offer { sdp: String::new() });
    h.send(Signal::NegotiationFailed {
        reason: "ice failed".into(),
    });
    h.expect(|n| *n == Notification::Closed).await;
    h.wait_state(SessionState::Closed).await;
    assert_eq!(h.endpoint.frame_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recording_hands_off_exactly_the_delivered_frames() {
    let (p, transcriber) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;

    let sink = h.handle.capture_sink();
    std::thread::spawn(move || {
        for i in 1..=50i16 {
            sink.on_frame(&frame_of(i));
        }
    })
    .join()
    .unwrap();

    h.send(Signal::MicStop);
    h.expect(|n| matches!(n, Notification::Transcription { partial: false, .. }))
        .await;

    // Audio after stop must not reach the recording
    h.handle.capture_sink().on_frame(&frame_of(99));

    let calls = transcriber.calls.lock();
    assert_eq!(calls.len(), 1);
    let audio = &calls[0];
    assert_eq!(audio.len(), 50 * FRAME_SAMPLES);
    for (i, frame) in audio.chunks(FRAME_SAMPLES).enumerate() {
        assert!(frame.iter().all(|&s| s == i as i16 + 1));
    }
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_recording_is_still_transcribed() {
    let reply = Arc::new(FixedReply::new("should not be asked"));
    let (p, transcriber) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let p = p.with_reply("fixed", Arc::clone(&reply) as _);
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;
    h.send(Signal::MicStop);

    let n = h
        .expect(|n| matches!(n, Notification::Transcription { .. }))
        .await;
    assert_eq!(
        n,
        Notification::Transcription {
            text: String::new(),
            partial: false
        }
    );
    assert_eq!(transcriber.calls.lock()[0].len(), 0);
    assert_eq!(reply.call_count(), 0);
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_turn_speaks_reply_and_returns_to_idle() {
    let reply = Arc::new(FixedReply::new("Hi there. How can I help?"));
    let synth = ScriptedSynth::new(FRAME_SAMPLES * 3)
        .rule("Hi there", 0, 1)
        .rule("help", 0, 2);
    let (p, _) = providers(synth, ScriptedTranscriber::saying("hello"));
    let p = p.with_reply("fixed", Arc::clone(&reply) as _);
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;
    h.handle.capture_sink().on_frame(&frame_of(3));
    h.send(Signal::MicStop);

    h.expect(|n| {
        *n == Notification::Transcription {
            text: "hello".into(),
            partial: false,
        }
    })
    .await;
    h.expect(|n| *n == Notification::AgentThinking).await;
    h.expect(|n| {
        *n == Notification::AgentReply {
            text: "Hi there. How can I help?".into(),
        }
    })
    .await;
    h.expect(|n| *n == Notification::Speaking).await;
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Idle,
        }
    })
    .await;

    assert_eq!(h.endpoint.played_values(), vec![1, 2]);
    assert_eq!(*reply.last_turns.lock(), vec!["hello".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn without_reply_generator_transcript_is_published_only() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying("turn on the lights"));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;
    h.send(Signal::MicStop);
    let mut seen = h
        .collect_until(|n| matches!(n, Notification::Transcription { partial: false, .. }))
        .await;
    assert!(seen.contains(&Notification::Transcription {
        text: "turn on the lights".into(),
        partial: false,
    }));

    h.send(Signal::Ping);
    seen.extend(h.collect_until(|n| *n == Notification::Pong).await);
    assert!(!seen.contains(&Notification::AgentThinking));
    assert!(seen.iter().all(|n| !matches!(n, Notification::Error { .. })));
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupt_flushes_and_drops_late_completions() {
    // One second of audio per sentence; the third finishes well after the interrupt
    let synth = ScriptedSynth::new(48_000)
        .rule("One", 0, 1)
        .rule("Two", 0, 2)
        .rule("Three", 300, 3);
    let (p, _) = providers(synth, ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::Speak {
        text: "One. Two. Three.".into(),
    });
    h.expect(|n| *n == Notification::Speaking).await;

    h.send(Signal::StopSpeaking);
    h.wait_state(SessionState::Idle).await;
    let at_interrupt = h.endpoint.frame_count();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let after = h.endpoint.frames_since(at_interrupt + 2);
    assert!(after.len() >= 10);
    assert!(after.iter().all(|f| f.is_silent()), "audio played after interrupt");
    assert!(!h.endpoint.played_values().contains(&3));
    assert!(h.metrics.counter(metric_names::STALE_COMPLETIONS) >= 1);
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn record_start_while_speaking_interrupts_first() {
    let synth = ScriptedSynth::new(48_000).rule("Long", 0, 4);
    let (p, _) = providers(synth, ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::Speak {
        text: "Long sentence.".into(),
    });
    h.expect(|n| *n == Notification::Speaking).await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;
    let at_record = h.endpoint.frame_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h
        .endpoint
        .frames_since(at_record + 2)
        .iter()
        .all(|f| f.is_silent()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_order_synthesis_plays_in_sentence_order() {
    let synth = ScriptedSynth::new(FRAME_SAMPLES * 2)
        .rule("Slow", 150, 1)
        .rule("Fast", 0, 2);
    let (p, _) = providers(synth, ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::Speak {
        text: "Slow start. Fast finish.".into(),
    });
    h.expect(|n| *n == Notification::Speaking).await;
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Idle,
        }
    })
    .await;

    assert_eq!(h.endpoint.played_values(), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transcription_failure_is_recoverable() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::failing("model missing"));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;
    h.send(Signal::MicStop);

    let n = h.expect(|n| matches!(n, Notification::Error { .. })).await;
    assert_eq!(n, Notification::error("transcription failed: model missing"));
    h.send(Signal::Ping);
    h.expect(|n| *n == Notification::Pong).await;
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_failure_closes_session() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(
        BridgeConfig::default(),
        p,
        RecordingEndpoint::failing_after(10),
    );
    h.connect().await;

    h.expect(|n| *n == Notification::Closed).await;
    h.wait_state(SessionState::Closed).await;
    assert_eq!(h.endpoint.frame_count(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn diagnostic_tone_plays_until_stopped() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::ToneStart {
        voice_id: "sine-1000".into(),
    });
    h.expect(|n| *n == Notification::error("unknown voice: sine-1000"))
        .await;

    let before = h.endpoint.frame_count();
    h.send(Signal::ToneStart {
        voice_id: "sine-440".into(),
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h
        .endpoint
        .frames_since(before)
        .iter()
        .any(|f| !f.is_silent()));

    h.send(Signal::ToneStop);
    h.send(Signal::Ping);
    h.expect(|n| *n == Notification::Pong).await;
    let stopped = h.endpoint.frame_count();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(h
        .endpoint
        .frames_since(stopped + 2)
        .iter()
        .all(|f| f.is_silent()));
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn voice_and_provider_switching() {
    let synth = Arc::new(ScriptedSynth::new(960));
    let transcriber = Arc::new(ScriptedTranscriber::saying(""));
    let p = Providers::new(Arc::clone(&synth) as _, transcriber as _)
        .with_reply("local", Arc::new(FixedReply::new("a")))
        .with_reply("remote", Arc::new(FixedReply::new("b")));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::SetVoice {
        voice_id: "sine-220".into(),
    });
    h.expect(|n| *n == Notification::error("unknown voice: sine-220"))
        .await;
    h.send(Signal::SetVoice {
        voice_id: "en_GB-alan-low".into(),
    });
    h.expect(|n| matches!(n, Notification::VoiceSet { .. })).await;

    h.send(Signal::SetProvider {
        provider: "nowhere".into(),
    });
    h.expect(|n| *n == Notification::error("unknown provider: nowhere"))
        .await;
    h.send(Signal::SetProvider {
        provider: "remote".into(),
    });
    h.expect(|n| {
        *n == Notification::ProviderSet {
            provider: "remote".into(),
        }
    })
    .await;

    h.send(Signal::Speak { text: "Hi.".into() });
    h.expect(|n| *n == Notification::Speaking).await;
    assert_eq!(*synth.voices.lock(), vec!["en_GB-alan-low".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interim_transcriptions_are_advisory() {
    let config = BridgeConfig {
        interim_interval_ms: Some(40),
        ..BridgeConfig::default()
    };
    let (p, transcriber) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying("so far"));
    let mut h = start(config, p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::MicStart);
    h.wait_state(SessionState::Recording).await;
    h.handle.capture_sink().on_frame(&frame_of(1));

    h.expect(|n| {
        *n == Notification::Transcription {
            text: "so far".into(),
            partial: true,
        }
    })
    .await;
    assert_eq!(h.handle.state(), SessionState::Recording);

    h.send(Signal::MicStop);
    h.expect(|n| matches!(n, Notification::Transcription { partial: false, .. }))
        .await;
    assert!(transcriber.call_count() >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_control_message_is_an_error() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    assert!(h.handle.signal_json("{\"type\":\"warp\"}").is_err());
    assert!(h.handle.signal_json("{\"type\":\"ping\"}").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_handle_tears_down() {
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;
    let state = h.handle.state_watch();

    let support::Harness {
        handle,
        mut notifications,
        endpoint,
        ..
    } = h;
    drop(handle);

    loop {
        let n = tokio::time::timeout(WAIT, notifications.recv())
            .await
            .unwrap()
            .unwrap();
        if n == Notification::Closed {
            break;
        }
    }
    assert_eq!(*state.borrow(), SessionState::Closed);
    let frames = endpoint.frame_count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(endpoint.frame_count(), frames);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hub_keeps_one_session_per_peer() {
    let metrics = Arc::new(voxbridge::metrics::MetricsRegistry::new());
    let hub = SessionHub::new(
        BridgeConfig::default(),
        metrics,
        Arc::new(|| {
            Arc::new(Providers::new(
                Arc::new(ScriptedSynth::new(960)),
                Arc::new(ScriptedTranscriber::saying("")),
            ))
        }),
    );

    let (mut first, _first_frames) = hub.open_channel("peer-a").unwrap();
    let (second, _second_frames) = hub.open_channel("peer-a").unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(hub.len(), 1);

    loop {
        let n = tokio::time::timeout(WAIT, first.notifications.recv())
            .await
            .unwrap()
            .unwrap();
        if n == Notification::Closed {
            break;
        }
    }

    hub.signal("peer-a", Signal::Offer { sdp: String::new() })
        .unwrap();
    assert!(hub.signal("peer-b", Signal::Ping).is_err());
    assert_eq!(hub.peers(), vec!["peer-a".to_string()]);

    assert!(hub.close("peer-a").await);
    assert!(!hub.close("peer-a").await);
    assert!(hub.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_segment_is_dropped_and_session_returns_to_idle() {
    // 10ms cap, 20ms of audio per sentence
    let config = BridgeConfig {
        max_queued_secs: 0.01,
        ..BridgeConfig::default()
    };
    let (p, _) = providers(ScriptedSynth::new(FRAME_SAMPLES), ScriptedTranscriber::saying(""));
    let mut h = start(config, p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::Speak { text: "Hi.".into() });
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Thinking,
        }
    })
    .await;
    let seen = h
        .collect_until(|n| {
            *n == Notification::State {
                state: SessionState::Idle,
            }
        })
        .await;

    assert!(!seen.contains(&Notification::Speaking));
    assert_eq!(h.metrics.counter(metric_names::QUEUE_OVERFLOW_SEGMENTS), 1);
    assert!(h.endpoint.played_values().is_empty());
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_failure_is_recoverable() {
    let reply = Arc::new(FixedReply::failing("ollama unreachable"));
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying("hello"));
    let p = p.with_reply("ollama", Arc::clone(&reply) as _);
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.utter().await;
    h.expect(|n| *n == Notification::AgentThinking).await;
    let seen = h
        .collect_until(|n| {
            *n == Notification::State {
                state: SessionState::Idle,
            }
        })
        .await;

    assert!(seen.contains(&Notification::error(
        "reply generation failed: ollama unreachable"
    )));
    assert!(!seen.contains(&Notification::Speaking));
    assert_eq!(reply.call_count(), 1);
    assert!(h.endpoint.played_values().is_empty());

    h.send(Signal::Ping);
    h.expect(|n| *n == Notification::Pong).await;
    assert_eq!(h.handle.state(), SessionState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_sentence_is_skipped_and_the_rest_plays() {
    let synth = ScriptedSynth::new(FRAME_SAMPLES * 2)
        .rule("Good", 0, 1)
        .rule("Last", 0, 3)
        .failing_on("Broken");
    let (p, _) = providers(synth, ScriptedTranscriber::saying(""));
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::Speak {
        text: "Good one. Broken one. Last one.".into(),
    });
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Thinking,
        }
    })
    .await;
    let seen = h
        .collect_until(|n| {
            *n == Notification::State {
                state: SessionState::Idle,
            }
        })
        .await;

    assert!(seen.contains(&Notification::error(
        "synthesis failed: no audio for \"Broken one.\""
    )));
    assert!(seen.contains(&Notification::Speaking));
    assert_eq!(h.endpoint.played_values(), vec![1, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_timeout_is_recoverable() {
    let config = BridgeConfig {
        engine_timeout_ms: 100,
        ..BridgeConfig::default()
    };
    let synth = ScriptedSynth::new(FRAME_SAMPLES).rule("Slow", 400, 1);
    let (p, _) = providers(synth, ScriptedTranscriber::saying(""));
    let mut h = start(config, p, RecordingEndpoint::default());
    h.connect().await;

    h.send(Signal::Speak {
        text: "Slow going.".into(),
    });
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Thinking,
        }
    })
    .await;
    let seen = h
        .collect_until(|n| {
            *n == Notification::State {
                state: SessionState::Idle,
            }
        })
        .await;
    assert!(seen.contains(&Notification::error("synthesis timed out")));
    assert!(!seen.contains(&Notification::Speaking));

    // The abandoned worker is still busy; the session keeps serving
    h.send(Signal::Speak {
        text: "Quick one.".into(),
    });
    h.expect(|n| *n == Notification::Speaking).await;
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Idle,
        }
    })
    .await;
    assert_eq!(h.endpoint.played_values(), vec![5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn model_switch_clears_history_and_applies_to_next_reply() {
    let local = Arc::new(FixedReply::new("Local answer."));
    let remote = Arc::new(FixedReply::new("Remote answer."));
    let (p, _) = providers(ScriptedSynth::new(960), ScriptedTranscriber::saying("hello"));
    let p = p
        .with_reply("local", Arc::clone(&local) as _)
        .with_reply("ollama", Arc::clone(&remote) as _);
    let mut h = start(BridgeConfig::default(), p, RecordingEndpoint::default());
    h.connect().await;

    h.utter().await;
    h.expect(|n| {
        *n == Notification::AgentReply {
            text: "Local answer.".into(),
        }
    })
    .await;
    h.expect(|n| {
        *n == Notification::State {
            state: SessionState::Idle,
        }
    })
    .await;

    h.send(Signal::SetModel {
        provider: "nowhere".into(),
        model: "x".into(),
    });
    h.expect(|n| *n == Notification::error("unknown provider: nowhere"))
        .await;
    h.send(Signal::SetModel {
        provider: "ollama".into(),
        model: "qwen2.5:3b".into(),
    });
    h.expect(|n| {
        *n == Notification::ModelSet {
            provider: "ollama".into(),
            model: "qwen2.5:3b".into(),
        }
    })
    .await;

    h.utter().await;
    h.expect(|n| {
        *n == Notification::AgentReply {
            text: "Remote answer.".into(),
        }
    })
    .await;
    assert_eq!(local.call_count(), 1);
    assert_eq!(*remote.last_turns.lock(), vec!["hello".to_string()]);
    assert_eq!(remote.last_model.lock().as_deref(), Some("qwen2.5:3b"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hub_forgets_sessions_that_ended_on_their_own() {
    let metrics = Arc::new(voxbridge::metrics::MetricsRegistry::new());
    let hub = SessionHub::new(
        BridgeConfig::default(),
        metrics,
        Arc::new(|| {
            Arc::new(Providers::new(
                Arc::new(ScriptedSynth::new(960)),
                Arc::new(ScriptedTranscriber::saying("")),
            ))
        }),
    );

    let (mut failed, _failed_frames) = hub.open_channel("peer-a").unwrap();
    hub.signal("peer-a", Signal::Offer { sdp: String::new() })
        .unwrap();
    hub.signal("peer-a", Signal::NegotiationFailed {
        reason: "ice failed".into(),
    })
    .unwrap();
    // The notification channel closes once the session loop has returned
    while tokio::time::timeout(WAIT, failed.notifications.recv())
        .await
        .unwrap()
        .is_some()
    {}
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (_next, _next_frames) = hub.open_channel("peer-b").unwrap();
    assert_eq!(hub.peers(), vec!["peer-b".to_string()]);
}
