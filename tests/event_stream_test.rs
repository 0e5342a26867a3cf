//! Black-box coverage for §8 testable property 2: event sequences are
//! monotonic and terminate with exactly one terminal event (`error` or
//! `done`); no events follow.

use arcco_agent::events::{EventBody, EventEmitter};

#[tokio::test]
async fn a_normal_turn_ends_with_exactly_one_done_event() {
    let (emitter, mut receiver) = EventEmitter::channel(16);

    emitter.status("Analisando...").await;
    emitter.emit(EventBody::Chunk { text: "Olá".to_string() }).await;
    emitter.emit(EventBody::Chunk { text: " mundo".to_string() }).await;
    emitter.done().await;
    drop(emitter);

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }

    for window in events.windows(2) {
        assert!(window[0].seq < window[1].seq, "sequence numbers must be strictly increasing");
    }

    let terminal_count = events
        .iter()
        .filter(|e| matches!(e.body, EventBody::Done | EventBody::Error { .. }))
        .count();
    assert_eq!(terminal_count, 1, "exactly one terminal event expected");
    assert!(matches!(events.last().unwrap().body, EventBody::Done), "terminal event must be last");
}

#[tokio::test]
async fn an_aborted_turn_ends_with_exactly_one_error_event() {
    let (emitter, mut receiver) = EventEmitter::channel(16);

    emitter.status("Analisando...").await;
    emitter.error("llm_error: limite de iterações atingido").await;
    drop(emitter);

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }

    let terminal_count = events
        .iter()
        .filter(|e| matches!(e.body, EventBody::Done | EventBody::Error { .. }))
        .count();
    assert_eq!(terminal_count, 1);
    assert!(matches!(events.last().unwrap().body, EventBody::Error { .. }));
}
