//! End-to-end transfer flows: a simulated publisher drives a session
//! through the full exchange, chunk stream included.

use otakit_core::message::{ControlMessage, MessageKind};
use otakit_core::wire::ChunkHeader;
use otakit_services::{Outcome, Session};
use zerocopy::AsBytes;

use crate::Scratch;

const TOPIC: &str = "anycloud/CY8CPROTO_062_4343W/subscriber/image42";

/// Split an image into chunk messages the way the publisher does.
fn chunk_stream(image: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let total = image.len().div_ceil(chunk_size) as u32;
    image
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, payload)| {
            let mut message = ChunkHeader::new(index as u16, total, payload.len() as u32)
                .as_bytes()
                .to_vec();
            message.extend_from_slice(payload);
            message
        })
        .collect()
}

fn update_available() -> ControlMessage {
    let mut msg = ControlMessage::new(MessageKind::UpdateAvailable, TOPIC);
    msg.extra.insert("Version".into(), "2.1.0".into());
    msg.extra.insert("Board".into(), "CY8CPROTO_062_4343W".into());
    msg
}

/// A repeating but non-trivial image body.
fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn job_flow_downloads_a_multi_chunk_image() {
    let scratch = Scratch::new("job-flow");
    let out = scratch.path("image.bin");
    let mut session = Session::new(TOPIC, &out, false);

    let request = session.availability_request();
    assert_eq!(request.kind, MessageKind::RequestAvailability);
    assert_eq!(request.unique_topic, TOPIC);

    // Publisher announces the job; subscriber must request the download
    // and echo the job document's fields.
    let (outcome, reply) = session.handle_message(TOPIC, &update_available().to_json());
    assert!(matches!(outcome, Outcome::Continuing));
    let reply = reply.expect("must request the update");
    assert_eq!(reply.kind, MessageKind::RequestUpdate);
    assert_eq!(reply.extra["Version"], "2.1.0");

    // Three chunks: two full, one short.
    let image = test_image(4096 * 2 + 1500);
    let chunks = chunk_stream(&image, 4096);
    assert_eq!(chunks.len(), 3);

    let mut success_reply = None;
    for chunk in &chunks {
        let (outcome, reply) = session.handle_message(TOPIC, chunk);
        match outcome {
            Outcome::Continuing => assert!(reply.is_none()),
            Outcome::Completed(path) => {
                assert_eq!(path, out);
                success_reply = reply;
            }
            Outcome::Aborted(e) => panic!("unexpected abort: {e}"),
        }
    }

    let success = success_reply.expect("final chunk must produce a result report");
    assert_eq!(success.kind, MessageKind::ResultSuccess);
    assert_eq!(success.extra["Board"], "CY8CPROTO_062_4343W");
    assert_eq!(std::fs::read(&out).unwrap(), image);

    // Publisher acknowledges; the exchange is over.
    assert!(!session.is_finished());
    let ack = ControlMessage::new(MessageKind::ResultAck, TOPIC).to_json();
    let (outcome, reply) = session.handle_message(TOPIC, &ack);
    assert!(matches!(outcome, Outcome::Continuing));
    assert!(reply.is_none());
    assert!(session.is_finished());
}

#[test]
fn direct_flow_skips_the_job_gate() {
    let scratch = Scratch::new("direct-flow");
    let mut session = Session::new(TOPIC, scratch.path("image.bin"), true);

    // Direct flow accepts the announcement from any topic.
    let (_, reply) = session.handle_message(
        "anycloud/CY8CPROTO_062_4343W/publish_notify",
        &update_available().to_json(),
    );
    assert_eq!(reply.unwrap().kind, MessageKind::RequestDirectUpdate);
}

#[test]
fn dropped_chunk_aborts_then_a_fresh_stream_recovers() {
    let scratch = Scratch::new("recovery");
    let out = scratch.path("image.bin");
    let mut session = Session::new(TOPIC, &out, false);

    let image = test_image(3000);
    let chunks = chunk_stream(&image, 1000);

    // Chunk 1 is lost; chunk 2 must abort the transfer with a failure report.
    session.handle_message(TOPIC, &chunks[0]);
    let (outcome, reply) = session.handle_message(TOPIC, &chunks[2]);
    assert!(matches!(outcome, Outcome::Aborted(_)));
    assert_eq!(reply.unwrap().kind, MessageKind::ResultFailure);
    assert!(!out.exists());

    // The publisher restarts from chunk 0; this attempt completes.
    let mut completed = false;
    for chunk in &chunks {
        if let (Outcome::Completed(_), _) = session.handle_message(TOPIC, chunk) {
            completed = true;
        }
    }
    assert!(completed);
    assert_eq!(std::fs::read(&out).unwrap(), image);
}

#[test]
fn exact_multiple_image_needs_no_short_final_chunk() {
    let scratch = Scratch::new("exact");
    let out = scratch.path("image.bin");
    let mut session = Session::new(TOPIC, &out, false);

    let image = test_image(2048 * 4);
    for chunk in &chunk_stream(&image, 2048) {
        session.handle_message(TOPIC, chunk);
    }
    assert_eq!(std::fs::read(&out).unwrap(), image);
}

#[test]
fn no_update_ends_the_exchange_without_a_download() {
    let scratch = Scratch::new("no-update");
    let out = scratch.path("image.bin");
    let mut session = Session::new(TOPIC, &out, false);

    let msg = ControlMessage::new(MessageKind::NoUpdate, TOPIC).to_json();
    let (outcome, reply) = session.handle_message(TOPIC, &msg);
    assert!(matches!(outcome, Outcome::Continuing));
    assert!(reply.is_none());
    assert!(session.is_finished());
    assert!(!out.exists());
}
