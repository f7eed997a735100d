//! Chunk reassembly aligned with commit and rollback boundaries.

use broker_integration::{header_names, ChunkBuffer, MessageChunk, MessageHeaders, Offset};

fn chunk(index: usize, count: usize, content: &[u8]) -> MessageChunk {
    MessageChunk {
        message_id: "invoice-17".to_string(),
        index,
        count,
        content: content.to_vec(),
    }
}

fn offset(value: u64) -> Offset {
    Offset::new("invoices[0]", value)
}

#[test]
fn three_chunks_arriving_as_2_0_1() {
    let mut buffer = ChunkBuffer::new();

    assert!(buffer
        .join_if_complete(&chunk(2, 3, b"!!"), Some(&offset(0)))
        .is_none());
    assert!(buffer
        .join_if_complete(&chunk(0, 3, b"hello "), Some(&offset(1)))
        .is_none());
    let joined = buffer
        .join_if_complete(&chunk(1, 3, b"world"), Some(&offset(2)))
        .unwrap();

    assert_eq!(joined.payload, b"hello world!!");
    assert_eq!(joined.message_id, "invoice-17");
    assert_eq!(joined.offsets, vec![offset(0), offset(1), offset(2)]);
}

#[test]
fn redelivered_chunk_with_different_bytes_overwrites() {
    let mut buffer = ChunkBuffer::new();

    buffer.join_if_complete(&chunk(0, 2, b"first"), Some(&offset(0)));
    buffer.join_if_complete(&chunk(0, 2, b"second"), Some(&offset(0)));
    let joined = buffer
        .join_if_complete(&chunk(1, 2, b"-tail"), Some(&offset(1)))
        .unwrap();

    assert_eq!(joined.payload, b"second-tail");
    assert_eq!(joined.offsets.len(), 2);
}

#[test]
fn rollback_then_redelivery_completes_cleanly() {
    let mut buffer = ChunkBuffer::new();

    buffer.join_if_complete(&chunk(0, 3, b"a"), Some(&offset(0)));
    buffer.join_if_complete(&chunk(1, 3, b"b"), Some(&offset(1)));
    let mut discarded = buffer.rollback();
    discarded.sort();

    assert_eq!(discarded, vec![offset(0), offset(1)]);
    assert_eq!(buffer.pending_entries(), 0);

    for (index, content) in [b"a", b"b"].iter().enumerate() {
        assert!(buffer
            .join_if_complete(&chunk(index, 3, *content), Some(&offset(index as u64)))
            .is_none());
    }
    let joined = buffer
        .join_if_complete(&chunk(2, 3, b"c"), Some(&offset(2)))
        .unwrap();
    assert_eq!(joined.payload, b"abc");

    buffer.commit();
    assert_eq!(buffer.pending_entries(), 0);
    assert!(buffer.rollback().is_empty());
}

#[test]
fn completed_entries_are_also_discarded_on_rollback() {
    let mut buffer = ChunkBuffer::new();

    buffer
        .join_if_complete(&chunk(0, 1, b"whole"), Some(&offset(4)))
        .unwrap();

    assert_eq!(buffer.rollback(), vec![offset(4)]);
}

#[test]
fn entries_untouched_since_the_last_boundary_survive_rollback() {
    let mut buffer = ChunkBuffer::new();
    buffer.join_if_complete(&chunk(0, 2, b"held"), Some(&offset(0)));
    buffer.commit();

    let other = MessageChunk {
        message_id: "invoice-18".to_string(),
        ..chunk(0, 2, b"other")
    };
    buffer.join_if_complete(&other, Some(&offset(1)));

    assert_eq!(buffer.rollback(), vec![offset(1)]);
    assert_eq!(buffer.pending_entries(), 1);
}

#[test]
fn chunk_headers_round_trip() {
    let chunks = MessageChunk::split("invoice-17", &[7u8; 10], 4);
    assert_eq!(
        chunks.iter().map(|c| c.content.len()).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );

    let mut headers = MessageHeaders::new();
    chunks[2].write_headers(&mut headers);

    assert_eq!(headers.get(header_names::MESSAGE_ID), Some("invoice-17"));
    assert_eq!(headers.get(header_names::CHUNK_ID), Some("2"));
    assert_eq!(headers.get(header_names::CHUNKS_COUNT), Some("3"));
}
