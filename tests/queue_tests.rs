// SPDX-License-Identifier: MPL-2.0

//! Integration tests for the frame queue

use camera_pipeline::backends::camera::{Orientation, PixelFormat, PixelFrame, RawFrame, Side};
use camera_pipeline::errors::ConfigError;
use camera_pipeline::pipeline::FrameQueue;
use std::sync::Arc;
use std::thread;

fn frame(side: Side, sequence: u64) -> PixelFrame {
    let raw = RawFrame::packed(PixelFormat::NV12, 2, 2, vec![0; 6], sequence);
    PixelFrame::from_raw(raw, side, Orientation::Rotate0, sequence, 1)
}

#[test]
fn test_capacity_two_drops_oldest() {
    // F1, F2, F3 into a queue of two: F3 evicts F1
    let queue = FrameQueue::new(2).unwrap();
    assert!(queue.push(Side::Front, frame(Side::Front, 1)).is_none());
    assert!(queue.push(Side::Front, frame(Side::Front, 2)).is_none());

    let dropped = queue.push(Side::Front, frame(Side::Front, 3));
    assert_eq!(dropped.map(|f| f.sequence), Some(1));

    assert_eq!(queue.pop(Side::Front).map(|f| f.sequence), Some(2));
    assert_eq!(queue.pop(Side::Front).map(|f| f.sequence), Some(3));
    assert!(queue.pop(Side::Front).is_none());
}

#[test]
fn test_length_never_exceeds_capacity() {
    let queue = FrameQueue::new(3).unwrap();
    for seq in 0..20 {
        let dropped = queue.push(Side::Back, frame(Side::Back, seq));
        assert!(queue.len(Side::Back) <= 3);
        if seq >= 3 {
            // The evicted frame is the oldest one present before the push
            assert_eq!(dropped.map(|f| f.sequence), Some(seq - 3));
        }
    }
}

#[test]
fn test_interleaved_sides_keep_their_order() {
    let queue = FrameQueue::new(8).unwrap();
    let pattern = [Side::Front, Side::Back, Side::Back, Side::Front, Side::Back, Side::Front];
    for (seq, side) in pattern.iter().enumerate() {
        queue.push(*side, frame(*side, seq as u64));
    }

    let drain = |side| {
        let mut out = Vec::new();
        while let Some(f) = queue.pop(side) {
            assert_eq!(f.side, side);
            out.push(f.sequence);
        }
        out
    };
    assert_eq!(drain(Side::Front), vec![0, 3, 5]);
    assert_eq!(drain(Side::Back), vec![1, 2, 4]);
}

#[test]
fn test_stats_add_up() {
    let queue = FrameQueue::new(2).unwrap();
    for seq in 0..5 {
        queue.push(Side::Front, frame(Side::Front, seq));
    }
    queue.pop(Side::Front);

    let stats = queue.stats(Side::Front);
    assert_eq!(stats.pushed, 5);
    assert_eq!(stats.pushed, stats.popped + stats.dropped + stats.len as u64);
}

#[test]
fn test_reconfigure_clears_and_filters_size() {
    let queue = FrameQueue::new(3).unwrap();
    queue.push(Side::Front, frame(Side::Front, 1));
    queue.push(Side::Back, frame(Side::Back, 1));

    queue.reconfigure(4, 4);
    assert!(queue.is_empty(Side::Front));
    assert!(queue.is_empty(Side::Back));

    // Old-size frame is handed back to the producer
    let rejected = queue.push(Side::Front, frame(Side::Front, 2));
    assert_eq!(rejected.map(|f| f.sequence), Some(2));
    assert_eq!(queue.stats(Side::Front).rejected, 1);
}

#[test]
fn test_invalid_capacity() {
    assert!(matches!(FrameQueue::new(0), Err(ConfigError::InvalidCapacity(0))));
}

#[test]
fn test_concurrent_producer_consumer_preserves_order() {
    let queue = Arc::new(FrameQueue::new(4).unwrap());
    let producer_queue = Arc::clone(&queue);

    let producer = thread::spawn(move || {
        for seq in 0..2000 {
            producer_queue.push(Side::Front, frame(Side::Front, seq));
        }
    });

    let mut last = None;
    let mut received = 0;
    while !producer.is_finished() || !queue.is_empty(Side::Front) {
        if let Some(f) = queue.pop(Side::Front) {
            if let Some(prev) = last {
                assert!(f.sequence > prev, "{} after {}", f.sequence, prev);
            }
            last = Some(f.sequence);
            received += 1;
        }
    }
    producer.join().unwrap();
    assert!(received > 0);
    assert_eq!(last, Some(1999));
}
