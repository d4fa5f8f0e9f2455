//! Pipeline behavior under a live consumer task and concurrent producers.

use std::time::Duration;

use robowrap::pipeline::{
    Color, LogDest, LogEntry, LogPipeline, LogProducer, MemorySink, PipelineConfig,
};
use tokio_util::sync::CancellationToken;

fn pipeline(flush_ms: u64, max_lines: usize) -> LogPipeline<MemorySink> {
    LogPipeline::new(
        MemorySink::new(),
        PipelineConfig {
            flush_interval: Duration::from_millis(flush_ms),
            max_progress_lines: max_lines,
        },
    )
}

#[tokio::test]
async fn concurrent_producers_keep_per_queue_order() {
    let mut p = pipeline(5, 100_000);
    let shutdown = CancellationToken::new();

    let spawn_producer = |producer: LogProducer, tag: &'static str| {
        tokio::spawn(async move {
            for i in 0..200 {
                producer.progress(LogEntry::new(format!("{tag}-{i}")));
                tokio::task::yield_now().await;
            }
        })
    };
    let a = spawn_producer(p.producer(), "a");
    let b = spawn_producer(p.producer(), "b");

    let consumer = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            p.run(shutdown).await;
            p.into_sink()
        })
    };

    a.await.expect("producer a");
    b.await.expect("producer b");
    shutdown.cancel();
    let sink = consumer.await.expect("consumer");

    assert_eq!(sink.progress.len(), 400);
    for tag in ["a", "b"] {
        let ours: Vec<usize> = sink
            .progress
            .iter()
            .filter_map(|l| l.strip_prefix(&format!("{tag}-")))
            .map(|n| n.parse().expect("sequence number"))
            .collect();
        assert_eq!(ours, (0..200).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn cancellation_drains_late_entries() {
    let mut p = pipeline(10_000, 100_000);
    let producer = p.producer();
    let shutdown = CancellationToken::new();

    // The flush interval is far longer than the test; only the final drain
    // can deliver these.
    producer.progress(LogEntry::new("late-1"));
    producer.copy_result(LogEntry::new("late-2"));
    producer.error(LogEntry::error("late-3"));
    shutdown.cancel();
    p.run(shutdown).await;

    let sink = p.into_sink();
    assert_eq!(sink.progress, vec!["late-1"]);
    assert_eq!(sink.copy_result, vec!["late-2"]);
    assert_eq!(sink.error, vec!["late-3"]);
}

#[tokio::test]
async fn retention_survives_many_flush_cycles() {
    let max = 400;
    let mut p = pipeline(5, max);
    let producer = p.producer();

    for round in 0..10 {
        for i in 0..max {
            producer.progress(
                LogEntry::new(format!("r{round}-{i}")).with_color(Color::Default),
            );
        }
        p.flush();
        assert!(p.retained_progress_lines() <= max);
    }

    let sink = p.into_sink();
    assert!(sink.progress.len() <= max);
    // Whatever survived, the newest line is intact at the tail.
    assert_eq!(sink.progress.last().map(String::as_str), Some("r9-399"));
}

#[tokio::test]
async fn error_destination_never_trimmed_by_progress_cap() {
    let max = 100;
    let mut p = pipeline(5, max);
    let producer = p.producer();

    for i in 0..max * 3 {
        producer.progress(LogEntry::new(format!("p-{i}")).with_color(Color::Default));
        producer.error(LogEntry::error(format!("e-{i}")));
    }
    p.flush();

    let sink = p.into_sink();
    assert!(sink.progress.len() <= max);
    assert_eq!(sink.error.len(), max * 3);
    assert!(sink
        .appends
        .iter()
        .filter(|(d, _)| *d == LogDest::Error)
        .all(|(_, block)| block.color == Color::Red));
}
