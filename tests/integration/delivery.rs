use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Delivery: asynchrony, failure reporting, drain on shutdown
// ══════════════════════════════════════════════════════════════════════════════

async fn announce(exporter: &Exporter) -> Result<()> {
    exporter
        .send(&packet(1, &[template_set(256, FLOW_FIELDS)]))
        .await
}

async fn send_flows(exporter: &Exporter, n: u8) -> Result<()> {
    for i in 0..n {
        let body = flow_record([10, 0, 0, i], [10, 0, 1, i], 1000 + i as u16, 6);
        exporter.send(&packet(1, &[data_set(256, &body)])).await?;
    }
    Ok(())
}

/// Decoding keeps going while the bus is stuck on a publish.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decoding_does_not_wait_for_the_bus() -> Result<()> {
    let (bus, release) = RecordingBus::gated();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    announce(&exporter).await?;
    send_flows(&exporter, 10).await?;

    let stats = collector.stats.clone();
    wait_for(5, || stats.snapshot().enqueued == 10).await?;
    assert_eq!(bus.count(), 0, "nothing may publish before release");

    // Enough tokens for every flush that may have been cut.
    for _ in 0..20 {
        let _ = release.send(());
    }
    wait_for(5, || bus.count() == 10).await?;
    collector.stop().await?;

    let ports: Vec<_> = bus
        .records()
        .iter()
        .map(|r| r["L4_DST_PORT"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ports.first().map(String::as_str), Some("1000"));
    assert_eq!(ports.last().map(String::as_str), Some("1009"));
    Ok(())
}

/// A bus that never accepts: each record is reported exactly once.
#[tokio::test]
async fn test_failures_are_reported_once_per_record() -> Result<()> {
    let bus = DownBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    announce(&exporter).await?;
    send_flows(&exporter, 4).await?;

    let stats = collector.stats.clone();
    wait_for(5, || stats.snapshot().failed == 4).await?;
    let mut failures = collector.stop().await?;

    let mut reported = Vec::new();
    while let Some(failure) = failures.recv().await {
        assert_eq!(failure.error, BusError::Connect("all brokers down".into()));
        assert_eq!(failure.message.topic, "netflow");
        reported.push(failure.message.payload);
    }
    assert_eq!(reported.len(), 4);
    reported.sort();
    reported.dedup();
    assert_eq!(reported.len(), 4);

    // Every batch was tried once plus its two retries.
    let attempts = *bus.attempts.lock().unwrap();
    assert_eq!(attempts % 3, 0);
    assert!(attempts >= 3);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.delivered, 0);
    assert_eq!(snapshot.failed, 4);
    Ok(())
}

/// Records still queued at shutdown are published before the pipeline exits.
#[tokio::test]
async fn test_stop_drains_queued_records() -> Result<()> {
    let bus = RecordingBus::default();
    let settings = DeliverySettings {
        flush_interval: Duration::from_secs(3600),
        ..test_settings()
    };
    let collector = Collector::start(bus.clone(), settings).await?;
    let exporter = Exporter::new(collector.addr).await?;

    announce(&exporter).await?;
    send_flows(&exporter, 25).await?;

    let stats = collector.stats.clone();
    wait_for(5, || stats.snapshot().enqueued == 25).await?;
    assert_eq!(bus.count(), 0);

    collector.stop().await?;
    assert_eq!(bus.count(), 25);
    assert_eq!(stats.snapshot().delivered, 25);
    Ok(())
}

/// A full queue drops records instead of blocking the decode path.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_drops_records() -> Result<()> {
    let (bus, release) = RecordingBus::gated();
    let settings = DeliverySettings {
        queue_capacity: 2,
        max_batch: 1,
        ..test_settings()
    };
    let collector = Collector::start(bus.clone(), settings).await?;
    let exporter = Exporter::new(collector.addr).await?;

    announce(&exporter).await?;
    send_flows(&exporter, 20).await?;

    // One record held by the stuck publish, two queued; the rest dropped.
    let stats = collector.stats.clone();
    wait_for(5, || {
        let s = stats.snapshot();
        s.enqueued + s.dropped == 20
    })
    .await?;
    let snapshot = stats.snapshot();
    assert!(snapshot.dropped > 0);
    assert!(snapshot.enqueued <= 4, "enqueued {}", snapshot.enqueued);

    for _ in 0..snapshot.enqueued {
        let _ = release.send(());
    }
    collector.stop().await?;
    assert_eq!(bus.count() as u64, snapshot.enqueued);
    Ok(())
}
