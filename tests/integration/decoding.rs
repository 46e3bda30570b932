use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Decode path: exporter datagrams → records on the bus
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_template_then_data_in_one_datagram() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    let mut body = flow_record([10, 0, 0, 1], [10, 0, 0, 2], 443, 6);
    body.extend(flow_record([10, 0, 0, 3], [10, 0, 0, 4], 53, 17));
    exporter
        .send(&packet(1, &[template_set(256, FLOW_FIELDS), data_set(256, &body)]))
        .await?;

    wait_for(5, || bus.count() == 2).await?;
    collector.stop().await?;

    let records = bus.records();
    assert_eq!(
        records[0],
        serde_json::json!({
            "IPV4_SRC_ADDR": "10.0.0.1",
            "IPV4_DST_ADDR": "10.0.0.2",
            "L4_DST_PORT": "443",
            "PROTOCOL": "6",
        })
    );
    assert_eq!(records[1]["L4_DST_PORT"], "53");

    for m in bus.published.lock().unwrap().iter() {
        assert_eq!(m.topic, "netflow");
    }
    Ok(())
}

#[tokio::test]
async fn test_data_before_template_is_skipped() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    let early = flow_record([192, 0, 2, 1], [192, 0, 2, 2], 80, 6);
    let late = flow_record([192, 0, 2, 3], [192, 0, 2, 4], 8080, 6);
    exporter.send(&packet(1, &[data_set(256, &early)])).await?;
    exporter.send(&packet(1, &[template_set(256, FLOW_FIELDS)])).await?;
    exporter.send(&packet(1, &[data_set(256, &late)])).await?;

    wait_for(5, || bus.count() >= 1).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    collector.stop().await?;

    let records = bus.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["IPV4_SRC_ADDR"], "192.0.2.3");
    Ok(())
}

#[tokio::test]
async fn test_redefined_template_replaces_layout() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    exporter
        .send(&packet(1, &[template_set(300, FLOW_FIELDS)]))
        .await?;
    // Same key, new layout: IN_BYTES/4, IN_PKTS/4
    exporter
        .send(&packet(
            1,
            &[
                template_set(300, &[(1, 4), (2, 4)]),
                data_set(300, &[0, 0, 5, 220, 0, 0, 0, 3]),
            ],
        ))
        .await?;

    wait_for(5, || bus.count() == 1).await?;
    collector.stop().await?;

    let record = &bus.records()[0];
    assert_eq!(
        *record,
        serde_json::json!({ "IN_BYTES": "1500", "IN_PKTS": "3" })
    );
    Ok(())
}

#[tokio::test]
async fn test_templates_are_namespaced_by_source_id() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    // Source 1 uses template 256 for flows; source 2 uses it for counters.
    exporter
        .send(&packet(1, &[template_set(256, FLOW_FIELDS)]))
        .await?;
    exporter
        .send(&packet(2, &[template_set(256, &[(2, 4)])]))
        .await?;
    exporter
        .send(&packet(2, &[data_set(256, &[0, 0, 0, 9])]))
        .await?;
    exporter
        .send(&packet(
            1,
            &[data_set(256, &flow_record([10, 1, 1, 1], [10, 2, 2, 2], 22, 6))],
        ))
        .await?;

    wait_for(5, || bus.count() == 2).await?;
    let templates = collector.store.len();
    collector.stop().await?;

    assert_eq!(templates, 2);
    let records = bus.records();
    assert_eq!(records[0], serde_json::json!({ "IN_PKTS": "9" }));
    assert_eq!(records[1]["IPV4_DST_ADDR"], "10.2.2.2");
    Ok(())
}

#[tokio::test]
async fn test_templates_are_namespaced_by_exporter() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let announcer = Exporter::new(collector.addr).await?;
    let other = Exporter::new(collector.addr).await?;

    // Same source id and template id, different layouts per address.
    announcer
        .send(&packet(1, &[template_set(256, FLOW_FIELDS)]))
        .await?;
    other
        .send(&packet(1, &[template_set(256, &[(2, 4)])]))
        .await?;
    wait_for(5, || collector.store.len() == 2).await?;

    other
        .send(&packet(1, &[data_set(256, &[0, 0, 0, 9])]))
        .await?;
    wait_for(5, || bus.count() == 1).await?;

    let body = flow_record([10, 0, 0, 1], [10, 0, 0, 2], 443, 6);
    announcer.send(&packet(1, &[data_set(256, &body)])).await?;
    wait_for(5, || bus.count() == 2).await?;
    collector.stop().await?;

    let records = bus.records();
    assert_eq!(records[0], serde_json::json!({ "IN_PKTS": "9" }));
    assert_eq!(records[1]["IPV4_SRC_ADDR"], "10.0.0.1");
    assert_eq!(records[1]["L4_DST_PORT"], "443");
    Ok(())
}

#[tokio::test]
async fn test_data_ahead_of_template_in_one_datagram() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    let body = flow_record([10, 0, 0, 1], [10, 0, 0, 2], 53, 17);
    exporter
        .send(&packet(
            1,
            &[data_set(256, &body), template_set(256, FLOW_FIELDS)],
        ))
        .await?;

    wait_for(5, || bus.count() == 1).await?;
    collector.stop().await?;

    assert_eq!(bus.records()[0]["PROTOCOL"], "17");
    Ok(())
}

#[tokio::test]
async fn test_malformed_datagrams_do_not_stop_the_collector() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    let mut v5 = packet(1, &[]);
    v5[1] = 5;
    let mut overrun = packet(1, &[template_set(256, FLOW_FIELDS)]);
    overrun.extend_from_slice(&[1, 0, 0, 255, 0, 0]);
    let mut bad_template = packet(1, &[]);
    bad_template.extend_from_slice(&[0, 0, 0, 12, 1, 1, 0, 9, 0, 8, 0, 4]);

    exporter.send(&[]).await?;
    exporter.send(&[0, 9, 0, 1, 0]).await?;
    exporter.send(&v5).await?;
    exporter.send(&overrun).await?;
    exporter.send(&bad_template).await?;

    // The overrunning datagram still delivered its template.
    exporter
        .send(&packet(
            1,
            &[data_set(256, &flow_record([10, 9, 9, 9], [10, 8, 8, 8], 123, 17))],
        ))
        .await?;

    wait_for(5, || bus.count() == 1).await?;
    collector.stop().await?;

    assert_eq!(bus.records()[0]["PROTOCOL"], "17");
    Ok(())
}

#[tokio::test]
async fn test_options_data_and_unknown_fields() -> Result<()> {
    let bus = RecordingBus::default();
    let collector = Collector::start(bus.clone(), test_settings()).await?;
    let exporter = Exporter::new(collector.addr).await?;

    // Options template 257: scope SYSTEM/4; SAMPLING_INTERVAL/4, SAMPLING_ALGORITHM/1
    let options = {
        let mut s = vec![0, 1, 0, 0];
        s.extend_from_slice(&[1, 1, 0, 4, 0, 8, 0, 1, 0, 4, 0, 34, 0, 4, 0, 35, 0, 1, 0, 0]);
        let len = s.len() as u16;
        s[2..4].copy_from_slice(&len.to_be_bytes());
        s
    };
    // Template 258 carries a field type no registry knows.
    let unknown = template_set(258, &[(4, 1), (40000, 3)]);

    exporter
        .send(&packet(
            7,
            &[
                options,
                unknown,
                data_set(257, &[10, 0, 0, 1, 0, 0, 0, 64, 2, 0, 0, 0]),
                data_set(258, &[6, 0xab, 0xcd, 0xef]),
            ],
        ))
        .await?;

    wait_for(5, || bus.count() == 2).await?;
    collector.stop().await?;

    let records = bus.records();
    assert_eq!(
        records[0],
        serde_json::json!({
            "SCOPE_SYSTEM": "167772161",
            "SAMPLING_INTERVAL": "64",
            "SAMPLING_ALGORITHM": "random",
        })
    );
    assert_eq!(
        records[1],
        serde_json::json!({ "PROTOCOL": "6", "field-40000": "abcdef" })
    );
    Ok(())
}
