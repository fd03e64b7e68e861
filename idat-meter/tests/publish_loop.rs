use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idat_devkit::{BoundedTicker, TestHarness};
use idat_meter::metrics::{format_payload, scale};
use idat_meter::{stop_channel, LoopState, MeterError, MetricGenerator, CONTROL_TOPIC, METERS};
use tokio::task::JoinHandle;

/// Toggle boost on and off from another task until `done` is set.
/// Resolves to the number of control messages delivered.
fn spawn_control_writer(harness: &TestHarness, done: Arc<AtomicBool>) -> JoinHandle<u64> {
    let broker = harness.broker.clone();
    let listener = harness.listener.clone();
    tokio::spawn(async move {
        let mut writes = 0u64;
        while !done.load(Ordering::SeqCst) {
            let payload = if writes % 2 == 0 { "1" } else { "0" };
            broker.simulate_incoming(listener.as_ref(), CONTROL_TOPIC, payload);
            writes += 1;
            tokio::task::yield_now().await;
        }
        writes
    })
}

#[tokio::test]
async fn test_runs_exactly_n_cycles() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(1);
    let (handle, stop) = stop_channel();
    let mut ticker = BoundedTicker::new(4, handle);

    let stats = publish_loop.run(&mut ticker, stop).await.unwrap();

    assert_eq!(stats.cycles, 4);
    assert_eq!(stats.published, 20);
    assert_eq!(stats.failed, 0);
    for spec in &METERS {
        harness.assert_message_count(spec.topic, 4).unwrap();
    }
    assert_eq!(publish_loop.state(), LoopState::Stopped);
    assert_eq!(harness.broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_payloads_match_seeded_generator() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(77);
    let (handle, stop) = stop_channel();
    let mut ticker = BoundedTicker::new(3, handle);

    publish_loop.run(&mut ticker, stop).await.unwrap();

    let mut expected = Vec::new();
    let mut generator = MetricGenerator::seeded(77);
    for _ in 0..3 {
        for reading in generator.generate_cycle(&METERS).unwrap() {
            expected.push((reading.spec.topic.to_string(), format_payload(scale(reading.base, 1))));
        }
    }

    let actual: Vec<(String, String)> = harness
        .broker
        .get_published_messages()
        .into_iter()
        .map(|m| (m.topic, m.payload))
        .collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn test_same_seed_same_factor_same_output() {
    let run = |seed: u64, boost: bool| async move {
        let harness = TestHarness::new();
        if boost {
            harness.send_control("1");
        }
        let mut publish_loop = harness.publish_loop(seed);
        let (handle, stop) = stop_channel();
        publish_loop.run(&mut BoundedTicker::new(2, handle), stop).await.unwrap();
        harness.broker.get_published_messages()
    };

    assert_eq!(run(5, true).await, run(5, true).await);
    assert_eq!(run(5, false).await, run(5, false).await);
    assert_ne!(run(5, true).await, run(5, false).await);
}

#[tokio::test]
async fn test_control_message_mid_run() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(3);
    let (handle, stop) = stop_channel();

    let broker = harness.broker.clone();
    let listener = harness.listener.clone();
    let mut ticker = BoundedTicker::new(4, handle).with_hook(move |tick| {
        let payload = match tick {
            1 => "1",
            2 => "abc",
            _ => "0",
        };
        broker.simulate_incoming(listener.as_ref(), CONTROL_TOPIC, payload);
    });

    publish_loop.run(&mut ticker, stop).await.unwrap();

    let mut generator = MetricGenerator::seeded(3);
    let expected_factors = [1u8, 10, 10, 1];
    let voltages = harness.broker.payloads_for("idat/medidor/voltaje");
    assert_eq!(voltages.len(), 4);
    for (cycle, factor) in expected_factors.iter().enumerate() {
        let readings = generator.generate_cycle(&METERS).unwrap();
        let expected = format_payload(scale(readings[0].base, *factor));
        assert_eq!(voltages[cycle], expected, "cycle {cycle}");
    }
}

#[tokio::test]
async fn test_single_topic_failure_does_not_block_cycle() {
    let harness = TestHarness::new();
    harness.broker.fail_topic("idat/medidor/potencia");
    let mut publish_loop = harness.publish_loop(9);
    publish_loop.start().await.unwrap();

    let report = publish_loop.run_cycle().unwrap();

    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.failures(), 1);
    let power = report.outcome(idat_meter::Metric::Power).unwrap();
    assert!(matches!(&power.result, Err(reason) if reason.contains("mock rejection")));
    for spec in METERS.iter().filter(|s| s.topic != "idat/medidor/potencia") {
        harness.assert_message_count(spec.topic, 1).unwrap();
    }
    harness.assert_message_count("idat/medidor/potencia", 0).unwrap();
    assert_eq!(publish_loop.stats().failed, 1);
    assert_eq!(publish_loop.state(), LoopState::Running);
}

#[tokio::test]
async fn test_fatal_transport_error_stops_loop() {
    let harness = TestHarness::new();
    harness.broker.fatal_after(7);
    let mut publish_loop = harness.publish_loop(4);
    let (handle, stop) = stop_channel();
    let mut ticker = BoundedTicker::new(10, handle);

    let result = publish_loop.run(&mut ticker, stop).await;

    assert!(matches!(result, Err(MeterError::Transport(_))));
    assert_eq!(publish_loop.state(), LoopState::Stopped);
    assert_eq!(harness.get_stats().total_messages, 7);
    // The second cycle was cut short
    assert_eq!(publish_loop.stats().cycles, 1);
    assert_eq!(publish_loop.stats().published, 7);
    assert_eq!(harness.broker.disconnect_count(), 1);
}

#[tokio::test]
async fn test_refused_connection_never_publishes() {
    let harness = TestHarness::new();
    harness.broker.refuse_connection("not authorized");
    let mut publish_loop = harness.publish_loop(2);
    let (handle, stop) = stop_channel();

    let result = publish_loop.run(&mut BoundedTicker::new(3, handle), stop).await;

    assert!(matches!(result, Err(MeterError::Connection(_))));
    assert_eq!(harness.get_stats().total_messages, 0);
    assert_eq!(harness.broker.disconnect_count(), 1);
    assert!(matches!(publish_loop.run_cycle(), Err(MeterError::NotRunning(LoopState::Stopped))));
}

#[tokio::test]
async fn test_stop_before_start() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(2);
    let (handle, stop) = stop_channel();
    handle.request_stop();

    let stats = publish_loop.run(&mut BoundedTicker::new(3, handle), stop).await.unwrap();

    assert_eq!(stats.cycles, 0);
    assert_eq!(harness.broker.disconnect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_control_never_splits_a_cycle() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(11);
    let (handle, stop) = stop_channel();
    let mut ticker = BoundedTicker::new(200, handle);

    let done = Arc::new(AtomicBool::new(false));
    let writer = spawn_control_writer(&harness, done.clone());

    let stats = tokio::time::timeout(Duration::from_secs(10), publish_loop.run(&mut ticker, stop))
        .await
        .expect("publish loop stalled")
        .unwrap();
    done.store(true, Ordering::SeqCst);
    assert!(writer.await.unwrap() > 0);
    assert_eq!(stats.cycles, 200);

    let messages = harness.broker.get_published_messages();
    assert_eq!(messages.len(), 200 * METERS.len());

    let mut generator = MetricGenerator::seeded(11);
    for (cycle, published) in messages.chunks(METERS.len()).enumerate() {
        let readings = generator.generate_cycle(&METERS).unwrap();
        let single_factor = [1u8, 10].iter().any(|&factor| {
            readings
                .iter()
                .zip(published)
                .all(|(reading, msg)| msg.payload == format_payload(scale(reading.base, factor)))
        });
        assert!(single_factor, "cycle {cycle} mixes factors");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cycle_reports_match_snapshot_under_concurrent_control() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(12);
    publish_loop.start().await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = spawn_control_writer(&harness, done.clone());

    let mut generator = MetricGenerator::seeded(12);
    for _ in 0..100 {
        let report = publish_loop.run_cycle().unwrap();
        let readings = generator.generate_cycle(&METERS).unwrap();
        assert_eq!(report.outcomes.len(), METERS.len());
        for (reading, outcome) in readings.iter().zip(&report.outcomes) {
            let expected = format_payload(scale(reading.base, report.factor));
            assert_eq!(outcome.payload, expected, "cycle {}", report.cycle);
        }
        tokio::task::yield_now().await;
    }

    done.store(true, Ordering::SeqCst);
    assert!(writer.await.unwrap() > 0);
}
