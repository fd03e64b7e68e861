use idat_devkit::TestHarness;
use idat_meter::metrics::{derive_power, scale};
use idat_meter::{LoopState, Metric, Reading, CONTROL_TOPIC};

const VOLTAGE: &str = "idat/medidor/voltaje";
const CURRENT: &str = "idat/medidor/corriente";
const POWER: &str = "idat/medidor/potencia";

fn fixed_readings() -> Vec<Reading> {
    let voltage = 220.0;
    let current = 10.0;
    vec![
        Reading::new(Metric::Voltage, voltage),
        Reading::new(Metric::Current, current),
        Reading::new(Metric::Power, derive_power(voltage, current)),
        Reading::new(Metric::Frequency, 60.0),
        Reading::new(Metric::Temperature, 25.0),
    ]
}

#[tokio::test]
async fn test_scenario_220v_10a() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(1);
    publish_loop.start().await.unwrap();
    assert_eq!(publish_loop.state(), LoopState::Running);

    let normal = publish_loop.publish_readings(&fixed_readings()).unwrap();
    assert_eq!(normal.factor, 1);
    harness.assert_last_payload(VOLTAGE, "220.0").unwrap();
    harness.assert_last_payload(CURRENT, "10.0").unwrap();
    harness.assert_last_payload(POWER, "2200.0").unwrap();

    harness.send_control("1");
    let boosted = publish_loop.publish_readings(&fixed_readings()).unwrap();
    assert_eq!(boosted.factor, 10);
    harness.assert_last_payload(VOLTAGE, "2200.0").unwrap();
    harness.assert_last_payload(CURRENT, "100.0").unwrap();
    harness.assert_last_payload(POWER, "22000.0").unwrap();
    harness.assert_last_payload("idat/medidor/frecuencia", "600.0").unwrap();
    harness.assert_last_payload("idat/medidor/temperatura", "250.0").unwrap();
}

#[tokio::test]
async fn test_control_sequence_between_cycles() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(5);
    publish_loop.start().await.unwrap();

    assert_eq!(publish_loop.run_cycle().unwrap().factor, 1);

    harness.send_control("1");
    assert_eq!(publish_loop.run_cycle().unwrap().factor, 10);

    harness.send_control("abc");
    assert_eq!(publish_loop.run_cycle().unwrap().factor, 10);

    harness.send_control("0");
    assert_eq!(publish_loop.run_cycle().unwrap().factor, 1);

    harness.assert_message_count(VOLTAGE, 4).unwrap();
}

#[tokio::test]
async fn test_reconnection_resets_boost() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(8);
    publish_loop.start().await.unwrap();

    assert_eq!(harness.connect(), vec![CONTROL_TOPIC.to_string()]);
    harness.send_control("1");
    assert_eq!(publish_loop.run_cycle().unwrap().factor, 10);

    // Broker dropped us and we came back
    harness.connect();
    assert_eq!(harness.control.read(), 1);
    assert_eq!(publish_loop.run_cycle().unwrap().factor, 1);
    assert_eq!(harness.get_stats().subscriptions.len(), 2);
}

#[tokio::test]
async fn test_power_independent_of_factor() {
    let harness = TestHarness::new();
    let mut publish_loop = harness.publish_loop(21);
    publish_loop.start().await.unwrap();
    harness.send_control("1");

    let report = publish_loop.run_cycle().unwrap();
    let value = |metric| {
        report
            .outcome(metric)
            .map(|o| o.payload.parse::<f64>().unwrap())
            .unwrap()
    };

    // Scaled values are base × 10, so the base product is recoverable
    let voltage_base = value(Metric::Voltage) / 10.0;
    let current_base = value(Metric::Current) / 10.0;
    assert_eq!(value(Metric::Power), scale(derive_power(voltage_base, current_base), 10));
}
