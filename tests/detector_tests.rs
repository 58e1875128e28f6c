mod common;

use armflow::config::{RuntimeSettings, UnknownMotionPolicy};
use armflow::device::{DeviceSet, MotionHandle, PeripheralHandle, ProgramState, QueryReply};
use armflow::runtime::detector::{
    evaluate_condition, wait_for_motion, wait_for_response, Completion, ResponseExpectation,
};
use armflow::workflow::types::{ConditionSpec, Operator};
use common::{MockPeripheral, ScriptedMotion};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn handle(motion: ScriptedMotion) -> MotionHandle {
    MotionHandle::connect("arm", Arc::new(motion))
}

#[tokio::test(start_paused = true)]
async fn blind_controller_trusts_the_timeout() {
    let handle = handle(ScriptedMotion::blind());
    let started = Instant::now();
    let outcome = wait_for_motion(
        &handle,
        Duration::from_secs(2),
        &common::settings(),
        &CancellationToken::new(),
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, Completion::Done);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_millis(2100));
}

#[tokio::test(start_paused = true)]
async fn blind_controller_trusts_at_least_half_a_second() {
    let handle = handle(ScriptedMotion::blind());
    let started = Instant::now();
    let outcome = wait_for_motion(&handle, Duration::ZERO, &common::settings(), &CancellationToken::new()).await;
    assert_eq!(outcome, Completion::Done);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn blind_controller_fails_closed_when_configured() {
    let handle = handle(ScriptedMotion::blind());
    let settings = RuntimeSettings {
        unknown_motion_policy: UnknownMotionPolicy::FailClosed,
        ..common::settings()
    };
    let started = Instant::now();
    let outcome = wait_for_motion(&handle, Duration::from_secs(2), &settings, &CancellationToken::new()).await;
    assert!(matches!(outcome, Completion::Failed(_)));
    assert!(started.elapsed() < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn state_field_idle_after_running_completes() {
    let motion = Arc::new(ScriptedMotion::with_states(vec![
        ProgramState::Running,
        ProgramState::Running,
        ProgramState::Idle,
    ]));
    let handle = MotionHandle::connect("arm", motion.clone());
    let outcome = wait_for_motion(&handle, Duration::from_secs(5), &common::settings(), &CancellationToken::new()).await;
    assert_eq!(outcome, Completion::Done);
    assert_eq!(motion.polls.load(std::sync::atomic::Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn state_field_error_fails_fast() {
    let handle = handle(ScriptedMotion::with_states(vec![ProgramState::Running, ProgramState::Error]));
    let started = Instant::now();
    let outcome = wait_for_motion(&handle, Duration::from_secs(5), &common::settings(), &CancellationToken::new()).await;
    assert!(matches!(outcome, Completion::Failed(_)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn program_state_zero_reply_completes() {
    let handle = handle(ScriptedMotion::program_state_only(QueryReply::ok(0)));
    let outcome = wait_for_motion(&handle, Duration::from_secs(5), &common::settings(), &CancellationToken::new()).await;
    assert_eq!(outcome, Completion::Done);
}

#[tokio::test(start_paused = true)]
async fn running_program_times_out() {
    let handle = handle(ScriptedMotion::with_states(vec![ProgramState::Running]));
    let started = Instant::now();
    let outcome = wait_for_motion(&handle, Duration::from_secs(1), &common::settings(), &CancellationToken::new()).await;
    assert_eq!(outcome, Completion::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_motion_polling() {
    let handle = handle(ScriptedMotion::with_states(vec![ProgramState::Running]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        trigger.cancel();
    });
    let outcome = wait_for_motion(&handle, Duration::from_secs(30), &common::settings(), &cancel).await;
    assert_eq!(outcome, Completion::Cancelled);
}

fn peripheral(port: Arc<MockPeripheral>) -> PeripheralHandle {
    PeripheralHandle::connect("stirrer", port)
}

#[tokio::test(start_paused = true)]
async fn peripheral_wait_without_response_fails_at_timeout() {
    let handle = peripheral(Arc::new(MockPeripheral::new()));
    let expectation = ResponseExpectation {
        timeout: Some(Duration::from_millis(1500)),
        ..ResponseExpectation::default()
    };
    let started = Instant::now();
    let outcome = wait_for_response(&handle, &expectation, &common::settings(), &CancellationToken::new()).await;
    let elapsed = started.elapsed();
    assert_eq!(outcome, Completion::TimedOut);
    assert!(elapsed >= Duration::from_millis(1500));
    assert!(elapsed < Duration::from_millis(1600));
}

#[tokio::test(start_paused = true)]
async fn peripheral_response_must_match_expected_bytes() {
    let port = Arc::new(MockPeripheral::new());
    port.queue_frame(Duration::from_millis(200), b"OK");
    let handle = peripheral(port.clone());
    let expectation = ResponseExpectation {
        expected: Some(b"OK".to_vec()),
        timeout: Some(Duration::from_secs(1)),
        prefer_raw: false,
    };
    let settings = common::settings();
    let cancel = CancellationToken::new();
    assert_eq!(wait_for_response(&handle, &expectation, &settings, &cancel).await, Completion::Done);

    port.queue_frame(Duration::from_millis(200), b"ERR");
    assert!(matches!(
        wait_for_response(&handle, &expectation, &settings, &cancel).await,
        Completion::Failed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn empty_frame_falls_back_to_buffered_bytes() {
    let port = Arc::new(MockPeripheral::new());
    port.set_buffered(&[0x01, 0x02]);
    let handle = peripheral(port);
    let expectation = ResponseExpectation {
        expected: Some(vec![0x01, 0x02]),
        timeout: Some(Duration::from_millis(300)),
        prefer_raw: false,
    };
    let outcome = wait_for_response(&handle, &expectation, &common::settings(), &CancellationToken::new()).await;
    assert_eq!(outcome, Completion::Done);
}

#[tokio::test(start_paused = true)]
async fn untimed_wait_keeps_reading_until_a_frame_arrives() {
    let port = Arc::new(MockPeripheral::new());
    port.queue_frame(Duration::from_secs(5), b"DONE");
    let handle = peripheral(port);
    let started = Instant::now();
    let outcome = wait_for_response(
        &handle,
        &ResponseExpectation::default(),
        &common::settings(),
        &CancellationToken::new(),
    )
    .await;
    assert_eq!(outcome, Completion::Done);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn prefer_raw_polls_buffered_bytes() {
    let port = Arc::new(MockPeripheral::new());
    let handle = peripheral(port.clone());
    let feeder = port.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(450)).await;
        feeder.set_buffered(b"\xAA\x55");
    });
    let expectation = ResponseExpectation {
        expected: None,
        timeout: Some(Duration::from_secs(2)),
        prefer_raw: true,
    };
    let started = Instant::now();
    let outcome = wait_for_response(&handle, &expectation, &common::settings(), &CancellationToken::new()).await;
    assert_eq!(outcome, Completion::Done);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn closed_port_fails_immediately() {
    let handle = peripheral(Arc::new(MockPeripheral::closed()));
    let outcome = wait_for_response(
        &handle,
        &ResponseExpectation::default(),
        &common::settings(),
        &CancellationToken::new(),
    )
    .await;
    assert!(matches!(outcome, Completion::Failed(_)));
}

fn thermo_condition(operator: Operator, threshold: f64) -> ConditionSpec {
    ConditionSpec::SensorValue {
        device: "Thermo".into(),
        channel: "temp".into(),
        operator,
        threshold,
    }
}

#[tokio::test(start_paused = true)]
async fn sensor_condition_compares_the_reading() {
    let devices = DeviceSet::new();
    let port = common::attach_peripheral(&devices, "thermo");
    port.reply_to(b"READ_TEMP", b"7\r\n");
    let settings = common::settings();
    let cancel = CancellationToken::new();

    assert!(evaluate_condition(&thermo_condition(Operator::Gt, 5.0), &devices, &settings, &cancel).await);
    assert!(!evaluate_condition(&thermo_condition(Operator::Lt, 5.0), &devices, &settings, &cancel).await);
    assert!(evaluate_condition(&thermo_condition(Operator::Eq, 7.0), &devices, &settings, &cancel).await);
    assert_eq!(port.written()[0], b"READ_TEMP".to_vec());
}

#[tokio::test(start_paused = true)]
async fn unreadable_conditions_are_false() {
    let devices = DeviceSet::new();
    let settings = common::settings();
    let cancel = CancellationToken::new();

    // no device attached
    assert!(!evaluate_condition(&thermo_condition(Operator::Gt, 5.0), &devices, &settings, &cancel).await);

    let port = common::attach_peripheral(&devices, "thermo");
    port.reply_to(b"READ_TEMP", b"warm");
    assert!(!evaluate_condition(&thermo_condition(Operator::Gt, 5.0), &devices, &settings, &cancel).await);

    // no reply within the settle time
    let silent = ConditionSpec::SensorValue {
        device: "thermo".into(),
        channel: "humidity".into(),
        operator: Operator::Gt,
        threshold: -1.0,
    };
    assert!(!evaluate_condition(&silent, &devices, &settings, &cancel).await);
}
