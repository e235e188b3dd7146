//! # Live Event Stream Runner
//!
//! Exercises `lib_stream` against a running sensor provider. Each scenario
//! subscribes through the shared hub, consumes with the shape that matches the
//! endpoint, and asserts on what arrived.
//!
//! Run with `cargo run -p project_tests --bin test_event_stream -- --provider-url http://localhost:8080/api`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tokio::sync::mpsc;

use lib_stream::{
    BackpressureStrategy, ClientSettings, Completion, DataPrefixDecoder, ErrorHandlingFlag, ErrorPolicy,
    LoggingObserver, Optional, SensorEndpoints, SensorRecord, Sequence, Single, StreamError, StreamHub,
    StreamRequest, SubscribeOptions, http_hub,
};

#[derive(Parser, Debug)]
#[clap(about = "Live runner for the sensor event stream client")]
struct Args {
    #[clap(long, env = "STREAM_PROVIDER_URL", default_value = "http://localhost:8080/api")]
    provider_url: String,

    #[clap(long, default_value_t = 20, help = "Seconds to wait for each scenario.")]
    timeout_secs: u64,
}

/// What one consumer observed.
#[derive(Debug, Default)]
struct Outcome {
    ids: Vec<String>,
    error: Option<StreamError>,
    completed: bool,
}

enum Signal {
    Next(String),
    Error(StreamError),
    Complete,
}

async fn collect(mut rx: mpsc::UnboundedReceiver<Signal>, timeout: Duration) -> Result<Outcome> {
    let mut outcome = Outcome::default();
    let result = tokio::time::timeout(timeout, async {
        while let Some(signal) = rx.recv().await {
            match signal {
                Signal::Next(id) => outcome.ids.push(id),
                Signal::Error(e) => {
                    outcome.error = Some(e);
                    break;
                }
                Signal::Complete => {
                    outcome.completed = true;
                    break;
                }
            }
        }
    })
    .await;
    if result.is_err() {
        bail!("no terminal signal within {:?} (received {} records)", timeout, outcome.ids.len());
    }
    Ok(outcome)
}

/// Consumes a 0..N stream with an optional per-record delay and take limit.
async fn consume_sequence(
    hub: &StreamHub,
    request: &StreamRequest,
    options: SubscribeOptions,
    label: &str,
    delay: Duration,
    take: Option<usize>,
    timeout: Duration,
) -> Result<Outcome> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (tx_err, tx_done) = (tx.clone(), tx.clone());
    let mut sequence = Sequence::new(hub.subscribe(request, options)).with_observer(Arc::new(LoggingObserver::new(label)));
    if let Some(n) = take {
        sequence = sequence.take(n);
    }
    let handle = sequence.subscribe(
        move |record| {
            let _ = tx.send(Signal::Next(record.id.clone()));
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
        },
        move |e| {
            let _ = tx_err.send(Signal::Error(e));
        },
        move || {
            let _ = tx_done.send(Signal::Complete);
        },
    );
    let outcome = collect(rx, timeout).await;
    handle.cancel();
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = env_logger::builder().filter_level(log::LevelFilter::Info).try_init();
    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout_secs);
    let endpoints = SensorEndpoints::new(&args.provider_url)?;
    let hub = http_hub(&ClientSettings::default(), Arc::new(DataPrefixDecoder::strict()))?;

    println!("--- Starting Event Stream Tests against {} ---", args.provider_url);

    // --- TEST 1: Observable ---
    println!("\n[Test 1] Observable stream...");
    let out = consume_sequence(&hub, &endpoints.observable(), SubscribeOptions::default(), "Observable", Duration::ZERO, None, timeout).await?;
    assert!(out.error.is_none(), "unexpected error: {:?}", out.error);
    println!("✅ Observable completed with {} records", out.ids.len());

    // --- TEST 2: Flowable shared by two consumers ---
    println!("\n[Test 2] Flowable multicast...");
    let request = endpoints.flowable();
    let (a, b) = tokio::join!(
        consume_sequence(&hub, &request, SubscribeOptions::default(), "Flowable A", Duration::ZERO, None, timeout),
        consume_sequence(&hub, &request, SubscribeOptions::default(), "Flowable B", Duration::ZERO, None, timeout),
    );
    let (a, b) = (a?, b?);
    assert!(a.completed && b.completed);
    assert_eq!(hub.open_count(&request), 1);
    println!("✅ One upstream connection, {} / {} records", a.ids.len(), b.ids.len());

    // --- TEST 3: Single ---
    println!("\n[Test 3] Single...");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tx_err = tx.clone();
    let handle = Single::new(hub.subscribe(&endpoints.single(), SubscribeOptions::default()))
        .with_observer(Arc::new(LoggingObserver::new("Single")))
        .subscribe(
            move |record| {
                let _ = tx.send(record.map(|r| r.id.clone()).ok_or_else(|| "empty".to_string()));
            },
            move |e| {
                let _ = tx_err.send(Err(e.to_string()));
            },
        );
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(Ok(id))) => println!("✅ Single delivered '{}'", id),
        other => bail!("Single failed: {:?}", other),
    }
    handle.cancel();

    // --- TEST 4: Maybe with and without data ---
    println!("\n[Test 4] Maybe...");
    for flag in [true, false] {
        let (tx, rx) = mpsc::unbounded_channel();
        let (tx_err, tx_done) = (tx.clone(), tx.clone());
        let handle = Optional::new(hub.subscribe(&endpoints.maybe(flag), SubscribeOptions::default()))
            .with_observer(Arc::new(LoggingObserver::new(format!("Maybe {}", flag))))
            .subscribe(
                move |record| {
                    let _ = tx.send(Signal::Next(record.id.clone()));
                },
                move |e| {
                    let _ = tx_err.send(Signal::Error(e));
                },
                move || {
                    let _ = tx_done.send(Signal::Complete);
                },
            );
        let out = collect(rx, timeout).await?;
        handle.cancel();
        assert!(out.completed);
        assert!(out.ids.len() <= 1);
        if !flag {
            assert!(out.ids.is_empty());
        }
        println!("✅ Maybe(flag={}) completed with {} record(s)", flag, out.ids.len());
    }

    // --- TEST 5: Calibrate (completion only) ---
    println!("\n[Test 5] Calibrate...");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tx_err = tx.clone();
    let handle = Completion::new(hub.subscribe(&endpoints.calibrate(), SubscribeOptions::default()))
        .with_observer(Arc::new(LoggingObserver::new("Calibrate")))
        .subscribe(
            move || {
                let _ = tx.send(Ok(()));
            },
            move |e| {
                let _ = tx_err.send(Err(e));
            },
        );
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(Ok(()))) => println!("✅ Calibration completed"),
        other => bail!("Calibrate failed: {:?}", other),
    }
    handle.cancel();

    // --- TEST 6: Backpressure strategies with a slow consumer ---
    println!("\n[Test 6] Backpressure BUFFER (slow consumer, take 10)...");
    let out = consume_sequence(
        &hub,
        &endpoints.backpressure(BackpressureStrategy::Buffer, true, 20),
        SubscribeOptions::new(BackpressureStrategy::Buffer),
        "Backpressure BUFFER",
        Duration::from_millis(1000),
        Some(10),
        timeout,
    )
    .await?;
    assert_eq!(out.ids.len(), 10);
    assert!(out.error.is_none());
    println!("✅ BUFFER delivered all {} records in order", out.ids.len());

    println!("\n[Test 7] Backpressure DROP (slow consumer, take 5)...");
    let out = consume_sequence(
        &hub,
        &endpoints.backpressure(BackpressureStrategy::Drop, true, 20),
        SubscribeOptions::new(BackpressureStrategy::Drop),
        "Backpressure DROP",
        Duration::from_millis(1000),
        Some(5),
        timeout,
    )
    .await?;
    assert!(out.error.is_none());
    println!("✅ DROP delivered {} records without error", out.ids.len());

    println!("\n[Test 8] Backpressure ERROR (fast producer)...");
    let out = consume_sequence(
        &hub,
        &endpoints.backpressure(BackpressureStrategy::Error, true, 100),
        SubscribeOptions::new(BackpressureStrategy::Error),
        "Backpressure ERROR",
        Duration::from_millis(100),
        None,
        timeout,
    )
    .await?;
    match out.error {
        Some(StreamError::Overflow { capacity }) => println!("✅ ERROR overflowed at window {}", capacity),
        other => println!("⚠️ ERROR strategy did not overflow ({:?}); the provider may be too slow", other),
    }

    // --- TEST 9: Error handling policies ---
    println!("\n[Test 9] Error handling: doOnError (propagate)...");
    let out = consume_sequence(
        &hub,
        &endpoints.error_handling(ErrorHandlingFlag::DoOnError),
        SubscribeOptions::default(),
        "doOnError",
        Duration::ZERO,
        None,
        timeout,
    )
    .await?;
    println!("✅ Terminated with error={:?}, completed={}", out.error.map(|e| e.to_string()), out.completed);

    println!("\n[Test 10] Error handling: substitute...");
    let fallback = SensorRecord::new("fallback", "1970-01-01T00:00:00")
        .with_measurement("temperature", 0.0)
        .with_measurement("humidity", 0.0);
    let out = consume_sequence(
        &hub,
        &endpoints
            .error_handling(ErrorHandlingFlag::OnErrorReturn)
            .with_policy(ErrorPolicy::substitute(fallback)),
        SubscribeOptions::default(),
        "onErrorReturn",
        Duration::ZERO,
        None,
        timeout,
    )
    .await?;
    assert!(out.error.is_none());
    assert!(out.completed);
    println!("✅ Substitute completed cleanly with {} record(s)", out.ids.len());

    println!("\n[Test 11] Error handling: resume from observable...");
    let out = consume_sequence(
        &hub,
        &endpoints
            .error_handling(ErrorHandlingFlag::OnErrorResumeNext)
            .with_policy(ErrorPolicy::resume(endpoints.observable())),
        SubscribeOptions::default(),
        "onErrorResumeNext",
        Duration::ZERO,
        None,
        timeout,
    )
    .await?;
    assert!(out.error.is_none());
    println!("✅ Resume completed with {} record(s)", out.ids.len());

    hub.shutdown();
    println!("\n--- All Tests Passed Successfully ---");
    Ok(())
}
