use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use lib_stream::{
    CancelHandle, ClientSettings, Completion, DataPrefixDecoder, ErrorHandlingFlag, ErrorPolicy, LoggingObserver,
    Optional, SensorEndpoints, SensorRecord, Sequence, Single, StreamHub, StreamRequest, SubscribeOptions,
    Subscription, SubscriptionObserver, http_hub,
};
use tokio::signal;

use super::config::{Config, EndpointKind, PolicyKind};

/// Concrete run parameters resolved from a merged `Config`.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub endpoint: EndpointKind,
    pub request: StreamRequest,
    pub options: SubscribeOptions,
    pub client: ClientSettings,
    pub delay: Duration,
    pub subscribers: usize,
    pub take: Option<usize>,
}

impl RunPlan {
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider_url = config
            .provider_url
            .as_deref()
            .context("provider URL is not configured")?;
        let endpoints = SensorEndpoints::new(provider_url)
            .with_context(|| format!("invalid provider URL '{}'", provider_url))?;

        let endpoint = config.endpoint.unwrap_or(EndpointKind::Flowable);
        let strategy = config.strategy.unwrap_or_default();
        let request = match endpoint {
            EndpointKind::Observable => endpoints.observable(),
            EndpointKind::Flowable => endpoints.flowable(),
            EndpointKind::Single => endpoints.single(),
            EndpointKind::Maybe => endpoints.maybe(config.maybe_flag.unwrap_or(true)),
            EndpointKind::Calibrate => endpoints.calibrate(),
            EndpointKind::Backpressure => endpoints.backpressure(
                strategy,
                config.fast_producer.unwrap_or(false),
                config.data_size.unwrap_or(10),
            ),
            EndpointKind::ErrorHandling => {
                endpoints.error_handling(config.error_flag.unwrap_or(ErrorHandlingFlag::DoOnError))
            }
        };

        let policy = match config.policy.unwrap_or(PolicyKind::Propagate) {
            PolicyKind::Propagate => ErrorPolicy::Propagate,
            PolicyKind::Substitute => ErrorPolicy::substitute(fallback_record()),
            PolicyKind::Resume => ErrorPolicy::resume(endpoints.observable()),
        };

        let client = ClientSettings {
            max_retries: config.max_retries.unwrap_or(0),
            connect_timeout_ms: config.connect_timeout_ms.unwrap_or(10_000),
            ..ClientSettings::default()
        };

        Ok(Self {
            endpoint,
            request: request.with_policy(policy),
            options: SubscribeOptions::new(strategy).with_capacity(config.capacity.unwrap_or(1)),
            client,
            delay: Duration::from_millis(config.delay_ms.unwrap_or(0)),
            subscribers: config.subscribers.unwrap_or(1).max(1),
            take: config.take,
        })
    }
}

/// Record handed to subscribers when a `substitute` policy absorbs a failure.
fn fallback_record() -> SensorRecord {
    let now = chrono::Local::now().naive_local();
    SensorRecord::new("fallback", now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .with_measurement("temperature", 0.0)
        .with_measurement("humidity", 0.0)
}

fn label(endpoint: EndpointKind, n: usize) -> String {
    format!("{:?} #{}", endpoint, n)
}

/// Attaches one consumer in the shape that matches the endpoint's cardinality.
fn start_consumer(
    plan: &RunPlan,
    subscription: Subscription,
    observer: Arc<dyn SubscriptionObserver>,
    received: Arc<AtomicUsize>,
) -> CancelHandle {
    let delay = plan.delay;
    match plan.endpoint {
        EndpointKind::Single => Single::new(subscription)
            .with_observer(observer)
            .subscribe(
                move |record| {
                    if record.is_some() {
                        received.fetch_add(1, Ordering::Relaxed);
                    }
                },
                |_| {},
            ),
        EndpointKind::Maybe => Optional::new(subscription)
            .with_observer(observer)
            .subscribe(
                move |_| {
                    received.fetch_add(1, Ordering::Relaxed);
                },
                |_| {},
                || {},
            ),
        EndpointKind::Calibrate => Completion::new(subscription)
            .with_observer(observer)
            .subscribe(|| {}, |_| {}),
        _ => {
            let mut sequence = Sequence::new(subscription).with_observer(observer);
            if let Some(n) = plan.take {
                sequence = sequence.take(n);
            }
            sequence.subscribe(
                move |_| {
                    received.fetch_add(1, Ordering::Relaxed);
                    if !delay.is_zero() {
                        // Delivery runs on its own worker; sleeping here only slows this consumer.
                        std::thread::sleep(delay);
                    }
                },
                |_| {},
                || {},
            )
        }
    }
}

pub async fn run(plan: RunPlan) -> Result<()> {
    let hub: StreamHub = http_hub(&plan.client, Arc::new(DataPrefixDecoder::strict()))?;
    log::info!(
        "Consuming {} with {} subscriber(s), strategy {}, policy {}",
        plan.request.url(),
        plan.subscribers,
        plan.options.strategy,
        plan.request.policy()
    );

    let mut consumers = Vec::with_capacity(plan.subscribers);
    for n in 1..=plan.subscribers {
        let observer: Arc<dyn SubscriptionObserver> = Arc::new(LoggingObserver::new(label(plan.endpoint, n)));
        let received = Arc::new(AtomicUsize::new(0));
        let subscription = hub.subscribe(&plan.request, plan.options);
        let handle = start_consumer(&plan, subscription, observer, Arc::clone(&received));
        consumers.push((n, handle, received));
    }

    tokio::select! {
        _ = join_all(consumers.iter().map(|(_, handle, _)| handle.wait())) => {
            log::info!("All consumers reached a terminal signal.");
        }
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, cancelling consumers.");
        }
    }

    for (n, handle, received) in &consumers {
        handle.cancel();
        log::info!(
            "[{}] received {} record(s)",
            label(plan.endpoint, *n),
            received.load(Ordering::Relaxed)
        );
    }
    hub.shutdown();
    Ok(())
}
