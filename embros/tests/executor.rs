//! Executor integration tests against the in-process middleware.

pub mod common;

use common::{event_log, events, record};
use embros::{Executor, Invocation, Semantics, trigger};
use embros_core::{ClientEndpoint, ContextHandle, Error, RawGuardCondition};
use embros_mem::Context;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

#[test]
fn test_single_subscription() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<String>("chatter")?;
    let publisher = ctx.create_publisher::<String>("chatter")?;

    let log = event_log();
    let sink = log.clone();
    let mut executor = Executor::new(ctx.clone(), 4)?;
    executor.add_subscription(
        &subscription,
        move |msg: Option<&String>| {
            if let Some(msg) = msg {
                record(&sink, msg.clone());
            }
        },
        Invocation::OnNewData,
    )?;

    publisher.publish(&"hello".to_string())?;
    let fired = executor.spin_some(Duration::from_millis(100))?;

    assert!(fired);
    assert_eq!(events(&log), vec!["hello".to_string()]);
    Ok(())
}

#[test]
fn test_all_trigger_waits_for_every_handle() -> TestResult {
    let ctx = Context::new();
    let first = ctx.create_subscription::<u32>("first")?;
    let second = ctx.create_subscription::<u32>("second")?;
    let pub_first = ctx.create_publisher::<u32>("first")?;
    let pub_second = ctx.create_publisher::<u32>("second")?;

    let log = event_log();
    let mut executor = Executor::new(ctx.clone(), 4)?;
    executor.set_trigger(trigger::trigger_all());

    let sink = log.clone();
    executor.add_subscription(
        &first,
        move |msg: Option<&u32>| {
            if msg.is_some() {
                record(&sink, "first");
            }
        },
        Invocation::OnNewData,
    )?;
    let sink = log.clone();
    executor.add_subscription(
        &second,
        move |msg: Option<&u32>| {
            if msg.is_some() {
                record(&sink, "second");
            }
        },
        Invocation::OnNewData,
    )?;

    // Only one handle ready: the trigger holds everything back.
    pub_first.publish(&1)?;
    executor.spin_some(Duration::from_millis(10))?;
    assert!(events(&log).is_empty());

    // Both ready: both fire, in insertion order.
    pub_second.publish(&2)?;
    executor.spin_some(Duration::from_millis(10))?;
    assert_eq!(events(&log), vec!["first".to_string(), "second".to_string()]);
    Ok(())
}

#[test]
fn test_shared_state_visible_under_both_semantics() -> TestResult {
    for semantics in [Semantics::RclcppLike, Semantics::Let] {
        let ctx = Context::new();
        let first = ctx.create_subscription::<u32>("first")?;
        let second = ctx.create_subscription::<u32>("second")?;
        let pub_first = ctx.create_publisher::<u32>("first")?;
        let pub_second = ctx.create_publisher::<u32>("second")?;

        let value = Arc::new(AtomicUsize::new(0));
        let observed = Arc::new(AtomicUsize::new(usize::MAX));

        let mut executor = Executor::new(ctx.clone(), 2)?;
        executor.set_semantics(semantics);

        let writer = value.clone();
        executor.add_subscription(
            &first,
            move |_: Option<&u32>| {
                writer.store(1, Ordering::SeqCst);
            },
            Invocation::OnNewData,
        )?;
        let reader = value.clone();
        let seen = observed.clone();
        executor.add_subscription(
            &second,
            move |_: Option<&u32>| {
                seen.store(reader.load(Ordering::SeqCst), Ordering::SeqCst);
            },
            Invocation::OnNewData,
        )?;

        pub_first.publish(&1)?;
        pub_second.publish(&2)?;
        executor.spin_some(Duration::from_millis(50))?;

        // LET latches inputs, not user-visible side effects: the second
        // callback observes the first one's write either way.
        assert_eq!(observed.load(Ordering::SeqCst), 1, "{semantics:?}");
    }
    Ok(())
}

#[test]
fn test_spin_one_period_drift_free() -> TestResult {
    let ctx = Context::new();
    let mut executor = Executor::new(ctx.clone(), 1)?;
    executor.set_timeout(Duration::from_millis(1));

    let period = Duration::from_millis(20);
    let start = Instant::now();
    executor.spin_one_period(period)?;
    let anchor = executor.invocation_time().expect("anchor seeded");

    for _ in 0..5 {
        executor.spin_one_period(period)?;
    }

    // The anchor advances by exactly one period per call, regardless of
    // per-cycle jitter.
    assert_eq!(executor.invocation_time().unwrap(), anchor + period * 5);

    let elapsed = start.elapsed();
    assert!(elapsed >= period * 5, "elapsed {elapsed:?}");
    assert!(elapsed < period * 20, "elapsed {elapsed:?}");
    Ok(())
}

#[test]
fn test_zero_capacity_rejected() {
    let ctx = Context::new();
    assert!(matches!(
        Executor::new(ctx, 0),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_capacity_exceeded_leaves_table_unchanged() -> TestResult {
    let ctx = Context::new();
    let first = ctx.create_subscription::<u32>("first")?;
    let second = ctx.create_subscription::<u32>("second")?;

    let mut executor = Executor::new(ctx.clone(), 1)?;
    executor.add_subscription(&first, |_: Option<&u32>| {}, Invocation::OnNewData)?;

    let result = executor.add_subscription(&second, |_: Option<&u32>| {}, Invocation::OnNewData);
    assert!(matches!(result, Err(Error::CapacityExceeded)));
    assert_eq!(executor.len(), 1);
    Ok(())
}

#[test]
fn test_remove_unregistered_is_not_found() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<u32>("chatter")?;

    let mut executor = Executor::new(ctx.clone(), 2)?;
    let result = executor.remove_subscription(&subscription);
    assert!(matches!(result, Err(Error::NotFound)));
    assert_eq!(executor.len(), 0);
    Ok(())
}

#[test]
fn test_remove_preserves_order() -> TestResult {
    let ctx = Context::new();
    let subs: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|topic| ctx.create_subscription::<u32>(topic).unwrap())
        .collect();
    let pubs: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|topic| ctx.create_publisher::<u32>(topic).unwrap())
        .collect();

    let log = event_log();
    let mut executor = Executor::new(ctx.clone(), 4)?;
    for (name, subscription) in ["a", "b", "c"].iter().zip(&subs) {
        let sink = log.clone();
        let name = name.to_string();
        executor.add_subscription(
            subscription,
            move |_: Option<&u32>| record(&sink, name.clone()),
            Invocation::OnNewData,
        )?;
    }

    executor.remove_subscription(&subs[1])?;
    assert_eq!(executor.len(), 2);

    for publisher in &pubs {
        publisher.publish(&0)?;
    }
    executor.spin_some(Duration::from_millis(10))?;

    assert_eq!(events(&log), vec!["a".to_string(), "c".to_string()]);
    Ok(())
}

#[test]
fn test_timeout_returns_false_and_fires_nothing() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<u32>("quiet")?;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.add_subscription(
        &subscription,
        move |_: Option<&u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Invocation::Always,
    )?;

    let start = Instant::now();
    let result = executor.spin_some(Duration::from_millis(20))?;

    assert!(!result);
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_trigger_gating_blocks_all_callbacks() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<u32>("gated")?;
    let publisher = ctx.create_publisher::<u32>("gated")?;

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.set_trigger(Box::new(|_| false));
    executor.add_subscription(
        &subscription,
        move |_: Option<&u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Invocation::OnNewData,
    )?;

    publisher.publish(&1)?;
    let fired_cycle = executor.spin_some(Duration::from_millis(10))?;
    assert!(fired_cycle);
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // Nothing was taken, so the message is still there once the trigger
    // lets a cycle through.
    executor.set_trigger(trigger::trigger_any());
    executor.spin_some(Duration::from_millis(10))?;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_trigger_one_gates_on_specific_endpoint() -> TestResult {
    let ctx = Context::new();
    let first = ctx.create_subscription::<u32>("first")?;
    let second = ctx.create_subscription::<u32>("second")?;
    let pub_first = ctx.create_publisher::<u32>("first")?;
    let pub_second = ctx.create_publisher::<u32>("second")?;

    let log = event_log();
    let mut executor = Executor::new(ctx.clone(), 4)?;
    executor.set_trigger(trigger::trigger_one(&second));

    let sink = log.clone();
    executor.add_subscription(
        &first,
        move |_: Option<&u32>| record(&sink, "first"),
        Invocation::OnNewData,
    )?;
    let sink = log.clone();
    executor.add_subscription(
        &second,
        move |_: Option<&u32>| record(&sink, "second"),
        Invocation::OnNewData,
    )?;

    pub_first.publish(&1)?;
    executor.spin_some(Duration::from_millis(10))?;
    assert!(events(&log).is_empty());

    // Once the gating endpoint is ready the whole cycle dispatches,
    // including the first handle's pending message.
    pub_second.publish(&2)?;
    executor.spin_some(Duration::from_millis(10))?;
    assert_eq!(events(&log), vec!["first".to_string(), "second".to_string()]);
    Ok(())
}

#[test]
fn test_always_invocation_passes_none_without_data() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<u32>("sparse")?;
    let guard = ctx.create_guard_condition()?;

    let log = event_log();
    let sink = log.clone();
    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.add_subscription(
        &subscription,
        move |msg: Option<&u32>| match msg {
            Some(value) => record(&sink, format!("some:{value}")),
            None => record(&sink, "none"),
        },
        Invocation::Always,
    )?;
    executor.add_guard_condition(&guard, || {})?;

    // The guard condition wakes the cycle; the subscription has no data
    // and is invoked with None.
    guard.trigger()?;
    executor.spin_some(Duration::from_millis(10))?;
    assert_eq!(events(&log), vec!["none".to_string()]);
    Ok(())
}

#[test]
fn test_subscription_with_context() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<u32>("sums")?;
    let publisher = ctx.create_publisher::<u32>("sums")?;

    let total = Arc::new(AtomicUsize::new(0));
    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.add_subscription_with_context(
        &subscription,
        |msg: Option<&u32>, context: &mut Arc<AtomicUsize>| {
            if let Some(value) = msg {
                context.fetch_add(*value as usize, Ordering::SeqCst);
            }
        },
        total.clone(),
        Invocation::OnNewData,
    )?;

    publisher.publish(&5)?;
    executor.spin_some(Duration::from_millis(10))?;
    publisher.publish(&7)?;
    executor.spin_some(Duration::from_millis(10))?;

    assert_eq!(total.load(Ordering::SeqCst), 12);
    Ok(())
}

#[test]
fn test_timer_fires_through_executor() -> TestResult {
    let ctx = Context::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let timer = ctx.create_timer(
        Duration::from_millis(10),
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    )?;

    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.add_timer(&timer)?;

    executor.spin_some(Duration::from_millis(100))?;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_service_round_trip_through_one_executor() -> TestResult {
    let ctx = Context::new();
    let service = ctx.create_service::<u32, u32>("add_one")?;
    let client = ctx.create_client::<u32, u32>("add_one")?;

    let log = event_log();
    let mut executor = Executor::new(ctx.clone(), 4)?;
    executor.add_service(&service, |request: &u32| request + 1)?;
    let sink = log.clone();
    executor.add_client_with_request_id(&client, move |response: &u32, sequence| {
        record(&sink, format!("seq={sequence} response={response}"));
    })?;

    let sequence = client.send_request(&41)?;

    // Cycle one answers the request; cycle two delivers the response.
    executor.spin_some(Duration::from_millis(10))?;
    executor.spin_some(Duration::from_millis(10))?;

    assert_eq!(events(&log), vec![format!("seq={sequence} response=42")]);
    Ok(())
}

#[test]
fn test_fini_is_idempotent() -> TestResult {
    let ctx = Context::new();
    let subscription = ctx.create_subscription::<u32>("chatter")?;

    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.add_subscription(&subscription, |_: Option<&u32>| {}, Invocation::OnNewData)?;

    executor.fini()?;
    executor.fini()?;

    let result = executor.add_subscription(&subscription, |_: Option<&u32>| {}, Invocation::OnNewData);
    assert!(matches!(result, Err(Error::Uninitialized)));
    assert!(matches!(
        executor.spin_some(Duration::from_millis(1)),
        Err(Error::Uninitialized)
    ));
    Ok(())
}

#[test]
fn test_spin_exits_when_context_invalidated() -> TestResult {
    let ctx = Context::new();
    let mut executor = Executor::new(ctx.clone(), 1)?;
    executor.set_timeout(Duration::from_millis(5));

    let stopper = ctx.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        stopper.shutdown();
    });

    executor.spin()?;
    assert!(!ctx.is_valid());
    handle.join().unwrap();
    Ok(())
}

#[test]
fn test_period_advances_even_on_timeout() -> TestResult {
    let ctx = Context::new();
    let mut executor = Executor::new(ctx.clone(), 1)?;
    executor.set_timeout(Duration::from_millis(1));

    let period = Duration::from_millis(10);
    executor.spin_one_period(period)?;
    let anchor = executor.invocation_time().unwrap();
    executor.spin_one_period(period)?;

    assert_eq!(executor.invocation_time().unwrap(), anchor + period);
    Ok(())
}
