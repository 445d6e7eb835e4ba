//! Action client/server integration tests. One executor drives both
//! sides of the action, so each wire exchange completes over a couple of
//! cycles.

pub mod common;

use common::{CountAction, CountFeedback, CountGoal, CountResult, event_log, events, record};
use embros::action::{Client, ClientCallbacks, Server, ServerCallbacks};
use embros::{Executor, Semantics};
use embros_core::{
    ActionClientEndpoint, CancelCode, CancelRequest, Error, GoalInfo, GoalStatus,
};
use embros_mem::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

struct ActionFixture {
    executor: Executor,
    client: Client<CountAction>,
    server: Server<CountAction>,
    log: common::EventLog,
}

/// Wires one action client and one action server into one executor. The
/// server accepts goals per `accept_goals` and cancels per `accept_cancels`.
fn fixture(pool: usize, accept_goals: bool, accept_cancels: bool) -> TestResult2<ActionFixture> {
    let ctx = Context::new();
    let client_endpoint = ctx.create_action_client::<CountAction>("count")?;
    let server_endpoint = ctx.create_action_server::<CountAction>("count")?;

    let client = Client::new(client_endpoint, pool)?;
    let server = Server::new(server_endpoint, pool)?;

    let log = event_log();
    let mut executor = Executor::new(ctx.clone(), 4)?;

    let sink = log.clone();
    let goal_sink = log.clone();
    let feedback_sink = log.clone();
    let cancel_sink = log.clone();
    executor.add_action_client(
        &client,
        ClientCallbacks {
            on_goal_response: Box::new(move |_, accepted| {
                record(&goal_sink, format!("goal_response:{accepted}"));
            }),
            on_feedback: Some(Box::new(move |_, feedback: &CountFeedback| {
                record(&feedback_sink, format!("feedback:{}", feedback.current));
            })),
            on_result: Box::new(move |_, status, result: &CountResult| {
                record(&sink, format!("result:{status:?}:{}", result.total));
            }),
            on_cancel: Some(Box::new(move |_, cancelled| {
                record(&cancel_sink, format!("cancel_response:{cancelled}"));
            })),
        },
    )?;

    let goal_sink = log.clone();
    let cancel_sink = log.clone();
    executor.add_action_server(
        &server,
        ServerCallbacks {
            on_goal: Box::new(move |request| {
                record(&goal_sink, format!("goal_request:{}", request.goal.target));
                accept_goals
            }),
            on_cancel: Box::new(move |_: &GoalInfo| {
                record(&cancel_sink, "cancel_request");
                accept_cancels
            }),
        },
    )?;

    Ok(ActionFixture {
        executor,
        client,
        server,
        log,
    })
}

type TestResult2<T> = Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

fn spin_cycles(executor: &mut Executor, cycles: usize) -> TestResult {
    for _ in 0..cycles {
        executor.spin_some(Duration::from_millis(10))?;
    }
    Ok(())
}

#[test]
fn test_goal_accept_and_result() -> TestResult {
    let mut fx = fixture(2, true, true)?;

    let uuid = fx.client.send_goal(CountGoal { target: 3 })?;
    assert_eq!(fx.client.free_goals(), 1);

    // Goal request -> acceptance -> automatic result request.
    spin_cycles(&mut fx.executor, 3)?;
    assert!(events(&fx.log).contains(&"goal_request:3".to_string()));
    assert!(events(&fx.log).contains(&"goal_response:true".to_string()));
    assert_eq!(fx.server.goal_status(&uuid), Some(GoalStatus::Executing));

    // The server finishes the goal; the stashed result request answers
    // immediately and the client releases its slot.
    fx.server.succeed(&uuid, CountResult { total: 3 })?;
    spin_cycles(&mut fx.executor, 2)?;

    assert!(
        events(&fx.log).contains(&"result:Succeeded:3".to_string()),
        "events: {:?}",
        events(&fx.log)
    );
    assert_eq!(fx.client.free_goals(), 2);
    assert_eq!(fx.server.free_goals(), 2);
    Ok(())
}

#[test]
fn test_goal_rejection_releases_both_slots() -> TestResult {
    let mut fx = fixture(1, false, true)?;

    fx.client.send_goal(CountGoal { target: 9 })?;
    spin_cycles(&mut fx.executor, 3)?;

    assert!(events(&fx.log).contains(&"goal_response:false".to_string()));
    assert_eq!(fx.client.free_goals(), 1);
    assert_eq!(fx.server.free_goals(), 1);
    Ok(())
}

#[test]
fn test_feedback_reaches_client() -> TestResult {
    let mut fx = fixture(1, true, true)?;

    let uuid = fx.client.send_goal(CountGoal { target: 2 })?;
    spin_cycles(&mut fx.executor, 3)?;

    fx.server.publish_feedback(&uuid, CountFeedback { current: 1 })?;
    spin_cycles(&mut fx.executor, 2)?;

    assert!(events(&fx.log).contains(&"feedback:1".to_string()));
    Ok(())
}

#[test]
fn test_cancel_lifecycle() -> TestResult {
    let mut fx = fixture(1, true, true)?;

    let uuid = fx.client.send_goal(CountGoal { target: 5 })?;

    // Accept the goal and let the result request land: Executing.
    spin_cycles(&mut fx.executor, 3)?;
    assert_eq!(fx.server.goal_status(&uuid), Some(GoalStatus::Executing));

    // Cancel request admitted: Canceling, cancel response accepted.
    fx.client.send_cancel(&uuid)?;
    spin_cycles(&mut fx.executor, 2)?;
    assert_eq!(fx.server.goal_status(&uuid), Some(GoalStatus::Canceling));
    assert!(events(&fx.log).contains(&"cancel_request".to_string()));
    assert!(events(&fx.log).contains(&"cancel_response:true".to_string()));

    // The user completes the cancellation; the slot frees on the next
    // pass and the client receives the canceled result.
    fx.server.canceled(&uuid, CountResult { total: 2 })?;
    spin_cycles(&mut fx.executor, 2)?;

    assert!(events(&fx.log).contains(&"result:Canceled:2".to_string()));
    assert_eq!(fx.server.free_goals(), 1);
    assert_eq!(fx.client.free_goals(), 1);
    Ok(())
}

#[test]
fn test_cancel_rejected_by_user_reverts_to_executing() -> TestResult {
    let mut fx = fixture(1, true, false)?;

    let uuid = fx.client.send_goal(CountGoal { target: 5 })?;
    spin_cycles(&mut fx.executor, 3)?;

    fx.client.send_cancel(&uuid)?;
    spin_cycles(&mut fx.executor, 2)?;

    assert!(events(&fx.log).contains(&"cancel_response:false".to_string()));
    assert_eq!(fx.server.goal_status(&uuid), Some(GoalStatus::Executing));
    Ok(())
}

#[test]
fn test_cancel_unknown_goal_rejected_at_take() -> TestResult {
    let ctx = Context::new();
    let server_endpoint = ctx.create_action_server::<CountAction>("count")?;
    let probe_endpoint = ctx.create_action_client::<CountAction>("count")?;

    let server = Server::new(server_endpoint, 1)?;
    let mut executor = Executor::new(ctx.clone(), 2)?;
    executor.add_action_server(
        &server,
        ServerCallbacks {
            on_goal: Box::new(|_| true),
            on_cancel: Box::new(|_| true),
        },
    )?;

    // A cancel request for a UUID the server never saw is answered with
    // UnknownGoal straight from the take step.
    probe_endpoint.send_cancel_request(&CancelRequest {
        goal_info: GoalInfo {
            goal_id: [9; 16],
            stamp_nanos: 0,
        },
    })?;
    executor.spin_some(Duration::from_millis(10))?;

    let (_, response) = probe_endpoint
        .try_take_cancel_response()?
        .expect("cancel response");
    assert_eq!(response.return_code, CancelCode::UnknownGoal);
    assert!(response.goals_canceling.is_empty());
    Ok(())
}

#[test]
fn test_client_pool_exhaustion() -> TestResult {
    let fx = fixture(1, true, true)?;

    fx.client.send_goal(CountGoal { target: 1 })?;
    let second = fx.client.send_goal(CountGoal { target: 2 });
    assert!(matches!(second, Err(Error::CapacityExceeded)));
    Ok(())
}

#[test]
fn test_actions_under_let_semantics() -> TestResult {
    let mut fx = fixture(2, true, true)?;
    fx.executor.set_semantics(Semantics::Let);

    let uuid = fx.client.send_goal(CountGoal { target: 4 })?;
    spin_cycles(&mut fx.executor, 3)?;
    fx.server.succeed(&uuid, CountResult { total: 4 })?;
    spin_cycles(&mut fx.executor, 2)?;

    assert!(events(&fx.log).contains(&"result:Succeeded:4".to_string()));
    assert_eq!(fx.client.free_goals(), 2);
    Ok(())
}

#[test]
fn test_goal_callback_can_finish_from_worker_thread() -> TestResult {
    let mut fx = fixture(1, true, true)?;

    let uuid = fx.client.send_goal(CountGoal { target: 1 })?;
    spin_cycles(&mut fx.executor, 3)?;

    // Helpers are safe to call from outside the executor thread.
    let server_uuid = uuid;
    let done = Arc::new(AtomicBool::new(false));
    let finished = done.clone();
    let server = &fx.server;
    std::thread::scope(|scope| {
        scope.spawn(|| {
            server
                .succeed(&server_uuid, CountResult { total: 1 })
                .unwrap();
            finished.store(true, Ordering::SeqCst);
        });
    });
    assert!(done.load(Ordering::SeqCst));

    spin_cycles(&mut fx.executor, 2)?;
    assert!(events(&fx.log).contains(&"result:Succeeded:1".to_string()));
    Ok(())
}
