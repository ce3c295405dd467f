mod utils;

use std::sync::Arc;
use std::time::Duration;

use googletest::prelude::*;
use mock_kernel::MockKernel;
use runnel_kernel::{Kernel, Status};
use runnel_notebook::handler::Handler;
use runnel_notebook::message::OutboundMessage;
use runnel_notebook::sender;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use utils::{collect_available, collect_until_end, ChannelBroadcast};

fn harness() -> (
    Arc<MockKernel>,
    Handler<MockKernel>,
    mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let (transport, inbox) = ChannelBroadcast::new();
    let outbound = sender::launch(transport);
    let kernel = Arc::new(MockKernel::new());
    let handler = Handler::new(Arc::clone(&kernel), outbound);
    (kernel, handler, inbox)
}

#[googletest::test]
#[tokio::test]
async fn an_execution_streams_results_then_terminates() {
    let (_kernel, handler, mut inbox) = harness();

    handler.execute("print('hello')".to_string()).await;
    handler.join_execution().await;

    let messages = collect_until_end(&mut inbox).await;
    expect_that!(
        messages,
        eq(vec![
            OutboundMessage::Update {
                content: json!({"name": "stdout", "text": "hello"}),
                msg_type: "stream".to_string(),
            },
            OutboundMessage::End,
        ])
    );
}

#[googletest::test]
#[tokio::test]
async fn concurrent_executions_are_single_flight() {
    let (kernel, handler, mut inbox) = harness();

    tokio::join!(
        handler.execute("first".to_string()),
        handler.execute("second".to_string())
    );
    handler.join_execution().await;

    // Each stream fully terminates before the next submission begins.
    let first = collect_until_end(&mut inbox).await;
    let second = collect_until_end(&mut inbox).await;
    expect_that!(first.last(), some(eq(&OutboundMessage::End)));
    expect_that!(second.last(), some(eq(&OutboundMessage::End)));

    expect_that!(
        kernel.events(),
        eq(vec![
            "begin first".to_string(),
            "end first".to_string(),
            "begin second".to_string(),
            "end second".to_string(),
        ])
    );
}

#[googletest::test]
#[tokio::test]
async fn interrupt_preempts_a_running_execution() {
    let (kernel, handler, mut inbox) = harness();

    handler.execute("expensive_op()".to_string()).await;
    // Let the partial output make it through the pipeline.
    sleep(Duration::from_millis(100)).await;

    handler.interrupt().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    expect_that!(kernel.execution_state(), pat!(Status::Idle));
    let messages = collect_available(&mut inbox);
    expect_that!(
        messages,
        eq(vec![
            OutboundMessage::Update {
                content: json!({"name": "stdout", "text": "partial..."}),
                msg_type: "stream".to_string(),
            },
            OutboundMessage::Interrupted,
        ])
    );
}

#[googletest::test]
#[tokio::test]
async fn interrupt_with_nothing_in_flight_only_notifies() {
    let (kernel, handler, mut inbox) = harness();

    handler.interrupt().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    expect_that!(collect_available(&mut inbox), eq(vec![OutboundMessage::Interrupted]));
    expect_that!(kernel.events(), eq(vec!["interrupt".to_string()]));
}

#[googletest::test]
#[tokio::test]
async fn shutdown_is_idempotent() {
    let (_kernel, handler, _inbox) = harness();

    expect_that!(handler.shutdown().await, pat!(Ok(_)));
    expect_that!(handler.shutdown().await, pat!(Ok(_)));
}

#[googletest::test]
#[tokio::test]
async fn restart_clears_buffered_results_and_notifies() {
    let (kernel, handler, mut inbox) = harness();
    kernel.push("stream", json!({"name": "stdout", "text": "stale"}));

    handler.restart().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    expect_that!(kernel.drain_results().len(), eq(0));
    expect_that!(collect_available(&mut inbox), eq(vec![OutboundMessage::Restarted]));
}

#[googletest::test]
#[tokio::test]
async fn connection_info_is_broadcast_with_the_request_id() {
    let (_kernel, handler, mut inbox) = harness();

    handler.send_connection_info(Some(7));
    sleep(Duration::from_millis(50)).await;

    let messages = collect_available(&mut inbox);
    expect_that!(messages.len(), eq(1));
    match &messages[0] {
        OutboundMessage::ConnectionInfo { content, id } => {
            expect_that!(*id, some(eq(7)));
            expect_that!(content["shell_port"].as_u64(), some(eq(4023)));
        }
        other => panic!("expected connection info, got {other:?}"),
    }
}
