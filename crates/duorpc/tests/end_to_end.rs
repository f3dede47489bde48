//! End-to-end calls between one client and one server over the in-process
//! transport.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use duorpc::local::LocalNetwork;
use duorpc::transport::TransportError;
use duorpc::args;
use duorpc::Client;
use duorpc::ClientEvent;
use duorpc::Config;
use duorpc::Error;
use duorpc::Method;
use duorpc::PeerId;
use duorpc::Reply;
use duorpc::Responder;
use duorpc::Server;
use duorpc::ServerEvent;
use duorpc::Value;

const PORT: u16 = 7000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Responders parked by `slow.answer` until the test decides to reply.
type Parked = Arc<Mutex<Vec<Responder>>>;

struct Fixture {
    server: Server<LocalNetwork>,
    client: Client<LocalNetwork>,
    adds: Arc<AtomicUsize>,
    parked: Parked,
}

impl Fixture {
    fn new() -> anyhow::Result<Self> {
        Self::with_client_config(Config::default())
    }

    fn with_client_config(config: Config) -> anyhow::Result<Self> {
        init_tracing();
        let network = LocalNetwork::new();
        let adds = Arc::new(AtomicUsize::new(0));
        let parked = Parked::default();

        let mut server = Server::new(network.clone(), Config::default());
        let counter = Arc::clone(&adds);
        let slot = Arc::clone(&parked);
        let rejected = server.register("math", [Method::typed("add", move |a: i64, b: i64| {
            counter.fetch_add(1, Ordering::SeqCst);
            a + b
        })]);
        assert!(rejected.is_empty());
        server.register("slow", [Method::typed("answer", move || {
            let (responder, reply) = Reply::deferred();
            slot.lock().expect("unpoisoned").push(responder);
            reply
        })]);
        server.listen("localhost", PORT)?;

        let mut client = Client::new(network, config);
        client.connect("localhost", PORT)?;

        assert_eq!(server.poll_once(), Some(ServerEvent::PeerConnected(PeerId(1))));
        assert_eq!(client.poll_once(), Some(ClientEvent::Connected));
        assert!(client.is_connected());

        Ok(Self { server, client, adds, parked })
    }

    fn pump(&mut self) {
        for _ in 0..8 {
            self.server.poll_once();
            self.client.poll_once();
        }
    }

    fn answer_parked(&self, value: impl Into<Value>) {
        let responder = self.parked.lock().expect("unpoisoned").pop().expect("a parked call");
        assert!(responder.send(value));
    }
}

// ============================================================================
//  INVOKE
// ============================================================================

#[test]
fn test_invoke_add_returns_five() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let mut call = fx.client.invoke("math.add", args![2, 3], 0)?;

    let mut outcome = None;
    for _ in 0..16 {
        fx.server.poll_once();
        fx.client.poll_once();
        if let Some(result) = call.try_result() {
            outcome = Some(result);
            break;
        }
    }

    assert_eq!(outcome, Some(Ok(Value::Int(5))));
    assert_eq!(fx.client.calls_in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_invoke_as_future() -> anyhow::Result<()> {
    let Fixture { mut server, mut client, .. } = Fixture::new()?;
    let call = client.invoke("math.add", args![20, 22], 1)?;

    let driver = async {
        for _ in 0..32 {
            server.poll_once();
            client.poll_once();
            tokio::task::yield_now().await;
        }
    };
    let (sum, ()) = tokio::join!(call, driver);

    assert_eq!(sum?, Value::Int(42));
    Ok(())
}

#[test]
fn test_server_invokes_client() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    fx.client.register("ui", [Method::typed("shout", |text: String| text.to_uppercase())]);

    let mut call = fx.server.invoke(PeerId(1), "ui.shout", args!["hey"], 0)?;
    fx.pump();

    assert_eq!(call.try_result(), Some(Ok(Value::from("HEY"))));
    Ok(())
}

#[test]
fn test_invalid_invoke_gets_no_reply() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let mut call = fx.client.invoke("math.add", args![2, "3"], 0)?;
    fx.pump();

    assert_eq!(call.try_result(), None);
    assert_eq!(fx.adds.load(Ordering::SeqCst), 0);
    Ok(())
}

// ============================================================================
//  EXEC
// ============================================================================

#[test]
fn test_exec_with_wrong_types_never_runs() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;

    fx.client.exec("math.add", args!["x", 3], 0)?;
    fx.client.exec("math.missing", args![1, 2], 0)?;
    fx.pump();
    assert_eq!(fx.adds.load(Ordering::SeqCst), 0);

    fx.client.exec("math.add", args![2, 3], 0)?;
    fx.pump();
    assert_eq!(fx.adds.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_unregistered_scope_is_unreachable() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    assert_eq!(fx.server.unregister_scope("math"), 1);

    let mut call = fx.client.invoke("math.add", args![2, 3], 0)?;
    fx.pump();
    assert_eq!(call.try_result(), None);
    assert_eq!(fx.adds.load(Ordering::SeqCst), 0);
    Ok(())
}

// ============================================================================
//  DEFERRED REPLIES AND CANCELLATION
// ============================================================================

#[test]
fn test_deferred_reply_resolves_call() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let mut call = fx.client.invoke("slow.answer", vec![], 0)?;
    fx.pump();
    assert_eq!(call.try_result(), None);

    fx.answer_parked(42i64);
    fx.pump();
    assert_eq!(call.try_result(), Some(Ok(Value::Int(42))));
    Ok(())
}

#[test]
fn test_dropped_call_frees_slot_and_discards_late_result() -> anyhow::Result<()> {
    let mut fx = Fixture::with_client_config(Config::default().with_max_tasks(1))?;

    let call = fx.client.invoke("slow.answer", vec![], 0)?;
    fx.pump();
    drop(call);
    assert_eq!(fx.client.calls_in_flight(), 0);

    // The late answer finds a free slot and goes nowhere.
    fx.answer_parked("late");
    fx.pump();
    assert_eq!(fx.client.calls_in_flight(), 0);

    let mut call = fx.client.invoke("math.add", args![1, 1], 0)?;
    fx.pump();
    assert_eq!(call.try_result(), Some(Ok(Value::Int(2))));
    Ok(())
}

#[test]
fn test_late_result_never_reaches_reused_slot() -> anyhow::Result<()> {
    let mut fx = Fixture::with_client_config(Config::default().with_max_tasks(1))?;

    let stale = fx.client.invoke("slow.answer", vec![], 0)?;
    let stale_task = stale.task();
    fx.pump();
    drop(stale);

    // Reserve the only slot again before the old answer is on its way.
    let mut fresh = fx.client.invoke("math.add", args![1, 1], 0)?;
    assert_ne!(fresh.task(), stale_task);
    fx.answer_parked("late");
    fx.pump();

    assert_eq!(fresh.try_result(), Some(Ok(Value::Int(2))));
    assert_eq!(fx.client.calls_in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn test_timed_out_call_does_not_leak_into_next() -> anyhow::Result<()> {
    let mut fx = Fixture::with_client_config(Config::default().with_max_tasks(1))?;
    let stale = fx.client.invoke("slow.answer", vec![], 0)?;
    fx.pump();
    assert_eq!(stale.timeout(Duration::from_millis(10)).await, Err(Error::Timeout));

    let mut fresh = fx.client.invoke("math.add", args![2, 3], 0)?;
    fx.answer_parked(-1i64);
    fx.pump();

    assert_eq!(fresh.try_result(), Some(Ok(Value::Int(5))));
    Ok(())
}

#[tokio::test]
async fn test_timeout_releases_slot() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let call = fx.client.invoke("slow.answer", vec![], 0)?;
    fx.pump();

    let outcome = call.timeout(Duration::from_millis(20)).await;
    assert_eq!(outcome, Err(Error::Timeout));
    assert_eq!(fx.client.calls_in_flight(), 0);
    Ok(())
}

#[test]
fn test_capacity_exhaustion_is_recoverable() -> anyhow::Result<()> {
    let mut fx = Fixture::with_client_config(Config::default().with_max_tasks(2))?;
    let _a = fx.client.invoke("slow.answer", vec![], 0)?;
    let mut b = fx.client.invoke("math.add", args![1, 2], 0)?;

    assert_eq!(
        fx.client.invoke("math.add", args![1, 2], 0).err(),
        Some(Error::CapacityExhausted { capacity: 2 })
    );

    fx.pump();
    assert_eq!(b.try_result(), Some(Ok(Value::Int(3))));
    assert!(fx.client.invoke("math.add", args![1, 2], 0).is_ok());
    Ok(())
}

// ============================================================================
//  CONNECTION LIFECYCLE
// ============================================================================

#[test]
fn test_disconnect_abandons_calls() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let mut call = fx.client.invoke("slow.answer", vec![], 0)?;
    fx.pump();

    fx.client.disconnect();
    assert!(!fx.client.is_connected());
    assert_eq!(call.try_result(), Some(Err(Error::Abandoned)));
    assert_eq!(fx.client.calls_in_flight(), 0);

    assert_eq!(fx.server.poll_once(), Some(ServerEvent::PeerDisconnected(PeerId(1))));
    assert!(fx.server.peers().is_empty());

    // Disconnecting again is a no-op.
    fx.client.disconnect();
    Ok(())
}

#[test]
fn test_connect_twice_and_reconnect() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    assert_eq!(fx.client.connect("localhost", PORT), Err(Error::AlreadyConnected));

    fx.client.disconnect();
    fx.pump();
    fx.client.connect("localhost", PORT)?;
    assert_eq!(fx.server.poll_once(), Some(ServerEvent::PeerConnected(PeerId(2))));
    assert_eq!(fx.client.poll_once(), Some(ClientEvent::Connected));
    Ok(())
}

#[test]
fn test_failed_connect_leaves_nothing_behind() -> anyhow::Result<()> {
    init_tracing();
    let network = LocalNetwork::new();
    let mut client = Client::new(network.clone(), Config::default());

    assert!(matches!(
        client.connect("localhost", PORT),
        Err(Error::Transport(TransportError::ConnectionRefused(_)))
    ));
    assert!(!client.is_connected());
    assert_eq!(client.poll_once(), None);
    assert_eq!(client.exec("math.add", args![1, 2], 0), Err(Error::NotConnected));
    assert!(matches!(client.invoke("math.add", args![1, 2], 0), Err(Error::NotConnected)));

    // Nothing half-open blocks a later attempt.
    let mut server = Server::new(network, Config::default());
    server.listen("localhost", PORT)?;
    client.connect("localhost", PORT)?;
    assert_eq!(server.poll_once(), Some(ServerEvent::PeerConnected(PeerId(1))));
    Ok(())
}

#[test]
fn test_poll_for_collects_events() -> anyhow::Result<()> {
    init_tracing();
    let network = LocalNetwork::new();
    let mut server = Server::new(network.clone(), Config::default());
    server.listen("localhost", PORT)?;
    let mut client = Client::new(network, Config::default());
    client.connect("localhost", PORT)?;

    assert_eq!(server.poll_for(Duration::from_millis(1)), vec![ServerEvent::PeerConnected(PeerId(1))]);
    assert_eq!(client.poll_for(Duration::from_millis(5)), vec![ClientEvent::Connected]);
    Ok(())
}
