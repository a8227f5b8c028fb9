mod common;

use common::{TestServer, spawn, spawn_with};
use core::time::Duration;
use philote_tonic_client::{ClientConfig, ExplicitClient, ImplicitClient, recover_arrays};
use philote_tonic_core::{
    Array, ArrayMap, Error, Jacobian, Metadata, Options, Result, Role,
    proto::{ArrayChunk, VariableRole, explicit_service_client::ExplicitServiceClient},
};
use philote_tonic_server::{
    AnyDiscipline, Discipline, ExplicitDiscipline, ServerConfig,
    disciplines::{Paraboloid, Rosenbrock, rosen, rosen_der},
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Response, Status, Streaming};

const DEADLINE: Duration = Duration::from_secs(3);

fn paraboloid_inputs(x: f64, y: f64) -> ArrayMap {
    ArrayMap::from_iter([("x", Array::scalar(x)), ("y", Array::scalar(y))])
}

fn input_chunk(name: &str, start: u64, data: Vec<f64>) -> ArrayChunk {
    ArrayChunk {
        name: name.to_string(),
        subname: String::new(),
        role: VariableRole::Input as i32,
        start,
        end: start + data.len() as u64,
        data,
    }
}

type PendingCompute = JoinHandle<core::result::Result<Response<Streaming<ArrayChunk>>, Status>>;

/// Starts `ComputeFunction` with `first` already sent and the request stream
/// left open. Returns once the server is serving the call.
async fn open_compute(server: &TestServer, first: Vec<ArrayChunk>) -> (mpsc::Sender<ArrayChunk>, PendingCompute) {
    let (tx, rx) = mpsc::channel(8);
    for chunk in first {
        tx.send(chunk).await.unwrap();
    }
    let mut stub = ExplicitServiceClient::new(server.channel().await);
    let pending = tokio::spawn(async move { stub.compute_function(ReceiverStream::new(rx)).await });

    timeout(DEADLINE, async {
        while server.service.inflight() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    (tx, pending)
}

fn rpc_code(err: Error) -> Code {
    match err {
        Error::Rpc { code, .. } => code,
        other => panic!("expected an RPC error, got {other:?}"),
    }
}

#[tokio::test]
async fn paraboloid_value_and_gradient() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let props = client.get_discipline_info().await.unwrap();
    assert!(props.provides_gradients);
    assert!(client.properties().is_some());

    let inputs = paraboloid_inputs(1.0, 2.0);
    let outputs = client.compute(&inputs).await.unwrap();
    assert_eq!(outputs.scalar("f").unwrap(), 39.0);

    let jac = client.compute_partials(&inputs).await.unwrap();
    assert_eq!(jac.len(), 2);
    assert_eq!(jac[("f", "x")].value(), -2.0);
    assert_eq!(jac[("f", "y")].value(), 13.0);
}

#[tokio::test]
async fn repeated_setup_yields_identical_definitions() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());

    client.configure().await.unwrap();
    let first = client.metadata().clone();
    client.configure().await.unwrap();

    assert_eq!(client.metadata(), &first);
    assert_eq!(first.variables().len(), 3);
    let partials: Vec<_> = first
        .partials()
        .iter()
        .map(|p| (p.of.as_str(), p.wrt.as_str()))
        .collect();
    assert_eq!(partials, [("f", "x"), ("f", "y")]);
}

#[tokio::test]
async fn evaluation_before_setup_is_rejected() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());

    let err = client.compute(&paraboloid_inputs(1.0, 2.0)).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::FailedPrecondition);
}

#[tokio::test]
async fn rosenbrock_with_options_and_small_chunks() {
    // Both directions use chunks smaller than the array.
    let server = spawn(AnyDiscipline::explicit(Rosenbrock::default()), 2).await;
    let config = ClientConfig {
        num_double: 2,
        ..ClientConfig::default()
    };
    let mut client = ExplicitClient::new(server.channel().await, config);

    let options = Options::from([("dimension".to_string(), 5.0)]);
    client.send_options(&options).await.unwrap();
    client.configure().await.unwrap();
    assert_eq!(
        client
            .metadata()
            .variable("x", philote_tonic_core::Role::Input)
            .unwrap()
            .shape,
        vec![5]
    );

    let x = vec![0.5, 1.5, 3.5, 4.5, 5.5];
    let inputs = ArrayMap::from_iter([("x", Array::vector(x.clone()))]);

    let outputs = client.compute(&inputs).await.unwrap();
    assert_eq!(outputs.scalar("f").unwrap(), rosen(&x));

    let jac = client.compute_partials(&inputs).await.unwrap();
    let mut expected = vec![0.0; 5];
    rosen_der(&x, &mut expected);
    assert_eq!(jac[("f", "x")].shape(), &[5]);
    assert_eq!(jac[("f", "x")].as_slice(), expected.as_slice());
}

#[tokio::test]
async fn invalid_option_is_rejected() {
    let server = spawn(AnyDiscipline::explicit(Rosenbrock::default()), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());

    let options = Options::from([("dimension".to_string(), 1.5)]);
    let err = client.send_options(&options).await.unwrap_err();
    assert_eq!(rpc_code(err), Code::InvalidArgument);
}

#[tokio::test]
async fn undeclared_input_name_fails_the_rpc() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let channel = server.channel().await;
    let mut client = ExplicitClient::new(channel.clone(), ClientConfig::default());
    client.configure().await.unwrap();

    let chunk = ArrayChunk {
        name: "z".to_string(),
        subname: String::new(),
        role: VariableRole::Input as i32,
        start: 0,
        end: 1,
        data: vec![1.0],
    };
    let status = ExplicitServiceClient::new(channel)
        .compute_function(tokio_stream::iter(vec![chunk]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn out_of_range_chunk_fails_the_rpc() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let channel = server.channel().await;
    let mut client = ExplicitClient::new(channel.clone(), ClientConfig::default());
    client.configure().await.unwrap();

    let chunk = ArrayChunk {
        name: "x".to_string(),
        subname: String::new(),
        role: VariableRole::Input as i32,
        start: 1,
        end: 2,
        data: vec![1.0],
    };
    let status = ExplicitServiceClient::new(channel)
        .compute_function(tokio_stream::iter(vec![chunk]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);
}

#[tokio::test]
async fn implicit_rpcs_are_unimplemented_on_explicit_disciplines() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut explicit = ExplicitClient::new(server.channel().await, ClientConfig::default());
    explicit.configure().await.unwrap();

    let mut implicit = ImplicitClient::new(server.channel().await, ClientConfig::default());
    let err = implicit
        .compute_residuals(&paraboloid_inputs(1.0, 2.0), &ArrayMap::new())
        .await
        .unwrap_err();
    assert_eq!(rpc_code(err), Code::Unimplemented);
}

#[tokio::test]
async fn concurrent_setup_and_compute_stay_consistent() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let channel = server.channel().await;
        tasks.push(tokio::spawn(async move {
            let mut client = ExplicitClient::new(channel, ClientConfig::default());
            client.fetch_variable_definitions().await.unwrap();
            client.fetch_partial_definitions().await.unwrap();
            for _ in 0..10 {
                if i % 2 == 0 {
                    client.run_setup().await.unwrap();
                }
                let outputs = client.compute(&paraboloid_inputs(1.0, 2.0)).await.unwrap();
                assert_eq!(outputs.scalar("f").unwrap(), 39.0);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn shutdown_refuses_new_requests() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    server.service.shutdown().await.unwrap();
    assert_eq!(server.service.inflight(), 0);

    let err = client.run_setup().await.unwrap_err();
    assert_eq!(rpc_code(err), Code::Unavailable);
}

#[tokio::test]
async fn open_input_stream_does_not_block_other_clients() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let (tx, pending) = open_compute(&server, vec![input_chunk("x", 0, vec![1.0])]).await;

    let mut other = ExplicitClient::new(server.channel().await, ClientConfig::default());
    timeout(DEADLINE, other.get_discipline_info())
        .await
        .expect("GetInfo waited on the open stream")
        .unwrap();
    timeout(DEADLINE, other.configure())
        .await
        .expect("Setup waited on the open stream")
        .unwrap();
    let outputs = timeout(DEADLINE, other.compute(&paraboloid_inputs(3.0, -4.0)))
        .await
        .expect("ComputeFunction waited on the open stream")
        .unwrap();
    assert_eq!(outputs.scalar("f").unwrap(), -15.0);

    // Re-running Setup left the metadata unchanged, so the open call completes.
    tx.send(input_chunk("y", 0, vec![2.0])).await.unwrap();
    drop(tx);
    let response = pending.await.unwrap().unwrap();
    let outputs = recover_arrays(response.into_inner(), client.metadata(), Role::Output)
        .await
        .unwrap();
    assert_eq!(outputs.scalar("f").unwrap(), 39.0);
}

#[tokio::test]
async fn reconfiguration_during_input_aborts_the_evaluation() {
    let server = spawn(AnyDiscipline::explicit(Rosenbrock::default()), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let (tx, pending) = open_compute(&server, vec![input_chunk("x", 0, vec![1.0, 1.0])]).await;

    let options = Options::from([("dimension".to_string(), 3.0)]);
    client.send_options(&options).await.unwrap();
    client.configure().await.unwrap();

    drop(tx);
    let status = pending.await.unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Aborted);
}

#[tokio::test]
async fn shutdown_cuts_off_an_open_input_stream() {
    let config = ServerConfig {
        shutdown_timeout: 0,
        ..ServerConfig::default()
    };
    let server = spawn_with(AnyDiscipline::explicit(Paraboloid), config).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let (tx, pending) = open_compute(&server, vec![input_chunk("x", 0, vec![1.0])]).await;

    timeout(DEADLINE, server.service.shutdown())
        .await
        .expect("shutdown hung on the open stream")
        .unwrap();
    let status = timeout(DEADLINE, pending).await.unwrap().unwrap().unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    drop(tx);
}

#[tokio::test]
async fn repeated_input_chunk_fails_the_rpc() {
    let server = spawn(AnyDiscipline::explicit(Paraboloid), 1000).await;
    let channel = server.channel().await;
    let mut client = ExplicitClient::new(channel.clone(), ClientConfig::default());
    client.configure().await.unwrap();

    let chunks = vec![
        input_chunk("x", 0, vec![1.0]),
        input_chunk("y", 0, vec![2.0]),
        input_chunk("x", 0, vec![5.0]),
    ];
    let status = ExplicitServiceClient::new(channel)
        .compute_function(tokio_stream::iter(chunks))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("`x`"), "{}", status.message());
}

/// Declares a partial with respect to a variable that does not exist.
struct UndeclaredWrt;

impl Discipline for UndeclaredWrt {
    fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.add_input("x", &[1], "")?;
        meta.add_output("f", &[1], "")
    }

    fn setup_partials(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.declare_partials("f", "q");
        Ok(())
    }
}

impl ExplicitDiscipline for UndeclaredWrt {
    fn compute(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()> {
        outputs["f"][0] = 2.0 * inputs.scalar("x")?;
        Ok(())
    }

    fn compute_partials(&mut self, _inputs: &ArrayMap, _jac: &mut Jacobian) -> Result<()> {
        Ok(())
    }
}

/// Computes a value but has no gradient.
struct ValueOnly;

impl Discipline for ValueOnly {
    fn setup(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.add_input("x", &[1], "")?;
        meta.add_output("f", &[1], "")
    }

    fn setup_partials(&mut self, meta: &mut Metadata) -> Result<()> {
        meta.declare_partials("f", "x");
        Ok(())
    }
}

impl ExplicitDiscipline for ValueOnly {
    fn compute(&mut self, inputs: &ArrayMap, outputs: &mut ArrayMap) -> Result<()> {
        outputs["f"][0] = inputs.scalar("x")?.sin();
        Ok(())
    }
}

#[tokio::test]
async fn partial_of_undeclared_variable_fails_gradient() {
    let server = spawn(AnyDiscipline::explicit(UndeclaredWrt), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let inputs = ArrayMap::from_iter([("x", Array::scalar(1.5))]);
    let outputs = client.compute(&inputs).await.unwrap();
    assert_eq!(outputs.scalar("f").unwrap(), 3.0);

    match client.compute_partials(&inputs).await.unwrap_err() {
        Error::Rpc { code, message } => {
            assert_eq!(code, Code::FailedPrecondition);
            assert!(message.contains("`q`"), "{message}");
        }
        other => panic!("expected an RPC error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_gradient_hook_is_unimplemented() {
    let server = spawn(AnyDiscipline::explicit(ValueOnly), 1000).await;
    let mut client = ExplicitClient::new(server.channel().await, ClientConfig::default());
    client.configure().await.unwrap();

    let inputs = ArrayMap::from_iter([("x", Array::scalar(0.0))]);
    assert_eq!(client.compute(&inputs).await.unwrap().scalar("f").unwrap(), 0.0);

    match client.compute_partials(&inputs).await.unwrap_err() {
        Error::Rpc { code, message } => {
            assert_eq!(code, Code::Unimplemented);
            assert!(message.contains("compute_partials"), "{message}");
        }
        other => panic!("expected an RPC error, got {other:?}"),
    }
}
