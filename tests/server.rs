use battsim_lib::{
    battery::{Battery, Mode, PlantConfig},
    dispatcher::Dispatcher,
    protocol::Register,
    server::{Server, SharedDispatcher},
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::{ExceptionCode, Reader, Writer};
use tokio_util::sync::CancellationToken;

struct Running {
    addr: SocketAddr,
    dispatcher: SharedDispatcher,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

async fn start(battery: Battery, tick_interval: Duration) -> Running {
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(battery)));
    let server = Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::clone(&dispatcher),
        tick_interval,
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.run(shutdown.clone()));
    Running {
        addr,
        dispatcher,
        shutdown,
        handle,
    }
}

async fn exchange(stream: &mut TcpStream, request: &[u8], reply_len: usize) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    let mut reply = vec![0; reply_len];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

#[tokio::test]
async fn raw_frames() {
    let server = start(Battery::default(), Duration::from_secs(3600)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    // Read StateOfCharge
    let reply = exchange(
        &mut stream,
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x02, 0x00, 0x01],
        11,
    )
    .await;
    assert_eq!(
        reply,
        [0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x01, 0xF4]
    );

    // Write PowerToDeliver = -230, echoed back
    let request = [0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0xFF, 0x1A];
    assert_eq!(exchange(&mut stream, &request, 12).await, request);
    {
        let dispatcher = server.dispatcher.lock().unwrap();
        assert_eq!(dispatcher.battery().mode(), Mode::Charging);
        assert_eq!(dispatcher.registers().load(Register::PowerToDeliver), 0xFF1A);
    }

    // Debug trace is switched by bit 0, the reply echoes the whole word
    let request = [0x00, 0x06, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x00, 0x00, 0x03];
    assert_eq!(exchange(&mut stream, &request, 12).await, request);
    assert!(server.dispatcher.lock().unwrap().debug_trace());

    // Only single-register reads are served
    let reply = exchange(
        &mut stream,
        &[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x02, 0x00, 0x02],
        9,
    )
    .await;
    assert_eq!(reply, [0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x03]);

    // Unknown address
    let reply = exchange(
        &mut stream,
        &[0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x63, 0x00, 0x01],
        9,
    )
    .await;
    assert_eq!(reply, [0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);

    // Write Multiple Registers is not supported
    let reply = exchange(
        &mut stream,
        &[
            0x00, 0x04, 0x00, 0x00, 0x00, 0x09, 0x01, 0x10, 0x00, 0x01, 0x00, 0x01, 0x02, 0x00,
            0x05,
        ],
        9,
    )
    .await;
    assert_eq!(reply, [0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0x01, 0x90, 0x01]);

    // The connection survives exceptions.
    let reply = exchange(
        &mut stream,
        &[0x00, 0x05, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x01, 0x00, 0x01],
        11,
    )
    .await;
    assert_eq!(&reply[8..], [0x02, 0xFF, 0x1A]);

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn invalid_length_drops_connection() {
    let server = start(Battery::default(), Duration::from_secs(3600)).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01])
        .await
        .unwrap();
    let mut buf = [0u8; 16];
    let read = stream.read(&mut buf).await.unwrap_or(0);
    assert_eq!(read, 0);

    // A peer stalling inside a frame is dropped as well.
    let mut stalled = TcpStream::connect(server.addr).await.unwrap();
    stalled
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03])
        .await
        .unwrap();
    let read = tokio::time::timeout(Duration::from_secs(5), stalled.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(read, 0);

    // Other clients are still served.
    let mut ctx = tcp::connect(server.addr).await.unwrap();
    let words = ctx.read_holding_registers(2, 1).await.unwrap().unwrap();
    assert_eq!(words, [500]);
    drop(ctx);
    server.stop().await;
}

#[tokio::test]
async fn modbus_client_round_trip() {
    let server = start(Battery::default(), Duration::from_secs(3600)).await;
    let mut ctx = tcp::connect(server.addr).await.unwrap();

    for kilowatts in [i16::MIN, -230, -1, 0, 1, 230, i16::MAX] {
        ctx.write_single_register(1, kilowatts as u16)
            .await
            .unwrap()
            .unwrap();
        let words = ctx.read_holding_registers(1, 1).await.unwrap().unwrap();
        assert_eq!(words, [kilowatts as u16]);
    }

    let err = ctx.read_holding_registers(99, 1).await.unwrap().unwrap_err();
    assert_eq!(err, ExceptionCode::IllegalDataAddress);

    let err = ctx.write_single_register(2, 1000).await.unwrap().unwrap_err();
    assert_eq!(err, ExceptionCode::IllegalDataAddress);

    drop(ctx);
    server.stop().await;
}

#[tokio::test]
async fn ticker_drives_state_of_charge() {
    let battery = Battery::new(PlantConfig {
        // 1 % per tick at rated power
        power_rating_kw: 100,
        seconds_for_0_to_100_charge: 100,
        seconds_for_100_to_0_discharge: 100,
        initial_state_of_charge: 95.0,
    })
    .unwrap();
    let server = start(battery, Duration::from_millis(10)).await;
    let mut ctx = tcp::connect(server.addr).await.unwrap();

    ctx.write_single_register(1, (-100i16) as u16)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let words = ctx.read_holding_registers(2, 1).await.unwrap().unwrap();
    assert_eq!(words, [1000]);
    assert_eq!(server.dispatcher.lock().unwrap().battery().mode(), Mode::Idle);

    // The setpoint still reads back verbatim after the clamp.
    let words = ctx.read_holding_registers(1, 1).await.unwrap().unwrap();
    assert_eq!(words, [(-100i16) as u16]);

    drop(ctx);
    server.stop().await;
}
