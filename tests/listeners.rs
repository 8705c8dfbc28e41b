use armbms_lib::{
    oid::OidMapper,
    registers::RegisterMapper,
    server::{ModbusServer, SnmpServer},
    snmp::SnmpAgent,
    store::TelemetryStore,
};
use std::{
    io::{Read, Write},
    net::{TcpStream, UdpSocket},
    sync::Arc,
    time::Duration,
};

fn store() -> Arc<TelemetryStore> {
    let store = Arc::new(TelemetryStore::new());
    store.set_arm_slave_counts([0, 0, 2, 0]);
    store.put(3, 2, 10, 2.5);
    store.put(3, 2, 11, 45.5);
    store
}

fn modbus_client(store: Arc<TelemetryStore>) -> TcpStream {
    let server = ModbusServer::bind("127.0.0.1:0", RegisterMapper::new(store)).unwrap();
    let addr = server.local_addr().unwrap();
    server.spawn().unwrap();
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn read_response(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
fn modbus_reads_slave_counts_and_arm_row() {
    let mut stream = modbus_client(store());

    stream
        .write_all(&[0x00, 0x01, 0, 0, 0, 6, 0x01, 0x03, 0, 0, 0, 4])
        .unwrap();
    assert_eq!(
        read_response(&mut stream, 17),
        vec![0x00, 0x01, 0, 0, 0, 11, 0x01, 0x03, 8, 0, 0, 0, 0, 0, 2, 0, 0]
    );

    // input registers answer like holding registers, split across writes
    stream.write_all(&[0x00, 0x02, 0, 0, 0, 6, 0x01]).unwrap();
    stream.flush().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    stream.write_all(&[0x04, 0, 1, 0, 2]).unwrap();
    let response = read_response(&mut stream, 13);
    assert_eq!(&response[..9], &[0x00, 0x02, 0, 0, 0, 7, 0x01, 0x03, 4]);
    assert_eq!(u16::from_be_bytes([response[9], response[10]]), 250);
    assert_eq!(u16::from_be_bytes([response[11], response[12]]), 4550);
}

#[test]
fn modbus_unsupported_function_gets_an_exception() {
    let mut stream = modbus_client(store());
    stream
        .write_all(&[0x12, 0x34, 0, 0, 0, 6, 0x07, 0x06, 0, 1, 0, 1])
        .unwrap();
    assert_eq!(
        read_response(&mut stream, 9),
        vec![0x12, 0x34, 0, 0, 0, 3, 0x07, 0x86, 0x01]
    );
}

#[test]
fn modbus_foreign_protocol_id_is_ignored() {
    let mut stream = modbus_client(store());
    stream
        .write_all(&[0x00, 0x09, 0x00, 0x01, 0, 6, 0x01, 0x03, 0, 0, 0, 1])
        .unwrap();
    stream
        .write_all(&[0x00, 0x0A, 0, 0, 0, 6, 0x01, 0x03, 0, 0, 0, 1])
        .unwrap();
    // only the second request is answered
    assert_eq!(
        read_response(&mut stream, 11),
        vec![0x00, 0x0A, 0, 0, 0, 5, 0x01, 0x03, 2, 0, 0]
    );
}

/// GET 1.3.6.5.9.0 with request id 1.
fn snmp_get(community: &[u8; 6]) -> Vec<u8> {
    let mut message = vec![0x30, 0x23, 0x02, 0x01, 0x01, 0x04, 0x06];
    message.extend_from_slice(community);
    message.extend_from_slice(&[
        0xA0, 0x16, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0B, 0x30, 0x09,
        0x06, 0x05, 0x2B, 0x06, 0x05, 0x09, 0x00, 0x05, 0x00,
    ]);
    message
}

fn snmp_client(store: Arc<TelemetryStore>) -> UdpSocket {
    let agent = SnmpAgent::new(
        OidMapper::new("1.3.6.5".parse().unwrap(), store),
        "public",
        64,
    );
    let server = SnmpServer::bind("127.0.0.1:0", agent).unwrap();
    let addr = server.local_addr().unwrap();
    server.spawn().unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    client
}

#[test]
fn snmp_get_over_udp() {
    let client = snmp_client(store());
    client.send(&snmp_get(b"public")).unwrap();
    let mut buf = [0u8; 512];
    let n = client.recv(&mut buf).unwrap();

    let mut expected = vec![0x30, 0x24, 0x02, 0x01, 0x01, 0x04, 0x06];
    expected.extend_from_slice(b"public");
    expected.extend_from_slice(&[
        0xA2, 0x17, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0C, 0x30, 0x0A,
        0x06, 0x05, 0x2B, 0x06, 0x05, 0x09, 0x00, 0x04, 0x01, b'2',
    ]);
    assert_eq!(&buf[..n], expected.as_slice());
}

#[test]
fn snmp_wrong_community_gets_no_answer() {
    let client = snmp_client(store());
    client.send(&snmp_get(b"secret")).unwrap();
    let mut buf = [0u8; 512];
    assert!(client.recv(&mut buf).is_err());

    // the agent keeps serving afterwards
    client.send(&snmp_get(b"public")).unwrap();
    assert!(client.recv(&mut buf).is_ok());
}
