//! Network listeners: Modbus TCP on a thread per connection, SNMP on a
//! single UDP socket. Both answer from the shared store and never write to it.

use crate::{
    registers::{MbapHeader, RegisterMapper, RequestError, MBAP_HEADER_LENGTH},
    snmp::SnmpAgent,
    Error,
};
use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread::{self, JoinHandle},
};

const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug)]
pub struct ModbusServer {
    listener: TcpListener,
    mapper: Arc<RegisterMapper>,
}

impl ModbusServer {
    pub fn bind(addr: impl ToSocketAddrs, mapper: RegisterMapper) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)?;
        log::info!("Modbus TCP listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            mapper: Arc::new(mapper),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails.
    pub fn serve(self) -> Result<(), Error> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("Modbus accept failed: {err}");
                    return Err(err.into());
                }
            };
            let peer = stream
                .peer_addr()
                .map_or_else(|_| "<unknown>".to_string(), |a| a.to_string());
            log::debug!("Modbus connection from {peer}");
            let mapper = self.mapper.clone();
            let spawned = thread::Builder::new()
                .name(format!("modbus-{peer}"))
                .spawn(move || {
                    if let Err(err) = handle_connection(stream, &mapper) {
                        log::warn!("Modbus connection {peer} closed: {err}");
                    } else {
                        log::debug!("Modbus connection {peer} closed");
                    }
                });
            if let Err(err) = spawned {
                log::error!("Cannot spawn Modbus connection thread: {err}");
            }
        }
        Ok(())
    }

    pub fn spawn(self) -> Result<JoinHandle<Result<(), Error>>, Error> {
        Ok(thread::Builder::new()
            .name("modbus-listener".into())
            .spawn(move || self.serve())?)
    }
}

/// Serves requests on one connection until the peer hangs up. Requests with
/// a foreign protocol id are skipped without an answer.
fn handle_connection(mut stream: TcpStream, mapper: &RegisterMapper) -> Result<(), Error> {
    let mut frame = Vec::with_capacity(260);
    loop {
        let mut header = [0u8; MBAP_HEADER_LENGTH];
        match stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        let pdu_length = MbapHeader::decode(&header).pdu_length()?;

        frame.clear();
        frame.extend_from_slice(&header);
        frame.resize(MBAP_HEADER_LENGTH + pdu_length, 0);
        stream.read_exact(&mut frame[MBAP_HEADER_LENGTH..])?;

        match mapper.handle(&frame) {
            Ok(response) => stream.write_all(&response)?,
            Err(RequestError::InvalidProtocolId(id)) => {
                log::debug!("Ignoring request with protocol id {id}");
            }
            Err(err) => log::warn!("Ignoring malformed Modbus request: {err}"),
        }
    }
}

#[derive(Debug)]
pub struct SnmpServer {
    socket: UdpSocket,
    agent: Arc<SnmpAgent>,
}

impl SnmpServer {
    pub fn bind(addr: impl ToSocketAddrs, agent: SnmpAgent) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        log::info!("SNMP agent listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            agent: Arc::new(agent),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    pub fn serve(self) -> Result<(), Error> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("SNMP receive failed: {err}");
                    return Err(err.into());
                }
            };
            match self.agent.handle_datagram(&buffer[..n]) {
                Ok(Some(response)) => {
                    if let Err(err) = self.socket.send_to(&response, peer) {
                        log::warn!("SNMP reply to {peer} failed: {err}");
                    }
                }
                Ok(None) => log::debug!("No SNMP reply for {peer}"),
                Err(err) => log::warn!("Dropping datagram from {peer}: {err}"),
            }
        }
    }

    pub fn spawn(self) -> Result<JoinHandle<Result<(), Error>>, Error> {
        Ok(thread::Builder::new()
            .name("snmp-agent".into())
            .spawn(move || self.serve())?)
    }
}
