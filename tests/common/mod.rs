// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-plc-sampler project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-process Modbus TCP controller exposing a data block as holding registers

#![allow(dead_code)]

use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

/// Registers holding the block `[1, 2, 3, 0, 0, 0, 42]`
pub const BLOCK_42: [u16; 4] = [0x0102, 0x0300, 0x0000, 0x2A00];

#[derive(Clone)]
pub struct PlcBlockService {
    registers: Arc<Mutex<Vec<u16>>>,
}

impl tokio_modbus::server::Service for PlcBlockService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                let registers = self.registers.lock().unwrap();
                let start = usize::from(addr);
                let end = start + usize::from(cnt);
                registers
                    .get(start..end)
                    .map(|window| Response::ReadHoldingRegisters(window.to_vec()))
                    .ok_or(ExceptionCode::IllegalDataAddress)
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(res)
    }
}

/// Start the controller on a free local port; the returned registers can be changed live
pub async fn start_plc_server(
    initial: &[u16],
) -> Result<(SocketAddr, Arc<Mutex<Vec<u16>>>), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    let registers = Arc::new(Mutex::new(initial.to_vec()));
    let service = PlcBlockService {
        registers: registers.clone(),
    };

    let server = Server::new(listener);
    let new_service = move |_socket_addr| Ok(Some(service.clone()));
    let on_connected = move |stream, socket_addr| {
        let new_service = new_service.clone();
        async move { accept_tcp_connection(stream, socket_addr, new_service) }
    };
    let on_process_error = |err| {
        eprintln!("Server error: {}", err);
    };

    tokio::spawn(async move {
        if let Err(e) = server.serve(&on_connected, on_process_error).await {
            eprintln!("Server error: {}", e);
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok((socket_addr, registers))
}

/// TCP relay in front of a server, counting and cutting client connections
pub struct Relay {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    active: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Drop every open connection, as a controller reboot would
    pub fn sever(&self) {
        for handle in self.active.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

pub async fn start_relay(target: SocketAddr) -> std::io::Result<Relay> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let connections = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(Mutex::new(Vec::new()));

    let accepted = connections.clone();
    let tasks = active.clone();
    tokio::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            accepted.fetch_add(1, Ordering::SeqCst);
            let handle = tokio::spawn(async move {
                if let Ok(mut outbound) = TcpStream::connect(target).await {
                    let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                }
            });
            tasks.lock().unwrap().push(handle);
        }
    });

    Ok(Relay {
        addr,
        connections,
        active,
    })
}
