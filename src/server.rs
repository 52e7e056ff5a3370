//! TCP front end: accepts one avrdude at a time and pumps the session.

use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener},
    time::Duration,
};

use anyhow::Result;

use crate::{
    bus::Bus,
    isp::AvrIsp,
    session::{Session, SessionState},
    transport::{TcpTransport, Transport},
};

/// Sleep between polls while a client is connected.
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Server<B: Bus> {
    listener: TcpListener,
    avrisp: AvrIsp<B>,
    session: Session<TcpTransport>,
    poll_interval: Duration,
}

impl<B: Bus> Server<B> {
    pub fn bind(addr: SocketAddr, avrisp: AvrIsp<B>, poll_interval: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| anyhow::format_err!("cannot listen on {}: {}", addr, e))?;
        listener.set_nonblocking(true)?;
        log::info!("Listening on {}", listener.local_addr()?);
        Ok(Server {
            listener,
            avrisp,
            session: Session::new(),
            poll_interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn avrisp(&self) -> &AvrIsp<B> {
        &self.avrisp
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// One iteration: accept or reject new clients, then serve the current one.
    pub fn poll(&mut self) -> Result<SessionState> {
        self.accept_incoming()?;
        self.session.serve(&mut self.avrisp)
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let state = match self.poll() {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("poll failed: {:#}", e);
                    self.state()
                }
            };
            if state == SessionState::Idle {
                std::thread::sleep(self.poll_interval);
            } else {
                std::thread::sleep(ACTIVE_POLL_INTERVAL);
            }
        }
    }

    fn accept_incoming(&mut self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::ConnectionAborted => continue,
                Err(e) => return Err(e.into()),
            };
            let client = match TcpTransport::new(stream) {
                Ok(client) => client,
                Err(e) => {
                    log::warn!("cannot set up client {}: {}", peer, e);
                    continue;
                }
            };
            if let Err(mut client) = self.session.accept(client) {
                log::warn!("rejecting client {}, programmer busy", peer);
                if let Err(e) = client.close() {
                    log::warn!("cannot close client {}: {}", peer, e);
                }
                continue;
            }
            log::info!("client connect {}", peer);
        }
    }
}
