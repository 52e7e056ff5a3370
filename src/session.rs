//! Lifecycle of the single client session.

use anyhow::Result;

use crate::{
    bus::Bus,
    isp::{AvrIsp, Outcome},
    transport::Transport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No client
    Idle,
    /// Client accepted, not served yet
    Pending,
    /// Serving commands
    Active,
}

pub struct Session<T: Transport> {
    state: SessionState,
    client: Option<T>,
}

impl<T: Transport> Default for Session<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Session<T> {
    pub fn new() -> Self {
        Session {
            state: SessionState::Idle,
            client: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != SessionState::Idle
    }

    pub fn client(&self) -> Option<&T> {
        self.client.as_ref()
    }

    /// Hand a freshly accepted client to the session. While a session is
    /// running the client is given back, the caller must close it.
    pub fn accept(&mut self, client: T) -> std::result::Result<(), T> {
        if self.is_busy() {
            return Err(client);
        }
        self.client = Some(client);
        self.state = SessionState::Pending;
        Ok(())
    }

    /// Check for client disconnect, and tear the session down if it is gone.
    pub fn update<B: Bus>(&mut self, avrisp: &mut AvrIsp<B>) -> Result<SessionState> {
        if self.state == SessionState::Idle {
            return Ok(self.state);
        }
        let alive = self.client.as_mut().is_some_and(|c| c.connected());
        if !alive {
            self.disconnect(avrisp)?;
        }
        Ok(self.state)
    }

    /// Serve every command the client has sent so far.
    pub fn serve<B: Bus>(&mut self, avrisp: &mut AvrIsp<B>) -> Result<SessionState> {
        match self.update(avrisp)? {
            SessionState::Idle => return Ok(SessionState::Idle),
            SessionState::Pending => {
                log::debug!("session active");
                self.state = SessionState::Active;
            }
            SessionState::Active => (),
        }

        let lost = match self.client.as_mut() {
            Some(client) => Self::pump(client, avrisp),
            None => false,
        };
        if lost {
            self.disconnect(avrisp)?;
            return Ok(self.state);
        }
        self.update(avrisp)
    }

    /// Handle commands until the client runs dry. Returns true when the
    /// client has to be dropped.
    fn pump<B: Bus>(client: &mut T, avrisp: &mut AvrIsp<B>) -> bool {
        loop {
            match client.available() {
                Ok(true) => (),
                Ok(false) => return false,
                Err(e) => {
                    log::warn!("client connection error: {}", e);
                    return true;
                }
            }
            match avrisp.handle_command(client) {
                Ok(Outcome::Continue) => (),
                Ok(Outcome::End) => return true,
                Err(e) => {
                    log::warn!("client lost mid-command: {}", e);
                    return true;
                }
            }
        }
    }

    fn disconnect<B: Bus>(&mut self, avrisp: &mut AvrIsp<B>) -> Result<()> {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close() {
                log::warn!("cannot close client: {}", e);
            }
        }
        log::info!("client disconnect");
        self.state = SessionState::Idle;
        // reset chip communication
        avrisp.end_pmode()
    }
}
