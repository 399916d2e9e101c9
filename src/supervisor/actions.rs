// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Side effects requested by the engine
//!
//! Event handlers in `ProtocolState` mutate only engine-owned state and
//! return everything else (timers to arm, commands for the TCP runner) in a
//! `ProtocolHandlerResult`. The engine loop applies it afterwards.

use std::net::Ipv4Addr;

use crate::protocols::msdp_tcp::MsdpTcpCommand;
use crate::protocols::TimerRequest;

#[derive(Debug, Default)]
pub struct ProtocolHandlerResult {
    pub timers: Vec<TimerRequest>,
    pub tcp_commands: Vec<MsdpTcpCommand>,
}

impl ProtocolHandlerResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timers(timers: Vec<TimerRequest>) -> Self {
        Self {
            timers,
            ..Default::default()
        }
    }

    pub fn add_timer(&mut self, timer: TimerRequest) {
        self.timers.push(timer);
    }

    pub fn add_command(&mut self, command: MsdpTcpCommand) {
        self.tcp_commands.push(command);
    }

    pub fn disconnect(&mut self, peer: Ipv4Addr) {
        self.add_command(MsdpTcpCommand::Disconnect { peer });
    }

    pub fn merge(&mut self, other: ProtocolHandlerResult) {
        self.timers.extend(other.timers);
        self.tcp_commands.extend(other.tcp_commands);
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty() && self.tcp_commands.is_empty()
    }
}
